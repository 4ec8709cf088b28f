pub mod build;
pub mod error;
pub mod resolve;
pub mod rewrite;
