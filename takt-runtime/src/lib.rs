//! Runtime support for takt-instrumented binaries.
//!
//! The takt CLI rewrites watched routines to call [`enter`] on entry and
//! [`line`] at each statement boundary, and registers each routine's
//! captured source via [`register_unit`] at startup. This crate turns those
//! checkpoints into per-line wall-clock timings and renders the final
//! color-coded report. The same API supports manual annotation without the
//! rewriter.
//!
//! Tracing is single-threaded and cooperative: all state is thread-local,
//! and each thread that wants tracing installs its own [`Stopwatch`].

mod color;
mod engine;
mod error;
mod format;
mod render;
mod session;

pub use color::{ColorPicker, Rgb};
pub use engine::{
    enter, line, register_unit, registered_units, FrameGuard, LineTiming, Report, Stopwatch,
    UnitBlock, UnitId,
};
pub use error::ConfigError;
pub use format::TimeFormatter;
pub use render::{render, RenderOptions, DEFAULT_THRESHOLDS, DEFAULT_WIDTH};
pub use session::{session_from_env, Session, FORMAT_VAR, MIN_TOTAL_VAR, PROFILE_VAR};
