use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid selection spec '{spec}': {reason}")]
    InvalidSpec { spec: String, reason: String },

    #[error("cannot resolve module '{module}': expected {} or {}", candidates.0.display(), candidates.1.display())]
    ModuleNotFound {
        module: String,
        candidates: (PathBuf, PathBuf),
    },

    #[error("no function '{function}' in {}", path.display())]
    FunctionNotFound { function: String, path: PathBuf },

    #[error("failed to parse {}: {source}", path.display())]
    ParseError {
        path: PathBuf,
        #[source]
        source: syn::Error,
    },

    #[error("failed to read {}: {source}", path.display())]
    ReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid display format: {0}")]
    Format(#[from] takt_runtime::ConfigError),

    #[error("build failed: {0}")]
    BuildFailed(String),

    #[error("run failed: {0}")]
    RunFailed(String),

    #[error("no instrumented binary found -- run `takt build` first")]
    NoBinary,

    #[error("{0}")]
    Io(#[from] std::io::Error),
}
