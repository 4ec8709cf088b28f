/// Display-configuration errors, raised eagerly before any tracing begins.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("expected 1 to 3 thresholds, got {0}")]
    ThresholdCount(usize),

    #[error("{colors} colors cannot span {thresholds} thresholds (need thresholds + 1)")]
    PaletteMismatch { thresholds: usize, colors: usize },

    #[error("thresholds must be positive and strictly descending: {0:?}")]
    NotDescending(Vec<f64>),

    #[error("unknown display flag '{0}' (expected b, l, h, or c)")]
    UnknownFlag(char),

    #[error("invalid display width '{0}'")]
    InvalidWidth(String),

    #[error("invalid threshold '{0}'")]
    InvalidThreshold(String),
}
