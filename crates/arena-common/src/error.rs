// error.rs - configuration errors

use thiserror::Error as ThisError;

#[derive(Debug, ThisError)]
pub enum ConfigError {
    #[error("line {line}: {reason}")]
    BadLine { line: usize, reason: String },

    #[error("{0} is write protected")]
    WriteProtected(String),

    #[error("invalid value {value:?} for {name}")]
    InvalidValue { name: String, value: String },

    #[error("cvar registry not initialized")]
    Uninitialized,

    #[error("config I/O failed: {0}")]
    Io(#[from] std::io::Error),
}
