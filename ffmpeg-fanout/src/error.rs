use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum FanoutError {
    /// Every target is disabled; nothing to fan out to.
    #[error("no outputs enabled")]
    ConfigurationEmpty,

    #[error("invalid output target {name:?}: {reason}")]
    InvalidTarget { name: String, reason: String },

    #[error("failed to start encoder {program:?} for output {name:?}: {source}")]
    Spawn {
        name: String,
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to signal output {name:?}: {source}")]
    Signal {
        name: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to wait for output {name:?}: {source}")]
    Wait {
        name: String,
        #[source]
        source: io::Error,
    },

    #[error("console write failed: {0}")]
    Console(#[from] io::Error),
}

impl FanoutError {
    /// Process exit status for this error. An empty configuration is a normal exit.
    pub fn exit_code(&self) -> i32 {
        match self {
            FanoutError::ConfigurationEmpty => 0,
            _ => 1,
        }
    }
}

pub type Result<T> = std::result::Result<T, FanoutError>;
