use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::parser::ParserState;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Bad token or grammar. `position` is the byte offset into the text being parsed.
    #[error("{statement}: {message}: unexpected {token:?} at position {position} (state {state:?})")]
    Parse {
        statement: &'static str,
        state: ParserState,
        token: String,
        position: usize,
        message: String,
    },

    #[error("schema error: {0}")]
    Schema(String),

    /// The lock file has been in place longer than the configured timeout.
    #[error("lock {path} has been held for more than {timeout_secs} seconds")]
    LockTimeout { path: PathBuf, timeout_secs: u64 },

    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },

    #[error("I/O error on {path}: {source}")]
    IoAt { path: PathBuf, source: io::Error },

    #[error("operator {0} is not implemented")]
    UnimplementedOperator(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub(crate) fn io_at(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Error::IoAt {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn schema(message: impl Into<String>) -> Self {
        Error::Schema(message.into())
    }

    pub fn is_parse(&self) -> bool {
        matches!(self, Error::Parse { .. })
    }

    pub fn is_schema(&self) -> bool {
        matches!(self, Error::Schema(_))
    }
}
