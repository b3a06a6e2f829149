use std::io;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use typescope_ast::AstError;
use typescope_persistence::PersistenceError;

pub type Result<T> = std::result::Result<T, IndexError>;

/// Failure of an external metadata computation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    #[error("provider `{provider}` failed: {message}")]
    Failed { provider: String, message: String },

    #[error("provider `{provider}` returned malformed output: {message}")]
    MalformedOutput { provider: String, message: String },
}

impl ProviderError {
    pub fn failed(provider: &str, message: impl Into<String>) -> Self {
        Self::Failed {
            provider: provider.to_string(),
            message: message.into(),
        }
    }

    pub fn malformed(provider: &str, message: impl Into<String>) -> Self {
        Self::MalformedOutput {
            provider: provider.to_string(),
            message: message.into(),
        }
    }
}

/// Errors surfaced by the repository index.
///
/// Every variant owns plain strings so one result can be handed to all
/// callers waiting on the same in-flight build.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IndexError {
    #[error("{path}:{line}:{column}: syntax error: {message}")]
    Parse {
        path: String,
        line: usize,
        column: usize,
        message: String,
    },

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("provider resolution timed out after {0:?}")]
    ProviderTimeout(Duration),

    #[error("I/O error on {path}: {message}")]
    Io { path: String, message: String },

    #[error("metadata cache error: {0}")]
    Cache(String),

    #[error("{0} is outside the repository root")]
    OutsideRoot(String),

    #[error("{0} is not a tracked source file")]
    UntrackedFile(String),

    #[error("interval {start}..{end} is empty")]
    EmptyInterval { start: String, end: String },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("background task failed: {0}")]
    TaskJoin(String),
}

impl IndexError {
    pub fn io(path: &Path, err: &io::Error) -> Self {
        Self::Io {
            path: path.display().to_string(),
            message: err.to_string(),
        }
    }

    /// Convert a parser error for the file at `path`.
    pub fn parse(path: &str, err: AstError) -> Self {
        match err {
            AstError::Syntax {
                line,
                column,
                message,
            } => Self::Parse {
                path: path.to_string(),
                line,
                column,
                message,
            },
            other => Self::Parse {
                path: path.to_string(),
                line: 0,
                column: 0,
                message: other.to_string(),
            },
        }
    }

    /// True when the file itself cannot be indexed, as opposed to a failure
    /// of the surrounding machinery.
    pub const fn is_parse_error(&self) -> bool {
        matches!(self, Self::Parse { .. })
    }
}

impl From<PersistenceError> for IndexError {
    fn from(err: PersistenceError) -> Self {
        Self::Cache(err.to_string())
    }
}

impl From<tokio::task::JoinError> for IndexError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::TaskJoin(err.to_string())
    }
}
