use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum ViewError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("query parse error: {0}")]
    QueryParse(String),

    #[error("invalid glob pattern: {0}")]
    Glob(String),

    #[error("invalid regex: {0}")]
    Regex(#[from] regex::Error),

    #[error("timed out waiting for {0}")]
    Timeout(&'static str),

    #[error("root was cancelled")]
    Cancelled,

    #[error("root is gone: {0}")]
    RootLost(PathBuf),

    #[error("watcher error: {0}")]
    Watcher(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ViewError {
    /// Create a query parse error
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::QueryParse(msg.into())
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}

impl From<notify::Error> for ViewError {
    fn from(error: notify::Error) -> Self {
        Self::Watcher(error.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ViewError>;
