//! Error types shared by the engine, the content channel and index processors.

use thiserror::Error;

use crate::engine::CrawlStats;
use crate::models::NodePath;

/// Errors surfaced to callers of the index engine.
#[derive(Debug, Error)]
pub enum IndexError {
    /// The workspace does not exist in the content source.
    #[error("workspace '{workspace}' does not exist in source '{source_name}'")]
    UnknownWorkspace { workspace: String, source_name: String },

    /// The content source could not be read. Retryable.
    #[error("unable to read from source '{source_name}': {reason}")]
    SourceAccess {
        source_name: String,
        #[source]
        reason: SourceError,
    },

    /// The index processor failed to apply or finish work. A crawl that was cut short
    /// carries its partial progress in `stats`.
    #[error("indexing failed in workspace '{workspace}': {message}")]
    Indexing { workspace: String, message: String, stats: Option<CrawlStats> },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl IndexError {
    pub fn indexing(workspace: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Indexing { workspace: workspace.into(), message: message.into(), stats: None }
    }

    /// Progress a crawl made before the index rejected one of its requests.
    pub fn partial_stats(&self) -> Option<&CrawlStats> {
        match self {
            Self::Indexing { stats, .. } => stats.as_ref(),
            _ => None,
        }
    }

    /// Whether retrying the same call later may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::SourceAccess { .. })
    }
}

/// Failures reported by a content source or by the channel reading from it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SourceError {
    #[error("no node at {path} in workspace '{workspace}'")]
    PathNotFound { workspace: String, path: NodePath },

    #[error("workspace '{0}' is not available in the source")]
    NoSuchWorkspace(String),

    #[error("source unavailable: {0}")]
    Unavailable(String),

    #[error("read did not complete within {0} ms")]
    Timeout(u64),

    #[error("channel was cancelled")]
    Cancelled,

    /// The waiting caller was asked to stop.
    #[error("wait was interrupted")]
    Interrupted,
}

pub type Result<T> = std::result::Result<T, IndexError>;
