//! Error type for commit coordination.

use logicterm_logic::{LogicError, Nid};
use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, CommitError>;

#[derive(Debug, thiserror::Error)]
pub enum CommitError {
    #[error("failed to persist component {nid}")]
    Persistence {
        nid: Nid,
        #[source]
        source: anyhow::Error,
    },

    #[error("write permit pool was closed")]
    PermitPoolClosed,

    #[error("write task did not complete")]
    TaskJoin(#[from] tokio::task::JoinError),

    #[error("write permit capacity {capacity} exceeds a single drain request")]
    PermitCapacity { capacity: usize },

    #[error("malformed {}: {reason}", path.display())]
    Format { path: PathBuf, reason: String },

    #[error("invalid commit configuration")]
    Config(#[from] serde_json::Error),

    #[error(transparent)]
    Logic(#[from] LogicError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl CommitError {
    pub(crate) fn format(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::Format {
            path: path.into(),
            reason: reason.into(),
        }
    }
}
