//! Error type for logical-expression operations.

use crate::codec::DataSource;
use crate::node::{NodeSemantic, Nid};
use uuid::Uuid;

pub type Result<T> = std::result::Result<T, LogicError>;

#[derive(Debug, thiserror::Error)]
pub enum LogicError {
    #[error("unsupported node data format version {found} (reader supports {expected})")]
    FormatVersion { found: u8, expected: u8 },

    #[error("unsupported node semantic byte {0:#04x}")]
    UnsupportedSemantic(u8),

    #[error("node semantic {semantic:?} is not supported for {data_source:?} data")]
    UnsupportedDataSource {
        semantic: NodeSemantic,
        data_source: DataSource,
    },

    #[error("node record truncated at byte {offset} (record length {len})")]
    Truncated { offset: usize, len: usize },

    #[error("{trailing} trailing bytes after node record")]
    TrailingBytes { trailing: usize },

    #[error("string payload is not valid UTF-8")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),

    #[error("depth limit {limit} exceeded at node {node}; the expression graph contains a cycle")]
    DepthLimitExceeded { node: usize, limit: usize },

    #[error("node {0} does not exist")]
    MissingNode(usize),

    #[error("node {parent} refers to child {child}, which does not exist")]
    DanglingChild { parent: usize, child: usize },

    #[error("expression has no root node")]
    MissingRoot,

    #[error("node {second} is a second root (root is node {first})")]
    DuplicateRoot { first: usize, second: usize },

    #[error("malformed expression: {0}")]
    Malformed(String),

    #[error("no universal identifiers known for nid {0}")]
    UnknownNid(Nid),

    #[error("no nid known for identifiers {0:?}")]
    UnknownUuids(Vec<Uuid>),

    #[error("isomorphism computation failed for concept {concept_nid}: {source}")]
    Isomorphism {
        concept_nid: Nid,
        #[source]
        source: Box<LogicError>,
    },
}

impl LogicError {
    pub(crate) fn malformed(message: impl Into<String>) -> Self {
        Self::Malformed(message.into())
    }
}
