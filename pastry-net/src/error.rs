use thiserror::Error as ThisError;

/// Errors surfaced once a transport is in the picture. `CoreError` variants
/// that can still happen this far out (identity/not-found as local router
/// control flow) are folded in rather than duplicated.
#[derive(ThisError, Debug)]
pub enum NetError {
    #[error(transparent)]
    Core(#[from] pastry_core::CoreError),

    /// A dial or per-frame exchange exceeded `network_timeout`. Always
    /// converted into a table removal plus one re-plan at the send site,
    /// per the DeadNode propagation rule.
    #[error("peer unreachable within the network timeout: {0}")]
    DeadNode(String),

    /// A channel or table operation exceeded its own deadline, surfaced to
    /// the application rather than handled internally.
    #[error("operation timed out: {0}")]
    Timeout(String),

    #[error("codec error: {0}")]
    Codec(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// An invariant was violated; always a programmer bug.
    #[error("impossible state: {0}")]
    ImpossibleState(String),
}

pub type NetResult<T> = Result<T, NetError>;

impl NetError {
    /// True for failures that should trigger removing the peer from all
    /// three tables and, for application sends, a single re-plan.
    pub fn is_dead_node(&self) -> bool {
        matches!(self, NetError::DeadNode(_))
    }
}
