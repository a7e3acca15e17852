use thiserror::Error as ThisError;

/// Errors the core distinguishes. `IdentityError` and `NodeNotFound` are
/// local control flow between [`crate::router`] stages and a caller should
/// never let either escape to an application callback; dead-peer detection
/// belongs to `pastry-net` (it requires a transport to observe), not here.
#[derive(ThisError, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoreError {
    /// The operation's target is self — the caller is the destination.
    #[error("identity: operation targets self")]
    IdentityError,

    /// A table lookup found no suitable entry; used internally by the
    /// router to fall through to the next stage.
    #[error("node not found")]
    NodeNotFound,

    /// Tried to insert a nil/zero node, or construct a [`crate::NodeId`]
    /// from fewer than 16 bytes.
    #[error("invalid argument")]
    InvalidArgument,

    /// An invariant was violated (e.g. a prefix length >= 32 computed from
    /// two ids that are not actually equal). Always a programmer bug.
    #[error("impossible state reached")]
    ImpossibleState,

    /// Constructing a `NodeId` from a buffer shorter than 16 bytes.
    #[error("insufficient bytes to construct a node id (need >= 16)")]
    InsufficientBytes,
}

pub type CoreResult<T> = Result<T, CoreError>;
