use pastry_core::{LeafSetDump, Message, Node};

/// The application-facing event surface. Every method has a no-op default
/// so a host only implements what it cares about.
pub trait ClusterCallbacks: Send + Sync {
    /// A non-fatal error occurred (codec, I/O, an impossible-state
    /// invariant). Never called for IdentityError or NodeNotFound, which
    /// are internal router control flow, nor for DeadNode, which is
    /// handled as a table repair.
    fn on_error(&self, _message: String) {}

    /// `msg` was routed to self and delivered locally.
    fn on_deliver(&self, _msg: &Message) {}

    /// `msg` is about to be forwarded to `next_hop`. Returning `false`
    /// vetoes the forward; the message is dropped.
    fn on_forward(&self, _msg: &Message, _next_hop: &Node) -> bool {
        true
    }

    /// The leaf set changed; `snapshot` is its state after the change.
    fn on_new_leaves(&self, _snapshot: &LeafSetDump) {}

    /// `node` completed a join and is now known to self.
    fn on_node_join(&self, _node: &Node) {}

    /// `node` left (gracefully or via dead-node detection) and was
    /// removed from self's tables.
    fn on_node_exit(&self, _node: &Node) {}

    /// `node` answered a heartbeat.
    fn on_heartbeat(&self, _node: &Node) {}
}

/// A callback set that does nothing, for tests and minimal binaries that
/// don't care about the event stream.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopCallbacks;

impl ClusterCallbacks for NoopCallbacks {}
