use pastry_core::{LeafSetDump, Message, Node};
use pastry_net::ClusterCallbacks;
use tracing::{info, warn};

/// The demo application spec.md treats as an external collaborator: it
/// logs every callback the core fires and otherwise does nothing. A real
/// host would replace this with whatever it actually wants to do with
/// delivered payloads.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingApp;

impl ClusterCallbacks for LoggingApp {
    fn on_error(&self, message: String) {
        warn!(%message, "cluster error");
    }

    fn on_deliver(&self, msg: &Message) {
        info!(
            key = %msg.key,
            sender = %msg.sender.id,
            payload_len = msg.payload.len(),
            "delivered locally"
        );
    }

    fn on_forward(&self, msg: &Message, next_hop: &Node) -> bool {
        info!(key = %msg.key, next_hop = %next_hop.id, "forwarding");
        true
    }

    fn on_new_leaves(&self, snapshot: &LeafSetDump) {
        info!(
            left = snapshot.left.len(),
            right = snapshot.right.len(),
            "leaf set changed"
        );
    }

    fn on_node_join(&self, node: &Node) {
        info!(peer = %node.id, "peer joined");
    }

    fn on_node_exit(&self, node: &Node) {
        info!(peer = %node.id, "peer left");
    }

    fn on_heartbeat(&self, node: &Node) {
        info!(peer = %node.id, proximity = node.raw_proximity, "heartbeat");
    }
}
