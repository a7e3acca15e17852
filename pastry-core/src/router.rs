use crate::error::CoreError;
use crate::leaf_set::LeafSet;
use crate::node::Node;
use crate::node_id::NodeId;
use crate::routing_table::RoutingTable;
use tracing::trace;

/// Composes the leaf set and routing table into the three-stage next-hop
/// selection: leaf set first (it knows the immediate ring neighborhood
/// precisely), routing table second (it makes progress by shared prefix
/// when the leaf set doesn't cover the key), and self last.
pub struct Router {
    leaf_set: LeafSet,
    routing_table: RoutingTable,
}

impl Router {
    pub fn new(leaf_set: LeafSet, routing_table: RoutingTable) -> Self {
        Self {
            leaf_set,
            routing_table,
        }
    }

    /// `None` means "deliver locally": either table concluded self is the
    /// numerically closest live node to `key`. `Some(peer)` is the next
    /// hop to forward toward.
    pub fn route(&self, key: NodeId) -> Option<Node> {
        match self.leaf_set.route(key) {
            Ok(peer) => {
                trace!(%key, via = "leaf_set", "routed");
                return Some(peer);
            }
            Err(CoreError::IdentityError) => return None,
            Err(CoreError::NodeNotFound) => {}
            Err(_) => return None,
        }

        match self.routing_table.route(key) {
            Ok(peer) => {
                trace!(%key, via = "routing_table", "routed");
                Some(peer)
            }
            Err(CoreError::IdentityError) => None,
            Err(CoreError::NodeNotFound) => None,
            Err(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::SelfIdentity;

    fn identity(id: u128) -> SelfIdentity {
        SelfIdentity::new(NodeId::from_u128(id), "home".into(), 5)
    }

    fn node(id: u128) -> Node {
        Node::new(
            NodeId::from_u128(id),
            format!("local-{id}"),
            format!("global-{id}"),
            "home".into(),
        )
    }

    fn router_for(id: u128) -> (Router, LeafSet, RoutingTable) {
        let ident = identity(id);
        let leaf = LeafSet::new(ident.clone());
        let table = RoutingTable::new(ident);
        (Router::new(leaf.clone(), table.clone()), leaf, table)
    }

    #[test]
    fn route_to_self_returns_none() {
        let (router, _leaf, _table) = router_for(42);
        assert!(router.route(NodeId::from_u128(42)).is_none());
    }

    #[test]
    fn leaf_set_answer_takes_priority_over_routing_table() {
        let (router, leaf, table) = router_for(0);
        let near = node(100);
        let far_but_same_cell = node(0x1000_0000_0000_0000_0000_0000_0000_0000);
        leaf.insert(near.clone()).unwrap();
        table.insert(far_but_same_cell).unwrap();

        let routed = router.route(NodeId::from_u128(150)).unwrap();
        assert_eq!(routed.id, near.id);
    }

    #[test]
    fn falls_through_to_routing_table_when_leaf_set_uncovered() {
        let (router, _leaf, table) = router_for(0);
        let key = NodeId::from_u128(0x2000_0000_0000_0000_0000_0000_0000_0000);
        let near = node(0x1fff_0000_0000_0000_0000_0000_0000_0000);
        table.insert(near.clone()).unwrap();

        let routed = router.route(key).unwrap();
        assert_eq!(routed.id, near.id);
    }

    #[test]
    fn no_candidates_anywhere_returns_none() {
        let (router, _leaf, _table) = router_for(0);
        assert!(router.route(NodeId::from_u128(12345)).is_none());
    }
}
