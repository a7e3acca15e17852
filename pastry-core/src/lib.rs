//! Ring arithmetic and the three state tables (routing table, leaf set,
//! neighborhood set) plus the router that composes them into next-hop
//! selection. No networking, no wire format: see `pastry-net` for the
//! protocol engine built on top of these types.

pub mod error;
pub mod leaf_set;
pub mod message;
pub mod neighborhood_set;
pub mod node;
pub mod node_id;
pub mod router;
pub mod routing_table;

pub use error::{CoreError, CoreResult};
pub use leaf_set::{LeafSet, LeafSetDump, LEAF_SET_SIDE_SIZE};
pub use message::{Message, Purpose, StateMask, APPLICATION_PURPOSE_FLOOR};
pub use neighborhood_set::{NeighborhoodSet, NeighborhoodSetDump, NEIGHBORHOOD_SET_SIZE};
pub use node::{Node, NodeVersionCounters, NodeVersions, SelfIdentity, DEFAULT_REGION_PENALTY};
pub use node_id::{closer, NodeId, NODE_ID_DIGITS};
pub use router::Router;
pub use routing_table::{InsertOutcome, RoutingTable, RoutingTableDump};

/// A node's full local state: its identity and the three tables built on
/// top of it. Constructing one wires every table to the same identity so
/// version bumps and proximity comparisons stay consistent.
#[derive(Clone)]
pub struct NodeState {
    pub identity: SelfIdentity,
    pub routing_table: RoutingTable,
    pub leaf_set: LeafSet,
    pub neighborhood_set: NeighborhoodSet,
}

impl NodeState {
    pub fn new(identity: SelfIdentity) -> Self {
        Self {
            routing_table: RoutingTable::new(identity.clone()),
            leaf_set: LeafSet::new(identity.clone()),
            neighborhood_set: NeighborhoodSet::new(identity.clone()),
            identity,
        }
    }

    pub fn router(&self) -> Router {
        Router::new(self.leaf_set.clone(), self.routing_table.clone())
    }

    pub fn self_id(&self) -> NodeId {
        self.identity.id
    }

    pub fn versions(&self) -> NodeVersions {
        self.identity.versions.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_state_tables_share_one_identity() {
        let identity = SelfIdentity::new(NodeId::from_u128(7), "home".into(), 5);
        let state = NodeState::new(identity);
        assert_eq!(state.routing_table.self_id(), state.self_id());
    }
}
