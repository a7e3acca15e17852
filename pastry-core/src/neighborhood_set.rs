use crate::error::{CoreError, CoreResult};
use crate::node::{Node, SelfIdentity};
use crate::node_id::NodeId;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::trace;

/// Maximum number of peers tracked by a [`NeighborhoodSet`].
pub const NEIGHBORHOOD_SET_SIZE: usize = 32;

struct Inner {
    /// Ordered by increasing effective proximity to self.
    entries: Vec<Node>,
}

impl Inner {
    fn new() -> Self {
        Self {
            entries: Vec::with_capacity(NEIGHBORHOOD_SET_SIZE),
        }
    }
}

/// The 32 network-closest peers by effective proximity, regardless of
/// ring position. Not consulted by the router; used only as tie-break
/// hints and as a bootstrap source when repairing other tables.
#[derive(Clone)]
pub struct NeighborhoodSet {
    identity: SelfIdentity,
    inner: Arc<RwLock<Inner>>,
}

impl NeighborhoodSet {
    pub fn new(identity: SelfIdentity) -> Self {
        Self {
            identity,
            inner: Arc::new(RwLock::new(Inner::new())),
        }
    }

    /// Insert or refresh `n`, re-sorting by effective proximity and
    /// capping the set at [`NEIGHBORHOOD_SET_SIZE`]. Returns `Ok(true)`
    /// if `n` ends up tracked after the cap is applied, `Ok(false)` if it
    /// was evicted immediately for having worse proximity than every
    /// existing slot in a full set.
    pub fn insert(&self, n: Node) -> CoreResult<bool> {
        if n.is_zero() {
            return Err(CoreError::InvalidArgument);
        }
        if n.id == self.identity.id {
            return Err(CoreError::IdentityError);
        }

        let mut inner = self.inner.write();
        if let Some(pos) = inner.entries.iter().position(|e| e.id == n.id) {
            inner.entries.remove(pos);
        }

        let proximity = self.identity.effective_proximity_of(&n);
        let pos = inner
            .entries
            .iter()
            .position(|e| self.identity.effective_proximity_of(e) > proximity)
            .unwrap_or(inner.entries.len());
        inner.entries.insert(pos, n.clone());
        inner.entries.truncate(NEIGHBORHOOD_SET_SIZE);

        let retained = inner.entries.iter().any(|e| e.id == n.id);
        if retained {
            let v = self.identity.versions.bump_neighborhood();
            trace!(version = v, "neighborhood set mutated");
        }
        Ok(retained)
    }

    pub fn get(&self, id: NodeId) -> Option<Node> {
        let inner = self.inner.read();
        inner.entries.iter().find(|n| n.id == id).cloned()
    }

    pub fn remove(&self, id: NodeId) -> Option<Node> {
        let mut inner = self.inner.write();
        let pos = inner.entries.iter().position(|n| n.id == id)?;
        let removed = inner.entries.remove(pos);
        self.identity.versions.bump_neighborhood();
        Some(removed)
    }

    pub fn list(&self) -> Vec<Node> {
        self.inner.read().entries.clone()
    }

    pub fn export(&self) -> NeighborhoodSetDump {
        NeighborhoodSetDump {
            entries: self.list(),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NeighborhoodSetDump {
    pub entries: Vec<Node>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(id: u128) -> SelfIdentity {
        SelfIdentity::new(NodeId::from_u128(id), "home".into(), 5)
    }

    fn node_with_proximity(id: u128, proximity: i64) -> Node {
        let mut n = Node::new(
            NodeId::from_u128(id),
            format!("local-{id}"),
            format!("global-{id}"),
            "home".into(),
        );
        n.raw_proximity = proximity;
        n
    }

    #[test]
    fn insert_keeps_entries_sorted_by_effective_proximity() {
        let ns = NeighborhoodSet::new(identity(0));
        ns.insert(node_with_proximity(1, 50)).unwrap();
        ns.insert(node_with_proximity(2, 10)).unwrap();
        ns.insert(node_with_proximity(3, 30)).unwrap();
        let proximities: Vec<i64> = ns
            .list()
            .iter()
            .map(|n| n.effective_proximity("home", 5))
            .collect();
        assert_eq!(proximities, vec![10, 30, 50]);
    }

    #[test]
    fn insert_self_is_identity_error() {
        let ns = NeighborhoodSet::new(identity(7));
        assert_eq!(
            ns.insert(node_with_proximity(7, 1)).unwrap_err(),
            CoreError::IdentityError
        );
    }

    #[test]
    fn caps_at_thirty_two_and_drops_worst() {
        let ns = NeighborhoodSet::new(identity(0));
        for i in 1..=40u128 {
            ns.insert(node_with_proximity(i, i as i64)).unwrap();
        }
        assert_eq!(ns.len(), NEIGHBORHOOD_SET_SIZE);
        let worst = ns.list().into_iter().last().unwrap();
        assert!(worst.raw_proximity <= 32);
    }

    #[test]
    fn existing_entry_is_refreshed_not_duplicated() {
        let ns = NeighborhoodSet::new(identity(0));
        ns.insert(node_with_proximity(5, 10)).unwrap();
        ns.insert(node_with_proximity(5, 1)).unwrap();
        assert_eq!(ns.len(), 1);
        assert_eq!(ns.get(NodeId::from_u128(5)).unwrap().raw_proximity, 1);
    }

    #[test]
    fn remove_is_idempotent() {
        let ns = NeighborhoodSet::new(identity(0));
        assert!(ns.remove(NodeId::from_u128(9)).is_none());
        ns.insert(node_with_proximity(9, 1)).unwrap();
        assert!(ns.remove(NodeId::from_u128(9)).is_some());
        assert!(ns.remove(NodeId::from_u128(9)).is_none());
    }
}
