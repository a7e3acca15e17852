use crate::error::{CoreError, CoreResult};
use crate::node::{Node, SelfIdentity};
use crate::node_id::{closer, NodeId};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::sync::Arc;
use tracing::trace;

/// Maximum number of peers kept on each side of the leaf set.
pub const LEAF_SET_SIDE_SIZE: usize = 16;

struct Inner {
    /// Counter-clockwise neighbors, closest first.
    left: Vec<Node>,
    /// Clockwise neighbors, closest first.
    right: Vec<Node>,
}

impl Inner {
    fn new() -> Self {
        Self {
            left: Vec::with_capacity(LEAF_SET_SIDE_SIZE),
            right: Vec::with_capacity(LEAF_SET_SIDE_SIZE),
        }
    }
}

/// The 2x16 numerically-closest ring neighbors: `left` counter-clockwise,
/// `right` clockwise, each sorted by increasing ring distance from self.
#[derive(Clone)]
pub struct LeafSet {
    identity: SelfIdentity,
    inner: Arc<RwLock<Inner>>,
}

impl LeafSet {
    pub fn new(identity: SelfIdentity) -> Self {
        Self {
            identity,
            inner: Arc::new(RwLock::new(Inner::new())),
        }
    }

    /// Insert `n`, keeping the owning side sorted by increasing ring
    /// distance from self and capped at [`LEAF_SET_SIDE_SIZE`]. Returns
    /// `Ok(true)` if `n` is newly tracked, `Ok(false)` if an existing
    /// entry with the same id was refreshed in place.
    pub fn insert(&self, n: Node) -> CoreResult<bool> {
        if n.is_zero() {
            return Err(CoreError::InvalidArgument);
        }
        let self_id = self.identity.id;
        let side = self_id.rel_pos(&n.id);
        if side == 0 {
            return Err(CoreError::IdentityError);
        }

        let mut inner = self.inner.write();
        let half = if side < 0 {
            &mut inner.left
        } else {
            &mut inner.right
        };

        if let Some(pos) = half.iter().position(|e| e.id == n.id) {
            half[pos] = n;
            return Ok(false);
        }

        let dist = n.id.diff(&self_id);
        let pos = half
            .iter()
            .position(|e| e.id.diff(&self_id) > dist)
            .unwrap_or(half.len());
        half.insert(pos, n);
        half.truncate(LEAF_SET_SIDE_SIZE);
        let v = self.identity.versions.bump_leaf();
        trace!(side, version = v, "leaf set mutated");
        Ok(true)
    }

    pub fn get(&self, id: NodeId) -> Option<Node> {
        let inner = self.inner.read();
        inner
            .left
            .iter()
            .chain(inner.right.iter())
            .find(|n| n.id == id)
            .cloned()
    }

    pub fn remove(&self, id: NodeId) -> Option<Node> {
        let mut inner = self.inner.write();
        if let Some(pos) = inner.left.iter().position(|n| n.id == id) {
            let n = inner.left.remove(pos);
            self.identity.versions.bump_leaf();
            return Some(n);
        }
        if let Some(pos) = inner.right.iter().position(|n| n.id == id) {
            let n = inner.right.remove(pos);
            self.identity.versions.bump_leaf();
            return Some(n);
        }
        None
    }

    /// Pick the half matching `key`'s side, check coverage, then return
    /// the closest entry unless self itself is closer (in which case self
    /// is the destination).
    pub fn route(&self, key: NodeId) -> CoreResult<Node> {
        let self_id = self.identity.id;
        let side = self_id.rel_pos(&key);
        if side == 0 {
            return Err(CoreError::IdentityError);
        }
        let self_dist = self_id.diff(&key);

        let inner = self.inner.read();
        let half = if side < 0 { &inner.left } else { &inner.right };

        let covered = half.iter().any(|n| n.id.diff(&self_id) >= self_dist);
        if !covered {
            return Err(CoreError::NodeNotFound);
        }

        let best = half
            .iter()
            .min_by(|a, b| closer(&key, &a.id, &b.id))
            .expect("covered implies at least one populated slot");

        if closer(&key, &self_id, &best.id) == Ordering::Less {
            Err(CoreError::IdentityError)
        } else {
            Ok(best.clone())
        }
    }

    pub fn list(&self) -> (Vec<Node>, Vec<Node>) {
        let inner = self.inner.read();
        (inner.left.clone(), inner.right.clone())
    }

    pub fn export(&self) -> LeafSetDump {
        let (left, right) = self.list();
        LeafSetDump { left, right }
    }

    pub fn side_lens(&self) -> (usize, usize) {
        let inner = self.inner.read();
        (inner.left.len(), inner.right.len())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LeafSetDump {
    pub left: Vec<Node>,
    pub right: Vec<Node>,
}

#[cfg(test)]
mod tests {
    use super::*;

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

    #[test]
    fn insert_sorts_each_side_by_increasing_distance() {
        let ls = LeafSet::new(identity(1000));
        ls.insert(node(1050)).unwrap();
        ls.insert(node(1010)).unwrap();
        ls.insert(node(1030)).unwrap();
        let (_, right) = ls.list();
        let dists: Vec<u128> = right.iter().map(|n| n.id.diff(&NodeId::from_u128(1000))).collect();
        let mut sorted = dists.clone();
        sorted.sort();
        assert_eq!(dists, sorted);
    }

    #[test]
    fn insert_self_is_identity_error() {
        let ls = LeafSet::new(identity(42));
        assert_eq!(ls.insert(node(42)).unwrap_err(), CoreError::IdentityError);
    }

    #[test]
    fn caps_each_side_at_sixteen() {
        let ls = LeafSet::new(identity(0));
        for i in 1..=20u128 {
            ls.insert(node(i)).unwrap();
        }
        let (_, right) = ls.list();
        assert_eq!(right.len(), LEAF_SET_SIDE_SIZE);
    }

    #[test]
    fn existing_entry_is_updated_not_duplicated() {
        let ls = LeafSet::new(identity(0));
        assert!(ls.insert(node(10)).unwrap());
        assert!(!ls.insert(node(10)).unwrap());
        let (_, right) = ls.list();
        assert_eq!(right.len(), 1);
    }

    #[test]
    fn remove_is_idempotent() {
        let ls = LeafSet::new(identity(0));
        assert!(ls.remove(NodeId::from_u128(5)).is_none());
        ls.insert(node(5)).unwrap();
        assert!(ls.remove(NodeId::from_u128(5)).is_some());
        assert!(ls.remove(NodeId::from_u128(5)).is_none());
    }

    #[test]
    fn route_returns_not_found_when_uncovered() {
        let ls = LeafSet::new(identity(0));
        ls.insert(node(5)).unwrap();
        // key far beyond what the thin leaf set covers
        let far = NodeId::from_u128(u128::MAX / 2);
        assert_eq!(ls.route(far).unwrap_err(), CoreError::NodeNotFound);
    }

    #[test]
    fn route_returns_identity_when_self_is_closest() {
        let ls = LeafSet::new(identity(100));
        ls.insert(node(1000)).unwrap();
        // key is closer to self (100) than to the single right-side entry
        let key = NodeId::from_u128(150);
        assert_eq!(ls.route(key).unwrap_err(), CoreError::IdentityError);
    }

    #[test]
    fn route_returns_best_covering_peer() {
        let ls = LeafSet::new(identity(0));
        ls.insert(node(100)).unwrap();
        ls.insert(node(200)).unwrap();
        let key = NodeId::from_u128(190);
        let routed = ls.route(key).unwrap();
        assert_eq!(routed.id, NodeId::from_u128(200));
    }
}
