use crate::error::{CoreError, CoreResult};
use crate::node::{Node, SelfIdentity};
use crate::node_id::{NodeId, NODE_ID_DIGITS};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, trace};

const ROWS: usize = NODE_ID_DIGITS;
const COLS: usize = 16;

/// Outcome of [`RoutingTable::insert`], distinguishing a clean placement
/// from a refresh of an existing entry or a proximity tie-break that
/// displaced (or rejected) a candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertOutcome {
    /// The cell was empty; `n` was placed.
    Inserted,
    /// The cell held the same node id; its record was refreshed in place.
    Refreshed,
    /// The cell held a different node with worse effective proximity; it
    /// was evicted in favor of the candidate and is returned so the caller
    /// may decide what to do with it (nothing, by default).
    Displaced(Node),
    /// The cell held a different node with better-or-equal effective
    /// proximity than the candidate; the candidate was discarded.
    Rejected,
}

struct Inner {
    cells: Vec<Vec<Option<Node>>>,
}

impl Inner {
    fn new() -> Self {
        Self {
            cells: vec![vec![None; COLS]; ROWS],
        }
    }
}

/// The 32x16 prefix/digit grid. Cell `(r, c)` holds at most one peer
/// sharing exactly `r` leading digits with self and whose digit at
/// position `r` is `c`; the cell `(r, digit(self.id, r))` is never
/// populated since that would be self.
///
/// Guarded by a single `RwLock`, held for the duration of one logical
/// operation, with identity kept outside the lock since it never changes.
#[derive(Clone)]
pub struct RoutingTable {
    identity: SelfIdentity,
    inner: Arc<RwLock<Inner>>,
}

impl RoutingTable {
    pub fn new(identity: SelfIdentity) -> Self {
        Self {
            identity,
            inner: Arc::new(RwLock::new(Inner::new())),
        }
    }

    pub fn self_id(&self) -> NodeId {
        self.identity.id
    }

    /// Insert `n`. Fails with [`CoreError::IdentityError`] if `n` is self,
    /// and [`CoreError::InvalidArgument`] if `n` is the zero sentinel.
    pub fn insert(&self, n: Node) -> CoreResult<InsertOutcome> {
        if n.is_zero() {
            return Err(CoreError::InvalidArgument);
        }
        let r = self.identity.id.prefix_len(&n.id);
        if r >= ROWS {
            // n.id shares all 32 digits with self: n is self.
            return Err(CoreError::IdentityError);
        }
        let c = n.id.digit(r) as usize;

        let mut inner = self.inner.write();
        let outcome = match inner.cells[r][c].take() {
            None => {
                inner.cells[r][c] = Some(n);
                InsertOutcome::Inserted
            }
            Some(existing) if existing.id == n.id => {
                inner.cells[r][c] = Some(n);
                InsertOutcome::Refreshed
            }
            Some(existing) => {
                if self.identity.better_proximity(&n, &existing) {
                    inner.cells[r][c] = Some(n);
                    InsertOutcome::Displaced(existing)
                } else {
                    inner.cells[r][c] = Some(existing);
                    InsertOutcome::Rejected
                }
            }
        };
        if !matches!(outcome, InsertOutcome::Rejected) {
            let v = self.identity.versions.bump_routing();
            trace!(row = r, col = c, version = v, "routing table mutated");
        }
        Ok(outcome)
    }

    pub fn get(&self, id: NodeId) -> Option<Node> {
        let r = self.identity.id.prefix_len(&id);
        if r >= ROWS {
            return None;
        }
        let c = id.digit(r) as usize;
        let inner = self.inner.read();
        inner.cells[r][c]
            .as_ref()
            .filter(|n| n.id == id)
            .cloned()
    }

    /// Removing an absent node is a no-op.
    pub fn remove(&self, id: NodeId) -> Option<Node> {
        let r = self.identity.id.prefix_len(&id);
        if r >= ROWS {
            return None;
        }
        let c = id.digit(r) as usize;
        let mut inner = self.inner.write();
        if inner.cells[r][c].as_ref().map(|n| n.id) != Some(id) {
            return None;
        }
        let removed = inner.cells[r][c].take();
        if removed.is_some() {
            self.identity.versions.bump_routing();
            debug!(row = r, col = c, "routing table entry removed");
        }
        removed
    }

    /// Route toward `key`: exact cell first, then a scan of row `r` for any
    /// peer strictly closer to `key` than self (tie-broken by id). Returns
    /// [`CoreError::NodeNotFound`] if nothing qualifies, and
    /// [`CoreError::IdentityError`] if `key` is self's own id.
    pub fn route(&self, key: NodeId) -> CoreResult<Node> {
        let self_id = self.identity.id;
        let r = self_id.prefix_len(&key);
        if r >= ROWS {
            return Err(CoreError::IdentityError);
        }
        let c = key.digit(r) as usize;

        let inner = self.inner.read();
        if let Some(n) = &inner.cells[r][c] {
            return Ok(n.clone());
        }

        let self_col = self_id.digit(r) as usize;
        let self_dist = self_id.diff(&key);
        for row in r..ROWS {
            for col in 0..COLS {
                if row == r && col == self_col {
                    continue;
                }
                if let Some(q) = &inner.cells[row][col] {
                    let qd = q.id.diff(&key);
                    if qd < self_dist || (qd == self_dist && self_id.less(&q.id)) {
                        return Ok(q.clone());
                    }
                }
            }
        }
        Err(CoreError::NodeNotFound)
    }

    /// Flattened view of every populated cell, optionally restricted to
    /// specific rows and columns (used by the join protocol, which only
    /// shares rows at or below a hop's own prefix length with the new
    /// node).
    pub fn list(&self, rows: Option<&[usize]>, cols: Option<&[u8]>) -> Vec<Node> {
        let inner = self.inner.read();
        let mut out = Vec::new();
        for r in 0..ROWS {
            if let Some(rows) = rows {
                if !rows.contains(&r) {
                    continue;
                }
            }
            for c in 0..COLS {
                if let Some(cols) = cols {
                    if !cols.contains(&(c as u8)) {
                        continue;
                    }
                }
                if let Some(n) = &inner.cells[r][c] {
                    out.push(n.clone());
                }
            }
        }
        out
    }

    /// Wire-ready dump of the same subset `list` would return.
    pub fn export(&self, rows: Option<&[usize]>, cols: Option<&[u8]>) -> RoutingTableDump {
        RoutingTableDump {
            entries: self.list(rows, cols),
        }
    }

    pub fn entry_count(&self) -> usize {
        let inner = self.inner.read();
        inner
            .cells
            .iter()
            .flatten()
            .filter(|c| c.is_some())
            .count()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RoutingTableDump {
    pub entries: Vec<Node>,
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
    fn insert_places_at_prefix_len_and_digit() {
        let rt = RoutingTable::new(identity(0x1000_0000_0000_0000_0000_0000_0000_0000));
        let n = node(0x1200_0000_0000_0000_0000_0000_0000_0000);
        let r = rt.self_id().prefix_len(&n.id);
        let c = n.id.digit(r);
        rt.insert(n.clone()).unwrap();
        let fetched = rt.get(n.id).unwrap();
        assert_eq!(fetched.id, n.id);
        // re-derive the cell to check the placement invariant directly
        assert_eq!(r, rt.self_id().prefix_len(&n.id));
        assert_eq!(c, n.id.digit(r));
    }

    #[test]
    fn insert_self_is_identity_error() {
        let rt = RoutingTable::new(identity(42));
        let err = rt.insert(node(42)).unwrap_err();
        assert_eq!(err, CoreError::IdentityError);
    }

    #[test]
    fn insert_zero_node_is_invalid() {
        let rt = RoutingTable::new(identity(42));
        let err = rt.insert(Node::zero()).unwrap_err();
        assert_eq!(err, CoreError::InvalidArgument);
    }

    #[test]
    fn proximity_tie_break_keeps_lower_effective_proximity() {
        let rt = RoutingTable::new(identity(0));
        // two distinct ids that land in the same cell: same prefix_len and
        // digit relative to self id 0, e.g. both share a 0-length prefix
        // (self's own top digit is 0) and have the same top digit '1'
        let mut a = node(0x1000_0000_0000_0000_0000_0000_0000_0000);
        let mut b = node(0x1abc_0000_0000_0000_0000_0000_0000_0000);
        a.raw_proximity = 50;
        b.raw_proximity = 10;

        rt.insert(a.clone()).unwrap();
        let outcome = rt.insert(b.clone()).unwrap();
        assert_eq!(outcome, InsertOutcome::Displaced(a));
        assert_eq!(rt.get(b.id).unwrap().id, b.id);
        assert_eq!(rt.entry_count(), 1);
    }

    #[test]
    fn worse_candidate_is_rejected_and_original_kept() {
        let rt = RoutingTable::new(identity(0));
        let mut a = node(0x1000_0000_0000_0000_0000_0000_0000_0000);
        let mut b = node(0x1abc_0000_0000_0000_0000_0000_0000_0000);
        a.raw_proximity = 5;
        b.raw_proximity = 50;

        rt.insert(a.clone()).unwrap();
        let outcome = rt.insert(b).unwrap();
        assert_eq!(outcome, InsertOutcome::Rejected);
        assert_eq!(rt.get(a.id).unwrap().raw_proximity, 5);
    }

    #[test]
    fn remove_is_idempotent_for_absent_node() {
        let rt = RoutingTable::new(identity(0));
        assert!(rt.remove(NodeId::from_u128(999)).is_none());
        assert!(rt.remove(NodeId::from_u128(999)).is_none());
    }

    #[test]
    fn route_returns_exact_cell_when_present() {
        let rt = RoutingTable::new(identity(0));
        let n = node(0x1000_0000_0000_0000_0000_0000_0000_0000);
        rt.insert(n.clone()).unwrap();
        let routed = rt.route(n.id).unwrap();
        assert_eq!(routed.id, n.id);
    }

    #[test]
    fn route_falls_back_to_closer_peer_in_row() {
        let rt = RoutingTable::new(identity(0));
        // Put a peer in row 0 (shares 0 digits with self) under some other
        // column than the key's column, but numerically close to the key.
        let key = NodeId::from_u128(0x2000_0000_0000_0000_0000_0000_0000_0000);
        let near = node(0x1fff_0000_0000_0000_0000_0000_0000_0000);
        rt.insert(near.clone()).unwrap();

        let routed = rt.route(key).unwrap();
        assert_eq!(routed.id, near.id);
        assert!(routed.id.diff(&key) < rt.self_id().diff(&key));
    }

    #[test]
    fn route_self_key_is_identity_error() {
        let rt = RoutingTable::new(identity(7));
        assert_eq!(rt.route(NodeId::from_u128(7)).unwrap_err(), CoreError::IdentityError);
    }

    #[test]
    fn route_with_no_candidates_is_not_found() {
        let rt = RoutingTable::new(identity(0));
        assert_eq!(
            rt.route(NodeId::from_u128(123)).unwrap_err(),
            CoreError::NodeNotFound
        );
    }
}
