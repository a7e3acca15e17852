use crate::node_id::NodeId;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;

/// Effective proximity multiplies raw proximity by this factor when the
/// peer's region differs from ours. Exposed as a config option
/// (`region_penalty`) rather than hardcoded, but this is the default every
/// node starts with.
pub const DEFAULT_REGION_PENALTY: i64 = 5;

/// A peer's monotonically increasing per-table version counters. Never
/// compared across nodes using wall-clock time — clock skew between peers
/// would make staleness detection unreliable. Cloning a `NodeVersions`
/// clones the *current values*, not the atomics, so a `Node` can be copied
/// into all three tables independently while still carrying a version
/// snapshot useful for race detection.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeVersions {
    pub routing: u64,
    pub leaf: u64,
    pub neighborhood: u64,
}

impl NodeVersions {
    /// True if any of `self`'s versions strictly exceeds the matching
    /// version in `announced`. Must use strict `>`, not `>=`: an equal
    /// version means the two sides agree, not that `self` is ahead.
    pub fn any_stale(&self, announced: &NodeVersions) -> bool {
        self.routing > announced.routing
            || self.leaf > announced.leaf
            || self.neighborhood > announced.neighborhood
    }
}

/// Atomic, shareable counters for a node's *own* table versions. Kept
/// separate from [`NodeVersions`] (the plain-data snapshot that travels
/// over the wire and sits inside table entries) because these need
/// lock-free increment from whichever table just mutated.
#[derive(Debug, Default)]
pub struct NodeVersionCounters {
    routing: AtomicU64,
    leaf: AtomicU64,
    neighborhood: AtomicU64,
}

impl NodeVersionCounters {
    pub fn snapshot(&self) -> NodeVersions {
        NodeVersions {
            routing: self.routing.load(AtomicOrdering::Acquire),
            leaf: self.leaf.load(AtomicOrdering::Acquire),
            neighborhood: self.neighborhood.load(AtomicOrdering::Acquire),
        }
    }
    pub fn bump_routing(&self) -> u64 {
        self.routing.fetch_add(1, AtomicOrdering::AcqRel) + 1
    }
    pub fn bump_leaf(&self) -> u64 {
        self.leaf.fetch_add(1, AtomicOrdering::AcqRel) + 1
    }
    pub fn bump_neighborhood(&self) -> u64 {
        self.neighborhood.fetch_add(1, AtomicOrdering::AcqRel) + 1
    }
}

/// A peer record, as stored in the tables (by value: each table keeps its
/// own copy rather than sharing a reference, so one table's eviction can
/// never invalidate another table's entry).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    /// Address used among peers sharing `region`.
    pub local_addr: String,
    /// Address used across regions.
    pub global_addr: String,
    pub region: String,
    /// Raw measured proximity; -1 means "unknown".
    pub raw_proximity: i64,
    pub versions: NodeVersions,
    #[serde(skip, default = "zero_timestamp")]
    pub last_heard_from: pastry_tools::Timestamp,
}

fn zero_timestamp() -> pastry_tools::Timestamp {
    pastry_tools::Timestamp::default()
}

impl Node {
    pub fn new(id: NodeId, local_addr: String, global_addr: String, region: String) -> Self {
        Self {
            id,
            local_addr,
            global_addr,
            region,
            raw_proximity: -1,
            versions: NodeVersions::default(),
            last_heard_from: pastry_tools::Timestamp::default(),
        }
    }

    /// The sentinel empty record — skipped everywhere tables iterate.
    pub fn zero() -> Self {
        Self {
            id: NodeId::ZERO,
            local_addr: String::new(),
            global_addr: String::new(),
            region: String::new(),
            raw_proximity: -1,
            versions: NodeVersions::default(),
            last_heard_from: pastry_tools::Timestamp::default(),
        }
    }

    pub fn is_zero(&self) -> bool {
        self.id.is_zero()
    }

    /// Effective proximity from `self_region`'s point of view: raw
    /// proximity multiplied by `region_penalty` when regions differ.
    /// Unknown raw proximity (-1) still gets the multiplier applied;
    /// callers that need "unknown beats nothing" handle that at the
    /// comparison site.
    pub fn effective_proximity(&self, self_region: &str, region_penalty: i64) -> i64 {
        if self.region == self_region {
            self.raw_proximity
        } else {
            self.raw_proximity.saturating_mul(region_penalty)
        }
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Node({} @ {} / {} region={})",
            self.id, self.local_addr, self.global_addr, self.region
        )
    }
}

/// Shared identity of the local node: its id plus the atomic version
/// counters that the three tables bump on mutation. Wrapped in `Arc` so
/// `RoutingTable`, `LeafSet`, and `NeighborhoodSet` can each hold a handle
/// without owning the identity.
#[derive(Clone)]
pub struct SelfIdentity {
    pub id: NodeId,
    pub region: String,
    pub region_penalty: i64,
    pub versions: Arc<NodeVersionCounters>,
}

impl SelfIdentity {
    pub fn new(id: NodeId, region: String, region_penalty: i64) -> Self {
        Self {
            id,
            region,
            region_penalty,
            versions: Arc::new(NodeVersionCounters::default()),
        }
    }

    pub fn effective_proximity_of(&self, peer: &Node) -> i64 {
        peer.effective_proximity(&self.region, self.region_penalty)
    }

    /// Prefer a lower effective proximity; ties broken by a stable but
    /// arbitrary id comparison so two nodes that agree on proximity still
    /// agree on which one wins.
    pub fn better_proximity(&self, a: &Node, b: &Node) -> bool {
        let pa = self.effective_proximity_of(a);
        let pb = self.effective_proximity_of(b);
        match pa.cmp(&pb) {
            std::cmp::Ordering::Less => true,
            std::cmp::Ordering::Greater => false,
            std::cmp::Ordering::Equal => a.id.less(&b.id),
        }
    }
}
