use crate::error::{CoreError, CoreResult};
use crate::node::{Node, NodeVersions};
use crate::node_id::NodeId;
use pastry_tools::Timestamp;
use serde::{Deserialize, Serialize};

/// Smallest tag value an application payload may use. Tags below this are
/// reserved for the fixed set of protocol purposes and must never collide
/// with them.
pub const APPLICATION_PURPOSE_FLOOR: u16 = 1000;

/// What a [`Message`] is for. The protocol purposes are a closed set;
/// `Application` carries the host's own tag, which must stay at or above
/// [`APPLICATION_PURPOSE_FLOOR`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Purpose {
    NodeJoin,
    NodeExit,
    Heartbeat,
    StatData,
    StatReq,
    NodeRace,
    NodeRepr,
    NodeAnn,
    Application(u16),
}

impl Purpose {
    /// Build an `Application` purpose, rejecting tags that fall inside the
    /// reserved protocol range.
    pub fn application(tag: u16) -> CoreResult<Self> {
        if tag < APPLICATION_PURPOSE_FLOOR {
            return Err(CoreError::InvalidArgument);
        }
        Ok(Purpose::Application(tag))
    }

    pub fn is_application(&self) -> bool {
        matches!(self, Purpose::Application(_))
    }
}

/// Selects which of the three tables (and, for the routing table, which
/// rows/columns) a state dump request or response carries.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StateMask {
    pub routing: bool,
    pub leaf: bool,
    pub neighborhood: bool,
    pub rows: Option<Vec<usize>>,
    pub cols: Option<Vec<u8>>,
}

impl StateMask {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn all() -> Self {
        Self {
            routing: true,
            leaf: true,
            neighborhood: true,
            rows: None,
            cols: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        !self.routing && !self.leaf && !self.neighborhood
    }
}

/// A single protocol frame, carried one per connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub purpose: Purpose,
    /// Full record of the node that originated this hop (not necessarily
    /// the original sender after intermediate forwarding).
    pub sender: Node,
    pub key: NodeId,
    pub payload: Vec<u8>,
    pub credentials: Vec<u8>,
    pub send_timestamp: Timestamp,
    pub hop_count: u32,
    /// The sender's version stamps at send time — the only cross-node
    /// ordering signal, compared with strict `>` by the receiver.
    pub sender_versions: NodeVersions,
}

impl Message {
    pub fn new(purpose: Purpose, sender: Node, key: NodeId, payload: Vec<u8>) -> Self {
        let sender_versions = sender.versions;
        Self {
            purpose,
            sender,
            key,
            payload,
            credentials: Vec::new(),
            send_timestamp: pastry_tools::get_timestamp(),
            hop_count: 0,
            sender_versions,
        }
    }

    pub fn with_credentials(mut self, credentials: Vec<u8>) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn forwarded(mut self, via: &Node) -> Self {
        self.sender = via.clone();
        self.sender_versions = via.versions;
        self.hop_count += 1;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn application_purpose_rejects_reserved_range() {
        assert_eq!(
            Purpose::application(1).unwrap_err(),
            CoreError::InvalidArgument
        );
        assert!(Purpose::application(APPLICATION_PURPOSE_FLOOR).is_ok());
    }

    #[test]
    fn state_mask_all_sets_every_flag() {
        let mask = StateMask::all();
        assert!(mask.routing && mask.leaf && mask.neighborhood);
        assert!(!mask.is_empty());
        assert!(StateMask::none().is_empty());
    }

    #[test]
    fn forwarded_bumps_hop_count_and_rebinds_sender() {
        let a = Node::new(NodeId::from_u128(1), "a".into(), "a".into(), "home".into());
        let b = Node::new(NodeId::from_u128(2), "b".into(), "b".into(), "home".into());
        let msg = Message::new(Purpose::NodeJoin, a, NodeId::from_u128(99), vec![]);
        let hopped = msg.forwarded(&b);
        assert_eq!(hopped.hop_count, 1);
        assert_eq!(hopped.sender.id, b.id);
    }
}
