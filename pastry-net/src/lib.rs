//! Transport, wire codec, and the cluster protocol engine built on top of
//! `pastry-core`'s tables. This is the layer that turns local routing
//! decisions into an actual running overlay node.

pub mod callbacks;
mod cluster;
pub mod codec;
pub mod credentials;
pub mod error;
pub mod transport;

pub use callbacks::{ClusterCallbacks, NoopCallbacks};
pub use cluster::{Cluster, ClusterConfig, StateDump};
pub use codec::{read_frame, write_frame, MAX_FRAME_BYTES};
pub use credentials::{AllowAll, CredentialsProvider, SharedSecret};
pub use error::{NetError, NetResult};
pub use transport::{Conn, Listener, TcpTransport, Transport};
