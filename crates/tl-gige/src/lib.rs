//! GigE Vision transport layer: GVCP control channel, GVSP streaming
//! receiver, discovery, and host network enumeration.

pub mod discovery;
pub mod error;
pub mod gvcp;
pub mod gvsp;
pub mod netutil;
pub mod nic;
pub mod stats;

pub use discovery::{discover, discover_by_identity, force_ip, DeviceDescriptionUrl, DeviceDescriptor, DiscoverOutcome};
pub use error::GigeError;
pub use gvcp::{Capabilities, ConnectionState, GvcpConnection};
pub use gvsp::{configure_packet_params, Frame, FrameCallback, GvspReceiver, GvspReceiverBuilder};
pub use nic::{enumerate as enumerate_interfaces, BoundAddress, Iface};
pub use stats::{Snapshot, StreamStats};
