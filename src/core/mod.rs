pub mod address;
pub mod director;
pub mod forwarder;
pub mod naming;
pub mod switchboard;
pub mod topology;
pub mod transport;

pub use address::{decode_session_host, encode_address};
pub use director::{Director, DirectorChain, ProxyRequest};
pub use forwarder::{ForwardError, Forwarder, ForwarderFactory};
pub use switchboard::Switchboard;
pub use topology::{OverlayBinding, Route, RoutingTable, Topology, build_topology};
pub use transport::TransportKind;
