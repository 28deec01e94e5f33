pub mod local_overlay;
pub mod server;

pub use local_overlay::LocalOverlay;
pub use server::{GatewayServer, RunningGateway};
