pub mod overlay;

pub use overlay::{
    NETWORK_REGISTRY, NETWORK_TCP, OverlayIo, OverlayListener, OverlayStream, OverlayTransport,
};
