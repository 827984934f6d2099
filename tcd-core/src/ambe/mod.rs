//! Hardware (and software-fallback) AMBE vocoder subsystem.

pub mod device;
pub mod protocol;
pub mod software;
pub mod transport;

pub use device::AmbeDevice;
pub use software::{SoftwareAmbeCodec, SoftwareAmbeWorker};
pub use transport::{DvsiTransport, LoopbackTransport};

#[cfg(feature = "hardware")]
pub use transport::ftdi;
#[cfg(feature = "hardware")]
pub use transport::ftdi::Ft2xxTransport;
