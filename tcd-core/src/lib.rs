//! Core transcoding engine for digital-voice reflector networks: the shared
//! `Frame` object, the blocking queue fabric, the software codec workers
//! (Codec2/M17, IMBE/P25, USRP gain bridge), the DVSI AMBE hardware driver,
//! and the router that ties them together.
//!
//! Third-party codec and hardware bindings are consumed through narrow
//! traits (`Codec2Vocoder`, `ImbeVocoder`, `SoftwareAmbeCodec`,
//! `DvsiTransport`) rather than linked directly, keeping this crate
//! buildable and testable without the external libraries it's meant to
//! orchestrate in production.

pub mod ambe;
pub mod codec2;
pub mod config;
pub mod errors;
pub mod frame;
pub mod imbe;
pub mod queue;
pub mod router;
pub mod socket;
pub mod usrp;

pub use errors::{ConfigError, DeviceError, RouterError, TcdError};
pub use frame::{CodecKind, Frame, IngressPayload};
pub use router::{AmbeSink, Dispatcher, Router};
