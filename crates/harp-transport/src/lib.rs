//! harp-transport: Harp binary protocol framing and device links
//!
//! This crate provides the Harp message type, its binary frame codec and a blocking
//! link trait, with feature-gated backends. The default build enables a `mock` backend
//! so that binaries and tests run on any host without a device attached.

mod types;
pub use types::{HarpMessage, MessageType, PayloadType, PortInfo, Timestamp};

mod error;
pub use error::{Result, TransportError};

mod frame;
pub use frame::{checksum, encode_frame, parse_frame, FrameReader};

mod traits;
pub use traits::{read_who_am_i, HarpLink};

#[cfg(feature = "mock")]
mod mock;

#[cfg(feature = "mock")]
pub use mock::{MockLink, RegisterFile, WriteHook};

#[cfg(feature = "serial")]
mod serial;

#[cfg(feature = "serial")]
pub use serial::{SerialLink, HARP_BAUD_RATE};

/// Harp core register holding the device identity (`U16`).
pub const WHO_AM_I_ADDRESS: u8 = 0;
