use thiserror::Error;

pub type Result<T, E = TransportError> = core::result::Result<T, E>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("interface not found: {0}")]
    InterfaceNotFound(String),
    #[error("operation not supported on this backend: {0}")]
    Unsupported(&'static str),
    #[error("I/O error: {0}")]
    Io(String),
    #[error("timeout")]
    Timeout,
    #[error("invalid frame: {0}")]
    InvalidFrame(&'static str),
    #[error("checksum mismatch: expected 0x{expected:02X}, got 0x{actual:02X}")]
    Checksum { expected: u8, actual: u8 },
    #[error("device replied with an error to {message_type:?} at address {address}")]
    Device {
        address: u8,
        message_type: crate::MessageType,
    },
}
