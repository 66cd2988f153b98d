use crate::{DeviceModel, RegisterShape};
use harp_transport::{PayloadType, TransportError};
use thiserror::Error;

pub type Result<T, E = RegistryError> = core::result::Result<T, E>;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum RegistryError {
    #[error("no register at address {address} on {model}")]
    UnknownRegister { model: DeviceModel, address: u8 },
    #[error("register {shape:?} does not belong to {model}")]
    UnknownRegisterShape {
        model: DeviceModel,
        shape: RegisterShape,
    },
    #[error("payload too short: expected {expected} bytes, got {actual}")]
    TruncatedPayload { expected: usize, actual: usize },
    #[error("payload too long: expected {expected} bytes, got {actual}")]
    OversizedPayload { expected: usize, actual: usize },
    #[error("value {value} out of range for {field}")]
    ValueOutOfRange { field: &'static str, value: u32 },
    #[error("unexpected device identity: expected WhoAmI {expected}, got {actual}")]
    DeviceIdentityMismatch { expected: u16, actual: u16 },
    #[error("register {name} duplicates address {address} or its shape on {model}")]
    DuplicateRegister {
        model: DeviceModel,
        address: u8,
        name: &'static str,
    },
    #[error("value does not match the payload of register {register}")]
    ShapeMismatch { register: &'static str },
    #[error("register {register} is not a {model} register")]
    ForeignRegister {
        register: &'static str,
        model: DeviceModel,
    },
    #[error("register {register} expects {expected:?} payloads, got {actual:?}")]
    PayloadTypeMismatch {
        register: &'static str,
        expected: PayloadType,
        actual: PayloadType,
    },
    #[error("reply from register {register} carries no timestamp")]
    MissingTimestamp { register: &'static str },
    #[error(transparent)]
    Transport(#[from] TransportError),
}
