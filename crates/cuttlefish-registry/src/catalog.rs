//! Per-model register catalogs.
//!
//! A catalog maps register addresses to descriptors and register shapes back to
//! addresses. Each model has exactly one catalog, built on first use and shared
//! for the rest of the process.

use crate::{PayloadCodec, Register, RegisterValue, RegistryError, Result, TypedPayload};
use bitflags::bitflags;
use core::fmt;
use harp_transport::PayloadType;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::OnceLock;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceModel {
    Cuttlefish,
    CuttlefishFip,
}

static CUTTLEFISH_CATALOG: OnceLock<Result<Catalog>> = OnceLock::new();
static FIP_CATALOG: OnceLock<Result<Catalog>> = OnceLock::new();

impl DeviceModel {
    pub const ALL: [DeviceModel; 2] = [DeviceModel::Cuttlefish, DeviceModel::CuttlefishFip];

    /// Identity reported by the device in Harp core register 0.
    pub fn who_am_i(self) -> u16 {
        match self {
            DeviceModel::Cuttlefish => 1403,
            DeviceModel::CuttlefishFip => 1407,
        }
    }

    pub fn from_who_am_i(who_am_i: u16) -> Option<Self> {
        Self::ALL.into_iter().find(|m| m.who_am_i() == who_am_i)
    }

    pub fn name(self) -> &'static str {
        match self {
            DeviceModel::Cuttlefish => "Cuttlefish",
            DeviceModel::CuttlefishFip => "CuttlefishFip",
        }
    }

    pub fn catalog(self) -> Result<&'static Catalog> {
        let (cell, build): (_, fn() -> Vec<RegisterDescriptor>) = match self {
            DeviceModel::Cuttlefish => (&CUTTLEFISH_CATALOG, crate::cuttlefish::descriptors),
            DeviceModel::CuttlefishFip => (&FIP_CATALOG, crate::fip::descriptors),
        };
        cell.get_or_init(|| Catalog::new(self, build()))
            .as_ref()
            .map_err(Clone::clone)
    }
}

impl fmt::Display for DeviceModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Semantic identity of a register, independent of its address.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum RegisterShape {
    PortDirection,
    PortState,
    PwmTask,
    ArmExternalStartTrigger,
    ExternalStartTriggerEdge,
    ArmExternalStopTrigger,
    ExternalStopTriggerEdge,
    SoftwareStartTrigger,
    SoftwareStopTrigger,
    TaskControl,
    SetTaskState,
    AddTask,
    RemoveTask,
    ClearAllTasks,
    TaskCount,
    TaskRisingEdgeEvent,
    Task0Settings,
    Task1Settings,
    Task2Settings,
    Task3Settings,
    Task4Settings,
    Task5Settings,
    Task6Settings,
    Task7Settings,
}

impl fmt::Display for RegisterShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

bitflags! {
    /// Message types a register answers to.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct Access: u8 {
        const READ = 1 << 0;
        const WRITE = 1 << 1;
        const EVENT = 1 << 2;
        const READ_WRITE = Self::READ.bits() | Self::WRITE.bits();
        const READ_EVENT = Self::READ.bits() | Self::EVENT.bits();
        const READ_WRITE_EVENT = Self::READ_WRITE.bits() | Self::EVENT.bits();
    }
}

type DecodeFn = fn(&[u8]) -> Result<RegisterValue>;
type EncodeFn = fn(&RegisterValue) -> Result<Vec<u8>>;

#[derive(Clone, Copy)]
pub struct RegisterDescriptor {
    pub address: u8,
    pub name: &'static str,
    pub shape: RegisterShape,
    pub model: DeviceModel,
    pub width: usize,
    pub payload_type: PayloadType,
    pub access: Access,
    pub description: &'static str,
    decode_fn: DecodeFn,
    encode_fn: EncodeFn,
}

fn decode_as<R: Register>(bytes: &[u8]) -> Result<RegisterValue> {
    R::Payload::decode(bytes).map(TypedPayload::into_value)
}

fn encode_as<R: Register>(value: &RegisterValue) -> Result<Vec<u8>> {
    R::Payload::from_value(value)
        .ok_or(RegistryError::ShapeMismatch { register: R::NAME })?
        .encode()
}

impl RegisterDescriptor {
    pub fn of<R: Register>() -> Self {
        Self {
            address: R::ADDRESS,
            name: R::NAME,
            shape: R::SHAPE,
            model: R::MODEL,
            width: <R::Payload as PayloadCodec>::WIDTH,
            payload_type: PayloadType::U8,
            access: R::ACCESS,
            description: R::DESCRIPTION,
            decode_fn: decode_as::<R>,
            encode_fn: encode_as::<R>,
        }
    }

    pub fn decode(&self, bytes: &[u8]) -> Result<RegisterValue> {
        (self.decode_fn)(bytes)
    }

    pub fn encode(&self, value: &RegisterValue) -> Result<Vec<u8>> {
        (self.encode_fn)(value)
    }
}

impl fmt::Debug for RegisterDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisterDescriptor")
            .field("address", &self.address)
            .field("name", &self.name)
            .field("model", &self.model)
            .field("width", &self.width)
            .field("payload_type", &self.payload_type)
            .field("access", &self.access)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone)]
pub struct Catalog {
    model: DeviceModel,
    by_address: BTreeMap<u8, RegisterDescriptor>,
    by_shape: HashMap<RegisterShape, u8>,
}

impl Catalog {
    pub fn new(
        model: DeviceModel,
        descriptors: impl IntoIterator<Item = RegisterDescriptor>,
    ) -> Result<Self> {
        let mut by_address = BTreeMap::new();
        let mut by_shape = HashMap::new();
        for desc in descriptors {
            if desc.model != model {
                return Err(RegistryError::ForeignRegister {
                    register: desc.name,
                    model,
                });
            }
            let duplicate = RegistryError::DuplicateRegister {
                model,
                address: desc.address,
                name: desc.name,
            };
            if by_shape.insert(desc.shape, desc.address).is_some() {
                return Err(duplicate);
            }
            if by_address.insert(desc.address, desc).is_some() {
                return Err(duplicate);
            }
        }
        tracing::debug!(%model, registers = by_address.len(), "built register catalog");
        Ok(Self {
            model,
            by_address,
            by_shape,
        })
    }

    pub fn model(&self) -> DeviceModel {
        self.model
    }

    pub fn lookup_by_address(&self, address: u8) -> Result<&RegisterDescriptor> {
        self.by_address
            .get(&address)
            .ok_or(RegistryError::UnknownRegister {
                model: self.model,
                address,
            })
    }

    pub fn lookup_by_shape(&self, shape: RegisterShape) -> Result<u8> {
        self.by_shape
            .get(&shape)
            .copied()
            .ok_or(RegistryError::UnknownRegisterShape {
                model: self.model,
                shape,
            })
    }

    pub fn descriptor_for_shape(&self, shape: RegisterShape) -> Result<&RegisterDescriptor> {
        self.lookup_by_address(self.lookup_by_shape(shape)?)
    }

    /// Case-insensitive lookup by register name.
    pub fn lookup_by_name(&self, name: &str) -> Option<&RegisterDescriptor> {
        self.by_address
            .values()
            .find(|d| d.name.eq_ignore_ascii_case(name))
    }

    /// All descriptors in address order.
    pub fn descriptors(&self) -> impl Iterator<Item = &RegisterDescriptor> {
        self.by_address.values()
    }

    pub fn len(&self) -> usize {
        self.by_address.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_address.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{cuttlefish, fip};

    #[test]
    fn test_catalog_sizes() {
        assert_eq!(DeviceModel::Cuttlefish.catalog().unwrap().len(), 10);
        assert_eq!(DeviceModel::CuttlefishFip.catalog().unwrap().len(), 14);
    }

    #[test]
    fn test_same_address_differs_per_model() {
        let cf = DeviceModel::Cuttlefish.catalog().unwrap();
        let fip = DeviceModel::CuttlefishFip.catalog().unwrap();
        assert_eq!(cf.lookup_by_address(32).unwrap().name, "PortDirection");
        assert_eq!(fip.lookup_by_address(32).unwrap().name, "SetTaskState");
    }

    #[test]
    fn test_unknown_lookups() {
        let cf = DeviceModel::Cuttlefish.catalog().unwrap();
        assert_eq!(
            cf.lookup_by_address(99).unwrap_err(),
            RegistryError::UnknownRegister {
                model: DeviceModel::Cuttlefish,
                address: 99
            }
        );
        assert!(matches!(
            cf.lookup_by_shape(RegisterShape::Task3Settings),
            Err(RegistryError::UnknownRegisterShape { .. })
        ));
        let fip = DeviceModel::CuttlefishFip.catalog().unwrap();
        assert_eq!(fip.lookup_by_shape(RegisterShape::Task7Settings).unwrap(), 45);
        assert_eq!(fip.lookup_by_name("taskcount").unwrap().address, 36);
    }

    #[test]
    fn test_descriptor_widths_and_order() {
        let cf = DeviceModel::Cuttlefish.catalog().unwrap();
        let addrs: Vec<u8> = cf.descriptors().map(|d| d.address).collect();
        assert_eq!(addrs, (32..=41).collect::<Vec<_>>());
        assert_eq!(cf.lookup_by_address(34).unwrap().width, 18);
        let fip = DeviceModel::CuttlefishFip.catalog().unwrap();
        for address in [33u8, 38, 41, 45] {
            assert_eq!(fip.lookup_by_address(address).unwrap().width, 34);
        }
        assert!(fip.descriptors().all(|d| d.payload_type == PayloadType::U8));
        assert_eq!(fip.lookup_by_address(36).unwrap().access, Access::READ);
    }

    #[test]
    fn test_duplicate_address_rejected() {
        let descs = vec![
            RegisterDescriptor::of::<cuttlefish::PortDirection>(),
            RegisterDescriptor {
                shape: RegisterShape::PortState,
                ..RegisterDescriptor::of::<cuttlefish::PortDirection>()
            },
        ];
        assert!(matches!(
            Catalog::new(DeviceModel::Cuttlefish, descs),
            Err(RegistryError::DuplicateRegister { address: 32, .. })
        ));
    }

    #[test]
    fn test_foreign_descriptor_rejected() {
        let descs = vec![RegisterDescriptor::of::<fip::TaskCount>()];
        assert!(matches!(
            Catalog::new(DeviceModel::Cuttlefish, descs),
            Err(RegistryError::ForeignRegister { .. })
        ));
    }

    #[test]
    fn test_descriptor_shape_mismatch() {
        let cf = DeviceModel::Cuttlefish.catalog().unwrap();
        let desc = cf.lookup_by_address(41).unwrap();
        assert_eq!(
            desc.encode(&RegisterValue::Byte(1)),
            Err(RegistryError::ShapeMismatch {
                register: "TaskControl"
            })
        );
    }

    fn composite_bytes(width: usize) -> Vec<u8> {
        match width {
            18 => (0..18u8).map(|i| i.wrapping_mul(37).wrapping_add(1)).collect(),
            _ => fip::TaskPayload {
                pwm_port: fip::Port::IO3,
                duty_cycle: 0.5,
                frequency: 20_000.0,
                trigger_ports: fip::PortWord(0x0001_0004),
                events_enabled: crate::Toggle(2),
                is_muted: crate::Toggle::OFF,
                delta1: 1,
                delta2: 0x00FF_FF00,
                delta3: 3,
                delta4: u32::MAX,
            }
            .encode()
            .unwrap(),
        }
    }

    #[test]
    fn test_every_register_round_trips() {
        for model in DeviceModel::ALL {
            for desc in model.catalog().unwrap().descriptors() {
                if desc.width == 1 {
                    let mut legal = 0;
                    for b in 0..=u8::MAX {
                        let value = desc.decode(&[b]).unwrap();
                        if let Ok(bytes) = desc.encode(&value) {
                            assert_eq!(desc.decode(&bytes).unwrap(), value, "{}", desc.name);
                            legal += 1;
                        }
                    }
                    assert!(legal >= 2, "{} accepts {legal} values", desc.name);
                } else {
                    let bytes = composite_bytes(desc.width);
                    let value = desc.decode(&bytes).unwrap();
                    let encoded = desc.encode(&value).unwrap();
                    assert_eq!(encoded, bytes, "{}", desc.name);
                    assert_eq!(desc.decode(&encoded).unwrap(), value, "{}", desc.name);
                }
            }
        }
    }

    #[test]
    fn test_who_am_i() {
        assert_eq!(DeviceModel::Cuttlefish.who_am_i(), 1403);
        assert_eq!(
            DeviceModel::from_who_am_i(1407),
            Some(DeviceModel::CuttlefishFip)
        );
        assert_eq!(DeviceModel::from_who_am_i(1), None);
    }
}
