//! Registers of the CuttlefishFip task scheduler (WhoAmI 1407).

use crate::payload::{FieldReader, FieldWriter};
use crate::registers::register_map;
use crate::{
    DeviceModel, EnableFlag, PayloadCodec, RegistryError, Result, TaskIndex, TaskState, Toggle,
};
use bitflags::bitflags;
use core::fmt;
use serde::{Deserialize, Serialize};

bitflags! {
    /// The eight IO lines of the FIP controller.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct Ports: u8 {
        const IO0 = 1 << 0;
        const IO1 = 1 << 1;
        const IO2 = 1 << 2;
        const IO3 = 1 << 3;
        const IO4 = 1 << 4;
        const IO5 = 1 << 5;
        const IO6 = 1 << 6;
        const IO7 = 1 << 7;
    }
}

impl PayloadCodec for Ports {
    const WIDTH: usize = 1;

    fn decode(bytes: &[u8]) -> Result<Self> {
        u8::decode(bytes).map(Self::from_bits_retain)
    }

    fn encode(&self) -> Result<Vec<u8>> {
        Ok(vec![self.bits()])
    }
}

/// IO lines carried in a 32-bit task field.
///
/// The firmware only drives the low eight bits; anything above is kept as
/// reported so the field encodes back unchanged.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PortWord(pub u32);

impl PortWord {
    /// The IO lines in the low byte.
    pub fn ports(self) -> Ports {
        Ports::from_bits_retain(self.0.to_le_bytes()[0])
    }

    /// Bits set outside the eight IO lines.
    pub fn excess(self) -> u32 {
        self.0 & !0xFF
    }
}

impl From<Ports> for PortWord {
    fn from(ports: Ports) -> Self {
        Self(u32::from(ports.bits()))
    }
}

/// A single IO line, or none.
///
/// Decoding keeps whatever bits the device reported; encoding refuses more
/// than one line or a bit outside the eight lines.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Port(u32);

impl Port {
    pub const NONE: Self = Self(0);
    pub const IO0: Self = Self(1 << 0);
    pub const IO1: Self = Self(1 << 1);
    pub const IO2: Self = Self(1 << 2);
    pub const IO3: Self = Self(1 << 3);
    pub const IO4: Self = Self(1 << 4);
    pub const IO5: Self = Self(1 << 5);
    pub const IO6: Self = Self(1 << 6);
    pub const IO7: Self = Self(1 << 7);

    /// The port for IO line `index` (0-7).
    pub fn from_index(index: u8) -> Result<Self> {
        if index >= 8 {
            return Err(RegistryError::ValueOutOfRange {
                field: "pwm_port",
                value: u32::from(index),
            });
        }
        Ok(Self(1 << index))
    }

    /// Wraps a raw wire value without checking it.
    pub fn from_bits_retain(bits: u32) -> Self {
        Self(bits)
    }

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn ports(self) -> Ports {
        PortWord(self.0).ports()
    }

    pub fn index(self) -> Option<u8> {
        (self.0.count_ones() == 1 && self.0 <= 0x80).then(|| self.0.trailing_zeros() as u8)
    }

    pub fn checked_bits(self) -> Result<u32> {
        let bits = self.0;
        if bits > 0xFF || bits & bits.wrapping_sub(1) != 0 {
            return Err(RegistryError::ValueOutOfRange {
                field: "pwm_port",
                value: bits,
            });
        }
        Ok(bits)
    }
}

impl TryFrom<Ports> for Port {
    type Error = RegistryError;

    fn try_from(ports: Ports) -> Result<Self> {
        let port = Self(u32::from(ports.bits()));
        port.checked_bits()?;
        Ok(port)
    }
}

impl fmt::Display for Port {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.index() {
            Some(i) => write!(f, "IO{i}"),
            None if self.0 == 0 => f.write_str("None"),
            None => write!(f, "Invalid({:#x})", self.0),
        }
    }
}

/// One scheduled FIP task.
///
/// `frequency` is in Hz, `duty_cycle` a fraction of the period and the deltas
/// are microseconds.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct TaskPayload {
    pub pwm_port: Port,
    pub duty_cycle: f32,
    pub frequency: f32,
    pub trigger_ports: PortWord,
    pub events_enabled: Toggle,
    pub is_muted: Toggle,
    pub delta1: u32,
    pub delta2: u32,
    pub delta3: u32,
    pub delta4: u32,
}

impl Default for TaskPayload {
    fn default() -> Self {
        Self {
            pwm_port: Port::IO0,
            duty_cycle: 0.0,
            frequency: 10_000.0,
            trigger_ports: PortWord::from(Ports::IO1),
            events_enabled: Toggle::ON,
            is_muted: Toggle::OFF,
            delta1: 0,
            delta2: 0,
            delta3: 0,
            delta4: 0,
        }
    }
}

impl PayloadCodec for TaskPayload {
    const WIDTH: usize = 34;

    fn decode(bytes: &[u8]) -> Result<Self> {
        let mut r = FieldReader::new(bytes, Self::WIDTH)?;
        Ok(Self {
            pwm_port: Port(r.u32()?),
            duty_cycle: r.f32()?,
            frequency: r.f32()?,
            trigger_ports: PortWord(r.u32()?),
            events_enabled: Toggle(r.u8()?),
            is_muted: Toggle(r.u8()?),
            delta1: r.u32()?,
            delta2: r.u32()?,
            delta3: r.u32()?,
            delta4: r.u32()?,
        })
    }

    fn encode(&self) -> Result<Vec<u8>> {
        let pwm_port = self.pwm_port.checked_bits()?;
        let mut w = FieldWriter::with_width(Self::WIDTH);
        w.u32(pwm_port)
            .f32(self.duty_cycle)
            .f32(self.frequency)
            .u32(self.trigger_ports.0)
            .u8(self.events_enabled.0)
            .u8(self.is_muted.0)
            .u32(self.delta1)
            .u32(self.delta2)
            .u32(self.delta3)
            .u32(self.delta4);
        Ok(w.finish())
    }
}

register_map! {
    model = DeviceModel::CuttlefishFip;
    SetTaskState = 32, TaskState, READ_WRITE,
        "Starts, stops or aborts all scheduled tasks.";
    AddTask = 33, TaskPayload, READ_WRITE,
        "Schedules a new task.";
    RemoveTask = 34, TaskIndex, READ_WRITE,
        "Removes the task at an index; fails if that slot is empty.";
    ClearAllTasks = 35, EnableFlag, READ_WRITE,
        "Writing 1 clears every scheduled task.";
    TaskCount = 36, u8, READ,
        "Number of scheduled tasks.";
    TaskRisingEdgeEvent = 37, Ports, READ_EVENT,
        "Raised on a rising edge of a task's trigger ports when its events are enabled.";
    Task0Settings = 38, TaskPayload, READ_WRITE, "Settings of task 0.";
    Task1Settings = 39, TaskPayload, READ_WRITE, "Settings of task 1.";
    Task2Settings = 40, TaskPayload, READ_WRITE, "Settings of task 2.";
    Task3Settings = 41, TaskPayload, READ_WRITE, "Settings of task 3.";
    Task4Settings = 42, TaskPayload, READ_WRITE, "Settings of task 4.";
    Task5Settings = 43, TaskPayload, READ_WRITE, "Settings of task 5.";
    Task6Settings = 44, TaskPayload, READ_WRITE, "Settings of task 6.";
    Task7Settings = 45, TaskPayload, READ_WRITE, "Settings of task 7.";
}
