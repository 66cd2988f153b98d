//! Registers of the Cuttlefish PWM controller (WhoAmI 1403).

use crate::payload::{FieldReader, FieldWriter};
use crate::registers::register_map;
use crate::{DeviceModel, EnableFlag, PayloadCodec, RegistryError, Result, Toggle};
use bitflags::bitflags;
use serde::{Deserialize, Serialize};

bitflags! {
    /// The eight digital ports of the controller.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct Ports: u8 {
        const PORT0 = 1 << 0;
        const PORT1 = 1 << 1;
        const PORT2 = 1 << 2;
        const PORT3 = 1 << 3;
        const PORT4 = 1 << 4;
        const PORT5 = 1 << 5;
        const PORT6 = 1 << 6;
        const PORT7 = 1 << 7;
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

/// Timing of a PWM task. Times are in microseconds.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PwmTaskPayload {
    pub delay: u32,
    pub on_time: u32,
    pub period: u32,
    pub port_mask: Ports,
    pub repeats: u32,
    pub invert: Toggle,
}

impl PayloadCodec for PwmTaskPayload {
    const WIDTH: usize = 18;

    fn decode(bytes: &[u8]) -> Result<Self> {
        let mut r = FieldReader::new(bytes, Self::WIDTH)?;
        Ok(Self {
            delay: r.u32()?,
            on_time: r.u32()?,
            period: r.u32()?,
            port_mask: Ports::from_bits_retain(r.u8()?),
            repeats: r.u32()?,
            invert: Toggle(r.u8()?),
        })
    }

    fn encode(&self) -> Result<Vec<u8>> {
        let mut w = FieldWriter::with_width(Self::WIDTH);
        w.u32(self.delay)
            .u32(self.on_time)
            .u32(self.period)
            .u8(self.port_mask.bits())
            .u32(self.repeats)
            .u8(self.invert.0);
        Ok(w.finish())
    }
}

/// Bit-packed task control byte: bit 0 clears all tasks, bit 1 dumps them and
/// bits 4-7 carry the task count. Bits 2-3 are reserved.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskControlPayload {
    pub clear_all_tasks: EnableFlag,
    pub dump_all_tasks: EnableFlag,
    pub task_count: u8,
}

impl TaskControlPayload {
    pub const MAX_TASK_COUNT: u8 = 0x0F;
}

impl PayloadCodec for TaskControlPayload {
    const WIDTH: usize = 1;

    fn decode(bytes: &[u8]) -> Result<Self> {
        let b = u8::decode(bytes)?;
        Ok(Self {
            clear_all_tasks: EnableFlag(b & 0x01),
            dump_all_tasks: EnableFlag((b >> 1) & 0x01),
            task_count: (b >> 4) & 0x0F,
        })
    }

    fn encode(&self) -> Result<Vec<u8>> {
        if self.task_count > Self::MAX_TASK_COUNT {
            return Err(RegistryError::ValueOutOfRange {
                field: "task_count",
                value: u32::from(self.task_count),
            });
        }
        let clear = self.clear_all_tasks.checked_bits()?;
        let dump = self.dump_all_tasks.checked_bits()?;
        Ok(vec![clear | (dump << 1) | (self.task_count << 4)])
    }
}

register_map! {
    model = DeviceModel::Cuttlefish;
    PortDirection = 32, Ports, READ_WRITE,
        "Direction of each port; a set bit makes the port an output.";
    PortState = 33, Ports, READ_WRITE_EVENT,
        "State of the ports; an event is raised when it changes without a write.";
    PwmTask = 34, PwmTaskPayload, READ_WRITE,
        "Configures the PWM task.";
    ArmExternalStartTrigger = 35, Ports, READ_WRITE,
        "Ports whose external edge starts the PWM task.";
    ExternalStartTriggerEdge = 36, Ports, READ_WRITE,
        "Start trigger edge per port: 0 rising, 1 falling.";
    ArmExternalStopTrigger = 37, Ports, READ_WRITE,
        "Ports whose external edge stops the PWM task.";
    ExternalStopTriggerEdge = 38, Ports, READ_WRITE,
        "Stop trigger edge per port: 0 rising, 1 falling.";
    SoftwareStartTrigger = 39, u8, READ_WRITE,
        "Writing a non-zero value starts the PWM task.";
    SoftwareStopTrigger = 40, u8, READ_WRITE,
        "Writing a non-zero value stops the PWM task.";
    TaskControl = 41, TaskControlPayload, READ_WRITE,
        "Clears or dumps the task list and reports the task count.";
}
