use crate::cuttlefish::{self, PwmTaskPayload, TaskControlPayload};
use crate::fip::{self, TaskPayload};
use crate::{EnableFlag, PayloadCodec, TaskIndex, TaskState};
use core::fmt;
use serde::{Deserialize, Serialize};

/// A decoded payload of any register in either catalog.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum RegisterValue {
    CuttlefishPorts(cuttlefish::Ports),
    FipPorts(fip::Ports),
    Byte(u8),
    EnableFlag(EnableFlag),
    TaskState(TaskState),
    TaskIndex(TaskIndex),
    PwmTask(PwmTaskPayload),
    Task(TaskPayload),
    TaskControl(TaskControlPayload),
}

fn write_flags<B>(flags: &B, f: &mut fmt::Formatter<'_>) -> fmt::Result
where
    B: bitflags::Flags,
    B::Bits: bitflags::parser::WriteHex,
{
    if flags.is_empty() {
        return f.write_str("(none)");
    }
    bitflags::parser::to_writer(flags, f)
}

impl fmt::Display for RegisterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegisterValue::CuttlefishPorts(p) => write_flags(p, f),
            RegisterValue::FipPorts(p) => write_flags(p, f),
            RegisterValue::Byte(b) => write!(f, "{b}"),
            RegisterValue::EnableFlag(flag) => write!(f, "{}", flag.0),
            RegisterValue::TaskState(state) => write!(f, "{state}"),
            RegisterValue::TaskIndex(index) => write!(f, "{index}"),
            RegisterValue::PwmTask(task) => write!(f, "{task:?}"),
            RegisterValue::Task(task) => write!(f, "{task:?}"),
            RegisterValue::TaskControl(ctl) => write!(f, "{ctl:?}"),
        }
    }
}

/// A payload type that can travel as a [`RegisterValue`].
pub trait TypedPayload: PayloadCodec + Clone {
    fn into_value(self) -> RegisterValue;

    fn from_value(value: &RegisterValue) -> Option<Self>;
}

macro_rules! typed_payload {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl TypedPayload for $ty {
                fn into_value(self) -> RegisterValue {
                    RegisterValue::$variant(self)
                }

                fn from_value(value: &RegisterValue) -> Option<Self> {
                    match value {
                        RegisterValue::$variant(v) => Some(v.clone()),
                        _ => None,
                    }
                }
            }
        )*
    };
}

typed_payload! {
    cuttlefish::Ports => CuttlefishPorts,
    fip::Ports => FipPorts,
    u8 => Byte,
    EnableFlag => EnableFlag,
    TaskState => TaskState,
    TaskIndex => TaskIndex,
    PwmTaskPayload => PwmTask,
    TaskPayload => Task,
    TaskControlPayload => TaskControl,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_variant_mismatch_is_none() {
        let v = RegisterValue::Byte(3);
        assert_eq!(u8::from_value(&v), Some(3));
        assert_eq!(TaskState::from_value(&v), None);
        assert_eq!(
            cuttlefish::Ports::from_value(&RegisterValue::FipPorts(fip::Ports::IO0)),
            None
        );
    }

    #[test]
    fn test_json_shape() {
        let v = TaskState::START.into_value();
        let json = serde_json::to_value(&v).unwrap();
        assert_eq!(json["kind"], "task_state");
        assert_eq!(json["value"], 1);
    }

    #[test]
    fn test_display() {
        let ports = cuttlefish::Ports::PORT0 | cuttlefish::Ports::PORT3;
        let ports = RegisterValue::CuttlefishPorts(ports);
        assert_eq!(ports.to_string(), "PORT0 | PORT3");
        assert_eq!(
            RegisterValue::FipPorts(fip::Ports::empty()).to_string(),
            "(none)"
        );
        assert_eq!(RegisterValue::TaskIndex(TaskIndex(2)).to_string(), "Task2");
    }
}
