use crate::{RegisterShape, RegistryError, Result};
use core::fmt;
use serde::{Deserialize, Serialize};

fn checked(field: &'static str, raw: u8, max: u8) -> Result<u8> {
    if raw > max {
        return Err(RegistryError::ValueOutOfRange {
            field,
            value: u32::from(raw),
        });
    }
    Ok(raw)
}

/// Harp on/off flag.
///
/// Bytes other than 0 and 1 survive decoding unchanged and are refused on encode.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EnableFlag(pub u8);

impl EnableFlag {
    pub const DISABLE: Self = Self(0);
    pub const ENABLE: Self = Self(1);

    pub fn is_enabled(self) -> bool {
        self.0 != 0
    }

    pub fn checked_bits(self) -> Result<u8> {
        checked("EnableFlag", self.0, 1)
    }
}

impl From<bool> for EnableFlag {
    fn from(enabled: bool) -> Self {
        if enabled {
            Self::ENABLE
        } else {
            Self::DISABLE
        }
    }
}

/// A yes/no field stored in one byte. Any nonzero byte reads as set; the
/// byte itself is kept so it encodes back unchanged.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Toggle(pub u8);

impl Toggle {
    pub const OFF: Self = Self(0);
    pub const ON: Self = Self(1);

    pub fn is_set(self) -> bool {
        self.0 != 0
    }
}

impl From<bool> for Toggle {
    fn from(set: bool) -> Self {
        Self(u8::from(set))
    }
}

/// State of the FIP task schedule.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskState(pub u8);

impl TaskState {
    pub const STOP: Self = Self(0);
    pub const START: Self = Self(1);
    pub const ABORT: Self = Self(2);

    pub fn checked_bits(self) -> Result<u8> {
        checked("TaskState", self.0, 2)
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::STOP => f.write_str("Stop"),
            Self::START => f.write_str("Start"),
            Self::ABORT => f.write_str("Abort"),
            Self(other) => write!(f, "Unknown({other})"),
        }
    }
}

/// Task slot, 0-7.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskIndex(pub u8);

impl TaskIndex {
    pub const COUNT: u8 = 8;

    pub fn new(index: u8) -> Result<Self> {
        checked("TaskIndex", index, Self::COUNT - 1).map(Self)
    }

    pub fn checked_bits(self) -> Result<u8> {
        checked("TaskIndex", self.0, Self::COUNT - 1)
    }

    /// The `TaskNSettings` register for this slot.
    pub fn settings_shape(self) -> Result<RegisterShape> {
        Ok(match self.checked_bits()? {
            0 => RegisterShape::Task0Settings,
            1 => RegisterShape::Task1Settings,
            2 => RegisterShape::Task2Settings,
            3 => RegisterShape::Task3Settings,
            4 => RegisterShape::Task4Settings,
            5 => RegisterShape::Task5Settings,
            6 => RegisterShape::Task6Settings,
            _ => RegisterShape::Task7Settings,
        })
    }
}

impl fmt::Display for TaskIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Task{}", self.0)
    }
}

/// A decoded value paired with the device time of its message.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct Timestamped<T> {
    pub value: T,
    pub seconds: f64,
}

impl<T> Timestamped<T> {
    pub fn new(value: T, seconds: f64) -> Self {
        Self { value, seconds }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Timestamped<U> {
        Timestamped {
            value: f(self.value),
            seconds: self.seconds,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_closed_sets() {
        assert_eq!(TaskState::ABORT.checked_bits().unwrap(), 2);
        assert!(matches!(
            TaskState(3).checked_bits(),
            Err(RegistryError::ValueOutOfRange {
                field: "TaskState",
                value: 3
            })
        ));
        assert!(TaskIndex::new(7).is_ok());
        assert!(TaskIndex::new(8).is_err());
        assert!(EnableFlag(2).checked_bits().is_err());
        assert_eq!(EnableFlag::from(true), EnableFlag::ENABLE);
    }

    #[test]
    fn test_toggle_keeps_byte() {
        assert!(Toggle(5).is_set());
        assert!(!Toggle::OFF.is_set());
        assert_eq!(Toggle::from(true), Toggle::ON);
        assert_ne!(Toggle(5), Toggle::ON);
    }

    #[test]
    fn test_settings_shape() {
        assert_eq!(
            TaskIndex(0).settings_shape().unwrap(),
            RegisterShape::Task0Settings
        );
        assert_eq!(
            TaskIndex(7).settings_shape().unwrap(),
            RegisterShape::Task7Settings
        );
        assert!(TaskIndex(8).settings_shape().is_err());
    }

    #[test]
    fn test_display() {
        assert_eq!(TaskState::START.to_string(), "Start");
        assert_eq!(TaskState(9).to_string(), "Unknown(9)");
        assert_eq!(TaskIndex(3).to_string(), "Task3");
    }
}
