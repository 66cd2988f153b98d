use core::fmt;
use serde::{Deserialize, Serialize};

/// Direction of a Harp message.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Read,
    Write,
    Event,
}

impl MessageType {
    pub const ERROR_FLAG: u8 = 0x08;

    pub fn code(self) -> u8 {
        match self {
            MessageType::Read => 1,
            MessageType::Write => 2,
            MessageType::Event => 3,
        }
    }

    /// Splits a raw message-type byte into the type and its error flag.
    pub fn from_code(code: u8) -> Option<(Self, bool)> {
        let error = code & Self::ERROR_FLAG != 0;
        let kind = match code & !Self::ERROR_FLAG {
            1 => MessageType::Read,
            2 => MessageType::Write,
            3 => MessageType::Event,
            _ => return None,
        };
        Some((kind, error))
    }
}

/// Base element type of a Harp payload.
///
/// The wire tag packs the element size in the low nibble, `0x80` for signed
/// integers and `0x40` for floats. Bit `0x10` flags a timestamp and is carried
/// separately on [`HarpMessage::timestamp`].
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadType {
    U8,
    S8,
    U16,
    S16,
    U32,
    S32,
    U64,
    S64,
    Float,
}

impl PayloadType {
    pub const TIMESTAMP_FLAG: u8 = 0x10;

    pub fn code(self) -> u8 {
        match self {
            PayloadType::U8 => 0x01,
            PayloadType::S8 => 0x81,
            PayloadType::U16 => 0x02,
            PayloadType::S16 => 0x82,
            PayloadType::U32 => 0x04,
            PayloadType::S32 => 0x84,
            PayloadType::U64 => 0x08,
            PayloadType::S64 => 0x88,
            PayloadType::Float => 0x44,
        }
    }

    /// Decodes a wire tag, returning the type and whether a timestamp follows.
    pub fn from_code(code: u8) -> Option<(Self, bool)> {
        let timestamped = code & Self::TIMESTAMP_FLAG != 0;
        let kind = match code & !Self::TIMESTAMP_FLAG {
            0x01 => PayloadType::U8,
            0x81 => PayloadType::S8,
            0x02 => PayloadType::U16,
            0x82 => PayloadType::S16,
            0x04 => PayloadType::U32,
            0x84 => PayloadType::S32,
            0x08 => PayloadType::U64,
            0x88 => PayloadType::S64,
            0x44 => PayloadType::Float,
            _ => return None,
        };
        Some((kind, timestamped))
    }

    pub fn element_size(self) -> usize {
        usize::from(self.code() & 0x0F)
    }
}

/// Device time in seconds, as carried by timestamped messages.
#[derive(Clone, Copy, Debug, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(pub f64);

impl Timestamp {
    /// Duration of one sub-second tick.
    pub const TICK_SECONDS: f64 = 32e-6;
    const TICKS_PER_SECOND: u32 = 31_250;

    pub fn from_parts(seconds: u32, ticks: u16) -> Self {
        Self(f64::from(seconds) + f64::from(ticks) * Self::TICK_SECONDS)
    }

    /// Splits into whole seconds and 32 µs ticks, saturating outside the `u32` range.
    pub fn to_parts(self) -> (u32, u16) {
        let t = if self.0.is_finite() { self.0.max(0.0) } else { 0.0 };
        let mut seconds = t.trunc().min(f64::from(u32::MAX)) as u32;
        let mut ticks = ((t - t.trunc()) / Self::TICK_SECONDS).round() as u32;
        if ticks >= Self::TICKS_PER_SECOND {
            seconds = seconds.saturating_add(1);
            ticks = 0;
        }
        (seconds, ticks as u16)
    }

    pub fn seconds(self) -> f64 {
        self.0
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.6}s", self.0)
    }
}

/// One Harp message, without framing.
#[derive(Clone, Debug, PartialEq)]
pub struct HarpMessage {
    pub message_type: MessageType,
    pub error: bool,
    pub address: u8,
    pub port: u8,
    pub payload_type: PayloadType,
    pub payload: Vec<u8>,
    pub timestamp: Option<Timestamp>,
}

impl HarpMessage {
    /// Port value used when a message is not routed to a sub-device.
    pub const DEFAULT_PORT: u8 = 0xFF;

    pub fn new(
        message_type: MessageType,
        address: u8,
        payload_type: PayloadType,
        payload: &[u8],
    ) -> Self {
        Self {
            message_type,
            error: false,
            address,
            port: Self::DEFAULT_PORT,
            payload_type,
            payload: payload.to_vec(),
            timestamp: None,
        }
    }

    /// A read request carries no payload.
    pub fn read(address: u8, payload_type: PayloadType) -> Self {
        Self::new(MessageType::Read, address, payload_type, &[])
    }

    pub fn write(address: u8, payload_type: PayloadType, payload: &[u8]) -> Self {
        Self::new(MessageType::Write, address, payload_type, payload)
    }

    pub fn with_timestamp(mut self, timestamp: Timestamp) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn element_count(&self) -> usize {
        self.payload.len() / self.payload_type.element_size().max(1)
    }

    pub fn payload_u16(&self) -> Option<u16> {
        let bytes: [u8; 2] = self.payload.get(..2)?.try_into().ok()?;
        Some(u16::from_le_bytes(bytes))
    }
}

impl fmt::Display for HarpMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:?}{} addr={} type={:?} [",
            self.message_type,
            if self.error { "(error)" } else { "" },
            self.address,
            self.payload_type
        )?;
        for (i, b) in self.payload.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{b:02X}")?;
        }
        f.write_str("]")?;
        if let Some(ts) = self.timestamp {
            write!(f, " @ {ts}")?;
        }
        Ok(())
    }
}

#[derive(Clone, Debug)]
pub struct PortInfo {
    pub name: String,
    pub driver: String,
}
