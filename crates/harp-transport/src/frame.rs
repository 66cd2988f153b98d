//! Binary framing of Harp messages.
//!
//! Layout: `type, length, address, port, payload_type, [seconds, ticks], payload.., checksum`,
//! where the optional timestamp is a `u32` of seconds and a `u16` of 32 µs ticks.
//! `length` counts every byte after itself, checksum included. The checksum is
//! the wrapping sum of all preceding bytes.

use crate::{HarpMessage, MessageType, PayloadType, Result, Timestamp, TransportError};

const HEADER_LEN: usize = 5;
const TIMESTAMP_LEN: usize = 6;

pub fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |acc, b| acc.wrapping_add(*b))
}

pub fn encode_frame(msg: &HarpMessage) -> Result<Vec<u8>> {
    let elem = msg.payload_type.element_size();
    if elem == 0 || msg.payload.len() % elem != 0 {
        return Err(TransportError::InvalidFrame(
            "payload length is not a multiple of the element size",
        ));
    }
    let ts_len = if msg.timestamp.is_some() { TIMESTAMP_LEN } else { 0 };
    // address + port + payload type + timestamp + payload + checksum
    let length = 3 + ts_len + msg.payload.len() + 1;
    let length =
        u8::try_from(length).map_err(|_| TransportError::InvalidFrame("frame too long"))?;

    let mut out = Vec::with_capacity(usize::from(length) + 2);
    let mut kind = msg.message_type.code();
    if msg.error {
        kind |= MessageType::ERROR_FLAG;
    }
    out.push(kind);
    out.push(length);
    out.push(msg.address);
    out.push(msg.port);
    let mut ptype = msg.payload_type.code();
    if let Some(ts) = msg.timestamp {
        ptype |= PayloadType::TIMESTAMP_FLAG;
        out.push(ptype);
        let (seconds, ticks) = ts.to_parts();
        out.extend_from_slice(&seconds.to_le_bytes());
        out.extend_from_slice(&ticks.to_le_bytes());
    } else {
        out.push(ptype);
    }
    out.extend_from_slice(&msg.payload);
    out.push(checksum(&out));
    Ok(out)
}

/// Parses one frame from the start of `buf`, returning the message and the
/// number of bytes it occupied.
pub fn parse_frame(buf: &[u8]) -> Result<(HarpMessage, usize)> {
    if buf.len() < 2 {
        return Err(TransportError::InvalidFrame("short header"));
    }
    let total = usize::from(buf[1]) + 2;
    if total < HEADER_LEN + 1 {
        return Err(TransportError::InvalidFrame("length too small"));
    }
    if buf.len() < total {
        return Err(TransportError::InvalidFrame("short frame"));
    }
    let frame = &buf[..total];
    let (body, tail) = frame.split_at(total - 1);
    let expected = checksum(body);
    if tail[0] != expected {
        return Err(TransportError::Checksum {
            expected,
            actual: tail[0],
        });
    }

    let (message_type, error) =
        MessageType::from_code(body[0]).ok_or(TransportError::InvalidFrame("message type"))?;
    let (payload_type, timestamped) =
        PayloadType::from_code(body[4]).ok_or(TransportError::InvalidFrame("payload type"))?;

    let mut rest = &body[HEADER_LEN..];
    let timestamp = if timestamped {
        if rest.len() < TIMESTAMP_LEN {
            return Err(TransportError::InvalidFrame("short timestamp"));
        }
        let mut secs = [0u8; 4];
        let mut ticks = [0u8; 2];
        secs.copy_from_slice(&rest[0..4]);
        ticks.copy_from_slice(&rest[4..6]);
        rest = &rest[TIMESTAMP_LEN..];
        Some(Timestamp::from_parts(
            u32::from_le_bytes(secs),
            u16::from_le_bytes(ticks),
        ))
    } else {
        None
    };
    if rest.len() % payload_type.element_size() != 0 {
        return Err(TransportError::InvalidFrame(
            "payload length is not a multiple of the element size",
        ));
    }

    let msg = HarpMessage {
        message_type,
        error,
        address: body[2],
        port: body[3],
        payload_type,
        payload: rest.to_vec(),
        timestamp,
    };
    Ok((msg, total))
}

/// Accumulates a byte stream and yields complete frames.
#[derive(Debug, Default)]
pub struct FrameReader {
    buf: Vec<u8>,
}

impl FrameReader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Returns the next complete frame, `None` if more bytes are needed.
    ///
    /// A corrupt frame is reported once and its first byte dropped so that the
    /// reader can resynchronise on the following bytes.
    pub fn next_frame(&mut self) -> Option<Result<HarpMessage>> {
        loop {
            let first = *self.buf.first()?;
            if MessageType::from_code(first).is_none() {
                tracing::warn!(byte = first, "discarding byte outside a harp frame");
                self.buf.remove(0);
                continue;
            }
            let total = usize::from(*self.buf.get(1)?) + 2;
            if self.buf.len() < total {
                return None;
            }
            return match parse_frame(&self.buf) {
                Ok((msg, used)) => {
                    self.buf.drain(..used);
                    Some(Ok(msg))
                }
                Err(e) => {
                    self.buf.remove(0);
                    Some(Err(e))
                }
            };
        }
    }
}
