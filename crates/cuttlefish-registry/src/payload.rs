//! Fixed-width payload encoding.
//!
//! Every register payload has one exact byte width. Composite payloads are
//! laid out field after field in little-endian order with no padding.

use crate::{EnableFlag, RegistryError, Result, TaskIndex, TaskState};

/// Conversion between a typed register value and its wire bytes.
pub trait PayloadCodec: Sized {
    /// Exact payload length in bytes.
    const WIDTH: usize;

    fn decode(bytes: &[u8]) -> Result<Self>;

    fn encode(&self) -> Result<Vec<u8>>;
}

pub(crate) fn check_width(bytes: &[u8], expected: usize) -> Result<()> {
    let actual = bytes.len();
    if actual < expected {
        return Err(RegistryError::TruncatedPayload { expected, actual });
    }
    if actual > expected {
        return Err(RegistryError::OversizedPayload { expected, actual });
    }
    Ok(())
}

/// Sequential reader over a payload of known width.
pub(crate) struct FieldReader<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> FieldReader<'a> {
    pub(crate) fn new(bytes: &'a [u8], width: usize) -> Result<Self> {
        check_width(bytes, width)?;
        Ok(Self { bytes, offset: 0 })
    }

    fn take<const N: usize>(&mut self) -> Result<[u8; N]> {
        let end = self.offset + N;
        let field = self
            .bytes
            .get(self.offset..end)
            .ok_or(RegistryError::TruncatedPayload {
                expected: end,
                actual: self.bytes.len(),
            })?;
        let mut out = [0u8; N];
        out.copy_from_slice(field);
        self.offset = end;
        Ok(out)
    }

    pub(crate) fn u8(&mut self) -> Result<u8> {
        Ok(self.take::<1>()?[0])
    }

    pub(crate) fn u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.take()?))
    }

    pub(crate) fn f32(&mut self) -> Result<f32> {
        Ok(f32::from_le_bytes(self.take()?))
    }
}

/// Sequential writer producing a payload of known width.
pub(crate) struct FieldWriter {
    buf: Vec<u8>,
}

impl FieldWriter {
    pub(crate) fn with_width(width: usize) -> Self {
        Self {
            buf: Vec::with_capacity(width),
        }
    }

    pub(crate) fn u8(&mut self, v: u8) -> &mut Self {
        self.buf.push(v);
        self
    }

    pub(crate) fn u32(&mut self, v: u32) -> &mut Self {
        self.buf.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub(crate) fn f32(&mut self, v: f32) -> &mut Self {
        self.buf.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub(crate) fn finish(self) -> Vec<u8> {
        self.buf
    }
}

impl PayloadCodec for u8 {
    const WIDTH: usize = 1;

    fn decode(bytes: &[u8]) -> Result<Self> {
        FieldReader::new(bytes, Self::WIDTH)?.u8()
    }

    fn encode(&self) -> Result<Vec<u8>> {
        Ok(vec![*self])
    }
}

macro_rules! closed_byte_codec {
    ($($ty:ty),* $(,)?) => {
        $(
            impl PayloadCodec for $ty {
                const WIDTH: usize = 1;

                fn decode(bytes: &[u8]) -> Result<Self> {
                    u8::decode(bytes).map(Self)
                }

                fn encode(&self) -> Result<Vec<u8>> {
                    Ok(vec![self.checked_bits()?])
                }
            }
        )*
    };
}

closed_byte_codec!(EnableFlag, TaskState, TaskIndex);
