#![forbid(unsafe_code)]
//! Varint helpers and the field-ordered serialization buffers.
//!
//! Values are written field by field in the order their type declares them and
//! read back in the same order. The byte layout is an implementation detail; the
//! contract callers rely on is ordering and round-trip fidelity.

use crate::types::{GraphError, NodeHandle, PartitionId, Result, StateRef};

pub mod var {
    //! Unsigned varints and ZigZag signed integers.

    use crate::types::{GraphError, Result};

    /// Encodes a u64 as an unsigned varint.
    pub fn encode_u64(mut v: u64, out: &mut Vec<u8>) {
        loop {
            let byte = (v & 0x7f) as u8;
            v >>= 7;
            if v == 0 {
                out.push(byte);
                break;
            }
            out.push(byte | 0x80);
        }
    }

    /// Decodes a u64 varint from a slice, updating the offset.
    pub fn decode_u64(src: &[u8], off: &mut usize) -> Result<u64> {
        let mut result = 0u64;
        let mut shift = 0u32;
        for i in 0..10 {
            let byte = *src
                .get(*off)
                .ok_or(GraphError::Corruption("varint truncated"))?;
            *off += 1;
            let payload = (byte & 0x7f) as u64;
            if i == 9 && payload > 1 {
                return Err(GraphError::Corruption("varint overflows u64"));
            }
            result |= payload << shift;
            if byte & 0x80 == 0 {
                return Ok(result);
            }
            shift += 7;
        }
        Err(GraphError::Corruption("varint longer than 10 bytes"))
    }

    /// Encodes an i64 as a ZigZag-encoded varint.
    pub fn encode_i64(v: i64, out: &mut Vec<u8>) {
        let zigzag = ((v << 1) ^ (v >> 63)) as u64;
        encode_u64(zigzag, out);
    }

    /// Decodes a ZigZag-encoded i64 varint from a slice, updating the offset.
    pub fn decode_i64(src: &[u8], off: &mut usize) -> Result<i64> {
        let zigzag = decode_u64(src, off)?;
        Ok(((zigzag >> 1) as i64) ^ (-((zigzag & 1) as i64)))
    }
}

/// Write side of the codec.
#[derive(Default, Debug, Clone)]
pub struct SerializeBuffer {
    bytes: Vec<u8>,
}

impl SerializeBuffer {
    /// Creates an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends one value.
    pub fn serialize<T: Codec + ?Sized>(&mut self, value: &T) {
        value.serialize(self);
    }

    /// Appends a raw varint.
    pub fn put_u64(&mut self, v: u64) {
        var::encode_u64(v, &mut self.bytes);
    }

    /// Appends a single byte.
    pub fn put_u8(&mut self, v: u8) {
        self.bytes.push(v);
    }

    /// Appends a length-prefixed byte string.
    pub fn put_bytes(&mut self, v: &[u8]) {
        self.put_u64(v.len() as u64);
        self.bytes.extend_from_slice(v);
    }

    /// Number of bytes written so far.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether nothing was written.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Consumes the buffer, returning the encoded bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    /// Borrows the encoded bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

/// Read side of the codec.
pub struct DeserializeBuffer<'a> {
    buf: &'a [u8],
    off: usize,
}

impl<'a> DeserializeBuffer<'a> {
    /// Starts reading `buf` from its first byte.
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, off: 0 }
    }

    /// Reads one value.
    pub fn deserialize<T: Codec>(&mut self) -> Result<T> {
        T::deserialize(self)
    }

    /// Reads a raw varint.
    pub fn get_u64(&mut self) -> Result<u64> {
        var::decode_u64(self.buf, &mut self.off)
    }

    /// Reads a single byte.
    pub fn get_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    /// Reads a length-prefixed byte string.
    pub fn get_bytes(&mut self) -> Result<&'a [u8]> {
        let len = self.get_u64()?;
        let len = usize::try_from(len).map_err(|_| GraphError::Corruption("length overflow"))?;
        self.take(len)
    }

    /// Bytes not consumed yet.
    pub fn remaining(&self) -> usize {
        self.buf.len().saturating_sub(self.off)
    }

    /// Fails if input is left over.
    pub fn finish(&self) -> Result<()> {
        if self.remaining() != 0 {
            return Err(GraphError::Corruption("unexpected trailing bytes"));
        }
        Ok(())
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self
            .off
            .checked_add(n)
            .filter(|end| *end <= self.buf.len())
            .ok_or(GraphError::Corruption("unexpected end of buffer"))?;
        let slice = &self.buf[self.off..end];
        self.off = end;
        Ok(slice)
    }
}

/// Longest sequence of zero-sized items a decoder accepts.
pub const MAX_ZERO_SIZED_ITEMS: u64 = 1 << 20;

/// Types that can travel through [`SerializeBuffer`] / [`DeserializeBuffer`].
pub trait Codec: Sized {
    /// Writes `self` field by field.
    fn serialize(&self, buf: &mut SerializeBuffer);
    /// Reads a value written by [`Codec::serialize`].
    fn deserialize(buf: &mut DeserializeBuffer<'_>) -> Result<Self>;
}

impl Codec for () {
    fn serialize(&self, _: &mut SerializeBuffer) {}

    fn deserialize(_: &mut DeserializeBuffer<'_>) -> Result<Self> {
        Ok(())
    }
}

impl Codec for bool {
    fn serialize(&self, buf: &mut SerializeBuffer) {
        buf.put_u8(u8::from(*self));
    }

    fn deserialize(buf: &mut DeserializeBuffer<'_>) -> Result<Self> {
        match buf.get_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            _ => Err(GraphError::Corruption("invalid boolean encoding")),
        }
    }
}

macro_rules! unsigned_codec {
    ($($ty:ty),*) => {$(
        impl Codec for $ty {
            fn serialize(&self, buf: &mut SerializeBuffer) {
                buf.put_u64(*self as u64);
            }

            fn deserialize(buf: &mut DeserializeBuffer<'_>) -> Result<Self> {
                <$ty>::try_from(buf.get_u64()?)
                    .map_err(|_| GraphError::Corruption(concat!("value out of range for ", stringify!($ty))))
            }
        }
    )*};
}

unsigned_codec!(u8, u16, u32, u64, usize);

impl Codec for i64 {
    fn serialize(&self, buf: &mut SerializeBuffer) {
        var::encode_i64(*self, &mut buf.bytes);
    }

    fn deserialize(buf: &mut DeserializeBuffer<'_>) -> Result<Self> {
        var::decode_i64(buf.buf, &mut buf.off)
    }
}

impl Codec for i32 {
    fn serialize(&self, buf: &mut SerializeBuffer) {
        (*self as i64).serialize(buf);
    }

    fn deserialize(buf: &mut DeserializeBuffer<'_>) -> Result<Self> {
        i32::try_from(i64::deserialize(buf)?)
            .map_err(|_| GraphError::Corruption("value out of range for i32"))
    }
}

impl Codec for f64 {
    fn serialize(&self, buf: &mut SerializeBuffer) {
        buf.bytes.extend_from_slice(&self.to_le_bytes());
    }

    fn deserialize(buf: &mut DeserializeBuffer<'_>) -> Result<Self> {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(buf.take(8)?);
        Ok(f64::from_le_bytes(raw))
    }
}

impl Codec for String {
    fn serialize(&self, buf: &mut SerializeBuffer) {
        buf.put_bytes(self.as_bytes());
    }

    fn deserialize(buf: &mut DeserializeBuffer<'_>) -> Result<Self> {
        let bytes = buf.get_bytes()?;
        String::from_utf8(bytes.to_vec()).map_err(|_| GraphError::Corruption("invalid UTF-8 string"))
    }
}

impl<T: Codec> Codec for Option<T> {
    fn serialize(&self, buf: &mut SerializeBuffer) {
        match self {
            Some(value) => {
                buf.put_u8(1);
                value.serialize(buf);
            }
            None => buf.put_u8(0),
        }
    }

    fn deserialize(buf: &mut DeserializeBuffer<'_>) -> Result<Self> {
        match buf.get_u8()? {
            0 => Ok(None),
            1 => Ok(Some(T::deserialize(buf)?)),
            _ => Err(GraphError::Corruption("invalid option tag")),
        }
    }
}

impl<T: Codec> Codec for Vec<T> {
    fn serialize(&self, buf: &mut SerializeBuffer) {
        buf.put_u64(self.len() as u64);
        for item in self {
            item.serialize(buf);
        }
    }

    fn deserialize(buf: &mut DeserializeBuffer<'_>) -> Result<Self> {
        let len = buf.get_u64()?;
        // Every element takes at least one byte unless it is zero-sized.
        let limit = if std::mem::size_of::<T>() == 0 {
            MAX_ZERO_SIZED_ITEMS
        } else {
            buf.remaining() as u64
        };
        if len > limit {
            return Err(GraphError::Corruption("sequence longer than its input"));
        }
        let mut out = Vec::with_capacity(len as usize);
        for _ in 0..len {
            out.push(T::deserialize(buf)?);
        }
        Ok(out)
    }
}

impl<A: Codec, B: Codec> Codec for (A, B) {
    fn serialize(&self, buf: &mut SerializeBuffer) {
        self.0.serialize(buf);
        self.1.serialize(buf);
    }

    fn deserialize(buf: &mut DeserializeBuffer<'_>) -> Result<Self> {
        Ok((A::deserialize(buf)?, B::deserialize(buf)?))
    }
}

impl Codec for PartitionId {
    fn serialize(&self, buf: &mut SerializeBuffer) {
        self.0.serialize(buf);
    }

    fn deserialize(buf: &mut DeserializeBuffer<'_>) -> Result<Self> {
        Ok(PartitionId(u16::deserialize(buf)?))
    }
}

impl Codec for NodeHandle {
    fn serialize(&self, buf: &mut SerializeBuffer) {
        self.partition.serialize(buf);
        self.segment.serialize(buf);
        self.index.serialize(buf);
        self.generation.serialize(buf);
    }

    fn deserialize(buf: &mut DeserializeBuffer<'_>) -> Result<Self> {
        Ok(NodeHandle {
            partition: buf.deserialize()?,
            segment: buf.deserialize()?,
            index: buf.deserialize()?,
            generation: buf.deserialize()?,
        })
    }
}

impl Codec for StateRef {
    fn serialize(&self, buf: &mut SerializeBuffer) {
        self.partition.serialize(buf);
        self.segment.serialize(buf);
    }

    fn deserialize(buf: &mut DeserializeBuffer<'_>) -> Result<Self> {
        Ok(StateRef {
            partition: buf.deserialize()?,
            segment: buf.deserialize()?,
        })
    }
}
