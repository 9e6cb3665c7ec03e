//! Binary (de)serialization primitives used for every on-disk and on-wire
//! type in this crate: catchpoint chunks, file headers, account and resource
//! records, balance hashes. This is a custom fixed-width codec, not a
//! general-purpose format like MessagePack or bincode - every type controls
//! its exact byte layout via `Serializer::{read,write,size}`.

use std::convert::TryInto;

use thiserror::Error;

use crate::crypto::{Hash, HASH_SIZE};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ReaderError {
    #[error("unexpected end of buffer")]
    InvalidSize,
    #[error("invalid value")]
    InvalidValue,
    #[error("value exceeds maximum allowed array size")]
    ExceedsMaxArraySize,
    #[error("value exceeds maximum allowed map size")]
    ExceedsMaxMapSize,
    #[error("value exceeds maximum allowed bytes size")]
    ExceedsMaxBytesSize,
    #[error("nested structure exceeds maximum allowed depth")]
    ExceedsMaxDepth,
    #[error("invalid hex string")]
    InvalidHex,
    #[error("trailing bytes left in buffer")]
    TrailingBytes,
}

/// Cursor over an immutable byte slice. Every `read_*` call either advances
/// the cursor and returns the parsed value, or leaves it untouched and
/// returns an error - callers never have to reason about partial reads.
pub struct Reader<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> Reader<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, offset: 0 }
    }

    #[inline]
    pub fn total_size(&self) -> usize {
        self.bytes.len()
    }

    #[inline]
    pub fn size_left(&self) -> usize {
        self.bytes.len() - self.offset
    }

    #[inline]
    pub fn offset(&self) -> usize {
        self.offset
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], ReaderError> {
        if self.size_left() < len {
            return Err(ReaderError::InvalidSize);
        }
        let slice = &self.bytes[self.offset..self.offset + len];
        self.offset += len;
        Ok(slice)
    }

    pub fn read_u8(&mut self) -> Result<u8, ReaderError> {
        Ok(self.take(1)?[0])
    }

    pub fn read_bool(&mut self) -> Result<bool, ReaderError> {
        match self.read_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            _ => Err(ReaderError::InvalidValue),
        }
    }

    pub fn read_u16(&mut self) -> Result<u16, ReaderError> {
        let bytes = self.take(2)?;
        Ok(u16::from_be_bytes(bytes.try_into().unwrap()))
    }

    pub fn read_u32(&mut self) -> Result<u32, ReaderError> {
        let bytes = self.take(4)?;
        Ok(u32::from_be_bytes(bytes.try_into().unwrap()))
    }

    pub fn read_u64(&mut self) -> Result<u64, ReaderError> {
        let bytes = self.take(8)?;
        Ok(u64::from_be_bytes(bytes.try_into().unwrap()))
    }

    pub fn read_u128(&mut self) -> Result<u128, ReaderError> {
        let bytes = self.take(16)?;
        Ok(u128::from_be_bytes(bytes.try_into().unwrap()))
    }

    /// Read a length-prefixed (u32) byte vector, bounded by `max`.
    pub fn read_bytes(&mut self, max: usize) -> Result<Vec<u8>, ReaderError> {
        let len = self.read_u32()? as usize;
        if len > max {
            return Err(ReaderError::ExceedsMaxBytesSize);
        }
        Ok(self.take(len)?.to_vec())
    }

    /// Read exactly `len` bytes with no length prefix (caller already knows
    /// the size, e.g. a fixed-size hash or a chunk already framed elsewhere).
    pub fn read_bytes_ref(&mut self, len: usize) -> Result<&'a [u8], ReaderError> {
        self.take(len)
    }

    pub fn read_bytes_32(&mut self) -> Result<[u8; 32], ReaderError> {
        self.take(32)?.try_into().map_err(|_| ReaderError::InvalidSize)
    }

    pub fn read_hash(&mut self) -> Result<Hash, ReaderError> {
        let bytes = self.take(HASH_SIZE)?;
        let array: [u8; HASH_SIZE] = bytes.try_into().map_err(|_| ReaderError::InvalidSize)?;
        Ok(Hash::new(array))
    }

    pub fn read_string(&mut self) -> Result<String, ReaderError> {
        let bytes = self.read_bytes(u16::MAX as usize)?;
        String::from_utf8(bytes).map_err(|_| ReaderError::InvalidValue)
    }

    pub fn read_string_with_size(&mut self, size: usize) -> Result<String, ReaderError> {
        let bytes = self.take(size)?.to_vec();
        String::from_utf8(bytes).map_err(|_| ReaderError::InvalidValue)
    }

    /// Fail if any byte remains unconsumed. Used at the top level of a chunk
    /// or record to catch truncated/extended wire data.
    pub fn expect_empty(&self) -> Result<(), ReaderError> {
        if self.size_left() != 0 {
            return Err(ReaderError::TrailingBytes);
        }
        Ok(())
    }
}

/// Growable byte buffer mirroring `Reader`'s layout, used to encode types
/// for file and network output.
#[derive(Debug, Default, Clone)]
pub struct Writer {
    bytes: Vec<u8>,
}

impl Writer {
    pub fn new() -> Self {
        Self { bytes: Vec::new() }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            bytes: Vec::with_capacity(capacity),
        }
    }

    pub fn write_u8(&mut self, value: u8) {
        self.bytes.push(value);
    }

    pub fn write_bool(&mut self, value: bool) {
        self.write_u8(value as u8);
    }

    pub fn write_u16(&mut self, value: u16) {
        self.bytes.extend_from_slice(&value.to_be_bytes());
    }

    pub fn write_u32(&mut self, value: u32) {
        self.bytes.extend_from_slice(&value.to_be_bytes());
    }

    pub fn write_u64(&mut self, value: &u64) {
        self.bytes.extend_from_slice(&value.to_be_bytes());
    }

    pub fn write_u128(&mut self, value: &u128) {
        self.bytes.extend_from_slice(&value.to_be_bytes());
    }

    /// Write a length-prefixed (u32) byte slice.
    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.write_u32(bytes.len() as u32);
        self.bytes.extend_from_slice(bytes);
    }

    /// Write raw bytes with no length prefix.
    pub fn write_bytes_ref(&mut self, bytes: &[u8]) {
        self.bytes.extend_from_slice(bytes);
    }

    pub fn write_hash(&mut self, hash: &Hash) {
        self.bytes.extend_from_slice(hash.as_bytes());
    }

    pub fn write_string(&mut self, value: &str) {
        self.write_bytes(value.as_bytes());
    }

    pub fn total_write(&self) -> usize {
        self.bytes.len()
    }

    pub fn bytes(self) -> Vec<u8> {
        self.bytes
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

/// Implemented by every type that has a stable on-disk/on-wire binary
/// representation. `size()` must match the exact number of bytes `write`
/// produces - callers use it to pre-size buffers and to account chunk sizes
/// without re-encoding.
pub trait Serializer: Sized {
    fn read(reader: &mut Reader) -> Result<Self, ReaderError>;
    fn write(&self, writer: &mut Writer);

    fn size(&self) -> usize;

    fn to_bytes(&self) -> Vec<u8> {
        let mut writer = Writer::with_capacity(self.size());
        self.write(&mut writer);
        writer.bytes()
    }

    fn from_bytes(bytes: &[u8]) -> Result<Self, ReaderError> {
        let mut reader = Reader::new(bytes);
        let value = Self::read(&mut reader)?;
        reader.expect_empty()?;
        Ok(value)
    }
}

impl Serializer for u8 {
    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        reader.read_u8()
    }
    fn write(&self, writer: &mut Writer) {
        writer.write_u8(*self);
    }
    fn size(&self) -> usize {
        1
    }
}

impl Serializer for u32 {
    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        reader.read_u32()
    }
    fn write(&self, writer: &mut Writer) {
        writer.write_u32(*self);
    }
    fn size(&self) -> usize {
        4
    }
}

impl Serializer for u64 {
    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        reader.read_u64()
    }
    fn write(&self, writer: &mut Writer) {
        writer.write_u64(self);
    }
    fn size(&self) -> usize {
        8
    }
}

impl<T: Serializer> Serializer for Option<T> {
    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        if reader.read_bool()? {
            Ok(Some(T::read(reader)?))
        } else {
            Ok(None)
        }
    }

    fn write(&self, writer: &mut Writer) {
        match self {
            Some(value) => {
                writer.write_bool(true);
                value.write(writer);
            }
            None => writer.write_bool(false),
        }
    }

    fn size(&self) -> usize {
        1 + self.as_ref().map(|v| v.size()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_primitives() {
        let mut writer = Writer::new();
        writer.write_u8(7);
        writer.write_u64(&1234567890u64);
        writer.write_bytes(b"hello");
        writer.write_bool(true);

        let bytes = writer.bytes();
        let mut reader = Reader::new(&bytes);
        assert_eq!(reader.read_u8().unwrap(), 7);
        assert_eq!(reader.read_u64().unwrap(), 1234567890u64);
        assert_eq!(reader.read_bytes(1024).unwrap(), b"hello");
        assert!(reader.read_bool().unwrap());
        reader.expect_empty().unwrap();
    }

    #[test]
    fn rejects_truncated_input() {
        let bytes = vec![0u8; 3];
        let mut reader = Reader::new(&bytes);
        assert_eq!(reader.read_u64(), Err(ReaderError::InvalidSize));
    }

    #[test]
    fn rejects_oversized_bytes() {
        let mut writer = Writer::new();
        writer.write_bytes(&vec![0u8; 64]);
        let bytes = writer.bytes();
        let mut reader = Reader::new(&bytes);
        assert_eq!(reader.read_bytes(16), Err(ReaderError::ExceedsMaxBytesSize));
    }

    #[test]
    fn option_round_trip() {
        let some_value: Option<u64> = Some(42);
        let bytes = {
            let mut w = Writer::new();
            some_value.write(&mut w);
            w.bytes()
        };
        let decoded = Option::<u64>::from_bytes(&bytes).unwrap();
        assert_eq!(decoded, Some(42));

        let none_value: Option<u64> = None;
        let bytes = none_value.to_bytes();
        let decoded = Option::<u64>::from_bytes(&bytes).unwrap();
        assert_eq!(decoded, None);
    }
}
