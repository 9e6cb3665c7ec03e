use std::{
    convert::TryInto,
    fmt::{Display, Error, Formatter},
    str::FromStr,
};

use serde::{Deserialize, Serialize};

use crate::serializer::{Reader, ReaderError, Serializer, Writer};

pub const ADDRESS_SIZE: usize = 32;

/// Account address: the 32 byte public key that identifies an account in
/// every catchpoint record (balance, resource, KV namespace).
#[derive(Eq, PartialEq, PartialOrd, Ord, Clone, Copy, Debug, Hash, Serialize, Deserialize)]
pub struct Address([u8; ADDRESS_SIZE]);

impl Address {
    pub const fn new(bytes: [u8; ADDRESS_SIZE]) -> Self {
        Address(bytes)
    }

    pub const fn zero() -> Self {
        Address([0u8; ADDRESS_SIZE])
    }

    pub fn as_bytes(&self) -> &[u8; ADDRESS_SIZE] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl FromStr for Address {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s).map_err(|_| "invalid hex string")?;
        let bytes: [u8; ADDRESS_SIZE] = bytes.try_into().map_err(|_| "invalid address length")?;
        Ok(Address(bytes))
    }
}

impl Display for Address {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), Error> {
        write!(f, "{}", self.to_hex())
    }
}

impl AsRef<[u8]> for Address {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl Serializer for Address {
    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        let bytes = reader.read_bytes_32()?;
        Ok(Address(bytes))
    }

    fn write(&self, writer: &mut Writer) {
        writer.write_bytes_ref(&self.0);
    }

    fn size(&self) -> usize {
        ADDRESS_SIZE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_round_trip() {
        let addr = Address::new([7u8; ADDRESS_SIZE]);
        let hex = addr.to_string();
        let parsed: Address = hex.parse().unwrap();
        assert_eq!(addr, parsed);
    }

    #[test]
    fn wire_round_trip() {
        let addr = Address::new([9u8; ADDRESS_SIZE]);
        let bytes = addr.to_bytes();
        let decoded = Address::from_bytes(&bytes).unwrap();
        assert_eq!(addr, decoded);
    }
}
