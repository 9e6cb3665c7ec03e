//! Wraps a `Chunk`'s canonical binary encoding into a named TAR entry.
//! Keeps header construction and write-through in one place so the writer
//! and the repacker agree on exactly how entries are framed.

use std::io::Write;

use catchsync_common::serializer::Serializer;
use tar::{Builder, Header};

use crate::error::Result;

/// Appends one TAR entry carrying `value`'s canonical binary encoding under
/// `name` to `builder`. Used for both `balances.<n>.msgpack` chunk entries
/// and the single-shot `content.msgpack` / `stateProofVerificationData.msgpack`
/// sections - the three section kinds differ only in payload type and name.
pub fn append_entry<W: Write, V: Serializer>(
    builder: &mut Builder<W>,
    name: &str,
    value: &V,
) -> Result<()> {
    let bytes = value.to_bytes();
    let mut header = Header::new_gnu();
    header.set_path(name)?;
    header.set_size(bytes.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    builder.append(&header, bytes.as_slice())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use catchsync_common::catchpoint::{Chunk, BalanceRecord};
    use catchsync_common::account::AccountData;
    use catchsync_common::crypto::Address;

    #[test]
    fn appends_a_readable_entry() {
        let mut chunk = Chunk::default();
        chunk
            .balances
            .push(BalanceRecord::new(Address::new([1; 32]), AccountData::default()));

        let mut buf = Vec::new();
        {
            let mut builder = Builder::new(&mut buf);
            append_entry(&mut builder, "balances.1.msgpack", &chunk).unwrap();
            builder.finish().unwrap();
        }

        let mut archive = tar::Archive::new(buf.as_slice());
        let mut entries = archive.entries().unwrap();
        let mut entry = entries.next().unwrap().unwrap();
        assert_eq!(entry.path().unwrap().to_str().unwrap(), "balances.1.msgpack");
        let mut contents = Vec::new();
        std::io::copy(&mut entry, &mut contents).unwrap();
        let decoded = Chunk::from_bytes(&contents).unwrap();
        assert_eq!(decoded, chunk);
    }
}
