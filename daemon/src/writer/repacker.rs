//! Rewrites a catchpoint body (the output of `CatchpointWriter`, which does
//! not yet know its own totals) into the final file: `content.msgpack`
//! first, then every body entry copied through in order.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use catchsync_common::catchpoint::FileHeader;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use tar::{Builder, Header};

use crate::error::{CatchpointError, Result};
use crate::writer::chunk_encoder;

/// A reasonable floor for the copy buffer when the body carried no chunks
/// at all (an empty ledger still produces a valid, header-only file).
const MIN_BUFFER: usize = 8 * 1024;

pub struct Repacker;

impl Repacker {
    /// Reads the gzip/TAR body at `body_path` and writes the final file to
    /// `output_path`, with `header` prepended as `content.msgpack`. The
    /// internal copy buffer is sized from `biggest_chunk_len` so no body
    /// entry forces a reallocation mid-copy.
    pub fn repack(
        body_path: impl AsRef<Path>,
        output_path: impl AsRef<Path>,
        header: &FileHeader,
        biggest_chunk_len: usize,
    ) -> Result<()> {
        let body_decoder = GzDecoder::new(File::open(body_path)?);
        let mut body_archive = tar::Archive::new(body_decoder);

        let output_encoder = GzEncoder::new(File::create(output_path)?, Compression::default());
        let mut builder = Builder::new(output_encoder);

        chunk_encoder::append_entry(&mut builder, "content.msgpack", header)?;

        let mut buffer = Vec::with_capacity(biggest_chunk_len.max(MIN_BUFFER));
        for entry in body_archive.entries()? {
            let mut entry = entry?;
            let name = entry
                .path()?
                .to_str()
                .ok_or_else(|| CatchpointError::InvalidFile("non-utf8 entry name".to_string()))?
                .to_string();

            buffer.clear();
            entry.read_to_end(&mut buffer)?;

            let mut out_header = Header::new_gnu();
            out_header.set_path(&name)?;
            out_header.set_size(buffer.len() as u64);
            out_header.set_mode(0o644);
            out_header.set_cksum();
            builder.append(&out_header, buffer.as_slice())?;
        }

        let encoder = builder.into_inner()?;
        encoder.finish()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::writer::CatchpointWriter;
    use catchsync_common::account::AccountData;
    use catchsync_common::catchpoint::LedgerTotals;
    use catchsync_common::crypto::Address;

    #[test]
    fn content_msgpack_is_first_and_balances_follow() {
        let store = MemoryStore::new();
        store.seed_account(Address::new([1; 32]), AccountData::new(5, 0, 0, 0, 0), vec![]);

        let dir = tempdir::TempDir::new("repacker").unwrap();
        let body_path = dir.path().join("body.tar.gz");
        let final_path = dir.path().join("final.tar.gz");

        let mut writer = CatchpointWriter::create(&body_path, &store, 16_384).unwrap();
        writer.write_all().unwrap();
        let total_accounts = writer.total_accounts();
        let total_chunks = writer.total_chunks();
        let biggest_chunk_len = writer.biggest_chunk_len();
        writer.finish().unwrap();

        let header = FileHeader {
            version: catchsync_common::catchpoint::FileVersion::V7,
            balances_round: 1000,
            blocks_round: 1320,
            account_totals: LedgerTotals::default(),
            total_accounts,
            total_chunks,
            catchpoint_label: "1320#deadbeef".to_string(),
            block_header_digest: catchsync_common::crypto::hash(b"block"),
        };

        Repacker::repack(&body_path, &final_path, &header, biggest_chunk_len).unwrap();

        let gz = flate2::read::GzDecoder::new(File::open(&final_path).unwrap());
        let mut archive = tar::Archive::new(gz);
        let names: Vec<String> = archive
            .entries()
            .unwrap()
            .map(|e| e.unwrap().path().unwrap().to_str().unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["content.msgpack", "balances.1.msgpack"]);
    }
}
