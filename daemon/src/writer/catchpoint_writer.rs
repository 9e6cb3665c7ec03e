//! Orchestrates the writer side: state-proof verification section first,
//! then repeated `DatabaseStep` -> TAR entries until the live tables
//! are exhausted, tracking the counters the repacker needs to prepend a
//! header.

use std::fs::File;
use std::path::Path;

use catchsync_common::catchpoint::{Chunk, StateProofVerificationContext, StateProofVerificationSection};
use catchsync_common::config::{BALANCES_PER_CHUNK, KV_PER_CHUNK_TARGET};
use flate2::write::GzEncoder;
use flate2::Compression;
use tar::Builder;

use crate::error::Result;
use crate::store::LiveStore;
use crate::writer::chunk_encoder;
use crate::writer::database_step::DatabaseStep;

/// Names the body entries emit in order: `content.msgpack` is added later by
/// the `Repacker`, not here - the writer never knows its own totals until
/// the database iterator is exhausted.
const STATE_PROOF_ENTRY: &str = "stateProofVerificationData.msgpack";

pub struct CatchpointWriter<'a> {
    step: DatabaseStep<'a>,
    builder: Builder<GzEncoder<File>>,
    max_resources_per_chunk: usize,
    chunk_index: u64,
    total_accounts: u64,
    total_chunks: u64,
    biggest_chunk_len: usize,
    finished: bool,
}

impl<'a> CatchpointWriter<'a> {
    pub fn create(
        path: impl AsRef<Path>,
        store: &'a dyn LiveStore,
        max_resources_per_chunk: usize,
    ) -> Result<Self> {
        let file = File::create(path)?;
        let encoder = GzEncoder::new(file, Compression::default());
        let builder = Builder::new(encoder);
        Ok(Self {
            step: DatabaseStep::new(store),
            builder,
            max_resources_per_chunk,
            chunk_index: 0,
            total_accounts: 0,
            total_chunks: 0,
            biggest_chunk_len: 0,
            finished: false,
        })
    }

    /// Emits the single `stateProofVerificationData.msgpack` entry. Must be
    /// called at most once, before any `write_step` call, mirroring the
    /// fixed section order a catchpoint file requires of its body.
    pub fn write_state_proof_verification_section(
        &mut self,
        contexts: &[StateProofVerificationContext],
    ) -> Result<()> {
        let section = StateProofVerificationSection(contexts.to_vec());
        chunk_encoder::append_entry(&mut self.builder, STATE_PROOF_ENTRY, &section)
    }

    /// Advances one chunk. Returns `Ok(false)` once the database iterator is
    /// exhausted and the final chunk has already been flushed; every prior
    /// call emits exactly one TAR entry.
    pub fn write_step(&mut self) -> Result<bool> {
        if self.finished {
            return Ok(false);
        }

        let chunk: Chunk = self.step.next_chunk(
            BALANCES_PER_CHUNK,
            self.max_resources_per_chunk,
            KV_PER_CHUNK_TARGET,
        )?;

        if chunk.is_empty() {
            self.finished = true;
            return Ok(false);
        }

        self.total_accounts += chunk
            .balances
            .iter()
            .filter(|b| !b.expecting_more_entries)
            .count() as u64;

        self.chunk_index += 1;
        let name = format!("balances.{}.msgpack", self.chunk_index);
        let chunk_len = chunk.size();
        chunk_encoder::append_entry(&mut self.builder, &name, &chunk)?;

        self.total_chunks += 1;
        self.biggest_chunk_len = self.biggest_chunk_len.max(chunk_len);
        Ok(true)
    }

    /// Drives `write_step` to completion.
    pub fn write_all(&mut self) -> Result<()> {
        while self.write_step()? {}
        Ok(())
    }

    pub fn total_accounts(&self) -> u64 {
        self.total_accounts
    }

    pub fn total_chunks(&self) -> u64 {
        self.total_chunks
    }

    pub fn biggest_chunk_len(&self) -> usize {
        self.biggest_chunk_len
    }

    /// Flushes the TAR trailer and the gzip stream. The body file at `path`
    /// is not yet the final catchpoint file - `Repacker` still needs to
    /// prepend `content.msgpack`.
    pub fn finish(self) -> Result<()> {
        let encoder = self.builder.into_inner()?;
        encoder.finish()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use catchsync_common::account::AccountData;
    use catchsync_common::crypto::Address;
    use flate2::read::GzDecoder;

    fn addr(byte: u8) -> Address {
        Address::new([byte; 32])
    }

    #[test]
    fn writes_one_chunk_for_small_account_set() {
        let store = MemoryStore::new();
        for i in 0..10u8 {
            store.seed_account(addr(i), AccountData::new(i as u64, 0, 0, 0, 0), vec![]);
        }

        let dir = tempdir::TempDir::new("catchpoint-writer").unwrap();
        let path = dir.path().join("body.tar.gz");

        let mut writer = CatchpointWriter::create(&path, &store, 16_384).unwrap();
        writer.write_all().unwrap();
        assert_eq!(writer.total_chunks(), 1);
        assert_eq!(writer.total_accounts(), 10);
        writer.finish().unwrap();

        let file = File::open(&path).unwrap();
        let gz = GzDecoder::new(file);
        let mut archive = tar::Archive::new(gz);
        let names: Vec<String> = archive
            .entries()
            .unwrap()
            .map(|e| e.unwrap().path().unwrap().to_str().unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["balances.1.msgpack"]);
    }
}
