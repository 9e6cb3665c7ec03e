//! Merkle trie rebuild: a reader task pages
//! through the staged per-account-hash table in fixed-size batches and a
//! writer task inserts each hash into the trie, periodically evicting to
//! bound memory. The two are connected by a bounded channel so the reader
//! never outruns the writer by more than a few batches.

use catchsync_common::config::{TRIE_REBUILD_CHUNK, TRIE_REBUILD_COMMIT_FREQ};
use catchsync_common::crypto::{merkle_root, Hash};

use crate::concurrency::CancellationToken;
use crate::error::{CatchpointError, Result};
use crate::store::{AccountHashKey, StagingReader, TrieStore};

/// Depth of the reader -> writer batch channel. Small on purpose: the
/// reader's job is to keep the writer fed, not to buffer the whole table.
const CHANNEL_DEPTH: usize = 4;

pub struct TrieBuilder<'a> {
    reader_store: &'a (dyn StagingReader + Sync),
    trie: &'a (dyn TrieStore + Sync),
}

impl<'a> TrieBuilder<'a> {
    pub fn new(reader_store: &'a (dyn StagingReader + Sync), trie: &'a (dyn TrieStore + Sync)) -> Self {
        Self { reader_store, trie }
    }

    /// Drains every staged hash into the trie, then returns the Merkle
    /// root over the fully-rebuilt leaf set (P7). Honors `cancel` at every
    /// batch boundary on both sides of the pipeline.
    pub async fn build(&self, cancel: &CancellationToken) -> Result<Hash> {
        let (tx, mut rx) = tokio::sync::mpsc::channel::<Vec<(AccountHashKey, Hash)>>(CHANNEL_DEPTH);

        let reader = {
            let cancel = cancel.clone();
            let store = self.reader_store;
            async move {
                let mut after: Option<AccountHashKey> = None;
                loop {
                    cancel.check()?;
                    let batch = store.hash_batch(after, TRIE_REBUILD_CHUNK).await?;
                    if batch.is_empty() {
                        break;
                    }
                    after = batch.last().map(|(key, _)| *key);
                    if tx.send(batch).await.is_err() {
                        // Writer side dropped its receiver - it already hit
                        // an error and is unwinding, nothing left to do here.
                        break;
                    }
                }
                Ok::<(), CatchpointError>(())
            }
        };

        let writer = async {
            let mut since_eviction = 0usize;
            while let Some(batch) = rx.recv().await {
                cancel.check()?;
                for (_, leaf) in batch {
                    if self.trie.contains(&leaf).await? {
                        return Err(CatchpointError::InvariantViolation(format!(
                            "duplicate account hash {leaf} in catchpoint - same account committed twice"
                        )));
                    }
                    self.trie.insert(&leaf).await?;
                    since_eviction += 1;
                    if since_eviction >= TRIE_REBUILD_COMMIT_FREQ {
                        self.trie.evict().await?;
                        since_eviction = 0;
                    }
                }
            }
            self.trie.evict().await?;
            Ok::<(), CatchpointError>(())
        };

        let (reader_result, writer_result) = tokio::join!(reader, writer);
        // Both sides are always joined before an error surfaces, mirroring
        // the four-way chunk fan-out's structured-concurrency contract.
        writer_result?;
        reader_result?;

        let leaves = self.trie.iter_sorted().await?;
        Ok(merkle_root(&leaves))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, StagingWriter};
    use catchsync_common::crypto::hash;

    #[tokio::test]
    async fn builds_the_same_root_regardless_of_staged_insertion_order() {
        let forward = MemoryStore::new();
        let backward = MemoryStore::new();

        let hashes: Vec<Hash> = (0..50u8).map(|i| hash(&[i])).collect();
        for (i, h) in hashes.iter().enumerate() {
            forward
                .write_hashes(&[(AccountHashKey::base(addr(i as u8)), *h)])
                .await
                .unwrap();
        }
        for (i, h) in hashes.iter().enumerate().rev() {
            backward
                .write_hashes(&[(AccountHashKey::base(addr(i as u8)), *h)])
                .await
                .unwrap();
        }

        let cancel = CancellationToken::new();
        let forward_root = TrieBuilder::new(&forward, &forward).build(&cancel).await.unwrap();
        let backward_root = TrieBuilder::new(&backward, &backward).build(&cancel).await.unwrap();
        assert_eq!(forward_root, backward_root);
    }

    #[tokio::test]
    async fn duplicate_hash_is_a_fatal_invariant_violation() {
        let store = MemoryStore::new();
        let h = hash(b"repeated-account");
        store
            .write_hashes(&[
                (AccountHashKey::base(addr(1)), h),
                (AccountHashKey::base(addr(2)), h),
            ])
            .await
            .unwrap();

        let cancel = CancellationToken::new();
        let err = TrieBuilder::new(&store, &store).build(&cancel).await.unwrap_err();
        assert!(matches!(err, CatchpointError::InvariantViolation(_)));
    }

    #[tokio::test]
    async fn cancellation_is_observed_before_any_insertion_completes() {
        let store = MemoryStore::new();
        store
            .write_hashes(&[(AccountHashKey::base(addr(1)), hash(b"a"))])
            .await
            .unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = TrieBuilder::new(&store, &store).build(&cancel).await.unwrap_err();
        assert!(matches!(err, CatchpointError::Cancelled));
    }

    fn addr(byte: u8) -> catchsync_common::crypto::Address {
        catchsync_common::crypto::Address::new([byte; 32])
    }
}
