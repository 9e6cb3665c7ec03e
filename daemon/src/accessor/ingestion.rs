//! Balance ingestion state machine: validates the chunking
//! invariant and each account's declared resource totals before any
//! staging write is launched, then fans the chunk out across the four
//! staging writers.

use catchsync_common::{
    account::{AccountData, ResourceCapability, ResourceEntry},
    catchpoint::{Chunk, NormalizedBalance, ResourceCounter},
    crypto::{Address, Hash},
};

use crate::concurrency::{join_four, run_four_serial};
use crate::error::{CatchpointError, Result};
use crate::store::{AccountHashKey, CreatableRecord, StagingWriter};

use super::dispatcher::Progress;

/// Running validation state carried across chunk boundaries within one
/// catchup session.
#[derive(Default)]
pub struct BalanceIngestor {
    expecting_specific_account: bool,
    next_expected_account: Option<Address>,
    running_counter: ResourceCounter,
}

impl BalanceIngestor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validates every balance in `chunk` against the running counters,
    /// then writes the chunk to staging. On a shared-cache store the four
    /// writer tasks run serially; otherwise they run concurrently. Either
    /// way all four are awaited before returning, per the structured
    /// concurrency requirement.
    pub async fn ingest_chunk(
        &mut self,
        chunk: &Chunk,
        store: &(dyn StagingWriter + Sync),
        progress: &mut Progress,
        chunk_bytes_len: usize,
    ) -> Result<()> {
        let first_delivery = self.validate(chunk)?;

        let balances: Vec<(Address, AccountData, bool)> = chunk
            .balances
            .iter()
            .map(|b| (b.address, b.account_data.clone(), b.expecting_more_entries))
            .collect();

        let resources_by_address: Vec<(Address, Vec<ResourceEntry>)> = chunk
            .balances
            .iter()
            .map(|b| (b.address, b.resources.values().cloned().collect()))
            .collect();

        let creatables: Vec<CreatableRecord> = chunk
            .balances
            .iter()
            .flat_map(|b| {
                b.resources
                    .values()
                    .filter(|r| r.capability.contains(ResourceCapability::OWNING))
                    .map(move |r| CreatableRecord {
                        creatable_index: r.creatable_index,
                        owner: b.address,
                        kind: r.kind,
                    })
            })
            .collect();

        let mut hashes: Vec<(AccountHashKey, Hash)> = Vec::new();
        for (balance, is_first_delivery) in chunk.balances.iter().zip(first_delivery.iter()) {
            let normalized = NormalizedBalance::from_record(balance);
            // The base account hash only needs writing (and counting) once
            // per address - a resource-overflow continuation re-sends the
            // same address with the same `accountData`, which would
            // otherwise double the base hash into both staging and the
            // processed-hash counter for every split account.
            if *is_first_delivery {
                hashes.push((AccountHashKey::base(balance.address), normalized.account_hash()));
            }
            for (resource, hash) in normalized.resources.iter().zip(normalized.resource_hashes.iter()) {
                hashes.push((
                    AccountHashKey::resource(balance.address, resource.creatable_index),
                    *hash,
                ));
            }
        }
        progress.total_account_hashes += hashes.len() as u64;

        let kvs = chunk.kvs.clone();

        let balances_task = async {
            store.write_balances(&balances).await?;
            for (address, resources) in &resources_by_address {
                if !resources.is_empty() {
                    store.write_resources(*address, resources).await?;
                }
            }
            Ok(())
        };
        let creatables_task = async {
            if !creatables.is_empty() {
                store.write_creatables(&creatables).await?;
            }
            Ok(())
        };
        let hashes_task = store.write_hashes(&hashes);
        let kvs_task = async {
            if !kvs.is_empty() {
                store.write_kvs(&kvs).await?;
            }
            Ok(())
        };

        let result: std::result::Result<(), CatchpointError> = if store.is_shared() {
            run_four_serial(balances_task, creatables_task, hashes_task, kvs_task).await
        } else {
            join_four(balances_task, creatables_task, hashes_task, kvs_task).await
        };
        result?;

        progress.processed_bytes += chunk_bytes_len as u64;
        for balance in &chunk.balances {
            if !balance.expecting_more_entries {
                progress.processed_accounts += 1;
            }
        }

        Ok(())
    }

    /// Validates the chunking invariant and per-account resource totals,
    /// returning, for each balance in order, whether it is the *first*
    /// delivery of its address (as opposed to a resource-overflow
    /// continuation of a balance already seen in an earlier call) - the
    /// base account hash is only written and counted once per address, on
    /// that first delivery.
    fn validate(&mut self, chunk: &Chunk) -> Result<Vec<bool>> {
        let mut first_delivery = Vec::with_capacity(chunk.balances.len());
        for balance in &chunk.balances {
            first_delivery.push(!self.expecting_specific_account);

            if self.expecting_specific_account {
                let expected = self
                    .next_expected_account
                    .expect("expecting_specific_account implies an address is set");
                if balance.address != expected {
                    return Err(CatchpointError::InvariantViolation(format!(
                        "expected continuation of account {expected}, got {}",
                        balance.address
                    )));
                }
            }

            for resource in balance.resources.values() {
                self.running_counter.add(resource.kind, resource.capability);
            }

            if balance.expecting_more_entries {
                self.expecting_specific_account = true;
                self.next_expected_account = Some(balance.address);
            } else {
                if !self.running_counter.matches(&balance.account_data) {
                    return Err(CatchpointError::InvariantViolation(format!(
                        "resource totals mismatch for account {}: observed {:?}",
                        balance.address, self.running_counter
                    )));
                }
                self.running_counter.reset();
                self.expecting_specific_account = false;
                self.next_expected_account = None;
            }
        }
        Ok(first_delivery)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use catchsync_common::account::{ResourceKind};
    use catchsync_common::catchpoint::BalanceRecord;

    fn addr(byte: u8) -> Address {
        Address::new([byte; 32])
    }

    #[tokio::test]
    async fn accepts_well_formed_chunk_and_counts_accounts() {
        let store = MemoryStore::new();
        let mut ingestor = BalanceIngestor::new();
        let mut progress = Progress::default();

        let mut chunk = Chunk::default();
        chunk
            .balances
            .push(BalanceRecord::new(addr(1), AccountData::new(10, 0, 0, 0, 0)));

        ingestor
            .ingest_chunk(&chunk, &store, &mut progress, 128)
            .await
            .unwrap();

        assert_eq!(progress.processed_accounts, 1);
        assert_eq!(progress.processed_bytes, 128);
        assert_eq!(store.account_rows().len(), 1);
    }

    #[tokio::test]
    async fn rejects_mismatched_resource_totals() {
        let store = MemoryStore::new();
        let mut ingestor = BalanceIngestor::new();
        let mut progress = Progress::default();

        let mut chunk = Chunk::default();
        let mut record = BalanceRecord::new(addr(1), AccountData::new(0, 1, 0, 0, 0));
        record.resources.insert(
            1,
            ResourceEntry {
                creatable_index: 1,
                kind: ResourceKind::Asset,
                capability: ResourceCapability::HOLDING,
                data: vec![],
            },
        );
        chunk.balances.push(record);

        let err = ingestor
            .ingest_chunk(&chunk, &store, &mut progress, 64)
            .await
            .unwrap_err();
        assert!(matches!(err, CatchpointError::InvariantViolation(_)));
    }

    #[tokio::test]
    async fn rejects_continuation_to_wrong_address() {
        let store = MemoryStore::new();
        let mut ingestor = BalanceIngestor::new();
        let mut progress = Progress::default();

        let mut first = Chunk::default();
        let mut record = BalanceRecord::new(addr(1), AccountData::new(0, 1, 0, 0, 0));
        record.expecting_more_entries = true;
        first.balances.push(record);
        ingestor.ingest_chunk(&first, &store, &mut progress, 10).await.unwrap();

        let mut second = Chunk::default();
        second
            .balances
            .push(BalanceRecord::new(addr(2), AccountData::default()));

        let err = ingestor
            .ingest_chunk(&second, &store, &mut progress, 10)
            .await
            .unwrap_err();
        assert!(matches!(err, CatchpointError::InvariantViolation(_)));
    }

    #[tokio::test]
    async fn overflow_continuation_counts_the_base_hash_once() {
        let store = MemoryStore::new();
        let mut ingestor = BalanceIngestor::new();
        let mut progress = Progress::default();

        let mut first = Chunk::default();
        let mut opening = BalanceRecord::new(addr(1), AccountData::new(0, 0, 0, 2, 0));
        opening.resources.insert(
            1,
            ResourceEntry {
                creatable_index: 1,
                kind: ResourceKind::Asset,
                capability: ResourceCapability::OWNING,
                data: vec![],
            },
        );
        opening.expecting_more_entries = true;
        first.balances.push(opening);
        ingestor.ingest_chunk(&first, &store, &mut progress, 10).await.unwrap();
        // Only the one resource hash from the opening chunk so far - no
        // base account hash yet, the delivery isn't complete.
        assert_eq!(progress.total_account_hashes, 1);

        let mut second = Chunk::default();
        let mut closing = BalanceRecord::new(addr(1), AccountData::new(0, 0, 0, 2, 0));
        closing.resources.insert(
            2,
            ResourceEntry {
                creatable_index: 2,
                kind: ResourceKind::Asset,
                capability: ResourceCapability::OWNING,
                data: vec![],
            },
        );
        second.balances.push(closing);
        ingestor.ingest_chunk(&second, &store, &mut progress, 10).await.unwrap();

        // Second resource hash plus exactly one base account hash, not two.
        assert_eq!(progress.total_account_hashes, 1 + 2);
    }
}
