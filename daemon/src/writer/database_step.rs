//! Reads the next batch of rows from the live account/resource/kv tables
//! in a stable order, grouping rows by account and honoring the
//! maximum-resources-per-chunk bound. A single `DatabaseStep` is
//! driven by `CatchpointWriter` one chunk at a time; it never buffers more
//! than one account's resources across calls.

use catchsync_common::{
    account::{AccountData, ResourceEntry},
    catchpoint::{BalanceRecord, Chunk, KVRecord},
    crypto::Address,
};

use crate::error::Result;
use crate::store::LiveStore;

struct PendingAccount<'a> {
    address: Address,
    account_data: AccountData,
    resources: Box<dyn Iterator<Item = Result<ResourceEntry>> + 'a>,
}

pub struct DatabaseStep<'a> {
    accounts: Box<dyn Iterator<Item = Result<(Address, AccountData)>> + 'a>,
    kvs: Box<dyn Iterator<Item = Result<KVRecord>> + 'a>,
    store: &'a dyn LiveStore,
    pending: Option<PendingAccount<'a>>,
    accounts_exhausted: bool,
}

impl<'a> DatabaseStep<'a> {
    pub fn new(store: &'a dyn LiveStore) -> Self {
        Self {
            accounts: store.account_cursor(),
            kvs: store.kv_cursor(),
            store,
            pending: None,
            accounts_exhausted: false,
        }
    }

    /// Pulls one chunk: balances up to `balances_per_chunk` distinct
    /// accounts (splitting the current account across chunks if its
    /// resources would push the chunk past `max_resources_per_chunk`), or,
    /// once the account cursor is exhausted, up to `kv_per_chunk` pure-KV
    /// records. Returns an empty chunk only when both sources are drained.
    pub fn next_chunk(
        &mut self,
        balances_per_chunk: usize,
        max_resources_per_chunk: usize,
        kv_per_chunk: usize,
    ) -> Result<Chunk> {
        if !self.accounts_exhausted {
            let chunk = self.next_balance_chunk(balances_per_chunk, max_resources_per_chunk)?;
            if !chunk.is_empty() {
                return Ok(chunk);
            }
        }
        self.next_kv_chunk(kv_per_chunk)
    }

    fn next_balance_chunk(
        &mut self,
        balances_per_chunk: usize,
        max_resources_per_chunk: usize,
    ) -> Result<Chunk> {
        let mut chunk = Chunk::default();
        let mut resource_budget = max_resources_per_chunk;

        loop {
            if self.pending.is_none() {
                match self.accounts.next() {
                    Some(row) => {
                        let (address, account_data) = row?;
                        self.pending = Some(PendingAccount {
                            address,
                            account_data,
                            resources: self.store.resource_cursor(address),
                        });
                    }
                    None => {
                        self.accounts_exhausted = true;
                        break;
                    }
                }
            }

            let pending = self.pending.as_mut().expect("checked above");
            let mut record = BalanceRecord::new(pending.address, pending.account_data.clone());
            let mut split = false;

            while resource_budget > 0 {
                match pending.resources.next() {
                    Some(row) => {
                        let resource = row?;
                        record.resources.insert(resource.creatable_index, resource);
                        resource_budget -= 1;
                    }
                    None => break,
                }
            }

            if resource_budget == 0 {
                // Overflow boundary: peek whether more resources remain for
                // this account without consuming one, so we don't flag a
                // split that has nothing left to continue.
                if let Some(next_row) = pending.resources.next() {
                    let next_row = next_row?;
                    record.expecting_more_entries = true;
                    split = true;
                    // Stash the peeked resource back onto the front of the
                    // cursor for the next call by wrapping it in a chain.
                    let rest = std::mem::replace(&mut pending.resources, Box::new(std::iter::empty()));
                    pending.resources = Box::new(std::iter::once(Ok(next_row)).chain(rest));
                }
            }

            if split {
                chunk.balances.push(record);
                // Keep `pending` (same address) for the next chunk.
                break;
            } else {
                chunk.balances.push(record);
                self.pending = None;
            }

            if chunk.balances.len() >= balances_per_chunk {
                break;
            }
        }

        Ok(chunk)
    }

    fn next_kv_chunk(&mut self, kv_per_chunk: usize) -> Result<Chunk> {
        let mut chunk = Chunk::default();
        for _ in 0..kv_per_chunk {
            match self.kvs.next() {
                Some(row) => chunk.kvs.push(row?),
                None => break,
            }
        }
        Ok(chunk)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use catchsync_common::account::{ResourceCapability, ResourceKind};

    fn addr(byte: u8) -> Address {
        Address::new([byte; 32])
    }

    #[test]
    fn single_account_no_overflow_yields_one_balance_then_stops() {
        let store = MemoryStore::new();
        store.seed_account(addr(1), AccountData::new(10, 0, 0, 0, 0), vec![]);

        let mut step = DatabaseStep::new(&store);
        let chunk = step.next_chunk(10, 100, 10).unwrap();
        assert_eq!(chunk.balances.len(), 1);
        assert!(chunk.kvs.is_empty());

        let chunk2 = step.next_chunk(10, 100, 10).unwrap();
        assert!(chunk2.is_empty());
    }

    #[test]
    fn overflow_splits_account_across_chunks() {
        let store = MemoryStore::new();
        let resources: Vec<_> = (0..20)
            .map(|i| ResourceEntry {
                creatable_index: i,
                kind: ResourceKind::Asset,
                capability: ResourceCapability::OWNING,
                data: vec![],
            })
            .collect();
        store.seed_account(addr(1), AccountData::new(0, 0, 0, 20, 0), resources);

        let mut step = DatabaseStep::new(&store);
        let mut total_resources = 0;
        let mut chunks = 0;
        loop {
            let chunk = step.next_chunk(10, 5, 10).unwrap();
            if chunk.is_empty() {
                break;
            }
            assert!(chunk.resource_count() <= 5);
            total_resources += chunk.resource_count();
            chunks += 1;
        }
        assert_eq!(total_resources, 20);
        assert!(chunks > 1);
    }

    #[test]
    fn kv_only_chunk_follows_once_balances_exhausted() {
        let store = MemoryStore::new();
        store.seed_account(addr(1), AccountData::new(0, 0, 0, 0, 0), vec![]);
        store.seed_kv(b"bx:1:k".to_vec(), b"v".to_vec());

        let mut step = DatabaseStep::new(&store);
        let balance_chunk = step.next_chunk(10, 100, 10).unwrap();
        assert_eq!(balance_chunk.balances.len(), 1);
        assert!(balance_chunk.kvs.is_empty());

        let kv_chunk = step.next_chunk(10, 100, 10).unwrap();
        assert!(kv_chunk.balances.is_empty());
        assert_eq!(kv_chunk.kvs.len(), 1);

        let done = step.next_chunk(10, 100, 10).unwrap();
        assert!(done.is_empty());
    }
}
