//! In-memory test double implementing every storage trait. No RocksDB file
//! needed to exercise the writer, the accessor, or the trie rebuild.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use catchsync_common::{
    account::{AccountData, ResourceEntry},
    catchpoint::KVRecord,
    crypto::{Address, Hash},
};

use crate::error::{CatchpointError, Result};
use crate::store::{
    AccountHashKey, BlockSource, CreatableRecord, LiveStore, StagingLifecycle, StagingReader,
    StagingWriter, StateStore, TrieStore,
};

/// Backs both the "live" source tables a writer reads from, and the
/// "staging" tables an accessor writes into. A single type plays both
/// roles in tests: construct one with live data for the writer, and a
/// fresh one for the accessor under test.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryTables>,
}

#[derive(Default)]
struct MemoryTables {
    accounts: BTreeMap<Address, AccountData>,
    resources: BTreeMap<(Address, u64), ResourceEntry>,
    kvs: BTreeMap<Vec<u8>, Vec<u8>>,
    creatables: BTreeMap<u64, CreatableRecord>,
    hashes: BTreeMap<AccountHashKey, Hash>,
    partial: std::collections::HashSet<Address>,
    state_u64: BTreeMap<String, u64>,
    state_string: BTreeMap<String, String>,
    trie_leaves: std::collections::BTreeSet<Hash>,
    blocks: BTreeMap<u64, Hash>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a live account and its resources for the writer side.
    pub fn seed_account(&self, address: Address, account_data: AccountData, resources: Vec<ResourceEntry>) {
        let mut tables = self.inner.lock().unwrap();
        tables.accounts.insert(address, account_data);
        for resource in resources {
            tables.resources.insert((address, resource.creatable_index), resource);
        }
    }

    pub fn seed_kv(&self, key: Vec<u8>, value: Vec<u8>) {
        self.inner.lock().unwrap().kvs.insert(key, value);
    }

    /// Seed a locally-known block digest for the label verifier's
    /// round/digest check.
    pub fn seed_block(&self, round: u64, digest: Hash) {
        self.inner.lock().unwrap().blocks.insert(round, digest);
    }

    pub fn resource_count(&self) -> usize {
        self.inner.lock().unwrap().resources.len()
    }

    pub fn account_rows(&self) -> Vec<(Address, AccountData)> {
        self.inner
            .lock()
            .unwrap()
            .accounts
            .iter()
            .map(|(a, d)| (*a, d.clone()))
            .collect()
    }
}

impl LiveStore for MemoryStore {
    fn account_cursor<'a>(&'a self) -> Box<dyn Iterator<Item = Result<(Address, AccountData)>> + 'a> {
        let rows: Vec<_> = self
            .inner
            .lock()
            .unwrap()
            .accounts
            .iter()
            .map(|(a, d)| Ok((*a, d.clone())))
            .collect();
        Box::new(rows.into_iter())
    }

    fn resource_cursor<'a>(
        &'a self,
        address: Address,
    ) -> Box<dyn Iterator<Item = Result<ResourceEntry>> + 'a> {
        let rows: Vec<_> = self
            .inner
            .lock()
            .unwrap()
            .resources
            .range((address, 0)..(address, u64::MAX))
            .map(|(_, r)| Ok(r.clone()))
            .collect();
        Box::new(rows.into_iter())
    }

    fn kv_cursor<'a>(&'a self) -> Box<dyn Iterator<Item = Result<KVRecord>> + 'a> {
        let rows: Vec<_> = self
            .inner
            .lock()
            .unwrap()
            .kvs
            .iter()
            .map(|(k, v)| KVRecord::new(k.clone(), v.clone()).map_err(CatchpointError::from))
            .collect();
        Box::new(rows.into_iter())
    }
}

#[async_trait]
impl StagingWriter for MemoryStore {
    async fn write_balances(&self, balances: &[(Address, AccountData, bool)]) -> Result<()> {
        let mut tables = self.inner.lock().unwrap();
        for (address, data, partial) in balances {
            tables.accounts.insert(*address, data.clone());
            if *partial {
                tables.partial.insert(*address);
            } else {
                tables.partial.remove(address);
            }
        }
        Ok(())
    }

    async fn write_creatables(&self, creatables: &[CreatableRecord]) -> Result<()> {
        let mut tables = self.inner.lock().unwrap();
        for c in creatables {
            tables.creatables.insert(c.creatable_index, *c);
        }
        Ok(())
    }

    async fn write_hashes(&self, hashes: &[(AccountHashKey, Hash)]) -> Result<()> {
        let mut tables = self.inner.lock().unwrap();
        for (key, hash) in hashes {
            tables.hashes.insert(*key, *hash);
        }
        Ok(())
    }

    async fn write_kvs(&self, kvs: &[KVRecord]) -> Result<()> {
        let mut tables = self.inner.lock().unwrap();
        for kv in kvs {
            tables.kvs.insert(kv.key.clone(), kv.value.clone());
        }
        Ok(())
    }

    async fn write_resources(&self, address: Address, resources: &[ResourceEntry]) -> Result<()> {
        let mut tables = self.inner.lock().unwrap();
        for resource in resources {
            tables.resources.insert((address, resource.creatable_index), resource.clone());
        }
        Ok(())
    }

    fn is_shared(&self) -> bool {
        // The in-memory double is a single mutex-guarded table set - the
        // closest real-world analogue is a shared-cache backend, so tests
        // exercise the serialized fan-out path by default.
        true
    }
}

#[async_trait]
impl StagingReader for MemoryStore {
    async fn hash_batch(
        &self,
        after: Option<AccountHashKey>,
        limit: usize,
    ) -> Result<Vec<(AccountHashKey, Hash)>> {
        let tables = self.inner.lock().unwrap();
        let iter = match after {
            Some(cursor) => itertools::Either::Left(
                tables.hashes.range((
                    std::ops::Bound::Excluded(cursor),
                    std::ops::Bound::Unbounded,
                )),
            ),
            None => itertools::Either::Right(tables.hashes.range(..)),
        };
        Ok(iter.take(limit).map(|(k, v)| (*k, *v)).collect())
    }

    async fn account_count(&self) -> Result<u64> {
        Ok(self.inner.lock().unwrap().accounts.len() as u64)
    }

    async fn lookup_account(
        &self,
        address: &Address,
    ) -> Result<Option<(AccountData, Vec<ResourceEntry>)>> {
        let tables = self.inner.lock().unwrap();
        let Some(data) = tables.accounts.get(address) else {
            return Ok(None);
        };
        let resources = tables
            .resources
            .range((*address, 0)..(*address, u64::MAX))
            .map(|(_, r)| r.clone())
            .collect();
        Ok(Some((data.clone(), resources)))
    }

    async fn kv_by_prefix(&self, prefix: &[u8], limit: usize) -> Result<Vec<KVRecord>> {
        let tables = self.inner.lock().unwrap();
        Ok(tables
            .kvs
            .range(prefix.to_vec()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .take(limit)
            .map(|(k, v)| KVRecord {
                key: k.clone(),
                value: v.clone(),
            })
            .collect())
    }
}

#[async_trait]
impl StagingLifecycle for MemoryStore {
    async fn reset_staging_balances(&self, _new_catchup: bool) -> Result<()> {
        let mut tables = self.inner.lock().unwrap();
        *tables = MemoryTables::default();
        Ok(())
    }

    async fn complete_catchup(&self, _balances_round: u64) -> Result<u64> {
        Ok(self.inner.lock().unwrap().accounts.len() as u64)
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn get_u64(&self, key: &str) -> Result<Option<u64>> {
        Ok(self.inner.lock().unwrap().state_u64.get(key).copied())
    }

    async fn set_u64(&self, key: &str, value: u64) -> Result<()> {
        self.inner.lock().unwrap().state_u64.insert(key.to_string(), value);
        Ok(())
    }

    async fn get_string(&self, key: &str) -> Result<Option<String>> {
        Ok(self.inner.lock().unwrap().state_string.get(key).cloned())
    }

    async fn set_string(&self, key: &str, value: &str) -> Result<()> {
        self.inner
            .lock()
            .unwrap()
            .state_string
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn clear(&self, key: &str) -> Result<()> {
        let mut tables = self.inner.lock().unwrap();
        tables.state_u64.remove(key);
        tables.state_string.remove(key);
        Ok(())
    }
}

#[async_trait]
impl BlockSource for MemoryStore {
    async fn block_digest(&self, round: u64) -> Result<Option<Hash>> {
        Ok(self.inner.lock().unwrap().blocks.get(&round).copied())
    }
}

#[async_trait]
impl TrieStore for MemoryStore {
    async fn contains(&self, leaf: &Hash) -> Result<bool> {
        Ok(self.inner.lock().unwrap().trie_leaves.contains(leaf))
    }

    async fn insert(&self, leaf: &Hash) -> Result<()> {
        self.inner.lock().unwrap().trie_leaves.insert(*leaf);
        Ok(())
    }

    async fn evict(&self) -> Result<()> {
        // Nothing to flush for an in-memory map; kept for interface parity.
        Ok(())
    }

    async fn iter_sorted(&self) -> Result<Vec<Hash>> {
        Ok(self.inner.lock().unwrap().trie_leaves.iter().copied().collect())
    }

    async fn clear(&self) -> Result<()> {
        self.inner.lock().unwrap().trie_leaves.clear();
        Ok(())
    }
}
