//! RocksDB-backed storage: the operational implementation of every trait
//! in `store::mod`. Column families play the role separate relational
//! tables would; a single `DBWithThreadMode<MultiThreaded>` handle backs
//! live tables, staging tables, the trie leaf set, and the small
//! persistent-state table together; catchpoint sessions never see more
//! than one of these open at a time.

use std::ops::Bound;
use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use catchsync_common::{
    account::{AccountData, ResourceEntry},
    catchpoint::KVRecord,
    crypto::{Address, Hash},
    serializer::Serializer,
};
use itertools::Either;
use rocksdb::{
    ColumnFamilyDescriptor, DBWithThreadMode, IteratorMode, MultiThreaded, Options, WriteBatch,
};
use strum::{AsRefStr, EnumIter, IntoEnumIterator};

use crate::error::{CatchpointError, Result};
use crate::store::{
    AccountHashKey, BlockSource, CreatableRecord, LiveStore, StagingLifecycle, StagingReader,
    StagingWriter, StateStore, TrieStore,
};

type InnerDB = DBWithThreadMode<MultiThreaded>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum Column {
    LiveAccounts,
    LiveResources,
    LiveKv,
    StagingAccounts,
    StagingResources,
    StagingCreatables,
    StagingHashes,
    StagingKv,
    StagingPartial,
    TrieLeaves,
    CatchpointState,
    Blocks,
}

macro_rules! cf_handle {
    ($db:expr, $column:expr) => {
        $db.cf_handle($column.as_ref())
            .ok_or_else(|| CatchpointError::TransientStorage(format!("missing column {:?}", $column)))?
    };
}

pub struct RocksStore {
    db: InnerDB,
    /// Buffered trie-leaf writes since the last `evict()`, bounding memory
    /// the same way the design's "persist and clear" eviction describes.
    pending_trie_writes: Mutex<WriteBatch>,
    /// Mirrors the keys in `pending_trie_writes` so `contains` can see an
    /// insert that hasn't been flushed to RocksDB yet - otherwise two
    /// duplicate hashes landing in the same uncommitted batch would slip
    /// past duplicate detection.
    pending_trie_keys: Mutex<std::collections::HashSet<Hash>>,
}

impl RocksStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);
        db_opts.increase_parallelism(num_cpus::get() as i32);

        let descriptors: Vec<ColumnFamilyDescriptor> = Column::iter()
            .map(|c| ColumnFamilyDescriptor::new(c.as_ref(), Options::default()))
            .collect();

        let db = InnerDB::open_cf_descriptors(&db_opts, path, descriptors)
            .map_err(|e| CatchpointError::TransientStorage(e.to_string()))?;

        Ok(Self {
            db,
            pending_trie_writes: Mutex::new(WriteBatch::default()),
            pending_trie_keys: Mutex::new(std::collections::HashSet::new()),
        })
    }

    fn put(&self, column: Column, key: &[u8], value: &[u8]) -> Result<()> {
        let cf = cf_handle!(self.db, column);
        self.db
            .put_cf(&cf, key, value)
            .map_err(|e| CatchpointError::TransientStorage(e.to_string()))
    }

    fn get(&self, column: Column, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let cf = cf_handle!(self.db, column);
        self.db
            .get_cf(&cf, key)
            .map_err(|e| CatchpointError::TransientStorage(e.to_string()))
    }

    fn delete(&self, column: Column, key: &[u8]) -> Result<()> {
        let cf = cf_handle!(self.db, column);
        self.db
            .delete_cf(&cf, key)
            .map_err(|e| CatchpointError::TransientStorage(e.to_string()))
    }

    fn put_value<V: Serializer>(&self, column: Column, key: &[u8], value: &V) -> Result<()> {
        self.put(column, key, &value.to_bytes())
    }

    fn get_value<V: Serializer>(&self, column: Column, key: &[u8]) -> Result<Option<V>> {
        match self.get(column, key)? {
            Some(bytes) => Ok(Some(V::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Seeds a live account and its resources. The writer's source tables
    /// are populated by ordinary ledger operation in a real node (out of
    /// scope here); this exists so integration tests can exercise the
    /// RocksDB backend end to end without a full blockchain stack.
    pub fn seed_live_account(
        &self,
        address: Address,
        account_data: &AccountData,
        resources: &[ResourceEntry],
    ) -> Result<()> {
        self.put_value(Column::LiveAccounts, address.as_bytes(), account_data)?;
        for resource in resources {
            self.put_value(
                Column::LiveResources,
                &resource_key(address, resource.creatable_index),
                resource,
            )?;
        }
        Ok(())
    }

    pub fn seed_live_kv(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.put(Column::LiveKv, key, value)
    }

    /// Seed a locally-known block digest for the label verifier's
    /// round/digest check, mirroring `MemoryStore::seed_block`.
    pub fn seed_block(&self, round: u64, digest: &Hash) -> Result<()> {
        self.put(Column::Blocks, &round.to_be_bytes(), digest.as_bytes())
    }

    fn clear_column(&self, column: Column) -> Result<()> {
        let cf = cf_handle!(self.db, column);
        let keys: Vec<Vec<u8>> = self
            .db
            .iterator_cf(&cf, IteratorMode::Start)
            .filter_map(|r| r.ok())
            .map(|(k, _)| k.to_vec())
            .collect();
        for key in keys {
            self.db
                .delete_cf(&cf, key)
                .map_err(|e| CatchpointError::TransientStorage(e.to_string()))?;
        }
        Ok(())
    }
}

fn resource_key(address: Address, creatable_index: u64) -> Vec<u8> {
    let mut key = Vec::with_capacity(40);
    key.extend_from_slice(address.as_bytes());
    key.extend_from_slice(&creatable_index.to_be_bytes());
    key
}

impl LiveStore for RocksStore {
    fn account_cursor<'a>(&'a self) -> Box<dyn Iterator<Item = Result<(Address, AccountData)>> + 'a> {
        let cf = match self.db.cf_handle(Column::LiveAccounts.as_ref()) {
            Some(cf) => cf,
            None => return Box::new(std::iter::empty()),
        };
        Box::new(self.db.iterator_cf(&cf, IteratorMode::Start).map(|row| {
            let (key, value) = row.map_err(|e| CatchpointError::TransientStorage(e.to_string()))?;
            let address = Address::from_bytes(&key)?;
            let account_data = AccountData::from_bytes(&value)?;
            Ok((address, account_data))
        }))
    }

    fn resource_cursor<'a>(
        &'a self,
        address: Address,
    ) -> Box<dyn Iterator<Item = Result<ResourceEntry>> + 'a> {
        let cf = match self.db.cf_handle(Column::LiveResources.as_ref()) {
            Some(cf) => cf,
            None => return Box::new(std::iter::empty()),
        };
        let prefix = address.as_bytes().to_vec();
        let prefix_for_filter = prefix.clone();
        Box::new(
            self.db
                .iterator_cf(&cf, IteratorMode::From(&prefix, rocksdb::Direction::Forward))
                .take_while(move |row| {
                    row.as_ref()
                        .map(|(k, _)| k.starts_with(&prefix_for_filter))
                        .unwrap_or(true)
                })
                .map(|row| {
                    let (_, value) =
                        row.map_err(|e| CatchpointError::TransientStorage(e.to_string()))?;
                    Ok(ResourceEntry::from_bytes(&value)?)
                }),
        )
    }

    fn kv_cursor<'a>(&'a self) -> Box<dyn Iterator<Item = Result<KVRecord>> + 'a> {
        let cf = match self.db.cf_handle(Column::LiveKv.as_ref()) {
            Some(cf) => cf,
            None => return Box::new(std::iter::empty()),
        };
        Box::new(self.db.iterator_cf(&cf, IteratorMode::Start).map(|row| {
            let (key, value) = row.map_err(|e| CatchpointError::TransientStorage(e.to_string()))?;
            Ok(KVRecord {
                key: key.to_vec(),
                value: value.to_vec(),
            })
        }))
    }
}

#[async_trait]
impl StagingWriter for RocksStore {
    async fn write_balances(&self, balances: &[(Address, AccountData, bool)]) -> Result<()> {
        for (address, data, partial) in balances {
            self.put_value(Column::StagingAccounts, address.as_bytes(), data)?;
            if *partial {
                self.put(Column::StagingPartial, address.as_bytes(), &[1])?;
            } else {
                self.delete(Column::StagingPartial, address.as_bytes())?;
            }
        }
        Ok(())
    }

    async fn write_creatables(&self, creatables: &[CreatableRecord]) -> Result<()> {
        for c in creatables {
            let mut value = Vec::with_capacity(33);
            value.extend_from_slice(c.owner.as_bytes());
            value.push(match c.kind {
                catchsync_common::account::ResourceKind::App => 0,
                catchsync_common::account::ResourceKind::Asset => 1,
            });
            self.put(
                Column::StagingCreatables,
                &c.creatable_index.to_be_bytes(),
                &value,
            )?;
        }
        Ok(())
    }

    async fn write_hashes(&self, hashes: &[(AccountHashKey, Hash)]) -> Result<()> {
        for (key, hash) in hashes {
            self.put(Column::StagingHashes, &key.to_key_bytes(), hash.as_bytes())?;
        }
        Ok(())
    }

    async fn write_kvs(&self, kvs: &[KVRecord]) -> Result<()> {
        for kv in kvs {
            self.put(Column::StagingKv, &kv.key, &kv.value)?;
        }
        Ok(())
    }

    async fn write_resources(&self, address: Address, resources: &[ResourceEntry]) -> Result<()> {
        for resource in resources {
            self.put_value(
                Column::StagingResources,
                &resource_key(address, resource.creatable_index),
                resource,
            )?;
        }
        Ok(())
    }

    fn is_shared(&self) -> bool {
        // One RocksDB instance backs every staging column family: all four
        // writers ultimately serialize on the same memtable/WAL, so this
        // backend always reports a shared cache.
        true
    }
}

#[async_trait]
impl StagingReader for RocksStore {
    async fn hash_batch(
        &self,
        after: Option<AccountHashKey>,
        limit: usize,
    ) -> Result<Vec<(AccountHashKey, Hash)>> {
        let cf = cf_handle!(self.db, Column::StagingHashes);
        let start_key = after.map(|k| k.to_key_bytes());
        let iter = match &start_key {
            Some(key) => Either::Left(
                self.db
                    .iterator_cf(&cf, IteratorMode::From(key, rocksdb::Direction::Forward))
                    .skip(1),
            ),
            None => Either::Right(self.db.iterator_cf(&cf, IteratorMode::Start)),
        };

        let mut out = Vec::with_capacity(limit);
        for row in iter.take(limit) {
            let (key, value) = row.map_err(|e| CatchpointError::TransientStorage(e.to_string()))?;
            let address = Address::from_bytes(&key[0..32])?;
            let tag = key[32];
            let idx = u64::from_be_bytes(key[33..41].try_into().unwrap());
            let hash_key = if tag == 0 {
                AccountHashKey::base(address)
            } else {
                AccountHashKey::resource(address, idx)
            };
            let hash_bytes: [u8; 32] = value[..].try_into().map_err(|_| {
                CatchpointError::InvariantViolation("corrupt staged hash row".to_string())
            })?;
            out.push((hash_key, Hash::new(hash_bytes)));
        }
        Ok(out)
    }

    async fn account_count(&self) -> Result<u64> {
        let cf = cf_handle!(self.db, Column::StagingAccounts);
        Ok(self.db.iterator_cf(&cf, IteratorMode::Start).count() as u64)
    }

    async fn lookup_account(
        &self,
        address: &Address,
    ) -> Result<Option<(AccountData, Vec<ResourceEntry>)>> {
        let Some(data) = self.get_value::<AccountData>(Column::StagingAccounts, address.as_bytes())?
        else {
            return Ok(None);
        };
        let cf = cf_handle!(self.db, Column::StagingResources);
        let prefix = address.as_bytes().to_vec();
        let resources = self
            .db
            .iterator_cf(&cf, IteratorMode::From(&prefix, rocksdb::Direction::Forward))
            .take_while(|row| row.as_ref().map(|(k, _)| k.starts_with(&prefix)).unwrap_or(true))
            .map(|row| {
                let (_, v) = row.map_err(|e| CatchpointError::TransientStorage(e.to_string()))?;
                ResourceEntry::from_bytes(&v).map_err(CatchpointError::from)
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Some((data, resources)))
    }

    async fn kv_by_prefix(&self, prefix: &[u8], limit: usize) -> Result<Vec<KVRecord>> {
        let cf = cf_handle!(self.db, Column::StagingKv);
        let prefix_owned = prefix.to_vec();
        let rows = self
            .db
            .iterator_cf(&cf, IteratorMode::From(prefix, rocksdb::Direction::Forward))
            .take_while(|row| {
                row.as_ref()
                    .map(|(k, _)| k.starts_with(&prefix_owned))
                    .unwrap_or(true)
            })
            .take(limit)
            .map(|row| {
                let (k, v) = row.map_err(|e| CatchpointError::TransientStorage(e.to_string()))?;
                Ok(KVRecord {
                    key: k.to_vec(),
                    value: v.to_vec(),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(rows)
    }
}

#[async_trait]
impl StagingLifecycle for RocksStore {
    async fn reset_staging_balances(&self, _new_catchup: bool) -> Result<()> {
        self.clear_column(Column::StagingAccounts)?;
        self.clear_column(Column::StagingResources)?;
        self.clear_column(Column::StagingCreatables)?;
        self.clear_column(Column::StagingHashes)?;
        self.clear_column(Column::StagingKv)?;
        self.clear_column(Column::StagingPartial)?;
        TrieStore::clear(self).await
    }

    async fn complete_catchup(&self, _balances_round: u64) -> Result<u64> {
        // Promotion of staging -> live column families is orchestrated by
        // `Promoter`, which owns the cross-table transaction semantics;
        // this reports the count it is about to promote.
        StagingReader::account_count(self).await
    }
}

#[async_trait]
impl StateStore for RocksStore {
    async fn get_u64(&self, key: &str) -> Result<Option<u64>> {
        match self.get(Column::CatchpointState, key.as_bytes())? {
            Some(bytes) if bytes.len() == 8 => {
                Ok(Some(u64::from_be_bytes(bytes.try_into().unwrap())))
            }
            Some(_) => Err(CatchpointError::InvariantViolation(format!(
                "state key {key} is not a u64"
            ))),
            None => Ok(None),
        }
    }

    async fn set_u64(&self, key: &str, value: u64) -> Result<()> {
        self.put(Column::CatchpointState, key.as_bytes(), &value.to_be_bytes())
    }

    async fn get_string(&self, key: &str) -> Result<Option<String>> {
        match self.get(Column::CatchpointState, key.as_bytes())? {
            Some(bytes) => Ok(Some(String::from_utf8(bytes).map_err(|_| {
                CatchpointError::InvariantViolation(format!("state key {key} is not utf8"))
            })?)),
            None => Ok(None),
        }
    }

    async fn set_string(&self, key: &str, value: &str) -> Result<()> {
        self.put(Column::CatchpointState, key.as_bytes(), value.as_bytes())
    }

    async fn clear(&self, key: &str) -> Result<()> {
        self.delete(Column::CatchpointState, key.as_bytes())
    }
}

#[async_trait]
impl BlockSource for RocksStore {
    async fn block_digest(&self, round: u64) -> Result<Option<Hash>> {
        match self.get(Column::Blocks, &round.to_be_bytes())? {
            Some(bytes) => {
                let array: [u8; 32] = bytes[..]
                    .try_into()
                    .map_err(|_| CatchpointError::InvariantViolation("corrupt block digest row".to_string()))?;
                Ok(Some(Hash::new(array)))
            }
            None => Ok(None),
        }
    }
}

#[async_trait]
impl TrieStore for RocksStore {
    async fn contains(&self, leaf: &Hash) -> Result<bool> {
        if self.pending_trie_keys.lock().unwrap().contains(leaf) {
            return Ok(true);
        }
        Ok(self.get(Column::TrieLeaves, leaf.as_bytes())?.is_some())
    }

    async fn insert(&self, leaf: &Hash) -> Result<()> {
        let cf = cf_handle!(self.db, Column::TrieLeaves);
        let mut batch = self.pending_trie_writes.lock().unwrap();
        batch.put_cf(&cf, leaf.as_bytes(), []);
        self.pending_trie_keys.lock().unwrap().insert(*leaf);
        Ok(())
    }

    async fn evict(&self) -> Result<()> {
        let flushed = {
            let mut batch = self.pending_trie_writes.lock().unwrap();
            std::mem::take(&mut *batch)
        };
        self.db
            .write(flushed)
            .map_err(|e| CatchpointError::TransientStorage(e.to_string()))?;
        self.pending_trie_keys.lock().unwrap().clear();
        Ok(())
    }

    async fn iter_sorted(&self) -> Result<Vec<Hash>> {
        let cf = cf_handle!(self.db, Column::TrieLeaves);
        self.db
            .iterator_cf(&cf, IteratorMode::Start)
            .map(|row| {
                let (key, _) = row.map_err(|e| CatchpointError::TransientStorage(e.to_string()))?;
                let bytes: [u8; 32] = key[..]
                    .try_into()
                    .map_err(|_| CatchpointError::InvariantViolation("corrupt trie leaf key".into()))?;
                Ok(Hash::new(bytes))
            })
            .collect()
    }

    async fn clear(&self) -> Result<()> {
        *self.pending_trie_writes.lock().unwrap() = WriteBatch::default();
        self.pending_trie_keys.lock().unwrap().clear();
        self.clear_column(Column::TrieLeaves)
    }
}

/// Marks the first position excluded by a strict "after" bound, for call
/// sites that need `Bound::Excluded` semantics over a byte-keyed column
/// family (RocksDB's own iterator only supports inclusive `From`).
#[allow(dead_code)]
fn excluded(bound: Bound<Vec<u8>>) -> Option<Vec<u8>> {
    match bound {
        Bound::Excluded(v) => Some(v),
        _ => None,
    }
}
