//! Storage seams. The catchpoint subsystem treats the underlying relational
//! store's on-disk row format as an external collaborator; what it owns is
//! the *shape* of the tables it reads from and writes to. Two
//! implementations exist for every trait here: a RocksDB-backed one used
//! operationally, and an in-memory test double used by deterministic tests.

mod memory;
mod rocks;

pub use memory::MemoryStore;
pub use rocks::{Column, RocksStore};

use async_trait::async_trait;
use catchsync_common::{
    account::{AccountData, ResourceEntry},
    catchpoint::KVRecord,
    crypto::{Address, Hash},
};

use crate::error::Result;

/// One row of the catchpoint's per-account-hash table: a base-account hash
/// (`resource_creatable_index = None`) or a resource hash keyed by its
/// creatable index, both scoped to `address`. Ordered `(address, tag,
/// creatable_index)` ascending so trie rebuild batches come out in the same
/// stable order the writer used to produce the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct AccountHashKey {
    pub address: Address,
    pub resource_creatable_index: Option<u64>,
}

impl AccountHashKey {
    pub fn base(address: Address) -> Self {
        Self {
            address,
            resource_creatable_index: None,
        }
    }

    pub fn resource(address: Address, creatable_index: u64) -> Self {
        Self {
            address,
            resource_creatable_index: Some(creatable_index),
        }
    }

    /// Lexicographic wire key: address (32) ++ tag (1) ++ creatable index (8
    /// BE, zero for the base-account row). Orders by address first so a
    /// RocksDB prefix scan answers "every hash for this account".
    pub fn to_key_bytes(self) -> Vec<u8> {
        let mut key = Vec::with_capacity(41);
        key.extend_from_slice(self.address.as_bytes());
        match self.resource_creatable_index {
            None => {
                key.push(0);
                key.extend_from_slice(&0u64.to_be_bytes());
            }
            Some(idx) => {
                key.push(1);
                key.extend_from_slice(&idx.to_be_bytes());
            }
        }
        key
    }
}

/// A creatable registered by exactly one owning account - written only when
/// a chunk contains an owning resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CreatableRecord {
    pub creatable_index: u64,
    pub owner: Address,
    pub kind: catchsync_common::account::ResourceKind,
}

/// Read side of the live account/resource/kv tables `DatabaseStep` pulls
/// from. Rows must be produced in `(address ASC, creatable_index ASC)`
/// order; `resources_of` is only ever called for the address the cursor
/// most recently yielded.
pub trait LiveStore: Send + Sync {
    fn account_cursor<'a>(
        &'a self,
    ) -> Box<dyn Iterator<Item = Result<(Address, AccountData)>> + 'a>;

    fn resource_cursor<'a>(
        &'a self,
        address: Address,
    ) -> Box<dyn Iterator<Item = Result<ResourceEntry>> + 'a>;

    fn kv_cursor<'a>(&'a self) -> Box<dyn Iterator<Item = Result<KVRecord>> + 'a>;
}

/// Write side of the staging tables a chunk's four concurrent writers
/// target, plus the capability query that decides whether they run
/// serially or in parallel.
#[async_trait]
pub trait StagingWriter: Send + Sync {
    async fn write_balances(&self, balances: &[(Address, AccountData, bool)]) -> Result<()>;
    async fn write_creatables(&self, creatables: &[CreatableRecord]) -> Result<()>;
    async fn write_hashes(&self, hashes: &[(AccountHashKey, Hash)]) -> Result<()>;
    async fn write_kvs(&self, kvs: &[KVRecord]) -> Result<()>;
    async fn write_resources(&self, address: Address, resources: &[ResourceEntry]) -> Result<()>;

    /// True on a shared-cache backend, where the four writes above must be
    /// serialized to avoid write-lock contention instead of run concurrently.
    fn is_shared(&self) -> bool;
}

/// Read side of staging, used by the trie rebuild and by post-promotion
/// lookups.
#[async_trait]
pub trait StagingReader: Send + Sync {
    async fn hash_batch(
        &self,
        after: Option<AccountHashKey>,
        limit: usize,
    ) -> Result<Vec<(AccountHashKey, Hash)>>;

    async fn account_count(&self) -> Result<u64>;

    async fn lookup_account(
        &self,
        address: &Address,
    ) -> Result<Option<(AccountData, Vec<ResourceEntry>)>>;

    async fn kv_by_prefix(&self, prefix: &[u8], limit: usize) -> Result<Vec<KVRecord>>;
}

/// Reset and promotion operations on the staging tables.
#[async_trait]
pub trait StagingLifecycle: Send + Sync {
    /// Discards every staging table. `new_catchup=true` is the only legal
    /// way to begin a new session while one is already owned.
    async fn reset_staging_balances(&self, new_catchup: bool) -> Result<()>;

    /// Swaps staging into place as the live state. Returns the number of
    /// accounts promoted for logging.
    async fn complete_catchup(&self, balances_round: u64) -> Result<u64>;
}

/// Small well-known key/value table backing the persistent state keys
/// (`catchpoint.state`, `catchpoint.label`, ...). Kept generic over
/// string keys rather than an enum so forward-compatible keys can be added
/// without touching this trait.
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn get_u64(&self, key: &str) -> Result<Option<u64>>;
    async fn set_u64(&self, key: &str, value: u64) -> Result<()>;
    async fn get_string(&self, key: &str) -> Result<Option<String>>;
    async fn set_string(&self, key: &str, value: &str) -> Result<()>;
    async fn clear(&self, key: &str) -> Result<()>;
}

/// The local block store the label verifier consults to confirm the block
/// at `blockRound` actually exists before trusting its digest. Block
/// fetching itself is an external collaborator; this is the
/// narrow read-only seam the catchpoint subsystem needs from it.
#[async_trait]
pub trait BlockSource: Send + Sync {
    async fn block_digest(&self, round: u64) -> Result<Option<Hash>>;
}

/// Persisted leaf table backing the Merkle commitment trie. Leaves
/// are keyed by their own hash value, so duplicate detection and the
/// final sorted scan used to compute the root are both plain key-space
/// operations rather than requiring a separate in-memory trie walk.
#[async_trait]
pub trait TrieStore: Send + Sync {
    async fn contains(&self, leaf: &Hash) -> Result<bool>;
    async fn insert(&self, leaf: &Hash) -> Result<()>;
    /// Persist any buffered writes and drop the in-memory write cache.
    async fn evict(&self) -> Result<()>;
    /// Ascending scan of every persisted leaf, used only once rebuild is
    /// complete and the cache has been fully evicted.
    async fn iter_sorted(&self) -> Result<Vec<Hash>>;
    async fn clear(&self) -> Result<()>;
}
