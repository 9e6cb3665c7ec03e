//! Consensus-parameter table for the catchpoint subsystem.
//!
//! Per the design, these values are never process-wide mutable state: a
//! `CatchpointParams` is built for a specific protocol version and passed
//! explicitly into `CatchpointWriter`/`CatchupAccessor` construction. Tests
//! that want a different `catchpoint_lookback` build their own value instead
//! of mutating a shared map.

use crate::static_assert;

pub const VERSION: &str = env!("BUILD_VERSION");

// 1 KB = 1024 bytes
pub const BYTES_PER_KB: usize = 1024;

/// Number of distinct accounts a writer batches into one chunk before
/// flushing it, absent resource overflow.
pub const BALANCES_PER_CHUNK: usize = 2500;

/// Hard cap on the total resource count (app params + app local states +
/// asset params + asset holdings) a single chunk may carry across all of
/// its balances. Exceeding this mid-account triggers a chunk split.
pub const DEFAULT_MAX_RESOURCES_PER_CHUNK: usize = 16_384;

/// Target number of KV records a writer drains into one pure-KV chunk, once
/// the account cursor is exhausted. Matches `BALANCES_PER_CHUNK`'s scale; KV
/// chunks carry no resources so there is no overflow concern to bound them
/// more tightly.
pub const KV_PER_CHUNK_TARGET: usize = BALANCES_PER_CHUNK;

/// Batch size the trie rebuild reader pulls from the staged hash table.
pub const TRIE_REBUILD_CHUNK: usize = 5_000;

/// Number of hashes the trie rebuild writer inserts before it evicts
/// (persists and drops) in-memory trie nodes to bound memory.
pub const TRIE_REBUILD_COMMIT_FREQ: usize = 250_000;

/// Longest application key length a box key may carry, independent of the
/// `"bx:<appid>:"` prefix budgeted into `MAX_KV_KEY_LEN`.
pub const MAX_APP_KEY_LEN: usize = 64;

/// Largest box value any known consensus version allows.
pub const MAX_BOX_SIZE: usize = 32_768;

/// `MAX_KV_KEY_LEN` must cover the longest possible box key: the "bx:" tag,
/// the decimal app id, a separator, and the key itself.
pub const MAX_KV_KEY_LEN: usize = MAX_APP_KEY_LEN + "bx:18446744073709551615:".len();

/// `MAX_KV_VALUE_LEN` must cover the largest box value.
pub const MAX_KV_VALUE_LEN: usize = MAX_BOX_SIZE;

/// Per-version consensus parameters relevant to the catchpoint subsystem.
/// Constructed once per protocol version and threaded explicitly through the
/// writer and the accessor; never looked up from global state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CatchpointParams {
    /// Rounds between a catchpoint's declared block round and its balances
    /// round. Zero means "use `max_bal_lookback` instead".
    pub catchpoint_lookback: u64,
    /// Fallback lookback used when `catchpoint_lookback` is zero.
    pub max_bal_lookback: u64,
    /// Maximum resources a single chunk may carry; callers may tune this
    /// down from `DEFAULT_MAX_RESOURCES_PER_CHUNK` for smaller test chunks.
    pub max_resources_per_chunk: usize,
}

impl CatchpointParams {
    pub const fn new(
        catchpoint_lookback: u64,
        max_bal_lookback: u64,
        max_resources_per_chunk: usize,
    ) -> Self {
        Self {
            catchpoint_lookback,
            max_bal_lookback,
            max_resources_per_chunk,
        }
    }

    /// Effective lookback: `catchpoint_lookback` if set, else `max_bal_lookback`.
    pub const fn effective_lookback(&self) -> u64 {
        if self.catchpoint_lookback != 0 {
            self.catchpoint_lookback
        } else {
            self.max_bal_lookback
        }
    }
}

impl Default for CatchpointParams {
    fn default() -> Self {
        Self {
            catchpoint_lookback: 320,
            max_bal_lookback: 320,
            max_resources_per_chunk: DEFAULT_MAX_RESOURCES_PER_CHUNK,
        }
    }
}

static_assert!(
    MAX_KV_KEY_LEN >= MAX_APP_KEY_LEN,
    "MAX_KV_KEY_LEN must cover the longest application key"
);
static_assert!(
    MAX_KV_VALUE_LEN >= MAX_BOX_SIZE,
    "MAX_KV_VALUE_LEN must cover the largest box value"
);
