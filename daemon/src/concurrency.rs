//! Cooperative cancellation and the structured four-way fan-out used by
//! chunk ingestion. Modeled as explicit message passing / atomics rather
//! than inheritance, per the design notes: all spawned tasks are joined
//! before the caller gets control back, even when one of them fails.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::CatchpointError;

/// Observable, cooperatively polled cancellation flag shared between the
/// trie rebuild's reader/writer tasks (and, more generally, any long-running
/// step that wants to stop promptly at a batch boundary).
#[derive(Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Convenience check that returns `Err(Cancelled)` at a batch boundary.
    pub fn check(&self) -> Result<(), CatchpointError> {
        if self.is_cancelled() {
            Err(CatchpointError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Runs four fallible async tasks to completion, unconditionally, and
/// returns the first error in declaration order (balances > creatables >
/// hashes > kvs) if any failed. Every future is awaited regardless of
/// earlier failures so no task outlives the chunk's borrowed inputs - the
/// structured-concurrency requirement from the design notes.
pub async fn join_four<A, B, C, D>(
    balances: A,
    creatables: B,
    hashes: C,
    kvs: D,
) -> Result<(), CatchpointError>
where
    A: std::future::Future<Output = Result<(), CatchpointError>>,
    B: std::future::Future<Output = Result<(), CatchpointError>>,
    C: std::future::Future<Output = Result<(), CatchpointError>>,
    D: std::future::Future<Output = Result<(), CatchpointError>>,
{
    let (r_balances, r_creatables, r_hashes, r_kvs) = tokio::join!(balances, creatables, hashes, kvs);
    r_balances?;
    r_creatables?;
    r_hashes?;
    r_kvs?;
    Ok(())
}

/// Runs the same four tasks serially, in the same declaration order, for
/// shared-cache stores where concurrent writers would contend on a single
/// write lock. Still returns the first error encountered, and still runs
/// every step so staging state for steps after a failure is consistent
/// with "discard on next reset" rather than partially applied in a way
/// that depends on execution order.
pub async fn run_four_serial<A, B, C, D>(
    balances: A,
    creatables: B,
    hashes: C,
    kvs: D,
) -> Result<(), CatchpointError>
where
    A: std::future::Future<Output = Result<(), CatchpointError>>,
    B: std::future::Future<Output = Result<(), CatchpointError>>,
    C: std::future::Future<Output = Result<(), CatchpointError>>,
    D: std::future::Future<Output = Result<(), CatchpointError>>,
{
    let r_balances = balances.await;
    let r_creatables = creatables.await;
    let r_hashes = hashes.await;
    let r_kvs = kvs.await;
    r_balances?;
    r_creatables?;
    r_hashes?;
    r_kvs?;
    Ok(())
}
