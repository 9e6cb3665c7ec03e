//! Catchup control surface and state machine. Transport-agnostic:
//! a CLI, an RPC handler, or a test can all drive the same `CatchupControl`.

use async_trait::async_trait;

use crate::error::{CatchpointError, Result};
use crate::store::{StagingLifecycle, StateStore};

use super::keys;

/// Legal states, in the order a session progresses through them. Any
/// transition must be persisted before its associated work begins, so a
/// restart resumes at the last persisted state rather than replaying work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CatchupState {
    Inactive,
    LedgerDownload,
    LatestBlockDownload,
    BlocksDownload,
    Switch,
}

impl CatchupState {
    pub fn as_u64(self) -> u64 {
        match self {
            CatchupState::Inactive => 0,
            CatchupState::LedgerDownload => 1,
            CatchupState::LatestBlockDownload => 2,
            CatchupState::BlocksDownload => 3,
            CatchupState::Switch => 4,
        }
    }

    /// The only state this one may legally transition to next, per the
    /// fixed cycle Inactive -> LedgerDownload -> LatestBlockDownload ->
    /// BlocksDownload -> Switch -> Inactive.
    pub fn next(self) -> CatchupState {
        match self {
            CatchupState::Inactive => CatchupState::LedgerDownload,
            CatchupState::LedgerDownload => CatchupState::LatestBlockDownload,
            CatchupState::LatestBlockDownload => CatchupState::BlocksDownload,
            CatchupState::BlocksDownload => CatchupState::Switch,
            CatchupState::Switch => CatchupState::Inactive,
        }
    }
}

impl TryFrom<u64> for CatchupState {
    type Error = CatchpointError;

    fn try_from(value: u64) -> std::result::Result<Self, Self::Error> {
        match value {
            0 => Ok(CatchupState::Inactive),
            1 => Ok(CatchupState::LedgerDownload),
            2 => Ok(CatchupState::LatestBlockDownload),
            3 => Ok(CatchupState::BlocksDownload),
            4 => Ok(CatchupState::Switch),
            other => Err(CatchpointError::InvariantViolation(format!(
                "catchpoint.state holds unrecognized value {other}"
            ))),
        }
    }
}

/// Status snapshot returned by `status()`.
#[derive(Debug, Clone, Copy, Default)]
pub struct CatchupStatus {
    pub state: Option<CatchupState>,
    pub processed_accounts: u64,
    pub processed_bytes: u64,
    pub total_accounts: u64,
    pub total_chunks: u64,
}

/// Drives the persisted state machine. Generic over any `StateStore +
/// StagingLifecycle` implementation so both backends share one control path.
pub struct CatchupControl<'a> {
    state: &'a (dyn StateStore + Sync),
    staging: &'a (dyn StagingLifecycle + Sync),
}

impl<'a> CatchupControl<'a> {
    pub fn new(state: &'a (dyn StateStore + Sync), staging: &'a (dyn StagingLifecycle + Sync)) -> Self {
        Self { state, staging }
    }

    pub async fn current_state(&self) -> Result<CatchupState> {
        match self.state.get_u64(keys::STATE).await? {
            Some(value) => CatchupState::try_from(value),
            None => Ok(CatchupState::Inactive),
        }
    }

    async fn persist_transition(&self, target: CatchupState) -> Result<()> {
        self.state.set_u64(keys::STATE, target.as_u64()).await
    }

    /// Enters `LedgerDownload` with the label the node was told to catch up
    /// to. Resets staging first, as a fresh session that is the only legal
    /// way to begin while one might already be owned.
    pub async fn start_catchup(&self, label: &str) -> Result<()> {
        let current = self.current_state().await?;
        if current != CatchupState::Inactive {
            return Err(CatchpointError::InvariantViolation(format!(
                "cannot start a new catchup session from state {current:?}"
            )));
        }
        self.staging.reset_staging_balances(true).await?;
        self.state.set_string(keys::LABEL, label).await?;
        self.persist_transition(CatchupState::LedgerDownload).await
    }

    /// Advances to the next state in the fixed cycle. Persists the
    /// transition before the caller's associated work begins.
    pub async fn advance(&self) -> Result<CatchupState> {
        let current = self.current_state().await?;
        let target = current.next();
        self.persist_transition(target).await?;
        Ok(target)
    }

    /// Resets staging and returns the state machine to `Inactive`. Legal
    /// from any state; used both for explicit aborts and for terminal
    /// errors.
    pub async fn abort_catchup(&self) -> Result<()> {
        self.staging.reset_staging_balances(false).await?;
        for key in [keys::LABEL, keys::BALANCES_ROUND, keys::BLOCK_ROUND, keys::HASH_ROUND] {
            self.state.clear(key).await?;
        }
        self.persist_transition(CatchupState::Inactive).await
    }

    pub async fn status(&self, progress: &super::Progress) -> Result<CatchupStatus> {
        Ok(CatchupStatus {
            state: Some(self.current_state().await?),
            processed_accounts: progress.processed_accounts,
            processed_bytes: progress.processed_bytes,
            total_accounts: progress.total_accounts,
            total_chunks: progress.total_chunks,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[tokio::test]
    async fn starts_inactive_and_advances_through_the_cycle() {
        let store = MemoryStore::new();
        let control = CatchupControl::new(&store, &store);

        assert_eq!(control.current_state().await.unwrap(), CatchupState::Inactive);
        control.start_catchup("420#deadbeef").await.unwrap();
        assert_eq!(control.current_state().await.unwrap(), CatchupState::LedgerDownload);

        assert_eq!(control.advance().await.unwrap(), CatchupState::LatestBlockDownload);
        assert_eq!(control.advance().await.unwrap(), CatchupState::BlocksDownload);
        assert_eq!(control.advance().await.unwrap(), CatchupState::Switch);
        assert_eq!(control.advance().await.unwrap(), CatchupState::Inactive);
    }

    #[tokio::test]
    async fn cannot_start_a_second_session_while_one_is_active() {
        let store = MemoryStore::new();
        let control = CatchupControl::new(&store, &store);
        control.start_catchup("420#deadbeef").await.unwrap();
        let err = control.start_catchup("420#deadbeef").await.unwrap_err();
        assert!(matches!(err, CatchpointError::InvariantViolation(_)));
    }

    #[tokio::test]
    async fn abort_returns_to_inactive_from_any_state() {
        let store = MemoryStore::new();
        let control = CatchupControl::new(&store, &store);
        control.start_catchup("420#deadbeef").await.unwrap();
        control.advance().await.unwrap();
        control.abort_catchup().await.unwrap();
        assert_eq!(control.current_state().await.unwrap(), CatchupState::Inactive);
    }
}
