//! Recomputes the catchpoint label from the pieces gathered during ingestion
//! and the rebuilt trie root, then checks it byte-exact against the label
//! the node was told to catch up to.

use catchsync_common::catchpoint::{FileVersion, LedgerTotals};
use catchsync_common::config::CatchpointParams;
use catchsync_common::crypto::{hash, Hash};
use catchsync_common::serializer::{Serializer, Writer};

use crate::error::{CatchpointError, Result};
use crate::store::BlockSource;

/// Every input the label formula needs, gathered from state persisted
/// during header/chunk ingestion plus the freshly rebuilt trie root.
pub struct LabelInputs {
    pub version: FileVersion,
    pub balances_round: u64,
    pub block_round: u64,
    pub block_digest: Hash,
    pub trie_root: Hash,
    pub totals: LedgerTotals,
    /// Hash over the raw `stateProofVerificationData.msgpack` bytes;
    /// required (and folded into the label) only from V7 onward.
    pub state_proof_verification_hash: Option<Hash>,
}

/// Recomputes the catchpoint label per the version-specific formula:
///
/// - V5/V6: `H(blockRound || blockDigest || trieRoot || totals)`
/// - V7: `H(blockRound || blockDigest || trieRoot || totals || stateProofVerificationHash)`
pub fn compute_label(inputs: &LabelInputs) -> Hash {
    let mut writer = Writer::new();
    writer.write_u64(&inputs.block_round);
    inputs.block_digest.write(&mut writer);
    inputs.trie_root.write(&mut writer);
    inputs.totals.write(&mut writer);
    if inputs.version.carries_state_proof_hash() {
        if let Some(proof_hash) = inputs.state_proof_verification_hash {
            proof_hash.write(&mut writer);
        }
    }
    hash(writer.as_bytes())
}

pub struct LabelVerifier<'a> {
    blocks: &'a (dyn BlockSource + Sync),
}

impl<'a> LabelVerifier<'a> {
    pub fn new(blocks: &'a (dyn BlockSource + Sync)) -> Self {
        Self { blocks }
    }

    /// Full check: the block at `inputs.block_round` must exist
    /// locally with a matching round, `balancesRound` must equal
    /// `blockRound - effective_lookback`, and the recomputed label must
    /// match `advertised_label` byte-exact.
    pub async fn verify(
        &self,
        inputs: &LabelInputs,
        params: &CatchpointParams,
        advertised_label: &str,
    ) -> Result<()> {
        let local_digest = self
            .blocks
            .block_digest(inputs.block_round)
            .await?
            .ok_or_else(|| {
                CatchpointError::InvariantViolation(format!(
                    "block at round {} is not available locally",
                    inputs.block_round
                ))
            })?;
        if local_digest != inputs.block_digest {
            return Err(CatchpointError::InvariantViolation(format!(
                "block digest at round {} does not match the downloaded block",
                inputs.block_round
            )));
        }

        let expected_balances_round = inputs.block_round.saturating_sub(params.effective_lookback());
        if inputs.balances_round != expected_balances_round {
            return Err(CatchpointError::InvariantViolation(format!(
                "balancesRound {} does not equal blockRound {} minus lookback {}",
                inputs.balances_round,
                inputs.block_round,
                params.effective_lookback()
            )));
        }

        let computed = compute_label(inputs);
        let computed_label = format!("{}#{}", inputs.block_round, computed.to_hex());
        if computed_label != advertised_label {
            return Err(CatchpointError::LabelMismatch {
                expected: advertised_label.to_string(),
                computed: computed_label,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn sample_inputs(version: FileVersion) -> LabelInputs {
        LabelInputs {
            version,
            balances_round: 1000,
            block_round: 1320,
            block_digest: hash(b"block-1320"),
            trie_root: hash(b"trie-root"),
            totals: LedgerTotals {
                online: 5,
                offline: 2,
                not_participating: 1,
            },
            state_proof_verification_hash: Some(hash(b"verification-section")),
        }
    }

    #[test]
    fn v7_label_differs_from_v6_label_for_the_same_inputs() {
        let v6_inputs = LabelInputs {
            version: FileVersion::V6,
            ..sample_inputs(FileVersion::V6)
        };
        let v7_inputs = LabelInputs {
            version: FileVersion::V7,
            ..sample_inputs(FileVersion::V7)
        };
        assert_ne!(compute_label(&v6_inputs), compute_label(&v7_inputs));
    }

    #[tokio::test]
    async fn accepts_a_correctly_recomputed_label() {
        let store = MemoryStore::new();
        let inputs = sample_inputs(FileVersion::V7);
        store.seed_block(inputs.block_round, inputs.block_digest);

        let label = format!("{}#{}", inputs.block_round, compute_label(&inputs).to_hex());
        let params = CatchpointParams::new(320, 320, catchsync_common::config::DEFAULT_MAX_RESOURCES_PER_CHUNK);

        LabelVerifier::new(&store).verify(&inputs, &params, &label).await.unwrap();
    }

    #[tokio::test]
    async fn rejects_a_mismatched_label() {
        let store = MemoryStore::new();
        let inputs = sample_inputs(FileVersion::V7);
        store.seed_block(inputs.block_round, inputs.block_digest);

        let params = CatchpointParams::new(320, 320, catchsync_common::config::DEFAULT_MAX_RESOURCES_PER_CHUNK);
        let err = LabelVerifier::new(&store)
            .verify(&inputs, &params, "1320#not-the-right-label")
            .await
            .unwrap_err();
        assert!(matches!(err, CatchpointError::LabelMismatch { .. }));
    }

    #[tokio::test]
    async fn rejects_when_the_block_is_missing_locally() {
        let store = MemoryStore::new();
        let inputs = sample_inputs(FileVersion::V7);
        let params = CatchpointParams::new(320, 320, catchsync_common::config::DEFAULT_MAX_RESOURCES_PER_CHUNK);
        let label = format!("{}#{}", inputs.block_round, compute_label(&inputs).to_hex());

        let err = LabelVerifier::new(&store).verify(&inputs, &params, &label).await.unwrap_err();
        assert!(matches!(err, CatchpointError::InvariantViolation(_)));
    }

    #[tokio::test]
    async fn rejects_a_balances_round_that_does_not_match_the_lookback() {
        let store = MemoryStore::new();
        let mut inputs = sample_inputs(FileVersion::V7);
        inputs.balances_round = 42; // should be block_round - lookback
        store.seed_block(inputs.block_round, inputs.block_digest);

        let label = format!("{}#{}", inputs.block_round, compute_label(&inputs).to_hex());
        let params = CatchpointParams::new(320, 320, catchsync_common::config::DEFAULT_MAX_RESOURCES_PER_CHUNK);
        let err = LabelVerifier::new(&store).verify(&inputs, &params, &label).await.unwrap_err();
        assert!(matches!(err, CatchpointError::InvariantViolation(_)));
    }
}
