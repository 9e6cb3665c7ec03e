//! Wire types shared by the catchpoint writer and the catchup accessor:
//! the records that make up a chunk, the file header, and the state-proof
//! verification section. These are pure data + `Serializer` impls; the
//! orchestration (writer/accessor/trie/label/promoter state machines) lives
//! in the daemon crate, closer to storage.

mod error;
mod record;
mod resource_counter;

pub use error::CatchpointError;
pub use record::{
    BalanceRecord, Chunk, FileHeader, FileVersion, KVRecord, LedgerTotals, NormalizedBalance,
    StateProofVerificationContext, StateProofVerificationSection,
};
pub use resource_counter::ResourceCounter;
