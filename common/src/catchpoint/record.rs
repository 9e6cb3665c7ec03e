use indexmap::IndexMap;

use crate::{
    account::{AccountData, ResourceEntry},
    config::{MAX_KV_KEY_LEN, MAX_KV_VALUE_LEN},
    crypto::{Address, Hash},
    serializer::{Reader, ReaderError, Serializer, Writer},
};

use super::error::CatchpointError;

/// File header version. `V5` predates key-value boxes; `V6` adds them;
/// `V7` additionally folds the state-proof verification hash into the
/// label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum FileVersion {
    V5,
    V6,
    V7,
}

impl FileVersion {
    pub fn carries_kv(self) -> bool {
        matches!(self, FileVersion::V6 | FileVersion::V7)
    }

    pub fn carries_state_proof_hash(self) -> bool {
        matches!(self, FileVersion::V7)
    }

    pub fn as_u8(self) -> u8 {
        match self {
            FileVersion::V5 => 5,
            FileVersion::V6 => 6,
            FileVersion::V7 => 7,
        }
    }
}

impl TryFrom<u8> for FileVersion {
    type Error = CatchpointError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            5 => Ok(FileVersion::V5),
            6 => Ok(FileVersion::V6),
            7 => Ok(FileVersion::V7),
            other => Err(CatchpointError::UnsupportedVersion(other)),
        }
    }
}

impl Serializer for FileVersion {
    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        match reader.read_u8()? {
            5 => Ok(FileVersion::V5),
            6 => Ok(FileVersion::V6),
            7 => Ok(FileVersion::V7),
            _ => Err(ReaderError::InvalidValue),
        }
    }

    fn write(&self, writer: &mut Writer) {
        writer.write_u8(match self {
            FileVersion::V5 => 5,
            FileVersion::V6 => 6,
            FileVersion::V7 => 7,
        });
    }

    fn size(&self) -> usize {
        1
    }
}

/// One account inside a chunk. `resources` is keyed by creatable index and
/// preserves insertion order so a split account's second half can be
/// concatenated onto the first without re-sorting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BalanceRecord {
    pub address: Address,
    pub account_data: AccountData,
    pub resources: IndexMap<u64, ResourceEntry>,
    /// True when this record is a partial continuation: the next chunk
    /// carries more resources for the same address.
    pub expecting_more_entries: bool,
}

impl BalanceRecord {
    pub fn new(address: Address, account_data: AccountData) -> Self {
        Self {
            address,
            account_data,
            resources: IndexMap::new(),
            expecting_more_entries: false,
        }
    }
}

impl Serializer for BalanceRecord {
    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        let address = Address::read(reader)?;
        let account_data = AccountData::read(reader)?;
        let resource_count = reader.read_u32()? as usize;
        let mut resources = IndexMap::with_capacity(resource_count);
        for _ in 0..resource_count {
            let entry = ResourceEntry::read(reader)?;
            if resources.insert(entry.creatable_index, entry).is_some() {
                return Err(ReaderError::InvalidValue);
            }
        }
        let expecting_more_entries = reader.read_bool()?;
        Ok(Self {
            address,
            account_data,
            resources,
            expecting_more_entries,
        })
    }

    fn write(&self, writer: &mut Writer) {
        self.address.write(writer);
        self.account_data.write(writer);
        writer.write_u32(self.resources.len() as u32);
        for entry in self.resources.values() {
            entry.write(writer);
        }
        writer.write_bool(self.expecting_more_entries);
    }

    fn size(&self) -> usize {
        self.address.size()
            + self.account_data.size()
            + 4
            + self.resources.values().map(|r| r.size()).sum::<usize>()
            + 1
    }
}

/// One box entry. Bounds are enforced on construction via `new`, not on
/// every `write`, so decoded-then-re-encoded records from a trusted source
/// don't pay the check twice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KVRecord {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

impl KVRecord {
    pub fn new(key: Vec<u8>, value: Vec<u8>) -> Result<Self, CatchpointError> {
        if key.len() > MAX_KV_KEY_LEN {
            return Err(CatchpointError::KeyTooLong {
                len: key.len(),
                max: MAX_KV_KEY_LEN,
            });
        }
        if value.len() > MAX_KV_VALUE_LEN {
            return Err(CatchpointError::ValueTooLong {
                len: value.len(),
                max: MAX_KV_VALUE_LEN,
            });
        }
        Ok(Self { key, value })
    }
}

impl Serializer for KVRecord {
    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        let key = reader.read_bytes(MAX_KV_KEY_LEN)?;
        let value = reader.read_bytes(MAX_KV_VALUE_LEN)?;
        Ok(Self { key, value })
    }

    fn write(&self, writer: &mut Writer) {
        writer.write_bytes(&self.key);
        writer.write_bytes(&self.value);
    }

    fn size(&self) -> usize {
        4 + self.key.len() + 4 + self.value.len()
    }
}

/// Contents of one `balances.<n>.msgpack` TAR entry: a bounded batch of
/// balances and/or key-value records. Never both empty on the wire, except
/// that invariant is enforced by the writer, not by decoding.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Chunk {
    pub balances: Vec<BalanceRecord>,
    pub kvs: Vec<KVRecord>,
}

impl Chunk {
    pub fn is_empty(&self) -> bool {
        self.balances.is_empty() && self.kvs.is_empty()
    }

    /// Total resource count across every balance in this chunk - the
    /// quantity `writeStep` bounds against `max_resources_per_chunk`.
    pub fn resource_count(&self) -> usize {
        self.balances.iter().map(|b| b.resources.len()).sum()
    }
}

impl Serializer for Chunk {
    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        let balance_count = reader.read_u32()? as usize;
        let mut balances = Vec::with_capacity(balance_count);
        for _ in 0..balance_count {
            balances.push(BalanceRecord::read(reader)?);
        }
        let kv_count = reader.read_u32()? as usize;
        let mut kvs = Vec::with_capacity(kv_count);
        for _ in 0..kv_count {
            kvs.push(KVRecord::read(reader)?);
        }
        Ok(Self { balances, kvs })
    }

    fn write(&self, writer: &mut Writer) {
        writer.write_u32(self.balances.len() as u32);
        for balance in &self.balances {
            balance.write(writer);
        }
        writer.write_u32(self.kvs.len() as u32);
        for kv in &self.kvs {
            kv.write(writer);
        }
    }

    fn size(&self) -> usize {
        4 + self.balances.iter().map(|b| b.size()).sum::<usize>()
            + 4
            + self.kvs.iter().map(|kv| kv.size()).sum::<usize>()
    }
}

/// Ledger-wide participation totals embedded in the header and folded into
/// the catchpoint label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LedgerTotals {
    pub online: u64,
    pub offline: u64,
    pub not_participating: u64,
}

impl Serializer for LedgerTotals {
    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        Ok(Self {
            online: reader.read_u64()?,
            offline: reader.read_u64()?,
            not_participating: reader.read_u64()?,
        })
    }

    fn write(&self, writer: &mut Writer) {
        writer.write_u64(&self.online);
        writer.write_u64(&self.offline);
        writer.write_u64(&self.not_participating);
    }

    fn size(&self) -> usize {
        24
    }
}

/// `content.msgpack`: the single entry that must be first in a repacked
/// file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHeader {
    pub version: FileVersion,
    pub balances_round: u64,
    pub blocks_round: u64,
    pub account_totals: LedgerTotals,
    pub total_accounts: u64,
    pub total_chunks: u64,
    pub catchpoint_label: String,
    pub block_header_digest: Hash,
}

impl Serializer for FileHeader {
    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        Ok(Self {
            version: FileVersion::read(reader)?,
            balances_round: reader.read_u64()?,
            blocks_round: reader.read_u64()?,
            account_totals: LedgerTotals::read(reader)?,
            total_accounts: reader.read_u64()?,
            total_chunks: reader.read_u64()?,
            catchpoint_label: reader.read_string()?,
            block_header_digest: Hash::read(reader)?,
        })
    }

    fn write(&self, writer: &mut Writer) {
        self.version.write(writer);
        writer.write_u64(&self.balances_round);
        writer.write_u64(&self.blocks_round);
        self.account_totals.write(writer);
        writer.write_u64(&self.total_accounts);
        writer.write_u64(&self.total_chunks);
        writer.write_string(&self.catchpoint_label);
        self.block_header_digest.write(writer);
    }

    fn size(&self) -> usize {
        self.version.size()
            + 8
            + 8
            + self.account_totals.size()
            + 8
            + 8
            + 4
            + self.catchpoint_label.len()
            + self.block_header_digest.size()
    }
}

/// One round's state-proof verification context, as carried by
/// `stateProofVerificationData.msgpack`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateProofVerificationContext {
    pub last_attested_round: u64,
    pub voters_commitment: Hash,
    pub online_total_weight: u64,
}

impl Serializer for StateProofVerificationContext {
    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        Ok(Self {
            last_attested_round: reader.read_u64()?,
            voters_commitment: Hash::read(reader)?,
            online_total_weight: reader.read_u64()?,
        })
    }

    fn write(&self, writer: &mut Writer) {
        writer.write_u64(&self.last_attested_round);
        self.voters_commitment.write(writer);
        writer.write_u64(&self.online_total_weight);
    }

    fn size(&self) -> usize {
        8 + self.voters_commitment.size() + 8
    }
}

/// `stateProofVerificationData.msgpack`: the ordered list of per-round
/// verification contexts. A thin newtype rather than a bare `Vec` so the
/// writer and the dispatcher share one canonical framing for the section.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StateProofVerificationSection(pub Vec<StateProofVerificationContext>);

impl Serializer for StateProofVerificationSection {
    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        let count = reader.read_u32()? as usize;
        let mut contexts = Vec::with_capacity(count);
        for _ in 0..count {
            contexts.push(StateProofVerificationContext::read(reader)?);
        }
        Ok(Self(contexts))
    }

    fn write(&self, writer: &mut Writer) {
        writer.write_u32(self.0.len() as u32);
        for context in &self.0 {
            context.write(writer);
        }
    }

    fn size(&self) -> usize {
        4 + self.0.iter().map(|c| c.size()).sum::<usize>()
    }
}

/// Consumer-internal decoded form of a `BalanceRecord`: the account plus
/// the per-resource hashes that get fed into the trie, and whether this is
/// a partial (split-chunk) delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedBalance {
    pub address: Address,
    pub account_data: AccountData,
    pub resources: Vec<ResourceEntry>,
    pub resource_hashes: Vec<Hash>,
    pub partial_balance: bool,
}

impl NormalizedBalance {
    pub fn from_record(record: &BalanceRecord) -> Self {
        let resources: Vec<ResourceEntry> = record.resources.values().cloned().collect();
        let resource_hashes = resources
            .iter()
            .map(|r| {
                // Fold the owning address in alongside the resource's own
                // bytes (creatable index included): two different accounts
                // holding the same creatable with byte-identical resource
                // data must not produce the same trie leaf.
                let mut writer = Writer::new();
                record.address.write(&mut writer);
                r.write(&mut writer);
                crate::crypto::hash(writer.as_bytes())
            })
            .collect();
        Self {
            address: record.address,
            account_data: record.account_data.clone(),
            resources,
            resource_hashes,
            partial_balance: record.expecting_more_entries,
        }
    }

    /// The base-account hash fed into the trie alongside each resource
    /// hash - folds address and account data together.
    pub fn account_hash(&self) -> Hash {
        let mut writer = Writer::new();
        self.address.write(&mut writer);
        self.account_data.write(&mut writer);
        crate::crypto::hash(writer.as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::{ResourceCapability, ResourceKind};

    fn sample_address(byte: u8) -> Address {
        Address::new([byte; 32])
    }

    #[test]
    fn balance_record_round_trips_with_resources() {
        let mut record = BalanceRecord::new(sample_address(1), AccountData::new(10, 1, 0, 0, 0));
        record.resources.insert(
            7,
            ResourceEntry {
                creatable_index: 7,
                kind: ResourceKind::App,
                capability: ResourceCapability::OWNING,
                data: vec![9, 9, 9],
            },
        );
        record.expecting_more_entries = true;

        let bytes = record.to_bytes();
        let decoded = BalanceRecord::from_bytes(&bytes).unwrap();
        assert_eq!(record, decoded);
    }

    #[test]
    fn balance_record_rejects_duplicate_creatable_index() {
        let address = sample_address(2);
        let account_data = AccountData::default();
        let entry = ResourceEntry {
            creatable_index: 1,
            kind: ResourceKind::Asset,
            capability: ResourceCapability::HOLDING,
            data: vec![],
        };
        let mut writer = Writer::new();
        address.write(&mut writer);
        account_data.write(&mut writer);
        writer.write_u32(2);
        entry.write(&mut writer);
        entry.write(&mut writer); // duplicate creatable_index
        writer.write_bool(false);

        let bytes = writer.bytes();
        assert_eq!(
            BalanceRecord::from_bytes(&bytes),
            Err(ReaderError::InvalidValue)
        );
    }

    #[test]
    fn chunk_round_trips() {
        let mut chunk = Chunk::default();
        chunk
            .balances
            .push(BalanceRecord::new(sample_address(3), AccountData::default()));
        chunk.kvs.push(KVRecord::new(b"bx:1:key".to_vec(), b"value".to_vec()).unwrap());

        let bytes = chunk.to_bytes();
        let decoded = Chunk::from_bytes(&bytes).unwrap();
        assert_eq!(chunk, decoded);
    }

    #[test]
    fn kv_record_rejects_oversized_key() {
        let key = vec![0u8; MAX_KV_KEY_LEN + 1];
        let err = KVRecord::new(key, vec![]).unwrap_err();
        assert!(matches!(err, CatchpointError::KeyTooLong { .. }));
    }

    #[test]
    fn file_header_round_trips() {
        let header = FileHeader {
            version: FileVersion::V7,
            balances_round: 1000,
            blocks_round: 1320,
            account_totals: LedgerTotals {
                online: 5,
                offline: 2,
                not_participating: 1,
            },
            total_accounts: 300,
            total_chunks: 1,
            catchpoint_label: "1320#abc123".to_string(),
            block_header_digest: crate::crypto::hash(b"block"),
        };
        let bytes = header.to_bytes();
        let decoded = FileHeader::from_bytes(&bytes).unwrap();
        assert_eq!(header, decoded);
    }

    #[test]
    fn normalized_balance_hashes_every_resource() {
        let mut record = BalanceRecord::new(sample_address(4), AccountData::new(1, 1, 0, 0, 0));
        record.resources.insert(
            3,
            ResourceEntry {
                creatable_index: 3,
                kind: ResourceKind::App,
                capability: ResourceCapability::OWNING,
                data: vec![1],
            },
        );
        let normalized = NormalizedBalance::from_record(&record);
        assert_eq!(normalized.resource_hashes.len(), 1);
        assert_eq!(normalized.resources.len(), 1);
    }

    #[test]
    fn resource_hash_differs_across_accounts_holding_the_same_creatable() {
        let resource = ResourceEntry {
            creatable_index: 7,
            kind: ResourceKind::Asset,
            capability: ResourceCapability::OWNING,
            data: vec![0xAB; 4],
        };

        let mut record_a = BalanceRecord::new(sample_address(1), AccountData::new(0, 0, 0, 1, 0));
        record_a.resources.insert(7, resource.clone());
        let mut record_b = BalanceRecord::new(sample_address(2), AccountData::new(0, 0, 0, 1, 0));
        record_b.resources.insert(7, resource);

        let hash_a = NormalizedBalance::from_record(&record_a).resource_hashes[0];
        let hash_b = NormalizedBalance::from_record(&record_b).resource_hashes[0];
        assert_ne!(hash_a, hash_b, "identical resource bytes under different addresses must not collide");
    }

    #[test]
    fn state_proof_verification_section_round_trips() {
        let section = StateProofVerificationSection(vec![
            StateProofVerificationContext {
                last_attested_round: 100,
                voters_commitment: crate::crypto::hash(b"voters-1"),
                online_total_weight: 42,
            },
            StateProofVerificationContext {
                last_attested_round: 200,
                voters_commitment: crate::crypto::hash(b"voters-2"),
                online_total_weight: 43,
            },
        ]);
        let bytes = section.to_bytes();
        let decoded = StateProofVerificationSection::from_bytes(&bytes).unwrap();
        assert_eq!(section, decoded);
    }
}
