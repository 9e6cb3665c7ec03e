//! Account and resource data shapes carried inside catchpoint balance
//! records. These mirror the base-account totals a writer declares and a
//! consumer must reconcile resource-by-resource while ingesting a chunk.

use crate::serializer::{Reader, ReaderError, Serializer, Writer};

/// Base account fields plus the four declared resource totals used to
/// detect a chunk-boundary split mid-account.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AccountData {
    pub balance: u64,
    pub total_app_params: u64,
    pub total_app_local_states: u64,
    pub total_asset_params: u64,
    pub total_assets: u64,
}

impl AccountData {
    pub fn new(
        balance: u64,
        total_app_params: u64,
        total_app_local_states: u64,
        total_asset_params: u64,
        total_assets: u64,
    ) -> Self {
        Self {
            balance,
            total_app_params,
            total_app_local_states,
            total_asset_params,
            total_assets,
        }
    }

    /// Total declared resource count across all four kinds. Used to size
    /// the resource-overflow budget for a single account.
    pub fn total_resources(&self) -> u64 {
        self.total_app_params + self.total_app_local_states + self.total_asset_params + self.total_assets
    }
}

impl Serializer for AccountData {
    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        Ok(Self {
            balance: reader.read_u64()?,
            total_app_params: reader.read_u64()?,
            total_app_local_states: reader.read_u64()?,
            total_asset_params: reader.read_u64()?,
            total_assets: reader.read_u64()?,
        })
    }

    fn write(&self, writer: &mut Writer) {
        writer.write_u64(&self.balance);
        writer.write_u64(&self.total_app_params);
        writer.write_u64(&self.total_app_local_states);
        writer.write_u64(&self.total_asset_params);
        writer.write_u64(&self.total_assets);
    }

    fn size(&self) -> usize {
        8 * 5
    }
}

/// A creatable resource an account owns and/or holds: an application's
/// local state, or an asset's params/holding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    App,
    Asset,
}

impl Serializer for ResourceKind {
    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        match reader.read_u8()? {
            0 => Ok(ResourceKind::App),
            1 => Ok(ResourceKind::Asset),
            _ => Err(ReaderError::InvalidValue),
        }
    }

    fn write(&self, writer: &mut Writer) {
        writer.write_u8(match self {
            ResourceKind::App => 0,
            ResourceKind::Asset => 1,
        });
    }

    fn size(&self) -> usize {
        1
    }
}

/// Whether an account is the creator of the resource (`OWNING`) and/or
/// carries local state for it (`HOLDING`). An app can be both owned and
/// held by the same account; an asset holding without ownership is the
/// common case for a plain asset transfer recipient.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResourceCapability(u8);

impl ResourceCapability {
    pub const OWNING: ResourceCapability = ResourceCapability(0b0000_0001);
    pub const HOLDING: ResourceCapability = ResourceCapability(0b0000_0010);
    const ALL_BITS: u8 = Self::OWNING.0 | Self::HOLDING.0;

    pub const fn empty() -> Self {
        ResourceCapability(0)
    }

    pub const fn union(self, other: ResourceCapability) -> Self {
        ResourceCapability(self.0 | other.0)
    }

    pub const fn contains(self, other: ResourceCapability) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for ResourceCapability {
    type Output = ResourceCapability;
    fn bitor(self, rhs: ResourceCapability) -> ResourceCapability {
        self.union(rhs)
    }
}

impl Serializer for ResourceCapability {
    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        let bits = reader.read_u8()?;
        if bits & !Self::ALL_BITS != 0 {
            return Err(ReaderError::InvalidValue);
        }
        Ok(ResourceCapability(bits))
    }

    fn write(&self, writer: &mut Writer) {
        writer.write_u8(self.0);
    }

    fn size(&self) -> usize {
        1
    }
}

/// One creatable-index -> resource blob entry inside a `BalanceRecord`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceEntry {
    pub creatable_index: u64,
    pub kind: ResourceKind,
    pub capability: ResourceCapability,
    /// Opaque resource payload (app local-state key/values, asset holding
    /// amount and frozen flag, or asset/app params) - the catchpoint
    /// subsystem treats it as a byte blob to round-trip and hash.
    pub data: Vec<u8>,
}

impl Serializer for ResourceEntry {
    fn read(reader: &mut Reader) -> Result<Self, ReaderError> {
        let creatable_index = reader.read_u64()?;
        let kind = ResourceKind::read(reader)?;
        let capability = ResourceCapability::read(reader)?;
        let data = reader.read_bytes(crate::config::MAX_BOX_SIZE)?;
        Ok(Self {
            creatable_index,
            kind,
            capability,
            data,
        })
    }

    fn write(&self, writer: &mut Writer) {
        writer.write_u64(&self.creatable_index);
        self.kind.write(writer);
        self.capability.write(writer);
        writer.write_bytes(&self.data);
    }

    fn size(&self) -> usize {
        8 + self.kind.size() + self.capability.size() + 4 + self.data.len()
    }
}
