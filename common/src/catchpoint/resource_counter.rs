//! Per-account running tallies used to detect the resource-overflow
//! boundary while writing a chunk, and to validate a delivered account's
//! totals while ingesting one.

use crate::account::{AccountData, ResourceCapability, ResourceKind};

/// Running count of appParams / appLocalStates / assetParams / assetHoldings
/// observed so far for the account currently being written or ingested.
/// `total_resources` of the completed counter must equal
/// `AccountData::total_resources` for the account to be considered fully
/// delivered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResourceCounter {
    pub app_params: u64,
    pub app_local_states: u64,
    pub asset_params: u64,
    pub assets: u64,
}

impl ResourceCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Classify one resource by (kind, capability) and bump the matching
    /// counters. A resource can bump two counters at once: an app both
    /// owned and held by the same account increments `app_params` and
    /// `app_local_states` together.
    pub fn add(&mut self, kind: ResourceKind, capability: ResourceCapability) {
        match kind {
            ResourceKind::App => {
                if capability.contains(ResourceCapability::OWNING) {
                    self.app_params += 1;
                }
                if capability.contains(ResourceCapability::HOLDING) {
                    self.app_local_states += 1;
                }
            }
            ResourceKind::Asset => {
                if capability.contains(ResourceCapability::OWNING) {
                    self.asset_params += 1;
                }
                if capability.contains(ResourceCapability::HOLDING) {
                    self.assets += 1;
                }
            }
        }
    }

    pub fn total(&self) -> u64 {
        self.app_params + self.app_local_states + self.asset_params + self.assets
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// True when the four observed counts match the account's declared
    /// totals exactly. The only valid completion condition for a balance
    /// whose `expecting_more_entries` flag is false.
    pub fn matches(&self, account_data: &AccountData) -> bool {
        self.app_params == account_data.total_app_params
            && self.app_local_states == account_data.total_app_local_states
            && self.asset_params == account_data.total_asset_params
            && self.assets == account_data.total_assets
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tallies_owning_and_holding_separately() {
        let mut counter = ResourceCounter::new();
        counter.add(ResourceKind::App, ResourceCapability::OWNING);
        counter.add(
            ResourceKind::App,
            ResourceCapability::OWNING | ResourceCapability::HOLDING,
        );
        counter.add(ResourceKind::Asset, ResourceCapability::HOLDING);

        assert_eq!(counter.app_params, 2);
        assert_eq!(counter.app_local_states, 1);
        assert_eq!(counter.asset_params, 0);
        assert_eq!(counter.assets, 1);
        assert_eq!(counter.total(), 4);
    }

    #[test]
    fn matches_declared_totals() {
        let account = AccountData::new(0, 2, 1, 0, 1);
        let mut counter = ResourceCounter::new();
        counter.add(ResourceKind::App, ResourceCapability::OWNING);
        counter.add(
            ResourceKind::App,
            ResourceCapability::OWNING | ResourceCapability::HOLDING,
        );
        counter.add(ResourceKind::Asset, ResourceCapability::HOLDING);
        assert!(counter.matches(&account));

        counter.reset();
        assert!(!counter.matches(&account));
    }
}
