//! Decides whether the vault may already pull the requested amount.

use alloy_primitives::U256;
use tracing::debug;

use crate::chain::ChainError;
use crate::services::amount::AmountRequest;
use crate::services::balance_cache::BalanceCache;

/// True when `current_allowance` covers `amount` exactly or better.
///
/// Both sides are integers in base units; nothing is rounded.
pub fn has_sufficient_allowance(amount: &AmountRequest, current_allowance: U256) -> bool {
    amount.base_units() <= current_allowance
}

/// Allowance check backed by the balance cache.
pub struct AllowanceGate<'a> {
    cache: &'a BalanceCache,
}

impl<'a> AllowanceGate<'a> {
    pub fn new(cache: &'a BalanceCache) -> Self {
        Self { cache }
    }

    /// Compare `amount` with the cached allowance, fetching it if needed.
    ///
    /// ## Returns
    ///
    /// * `Ok(true)` - no approval needed
    /// * `Ok(false)` - an approval must come first
    /// * `Err(ChainError)` - the allowance could not be read
    pub async fn check(&self, amount: &AmountRequest) -> Result<bool, ChainError> {
        let allowance = self.cache.allowance_or_refresh().await?;
        let sufficient = has_sufficient_allowance(amount, allowance);
        debug!(
            "Allowance check: need {}, have {} -> {}",
            amount.base_units(),
            allowance,
            if sufficient { "ok" } else { "approval required" }
        );
        Ok(sufficient)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeReader;
    use alloy_primitives::Address;
    use std::sync::Arc;

    #[test]
    fn test_comparison_is_in_base_units() {
        let amount = AmountRequest::parse("100", 6).unwrap();
        assert!(!has_sufficient_allowance(&amount, U256::ZERO));
        assert!(!has_sufficient_allowance(&amount, U256::from(99_999_999u64)));
        assert!(has_sufficient_allowance(&amount, U256::from(100_000_000u64)));
        assert!(has_sufficient_allowance(&amount, U256::MAX));
    }

    #[test]
    fn test_fractional_amounts_are_not_rounded() {
        let amount = AmountRequest::parse("0.000001", 6).unwrap();
        assert!(!has_sufficient_allowance(&amount, U256::ZERO));
        assert!(has_sufficient_allowance(&amount, U256::from(1u64)));
    }

    #[tokio::test]
    async fn test_gate_reads_through_cache() {
        let reader = Arc::new(FakeReader::default());
        reader.set_allowance(U256::from(1_000_000_000u64));
        let cache = BalanceCache::new(
            reader,
            Address::repeat_byte(0xbb),
            Address::repeat_byte(0xaa),
            Address::repeat_byte(0x42),
        );
        let gate = AllowanceGate::new(&cache);

        assert!(gate.check(&AmountRequest::parse("50", 6).unwrap()).await.unwrap());
        assert!(!gate.check(&AmountRequest::parse("5000", 6).unwrap()).await.unwrap());
    }
}
