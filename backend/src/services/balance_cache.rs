//! # Balance Cache
//!
//! Holds the allowance and vault position the orchestrators read, and
//! keeps them in step with the chain.
//!
//! ## Responsibilities
//!
//! - Cache `allowance(account, vault)` on the asset token
//! - Cache the account's vault position (wallet balance, shares, totals)
//! - Refresh on demand after approvals, deposits and withdrawals
//! - Refresh periodically in the background
//! - Mark everything stale when a flow is cancelled
//!
//! ## Consistency
//!
//! Each entry is replaced whole; readers always see one complete fetch.
//! Every refresh takes a version ticket before it starts and only
//! publishes if no newer ticket has already landed, so a slow refresh
//! can never overwrite a faster, later one.
//!
//! ```text
//! refresh A (ticket 4) ──────────────fetch──────────────► dropped
//! refresh B (ticket 5) ────fetch────► published (v5)
//! ```
//!
//! The blockchain is always the **source of truth**.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::{Address, U256};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tokio::time::interval;
use tracing::{debug, info, warn};

use crate::chain::{ChainError, ChainReader};

/// One complete fetch of a cached value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry<T> {
    pub value: T,
    pub version: u64,
    pub fetched_at: DateTime<Utc>,
    /// Set by `invalidate`; cleared by the next refresh.
    pub stale: bool,
}

/// The account's holdings in the vault and its wallet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VaultPosition {
    pub wallet_balance: U256,
    pub shares: U256,
    pub total_assets: U256,
    pub total_supply: U256,
}

impl VaultPosition {
    /// Asset value of the account's shares, rounded down.
    pub fn redeemable(&self) -> U256 {
        if self.total_supply.is_zero() {
            return U256::ZERO;
        }
        match self.shares.checked_mul(self.total_assets) {
            Some(product) => product / self.total_supply,
            None => self.shares / self.total_supply * self.total_assets,
        }
    }
}

/// Read-mostly cache of on-chain balances for one account.
///
/// ## Usage
///
/// ```rust,ignore
/// let cache = Arc::new(BalanceCache::new(reader, asset, vault, account));
/// cache.refresh_all().await?;
/// let allowance = cache.allowance();
/// ```
pub struct BalanceCache {
    reader: Arc<dyn ChainReader>,
    asset: Address,
    vault: Address,
    account: Address,
    next_version: AtomicU64,
    allowance: watch::Sender<Option<CacheEntry<U256>>>,
    position: watch::Sender<Option<CacheEntry<VaultPosition>>>,
}

impl BalanceCache {
    pub fn new(
        reader: Arc<dyn ChainReader>,
        asset: Address,
        vault: Address,
        account: Address,
    ) -> Self {
        let (allowance, _) = watch::channel(None);
        let (position, _) = watch::channel(None);
        Self {
            reader,
            asset,
            vault,
            account,
            next_version: AtomicU64::new(1),
            allowance,
            position,
        }
    }

    /// Latest allowance entry, stale or not.
    pub fn allowance(&self) -> Option<CacheEntry<U256>> {
        self.allowance.borrow().clone()
    }

    /// Latest position entry, stale or not.
    pub fn position(&self) -> Option<CacheEntry<VaultPosition>> {
        self.position.borrow().clone()
    }

    /// Redeemable balance from the last known position.
    pub fn redeemable(&self) -> Option<U256> {
        self.position
            .borrow()
            .as_ref()
            .map(|entry| entry.value.redeemable())
    }

    /// Fresh allowance, fetching only if the entry is missing or stale.
    pub async fn allowance_or_refresh(&self) -> Result<U256, ChainError> {
        if let Some(entry) = self.allowance() {
            if !entry.stale {
                return Ok(entry.value);
            }
        }
        self.refresh_allowance().await
    }

    /// Fetch the allowance from the chain and publish it.
    pub async fn refresh_allowance(&self) -> Result<U256, ChainError> {
        let ticket = self.take_ticket();
        let value = self
            .reader
            .allowance(self.asset, self.account, self.vault)
            .await?;
        self.store_allowance(ticket, value);
        Ok(value)
    }

    /// Fetch the vault position from the chain and publish it.
    pub async fn refresh_position(&self) -> Result<VaultPosition, ChainError> {
        let ticket = self.take_ticket();
        let (wallet_balance, shares, total_assets, total_supply) = futures::try_join!(
            self.reader.balance_of(self.asset, self.account),
            self.reader.balance_of(self.vault, self.account),
            self.reader.total_assets(self.vault),
            self.reader.total_supply(self.vault),
        )?;

        let position = VaultPosition {
            wallet_balance,
            shares,
            total_assets,
            total_supply,
        };
        self.store_position(ticket, position);
        Ok(position)
    }

    pub async fn refresh_all(&self) -> Result<(), ChainError> {
        futures::try_join!(self.refresh_allowance(), self.refresh_position())?;
        Ok(())
    }

    /// Mark every entry stale. Values stay readable until replaced.
    pub fn invalidate(&self) {
        self.allowance.send_modify(|entry| {
            if let Some(entry) = entry {
                entry.stale = true;
            }
        });
        self.position.send_modify(|entry| {
            if let Some(entry) = entry {
                entry.stale = true;
            }
        });
        debug!("Balance cache invalidated");
    }

    /// Refresh everything every `interval_secs`, forever.
    pub async fn start_refresh_loop(&self, interval_secs: u64) {
        info!("Starting balance refresh loop (interval: {}s)", interval_secs);

        let mut ticker = interval(Duration::from_secs(interval_secs.max(1)));
        loop {
            ticker.tick().await;
            if let Err(e) = self.refresh_all().await {
                warn!("Scheduled balance refresh failed: {}", e);
            }
        }
    }

    fn take_ticket(&self) -> u64 {
        self.next_version.fetch_add(1, Ordering::SeqCst)
    }

    fn store_allowance(&self, ticket: u64, value: U256) -> bool {
        publish(&self.allowance, ticket, value)
    }

    fn store_position(&self, ticket: u64, value: VaultPosition) -> bool {
        publish(&self.position, ticket, value)
    }
}

/// Replace the entry unless a newer ticket already landed.
fn publish<T>(slot: &watch::Sender<Option<CacheEntry<T>>>, ticket: u64, value: T) -> bool {
    slot.send_if_modified(|current| {
        if matches!(current, Some(entry) if entry.version > ticket) {
            debug!("Dropping out-of-order refresh (ticket {})", ticket);
            return false;
        }
        *current = Some(CacheEntry {
            value,
            version: ticket,
            fetched_at: Utc::now(),
            stale: false,
        });
        true
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeReader;

    fn cache(reader: Arc<FakeReader>) -> BalanceCache {
        BalanceCache::new(
            reader,
            Address::repeat_byte(0xbb),
            Address::repeat_byte(0xaa),
            Address::repeat_byte(0x42),
        )
    }

    #[test]
    fn test_redeemable_uses_share_price() {
        let position = VaultPosition {
            wallet_balance: U256::ZERO,
            shares: U256::from(50u64),
            total_assets: U256::from(300u64),
            total_supply: U256::from(100u64),
        };
        assert_eq!(position.redeemable(), U256::from(150u64));

        let empty = VaultPosition {
            total_supply: U256::ZERO,
            ..position
        };
        assert_eq!(empty.redeemable(), U256::ZERO);
    }

    #[tokio::test]
    async fn test_refresh_publishes_whole_entries() {
        let reader = Arc::new(FakeReader::default());
        reader.set_allowance(U256::from(1000u64));
        reader.set_position(U256::from(7u64), U256::from(50u64), U256::from(300u64), U256::from(100u64));

        let cache = cache(reader.clone());
        assert!(cache.allowance().is_none());

        cache.refresh_all().await.unwrap();

        assert_eq!(cache.allowance().unwrap().value, U256::from(1000u64));
        let position = cache.position().unwrap();
        assert_eq!(position.value.wallet_balance, U256::from(7u64));
        assert_eq!(cache.redeemable(), Some(U256::from(150u64)));
    }

    #[tokio::test]
    async fn test_cached_allowance_is_used_until_invalidated() {
        let reader = Arc::new(FakeReader::default());
        reader.set_allowance(U256::from(10u64));
        let cache = cache(reader.clone());

        assert_eq!(cache.allowance_or_refresh().await.unwrap(), U256::from(10u64));
        let reads = reader.reads();

        reader.set_allowance(U256::from(20u64));
        assert_eq!(cache.allowance_or_refresh().await.unwrap(), U256::from(10u64));
        assert_eq!(reader.reads(), reads);

        cache.invalidate();
        assert!(cache.allowance().unwrap().stale);
        assert_eq!(cache.allowance_or_refresh().await.unwrap(), U256::from(20u64));
        assert!(!cache.allowance().unwrap().stale);
    }

    #[test]
    fn test_older_ticket_never_overwrites_newer() {
        let cache = cache(Arc::new(FakeReader::default()));
        let slow = cache.take_ticket();
        let fast = cache.take_ticket();

        assert!(cache.store_allowance(fast, U256::from(2u64)));
        assert!(!cache.store_allowance(slow, U256::from(1u64)));

        let entry = cache.allowance().unwrap();
        assert_eq!(entry.value, U256::from(2u64));
        assert_eq!(entry.version, fast);
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_previous_value() {
        let reader = Arc::new(FakeReader::default());
        reader.set_allowance(U256::from(5u64));
        let cache = cache(reader.clone());
        cache.refresh_allowance().await.unwrap();

        reader.fail_reads(true);
        assert!(cache.refresh_allowance().await.is_err());
        assert_eq!(cache.allowance().unwrap().value, U256::from(5u64));
    }
}
