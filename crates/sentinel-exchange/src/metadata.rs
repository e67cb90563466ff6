//! Asset metadata cache.
//!
//! Caches per-symbol exchange constraints and detects material
//! parameter changes (tick size, size decimals) between refreshes.
//! A changed constraint means every rounded price and size in flight was
//! computed against stale rules, so the refresh surfaces an error for the
//! caller to halt on rather than silently adopting the new values.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use sentinel_core::AssetMetadata;
use tracing::error;

use crate::client::ExchangeClient;
use crate::error::{ExchangeError, ExchangeResult};

/// Cache entry with change tracking.
#[derive(Debug, Clone)]
pub struct MetadataEntry {
    pub metadata: AssetMetadata,
    pub last_update: DateTime<Utc>,
    pub version: u64,
}

/// Asset metadata cache.
#[derive(Debug, Default)]
pub struct MetadataCache {
    entries: DashMap<String, MetadataEntry>,
}

impl MetadataCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get cached metadata for a symbol.
    #[must_use]
    pub fn get(&self, symbol: &str) -> Option<AssetMetadata> {
        self.entries.get(symbol).map(|e| e.metadata.clone())
    }

    /// Update metadata and detect material changes.
    ///
    /// Returns `Err(ParamChange)` if tick size or size precision changed.
    pub fn update(&self, metadata: AssetMetadata) -> ExchangeResult<()> {
        let symbol = metadata.symbol.clone();
        if let Some(existing) = self.entries.get(&symbol) {
            if existing.metadata.has_material_change(&metadata) {
                let msg = format!(
                    "{symbol}: tick_size {}->{}, sz_decimals {}->{}",
                    existing.metadata.tick_size,
                    metadata.tick_size,
                    existing.metadata.sz_decimals,
                    metadata.sz_decimals
                );
                error!(%msg, "PARAMETER CHANGE DETECTED");
                return Err(ExchangeError::ParamChange(msg));
            }
        }

        let version = self.entries.get(&symbol).map(|e| e.version + 1).unwrap_or(1);
        self.entries.insert(
            symbol,
            MetadataEntry {
                metadata,
                last_update: Utc::now(),
                version,
            },
        );
        Ok(())
    }

    /// Get cached metadata, fetching and caching it on a miss.
    pub async fn get_or_fetch(
        &self,
        client: &dyn ExchangeClient,
        symbol: &str,
    ) -> ExchangeResult<AssetMetadata> {
        if let Some(metadata) = self.get(symbol) {
            return Ok(metadata);
        }
        let metadata = client.asset_metadata(symbol).await?;
        self.update(metadata.clone())?;
        Ok(metadata)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use sentinel_core::Price;

    fn meta(tick: rust_decimal::Decimal) -> AssetMetadata {
        AssetMetadata {
            symbol: "BTC".to_string(),
            tick_size: Price::new(tick),
            sz_decimals: 3,
            max_leverage: 50,
        }
    }

    #[test]
    fn test_update_and_get() {
        let cache = MetadataCache::new();
        assert!(cache.get("BTC").is_none());

        cache.update(meta(dec!(0.5))).unwrap();
        assert_eq!(cache.get("BTC").unwrap().tick_size.0, dec!(0.5));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_same_params_bump_version_silently() {
        let cache = MetadataCache::new();
        cache.update(meta(dec!(0.5))).unwrap();
        cache.update(meta(dec!(0.5))).unwrap();
        assert_eq!(cache.entries.get("BTC").unwrap().version, 2);
    }

    #[test]
    fn test_material_change_is_error() {
        let cache = MetadataCache::new();
        cache.update(meta(dec!(0.5))).unwrap();

        let result = cache.update(meta(dec!(0.1)));
        assert!(matches!(result, Err(ExchangeError::ParamChange(_))));
        // Old entry is kept
        assert_eq!(cache.get("BTC").unwrap().tick_size.0, dec!(0.5));
    }
}
