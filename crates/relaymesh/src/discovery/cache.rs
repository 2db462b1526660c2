// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Persisted record of the last channel a Master was successfully found on
//! (§3.6).

use std::sync::Arc;

use crate::credentials::Nvs;
use crate::error::Result;

const NAMESPACE: &str = "mcd_cache";
const KEY_CHANNEL: &str = "channel";
const KEY_LAST_SUCCESS: &str = "last_success";
const KEY_USAGE_COUNT: &str = "usage_count";
const KEY_SUCCESS_RATE: &str = "success_rate";

/// A snapshot of the persisted channel cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelCacheEntry {
    /// Channel the Master was last found on.
    pub last_channel: u8,
    /// Monotonic ms (caller's clock epoch) of the last success.
    pub last_success_epoch: u32,
    /// Number of times this cache entry has been used.
    pub usage_count: u32,
    /// Rolling estimate of hit probability, `0..=100`.
    pub success_rate: u8,
}

/// Reads and updates the persisted channel cache.
#[derive(Clone)]
pub struct ChannelCache {
    nvs: Arc<Nvs>,
}

impl ChannelCache {
    /// Build a cache backed by `nvs`.
    pub fn new(nvs: Arc<Nvs>) -> Self {
        Self { nvs }
    }

    /// Read the current cache entry, if one is persisted and valid.
    pub fn load(&self) -> Result<Option<ChannelCacheEntry>> {
        let channel = self.nvs.get(NAMESPACE, KEY_CHANNEL)?.and_then(|v| v.as_u64());
        let Some(channel) = channel else {
            return Ok(None);
        };
        if !(1..=13).contains(&channel) {
            return Ok(None);
        }
        let last_success = self
            .nvs
            .get(NAMESPACE, KEY_LAST_SUCCESS)?
            .and_then(|v| v.as_u64())
            .unwrap_or(0);
        let usage_count = self
            .nvs
            .get(NAMESPACE, KEY_USAGE_COUNT)?
            .and_then(|v| v.as_u64())
            .unwrap_or(0);
        let success_rate = self
            .nvs
            .get(NAMESPACE, KEY_SUCCESS_RATE)?
            .and_then(|v| v.as_u64())
            .unwrap_or(0);

        Ok(Some(ChannelCacheEntry {
            last_channel: channel as u8,
            last_success_epoch: last_success as u32,
            usage_count: usage_count as u32,
            success_rate: success_rate as u8,
        }))
    }

    /// Record a successful discovery on `channel`, bumping `success_rate`
    /// by `step` (clamped to `0..=100`) and incrementing `usage_count`.
    pub fn record_success(&self, channel: u8, now: u32, step: i32) -> Result<()> {
        let prior = self.load()?;
        let prior_rate = prior.map(|e| e.success_rate).unwrap_or(0) as i32;
        let prior_usage = prior.map(|e| e.usage_count).unwrap_or(0);
        let new_rate = (prior_rate + step).clamp(0, 100) as u64;

        self.nvs.set(NAMESPACE, KEY_CHANNEL, (channel as u64).into())?;
        self.nvs.set(NAMESPACE, KEY_LAST_SUCCESS, (now as u64).into())?;
        self.nvs
            .set(NAMESPACE, KEY_USAGE_COUNT, (prior_usage as u64 + 1).into())?;
        self.nvs.set(NAMESPACE, KEY_SUCCESS_RATE, new_rate.into())?;
        Ok(())
    }

    /// Record a total sweep failure: drop `success_rate` by 20, floored at 0.
    pub fn record_failure(&self) -> Result<()> {
        let prior_rate = self.load()?.map(|e| e.success_rate).unwrap_or(0) as i32;
        let new_rate = (prior_rate - 20).max(0) as u64;
        self.nvs.set(NAMESPACE, KEY_SUCCESS_RATE, new_rate.into())?;
        Ok(())
    }

    /// Clear the cache (operator command).
    pub fn clear(&self) -> Result<()> {
        self.nvs.clear(NAMESPACE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache() -> ChannelCache {
        let dir = tempfile::tempdir().unwrap();
        ChannelCache::new(Arc::new(Nvs::new(dir.into_path())))
    }

    #[test]
    fn test_record_success_updates_fields() {
        let cache = cache();
        cache.record_success(6, 1_000, 10).unwrap();
        let entry = cache.load().unwrap().unwrap();
        assert_eq!(entry.last_channel, 6);
        assert_eq!(entry.success_rate, 10);
        assert_eq!(entry.usage_count, 1);
    }

    #[test]
    fn test_record_failure_floors_at_zero() {
        let cache = cache();
        cache.record_success(6, 0, 10).unwrap();
        for _ in 0..3 {
            cache.record_failure().unwrap();
        }
        let entry = cache.load().unwrap().unwrap();
        assert_eq!(entry.success_rate, 0);
    }
}
