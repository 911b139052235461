//! Grouped JSON cache for keys and key sets
//!
//! Entries live under `<store prefix>keys:<group>:<key>`. Groups can be
//! enumerated and purged as a whole, which requires a store that can scan.
// Copyright 2025 Francisco F. Pinochet
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.


use crate::error::CacheResult;
use crate::scan::ScanIter;
use crate::store::CacheStore;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Namespace for every entry written by [`KeyCache`]
pub const KEY_CACHE_PREFIX: &str = "keys";

/// Group matching every entry
pub const ALL_GROUPS: &str = "*";

#[derive(Clone)]
pub struct KeyCache {
    store: Arc<dyn CacheStore>,
    prefix: String,
    default_ttl: Option<Duration>,
}

impl KeyCache {
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Self {
            store,
            prefix: KEY_CACHE_PREFIX.to_string(),
            default_ttl: None,
        }
    }

    /// TTL used by [`KeyCache::store`] when none is given
    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = Some(ttl);
        self
    }

    /// `keys:` followed by the non-empty segments joined with `:`
    pub fn format_key(&self, segments: &[&str]) -> String {
        let joined = segments
            .iter()
            .filter(|segment| !segment.is_empty())
            .copied()
            .collect::<Vec<_>>()
            .join(":");
        format!("{}:{}", self.prefix, joined)
    }

    /// Decoded entry, or `None` on a miss
    pub async fn get<T: DeserializeOwned>(&self, group: &str, key: &str) -> CacheResult<Option<T>> {
        match self.store.get(&self.format_key(&[group, key])).await? {
            Some(data) => Ok(Some(serde_json::from_str(&data)?)),
            None => Ok(None),
        }
    }

    pub async fn store<T: Serialize + ?Sized>(
        &self,
        group: &str,
        key: &str,
        data: &T,
        ttl: Option<Duration>,
    ) -> CacheResult<()> {
        let encoded = serde_json::to_string(data)?;
        self.store
            .put(&self.format_key(&[group, key]), encoded, ttl.or(self.default_ttl))
            .await
    }

    pub async fn has(&self, group: &str, key: &str) -> CacheResult<bool> {
        self.store.has(&self.format_key(&[group, key])).await
    }

    /// Remove one entry; an empty `key` addresses the group entry itself
    pub async fn delete(&self, group: &str, key: &str) -> CacheResult<bool> {
        self.store.forget(&self.format_key(&[group, key])).await
    }

    /// Remove every entry in `group`.
    ///
    /// Stops at the first entry that cannot be removed and returns `false`;
    /// entries removed before that stay removed.
    pub async fn purge(&self, group: &str) -> CacheResult<bool> {
        let keys = self.keys(group).await?;

        for key in &keys {
            let prefixed = format!("{}:{}", self.prefix, key);
            if !self.store.forget(&prefixed).await? {
                warn!(group, key = %key, "Failed to remove cache entry, stopping purge");
                return Ok(false);
            }
        }

        debug!(group, removed = keys.len(), "Purged cache group");
        Ok(true)
    }

    /// Remove every entry written by the key cache
    pub async fn flush(&self) -> CacheResult<bool> {
        self.purge(ALL_GROUPS).await
    }

    /// Keys stored in `group`, without the store or cache prefix
    pub async fn keys(&self, group: &str) -> CacheResult<Vec<String>> {
        let cache_key = if group == ALL_GROUPS {
            self.format_key(&[group])
        } else {
            self.format_key(&[group, "*"])
        };
        let pattern = format!("{}{}", self.store.prefix(), cache_key);

        let raw = ScanIter::new(self.store.as_ref(), pattern).collect_keys().await?;

        let store_prefix = self.store.prefix();
        let cache_prefix = format!("{}:", self.prefix);
        Ok(raw
            .into_iter()
            .map(|key| {
                let key = key.strip_prefix(store_prefix).unwrap_or(&key);
                key.strip_prefix(cache_prefix.as_str()).unwrap_or(key).to_string()
            })
            .collect())
    }
}
