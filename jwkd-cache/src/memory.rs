//! In-process cache store
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
use crate::store::{glob_match, CacheStore, ScanPage};
use async_trait::async_trait;
use dashmap::DashMap;
use std::time::{Duration, Instant};

/// Keys examined per scan call
pub const DEFAULT_SCAN_COUNT: usize = 10;

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// `DashMap`-backed store with per-entry TTLs and cursor scans.
///
/// A scan cursor is an offset into the sorted key space; each call examines
/// up to `scan_count` keys, so pages may come back empty before the scan ends.
#[derive(Debug)]
pub struct MemoryStore {
    prefix: String,
    entries: DashMap<String, Entry>,
    scan_count: usize,
}

impl MemoryStore {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            entries: DashMap::new(),
            scan_count: DEFAULT_SCAN_COUNT,
        }
    }

    pub fn with_scan_count(mut self, scan_count: usize) -> Self {
        self.scan_count = scan_count.max(1);
        self
    }

    fn raw_key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }

    /// Number of live entries
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries.iter().filter(|entry| !entry.is_expired(now)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new("")
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    fn prefix(&self) -> &str {
        &self.prefix
    }

    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        let raw = self.raw_key(key);
        let now = Instant::now();

        let value = match self.entries.get(&raw) {
            Some(entry) if !entry.is_expired(now) => Some(entry.value.clone()),
            Some(_) => None,
            None => return Ok(None),
        };
        if value.is_none() {
            self.entries.remove_if(&raw, |_, entry| entry.is_expired(now));
        }
        Ok(value)
    }

    async fn put(&self, key: &str, value: String, ttl: Option<Duration>) -> CacheResult<()> {
        let expires_at = ttl.map(|ttl| Instant::now() + ttl);
        self.entries.insert(self.raw_key(key), Entry { value, expires_at });
        Ok(())
    }

    async fn has(&self, key: &str) -> CacheResult<bool> {
        Ok(self.get(key).await?.is_some())
    }

    async fn forget(&self, key: &str) -> CacheResult<bool> {
        Ok(self.entries.remove(&self.raw_key(key)).is_some())
    }

    async fn scan(&self, cursor: u64, pattern: &str) -> CacheResult<Option<ScanPage>> {
        let now = Instant::now();
        let mut all: Vec<String> = self
            .entries
            .iter()
            .filter(|entry| !entry.is_expired(now))
            .map(|entry| entry.key().clone())
            .collect();
        all.sort_unstable();

        let start = usize::try_from(cursor).unwrap_or(usize::MAX).min(all.len());
        let end = start.saturating_add(self.scan_count).min(all.len());
        let keys = all[start..end]
            .iter()
            .filter(|key| glob_match(pattern, key))
            .cloned()
            .collect();
        let cursor = if end >= all.len() { 0 } else { end as u64 };

        Ok(Some(ScanPage { cursor, keys }))
    }
}
