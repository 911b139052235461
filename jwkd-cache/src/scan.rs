//! Cursor-driven key enumeration
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


use crate::error::{CacheError, CacheResult};
use crate::store::CacheStore;
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScanState {
    Start,
    Continue(u64),
    Done,
}

/// Lazily walks a store's key space one page at a time until the cursor
/// returns to 0
pub struct ScanIter<'a> {
    store: &'a dyn CacheStore,
    pattern: String,
    state: ScanState,
}

impl<'a> ScanIter<'a> {
    pub fn new(store: &'a dyn CacheStore, pattern: impl Into<String>) -> Self {
        Self {
            store,
            pattern: pattern.into(),
            state: ScanState::Start,
        }
    }

    /// Next page of raw keys; `None` once the scan is complete
    pub async fn next_page(&mut self) -> CacheResult<Option<Vec<String>>> {
        let cursor = match self.state {
            ScanState::Start => 0,
            ScanState::Continue(cursor) => cursor,
            ScanState::Done => return Ok(None),
        };

        let page = self
            .store
            .scan(cursor, &self.pattern)
            .await?
            .ok_or(CacheError::ScanUnsupported)?;

        self.state = match page.cursor {
            0 => ScanState::Done,
            next => ScanState::Continue(next),
        };
        Ok(Some(page.keys))
    }

    /// Drain the scan, dropping duplicates while keeping first-seen order
    pub async fn collect_keys(mut self) -> CacheResult<Vec<String>> {
        let mut seen = HashSet::new();
        let mut keys = Vec::new();
        while let Some(page) = self.next_page().await? {
            for key in page {
                if seen.insert(key.clone()) {
                    keys.push(key);
                }
            }
        }
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::ScanPage;
    use async_trait::async_trait;
    use std::time::Duration;

    /// Replays fixed pages, repeating a key across pages as real stores may
    struct ScriptedStore;

    #[async_trait]
    impl CacheStore for ScriptedStore {
        fn prefix(&self) -> &str {
            ""
        }
        async fn get(&self, _key: &str) -> CacheResult<Option<String>> {
            Ok(None)
        }
        async fn put(&self, _key: &str, _value: String, _ttl: Option<Duration>) -> CacheResult<()> {
            Ok(())
        }
        async fn has(&self, _key: &str) -> CacheResult<bool> {
            Ok(false)
        }
        async fn forget(&self, _key: &str) -> CacheResult<bool> {
            Ok(false)
        }
        async fn scan(&self, cursor: u64, _pattern: &str) -> CacheResult<Option<ScanPage>> {
            let page = match cursor {
                0 => ScanPage { cursor: 17, keys: vec!["a".into(), "b".into()] },
                17 => ScanPage { cursor: 4, keys: vec![] },
                _ => ScanPage { cursor: 0, keys: vec!["b".into(), "c".into()] },
            };
            Ok(Some(page))
        }
    }

    #[tokio::test]
    async fn test_follows_cursor_until_zero() {
        let store = ScriptedStore;
        let mut scan = ScanIter::new(&store, "*");
        assert_eq!(scan.next_page().await.unwrap(), Some(vec!["a".to_string(), "b".to_string()]));
        assert_eq!(scan.next_page().await.unwrap(), Some(vec![]));
        assert_eq!(scan.next_page().await.unwrap(), Some(vec!["b".to_string(), "c".to_string()]));
        assert_eq!(scan.next_page().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_collect_dedupes() {
        let store = ScriptedStore;
        let keys = ScanIter::new(&store, "*").collect_keys().await.unwrap();
        assert_eq!(keys, vec!["a", "b", "c"]);
    }
}
