//! Key/value store abstraction underneath the key cache
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
use async_trait::async_trait;
use std::time::Duration;

/// One page of a cursor scan
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanPage {
    /// Cursor for the next call; 0 when the scan is complete
    pub cursor: u64,
    /// Raw keys, store prefix included
    pub keys: Vec<String>,
}

/// A prefixed key/value store with TTLs.
///
/// `get`, `put`, `has` and `forget` take keys without the store prefix and add
/// it themselves. `scan` works on raw keys: the pattern and the returned keys
/// both carry the prefix.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Prefix the store adds to every key
    fn prefix(&self) -> &str;

    async fn get(&self, key: &str) -> CacheResult<Option<String>>;

    /// Store a value; `None` keeps it until removed
    async fn put(&self, key: &str, value: String, ttl: Option<Duration>) -> CacheResult<()>;

    async fn has(&self, key: &str) -> CacheResult<bool>;

    /// Remove a key. Returns whether anything was removed.
    async fn forget(&self, key: &str) -> CacheResult<bool>;

    /// One page of keys matching a glob `pattern` (`*` and `?`), starting at
    /// `cursor` (0 to start). `None` when the store cannot scan.
    async fn scan(&self, cursor: u64, pattern: &str) -> CacheResult<Option<ScanPage>>;
}

/// Glob match supporting `*` (any run) and `?` (any single character)
pub fn glob_match(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();

    let (mut p, mut t) = (0, 0);
    let mut backtrack: Option<(usize, usize)> = None;

    while t < text.len() {
        if p < pattern.len() && (pattern[p] == '?' || pattern[p] == text[t]) {
            p += 1;
            t += 1;
        } else if p < pattern.len() && pattern[p] == '*' {
            backtrack = Some((p, t));
            p += 1;
        } else if let Some((star, matched)) = backtrack {
            // Let the last star absorb one more character
            p = star + 1;
            t = matched + 1;
            backtrack = Some((star, matched + 1));
        } else {
            return false;
        }
    }

    pattern[p..].iter().all(|&c| c == '*')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_glob_match() {
        assert!(glob_match("cache:keys:list:*", "cache:keys:list:all"));
        assert!(glob_match("cache:keys:list:*", "cache:keys:list:"));
        assert!(!glob_match("cache:keys:list:*", "cache:keys:single_key:abc"));
        assert!(glob_match("keys:*", "keys:list:public:abc"));
        assert!(glob_match("a?c", "abc"));
        assert!(!glob_match("a?c", "ac"));
        assert!(glob_match("*:all", "keys:list:all"));
        assert!(glob_match("*", ""));
        assert!(!glob_match("", "x"));
    }
}
