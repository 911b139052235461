//! Key type definitions
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


use crate::error::{KeyError, KeyResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Name/value tags attached to a key at creation time
pub type Tags = BTreeMap<String, String>;

/// Raw JWK member mapping as persisted
pub type KeyData = Map<String, Value>;

/// Algorithm family of a key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyType {
    #[serde(rename = "RSA")]
    Rsa,
    #[serde(rename = "EC")]
    Ec,
    #[serde(rename = "OKP")]
    Okp,
    #[serde(rename = "OCT")]
    Oct,
}

impl KeyType {
    /// The `kty` value written into generated keys
    pub fn kty(&self) -> &'static str {
        match self {
            KeyType::Rsa => "RSA",
            KeyType::Ec => "EC",
            KeyType::Okp => "OKP",
            KeyType::Oct => "oct",
        }
    }
}

impl FromStr for KeyType {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "RSA" => Ok(KeyType::Rsa),
            "EC" => Ok(KeyType::Ec),
            "OKP" => Ok(KeyType::Okp),
            "OCT" => Ok(KeyType::Oct),
            _ => Err(KeyError::UnsupportedKeyType(s.to_string())),
        }
    }
}

impl fmt::Display for KeyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.kty())
    }
}

/// A JSON Web Key: an ordered mapping of JWK members
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Jwk(KeyData);

impl Jwk {
    pub fn from_map(members: KeyData) -> Self {
        Self(members)
    }

    pub fn get(&self, member: &str) -> Option<&Value> {
        self.0.get(member)
    }

    /// String value of a member, if present and a string
    pub fn get_str(&self, member: &str) -> Option<&str> {
        self.0.get(member).and_then(Value::as_str)
    }

    pub fn has(&self, member: &str) -> bool {
        self.0.contains_key(member)
    }

    pub fn kty(&self) -> Option<&str> {
        self.get_str("kty")
    }

    pub fn kid(&self) -> Option<&str> {
        self.get_str("kid")
    }

    pub fn insert(&mut self, member: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(member.into(), value.into());
    }

    pub fn members(&self) -> &KeyData {
        &self.0
    }

    pub fn into_map(self) -> KeyData {
        self.0
    }
}

/// An ordered collection of keys, serialized as `{"keys": [...]}`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JwkSet {
    pub keys: Vec<Jwk>,
}

impl JwkSet {
    pub fn new(keys: Vec<Jwk>) -> Self {
        Self { keys }
    }

    /// Rebuild a key set from its JSON form (e.g. a cached entry)
    pub fn from_json(value: Value) -> KeyResult<Self> {
        Ok(serde_json::from_value(value)?)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

impl FromIterator<Jwk> for JwkSet {
    fn from_iter<I: IntoIterator<Item = Jwk>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

/// A single key or a key set, as handed to the encryptor or returned to callers
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum KeyPayload {
    Key(Jwk),
    Set(JwkSet),
}

impl From<Jwk> for KeyPayload {
    fn from(jwk: Jwk) -> Self {
        KeyPayload::Key(jwk)
    }
}

impl From<JwkSet> for KeyPayload {
    fn from(set: JwkSet) -> Self {
        KeyPayload::Set(set)
    }
}

/// Lifecycle state of a stored key. A purged key no longer exists at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyState {
    Active,
    Revoked,
    Deleted,
}

/// A persisted key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyRecord {
    pub id: Uuid,
    /// `kty` of the key material
    pub key_type: String,
    pub key_data: KeyData,
    /// RFC 7638 thumbprint; unique and fixed at creation
    pub thumbprint: String,
    pub revoked_at: Option<DateTime<Utc>>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub tags: Tags,
}

impl KeyRecord {
    pub fn state(&self) -> KeyState {
        if self.deleted_at.is_some() {
            KeyState::Deleted
        } else if self.revoked_at.is_some() {
            KeyState::Revoked
        } else {
            KeyState::Active
        }
    }

    pub fn is_revoked(&self) -> bool {
        self.revoked_at.is_some()
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Whether the key was revoked more than `days` whole days before `now`
    pub fn can_be_cleaned_up(&self, days: i64, now: DateTime<Utc>) -> bool {
        match self.revoked_at {
            Some(revoked_at) => (now - revoked_at).num_days() > days,
            None => false,
        }
    }
}

/// How a query treats keys carrying a lifecycle marker
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Inclusion {
    #[default]
    Exclude,
    Include,
    Only,
}

impl Inclusion {
    fn admits(&self, marked: bool) -> bool {
        match self {
            Inclusion::Exclude => !marked,
            Inclusion::Include => true,
            Inclusion::Only => marked,
        }
    }
}

/// Query filter for key lookups. The default matches active keys only.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyFilter {
    pub tags: Tags,
    pub revoked: Inclusion,
    pub trashed: Inclusion,
}

impl KeyFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tags(mut self, tags: Tags) -> Self {
        self.tags = tags;
        self
    }

    /// Also match revoked keys. An earlier `only_revoked` wins.
    pub fn include_revoked(mut self) -> Self {
        if self.revoked != Inclusion::Only {
            self.revoked = Inclusion::Include;
        }
        self
    }

    pub fn only_revoked(mut self) -> Self {
        self.revoked = Inclusion::Only;
        self
    }

    /// Also match soft-deleted keys. An earlier `only_trashed` wins.
    pub fn include_trashed(mut self) -> Self {
        if self.trashed != Inclusion::Only {
            self.trashed = Inclusion::Include;
        }
        self
    }

    pub fn only_trashed(mut self) -> Self {
        self.trashed = Inclusion::Only;
        self
    }

    pub fn matches(&self, record: &KeyRecord) -> bool {
        self.revoked.admits(record.is_revoked())
            && self.trashed.admits(record.is_deleted())
            && self
                .tags
                .iter()
                .all(|(name, value)| record.tags.get(name) == Some(value))
    }
}

/// A key addressed either by id/thumbprint or by an already loaded record
#[derive(Debug, Clone)]
pub enum KeyRef {
    Id(String),
    Record(Box<KeyRecord>),
}

impl From<&str> for KeyRef {
    fn from(id: &str) -> Self {
        KeyRef::Id(id.to_string())
    }
}

impl From<String> for KeyRef {
    fn from(id: String) -> Self {
        KeyRef::Id(id)
    }
}

impl From<KeyRecord> for KeyRef {
    fn from(record: KeyRecord) -> Self {
        KeyRef::Record(Box::new(record))
    }
}

/// A persisted transport encryption secret, looked up by its hash
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncryptionKeyRecord {
    pub id: Uuid,
    pub key: String,
    pub hash: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn record(revoked: bool, deleted: bool, tags: &[(&str, &str)]) -> KeyRecord {
        let now = Utc::now();
        KeyRecord {
            id: Uuid::new_v4(),
            key_type: "EC".to_string(),
            key_data: KeyData::new(),
            thumbprint: Uuid::new_v4().to_string(),
            revoked_at: revoked.then_some(now),
            deleted_at: deleted.then_some(now),
            created_at: now,
            updated_at: now,
            tags: tags
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    #[test]
    fn test_key_type_parsing_is_case_insensitive() {
        assert_eq!("rsa".parse::<KeyType>().unwrap(), KeyType::Rsa);
        assert_eq!("Oct".parse::<KeyType>().unwrap(), KeyType::Oct);
        assert!(matches!(
            "dsa".parse::<KeyType>(),
            Err(KeyError::UnsupportedKeyType(_))
        ));
    }

    #[test]
    fn test_state_prefers_deleted_over_revoked() {
        assert_eq!(record(false, false, &[]).state(), KeyState::Active);
        assert_eq!(record(true, false, &[]).state(), KeyState::Revoked);
        assert_eq!(record(true, true, &[]).state(), KeyState::Deleted);
    }

    #[test]
    fn test_default_filter_matches_active_only() {
        let filter = KeyFilter::new();
        assert!(filter.matches(&record(false, false, &[])));
        assert!(!filter.matches(&record(true, false, &[])));
        assert!(!filter.matches(&record(false, true, &[])));
    }

    #[test]
    fn test_only_wins_over_include() {
        let a = KeyFilter::new().only_revoked().include_revoked();
        let b = KeyFilter::new().include_revoked().only_revoked();
        assert_eq!(a.revoked, Inclusion::Only);
        assert_eq!(b.revoked, Inclusion::Only);
        assert!(!a.matches(&record(false, false, &[])));
        assert!(a.matches(&record(true, false, &[])));
    }

    #[test]
    fn test_tag_filter_requires_every_tag() {
        let mut tags = Tags::new();
        tags.insert("env".into(), "prod".into());
        tags.insert("team".into(), "auth".into());
        let filter = KeyFilter::new().with_tags(tags);

        assert!(filter.matches(&record(false, false, &[("env", "prod"), ("team", "auth")])));
        assert!(!filter.matches(&record(false, false, &[("env", "prod")])));
        assert!(!filter.matches(&record(false, false, &[("env", "dev"), ("team", "auth")])));
    }

    #[test]
    fn test_cleanup_window() {
        let now = Utc::now();
        let mut key = record(false, false, &[]);
        assert!(!key.can_be_cleaned_up(30, now));

        key.revoked_at = Some(now - Duration::days(31));
        assert!(key.can_be_cleaned_up(30, now));

        key.revoked_at = Some(now - Duration::days(10));
        assert!(!key.can_be_cleaned_up(30, now));
    }

    #[test]
    fn test_key_set_serializes_under_keys() {
        let mut jwk = Jwk::default();
        jwk.insert("kty", "oct");
        let set = JwkSet::new(vec![jwk]);
        let json = serde_json::to_value(&set).unwrap();
        assert_eq!(json["keys"][0]["kty"], "oct");
        assert_eq!(JwkSet::from_json(json).unwrap(), set);
    }
}
