//! Key lifecycle orchestration
//!
//! Ties the repository, generator, encryptor and cache together. Every write
//! invalidates the cached key listings once it has been committed.
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


use chrono::Utc;
use jwkd_cache::KeyCache;
use jwkd_keys::algebra::{self, create_key_set, to_representation};
use jwkd_keys::{
    generate_encryption_key, EncryptionKeyPair, EncryptionKeyRepository, Jwk, JwkSet, KeyError,
    KeyFilter, KeyGenerator, KeyOptions, KeyRecord, KeyRef, KeyRepository, KeyResult,
    KeySetEncryptor, KeyWrite, Sealed, Tags,
};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Cache group holding key listings
pub const LIST_GROUP: &str = "list";

/// Revoked keys older than this many days are cleaned up by default
pub const DEFAULT_CLEANUP_DAYS: i64 = 30;

/// Which keys a listing returns and in what form
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListKind {
    /// Active keys in private form plus revoked keys in public form
    All,
    /// Active keys in private form
    Private,
    /// Active and revoked keys in public form
    Public,
}

impl ListKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ListKind::All => "all",
            ListKind::Private => "private",
            ListKind::Public => "public",
        }
    }

    fn include_revoked(&self) -> bool {
        matches!(self, ListKind::All | ListKind::Public)
    }

    fn force_public(&self) -> bool {
        matches!(self, ListKind::Public)
    }

    /// Listings carrying private material are encrypted when encryption is on
    fn encryptable(&self) -> bool {
        matches!(self, ListKind::All | ListKind::Private)
    }
}

impl FromStr for ListKind {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "all" => Ok(ListKind::All),
            "private" => Ok(ListKind::Private),
            "public" => Ok(ListKind::Public),
            other => Err(KeyError::Validation(format!("unknown key listing '{}'", other))),
        }
    }
}

impl fmt::Display for ListKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifiers of a newly created key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedKey {
    pub id: Uuid,
    pub thumbprint: String,
}

impl From<&KeyRecord> for CreatedKey {
    fn from(record: &KeyRecord) -> Self {
        Self {
            id: record.id,
            thumbprint: record.thumbprint.clone(),
        }
    }
}

/// Cache key for a listing: the kind, plus a digest of the tag filter if any
pub fn list_cache_key(kind: ListKind, tags: &Tags) -> String {
    if tags.is_empty() {
        return kind.as_str().to_string();
    }
    // Tags is a BTreeMap, so the JSON is already sorted by name
    let encoded = serde_json::to_string(tags).unwrap_or_default();
    format!("{}:{}", kind, hex::encode(Sha256::digest(encoded.as_bytes())))
}

pub struct KeyService {
    repository: Arc<dyn KeyRepository>,
    encryption_keys: Arc<dyn EncryptionKeyRepository>,
    generator: KeyGenerator,
    encryptor: KeySetEncryptor,
    cache: KeyCache,
}

impl KeyService {
    pub fn new(
        repository: Arc<dyn KeyRepository>,
        encryption_keys: Arc<dyn EncryptionKeyRepository>,
        generator: KeyGenerator,
        encryptor: KeySetEncryptor,
        cache: KeyCache,
    ) -> Self {
        Self {
            repository,
            encryption_keys,
            generator,
            encryptor,
            cache,
        }
    }

    /// List keys, from the cache when possible.
    ///
    /// `encryption_key` is the hash of a registered transport secret. It is
    /// required for `all` and `private` listings while encryption is enabled.
    pub async fn list_keys(
        &self,
        kind: ListKind,
        tags: Tags,
        encryption_key: Option<&str>,
    ) -> KeyResult<Sealed> {
        if !self.encryptor.is_enabled() || !kind.encryptable() {
            return Ok(Sealed::Plain(self.key_listing(kind, &tags).await?.into()));
        }

        let hash = encryption_key
            .filter(|hash| !hash.is_empty())
            .ok_or_else(|| KeyError::Validation("No encryption key has been provided".to_string()))?;
        let secret = self.encryption_secret(hash).await?;
        let set = self.key_listing(kind, &tags).await?;
        self.seal(set, &secret)
    }

    /// Fetch one key by id or thumbprint, revoked keys included.
    ///
    /// Active keys are returned in private form, encrypted, when encryption is
    /// enabled and a transport key is given. Everything else is public.
    pub async fn get_single_key(&self, key_id: &str, encryption_key: Option<&str>) -> KeyResult<Sealed> {
        let record = self
            .repository
            .get_single_key(key_id, &KeyFilter::new().include_revoked())
            .await?;

        let hash = encryption_key.filter(|hash| !hash.is_empty());
        match hash {
            Some(hash) if self.encryptor.is_enabled() && !record.is_revoked() => {
                let secret = self.encryption_secret(hash).await?;
                let set = create_key_set([to_representation(&record, false)?]);
                self.seal(set, &secret)
            }
            _ => {
                let set = create_key_set([to_representation(&record, true)?]);
                Ok(Sealed::Plain(set.into()))
            }
        }
    }

    /// Generate a key, store it with `tags` and return its identifiers
    pub async fn generate_key(&self, options: KeyOptions, tags: Tags) -> KeyResult<CreatedKey> {
        let jwk = self.generate_blocking(options).await?;
        let record = self
            .repository
            .create_key(algebra::to_storable_data(&jwk), tags)
            .await?;

        info!(
            key_id = %record.id,
            thumbprint = %record.thumbprint,
            key_type = %record.key_type,
            "Key generated"
        );
        self.purge_listings().await;
        Ok(CreatedKey::from(&record))
    }

    /// Revoke an active key and create its replacement with the same
    /// parameters and tags, in one commit
    pub async fn rotate_key(&self, key_id: &str) -> KeyResult<CreatedKey> {
        let old = self.repository.get_single_key(key_id, &KeyFilter::new()).await?;
        let params = self.generator.get_key_params(&to_representation(&old, false)?)?;
        let jwk = self.generate_blocking(params).await?;

        let created = self
            .repository
            .commit(vec![
                KeyWrite::Revoke(old.id),
                KeyWrite::Create {
                    key_data: algebra::to_storable_data(&jwk),
                    tags: old.tags.clone(),
                },
            ])
            .await?;
        let record = created
            .first()
            .ok_or_else(|| KeyError::Persistence("The key was unable to be rotated".to_string()))?;

        info!(
            old_key_id = %old.id,
            key_id = %record.id,
            thumbprint = %record.thumbprint,
            "Key rotated"
        );
        self.purge_listings().await;
        Ok(CreatedKey::from(record))
    }

    pub async fn revoke_key(&self, key_id: &str) -> KeyResult<()> {
        let record = self.repository.get_single_key(key_id, &KeyFilter::new()).await?;
        let id = record.id;
        self.repository.revoke_key(record.into()).await?;

        info!(key_id = %id, "Key revoked");
        self.purge_listings().await;
        Ok(())
    }

    /// Soft delete a key (active or revoked), or remove it for good with `force`
    pub async fn delete_key(&self, key_id: &str, force: bool) -> KeyResult<()> {
        let record = self
            .repository
            .get_single_key(key_id, &KeyFilter::new().include_revoked())
            .await?;
        let id = record.id;

        if force {
            self.repository.force_delete_key(vec![record.into()]).await?;
        } else {
            self.repository.delete_key(vec![record.into()]).await?;
        }

        info!(key_id = %id, force, "Key deleted");
        self.purge_listings().await;
        Ok(())
    }

    /// Delete keys revoked more than `days` days ago. Returns how many went.
    pub async fn cleanup_keys(&self, tags: Tags, days: i64, force: bool) -> KeyResult<usize> {
        let now = Utc::now();
        let expired: Vec<KeyRef> = self
            .repository
            .get_all(&KeyFilter::new().with_tags(tags).only_revoked())
            .await?
            .into_iter()
            .filter(|record| record.can_be_cleaned_up(days, now))
            .map(KeyRef::from)
            .collect();
        let count = expired.len();

        if force {
            self.repository.force_delete_key(expired).await?;
        } else {
            self.repository.delete_key(expired).await?;
        }

        info!(removed = count, days, force, "Revoked keys cleaned up");
        self.purge_listings().await;
        Ok(count)
    }

    /// Create and store a transport secret bound to the client's `secret`
    pub async fn register_encryption_key(&self, secret: &str) -> KeyResult<EncryptionKeyPair> {
        let pair = generate_encryption_key(secret)?;
        self.encryption_keys
            .create_encryption_key(&pair.key, &pair.hash)
            .await?;

        debug!("Encryption key registered");
        Ok(pair)
    }

    /// Build the key set for a listing, reading through the cache
    async fn key_listing(&self, kind: ListKind, tags: &Tags) -> KeyResult<JwkSet> {
        let cache_key = list_cache_key(kind, tags);

        match self.cache.get::<serde_json::Value>(LIST_GROUP, &cache_key).await {
            Ok(Some(cached)) => match JwkSet::from_json(cached) {
                Ok(set) => {
                    debug!(cache_key = %cache_key, "Key listing served from cache");
                    return Ok(set);
                }
                Err(e) => warn!(error = %e, cache_key = %cache_key, "Ignoring malformed cached listing"),
            },
            Ok(None) => {}
            Err(e) => warn!(error = %e, cache_key = %cache_key, "Cache read failed"),
        }

        let mut filter = KeyFilter::new().with_tags(tags.clone());
        if kind.include_revoked() {
            filter = filter.include_revoked();
        }

        let mut keys: Vec<Jwk> = Vec::new();
        for record in self.repository.get_all(&filter).await? {
            match to_representation(&record, kind.force_public()) {
                Ok(jwk) => keys.push(jwk),
                Err(KeyError::UnsupportedOperation(_)) => {
                    debug!(key_id = %record.id, "Skipping key without a public form");
                }
                Err(e) => return Err(e),
            }
        }
        let set = create_key_set(keys);

        if !set.is_empty() {
            if let Err(e) = self.cache.store(LIST_GROUP, &cache_key, &set, None).await {
                warn!(error = %e, cache_key = %cache_key, "Cache write failed");
            }
        }
        Ok(set)
    }

    async fn encryption_secret(&self, hash: &str) -> KeyResult<String> {
        match self.encryption_keys.get_encryption_key(hash).await {
            Ok(secret) => Ok(secret),
            Err(KeyError::NotFound(_)) => {
                Err(KeyError::Validation("Invalid encryption key".to_string()))
            }
            Err(e) => Err(e),
        }
    }

    fn seal(&self, set: JwkSet, secret: &str) -> KeyResult<Sealed> {
        self.encryptor
            .encrypt_key_set(set.into(), Some(secret))?
            .ok_or_else(|| KeyError::Validation("Invalid encryption key".to_string()))
    }

    /// RSA generation is CPU-bound, so all generation runs off the runtime threads
    async fn generate_blocking(&self, options: KeyOptions) -> KeyResult<Jwk> {
        let generator = self.generator.clone();
        tokio::task::spawn_blocking(move || generator.generate(&options))
            .await
            .map_err(|e| KeyError::Internal(format!("key generation task failed: {}", e)))?
    }

    /// Drop cached listings after a committed write. Failures are logged only.
    async fn purge_listings(&self) {
        match self.cache.purge(LIST_GROUP).await {
            Ok(true) => {}
            Ok(false) => warn!("Key listing cache was only partially purged"),
            Err(e) => warn!(error = %e, "Failed to purge key listing cache"),
        }
    }
}
