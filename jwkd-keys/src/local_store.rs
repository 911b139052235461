//! Local key repository with encrypted on-disk snapshots
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


use crate::algebra;
use crate::error::{KeyError, KeyResult};
use crate::key_types::{EncryptionKeyRecord, Jwk, KeyData, KeyFilter, KeyRecord, Tags};
use crate::repository::{is_record_id, EncryptionKeyRepository, KeyRepository, KeyWrite};
use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Environment variable holding the snapshot master key
pub const MASTER_KEY_ENV: &str = "JWKD_MASTER_KEY";

const SNAPSHOT_FILE: &str = "keys.json";

/// Master key for sealing key material at rest
type MasterKey = [u8; 32];

#[derive(Debug, Clone, Default)]
struct Tables {
    keys: Vec<KeyRecord>,
    encryption_keys: Vec<EncryptionKeyRecord>,
}

/// On-disk form of a key record; `key_data` is sealed
#[derive(Serialize, Deserialize)]
struct StoredKey {
    id: Uuid,
    key_type: String,
    key_data: String,
    thumbprint: String,
    revoked_at: Option<DateTime<Utc>>,
    deleted_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    #[serde(default)]
    tags: Tags,
}

/// On-disk form of an encryption secret; `key` is sealed
#[derive(Serialize, Deserialize)]
struct StoredEncryptionKey {
    id: Uuid,
    key: String,
    hash: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    deleted_at: Option<DateTime<Utc>>,
}

#[derive(Serialize, Deserialize, Default)]
struct Snapshot {
    keys: Vec<StoredKey>,
    #[serde(default)]
    encryption_keys: Vec<StoredEncryptionKey>,
}

/// Key repository held in memory, optionally snapshotted to a storage directory
/// after every commit
pub struct LocalKeyRepository {
    /// Storage directory; `None` keeps everything in memory
    storage_path: Option<PathBuf>,
    master_key: MasterKey,
    tables: RwLock<Tables>,
}

impl LocalKeyRepository {
    /// Repository without persistence
    pub fn in_memory() -> Self {
        Self {
            storage_path: None,
            master_key: [0u8; 32],
            tables: RwLock::new(Tables::default()),
        }
    }

    /// Open (or create) a repository in `storage_path`
    ///
    /// # Arguments
    /// * `storage_path` - Directory holding the sealed snapshot
    /// * `master_key` - Optional 32-byte master key (if None, derived from the environment or generated)
    pub async fn open<P: AsRef<Path>>(storage_path: P, master_key: Option<&[u8]>) -> KeyResult<Self> {
        let storage_path = storage_path.as_ref().to_path_buf();
        fs::create_dir_all(&storage_path).await?;

        let master_key = match master_key {
            Some(key) => {
                if key.len() != 32 {
                    return Err(KeyError::Configuration(
                        "Master key must be exactly 32 bytes".to_string(),
                    ));
                }
                let mut mk = [0u8; 32];
                mk.copy_from_slice(key);
                mk
            }
            None => Self::derive_master_key(),
        };

        let repository = Self {
            storage_path: Some(storage_path),
            master_key,
            tables: RwLock::new(Tables::default()),
        };
        repository.load().await?;

        Ok(repository)
    }

    /// Derive master key from environment variable or generate a new one
    fn derive_master_key() -> MasterKey {
        if let Ok(key_str) = std::env::var(MASTER_KEY_ENV) {
            // A 64 character hex string is used as is
            if let Ok(key_bytes) = hex::decode(&key_str) {
                if key_bytes.len() == 32 {
                    let mut mk = [0u8; 32];
                    mk.copy_from_slice(&key_bytes);
                    return mk;
                }
            }
            let hash = Sha256::digest(key_str.as_bytes());
            let mut mk = [0u8; 32];
            mk.copy_from_slice(&hash);
            return mk;
        }

        warn!(
            "No {} found, generating a new one. Stored keys will not be readable after a restart!",
            MASTER_KEY_ENV
        );
        let mut master_key = [0u8; 32];
        use rand::RngCore;
        rand::thread_rng().fill_bytes(&mut master_key);
        master_key
    }

    fn snapshot_path(&self) -> Option<PathBuf> {
        self.storage_path.as_ref().map(|dir| dir.join(SNAPSHOT_FILE))
    }

    /// Seal a value: base64url(nonce || ciphertext)
    fn seal(&self, plaintext: &[u8]) -> KeyResult<String> {
        let cipher = Aes256Gcm::new(&self.master_key.into());
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

        let ciphertext = cipher
            .encrypt(&nonce, plaintext)
            .map_err(|e| KeyError::Encryption(format!("Encryption failed: {}", e)))?;

        let mut result = nonce.to_vec();
        result.extend_from_slice(&ciphertext);
        Ok(URL_SAFE_NO_PAD.encode(result))
    }

    fn unseal(&self, sealed: &str) -> KeyResult<Vec<u8>> {
        let encrypted = URL_SAFE_NO_PAD
            .decode(sealed)
            .map_err(|e| KeyError::Decryption(format!("Sealed value is not base64url: {}", e)))?;
        if encrypted.len() < 12 {
            return Err(KeyError::Decryption("Encrypted data too short".to_string()));
        }

        let (nonce_bytes, ciphertext) = encrypted.split_at(12);
        let nonce = Nonce::from_slice(nonce_bytes);
        let cipher = Aes256Gcm::new(&self.master_key.into());

        cipher
            .decrypt(nonce, ciphertext)
            .map_err(|e| KeyError::Decryption(format!("Decryption failed: {}", e)))
    }

    /// Load the snapshot from disk, if there is one
    async fn load(&self) -> KeyResult<()> {
        let Some(path) = self.snapshot_path() else {
            return Ok(());
        };
        if !fs::try_exists(&path).await? {
            debug!(path = %path.display(), "No key snapshot yet");
            return Ok(());
        }

        let snapshot: Snapshot = serde_json::from_slice(&fs::read(&path).await?)?;
        let mut tables = Tables::default();

        for stored in snapshot.keys {
            let key_data: KeyData = serde_json::from_slice(&self.unseal(&stored.key_data)?)?;
            tables.keys.push(KeyRecord {
                id: stored.id,
                key_type: stored.key_type,
                key_data,
                thumbprint: stored.thumbprint,
                revoked_at: stored.revoked_at,
                deleted_at: stored.deleted_at,
                created_at: stored.created_at,
                updated_at: stored.updated_at,
                tags: stored.tags,
            });
        }

        for stored in snapshot.encryption_keys {
            let key = String::from_utf8(self.unseal(&stored.key)?)
                .map_err(|e| KeyError::Decryption(format!("Encryption key is not UTF-8: {}", e)))?;
            tables.encryption_keys.push(EncryptionKeyRecord {
                id: stored.id,
                key,
                hash: stored.hash,
                created_at: stored.created_at,
                updated_at: stored.updated_at,
                deleted_at: stored.deleted_at,
            });
        }

        info!(
            keys = tables.keys.len(),
            encryption_keys = tables.encryption_keys.len(),
            "Loaded key snapshot"
        );
        *self.tables.write().await = tables;
        Ok(())
    }

    /// Write the snapshot next to the old one, then move it into place
    async fn persist(&self, tables: &Tables) -> KeyResult<()> {
        let Some(path) = self.snapshot_path() else {
            return Ok(());
        };

        let mut snapshot = Snapshot::default();
        for record in &tables.keys {
            snapshot.keys.push(StoredKey {
                id: record.id,
                key_type: record.key_type.clone(),
                key_data: self.seal(&serde_json::to_vec(&record.key_data)?)?,
                thumbprint: record.thumbprint.clone(),
                revoked_at: record.revoked_at,
                deleted_at: record.deleted_at,
                created_at: record.created_at,
                updated_at: record.updated_at,
                tags: record.tags.clone(),
            });
        }
        for record in &tables.encryption_keys {
            snapshot.encryption_keys.push(StoredEncryptionKey {
                id: record.id,
                key: self.seal(record.key.as_bytes())?,
                hash: record.hash.clone(),
                created_at: record.created_at,
                updated_at: record.updated_at,
                deleted_at: record.deleted_at,
            });
        }

        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(&snapshot)?).await?;
        fs::rename(&tmp, &path).await?;
        Ok(())
    }

    /// Apply `change` to a copy of the tables, persist, then publish the copy.
    /// On any error the visible state is untouched.
    async fn mutate<R, F>(&self, change: F) -> KeyResult<R>
    where
        F: FnOnce(&mut Tables) -> KeyResult<R> + Send,
        R: Send,
    {
        let mut tables = self.tables.write().await;
        let mut staged = tables.clone();
        let result = change(&mut staged)?;
        self.persist(&staged).await?;
        *tables = staged;
        Ok(result)
    }
}

impl Tables {
    fn key_mut(&mut self, id: Uuid) -> KeyResult<&mut KeyRecord> {
        self.keys
            .iter_mut()
            .find(|record| record.id == id)
            .ok_or_else(|| KeyError::NotFound(id.to_string()))
    }

    fn apply(&mut self, write: KeyWrite, now: DateTime<Utc>) -> KeyResult<Option<KeyRecord>> {
        match write {
            KeyWrite::Create { key_data, tags } => {
                let jwk = Jwk::from_map(key_data);
                let key_type = jwk
                    .kty()
                    .ok_or_else(|| KeyError::InvalidFormat("key is missing the 'kty' member".to_string()))?
                    .to_string();
                let thumbprint = match jwk.kid() {
                    Some(kid) => kid.to_string(),
                    None => algebra::thumbprint(&jwk)?,
                };
                if self.keys.iter().any(|record| record.thumbprint == thumbprint) {
                    return Err(KeyError::Persistence(format!(
                        "a key with thumbprint {} already exists",
                        thumbprint
                    )));
                }

                let record = KeyRecord {
                    id: Uuid::new_v4(),
                    key_type,
                    key_data: algebra::to_storable_data(&jwk),
                    thumbprint,
                    revoked_at: None,
                    deleted_at: None,
                    created_at: now,
                    updated_at: now,
                    tags,
                };
                self.keys.push(record.clone());
                Ok(Some(record))
            }
            KeyWrite::Revoke(id) => {
                let record = self.key_mut(id)?;
                if record.revoked_at.is_none() {
                    record.revoked_at = Some(now);
                    record.updated_at = now;
                }
                Ok(None)
            }
            KeyWrite::Unrevoke(id) => {
                let record = self.key_mut(id)?;
                record.revoked_at = None;
                record.updated_at = now;
                Ok(None)
            }
            KeyWrite::Delete(id) => {
                let record = self.key_mut(id)?;
                if record.deleted_at.is_none() {
                    record.deleted_at = Some(now);
                    record.updated_at = now;
                }
                Ok(None)
            }
            KeyWrite::ForceDelete(id) => {
                let before = self.keys.len();
                self.keys.retain(|record| record.id != id);
                if self.keys.len() == before {
                    return Err(KeyError::NotFound(id.to_string()));
                }
                Ok(None)
            }
        }
    }

    fn encryption_key_mut(&mut self, hash: &str) -> KeyResult<&mut EncryptionKeyRecord> {
        self.encryption_keys
            .iter_mut()
            .find(|record| record.hash == hash)
            .ok_or_else(|| KeyError::NotFound(format!("encryption key {}", hash)))
    }
}

#[async_trait]
impl KeyRepository for LocalKeyRepository {
    async fn get_all(&self, filter: &KeyFilter) -> KeyResult<Vec<KeyRecord>> {
        let tables = self.tables.read().await;
        Ok(tables
            .keys
            .iter()
            .filter(|record| filter.matches(record))
            .cloned()
            .collect())
    }

    async fn get_single_key(&self, key_id: &str, filter: &KeyFilter) -> KeyResult<KeyRecord> {
        let by_id = is_record_id(key_id);
        let tables = self.tables.read().await;
        tables
            .keys
            .iter()
            .filter(|record| match by_id {
                Some(id) => record.id == id,
                None => record.thumbprint == key_id,
            })
            .find(|record| filter.matches(record))
            .cloned()
            .ok_or_else(|| KeyError::NotFound(key_id.to_string()))
    }

    async fn commit(&self, writes: Vec<KeyWrite>) -> KeyResult<Vec<KeyRecord>> {
        let count = writes.len();
        let created = self
            .mutate(move |tables| {
                let now = Utc::now();
                let mut created = Vec::new();
                for write in writes {
                    if let Some(record) = tables.apply(write, now)? {
                        created.push(record);
                    }
                }
                Ok(created)
            })
            .await?;

        debug!(writes = count, created = created.len(), "Committed key writes");
        Ok(created)
    }
}

#[async_trait]
impl EncryptionKeyRepository for LocalKeyRepository {
    async fn get_encryption_key(&self, hash: &str) -> KeyResult<String> {
        let tables = self.tables.read().await;
        tables
            .encryption_keys
            .iter()
            .find(|record| record.hash == hash && record.deleted_at.is_none())
            .map(|record| record.key.clone())
            .ok_or_else(|| KeyError::NotFound(format!("encryption key {}", hash)))
    }

    async fn create_encryption_key(&self, key: &str, hash: &str) -> KeyResult<()> {
        let (key, hash) = (key.to_string(), hash.to_string());
        self.mutate(move |tables| {
            if tables.encryption_keys.iter().any(|record| record.hash == hash) {
                return Err(KeyError::Persistence(
                    "an encryption key with this hash already exists".to_string(),
                ));
            }
            let now = Utc::now();
            tables.encryption_keys.push(EncryptionKeyRecord {
                id: Uuid::new_v4(),
                key,
                hash,
                created_at: now,
                updated_at: now,
                deleted_at: None,
            });
            Ok(())
        })
        .await
    }

    async fn delete_encryption_key(&self, hash: &str) -> KeyResult<()> {
        let hash = hash.to_string();
        self.mutate(move |tables| {
            let now = Utc::now();
            let record = tables.encryption_key_mut(&hash)?;
            if record.deleted_at.is_none() {
                record.deleted_at = Some(now);
                record.updated_at = now;
            }
            Ok(())
        })
        .await
    }

    async fn force_delete_encryption_key(&self, hash: &str) -> KeyResult<()> {
        let hash = hash.to_string();
        self.mutate(move |tables| {
            tables.encryption_key_mut(&hash)?;
            tables.encryption_keys.retain(|record| record.hash != hash);
            Ok(())
        })
        .await
    }
}
