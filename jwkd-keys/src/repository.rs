//! Persistence boundary for keys and transport encryption secrets
//!
//! Backends implement the read methods plus [`KeyRepository::commit`], which
//! applies a batch of [`KeyWrite`]s atomically. The lifecycle helpers
//! (`create_key`, `revoke_key`, ...) are provided on top of it, so a rotation
//! can be expressed as a single `[Revoke, Create]` commit.
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
use crate::key_types::{KeyData, KeyFilter, KeyRecord, KeyRef, Tags};
use async_trait::async_trait;
use uuid::Uuid;

/// A single write inside a repository transaction
#[derive(Debug, Clone, PartialEq)]
pub enum KeyWrite {
    /// Persist new key material. The thumbprint is taken from `kid`, or
    /// computed when the material carries none.
    Create { key_data: KeyData, tags: Tags },
    /// Set the revocation timestamp; an existing timestamp is kept
    Revoke(Uuid),
    Unrevoke(Uuid),
    /// Soft delete
    Delete(Uuid),
    /// Remove the record permanently
    ForceDelete(Uuid),
}

/// Whether a lookup string addresses a key by id rather than by thumbprint
pub fn is_record_id(key_id: &str) -> Option<Uuid> {
    Uuid::parse_str(key_id).ok()
}

/// Storage for key records
#[async_trait]
pub trait KeyRepository: Send + Sync {
    /// All keys matching the filter, oldest first
    async fn get_all(&self, filter: &KeyFilter) -> KeyResult<Vec<KeyRecord>>;

    /// Find one key by id (UUID) or thumbprint
    async fn get_single_key(&self, key_id: &str, filter: &KeyFilter) -> KeyResult<KeyRecord>;

    /// Apply every write or none of them. Returns the records created by
    /// `Create` writes, in order.
    async fn commit(&self, writes: Vec<KeyWrite>) -> KeyResult<Vec<KeyRecord>>;

    /// Resolve a key reference to a record id using `filter` for lookups
    async fn resolve(&self, key: KeyRef, filter: &KeyFilter) -> KeyResult<Uuid> {
        match key {
            KeyRef::Record(record) => Ok(record.id),
            KeyRef::Id(key_id) => Ok(self.get_single_key(&key_id, filter).await?.id),
        }
    }

    async fn create_key(&self, key_data: KeyData, tags: Tags) -> KeyResult<KeyRecord> {
        self.commit(vec![KeyWrite::Create { key_data, tags }])
            .await?
            .pop()
            .ok_or_else(|| KeyError::Persistence("commit returned no created key".to_string()))
    }

    /// Revoke an active key
    async fn revoke_key(&self, key: KeyRef) -> KeyResult<()> {
        let id = self.resolve(key, &KeyFilter::new()).await?;
        self.commit(vec![KeyWrite::Revoke(id)]).await?;
        Ok(())
    }

    async fn unrevoke_key(&self, key: KeyRef) -> KeyResult<()> {
        let id = self.resolve(key, &KeyFilter::new().include_revoked()).await?;
        self.commit(vec![KeyWrite::Unrevoke(id)]).await?;
        Ok(())
    }

    /// Soft delete active keys. An empty list is a no-op.
    async fn delete_key(&self, keys: Vec<KeyRef>) -> KeyResult<()> {
        let mut writes = Vec::with_capacity(keys.len());
        for key in keys {
            writes.push(KeyWrite::Delete(self.resolve(key, &KeyFilter::new()).await?));
        }
        if !writes.is_empty() {
            self.commit(writes).await?;
        }
        Ok(())
    }

    /// Permanently remove keys, whatever their state
    async fn force_delete_key(&self, keys: Vec<KeyRef>) -> KeyResult<()> {
        let filter = KeyFilter::new().include_revoked().include_trashed();
        let mut writes = Vec::with_capacity(keys.len());
        for key in keys {
            writes.push(KeyWrite::ForceDelete(self.resolve(key, &filter).await?));
        }
        if !writes.is_empty() {
            self.commit(writes).await?;
        }
        Ok(())
    }
}

/// Storage for registered transport encryption secrets
#[async_trait]
pub trait EncryptionKeyRepository: Send + Sync {
    /// The secret registered under `hash`; soft-deleted secrets are not found
    async fn get_encryption_key(&self, hash: &str) -> KeyResult<String>;

    async fn create_encryption_key(&self, key: &str, hash: &str) -> KeyResult<()>;

    async fn delete_encryption_key(&self, hash: &str) -> KeyResult<()>;

    async fn force_delete_encryption_key(&self, hash: &str) -> KeyResult<()>;
}
