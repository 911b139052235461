//! Service wiring from configuration
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


use crate::service::KeyService;
use jwkd_cache::{KeyCache, MemoryStore};
use jwkd_config::{AppConfig, CacheConfig, EncryptionConfig};
use jwkd_keys::{EncryptionSettings, KeyGenerator, KeySetEncryptor, LocalKeyRepository};
use std::sync::Arc;
use tracing::{info, warn};

pub fn encryption_settings(config: &EncryptionConfig) -> EncryptionSettings {
    EncryptionSettings {
        enabled: config.enabled,
        key_algorithm: config.key_algorithm.clone(),
        content_algorithm: config.content_algorithm.clone(),
        compress: config.enable_payload_compression,
        strict: config.strict_algorithms,
    }
}

pub fn key_cache(config: &CacheConfig) -> KeyCache {
    let cache = KeyCache::new(Arc::new(MemoryStore::new(config.prefix.clone())));
    match config.ttl() {
        Some(ttl) => cache.with_default_ttl(ttl),
        None => cache,
    }
}

/// Build the key service described by `config`
pub async fn build_service(config: &AppConfig) -> anyhow::Result<Arc<KeyService>> {
    let repository = match &config.storage.path {
        Some(path) => {
            let repository = LocalKeyRepository::open(path, None)
                .await
                .map_err(|e| anyhow::anyhow!("Failed to open key storage at {}: {}", path.display(), e))?;
            info!(path = %path.display(), "Key storage opened");
            Arc::new(repository)
        }
        None => {
            warn!("KEY_STORAGE_PATH is not set, keys will be lost on shutdown");
            Arc::new(LocalKeyRepository::in_memory())
        }
    };

    let generator = KeyGenerator::new();
    let encryptor = KeySetEncryptor::new(&encryption_settings(&config.encryption), generator.clone())
        .map_err(|e| anyhow::anyhow!("Invalid encryption configuration: {}", e))?;

    info!(
        encryption_enabled = encryptor.is_enabled(),
        key_algorithm = encryptor.key_algorithm().name(),
        content_algorithm = encryptor.content_algorithm().name(),
        "Key encryption configured"
    );

    Ok(Arc::new(KeyService::new(
        repository.clone(),
        repository,
        generator,
        encryptor,
        key_cache(&config.cache),
    )))
}
