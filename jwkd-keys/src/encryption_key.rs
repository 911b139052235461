//! Transport encryption secrets registered by clients
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
use hmac::{Hmac, Mac};
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::Sha256;

/// Length of the generated secret in characters
pub const ENCRYPTION_KEY_LEN: usize = 64;

/// A freshly generated secret and the hash it is looked up by
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptionKeyPair {
    pub key: String,
    pub hash: String,
}

/// Lookup hash for a generated secret: hex HMAC-SHA256 keyed by the client secret
pub fn encryption_key_hash(generated: &str, secret: &str) -> KeyResult<String> {
    let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(secret.as_bytes())
        .map_err(|e| KeyError::Validation(format!("invalid secret: {}", e)))?;
    mac.update(generated.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Generate a random alphanumeric secret bound to the client's `secret`
pub fn generate_encryption_key(secret: &str) -> KeyResult<EncryptionKeyPair> {
    if secret.is_empty() {
        return Err(KeyError::Validation("A secret is required".to_string()));
    }

    let key: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(ENCRYPTION_KEY_LEN)
        .map(char::from)
        .collect();
    let hash = encryption_key_hash(&key, secret)?;

    Ok(EncryptionKeyPair { key, hash })
}
