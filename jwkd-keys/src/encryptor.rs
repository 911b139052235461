//! Key set encryption for transport
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


use crate::algebra::decode_member;
use crate::error::{KeyError, KeyResult};
use crate::generator::{KeyGenerator, KeyOptions};
use crate::jwe::{self, ContentAlgorithm, JweEnvelope, KeyWrapAlgorithm};
use crate::key_types::KeyPayload;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, warn};

pub const DEFAULT_KEY_ALGORITHM: KeyWrapAlgorithm = KeyWrapAlgorithm::Pbes2Hs256A128Kw;
pub const DEFAULT_CONTENT_ALGORITHM: ContentAlgorithm = ContentAlgorithm::A128Gcm;

const CTY_KEY: &str = "jwk+json";
const CTY_KEY_SET: &str = "jwk-set+json";

/// Encryption settings as configured for the process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptionSettings {
    pub enabled: bool,
    pub key_algorithm: String,
    pub content_algorithm: String,
    pub compress: bool,
    /// Reject unknown algorithm names instead of falling back to the defaults
    pub strict: bool,
}

impl Default for EncryptionSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            key_algorithm: DEFAULT_KEY_ALGORITHM.name().to_string(),
            content_algorithm: DEFAULT_CONTENT_ALGORITHM.name().to_string(),
            compress: false,
            strict: false,
        }
    }
}

/// Result of [`KeySetEncryptor::encrypt_key_set`]
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Sealed {
    /// Encryption is disabled; the payload passes through untouched
    Plain(KeyPayload),
    Envelope(JweEnvelope),
}

/// Wraps keys and key sets in a JWE envelope keyed by a client secret
#[derive(Debug, Clone)]
pub struct KeySetEncryptor {
    enabled: bool,
    key_algorithm: KeyWrapAlgorithm,
    content_algorithm: ContentAlgorithm,
    compress: bool,
    generator: KeyGenerator,
}

impl KeySetEncryptor {
    pub fn new(settings: &EncryptionSettings, generator: KeyGenerator) -> KeyResult<Self> {
        let key_algorithm = match KeyWrapAlgorithm::from_name(&settings.key_algorithm) {
            Some(alg) => alg,
            None if settings.strict => {
                return Err(KeyError::Configuration(format!(
                    "unsupported key encryption algorithm '{}'",
                    settings.key_algorithm
                )))
            }
            None => {
                warn!(
                    configured = %settings.key_algorithm,
                    fallback = %DEFAULT_KEY_ALGORITHM,
                    "Unsupported key encryption algorithm, using default"
                );
                DEFAULT_KEY_ALGORITHM
            }
        };

        let content_algorithm = match ContentAlgorithm::from_name(&settings.content_algorithm) {
            Some(enc) => enc,
            None if settings.strict => {
                return Err(KeyError::Configuration(format!(
                    "unsupported content encryption algorithm '{}'",
                    settings.content_algorithm
                )))
            }
            None => {
                warn!(
                    configured = %settings.content_algorithm,
                    fallback = %DEFAULT_CONTENT_ALGORITHM,
                    "Unsupported content encryption algorithm, using default"
                );
                DEFAULT_CONTENT_ALGORITHM
            }
        };

        Ok(Self {
            enabled: settings.enabled,
            key_algorithm,
            content_algorithm,
            compress: settings.compress,
            generator,
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn key_algorithm(&self) -> KeyWrapAlgorithm {
        self.key_algorithm
    }

    pub fn content_algorithm(&self) -> ContentAlgorithm {
        self.content_algorithm
    }

    /// Encrypt a key or key set with a key derived from `secret`.
    ///
    /// Returns the payload unchanged when encryption is disabled and `None`
    /// when encryption is enabled but no secret was supplied.
    pub fn encrypt_key_set(
        &self,
        payload: KeyPayload,
        secret: Option<&str>,
    ) -> KeyResult<Option<Sealed>> {
        if !self.enabled {
            return Ok(Some(Sealed::Plain(payload)));
        }

        let secret = match secret {
            Some(secret) if !secret.is_empty() => secret,
            _ => return Ok(None),
        };

        let wrapping_key = self.generator.generate(&KeyOptions::from_secret(secret))?;
        let key_bytes = decode_member(&wrapping_key, "k")?;

        let (plaintext, cty) = match payload {
            KeyPayload::Key(jwk) => (serde_json::to_vec(&jwk)?, CTY_KEY),
            KeyPayload::Set(mut set) if set.len() == 1 => {
                let jwk = set.keys.remove(0);
                (serde_json::to_vec(&jwk)?, CTY_KEY)
            }
            KeyPayload::Set(set) => (serde_json::to_vec(&set)?, CTY_KEY_SET),
        };

        let envelope = jwe::encrypt(
            &plaintext,
            &self.protected_header(cty),
            self.key_algorithm,
            self.content_algorithm,
            &key_bytes,
        )?;

        debug!(
            alg = %self.key_algorithm,
            enc = %self.content_algorithm,
            cty,
            "Encrypted key payload"
        );
        Ok(Some(Sealed::Envelope(envelope)))
    }

    fn protected_header(&self, cty: &str) -> Map<String, Value> {
        let mut header = Map::new();
        header.insert("alg".to_string(), Value::from(self.key_algorithm.name()));
        header.insert("enc".to_string(), Value::from(self.content_algorithm.name()));
        if self.compress {
            header.insert("zip".to_string(), Value::from("DEF"));
        }
        header.insert("cty".to_string(), Value::from(cty));
        header
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key_types::{Jwk, JwkSet};
    use serde_json::json;

    fn enabled(key_algorithm: &str, content_algorithm: &str) -> EncryptionSettings {
        EncryptionSettings {
            enabled: true,
            key_algorithm: key_algorithm.to_string(),
            content_algorithm: content_algorithm.to_string(),
            ..EncryptionSettings::default()
        }
    }

    fn oct(k: &str) -> Jwk {
        serde_json::from_value(json!({"kid": k, "kty": "oct", "k": k})).unwrap()
    }

    #[test]
    fn test_disabled_is_identity() {
        let encryptor = KeySetEncryptor::new(&EncryptionSettings::default(), KeyGenerator::new()).unwrap();
        let payload = KeyPayload::from(JwkSet::new(vec![oct("a"), oct("b")]));

        let sealed = encryptor.encrypt_key_set(payload.clone(), None).unwrap();
        assert_eq!(sealed, Some(Sealed::Plain(payload)));
    }

    #[test]
    fn test_missing_secret_is_a_sentinel() {
        let encryptor = KeySetEncryptor::new(&enabled("A128KW", "A128GCM"), KeyGenerator::new()).unwrap();
        assert!(encryptor.encrypt_key_set(oct("a").into(), None).unwrap().is_none());
        assert!(encryptor.encrypt_key_set(oct("a").into(), Some("")).unwrap().is_none());
    }

    #[test]
    fn test_unknown_algorithms_fall_back() {
        let encryptor = KeySetEncryptor::new(&enabled("RSA-OAEP", "nope"), KeyGenerator::new()).unwrap();
        assert_eq!(encryptor.key_algorithm(), DEFAULT_KEY_ALGORITHM);
        assert_eq!(encryptor.content_algorithm(), DEFAULT_CONTENT_ALGORITHM);
    }

    #[test]
    fn test_strict_rejects_unknown_algorithms() {
        let mut settings = enabled("RSA-OAEP", "A128GCM");
        settings.strict = true;
        assert!(matches!(
            KeySetEncryptor::new(&settings, KeyGenerator::new()),
            Err(KeyError::Configuration(_))
        ));
    }

    #[test]
    fn test_protected_header_members() {
        let mut settings = enabled("A128KW", "A256GCM");
        settings.compress = true;
        let encryptor = KeySetEncryptor::new(&settings, KeyGenerator::new()).unwrap();

        // A128KW needs exactly 16 bytes of key material
        let sealed = encryptor
            .encrypt_key_set(oct("a").into(), Some("0123456789abcdef"))
            .unwrap();
        let Some(Sealed::Envelope(envelope)) = sealed else {
            panic!("expected an envelope");
        };
        let header = envelope.protected_header().unwrap();
        assert_eq!(header["alg"], "A128KW");
        assert_eq!(header["enc"], "A256GCM");
        assert_eq!(header["zip"], "DEF");
        assert_eq!(header["cty"], "jwk+json");
    }

    #[test]
    fn test_short_secret_for_key_wrap_fails() {
        let encryptor = KeySetEncryptor::new(&enabled("A256KW", "A128GCM"), KeyGenerator::new()).unwrap();
        let result = encryptor.encrypt_key_set(oct("a").into(), Some("short"));
        assert!(matches!(result, Err(KeyError::Encryption(_))));
    }
}
