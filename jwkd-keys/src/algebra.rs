//! Conversion between stored key records and JWKs
//!
//! Everything here is a pure transform: thumbprints (RFC 7638), public-key
//! projection and key set assembly.
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
use crate::key_types::{Jwk, JwkSet, KeyData, KeyRecord};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Members kept on every public key regardless of family
const COMMON_PUBLIC_MEMBERS: &[&str] = &["kty", "kid", "alg", "use", "key_ops"];

/// Members required for the thumbprint, already in lexicographic order
fn thumbprint_members(kty: &str) -> KeyResult<&'static [&'static str]> {
    match kty {
        "RSA" => Ok(&["e", "kty", "n"]),
        "EC" => Ok(&["crv", "kty", "x", "y"]),
        "OKP" => Ok(&["crv", "kty", "x"]),
        "oct" => Ok(&["k", "kty"]),
        other => Err(KeyError::UnsupportedKeyType(other.to_string())),
    }
}

/// Family-specific public members; `None` for families without a public form
fn public_members(kty: &str) -> KeyResult<Option<&'static [&'static str]>> {
    match kty {
        "RSA" => Ok(Some(&["n", "e"])),
        "EC" => Ok(Some(&["crv", "x", "y"])),
        "OKP" => Ok(Some(&["crv", "x"])),
        "oct" => Ok(None),
        other => Err(KeyError::UnsupportedKeyType(other.to_string())),
    }
}

fn require_kty(jwk: &Jwk) -> KeyResult<&str> {
    jwk.kty()
        .ok_or_else(|| KeyError::InvalidFormat("key is missing the 'kty' member".to_string()))
}

/// Canonical JSON over the required members: sorted keys, no whitespace
pub fn canonical_members(jwk: &Jwk) -> KeyResult<String> {
    let kty = require_kty(jwk)?;
    let mut parts = Vec::new();
    for member in thumbprint_members(kty)? {
        let value = jwk.get_str(member).ok_or_else(|| {
            KeyError::InvalidFormat(format!("{} key is missing the '{}' member", kty, member))
        })?;
        // serde_json string encoding gives the RFC 8259 escaping the thumbprint requires
        parts.push(format!(
            "{}:{}",
            serde_json::to_string(member)?,
            serde_json::to_string(value)?
        ));
    }
    Ok(format!("{{{}}}", parts.join(",")))
}

/// RFC 7638 SHA-256 thumbprint, base64url without padding
pub fn thumbprint(jwk: &Jwk) -> KeyResult<String> {
    let canonical = canonical_members(jwk)?;
    let digest = Sha256::digest(canonical.as_bytes());
    Ok(URL_SAFE_NO_PAD.encode(digest))
}

/// Add a `kid` thumbprint as the first member unless one is present
pub fn add_thumbprint(jwk: Jwk) -> KeyResult<Jwk> {
    if jwk.has("kid") {
        return Ok(jwk);
    }

    let kid = thumbprint(&jwk)?;
    let mut members = KeyData::new();
    members.insert("kid".to_string(), Value::String(kid));
    members.extend(jwk.into_map());
    Ok(Jwk::from_map(members))
}

/// Project a key onto its public members
pub fn to_public(jwk: &Jwk) -> KeyResult<Jwk> {
    let kty = require_kty(jwk)?;
    let family = public_members(kty)?.ok_or_else(|| {
        KeyError::UnsupportedOperation(format!("{} keys have no public form", kty))
    })?;

    let members = jwk
        .members()
        .iter()
        .filter(|(name, _)| {
            COMMON_PUBLIC_MEMBERS.contains(&name.as_str()) || family.contains(&name.as_str())
        })
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect();
    Ok(Jwk::from_map(members))
}

/// Build the JWK for a stored key.
///
/// Revoked keys, and any key when `force_public` is set, are reduced to their
/// public members. Symmetric keys cannot be reduced and fail with
/// [`KeyError::UnsupportedOperation`].
pub fn to_representation(record: &KeyRecord, force_public: bool) -> KeyResult<Jwk> {
    let jwk = add_thumbprint(Jwk::from_map(record.key_data.clone()))?;

    if record.is_revoked() || force_public {
        return to_public(&jwk);
    }
    Ok(jwk)
}

/// Full member mapping for persistence, private material included
pub fn to_storable_data(jwk: &Jwk) -> KeyData {
    jwk.members().clone()
}

/// Assemble a key set from converted keys
pub fn create_key_set<I>(keys: I) -> JwkSet
where
    I: IntoIterator<Item = Jwk>,
{
    keys.into_iter().collect()
}

/// Decode a base64url (unpadded) JWK member into bytes
pub fn decode_member(jwk: &Jwk, member: &str) -> KeyResult<Vec<u8>> {
    let encoded = jwk
        .get_str(member)
        .ok_or_else(|| KeyError::InvalidFormat(format!("key is missing the '{}' member", member)))?;
    URL_SAFE_NO_PAD
        .decode(encoded)
        .map_err(|e| KeyError::InvalidFormat(format!("member '{}' is not base64url: {}", member, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key_types::Tags;
    use chrono::Utc;
    use serde_json::json;
    use uuid::Uuid;

    fn jwk(value: Value) -> Jwk {
        serde_json::from_value(value).unwrap()
    }

    fn record(key: &Jwk, revoked: bool) -> KeyRecord {
        let now = Utc::now();
        KeyRecord {
            id: Uuid::new_v4(),
            key_type: key.kty().unwrap().to_string(),
            key_data: key.members().clone(),
            thumbprint: String::new(),
            revoked_at: revoked.then_some(now),
            deleted_at: None,
            created_at: now,
            updated_at: now,
            tags: Tags::new(),
        }
    }

    #[test]
    fn test_rfc7638_example_thumbprint() {
        // Example key from RFC 7638 section 3.1
        let key = jwk(json!({
            "kty": "RSA",
            "n": "0vx7agoebGcQSuuPiLJXZptN9nndrQmbXEps2aiAFbWhM78LhWx4cbbfAAtVT86zwu1RK7aPFFxuhDR1L6tSoc_BJECPebWKRXjBZCiFV4n3oknjhMstn64tZ_2W-5JsGY4Hc5n9yBXArwl93lqt7_RN5w6Cf0h4QyQ5v-65YGjQR0_FDW2QvzqY368QQMicAtaSqzs8KJZgnYb9c7d0zgdAZHzu6qMQvRL5hajrn1n91CbOpbISD08qNLyrdkt-bFTWhAI4vMQFh6WeZu0fM4lFd2NcRwr3XPksINHaQ-G_xBniIqbw0Ls1jF44-csFCur-kEgU8awapJzKnqDKgw",
            "e": "AQAB",
            "alg": "RS256",
            "kid": "2011-04-29"
        }));
        assert_eq!(
            thumbprint(&key).unwrap(),
            "NzbLsXh8uDCcd-6MNwXF4W_7noWXFZAfHkxZsRGC9Xs"
        );
    }

    #[test]
    fn test_thumbprint_ignores_member_order() {
        let a = jwk(json!({"kty": "EC", "crv": "P-256", "x": "abc", "y": "def", "d": "secret"}));
        let b = jwk(json!({"y": "def", "d": "other", "x": "abc", "crv": "P-256", "kty": "EC"}));
        assert_eq!(thumbprint(&a).unwrap(), thumbprint(&b).unwrap());
    }

    #[test]
    fn test_thumbprint_requires_members() {
        let key = jwk(json!({"kty": "EC", "crv": "P-256", "x": "abc"}));
        assert!(matches!(thumbprint(&key), Err(KeyError::InvalidFormat(_))));
    }

    #[test]
    fn test_add_thumbprint_puts_kid_first() {
        let key = add_thumbprint(jwk(json!({"kty": "oct", "k": "c2VjcmV0"}))).unwrap();
        assert_eq!(key.members().keys().next().map(String::as_str), Some("kid"));
    }

    #[test]
    fn test_add_thumbprint_keeps_existing_kid() {
        let key = add_thumbprint(jwk(json!({"kid": "mine", "kty": "oct", "k": "c2VjcmV0"}))).unwrap();
        assert_eq!(key.kid(), Some("mine"));
    }

    #[test]
    fn test_revoked_record_is_public() {
        let key = jwk(json!({"kty": "OKP", "crv": "Ed25519", "x": "pub", "d": "priv", "use": "sig"}));
        let converted = to_representation(&record(&key, true), false).unwrap();
        assert!(!converted.has("d"));
        assert_eq!(converted.get_str("use"), Some("sig"));
        assert!(converted.has("kid"));
    }

    #[test]
    fn test_private_form_keeps_everything() {
        let key = jwk(json!({"kty": "RSA", "n": "n", "e": "AQAB", "d": "d", "p": "p", "q": "q"}));
        let converted = to_representation(&record(&key, false), false).unwrap();
        for member in ["n", "e", "d", "p", "q", "kid"] {
            assert!(converted.has(member), "missing {}", member);
        }
        assert_eq!(to_storable_data(&converted).len(), 7);
    }

    #[test]
    fn test_public_oct_is_unsupported() {
        let key = jwk(json!({"kty": "oct", "k": "c2VjcmV0"}));
        assert!(matches!(
            to_representation(&record(&key, false), true),
            Err(KeyError::UnsupportedOperation(_))
        ));
    }
}
