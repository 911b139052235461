//! JWE building blocks (RFC 7516 / RFC 7518)
//!
//! Supports a single recipient in the flattened JSON serialization:
//! - Key management: AES key wrap, AES-GCM key wrap, direct, PBES2
//! - Content encryption: AES-GCM and AES-CBC with HMAC-SHA2
//! - Optional DEFLATE compression (`zip: "DEF"`)
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
use aes_gcm::aead::generic_array::GenericArray;
use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::aes::{Aes128, Aes192, Aes256};
use aes_gcm::{AesGcm, Aes128Gcm, Aes256Gcm};
use aes_gcm::aead::consts::U12;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use cbc::cipher::block_padding::Pkcs7;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression;
use hmac::{Hmac, Mac};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Sha256, Sha384, Sha512};
use std::fmt;
use std::io::{Read, Write};

type Aes192Gcm = AesGcm<Aes192, U12>;

/// Salt length for PBES2 (`p2s`)
pub const PBES2_SALT_LEN: usize = 16;

/// PBKDF2 iteration count for PBES2 (`p2c`)
pub const PBES2_ITERATIONS: u32 = 4096;

const GCM_IV_LEN: usize = 12;
const GCM_TAG_LEN: usize = 16;
const CBC_IV_LEN: usize = 16;

/// Key management algorithm (`alg`)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyWrapAlgorithm {
    A128Kw,
    A192Kw,
    A256Kw,
    A128GcmKw,
    A192GcmKw,
    A256GcmKw,
    Dir,
    Pbes2Hs256A128Kw,
    Pbes2Hs384A192Kw,
    Pbes2Hs512A256Kw,
}

impl KeyWrapAlgorithm {
    pub const ALL: [KeyWrapAlgorithm; 10] = [
        KeyWrapAlgorithm::A128Kw,
        KeyWrapAlgorithm::A192Kw,
        KeyWrapAlgorithm::A256Kw,
        KeyWrapAlgorithm::A128GcmKw,
        KeyWrapAlgorithm::A192GcmKw,
        KeyWrapAlgorithm::A256GcmKw,
        KeyWrapAlgorithm::Dir,
        KeyWrapAlgorithm::Pbes2Hs256A128Kw,
        KeyWrapAlgorithm::Pbes2Hs384A192Kw,
        KeyWrapAlgorithm::Pbes2Hs512A256Kw,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            KeyWrapAlgorithm::A128Kw => "A128KW",
            KeyWrapAlgorithm::A192Kw => "A192KW",
            KeyWrapAlgorithm::A256Kw => "A256KW",
            KeyWrapAlgorithm::A128GcmKw => "A128GCMKW",
            KeyWrapAlgorithm::A192GcmKw => "A192GCMKW",
            KeyWrapAlgorithm::A256GcmKw => "A256GCMKW",
            KeyWrapAlgorithm::Dir => "dir",
            KeyWrapAlgorithm::Pbes2Hs256A128Kw => "PBES2-HS256+A128KW",
            KeyWrapAlgorithm::Pbes2Hs384A192Kw => "PBES2-HS384+A192KW",
            KeyWrapAlgorithm::Pbes2Hs512A256Kw => "PBES2-HS512+A256KW",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|alg| alg.name() == name)
    }
}

impl fmt::Display for KeyWrapAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Content encryption algorithm (`enc`)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentAlgorithm {
    A128Gcm,
    A192Gcm,
    A256Gcm,
    A128CbcHs256,
    A192CbcHs384,
    A256CbcHs512,
}

impl ContentAlgorithm {
    pub const ALL: [ContentAlgorithm; 6] = [
        ContentAlgorithm::A128Gcm,
        ContentAlgorithm::A192Gcm,
        ContentAlgorithm::A256Gcm,
        ContentAlgorithm::A128CbcHs256,
        ContentAlgorithm::A192CbcHs384,
        ContentAlgorithm::A256CbcHs512,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ContentAlgorithm::A128Gcm => "A128GCM",
            ContentAlgorithm::A192Gcm => "A192GCM",
            ContentAlgorithm::A256Gcm => "A256GCM",
            ContentAlgorithm::A128CbcHs256 => "A128CBC-HS256",
            ContentAlgorithm::A192CbcHs384 => "A192CBC-HS384",
            ContentAlgorithm::A256CbcHs512 => "A256CBC-HS512",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|enc| enc.name() == name)
    }

    /// Content encryption key length in bytes
    pub fn key_len(&self) -> usize {
        match self {
            ContentAlgorithm::A128Gcm => 16,
            ContentAlgorithm::A192Gcm => 24,
            ContentAlgorithm::A256Gcm => 32,
            ContentAlgorithm::A128CbcHs256 => 32,
            ContentAlgorithm::A192CbcHs384 => 48,
            ContentAlgorithm::A256CbcHs512 => 64,
        }
    }

    fn iv_len(&self) -> usize {
        match self {
            ContentAlgorithm::A128Gcm | ContentAlgorithm::A192Gcm | ContentAlgorithm::A256Gcm => {
                GCM_IV_LEN
            }
            _ => CBC_IV_LEN,
        }
    }
}

impl fmt::Display for ContentAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Flattened JWE JSON serialization
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JweEnvelope {
    pub protected: String,
    /// Per-recipient parameters (`p2s`/`p2c`, or `iv`/`tag` for GCM key wrap)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub header: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encrypted_key: Option<String>,
    pub iv: String,
    pub ciphertext: String,
    pub tag: String,
}

impl JweEnvelope {
    /// Decode the protected header
    pub fn protected_header(&self) -> KeyResult<Map<String, Value>> {
        let bytes = decode(&self.protected, "protected")?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

fn encode(bytes: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(bytes)
}

fn decode(value: &str, field: &str) -> KeyResult<Vec<u8>> {
    URL_SAFE_NO_PAD
        .decode(value)
        .map_err(|e| KeyError::Decryption(format!("'{}' is not base64url: {}", field, e)))
}

fn random_bytes(len: usize) -> Vec<u8> {
    let mut bytes = vec![0u8; len];
    OsRng.fill_bytes(&mut bytes);
    bytes
}

/// Encrypt `plaintext` for one recipient holding `key`.
///
/// `protected` must already carry `alg` and `enc`; it is authenticated as the
/// additional data. Compression is applied when it carries `zip: "DEF"`.
pub fn encrypt(
    plaintext: &[u8],
    protected: &Map<String, Value>,
    alg: KeyWrapAlgorithm,
    enc: ContentAlgorithm,
    key: &[u8],
) -> KeyResult<JweEnvelope> {
    let (cek, encrypted_key, header) = wrap_content_key(alg, enc, key)?;

    let payload = if protected.get("zip").and_then(Value::as_str) == Some("DEF") {
        deflate(plaintext)?
    } else {
        plaintext.to_vec()
    };

    let protected_b64 = encode(&serde_json::to_vec(protected)?);
    let iv = random_bytes(enc.iv_len());
    let (ciphertext, tag) = seal_content(enc, &cek, &iv, protected_b64.as_bytes(), &payload)?;

    Ok(JweEnvelope {
        protected: protected_b64,
        header: (!header.is_empty()).then_some(header),
        encrypted_key: (!encrypted_key.is_empty()).then(|| encode(&encrypted_key)),
        iv: encode(&iv),
        ciphertext: encode(&ciphertext),
        tag: encode(&tag),
    })
}

/// Decrypt an envelope with the recipient `key`
pub fn decrypt(envelope: &JweEnvelope, key: &[u8]) -> KeyResult<Vec<u8>> {
    let mut header = envelope.protected_header()?;
    if let Some(recipient) = &envelope.header {
        for (name, value) in recipient {
            header.entry(name.clone()).or_insert_with(|| value.clone());
        }
    }

    let alg_name = header.get("alg").and_then(Value::as_str).unwrap_or_default();
    let alg = KeyWrapAlgorithm::from_name(alg_name)
        .ok_or_else(|| KeyError::Decryption(format!("unsupported alg '{}'", alg_name)))?;
    let enc_name = header.get("enc").and_then(Value::as_str).unwrap_or_default();
    let enc = ContentAlgorithm::from_name(enc_name)
        .ok_or_else(|| KeyError::Decryption(format!("unsupported enc '{}'", enc_name)))?;

    let encrypted_key = match &envelope.encrypted_key {
        Some(value) => decode(value, "encrypted_key")?,
        None => Vec::new(),
    };
    let cek = unwrap_content_key(alg, enc, key, &encrypted_key, &header)?;

    let iv = decode(&envelope.iv, "iv")?;
    let ciphertext = decode(&envelope.ciphertext, "ciphertext")?;
    let tag = decode(&envelope.tag, "tag")?;
    let payload = open_content(enc, &cek, &iv, envelope.protected.as_bytes(), &ciphertext, &tag)?;

    if header.get("zip").and_then(Value::as_str) == Some("DEF") {
        inflate(&payload)
    } else {
        Ok(payload)
    }
}

// ---------------------------------------------------------------------------
// Key management
// ---------------------------------------------------------------------------

type WrappedKey = (Vec<u8>, Vec<u8>, Map<String, Value>);

fn wrap_content_key(alg: KeyWrapAlgorithm, enc: ContentAlgorithm, key: &[u8]) -> KeyResult<WrappedKey> {
    let mut header = Map::new();

    if alg == KeyWrapAlgorithm::Dir {
        if key.len() != enc.key_len() {
            return Err(KeyError::Encryption(format!(
                "dir with {} needs a {}-byte key, got {}",
                enc,
                enc.key_len(),
                key.len()
            )));
        }
        return Ok((key.to_vec(), Vec::new(), header));
    }

    let cek = random_bytes(enc.key_len());
    let encrypted_key = match alg {
        KeyWrapAlgorithm::A128Kw | KeyWrapAlgorithm::A192Kw | KeyWrapAlgorithm::A256Kw => {
            aes_key_wrap(expect_len(alg, key)?, &cek)?
        }
        KeyWrapAlgorithm::A128GcmKw | KeyWrapAlgorithm::A192GcmKw | KeyWrapAlgorithm::A256GcmKw => {
            let kek = expect_len(alg, key)?;
            let iv = random_bytes(GCM_IV_LEN);
            let (wrapped, tag) = gcm_seal(kek, &iv, &[], &cek)?;
            header.insert("iv".to_string(), Value::String(encode(&iv)));
            header.insert("tag".to_string(), Value::String(encode(&tag)));
            wrapped
        }
        KeyWrapAlgorithm::Pbes2Hs256A128Kw
        | KeyWrapAlgorithm::Pbes2Hs384A192Kw
        | KeyWrapAlgorithm::Pbes2Hs512A256Kw => {
            let p2s = random_bytes(PBES2_SALT_LEN);
            let kek = pbes2_derive(alg, key, &p2s, PBES2_ITERATIONS);
            header.insert("p2s".to_string(), Value::String(encode(&p2s)));
            header.insert("p2c".to_string(), Value::from(PBES2_ITERATIONS));
            aes_key_wrap(&kek, &cek)?
        }
        KeyWrapAlgorithm::Dir => unreachable!("handled above"),
    };

    Ok((cek, encrypted_key, header))
}

fn unwrap_content_key(
    alg: KeyWrapAlgorithm,
    enc: ContentAlgorithm,
    key: &[u8],
    encrypted_key: &[u8],
    header: &Map<String, Value>,
) -> KeyResult<Vec<u8>> {
    let header_bytes = |name: &str| -> KeyResult<Vec<u8>> {
        let value = header
            .get(name)
            .and_then(Value::as_str)
            .ok_or_else(|| KeyError::Decryption(format!("missing '{}' header", name)))?;
        decode(value, name)
    };

    let cek = match alg {
        KeyWrapAlgorithm::Dir => key.to_vec(),
        KeyWrapAlgorithm::A128Kw | KeyWrapAlgorithm::A192Kw | KeyWrapAlgorithm::A256Kw => {
            aes_key_unwrap(expect_len(alg, key)?, encrypted_key)?
        }
        KeyWrapAlgorithm::A128GcmKw | KeyWrapAlgorithm::A192GcmKw | KeyWrapAlgorithm::A256GcmKw => {
            let iv = header_bytes("iv")?;
            let tag = header_bytes("tag")?;
            gcm_open(expect_len(alg, key)?, &iv, &[], encrypted_key, &tag)?
        }
        KeyWrapAlgorithm::Pbes2Hs256A128Kw
        | KeyWrapAlgorithm::Pbes2Hs384A192Kw
        | KeyWrapAlgorithm::Pbes2Hs512A256Kw => {
            let p2s = header_bytes("p2s")?;
            let p2c = header
                .get("p2c")
                .and_then(Value::as_u64)
                .and_then(|count| u32::try_from(count).ok())
                .ok_or_else(|| KeyError::Decryption("missing 'p2c' header".to_string()))?;
            let kek = pbes2_derive(alg, key, &p2s, p2c);
            aes_key_unwrap(&kek, encrypted_key)?
        }
    };

    if cek.len() != enc.key_len() {
        return Err(KeyError::Decryption(format!(
            "content key has {} bytes, {} needs {}",
            cek.len(),
            enc,
            enc.key_len()
        )));
    }
    Ok(cek)
}

/// Validate the key length demanded by a key wrapping algorithm
fn expect_len(alg: KeyWrapAlgorithm, key: &[u8]) -> KeyResult<&[u8]> {
    let expected = match alg {
        KeyWrapAlgorithm::A128Kw | KeyWrapAlgorithm::A128GcmKw => 16,
        KeyWrapAlgorithm::A192Kw | KeyWrapAlgorithm::A192GcmKw => 24,
        _ => 32,
    };
    if key.len() != expected {
        return Err(KeyError::Encryption(format!(
            "{} needs a {}-byte key, got {}",
            alg,
            expected,
            key.len()
        )));
    }
    Ok(key)
}

/// PBKDF2 key derivation with the RFC 7518 salt input `alg || 0x00 || p2s`
fn pbes2_derive(alg: KeyWrapAlgorithm, password: &[u8], p2s: &[u8], iterations: u32) -> Vec<u8> {
    let mut salt = alg.name().as_bytes().to_vec();
    salt.push(0);
    salt.extend_from_slice(p2s);

    match alg {
        KeyWrapAlgorithm::Pbes2Hs384A192Kw => {
            let mut kek = vec![0u8; 24];
            pbkdf2::pbkdf2_hmac::<Sha384>(password, &salt, iterations, &mut kek);
            kek
        }
        KeyWrapAlgorithm::Pbes2Hs512A256Kw => {
            let mut kek = vec![0u8; 32];
            pbkdf2::pbkdf2_hmac::<Sha512>(password, &salt, iterations, &mut kek);
            kek
        }
        _ => {
            let mut kek = vec![0u8; 16];
            pbkdf2::pbkdf2_hmac::<Sha256>(password, &salt, iterations, &mut kek);
            kek
        }
    }
}

fn aes_key_wrap(kek: &[u8], cek: &[u8]) -> KeyResult<Vec<u8>> {
    let wrapped = match kek.len() {
        16 => aes_kw::KekAes128::new(GenericArray::from_slice(kek)).wrap_vec(cek),
        24 => aes_kw::KekAes192::new(GenericArray::from_slice(kek)).wrap_vec(cek),
        32 => aes_kw::KekAes256::new(GenericArray::from_slice(kek)).wrap_vec(cek),
        other => {
            return Err(KeyError::Encryption(format!(
                "AES key wrap needs a 16, 24 or 32 byte key, got {}",
                other
            )))
        }
    };
    wrapped.map_err(|e| KeyError::Encryption(format!("AES key wrap failed: {}", e)))
}

fn aes_key_unwrap(kek: &[u8], wrapped: &[u8]) -> KeyResult<Vec<u8>> {
    let unwrapped = match kek.len() {
        16 => aes_kw::KekAes128::new(GenericArray::from_slice(kek)).unwrap_vec(wrapped),
        24 => aes_kw::KekAes192::new(GenericArray::from_slice(kek)).unwrap_vec(wrapped),
        32 => aes_kw::KekAes256::new(GenericArray::from_slice(kek)).unwrap_vec(wrapped),
        other => {
            return Err(KeyError::Decryption(format!(
                "AES key unwrap needs a 16, 24 or 32 byte key, got {}",
                other
            )))
        }
    };
    unwrapped.map_err(|e| KeyError::Decryption(format!("AES key unwrap failed: {}", e)))
}

// ---------------------------------------------------------------------------
// Content encryption
// ---------------------------------------------------------------------------

fn seal_content(
    enc: ContentAlgorithm,
    cek: &[u8],
    iv: &[u8],
    aad: &[u8],
    plaintext: &[u8],
) -> KeyResult<(Vec<u8>, Vec<u8>)> {
    match enc {
        ContentAlgorithm::A128Gcm | ContentAlgorithm::A192Gcm | ContentAlgorithm::A256Gcm => {
            gcm_seal(cek, iv, aad, plaintext)
        }
        _ => cbc_hmac_seal(enc, cek, iv, aad, plaintext),
    }
}

fn open_content(
    enc: ContentAlgorithm,
    cek: &[u8],
    iv: &[u8],
    aad: &[u8],
    ciphertext: &[u8],
    tag: &[u8],
) -> KeyResult<Vec<u8>> {
    if iv.len() != enc.iv_len() {
        return Err(KeyError::Decryption(format!("{} needs a {}-byte iv", enc, enc.iv_len())));
    }
    match enc {
        ContentAlgorithm::A128Gcm | ContentAlgorithm::A192Gcm | ContentAlgorithm::A256Gcm => {
            gcm_open(cek, iv, aad, ciphertext, tag)
        }
        _ => cbc_hmac_open(enc, cek, iv, aad, ciphertext, tag),
    }
}

fn gcm_seal(key: &[u8], iv: &[u8], aad: &[u8], msg: &[u8]) -> KeyResult<(Vec<u8>, Vec<u8>)> {
    let payload = Payload { msg, aad };
    let nonce = GenericArray::from_slice(iv);
    let sealed = match key.len() {
        16 => Aes128Gcm::new(GenericArray::from_slice(key)).encrypt(nonce, payload),
        24 => Aes192Gcm::new(GenericArray::from_slice(key)).encrypt(nonce, payload),
        32 => Aes256Gcm::new(GenericArray::from_slice(key)).encrypt(nonce, payload),
        other => return Err(KeyError::Encryption(format!("invalid AES-GCM key length {}", other))),
    };
    let mut ciphertext =
        sealed.map_err(|e| KeyError::Encryption(format!("AES-GCM encryption failed: {}", e)))?;
    let tag = ciphertext.split_off(ciphertext.len() - GCM_TAG_LEN);
    Ok((ciphertext, tag))
}

fn gcm_open(key: &[u8], iv: &[u8], aad: &[u8], ciphertext: &[u8], tag: &[u8]) -> KeyResult<Vec<u8>> {
    if iv.len() != GCM_IV_LEN {
        return Err(KeyError::Decryption(format!("AES-GCM needs a {}-byte iv", GCM_IV_LEN)));
    }
    let mut combined = ciphertext.to_vec();
    combined.extend_from_slice(tag);
    let payload = Payload { msg: &combined, aad };
    let nonce = GenericArray::from_slice(iv);
    let opened = match key.len() {
        16 => Aes128Gcm::new(GenericArray::from_slice(key)).decrypt(nonce, payload),
        24 => Aes192Gcm::new(GenericArray::from_slice(key)).decrypt(nonce, payload),
        32 => Aes256Gcm::new(GenericArray::from_slice(key)).decrypt(nonce, payload),
        other => return Err(KeyError::Decryption(format!("invalid AES-GCM key length {}", other))),
    };
    opened.map_err(|e| KeyError::Decryption(format!("AES-GCM decryption failed: {}", e)))
}

fn cbc_hmac_seal(
    enc: ContentAlgorithm,
    cek: &[u8],
    iv: &[u8],
    aad: &[u8],
    plaintext: &[u8],
) -> KeyResult<(Vec<u8>, Vec<u8>)> {
    let (mac_key, enc_key) = cek.split_at(cek.len() / 2);
    let invalid = |e: cbc::cipher::InvalidLength| KeyError::Encryption(format!("AES-CBC setup failed: {}", e));

    let ciphertext = match enc {
        ContentAlgorithm::A128CbcHs256 => cbc::Encryptor::<Aes128>::new_from_slices(enc_key, iv)
            .map_err(invalid)?
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext),
        ContentAlgorithm::A192CbcHs384 => cbc::Encryptor::<Aes192>::new_from_slices(enc_key, iv)
            .map_err(invalid)?
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext),
        _ => cbc::Encryptor::<Aes256>::new_from_slices(enc_key, iv)
            .map_err(invalid)?
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext),
    };

    let tag = cbc_hmac_tag(enc, mac_key, aad, iv, &ciphertext)?;
    Ok((ciphertext, tag))
}

fn cbc_hmac_open(
    enc: ContentAlgorithm,
    cek: &[u8],
    iv: &[u8],
    aad: &[u8],
    ciphertext: &[u8],
    tag: &[u8],
) -> KeyResult<Vec<u8>> {
    let (mac_key, enc_key) = cek.split_at(cek.len() / 2);
    let expected = cbc_hmac_tag(enc, mac_key, aad, iv, ciphertext)?;
    if !constant_time_eq(&expected, tag) {
        return Err(KeyError::Decryption("authentication tag mismatch".to_string()));
    }

    let invalid = |e: cbc::cipher::InvalidLength| KeyError::Decryption(format!("AES-CBC setup failed: {}", e));
    let plaintext = match enc {
        ContentAlgorithm::A128CbcHs256 => cbc::Decryptor::<Aes128>::new_from_slices(enc_key, iv)
            .map_err(invalid)?
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext),
        ContentAlgorithm::A192CbcHs384 => cbc::Decryptor::<Aes192>::new_from_slices(enc_key, iv)
            .map_err(invalid)?
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext),
        _ => cbc::Decryptor::<Aes256>::new_from_slices(enc_key, iv)
            .map_err(invalid)?
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext),
    };
    plaintext.map_err(|_| KeyError::Decryption("invalid padding".to_string()))
}

/// HMAC over `aad || iv || ciphertext || AL`, truncated to the MAC key length
fn cbc_hmac_tag(
    enc: ContentAlgorithm,
    mac_key: &[u8],
    aad: &[u8],
    iv: &[u8],
    ciphertext: &[u8],
) -> KeyResult<Vec<u8>> {
    let al = ((aad.len() as u64) * 8).to_be_bytes();
    let invalid = |_: hmac::digest::InvalidLength| KeyError::Encryption("invalid HMAC key".to_string());

    let full = match enc {
        ContentAlgorithm::A192CbcHs384 => {
            let mut mac = <Hmac<Sha384> as Mac>::new_from_slice(mac_key).map_err(invalid)?;
            for part in [aad, iv, ciphertext, &al[..]] {
                mac.update(part);
            }
            mac.finalize().into_bytes().to_vec()
        }
        ContentAlgorithm::A256CbcHs512 => {
            let mut mac = <Hmac<Sha512> as Mac>::new_from_slice(mac_key).map_err(invalid)?;
            for part in [aad, iv, ciphertext, &al[..]] {
                mac.update(part);
            }
            mac.finalize().into_bytes().to_vec()
        }
        _ => {
            let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(mac_key).map_err(invalid)?;
            for part in [aad, iv, ciphertext, &al[..]] {
                mac.update(part);
            }
            mac.finalize().into_bytes().to_vec()
        }
    };
    Ok(full[..mac_key.len()].to_vec())
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

fn deflate(data: &[u8]) -> KeyResult<Vec<u8>> {
    let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

fn inflate(data: &[u8]) -> KeyResult<Vec<u8>> {
    let mut decoder = DeflateDecoder::new(data);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|e| KeyError::Decryption(format!("payload decompression failed: {}", e)))?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn header(alg: KeyWrapAlgorithm, enc: ContentAlgorithm, zip: bool) -> Map<String, Value> {
        let mut header = Map::new();
        header.insert("alg".into(), json!(alg.name()));
        header.insert("enc".into(), json!(enc.name()));
        if zip {
            header.insert("zip".into(), json!("DEF"));
        }
        header
    }

    fn key_for(alg: KeyWrapAlgorithm, enc: ContentAlgorithm) -> Vec<u8> {
        match alg {
            KeyWrapAlgorithm::Dir => vec![7u8; enc.key_len()],
            KeyWrapAlgorithm::A128Kw | KeyWrapAlgorithm::A128GcmKw => vec![1u8; 16],
            KeyWrapAlgorithm::A192Kw | KeyWrapAlgorithm::A192GcmKw => vec![2u8; 24],
            KeyWrapAlgorithm::A256Kw | KeyWrapAlgorithm::A256GcmKw => vec![3u8; 32],
            _ => b"a password of any length".to_vec(),
        }
    }

    #[test]
    fn test_every_algorithm_pair_decrypts() {
        let plaintext = br#"{"keys":[{"kty":"oct","k":"AAAA"}]}"#;
        for alg in KeyWrapAlgorithm::ALL {
            for enc in ContentAlgorithm::ALL {
                let key = key_for(alg, enc);
                let envelope = encrypt(plaintext, &header(alg, enc, false), alg, enc, &key).unwrap();
                assert_eq!(decrypt(&envelope, &key).unwrap(), plaintext, "{} / {}", alg, enc);
            }
        }
    }

    #[test]
    fn test_recipient_header_per_algorithm() {
        let enc = ContentAlgorithm::A128Gcm;

        let alg = KeyWrapAlgorithm::Pbes2Hs256A128Kw;
        let envelope = encrypt(b"x", &header(alg, enc, false), alg, enc, b"pw").unwrap();
        let recipient = envelope.header.unwrap();
        assert_eq!(recipient["p2c"], json!(PBES2_ITERATIONS));
        assert!(recipient.contains_key("p2s"));

        let alg = KeyWrapAlgorithm::Dir;
        let envelope = encrypt(b"x", &header(alg, enc, false), alg, enc, &[0u8; 16]).unwrap();
        assert!(envelope.header.is_none());
        assert!(envelope.encrypted_key.is_none());
    }

    #[test]
    fn test_compressed_payload_round_trips() {
        let alg = KeyWrapAlgorithm::A256Kw;
        let enc = ContentAlgorithm::A256CbcHs512;
        let plaintext = "repetitive ".repeat(200);
        let key = [9u8; 32];

        let envelope = encrypt(plaintext.as_bytes(), &header(alg, enc, true), alg, enc, &key).unwrap();
        let ciphertext_len = decode(&envelope.ciphertext, "ciphertext").unwrap().len();
        assert!(ciphertext_len < plaintext.len());
        assert_eq!(decrypt(&envelope, &key).unwrap(), plaintext.as_bytes());
    }

    #[test]
    fn test_tampered_protected_header_is_rejected() {
        let alg = KeyWrapAlgorithm::A128Kw;
        let enc = ContentAlgorithm::A128CbcHs256;
        let key = [1u8; 16];
        let mut envelope = encrypt(b"secret", &header(alg, enc, false), alg, enc, &key).unwrap();

        let mut forged = header(alg, enc, false);
        forged.insert("cty".into(), json!("jwk+json"));
        envelope.protected = encode(&serde_json::to_vec(&forged).unwrap());

        assert!(matches!(decrypt(&envelope, &key), Err(KeyError::Decryption(_))));
    }

    #[test]
    fn test_wrong_key_is_rejected() {
        let alg = KeyWrapAlgorithm::Pbes2Hs512A256Kw;
        let enc = ContentAlgorithm::A256Gcm;
        let envelope = encrypt(b"secret", &header(alg, enc, false), alg, enc, b"right").unwrap();
        assert!(decrypt(&envelope, b"wrong").is_err());
    }

    #[test]
    fn test_key_length_mismatch_is_an_encryption_error() {
        let alg = KeyWrapAlgorithm::A256Kw;
        let enc = ContentAlgorithm::A128Gcm;
        let result = encrypt(b"x", &header(alg, enc, false), alg, enc, b"short");
        assert!(matches!(result, Err(KeyError::Encryption(_))));
    }

    #[test]
    fn test_algorithm_names_round_trip() {
        for alg in KeyWrapAlgorithm::ALL {
            assert_eq!(KeyWrapAlgorithm::from_name(alg.name()), Some(alg));
        }
        for enc in ContentAlgorithm::ALL {
            assert_eq!(ContentAlgorithm::from_name(enc.name()), Some(enc));
        }
        assert_eq!(KeyWrapAlgorithm::from_name("RSA-OAEP"), None);
    }
}
