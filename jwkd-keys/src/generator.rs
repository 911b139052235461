//! Key generation for the supported JWK families
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
use crate::key_types::{Jwk, KeyType};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use p256::elliptic_curve::sec1::ToEncodedPoint;
use rand::rngs::OsRng;
use rand::RngCore;
use rsa::traits::{PrivateKeyParts, PublicKeyParts};
use rsa::{BigUint, RsaPrivateKey};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Smallest RSA modulus the generator will produce
pub const MIN_RSA_BITS: usize = 2048;

/// Options describing the key to generate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyOptions {
    pub key_type: KeyType,
    /// Modulus length for RSA, key length in bits for random oct keys
    pub bit_size: Option<usize>,
    pub curve: Option<String>,
    /// Oct only: derive the key from this secret instead of random bytes
    pub secret: Option<String>,
    pub alg: Option<String>,
    #[serde(rename = "use")]
    pub key_use: Option<String>,
}

impl KeyOptions {
    pub fn new(key_type: KeyType) -> Self {
        Self {
            key_type,
            bit_size: None,
            curve: None,
            secret: None,
            alg: None,
            key_use: None,
        }
    }

    /// Default parameter set for each family, as offered by the generate endpoint
    pub fn defaults_for(key_type: KeyType) -> Self {
        let options = Self::new(key_type);
        match key_type {
            KeyType::Rsa => options.bit_size(4096),
            KeyType::Ec => options.curve("P-256"),
            KeyType::Okp => options.curve("Ed25519"),
            KeyType::Oct => options.bit_size(256),
        }
    }

    /// Oct key derived from a shared secret
    pub fn from_secret(secret: impl Into<String>) -> Self {
        Self::new(KeyType::Oct).secret(secret)
    }

    pub fn bit_size(mut self, bits: usize) -> Self {
        self.bit_size = Some(bits);
        self
    }

    pub fn curve(mut self, curve: impl Into<String>) -> Self {
        self.curve = Some(curve.into());
        self
    }

    pub fn secret(mut self, secret: impl Into<String>) -> Self {
        self.secret = Some(secret.into());
        self
    }

    pub fn alg(mut self, alg: impl Into<String>) -> Self {
        self.alg = Some(alg.into());
        self
    }

    pub fn key_use(mut self, key_use: impl Into<String>) -> Self {
        self.key_use = Some(key_use.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EcCurve {
    P256,
    P384,
    P521,
}

impl EcCurve {
    fn parse(name: &str) -> KeyResult<Self> {
        match name {
            "P-256" => Ok(EcCurve::P256),
            "P-384" => Ok(EcCurve::P384),
            "P-521" => Ok(EcCurve::P521),
            other => Err(KeyError::UnsupportedCurve(other.to_string())),
        }
    }

    fn name(&self) -> &'static str {
        match self {
            EcCurve::P256 => "P-256",
            EcCurve::P384 => "P-384",
            EcCurve::P521 => "P-521",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OkpCurve {
    Ed25519,
    X25519,
}

impl OkpCurve {
    fn parse(name: &str) -> KeyResult<Self> {
        match name {
            "Ed25519" => Ok(OkpCurve::Ed25519),
            "X25519" => Ok(OkpCurve::X25519),
            other => Err(KeyError::UnsupportedCurve(other.to_string())),
        }
    }

    fn name(&self) -> &'static str {
        match self {
            OkpCurve::Ed25519 => "Ed25519",
            OkpCurve::X25519 => "X25519",
        }
    }
}

fn b64(bytes: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(bytes)
}

fn b64_uint(value: &BigUint) -> String {
    b64(&value.to_bytes_be())
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

/// Generates JWKs from [`KeyOptions`]
#[derive(Debug, Clone)]
pub struct KeyGenerator {
    default_rsa_bits: usize,
    default_oct_bits: usize,
}

impl Default for KeyGenerator {
    fn default() -> Self {
        Self {
            default_rsa_bits: 4096,
            default_oct_bits: 512,
        }
    }
}

impl KeyGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the sizes used when options leave `bit_size` unset
    pub fn with_defaults(default_rsa_bits: usize, default_oct_bits: usize) -> Self {
        Self {
            default_rsa_bits,
            default_oct_bits,
        }
    }

    /// Generate a key. The result always carries a `kid` thumbprint.
    pub fn generate(&self, options: &KeyOptions) -> KeyResult<Jwk> {
        let mut jwk = match options.key_type {
            KeyType::Rsa => self.create_rsa_key(options.bit_size.unwrap_or(self.default_rsa_bits))?,
            KeyType::Ec => create_ec_key(EcCurve::parse(non_empty(&options.curve).unwrap_or("P-256"))?),
            KeyType::Okp => {
                create_okp_key(OkpCurve::parse(non_empty(&options.curve).unwrap_or("Ed25519"))?)
            }
            KeyType::Oct => match non_empty(&options.secret) {
                Some(secret) => create_from_secret(secret),
                None => self.create_oct_key(options.bit_size.unwrap_or(self.default_oct_bits))?,
            },
        };

        if let Some(alg) = non_empty(&options.alg) {
            jwk.insert("alg", alg);
        }
        if let Some(key_use) = non_empty(&options.key_use) {
            jwk.insert("use", key_use);
        }

        let jwk = algebra::add_thumbprint(jwk)?;
        debug!(key_type = %options.key_type, kid = jwk.kid().unwrap_or_default(), "Generated key");
        Ok(jwk)
    }

    /// Recover the options that regenerate a key of the same family and strength
    pub fn get_key_params(&self, jwk: &Jwk) -> KeyResult<KeyOptions> {
        let kty = jwk
            .kty()
            .ok_or_else(|| KeyError::InvalidFormat("key is missing the 'kty' member".to_string()))?;
        let key_type: KeyType = kty.parse()?;

        let mut options = match key_type {
            KeyType::Rsa => {
                let modulus = algebra::decode_member(jwk, "n")?;
                KeyOptions::new(KeyType::Rsa).bit_size(modulus.len() * 8)
            }
            KeyType::Ec | KeyType::Okp => {
                let curve = jwk.get_str("crv").ok_or_else(|| {
                    KeyError::InvalidFormat("key is missing the 'crv' member".to_string())
                })?;
                KeyOptions::new(key_type).curve(curve)
            }
            KeyType::Oct => {
                return Err(KeyError::UnsupportedOperation(
                    "can't get key parameters from an oct key".to_string(),
                ))
            }
        };

        options.alg = jwk.get_str("alg").map(str::to_string);
        options.key_use = jwk.get_str("use").map(str::to_string);
        Ok(options)
    }

    fn create_rsa_key(&self, bits: usize) -> KeyResult<Jwk> {
        if bits < MIN_RSA_BITS {
            return Err(KeyError::Validation(format!(
                "RSA keys must be at least {} bits, got {}",
                MIN_RSA_BITS, bits
            )));
        }

        let key = RsaPrivateKey::new(&mut OsRng, bits)
            .map_err(|e| KeyError::Validation(format!("RSA key generation failed: {}", e)))?;

        let mut jwk = Jwk::default();
        jwk.insert("kty", KeyType::Rsa.kty());
        jwk.insert("n", b64_uint(key.n()));
        jwk.insert("e", b64_uint(key.e()));
        jwk.insert("d", b64_uint(key.d()));

        let primes = key.primes();
        if let [p, q] = primes {
            jwk.insert("p", b64_uint(p));
            jwk.insert("q", b64_uint(q));
        }
        if let (Some(dp), Some(dq), Some(qi)) = (key.dp(), key.dq(), key.crt_coefficient()) {
            jwk.insert("dp", b64_uint(dp));
            jwk.insert("dq", b64_uint(dq));
            jwk.insert("qi", b64_uint(&qi));
        }
        Ok(jwk)
    }

    fn create_oct_key(&self, bits: usize) -> KeyResult<Jwk> {
        if bits == 0 || bits % 8 != 0 {
            return Err(KeyError::Validation(format!(
                "oct key size must be a positive multiple of 8, got {}",
                bits
            )));
        }

        let mut bytes = vec![0u8; bits / 8];
        OsRng.fill_bytes(&mut bytes);

        let mut jwk = Jwk::default();
        jwk.insert("kty", KeyType::Oct.kty());
        jwk.insert("k", b64(&bytes));
        Ok(jwk)
    }
}

fn create_ec_key(curve: EcCurve) -> Jwk {
    let (d, point) = match curve {
        EcCurve::P256 => {
            let secret = p256::SecretKey::random(&mut OsRng);
            let point = secret.public_key().to_encoded_point(false);
            (secret.to_bytes().to_vec(), point.as_bytes().to_vec())
        }
        EcCurve::P384 => {
            let secret = p384::SecretKey::random(&mut OsRng);
            let point = secret.public_key().to_encoded_point(false);
            (secret.to_bytes().to_vec(), point.as_bytes().to_vec())
        }
        EcCurve::P521 => {
            let secret = p521::SecretKey::random(&mut OsRng);
            let point = secret.public_key().to_encoded_point(false);
            (secret.to_bytes().to_vec(), point.as_bytes().to_vec())
        }
    };

    // Uncompressed SEC1 point: 0x04 || x || y
    let coordinate_len = (point.len() - 1) / 2;
    let (x, y) = point[1..].split_at(coordinate_len);

    let mut jwk = Jwk::default();
    jwk.insert("kty", KeyType::Ec.kty());
    jwk.insert("crv", curve.name());
    jwk.insert("x", b64(x));
    jwk.insert("y", b64(y));
    jwk.insert("d", b64(&d));
    jwk
}

fn create_okp_key(curve: OkpCurve) -> Jwk {
    let (d, x) = match curve {
        OkpCurve::Ed25519 => {
            let signing_key = ed25519_dalek::SigningKey::generate(&mut OsRng);
            (
                signing_key.to_bytes().to_vec(),
                signing_key.verifying_key().to_bytes().to_vec(),
            )
        }
        OkpCurve::X25519 => {
            let secret = x25519_dalek::StaticSecret::random_from_rng(OsRng);
            let public = x25519_dalek::PublicKey::from(&secret);
            (secret.to_bytes().to_vec(), public.to_bytes().to_vec())
        }
    };

    let mut jwk = Jwk::default();
    jwk.insert("kty", KeyType::Okp.kty());
    jwk.insert("crv", curve.name());
    jwk.insert("x", b64(&x));
    jwk.insert("d", b64(&d));
    jwk
}

/// Oct key whose material is the secret itself; deterministic
fn create_from_secret(secret: &str) -> Jwk {
    let mut jwk = Jwk::default();
    jwk.insert("kty", KeyType::Oct.kty());
    jwk.insert("k", b64(secret.as_bytes()));
    jwk
}
