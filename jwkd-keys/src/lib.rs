//! Key lifecycle core for jwkd
//!
//! Generates keys across the RSA, EC, OKP and oct families, converts stored
//! records into JWKs with RFC 7638 thumbprints, encrypts key sets for
//! transport and defines the repository boundary with a local implementation.
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


pub mod algebra;
pub mod encryption_key;
pub mod encryptor;
pub mod error;
pub mod generator;
pub mod jwe;
pub mod key_types;
pub mod local_store;
pub mod repository;

pub use encryption_key::{generate_encryption_key, EncryptionKeyPair};
pub use encryptor::{EncryptionSettings, KeySetEncryptor, Sealed};
pub use error::{KeyError, KeyResult};
pub use generator::{KeyGenerator, KeyOptions};
pub use jwe::{ContentAlgorithm, JweEnvelope, KeyWrapAlgorithm};
pub use key_types::{
    Inclusion, Jwk, JwkSet, KeyData, KeyFilter, KeyPayload, KeyRecord, KeyRef, KeyState, KeyType,
    Tags,
};
pub use local_store::LocalKeyRepository;
pub use repository::{EncryptionKeyRepository, KeyRepository, KeyWrite};
