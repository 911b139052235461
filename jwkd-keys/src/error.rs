//! Error types for key lifecycle operations
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


use thiserror::Error;

/// Key lifecycle errors
#[derive(Error, Debug)]
pub enum KeyError {
    /// Missing or invalid caller input
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Key not found: {0}")]
    NotFound(String),

    /// The operation has no meaning for this key (e.g. public form of an oct key)
    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    #[error("Unsupported key type: {0}")]
    UnsupportedKeyType(String),

    #[error("Unsupported curve: {0}")]
    UnsupportedCurve(String),

    #[error("Invalid key format: {0}")]
    InvalidFormat(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Encryption error: {0}")]
    Encryption(String),

    #[error("Decryption error: {0}")]
    Decryption(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl KeyError {
    /// True for errors caused by the caller's input rather than the service
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            KeyError::Validation(_)
                | KeyError::UnsupportedOperation(_)
                | KeyError::UnsupportedKeyType(_)
                | KeyError::UnsupportedCurve(_)
                | KeyError::InvalidFormat(_)
        )
    }
}

/// Result type for key operations
pub type KeyResult<T> = Result<T, KeyError>;
