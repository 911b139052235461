//! Request parameters merged from the query string and a JSON body
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


use crate::error::ApiError;
use crate::service::ListKind;
use jwkd_keys::{KeyOptions, KeyType, Tags};
use serde_json::{Map, Value};
use std::collections::HashMap;

pub const TAG_PREFIX: &str = "tag:";
pub const ENCRYPTION_PREFIX: &str = "encryption:";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Params(Map<String, Value>);

impl Params {
    /// Query parameters overlaid with the members of a JSON object body
    pub fn from_request(query: HashMap<String, String>, body: &[u8]) -> Result<Self, ApiError> {
        let mut params: Map<String, Value> = query
            .into_iter()
            .map(|(name, value)| (name, Value::String(value)))
            .collect();

        if !body.iter().all(u8::is_ascii_whitespace) {
            let parsed: Value = serde_json::from_slice(body)
                .map_err(|e| ApiError::BadRequest(format!("Invalid JSON body: {}", e)))?;
            match parsed {
                Value::Object(members) => params.extend(members),
                Value::Null => {}
                _ => return Err(ApiError::BadRequest("The request body must be a JSON object".to_string())),
            }
        }

        Ok(Self(params))
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    /// Scalar parameter as a string; null counts as absent
    pub fn get_string(&self, name: &str) -> Option<String> {
        self.get(name).and_then(scalar_string)
    }

    /// Loose boolean: `true`, `1`, `"true"`, `"yes"` and `"on"` are true
    pub fn get_bool(&self, name: &str) -> bool {
        match self.get(name) {
            Some(Value::Bool(value)) => *value,
            Some(Value::Number(number)) => number.as_f64().is_some_and(|n| n != 0.0),
            Some(Value::String(value)) => matches!(
                value.trim().to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            ),
            _ => false,
        }
    }

    pub fn get_i64(&self, name: &str) -> Result<Option<i64>, ApiError> {
        match self.get(name) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Number(number)) => number
                .as_i64()
                .map(Some)
                .ok_or_else(|| ApiError::BadRequest(format!("'{}' must be an integer", name))),
            Some(Value::String(value)) => value
                .trim()
                .parse()
                .map(Some)
                .map_err(|_| ApiError::BadRequest(format!("'{}' must be an integer", name))),
            Some(_) => Err(ApiError::BadRequest(format!("'{}' must be an integer", name))),
        }
    }

    /// Parameters named `<prefix><name>`, keyed by `name`; names and values are lowercased
    pub fn with_prefix(&self, prefix: &str) -> Tags {
        self.0
            .iter()
            .filter(|(name, _)| name.starts_with(prefix))
            .filter_map(|(name, value)| {
                let value = scalar_string(value)?;
                Some((name[prefix.len()..].to_lowercase(), value.to_lowercase()))
            })
            .collect()
    }

    /// Tag filter from `tag:<name>` parameters
    pub fn tags(&self) -> Tags {
        self.with_prefix(TAG_PREFIX)
    }

    /// Hash of the transport key from `encryption:key`
    pub fn encryption_key(&self) -> Option<String> {
        self.get_string(&format!("{}key", ENCRYPTION_PREFIX))
            .filter(|key| !key.is_empty())
    }

    /// Listing kind for a route segment; `type=private|public` narrows `all`
    pub fn list_kind(&self, segment: &str) -> Result<ListKind, ApiError> {
        let kind: ListKind = segment.parse()?;
        if kind != ListKind::All {
            return Ok(kind);
        }
        match self.get_string("type").map(|t| t.to_lowercase()).as_deref() {
            Some("private") => Ok(ListKind::Private),
            Some("public") => Ok(ListKind::Public),
            _ => Ok(kind),
        }
    }

    /// Tags for a new key: the `tags` object overlaid on `tag:<name>` parameters
    pub fn creation_tags(&self) -> Result<Tags, ApiError> {
        let mut tags = self.tags();
        match self.get("tags") {
            None | Some(Value::Null) => {}
            Some(Value::Object(members)) => {
                for (name, value) in members {
                    let value = scalar_string(value).ok_or_else(|| {
                        ApiError::BadRequest(format!("tag '{}' must be a scalar", name))
                    })?;
                    tags.insert(name.clone(), value);
                }
            }
            Some(_) => return Err(ApiError::BadRequest("'tags' must be an object".to_string())),
        }
        Ok(tags)
    }

    /// Generation options: per-type defaults overlaid with the given parameters
    pub fn key_options(&self) -> Result<KeyOptions, ApiError> {
        let key_type: KeyType = self
            .get_string("key_type")
            .unwrap_or_else(|| "RSA".to_string())
            .parse()?;
        let mut options = KeyOptions::defaults_for(key_type);

        // Only the parameters each family accepts are taken from the request
        if matches!(key_type, KeyType::Rsa | KeyType::Oct) {
            if let Some(bits) = self.get_i64("bit_size")? {
                let bits = usize::try_from(bits)
                    .map_err(|_| ApiError::BadRequest("'bit_size' must be positive".to_string()))?;
                options = options.bit_size(bits);
            }
        }
        if matches!(key_type, KeyType::Ec | KeyType::Okp) {
            if let Some(curve) = self.get_string("curve").filter(|curve| !curve.is_empty()) {
                options = options.curve(curve);
            }
        }
        if key_type == KeyType::Oct {
            if let Some(secret) = self.get_string("secret").filter(|secret| !secret.is_empty()) {
                options = options.secret(secret);
            }
        }
        if let Some(alg) = self.get_string("alg").filter(|alg| !alg.is_empty()) {
            options = options.alg(alg);
        }
        if let Some(key_use) = self.get_string("use").filter(|key_use| !key_use.is_empty()) {
            options = options.key_use(key_use);
        }
        Ok(options)
    }
}

fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::String(value) => Some(value.clone()),
        Value::Number(number) => Some(number.to_string()),
        Value::Bool(value) => Some(value.to_string()),
        _ => None,
    }
}
