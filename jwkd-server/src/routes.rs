//! HTTP routes
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
use crate::params::Params;
use crate::service::{CreatedKey, KeyService, DEFAULT_CLEANUP_DAYS};
use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header, HeaderName, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use jwkd_keys::{KeyError, Sealed};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;

pub const THUMBPRINT_HEADER: HeaderName = HeaderName::from_static("x-jwk-thumbprint");

/// Smallest accepted key id; thumbprints and record ids are both longer
const MIN_KEY_ID_LEN: usize = 32;

type SharedService = Arc<KeyService>;
type QueryParams = Query<HashMap<String, String>>;

/// Build the API router
pub fn router(service: SharedService) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/keys/generate", post(generate_key))
        .route("/keys/cleanup", post(cleanup_keys))
        .route("/keys/:key_id", get(get_keys).delete(delete_key))
        .route("/keys/:key_id/rotate", post(rotate_key))
        .route("/keys/:key_id/revoke", post(revoke_key))
        .route("/keys/:key_id/delete", post(delete_key))
        .route("/encryption_keys/register", post(register_encryption_key))
        .with_state(service)
}

/// Route segment accepted as a key id or thumbprint
pub fn is_key_id(segment: &str) -> bool {
    segment.len() >= MIN_KEY_ID_LEN
        && segment
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

fn checked_key_id(segment: String) -> Result<String, ApiError> {
    if is_key_id(&segment) {
        Ok(segment)
    } else {
        Err(KeyError::NotFound(segment).into())
    }
}

fn key_headers(key: &CreatedKey) -> [(HeaderName, String); 2] {
    [
        (header::LOCATION, format!("/keys/{}", key.thumbprint)),
        (THUMBPRINT_HEADER, key.thumbprint.clone()),
    ]
}

/// Health check handler
async fn health_check() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "service": "jwkd",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// `GET /keys/{all|private|public}` lists keys, anything else fetches one key
async fn get_keys(
    State(service): State<SharedService>,
    Path(key_id): Path<String>,
    Query(query): QueryParams,
) -> Result<Json<Sealed>, ApiError> {
    let params = Params::from_request(query, &[])?;

    let sealed = match key_id.as_str() {
        "all" | "private" | "public" => {
            let kind = params.list_kind(&key_id)?;
            let hash = params.encryption_key();
            service.list_keys(kind, params.tags(), hash.as_deref()).await?
        }
        _ => {
            let key_id = checked_key_id(key_id)?;
            let hash = params.encryption_key();
            service.get_single_key(&key_id, hash.as_deref()).await?
        }
    };
    Ok(Json(sealed))
}

async fn generate_key(
    State(service): State<SharedService>,
    Query(query): QueryParams,
    body: Bytes,
) -> Result<Response, ApiError> {
    let params = Params::from_request(query, &body)?;
    let options = params.key_options()?;
    let tags = params.creation_tags()?;

    let created = service.generate_key(options, tags).await?;
    Ok((StatusCode::CREATED, key_headers(&created)).into_response())
}

async fn cleanup_keys(
    State(service): State<SharedService>,
    Query(query): QueryParams,
    body: Bytes,
) -> Result<StatusCode, ApiError> {
    let params = Params::from_request(query, &body)?;
    let days = params.get_i64("days")?.unwrap_or(DEFAULT_CLEANUP_DAYS);

    service
        .cleanup_keys(params.tags(), days, params.get_bool("force"))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn rotate_key(
    State(service): State<SharedService>,
    Path(key_id): Path<String>,
) -> Result<Response, ApiError> {
    let key_id = checked_key_id(key_id)?;
    let created = service.rotate_key(&key_id).await?;
    Ok((StatusCode::NO_CONTENT, key_headers(&created)).into_response())
}

async fn revoke_key(
    State(service): State<SharedService>,
    Path(key_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let key_id = checked_key_id(key_id)?;
    service.revoke_key(&key_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Serves both `POST /keys/{id}/delete` and `DELETE /keys/{id}`
async fn delete_key(
    State(service): State<SharedService>,
    Path(key_id): Path<String>,
    Query(query): QueryParams,
    body: Bytes,
) -> Result<StatusCode, ApiError> {
    let key_id = checked_key_id(key_id)?;
    let params = Params::from_request(query, &body)?;

    service.delete_key(&key_id, params.get_bool("force")).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn register_encryption_key(
    State(service): State<SharedService>,
    Query(query): QueryParams,
    body: Bytes,
) -> Result<Json<serde_json::Value>, ApiError> {
    let params = Params::from_request(query, &body)?;
    let secret = params
        .get_string("secret")
        .filter(|secret| !secret.is_empty())
        .ok_or_else(|| ApiError::BadRequest("No secret has been provided".to_string()))?;

    let pair = service.register_encryption_key(&secret).await?;
    Ok(Json(json!({ "data": pair })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_id_pattern() {
        assert!(is_key_id("NzbLsXh8uDCcd-6MNwXF4W_7noWXFZAfHkxZsRGC9Xs"));
        assert!(is_key_id("6f1c1b3e-5a7d-4c1e-9d8f-2a4b6c8d0e1f"));
        assert!(!is_key_id("too-short"));
        assert!(!is_key_id("NzbLsXh8uDCcd+6MNwXF4W/7noWXFZAfHkxZsRGC9Xs"));
    }
}
