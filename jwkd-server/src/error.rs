//! HTTP error responses
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


use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use jwkd_keys::KeyError;
use serde_json::json;
use thiserror::Error;
use tracing::error;

/// Errors returned by HTTP handlers, rendered as `{"error": [message]}`
#[derive(Error, Debug)]
pub enum ApiError {
    #[error(transparent)]
    Key(#[from] KeyError),

    /// Malformed request parameters
    #[error("{0}")]
    BadRequest(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Key(KeyError::NotFound(_)) => StatusCode::NOT_FOUND,
            ApiError::Key(KeyError::Persistence(_)) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Key(e) if e.is_client_error() => StatusCode::BAD_REQUEST,
            ApiError::Key(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(error = %self, "Request failed");
        }
        (status, Json(json!({ "error": [self.to_string()] }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let status = |e: KeyError| ApiError::from(e).status();
        assert_eq!(status(KeyError::NotFound("x".into())), StatusCode::NOT_FOUND);
        assert_eq!(status(KeyError::Validation("x".into())), StatusCode::BAD_REQUEST);
        assert_eq!(status(KeyError::UnsupportedOperation("x".into())), StatusCode::BAD_REQUEST);
        assert_eq!(status(KeyError::UnsupportedCurve("x".into())), StatusCode::BAD_REQUEST);
        assert_eq!(status(KeyError::Persistence("x".into())), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(status(KeyError::Encryption("x".into())), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(ApiError::BadRequest("x".into()).status(), StatusCode::BAD_REQUEST);
    }
}
