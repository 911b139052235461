//! jwkd HTTP service
//!
//! Orchestrates key generation, rotation, revocation and cleanup, and serves
//! key listings (optionally encrypted per client) over a small HTTP API.
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


pub mod app;
pub mod error;
pub mod params;
pub mod routes;
pub mod server;
pub mod service;

pub use app::build_service;
pub use error::ApiError;
pub use routes::router;
pub use server::ApiServer;
pub use service::{CreatedKey, KeyService, ListKind};
