//! jwkd
//!
//! Serves the JWK lifecycle API.
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


use anyhow::Result;
use jwkd_config::AppConfig;
use jwkd_logging::{init_with_format, LogFormat};
use jwkd_server::{build_service, ApiServer};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = AppConfig::from_env()
        .map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))?;

    // Initialize logging
    let format = config.log_format().parse::<LogFormat>().unwrap_or_default();
    init_with_format("jwkd", config.log_level(), format);

    info!(
        port = config.server.port,
        encryption_enabled = config.encryption.enabled,
        "Configuration loaded"
    );

    let service = build_service(&config).await?;

    ApiServer::new(config.server.port, service).start().await?;

    info!("jwkd stopped");
    Ok(())
}
