// Copyright 2026 Daniel Pelikan
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

//! MAP MSE daemon

use anyhow::Result;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use map_mse::config::Config;
use map_mse::instance::{spawn_instance, spawn_mns_pump, InstanceMessage};
use map_mse::mns::{MnsClient, UnboundTransport};
use map_mse::server::MasServer;
use map_mse::service::LoggingService;
use map_mse::store::SqliteStore;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("map_mse=info"));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(filter)
        .init();

    info!("Starting MAP MSE v{}...", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = Config::load()?;
    info!("Configuration loaded");

    // Open the message store
    let store = Arc::new(SqliteStore::open(&config.database_path())?);
    info!("Message store at {}", config.database_path().display());

    let service = Arc::new(LoggingService);
    let transport = Arc::new(UnboundTransport);
    let (client, mns_events) = MnsClient::new(
        config.mns.supported_features,
        transport.clone(),
        transport,
    );
    let mns = Arc::new(Mutex::new(client));
    let pump = spawn_mns_pump(mns.clone(), mns_events);

    let mut instances = Vec::new();
    for instance in &config.instances {
        let server = MasServer::new(instance.clone(), store.clone(), service.clone(), mns.clone())?;
        instances.push(spawn_instance(server));
    }
    info!("Ready. {} MAS instance(s) running.", instances.len());

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    for (handle, task) in instances {
        if let Err(e) = handle.send(InstanceMessage::Shutdown).await {
            error!("MAS {} did not take shutdown: {}", handle.mas_id(), e);
        }
        if let Err(e) = task.await {
            error!("MAS {} task failed: {}", handle.mas_id(), e);
        }
    }
    pump.abort();

    info!("MAP MSE stopped");
    Ok(())
}
