// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

use clap::Parser;
use payment_ledger::auth::JwtVerifier;
use payment_ledger::config::Config;
use payment_ledger::http::{AppState, router};
use payment_ledger::identity::IdentityClient;
use payment_ledger::{PgStore, SignatureVerifier, StripeGateway};
use std::process;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let config = Config::parse();

    let filter = EnvFilter::try_new(&config.log_filter).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if let Err(e) = run(config).await {
        error!(error = %e, "payment ledger stopped");
        process::exit(1);
    }
}

async fn run(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    info!(?config, "starting payment ledger");

    let store = PgStore::connect(&config.database_url, config.database_max_connections).await?;
    store.migrate().await?;
    info!("database migrations applied");

    let gateway = StripeGateway::with_base_url(&config.stripe_secret_key, &config.stripe_api_base)?;
    let identity = IdentityClient::new(&config.user_service_url)?;

    let state = AppState::new(
        Arc::new(store),
        Arc::new(gateway),
        identity,
        JwtVerifier::new(&config.jwt_secret),
        SignatureVerifier::new(
            config.stripe_webhook_secret.clone(),
            config.webhook_tolerance_secs,
        ),
    );

    let listener = TcpListener::bind(config.listen_addr()).await?;
    let addr = listener.local_addr()?;
    info!(%addr, "listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("shut down cleanly");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for shutdown signal");
    }
    info!("shutdown requested");
}
