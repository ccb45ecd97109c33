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

//! Process configuration, read from flags or the environment.

use clap::Parser;
use clap::builder::NonEmptyStringValueParser;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

/// Payment ledger service
///
/// Mirrors gateway customers, payment intents, deposit holds and saved cards
/// into Postgres and reconciles them from signed gateway webhooks.
#[derive(Parser, Clone)]
#[command(name = "payment-ledger")]
#[command(about = "A payment-state reconciliation service", long_about = None)]
pub struct Config {
    /// Postgres connection string
    #[arg(long, env = "DATABASE_URL", hide_env_values = true)]
    #[arg(value_parser = NonEmptyStringValueParser::new())]
    pub database_url: String,

    #[arg(long, env = "DATABASE_MAX_CONNECTIONS", default_value_t = 10)]
    pub database_max_connections: u32,

    /// Gateway API secret key
    #[arg(long, env = "STRIPE_SECRET_KEY", hide_env_values = true)]
    #[arg(value_parser = NonEmptyStringValueParser::new())]
    pub stripe_secret_key: String,

    /// Shared secret for webhook signatures
    #[arg(long, env = "STRIPE_WEBHOOK_SECRET", hide_env_values = true)]
    #[arg(value_parser = NonEmptyStringValueParser::new())]
    pub stripe_webhook_secret: String,

    #[arg(long, env = "STRIPE_API_BASE", default_value = "https://api.stripe.com")]
    pub stripe_api_base: String,

    /// Accepted clock skew for webhook timestamps, in seconds (0 disables)
    #[arg(long, env = "WEBHOOK_TOLERANCE_SECS", default_value_t = 300)]
    pub webhook_tolerance_secs: u64,

    /// Base URL of the user service
    #[arg(long, env = "USER_SERVICE_URL")]
    #[arg(value_parser = NonEmptyStringValueParser::new())]
    pub user_service_url: String,

    /// HS256 secret for bearer tokens
    #[arg(long, env = "JWT_SECRET", hide_env_values = true)]
    #[arg(value_parser = NonEmptyStringValueParser::new())]
    pub jwt_secret: String,

    #[arg(long, env = "BIND_ADDRESS", default_value_t = IpAddr::V4(Ipv4Addr::UNSPECIFIED))]
    pub bind_address: IpAddr,

    #[arg(long, env = "PORT", default_value_t = 8080)]
    pub port: u16,

    /// Tracing filter directives, e.g. `info,payment_ledger=debug`
    #[arg(long, env = "RUST_LOG", default_value = "info")]
    pub log_filter: String,
}

impl Config {
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.port)
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("database_max_connections", &self.database_max_connections)
            .field("stripe_api_base", &self.stripe_api_base)
            .field("webhook_tolerance_secs", &self.webhook_tolerance_secs)
            .field("user_service_url", &self.user_service_url)
            .field("listen_addr", &self.listen_addr())
            .field("log_filter", &self.log_filter)
            .finish_non_exhaustive()
    }
}
