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

//! Error types for ledger and gateway operations.

use thiserror::Error;

/// A failure reported by, or on the way to, the payment gateway.
///
/// Status, code and message are the gateway's own, unmodified. Transport
/// failures (connection refused, timeout) carry no status.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{}", describe(.status, .code, .message))]
pub struct GatewayError {
    pub status: Option<u16>,
    pub code: Option<String>,
    pub message: String,
}

impl GatewayError {
    pub fn new(status: u16, code: Option<String>, message: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            code,
            message: message.into(),
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self {
            status: None,
            code: None,
            message: message.into(),
        }
    }
}

fn describe(status: &Option<u16>, code: &Option<String>, message: &str) -> String {
    match (status, code) {
        (Some(status), Some(code)) => format!("gateway returned {status} ({code}): {message}"),
        (Some(status), None) => format!("gateway returned {status}: {message}"),
        (None, _) => format!("gateway unreachable: {message}"),
    }
}

/// Durable store failures.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// The store could not be reached or refused the write.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Errors surfaced by every ledger operation.
#[derive(Error, Debug)]
pub enum PaymentError {
    /// Malformed caller input. No state was changed.
    #[error("validation failed: {0}")]
    Validation(String),

    /// The gateway rejected the call or could not be reached.
    #[error("upstream error: {0}")]
    Upstream(#[from] GatewayError),

    /// The ledger write failed. When raised after a gateway call, the
    /// gateway-side effect has already happened.
    #[error("persistence error: {0}")]
    Persistence(#[from] StoreError),

    /// Webhook authenticity check failed.
    #[error("invalid webhook signature: {0}")]
    InvalidSignature(String),

    /// Webhook body exceeded the size cap and was not inspected.
    #[error("payload exceeds {limit} bytes")]
    PayloadTooLarge { limit: usize },

    /// The identity service lookup failed.
    #[error("identity lookup failed: {0}")]
    Identity(String),

    #[error("record not found")]
    NotFound,

    #[error("unauthorized: {0}")]
    Unauthorized(String),
}
