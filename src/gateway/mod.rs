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

//! Payment gateway boundary.
//!
//! The [`Gateway`] trait is the narrow contract the orchestrators depend on:
//! customer creation, setup intents, manual-capture payment intents and
//! payment-method lookup. Every call either returns the gateway's own view of
//! the object (ID, client secret, status string) or fails with a
//! [`GatewayError`] carrying the gateway's status and message unmodified.
//!
//! No call is retried here. Retry policy belongs to the caller or to the
//! gateway's webhook redelivery schedule.

mod stripe;

pub use stripe::StripeGateway;

use crate::base::{Amount, CustomerId, IntentId, PaymentMethodId, UserId};
use crate::{Currency, GatewayError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Correlation metadata attached to gateway objects (`user_id`, `booking_id`,
/// `listing_id`) so that webhook payloads trace back to ledger rows.
pub type Metadata = BTreeMap<String, String>;

pub const META_USER_ID: &str = "user_id";
pub const META_BOOKING_ID: &str = "booking_id";
pub const META_LISTING_ID: &str = "listing_id";

/// Intent status strings as reported by the gateway.
///
/// The ledger stores whatever the gateway reports; these are only the values
/// this crate itself needs to recognise.
pub mod status {
    pub const REQUIRES_PAYMENT_METHOD: &str = "requires_payment_method";
    pub const REQUIRES_CAPTURE: &str = "requires_capture";
    pub const SUCCEEDED: &str = "succeeded";
    pub const CANCELED: &str = "canceled";
}

/// How a saved payment method is intended to be used.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SetupUsage {
    #[default]
    OffSession,
    OnSession,
}

impl SetupUsage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OffSession => "off_session",
            Self::OnSession => "on_session",
        }
    }
}

/// Parameters for a manual-capture payment intent.
#[derive(Debug, Clone)]
pub struct IntentRequest {
    pub customer: CustomerId,
    pub amount: Amount,
    pub currency: Currency,
    pub metadata: Metadata,
    /// Saved card to confirm off-session with. When `None` the client
    /// confirms using the returned client secret.
    pub payment_method: Option<PaymentMethodId>,
}

/// The gateway's view of a payment intent after a create/capture/cancel call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayIntent {
    pub id: IntentId,
    pub client_secret: Option<String>,
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetupIntent {
    pub id: String,
    pub client_secret: String,
    pub status: String,
}

/// Card details of a confirmed payment method. Never contains the PAN.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CardDetails {
    pub id: PaymentMethodId,
    pub brand: String,
    pub last4: String,
    pub exp_month: i32,
    pub exp_year: i32,
}

#[async_trait]
pub trait Gateway: Send + Sync {
    /// Creates a gateway customer tagged with `user_id`.
    ///
    /// Implementations should make this idempotent per `user_id` where the
    /// gateway supports it, so concurrent first-time provisioning collapses
    /// into a single customer.
    async fn create_customer(&self, user_id: &UserId, email: &str) -> Result<CustomerId, GatewayError>;

    async fn create_setup_intent(
        &self,
        customer: &CustomerId,
        usage: SetupUsage,
        metadata: &Metadata,
    ) -> Result<SetupIntent, GatewayError>;

    async fn create_payment_intent(&self, request: &IntentRequest) -> Result<GatewayIntent, GatewayError>;

    async fn capture_payment_intent(&self, id: &IntentId) -> Result<GatewayIntent, GatewayError>;

    async fn cancel_payment_intent(&self, id: &IntentId) -> Result<GatewayIntent, GatewayError>;

    async fn retrieve_payment_method(&self, id: &PaymentMethodId) -> Result<CardDetails, GatewayError>;
}
