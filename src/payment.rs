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

//! Payment intent orchestration.
//!
//! Drives the manual-capture lifecycle of one-shot payments:
//!
//! ```text
//! (none) ──authorize──► requires_capture ──capture──► succeeded
//!                               │
//!                               └──cancel──► canceled
//! ```
//!
//! The gateway is called first and is authoritative for the status; the
//! ledger row is written afterwards as its durable mirror. No local
//! precondition is checked before capture or cancel: illegal transitions are
//! rejected by the gateway and surface as [`PaymentError::Upstream`], leaving
//! the stored status untouched.

use crate::base::{Amount, Currency, IntentId, PaymentMethodId, UserId, require};
use crate::customer::CustomerProvisioner;
use crate::gateway::{Gateway, GatewayIntent, IntentRequest, META_BOOKING_ID, META_USER_ID, Metadata};
use crate::store::{InsertOutcome, LedgerStore, PaymentIntent, StatusOutcome, observed_now};
use crate::PaymentError;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

/// Caller input for [`PaymentOrchestrator::authorize`].
#[derive(Debug, Clone)]
pub struct AuthorizePayment {
    pub user_id: UserId,
    pub email: String,
    pub booking_id: String,
    /// Smallest currency unit.
    pub amount: i64,
    pub currency: String,
    /// Saved card to charge off-session.
    pub payment_method: Option<PaymentMethodId>,
}

/// What the client needs to confirm an authorization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Authorization {
    pub intent_id: IntentId,
    pub client_secret: String,
    pub status: String,
}

#[derive(Clone)]
pub struct PaymentOrchestrator {
    customers: CustomerProvisioner,
    gateway: Arc<dyn Gateway>,
    store: Arc<dyn LedgerStore>,
}

impl PaymentOrchestrator {
    pub fn new(
        customers: CustomerProvisioner,
        gateway: Arc<dyn Gateway>,
        store: Arc<dyn LedgerStore>,
    ) -> Self {
        Self {
            customers,
            gateway,
            store,
        }
    }

    /// Places a manual-capture authorization and records it.
    ///
    /// # Errors
    ///
    /// - [`PaymentError::Validation`] - non-positive amount, blank currency,
    ///   booking or user.
    /// - [`PaymentError::Upstream`] - the gateway refused; no row is written.
    /// - [`PaymentError::Persistence`] - the gateway intent exists but has no
    ///   local mirror. A later intent webhook repairs the row.
    #[instrument(skip_all, fields(user_id = %request.user_id, booking_id = %request.booking_id))]
    pub async fn authorize(&self, request: AuthorizePayment) -> Result<Authorization, PaymentError> {
        let amount = Amount::new(request.amount)?;
        let currency = Currency::new(request.currency)?;
        require("booking_id", &request.booking_id)?;

        let customer = self
            .customers
            .ensure_customer(&request.user_id, &request.email)
            .await?;

        let mut metadata = Metadata::new();
        metadata.insert(META_USER_ID.into(), request.user_id.to_string());
        metadata.insert(META_BOOKING_ID.into(), request.booking_id.clone());

        let intent = self
            .gateway
            .create_payment_intent(&IntentRequest {
                customer,
                amount,
                currency: currency.clone(),
                metadata,
                payment_method: request.payment_method,
            })
            .await?;

        let now = observed_now();
        let record = PaymentIntent {
            gateway_pi_id: intent.id.clone(),
            booking_id: request.booking_id,
            user_id: request.user_id,
            amount,
            currency,
            status: intent.status.clone(),
            created_at: now,
            updated_at: now,
        };

        match self.store.insert_payment_intent(&record).await {
            Ok(InsertOutcome::Created) => {
                info!(intent_id = %intent.id, status = %intent.status, "payment authorized");
            }
            Ok(InsertOutcome::Existing) => {
                warn!(intent_id = %intent.id, "payment intent already mirrored");
            }
            Err(e) => {
                error!(intent_id = %intent.id, error = %e, "payment intent created without local mirror");
                return Err(e.into());
            }
        }

        Ok(Authorization {
            intent_id: intent.id,
            client_secret: intent.client_secret.unwrap_or_default(),
            status: intent.status,
        })
    }

    /// Captures an authorized payment and mirrors the resulting status.
    ///
    /// Returns the status reported by the gateway.
    #[instrument(skip_all, fields(intent_id = %id))]
    pub async fn capture(&self, id: &IntentId) -> Result<String, PaymentError> {
        require("payment_intent_id", id.as_str())?;
        let intent = self.gateway.capture_payment_intent(id).await?;
        self.mirror(intent).await
    }

    /// Cancels an authorization, releasing the hold.
    #[instrument(skip_all, fields(intent_id = %id))]
    pub async fn cancel(&self, id: &IntentId) -> Result<String, PaymentError> {
        require("payment_intent_id", id.as_str())?;
        let intent = self.gateway.cancel_payment_intent(id).await?;
        self.mirror(intent).await
    }

    pub async fn payment_intent(&self, id: &IntentId) -> Result<PaymentIntent, PaymentError> {
        self.store
            .payment_intent(id)
            .await?
            .ok_or(PaymentError::NotFound)
    }

    async fn mirror(&self, intent: GatewayIntent) -> Result<String, PaymentError> {
        let outcome = self
            .store
            .update_payment_intent_status(&intent.id, &intent.status, observed_now())
            .await?;

        match outcome {
            StatusOutcome::Applied => info!(status = %intent.status, "payment status mirrored"),
            StatusOutcome::Stale => warn!(status = %intent.status, "newer payment status already stored"),
            StatusOutcome::Missing => warn!(status = %intent.status, "no local payment intent to update"),
        }
        Ok(intent.status)
    }
}
