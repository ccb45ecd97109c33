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

//! Deposit hold orchestration.
//!
//! A deposit is a reservation hold against a booking and listing. It follows
//! the same gateway-first, mirror-second lifecycle as a payment intent, with
//! refund releasing the hold through the gateway's cancel operation:
//!
//! ```text
//! (none) ──authorize──► requires_capture ──capture──► succeeded
//!                               │
//!                               └──refund──► canceled
//! ```

use crate::PaymentError;
use crate::base::{Amount, Currency, IntentId, UserId, require};
use crate::customer::CustomerProvisioner;
use crate::gateway::{
    Gateway, GatewayIntent, IntentRequest, META_BOOKING_ID, META_LISTING_ID, META_USER_ID, Metadata,
};
use crate::payment::Authorization;
use crate::store::{Deposit, InsertOutcome, LedgerStore, StatusOutcome, observed_now};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

/// Caller input for [`DepositOrchestrator::authorize`].
#[derive(Debug, Clone)]
pub struct AuthorizeDeposit {
    pub user_id: UserId,
    pub email: String,
    pub booking_id: String,
    pub listing_id: String,
    /// Smallest currency unit.
    pub amount: i64,
    pub currency: String,
}

#[derive(Clone)]
pub struct DepositOrchestrator {
    customers: CustomerProvisioner,
    gateway: Arc<dyn Gateway>,
    store: Arc<dyn LedgerStore>,
}

impl DepositOrchestrator {
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

    /// Places a hold for a booking and records it.
    ///
    /// # Errors
    ///
    /// - [`PaymentError::Validation`] - non-positive amount or blank currency,
    ///   booking, listing or user.
    /// - [`PaymentError::Upstream`] - the gateway refused; no row is written.
    /// - [`PaymentError::Persistence`] - the hold exists at the gateway but has
    ///   no local mirror.
    #[instrument(
        skip_all,
        fields(user_id = %request.user_id, booking_id = %request.booking_id, listing_id = %request.listing_id)
    )]
    pub async fn authorize(&self, request: AuthorizeDeposit) -> Result<Authorization, PaymentError> {
        let amount = Amount::new(request.amount)?;
        let currency = Currency::new(request.currency)?;
        require("booking_id", &request.booking_id)?;
        require("listing_id", &request.listing_id)?;

        let customer = self
            .customers
            .ensure_customer(&request.user_id, &request.email)
            .await?;

        let mut metadata = Metadata::new();
        metadata.insert(META_USER_ID.into(), request.user_id.to_string());
        metadata.insert(META_BOOKING_ID.into(), request.booking_id.clone());
        metadata.insert(META_LISTING_ID.into(), request.listing_id.clone());

        let intent = self
            .gateway
            .create_payment_intent(&IntentRequest {
                customer,
                amount,
                currency: currency.clone(),
                metadata,
                payment_method: None,
            })
            .await?;

        let now = observed_now();
        let record = Deposit {
            gateway_pi_id: intent.id.clone(),
            booking_id: request.booking_id,
            listing_id: request.listing_id,
            user_id: request.user_id,
            amount,
            currency,
            status: intent.status.clone(),
            created_at: now,
            updated_at: now,
        };

        match self.store.insert_deposit(&record).await {
            Ok(InsertOutcome::Created) => {
                info!(deposit_id = %intent.id, status = %intent.status, "deposit authorized");
            }
            Ok(InsertOutcome::Existing) => {
                warn!(deposit_id = %intent.id, "deposit already mirrored");
            }
            Err(e) => {
                error!(deposit_id = %intent.id, error = %e, "deposit hold created without local mirror");
                return Err(e.into());
            }
        }

        Ok(Authorization {
            intent_id: intent.id,
            client_secret: intent.client_secret.unwrap_or_default(),
            status: intent.status,
        })
    }

    /// Captures the held amount. Returns the gateway-reported status.
    #[instrument(skip_all, fields(deposit_id = %id))]
    pub async fn capture(&self, id: &IntentId) -> Result<String, PaymentError> {
        require("deposit_id", id.as_str())?;
        let intent = self.gateway.capture_payment_intent(id).await?;
        self.mirror(intent).await
    }

    /// Releases the hold without charging.
    #[instrument(skip_all, fields(deposit_id = %id))]
    pub async fn refund(&self, id: &IntentId) -> Result<String, PaymentError> {
        require("deposit_id", id.as_str())?;
        let intent = self.gateway.cancel_payment_intent(id).await?;
        self.mirror(intent).await
    }

    pub async fn deposit(&self, id: &IntentId) -> Result<Deposit, PaymentError> {
        self.store.deposit(id).await?.ok_or(PaymentError::NotFound)
    }

    pub async fn deposits_for_booking(&self, booking_id: &str) -> Result<Vec<Deposit>, PaymentError> {
        require("booking_id", booking_id)?;
        Ok(self.store.deposits_by_booking(booking_id).await?)
    }

    pub async fn deposits_for_user(&self, user_id: &UserId) -> Result<Vec<Deposit>, PaymentError> {
        require("user_id", user_id.as_str())?;
        Ok(self.store.deposits_by_user(user_id).await?)
    }

    async fn mirror(&self, intent: GatewayIntent) -> Result<String, PaymentError> {
        let outcome = self
            .store
            .update_deposit_status(&intent.id, &intent.status, observed_now())
            .await?;

        match outcome {
            StatusOutcome::Applied => info!(status = %intent.status, "deposit status mirrored"),
            StatusOutcome::Stale => warn!(status = %intent.status, "newer deposit status already stored"),
            StatusOutcome::Missing => warn!(status = %intent.status, "no local deposit to update"),
        }
        Ok(intent.status)
    }
}
