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

//! Saved payment methods.
//!
//! A card is only recorded once the gateway reports it confirmed, either
//! through a synchronous registration call or the setup-confirmed webhook.
//! Both paths funnel into [`PaymentMethodRegistrar::retrieve_and_save`], which
//! is idempotent per gateway payment-method ID.

use crate::PaymentError;
use crate::base::{CustomerId, PaymentMethodId, UserId, require};
use crate::gateway::{Gateway, META_USER_ID, Metadata, SetupIntent, SetupUsage};
use crate::store::{InsertOutcome, LedgerStore, PaymentMethod};
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

#[derive(Clone)]
pub struct PaymentMethodRegistrar {
    gateway: Arc<dyn Gateway>,
    store: Arc<dyn LedgerStore>,
}

impl PaymentMethodRegistrar {
    pub fn new(gateway: Arc<dyn Gateway>, store: Arc<dyn LedgerStore>) -> Self {
        Self { gateway, store }
    }

    /// Issues a setup intent for the client to confirm a card against.
    ///
    /// Nothing is persisted: the card is unknown until the gateway confirms it.
    /// The intent is tagged with `user_id` so the confirmation webhook can
    /// attribute the card.
    #[instrument(skip_all, fields(user_id = %user_id, customer_id = %customer))]
    pub async fn create_setup_intent(
        &self,
        customer: &CustomerId,
        user_id: &UserId,
        usage: SetupUsage,
    ) -> Result<SetupIntent, PaymentError> {
        require("customer_id", customer.as_str())?;
        require("user_id", user_id.as_str())?;

        let mut metadata = Metadata::new();
        metadata.insert(META_USER_ID.into(), user_id.to_string());

        let intent = self
            .gateway
            .create_setup_intent(customer, usage, &metadata)
            .await?;
        debug!(setup_intent_id = %intent.id, "setup intent issued");
        Ok(intent)
    }

    /// Fetches card details from the gateway and records them for `user_id`.
    ///
    /// Re-registering a known payment method is a no-op that returns the
    /// stored record.
    #[instrument(skip_all, fields(user_id = %user_id, payment_method_id = %id))]
    pub async fn retrieve_and_save(
        &self,
        user_id: &UserId,
        id: &PaymentMethodId,
    ) -> Result<PaymentMethod, PaymentError> {
        require("user_id", user_id.as_str())?;
        require("payment_method_id", id.as_str())?;

        let card = self.gateway.retrieve_payment_method(id).await?;
        let method = PaymentMethod {
            user_id: user_id.clone(),
            gateway_pm_id: card.id,
            brand: card.brand,
            last4: card.last4,
            exp_month: card.exp_month,
            exp_year: card.exp_year,
            created_at: Utc::now(),
        };

        match self.store.insert_payment_method(&method).await? {
            InsertOutcome::Created => {
                info!(brand = %method.brand, last4 = %method.last4, "payment method saved");
                Ok(method)
            }
            InsertOutcome::Existing => {
                let stored = self
                    .store
                    .payment_method(&method.gateway_pm_id)
                    .await?
                    .unwrap_or(method);
                if &stored.user_id != user_id {
                    warn!(owner = %stored.user_id, "payment method already saved for another user");
                }
                Ok(stored)
            }
        }
    }

    /// Saved cards for `user_id`, newest first.
    pub async fn list_by_user(&self, user_id: &UserId) -> Result<Vec<PaymentMethod>, PaymentError> {
        require("user_id", user_id.as_str())?;
        Ok(self.store.payment_methods_by_user(user_id).await?)
    }
}
