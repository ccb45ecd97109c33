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

//! Customer provisioning.
//!
//! Guarantees that every application user maps to exactly one gateway
//! customer. The ledger is the source of truth; the gateway is only called on
//! a miss. Concurrent first-time callers for the same user may both reach the
//! gateway; the unique key on `user_id` picks a single persisted winner and
//! every caller returns that winner.

use crate::PaymentError;
use crate::base::{CustomerId, UserId};
use crate::gateway::Gateway;
use crate::store::{CustomerMapping, InsertOutcome, LedgerStore};
use chrono::Utc;
use std::sync::Arc;
use tracing::{info, instrument, warn};

#[derive(Clone)]
pub struct CustomerProvisioner {
    store: Arc<dyn LedgerStore>,
    gateway: Arc<dyn Gateway>,
}

impl CustomerProvisioner {
    pub fn new(store: Arc<dyn LedgerStore>, gateway: Arc<dyn Gateway>) -> Self {
        Self { store, gateway }
    }

    /// Returns the gateway customer for `user_id`, creating it on first use.
    ///
    /// # Errors
    ///
    /// - [`PaymentError::Validation`] - blank `user_id` or `email`.
    /// - [`PaymentError::Upstream`] - the gateway refused to create the customer.
    /// - [`PaymentError::Persistence`] - the mapping could not be read or written.
    #[instrument(skip_all, fields(user_id = %user_id))]
    pub async fn ensure_customer(&self, user_id: &UserId, email: &str) -> Result<CustomerId, PaymentError> {
        if user_id.is_empty() {
            return Err(PaymentError::Validation("user_id is required".to_string()));
        }
        if email.trim().is_empty() {
            return Err(PaymentError::Validation("email is required".to_string()));
        }

        if let Some(existing) = self.existing(user_id).await? {
            return Ok(existing);
        }

        let created = self.gateway.create_customer(user_id, email).await?;
        let mapping = CustomerMapping {
            user_id: user_id.clone(),
            email: email.to_owned(),
            gateway_customer_id: created.clone(),
            created_at: Utc::now(),
        };

        match self.store.insert_customer(&mapping).await? {
            InsertOutcome::Created => {
                info!(customer_id = %created, "gateway customer provisioned");
                Ok(created)
            }
            InsertOutcome::Existing => {
                // Lost the race: the persisted mapping is the one every later
                // call will see, so hand that out instead of our own.
                let winner = self.existing(user_id).await?.ok_or_else(|| {
                    PaymentError::Persistence(crate::StoreError::Unavailable(format!(
                        "customer mapping for {user_id} vanished after conflict"
                    )))
                })?;
                if winner != created {
                    warn!(
                        orphaned = %created,
                        winner = %winner,
                        "provisioning race lost, gateway customer left unreferenced"
                    );
                }
                Ok(winner)
            }
        }
    }

    async fn existing(&self, user_id: &UserId) -> Result<Option<CustomerId>, PaymentError> {
        let mapping = self.store.customer_by_user(user_id).await?;
        Ok(mapping
            .map(|mapping| mapping.gateway_customer_id)
            .filter(|id| !id.is_empty()))
    }
}
