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

//! Ledger storage.
//!
//! Four record kinds, each with a unique key enforced by the store:
//!
//! | Record | Unique key | Mutable fields |
//! |--------|------------|----------------|
//! | [`CustomerMapping`] | `user_id` | none |
//! | [`PaymentMethod`] | `gateway_pm_id` | none |
//! | [`PaymentIntent`] | `gateway_pi_id` | `status`, `updated_at` |
//! | [`Deposit`] | `gateway_pi_id` | `status`, `updated_at` |
//!
//! Creates are create-if-absent: a duplicate key is reported as
//! [`InsertOutcome::Existing`], never as an error, so concurrent duplicate
//! attempts resolve at the storage layer. Status writes are single-row and
//! guarded by `updated_at` so an older observation never overwrites a newer one.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use crate::StoreError;
use crate::base::{Amount, Currency, CustomerId, IntentId, PaymentMethodId, UserId};
use async_trait::async_trait;
use chrono::{DateTime, SubsecRound, Utc};
use serde::Serialize;

/// The current time at whole-second precision.
///
/// Gateway events carry second-resolution timestamps, so synchronous status
/// writes are stamped on the same basis. An event from the same second as a
/// synchronous write compares equal and is applied.
pub fn observed_now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(0)
}

/// Application user ↔ gateway customer. Immutable once written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct CustomerMapping {
    pub user_id: UserId,
    pub email: String,
    pub gateway_customer_id: CustomerId,
    pub created_at: DateTime<Utc>,
}

/// A gateway-confirmed card saved against a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct PaymentMethod {
    pub user_id: UserId,
    pub gateway_pm_id: PaymentMethodId,
    pub brand: String,
    pub last4: String,
    pub exp_month: i32,
    pub exp_year: i32,
    pub created_at: DateTime<Utc>,
}

/// Local mirror of a one-shot payment intent.
///
/// `status` is the gateway's status string, stored verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct PaymentIntent {
    pub gateway_pi_id: IntentId,
    pub booking_id: String,
    pub user_id: UserId,
    pub amount: Amount,
    pub currency: Currency,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Local mirror of a reservation hold tied to a booking and listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct Deposit {
    pub gateway_pi_id: IntentId,
    pub booking_id: String,
    pub listing_id: String,
    pub user_id: UserId,
    pub amount: Amount,
    pub currency: Currency,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Result of a create-if-absent write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Created,
    /// A row with the same unique key already existed and was left untouched.
    Existing,
}

/// Result of a guarded status write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusOutcome {
    Applied,
    /// The stored row was updated more recently than the observation.
    Stale,
    /// No row with that key exists.
    Missing,
}

#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn customer_by_user(&self, user_id: &UserId) -> Result<Option<CustomerMapping>, StoreError>;

    async fn insert_customer(&self, mapping: &CustomerMapping) -> Result<InsertOutcome, StoreError>;

    async fn payment_method(&self, id: &PaymentMethodId) -> Result<Option<PaymentMethod>, StoreError>;

    async fn insert_payment_method(&self, method: &PaymentMethod) -> Result<InsertOutcome, StoreError>;

    /// Newest first.
    async fn payment_methods_by_user(&self, user_id: &UserId) -> Result<Vec<PaymentMethod>, StoreError>;

    async fn payment_intent(&self, id: &IntentId) -> Result<Option<PaymentIntent>, StoreError>;

    async fn insert_payment_intent(&self, intent: &PaymentIntent) -> Result<InsertOutcome, StoreError>;

    /// Writes `status` only if `as_of` is not older than the stored `updated_at`.
    async fn update_payment_intent_status(
        &self,
        id: &IntentId,
        status: &str,
        as_of: DateTime<Utc>,
    ) -> Result<StatusOutcome, StoreError>;

    async fn deposit(&self, id: &IntentId) -> Result<Option<Deposit>, StoreError>;

    async fn insert_deposit(&self, deposit: &Deposit) -> Result<InsertOutcome, StoreError>;

    /// Writes `status` only if `as_of` is not older than the stored `updated_at`.
    async fn update_deposit_status(
        &self,
        id: &IntentId,
        status: &str,
        as_of: DateTime<Utc>,
    ) -> Result<StatusOutcome, StoreError>;

    /// Newest first.
    async fn deposits_by_booking(&self, booking_id: &str) -> Result<Vec<Deposit>, StoreError>;

    /// Newest first.
    async fn deposits_by_user(&self, user_id: &UserId) -> Result<Vec<Deposit>, StoreError>;
}
