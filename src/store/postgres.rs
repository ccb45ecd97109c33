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

//! PostgreSQL ledger store.
//!
//! Unique keys are enforced by the schema in `migrations/`; creates use
//! `ON CONFLICT DO NOTHING` and report whether a row was written. Status
//! writes compare against `updated_at` in the `WHERE` clause so the guard is a
//! single statement.

use super::{
    CustomerMapping, Deposit, InsertOutcome, LedgerStore, PaymentIntent, PaymentMethod,
    StatusOutcome,
};
use crate::StoreError;
use crate::base::{IntentId, PaymentMethodId, UserId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use sqlx::postgres::{PgPoolOptions, PgQueryResult};

const PAYMENT_INTENT_COLUMNS: &str =
    "gateway_pi_id, booking_id, user_id, amount, currency, status, created_at, updated_at";

const DEPOSIT_COLUMNS: &str =
    "gateway_pi_id, booking_id, listing_id, user_id, amount, currency, status, created_at, updated_at";

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Opens a connection pool against `database_url`.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Applies the embedded schema migrations.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    /// Distinguishes a stale write from a missing row after a guarded update
    /// touched nothing.
    async fn status_outcome(
        &self,
        table: &str,
        result: PgQueryResult,
        id: &IntentId,
    ) -> Result<StatusOutcome, StoreError> {
        if result.rows_affected() > 0 {
            return Ok(StatusOutcome::Applied);
        }
        let query = format!("SELECT EXISTS (SELECT 1 FROM {table} WHERE gateway_pi_id = $1)");
        let exists: bool = sqlx::query_scalar(&query)
            .bind(id.as_str())
            .fetch_one(&self.pool)
            .await?;
        Ok(if exists {
            StatusOutcome::Stale
        } else {
            StatusOutcome::Missing
        })
    }
}

fn insert_outcome(result: PgQueryResult) -> InsertOutcome {
    if result.rows_affected() > 0 {
        InsertOutcome::Created
    } else {
        InsertOutcome::Existing
    }
}

#[async_trait]
impl LedgerStore for PgStore {
    async fn customer_by_user(&self, user_id: &UserId) -> Result<Option<CustomerMapping>, StoreError> {
        let mapping = sqlx::query_as::<_, CustomerMapping>(
            "SELECT user_id, email, gateway_customer_id, created_at FROM customers WHERE user_id = $1",
        )
        .bind(user_id.as_str())
        .fetch_optional(&self.pool)
        .await?;
        Ok(mapping)
    }

    async fn insert_customer(&self, mapping: &CustomerMapping) -> Result<InsertOutcome, StoreError> {
        let result = sqlx::query(
            "INSERT INTO customers (user_id, email, gateway_customer_id, created_at) \
             VALUES ($1, $2, $3, $4) \
             ON CONFLICT (user_id) DO NOTHING",
        )
        .bind(mapping.user_id.as_str())
        .bind(&mapping.email)
        .bind(mapping.gateway_customer_id.as_str())
        .bind(mapping.created_at)
        .execute(&self.pool)
        .await?;
        Ok(insert_outcome(result))
    }

    async fn payment_method(&self, id: &PaymentMethodId) -> Result<Option<PaymentMethod>, StoreError> {
        let method = sqlx::query_as::<_, PaymentMethod>(
            "SELECT user_id, gateway_pm_id, brand, last4, exp_month, exp_year, created_at \
             FROM payment_methods WHERE gateway_pm_id = $1",
        )
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await?;
        Ok(method)
    }

    async fn insert_payment_method(&self, method: &PaymentMethod) -> Result<InsertOutcome, StoreError> {
        let result = sqlx::query(
            "INSERT INTO payment_methods \
               (user_id, gateway_pm_id, brand, last4, exp_month, exp_year, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) \
             ON CONFLICT (gateway_pm_id) DO NOTHING",
        )
        .bind(method.user_id.as_str())
        .bind(method.gateway_pm_id.as_str())
        .bind(&method.brand)
        .bind(&method.last4)
        .bind(method.exp_month)
        .bind(method.exp_year)
        .bind(method.created_at)
        .execute(&self.pool)
        .await?;
        Ok(insert_outcome(result))
    }

    async fn payment_methods_by_user(&self, user_id: &UserId) -> Result<Vec<PaymentMethod>, StoreError> {
        let methods = sqlx::query_as::<_, PaymentMethod>(
            "SELECT user_id, gateway_pm_id, brand, last4, exp_month, exp_year, created_at \
             FROM payment_methods WHERE user_id = $1 \
             ORDER BY created_at DESC, id DESC",
        )
        .bind(user_id.as_str())
        .fetch_all(&self.pool)
        .await?;
        Ok(methods)
    }

    async fn payment_intent(&self, id: &IntentId) -> Result<Option<PaymentIntent>, StoreError> {
        let query =
            format!("SELECT {PAYMENT_INTENT_COLUMNS} FROM payment_intents WHERE gateway_pi_id = $1");
        let intent = sqlx::query_as::<_, PaymentIntent>(&query)
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await?;
        Ok(intent)
    }

    async fn insert_payment_intent(&self, intent: &PaymentIntent) -> Result<InsertOutcome, StoreError> {
        let query = format!(
            "INSERT INTO payment_intents ({PAYMENT_INTENT_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
             ON CONFLICT (gateway_pi_id) DO NOTHING"
        );
        let result = sqlx::query(&query)
            .bind(intent.gateway_pi_id.as_str())
            .bind(&intent.booking_id)
            .bind(intent.user_id.as_str())
            .bind(intent.amount.value())
            .bind(intent.currency.as_str())
            .bind(&intent.status)
            .bind(intent.created_at)
            .bind(intent.updated_at)
            .execute(&self.pool)
            .await?;
        Ok(insert_outcome(result))
    }

    async fn update_payment_intent_status(
        &self,
        id: &IntentId,
        status: &str,
        as_of: DateTime<Utc>,
    ) -> Result<StatusOutcome, StoreError> {
        let result = sqlx::query(
            "UPDATE payment_intents SET status = $2, updated_at = $3 \
             WHERE gateway_pi_id = $1 AND updated_at <= $3",
        )
        .bind(id.as_str())
        .bind(status)
        .bind(as_of)
        .execute(&self.pool)
        .await?;
        self.status_outcome("payment_intents", result, id).await
    }

    async fn deposit(&self, id: &IntentId) -> Result<Option<Deposit>, StoreError> {
        let query = format!("SELECT {DEPOSIT_COLUMNS} FROM deposits WHERE gateway_pi_id = $1");
        let deposit = sqlx::query_as::<_, Deposit>(&query)
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await?;
        Ok(deposit)
    }

    async fn insert_deposit(&self, deposit: &Deposit) -> Result<InsertOutcome, StoreError> {
        let query = format!(
            "INSERT INTO deposits ({DEPOSIT_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
             ON CONFLICT (gateway_pi_id) DO NOTHING"
        );
        let result = sqlx::query(&query)
            .bind(deposit.gateway_pi_id.as_str())
            .bind(&deposit.booking_id)
            .bind(&deposit.listing_id)
            .bind(deposit.user_id.as_str())
            .bind(deposit.amount.value())
            .bind(deposit.currency.as_str())
            .bind(&deposit.status)
            .bind(deposit.created_at)
            .bind(deposit.updated_at)
            .execute(&self.pool)
            .await?;
        Ok(insert_outcome(result))
    }

    async fn update_deposit_status(
        &self,
        id: &IntentId,
        status: &str,
        as_of: DateTime<Utc>,
    ) -> Result<StatusOutcome, StoreError> {
        let result = sqlx::query(
            "UPDATE deposits SET status = $2, updated_at = $3 \
             WHERE gateway_pi_id = $1 AND updated_at <= $3",
        )
        .bind(id.as_str())
        .bind(status)
        .bind(as_of)
        .execute(&self.pool)
        .await?;
        self.status_outcome("deposits", result, id).await
    }

    async fn deposits_by_booking(&self, booking_id: &str) -> Result<Vec<Deposit>, StoreError> {
        let query = format!(
            "SELECT {DEPOSIT_COLUMNS} FROM deposits WHERE booking_id = $1 \
             ORDER BY created_at DESC, id DESC"
        );
        let deposits = sqlx::query_as::<_, Deposit>(&query)
            .bind(booking_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(deposits)
    }

    async fn deposits_by_user(&self, user_id: &UserId) -> Result<Vec<Deposit>, StoreError> {
        let query = format!(
            "SELECT {DEPOSIT_COLUMNS} FROM deposits WHERE user_id = $1 \
             ORDER BY created_at DESC, id DESC"
        );
        let deposits = sqlx::query_as::<_, Deposit>(&query)
            .bind(user_id.as_str())
            .fetch_all(&self.pool)
            .await?;
        Ok(deposits)
    }
}
