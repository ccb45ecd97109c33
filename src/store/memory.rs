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

//! In-process ledger store.
//!
//! Each record kind lives in its own [`DashMap`] keyed by the record's unique
//! key. Creates go through the entry API so check-and-insert is atomic per
//! key; status writes hold the shard lock for the compare against
//! `updated_at`, which makes the guard race-free without any store-wide lock.

use super::{
    CustomerMapping, Deposit, InsertOutcome, LedgerStore, PaymentIntent, PaymentMethod,
    StatusOutcome,
};
use crate::StoreError;
use crate::base::{IntentId, PaymentMethodId, UserId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};

/// A record tagged with its insertion sequence, used to break `created_at`
/// ties when listing newest first.
#[derive(Debug, Clone)]
struct Sequenced<T> {
    seq: u64,
    record: T,
}

/// Records whose status mirrors the gateway.
trait StatusMirror {
    fn apply_status(&mut self, status: &str, as_of: DateTime<Utc>) -> StatusOutcome;
}

impl StatusMirror for PaymentIntent {
    fn apply_status(&mut self, status: &str, as_of: DateTime<Utc>) -> StatusOutcome {
        if as_of < self.updated_at {
            return StatusOutcome::Stale;
        }
        self.status = status.to_owned();
        self.updated_at = as_of;
        StatusOutcome::Applied
    }
}

impl StatusMirror for Deposit {
    fn apply_status(&mut self, status: &str, as_of: DateTime<Utc>) -> StatusOutcome {
        if as_of < self.updated_at {
            return StatusOutcome::Stale;
        }
        self.status = status.to_owned();
        self.updated_at = as_of;
        StatusOutcome::Applied
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    customers: DashMap<UserId, CustomerMapping>,
    payment_methods: DashMap<PaymentMethodId, Sequenced<PaymentMethod>>,
    payment_intents: DashMap<IntentId, Sequenced<PaymentIntent>>,
    deposits: DashMap<IntentId, Sequenced<Deposit>>,
    sequence: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn insert<K, T>(&self, map: &DashMap<K, Sequenced<T>>, key: K, record: &T) -> InsertOutcome
    where
        K: Eq + Hash,
        T: Clone,
    {
        match map.entry(key) {
            Entry::Occupied(_) => InsertOutcome::Existing,
            Entry::Vacant(entry) => {
                entry.insert(Sequenced {
                    seq: self.sequence.fetch_add(1, Ordering::Relaxed),
                    record: record.clone(),
                });
                InsertOutcome::Created
            }
        }
    }
}

fn write_status<T: StatusMirror>(
    map: &DashMap<IntentId, Sequenced<T>>,
    id: &IntentId,
    status: &str,
    as_of: DateTime<Utc>,
) -> StatusOutcome {
    match map.get_mut(id) {
        Some(mut entry) => entry.record.apply_status(status, as_of),
        None => StatusOutcome::Missing,
    }
}

/// Collects matching records newest first.
fn newest_first<K, T, F>(map: &DashMap<K, Sequenced<T>>, created_at: F, keep: impl Fn(&T) -> bool) -> Vec<T>
where
    K: Eq + Hash,
    T: Clone,
    F: Fn(&T) -> DateTime<Utc>,
{
    let mut rows: Vec<Sequenced<T>> = map
        .iter()
        .filter(|entry| keep(&entry.record))
        .map(|entry| entry.value().clone())
        .collect();
    rows.sort_by(|a, b| {
        created_at(&b.record)
            .cmp(&created_at(&a.record))
            .then(b.seq.cmp(&a.seq))
    });
    rows.into_iter().map(|row| row.record).collect()
}

#[async_trait]
impl LedgerStore for MemoryStore {
    async fn customer_by_user(&self, user_id: &UserId) -> Result<Option<CustomerMapping>, StoreError> {
        Ok(self.customers.get(user_id).map(|entry| entry.value().clone()))
    }

    async fn insert_customer(&self, mapping: &CustomerMapping) -> Result<InsertOutcome, StoreError> {
        match self.customers.entry(mapping.user_id.clone()) {
            Entry::Occupied(_) => Ok(InsertOutcome::Existing),
            Entry::Vacant(entry) => {
                entry.insert(mapping.clone());
                Ok(InsertOutcome::Created)
            }
        }
    }

    async fn payment_method(&self, id: &PaymentMethodId) -> Result<Option<PaymentMethod>, StoreError> {
        Ok(self.payment_methods.get(id).map(|entry| entry.record.clone()))
    }

    async fn insert_payment_method(&self, method: &PaymentMethod) -> Result<InsertOutcome, StoreError> {
        Ok(self.insert(&self.payment_methods, method.gateway_pm_id.clone(), method))
    }

    async fn payment_methods_by_user(&self, user_id: &UserId) -> Result<Vec<PaymentMethod>, StoreError> {
        Ok(newest_first(
            &self.payment_methods,
            |method| method.created_at,
            |method| &method.user_id == user_id,
        ))
    }

    async fn payment_intent(&self, id: &IntentId) -> Result<Option<PaymentIntent>, StoreError> {
        Ok(self.payment_intents.get(id).map(|entry| entry.record.clone()))
    }

    async fn insert_payment_intent(&self, intent: &PaymentIntent) -> Result<InsertOutcome, StoreError> {
        Ok(self.insert(&self.payment_intents, intent.gateway_pi_id.clone(), intent))
    }

    async fn update_payment_intent_status(
        &self,
        id: &IntentId,
        status: &str,
        as_of: DateTime<Utc>,
    ) -> Result<StatusOutcome, StoreError> {
        Ok(write_status(&self.payment_intents, id, status, as_of))
    }

    async fn deposit(&self, id: &IntentId) -> Result<Option<Deposit>, StoreError> {
        Ok(self.deposits.get(id).map(|entry| entry.record.clone()))
    }

    async fn insert_deposit(&self, deposit: &Deposit) -> Result<InsertOutcome, StoreError> {
        Ok(self.insert(&self.deposits, deposit.gateway_pi_id.clone(), deposit))
    }

    async fn update_deposit_status(
        &self,
        id: &IntentId,
        status: &str,
        as_of: DateTime<Utc>,
    ) -> Result<StatusOutcome, StoreError> {
        Ok(write_status(&self.deposits, id, status, as_of))
    }

    async fn deposits_by_booking(&self, booking_id: &str) -> Result<Vec<Deposit>, StoreError> {
        Ok(newest_first(
            &self.deposits,
            |deposit| deposit.created_at,
            |deposit| deposit.booking_id == booking_id,
        ))
    }

    async fn deposits_by_user(&self, user_id: &UserId) -> Result<Vec<Deposit>, StoreError> {
        Ok(newest_first(
            &self.deposits,
            |deposit| deposit.created_at,
            |deposit| &deposit.user_id == user_id,
        ))
    }
}
