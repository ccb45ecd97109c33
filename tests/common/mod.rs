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

//! Shared test doubles: an in-process gateway and a store with injectable faults.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use payment_ledger::gateway::{
    CardDetails, Gateway, GatewayIntent, IntentRequest, Metadata, SetupIntent, SetupUsage, status,
};
use payment_ledger::store::{
    CustomerMapping, Deposit, InsertOutcome, PaymentIntent, PaymentMethod, StatusOutcome,
};
use payment_ledger::{
    CustomerId, CustomerProvisioner, DepositOrchestrator, GatewayError, IntentId, LedgerStore,
    MemoryStore, PaymentMethodId, PaymentMethodRegistrar, PaymentOrchestrator, StoreError, UserId,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

// === Fake Gateway ===

#[derive(Default)]
struct FakeState {
    customers: HashMap<UserId, CustomerId>,
    intents: HashMap<IntentId, String>,
    cards: HashMap<PaymentMethodId, CardDetails>,
    setup_requests: Vec<(CustomerId, SetupUsage, Metadata)>,
    intent_requests: Vec<IntentRequest>,
    next_id: u64,
}

/// Gateway double that enforces the manual-capture state machine.
#[derive(Default)]
pub struct FakeGateway {
    state: Mutex<FakeState>,
    customer_creates: AtomicUsize,
    /// When set, every customer create mints a new customer, as a gateway
    /// without idempotency keys would.
    pub fresh_customers: AtomicBool,
    pub decline_intents: AtomicBool,
}

fn unexpected_state(id: &IntentId, status: &str, action: &str) -> GatewayError {
    GatewayError::new(
        400,
        Some("payment_intent_unexpected_state".to_string()),
        format!("PaymentIntent {id} could not be {action} because it has a status of {status}."),
    )
}

fn missing(kind: &str, id: &str) -> GatewayError {
    GatewayError::new(
        404,
        Some("resource_missing".to_string()),
        format!("No such {kind}: '{id}'"),
    )
}

impl FakeGateway {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_id(state: &mut FakeState, prefix: &str) -> String {
        state.next_id += 1;
        format!("{prefix}_{:04}", state.next_id)
    }

    pub fn customer_creates(&self) -> usize {
        self.customer_creates.load(Ordering::SeqCst)
    }

    pub fn add_card(&self, id: &str, brand: &str, last4: &str) {
        self.state.lock().cards.insert(
            PaymentMethodId::new(id),
            CardDetails {
                id: PaymentMethodId::new(id),
                brand: brand.to_string(),
                last4: last4.to_string(),
                exp_month: 12,
                exp_year: 2030,
            },
        );
    }

    /// Client-side confirmation with the returned client secret.
    pub fn confirm(&self, id: &IntentId) {
        let mut state = self.state.lock();
        if let Some(current) = state.intents.get_mut(id) {
            if current.as_str() == status::REQUIRES_PAYMENT_METHOD {
                *current = status::REQUIRES_CAPTURE.to_string();
            }
        }
    }

    pub fn intent_status(&self, id: &IntentId) -> Option<String> {
        self.state.lock().intents.get(id).cloned()
    }

    pub fn intent_count(&self) -> usize {
        self.state.lock().intents.len()
    }

    pub fn setup_requests(&self) -> Vec<(CustomerId, SetupUsage, Metadata)> {
        self.state.lock().setup_requests.clone()
    }

    pub fn intent_requests(&self) -> Vec<IntentRequest> {
        self.state.lock().intent_requests.clone()
    }
}

#[async_trait]
impl Gateway for FakeGateway {
    async fn create_customer(&self, user_id: &UserId, _email: &str) -> Result<CustomerId, GatewayError> {
        self.customer_creates.fetch_add(1, Ordering::SeqCst);
        // Give concurrent provisioners a chance to interleave.
        tokio::task::yield_now().await;

        let mut state = self.state.lock();
        if !self.fresh_customers.load(Ordering::SeqCst) {
            if let Some(existing) = state.customers.get(user_id) {
                return Ok(existing.clone());
            }
        }
        let id = CustomerId::new(Self::next_id(&mut state, "cus"));
        state.customers.insert(user_id.clone(), id.clone());
        Ok(id)
    }

    async fn create_setup_intent(
        &self,
        customer: &CustomerId,
        usage: SetupUsage,
        metadata: &Metadata,
    ) -> Result<SetupIntent, GatewayError> {
        let mut state = self.state.lock();
        state
            .setup_requests
            .push((customer.clone(), usage, metadata.clone()));
        let id = Self::next_id(&mut state, "seti");
        Ok(SetupIntent {
            client_secret: format!("{id}_secret"),
            id,
            status: status::REQUIRES_PAYMENT_METHOD.to_string(),
        })
    }

    async fn create_payment_intent(&self, request: &IntentRequest) -> Result<GatewayIntent, GatewayError> {
        if self.decline_intents.load(Ordering::SeqCst) {
            return Err(GatewayError::new(
                402,
                Some("card_declined".to_string()),
                "Your card was declined.",
            ));
        }

        let mut state = self.state.lock();
        state.intent_requests.push(request.clone());
        let id = IntentId::new(Self::next_id(&mut state, "pi"));
        let initial = if request.payment_method.is_some() {
            status::REQUIRES_CAPTURE
        } else {
            status::REQUIRES_PAYMENT_METHOD
        };
        state.intents.insert(id.clone(), initial.to_string());

        Ok(GatewayIntent {
            client_secret: Some(format!("{id}_secret")),
            id,
            status: initial.to_string(),
        })
    }

    async fn capture_payment_intent(&self, id: &IntentId) -> Result<GatewayIntent, GatewayError> {
        let mut state = self.state.lock();
        let current = state
            .intents
            .get_mut(id)
            .ok_or_else(|| missing("payment_intent", id.as_str()))?;
        if current.as_str() != status::REQUIRES_CAPTURE {
            return Err(unexpected_state(id, current, "captured"));
        }
        *current = status::SUCCEEDED.to_string();
        Ok(GatewayIntent {
            id: id.clone(),
            client_secret: None,
            status: current.clone(),
        })
    }

    async fn cancel_payment_intent(&self, id: &IntentId) -> Result<GatewayIntent, GatewayError> {
        let mut state = self.state.lock();
        let current = state
            .intents
            .get_mut(id)
            .ok_or_else(|| missing("payment_intent", id.as_str()))?;
        if current.as_str() == status::SUCCEEDED || current.as_str() == status::CANCELED {
            return Err(unexpected_state(id, current, "canceled"));
        }
        *current = status::CANCELED.to_string();
        Ok(GatewayIntent {
            id: id.clone(),
            client_secret: None,
            status: current.clone(),
        })
    }

    async fn retrieve_payment_method(&self, id: &PaymentMethodId) -> Result<CardDetails, GatewayError> {
        self.state
            .lock()
            .cards
            .get(id)
            .cloned()
            .ok_or_else(|| missing("payment_method", id.as_str()))
    }
}

// === Fault-injecting Store ===

/// [`MemoryStore`] with switches that make selected operations fail.
#[derive(Default)]
pub struct FlakyStore {
    pub inner: MemoryStore,
    pub fail_intent_inserts: AtomicBool,
    pub fail_customer_reads: AtomicBool,
    /// The next customer lookup reports a miss even if a mapping exists.
    pub miss_next_customer_read: AtomicBool,
}

fn unavailable() -> StoreError {
    StoreError::Unavailable("injected failure".to_string())
}

#[async_trait]
impl LedgerStore for FlakyStore {
    async fn customer_by_user(&self, user_id: &UserId) -> Result<Option<CustomerMapping>, StoreError> {
        if self.fail_customer_reads.load(Ordering::SeqCst) {
            return Err(unavailable());
        }
        if self.miss_next_customer_read.swap(false, Ordering::SeqCst) {
            return Ok(None);
        }
        self.inner.customer_by_user(user_id).await
    }

    async fn insert_customer(&self, mapping: &CustomerMapping) -> Result<InsertOutcome, StoreError> {
        self.inner.insert_customer(mapping).await
    }

    async fn payment_method(&self, id: &PaymentMethodId) -> Result<Option<PaymentMethod>, StoreError> {
        self.inner.payment_method(id).await
    }

    async fn insert_payment_method(&self, method: &PaymentMethod) -> Result<InsertOutcome, StoreError> {
        self.inner.insert_payment_method(method).await
    }

    async fn payment_methods_by_user(&self, user_id: &UserId) -> Result<Vec<PaymentMethod>, StoreError> {
        self.inner.payment_methods_by_user(user_id).await
    }

    async fn payment_intent(&self, id: &IntentId) -> Result<Option<PaymentIntent>, StoreError> {
        self.inner.payment_intent(id).await
    }

    async fn insert_payment_intent(&self, intent: &PaymentIntent) -> Result<InsertOutcome, StoreError> {
        if self.fail_intent_inserts.load(Ordering::SeqCst) {
            return Err(unavailable());
        }
        self.inner.insert_payment_intent(intent).await
    }

    async fn update_payment_intent_status(
        &self,
        id: &IntentId,
        status: &str,
        as_of: DateTime<Utc>,
    ) -> Result<StatusOutcome, StoreError> {
        self.inner.update_payment_intent_status(id, status, as_of).await
    }

    async fn deposit(&self, id: &IntentId) -> Result<Option<Deposit>, StoreError> {
        self.inner.deposit(id).await
    }

    async fn insert_deposit(&self, deposit: &Deposit) -> Result<InsertOutcome, StoreError> {
        if self.fail_intent_inserts.load(Ordering::SeqCst) {
            return Err(unavailable());
        }
        self.inner.insert_deposit(deposit).await
    }

    async fn update_deposit_status(
        &self,
        id: &IntentId,
        status: &str,
        as_of: DateTime<Utc>,
    ) -> Result<StatusOutcome, StoreError> {
        self.inner.update_deposit_status(id, status, as_of).await
    }

    async fn deposits_by_booking(&self, booking_id: &str) -> Result<Vec<Deposit>, StoreError> {
        self.inner.deposits_by_booking(booking_id).await
    }

    async fn deposits_by_user(&self, user_id: &UserId) -> Result<Vec<Deposit>, StoreError> {
        self.inner.deposits_by_user(user_id).await
    }
}

// === Harness ===

pub struct Harness {
    pub store: Arc<FlakyStore>,
    pub gateway: Arc<FakeGateway>,
    pub customers: CustomerProvisioner,
    pub payments: PaymentOrchestrator,
    pub deposits: DepositOrchestrator,
    pub registrar: PaymentMethodRegistrar,
}

impl Harness {
    pub fn new() -> Self {
        let store = Arc::new(FlakyStore::default());
        let gateway = Arc::new(FakeGateway::new());
        let ledger: Arc<dyn LedgerStore> = store.clone();
        let gw: Arc<dyn Gateway> = gateway.clone();

        let customers = CustomerProvisioner::new(ledger.clone(), gw.clone());
        Self {
            payments: PaymentOrchestrator::new(customers.clone(), gw.clone(), ledger.clone()),
            deposits: DepositOrchestrator::new(customers.clone(), gw.clone(), ledger.clone()),
            registrar: PaymentMethodRegistrar::new(gw, ledger),
            customers,
            store,
            gateway,
        }
    }

    pub fn ledger(&self) -> Arc<dyn LedgerStore> {
        self.store.clone()
    }
}
