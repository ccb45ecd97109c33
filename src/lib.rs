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

//! # Payment Ledger
//!
//! This library keeps a durable ledger of payment state mirrored from a card
//! gateway: customers, manual-capture payment intents, booking deposit holds
//! and saved cards. The gateway is the system of record for money movement;
//! the ledger is the local, queryable mirror, reconciled from signed webhooks.
//!
//! ## Core Components
//!
//! - [`CustomerProvisioner`]: one gateway customer per application user
//! - [`PaymentOrchestrator`]: authorize, capture and cancel one-shot payments
//! - [`DepositOrchestrator`]: authorize, capture and refund booking holds
//! - [`PaymentMethodRegistrar`]: setup intents and saved-card records
//! - [`WebhookReconciler`]: authenticates gateway events and applies them
//! - [`LedgerStore`]: persistence seam, backed by [`PgStore`] or [`MemoryStore`]
//! - [`Gateway`]: gateway seam, backed by [`StripeGateway`]
//!
//! ## Example
//!
//! ```
//! use payment_ledger::{Amount, Currency, PaymentError};
//!
//! let amount = Amount::new(5000).unwrap();
//! assert_eq!(amount.value(), 5000);
//!
//! assert!(matches!(Amount::new(0), Err(PaymentError::Validation(_))));
//! assert!(Currency::new("  ").is_err());
//! ```
//!
//! ## Thread Safety
//!
//! Every service is cheap to clone and shares its store and gateway through
//! `Arc`. Uniqueness of customers, intents and saved cards is enforced by the
//! store, so concurrent requests and webhook redeliveries converge on a
//! single record.

pub mod auth;
mod base;
pub mod config;
pub mod customer;
pub mod deposit;
pub mod error;
pub mod gateway;
pub mod http;
pub mod identity;
pub mod payment;
pub mod payment_method;
pub mod store;
pub mod webhook;

pub use base::{Amount, Currency, CustomerId, IntentId, PaymentMethodId, UserId};
pub use customer::CustomerProvisioner;
pub use deposit::{AuthorizeDeposit, DepositOrchestrator};
pub use error::{GatewayError, PaymentError, StoreError};
pub use gateway::{Gateway, StripeGateway};
pub use payment::{Authorization, AuthorizePayment, PaymentOrchestrator};
pub use payment_method::PaymentMethodRegistrar;
pub use store::{LedgerStore, MemoryStore, PgStore};
pub use webhook::{SignatureVerifier, WebhookOutcome, WebhookReconciler};
