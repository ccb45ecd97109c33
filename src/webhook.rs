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

//! Gateway webhook reconciliation.
//!
//! ```text
//! receive ──► size check ──► verify signature ──► dispatch by type ──► apply or log
//!    │             │                │
//!    │             └─ 413           └─ InvalidSignature (no state change)
//!    └─ acknowledged once the signature passes, whatever happens downstream
//! ```
//!
//! The signature is the only authenticity gate for this endpoint. Once it
//! passes, every outcome is acknowledged so the gateway does not keep
//! redelivering events whose failure is not transient; failures are logged.
//!
//! Handled event types:
//!
//! | Event | Effect |
//! |-------|--------|
//! | `setup_intent.succeeded` | save the confirmed card for `metadata.user_id` |
//! | `payment_intent.succeeded` | mirror status onto the deposit or payment row |
//! | `payment_intent.canceled` | mirror status |
//! | `payment_intent.amount_capturable_updated` | mirror status |
//! | `payment_intent.payment_failed` | mirror status |
//!
//! Intent events carry the event creation time as their observation time, so
//! an event older than the stored row never regresses its status. An intent
//! event for an unknown row recreates the missing mirror from the intent's
//! metadata.

use crate::base::{Amount, Currency, IntentId, PaymentMethodId, UserId};
use crate::gateway::{META_BOOKING_ID, META_LISTING_ID, META_USER_ID, Metadata};
use crate::payment_method::PaymentMethodRegistrar;
use crate::store::{Deposit, InsertOutcome, LedgerStore, PaymentIntent, StatusOutcome, observed_now};
use crate::{PaymentError, StoreError};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use std::fmt;
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tracing::{error, info, instrument, warn};

type HmacSha256 = Hmac<Sha256>;

/// Largest webhook body accepted, in bytes.
pub const MAX_BODY_BYTES: usize = 64 * 1024;

/// Request header carrying the signature.
pub const SIGNATURE_HEADER: &str = "Stripe-Signature";

/// Default replay window around the signed timestamp.
pub const DEFAULT_TOLERANCE_SECS: u64 = 300;

/// Verifies `t=<unix>,v1=<hex>` signatures: HMAC-SHA256 over `"<t>.<body>"`
/// keyed by the shared webhook secret.
#[derive(Clone)]
pub struct SignatureVerifier {
    secret: String,
    tolerance_secs: i64,
}

impl fmt::Debug for SignatureVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignatureVerifier")
            .field("tolerance_secs", &self.tolerance_secs)
            .finish_non_exhaustive()
    }
}

#[derive(Debug)]
struct SignatureHeader {
    timestamp: i64,
    signatures: Vec<Vec<u8>>,
}

fn parse_header(header: &str) -> Result<SignatureHeader, PaymentError> {
    let mut timestamp = None;
    let mut signatures = Vec::new();

    for part in header.split(',') {
        let Some((key, value)) = part.trim().split_once('=') else {
            continue;
        };
        match key {
            "t" => {
                timestamp = Some(value.parse::<i64>().map_err(|_| {
                    PaymentError::InvalidSignature("malformed timestamp".to_string())
                })?);
            }
            // Undecodable entries can never match; other schemes are ignored.
            "v1" => {
                if let Ok(signature) = hex::decode(value) {
                    signatures.push(signature);
                }
            }
            _ => {}
        }
    }

    let timestamp =
        timestamp.ok_or_else(|| PaymentError::InvalidSignature("missing timestamp".to_string()))?;
    if signatures.is_empty() {
        return Err(PaymentError::InvalidSignature("no v1 signature".to_string()));
    }
    Ok(SignatureHeader {
        timestamp,
        signatures,
    })
}

impl SignatureVerifier {
    /// A `tolerance_secs` of zero disables the replay window.
    pub fn new(secret: impl Into<String>, tolerance_secs: u64) -> Self {
        Self {
            secret: secret.into(),
            tolerance_secs: i64::try_from(tolerance_secs).unwrap_or(i64::MAX),
        }
    }

    fn mac(&self, timestamp: i64, payload: &[u8]) -> Result<Vec<u8>, PaymentError> {
        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes())
            .map_err(|e| PaymentError::InvalidSignature(e.to_string()))?;
        mac.update(timestamp.to_string().as_bytes());
        mac.update(b".");
        mac.update(payload);
        Ok(mac.finalize().into_bytes().to_vec())
    }

    /// Produces a signature header for `payload` at `timestamp`.
    pub fn sign(&self, payload: &[u8], timestamp: i64) -> Result<String, PaymentError> {
        let mac = self.mac(timestamp, payload)?;
        Ok(format!("t={timestamp},v1={}", hex::encode(mac)))
    }

    /// # Errors
    ///
    /// [`PaymentError::InvalidSignature`] if the header is malformed, no
    /// signature matches, or the timestamp lies outside the replay window.
    pub fn verify(&self, payload: &[u8], header: &str, now: DateTime<Utc>) -> Result<(), PaymentError> {
        let header = parse_header(header)?;
        let expected = self.mac(header.timestamp, payload)?;

        let matched = header
            .signatures
            .iter()
            .any(|candidate| bool::from(expected.as_slice().ct_eq(candidate.as_slice())));
        if !matched {
            return Err(PaymentError::InvalidSignature("signature mismatch".to_string()));
        }

        let age = now.timestamp().saturating_sub(header.timestamp);
        if self.tolerance_secs > 0 && age.saturating_abs() > self.tolerance_secs {
            return Err(PaymentError::InvalidSignature(format!(
                "timestamp outside tolerance ({age}s)"
            )));
        }
        Ok(())
    }
}

/// What the reconciler did with an authentic event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookOutcome {
    PaymentMethodSaved,
    StatusApplied,
    /// The stored row had already moved past this event.
    StaleIgnored,
    /// A missing ledger row was recreated from the event.
    MirrorRepaired,
    /// Authentic but unusable (malformed, missing metadata, failed save).
    Dropped,
    /// Event type this service does not act on.
    Ignored,
}

impl WebhookOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PaymentMethodSaved => "payment_method_saved",
            Self::StatusApplied => "status_applied",
            Self::StaleIgnored => "stale_ignored",
            Self::MirrorRepaired => "mirror_repaired",
            Self::Dropped => "dropped",
            Self::Ignored => "ignored",
        }
    }
}

#[derive(Debug, Deserialize)]
struct EventEnvelope {
    id: String,
    #[serde(rename = "type")]
    event_type: String,
    created: i64,
    data: EventData,
}

#[derive(Debug, Deserialize)]
struct EventData {
    object: serde_json::Value,
}

/// Either a bare ID or an expanded object carrying one.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Expandable {
    Id(String),
    Object { id: String },
}

impl Expandable {
    fn into_id(self) -> String {
        match self {
            Self::Id(id) | Self::Object { id } => id,
        }
    }
}

#[derive(Debug, Deserialize)]
struct SetupIntentObject {
    id: String,
    #[serde(default)]
    metadata: Metadata,
    payment_method: Option<Expandable>,
}

#[derive(Debug, Deserialize)]
struct PaymentIntentObject {
    id: String,
    status: String,
    amount: i64,
    currency: String,
    #[serde(default)]
    metadata: Metadata,
    created: Option<i64>,
}

fn non_empty(metadata: &Metadata, key: &str) -> Option<String> {
    metadata
        .get(key)
        .map(|value| value.trim())
        .filter(|value| !value.is_empty())
        .map(str::to_owned)
}

pub struct WebhookReconciler {
    verifier: SignatureVerifier,
    registrar: PaymentMethodRegistrar,
    store: Arc<dyn LedgerStore>,
}

impl WebhookReconciler {
    pub fn new(
        verifier: SignatureVerifier,
        registrar: PaymentMethodRegistrar,
        store: Arc<dyn LedgerStore>,
    ) -> Self {
        Self {
            verifier,
            registrar,
            store,
        }
    }

    /// Verifies and applies one webhook delivery.
    ///
    /// # Errors
    ///
    /// - [`PaymentError::PayloadTooLarge`] - body over [`MAX_BODY_BYTES`];
    ///   the signature is not inspected.
    /// - [`PaymentError::InvalidSignature`] - missing or non-matching
    ///   signature; nothing is applied.
    ///
    /// Every other failure is logged and reported as an outcome so the
    /// delivery is acknowledged.
    #[instrument(
        name = "webhook",
        skip_all,
        fields(event_id = tracing::field::Empty, event_type = tracing::field::Empty)
    )]
    pub async fn handle(
        &self,
        payload: &[u8],
        signature: Option<&str>,
    ) -> Result<WebhookOutcome, PaymentError> {
        if payload.len() > MAX_BODY_BYTES {
            warn!(size = payload.len(), "oversized webhook rejected");
            return Err(PaymentError::PayloadTooLarge {
                limit: MAX_BODY_BYTES,
            });
        }

        let header = signature
            .ok_or_else(|| PaymentError::InvalidSignature(format!("missing {SIGNATURE_HEADER} header")))?;
        if let Err(e) = self.verifier.verify(payload, header, Utc::now()) {
            warn!(error = %e, "webhook signature verification failed");
            return Err(e);
        }

        let envelope: EventEnvelope = match serde_json::from_slice(payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(error = %e, "undecodable webhook event acknowledged");
                return Ok(WebhookOutcome::Dropped);
            }
        };

        tracing::Span::current()
            .record("event_id", tracing::field::display(&envelope.id))
            .record("event_type", tracing::field::display(&envelope.event_type));

        let outcome = match envelope.event_type.as_str() {
            "setup_intent.succeeded" => self.on_setup_succeeded(envelope.data.object).await,
            "payment_intent.succeeded"
            | "payment_intent.canceled"
            | "payment_intent.amount_capturable_updated"
            | "payment_intent.payment_failed" => {
                self.on_intent_status(envelope.created, envelope.data.object)
                    .await
            }
            _ => {
                info!("unhandled webhook event type");
                WebhookOutcome::Ignored
            }
        };

        info!(outcome = outcome.as_str(), "webhook processed");
        Ok(outcome)
    }

    async fn on_setup_succeeded(&self, object: serde_json::Value) -> WebhookOutcome {
        let intent: SetupIntentObject = match serde_json::from_value(object) {
            Ok(intent) => intent,
            Err(e) => {
                warn!(error = %e, "malformed setup intent");
                return WebhookOutcome::Dropped;
            }
        };

        let user_id = non_empty(&intent.metadata, META_USER_ID);
        let payment_method = intent
            .payment_method
            .map(Expandable::into_id)
            .filter(|id| !id.trim().is_empty());

        let (Some(user_id), Some(payment_method)) = (user_id, payment_method) else {
            warn!(setup_intent_id = %intent.id, "setup intent missing user_id or payment method");
            return WebhookOutcome::Dropped;
        };

        let user_id = UserId::new(user_id);
        let payment_method = PaymentMethodId::new(payment_method);
        match self
            .registrar
            .retrieve_and_save(&user_id, &payment_method)
            .await
        {
            Ok(_) => WebhookOutcome::PaymentMethodSaved,
            Err(e) => {
                // The gateway has moved on; only its own redelivery could retry.
                error!(
                    user_id = %user_id,
                    payment_method_id = %payment_method,
                    error = %e,
                    "failed to save payment method from webhook"
                );
                WebhookOutcome::Dropped
            }
        }
    }

    async fn on_intent_status(&self, created: i64, object: serde_json::Value) -> WebhookOutcome {
        let intent: PaymentIntentObject = match serde_json::from_value(object) {
            Ok(intent) => intent,
            Err(e) => {
                warn!(error = %e, "malformed payment intent");
                return WebhookOutcome::Dropped;
            }
        };
        let as_of = DateTime::from_timestamp(created, 0).unwrap_or_else(observed_now);

        match self.apply_status(&intent, as_of).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(intent_id = %intent.id, error = %e, "failed to mirror intent status");
                WebhookOutcome::Dropped
            }
        }
    }

    async fn apply_status(
        &self,
        intent: &PaymentIntentObject,
        as_of: DateTime<Utc>,
    ) -> Result<WebhookOutcome, StoreError> {
        let id = IntentId::new(intent.id.clone());

        let mut outcome = self
            .store
            .update_deposit_status(&id, &intent.status, as_of)
            .await?;
        if outcome == StatusOutcome::Missing {
            outcome = self
                .store
                .update_payment_intent_status(&id, &intent.status, as_of)
                .await?;
        }

        Ok(match outcome {
            StatusOutcome::Applied => {
                info!(intent_id = %id, status = %intent.status, "intent status mirrored from webhook");
                WebhookOutcome::StatusApplied
            }
            StatusOutcome::Stale => {
                info!(intent_id = %id, status = %intent.status, "stale intent event ignored");
                WebhookOutcome::StaleIgnored
            }
            StatusOutcome::Missing => self.repair(id, intent, as_of).await?,
        })
    }

    /// Recreates a ledger row the synchronous path failed to write.
    async fn repair(
        &self,
        id: IntentId,
        intent: &PaymentIntentObject,
        as_of: DateTime<Utc>,
    ) -> Result<WebhookOutcome, StoreError> {
        let user_id = non_empty(&intent.metadata, META_USER_ID);
        let booking_id = non_empty(&intent.metadata, META_BOOKING_ID);
        let (Some(user_id), Some(booking_id)) = (user_id, booking_id) else {
            warn!(intent_id = %id, "intent event for unknown record without correlation metadata");
            return Ok(WebhookOutcome::Dropped);
        };
        let (Ok(amount), Ok(currency)) = (
            Amount::new(intent.amount),
            Currency::new(intent.currency.clone()),
        ) else {
            warn!(intent_id = %id, "intent event carries unusable amount or currency");
            return Ok(WebhookOutcome::Dropped);
        };
        let created_at = intent
            .created
            .and_then(|created| DateTime::from_timestamp(created, 0))
            .unwrap_or(as_of);

        let inserted = match non_empty(&intent.metadata, META_LISTING_ID) {
            Some(listing_id) => {
                self.store
                    .insert_deposit(&Deposit {
                        gateway_pi_id: id.clone(),
                        booking_id,
                        listing_id,
                        user_id: UserId::new(user_id),
                        amount,
                        currency,
                        status: intent.status.clone(),
                        created_at,
                        updated_at: as_of,
                    })
                    .await?
            }
            None => {
                self.store
                    .insert_payment_intent(&PaymentIntent {
                        gateway_pi_id: id.clone(),
                        booking_id,
                        user_id: UserId::new(user_id),
                        amount,
                        currency,
                        status: intent.status.clone(),
                        created_at,
                        updated_at: as_of,
                    })
                    .await?
            }
        };

        match inserted {
            InsertOutcome::Created => {
                warn!(intent_id = %id, status = %intent.status, "missing ledger row repaired from webhook");
                Ok(WebhookOutcome::MirrorRepaired)
            }
            // The synchronous path wrote the row in the meantime; its status
            // is at least as fresh as this event.
            InsertOutcome::Existing => Ok(WebhookOutcome::StaleIgnored),
        }
    }
}
