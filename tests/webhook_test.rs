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

//! Webhook reconciliation: authenticity gate, event dispatch and mirror repair.

mod common;

use chrono::Utc;
use common::Harness;
use payment_ledger::gateway::status;
use payment_ledger::webhook::MAX_BODY_BYTES;
use payment_ledger::{
    AuthorizeDeposit, AuthorizePayment, IntentId, LedgerStore, PaymentError, SignatureVerifier,
    UserId, WebhookOutcome, WebhookReconciler,
};
use serde_json::{Value, json};

const SECRET: &str = "whsec_reconciler";

fn reconciler(h: &Harness) -> WebhookReconciler {
    WebhookReconciler::new(
        SignatureVerifier::new(SECRET, 300),
        h.registrar.clone(),
        h.ledger(),
    )
}

fn event(kind: &str, created: i64, object: Value) -> Vec<u8> {
    serde_json::to_vec(&json!({
        "id": "evt_test",
        "object": "event",
        "type": kind,
        "created": created,
        "data": { "object": object }
    }))
    .unwrap()
}

fn sign(body: &[u8]) -> String {
    SignatureVerifier::new(SECRET, 300)
        .sign(body, Utc::now().timestamp())
        .unwrap()
}

fn setup_succeeded(user_id: Option<&str>, payment_method: Value) -> Vec<u8> {
    let mut metadata = serde_json::Map::new();
    if let Some(user_id) = user_id {
        metadata.insert("user_id".into(), json!(user_id));
    }
    event(
        "setup_intent.succeeded",
        Utc::now().timestamp(),
        json!({
            "id": "seti_1",
            "object": "setup_intent",
            "status": "succeeded",
            "payment_method": payment_method,
            "metadata": metadata,
        }),
    )
}

fn intent_event(kind: &str, created: i64, id: &str, intent_status: &str, metadata: Value) -> Vec<u8> {
    event(
        kind,
        created,
        json!({
            "id": id,
            "object": "payment_intent",
            "status": intent_status,
            "amount": 5000,
            "currency": "usd",
            "created": created - 60,
            "metadata": metadata,
        }),
    )
}

async fn deposit(h: &Harness) -> IntentId {
    h.deposits
        .authorize(AuthorizeDeposit {
            user_id: UserId::new("guest-1"),
            email: "guest@example.com".to_string(),
            booking_id: "b1".to_string(),
            listing_id: "l1".to_string(),
            amount: 5000,
            currency: "usd".to_string(),
        })
        .await
        .unwrap()
        .intent_id
}

// === Authenticity ===

#[tokio::test]
async fn tampered_body_changes_nothing() {
    let h = Harness::new();
    h.gateway.add_card("pm_visa", "visa", "4242");
    let webhooks = reconciler(&h);
    let body = setup_succeeded(Some("guest-1"), json!("pm_visa"));
    let header = sign(&body);

    let mut tampered = body.clone();
    let at = tampered.len() / 2;
    tampered[at] ^= 0x01;

    let result = webhooks.handle(&tampered, Some(&header)).await;

    assert!(matches!(result, Err(PaymentError::InvalidSignature(_))));
    assert!(h.registrar.list_by_user(&UserId::new("guest-1")).await.unwrap().is_empty());
}

#[tokio::test]
async fn missing_signature_is_rejected() {
    let h = Harness::new();
    let body = setup_succeeded(Some("guest-1"), json!("pm_visa"));

    let result = reconciler(&h).handle(&body, None).await;

    assert!(matches!(result, Err(PaymentError::InvalidSignature(_))));
}

#[tokio::test]
async fn oversized_body_is_rejected_before_verification() {
    let h = Harness::new();
    let body = vec![b' '; MAX_BODY_BYTES + 1];

    let result = reconciler(&h).handle(&body, Some("garbage")).await;

    assert!(matches!(
        result,
        Err(PaymentError::PayloadTooLarge { limit }) if limit == MAX_BODY_BYTES
    ));
}

#[tokio::test]
async fn body_at_the_limit_is_verified() {
    let h = Harness::new();
    let body = vec![b' '; MAX_BODY_BYTES];

    let result = reconciler(&h).handle(&body, Some("garbage")).await;

    assert!(matches!(result, Err(PaymentError::InvalidSignature(_))));
}

// === Setup Intents ===

#[tokio::test]
async fn confirmed_setup_saves_card_once() {
    let h = Harness::new();
    h.gateway.add_card("pm_visa", "visa", "4242");
    let webhooks = reconciler(&h);
    let body = setup_succeeded(Some("guest-1"), json!("pm_visa"));

    let first = webhooks.handle(&body, Some(&sign(&body))).await.unwrap();
    let redelivered = webhooks.handle(&body, Some(&sign(&body))).await.unwrap();

    assert_eq!(first, WebhookOutcome::PaymentMethodSaved);
    assert_eq!(redelivered, WebhookOutcome::PaymentMethodSaved);
    let cards = h.registrar.list_by_user(&UserId::new("guest-1")).await.unwrap();
    assert_eq!(cards.len(), 1);
    assert_eq!(cards[0].last4, "4242");
}

#[tokio::test]
async fn expanded_payment_method_is_accepted() {
    let h = Harness::new();
    h.gateway.add_card("pm_visa", "visa", "4242");
    let body = setup_succeeded(
        Some("guest-1"),
        json!({ "id": "pm_visa", "object": "payment_method", "card": { "brand": "visa" } }),
    );

    let outcome = reconciler(&h).handle(&body, Some(&sign(&body))).await.unwrap();

    assert_eq!(outcome, WebhookOutcome::PaymentMethodSaved);
}

#[tokio::test]
async fn setup_without_user_is_dropped() {
    let h = Harness::new();
    h.gateway.add_card("pm_visa", "visa", "4242");
    let body = setup_succeeded(None, json!("pm_visa"));

    let outcome = reconciler(&h).handle(&body, Some(&sign(&body))).await.unwrap();

    assert_eq!(outcome, WebhookOutcome::Dropped);
}

#[tokio::test]
async fn setup_without_payment_method_is_dropped() {
    let h = Harness::new();
    let body = setup_succeeded(Some("guest-1"), Value::Null);

    let outcome = reconciler(&h).handle(&body, Some(&sign(&body))).await.unwrap();

    assert_eq!(outcome, WebhookOutcome::Dropped);
}

#[tokio::test]
async fn failed_card_lookup_is_acknowledged() {
    let h = Harness::new();
    let body = setup_succeeded(Some("guest-1"), json!("pm_unknown"));

    let outcome = reconciler(&h).handle(&body, Some(&sign(&body))).await.unwrap();

    assert_eq!(outcome, WebhookOutcome::Dropped);
    assert!(h.registrar.list_by_user(&UserId::new("guest-1")).await.unwrap().is_empty());
}

// === Payment Intents ===

#[tokio::test]
async fn newer_intent_event_updates_deposit() {
    let h = Harness::new();
    let id = deposit(&h).await;
    let body = intent_event(
        "payment_intent.amount_capturable_updated",
        Utc::now().timestamp() + 10,
        id.as_str(),
        status::REQUIRES_CAPTURE,
        json!({}),
    );

    let outcome = reconciler(&h).handle(&body, Some(&sign(&body))).await.unwrap();

    assert_eq!(outcome, WebhookOutcome::StatusApplied);
    assert_eq!(
        h.deposits.deposit(&id).await.unwrap().status,
        status::REQUIRES_CAPTURE
    );
}

#[tokio::test]
async fn event_from_the_same_second_as_authorization_applies() {
    let h = Harness::new();
    let id = deposit(&h).await;
    h.gateway.confirm(&id);
    let body = intent_event(
        "payment_intent.amount_capturable_updated",
        Utc::now().timestamp(),
        id.as_str(),
        status::REQUIRES_CAPTURE,
        json!({}),
    );

    let outcome = reconciler(&h).handle(&body, Some(&sign(&body))).await.unwrap();

    assert_eq!(outcome, WebhookOutcome::StatusApplied);
    assert_eq!(
        h.deposits.deposit(&id).await.unwrap().status,
        h.gateway.intent_status(&id).unwrap()
    );
}

#[tokio::test]
async fn older_intent_event_does_not_regress_status() {
    let h = Harness::new();
    let id = deposit(&h).await;
    h.gateway.confirm(&id);
    h.deposits.capture(&id).await.unwrap();
    let body = intent_event(
        "payment_intent.canceled",
        Utc::now().timestamp() - 3600,
        id.as_str(),
        status::CANCELED,
        json!({}),
    );

    let outcome = reconciler(&h).handle(&body, Some(&sign(&body))).await.unwrap();

    assert_eq!(outcome, WebhookOutcome::StaleIgnored);
    assert_eq!(h.deposits.deposit(&id).await.unwrap().status, status::SUCCEEDED);
}

#[tokio::test]
async fn intent_event_updates_payment_row() {
    let h = Harness::new();
    let auth = h
        .payments
        .authorize(AuthorizePayment {
            user_id: UserId::new("guest-1"),
            email: "guest@example.com".to_string(),
            booking_id: "b7".to_string(),
            amount: 900,
            currency: "usd".to_string(),
            payment_method: None,
        })
        .await
        .unwrap();
    let body = intent_event(
        "payment_intent.payment_failed",
        Utc::now().timestamp() + 5,
        auth.intent_id.as_str(),
        status::REQUIRES_PAYMENT_METHOD,
        json!({}),
    );

    let outcome = reconciler(&h).handle(&body, Some(&sign(&body))).await.unwrap();

    assert_eq!(outcome, WebhookOutcome::StatusApplied);
    assert!(h.store.deposit(&auth.intent_id).await.unwrap().is_none());
}

#[tokio::test]
async fn missing_deposit_row_is_repaired_from_metadata() {
    let h = Harness::new();
    let created = Utc::now().timestamp();
    let body = intent_event(
        "payment_intent.succeeded",
        created,
        "pi_lost",
        status::SUCCEEDED,
        json!({ "user_id": "guest-1", "booking_id": "b9", "listing_id": "l9" }),
    );
    let webhooks = reconciler(&h);

    let outcome = webhooks.handle(&body, Some(&sign(&body))).await.unwrap();
    let redelivered = webhooks.handle(&body, Some(&sign(&body))).await.unwrap();

    assert_eq!(outcome, WebhookOutcome::MirrorRepaired);
    assert_eq!(redelivered, WebhookOutcome::StatusApplied);
    let row = h.deposits.deposit(&IntentId::new("pi_lost")).await.unwrap();
    assert_eq!(row.booking_id, "b9");
    assert_eq!(row.listing_id, "l9");
    assert_eq!(row.amount.value(), 5000);
    assert_eq!(row.status, status::SUCCEEDED);
    assert!(row.created_at <= row.updated_at);
}

#[tokio::test]
async fn missing_payment_row_is_repaired_without_listing() {
    let h = Harness::new();
    let body = intent_event(
        "payment_intent.succeeded",
        Utc::now().timestamp(),
        "pi_lost",
        status::SUCCEEDED,
        json!({ "user_id": "guest-1", "booking_id": "b9" }),
    );

    let outcome = reconciler(&h).handle(&body, Some(&sign(&body))).await.unwrap();

    assert_eq!(outcome, WebhookOutcome::MirrorRepaired);
    let row = h.payments.payment_intent(&IntentId::new("pi_lost")).await.unwrap();
    assert_eq!(row.user_id.as_str(), "guest-1");
    assert!(h.store.deposit(&IntentId::new("pi_lost")).await.unwrap().is_none());
}

#[tokio::test]
async fn unknown_intent_without_metadata_is_dropped() {
    let h = Harness::new();
    let body = intent_event(
        "payment_intent.succeeded",
        Utc::now().timestamp(),
        "pi_stranger",
        status::SUCCEEDED,
        json!({}),
    );

    let outcome = reconciler(&h).handle(&body, Some(&sign(&body))).await.unwrap();

    assert_eq!(outcome, WebhookOutcome::Dropped);
    assert!(h.store.payment_intent(&IntentId::new("pi_stranger")).await.unwrap().is_none());
}

// === Everything Else ===

#[tokio::test]
async fn unhandled_event_type_is_ignored() {
    let h = Harness::new();
    let body = event("customer.created", Utc::now().timestamp(), json!({ "id": "cus_1" }));

    let outcome = reconciler(&h).handle(&body, Some(&sign(&body))).await.unwrap();

    assert_eq!(outcome, WebhookOutcome::Ignored);
}

#[tokio::test]
async fn authentic_but_undecodable_body_is_acknowledged() {
    let h = Harness::new();
    let body = b"{\"type\": \"setup_intent.succeeded\", \"data\": ".to_vec();

    let outcome = reconciler(&h).handle(&body, Some(&sign(&body))).await.unwrap();

    assert_eq!(outcome, WebhookOutcome::Dropped);
}
