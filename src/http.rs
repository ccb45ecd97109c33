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

//! REST surface.
//!
//! ## Endpoints
//!
//! Bearer-authenticated, under `/api/v1/pay`:
//!
//! - `POST /customers` - ensure the caller's gateway customer
//! - `POST /setup-intents` - start saving a card
//! - `GET|POST /payment-methods` - list or register saved cards
//! - `POST /payment-intents`, `GET /payment-intents/{id}`,
//!   `POST /payment-intents/capture`, `POST /payment-intents/cancel`
//! - `POST /deposits`, `GET /deposits[?booking_id=]`, `GET /deposits/{id}`,
//!   `POST /deposits/capture`, `POST /deposits/refund`
//!
//! Unauthenticated:
//!
//! - `POST /stripe/webhook` - signed gateway events
//! - `GET /health`

use crate::auth::{JwtVerifier, bearer_token};
use crate::base::{IntentId, PaymentMethodId};
use crate::customer::CustomerProvisioner;
use crate::deposit::{AuthorizeDeposit, DepositOrchestrator};
use crate::gateway::{Gateway, SetupUsage};
use crate::identity::{IdentityClient, User};
use crate::payment::{AuthorizePayment, PaymentOrchestrator};
use crate::payment_method::PaymentMethodRegistrar;
use crate::store::{Deposit, LedgerStore, PaymentIntent, PaymentMethod};
use crate::webhook::{MAX_BODY_BYTES, SIGNATURE_HEADER, SignatureVerifier, WebhookReconciler};
use crate::PaymentError;
use axum::{
    Extension, Json, Router,
    body::Bytes,
    extract::{DefaultBodyLimit, FromRequest, Path, Query, Request, State, rejection::JsonRejection},
    http::{HeaderMap, StatusCode, header::AUTHORIZATION},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, warn};

// === Request/Response DTOs ===

#[derive(Debug, Serialize)]
pub struct CustomerResponse {
    pub customer_id: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct SetupIntentRequest {
    #[serde(default)]
    pub usage: SetupUsage,
}

#[derive(Debug, Serialize)]
pub struct SetupIntentResponse {
    pub setup_intent_id: String,
    pub client_secret: String,
    pub customer_id: String,
}

#[derive(Debug, Deserialize)]
pub struct SavePaymentMethodRequest {
    pub payment_method_id: String,
}

#[derive(Debug, Deserialize)]
pub struct PaymentIntentRequest {
    pub booking_id: String,
    pub amount: i64,
    pub currency: String,
    pub payment_method_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DepositRequest {
    pub booking_id: String,
    pub listing_id: String,
    pub amount: i64,
    pub currency: String,
}

#[derive(Debug, Serialize)]
pub struct PaymentAuthorizationResponse {
    pub client_secret: String,
    pub payment_intent_id: String,
    pub status: String,
}

#[derive(Debug, Serialize)]
pub struct DepositAuthorizationResponse {
    pub client_secret: String,
    pub deposit_id: String,
    pub status: String,
}

/// Body of the payment capture and cancel calls.
#[derive(Debug, Deserialize)]
pub struct PaymentAction {
    pub payment_intent_id: String,
}

/// Body of the deposit capture and refund calls.
#[derive(Debug, Deserialize)]
pub struct DepositAction {
    #[serde(alias = "payment_intent_id")]
    pub deposit_id: String,
}

#[derive(Debug, Serialize)]
pub struct IntentStatusResponse {
    pub payment_intent_id: String,
    pub status: String,
}

#[derive(Debug, Serialize)]
pub struct DepositStatusResponse {
    pub deposit_id: String,
    pub status: String,
}

#[derive(Debug, Deserialize)]
pub struct DepositQuery {
    pub booking_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct WebhookAck {
    pub received: bool,
    pub outcome: &'static str,
}

/// Response body for errors.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

// === Application State ===

/// The authenticated caller, resolved through the user service.
#[derive(Debug, Clone)]
pub struct Caller(pub User);

#[derive(Clone)]
pub struct AppState {
    pub customers: CustomerProvisioner,
    pub payments: PaymentOrchestrator,
    pub deposits: DepositOrchestrator,
    pub payment_methods: PaymentMethodRegistrar,
    pub webhooks: Arc<WebhookReconciler>,
    pub identity: IdentityClient,
    pub jwt: JwtVerifier,
}

impl AppState {
    /// Wires every service over one store and one gateway.
    pub fn new(
        store: Arc<dyn LedgerStore>,
        gateway: Arc<dyn Gateway>,
        identity: IdentityClient,
        jwt: JwtVerifier,
        signatures: SignatureVerifier,
    ) -> Self {
        let customers = CustomerProvisioner::new(store.clone(), gateway.clone());
        let payment_methods = PaymentMethodRegistrar::new(gateway.clone(), store.clone());
        let payments = PaymentOrchestrator::new(customers.clone(), gateway.clone(), store.clone());
        let deposits = DepositOrchestrator::new(customers.clone(), gateway, store.clone());
        let webhooks = Arc::new(WebhookReconciler::new(
            signatures,
            payment_methods.clone(),
            store,
        ));

        Self {
            customers,
            payments,
            deposits,
            payment_methods,
            webhooks,
            identity,
            jwt,
        }
    }
}

// === Error Handling ===

/// Wrapper for converting `PaymentError` into HTTP responses.
pub struct AppError(PaymentError);

impl From<PaymentError> for AppError {
    fn from(err: PaymentError) -> Self {
        AppError(err)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = match &self.0 {
            PaymentError::Validation(_) => (StatusCode::BAD_REQUEST, "VALIDATION_FAILED"),
            PaymentError::Upstream(_) => (StatusCode::BAD_GATEWAY, "UPSTREAM_ERROR"),
            PaymentError::Persistence(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "PERSISTENCE_ERROR")
            }
            PaymentError::InvalidSignature(_) => (StatusCode::BAD_REQUEST, "INVALID_SIGNATURE"),
            PaymentError::PayloadTooLarge { .. } => {
                (StatusCode::PAYLOAD_TOO_LARGE, "PAYLOAD_TOO_LARGE")
            }
            PaymentError::Identity(_) => (StatusCode::BAD_GATEWAY, "IDENTITY_UNAVAILABLE"),
            PaymentError::NotFound => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            PaymentError::Unauthorized(_) => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED"),
        };

        if status.is_server_error() {
            error!(code, error = %self.0, "request failed");
        }

        (
            status,
            Json(ErrorResponse {
                error: self.0.to_string(),
                code: code.to_string(),
            }),
        )
            .into_response()
    }
}

/// `Json` whose rejections render as [`ErrorResponse`] bodies.
pub struct ApiJson<T>(pub T);

impl<S, T> FromRequest<S> for ApiJson<T>
where
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(ApiJson(value)),
            Err(rejection) => Err(AppError::from(rejection)),
        }
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError(PaymentError::Validation(rejection.body_text()))
    }
}

// === Middleware ===

/// Resolves the bearer token to a [`Caller`] extension.
async fn authenticate(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(bearer_token)
        .ok_or_else(|| PaymentError::Unauthorized("missing token".to_string()))?;

    let email = state.jwt.subject(token)?;
    let user = state.identity.user_by_email(&email).await?;
    request.extensions_mut().insert(Caller(user));

    Ok(next.run(request).await)
}

// === Handlers ===

/// POST /api/v1/pay/customers
async fn ensure_customer(
    State(state): State<AppState>,
    Extension(Caller(user)): Extension<Caller>,
) -> Result<Json<CustomerResponse>, AppError> {
    let customer = state.customers.ensure_customer(&user.id, &user.email).await?;
    Ok(Json(CustomerResponse {
        customer_id: customer.to_string(),
    }))
}

/// POST /api/v1/pay/setup-intents
async fn create_setup_intent(
    State(state): State<AppState>,
    Extension(Caller(user)): Extension<Caller>,
    ApiJson(request): ApiJson<SetupIntentRequest>,
) -> Result<Json<SetupIntentResponse>, AppError> {
    let customer = state.customers.ensure_customer(&user.id, &user.email).await?;
    let intent = state
        .payment_methods
        .create_setup_intent(&customer, &user.id, request.usage)
        .await?;

    Ok(Json(SetupIntentResponse {
        setup_intent_id: intent.id,
        client_secret: intent.client_secret,
        customer_id: customer.to_string(),
    }))
}

/// GET /api/v1/pay/payment-methods
async fn list_payment_methods(
    State(state): State<AppState>,
    Extension(Caller(user)): Extension<Caller>,
) -> Result<Json<Vec<PaymentMethod>>, AppError> {
    Ok(Json(state.payment_methods.list_by_user(&user.id).await?))
}

/// POST /api/v1/pay/payment-methods
async fn save_payment_method(
    State(state): State<AppState>,
    Extension(Caller(user)): Extension<Caller>,
    ApiJson(request): ApiJson<SavePaymentMethodRequest>,
) -> Result<Json<PaymentMethod>, AppError> {
    let id = PaymentMethodId::new(request.payment_method_id);
    Ok(Json(state.payment_methods.retrieve_and_save(&user.id, &id).await?))
}

/// POST /api/v1/pay/payment-intents
async fn authorize_payment(
    State(state): State<AppState>,
    Extension(Caller(user)): Extension<Caller>,
    ApiJson(request): ApiJson<PaymentIntentRequest>,
) -> Result<(StatusCode, Json<PaymentAuthorizationResponse>), AppError> {
    let authorization = state
        .payments
        .authorize(AuthorizePayment {
            user_id: user.id,
            email: user.email,
            booking_id: request.booking_id,
            amount: request.amount,
            currency: request.currency,
            payment_method: request
                .payment_method_id
                .filter(|id| !id.trim().is_empty())
                .map(PaymentMethodId::new),
        })
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(PaymentAuthorizationResponse {
            client_secret: authorization.client_secret,
            payment_intent_id: authorization.intent_id.to_string(),
            status: authorization.status,
        }),
    ))
}

/// GET /api/v1/pay/payment-intents/{id}
async fn get_payment_intent(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<PaymentIntent>, AppError> {
    Ok(Json(state.payments.payment_intent(&IntentId::new(id)).await?))
}

/// POST /api/v1/pay/payment-intents/capture
async fn capture_payment(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<PaymentAction>,
) -> Result<Json<IntentStatusResponse>, AppError> {
    let status = state
        .payments
        .capture(&IntentId::new(request.payment_intent_id.clone()))
        .await?;
    Ok(Json(IntentStatusResponse {
        payment_intent_id: request.payment_intent_id,
        status,
    }))
}

/// POST /api/v1/pay/payment-intents/cancel
async fn cancel_payment(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<PaymentAction>,
) -> Result<Json<IntentStatusResponse>, AppError> {
    let status = state
        .payments
        .cancel(&IntentId::new(request.payment_intent_id.clone()))
        .await?;
    Ok(Json(IntentStatusResponse {
        payment_intent_id: request.payment_intent_id,
        status,
    }))
}

/// POST /api/v1/pay/deposits
async fn authorize_deposit(
    State(state): State<AppState>,
    Extension(Caller(user)): Extension<Caller>,
    ApiJson(request): ApiJson<DepositRequest>,
) -> Result<(StatusCode, Json<DepositAuthorizationResponse>), AppError> {
    let authorization = state
        .deposits
        .authorize(AuthorizeDeposit {
            user_id: user.id,
            email: user.email,
            booking_id: request.booking_id,
            listing_id: request.listing_id,
            amount: request.amount,
            currency: request.currency,
        })
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(DepositAuthorizationResponse {
            client_secret: authorization.client_secret,
            deposit_id: authorization.intent_id.to_string(),
            status: authorization.status,
        }),
    ))
}

/// GET /api/v1/pay/deposits - by booking when `booking_id` is given, else the caller's.
async fn list_deposits(
    State(state): State<AppState>,
    Extension(Caller(user)): Extension<Caller>,
    Query(query): Query<DepositQuery>,
) -> Result<Json<Vec<Deposit>>, AppError> {
    let deposits = match query.booking_id {
        Some(booking_id) => state.deposits.deposits_for_booking(&booking_id).await?,
        None => state.deposits.deposits_for_user(&user.id).await?,
    };
    Ok(Json(deposits))
}

/// GET /api/v1/pay/deposits/{id}
async fn get_deposit(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Deposit>, AppError> {
    Ok(Json(state.deposits.deposit(&IntentId::new(id)).await?))
}

/// POST /api/v1/pay/deposits/capture
async fn capture_deposit(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<DepositAction>,
) -> Result<Json<DepositStatusResponse>, AppError> {
    let status = state
        .deposits
        .capture(&IntentId::new(request.deposit_id.clone()))
        .await?;
    Ok(Json(DepositStatusResponse {
        deposit_id: request.deposit_id,
        status,
    }))
}

/// POST /api/v1/pay/deposits/refund
async fn refund_deposit(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<DepositAction>,
) -> Result<Json<DepositStatusResponse>, AppError> {
    let status = state
        .deposits
        .refund(&IntentId::new(request.deposit_id.clone()))
        .await?;
    Ok(Json(DepositStatusResponse {
        deposit_id: request.deposit_id,
        status,
    }))
}

/// POST /stripe/webhook
async fn receive_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookAck>, AppError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok());
    if signature.is_none() {
        warn!("webhook without signature header");
    }

    let outcome = state.webhooks.handle(&body, signature).await?;
    Ok(Json(WebhookAck {
        received: true,
        outcome: outcome.as_str(),
    }))
}

/// GET /health
async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

// === Router ===

pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .route("/customers", post(ensure_customer))
        .route("/setup-intents", post(create_setup_intent))
        .route(
            "/payment-methods",
            get(list_payment_methods).post(save_payment_method),
        )
        .route("/payment-intents", post(authorize_payment))
        .route("/payment-intents/capture", post(capture_payment))
        .route("/payment-intents/cancel", post(cancel_payment))
        .route("/payment-intents/{id}", get(get_payment_intent))
        .route("/deposits", get(list_deposits).post(authorize_deposit))
        .route("/deposits/capture", post(capture_deposit))
        .route("/deposits/refund", post(refund_deposit))
        .route("/deposits/{id}", get(get_deposit))
        .route_layer(middleware::from_fn_with_state(state.clone(), authenticate));

    Router::new()
        .nest("/api/v1/pay", api)
        .route(
            "/stripe/webhook",
            post(receive_webhook).layer(DefaultBodyLimit::max(MAX_BODY_BYTES)),
        )
        .route("/health", get(health))
        .with_state(state)
}
