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

//! Bearer-token authentication.
//!
//! Callers present an HS256 JWT whose `sub` claim is their email address.
//! Expiry is enforced when the token carries one.

use crate::PaymentError;
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct Claims {
    sub: Option<String>,
}

#[derive(Clone)]
pub struct JwtVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl std::fmt::Debug for JwtVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtVerifier").finish_non_exhaustive()
    }
}

/// Extracts the token from an `Authorization: Bearer <token>` value.
pub fn bearer_token(header: &str) -> Option<&str> {
    header
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

impl JwtVerifier {
    pub fn new(secret: &str) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.required_spec_claims.clear();
        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }

    /// Returns the caller's email.
    pub fn subject(&self, token: &str) -> Result<String, PaymentError> {
        let data = decode::<Claims>(token, &self.key, &self.validation)
            .map_err(|e| PaymentError::Unauthorized(format!("invalid token: {e}")))?;
        data.claims
            .sub
            .filter(|sub| !sub.trim().is_empty())
            .ok_or_else(|| PaymentError::Unauthorized("no sub claim".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{EncodingKey, Header, encode};
    use serde_json::json;

    const SECRET: &str = "jwt-test-secret";

    fn token(claims: serde_json::Value, secret: &str) -> String {
        encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    #[test]
    fn accepts_token_without_expiry() {
        let verifier = JwtVerifier::new(SECRET);
        let token = token(json!({"sub": "guest@example.com"}), SECRET);

        assert_eq!(verifier.subject(&token).unwrap(), "guest@example.com");
    }

    #[test]
    fn rejects_expired_token() {
        let verifier = JwtVerifier::new(SECRET);
        let token = token(json!({"sub": "guest@example.com", "exp": 1_000_000}), SECRET);

        assert!(matches!(
            verifier.subject(&token),
            Err(PaymentError::Unauthorized(_))
        ));
    }

    #[test]
    fn rejects_foreign_signature() {
        let verifier = JwtVerifier::new(SECRET);
        let token = token(json!({"sub": "guest@example.com"}), "someone-else");

        assert!(matches!(
            verifier.subject(&token),
            Err(PaymentError::Unauthorized(_))
        ));
    }

    #[test]
    fn rejects_missing_subject() {
        let verifier = JwtVerifier::new(SECRET);
        let token = token(json!({"role": "guest"}), SECRET);

        assert!(matches!(
            verifier.subject(&token),
            Err(PaymentError::Unauthorized(msg)) if msg == "no sub claim"
        ));
    }

    #[test]
    fn bearer_prefix_is_required() {
        assert_eq!(bearer_token("Bearer abc"), Some("abc"));
        assert_eq!(bearer_token("Basic abc"), None);
        assert_eq!(bearer_token("Bearer "), None);
    }
}
