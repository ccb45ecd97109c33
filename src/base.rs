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

//! Core identifier and value types shared by the ledger and the gateway adapter.
//!
//! Gateway-assigned identifiers (`cus_...`, `pm_...`, `pi_...`) are opaque to
//! this crate: they are carried verbatim and never parsed for their prefix.

use crate::PaymentError;
use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize, sqlx::Type,
        )]
        #[serde(transparent)]
        #[sqlx(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn is_empty(&self) -> bool {
                self.0.trim().is_empty()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_owned())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

string_id!(
    /// Application user identifier, issued by the identity service.
    UserId
);

string_id!(
    /// Gateway customer identifier (`cus_...`).
    CustomerId
);

string_id!(
    /// Gateway payment method identifier (`pm_...`).
    PaymentMethodId
);

string_id!(
    /// Gateway payment intent identifier (`pi_...`).
    ///
    /// Payment intents and deposit holds are both keyed by the intent that
    /// backs them at the gateway.
    IntentId
);

/// Amount in the smallest currency unit (cents, kopecks, ...).
///
/// Always strictly positive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, sqlx::Type)]
#[serde(transparent)]
#[sqlx(transparent)]
pub struct Amount(i64);

impl Amount {
    /// Validates a caller-supplied amount.
    ///
    /// # Errors
    ///
    /// Returns [`PaymentError::Validation`] if `value` is zero or negative.
    pub fn new(value: i64) -> Result<Self, PaymentError> {
        if value <= 0 {
            return Err(PaymentError::Validation(format!(
                "amount must be a positive integer, got {value}"
            )));
        }
        Ok(Self(value))
    }

    pub fn value(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// ISO currency code as understood by the gateway.
///
/// Only non-emptiness is checked here; the gateway rejects unsupported codes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, sqlx::Type)]
#[serde(transparent)]
#[sqlx(transparent)]
pub struct Currency(String);

impl Currency {
    /// # Errors
    ///
    /// Returns [`PaymentError::Validation`] if the code is blank.
    pub fn new(code: impl Into<String>) -> Result<Self, PaymentError> {
        let code = code.into();
        let trimmed = code.trim();
        if trimmed.is_empty() {
            return Err(PaymentError::Validation("currency is required".to_string()));
        }
        Ok(Self(trimmed.to_owned()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Rejects blank caller-supplied fields.
pub(crate) fn require(field: &str, value: &str) -> Result<(), PaymentError> {
    if value.trim().is_empty() {
        return Err(PaymentError::Validation(format!("{field} is required")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn amount_rejects_zero_and_negative() {
        assert!(matches!(Amount::new(0), Err(PaymentError::Validation(_))));
        assert!(matches!(Amount::new(-5), Err(PaymentError::Validation(_))));
        assert_eq!(Amount::new(5000).unwrap().value(), 5000);
    }

    #[test]
    fn currency_is_trimmed_and_required() {
        assert_eq!(Currency::new(" usd ").unwrap().as_str(), "usd");
        assert!(matches!(Currency::new("   "), Err(PaymentError::Validation(_))));
    }

    #[test]
    fn ids_display_verbatim() {
        let id = IntentId::from("pi_123");
        assert_eq!(id.to_string(), "pi_123");
        assert!(UserId::new(" ").is_empty());
        assert!(!CustomerId::new("cus_1").is_empty());
    }
}
