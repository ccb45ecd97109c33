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

//! Client for the user service that owns application identities.

use crate::PaymentError;
use crate::base::UserId;
use chrono::{DateTime, Utc};
use reqwest::{StatusCode, Url};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, instrument, warn};

const LOOKUP_TIMEOUT: Duration = Duration::from_secs(5);

/// A user record as returned by the user service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: UserId,
    pub email: String,
    #[serde(default, alias = "first_name")]
    pub first_name: String,
    #[serde(default, alias = "last_name")]
    pub last_name: String,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default, alias = "created_at")]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct IdentityClient {
    http: reqwest::Client,
    base_url: Url,
}

impl IdentityClient {
    pub fn new(base_url: impl AsRef<str>) -> Result<Self, PaymentError> {
        let base_url = Url::parse(base_url.as_ref())
            .map_err(|e| PaymentError::Identity(format!("invalid user service url: {e}")))?;
        let http = reqwest::Client::builder()
            .timeout(LOOKUP_TIMEOUT)
            .build()
            .map_err(|e| PaymentError::Identity(e.to_string()))?;
        Ok(Self { http, base_url })
    }

    /// Resolves an email address to its user record.
    ///
    /// # Errors
    ///
    /// [`PaymentError::Identity`] on transport failure, a non-200 answer or an
    /// undecodable body.
    #[instrument(skip_all)]
    pub async fn user_by_email(&self, email: &str) -> Result<User, PaymentError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| PaymentError::Identity("user service url cannot be a base".to_string()))?
            .pop_if_empty()
            .extend(["api", "users", "by-email"]);
        url.query_pairs_mut().append_pair("email", email);

        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| PaymentError::Identity(format!("user service unreachable: {e}")))?;

        let status = response.status();
        if status != StatusCode::OK {
            warn!(status = status.as_u16(), "user lookup rejected");
            return Err(PaymentError::Identity(format!("user service returned {status}")));
        }

        let user: User = response
            .json()
            .await
            .map_err(|e| PaymentError::Identity(format!("undecodable user record: {e}")))?;
        debug!(user_id = %user.id, "user resolved");
        Ok(user)
    }
}
