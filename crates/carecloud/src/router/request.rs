// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2024 Jonathan Lee
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License version 3
// as published by the Free Software Foundation.
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.
// See the GNU Affero General Public License for more details.
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see https://www.gnu.org/licenses/.

use super::domain::Domain;
use super::state::RouterState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One user turn. Immutable once built.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub text: String,
    pub domain_hint: Option<Domain>,
    pub received_at: DateTime<Utc>,
    pub correlation_id: Uuid,
}

impl Request {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            domain_hint: None,
            received_at: Utc::now(),
            correlation_id: Uuid::new_v4(),
        }
    }

    pub fn with_hint(mut self, hint: Option<Domain>) -> Self {
        self.domain_hint = hint;
        self
    }
}

/// Reply text plus how it was produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderedResponse {
    pub text: String,
    pub domain: Domain,
    pub handler: Option<String>,
    pub attempts: u32,
    pub succeeded: bool,
    pub trail: Vec<RouterState>,
    pub correlation_id: Uuid,
}
