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

use crate::types::PromptPurpose;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub id: Uuid,
    pub prompt: String,
    pub purpose: PromptPurpose,
    pub generation_config: GenerationConfig,
    pub created_at: DateTime<Utc>,
}

impl CompletionRequest {
    pub fn new(prompt: impl Into<String>, purpose: PromptPurpose) -> Self {
        Self {
            id: Uuid::new_v4(),
            prompt: prompt.into(),
            purpose,
            generation_config: GenerationConfig::default(),
            created_at: Utc::now(),
        }
    }
}

/// Per-request overrides. `None` defers to the oracle's own configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenerationConfig {
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_requests_defer_to_oracle_configuration() {
        let request = CompletionRequest::new("hello", PromptPurpose::ResultSummary);
        assert!(request.generation_config.max_tokens.is_none());
        assert!(request.generation_config.temperature.is_none());
    }
}
