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

use crate::requests::CompletionRequest;
use crate::responses::Completion;
use crate::types::{OracleResult, PromptPurpose};
use async_trait::async_trait;

/// A text-generation service. Callers must assume replies can be empty,
/// malformed or off-vocabulary.
#[async_trait]
pub trait TextOracle: Send + Sync {
    async fn complete(&self, request: CompletionRequest) -> OracleResult<Completion>;

    fn name(&self) -> &str;

    async fn complete_text(&self, prompt: &str, purpose: PromptPurpose) -> OracleResult<String> {
        let completion = self
            .complete(CompletionRequest::new(prompt, purpose))
            .await?;
        Ok(completion.content)
    }
}
