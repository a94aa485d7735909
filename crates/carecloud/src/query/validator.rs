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

use super::SynthesisError;

/// First-token verb allow-list. It keeps the oracle from issuing DDL by
/// accident; it is not an injection defence.
#[derive(Debug, Clone)]
pub struct StatementValidator {
    allowed_verbs: Vec<String>,
}

impl StatementValidator {
    pub fn new<I, S>(allowed_verbs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            allowed_verbs: allowed_verbs
                .into_iter()
                .map(|v| v.as_ref().trim().to_uppercase())
                .collect(),
        }
    }

    pub fn validate(&self, statement: &str) -> Result<(), SynthesisError> {
        let verb = first_verb(statement).ok_or(SynthesisError::Empty)?;
        if self.allowed_verbs.iter().any(|allowed| *allowed == verb) {
            Ok(())
        } else {
            Err(SynthesisError::DisallowedVerb(verb))
        }
    }
}

/// Upper-cased leading keyword, if any.
pub fn first_verb(statement: &str) -> Option<String> {
    statement
        .trim_start()
        .split(|c: char| c.is_whitespace() || c == '(' || c == ';')
        .find(|token| !token.is_empty())
        .map(str::to_uppercase)
}
