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

pub mod adaptive;
pub mod executor;
pub mod repair;
pub mod schema;
pub mod synthesizer;
pub mod validator;

pub use adaptive::{AdaptiveQueryLoop, AttemptState, LoopRun, QueryOutcome};
pub use executor::QueryExecutor;
pub use repair::{strip_code_fences, IdentifierRepair};
pub use schema::{ColumnInfo, SchemaDescription, SchemaIntrospector, TableInfo};
pub use synthesizer::{CandidateQuery, QuerySynthesizer};
pub use validator::StatementValidator;

use llm_contracts::OracleError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SynthesisError {
    #[error("Oracle call failed: {0}")]
    Oracle(#[from] OracleError),

    #[error("Oracle returned no statement")]
    Empty,

    #[error("Statement verb '{0}' is not allowed")]
    DisallowedVerb(String),
}
