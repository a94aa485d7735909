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

use super::{DomainHandler, HandlerError};
use crate::query::AdaptiveQueryLoop;
use crate::router::{Domain, Request};
use async_trait::async_trait;
use tracing::instrument;

/// Catch-all handler: every request goes straight through the query loop.
pub struct DataAccessHandler {
    query_loop: AdaptiveQueryLoop,
}

impl DataAccessHandler {
    pub fn new(query_loop: AdaptiveQueryLoop) -> Self {
        Self { query_loop }
    }
}

#[async_trait]
impl DomainHandler for DataAccessHandler {
    fn name(&self) -> &str {
        "database"
    }

    fn domain(&self) -> Domain {
        Domain::GenericDataAccess
    }

    #[instrument(skip(self, request), fields(correlation_id = %request.correlation_id))]
    async fn handle(&self, request: &Request) -> Result<String, HandlerError> {
        Ok(self.query_loop.answer(&request.text).await)
    }
}
