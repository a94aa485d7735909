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

//! Natural-language front end for a clinic database: a coordinator routes
//! each request to a domain handler, which answers from fixed templates or
//! through the adaptive query loop.

pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod oracle;
pub mod query;
pub mod render;
pub mod router;
pub mod store;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use config::{ConfigError, CoreConfig};
pub use error::{CoreError, CoreResult};
pub use handlers::{DomainHandler, HandlerError};
pub use query::{AdaptiveQueryLoop, QueryOutcome};
pub use render::ResultRenderer;
pub use router::{Coordinator, Domain, RenderedResponse, Request};
pub use store::{PgStore, RelationalStore, Row, StoreError};
