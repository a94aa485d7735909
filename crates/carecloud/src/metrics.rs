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

use crate::router::Domain;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct RouterMetrics {
    requests: AtomicU64,
    handler_attempts: AtomicU64,
    handler_retries: AtomicU64,
    handler_failures: AtomicU64,
    handler_panics: AtomicU64,
    timeouts: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    medicine: AtomicU64,
    monitoring: AtomicU64,
    stock: AtomicU64,
    scheduling: AtomicU64,
    generic_data_access: AtomicU64,
    coordinator_internal: AtomicU64,
}

impl RouterMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn record_request(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_classified(&self, domain: Domain) {
        let counter = match domain {
            Domain::Medicine => &self.medicine,
            Domain::Monitoring => &self.monitoring,
            Domain::Stock => &self.stock,
            Domain::Scheduling => &self.scheduling,
            Domain::GenericDataAccess => &self.generic_data_access,
            Domain::CoordinatorInternal => &self.coordinator_internal,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_attempt(&self, attempt: u32) {
        self.handler_attempts.fetch_add(1, Ordering::Relaxed);
        if attempt > 1 {
            self.handler_retries.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[inline]
    pub fn record_handler_failure(&self) {
        self.handler_failures.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_panic(&self) {
        self.handler_panics.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_timeout(&self) {
        self.timeouts.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_outcome(&self, succeeded: bool) {
        if succeeded {
            self.succeeded.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> BTreeMap<String, u64> {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        [
            ("router.requests", load(&self.requests)),
            ("router.handler_attempts", load(&self.handler_attempts)),
            ("router.handler_retries", load(&self.handler_retries)),
            ("router.handler_failures", load(&self.handler_failures)),
            ("router.handler_panics", load(&self.handler_panics)),
            ("router.timeouts", load(&self.timeouts)),
            ("router.succeeded", load(&self.succeeded)),
            ("router.failed", load(&self.failed)),
            ("router.classified.medicine", load(&self.medicine)),
            ("router.classified.monitoring", load(&self.monitoring)),
            ("router.classified.stock", load(&self.stock)),
            ("router.classified.scheduling", load(&self.scheduling)),
            (
                "router.classified.generic-data-access",
                load(&self.generic_data_access),
            ),
            (
                "router.classified.coordinator-internal",
                load(&self.coordinator_internal),
            ),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
    }
}

#[derive(Debug, Default)]
pub struct LoopMetrics {
    runs: AtomicU64,
    attempts: AtomicU64,
    synthesis_failures: AtomicU64,
    execution_failures: AtomicU64,
    introspection_failures: AtomicU64,
    successes: AtomicU64,
    exhausted: AtomicU64,
}

impl LoopMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn record_run(&self) {
        self.runs.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_attempt(&self) {
        self.attempts.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_synthesis_failure(&self) {
        self.synthesis_failures.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_execution_failure(&self) {
        self.execution_failures.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_introspection_failure(&self) {
        self.introspection_failures.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_success(&self) {
        self.successes.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_exhausted(&self) {
        self.exhausted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> BTreeMap<String, u64> {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        [
            ("query_loop.runs", load(&self.runs)),
            ("query_loop.attempts", load(&self.attempts)),
            ("query_loop.synthesis_failures", load(&self.synthesis_failures)),
            ("query_loop.execution_failures", load(&self.execution_failures)),
            (
                "query_loop.introspection_failures",
                load(&self.introspection_failures),
            ),
            ("query_loop.successes", load(&self.successes)),
            ("query_loop.exhausted", load(&self.exhausted)),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
    }
}
