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

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Per-request lifecycle.
///
/// `Received -> Classified -> Dispatched -> {Succeeded | DomainFailed} -> Rendered -> Terminal`.
/// A request can also fail before dispatch (no handler, timeout), which goes
/// straight to `DomainFailed`. Coordinator-internal requests are answered
/// without dispatch and go from `Classified` to `Succeeded`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouterState {
    Received,
    Classified,
    Dispatched,
    Succeeded,
    DomainFailed,
    Rendered,
    Terminal,
}

impl RouterState {
    pub fn can_transition_to(self, next: RouterState) -> bool {
        use RouterState::*;
        matches!(
            (self, next),
            (Received, Classified)
                | (Received, DomainFailed)
                | (Classified, Dispatched)
                | (Classified, DomainFailed)
                | (Classified, Succeeded)
                | (Dispatched, Succeeded)
                | (Dispatched, DomainFailed)
                | (Succeeded, Rendered)
                | (DomainFailed, Rendered)
                | (Rendered, Terminal)
        )
    }
}

/// Ordered record of the states a request passed through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lifecycle {
    trail: Vec<RouterState>,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle {
    pub fn new() -> Self {
        Self {
            trail: vec![RouterState::Received],
        }
    }

    pub fn current(&self) -> RouterState {
        self.trail.last().copied().unwrap_or(RouterState::Received)
    }

    /// Invalid transitions are logged and ignored.
    pub fn advance(&mut self, next: RouterState) -> bool {
        let current = self.current();
        if current.can_transition_to(next) {
            self.trail.push(next);
            true
        } else {
            warn!(from = ?current, to = ?next, "Rejected router state transition");
            false
        }
    }

    pub fn trail(&self) -> &[RouterState] {
        &self.trail
    }

    pub fn into_trail(self) -> Vec<RouterState> {
        self.trail
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_reaches_terminal() {
        let mut lifecycle = Lifecycle::new();
        for state in [
            RouterState::Classified,
            RouterState::Dispatched,
            RouterState::Succeeded,
            RouterState::Rendered,
            RouterState::Terminal,
        ] {
            assert!(lifecycle.advance(state));
        }
        assert_eq!(lifecycle.current(), RouterState::Terminal);
        assert_eq!(lifecycle.trail().len(), 6);
    }

    #[test]
    fn skipping_states_is_rejected() {
        let mut lifecycle = Lifecycle::new();
        assert!(!lifecycle.advance(RouterState::Rendered));
        assert!(!lifecycle.advance(RouterState::Terminal));
        assert_eq!(lifecycle.trail(), &[RouterState::Received]);
    }

    #[test]
    fn terminal_has_no_successor() {
        use RouterState::*;
        for next in [Received, Classified, Dispatched, Succeeded, DomainFailed, Rendered, Terminal] {
            assert!(!Terminal.can_transition_to(next));
        }
    }
}
