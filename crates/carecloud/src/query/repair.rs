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

use regex::Regex;
use std::collections::BTreeSet;
use std::ops::Range;

const FENCE: &str = "```";
const LANGUAGE_TAGS: &[&str] = &["postgresql", "postgres", "pgsql", "sql"];

/// Pulls the statement out of a fenced reply. Unfenced text is only trimmed.
pub fn strip_code_fences(raw: &str) -> String {
    let trimmed = raw.trim();
    let Some(start) = trimmed.find(FENCE) else {
        return trimmed.to_string();
    };

    let after = &trimmed[start + FENCE.len()..];
    let body = match after.find(FENCE) {
        Some(end) => &after[..end],
        None => after,
    };
    strip_language_tag(body.trim_start()).trim().to_string()
}

fn strip_language_tag(body: &str) -> &str {
    for tag in LANGUAGE_TAGS {
        let Some(prefix) = body.get(..tag.len()) else {
            continue;
        };
        if !prefix.eq_ignore_ascii_case(tag) {
            continue;
        }
        let rest = &body[tag.len()..];
        if rest.is_empty() || rest.starts_with(char::is_whitespace) {
            return rest;
        }
    }
    body
}

/// Wraps known mixed-case identifiers in double quotes wherever they appear
/// as whole words outside string literals and not already quoted.
/// Applying it twice gives the same text as applying it once.
#[derive(Debug, Clone)]
pub struct IdentifierRepair {
    patterns: Vec<(String, Regex)>,
}

impl IdentifierRepair {
    pub fn new<I, S>(identifiers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let unique: BTreeSet<String> = identifiers
            .into_iter()
            .map(Into::into)
            .filter(|id| !id.is_empty())
            .collect();
        let patterns = unique
            .into_iter()
            .filter_map(|id| {
                Regex::new(&format!(r"\b{}\b", regex::escape(&id)))
                    .ok()
                    .map(|re| (id, re))
            })
            .collect();
        Self { patterns }
    }

    pub fn identifiers(&self) -> impl Iterator<Item = &str> {
        self.patterns.iter().map(|(id, _)| id.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn repair(&self, sql: &str) -> String {
        let mut current = sql.to_string();
        for (_, pattern) in &self.patterns {
            current = quote_matches(&current, pattern);
        }
        current
    }
}

fn quote_matches(sql: &str, pattern: &Regex) -> String {
    let spans = quoted_spans(sql);
    let mut out = String::with_capacity(sql.len() + 8);
    let mut last = 0;

    for m in pattern.find_iter(sql) {
        let before = sql[..m.start()].chars().next_back();
        let after = sql[m.end()..].chars().next();
        let adjacent = before == Some('"') || after == Some('"');
        let inside = spans.iter().any(|span| span.contains(&m.start()));

        out.push_str(&sql[last..m.start()]);
        if adjacent || inside {
            out.push_str(m.as_str());
        } else {
            out.push('"');
            out.push_str(m.as_str());
            out.push('"');
        }
        last = m.end();
    }
    out.push_str(&sql[last..]);
    out
}

/// Byte ranges covered by single-quoted literals and double-quoted
/// identifiers. A doubled quote inside either is an escape. An unterminated
/// span runs to the end.
fn quoted_spans(sql: &str) -> Vec<Range<usize>> {
    let mut spans = Vec::new();
    let mut open: Option<(u8, usize)> = None;
    let bytes = sql.as_bytes();
    let mut i = 0;

    while i < bytes.len() {
        let b = bytes[i];
        match open {
            None if b == b'\'' || b == b'"' => open = Some((b, i)),
            Some((quote, start)) if b == quote => {
                if bytes.get(i + 1) == Some(&quote) {
                    i += 2;
                    continue;
                }
                spans.push(start..i + 1);
                open = None;
            }
            _ => {}
        }
        i += 1;
    }
    if let Some((_, start)) = open {
        spans.push(start..sql.len());
    }
    spans
}
