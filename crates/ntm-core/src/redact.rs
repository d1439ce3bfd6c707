// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Regex-based secret scanning with deterministic placeholders (C12).
//!
//! Redaction is a fixed point: running it twice over already-redacted text
//! changes nothing, because the placeholder itself never matches a secret
//! pattern.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;

/// How a [`Redactor`] reacts when it finds a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedactionMode {
    /// Scanning is disabled; text passes through unchanged.
    Off,
    /// Matches are logged but the text passes through unchanged.
    Warn,
    /// Matches are replaced with deterministic placeholders.
    Redact,
    /// Any match aborts the operation (caller decides what "block" means).
    Block,
}

/// Outcome of a single [`Redactor::scan`] call.
#[derive(Debug, Clone)]
pub struct ScanResult {
    pub text: String,
    pub matched: Vec<String>,
}

#[derive(Clone)]
struct Pattern {
    label: &'static str,
    re: Regex,
}

/// Default pattern set: API keys (`sk-...`, `AKIA...`), bearer tokens, and
/// generic `key=value`/`key: value` secrets whose key name suggests a
/// credential. Compiled once; a pattern that fails to compile is silently
/// dropped from the set rather than panicking.
static DEFAULT_PATTERNS: LazyLock<Vec<Pattern>> = LazyLock::new(|| {
    [
        ("api_key", r"sk-[A-Za-z0-9]{16,}"),
        ("aws_key", r"AKIA[0-9A-Z]{16}"),
        ("bearer_token", r"(?i)bearer\s+[A-Za-z0-9._-]{16,}"),
        ("kv_secret", r"(?i)(password|secret|token|api_key|apikey)\s*[:=]\s*[^\s,;]{6,}"),
    ]
    .into_iter()
    .filter_map(|(label, pattern)| Regex::new(pattern).ok().map(|re| Pattern { label, re }))
    .collect()
});

/// Scans text for common secret shapes and replaces them with
/// `<REDACTED:label:NNNN>` placeholders, where `NNNN` is a stable short hash
/// of the literal secret so the same secret always maps to the same
/// placeholder within a process lifetime.
pub struct Redactor {
    mode: RedactionMode,
    patterns: Vec<Pattern>,
}

impl Redactor {
    /// Build a redactor with the default pattern set: API keys (`sk-...`,
    /// `AKIA...`), bearer tokens, and generic `key=value`/`key: value` secrets
    /// whose key name suggests a credential.
    pub fn new(mode: RedactionMode) -> Self {
        Self { mode, patterns: DEFAULT_PATTERNS.clone() }
    }

    pub fn mode(&self) -> RedactionMode {
        self.mode
    }

    /// Scan `text`, applying the configured mode. Always returns the matched
    /// literals (even in `Off`/`Warn` mode, for the caller to log), but only
    /// rewrites `text` in `Redact` mode.
    pub fn scan(&self, text: &str) -> ScanResult {
        if self.mode == RedactionMode::Off {
            return ScanResult { text: text.to_owned(), matched: vec![] };
        }

        let mut matched = Vec::new();
        let mut output = text.to_owned();

        if self.mode == RedactionMode::Redact {
            for pattern in &self.patterns {
                output = replace_with_placeholder(&pattern.re, pattern.label, &output, &mut matched);
            }
        } else {
            for pattern in &self.patterns {
                for m in pattern.re.find_iter(text) {
                    matched.push(m.as_str().to_owned());
                }
            }
        }

        ScanResult { text: output, matched }
    }

    /// `true` if `text` contains any secret-shaped substring, without mutating it.
    pub fn contains_secret(&self, text: &str) -> bool {
        self.patterns.iter().any(|p| p.re.is_match(text))
    }
}

fn placeholder_for(label: &str, secret: &str, seen: &mut HashMap<String, String>) -> String {
    if let Some(existing) = seen.get(secret) {
        return existing.clone();
    }
    // Deterministic short fingerprint: FNV-1a over the literal secret, so the
    // same secret always maps to the same placeholder without needing a
    // process-wide counter.
    let mut hash: u64 = 0xcbf29ce484222325;
    for byte in secret.as_bytes() {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x100000001b3);
    }
    let placeholder = format!("<REDACTED:{label}:{:08x}>", (hash & 0xffff_ffff) as u32);
    seen.insert(secret.to_owned(), placeholder.clone());
    placeholder
}

fn replace_with_placeholder(
    re: &Regex,
    label: &str,
    text: &str,
    matched: &mut Vec<String>,
) -> String {
    let mut seen = HashMap::new();
    let mut out = String::with_capacity(text.len());
    let mut last = 0;
    for m in re.find_iter(text) {
        // Already-redacted output must be a fixed point: a match that merely
        // wraps a prior placeholder (e.g. a `key: <REDACTED:...>` match) is
        // left untouched instead of being redacted again.
        if m.as_str().contains("<REDACTED:") {
            continue;
        }
        out.push_str(&text[last..m.start()]);
        matched.push(m.as_str().to_owned());
        out.push_str(&placeholder_for(label, m.as_str(), &mut seen));
        last = m.end();
    }
    out.push_str(&text[last..]);
    out
}

#[cfg(test)]
#[path = "redact_tests.rs"]
mod tests;
