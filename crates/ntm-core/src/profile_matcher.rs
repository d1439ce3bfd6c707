// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Scores (agent, task) pairs (C3).

use crate::model::{AgentProfile, Task};

/// Rough heuristic: ~4 characters per token, matching common LLM estimators.
fn estimate_tokens(task: &Task) -> u64 {
    if task.estimated_tokens > 0 {
        return task.estimated_tokens;
    }
    (task.title.len() as u64) / 4
}

/// Outcome of scoring one `(agent, task)` pair.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreResult {
    pub can_handle: bool,
    pub score: f64,
}

/// Score a single agent profile against a task.
pub fn score_assignment(profile: &AgentProfile, task: &Task) -> ScoreResult {
    let tokens = estimate_tokens(task);
    if tokens > profile.context_budget {
        return ScoreResult { can_handle: false, score: 0.0 };
    }

    let mut score = 1.0_f64;

    let specialization_hits =
        task.labels.iter().chain(std::iter::once(&task.task_type)).filter(|label| {
            profile.specializations.iter().any(|s| s.eq_ignore_ascii_case(label))
        }).count();
    score *= 1.5_f64.powi(specialization_hits as i32);

    let preferred_hits = task
        .affected_files
        .iter()
        .filter(|f| profile.preferences.preferred_files.iter().any(|g| glob_match(g, f)))
        .count();
    score *= (1.0 + 0.1 * preferred_hits as f64).min(1.5);

    let avoid_hits = task
        .affected_files
        .iter()
        .filter(|f| profile.preferences.avoid_files.iter().any(|g| glob_match(g, f)))
        .count();
    score *= (1.0 - 0.15 * avoid_hits as f64).max(0.5);

    let label_hits = task
        .labels
        .iter()
        .filter(|l| profile.preferences.preferred_labels.iter().any(|pl| pl.eq_ignore_ascii_case(l)))
        .count();
    score *= (1.15_f64.powi(label_hits as i32)).min(2.0);

    if profile.performance.success_rate > 0.9 {
        score *= 1.1;
    } else if profile.performance.success_rate < 0.7 {
        score *= 0.9;
    }

    ScoreResult { can_handle: true, score: (score * 100.0).round() / 100.0 }
}

/// Pick the max-score agent that can handle the task; default to `"claude"` if none can.
pub fn recommend_agent(profiles: &[AgentProfile], task: &Task) -> String {
    profiles
        .iter()
        .map(|p| (p, score_assignment(p, task)))
        .filter(|(_, result)| result.can_handle)
        .max_by(|(_, a), (_, b)| a.score.partial_cmp(&b.score).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(p, _)| p.agent_type.clone())
        .unwrap_or_else(|| "claude".to_owned())
}

/// Matches a small glob dialect: `**/suffix`, `prefix/**/suffix`, `prefix/**`, and plain `*`.
pub fn glob_match(pattern: &str, path: &str) -> bool {
    if let Some(suffix) = pattern.strip_prefix("**/") {
        if let Some(inner) = suffix.strip_suffix("/**") {
            return path.contains(inner);
        }
        return path == suffix || path.ends_with(&format!("/{suffix}"));
    }
    if let Some(rest) = pattern.strip_suffix("/**") {
        return path == rest || path.starts_with(&format!("{rest}/"));
    }
    if let Some((prefix, suffix)) = pattern.split_once("/**/") {
        return path.starts_with(&format!("{prefix}/")) && path.ends_with(&format!("/{suffix}"));
    }
    if pattern.contains('*') {
        return glob_star_match(pattern, path);
    }
    pattern == path
}

/// Ordinary single-level `*` glob match (no `**`).
fn glob_star_match(pattern: &str, text: &str) -> bool {
    let parts: Vec<&str> = pattern.split('*').collect();
    if parts.len() == 1 {
        return pattern == text;
    }
    let mut pos = 0;
    for (i, part) in parts.iter().enumerate() {
        if part.is_empty() {
            continue;
        }
        if i == 0 {
            if !text[pos..].starts_with(part) {
                return false;
            }
            pos += part.len();
        } else if i == parts.len() - 1 {
            return text[pos..].ends_with(part);
        } else {
            match text[pos..].find(part) {
                Some(found) => pos += found + part.len(),
                None => return false,
            }
        }
    }
    true
}

#[cfg(test)]
#[path = "profile_matcher_tests.rs"]
mod tests;
