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

use super::DiscoveredProcess;
use crate::config::ScoringWeights;
use sha2::{Digest, Sha256};
use std::collections::HashSet;

/// Weighted blend of column confidence, chain length and transition density, divided
/// by the weight total so the result stays within [0, 1].
pub(crate) fn score(
    weights: &ScoringWeights,
    column_confidence: f64,
    chain_hops: usize,
    max_chain_depth: usize,
    distinct_transitions: usize,
    status_values: usize,
) -> f64 {
    let chain = if max_chain_depth == 0 {
        0.0
    } else {
        (chain_hops as f64 / max_chain_depth as f64).min(1.0)
    };
    let density = if status_values < 2 {
        0.0
    } else {
        (distinct_transitions as f64 / (status_values - 1) as f64).min(1.0)
    };
    let total = weights.total();
    if total <= 0.0 {
        return 0.0;
    }
    (weights.column * column_confidence + weights.chain * chain + weights.transitions * density)
        / total
}

pub(crate) fn jaccard(a: &[String], b: &[String]) -> f64 {
    let a: HashSet<String> = a.iter().map(|t| t.to_lowercase()).collect();
    let b: HashSet<String> = b.iter().map(|t| t.to_lowercase()).collect();
    let union = a.union(&b).count();
    if union == 0 {
        return 0.0;
    }
    a.intersection(&b).count() as f64 / union as f64
}

/// Keeps the higher-scored process of any pair whose table sets overlap above
/// `threshold`. Expects `processes` sorted by descending score.
pub(crate) fn dedup(processes: Vec<DiscoveredProcess>, threshold: f64) -> Vec<DiscoveredProcess> {
    let mut kept: Vec<DiscoveredProcess> = Vec::with_capacity(processes.len());
    for candidate in processes {
        if kept
            .iter()
            .all(|k| jaccard(&k.tables, &candidate.tables) <= threshold)
        {
            kept.push(candidate);
        }
    }
    kept
}

pub(crate) fn rank(processes: &mut [DiscoveredProcess]) {
    processes.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.name.cmp(&b.name)));
}

pub(crate) fn process_id(name: &str, tables: &[String]) -> String {
    let mut sorted: Vec<String> = tables.iter().map(|t| t.to_lowercase()).collect();
    sorted.sort();
    let mut hasher = Sha256::new();
    hasher.update(name.as_bytes());
    hasher.update(b"|");
    hasher.update(sorted.join(",").as_bytes());
    hex::encode(&hasher.finalize()[..8])
}

pub(crate) fn fallback_name(table: &str) -> String {
    let words: Vec<String> = table
        .split(|c: char| c == '_' || c == '-' || c.is_whitespace())
        .filter(|w| !w.is_empty())
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect();
    format!("{} lifecycle", words.join(" "))
}
