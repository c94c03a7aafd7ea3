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

use chrono::NaiveDateTime;
use indexmap::IndexMap;
use lens_contracts::{value_as_text, SqlDialect, TabularResult};
use serde::{Deserialize, Serialize};
use strata::detector::parse_timestamp;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionPattern {
    pub from: String,
    pub to: String,
    pub count: u64,
    pub avg_duration_seconds: Option<f64>,
}

/// `SELECT <ids..>, status, timestamp FROM table ORDER BY <first id>, timestamp`.
pub(crate) fn sample_query(
    dialect: SqlDialect,
    table: &str,
    identifiers: &[String],
    status: &str,
    timestamp: &str,
) -> String {
    let q = |name: &str| dialect.quote_identifier(name);
    let mut columns: Vec<String> = identifiers.iter().map(|c| q(c)).collect();
    columns.push(q(status));
    columns.push(q(timestamp));
    let order = match identifiers.first() {
        Some(id) => format!("{}, {}", q(id), q(timestamp)),
        None => q(timestamp),
    };
    format!(
        "SELECT {} FROM {} ORDER BY {order}",
        columns.join(", "),
        q(table)
    )
}

#[derive(Default)]
struct Accumulator {
    count: u64,
    seconds: f64,
    timed: u64,
}

/// Consecutive distinct statuses per entity, entities grouped by `entity_col` and
/// ordered by timestamp within each entity. Rows without a status are skipped.
pub(crate) fn transitions_by(
    sample: &TabularResult,
    entity_col: usize,
    status_col: usize,
    timestamp_col: usize,
) -> Vec<TransitionPattern> {
    let mut entities: IndexMap<String, Vec<(Option<NaiveDateTime>, usize, String)>> =
        IndexMap::new();
    for (row_index, row) in sample.rows.iter().enumerate() {
        let Some(entity) = row.get(entity_col).and_then(value_as_text) else {
            continue;
        };
        let Some(status) = row.get(status_col).and_then(value_as_text) else {
            continue;
        };
        let at = row.get(timestamp_col).and_then(parse_timestamp);
        entities
            .entry(entity)
            .or_default()
            .push((at, row_index, status));
    }

    let mut pairs: IndexMap<(String, String), Accumulator> = IndexMap::new();
    for rows in entities.values_mut() {
        // untimed rows keep their sample order, after timed ones
        rows.sort_by(|a, b| match (a.0, b.0) {
            (Some(x), Some(y)) => x.cmp(&y).then(a.1.cmp(&b.1)),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => a.1.cmp(&b.1),
        });
        let mut entered: Option<(&str, Option<NaiveDateTime>)> = None;
        for (at, _, status) in rows.iter() {
            match entered {
                Some((previous, _)) if previous == status.as_str() => {}
                Some((previous, since)) => {
                    let acc = pairs
                        .entry((previous.to_string(), status.clone()))
                        .or_default();
                    acc.count += 1;
                    if let (Some(start), Some(end)) = (since, *at) {
                        acc.seconds += (end - start).num_milliseconds() as f64 / 1000.0;
                        acc.timed += 1;
                    }
                    entered = Some((status.as_str(), *at));
                }
                None => entered = Some((status.as_str(), *at)),
            }
        }
    }

    pairs
        .into_iter()
        .map(|((from, to), acc)| TransitionPattern {
            from,
            to,
            count: acc.count,
            avg_duration_seconds: (acc.timed > 0).then(|| acc.seconds / acc.timed as f64),
        })
        .collect()
}

/// Groups by the first identifier under which some entity moves between statuses.
/// Identifiers come key first, so a table holding one row per entity is only regrouped by
/// a tracked parent when its own key shows no movement. With no movement anywhere the
/// first identifier is returned with no patterns.
pub(crate) fn best_transitions(
    sample: &TabularResult,
    identifiers: &[String],
    status: &str,
    timestamp: &str,
) -> Option<(String, Vec<TransitionPattern>)> {
    let status_col = sample.column_index(status)?;
    let timestamp_col = sample.column_index(timestamp)?;
    let mut fallback: Option<String> = None;
    for id in identifiers {
        let Some(entity_col) = sample.column_index(id) else {
            continue;
        };
        let patterns = transitions_by(sample, entity_col, status_col, timestamp_col);
        if !patterns.is_empty() {
            return Some((id.clone(), patterns));
        }
        fallback.get_or_insert_with(|| id.clone());
    }
    fallback.map(|id| (id, Vec::new()))
}
