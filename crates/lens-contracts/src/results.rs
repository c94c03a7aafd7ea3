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
use serde_json::Value;
use std::collections::HashSet;

/// Column-major metadata with row-major data, as returned by an executor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TabularResult {
    pub columns: Vec<String>,
    #[serde(default)]
    pub rows: Vec<Vec<Value>>,
}

impl TabularResult {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Value>>) -> Self {
        Self { columns, rows }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        let wanted = name.trim();
        self.columns
            .iter()
            .position(|c| c.trim().eq_ignore_ascii_case(wanted))
    }

    pub fn cell(&self, row: usize, column: usize) -> Option<&Value> {
        self.rows.get(row).and_then(|r| r.get(column))
    }

    pub fn column_values(&self, column: usize) -> impl Iterator<Item = &Value> + '_ {
        self.rows.iter().filter_map(move |r| r.get(column))
    }

    /// Non-null values of a column rendered as text, in order of first appearance.
    pub fn distinct_values(&self, column: usize) -> Vec<String> {
        let mut seen = HashSet::new();
        self.column_values(column)
            .filter_map(value_as_text)
            .filter(|v| seen.insert(v.clone()))
            .collect()
    }
}

pub fn value_as_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        other => Some(other.to_string()),
    }
}

pub fn value_as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> TabularResult {
        TabularResult::new(
            vec!["Status".to_string(), "cnt".to_string()],
            vec![
                vec![json!("open"), json!(3)],
                vec![json!("closed"), json!("7")],
                vec![json!("open"), json!(1)],
                vec![Value::Null, json!(2)],
            ],
        )
    }

    #[test]
    fn test_column_lookup_is_case_insensitive() {
        let result = sample();
        assert_eq!(result.column_index("status"), Some(0));
        assert_eq!(result.column_index("CNT"), Some(1));
        assert_eq!(result.column_index("missing"), None);
    }

    #[test]
    fn test_distinct_values_keep_first_appearance() {
        let result = sample();
        assert_eq!(result.distinct_values(0), vec!["open", "closed"]);
    }

    #[test]
    fn test_numeric_coercion() {
        let result = sample();
        let total: f64 = result.column_values(1).filter_map(value_as_f64).sum();
        assert_eq!(total, 13.0);
    }
}
