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

use crate::config::DiscoveryConfig;
use lens_contracts::{
    value_as_f64, value_as_text, ColumnSchema, SchemaSnapshot, SqlDialect, TableSchema,
    TabularResult,
};
use serde::{Deserialize, Serialize};
use strata::normalise_stage;

const ENUMERATED_SCORE: f64 = 0.9;
const STATUS_NAME_SCORE: f64 = 0.3;
const LEXICAL_SCORE: f64 = 0.5;
const TEMPORAL_TYPE_SCORE: f64 = 0.8;
const TIMESTAMP_NAME_SCORE: f64 = 0.2;

pub(crate) const STATUS_THRESHOLD: f64 = 0.4;
pub(crate) const TIMESTAMP_THRESHOLD: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnRole {
    Status,
    Timestamp,
    Identifier,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnEvidence {
    pub data_type: String,
    pub enumerated: bool,
    pub name_hint: bool,
    /// Distinct values seen while sampling; absent when the column was not sampled.
    pub cardinality: Option<usize>,
    pub lexical_ratio: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnCandidate {
    pub table: String,
    pub column: String,
    pub role: ColumnRole,
    pub confidence: f64,
    pub evidence: ColumnEvidence,
    /// Status values, most frequent first.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub values: Vec<String>,
}

pub(crate) fn is_enumerated(column: &ColumnSchema) -> bool {
    let t = column.data_type.trim().to_lowercase();
    !column.enum_values.is_empty()
        || t == "enum"
        || t == "set"
        || t == "user-defined"
        || t.starts_with("enum(")
        || t.starts_with("set(")
}

pub(crate) fn is_temporal(data_type: &str) -> bool {
    let t = data_type.to_lowercase();
    t.contains("date") || t.contains("time")
}

fn is_textual(data_type: &str) -> bool {
    let t = data_type.to_lowercase();
    ["char", "text", "string", "clob"]
        .iter()
        .any(|needle| t.contains(needle))
}

fn name_tokens(name: &str) -> Vec<String> {
    name.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect()
}

fn has_status_hint(name: &str, hints: &[String]) -> bool {
    let tokens = name_tokens(name);
    hints
        .iter()
        .any(|h| tokens.iter().any(|t| t == &h.to_lowercase()))
}

fn has_timestamp_hint(name: &str, hints: &[String]) -> bool {
    let lower = name.to_lowercase();
    let tokens = name_tokens(name);
    hints.iter().any(|h| {
        let h = h.to_lowercase();
        if h.starts_with('_') {
            lower.ends_with(&h)
        } else {
            tokens.iter().any(|t| t == &h)
        }
    })
}

pub(crate) fn is_identifier(table: &TableSchema, column: &str) -> bool {
    table.primary_key.iter().any(|pk| pk.eq_ignore_ascii_case(column))
        || table
            .foreign_keys
            .iter()
            .any(|fk| fk.column.eq_ignore_ascii_case(column))
}

/// Columns worth a distinct-value sample: enumerated, status-named, or free text.
pub(crate) fn status_probes<'a>(
    table: &'a TableSchema,
    config: &DiscoveryConfig,
) -> Vec<&'a ColumnSchema> {
    table
        .columns
        .iter()
        .filter(|c| !is_identifier(table, &c.name) && !is_temporal(&c.data_type))
        .filter(|c| {
            is_enumerated(c)
                || has_status_hint(&c.name, &config.status_name_hints)
                || is_textual(&c.data_type)
        })
        .collect()
}

pub(crate) fn distinct_values_query(dialect: SqlDialect, table: &str, column: &str) -> String {
    let col = dialect.quote_identifier(column);
    format!(
        "SELECT {col} AS value, COUNT(*) AS n FROM {} GROUP BY {col}",
        dialect.quote_identifier(table)
    )
}

/// Values from a `value, n` sample ordered by descending count, then by name.
pub(crate) fn sampled_values(sample: &TabularResult) -> Vec<String> {
    let mut counted: Vec<(String, f64)> = sample
        .rows
        .iter()
        .filter_map(|row| {
            let value = row.first().and_then(value_as_text)?;
            let n = row.get(1).and_then(value_as_f64).unwrap_or(0.0);
            Some((value, n))
        })
        .collect();
    counted.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    counted.into_iter().map(|(v, _)| v).collect()
}

/// Scores one column as a status column. `sample` is `None` when sampling failed or
/// was skipped; `Some` values above the cardinality cap disqualify the column.
pub(crate) fn score_status(
    table: &str,
    column: &ColumnSchema,
    sample: Option<Vec<String>>,
    config: &DiscoveryConfig,
) -> Option<ColumnCandidate> {
    let enumerated = is_enumerated(column);
    let name_hint = has_status_hint(&column.name, &config.status_name_hints);
    let values = match sample {
        Some(values) => values,
        None => column.enum_values.clone(),
    };
    if values.len() > config.max_status_cardinality {
        return None;
    }
    let keywords: Vec<String> = config
        .status_keywords
        .iter()
        .map(|k| normalise_stage(k))
        .collect();
    let lexical_ratio = (!values.is_empty()).then(|| {
        let hits = values
            .iter()
            .filter(|v| keywords.contains(&normalise_stage(v)))
            .count();
        hits as f64 / values.len() as f64
    });

    let mut confidence = 0.0;
    if enumerated {
        confidence += ENUMERATED_SCORE;
    }
    if name_hint {
        confidence += STATUS_NAME_SCORE;
    }
    confidence += LEXICAL_SCORE * lexical_ratio.unwrap_or(0.0);
    let confidence = confidence.min(1.0);

    if confidence < STATUS_THRESHOLD || values.len() == 1 {
        return None;
    }
    Some(ColumnCandidate {
        table: table.to_string(),
        column: column.name.clone(),
        role: ColumnRole::Status,
        confidence,
        evidence: ColumnEvidence {
            data_type: column.data_type.clone(),
            enumerated,
            name_hint,
            cardinality: (!values.is_empty()).then_some(values.len()),
            lexical_ratio,
        },
        values,
    })
}

pub(crate) fn score_timestamp(
    table: &str,
    column: &ColumnSchema,
    config: &DiscoveryConfig,
) -> Option<ColumnCandidate> {
    let typed = is_temporal(&column.data_type);
    let name_hint = has_timestamp_hint(&column.name, &config.timestamp_name_hints);
    let mut confidence = 0.0;
    if typed {
        confidence += TEMPORAL_TYPE_SCORE;
    }
    if name_hint {
        confidence += TIMESTAMP_NAME_SCORE;
    }
    if confidence < TIMESTAMP_THRESHOLD {
        return None;
    }
    Some(ColumnCandidate {
        table: table.to_string(),
        column: column.name.clone(),
        role: ColumnRole::Timestamp,
        confidence: f64::min(confidence, 1.0),
        evidence: ColumnEvidence {
            data_type: column.data_type.clone(),
            enumerated: false,
            name_hint,
            cardinality: None,
            lexical_ratio: None,
        },
        values: Vec::new(),
    })
}

/// Highest-confidence timestamp column of a table; earlier columns win ties.
pub(crate) fn best_timestamp(table: &TableSchema, config: &DiscoveryConfig) -> Option<ColumnCandidate> {
    table
        .columns
        .iter()
        .filter_map(|c| score_timestamp(&table.name, c, config))
        .fold(None, |best: Option<ColumnCandidate>, c| match best {
            Some(b) if b.confidence >= c.confidence => Some(b),
            _ => Some(c),
        })
}

/// Identifier columns usable for grouping rows per entity: the primary key first, then
/// foreign keys to the entity this table tracks. A foreign key qualifies when the table
/// is named after the referenced table (`order_status_history` -> `orders`) or when the
/// referenced table carries a column named like `status_column`.
pub(crate) fn identifiers(
    table: &TableSchema,
    snapshot: &SchemaSnapshot,
    status_column: &str,
) -> Vec<ColumnCandidate> {
    let mut names: Vec<String> = table.primary_key.clone();
    let own_name = table.name.to_lowercase();
    for fk in &table.foreign_keys {
        let parent = fk.references_table.to_lowercase();
        let stem = parent.strip_suffix('s').unwrap_or(parent.as_str());
        let named_after = !stem.is_empty() && own_name.starts_with(stem);
        let shares_status = snapshot
            .table(&fk.references_table)
            .is_some_and(|t| t.column(status_column).is_some());
        if (named_after || shares_status) && !names.iter().any(|n| n.eq_ignore_ascii_case(&fk.column)) {
            names.push(fk.column.clone());
        }
    }
    names
        .into_iter()
        .filter_map(|name| {
            let column = table.column(&name)?;
            Some(ColumnCandidate {
                table: table.name.clone(),
                column: column.name.clone(),
                role: ColumnRole::Identifier,
                confidence: 1.0,
                evidence: ColumnEvidence {
                    data_type: column.data_type.clone(),
                    enumerated: false,
                    name_hint: false,
                    cardinality: None,
                    lexical_ratio: None,
                },
                values: Vec::new(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use lens_contracts::ForeignKey;
    use serde_json::json;

    fn column(name: &str, data_type: &str) -> ColumnSchema {
        ColumnSchema {
            name: name.to_string(),
            data_type: data_type.to_string(),
            nullable: true,
            enum_values: vec![],
        }
    }

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn test_status_scoring() {
        let config = DiscoveryConfig::default();
        let named = score_status(
            "orders",
            &column("status", "varchar(20)"),
            Some(strings(&["pending", "shipped", "delivered", "weird"])),
            &config,
        )
        .unwrap();
        assert!((named.confidence - (0.3 + 0.5 * 0.75)).abs() < 1e-9);
        assert_eq!(named.evidence.cardinality, Some(4));

        let mut enumerated = column("kind", "USER-DEFINED");
        enumerated.enum_values = strings(&["a", "b"]);
        let c = score_status("t", &enumerated, None, &config).unwrap();
        assert!((c.confidence - 0.9).abs() < 1e-9);
        assert_eq!(c.values, strings(&["a", "b"]));

        let free_text = score_status("t", &column("note", "text"), Some(strings(&["x", "y"])), &config);
        assert!(free_text.is_none());
    }

    #[test]
    fn test_cardinality_cap_disqualifies() {
        let config = DiscoveryConfig {
            max_status_cardinality: 3,
            ..DiscoveryConfig::default()
        };
        let values = strings(&["open", "closed", "pending", "done"]);
        assert!(score_status("t", &column("status", "text"), Some(values), &config).is_none());
    }

    #[test]
    fn test_timestamp_scoring() {
        let config = DiscoveryConfig::default();
        let table = TableSchema {
            name: "orders".to_string(),
            columns: vec![
                column("created_by", "text"),
                column("placed", "timestamp"),
                column("updated_at", "timestamptz"),
            ],
            ..TableSchema::default()
        };
        let best = best_timestamp(&table, &config).unwrap();
        assert_eq!(best.column, "updated_at");
        assert!((best.confidence - 1.0).abs() < 1e-9);
        assert!(score_timestamp("orders", &column("created_by", "text"), &config).is_none());
    }

    #[test]
    fn test_probes_skip_keys_and_times() {
        let table = TableSchema {
            name: "history".to_string(),
            columns: vec![
                column("id", "integer"),
                column("order_id", "integer"),
                column("status", "text"),
                column("changed_at", "timestamp"),
                column("amount", "numeric"),
            ],
            primary_key: vec!["id".to_string()],
            foreign_keys: vec![ForeignKey {
                column: "order_id".to_string(),
                references_table: "orders".to_string(),
                references_column: "id".to_string(),
            }],
            row_estimate: None,
        };
        let probes: Vec<&str> = status_probes(&table, &DiscoveryConfig::default())
            .iter()
            .map(|c| c.name.as_str())
            .collect();
        assert_eq!(probes, vec!["status"]);
        let snapshot = SchemaSnapshot::default();
        let ids: Vec<String> = identifiers(&table, &snapshot, "status")
            .into_iter()
            .map(|c| c.column)
            .collect();
        assert_eq!(ids, vec!["id"]);
    }

    #[test]
    fn test_identifiers_keep_only_tracked_parents() {
        let orders = TableSchema {
            name: "orders".to_string(),
            columns: vec![
                column("id", "integer"),
                column("customer_id", "integer"),
                column("status", "text"),
            ],
            primary_key: vec!["id".to_string()],
            foreign_keys: vec![ForeignKey {
                column: "customer_id".to_string(),
                references_table: "customers".to_string(),
                references_column: "id".to_string(),
            }],
            row_estimate: None,
        };
        let events = TableSchema {
            name: "status_changes".to_string(),
            columns: vec![
                column("id", "integer"),
                column("order_id", "integer"),
                column("status", "text"),
            ],
            primary_key: vec!["id".to_string()],
            foreign_keys: vec![ForeignKey {
                column: "order_id".to_string(),
                references_table: "orders".to_string(),
                references_column: "id".to_string(),
            }],
            row_estimate: None,
        };
        let snapshot = SchemaSnapshot {
            tables: vec![orders.clone(), events.clone()],
            ..SchemaSnapshot::default()
        };
        let names = |t: &TableSchema| -> Vec<String> {
            identifiers(t, &snapshot, "status")
                .into_iter()
                .map(|c| c.column)
                .collect()
        };
        // customers has no status of its own, so orders are grouped only by their key
        assert_eq!(names(&orders), vec!["id"]);
        assert_eq!(names(&events), vec!["id", "order_id"]);
    }

    #[test]
    fn test_sampled_values_order() {
        let sample = TabularResult::new(
            vec!["value".to_string(), "n".to_string()],
            vec![
                vec![json!("shipped"), json!(2)],
                vec![json!("pending"), json!(9)],
                vec![json!(null), json!(4)],
                vec![json!("delivered"), json!(2)],
            ],
        );
        assert_eq!(sampled_values(&sample), strings(&["pending", "delivered", "shipped"]));
    }
}
