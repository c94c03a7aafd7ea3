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

use crate::catalogue::ProcessCatalogue;
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use lens_contracts::{value_as_f64, value_as_text, TabularResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

const TIMESTAMP_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%m/%d/%Y %H:%M:%S",
];

/// Parses the timestamp spellings databases commonly hand back as JSON.
pub fn parse_timestamp(value: &Value) -> Option<NaiveDateTime> {
    match value {
        Value::String(s) => {
            let s = s.trim();
            if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                return Some(dt.naive_utc());
            }
            for format in TIMESTAMP_FORMATS {
                if let Ok(dt) = NaiveDateTime::parse_from_str(s, format) {
                    return Some(dt);
                }
            }
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        }
        Value::Number(n) => n
            .as_i64()
            .and_then(|secs| DateTime::from_timestamp(secs, 0))
            .map(|dt| dt.naive_utc()),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ColumnHints {
    pub status: Vec<String>,
    pub count: Vec<String>,
    pub timestamp: Vec<String>,
    pub duration: Vec<String>,
    pub from_prefixes: Vec<String>,
    pub to_prefixes: Vec<String>,
}

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

impl Default for ColumnHints {
    fn default() -> Self {
        Self {
            status: strings(&["status", "state", "stage", "phase", "step"]),
            count: strings(&[
                "count", "cnt", "total", "num", "n", "frequency", "volume", "qty", "value_count",
            ]),
            timestamp: strings(&[
                "_at", "_on", "date", "time", "timestamp", "created", "updated",
            ]),
            duration: strings(&["duration", "elapsed", "seconds", "secs"]),
            from_prefixes: strings(&["from", "source", "src", "previous", "prev", "old"]),
            to_prefixes: strings(&["to", "target", "tgt", "next", "new"]),
        }
    }
}

fn name_parts(name: &str) -> Vec<String> {
    name.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect()
}

/// Which column plays which part in a process-shaped result.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnRoles {
    pub status: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
    pub count: Option<String>,
    pub timestamp: Option<String>,
    pub entity: Option<String>,
    pub duration: Option<String>,
}

impl ColumnRoles {
    pub fn infer(result: &TabularResult, hints: &ColumnHints) -> Self {
        let mut roles = ColumnRoles::default();
        let columns: Vec<(usize, String, Vec<String>)> = result
            .columns
            .iter()
            .enumerate()
            .map(|(i, c)| (i, c.clone(), name_parts(c)))
            .collect();

        let prefixed = |parts: &[String], prefixes: &[String]| {
            parts.first().is_some_and(|p| prefixes.iter().any(|x| x == p))
        };
        roles.from = columns
            .iter()
            .find(|(_, _, parts)| prefixed(parts, &hints.from_prefixes))
            .map(|(_, name, _)| name.clone());
        roles.to = columns
            .iter()
            .find(|(_, _, parts)| prefixed(parts, &hints.to_prefixes))
            .map(|(_, name, _)| name.clone());
        if roles.from.is_none() || roles.to.is_none() {
            roles.from = None;
            roles.to = None;
        }

        let is_pair_column = |name: &str| {
            roles.from.as_deref() == Some(name) || roles.to.as_deref() == Some(name)
        };

        roles.status = columns
            .iter()
            .filter(|(_, name, _)| !is_pair_column(name))
            .find(|(i, _, parts)| {
                parts.iter().any(|p| hints.status.contains(p)) && !column_is_numeric(result, *i)
            })
            .map(|(_, name, _)| name.clone());

        roles.entity = columns
            .iter()
            .filter(|(_, name, _)| !is_pair_column(name))
            .find(|(_, name, parts)| {
                let lower = name.to_lowercase();
                lower == "id" || (lower.ends_with("_id") && parts.len() > 1)
            })
            .map(|(_, name, _)| name.clone());

        roles.timestamp = columns
            .iter()
            .find(|(i, name, _)| {
                let lower = name.to_lowercase();
                let hinted = hints.timestamp.iter().any(|h| {
                    if h.starts_with('_') {
                        lower.ends_with(h.as_str())
                    } else {
                        lower.contains(h.as_str())
                    }
                });
                hinted && column_parses_as_timestamp(result, *i)
            })
            .map(|(_, name, _)| name.clone());

        let claimed = |name: &str| {
            is_pair_column(name)
                || roles.status.as_deref() == Some(name)
                || roles.entity.as_deref() == Some(name)
                || roles.timestamp.as_deref() == Some(name)
        };

        roles.duration = columns
            .iter()
            .filter(|(_, name, _)| !claimed(name))
            .find(|(i, _, parts)| {
                parts.iter().any(|p| hints.duration.contains(p)) && column_is_numeric(result, *i)
            })
            .map(|(_, name, _)| name.clone());

        roles.count = columns
            .iter()
            .filter(|(_, name, _)| {
                !claimed(name) && roles.duration.as_deref() != Some(name.as_str())
            })
            .find(|(i, name, parts)| {
                let lower = name.to_lowercase();
                (hints.count.contains(&lower) || parts.iter().any(|p| hints.count.contains(p)))
                    && column_is_numeric(result, *i)
            })
            .map(|(_, name, _)| name.clone());

        roles
    }

    fn index(result: &TabularResult, name: &Option<String>) -> Option<usize> {
        name.as_deref().and_then(|n| result.column_index(n))
    }

    pub fn status_index(&self, result: &TabularResult) -> Option<usize> {
        Self::index(result, &self.status)
    }

    pub fn from_index(&self, result: &TabularResult) -> Option<usize> {
        Self::index(result, &self.from)
    }

    pub fn to_index(&self, result: &TabularResult) -> Option<usize> {
        Self::index(result, &self.to)
    }

    pub fn count_index(&self, result: &TabularResult) -> Option<usize> {
        Self::index(result, &self.count)
    }

    pub fn timestamp_index(&self, result: &TabularResult) -> Option<usize> {
        Self::index(result, &self.timestamp)
    }

    pub fn entity_index(&self, result: &TabularResult) -> Option<usize> {
        Self::index(result, &self.entity)
    }

    pub fn duration_index(&self, result: &TabularResult) -> Option<usize> {
        Self::index(result, &self.duration)
    }

    pub fn shape(&self) -> ResultShape {
        if self.from.is_some() && self.to.is_some() {
            ResultShape::Transitions
        } else if self.entity.is_some() && self.status.is_some() && self.timestamp.is_some() {
            ResultShape::EntityTimeline
        } else if self.status.is_some() {
            ResultShape::StatusCounts
        } else {
            ResultShape::None
        }
    }
}

fn column_is_numeric(result: &TabularResult, index: usize) -> bool {
    let mut seen = false;
    for value in result.column_values(index) {
        match value {
            Value::Null => continue,
            Value::Number(_) => seen = true,
            Value::String(_) if value_as_f64(value).is_some() => seen = true,
            _ => return false,
        }
    }
    seen
}

fn column_parses_as_timestamp(result: &TabularResult, index: usize) -> bool {
    let mut values = result.column_values(index).filter(|v| !v.is_null()).peekable();
    if values.peek().is_none() {
        // header-only results still count on the name alone
        return true;
    }
    values.all(|v| parse_timestamp(v).is_some())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultShape {
    Transitions,
    EntityTimeline,
    StatusCounts,
    None,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessDetection {
    pub is_process: bool,
    pub confidence: f64,
    pub process_type: Option<String>,
    pub shape: ResultShape,
    pub columns: ColumnRoles,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    pub question_keywords: Vec<String>,
    pub columns: ColumnHints,
    pub threshold: f64,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            question_keywords: strings(&[
                "process", "workflow", "pipeline", "funnel", "lifecycle", "journey", "stage",
                "stages", "status", "transition", "transitions", "flow", "bottleneck",
            ]),
            columns: ColumnHints::default(),
            threshold: 0.5,
        }
    }
}

pub struct ProcessDetector {
    config: DetectorConfig,
    catalogue: ProcessCatalogue,
}

impl ProcessDetector {
    pub fn new(config: DetectorConfig, catalogue: ProcessCatalogue) -> Self {
        Self { config, catalogue }
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    pub fn detect(&self, question: &str, result: &TabularResult) -> ProcessDetection {
        let columns = ColumnRoles::infer(result, &self.config.columns);
        let shape = columns.shape();
        let mut confidence = 0.0;

        let lowered = question.to_lowercase();
        let question_hit = lowered
            .split(|c: char| !c.is_alphanumeric())
            .any(|w| self.config.question_keywords.iter().any(|k| k == w));
        if question_hit {
            confidence += 0.3;
        }

        confidence += match shape {
            ResultShape::Transitions | ResultShape::EntityTimeline => 0.6,
            ResultShape::StatusCounts => 0.4,
            ResultShape::None => 0.0,
        };

        let stage_values = observed_stages(result, &columns);
        let by_values = self
            .catalogue
            .match_statuses(&stage_values)
            .map(|(t, _)| t.name.clone());
        if by_values.is_some() {
            confidence += 0.2;
        }
        let by_question = self.catalogue.match_question(question).map(|t| t.name.clone());
        if by_question.is_some() {
            confidence += 0.1;
        }
        let confidence: f64 = f64::min(confidence, 1.0);

        let is_process = shape != ResultShape::None
            && !result.is_empty()
            && confidence >= self.config.threshold;
        let process_type = by_values.or(by_question);
        debug!(
            ?shape,
            confidence,
            is_process,
            process_type = process_type.as_deref().unwrap_or("-"),
            "Process detection finished"
        );
        ProcessDetection {
            is_process,
            confidence,
            process_type,
            shape,
            columns,
        }
    }
}

impl Default for ProcessDetector {
    fn default() -> Self {
        Self::new(DetectorConfig::default(), ProcessCatalogue::default())
    }
}

/// Distinct stage labels a result mentions, in first-appearance order.
pub fn observed_stages(result: &TabularResult, columns: &ColumnRoles) -> Vec<String> {
    let mut stages: Vec<String> = Vec::new();
    let indices = match columns.shape() {
        ResultShape::Transitions => vec![columns.from_index(result), columns.to_index(result)],
        _ => vec![columns.status_index(result)],
    };
    for row in &result.rows {
        for index in indices.iter().flatten() {
            if let Some(text) = row.get(*index).and_then(value_as_text) {
                let text = text.trim().to_string();
                if !text.is_empty() && !stages.contains(&text) {
                    stages.push(text);
                }
            }
        }
    }
    stages
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn result(columns: &[&str], rows: Vec<Vec<Value>>) -> TabularResult {
        TabularResult::new(columns.iter().map(|c| c.to_string()).collect(), rows)
    }

    #[test]
    fn test_infers_entity_timeline_columns() {
        let r = result(
            &["order_id", "status", "updated_at"],
            vec![
                vec![json!(1), json!("pending"), json!("2024-01-01 10:00:00")],
                vec![json!(1), json!("shipped"), json!("2024-01-02T10:00:00Z")],
            ],
        );
        let roles = ColumnRoles::infer(&r, &ColumnHints::default());
        assert_eq!(roles.entity.as_deref(), Some("order_id"));
        assert_eq!(roles.status.as_deref(), Some("status"));
        assert_eq!(roles.timestamp.as_deref(), Some("updated_at"));
        assert_eq!(roles.shape(), ResultShape::EntityTimeline);
    }

    #[test]
    fn test_infers_transition_pair() {
        let r = result(
            &["from_status", "to_status", "transition_count"],
            vec![vec![json!("open"), json!("closed"), json!(4)]],
        );
        let roles = ColumnRoles::infer(&r, &ColumnHints::default());
        assert_eq!(roles.from.as_deref(), Some("from_status"));
        assert_eq!(roles.to.as_deref(), Some("to_status"));
        assert_eq!(roles.count.as_deref(), Some("transition_count"));
        assert!(roles.status.is_none());
        assert_eq!(roles.shape(), ResultShape::Transitions);
    }

    #[test]
    fn test_numeric_status_column_is_not_a_status() {
        let r = result(&["status", "total"], vec![vec![json!(200), json!(3)]]);
        let roles = ColumnRoles::infer(&r, &ColumnHints::default());
        assert!(roles.status.is_none());
        assert_eq!(roles.shape(), ResultShape::None);
    }

    #[test]
    fn test_detects_order_status_counts() {
        let detector = ProcessDetector::default();
        let r = result(
            &["status", "order_count"],
            vec![
                vec![json!("pending"), json!(12)],
                vec![json!("shipped"), json!(30)],
                vec![json!("delivered"), json!(50)],
            ],
        );
        let detection = detector.detect("How many orders are in each status?", &r);
        assert!(detection.is_process);
        assert_eq!(detection.shape, ResultShape::StatusCounts);
        assert_eq!(detection.process_type.as_deref(), Some("order_fulfillment"));
        assert!(detection.confidence <= 1.0);
    }

    #[test]
    fn test_plain_aggregate_is_not_a_process() {
        let detector = ProcessDetector::default();
        let r = result(
            &["department", "avg_salary"],
            vec![vec![json!("sales"), json!(51000.0)]],
        );
        let detection = detector.detect("average salary by department", &r);
        assert!(!detection.is_process);
        assert_eq!(detection.shape, ResultShape::None);
        assert_eq!(detection.confidence, 0.0);
    }

    #[test]
    fn test_empty_result_is_never_a_process() {
        let detector = ProcessDetector::default();
        let r = result(&["from_state", "to_state"], vec![]);
        assert!(!detector.detect("show the workflow", &r).is_process);
    }

    #[test]
    fn test_parse_timestamp_variants() {
        assert!(parse_timestamp(&json!("2024-03-01")).is_some());
        assert!(parse_timestamp(&json!("2024-03-01T08:30:00+02:00")).is_some());
        assert!(parse_timestamp(&json!(1_700_000_000)).is_some());
        assert!(parse_timestamp(&json!("yesterday")).is_none());
    }
}
