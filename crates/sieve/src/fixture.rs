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

//! In-memory connector over a JSON fixture. Answers the two query shapes discovery
//! issues: a grouped distinct-value count and a projected, ordered table scan.

use crate::error::{Result, SieveError};
use async_trait::async_trait;
use indexmap::IndexMap;
use lens_contracts::{
    ConnectorError, DatabaseConnector, ExecutionError, SchemaSnapshot, SqlDialect, TabularResult,
};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::time::Duration;
use tracing::debug;

static GROUPED_COUNT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?is)^\s*SELECT\s+(\S+)\s+AS\s+value\s*,\s*COUNT\(\*\)\s+AS\s+n\s+FROM\s+(.+?)\s+GROUP\s+BY\s+\S+\s*$",
    )
    .expect("grouped-count pattern is valid")
});

static PROJECTION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)^\s*SELECT\s+(.+?)\s+FROM\s+(.+?)(?:\s+ORDER\s+BY\s+(.+?))?\s*$")
        .expect("projection pattern is valid")
});

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Fixture {
    #[serde(default)]
    pub fingerprint: Option<String>,
    #[serde(default)]
    pub dialect: SqlDialect,
    pub schema: SchemaSnapshot,
    /// Rows per table, each row an object keyed by column name.
    #[serde(default)]
    pub data: IndexMap<String, Vec<Map<String, Value>>>,
}

pub struct FixtureConnector {
    fixture: Fixture,
    connected: AtomicBool,
}

impl FixtureConnector {
    pub fn new(fixture: Fixture) -> Self {
        Self {
            fixture,
            connected: AtomicBool::new(false),
        }
    }

    pub fn from_json_str(content: &str) -> Result<Self> {
        Ok(Self::new(serde_json::from_str(content)?))
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            SieveError::config(format!("Failed to read fixture '{}': {e}", path.display()))
        })?;
        Self::from_json_str(&content)
    }

    pub fn fixture(&self) -> &Fixture {
        &self.fixture
    }

    fn rows(&self, table: &str) -> std::result::Result<&[Map<String, Value>], ExecutionError> {
        let wanted = unquote(table);
        self.fixture
            .data
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(&wanted))
            .map(|(_, rows)| rows.as_slice())
            .ok_or_else(|| ExecutionError::database(format!("no such table: {wanted}")))
    }

    fn answer(&self, query: &str, row_limit: usize) -> std::result::Result<TabularResult, ExecutionError> {
        let query = query.trim().trim_end_matches(';');
        if let Some(caps) = GROUPED_COUNT.captures(query) {
            let column = unquote(&caps[1]);
            let rows = self.rows(&caps[2])?;
            let mut counts: IndexMap<String, (Value, u64)> = IndexMap::new();
            for row in rows {
                let value = field(row, &column);
                counts.entry(value.to_string()).or_insert((value, 0)).1 += 1;
            }
            let rows = counts
                .into_values()
                .take(row_limit)
                .map(|(value, n)| vec![value, Value::from(n)])
                .collect();
            return Ok(TabularResult::new(
                vec!["value".to_string(), "n".to_string()],
                rows,
            ));
        }
        if let Some(caps) = PROJECTION.captures(query) {
            let columns: Vec<String> = caps[1].split(',').map(unquote).collect();
            let mut rows: Vec<&Map<String, Value>> = self.rows(&caps[2])?.iter().collect();
            if let Some(order) = caps.get(3) {
                let keys: Vec<String> = order.as_str().split(',').map(unquote).collect();
                rows.sort_by(|a, b| {
                    keys.iter()
                        .map(|k| compare_values(&field(a, k), &field(b, k)))
                        .find(|o| *o != Ordering::Equal)
                        .unwrap_or(Ordering::Equal)
                });
            }
            let out = rows
                .into_iter()
                .take(row_limit)
                .map(|row| columns.iter().map(|c| field(row, c)).collect())
                .collect();
            return Ok(TabularResult::new(columns, out));
        }
        Err(ExecutionError::database(format!(
            "fixture connector cannot answer: {query}"
        )))
    }
}

fn unquote(identifier: &str) -> String {
    let t = identifier.trim();
    let inner = match (t.chars().next(), t.chars().last()) {
        (Some('"'), Some('"')) | (Some('`'), Some('`')) | (Some('['), Some(']')) if t.len() >= 2 => {
            &t[1..t.len() - 1]
        }
        _ => t,
    };
    inner.to_string()
}

fn field(row: &Map<String, Value>, column: &str) -> Value {
    row.iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(column))
        .map(|(_, v)| v.clone())
        .unwrap_or(Value::Null)
}

fn compare_values(a: &Value, b: &Value) -> Ordering {
    fn rank(v: &Value) -> u8 {
        match v {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Number(_) => 2,
            Value::String(_) => 3,
            _ => 4,
        }
    }
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x
            .as_f64()
            .unwrap_or(0.0)
            .total_cmp(&y.as_f64().unwrap_or(0.0)),
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        _ => rank(a).cmp(&rank(b)),
    }
}

#[async_trait]
impl DatabaseConnector for FixtureConnector {
    fn dialect(&self) -> SqlDialect {
        self.fixture.dialect
    }

    fn fingerprint(&self) -> String {
        self.fixture
            .fingerprint
            .clone()
            .unwrap_or_else(|| format!("fixture:{}", self.fixture.schema.database))
    }

    async fn connect(&self) -> std::result::Result<(), ConnectorError> {
        self.connected.store(true, AtomicOrdering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> std::result::Result<(), ConnectorError> {
        self.connected.store(false, AtomicOrdering::SeqCst);
        Ok(())
    }

    async fn test_connection(&self) -> std::result::Result<bool, ConnectorError> {
        Ok(self.connected.load(AtomicOrdering::SeqCst))
    }

    async fn execute(
        &self,
        query: &str,
        _timeout: Duration,
        row_limit: usize,
    ) -> std::result::Result<TabularResult, ExecutionError> {
        if !self.connected.load(AtomicOrdering::SeqCst) {
            return Err(ExecutionError::database("not connected"));
        }
        debug!(query = %query, row_limit, "Fixture query");
        self.answer(query, row_limit)
    }

    async fn introspect_schema(&self) -> std::result::Result<SchemaSnapshot, ConnectorError> {
        if !self.connected.load(AtomicOrdering::SeqCst) {
            return Err(ConnectorError::NotConnected);
        }
        Ok(self.fixture.schema.clone())
    }

    async fn server_version(&self) -> std::result::Result<String, ConnectorError> {
        Ok(format!("fixture {}", env!("CARGO_PKG_VERSION")))
    }
}
