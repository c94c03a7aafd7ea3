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

use crate::results::TabularResult;
use crate::schema::SchemaSnapshot;
use crate::types::{ConnectorError, ExecutionError, GeneratorError, SqlDialect};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub question: String,
    pub schema_context: String,
    pub prior_error: Option<String>,
    pub attempt: u32,
    pub dialect: SqlDialect,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "text", rename_all = "snake_case")]
pub enum GenerationOutcome {
    Query(String),
    /// The generator declined to answer, e.g. the question is out of scope.
    Refusal(String),
}

/// Natural-language to query generator. Implementations wrap an LLM or retrieval service.
#[async_trait]
pub trait QueryGenerator: Send + Sync {
    async fn generate(
        &self,
        request: &GenerationRequest,
    ) -> Result<GenerationOutcome, GeneratorError>;
}

/// Runs a validated query. Timeouts and row limits are enforced here, not by the caller.
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    async fn execute(
        &self,
        query: &str,
        timeout: Duration,
        row_limit: usize,
    ) -> Result<TabularResult, ExecutionError>;
}

#[async_trait]
pub trait DatabaseConnector: Send + Sync {
    fn dialect(&self) -> SqlDialect;

    /// Stable identity of the target database, used to key cached discovery results.
    fn fingerprint(&self) -> String;

    async fn connect(&self) -> Result<(), ConnectorError>;

    async fn disconnect(&self) -> Result<(), ConnectorError>;

    async fn test_connection(&self) -> Result<bool, ConnectorError>;

    async fn execute(
        &self,
        query: &str,
        timeout: Duration,
        row_limit: usize,
    ) -> Result<TabularResult, ExecutionError>;

    async fn introspect_schema(&self) -> Result<SchemaSnapshot, ConnectorError>;

    async fn server_version(&self) -> Result<String, ConnectorError>;
}

/// Lets any connector stand in as the pipeline's executor.
#[derive(Clone)]
pub struct ConnectorExecutor {
    connector: Arc<dyn DatabaseConnector>,
}

impl ConnectorExecutor {
    pub fn new(connector: Arc<dyn DatabaseConnector>) -> Self {
        Self { connector }
    }
}

#[async_trait]
impl QueryExecutor for ConnectorExecutor {
    async fn execute(
        &self,
        query: &str,
        timeout: Duration,
        row_limit: usize,
    ) -> Result<TabularResult, ExecutionError> {
        self.connector.execute(query, timeout, row_limit).await
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcessSummary {
    pub tables: Vec<String>,
    pub status_column: Option<String>,
    pub status_values: Vec<String>,
    pub transitions: Vec<(String, String)>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessLabel {
    pub name: String,
    pub process_type: Option<String>,
}

/// Optional naming service for discovered processes.
#[async_trait]
pub trait ProcessLabeler: Send + Sync {
    async fn label(&self, summary: &ProcessSummary) -> Result<Option<ProcessLabel>, GeneratorError>;
}
