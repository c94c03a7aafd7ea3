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

//! Schema and data scan that proposes candidate business processes. Only reads: the
//! connector sees distinct-value counts and an ordered status sample per table.

mod chains;
mod columns;
mod scoring;
mod transitions;

pub use chains::EntityChain;
pub use columns::{ColumnCandidate, ColumnEvidence, ColumnRole};
pub use transitions::TransitionPattern;

use crate::cache::DiscoveryCache;
use crate::config::DiscoveryConfig;
use crate::error::{Result, SieveError};
use lens_contracts::{
    DatabaseConnector, ExecutionError, ProcessLabeler, ProcessSummary, SchemaSnapshot,
    TabularResult,
};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use strata::ProcessCatalogue;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveredProcess {
    pub id: String,
    pub name: String,
    pub process_type: Option<String>,
    /// Status table first, then the tables reached through foreign keys.
    pub tables: Vec<String>,
    pub columns: Vec<ColumnCandidate>,
    pub transitions: Vec<TransitionPattern>,
    pub chain: EntityChain,
    pub status_values: Vec<String>,
    pub score: f64,
    /// True when the name came from the external labeler.
    pub labelled: bool,
}

impl DiscoveredProcess {
    pub fn status_column(&self) -> Option<&ColumnCandidate> {
        self.columns.iter().find(|c| c.role == ColumnRole::Status)
    }

    pub fn summary(&self) -> ProcessSummary {
        ProcessSummary {
            tables: self.tables.clone(),
            status_column: self
                .status_column()
                .map(|c| format!("{}.{}", c.table, c.column)),
            status_values: self.status_values.clone(),
            transitions: self
                .transitions
                .iter()
                .map(|t| (t.from.clone(), t.to.clone()))
                .collect(),
        }
    }

    /// One line suitable for generator context.
    pub fn to_prompt_line(&self) -> String {
        let mut line = format!("{} ({})", self.name, self.tables.join(", "));
        if let Some(status) = self.status_column() {
            line.push_str(&format!(
                ": {}.{} in [{}]",
                status.table,
                status.column,
                self.status_values.join(", ")
            ));
        }
        line
    }
}

/// Cache key for a connection and schema: SHA-256 of the fingerprint and the sorted
/// table names.
pub fn cache_key(fingerprint: &str, snapshot: &SchemaSnapshot) -> String {
    let mut names: Vec<String> = snapshot
        .tables
        .iter()
        .map(|t| t.name.to_lowercase())
        .collect();
    names.sort();
    let mut hasher = Sha256::new();
    hasher.update(fingerprint.as_bytes());
    for name in &names {
        hasher.update(b"\n");
        hasher.update(name.as_bytes());
    }
    hex::encode(hasher.finalize())
}

struct Candidate {
    table: String,
    status: ColumnCandidate,
    timestamp: Option<ColumnCandidate>,
    identifiers: Vec<ColumnCandidate>,
    entity: Option<String>,
    chain: EntityChain,
    transitions: Vec<TransitionPattern>,
}

/// Discovery results keyed by [`cache_key`]; one instance can serve many engines.
pub type ProcessCache = DiscoveryCache<Vec<DiscoveredProcess>>;

pub struct ProcessDiscoveryEngine {
    config: DiscoveryConfig,
    catalogue: ProcessCatalogue,
    labeler: Option<Arc<dyn ProcessLabeler>>,
    cache: Arc<ProcessCache>,
}

impl ProcessDiscoveryEngine {
    pub fn new(
        config: DiscoveryConfig,
        catalogue: ProcessCatalogue,
        cache: Arc<ProcessCache>,
    ) -> Self {
        Self {
            config,
            catalogue,
            labeler: None,
            cache,
        }
    }

    pub fn with_labeler(mut self, labeler: Arc<dyn ProcessLabeler>) -> Self {
        self.labeler = Some(labeler);
        self
    }

    pub fn cache(&self) -> &Arc<ProcessCache> {
        &self.cache
    }

    /// Cached result for this connection and schema, without running discovery.
    pub fn cached(&self, fingerprint: &str, snapshot: &SchemaSnapshot) -> Option<Vec<DiscoveredProcess>> {
        self.cache.get(&cache_key(fingerprint, snapshot))
    }

    pub async fn discover_cached(
        &self,
        connector: &dyn DatabaseConnector,
        snapshot: &SchemaSnapshot,
        cancel: &CancellationToken,
    ) -> Result<Vec<DiscoveredProcess>> {
        let key = cache_key(&connector.fingerprint(), snapshot);
        if let Some(hit) = self.cache.get(&key) {
            debug!(processes = hit.len(), "Using cached discovery");
            return Ok(hit);
        }
        let processes = self.discover(connector, snapshot, cancel).await?;
        self.cache
            .set(key, processes.clone(), self.config.cache_ttl());
        Ok(processes)
    }

    /// Introspects the schema through the connector, then discovers. Introspection
    /// failure is the one error that aborts a run.
    pub async fn discover_live(
        &self,
        connector: &dyn DatabaseConnector,
        cancel: &CancellationToken,
    ) -> Result<Vec<DiscoveredProcess>> {
        let snapshot = connector
            .introspect_schema()
            .await
            .map_err(|e| SieveError::discovery(format!("schema introspection failed: {e}")))?;
        self.discover_cached(connector, &snapshot, cancel).await
    }

    #[instrument(skip(self, connector, snapshot, cancel), fields(tables = snapshot.tables.len(), database = %snapshot.database))]
    pub async fn discover(
        &self,
        connector: &dyn DatabaseConnector,
        snapshot: &SchemaSnapshot,
        cancel: &CancellationToken,
    ) -> Result<Vec<DiscoveredProcess>> {
        let dialect = connector.dialect();

        let tables: Vec<_> = snapshot
            .tables
            .iter()
            .filter(|t| !t.columns.is_empty())
            .collect();
        info!(stage = 1, tables = tables.len(), "Discovery: candidate tables");
        checkpoint(cancel)?;

        let mut candidates = Vec::new();
        for table in &tables {
            checkpoint(cancel)?;
            let mut best: Option<ColumnCandidate> = None;
            for column in columns::status_probes(table, &self.config) {
                let sql = columns::distinct_values_query(dialect, &table.name, &column.name);
                let sample = match self
                    .sample(connector, &sql, self.config.max_status_cardinality + 1, cancel)
                    .await?
                {
                    Ok(result) => Some(columns::sampled_values(&result)),
                    Err(e) => {
                        warn!(table = %table.name, column = %column.name, error = %e, "Distinct-value sample failed");
                        None
                    }
                };
                if let Some(found) = columns::score_status(&table.name, column, sample, &self.config) {
                    if best.as_ref().map_or(true, |b| found.confidence > b.confidence) {
                        best = Some(found);
                    }
                }
            }
            if let Some(status) = best {
                let identifiers = columns::identifiers(table, snapshot, &status.column);
                candidates.push(Candidate {
                    table: table.name.clone(),
                    status,
                    timestamp: None,
                    identifiers,
                    entity: None,
                    chain: EntityChain {
                        tables: vec![table.name.clone()],
                        links: Vec::new(),
                    },
                    transitions: Vec::new(),
                });
            }
        }
        info!(stage = 2, candidates = candidates.len(), "Discovery: status columns");
        if candidates.is_empty() {
            info!("No status-like columns found");
            return Ok(Vec::new());
        }

        for candidate in &mut candidates {
            if let Some(table) = snapshot.table(&candidate.table) {
                candidate.timestamp = columns::best_timestamp(table, &self.config);
            }
        }
        info!(
            stage = 3,
            timed = candidates.iter().filter(|c| c.timestamp.is_some()).count(),
            "Discovery: timestamp columns"
        );
        checkpoint(cancel)?;

        for candidate in &mut candidates {
            candidate.chain =
                chains::longest_chain(snapshot, &candidate.table, self.config.max_chain_depth);
        }
        info!(
            stage = 4,
            linked = candidates.iter().filter(|c| c.chain.hops() > 0).count(),
            "Discovery: entity chains"
        );

        for candidate in &mut candidates {
            checkpoint(cancel)?;
            let Some(timestamp) = &candidate.timestamp else {
                continue;
            };
            if candidate.identifiers.is_empty() {
                continue;
            }
            let ids: Vec<String> = candidate.identifiers.iter().map(|c| c.column.clone()).collect();
            let sql = transitions::sample_query(
                dialect,
                &candidate.table,
                &ids,
                &candidate.status.column,
                &timestamp.column,
            );
            match self.sample(connector, &sql, self.config.sample_rows, cancel).await? {
                Ok(sample) => {
                    if let Some((entity, patterns)) = transitions::best_transitions(
                        &sample,
                        &ids,
                        &candidate.status.column,
                        &timestamp.column,
                    ) {
                        candidate.entity = Some(entity);
                        candidate.transitions = patterns;
                    }
                }
                Err(e) => {
                    warn!(table = %candidate.table, error = %e, "Transition sample failed; table skipped");
                }
            }
        }
        info!(
            stage = 5,
            transitions = candidates.iter().map(|c| c.transitions.len()).sum::<usize>(),
            "Discovery: transition patterns"
        );

        let mut processes: Vec<DiscoveredProcess> = candidates
            .into_iter()
            .filter_map(|c| self.assemble(c))
            .collect();
        scoring::rank(&mut processes);
        info!(stage = 6, scored = processes.len(), "Discovery: scoring");
        checkpoint(cancel)?;

        let mut processes = scoring::dedup(processes, self.config.similarity_threshold);
        self.enrich(&mut processes, cancel).await?;
        scoring::rank(&mut processes);
        info!(stage = 7, processes = processes.len(), "Discovery complete");
        Ok(processes)
    }

    fn assemble(&self, candidate: Candidate) -> Option<DiscoveredProcess> {
        let status_values = candidate.status.values.clone();
        let score = scoring::score(
            &self.config.weights,
            candidate.status.confidence,
            candidate.chain.hops(),
            self.config.max_chain_depth,
            candidate.transitions.len(),
            status_values.len(),
        );
        if score < self.config.min_score {
            debug!(table = %candidate.table, score, "Candidate below minimum score");
            return None;
        }
        let mut columns = vec![candidate.status];
        columns.extend(candidate.timestamp);
        columns.extend(
            candidate
                .identifiers
                .into_iter()
                .filter(|c| candidate.entity.as_deref() == Some(c.column.as_str())),
        );
        let name = scoring::fallback_name(&candidate.table);
        let process_type = self
            .catalogue
            .match_statuses(status_values.as_slice())
            .map(|(t, _)| t.name.clone());
        Some(DiscoveredProcess {
            id: scoring::process_id(&name, &candidate.chain.tables),
            name,
            process_type,
            tables: candidate.chain.tables.clone(),
            columns,
            transitions: candidate.transitions,
            chain: candidate.chain,
            status_values,
            score,
            labelled: false,
        })
    }

    async fn enrich(
        &self,
        processes: &mut [DiscoveredProcess],
        cancel: &CancellationToken,
    ) -> Result<()> {
        let Some(labeler) = &self.labeler else {
            return Ok(());
        };
        for process in processes.iter_mut().take(self.config.enrich_top_k) {
            checkpoint(cancel)?;
            let summary = process.summary();
            let labelled = tokio::select! {
                _ = cancel.cancelled() => return Err(cancelled()),
                r = tokio::time::timeout(self.config.query_timeout(), labeler.label(&summary)) => r,
            };
            match labelled {
                Ok(Ok(Some(label))) => {
                    process.name = label.name;
                    if label.process_type.is_some() {
                        process.process_type = label.process_type;
                    }
                    process.id = scoring::process_id(&process.name, &process.tables);
                    process.labelled = true;
                }
                Ok(Ok(None)) => {}
                Ok(Err(e)) => warn!(process = %process.name, error = %e, "Labeler failed; keeping fallback name"),
                Err(_) => warn!(process = %process.name, "Labeler timed out; keeping fallback name"),
            }
        }
        Ok(())
    }

    /// Runs a sampling query. The outer error is cancellation; the inner one is a
    /// per-table failure the caller logs and skips.
    async fn sample(
        &self,
        connector: &dyn DatabaseConnector,
        sql: &str,
        row_limit: usize,
        cancel: &CancellationToken,
    ) -> Result<std::result::Result<TabularResult, ExecutionError>> {
        debug!(query = %sql, "Discovery sample");
        tokio::select! {
            _ = cancel.cancelled() => Err(cancelled()),
            r = connector.execute(sql, self.config.query_timeout(), row_limit) => Ok(r),
        }
    }
}

fn cancelled() -> SieveError {
    SieveError::discovery("cancelled")
}

fn checkpoint(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        info!("Discovery cancelled");
        return Err(cancelled());
    }
    Ok(())
}
