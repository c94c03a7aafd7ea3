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

use crate::cache::DiscoveryCache;
use crate::config::LensConfig;
use crate::correction::{CorrectionOutcome, SelfCorrectionLoop};
use crate::describe::describe;
use crate::discovery::{DiscoveredProcess, ProcessCache, ProcessDiscoveryEngine};
use crate::error::Result;
use crate::validator::SqlValidator;
use lens_contracts::{
    ConnectorExecutor, DatabaseConnector, ProcessLabeler, QueryGenerator, SchemaSnapshot,
    TabularResult,
};
use serde::Serialize;
use std::sync::Arc;
use strata::{ProcessCatalogue, ProcessDetection, ProcessFlowConfig, ProcessVisualiser};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Everything one question produced. Nothing here is shared with any other answer.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineAnswer {
    pub run_id: Uuid,
    pub question: String,
    pub correction: CorrectionOutcome,
    pub detection: Option<ProcessDetection>,
    pub flow: Option<ProcessFlowConfig>,
    pub description: Option<String>,
}

impl PipelineAnswer {
    pub fn succeeded(&self) -> bool {
        self.correction.succeeded()
    }

    /// The executed query and its rows, or the error that ended the correction loop.
    pub fn into_rows(self) -> Result<(String, TabularResult)> {
        self.correction.into_result()
    }
}

pub struct PipelineOrchestrator {
    correction: SelfCorrectionLoop,
    visualiser: ProcessVisualiser,
    discovery: ProcessDiscoveryEngine,
    connector: Arc<dyn DatabaseConnector>,
    catalogue: ProcessCatalogue,
}

impl PipelineOrchestrator {
    /// Wires the loop, the visualiser and discovery around one connection. The
    /// connector doubles as the query executor. Discoveries go to a cache private to
    /// this orchestrator; use [`PipelineOrchestrator::with_cache`] to share one.
    pub fn new(
        config: &LensConfig,
        generator: Arc<dyn QueryGenerator>,
        connector: Arc<dyn DatabaseConnector>,
    ) -> Result<Self> {
        Self::with_cache(config, generator, connector, Arc::new(DiscoveryCache::new()))
    }

    pub fn with_cache(
        config: &LensConfig,
        generator: Arc<dyn QueryGenerator>,
        connector: Arc<dyn DatabaseConnector>,
        cache: Arc<ProcessCache>,
    ) -> Result<Self> {
        config.validate()?;
        let catalogue = config.catalogue();
        let validator = Arc::new(SqlValidator::new(&config.validator)?);
        let executor = Arc::new(ConnectorExecutor::new(connector.clone()));
        let correction =
            SelfCorrectionLoop::new(generator, executor, validator, config.correction.clone());
        let visualiser = ProcessVisualiser::new(
            &config.styles,
            catalogue.clone(),
            config.layout,
            config.detection.clone(),
        )?;
        let discovery = ProcessDiscoveryEngine::new(
            config.discovery.clone(),
            catalogue.clone(),
            cache,
        );
        Ok(Self {
            correction,
            visualiser,
            discovery,
            connector,
            catalogue,
        })
    }

    pub fn with_labeler(mut self, labeler: Arc<dyn ProcessLabeler>) -> Self {
        self.discovery = self.discovery.with_labeler(labeler);
        self
    }

    pub fn discovery(&self) -> &ProcessDiscoveryEngine {
        &self.discovery
    }

    fn schema_context(&self, snapshot: &SchemaSnapshot) -> String {
        let mut context = snapshot.to_prompt_context();
        let known = self
            .discovery
            .cached(&self.connector.fingerprint(), snapshot)
            .unwrap_or_default();
        if !known.is_empty() {
            context.push_str("\n\nKnown processes:\n");
            for process in &known {
                context.push_str("- ");
                context.push_str(&process.to_prompt_line());
                context.push('\n');
            }
        }
        context
    }

    #[instrument(skip(self, snapshot), fields(run_id = tracing::field::Empty, tables = snapshot.tables.len()))]
    pub async fn answer(&self, question: &str, snapshot: &SchemaSnapshot) -> Result<PipelineAnswer> {
        let run_id = Uuid::new_v4();
        tracing::Span::current().record("run_id", tracing::field::display(run_id));

        let context = self.schema_context(snapshot);
        debug!(context_len = context.len(), "Schema context built");
        let correction = self.correction.run(question, &context).await;

        let (detection, flow) = match (&correction.result, &correction.final_query) {
            (Some(result), Some(query)) if correction.succeeded() => {
                match self.visualiser.visualise(question, result, query) {
                    Ok(visualisation) => (Some(visualisation.detection), visualisation.flow),
                    Err(e) => {
                        warn!(error = %e, "Visualisation failed; returning rows without a graph");
                        (None, None)
                    }
                }
            }
            _ => (None, None),
        };
        let description = flow.as_ref().map(|f| describe(f, &self.catalogue));

        info!(
            state = ?correction.state,
            attempts = correction.attempts.len(),
            graph = flow.is_some(),
            "Question answered"
        );
        Ok(PipelineAnswer {
            run_id,
            question: question.to_string(),
            correction,
            detection,
            flow,
            description,
        })
    }

    /// Cached processes for this connection and schema, discovering them on a miss.
    pub async fn discovered_processes(
        &self,
        snapshot: &SchemaSnapshot,
        cancel: &CancellationToken,
    ) -> Result<Vec<DiscoveredProcess>> {
        self.discovery
            .discover_cached(self.connector.as_ref(), snapshot, cancel)
            .await
    }
}
