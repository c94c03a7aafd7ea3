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

use crate::error::{Result, SieveError};
use lens_contracts::SqlDialect;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use strata::{DetectorConfig, LayoutConfig, ProcessCatalogue, ProcessTypeDef, StyleConfig};
use tracing::{info, warn};

pub const CONFIG_ENV_VAR: &str = "PROCESS_LENS_CONFIG";

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CorrectionConfig {
    pub max_attempts: u32,
    pub query_timeout_seconds: u64,
    pub row_limit: usize,
    /// Wall-clock bound over every generator and executor call of one question.
    pub total_budget_seconds: u64,
}

impl Default for CorrectionConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            query_timeout_seconds: 30,
            row_limit: 1000,
            total_budget_seconds: 300,
        }
    }
}

impl CorrectionConfig {
    pub fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.query_timeout_seconds)
    }

    pub fn total_budget(&self) -> Duration {
        Duration::from_secs(self.total_budget_seconds)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockedPattern {
    pub id: String,
    pub pattern: String,
}

fn pattern(id: &str, pattern: &str) -> BlockedPattern {
    BlockedPattern {
        id: id.to_string(),
        pattern: pattern.to_string(),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidatorConfig {
    pub blocked_keywords: Vec<String>,
    /// Evaluated in order against the literal-stripped, whitespace-collapsed query.
    pub blocked_patterns: Vec<BlockedPattern>,
    pub source_dialect: SqlDialect,
    pub target_dialect: SqlDialect,
    pub max_query_length: usize,
    pub log_truncate_length: usize,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            blocked_keywords: strings(&[
                "INSERT", "UPDATE", "DELETE", "DROP", "ALTER", "CREATE", "TRUNCATE", "GRANT",
                "REVOKE", "MERGE", "EXEC", "EXECUTE", "CALL", "COPY", "ATTACH",
                "DETACH", "VACUUM", "PRAGMA", "SHUTDOWN", "RENAME", "LOCK", "UPSERT",
            ]),
            blocked_patterns: vec![
                // REPLACE is also a string function, so only the statement form is blocked
                pattern("replace_statement", r"(?i)^replace\b|\breplace\s+into\b"),
                pattern("stacked_statement", r";\s*\S"),
                pattern("line_comment", r"--"),
                pattern("block_comment", r"/\*"),
                pattern("hash_comment", r"(?:^|\s)#(?:[^>\-]|$)"),
                pattern("into_outfile", r"(?i)\binto\s+(outfile|dumpfile)\b"),
                pattern(
                    "sleep_call",
                    r"(?i)\b(sleep|pg_sleep|benchmark)\s*\(|\bwaitfor\s+delay\b",
                ),
                pattern("xp_cmdshell", r"(?i)\bxp_cmdshell\b"),
                pattern("load_file", r"(?i)\bload_file\s*\("),
                pattern("select_into", r"(?i)\bselect\b.*?\binto\s+[^\s(]"),
                pattern(
                    "system_catalog",
                    r"(?i)\b(information_schema|pg_catalog)\b|\b(sys|mysql)\s*\.",
                ),
            ],
            source_dialect: SqlDialect::Generic,
            target_dialect: SqlDialect::Generic,
            max_query_length: 10_000,
            log_truncate_length: 160,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringWeights {
    pub column: f64,
    pub chain: f64,
    pub transitions: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            column: 0.5,
            chain: 0.2,
            transitions: 0.3,
        }
    }
}

impl ScoringWeights {
    pub fn total(&self) -> f64 {
        self.column + self.chain + self.transitions
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    pub cache_ttl_seconds: u64,
    pub status_keywords: Vec<String>,
    pub status_name_hints: Vec<String>,
    pub timestamp_name_hints: Vec<String>,
    pub max_status_cardinality: usize,
    pub max_chain_depth: usize,
    pub sample_rows: usize,
    pub weights: ScoringWeights,
    pub similarity_threshold: f64,
    pub min_score: f64,
    pub enrich_top_k: usize,
    pub query_timeout_seconds: u64,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            cache_ttl_seconds: 600,
            status_keywords: strings(&[
                "new", "open", "pending", "draft", "submitted", "created", "queued", "waiting",
                "confirmed", "assigned", "active", "processing", "in_progress", "review",
                "under_review", "approved", "rejected", "shipped", "delivered", "completed",
                "complete", "done", "closed", "resolved", "cancelled", "canceled", "failed",
                "paid", "refunded", "on_hold", "scheduled", "started", "finished", "archived",
                "hired", "offer", "interview", "screening", "applied", "won", "lost",
                "qualified", "proposal", "negotiation", "initiated", "authorized", "captured",
                "settled", "expired", "returned",
            ]),
            status_name_hints: strings(&["status", "state", "stage", "phase", "step"]),
            timestamp_name_hints: strings(&[
                "_at", "_on", "date", "time", "timestamp", "created", "updated",
            ]),
            max_status_cardinality: 25,
            max_chain_depth: 3,
            sample_rows: 2000,
            weights: ScoringWeights::default(),
            similarity_threshold: 0.8,
            min_score: 0.25,
            enrich_top_k: 3,
            query_timeout_seconds: 30,
        }
    }
}

impl DiscoveryConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_seconds)
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.query_timeout_seconds)
    }
}

fn default_process_types() -> Vec<ProcessTypeDef> {
    ProcessCatalogue::default().types
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LensConfig {
    #[serde(default)]
    pub correction: CorrectionConfig,
    #[serde(default)]
    pub validator: ValidatorConfig,
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    #[serde(default)]
    pub detection: DetectorConfig,
    #[serde(default)]
    pub styles: StyleConfig,
    #[serde(default = "default_process_types")]
    pub process_types: Vec<ProcessTypeDef>,
    #[serde(default)]
    pub layout: LayoutConfig,
}

impl Default for LensConfig {
    fn default() -> Self {
        Self {
            correction: CorrectionConfig::default(),
            validator: ValidatorConfig::default(),
            discovery: DiscoveryConfig::default(),
            detection: DetectorConfig::default(),
            styles: StyleConfig::default(),
            process_types: default_process_types(),
            layout: LayoutConfig::default(),
        }
    }
}

impl LensConfig {
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let config: LensConfig = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            SieveError::config(format!("Failed to read config '{}': {e}", path.display()))
        })?;
        Self::from_yaml_str(&content)
    }

    /// Reads the file named by `PROCESS_LENS_CONFIG`, falling back to built-in defaults.
    pub fn load() -> Result<Self> {
        let Ok(path) = std::env::var(CONFIG_ENV_VAR) else {
            info!("{CONFIG_ENV_VAR} not set; using built-in configuration");
            return Ok(Self::default());
        };
        if !Path::new(&path).exists() {
            warn!(path = %path, "Configuration file not found; using built-in configuration");
            return Ok(Self::default());
        }
        info!(path = %path, "Loading configuration");
        Self::from_yaml_file(&path)
    }

    pub fn catalogue(&self) -> ProcessCatalogue {
        ProcessCatalogue {
            types: self.process_types.clone(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.correction.max_attempts == 0 {
            return Err(SieveError::config("correction.max_attempts must be at least 1"));
        }
        if self.correction.row_limit == 0 {
            return Err(SieveError::config("correction.row_limit must be at least 1"));
        }
        if self.validator.max_query_length == 0 {
            return Err(SieveError::config("validator.max_query_length must be at least 1"));
        }
        for blocked in &self.validator.blocked_patterns {
            regex::Regex::new(&blocked.pattern).map_err(|e| {
                SieveError::config(format!("Invalid blocked pattern '{}': {e}", blocked.id))
            })?;
        }
        let weights = &self.discovery.weights;
        if [weights.column, weights.chain, weights.transitions]
            .iter()
            .any(|w| *w < 0.0)
            || weights.total() <= 0.0
        {
            return Err(SieveError::config(
                "discovery.weights must be non-negative and sum to more than zero",
            ));
        }
        if !(0.0..=1.0).contains(&self.discovery.similarity_threshold) {
            return Err(SieveError::config(
                "discovery.similarity_threshold must lie within [0, 1]",
            ));
        }
        if self.discovery.max_chain_depth == 0 {
            return Err(SieveError::config("discovery.max_chain_depth must be at least 1"));
        }
        self.styles
            .validate()
            .map_err(|e| SieveError::config(format!("styles: {e}")))?;
        Ok(())
    }
}
