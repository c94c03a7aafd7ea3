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

use crate::config::CorrectionConfig;
use crate::error::{Result, SieveError};
use crate::validator::{SqlValidator, ValidationResult};
use chrono::{DateTime, Utc};
use lens_contracts::{
    ExecutionError, GenerationOutcome, GenerationRequest, QueryExecutor, QueryGenerator,
    TabularResult,
};
use serde::{Deserialize, Serialize};
use std::fmt::Write;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{timeout, Instant};
use tracing::{debug, error, info, instrument, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorrectionState {
    Generating,
    Validating,
    Executing,
    Retrying,
    Succeeded,
    Failed,
    Refused,
}

impl CorrectionState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            CorrectionState::Succeeded | CorrectionState::Failed | CorrectionState::Refused
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ExecutionOutcome {
    Success { row_count: usize },
    Failure { error: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationAttempt {
    /// 1-based.
    pub index: u32,
    /// Candidate text as returned by the generator.
    pub query: Option<String>,
    /// Text handed to the executor, with the row limit applied.
    pub executed_query: Option<String>,
    pub validation: Option<ValidationResult>,
    pub execution: Option<ExecutionOutcome>,
    /// Feedback passed to the next attempt, or the refusal reason.
    pub error: Option<String>,
    pub transitions: Vec<CorrectionState>,
    pub started_at: DateTime<Utc>,
    pub elapsed_ms: u64,
}

impl GenerationAttempt {
    fn new(index: u32) -> Self {
        Self {
            index,
            query: None,
            executed_query: None,
            validation: None,
            execution: None,
            error: None,
            transitions: Vec::new(),
            started_at: Utc::now(),
            elapsed_ms: 0,
        }
    }

    fn enter(&mut self, state: CorrectionState) {
        debug!(attempt = self.index, state = ?state, "Correction state change");
        self.transitions.push(state);
    }

    pub fn state(&self) -> Option<CorrectionState> {
        self.transitions.last().copied()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrectionOutcome {
    pub state: CorrectionState,
    pub attempts: Vec<GenerationAttempt>,
    pub final_query: Option<String>,
    pub result: Option<TabularResult>,
    pub terminal_error: Option<String>,
    /// The loop stopped because `total_budget_seconds` ran out.
    #[serde(default)]
    pub timed_out: bool,
}

impl CorrectionOutcome {
    /// The attempt retained for audit: the accepted one, or the one that ended the loop.
    pub fn final_attempt(&self) -> Option<&GenerationAttempt> {
        self.attempts.last()
    }

    pub fn succeeded(&self) -> bool {
        self.state == CorrectionState::Succeeded
    }

    /// The executed query and its rows, or the error that ended the loop.
    pub fn into_result(self) -> Result<(String, TabularResult)> {
        let cause = self.terminal_error.clone().unwrap_or_default();
        match self.state {
            CorrectionState::Succeeded => match (self.final_query, self.result) {
                (Some(query), Some(rows)) => Ok((query, rows)),
                _ => Err(SieveError::generation("succeeded without a result")),
            },
            CorrectionState::Refused => Err(SieveError::refused(cause)),
            _ if self.timed_out => Err(SieveError::timeout(cause)),
            _ => {
                let last = self.attempts.last();
                if let Some(ExecutionOutcome::Failure { error }) = last.and_then(|a| a.execution.as_ref()) {
                    return Err(SieveError::Execution(ExecutionError::database(error.clone())));
                }
                if last
                    .and_then(|a| a.validation.as_ref())
                    .is_some_and(|v| !v.passed)
                {
                    return Err(SieveError::validation(cause));
                }
                Err(SieveError::generation(cause))
            }
        }
    }
}

enum Step {
    Done(TabularResult),
    Refused(String),
    Retry(String),
    OutOfBudget(String),
}

/// Bounded generate, validate, execute loop. Attempts run strictly in sequence since
/// each prompt carries the previous attempt's error.
pub struct SelfCorrectionLoop {
    generator: Arc<dyn QueryGenerator>,
    executor: Arc<dyn QueryExecutor>,
    validator: Arc<SqlValidator>,
    config: CorrectionConfig,
}

impl SelfCorrectionLoop {
    pub fn new(
        generator: Arc<dyn QueryGenerator>,
        executor: Arc<dyn QueryExecutor>,
        validator: Arc<SqlValidator>,
        config: CorrectionConfig,
    ) -> Self {
        Self {
            generator,
            executor,
            validator,
            config,
        }
    }

    pub fn config(&self) -> &CorrectionConfig {
        &self.config
    }

    #[instrument(skip(self, schema_context), fields(question_len = question.len(), max_attempts = self.config.max_attempts))]
    pub async fn run(&self, question: &str, schema_context: &str) -> CorrectionOutcome {
        let deadline = Instant::now() + self.config.total_budget();
        let mut attempts: Vec<GenerationAttempt> = Vec::new();
        let mut feedback: Option<String> = None;

        for index in 1..=self.config.max_attempts {
            let mut attempt = GenerationAttempt::new(index);
            let started = Instant::now();
            let step = if remaining(deadline).is_zero() {
                Step::OutOfBudget(self.budget_message("generation"))
            } else {
                self.attempt(&mut attempt, question, schema_context, feedback.take(), deadline)
                    .await
            };
            attempt.elapsed_ms = started.elapsed().as_millis() as u64;

            match step {
                Step::Done(result) => {
                    attempt.enter(CorrectionState::Succeeded);
                    info!(
                        attempt = index,
                        rows = result.row_count(),
                        "Query succeeded"
                    );
                    let final_query = attempt.executed_query.clone();
                    attempts.push(attempt);
                    return CorrectionOutcome {
                        state: CorrectionState::Succeeded,
                        attempts,
                        final_query,
                        result: Some(result),
                        terminal_error: None,
                        timed_out: false,
                    };
                }
                Step::Refused(reason) => {
                    attempt.enter(CorrectionState::Refused);
                    attempt.error = Some(reason.clone());
                    info!(attempt = index, reason = %reason, "Generator refused the question");
                    attempts.push(attempt);
                    return CorrectionOutcome {
                        state: CorrectionState::Refused,
                        attempts,
                        final_query: None,
                        result: None,
                        terminal_error: Some(reason),
                        timed_out: false,
                    };
                }
                Step::OutOfBudget(cause) => {
                    attempt.enter(CorrectionState::Failed);
                    attempt.error = Some(cause.clone());
                    attempts.push(attempt);
                    let mut outcome = self.failed(attempts, cause);
                    outcome.timed_out = true;
                    return outcome;
                }
                Step::Retry(cause) => {
                    warn!(attempt = index, cause = %cause, "Attempt failed");
                    attempt.error = Some(cause.clone());
                    if index < self.config.max_attempts {
                        attempt.enter(CorrectionState::Retrying);
                        feedback = Some(cause);
                        attempts.push(attempt);
                    } else {
                        attempt.enter(CorrectionState::Failed);
                        attempts.push(attempt);
                        return self.failed(attempts, cause);
                    }
                }
            }
        }

        // max_attempts is validated to be at least one; this covers a hand-built config.
        self.failed(attempts, "no attempts were permitted".to_string())
    }

    async fn attempt(
        &self,
        attempt: &mut GenerationAttempt,
        question: &str,
        schema_context: &str,
        prior_error: Option<String>,
        deadline: Instant,
    ) -> Step {
        attempt.enter(CorrectionState::Generating);
        let request = GenerationRequest {
            question: question.to_string(),
            schema_context: schema_context.to_string(),
            prior_error,
            attempt: attempt.index,
            dialect: self.validator.source_dialect(),
        };
        let candidate = match timeout(remaining(deadline), self.generator.generate(&request)).await
        {
            Err(_) => return Step::OutOfBudget(self.budget_message("generation")),
            Ok(Err(e)) => return Step::Retry(self.feedback("generation", &e.to_string(), None)),
            Ok(Ok(GenerationOutcome::Refusal(reason))) => return Step::Refused(reason),
            Ok(Ok(GenerationOutcome::Query(text))) => text,
        };
        info!(
            attempt = attempt.index,
            query = %self.validator.sanitise_for_logging(&candidate),
            "Candidate generated"
        );
        attempt.query = Some(candidate.clone());

        attempt.enter(CorrectionState::Validating);
        let validation = self.validator.check(&candidate);
        let rejection = validation.rejection.clone();
        let executable = self
            .validator
            .enforce_row_limit(&validation, self.config.row_limit);
        attempt.validation = Some(validation);
        if let Some(rejection) = rejection {
            return Step::Retry(self.feedback(
                &format!("validation/{}", rejection.stage),
                &format!("{} ({})", rejection.detail, rejection.rule),
                Some(&candidate),
            ));
        }
        let Some(sql) = executable else {
            return Step::Retry(self.feedback(
                "validation",
                "validated query produced no executable text",
                Some(&candidate),
            ));
        };
        attempt.executed_query = Some(sql.clone());

        attempt.enter(CorrectionState::Executing);
        let budget = remaining(deadline);
        let query_timeout = self.config.query_timeout().min(budget);
        match timeout(
            budget,
            self.executor.execute(&sql, query_timeout, self.config.row_limit),
        )
        .await
        {
            Err(_) => Step::OutOfBudget(self.budget_message("execution")),
            Ok(Err(e)) => {
                attempt.execution = Some(ExecutionOutcome::Failure {
                    error: e.to_string(),
                });
                Step::Retry(self.feedback("execution", &e.to_string(), Some(&sql)))
            }
            Ok(Ok(result)) => {
                attempt.execution = Some(ExecutionOutcome::Success {
                    row_count: result.row_count(),
                });
                Step::Done(result)
            }
        }
    }

    fn feedback(&self, stage: &str, detail: &str, query: Option<&str>) -> String {
        let mut text = format!("stage: {stage}; detail: {detail}");
        if let Some(query) = query {
            let _ = write!(text, "; query: {}", self.validator.sanitise_for_logging(query));
        }
        text
    }

    fn budget_message(&self, stage: &str) -> String {
        self.feedback(
            stage,
            &format!(
                "timed out: total budget of {}s exhausted",
                self.config.total_budget_seconds
            ),
            None,
        )
    }

    fn failed(&self, attempts: Vec<GenerationAttempt>, cause: String) -> CorrectionOutcome {
        error!(attempts = attempts.len(), cause = %cause, "Query correction failed");
        let final_query = attempts.last().and_then(|a| a.query.clone());
        CorrectionOutcome {
            state: CorrectionState::Failed,
            attempts,
            final_query,
            result: None,
            terminal_error: Some(cause),
            timed_out: false,
        }
    }
}

fn remaining(deadline: Instant) -> Duration {
    deadline.saturating_duration_since(Instant::now())
}
