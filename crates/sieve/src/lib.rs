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

pub mod cache;
pub mod config;
pub mod correction;
pub mod describe;
pub mod discovery;
pub mod error;
pub mod fixture;
pub mod pipeline;
pub mod validator;

pub use cache::{CacheStats, Clock, DiscoveryCache, ManualClock, SystemClock};
pub use config::{
    BlockedPattern, CorrectionConfig, DiscoveryConfig, LensConfig, ScoringWeights,
    ValidatorConfig, CONFIG_ENV_VAR,
};
pub use correction::{
    CorrectionOutcome, CorrectionState, ExecutionOutcome, GenerationAttempt, SelfCorrectionLoop,
};
pub use describe::{describe, main_path};
pub use discovery::{
    cache_key, ColumnCandidate, ColumnRole, DiscoveredProcess, EntityChain, ProcessCache,
    ProcessDiscoveryEngine, TransitionPattern,
};
pub use error::{Result, SieveError};
pub use fixture::{Fixture, FixtureConnector};
pub use pipeline::{PipelineAnswer, PipelineOrchestrator};
pub use validator::{
    sanitise_for_logging, sanitize_placeholders, LimitBound, SqlValidator, ValidationRejection,
    ValidationResult, ValidationStage,
};
