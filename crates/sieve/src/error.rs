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

use lens_contracts::{ConnectorError, ExecutionError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SieveError {
    #[error("Configuration is invalid: {0}")]
    Config(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parsing failed: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("JSON serialisation/deserialization failed: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Generator refused: {0}")]
    Refused(String),
    #[error("Query generation failed: {0}")]
    Generation(String),
    #[error("Query rejected: {0}")]
    Validation(String),
    #[error(transparent)]
    Execution(#[from] ExecutionError),
    #[error("Discovery failed: {0}")]
    Discovery(String),
    #[error("Timeout occurred: {0}")]
    Timeout(String),
    #[error("Process graph error: {0}")]
    Graph(#[from] strata::StrataError),
}

pub type Result<T> = std::result::Result<T, SieveError>;

impl SieveError {
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::Config(msg.into())
    }
    pub fn refused<S: Into<String>>(msg: S) -> Self {
        Self::Refused(msg.into())
    }
    pub fn generation<S: Into<String>>(msg: S) -> Self {
        Self::Generation(msg.into())
    }
    pub fn validation<S: Into<String>>(msg: S) -> Self {
        Self::Validation(msg.into())
    }
    pub fn discovery<S: Into<String>>(msg: S) -> Self {
        Self::Discovery(msg.into())
    }
    pub fn timeout<S: Into<String>>(msg: S) -> Self {
        Self::Timeout(msg.into())
    }
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Discovery(msg) if msg == "cancelled")
    }
}

impl From<ConnectorError> for SieveError {
    fn from(err: ConnectorError) -> Self {
        match err {
            ConnectorError::Execution(e) => Self::Execution(e),
            other => Self::Discovery(other.to_string()),
        }
    }
}
