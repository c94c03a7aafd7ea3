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

pub mod results;
pub mod schema;
pub mod traits;
pub mod types;

pub use results::{value_as_f64, value_as_text, TabularResult};
pub use schema::{ColumnSchema, ForeignKey, SchemaSnapshot, TableSchema};
pub use traits::{
    ConnectorExecutor, DatabaseConnector, GenerationOutcome, GenerationRequest, ProcessLabel,
    ProcessLabeler, ProcessSummary, QueryExecutor, QueryGenerator,
};
pub use types::{
    ConnectorError, ContractError, ExecutionError, GeneratorError, LimitStyle, PlaceholderStyle,
    SqlDialect,
};
