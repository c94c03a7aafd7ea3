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

use thiserror::Error;
#[derive(Error, Debug)]
pub enum StrataError {
    #[error("Style configuration error: {0}")]
    Style(#[from] StyleConfigError),
    #[error("Flow graph invariant violated: {0}")]
    Graph(#[from] GraphError),
    #[error("Serialisation error: {0}")]
    Serialisation(#[from] serde_json::Error),
}
#[derive(Error, Debug, PartialEq, Eq)]
pub enum StyleConfigError {
    #[error("Fallback palette must contain at least one entry")]
    EmptyPalette,
    #[error("Style category '{name}' has no keywords")]
    EmptyCategory { name: String },
    #[error("Duplicate style category: '{name}'")]
    DuplicateCategory { name: String },
}
#[derive(Error, Debug, PartialEq, Eq)]
pub enum GraphError {
    #[error("Edge '{edge}' references unknown node '{node}'")]
    DanglingEdge { edge: String, node: String },
    #[error("Duplicate node id: '{id}'")]
    DuplicateNode { id: String },
    #[error("{count} nodes are marked current; at most one is allowed")]
    MultipleCurrent { count: usize },
    #[error("Bottleneck references unknown element '{id}'")]
    UnknownBottleneck { id: String },
}
pub type Result<T> = std::result::Result<T, StrataError>;
