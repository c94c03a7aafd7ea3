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

use crate::error::{GraphError, Result};
use crate::layout::{LayoutDirection, Position};
use crate::style::NodeStyle;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeRole {
    Start,
    End,
    Task,
    Gateway,
    /// Latest stage of the single entity a result describes.
    Current,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessNode {
    pub id: String,
    pub label: String,
    pub role: NodeRole,
    pub style: NodeStyle,
    pub count: f64,
    pub layer: usize,
    pub position: Position,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessEdge {
    pub id: String,
    pub source: String,
    pub target: String,
    pub weight: f64,
    pub avg_duration_seconds: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BottleneckKind {
    Edge,
    Node,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bottleneck {
    pub kind: BottleneckKind,
    pub id: String,
    pub weight: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GraphStrategy {
    ExplicitTransitions,
    EntityTimeline,
    StatusAggregate,
}

/// Renderable process graph. Rebuilt from scratch for every result; never mutated in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessFlowConfig {
    pub process_type: Option<String>,
    pub strategy: GraphStrategy,
    pub direction: LayoutDirection,
    pub nodes: Vec<ProcessNode>,
    pub edges: Vec<ProcessEdge>,
    pub bottleneck: Option<Bottleneck>,
    pub source_query: String,
}

impl ProcessFlowConfig {
    pub fn node(&self, id: &str) -> Option<&ProcessNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn edge(&self, id: &str) -> Option<&ProcessEdge> {
        self.edges.iter().find(|e| e.id == id)
    }

    pub fn nodes_with_role(&self, role: NodeRole) -> impl Iterator<Item = &ProcessNode> {
        self.nodes.iter().filter(move |n| n.role == role)
    }

    pub fn validate(&self) -> std::result::Result<(), GraphError> {
        let mut ids = HashSet::new();
        for node in &self.nodes {
            if !ids.insert(node.id.as_str()) {
                return Err(GraphError::DuplicateNode {
                    id: node.id.clone(),
                });
            }
        }
        for edge in &self.edges {
            for endpoint in [&edge.source, &edge.target] {
                if !ids.contains(endpoint.as_str()) {
                    return Err(GraphError::DanglingEdge {
                        edge: edge.id.clone(),
                        node: endpoint.clone(),
                    });
                }
            }
        }
        let current = self.nodes_with_role(NodeRole::Current).count();
        if current > 1 {
            return Err(GraphError::MultipleCurrent { count: current });
        }
        if let Some(b) = &self.bottleneck {
            let known = match b.kind {
                BottleneckKind::Edge => self.edge(&b.id).is_some(),
                BottleneckKind::Node => ids.contains(b.id.as_str()),
            };
            if !known {
                return Err(GraphError::UnknownBottleneck { id: b.id.clone() });
            }
        }
        Ok(())
    }

    pub fn to_json(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }
}
