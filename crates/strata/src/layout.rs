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

use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum LayoutDirection {
    #[default]
    #[serde(rename = "TB", alias = "tb")]
    TopToBottom,
    #[serde(rename = "LR", alias = "lr")]
    LeftToRight,
}

impl std::str::FromStr for LayoutDirection {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "TB" | "TD" => Ok(LayoutDirection::TopToBottom),
            "LR" => Ok(LayoutDirection::LeftToRight),
            other => Err(format!("unknown layout direction '{other}', expected TB or LR")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LayoutConfig {
    pub direction: LayoutDirection,
    pub node_size: f64,
    pub rank_separation: f64,
    pub sibling_separation: f64,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            direction: LayoutDirection::TopToBottom,
            node_size: 160.0,
            rank_separation: 80.0,
            sibling_separation: 40.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct LayoutResult {
    pub positions: IndexMap<String, Position>,
    pub layers: IndexMap<String, usize>,
}

impl LayoutResult {
    pub fn layer_of(&self, node: &str) -> Option<usize> {
        self.layers.get(node).copied()
    }

    pub fn layer_count(&self) -> usize {
        self.layers.values().max().map_or(0, |m| m + 1)
    }
}

pub struct GraphLayoutEngine;

impl GraphLayoutEngine {
    /// Layered layout by Kahn's algorithm. Deterministic and total: every node in `nodes`
    /// receives exactly one position, cycles included.
    pub fn layout(
        nodes: &[String],
        edges: &[(String, String)],
        config: &LayoutConfig,
    ) -> LayoutResult {
        let order = Self::appearance_order(nodes, edges);
        let layers = Self::assign_layers(&order, edges);
        Self::position(&order, &layers, config)
    }

    /// Edge-list appearance first (source, then target), then any isolated nodes in input order.
    fn appearance_order(nodes: &[String], edges: &[(String, String)]) -> IndexSet<String> {
        let known: IndexSet<&str> = nodes.iter().map(String::as_str).collect();
        let mut order = IndexSet::with_capacity(nodes.len());
        for (source, target) in edges {
            if known.contains(source.as_str()) && known.contains(target.as_str()) {
                order.insert(source.clone());
                order.insert(target.clone());
            }
        }
        for node in nodes {
            order.insert(node.clone());
        }
        order
    }

    fn assign_layers(order: &IndexSet<String>, edges: &[(String, String)]) -> IndexMap<String, usize> {
        let mut in_degree: Vec<usize> = vec![0; order.len()];
        let mut successors: Vec<Vec<usize>> = vec![Vec::new(); order.len()];
        let mut seen_edges = IndexSet::new();
        for (source, target) in edges {
            let (Some(s), Some(t)) = (order.get_index_of(source), order.get_index_of(target)) else {
                continue;
            };
            if s == t || !seen_edges.insert((s, t)) {
                continue;
            }
            successors[s].push(t);
            in_degree[t] += 1;
        }

        let mut layer: Vec<Option<usize>> = vec![None; order.len()];
        let mut candidate: Vec<usize> = vec![0; order.len()];
        let mut queue: VecDeque<usize> = (0..order.len()).filter(|&i| in_degree[i] == 0).collect();
        while let Some(node) = queue.pop_front() {
            let assigned = candidate[node];
            layer[node] = Some(assigned);
            for &next in &successors[node] {
                candidate[next] = candidate[next].max(assigned + 1);
                in_degree[next] -= 1;
                if in_degree[next] == 0 {
                    queue.push_back(next);
                }
            }
        }

        let mut next_layer = layer.iter().flatten().max().map_or(0, |m| m + 1);
        let stranded = layer.iter().filter(|l| l.is_none()).count();
        if stranded > 0 {
            debug!(stranded, "Graph contains a cycle; appending stranded nodes as single-node layers");
        }
        for slot in layer.iter_mut() {
            if slot.is_none() {
                *slot = Some(next_layer);
                next_layer += 1;
            }
        }

        order
            .iter()
            .zip(layer)
            .map(|(id, l)| (id.clone(), l.unwrap_or(0)))
            .collect()
    }

    fn position(
        order: &IndexSet<String>,
        layers: &IndexMap<String, usize>,
        config: &LayoutConfig,
    ) -> LayoutResult {
        let mut members: IndexMap<usize, Vec<&String>> = IndexMap::new();
        for id in order {
            let l = layers.get(id).copied().unwrap_or(0);
            members.entry(l).or_default().push(id);
        }

        let rank_step = config.node_size + config.rank_separation;
        let sibling_step = config.node_size + config.sibling_separation;
        let mut positions = IndexMap::with_capacity(order.len());
        for id in order {
            let l = layers.get(id).copied().unwrap_or(0);
            let group = &members[&l];
            let index = group.iter().position(|m| *m == id).unwrap_or(0);
            let centre_offset = (group.len() as f64 - 1.0) * sibling_step / 2.0;
            let along = l as f64 * rank_step;
            let across = index as f64 * sibling_step - centre_offset;
            let position = match config.direction {
                LayoutDirection::TopToBottom => Position { x: across, y: along },
                LayoutDirection::LeftToRight => Position { x: along, y: across },
            };
            positions.insert(id.clone(), position);
        }

        LayoutResult {
            positions,
            layers: layers.clone(),
        }
    }
}
