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

use std::collections::HashSet;
use strata::{BottleneckKind, NodeRole, ProcessCatalogue, ProcessFlowConfig, ProcessNode};

fn format_count(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{value:.1}")
    }
}

fn entry_node(flow: &ProcessFlowConfig) -> Option<&ProcessNode> {
    flow.nodes_with_role(NodeRole::Start).next().or_else(|| {
        flow.nodes
            .iter()
            .min_by_key(|n| n.layer)
    })
}

/// Walks from the entry node along the heaviest outgoing edge, first edge on ties,
/// never revisiting a node.
pub fn main_path(flow: &ProcessFlowConfig) -> Vec<String> {
    let Some(mut current) = entry_node(flow) else {
        return Vec::new();
    };
    let mut visited = HashSet::new();
    let mut path = Vec::new();
    loop {
        visited.insert(current.id.as_str());
        path.push(current.label.clone());
        let next = flow
            .edges
            .iter()
            .filter(|e| e.source == current.id && !visited.contains(e.target.as_str()))
            .fold(None, |best: Option<&strata::ProcessEdge>, e| match best {
                Some(b) if b.weight >= e.weight => Some(b),
                _ => Some(e),
            })
            .and_then(|e| flow.node(&e.target));
        match next {
            Some(node) => current = node,
            None => break,
        }
    }
    path
}

/// Plain-text summary of a process graph. Same graph, same text.
pub fn describe(flow: &ProcessFlowConfig, catalogue: &ProcessCatalogue) -> String {
    let title = flow
        .process_type
        .as_deref()
        .map(|t| {
            catalogue
                .get(t)
                .map_or_else(|| t.to_string(), |def| def.display_name.clone())
        })
        .unwrap_or_else(|| "Unclassified".to_string());
    let mut sentences = vec![format!(
        "{title} process with {} stage{} and {} transition{}.",
        flow.nodes.len(),
        if flow.nodes.len() == 1 { "" } else { "s" },
        flow.edges.len(),
        if flow.edges.len() == 1 { "" } else { "s" },
    )];

    let path = main_path(flow);
    if path.len() > 1 {
        sentences.push(format!("Main path: {}.", path.join(" -> ")));
    }

    if let Some(bottleneck) = &flow.bottleneck {
        match bottleneck.kind {
            BottleneckKind::Edge => {
                if let Some(edge) = flow.edge(&bottleneck.id) {
                    let label = |id: &str| flow.node(id).map_or_else(|| id.to_string(), |n| n.label.clone());
                    sentences.push(format!(
                        "Busiest transition: {} -> {} ({}).",
                        label(&edge.source),
                        label(&edge.target),
                        format_count(edge.weight)
                    ));
                }
            }
            BottleneckKind::Node => {
                if let Some(node) = flow.node(&bottleneck.id) {
                    sentences.push(format!(
                        "Busiest stage: {} ({}).",
                        node.label,
                        format_count(node.count)
                    ));
                }
            }
        }
    }

    if let Some(current) = flow.nodes_with_role(NodeRole::Current).next() {
        sentences.push(format!("Currently at: {}.", current.label));
    }
    sentences.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use lens_contracts::TabularResult;
    use serde_json::json;
    use strata::ProcessGraphBuilder;

    fn counts() -> ProcessFlowConfig {
        let result = TabularResult::new(
            vec!["status".to_string(), "count".to_string()],
            vec![
                vec![json!("shipped"), json!(12)],
                vec![json!("pending"), json!(30)],
                vec![json!("delivered"), json!(7)],
            ],
        );
        ProcessGraphBuilder::default()
            .build(&result, Some("order_fulfillment"), "SELECT status, count(*) FROM orders GROUP BY status")
            .unwrap()
    }

    #[test]
    fn test_describes_aggregate_graph() {
        let flow = counts();
        let text = describe(&flow, &ProcessCatalogue::default());
        assert_eq!(
            text,
            "Order fulfillment process with 3 stages and 2 transitions. \
             Main path: Pending -> Shipped -> Delivered. Busiest stage: Pending (30)."
        );
        assert_eq!(describe(&flow, &ProcessCatalogue::default()), text);
    }

    #[test]
    fn test_count_formatting() {
        assert_eq!(format_count(5.0), "5");
        assert_eq!(format_count(2.4), "2.4");
    }
}
