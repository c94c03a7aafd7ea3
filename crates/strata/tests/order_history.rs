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

use lens_contracts::TabularResult;
use serde_json::{json, Value};
use strata::{
    BottleneckKind, GraphLayoutEngine, GraphStrategy, LayoutConfig, LayoutDirection, NodeRole,
    ProcessVisualiser,
};

const STAGES: [&str; 5] = ["pending", "confirmed", "processing", "shipped", "delivered"];

/// Five orders; two of them join the history at "processing", which makes
/// processing -> shipped the busiest transition.
fn order_history() -> TabularResult {
    let histories: [(i64, &[usize]); 5] = [
        (101, &[0, 1, 2, 3, 4]),
        (102, &[0, 1, 2, 3, 4]),
        (103, &[0, 1, 2, 3]),
        (104, &[2, 3, 4]),
        (105, &[2, 3]),
    ];
    let mut rows: Vec<Vec<Value>> = Vec::new();
    for (order_id, stages) in histories {
        for (step, stage) in stages.iter().enumerate() {
            rows.push(vec![
                json!(order_id),
                json!(STAGES[*stage]),
                json!(format!("2024-05-{:02} 09:00:00", 1 + step * 2)),
            ]);
        }
    }
    // the executor does not promise any row order
    rows.reverse();
    TabularResult::new(
        vec!["order_id".into(), "status".into(), "updated_at".into()],
        rows,
    )
}

#[test]
fn order_history_builds_five_stage_chain() {
    let visualiser = ProcessVisualiser::default();
    let result = order_history();
    let outcome = visualiser
        .visualise(
            "What does the order fulfillment process look like?",
            &result,
            "SELECT order_id, status, updated_at FROM order_status_history",
        )
        .expect("valid flow");

    assert!(outcome.detection.is_process);
    let flow = outcome.flow.expect("flow built");
    assert_eq!(flow.strategy, GraphStrategy::EntityTimeline);
    assert_eq!(flow.process_type.as_deref(), Some("order_fulfillment"));
    assert_eq!(flow.nodes.len(), 5);
    assert_eq!(flow.edges.len(), 4);

    let bottleneck = flow.bottleneck.as_ref().expect("bottleneck");
    assert_eq!(bottleneck.kind, BottleneckKind::Edge);
    assert_eq!(bottleneck.id, "processing->shipped");
    assert_eq!(bottleneck.weight, 5.0);

    let layers: Vec<usize> = STAGES
        .iter()
        .map(|s| flow.node(s).expect("node").layer)
        .collect();
    assert_eq!(layers, vec![0, 1, 2, 3, 4]);

    assert_eq!(flow.nodes_with_role(NodeRole::Start).count(), 1);
    assert_eq!(flow.node("pending").expect("node").role, NodeRole::Start);
    assert_eq!(flow.node("delivered").expect("node").role, NodeRole::End);
    assert_eq!(flow.nodes_with_role(NodeRole::Current).count(), 0);

    // two days between consecutive updates for every order
    let edge = flow.edge("confirmed->processing").expect("edge");
    assert_eq!(edge.avg_duration_seconds, Some(172_800.0));
}

#[test]
fn standalone_layout_matches_builder_layers() {
    let visualiser = ProcessVisualiser::default();
    let flow = visualiser
        .build(&order_history(), Some("order_fulfillment"), "q")
        .expect("flow built");
    let nodes: Vec<String> = flow.nodes.iter().map(|n| n.id.clone()).collect();
    let edges: Vec<(String, String)> = flow
        .edges
        .iter()
        .map(|e| (e.source.clone(), e.target.clone()))
        .collect();
    let tb = GraphLayoutEngine::layout(&nodes, &edges, &LayoutConfig::default());
    for node in &flow.nodes {
        assert_eq!(tb.layer_of(&node.id), Some(node.layer));
        assert_eq!(tb.positions[&node.id], node.position);
    }

    let lr = visualiser
        .with_direction(LayoutDirection::LeftToRight)
        .build(&order_history(), None, "q")
        .expect("flow built");
    for node in &lr.nodes {
        let tb_pos = tb.positions[&node.id];
        assert_eq!((node.position.x, node.position.y), (tb_pos.y, tb_pos.x));
    }
}

#[test]
fn flow_serialises_for_rendering() {
    let flow = ProcessVisualiser::default()
        .build(&order_history(), None, "SELECT 1")
        .expect("flow built");
    let json = flow.to_json().expect("json");
    assert_eq!(json["nodes"].as_array().map(Vec::len), Some(5));
    assert_eq!(json["bottleneck"]["kind"], "edge");
    assert_eq!(json["direction"], "TB");
    assert_eq!(json["source_query"], "SELECT 1");
    assert!(json["nodes"][0]["style"]["color"].as_str().is_some());
}

/// One row per order: the latest status only, so there is no history to link.
fn current_statuses() -> TabularResult {
    let latest = [
        (101, "pending"),
        (102, "confirmed"),
        (103, "shipped"),
        (104, "shipped"),
        (105, "delivered"),
        (106, "delivered"),
    ];
    let rows = latest
        .iter()
        .enumerate()
        .map(|(day, (order_id, status))| {
            vec![
                json!(order_id),
                json!(status),
                json!(format!("2024-06-{:02} 10:00:00", day + 1)),
            ]
        })
        .collect();
    TabularResult::new(
        vec!["order_id".into(), "status".into(), "updated_at".into()],
        rows,
    )
}

#[test]
fn current_statuses_fall_back_to_status_chain() {
    let flow = ProcessVisualiser::default()
        .build(&current_statuses(), Some("order_fulfillment"), "q")
        .expect("flow built");

    assert_eq!(flow.strategy, GraphStrategy::StatusAggregate);
    let ids: Vec<&str> = flow.nodes.iter().map(|n| n.id.as_str()).collect();
    assert_eq!(ids, vec!["pending", "confirmed", "shipped", "delivered"]);
    assert_eq!(flow.edges.len(), 3);
    assert_eq!(flow.nodes_with_role(NodeRole::Start).count(), 1);
    assert_eq!(flow.nodes_with_role(NodeRole::End).count(), 1);
    assert_eq!(flow.node("delivered").expect("node").role, NodeRole::End);

    let bottleneck = flow.bottleneck.as_ref().expect("bottleneck");
    assert_eq!(bottleneck.kind, BottleneckKind::Node);
    assert_eq!(bottleneck.id, "shipped");
    flow.validate().expect("well formed");
}
