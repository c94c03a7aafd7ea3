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

use proptest::prelude::*;
use strata::{GraphLayoutEngine, LayoutConfig, LayoutDirection, StyleResolver};

fn graph() -> impl Strategy<Value = (Vec<String>, Vec<(String, String)>)> {
    (1usize..12).prop_flat_map(|n| {
        let nodes: Vec<String> = (0..n).map(|i| format!("s{i}")).collect();
        let edges = prop::collection::vec((0..n, 0..n), 0..30).prop_map(|pairs| {
            pairs
                .into_iter()
                .map(|(a, b)| (format!("s{a}"), format!("s{b}")))
                .collect::<Vec<_>>()
        });
        (Just(nodes), edges)
    })
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 128,
        .. ProptestConfig::default()
    })]

    #[test]
    fn layout_places_every_node_once((nodes, edges) in graph()) {
        let result = GraphLayoutEngine::layout(&nodes, &edges, &LayoutConfig::default());
        prop_assert_eq!(result.positions.len(), nodes.len());
        prop_assert_eq!(result.layers.len(), nodes.len());
        for node in &nodes {
            prop_assert!(result.positions.contains_key(node));
        }
    }

    #[test]
    fn layout_is_deterministic_and_lr_transposes((nodes, edges) in graph()) {
        let tb = GraphLayoutEngine::layout(&nodes, &edges, &LayoutConfig::default());
        let again = GraphLayoutEngine::layout(&nodes, &edges, &LayoutConfig::default());
        prop_assert_eq!(&tb, &again);
        let lr = GraphLayoutEngine::layout(&nodes, &edges, &LayoutConfig {
            direction: LayoutDirection::LeftToRight,
            ..LayoutConfig::default()
        });
        for node in &nodes {
            let a = tb.positions[node];
            let b = lr.positions[node];
            prop_assert_eq!((a.x, a.y), (b.y, b.x));
        }
    }

    #[test]
    fn style_resolution_is_pure(label in "[A-Za-z _-]{0,24}") {
        let first = StyleResolver::default().resolve(&label);
        let second = StyleResolver::default().resolve(&label);
        prop_assert_eq!(first, second);
    }
}
