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

use crate::catalogue::{normalise_stage, ProcessCatalogue, ProcessTypeDef};
use crate::detector::{observed_stages, parse_timestamp, ColumnHints, ColumnRoles};
use crate::flow::{
    Bottleneck, BottleneckKind, GraphStrategy, NodeRole, ProcessEdge, ProcessFlowConfig,
    ProcessNode,
};
use crate::layout::{GraphLayoutEngine, LayoutConfig};
use crate::style::StyleResolver;
use chrono::NaiveDateTime;
use indexmap::IndexMap;
use lens_contracts::{value_as_f64, value_as_text, TabularResult};
use std::collections::HashMap;
use tracing::{debug, info};

#[derive(Debug, Clone, Default)]
struct EdgeStat {
    weight: f64,
    duration_total: f64,
    duration_samples: usize,
}

impl EdgeStat {
    fn add(&mut self, weight: f64, duration: Option<f64>) {
        self.weight += weight;
        if let Some(d) = duration {
            self.duration_total += d;
            self.duration_samples += 1;
        }
    }

    fn avg_duration(&self) -> Option<f64> {
        (self.duration_samples > 0).then(|| self.duration_total / self.duration_samples as f64)
    }
}

/// Intermediate graph keyed by normalised stage id; insertion order is the display order.
#[derive(Debug, Default)]
struct Draft {
    labels: IndexMap<String, String>,
    counts: HashMap<String, f64>,
    edges: IndexMap<(String, String), EdgeStat>,
    current: Option<String>,
}

impl Draft {
    fn touch(&mut self, raw: &str) -> String {
        let id = normalise_stage(raw);
        self.labels
            .entry(id.clone())
            .or_insert_with(|| title_case(&id));
        id
    }

    fn bump(&mut self, id: &str, amount: f64) {
        *self.counts.entry(id.to_string()).or_insert(0.0) += amount;
    }

    /// Aggregates get their edges from `chain`; the other strategies must observe at
    /// least one transition.
    fn is_trivial(&self, strategy: GraphStrategy) -> bool {
        self.labels.len() < 2
            || (strategy != GraphStrategy::StatusAggregate && self.edges.is_empty())
    }

    /// Reorders nodes by a canonical sequence; unknown stages keep their relative order after it.
    fn order_by(&mut self, process: &ProcessTypeDef) {
        let mut entries: Vec<(String, String)> = self.labels.drain(..).collect();
        entries.sort_by_key(|(id, _)| process.canonical_rank(id).unwrap_or(usize::MAX));
        self.labels = entries.into_iter().collect();
    }
}

fn title_case(id: &str) -> String {
    id.split('_')
        .filter(|p| !p.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn text_at(row: &[serde_json::Value], index: usize) -> Option<String> {
    row.get(index)
        .and_then(value_as_text)
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
}

pub struct ProcessGraphBuilder {
    styles: StyleResolver,
    catalogue: ProcessCatalogue,
    layout: LayoutConfig,
    hints: ColumnHints,
}

impl ProcessGraphBuilder {
    pub fn new(
        styles: StyleResolver,
        catalogue: ProcessCatalogue,
        layout: LayoutConfig,
        hints: ColumnHints,
    ) -> Self {
        Self {
            styles,
            catalogue,
            layout,
            hints,
        }
    }

    pub fn layout_config(&self) -> &LayoutConfig {
        &self.layout
    }

    pub fn with_layout(mut self, layout: LayoutConfig) -> Self {
        self.layout = layout;
        self
    }

    /// Builds a laid-out, styled flow from a result set, or `None` when no strategy
    /// yields at least two stages.
    pub fn build(
        &self,
        result: &TabularResult,
        process_type: Option<&str>,
        query_text: &str,
    ) -> Option<ProcessFlowConfig> {
        if result.is_empty() {
            debug!("Empty result; no process graph");
            return None;
        }
        let roles = ColumnRoles::infer(result, &self.hints);
        let process = process_type
            .and_then(|name| self.catalogue.get(name))
            .or_else(|| {
                self.catalogue
                    .match_statuses(&observed_stages(result, &roles))
                    .map(|(t, _)| t)
            });

        let attempts: [(GraphStrategy, fn(&Self, &TabularResult, &ColumnRoles) -> Option<Draft>); 3] = [
            (GraphStrategy::ExplicitTransitions, Self::from_transitions),
            (GraphStrategy::EntityTimeline, Self::from_timeline),
            (GraphStrategy::StatusAggregate, Self::from_status_counts),
        ];
        for (strategy, attempt) in attempts {
            let Some(mut draft) = attempt(self, result, &roles) else {
                continue;
            };
            if draft.is_trivial(strategy) {
                debug!(?strategy, "Strategy produced a trivial graph");
                continue;
            }
            if let Some(p) = process {
                draft.order_by(p);
            }
            if strategy == GraphStrategy::StatusAggregate {
                Self::chain(&mut draft);
            }
            info!(
                ?strategy,
                nodes = draft.labels.len(),
                edges = draft.edges.len(),
                "Built process graph"
            );
            return Some(self.finish(
                draft,
                strategy,
                process.map(|p| p.name.clone()).or(process_type.map(str::to_string)),
                query_text,
            ));
        }
        None
    }

    fn from_transitions(&self, result: &TabularResult, roles: &ColumnRoles) -> Option<Draft> {
        let from = roles.from_index(result)?;
        let to = roles.to_index(result)?;
        let count = roles.count_index(result);
        let duration = roles.duration_index(result);
        let mut draft = Draft::default();
        for row in &result.rows {
            let (Some(source), Some(target)) = (text_at(row, from), text_at(row, to)) else {
                continue;
            };
            let weight = count
                .and_then(|i| row.get(i))
                .and_then(value_as_f64)
                .unwrap_or(1.0);
            let source = draft.touch(&source);
            let target = draft.touch(&target);
            if source == target {
                continue;
            }
            draft.bump(&source, weight);
            draft.bump(&target, weight);
            let elapsed = duration.and_then(|i| row.get(i)).and_then(value_as_f64);
            draft
                .edges
                .entry((source, target))
                .or_default()
                .add(weight, elapsed);
        }
        Some(draft)
    }

    fn from_timeline(&self, result: &TabularResult, roles: &ColumnRoles) -> Option<Draft> {
        let (Some(entity), Some(status), Some(timestamp)) = (
            roles.entity_index(result),
            roles.status_index(result),
            roles.timestamp_index(result),
        ) else {
            return None;
        };

        let mut histories: IndexMap<String, Vec<(Option<NaiveDateTime>, String)>> = IndexMap::new();
        for row in &result.rows {
            let (Some(id), Some(stage)) = (text_at(row, entity), text_at(row, status)) else {
                continue;
            };
            let at = row.get(timestamp).and_then(parse_timestamp);
            histories.entry(id).or_default().push((at, stage));
        }

        let mut draft = Draft::default();
        for history in histories.values_mut() {
            if history.iter().all(|(at, _)| at.is_some()) {
                history.sort_by_key(|(at, _)| *at);
            }
            let mut previous: Option<(String, Option<NaiveDateTime>)> = None;
            for (at, stage) in history.iter() {
                let id = draft.touch(stage);
                if let Some((prev_id, prev_at)) = &previous {
                    if *prev_id == id {
                        continue;
                    }
                    let elapsed = match (prev_at, at) {
                        (Some(a), Some(b)) => Some((*b - *a).num_seconds() as f64),
                        _ => None,
                    };
                    draft
                        .edges
                        .entry((prev_id.clone(), id.clone()))
                        .or_default()
                        .add(1.0, elapsed);
                }
                draft.bump(&id, 1.0);
                previous = Some((id, *at));
            }
        }

        if histories.len() == 1 {
            draft.current = histories
                .values()
                .next()
                .and_then(|h| h.last())
                .map(|(_, stage)| normalise_stage(stage));
        }
        Some(draft)
    }

    fn from_status_counts(&self, result: &TabularResult, roles: &ColumnRoles) -> Option<Draft> {
        let status = roles.status_index(result)?;
        let count = roles.count_index(result);
        let mut draft = Draft::default();
        for row in &result.rows {
            let Some(stage) = text_at(row, status) else {
                continue;
            };
            let weight = count
                .and_then(|i| row.get(i))
                .and_then(value_as_f64)
                .unwrap_or(1.0);
            let id = draft.touch(&stage);
            draft.bump(&id, weight);
        }
        // descending count; stable so ties keep first appearance
        let counts = draft.counts.clone();
        draft.labels.sort_by(|a, _, b, _| {
            let ca = counts.get(a).copied().unwrap_or(0.0);
            let cb = counts.get(b).copied().unwrap_or(0.0);
            cb.total_cmp(&ca)
        });
        Some(draft)
    }

    /// Links aggregate stages in display order; each edge carries the count that reached its target.
    fn chain(draft: &mut Draft) {
        let ids: Vec<String> = draft.labels.keys().cloned().collect();
        for pair in ids.windows(2) {
            let weight = draft.counts.get(&pair[1]).copied().unwrap_or(0.0);
            draft
                .edges
                .entry((pair[0].clone(), pair[1].clone()))
                .or_default()
                .add(weight, None);
        }
    }

    fn finish(
        &self,
        draft: Draft,
        strategy: GraphStrategy,
        process_type: Option<String>,
        query_text: &str,
    ) -> ProcessFlowConfig {
        let node_ids: Vec<String> = draft.labels.keys().cloned().collect();
        let edge_pairs: Vec<(String, String)> = draft.edges.keys().cloned().collect();
        let placed = GraphLayoutEngine::layout(&node_ids, &edge_pairs, &self.layout);

        let mut in_degree: HashMap<&str, usize> = HashMap::new();
        let mut out_degree: HashMap<&str, usize> = HashMap::new();
        for (source, target) in &edge_pairs {
            *out_degree.entry(source.as_str()).or_insert(0) += 1;
            *in_degree.entry(target.as_str()).or_insert(0) += 1;
        }

        let nodes = draft
            .labels
            .iter()
            .map(|(id, label)| {
                let ins = in_degree.get(id.as_str()).copied().unwrap_or(0);
                let outs = out_degree.get(id.as_str()).copied().unwrap_or(0);
                let role = if draft.current.as_deref() == Some(id.as_str()) {
                    NodeRole::Current
                } else if ins == 0 {
                    NodeRole::Start
                } else if outs == 0 {
                    NodeRole::End
                } else if outs > 1 {
                    NodeRole::Gateway
                } else {
                    NodeRole::Task
                };
                ProcessNode {
                    id: id.clone(),
                    label: label.clone(),
                    role,
                    style: self.styles.resolve(label),
                    count: draft.counts.get(id).copied().unwrap_or(0.0),
                    layer: placed.layer_of(id).unwrap_or(0),
                    position: placed.positions.get(id).copied().unwrap_or_default(),
                }
            })
            .collect::<Vec<_>>();

        let edges: Vec<ProcessEdge> = draft
            .edges
            .iter()
            .map(|((source, target), stat)| ProcessEdge {
                id: format!("{source}->{target}"),
                source: source.clone(),
                target: target.clone(),
                weight: stat.weight,
                avg_duration_seconds: stat.avg_duration(),
            })
            .collect();

        let bottleneck = if strategy == GraphStrategy::StatusAggregate || edges.is_empty() {
            heaviest(nodes.iter().map(|n| (n.id.as_str(), n.count))).map(|(id, weight)| {
                Bottleneck {
                    kind: BottleneckKind::Node,
                    id,
                    weight,
                }
            })
        } else {
            heaviest(edges.iter().map(|e| (e.id.as_str(), e.weight))).map(|(id, weight)| {
                Bottleneck {
                    kind: BottleneckKind::Edge,
                    id,
                    weight,
                }
            })
        };

        ProcessFlowConfig {
            process_type,
            strategy,
            direction: self.layout.direction,
            nodes,
            edges,
            bottleneck,
            source_query: query_text.to_string(),
        }
    }
}

/// Maximum weight, ties resolved to the first occurrence.
fn heaviest<'a>(items: impl Iterator<Item = (&'a str, f64)>) -> Option<(String, f64)> {
    let mut best: Option<(&str, f64)> = None;
    for (id, weight) in items {
        if best.map_or(true, |(_, w)| weight > w) {
            best = Some((id, weight));
        }
    }
    best.map(|(id, w)| (id.to_string(), w))
}

impl Default for ProcessGraphBuilder {
    fn default() -> Self {
        Self::new(
            StyleResolver::default(),
            ProcessCatalogue::default(),
            LayoutConfig::default(),
            ColumnHints::default(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn result(columns: &[&str], rows: Vec<Vec<Value>>) -> TabularResult {
        TabularResult::new(columns.iter().map(|c| c.to_string()).collect(), rows)
    }

    #[test]
    fn test_transitions_aggregate_duplicates_and_skip_self_loops() {
        let r = result(
            &["from_state", "to_state"],
            vec![
                vec![json!("Open"), json!("Assigned")],
                vec![json!("open"), json!("assigned")],
                vec![json!("assigned"), json!("assigned")],
                vec![json!("assigned"), json!("Resolved")],
                vec![json!("assigned"), json!("Closed")],
            ],
        );
        let flow = ProcessGraphBuilder::default().build(&r, None, "q").unwrap();
        assert_eq!(flow.strategy, GraphStrategy::ExplicitTransitions);
        assert_eq!(flow.nodes.len(), 4);
        assert_eq!(flow.edges.len(), 3);
        assert_eq!(flow.edge("open->assigned").unwrap().weight, 2.0);
        assert_eq!(flow.node("assigned").unwrap().role, NodeRole::Gateway);
        assert_eq!(flow.node("open").unwrap().role, NodeRole::Start);
        assert_eq!(flow.node("closed").unwrap().role, NodeRole::End);
        let b = flow.bottleneck.as_ref().unwrap();
        assert_eq!((b.kind, b.id.as_str()), (BottleneckKind::Edge, "open->assigned"));
        assert_eq!(flow.process_type.as_deref(), Some("support_ticket"));
        flow.validate().unwrap();
    }

    #[test]
    fn test_status_counts_use_canonical_order() {
        let r = result(
            &["status", "cnt"],
            vec![
                vec![json!("delivered"), json!(50)],
                vec![json!("pending"), json!(10)],
                vec![json!("shipped"), json!(50)],
            ],
        );
        let flow = ProcessGraphBuilder::default()
            .build(&r, Some("order_fulfillment"), "q")
            .unwrap();
        let order: Vec<&str> = flow.nodes.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(order, vec!["pending", "shipped", "delivered"]);
        let b = flow.bottleneck.unwrap();
        assert_eq!(b.kind, BottleneckKind::Node);
        // tie between shipped and delivered resolves to the earlier stage
        assert_eq!(b.id, "shipped");
        assert_eq!(flow.edges.len(), 2);
    }

    #[test]
    fn test_status_counts_without_catalogue_sort_descending() {
        let r = result(
            &["stage", "total"],
            vec![
                vec![json!("alpha"), json!(1)],
                vec![json!("beta"), json!(9)],
                vec![json!("gamma"), json!(4)],
            ],
        );
        let flow = ProcessGraphBuilder::default().build(&r, None, "q").unwrap();
        let order: Vec<&str> = flow.nodes.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(order, vec!["beta", "gamma", "alpha"]);
        assert!(flow.process_type.is_none());
    }

    #[test]
    fn test_single_entity_marks_current() {
        let r = result(
            &["ticket_id", "status", "changed_at"],
            vec![
                vec![json!(7), json!("open"), json!("2024-01-01 09:00:00")],
                vec![json!(7), json!("resolved"), json!("2024-01-01 12:00:00")],
                vec![json!(7), json!("assigned"), json!("2024-01-01 10:00:00")],
            ],
        );
        let flow = ProcessGraphBuilder::default().build(&r, None, "q").unwrap();
        assert_eq!(flow.strategy, GraphStrategy::EntityTimeline);
        assert_eq!(flow.node("resolved").unwrap().role, NodeRole::Current);
        assert_eq!(flow.nodes_with_role(NodeRole::Current).count(), 1);
        assert_eq!(
            flow.edge("open->assigned").unwrap().avg_duration_seconds,
            Some(3600.0)
        );
        flow.validate().unwrap();
    }

    #[test]
    fn test_single_stage_yields_none() {
        let r = result(&["status"], vec![vec![json!("pending")], vec![json!("pending")]]);
        assert!(ProcessGraphBuilder::default().build(&r, None, "q").is_none());
        assert!(ProcessGraphBuilder::default()
            .build(&TabularResult::empty(), None, "q")
            .is_none());
    }

    #[test]
    fn test_title_case() {
        assert_eq!(title_case("in_progress"), "In Progress");
        assert_eq!(title_case("x"), "X");
    }
}
