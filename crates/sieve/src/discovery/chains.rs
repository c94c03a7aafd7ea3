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

use indexmap::IndexMap;
use lens_contracts::SchemaSnapshot;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};

/// Tables linked by foreign keys, starting from the table that carries the status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityChain {
    pub tables: Vec<String>,
    /// One `table.column -> table.column` entry per hop.
    pub links: Vec<String>,
}

impl EntityChain {
    pub fn hops(&self) -> usize {
        self.links.len()
    }
}

struct Link {
    to: String,
    label: String,
}

fn adjacency(snapshot: &SchemaSnapshot) -> IndexMap<String, Vec<Link>> {
    let mut graph: IndexMap<String, Vec<Link>> = snapshot
        .tables
        .iter()
        .map(|t| (t.name.to_lowercase(), Vec::new()))
        .collect();
    for table in &snapshot.tables {
        for fk in &table.foreign_keys {
            let from = table.name.to_lowercase();
            let to = fk.references_table.to_lowercase();
            if from == to || !graph.contains_key(&to) {
                continue;
            }
            let label = format!(
                "{}.{} -> {}.{}",
                table.name, fk.column, fk.references_table, fk.references_column
            );
            if let Some(links) = graph.get_mut(&from) {
                links.push(Link {
                    to: to.clone(),
                    label: label.clone(),
                });
            }
            if let Some(links) = graph.get_mut(&to) {
                links.push(Link { to: from, label });
            }
        }
    }
    graph
}

/// Breadth-first walk over foreign keys in both directions from `start`, up to
/// `max_depth` hops. Returns the path to the deepest table reached, first found on ties.
pub(crate) fn longest_chain(
    snapshot: &SchemaSnapshot,
    start: &str,
    max_depth: usize,
) -> EntityChain {
    let graph = adjacency(snapshot);
    let display: HashMap<String, String> = snapshot
        .tables
        .iter()
        .map(|t| (t.name.to_lowercase(), t.name.clone()))
        .collect();
    let name_of = |key: &str| display.get(key).cloned().unwrap_or_else(|| key.to_string());

    let origin = start.to_lowercase();
    let mut parent: HashMap<String, (String, String)> = HashMap::new();
    let mut depth: HashMap<String, usize> = HashMap::from([(origin.clone(), 0)]);
    let mut queue = VecDeque::from([origin.clone()]);
    let mut deepest = (origin.clone(), 0usize);

    while let Some(current) = queue.pop_front() {
        let d = depth.get(&current).copied().unwrap_or(0);
        if d > deepest.1 {
            deepest = (current.clone(), d);
        }
        if d >= max_depth {
            continue;
        }
        for link in graph.get(&current).map(Vec::as_slice).unwrap_or_default() {
            if depth.contains_key(&link.to) {
                continue;
            }
            depth.insert(link.to.clone(), d + 1);
            parent.insert(link.to.clone(), (current.clone(), link.label.clone()));
            queue.push_back(link.to.clone());
        }
    }

    let mut tables = vec![name_of(&deepest.0)];
    let mut links = Vec::new();
    let mut cursor = deepest.0;
    while let Some((prev, label)) = parent.get(&cursor) {
        links.push(label.clone());
        tables.push(name_of(prev));
        cursor = prev.clone();
    }
    tables.reverse();
    links.reverse();
    EntityChain { tables, links }
}
