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

use lens_contracts::{
    DatabaseConnector, GeneratorError, ProcessLabel, ProcessLabeler, ProcessSummary,
};
use sieve::{
    ColumnRole, DiscoveryCache, FixtureConnector, LensConfig, ProcessDiscoveryEngine,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

const SHOP: &str = include_str!("fixtures/shop.json");

fn engine() -> ProcessDiscoveryEngine {
    let config = LensConfig::default();
    ProcessDiscoveryEngine::new(
        config.discovery.clone(),
        config.catalogue(),
        Arc::new(DiscoveryCache::new()),
    )
}

async fn connected() -> anyhow::Result<FixtureConnector> {
    let connector = FixtureConnector::from_json_str(SHOP)?;
    connector.connect().await?;
    Ok(connector)
}

#[tokio::test]
async fn discovers_history_and_order_processes() -> anyhow::Result<()> {
    let connector = connected().await?;
    let snapshot = connector.introspect_schema().await?;
    let processes = engine()
        .discover(&connector, &snapshot, &CancellationToken::new())
        .await?;

    assert_eq!(processes.len(), 2);
    let history = &processes[0];
    assert_eq!(history.name, "Order Status History lifecycle");
    assert_eq!(history.tables, vec!["order_status_history", "orders", "customers"]);
    assert_eq!(history.process_type.as_deref(), Some("order_fulfillment"));
    assert_eq!(history.status_column().map(|c| c.column.as_str()), Some("status"));
    assert!(history
        .columns
        .iter()
        .any(|c| c.role == ColumnRole::Identifier && c.column == "order_id"));
    let first = &history.transitions[0];
    assert_eq!((first.from.as_str(), first.to.as_str(), first.count), ("pending", "confirmed", 2));
    assert_eq!(history.transitions.len(), 4);

    // one row per order: grouped by its own key, with no invented movement
    let orders = &processes[1];
    assert_eq!(orders.name, "Orders lifecycle");
    let ids: Vec<&str> = orders
        .columns
        .iter()
        .filter(|c| c.role == ColumnRole::Identifier)
        .map(|c| c.column.as_str())
        .collect();
    assert_eq!(ids, vec!["id"]);
    assert!(orders.transitions.is_empty());
    assert!(history.score > processes[1].score);
    assert!(processes.iter().all(|p| (0.0..=1.0).contains(&p.score)));
    Ok(())
}

#[tokio::test]
async fn second_call_is_served_from_cache() -> anyhow::Result<()> {
    let connector = connected().await?;
    let snapshot = connector.introspect_schema().await?;
    let engine = engine();
    let cancel = CancellationToken::new();

    let first = engine.discover_cached(&connector, &snapshot, &cancel).await?;
    let second = engine.discover_cached(&connector, &snapshot, &cancel).await?;
    assert_eq!(first, second);
    let stats = engine.cache().stats();
    assert_eq!((stats.hits, stats.misses, stats.entries), (1, 1, 1));
    assert_eq!(engine.cached("fixture:shop", &snapshot), Some(first));
    Ok(())
}

#[tokio::test]
async fn cancelled_run_leaves_cache_untouched() -> anyhow::Result<()> {
    let connector = connected().await?;
    let snapshot = connector.introspect_schema().await?;
    let engine = engine();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = engine
        .discover_cached(&connector, &snapshot, &cancel)
        .await
        .unwrap_err();
    assert!(err.is_cancelled());
    assert!(engine.cache().is_empty());
    Ok(())
}

#[tokio::test]
async fn failed_samples_are_skipped_but_introspection_failure_aborts() -> anyhow::Result<()> {
    let connector = FixtureConnector::from_json_str(SHOP)?;
    let snapshot = connector.fixture().schema.clone();
    let engine = engine();

    // every sampling query fails while disconnected
    let processes = engine
        .discover(&connector, &snapshot, &CancellationToken::new())
        .await?;
    assert!(processes.is_empty());

    let err = engine
        .discover_live(&connector, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("schema introspection failed"));
    Ok(())
}

struct Naming;

#[async_trait::async_trait]
impl ProcessLabeler for Naming {
    async fn label(&self, summary: &ProcessSummary) -> Result<Option<ProcessLabel>, GeneratorError> {
        if summary.tables.first().map(String::as_str) == Some("order_status_history") {
            return Ok(Some(ProcessLabel {
                name: "Order fulfilment".to_string(),
                process_type: None,
            }));
        }
        Err(GeneratorError::Unavailable("labeler offline".to_string()))
    }
}

#[tokio::test]
async fn labeler_names_top_processes_only() -> anyhow::Result<()> {
    let connector = connected().await?;
    let snapshot = connector.introspect_schema().await?;
    let config = LensConfig::default();
    let engine = ProcessDiscoveryEngine::new(
        config.discovery.clone(),
        config.catalogue(),
        Arc::new(DiscoveryCache::new()),
    )
    .with_labeler(Arc::new(Naming));

    let processes = engine
        .discover(&connector, &snapshot, &CancellationToken::new())
        .await?;
    let history = processes
        .iter()
        .find(|p| p.tables[0] == "order_status_history")
        .unwrap();
    assert_eq!(history.name, "Order fulfilment");
    assert!(history.labelled);
    assert_eq!(history.process_type.as_deref(), Some("order_fulfillment"));
    assert_eq!(
        history.summary().status_column.as_deref(),
        Some("order_status_history.status")
    );

    let orders = processes.iter().find(|p| p.tables[0] == "orders").unwrap();
    assert_eq!(orders.name, "Orders lifecycle");
    assert!(!orders.labelled);
    Ok(())
}
