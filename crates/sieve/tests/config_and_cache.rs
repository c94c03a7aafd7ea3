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

use lens_contracts::SqlDialect;
use sieve::{DiscoveryCache, LensConfig, ManualClock, SieveError, CONFIG_ENV_VAR};
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tokio_test::{assert_err, assert_ok};

const YAML: &str = r#"
correction:
  max_attempts: 3
  row_limit: 250
validator:
  source_dialect: mysql
  target_dialect: mssql
discovery:
  cache_ttl_seconds: 60
  weights:
    column: 1.0
    chain: 0.0
    transitions: 1.0
"#;

#[test]
fn yaml_file_and_env_var_load_the_same_config() -> anyhow::Result<()> {
    let mut file = tempfile::NamedTempFile::new()?;
    file.write_all(YAML.as_bytes())?;

    let from_file = assert_ok!(LensConfig::from_yaml_file(file.path()));
    assert_eq!(from_file.correction.max_attempts, 3);
    assert_eq!(from_file.correction.row_limit, 250);
    assert_eq!(from_file.correction.query_timeout_seconds, 30);
    assert_eq!(from_file.validator.source_dialect, SqlDialect::MySql);
    assert_eq!(from_file.validator.target_dialect, SqlDialect::MsSql);
    assert_eq!(from_file.discovery.cache_ttl(), Duration::from_secs(60));
    assert_eq!(from_file.discovery.weights.total(), 2.0);

    std::env::set_var(CONFIG_ENV_VAR, file.path());
    let from_env = LensConfig::load()?;
    assert_eq!(from_env, from_file);

    std::env::set_var(CONFIG_ENV_VAR, file.path().with_extension("missing"));
    assert_eq!(LensConfig::load()?, LensConfig::default());
    std::env::remove_var(CONFIG_ENV_VAR);
    Ok(())
}

#[test]
fn invalid_yaml_values_are_rejected() -> anyhow::Result<()> {
    let mut file = tempfile::NamedTempFile::new()?;
    file.write_all(b"correction:\n  row_limit: 0\n")?;
    let err = assert_err!(LensConfig::from_yaml_file(file.path()));
    assert!(matches!(err, SieveError::Config(_)));

    let err = LensConfig::from_yaml_str("correction:\n  max_attempts: many\n").unwrap_err();
    assert!(matches!(err, SieveError::Yaml(_)));

    assert!(LensConfig::from_yaml_file("/definitely/not/here.yaml").is_err());
    Ok(())
}

#[test]
fn cache_entries_expire_on_the_injected_clock() {
    let clock = Arc::new(ManualClock::new());
    let cache: DiscoveryCache<Vec<String>> = DiscoveryCache::with_clock(clock.clone());
    let ttl = Duration::from_secs(600);

    cache.set("shop", vec!["Orders lifecycle".to_string()], ttl);
    cache.set("crm", vec!["Deal lifecycle".to_string()], Duration::from_secs(60));

    clock.advance(Duration::from_secs(599));
    assert_eq!(cache.get("shop"), Some(vec!["Orders lifecycle".to_string()]));
    assert_eq!(cache.get("crm"), None);

    clock.advance(Duration::from_secs(1));
    assert_eq!(cache.get("shop"), None);
    assert!(cache.is_empty());

    let stats = cache.stats();
    assert_eq!((stats.hits, stats.misses, stats.evictions), (1, 2, 2));
}

#[test]
fn replacing_an_entry_restarts_its_ttl() {
    let clock = Arc::new(ManualClock::new());
    let cache: DiscoveryCache<u32> = DiscoveryCache::with_clock(clock.clone());
    cache.set("k", 1, Duration::from_secs(10));
    clock.advance(Duration::from_secs(8));
    cache.set("k", 2, Duration::from_secs(10));
    clock.advance(Duration::from_secs(8));
    assert_eq!(cache.get("k"), Some(2));
    assert_eq!(cache.purge_expired(), 0);
    clock.advance(Duration::from_secs(2));
    assert_eq!(cache.purge_expired(), 1);
    assert!(!cache.invalidate("k"));
}
