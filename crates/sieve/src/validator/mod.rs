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

mod limits;
mod scan;

pub use limits::LimitBound;
pub use scan::{sanitise_for_logging, sanitize_placeholders};

use crate::config::ValidatorConfig;
use crate::error::{Result, SieveError};
use lens_contracts::SqlDialect;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sqlparser::ast::{Query, Statement};
use sqlparser::parser::Parser;
use std::collections::HashSet;
use std::fmt;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationStage {
    Keyword,
    Pattern,
    Parse,
}

impl fmt::Display for ValidationStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ValidationStage::Keyword => "keyword",
            ValidationStage::Pattern => "pattern",
            ValidationStage::Parse => "parse",
        })
    }
}

/// Why a query was rejected. `rule` is the blocked keyword, the pattern id, or a parse code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationRejection {
    pub stage: ValidationStage,
    pub rule: String,
    pub detail: String,
}

impl fmt::Display for ValidationRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} stage ({}): {}", self.stage, self.rule, self.detail)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub passed: bool,
    pub rejection: Option<ValidationRejection>,
    pub source_dialect: SqlDialect,
    pub target_dialect: SqlDialect,
    /// Query text with bind variables rewritten for the target dialect.
    pub sanitized_query: Option<String>,
    pub transpiled_query: Option<String>,
    pub row_limit: Option<LimitBound>,
}

impl ValidationResult {
    fn rejected(
        source: SqlDialect,
        target: SqlDialect,
        stage: ValidationStage,
        rule: impl Into<String>,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            passed: false,
            rejection: Some(ValidationRejection {
                stage,
                rule: rule.into(),
                detail: detail.into(),
            }),
            source_dialect: source,
            target_dialect: target,
            sanitized_query: None,
            transpiled_query: None,
            row_limit: None,
        }
    }

    pub fn stage(&self) -> Option<ValidationStage> {
        self.rejection.as_ref().map(|r| r.stage)
    }
}

/// Three-stage query gate: keyword blocklist, structural patterns, then a full parse
/// and re-emission in the target dialect.
pub struct SqlValidator {
    keywords: HashSet<String>,
    patterns: Vec<(String, Regex)>,
    max_query_length: usize,
    log_truncate_length: usize,
    source_dialect: SqlDialect,
    target_dialect: SqlDialect,
}

impl SqlValidator {
    pub fn new(config: &ValidatorConfig) -> Result<Self> {
        let patterns = config
            .blocked_patterns
            .iter()
            .map(|p| {
                Regex::new(&p.pattern)
                    .map(|re| (p.id.clone(), re))
                    .map_err(|e| {
                        SieveError::config(format!("Invalid blocked pattern '{}': {e}", p.id))
                    })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            keywords: config
                .blocked_keywords
                .iter()
                .map(|k| k.trim().to_uppercase())
                .collect(),
            patterns,
            max_query_length: config.max_query_length,
            log_truncate_length: config.log_truncate_length,
            source_dialect: config.source_dialect,
            target_dialect: config.target_dialect,
        })
    }

    pub fn source_dialect(&self) -> SqlDialect {
        self.source_dialect
    }

    pub fn target_dialect(&self) -> SqlDialect {
        self.target_dialect
    }

    pub fn sanitise_for_logging(&self, query: &str) -> String {
        sanitise_for_logging(query, self.log_truncate_length)
    }

    /// Validates with the configured source and target dialects.
    pub fn check(&self, query: &str) -> ValidationResult {
        self.validate(query, self.source_dialect, self.target_dialect)
    }

    /// Never fails: malformed input is reported through the returned result.
    pub fn validate(
        &self,
        query: &str,
        source: SqlDialect,
        target: SqlDialect,
    ) -> ValidationResult {
        let outcome = self.run_stages(query, source, target);
        match &outcome.rejection {
            Some(r) => warn!(
                stage = %r.stage,
                rule = %r.rule,
                query = %self.sanitise_for_logging(query),
                "Query rejected"
            ),
            None => debug!(
                source = %source,
                target = %target,
                "Query passed validation"
            ),
        }
        outcome
    }

    fn run_stages(&self, query: &str, source: SqlDialect, target: SqlDialect) -> ValidationResult {
        let reject = |stage, rule: &str, detail: String| {
            ValidationResult::rejected(source, target, stage, rule, detail)
        };
        let trimmed = query
            .trim()
            .trim_end_matches(|c: char| c == ';' || c.is_whitespace());
        if trimmed.is_empty() {
            return reject(ValidationStage::Parse, "empty_query", "Query is empty".to_string());
        }
        if trimmed.len() > self.max_query_length {
            return reject(
                ValidationStage::Pattern,
                "too_long",
                format!("Query exceeds maximum length of {} characters", self.max_query_length),
            );
        }
        if trimmed.contains('\0') {
            return reject(
                ValidationStage::Pattern,
                "nul_byte",
                "Query contains null bytes".to_string(),
            );
        }

        if let Some(keyword) = scan::keyword_tokens(trimmed)
            .into_iter()
            .find(|t| self.keywords.contains(t))
        {
            return reject(
                ValidationStage::Keyword,
                &keyword,
                format!("Blocked keyword '{keyword}' is not allowed"),
            );
        }

        let view = scan::pattern_view(trimmed);
        if let Some((id, _)) = self.patterns.iter().find(|(_, re)| re.is_match(&view)) {
            return reject(
                ValidationStage::Pattern,
                id,
                format!("Query matches blocked pattern '{id}'"),
            );
        }

        let sanitized = sanitize_placeholders(trimmed, target);
        let mut parsed = match parse_single_query(&sanitized, source) {
            Ok(q) => q,
            Err((rule, detail)) => return reject(ValidationStage::Parse, rule, detail),
        };
        let source_bound = limits::limit_bound(&parsed);

        let target_grammar = limits::parser_dialect(target);
        if let Err(detail) = limits::retarget(&mut parsed, target, target_grammar.as_ref()) {
            return reject(ValidationStage::Parse, "limit_not_portable", detail);
        }
        let transpiled = parsed.to_string();

        let reparsed = match parse_single_query(&transpiled, target) {
            Ok(q) => q,
            Err((_, detail)) => {
                return reject(
                    ValidationStage::Parse,
                    "target_syntax_error",
                    format!("Transpiled query is not valid {target}: {detail}"),
                )
            }
        };
        let target_bound = limits::limit_bound(&reparsed);
        if source_bound != target_bound {
            return reject(
                ValidationStage::Parse,
                "limit_not_preserved",
                format!(
                    "Row limit changed during transpilation: {source_bound:?} became {target_bound:?}"
                ),
            );
        }

        ValidationResult {
            passed: true,
            rejection: None,
            source_dialect: source,
            target_dialect: target,
            sanitized_query: Some(sanitized),
            transpiled_query: Some(transpiled),
            row_limit: target_bound,
        }
    }

    /// Query text to execute: the transpiled query, with `row_limit` added when it
    /// carries no row count of its own. An existing count is never changed.
    pub fn enforce_row_limit(&self, validated: &ValidationResult, row_limit: usize) -> Option<String> {
        if !validated.passed {
            return None;
        }
        let sql = validated.transpiled_query.clone()?;
        if validated.row_limit.as_ref().is_some_and(|b| b.limit.is_some()) {
            return Some(sql);
        }
        let target = validated.target_dialect;
        let grammar = limits::parser_dialect(target);
        let limited = parse_single_query(&sql, target)
            .map_err(|(_, detail)| detail)
            .and_then(|mut q| {
                limits::impose_limit(&mut q, target, grammar.as_ref(), row_limit as u64)?;
                Ok(q.to_string())
            });
        match limited {
            Ok(text) => Some(text),
            Err(detail) => {
                warn!(detail = %detail, "Could not add row limit; executor limit still applies");
                Some(sql)
            }
        }
    }
}

fn parse_single_query(
    sql: &str,
    dialect: SqlDialect,
) -> std::result::Result<Box<Query>, (&'static str, String)> {
    let grammar = limits::parser_dialect(dialect);
    let mut statements = Parser::parse_sql(grammar.as_ref(), sql)
        .map_err(|e| ("syntax_error", format!("Invalid SQL syntax: {e}")))?;
    if statements.len() != 1 {
        return Err((
            "multiple_statements",
            format!("Expected exactly one statement, found {}", statements.len()),
        ));
    }
    match statements.remove(0) {
        Statement::Query(query) => Ok(query),
        _ => Err((
            "not_a_query",
            "Only read-only SELECT queries are allowed".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validator() -> SqlValidator {
        SqlValidator::new(&ValidatorConfig::default()).unwrap()
    }

    fn rule(result: &ValidationResult) -> (ValidationStage, String) {
        let r = result.rejection.as_ref().unwrap();
        (r.stage, r.rule.clone())
    }

    #[test]
    fn test_keyword_stage_catches_casing_and_spacing() {
        let v = validator();
        for q in [
            "dElEtE FROM orders",
            "DROP\tTABLE orders",
            "Drop/**/Table orders",
            "SELECT 1; update orders set x = 1",
        ] {
            let result = v.validate(q, SqlDialect::Generic, SqlDialect::Generic);
            assert!(!result.passed, "{q}");
            assert_eq!(result.stage(), Some(ValidationStage::Keyword), "{q}");
        }
    }

    #[test]
    fn test_keywords_inside_literals_and_names_are_allowed() {
        let v = validator();
        let result = v.validate(
            "SELECT order_id, updated_at FROM orders WHERE status = 'deleted'",
            SqlDialect::Postgres,
            SqlDialect::Postgres,
        );
        assert!(result.passed, "{:?}", result.rejection);
    }

    #[test]
    fn test_read_only_lookalikes_pass() {
        let v = validator();
        for q in [
            "SELECT REPLACE(name, 'a', 'b') FROM customers",
            "SELECT \"order#\" FROM orders",
            "SELECT data #> '{a,b}' FROM docs",
            "SELECT data #>> '{a}' FROM docs",
        ] {
            let result = v.validate(q, SqlDialect::Postgres, SqlDialect::Postgres);
            assert!(result.passed, "{q}: {:?}", result.rejection);
        }
    }

    #[test]
    fn test_pattern_stage() {
        let v = validator();
        let cases = [
            ("SELECT 1; SELECT 2", "stacked_statement"),
            ("SELECT a FROM t -- sneaky", "line_comment"),
            ("SELECT pg_sleep(10)", "sleep_call"),
            ("SELECT * FROM information_schema.tables", "system_catalog"),
            ("SELECT a INTO backup_table FROM t", "select_into"),
            ("REPLACE INTO t VALUES (1)", "replace_statement"),
            ("replace into t select * from s", "replace_statement"),
            ("SELECT a FROM t # trailing", "hash_comment"),
            ("#note\nSELECT a FROM t", "hash_comment"),
        ];
        for (q, id) in cases {
            let result = v.validate(q, SqlDialect::Postgres, SqlDialect::Postgres);
            assert_eq!(rule(&result), (ValidationStage::Pattern, id.to_string()), "{q}");
        }
        let long = format!("SELECT {}", "a, ".repeat(5000));
        assert_eq!(rule(&v.check(&long)).1, "too_long");
    }

    #[test]
    fn test_parse_stage_reports_instead_of_failing() {
        let v = validator();
        let result = v.check("SELEC oops FROM");
        assert_eq!(rule(&result), (ValidationStage::Parse, "syntax_error".to_string()));
        assert_eq!(rule(&v.check("   ;  ")).1, "empty_query");
        assert_eq!(rule(&v.check("SHOW TABLES")).0, ValidationStage::Parse);
    }

    #[test]
    fn test_trailing_semicolon_is_trimmed() {
        let result = validator().check("SELECT a FROM t;  ");
        assert!(result.passed, "{:?}", result.rejection);
    }

    #[test]
    fn test_limit_preserved_across_dialects() {
        let v = validator();
        let result = v.validate(
            "SELECT id FROM orders ORDER BY id LIMIT 50",
            SqlDialect::Postgres,
            SqlDialect::MsSql,
        );
        assert!(result.passed, "{:?}", result.rejection);
        assert_eq!(result.row_limit.as_ref().and_then(LimitBound::value), Some(50));
        assert!(result.transpiled_query.unwrap().contains("TOP (50)"));

        let result = v.validate(
            "SELECT TOP 10 id FROM orders ORDER BY id",
            SqlDialect::MsSql,
            SqlDialect::Postgres,
        );
        assert!(result.passed, "{:?}", result.rejection);
        assert!(result.transpiled_query.unwrap().contains("LIMIT 10"));
    }

    #[test]
    fn test_placeholders_rewritten_for_target() {
        let result = validator().validate(
            "SELECT id FROM orders WHERE status = ? AND total > ?",
            SqlDialect::MySql,
            SqlDialect::Postgres,
        );
        assert!(result.passed, "{:?}", result.rejection);
        assert_eq!(
            result.sanitized_query.as_deref(),
            Some("SELECT id FROM orders WHERE status = $1 AND total > $2")
        );
        assert!(result.transpiled_query.unwrap().contains("$2"));
    }

    #[test]
    fn test_enforce_row_limit() {
        let v = validator();
        let unbounded = v.validate("SELECT id FROM orders", SqlDialect::Generic, SqlDialect::Postgres);
        let sql = v.enforce_row_limit(&unbounded, 1000).unwrap();
        assert!(sql.ends_with("LIMIT 1000"), "{sql}");

        let bounded = v.validate(
            "SELECT id FROM orders LIMIT 5",
            SqlDialect::Generic,
            SqlDialect::Postgres,
        );
        let sql = v.enforce_row_limit(&bounded, 1000).unwrap();
        assert!(sql.ends_with("LIMIT 5"), "{sql}");

        let rejected = v.check("DELETE FROM orders");
        assert!(v.enforce_row_limit(&rejected, 1000).is_none());
    }
}
