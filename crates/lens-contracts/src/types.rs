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

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SqlDialect {
    #[default]
    #[serde(rename = "generic")]
    Generic,
    #[serde(rename = "postgres", alias = "postgresql")]
    Postgres,
    #[serde(rename = "mysql", alias = "mariadb")]
    MySql,
    #[serde(rename = "sqlite")]
    Sqlite,
    #[serde(rename = "mssql", alias = "sqlserver", alias = "tsql")]
    MsSql,
    #[serde(rename = "oracle")]
    Oracle,
    #[serde(rename = "snowflake")]
    Snowflake,
    #[serde(rename = "bigquery")]
    BigQuery,
    #[serde(rename = "duckdb")]
    DuckDb,
}

/// How a dialect spells bind variables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaceholderStyle {
    /// `?`
    QuestionMark,
    /// `$1`
    DollarNumbered,
    /// `:1`
    ColonNumbered,
    /// `@p1`
    AtNumbered,
}

/// How a dialect bounds the number of returned rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LimitStyle {
    Limit,
    Top,
    FetchFirst,
}

impl SqlDialect {
    pub const ALL: [SqlDialect; 9] = [
        SqlDialect::Generic,
        SqlDialect::Postgres,
        SqlDialect::MySql,
        SqlDialect::Sqlite,
        SqlDialect::MsSql,
        SqlDialect::Oracle,
        SqlDialect::Snowflake,
        SqlDialect::BigQuery,
        SqlDialect::DuckDb,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            SqlDialect::Generic => "generic",
            SqlDialect::Postgres => "postgres",
            SqlDialect::MySql => "mysql",
            SqlDialect::Sqlite => "sqlite",
            SqlDialect::MsSql => "mssql",
            SqlDialect::Oracle => "oracle",
            SqlDialect::Snowflake => "snowflake",
            SqlDialect::BigQuery => "bigquery",
            SqlDialect::DuckDb => "duckdb",
        }
    }

    pub fn placeholder_style(self) -> PlaceholderStyle {
        match self {
            SqlDialect::Postgres | SqlDialect::DuckDb => PlaceholderStyle::DollarNumbered,
            SqlDialect::Oracle => PlaceholderStyle::ColonNumbered,
            SqlDialect::MsSql => PlaceholderStyle::AtNumbered,
            SqlDialect::Generic
            | SqlDialect::MySql
            | SqlDialect::Sqlite
            | SqlDialect::Snowflake
            | SqlDialect::BigQuery => PlaceholderStyle::QuestionMark,
        }
    }

    pub fn limit_style(self) -> LimitStyle {
        match self {
            SqlDialect::MsSql => LimitStyle::Top,
            SqlDialect::Oracle => LimitStyle::FetchFirst,
            _ => LimitStyle::Limit,
        }
    }

    pub fn quote_identifier(self, ident: &str) -> String {
        match self {
            SqlDialect::MySql | SqlDialect::BigQuery => {
                format!("`{}`", ident.replace('`', "``"))
            }
            SqlDialect::MsSql => format!("[{}]", ident.replace(']', "]]")),
            _ => format!("\"{}\"", ident.replace('"', "\"\"")),
        }
    }
}

impl fmt::Display for SqlDialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SqlDialect {
    type Err = ContractError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "generic" | "ansi" | "" => Ok(SqlDialect::Generic),
            "postgres" | "postgresql" | "pg" => Ok(SqlDialect::Postgres),
            "mysql" | "mariadb" => Ok(SqlDialect::MySql),
            "sqlite" | "sqlite3" => Ok(SqlDialect::Sqlite),
            "mssql" | "sqlserver" | "tsql" => Ok(SqlDialect::MsSql),
            "oracle" => Ok(SqlDialect::Oracle),
            "snowflake" => Ok(SqlDialect::Snowflake),
            "bigquery" => Ok(SqlDialect::BigQuery),
            "duckdb" => Ok(SqlDialect::DuckDb),
            other => Err(ContractError::UnknownDialect(other.to_string())),
        }
    }
}

#[derive(Debug, Error)]
pub enum ContractError {
    #[error("Unknown SQL dialect: {0}")]
    UnknownDialect(String),

    #[error("Column not found: {0}")]
    ColumnNotFound(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GeneratorError {
    #[error("Generator unavailable: {0}")]
    Unavailable(String),

    #[error("Generator timed out")]
    Timeout,

    #[error("Malformed generator response: {0}")]
    Malformed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecutionError {
    #[error("Query timed out after {0}s")]
    Timeout(u64),

    #[error("Database error: {0}")]
    Database(String),
}

impl ExecutionError {
    pub fn database<S: Into<String>>(msg: S) -> Self {
        Self::Database(msg.into())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectorError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Schema introspection failed: {0}")]
    Introspection(String),

    #[error("Not connected")]
    NotConnected,

    #[error(transparent)]
    Execution(#[from] ExecutionError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dialect_aliases_parse() {
        assert_eq!("PostgreSQL".parse::<SqlDialect>().unwrap(), SqlDialect::Postgres);
        assert_eq!("sqlserver".parse::<SqlDialect>().unwrap(), SqlDialect::MsSql);
        assert_eq!(" mysql ".parse::<SqlDialect>().unwrap(), SqlDialect::MySql);
        assert!("cobol".parse::<SqlDialect>().is_err());
    }

    #[test]
    fn test_dialect_serde_names() {
        let json = serde_json::to_string(&SqlDialect::MsSql).unwrap();
        assert_eq!(json, "\"mssql\"");
        let parsed: SqlDialect = serde_json::from_str("\"postgresql\"").unwrap();
        assert_eq!(parsed, SqlDialect::Postgres);
    }

    #[test]
    fn test_quote_identifier_escapes() {
        assert_eq!(SqlDialect::Postgres.quote_identifier("order"), "\"order\"");
        assert_eq!(SqlDialect::MySql.quote_identifier("a`b"), "`a``b`");
        assert_eq!(SqlDialect::MsSql.quote_identifier("x]y"), "[x]]y]");
    }

    #[test]
    fn test_styles_per_dialect() {
        assert_eq!(SqlDialect::MsSql.limit_style(), LimitStyle::Top);
        assert_eq!(SqlDialect::Oracle.limit_style(), LimitStyle::FetchFirst);
        assert_eq!(SqlDialect::Sqlite.limit_style(), LimitStyle::Limit);
        assert_eq!(
            SqlDialect::Postgres.placeholder_style(),
            PlaceholderStyle::DollarNumbered
        );
    }
}
