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

use lens_contracts::{LimitStyle, SqlDialect};
use serde::{Deserialize, Serialize};
use sqlparser::ast::{
    Expr, Fetch, LimitClause, Offset, OffsetRows, Query, SetExpr, Top, TopQuantity,
};
use sqlparser::dialect::{
    BigQueryDialect, Dialect, DuckDbDialect, GenericDialect, MsSqlDialect, MySqlDialect,
    PostgreSqlDialect, SQLiteDialect, SnowflakeDialect,
};
use sqlparser::parser::Parser;

pub(crate) fn parser_dialect(dialect: SqlDialect) -> Box<dyn Dialect> {
    match dialect {
        SqlDialect::Postgres => Box::new(PostgreSqlDialect {}),
        SqlDialect::MySql => Box::new(MySqlDialect {}),
        SqlDialect::Sqlite => Box::new(SQLiteDialect {}),
        SqlDialect::MsSql => Box::new(MsSqlDialect {}),
        SqlDialect::Snowflake => Box::new(SnowflakeDialect {}),
        SqlDialect::BigQuery => Box::new(BigQueryDialect {}),
        SqlDialect::DuckDb => Box::new(DuckDbDialect {}),
        // no dedicated grammar; the generic one accepts OFFSET .. ROWS FETCH FIRST
        SqlDialect::Generic | SqlDialect::Oracle => Box::new(GenericDialect {}),
    }
}

/// Top-level row bound of a query, as expression text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitBound {
    pub limit: Option<String>,
    pub offset: Option<String>,
    #[serde(default)]
    pub percent: bool,
    #[serde(default)]
    pub with_ties: bool,
}

impl LimitBound {
    /// Numeric row count when the bound is a literal.
    pub fn value(&self) -> Option<u64> {
        self.limit.as_deref().and_then(|l| l.trim().parse().ok())
    }
}

fn expr_text(expr: &Expr) -> String {
    let mut text = expr.to_string();
    while text.starts_with('(') && text.ends_with(')') && text.len() >= 2 {
        text = text[1..text.len() - 1].trim().to_string();
    }
    text
}

fn number_expr(dialect: &dyn Dialect, n: u64) -> Result<Expr, String> {
    Parser::new(dialect)
        .try_with_sql(&n.to_string())
        .and_then(|mut p| p.parse_expr())
        .map_err(|e| format!("could not build row-limit literal: {e}"))
}

pub(crate) fn limit_bound(query: &Query) -> Option<LimitBound> {
    let mut limit: Option<String> = None;
    let mut offset: Option<String> = None;
    let mut percent = false;
    let mut with_ties = false;

    match &query.limit_clause {
        Some(LimitClause::LimitOffset {
            limit: l, offset: o, ..
        }) => {
            limit = l.as_ref().map(expr_text);
            offset = o.as_ref().map(|o| expr_text(&o.value));
        }
        Some(LimitClause::OffsetCommaLimit { offset: o, limit: l }) => {
            limit = Some(expr_text(l));
            offset = Some(expr_text(o));
        }
        None => {}
    }
    if let Some(fetch) = &query.fetch {
        if limit.is_none() {
            limit = fetch.quantity.as_ref().map(expr_text);
        }
        percent |= fetch.percent;
        with_ties |= fetch.with_ties;
    }
    if let SetExpr::Select(select) = query.body.as_ref() {
        if let Some(top) = &select.top {
            if limit.is_none() {
                limit = top.quantity.as_ref().map(|q| match q {
                    TopQuantity::Expr(e) => expr_text(e),
                    TopQuantity::Constant(n) => n.to_string(),
                });
            }
            percent |= top.percent;
            with_ties |= top.with_ties;
        }
    }

    let offset = offset.filter(|o| o != "0");
    if limit.is_none() && offset.is_none() {
        return None;
    }
    Some(LimitBound {
        limit,
        offset,
        percent,
        with_ties,
    })
}

/// Row-limiting parts lifted out of a query so they can be re-emitted in another form.
#[derive(Debug, Default)]
struct RowBound {
    limit: Option<Expr>,
    offset: Option<Expr>,
    limit_by: Vec<Expr>,
    percent: bool,
    with_ties: bool,
}

impl RowBound {
    fn is_empty(&self) -> bool {
        self.limit.is_none() && self.offset.is_none()
    }
}

fn take_bound(query: &mut Query, dialect: &dyn Dialect) -> Result<RowBound, String> {
    let mut bound = RowBound::default();
    let mut sources = 0;
    match query.limit_clause.take() {
        Some(LimitClause::LimitOffset {
            limit,
            offset,
            limit_by,
        }) => {
            sources += usize::from(limit.is_some());
            bound.limit = limit;
            bound.offset = offset.map(|o| o.value);
            bound.limit_by = limit_by;
        }
        Some(LimitClause::OffsetCommaLimit { offset, limit }) => {
            sources += 1;
            bound.limit = Some(limit);
            bound.offset = Some(offset);
        }
        None => {}
    }
    if let Some(fetch) = query.fetch.take() {
        sources += usize::from(fetch.quantity.is_some());
        if bound.limit.is_none() {
            bound.limit = fetch.quantity;
        }
        bound.percent |= fetch.percent;
        bound.with_ties |= fetch.with_ties;
    }
    if let SetExpr::Select(select) = query.body.as_mut() {
        if let Some(top) = select.top.take() {
            sources += usize::from(top.quantity.is_some());
            if bound.limit.is_none() {
                bound.limit = match top.quantity {
                    Some(TopQuantity::Expr(e)) => Some(e),
                    Some(TopQuantity::Constant(n)) => Some(number_expr(dialect, n)?),
                    None => None,
                };
            }
            bound.percent |= top.percent;
            bound.with_ties |= top.with_ties;
        }
    }
    if sources > 1 {
        return Err("query carries more than one row-limiting clause".to_string());
    }
    Ok(bound)
}

/// Writes `bound` into `query` using the row-limiting form of `style`.
fn apply_bound(
    query: &mut Query,
    bound: RowBound,
    style: LimitStyle,
    dialect: &dyn Dialect,
) -> Result<(), String> {
    if bound.is_empty() {
        return Ok(());
    }
    match style {
        LimitStyle::Limit => {
            if bound.percent || bound.with_ties {
                return Err("PERCENT and WITH TIES bounds have no LIMIT equivalent".to_string());
            }
            query.limit_clause = Some(LimitClause::LimitOffset {
                limit: bound.limit,
                offset: bound.offset.map(|value| Offset {
                    value,
                    rows: OffsetRows::None,
                }),
                limit_by: bound.limit_by,
            });
        }
        LimitStyle::Top => {
            let plain_select = matches!(query.body.as_ref(), SetExpr::Select(_));
            if plain_select && bound.offset.is_none() && bound.limit_by.is_empty() {
                if let SetExpr::Select(select) = query.body.as_mut() {
                    select.top = Some(Top {
                        with_ties: bound.with_ties,
                        percent: bound.percent,
                        quantity: bound.limit.map(TopQuantity::Expr),
                    });
                }
            } else {
                // OFFSET .. FETCH needs an explicit offset in T-SQL
                let offset = match bound.offset {
                    Some(o) => o,
                    None => number_expr(dialect, 0)?,
                };
                fetch_form(query, bound.limit, Some(offset), bound.percent, bound.with_ties, bound.limit_by)?;
            }
        }
        LimitStyle::FetchFirst => {
            fetch_form(query, bound.limit, bound.offset, bound.percent, bound.with_ties, bound.limit_by)?;
        }
    }
    Ok(())
}

fn fetch_form(
    query: &mut Query,
    limit: Option<Expr>,
    offset: Option<Expr>,
    percent: bool,
    with_ties: bool,
    limit_by: Vec<Expr>,
) -> Result<(), String> {
    if !limit_by.is_empty() {
        return Err("LIMIT BY has no FETCH FIRST equivalent".to_string());
    }
    query.limit_clause = offset.map(|value| LimitClause::LimitOffset {
        limit: None,
        offset: Some(Offset {
            value,
            rows: OffsetRows::Rows,
        }),
        limit_by: Vec::new(),
    });
    query.fetch = limit.map(|quantity| Fetch {
        with_ties,
        percent,
        quantity: Some(quantity),
    });
    Ok(())
}

/// Moves the query's row bound into the target dialect's form.
pub(crate) fn retarget(
    query: &mut Query,
    target: SqlDialect,
    dialect: &dyn Dialect,
) -> Result<(), String> {
    let bound = take_bound(query, dialect)?;
    apply_bound(query, bound, target.limit_style(), dialect)
}

/// Adds a row count to a query that has none; an existing count is left untouched.
pub(crate) fn impose_limit(
    query: &mut Query,
    target: SqlDialect,
    dialect: &dyn Dialect,
    rows: u64,
) -> Result<(), String> {
    let mut bound = take_bound(query, dialect)?;
    if bound.limit.is_none() {
        bound.limit = Some(number_expr(dialect, rows)?);
    }
    apply_bound(query, bound, target.limit_style(), dialect)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlparser::ast::Statement;

    fn query(sql: &str, dialect: SqlDialect) -> Box<Query> {
        let d = parser_dialect(dialect);
        match Parser::parse_sql(d.as_ref(), sql).unwrap().remove(0) {
            Statement::Query(q) => q,
            other => panic!("not a query: {other}"),
        }
    }

    #[test]
    fn test_bound_extraction_forms() {
        let q = query("SELECT a FROM t LIMIT 10 OFFSET 5", SqlDialect::Postgres);
        let b = limit_bound(&q).unwrap();
        assert_eq!(b.limit.as_deref(), Some("10"));
        assert_eq!(b.offset.as_deref(), Some("5"));

        let q = query("SELECT a FROM t LIMIT 5, 10", SqlDialect::MySql);
        let b = limit_bound(&q).unwrap();
        assert_eq!((b.value(), b.offset.as_deref()), (Some(10), Some("5")));

        let q = query("SELECT TOP 7 a FROM t", SqlDialect::MsSql);
        assert_eq!(limit_bound(&q).unwrap().value(), Some(7));

        let q = query("SELECT a FROM t FETCH FIRST 3 ROWS ONLY", SqlDialect::Oracle);
        assert_eq!(limit_bound(&q).unwrap().value(), Some(3));

        assert!(limit_bound(&query("SELECT a FROM t", SqlDialect::Generic)).is_none());
    }

    #[test]
    fn test_limit_to_top() {
        let d = parser_dialect(SqlDialect::MsSql);
        let mut q = query("SELECT a FROM t ORDER BY a LIMIT 25", SqlDialect::Postgres);
        retarget(&mut q, SqlDialect::MsSql, d.as_ref()).unwrap();
        let sql = q.to_string();
        assert!(sql.contains("TOP (25)"), "{sql}");
        assert!(!sql.contains("LIMIT"), "{sql}");
    }

    #[test]
    fn test_limit_offset_to_fetch() {
        let d = parser_dialect(SqlDialect::Oracle);
        let mut q = query("SELECT a FROM t ORDER BY a LIMIT 10 OFFSET 20", SqlDialect::Postgres);
        retarget(&mut q, SqlDialect::Oracle, d.as_ref()).unwrap();
        let sql = q.to_string();
        assert!(sql.contains("OFFSET 20 ROWS"), "{sql}");
        assert!(sql.contains("FETCH FIRST 10 ROWS ONLY"), "{sql}");
        let b = limit_bound(&q).unwrap();
        assert_eq!((b.value(), b.offset.as_deref()), (Some(10), Some("20")));
    }

    #[test]
    fn test_top_percent_cannot_become_limit() {
        let d = parser_dialect(SqlDialect::Postgres);
        let mut q = query("SELECT TOP 10 PERCENT a FROM t", SqlDialect::MsSql);
        assert!(retarget(&mut q, SqlDialect::Postgres, d.as_ref()).is_err());
    }
}
