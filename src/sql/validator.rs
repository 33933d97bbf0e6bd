//! Parses SQL and rejects forbidden statement kinds, duplicate table
//! aliases, and qualified column references not present in a provided
//! column map.

use std::collections::{HashMap, HashSet};
use std::ops::ControlFlow;

use sqlparser::ast::{Expr, Query, Select, SetExpr, Statement, TableFactor, TableWithJoins, Visit, Visitor};
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser;

use crate::error::SqlError;

const FORBIDDEN_KINDS: &[&str] = &["drop", "delete", "alter", "create"];

/// Validates SQL text against the rules described in the spec. An optional
/// allow-list of tables and an optional column map (table -> set(columns))
/// can be supplied at construction.
#[derive(Debug, Clone, Default)]
pub struct SqlValidator {
    allowed_tables: Option<HashSet<String>>,
}

impl SqlValidator {
    pub fn new() -> Self {
        Self {
            allowed_tables: None,
        }
    }

    pub fn with_allowed_tables(allowed_tables: HashSet<String>) -> Self {
        Self {
            allowed_tables: Some(allowed_tables),
        }
    }

    /// Returns the list of tables referenced by `sql` on success.
    pub fn validate(
        &self,
        sql: &str,
        columns: Option<&HashMap<String, HashSet<String>>>,
    ) -> Result<Vec<String>, SqlError> {
        let statements =
            Parser::parse_sql(&GenericDialect {}, sql).map_err(|e| SqlError::Parse(e.to_string()))?;

        let mut all_tables: Vec<(String, Option<String>)> = Vec::new();

        for statement in &statements {
            check_forbidden_statement(statement)?;
            collect_statement_tables(statement, &mut all_tables);
        }

        check_unique_aliases(&all_tables)?;

        let alias_map = build_alias_map(&all_tables);

        if let Some(columns) = columns {
            check_qualified_columns(&statements, &alias_map, columns)?;
        }

        let referenced: Vec<String> = {
            let mut seen = HashSet::new();
            all_tables
                .iter()
                .map(|(table, _)| table.clone())
                .filter(|table| seen.insert(table.to_lowercase()))
                .collect()
        };

        if let Some(allowed) = &self.allowed_tables {
            for table in &referenced {
                if !allowed.contains(table.as_str()) && !allowed.contains(&table.to_lowercase()) {
                    return Err(SqlError::TableNotAllowed(table.clone()));
                }
            }
        }

        Ok(referenced)
    }
}

/// Walks `statement` and every statement node nested inside it (an
/// `EXPLAIN`'s wrapped statement, a data-modifying CTE's body, a subquery
/// that itself wraps a statement, ...) via sqlparser's `Visitor::pre_visit_statement`
/// hook, so a forbidden kind can't hide behind a wrapper node the top-level
/// `match` on `statement_kind` never descends into.
struct ForbiddenStatementVisitor {
    violation: Option<String>,
}

impl Visitor for ForbiddenStatementVisitor {
    type Break = ();

    fn pre_visit_statement(&mut self, statement: &Statement) -> ControlFlow<Self::Break> {
        let kind = statement_kind(statement);
        if FORBIDDEN_KINDS.contains(&kind) {
            self.violation = Some(kind.to_string());
            return ControlFlow::Break(());
        }
        ControlFlow::Continue(())
    }
}

fn check_forbidden_statement(statement: &Statement) -> Result<(), SqlError> {
    let mut visitor = ForbiddenStatementVisitor { violation: None };
    let _ = statement.visit(&mut visitor);
    match visitor.violation {
        Some(kind) => Err(SqlError::ForbiddenStatement(kind)),
        None => Ok(()),
    }
}

fn statement_kind(statement: &Statement) -> &'static str {
    match statement {
        Statement::Query(_) => "select",
        Statement::Insert(_) => "insert",
        Statement::Update { .. } => "update",
        Statement::Delete(_) => "delete",
        Statement::Drop { .. } => "drop",
        Statement::CreateTable(_)
        | Statement::CreateView { .. }
        | Statement::CreateIndex(_)
        | Statement::CreateDatabase { .. }
        | Statement::CreateSchema { .. } => "create",
        Statement::AlterTable { .. } => "alter",
        _ => "other",
    }
}

fn collect_statement_tables(statement: &Statement, sink: &mut Vec<(String, Option<String>)>) {
    match statement {
        Statement::Query(query) => collect_query_tables(query, sink),
        Statement::Insert(insert) => {
            sink.push((insert.table.to_string(), None));
            if let Some(source) = &insert.source {
                collect_query_tables(source, sink);
            }
        }
        Statement::Update {
            table,
            from,
            selection: _,
            ..
        } => {
            collect_table_with_joins(table, sink);
            if let Some(from) = from {
                match from {
                    sqlparser::ast::UpdateTableFromKind::BeforeSet(twj)
                    | sqlparser::ast::UpdateTableFromKind::AfterSet(twj) => {
                        for t in twj {
                            collect_table_with_joins(t, sink);
                        }
                    }
                }
            }
        }
        Statement::Delete(delete) => {
            for twj in &delete.from {
                match twj {
                    sqlparser::ast::FromTable::WithFromKeyword(tables)
                    | sqlparser::ast::FromTable::WithoutKeyword(tables) => {
                        for t in tables {
                            collect_table_with_joins(t, sink);
                        }
                    }
                }
            }
        }
        Statement::Explain { statement, .. } => collect_statement_tables(statement, sink),
        _ => {}
    }
}

fn collect_query_tables(query: &Query, sink: &mut Vec<(String, Option<String>)>) {
    if let Some(with) = &query.with {
        for cte in &with.cte_tables {
            collect_query_tables(&cte.query, sink);
        }
    }
    collect_set_expr_tables(&query.body, sink);
}

fn collect_set_expr_tables(body: &SetExpr, sink: &mut Vec<(String, Option<String>)>) {
    match body {
        SetExpr::Select(select) => collect_select_tables(select, sink),
        SetExpr::Query(query) => collect_query_tables(query, sink),
        SetExpr::SetOperation { left, right, .. } => {
            collect_set_expr_tables(left, sink);
            collect_set_expr_tables(right, sink);
        }
        _ => {}
    }
}

fn collect_select_tables(select: &Select, sink: &mut Vec<(String, Option<String>)>) {
    for twj in &select.from {
        collect_table_with_joins(twj, sink);
    }
}

fn collect_table_with_joins(twj: &TableWithJoins, sink: &mut Vec<(String, Option<String>)>) {
    collect_table_factor(&twj.relation, sink);
    for join in &twj.joins {
        collect_table_factor(&join.relation, sink);
    }
}

fn collect_table_factor(factor: &TableFactor, sink: &mut Vec<(String, Option<String>)>) {
    match factor {
        TableFactor::Table { name, alias, .. } => {
            let alias_name = alias.as_ref().map(|a| a.name.value.clone());
            sink.push((name.to_string(), alias_name));
        }
        TableFactor::Derived { subquery, .. } => {
            collect_query_tables(subquery, sink);
        }
        TableFactor::NestedJoin {
            table_with_joins, ..
        } => collect_table_with_joins(table_with_joins, sink),
        _ => {}
    }
}

fn check_unique_aliases(tables: &[(String, Option<String>)]) -> Result<(), SqlError> {
    let mut seen: HashSet<String> = HashSet::new();
    for (_, alias) in tables {
        if let Some(alias) = alias {
            let lowered = alias.to_lowercase();
            if !seen.insert(lowered.clone()) {
                return Err(SqlError::DuplicateAlias(lowered));
            }
        }
    }
    Ok(())
}

fn build_alias_map(tables: &[(String, Option<String>)]) -> HashMap<String, String> {
    let mut map = HashMap::new();
    for (table, alias) in tables {
        match alias {
            Some(alias) => {
                map.insert(alias.to_lowercase(), table.clone());
            }
            None => {
                map.insert(table.to_lowercase(), table.clone());
            }
        }
    }
    map
}

struct ColumnCheckVisitor<'a> {
    alias_map: &'a HashMap<String, String>,
    columns: &'a HashMap<String, HashSet<String>>,
    violation: Option<(String, String)>,
}

impl Visitor for ColumnCheckVisitor<'_> {
    type Break = ();

    fn pre_visit_expr(&mut self, expr: &Expr) -> ControlFlow<Self::Break> {
        if self.violation.is_some() {
            return ControlFlow::Break(());
        }
        if let Expr::CompoundIdentifier(idents) = expr {
            if idents.len() >= 2 {
                let alias = idents[idents.len() - 2].value.to_lowercase();
                let column = idents[idents.len() - 1].value.clone();
                if let Some(table) = self.alias_map.get(&alias) {
                    if let Some(cols) = self.columns.get(table) {
                        if !cols.contains(&column) {
                            self.violation = Some((table.clone(), column));
                            return ControlFlow::Break(());
                        }
                    }
                }
            }
        }
        ControlFlow::Continue(())
    }
}

fn check_qualified_columns(
    statements: &[Statement],
    alias_map: &HashMap<String, String>,
    columns: &HashMap<String, HashSet<String>>,
) -> Result<(), SqlError> {
    for statement in statements {
        let mut visitor = ColumnCheckVisitor {
            alias_map,
            columns,
            violation: None,
        };
        let _ = statement.visit(&mut visitor);
        if let Some((table, column)) = visitor.violation {
            return Err(SqlError::UnknownColumn { table, column });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cols(pairs: &[(&str, &[&str])]) -> HashMap<String, HashSet<String>> {
        pairs
            .iter()
            .map(|(table, columns)| {
                (
                    table.to_string(),
                    columns.iter().map(|c| c.to_string()).collect(),
                )
            })
            .collect()
    }

    #[test]
    fn rejects_drop() {
        let v = SqlValidator::new();
        let err = v.validate("DROP TABLE users;", None).unwrap_err();
        assert!(matches!(err, SqlError::ForbiddenStatement(ref k) if k == "drop"));
    }

    #[test]
    fn rejects_delete() {
        let v = SqlValidator::new();
        assert!(v.validate("DELETE FROM users WHERE id = 1;", None).is_err());
    }

    #[test]
    fn rejects_alter() {
        let v = SqlValidator::new();
        assert!(v
            .validate("ALTER TABLE users ADD COLUMN x INT;", None)
            .is_err());
    }

    #[test]
    fn rejects_create() {
        let v = SqlValidator::new();
        assert!(v.validate("CREATE TABLE x (id INT);", None).is_err());
    }

    #[test]
    fn rejects_forbidden_statement_wrapped_in_explain() {
        let v = SqlValidator::new();
        let err = v
            .validate("EXPLAIN ANALYZE DELETE FROM users;", None)
            .unwrap_err();
        assert!(matches!(err, SqlError::ForbiddenStatement(ref k) if k == "delete"));
    }

    #[test]
    fn allows_explain_over_a_select() {
        let v = SqlValidator::new();
        assert!(v.validate("EXPLAIN SELECT * FROM task_transaction;", None).is_ok());
    }

    #[test]
    fn rejects_forbidden_statement_nested_in_subquery_list() {
        let v = SqlValidator::new();
        // Multiple statements separated by `;` are walked individually.
        let err = v
            .validate("SELECT 1; DROP TABLE users;", None)
            .unwrap_err();
        assert!(matches!(err, SqlError::ForbiddenStatement(ref k) if k == "drop"));
    }

    #[test]
    fn allows_select_insert_update() {
        let v = SqlValidator::new();
        assert!(v.validate("SELECT * FROM task_transaction LIMIT 100;", None).is_ok());
        assert!(v
            .validate("INSERT INTO task_transaction (id) VALUES (1);", None)
            .is_ok());
        assert!(v
            .validate("UPDATE task_transaction SET id = 1 WHERE id = 1;", None)
            .is_ok());
    }

    #[test]
    fn rejects_duplicate_case_insensitive_aliases() {
        let v = SqlValidator::new();
        let err = v
            .validate(
                "SELECT * FROM task_transaction A JOIN asset a ON A.id = a.task_id;",
                None,
            )
            .unwrap_err();
        assert!(matches!(err, SqlError::DuplicateAlias(_)));
    }

    #[test]
    fn rejects_unknown_qualified_column() {
        let v = SqlValidator::new();
        let column_map = cols(&[("task_transaction", &["id", "description"])]);
        let err = v
            .validate(
                "SELECT t.nonexistent FROM task_transaction t;",
                Some(&column_map),
            )
            .unwrap_err();
        assert!(matches!(err, SqlError::UnknownColumn { .. }));
    }

    #[test]
    fn allows_unqualified_columns_even_if_unknown() {
        let v = SqlValidator::new();
        let column_map = cols(&[("task_transaction", &["id"])]);
        assert!(v
            .validate("SELECT nonexistent FROM task_transaction;", Some(&column_map))
            .is_ok());
    }

    #[test]
    fn enforces_allow_list() {
        let allowed: HashSet<String> = ["task_transaction".to_string()].into_iter().collect();
        let v = SqlValidator::with_allowed_tables(allowed);
        assert!(v.validate("SELECT * FROM asset;", None).is_err());
        assert!(v.validate("SELECT * FROM task_transaction;", None).is_ok());
    }
}
