//! Compiles a [`QueryState`] into dialect-specific SQL and parameters.
//!
//! Compilation is a pure function of `(dialect, state, operation)`. The
//! returned parameter list always has exactly one entry per placeholder in
//! the SQL text, and placeholder numbering restarts with every call.

use std::collections::BTreeSet;

use crate::dialect::Dialect;
use crate::executor::Row;
use crate::query::aggregates::Aggregate;
use crate::query::state::{Condition, QueryState, WhereClause};
use crate::value::Value;

/// The statement to produce from a query state.
#[derive(Debug, Clone, Copy)]
pub enum Operation<'a> {
    /// SELECT with the state's columns, ordering and paging.
    Select,
    /// `SELECT COUNT(*)` with ordering and paging dropped.
    Count,
    /// `SELECT EXISTS(SELECT 1 ... LIMIT 1)`.
    Exists,
    /// Any other aggregate, with ordering and paging dropped.
    Aggregate(&'a Aggregate),
    /// Single-row INSERT (value-returning where supported).
    Insert(&'a Row),
    /// Multi-row INSERT without value return.
    InsertBatch(&'a [Row]),
    /// UPDATE of the filtered rows (value-returning where supported).
    Update(&'a Row),
    /// DELETE of the filtered rows (value-returning where supported).
    Delete,
}

/// Column alias carried by every derived single-value form.
pub const AGGREGATE_ALIAS: &str = "aggregate";

/// Compiles `state` for `operation` in the given dialect.
pub fn compile(
    dialect: &dyn Dialect,
    state: &QueryState,
    operation: Operation<'_>,
) -> (String, Vec<Value>) {
    let mut compiler = Compiler {
        dialect,
        params: Vec::new(),
    };
    let sql = match operation {
        Operation::Select => compiler.select(state),
        Operation::Count => compiler.count(state),
        Operation::Exists => compiler.exists(state),
        Operation::Aggregate(aggregate) => compiler.aggregate(state, &aggregate.to_sql()),
        Operation::Insert(row) => compiler.insert(&state.table, row),
        Operation::InsertBatch(rows) => compiler.insert_batch(&state.table, rows),
        Operation::Update(row) => compiler.update(state, row),
        Operation::Delete => compiler.delete(state),
    };
    (sql, compiler.params)
}

struct Compiler<'d> {
    dialect: &'d dyn Dialect,
    params: Vec<Value>,
}

impl Compiler<'_> {
    fn bind(&mut self, value: Value) -> String {
        self.params.push(value);
        self.dialect.placeholder(self.params.len())
    }

    fn select(&mut self, state: &QueryState) -> String {
        let mut sql = String::from("SELECT ");
        if state.distinct {
            sql.push_str("DISTINCT ");
        }
        if state.columns.is_empty() {
            sql.push('*');
        } else {
            sql.push_str(&state.columns.join(", "));
        }
        sql.push_str(" FROM ");
        sql.push_str(&state.from_clause());
        self.push_body(&mut sql, state);

        if !state.orders.is_empty() {
            let parts: Vec<String> = state.orders.iter().map(|o| o.to_sql()).collect();
            sql.push_str(" ORDER BY ");
            sql.push_str(&parts.join(", "));
        }

        match (state.limit, state.offset) {
            (Some(limit), _) => sql.push_str(&format!(" LIMIT {limit}")),
            (None, Some(_)) => {
                if let Some(all) = self.dialect.offset_without_limit() {
                    sql.push_str(&format!(" LIMIT {all}"));
                }
            }
            (None, None) => {}
        }
        if let Some(offset) = state.offset {
            sql.push_str(&format!(" OFFSET {offset}"));
        }

        if let Some(clause) = state.lock.and_then(|mode| self.dialect.lock_clause(mode)) {
            sql.push(' ');
            sql.push_str(clause);
        }
        sql
    }

    /// Joins, WHERE, GROUP BY and HAVING: the part shared by every read form.
    fn push_body(&mut self, sql: &mut String, state: &QueryState) {
        for join in &state.joins {
            sql.push(' ');
            sql.push_str(join.kind.keyword());
            sql.push(' ');
            sql.push_str(&join.table);
            if let Some(on) = &join.on {
                sql.push_str(" ON ");
                sql.push_str(on);
            }
        }

        self.push_where(sql, &state.wheres);

        if !state.groups.is_empty() {
            sql.push_str(" GROUP BY ");
            sql.push_str(&state.groups.join(", "));
        }

        if !state.havings.is_empty() {
            let parts: Vec<String> = state
                .havings
                .iter()
                .map(|having| {
                    self.params.extend(having.params.iter().cloned());
                    having.sql.clone()
                })
                .collect();
            sql.push_str(" HAVING ");
            sql.push_str(&parts.join(" AND "));
        }
    }

    fn push_where(&mut self, sql: &mut String, wheres: &[WhereClause]) {
        let clause = self.where_list(wheres);
        if !clause.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clause);
        }
    }

    /// Compiles a clause list. The first emitted clause carries no connective.
    fn where_list(&mut self, clauses: &[WhereClause]) -> String {
        let mut out = String::new();
        for clause in clauses {
            let fragment = match clause {
                WhereClause::Basic {
                    column, condition, ..
                } => self.condition(column, condition),
                WhereClause::Raw { sql, params, .. } => {
                    self.params.extend(params.iter().cloned());
                    sql.clone()
                }
                WhereClause::Nested { clauses, .. } => {
                    let inner = self.where_list(clauses);
                    if inner.is_empty() {
                        continue;
                    }
                    format!("({inner})")
                }
            };
            if !out.is_empty() {
                out.push(' ');
                out.push_str(clause.combinator().keyword());
                out.push(' ');
            }
            out.push_str(&fragment);
        }
        out
    }

    fn condition(&mut self, column: &str, condition: &Condition) -> String {
        use crate::query::state::CompareOp;

        match condition {
            Condition::Compare(CompareOp::Eq, Value::Null) => format!("{column} IS NULL"),
            Condition::Compare(CompareOp::Ne, Value::Null) => format!("{column} IS NOT NULL"),
            Condition::Compare(op, value) => {
                let placeholder = self.bind(value.clone());
                format!("{column} {op} {placeholder}")
            }
            Condition::In(values) if values.is_empty() => String::from("0 = 1"),
            Condition::NotIn(values) if values.is_empty() => String::from("1 = 1"),
            Condition::In(values) => {
                let placeholders = self.bind_list(values);
                format!("{column} IN ({placeholders})")
            }
            Condition::NotIn(values) => {
                let placeholders = self.bind_list(values);
                format!("{column} NOT IN ({placeholders})")
            }
            Condition::IsNull => format!("{column} IS NULL"),
            Condition::IsNotNull => format!("{column} IS NOT NULL"),
            Condition::Between(low, high) => {
                let low = self.bind(low.clone());
                let high = self.bind(high.clone());
                format!("{column} BETWEEN {low} AND {high}")
            }
            Condition::NotBetween(low, high) => {
                let low = self.bind(low.clone());
                let high = self.bind(high.clone());
                format!("{column} NOT BETWEEN {low} AND {high}")
            }
        }
    }

    fn bind_list(&mut self, values: &[Value]) -> String {
        let placeholders: Vec<String> = values.iter().map(|v| self.bind(v.clone())).collect();
        placeholders.join(", ")
    }

    fn count(&mut self, state: &QueryState) -> String {
        if state.distinct || !state.groups.is_empty() {
            let inner = self.select(&unpaged(state));
            return format!("SELECT COUNT(*) AS {AGGREGATE_ALIAS} FROM ({inner}) AS aggregate_table");
        }
        self.aggregate(state, "COUNT(*)")
    }

    fn aggregate(&mut self, state: &QueryState, expression: &str) -> String {
        let mut sql = format!("SELECT {expression} AS {AGGREGATE_ALIAS} FROM ");
        sql.push_str(&state.from_clause());
        self.push_body(&mut sql, state);
        sql
    }

    fn exists(&mut self, state: &QueryState) -> String {
        let mut probe = unpaged(state);
        probe.columns = vec![String::from("1")];
        probe.distinct = false;
        probe.limit = Some(1);
        let inner = self.select(&probe);
        format!("SELECT EXISTS({inner}) AS {AGGREGATE_ALIAS}")
    }

    fn insert(&mut self, table: &str, row: &Row) -> String {
        let mut sql = if row.is_empty() {
            format!("INSERT INTO {table} DEFAULT VALUES")
        } else {
            let columns: Vec<&str> = row.keys().map(String::as_str).collect();
            let placeholders: Vec<String> = row.values().map(|v| self.bind(v.clone())).collect();
            format!(
                "INSERT INTO {table} ({}) VALUES ({})",
                columns.join(", "),
                placeholders.join(", ")
            )
        };
        self.push_returning(&mut sql);
        sql
    }

    fn insert_batch(&mut self, table: &str, rows: &[Row]) -> String {
        let columns: BTreeSet<&str> = rows
            .iter()
            .flat_map(|row| row.keys().map(String::as_str))
            .collect();
        if columns.is_empty() {
            return format!("INSERT INTO {table} DEFAULT VALUES");
        }

        let tuples: Vec<String> = rows
            .iter()
            .map(|row| {
                let placeholders: Vec<String> = columns
                    .iter()
                    .map(|column| self.bind(row.get(*column).cloned().unwrap_or(Value::Null)))
                    .collect();
                format!("({})", placeholders.join(", "))
            })
            .collect();

        format!(
            "INSERT INTO {table} ({}) VALUES {}",
            columns.into_iter().collect::<Vec<_>>().join(", "),
            tuples.join(", ")
        )
    }

    fn update(&mut self, state: &QueryState, row: &Row) -> String {
        let assignments: Vec<String> = row
            .iter()
            .map(|(column, value)| {
                let placeholder = self.bind(value.clone());
                format!("{column} = {placeholder}")
            })
            .collect();
        let mut sql = format!("UPDATE {} SET {}", state.table, assignments.join(", "));
        self.push_where(&mut sql, &state.wheres);
        self.push_returning(&mut sql);
        sql
    }

    fn delete(&mut self, state: &QueryState) -> String {
        let mut sql = format!("DELETE FROM {}", state.table);
        self.push_where(&mut sql, &state.wheres);
        self.push_returning(&mut sql);
        sql
    }

    fn push_returning(&self, sql: &mut String) {
        if self.dialect.supports_returning() {
            sql.push_str(" RETURNING *");
        }
    }
}

/// Copy of `state` without ordering, paging or locking.
fn unpaged(state: &QueryState) -> QueryState {
    let mut copy = state.clone();
    copy.orders.clear();
    copy.limit = None;
    copy.offset = None;
    copy.lock = None;
    copy
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::{GenericDialect, MySqlDialect, PostgresDialect};
    use crate::query::state::{
        Combinator, CompareOp, Having, JoinClause, JoinKind, LockMode, OrderClause,
    };
    use crate::value::ToValue;

    fn basic(combinator: Combinator, column: &str, condition: Condition) -> WhereClause {
        WhereClause::Basic {
            combinator,
            column: column.to_string(),
            condition,
        }
    }

    fn eq(column: &str, value: impl ToValue) -> WhereClause {
        basic(
            Combinator::And,
            column,
            Condition::Compare(CompareOp::Eq, value.to_value()),
        )
    }

    fn count_question_marks(sql: &str) -> usize {
        sql.matches('?').count()
    }

    fn count_numbered(sql: &str) -> usize {
        sql.match_indices('$')
            .filter(|(i, _)| {
                sql[i + 1..]
                    .chars()
                    .next()
                    .is_some_and(|c| c.is_ascii_digit())
            })
            .count()
    }

    fn rich_state() -> QueryState {
        let mut state = QueryState::new("users");
        state.wheres = vec![
            eq("status", "active"),
            basic(
                Combinator::Or,
                "id",
                Condition::In(vec![1.to_value(), 2.to_value(), 3.to_value()]),
            ),
            WhereClause::Nested {
                combinator: Combinator::And,
                clauses: vec![
                    basic(
                        Combinator::And,
                        "age",
                        Condition::Between(18.to_value(), 65.to_value()),
                    ),
                    basic(Combinator::Or, "deleted_at", Condition::IsNull),
                ],
            },
            WhereClause::Raw {
                combinator: Combinator::And,
                sql: "score > ?".into(),
                params: vec![10.to_value()],
            },
        ];
        state
    }

    #[test]
    fn test_select_all() {
        let state = QueryState::new("users");
        let (sql, params) = compile(&GenericDialect, &state, Operation::Select);
        assert_eq!(sql, "SELECT * FROM users");
        assert!(params.is_empty());
    }

    #[test]
    fn test_first_clause_has_no_combinator() {
        let mut state = QueryState::new("users");
        state.wheres = vec![
            basic(
                Combinator::Or,
                "a",
                Condition::Compare(CompareOp::Eq, 1.to_value()),
            ),
            basic(
                Combinator::Or,
                "b",
                Condition::Compare(CompareOp::Gt, 2.to_value()),
            ),
        ];
        let (sql, _) = compile(&GenericDialect, &state, Operation::Select);
        assert_eq!(sql, "SELECT * FROM users WHERE a = ? OR b > ?");
    }

    #[test]
    fn test_nested_group_resets_combinator() {
        let (sql, params) = compile(&GenericDialect, &rich_state(), Operation::Select);
        assert_eq!(
            sql,
            "SELECT * FROM users WHERE status = ? OR id IN (?, ?, ?) \
             AND (age BETWEEN ? AND ? OR deleted_at IS NULL) AND score > ?"
        );
        assert_eq!(params.len(), 7);
        assert_eq!(params.len(), count_question_marks(&sql));
    }

    #[test]
    fn test_raw_params_keep_caller_order() {
        let mut state = QueryState::new("t");
        state.wheres = vec![
            eq("a", 1),
            WhereClause::Raw {
                combinator: Combinator::And,
                sql: "b BETWEEN ? AND ?".into(),
                params: vec![5.to_value(), 9.to_value()],
            },
            eq("c", 3),
        ];
        let (_, params) = compile(&GenericDialect, &state, Operation::Select);
        assert_eq!(
            params,
            vec![Value::Int(1), Value::Int(5), Value::Int(9), Value::Int(3)]
        );
    }

    #[test]
    fn test_postgres_numbering_restarts_per_compile() {
        let state = rich_state();
        let (sql, params) = compile(&PostgresDialect, &state, Operation::Select);
        assert!(sql.starts_with("SELECT * FROM users WHERE status = $1 OR id IN ($2, $3, $4)"));
        assert!(sql.contains("age BETWEEN $5 AND $6"));
        // The raw fragment brings its own marker.
        assert_eq!(count_numbered(&sql), params.len() - 1);

        let (again, _) = compile(&PostgresDialect, &state, Operation::Select);
        assert_eq!(sql, again);
    }

    #[test]
    fn test_placeholder_count_matches_params() {
        let mut state = rich_state();
        state.havings.push(Having {
            sql: "COUNT(*) > ?".into(),
            params: vec![1.to_value()],
        });
        state.groups.push("status".into());
        for operation in [Operation::Select, Operation::Count, Operation::Exists] {
            let (sql, params) = compile(&GenericDialect, &state, operation);
            assert_eq!(count_question_marks(&sql), params.len(), "{sql}");
        }
    }

    #[test]
    fn test_empty_in_lists() {
        let mut state = QueryState::new("posts");
        state.wheres = vec![
            basic(Combinator::And, "user_id", Condition::In(vec![])),
            basic(Combinator::And, "id", Condition::NotIn(vec![])),
        ];
        let (sql, params) = compile(&GenericDialect, &state, Operation::Select);
        assert_eq!(sql, "SELECT * FROM posts WHERE 0 = 1 AND 1 = 1");
        assert!(params.is_empty());
    }

    #[test]
    fn test_null_equality_becomes_is_null() {
        let mut state = QueryState::new("posts");
        state.wheres = vec![eq("user_id", Value::Null)];
        let (sql, params) = compile(&GenericDialect, &state, Operation::Select);
        assert_eq!(sql, "SELECT * FROM posts WHERE user_id IS NULL");
        assert!(params.is_empty());
    }

    #[test]
    fn test_full_select_shape() {
        let mut state = QueryState::new("posts");
        state.alias = Some("p".into());
        state.distinct = true;
        state.columns = vec!["p.id".into(), "p.title".into()];
        state.joins.push(JoinClause {
            kind: JoinKind::Left,
            table: "users".into(),
            on: Some("users.id = p.user_id".into()),
        });
        state.wheres.push(eq("users.active", true));
        state.orders.push(OrderClause::parse("-p.id"));
        state.limit = Some(10);
        state.offset = Some(20);
        state.lock = Some(LockMode::Update);
        let (sql, params) = compile(&GenericDialect, &state, Operation::Select);
        assert_eq!(
            sql,
            "SELECT DISTINCT p.id, p.title FROM posts AS p \
             LEFT JOIN users ON users.id = p.user_id WHERE users.active = ? \
             ORDER BY p.id DESC LIMIT 10 OFFSET 20 FOR UPDATE"
        );
        assert_eq!(params, vec![Value::Bool(true)]);
    }

    #[test]
    fn test_offset_without_limit() {
        let mut state = QueryState::new("t");
        state.offset = Some(5);
        let (generic, _) = compile(&GenericDialect, &state, Operation::Select);
        assert_eq!(generic, "SELECT * FROM t OFFSET 5");
        let (mysql, _) = compile(&MySqlDialect, &state, Operation::Select);
        assert_eq!(mysql, "SELECT * FROM t LIMIT 18446744073709551615 OFFSET 5");
    }

    #[test]
    fn test_count_drops_ordering_and_paging() {
        let mut state = QueryState::new("users");
        state.wheres.push(eq("name", "Alice"));
        state.orders.push(OrderClause::asc("name"));
        state.limit = Some(5);
        state.offset = Some(10);
        let (sql, params) = compile(&GenericDialect, &state, Operation::Count);
        assert_eq!(sql, "SELECT COUNT(*) AS aggregate FROM users WHERE name = ?");
        assert_eq!(params.len(), 1);
    }

    #[test]
    fn test_count_wraps_grouped_queries() {
        let mut state = QueryState::new("posts");
        state.columns = vec!["user_id".into()];
        state.groups = vec!["user_id".into()];
        let (sql, _) = compile(&GenericDialect, &state, Operation::Count);
        assert_eq!(
            sql,
            "SELECT COUNT(*) AS aggregate FROM (SELECT user_id FROM posts GROUP BY user_id) AS aggregate_table"
        );
    }

    #[test]
    fn test_exists_form() {
        let mut state = QueryState::new("users");
        state.wheres.push(eq("id", 1));
        state.orders.push(OrderClause::asc("id"));
        let (sql, params) = compile(&PostgresDialect, &state, Operation::Exists);
        assert_eq!(
            sql,
            "SELECT EXISTS(SELECT 1 FROM users WHERE id = $1 LIMIT 1) AS aggregate"
        );
        assert_eq!(params, vec![Value::Int(1)]);
    }

    #[test]
    fn test_aggregate_form() {
        let mut state = QueryState::new("orders");
        state.wheres.push(eq("paid", true));
        let agg = Aggregate::sum("amount");
        let (sql, _) = compile(&GenericDialect, &state, Operation::Aggregate(&agg));
        assert_eq!(sql, "SELECT SUM(amount) AS aggregate FROM orders WHERE paid = ?");
    }

    #[test]
    fn test_insert_returning_depends_on_dialect() {
        let state = QueryState::new("users");
        let mut row = Row::new();
        row.insert("email".into(), "a@example.com".to_value());
        row.insert("name".into(), "Alice".to_value());

        let (pg, params) = compile(&PostgresDialect, &state, Operation::Insert(&row));
        assert_eq!(
            pg,
            "INSERT INTO users (email, name) VALUES ($1, $2) RETURNING *"
        );
        assert_eq!(params.len(), 2);

        let (my, _) = compile(&MySqlDialect, &state, Operation::Insert(&row));
        assert_eq!(my, "INSERT INTO users (email, name) VALUES (?, ?)");
    }

    #[test]
    fn test_insert_batch_fills_missing_columns() {
        let state = QueryState::new("role_user");
        let mut first = Row::new();
        first.insert("user_id".into(), 1.to_value());
        first.insert("role_id".into(), 2.to_value());
        let mut second = Row::new();
        second.insert("user_id".into(), 1.to_value());
        second.insert("role_id".into(), 3.to_value());
        second.insert("note".into(), "x".to_value());

        let rows = [first, second];
        let (sql, params) = compile(&PostgresDialect, &state, Operation::InsertBatch(&rows));
        assert_eq!(
            sql,
            "INSERT INTO role_user (note, role_id, user_id) VALUES ($1, $2, $3), ($4, $5, $6)"
        );
        assert_eq!(params[0], Value::Null);
        assert_eq!(params.len(), 6);
    }

    #[test]
    fn test_update_and_delete() {
        let mut state = QueryState::new("users");
        state.wheres.push(eq("id", 7));
        let mut row = Row::new();
        row.insert("name".into(), "Bob".to_value());

        let (sql, params) = compile(&PostgresDialect, &state, Operation::Update(&row));
        assert_eq!(sql, "UPDATE users SET name = $1 WHERE id = $2 RETURNING *");
        assert_eq!(params, vec![Value::Text("Bob".into()), Value::Int(7)]);

        let (sql, params) = compile(&MySqlDialect, &state, Operation::Delete);
        assert_eq!(sql, "DELETE FROM users WHERE id = ?");
        assert_eq!(params.len(), 1);
    }

    #[test]
    fn test_empty_nested_group_is_skipped() {
        let mut state = QueryState::new("t");
        state.wheres = vec![
            WhereClause::Nested {
                combinator: Combinator::And,
                clauses: vec![],
            },
            basic(
                Combinator::Or,
                "a",
                Condition::Compare(CompareOp::Eq, 1.to_value()),
            ),
        ];
        let (sql, _) = compile(&GenericDialect, &state, Operation::Select);
        assert_eq!(sql, "SELECT * FROM t WHERE a = ?");
    }
}
