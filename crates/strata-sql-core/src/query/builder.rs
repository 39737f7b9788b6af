//! Fluent query builder bound to an executor.
//!
//! Builder methods consume and return `self`, so a chain reads top to bottom.
//! Clones are deep: every list in the underlying [`QueryState`] is copied, so
//! independent continuations of one builder never see each other's clauses.

use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::dialect::Dialect;
use crate::error::{QueryError, Result};
use crate::executor::{Executor, Row};
use crate::pagination::Paginated;
use crate::query::aggregates::Aggregate;
use crate::query::compiler::{compile, Operation, AGGREGATE_ALIAS};
use crate::query::state::{
    Combinator, CompareOp, Condition, Having, JoinClause, JoinKind, LockMode, OrderClause,
    QueryState, WhereClause,
};
use crate::value::{ToValue, Value};

/// A mutable query description plus the executor that will run it.
///
/// # Example
///
/// ```ignore
/// let active = QueryBuilder::new("users", executor)
///     .where_eq("status", "active")
///     .where_op("age", CompareOp::Gte, 18)
///     .order_by("-created_at")
///     .limit(10)
///     .get()
///     .await?;
/// ```
#[derive(Clone)]
pub struct QueryBuilder {
    state: QueryState,
    executor: Arc<dyn Executor>,
    primary_key: String,
}

impl fmt::Debug for QueryBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryBuilder")
            .field("state", &self.state)
            .field("dialect", &self.executor.dialect().name())
            .field("primary_key", &self.primary_key)
            .finish()
    }
}

impl QueryBuilder {
    /// Creates a builder for `table` with an `id` primary key.
    pub fn new(table: impl Into<String>, executor: Arc<dyn Executor>) -> Self {
        Self {
            state: QueryState::new(table),
            executor,
            primary_key: String::from("id"),
        }
    }

    /// Sets the primary-key column used by `find` and `insert`.
    #[must_use]
    pub fn with_primary_key(mut self, column: impl Into<String>) -> Self {
        self.primary_key = column.into();
        self
    }

    /// Returns an empty builder for the same table, key and executor.
    #[must_use]
    pub fn fresh(&self) -> Self {
        Self {
            state: QueryState::new(self.state.table.clone()),
            executor: Arc::clone(&self.executor),
            primary_key: self.primary_key.clone(),
        }
    }

    /// Returns the underlying state.
    pub fn state(&self) -> &QueryState {
        &self.state
    }

    /// Returns the underlying state for in-place edits.
    pub fn state_mut(&mut self) -> &mut QueryState {
        &mut self.state
    }

    /// Returns the table name.
    pub fn table(&self) -> &str {
        &self.state.table
    }

    /// Returns the primary-key column.
    pub fn primary_key(&self) -> &str {
        &self.primary_key
    }

    /// Returns the executor.
    pub fn executor(&self) -> &Arc<dyn Executor> {
        &self.executor
    }

    /// Returns the executor's dialect.
    pub fn dialect(&self) -> &dyn Dialect {
        self.executor.dialect()
    }

    /// Prefixes `column` with the table name (or alias).
    pub fn qualify(&self, column: &str) -> String {
        let owner = self.state.alias.as_deref().unwrap_or(&self.state.table);
        format!("{owner}.{column}")
    }

    /// Compiles the SELECT this builder would run.
    pub fn to_sql(&self) -> (String, Vec<Value>) {
        compile(self.dialect(), &self.state, Operation::Select)
    }

    // ---------------------------------------------------------------------
    // Projection
    // ---------------------------------------------------------------------

    /// Replaces the select list.
    #[must_use]
    pub fn select(mut self, columns: &[&str]) -> Self {
        self.state.columns = columns.iter().map(|c| (*c).to_string()).collect();
        self
    }

    /// Appends to the select list.
    #[must_use]
    pub fn add_select(mut self, columns: &[&str]) -> Self {
        self.state
            .columns
            .extend(columns.iter().map(|c| (*c).to_string()));
        self
    }

    /// Makes the query return distinct rows.
    #[must_use]
    pub fn distinct(mut self) -> Self {
        self.state.distinct = true;
        self
    }

    /// Sets a table alias.
    #[must_use]
    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.state.alias = Some(alias.into());
        self
    }

    // ---------------------------------------------------------------------
    // Filters
    // ---------------------------------------------------------------------

    /// Appends a prepared clause.
    #[must_use]
    pub fn push_where(mut self, clause: WhereClause) -> Self {
        self.state.wheres.push(clause);
        self
    }

    fn basic(self, combinator: Combinator, column: &str, condition: Condition) -> Self {
        self.push_where(WhereClause::Basic {
            combinator,
            column: column.to_string(),
            condition,
        })
    }

    /// Adds `column = value`.
    #[must_use]
    pub fn where_eq<V: ToValue>(self, column: &str, value: V) -> Self {
        self.where_op(column, CompareOp::Eq, value)
    }

    /// Adds `OR column = value`.
    #[must_use]
    pub fn or_where_eq<V: ToValue>(self, column: &str, value: V) -> Self {
        self.or_where_op(column, CompareOp::Eq, value)
    }

    /// Adds `column <op> value`.
    #[must_use]
    pub fn where_op<V: ToValue>(self, column: &str, op: CompareOp, value: V) -> Self {
        self.basic(
            Combinator::And,
            column,
            Condition::Compare(op, value.to_value()),
        )
    }

    /// Adds `OR column <op> value`.
    #[must_use]
    pub fn or_where_op<V: ToValue>(self, column: &str, op: CompareOp, value: V) -> Self {
        self.basic(
            Combinator::Or,
            column,
            Condition::Compare(op, value.to_value()),
        )
    }

    /// Adds `column IN (...)`.
    #[must_use]
    pub fn where_in<I, V>(self, column: &str, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: ToValue,
    {
        let values = values.into_iter().map(ToValue::to_value).collect();
        self.basic(Combinator::And, column, Condition::In(values))
    }

    /// Adds `OR column IN (...)`.
    #[must_use]
    pub fn or_where_in<I, V>(self, column: &str, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: ToValue,
    {
        let values = values.into_iter().map(ToValue::to_value).collect();
        self.basic(Combinator::Or, column, Condition::In(values))
    }

    /// Adds `column NOT IN (...)`.
    #[must_use]
    pub fn where_not_in<I, V>(self, column: &str, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: ToValue,
    {
        let values = values.into_iter().map(ToValue::to_value).collect();
        self.basic(Combinator::And, column, Condition::NotIn(values))
    }

    /// Adds `column IS NULL`.
    #[must_use]
    pub fn where_null(self, column: &str) -> Self {
        self.basic(Combinator::And, column, Condition::IsNull)
    }

    /// Adds `OR column IS NULL`.
    #[must_use]
    pub fn or_where_null(self, column: &str) -> Self {
        self.basic(Combinator::Or, column, Condition::IsNull)
    }

    /// Adds `column IS NOT NULL`.
    #[must_use]
    pub fn where_not_null(self, column: &str) -> Self {
        self.basic(Combinator::And, column, Condition::IsNotNull)
    }

    /// Adds `OR column IS NOT NULL`.
    #[must_use]
    pub fn or_where_not_null(self, column: &str) -> Self {
        self.basic(Combinator::Or, column, Condition::IsNotNull)
    }

    /// Adds `column BETWEEN low AND high`.
    #[must_use]
    pub fn where_between<V: ToValue>(self, column: &str, low: V, high: V) -> Self {
        self.basic(
            Combinator::And,
            column,
            Condition::Between(low.to_value(), high.to_value()),
        )
    }

    /// Adds `column NOT BETWEEN low AND high`.
    #[must_use]
    pub fn where_not_between<V: ToValue>(self, column: &str, low: V, high: V) -> Self {
        self.basic(
            Combinator::And,
            column,
            Condition::NotBetween(low.to_value(), high.to_value()),
        )
    }

    /// Adds a raw SQL fragment with its own parameters.
    ///
    /// **Warning**: the fragment is spliced verbatim; pass values through
    /// `params` and write the dialect's placeholders yourself.
    #[must_use]
    pub fn where_raw(self, sql: &str, params: Vec<Value>) -> Self {
        self.push_where(WhereClause::Raw {
            combinator: Combinator::And,
            sql: sql.to_string(),
            params,
        })
    }

    /// Adds `OR <raw fragment>`.
    #[must_use]
    pub fn or_where_raw(self, sql: &str, params: Vec<Value>) -> Self {
        self.push_where(WhereClause::Raw {
            combinator: Combinator::Or,
            sql: sql.to_string(),
            params,
        })
    }

    /// Adds a parenthesized group built by `f` on an empty builder.
    ///
    /// ```ignore
    /// // WHERE active = ? AND (role = ? OR role = ?)
    /// qb.where_eq("active", true)
    ///     .where_group(|q| q.where_eq("role", "admin").or_where_eq("role", "staff"))
    /// ```
    #[must_use]
    pub fn where_group(self, f: impl FnOnce(Self) -> Self) -> Self {
        self.group(Combinator::And, f)
    }

    /// Adds `OR (...)` built by `f` on an empty builder.
    #[must_use]
    pub fn or_where_group(self, f: impl FnOnce(Self) -> Self) -> Self {
        self.group(Combinator::Or, f)
    }

    fn group(self, combinator: Combinator, f: impl FnOnce(Self) -> Self) -> Self {
        let clauses = f(self.fresh()).state.wheres;
        self.push_where(WhereClause::Nested {
            combinator,
            clauses,
        })
    }

    // ---------------------------------------------------------------------
    // Joins, grouping, ordering, paging, locking
    // ---------------------------------------------------------------------

    fn push_join(mut self, kind: JoinKind, table: &str, on: Option<&str>) -> Self {
        self.state.joins.push(JoinClause {
            kind,
            table: table.to_string(),
            on: on.map(str::to_string),
        });
        self
    }

    /// Adds `INNER JOIN table ON on`.
    #[must_use]
    pub fn join(self, table: &str, on: &str) -> Self {
        self.push_join(JoinKind::Inner, table, Some(on))
    }

    /// Adds `LEFT JOIN table ON on`.
    #[must_use]
    pub fn left_join(self, table: &str, on: &str) -> Self {
        self.push_join(JoinKind::Left, table, Some(on))
    }

    /// Adds `RIGHT JOIN table ON on`.
    #[must_use]
    pub fn right_join(self, table: &str, on: &str) -> Self {
        self.push_join(JoinKind::Right, table, Some(on))
    }

    /// Adds `CROSS JOIN table`.
    #[must_use]
    pub fn cross_join(self, table: &str) -> Self {
        self.push_join(JoinKind::Cross, table, None)
    }

    /// Adds GROUP BY columns.
    #[must_use]
    pub fn group_by(mut self, columns: &[&str]) -> Self {
        self.state
            .groups
            .extend(columns.iter().map(|c| (*c).to_string()));
        self
    }

    /// Adds a HAVING fragment (fragments are combined with AND).
    #[must_use]
    pub fn having_raw(mut self, sql: &str, params: Vec<Value>) -> Self {
        self.state.havings.push(Having {
            sql: sql.to_string(),
            params,
        });
        self
    }

    /// Adds an ordering; prefix with `-` for descending order.
    ///
    /// ```ignore
    /// // Order by created_at descending, then name ascending
    /// qb.order_by("-created_at").order_by("name")
    /// ```
    #[must_use]
    pub fn order_by(mut self, spec: &str) -> Self {
        self.state.orders.push(OrderClause::parse(spec));
        self
    }

    /// Adds a descending ordering.
    #[must_use]
    pub fn order_by_desc(mut self, column: &str) -> Self {
        self.state.orders.push(OrderClause::desc(column));
        self
    }

    /// Newest first by `column`.
    #[must_use]
    pub fn latest(self, column: &str) -> Self {
        self.order_by_desc(column)
    }

    /// Oldest first by `column`.
    #[must_use]
    pub fn oldest(mut self, column: &str) -> Self {
        self.state.orders.push(OrderClause::asc(column));
        self
    }

    /// Clears all ordering.
    #[must_use]
    pub fn reorder(mut self) -> Self {
        self.state.orders.clear();
        self
    }

    /// Limits the number of results.
    #[must_use]
    pub fn limit(mut self, n: u64) -> Self {
        self.state.limit = Some(n);
        self
    }

    /// Sets the offset for pagination.
    #[must_use]
    pub fn offset(mut self, n: u64) -> Self {
        self.state.offset = Some(n);
        self
    }

    /// Sets limit and offset for a 1-based page number.
    #[must_use]
    pub fn for_page(self, page: u64, per_page: u64) -> Self {
        let page = page.max(1);
        self.offset((page - 1) * per_page).limit(per_page)
    }

    /// Locks the selected rows for update.
    #[must_use]
    pub fn lock_for_update(mut self) -> Self {
        self.state.lock = Some(LockMode::Update);
        self
    }

    /// Takes a shared lock on the selected rows.
    #[must_use]
    pub fn shared_lock(mut self) -> Self {
        self.state.lock = Some(LockMode::Share);
        self
    }

    // ---------------------------------------------------------------------
    // Terminal operations
    // ---------------------------------------------------------------------

    async fn run(&self, operation: Operation<'_>) -> Result<Vec<Row>> {
        let (sql, params) = compile(self.dialect(), &self.state, operation);
        self.execute(&sql, &params).await
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        debug!(
            table = %self.state.table,
            sql = %sql,
            params = params.len(),
            "executing query"
        );
        self.executor.raw(sql, params).await
    }

    /// Executes the query and returns all matching rows.
    pub async fn get(&self) -> Result<Vec<Row>> {
        self.run(Operation::Select).await
    }

    /// Returns the first matching row, or None if no rows match.
    pub async fn first(&self) -> Result<Option<Row>> {
        let rows = self.clone().limit(1).get().await?;
        Ok(rows.into_iter().next())
    }

    /// Returns the first matching row or [`QueryError::NotFound`].
    pub async fn first_or_fail(&self) -> Result<Row> {
        self.first().await?.ok_or(QueryError::NotFound)
    }

    /// Fetches the row whose primary key equals `id`.
    pub async fn find<V: ToValue>(&self, id: V) -> Result<Option<Row>> {
        let column = self.qualify(&self.primary_key);
        self.clone().where_eq(&column, id).first().await
    }

    /// Fetches the row whose primary key equals `id` or fails.
    pub async fn find_or_fail<V: ToValue>(&self, id: V) -> Result<Row> {
        self.find(id).await?.ok_or(QueryError::NotFound)
    }

    /// Returns the count of matching rows.
    pub async fn count(&self) -> Result<i64> {
        let rows = self.run(Operation::Count).await?;
        Ok(single_value(&rows).and_then(|v| v.as_i64()).unwrap_or(0))
    }

    /// Returns whether any rows match the query.
    pub async fn exists(&self) -> Result<bool> {
        let rows = self.run(Operation::Exists).await?;
        Ok(single_value(&rows).is_some_and(Value::is_truthy))
    }

    /// Executes an aggregate and returns its value (NULL on empty input).
    pub async fn aggregate(&self, aggregate: &Aggregate) -> Result<Value> {
        let rows = self.run(Operation::Aggregate(aggregate)).await?;
        Ok(single_value(&rows).cloned().unwrap_or(Value::Null))
    }

    /// Returns `SUM(column)`.
    pub async fn sum(&self, column: &str) -> Result<Value> {
        self.aggregate(&Aggregate::sum(column)).await
    }

    /// Returns `AVG(column)`.
    pub async fn avg(&self, column: &str) -> Result<Value> {
        self.aggregate(&Aggregate::avg(column)).await
    }

    /// Returns `MIN(column)`.
    pub async fn min(&self, column: &str) -> Result<Value> {
        self.aggregate(&Aggregate::min(column)).await
    }

    /// Returns `MAX(column)`.
    pub async fn max(&self, column: &str) -> Result<Value> {
        self.aggregate(&Aggregate::max(column)).await
    }

    /// Returns one column of every matching row.
    pub async fn pluck(&self, column: &str) -> Result<Vec<Value>> {
        let key = result_key(column);
        let rows = self.clone().select(&[column]).get().await?;
        Ok(rows
            .into_iter()
            .map(|mut row| row.remove(key).unwrap_or(Value::Null))
            .collect())
    }

    /// Returns one column of the first matching row.
    pub async fn value(&self, column: &str) -> Result<Option<Value>> {
        let key = result_key(column);
        let row = self.clone().select(&[column]).first().await?;
        Ok(row.and_then(|mut row| row.remove(key)))
    }

    /// Fetches one page and the total count.
    ///
    /// The two queries run concurrently and see no common snapshot; a write
    /// landing between them can make `total` disagree with `data`.
    pub async fn paginate(&self, page: u64, per_page: u64) -> Result<Paginated<Row>> {
        let page = page.max(1);
        let data_query = self.clone().for_page(page, per_page);
        let (data, total) = futures::try_join!(data_query.get(), self.count())?;
        Ok(Paginated::new(
            data,
            u64::try_from(total).unwrap_or(0),
            page,
            per_page,
        ))
    }

    /// Inserts a row and returns it as stored.
    ///
    /// On dialects with RETURNING this is one statement. Otherwise it is
    /// three: the INSERT, a generated-key lookup, and a re-select by that
    /// key. The three steps are only coherent when nothing else writes on
    /// the same session in between.
    pub async fn insert(&self, row: Row) -> Result<Row> {
        let dialect = self.dialect();
        let rows = self.run(Operation::Insert(&row)).await?;
        if dialect.supports_returning() {
            return rows.into_iter().next().ok_or_else(|| {
                QueryError::InvalidQuery(format!("insert into {} returned no row", self.table()))
            });
        }

        let key = match row.get(&self.primary_key) {
            Some(key) if !key.is_null() => key.clone(),
            _ => self.generated_key().await?,
        };
        self.fresh()
            .where_eq(&self.primary_key, key)
            .first()
            .await?
            .ok_or(QueryError::NotFound)
    }

    async fn generated_key(&self) -> Result<Value> {
        let dialect = self.dialect();
        let Some(sql) = dialect.last_insert_id_sql() else {
            return Err(QueryError::Unsupported {
                capability: "reading generated keys",
                dialect: dialect.name(),
            });
        };
        debug!(table = %self.state.table, "reading generated key after insert");
        let rows = self.execute(sql, &[]).await?;
        rows.first()
            .and_then(|row| row.get("id").or_else(|| row.values().next()))
            .filter(|value| !value.is_null())
            .cloned()
            .ok_or_else(|| {
                QueryError::InvalidQuery(format!(
                    "no generated key available after insert into {}",
                    self.table()
                ))
            })
    }

    /// Inserts several rows in one statement without reading them back.
    pub async fn insert_batch(&self, rows: &[Row]) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }
        self.run(Operation::InsertBatch(rows)).await?;
        Ok(())
    }

    /// Updates the matching rows.
    ///
    /// Returns the affected-row count on dialects with RETURNING and `None`
    /// elsewhere.
    pub async fn update(&self, row: Row) -> Result<Option<u64>> {
        if row.is_empty() {
            return Ok(Some(0));
        }
        let rows = self.run(Operation::Update(&row)).await?;
        Ok(self.affected(&rows))
    }

    /// Deletes the matching rows.
    ///
    /// Returns the affected-row count on dialects with RETURNING and `None`
    /// elsewhere.
    pub async fn delete(&self) -> Result<Option<u64>> {
        let rows = self.run(Operation::Delete).await?;
        Ok(self.affected(&rows))
    }

    fn affected(&self, rows: &[Row]) -> Option<u64> {
        self.dialect()
            .supports_returning()
            .then(|| rows.len() as u64)
    }
}

fn single_value(rows: &[Row]) -> Option<&Value> {
    let row = rows.first()?;
    row.get(AGGREGATE_ALIAS).or_else(|| row.values().next())
}

/// Name under which a selected expression comes back in a row.
fn result_key(column: &str) -> &str {
    let lower = column.to_ascii_lowercase();
    if let Some(pos) = lower.rfind(" as ") {
        return column[pos + 4..].trim();
    }
    column.rsplit('.').next().unwrap_or(column)
}
