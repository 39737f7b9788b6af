//! The description of a pending query.
//!
//! `QueryState` is plain data: the builder mutates it, the compiler reads it.

use std::fmt;

use crate::value::Value;

/// Boolean connective placed before a WHERE clause.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Combinator {
    /// AND
    And,
    /// OR
    Or,
}

impl Combinator {
    /// Returns the SQL keyword.
    #[must_use]
    pub const fn keyword(self) -> &'static str {
        match self {
            Self::And => "AND",
            Self::Or => "OR",
        }
    }
}

/// Comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    /// Equal (=)
    Eq,
    /// Not equal (!=)
    Ne,
    /// Greater than (>)
    Gt,
    /// Greater than or equal (>=)
    Gte,
    /// Less than (<)
    Lt,
    /// Less than or equal (<=)
    Lte,
    /// Pattern match (LIKE)
    Like,
    /// Negated pattern match (NOT LIKE)
    NotLike,
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Eq => write!(f, "="),
            Self::Ne => write!(f, "!="),
            Self::Gt => write!(f, ">"),
            Self::Gte => write!(f, ">="),
            Self::Lt => write!(f, "<"),
            Self::Lte => write!(f, "<="),
            Self::Like => write!(f, "LIKE"),
            Self::NotLike => write!(f, "NOT LIKE"),
        }
    }
}

/// The test applied to a column in a basic WHERE clause.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// `column op ?`
    Compare(CompareOp, Value),
    /// `column IN (?, ?, ...)`
    In(Vec<Value>),
    /// `column NOT IN (?, ?, ...)`
    NotIn(Vec<Value>),
    /// `column IS NULL`
    IsNull,
    /// `column IS NOT NULL`
    IsNotNull,
    /// `column BETWEEN ? AND ?`
    Between(Value, Value),
    /// `column NOT BETWEEN ? AND ?`
    NotBetween(Value, Value),
}

/// A single entry of a WHERE clause list.
#[derive(Debug, Clone, PartialEq)]
pub enum WhereClause {
    /// Column test.
    Basic {
        /// Connective to the previous clause.
        combinator: Combinator,
        /// Column name (may be qualified).
        column: String,
        /// The test.
        condition: Condition,
    },
    /// Caller-supplied SQL fragment with its own parameters.
    Raw {
        /// Connective to the previous clause.
        combinator: Combinator,
        /// SQL text spliced verbatim.
        sql: String,
        /// Parameters appended in the given order.
        params: Vec<Value>,
    },
    /// Parenthesized group of clauses.
    Nested {
        /// Connective to the previous clause.
        combinator: Combinator,
        /// Clauses inside the parentheses.
        clauses: Vec<WhereClause>,
    },
}

impl WhereClause {
    /// Returns the connective of this clause.
    #[must_use]
    pub const fn combinator(&self) -> Combinator {
        match self {
            Self::Basic { combinator, .. }
            | Self::Raw { combinator, .. }
            | Self::Nested { combinator, .. } => *combinator,
        }
    }
}

/// Order direction for sorting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderDirection {
    /// Ascending order (ASC)
    Asc,
    /// Descending order (DESC)
    Desc,
}

/// An ordering specification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderClause {
    /// Column to order by
    pub column: String,
    /// Order direction
    pub direction: OrderDirection,
}

impl OrderClause {
    /// Creates a new ascending order specification.
    pub fn asc(column: &str) -> Self {
        Self {
            column: column.to_string(),
            direction: OrderDirection::Asc,
        }
    }

    /// Creates a new descending order specification.
    pub fn desc(column: &str) -> Self {
        Self {
            column: column.to_string(),
            direction: OrderDirection::Desc,
        }
    }

    /// Parses a Django-style order specification.
    ///
    /// Prefix with `-` for descending order.
    /// Example: `"-created_at"` for descending, `"name"` for ascending.
    pub fn parse(spec: &str) -> Self {
        if let Some(column) = spec.strip_prefix('-') {
            Self::desc(column)
        } else {
            Self::asc(spec)
        }
    }

    /// Returns the SQL representation.
    pub fn to_sql(&self) -> String {
        match self.direction {
            OrderDirection::Asc => format!("{} ASC", self.column),
            OrderDirection::Desc => format!("{} DESC", self.column),
        }
    }
}

/// Kind of table join.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    /// INNER JOIN
    Inner,
    /// LEFT JOIN
    Left,
    /// RIGHT JOIN
    Right,
    /// CROSS JOIN
    Cross,
}

impl JoinKind {
    /// Returns the SQL keyword sequence.
    #[must_use]
    pub const fn keyword(self) -> &'static str {
        match self {
            Self::Inner => "INNER JOIN",
            Self::Left => "LEFT JOIN",
            Self::Right => "RIGHT JOIN",
            Self::Cross => "CROSS JOIN",
        }
    }
}

/// A join against another table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinClause {
    /// Join kind.
    pub kind: JoinKind,
    /// Target table.
    pub table: String,
    /// Join predicate (ignored for cross joins).
    pub on: Option<String>,
}

/// Row locking mode for a SELECT.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    /// Shared lock (FOR SHARE).
    Share,
    /// Exclusive lock (FOR UPDATE).
    Update,
}

/// A HAVING fragment with its parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct Having {
    /// SQL text.
    pub sql: String,
    /// Parameters in placeholder order.
    pub params: Vec<Value>,
}

/// Everything a compile call needs to know about a pending query.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryState {
    /// Table name.
    pub table: String,
    /// Optional table alias.
    pub alias: Option<String>,
    /// Select expressions (empty selects all columns).
    pub columns: Vec<String>,
    /// WHERE clauses in order.
    pub wheres: Vec<WhereClause>,
    /// ORDER BY clauses in order.
    pub orders: Vec<OrderClause>,
    /// Joins in order.
    pub joins: Vec<JoinClause>,
    /// LIMIT clause.
    pub limit: Option<u64>,
    /// OFFSET clause.
    pub offset: Option<u64>,
    /// GROUP BY columns.
    pub groups: Vec<String>,
    /// HAVING fragments (combined with AND).
    pub havings: Vec<Having>,
    /// Whether to select distinct rows.
    pub distinct: bool,
    /// Row locking mode.
    pub lock: Option<LockMode>,
}

impl QueryState {
    /// Creates an empty state for the given table.
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            alias: None,
            columns: Vec::new(),
            wheres: Vec::new(),
            orders: Vec::new(),
            joins: Vec::new(),
            limit: None,
            offset: None,
            groups: Vec::new(),
            havings: Vec::new(),
            distinct: false,
            lock: None,
        }
    }

    /// Returns the FROM target, including the alias when set.
    #[must_use]
    pub fn from_clause(&self) -> String {
        match &self.alias {
            Some(alias) => format!("{} AS {alias}", self.table),
            None => self.table.clone(),
        }
    }
}
