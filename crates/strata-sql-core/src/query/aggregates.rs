//! Aggregate expressions for `SELECT <fn>(...)` terminals.
//!
//! The compiler wraps these in the same derived form as COUNT: ordering,
//! paging and locking are dropped before the aggregate runs.

/// SQL aggregate function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateFn {
    /// `COUNT`
    Count,
    /// `SUM`
    Sum,
    /// `AVG`
    Avg,
    /// `MIN`
    Min,
    /// `MAX`
    Max,
}

impl AggregateFn {
    const fn keyword(self) -> &'static str {
        match self {
            Self::Count => "COUNT",
            Self::Sum => "SUM",
            Self::Avg => "AVG",
            Self::Min => "MIN",
            Self::Max => "MAX",
        }
    }
}

/// One aggregate over a column expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Aggregate {
    function: AggregateFn,
    column: String,
    distinct: bool,
}

impl Aggregate {
    /// Aggregate `function` over `column`.
    #[must_use]
    pub fn new(function: AggregateFn, column: &str) -> Self {
        Self {
            function,
            column: column.to_string(),
            distinct: false,
        }
    }

    /// `COUNT(*)`
    #[must_use]
    pub fn count_all() -> Self {
        Self::new(AggregateFn::Count, "*")
    }

    /// `COUNT(column)`, which skips NULLs.
    #[must_use]
    pub fn count(column: &str) -> Self {
        Self::new(AggregateFn::Count, column)
    }

    /// `COUNT(DISTINCT column)`
    #[must_use]
    pub fn count_distinct(column: &str) -> Self {
        Self::count(column).distinct()
    }

    /// `SUM(column)`
    #[must_use]
    pub fn sum(column: &str) -> Self {
        Self::new(AggregateFn::Sum, column)
    }

    /// `AVG(column)`
    #[must_use]
    pub fn avg(column: &str) -> Self {
        Self::new(AggregateFn::Avg, column)
    }

    /// `MAX(column)`
    #[must_use]
    pub fn max(column: &str) -> Self {
        Self::new(AggregateFn::Max, column)
    }

    /// `MIN(column)`
    #[must_use]
    pub fn min(column: &str) -> Self {
        Self::new(AggregateFn::Min, column)
    }

    /// Aggregates distinct values only.
    #[must_use]
    pub fn distinct(mut self) -> Self {
        self.distinct = true;
        self
    }

    /// Returns the aggregate function.
    #[must_use]
    pub const fn function(&self) -> AggregateFn {
        self.function
    }

    /// Renders the expression, e.g. `SUM(amount)`.
    #[must_use]
    pub fn to_sql(&self) -> String {
        let keyword = self.function.keyword();
        if self.distinct {
            format!("{keyword}(DISTINCT {})", self.column)
        } else {
            format!("{keyword}({})", self.column)
        }
    }
}
