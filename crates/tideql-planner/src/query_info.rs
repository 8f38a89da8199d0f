use std::fmt;

use tideql_common::types::{Value, ValueMap};

/// Statement class recognised by the planner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Select,
    Insert,
    Update,
    Delete,
    Raw,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Operation::Select => "SELECT",
            Operation::Insert => "INSERT",
            Operation::Update => "UPDATE",
            Operation::Delete => "DELETE",
            Operation::Raw => "RAW",
        };
        f.write_str(name)
    }
}

/// Closed operator set for pushdown predicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PredicateOp {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    Like,
    In,
    IsNull,
    IsNotNull,
}

impl PredicateOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            PredicateOp::Eq => "=",
            PredicateOp::NotEq => "!=",
            PredicateOp::Lt => "<",
            PredicateOp::LtEq => "<=",
            PredicateOp::Gt => ">",
            PredicateOp::GtEq => ">=",
            PredicateOp::Like => "LIKE",
            PredicateOp::In => "IN",
            PredicateOp::IsNull => "IS NULL",
            PredicateOp::IsNotNull => "IS NOT NULL",
        }
    }
}

impl fmt::Display for PredicateOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Right-hand side of a predicate: a scalar literal or an IN-list.
#[derive(Debug, Clone, PartialEq)]
pub enum PredicateValue {
    Scalar(Value),
    List(Vec<Value>),
}

impl PredicateValue {
    pub fn as_scalar(&self) -> Option<&Value> {
        match self {
            PredicateValue::Scalar(v) => Some(v),
            PredicateValue::List(_) => None,
        }
    }

    pub fn contains_placeholder(&self) -> bool {
        match self {
            PredicateValue::Scalar(v) => v.is_placeholder(),
            PredicateValue::List(vs) => vs.iter().any(Value::is_placeholder),
        }
    }
}

/// One WHERE-clause conjunct, column text kept verbatim from the statement.
#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    pub column: String,
    pub op: PredicateOp,
    pub value: PredicateValue,
}

impl Predicate {
    pub fn new(column: impl Into<String>, op: PredicateOp, value: PredicateValue) -> Self {
        Self {
            column: column.into(),
            op,
            value,
        }
    }

    pub fn eq(column: impl Into<String>, value: Value) -> Self {
        Self::new(column, PredicateOp::Eq, PredicateValue::Scalar(value))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateFunc {
    Count,
    Sum,
    Avg,
    Min,
    Max,
}

impl AggregateFunc {
    pub fn as_str(&self) -> &'static str {
        match self {
            AggregateFunc::Count => "COUNT",
            AggregateFunc::Sum => "SUM",
            AggregateFunc::Avg => "AVG",
            AggregateFunc::Min => "MIN",
            AggregateFunc::Max => "MAX",
        }
    }

    pub fn from_name(name: &str) -> Option<AggregateFunc> {
        match name.to_ascii_uppercase().as_str() {
            "COUNT" => Some(AggregateFunc::Count),
            "SUM" => Some(AggregateFunc::Sum),
            "AVG" => Some(AggregateFunc::Avg),
            "MIN" => Some(AggregateFunc::Min),
            "MAX" => Some(AggregateFunc::Max),
            _ => None,
        }
    }
}

impl fmt::Display for AggregateFunc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One aggregate call in the projection. COUNT(*) keeps `column = "*"`.
#[derive(Debug, Clone, PartialEq)]
pub struct Aggregate {
    pub func: AggregateFunc,
    pub column: String,
    pub alias: Option<String>,
}

impl Aggregate {
    pub fn new(func: AggregateFunc, column: impl Into<String>) -> Self {
        Self {
            func,
            column: column.into(),
            alias: None,
        }
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    /// The name this aggregate projects under: its alias, or `FUNC(col)`.
    pub fn projected_name(&self) -> String {
        match &self.alias {
            Some(alias) => alias.clone(),
            None => format!("{}({})", self.func, self.column),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    Inner,
    Left,
    Right,
    Outer,
}

impl JoinKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JoinKind::Inner => "INNER",
            JoinKind::Left => "LEFT",
            JoinKind::Right => "RIGHT",
            JoinKind::Outer => "OUTER",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct JoinInfo {
    pub kind: JoinKind,
    pub table: String,
}

/// The immutable per-statement plan record produced by the planner.
///
/// `raw_sql` always holds the original statement (trimmed), so the engine
/// can re-execute it locally after materialising the source rows.
/// `has_residual_predicates` marks WHERE content the conjunctive extraction
/// could not capture (disjunctions, exotic operators); the engine must not
/// trust `predicates` alone for correctness when it is set.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryInfo {
    pub operation: Operation,
    pub table: Option<String>,
    pub columns: Vec<String>,
    pub predicates: Vec<Predicate>,
    pub values: ValueMap,
    pub order_by: Vec<(String, SortDirection)>,
    pub group_by: Vec<String>,
    pub aggregates: Vec<Aggregate>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
    pub joins: Vec<JoinInfo>,
    pub raw_sql: String,
    pub is_explain: bool,
    pub has_residual_predicates: bool,
}

impl QueryInfo {
    pub fn new(operation: Operation, raw_sql: impl Into<String>) -> Self {
        Self {
            operation,
            table: None,
            columns: vec!["*".to_string()],
            predicates: Vec::new(),
            values: ValueMap::new(),
            order_by: Vec::new(),
            group_by: Vec::new(),
            aggregates: Vec::new(),
            limit: None,
            offset: None,
            joins: Vec::new(),
            raw_sql: raw_sql.into(),
            is_explain: false,
            has_residual_predicates: false,
        }
    }

    pub fn raw(raw_sql: impl Into<String>) -> Self {
        Self::new(Operation::Raw, raw_sql)
    }

    pub fn wants_aggregation(&self) -> bool {
        !self.group_by.is_empty() || !self.aggregates.is_empty()
    }
}
