//! The adapter contract and its implementations.
//!
//! An adapter is the per-source implementation of the fetch/mutate
//! interface. Pushdown is best effort but honest: an adapter that cannot
//! honour part of a [`FetchPlan`] fails with
//! [`Error::PushdownUnsupported`](tideql_common::Error) rather than
//! returning wrong rows; the engine then re-fetches with filters only and
//! finishes the statement locally. Capability flags are explicit and the
//! engine branches on them, never on missing methods.

pub mod auth;
pub mod file;
pub mod jira;
pub mod rest;
pub mod schema_cache;
pub mod servicenow;

use async_trait::async_trait;
use tideql_arrow::RecordBatch;
use tideql_common::column::ColumnInfo;
use tideql_common::error::{Error, Result};
use tideql_common::types::{Value, ValueMap};
use tideql_planner::{Aggregate, Predicate, PredicateOp, QueryInfo, SortDirection};

/// The pushdown request handed to [`Adapter::fetch`], mirroring the
/// pushable fields of a [`QueryInfo`]. `columns` of `None`, `[]` or
/// `["*"]` mean "all discovered columns".
#[derive(Debug, Clone, Default)]
pub struct FetchPlan {
    pub columns: Option<Vec<String>>,
    pub predicates: Vec<Predicate>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
    pub order_by: Vec<(String, SortDirection)>,
    pub group_by: Vec<String>,
    pub aggregates: Vec<Aggregate>,
}

impl FetchPlan {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_query(info: &QueryInfo) -> Self {
        Self {
            columns: Some(info.columns.clone()),
            predicates: info.predicates.clone(),
            limit: info.limit,
            offset: info.offset,
            order_by: info.order_by.clone(),
            group_by: info.group_by.clone(),
            aggregates: info.aggregates.clone(),
        }
    }

    pub fn with_columns(mut self, columns: Vec<String>) -> Self {
        self.columns = Some(columns);
        self
    }

    pub fn with_predicates(mut self, predicates: Vec<Predicate>) -> Self {
        self.predicates = predicates;
        self
    }

    pub fn with_limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn with_order_by(mut self, order_by: Vec<(String, SortDirection)>) -> Self {
        self.order_by = order_by;
        self
    }

    pub fn with_group_by(mut self, group_by: Vec<String>) -> Self {
        self.group_by = group_by;
        self
    }

    pub fn with_aggregates(mut self, aggregates: Vec<Aggregate>) -> Self {
        self.aggregates = aggregates;
        self
    }

    /// True when the plan selects every discovered column.
    pub fn all_columns(&self) -> bool {
        match &self.columns {
            None => true,
            Some(columns) => columns.is_empty() || (columns.len() == 1 && columns[0] == "*"),
        }
    }

    pub fn wants_aggregation(&self) -> bool {
        !self.group_by.is_empty() || !self.aggregates.is_empty()
    }

    /// The selected column names, cleaned of qualifiers and quotes, or
    /// `None` for "all".
    pub fn cleaned_columns(&self) -> Option<Vec<String>> {
        if self.all_columns() {
            return None;
        }
        self.columns
            .as_ref()
            .map(|columns| columns.iter().map(|c| clean_column(c)).collect())
    }
}

/// Blocking-path adapter contract.
pub trait Adapter: Send + Sync {
    fn name(&self) -> &str;

    fn supports_predicate_pushdown(&self) -> bool {
        true
    }

    fn supports_insert(&self) -> bool {
        false
    }

    fn supports_update(&self) -> bool {
        false
    }

    fn supports_delete(&self) -> bool {
        false
    }

    fn supports_batch(&self) -> bool {
        false
    }

    fn fetch(&self, table: &str, plan: &FetchPlan) -> Result<RecordBatch>;

    fn get_schema(&self, table: &str) -> Result<Vec<ColumnInfo>>;

    fn list_tables(&self) -> Result<Vec<String>> {
        Ok(Vec::new())
    }

    fn insert(&self, _table: &str, _values: &ValueMap) -> Result<u64> {
        Err(Error::query(format!("{} does not support INSERT", self.name())))
    }

    fn update(&self, _table: &str, _values: &ValueMap, _predicates: &[Predicate]) -> Result<u64> {
        Err(Error::query(format!("{} does not support UPDATE", self.name())))
    }

    fn delete(&self, _table: &str, _predicates: &[Predicate]) -> Result<u64> {
        Err(Error::query(format!("{} does not support DELETE", self.name())))
    }
}

/// Cooperative-path adapter contract; semantics identical to [`Adapter`].
#[async_trait]
pub trait AsyncAdapter: Send + Sync {
    fn name(&self) -> &str;

    fn supports_predicate_pushdown(&self) -> bool {
        true
    }

    fn supports_insert(&self) -> bool {
        false
    }

    fn supports_update(&self) -> bool {
        false
    }

    fn supports_delete(&self) -> bool {
        false
    }

    fn supports_batch(&self) -> bool {
        false
    }

    async fn fetch(&self, table: &str, plan: &FetchPlan) -> Result<RecordBatch>;

    async fn get_schema(&self, table: &str) -> Result<Vec<ColumnInfo>>;

    async fn list_tables(&self) -> Result<Vec<String>> {
        Ok(Vec::new())
    }

    async fn insert(&self, _table: &str, _values: &ValueMap) -> Result<u64> {
        Err(Error::query(format!("{} does not support INSERT", self.name())))
    }

    async fn update(
        &self,
        _table: &str,
        _values: &ValueMap,
        _predicates: &[Predicate],
    ) -> Result<u64> {
        Err(Error::query(format!("{} does not support UPDATE", self.name())))
    }

    async fn delete(&self, _table: &str, _predicates: &[Predicate]) -> Result<u64> {
        Err(Error::query(format!("{} does not support DELETE", self.name())))
    }
}

pub(crate) fn unquote(text: &str) -> &str {
    text.trim_matches('"').trim_matches('`')
}

/// Strips a `schema.` qualifier and quoting, leaving the physical
/// table/resource name the remote API knows.
pub(crate) fn table_leaf(table: &str) -> String {
    let leaf = match table.rsplit_once('.') {
        Some((_, leaf)) => leaf,
        None => table,
    };
    unquote(leaf).to_string()
}

/// Strips alias/table prefixes and quoting from a column reference.
pub(crate) fn clean_column(column: &str) -> String {
    if column.is_empty() || column == "*" {
        return column.to_string();
    }
    let leaf = match column.rsplit_once('.') {
        Some((_, leaf)) => leaf,
        None => column,
    };
    unquote(leaf).to_string()
}

pub(crate) fn normalize_host(host: &str) -> String {
    let trimmed = host.trim_end_matches('/');
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("https://{}", trimmed)
    }
}

/// Finds the identifying equality predicate (`key = value`) a mutation or
/// virtual table requires, matching key names case-insensitively after
/// cleaning.
pub(crate) fn key_predicate(predicates: &[Predicate], keys: &[&str]) -> Option<String> {
    predicates.iter().find_map(|pred| {
        if pred.op != PredicateOp::Eq {
            return None;
        }
        let column = clean_column(&pred.column);
        if !keys.iter().any(|k| column.eq_ignore_ascii_case(k)) {
            return None;
        }
        match pred.value.as_scalar() {
            Some(Value::Placeholder) | Some(Value::Null) | None => None,
            Some(value) => Some(value.to_string()),
        }
    })
}

/// Maps an HTTP error status onto the taxonomy. Rate limits are handled
/// before this point by the retry controller.
pub(crate) fn status_error(operation: &str, status: reqwest::StatusCode) -> Error {
    if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
        Error::authentication(format!("{} rejected with status {}", operation, status))
    } else {
        Error::adapter(format!("{} failed with status {}", operation, status))
    }
}

/// Builds the rate-limit error for a 429 response, reading the optional
/// `Retry-After` seconds hint.
pub(crate) fn rate_limit_from_headers(headers: &reqwest::header::HeaderMap) -> Error {
    let retry_after = headers
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok());
    Error::rate_limit("rate limit exceeded", retry_after)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tideql_planner::PredicateValue;

    #[test]
    fn test_table_leaf() {
        assert_eq!(table_leaf("incident"), "incident");
        assert_eq!(table_leaf("sales.Account"), "Account");
        assert_eq!(table_leaf("\"sales\".\"Account\""), "Account");
    }

    #[test]
    fn test_clean_column() {
        assert_eq!(clean_column("*"), "*");
        assert_eq!(clean_column("priority"), "priority");
        assert_eq!(clean_column("i.priority"), "priority");
        assert_eq!(clean_column("\"Region\""), "Region");
    }

    #[test]
    fn test_normalize_host() {
        assert_eq!(normalize_host("dev.example.com/"), "https://dev.example.com");
        assert_eq!(normalize_host("http://localhost:8080"), "http://localhost:8080");
    }

    #[test]
    fn test_key_predicate() {
        let predicates = vec![
            Predicate::new("priority", PredicateOp::Eq, PredicateValue::Scalar(Value::Int64(1))),
            Predicate::eq("SYS_ID", Value::from("abc123")),
        ];
        assert_eq!(key_predicate(&predicates, &["sys_id"]), Some("abc123".to_string()));
        assert_eq!(key_predicate(&predicates, &["key", "id"]), None);

        // Non-equality and placeholder keys do not identify a record.
        let predicates = vec![Predicate::new(
            "sys_id",
            PredicateOp::Like,
            PredicateValue::Scalar(Value::from("abc")),
        )];
        assert_eq!(key_predicate(&predicates, &["sys_id"]), None);
        let predicates = vec![Predicate::eq("sys_id", Value::Placeholder)];
        assert_eq!(key_predicate(&predicates, &["sys_id"]), None);
    }

    #[test]
    fn test_fetch_plan_columns() {
        assert!(FetchPlan::new().all_columns());
        assert!(FetchPlan::new().with_columns(vec!["*".to_string()]).all_columns());
        let plan = FetchPlan::new().with_columns(vec!["a.x".to_string(), "y".to_string()]);
        assert!(!plan.all_columns());
        assert_eq!(
            plan.cleaned_columns(),
            Some(vec!["x".to_string(), "y".to_string()])
        );
        assert_eq!(FetchPlan::new().cleaned_columns(), None);
    }
}
