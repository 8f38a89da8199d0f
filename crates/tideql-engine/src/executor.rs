use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use log::debug;
use regex::RegexBuilder;
use tideql_adapters::{Adapter, AsyncAdapter, FetchPlan};
use tideql_arrow::RecordBatch;
use tideql_common::error::{Error, Result};
use tideql_common::types::Value;
use tideql_planner::{Operation, PredicateValue, QueryInfo};

use crate::local::LocalEngine;

/// Result of executing one statement: a batch for reads, an affected-row
/// count for mutations. `rowcount` is -1 when unknown (virtual joins).
#[derive(Debug)]
pub struct StatementOutcome {
    pub batch: Option<RecordBatch>,
    pub rowcount: i64,
}

impl StatementOutcome {
    fn rows(batch: RecordBatch) -> Self {
        let rowcount = batch.num_rows() as i64;
        Self {
            batch: Some(batch),
            rowcount,
        }
    }

    fn unknown_rows(batch: RecordBatch) -> Self {
        Self {
            batch: Some(batch),
            rowcount: -1,
        }
    }

    fn affected(count: u64) -> Self {
        Self {
            batch: None,
            rowcount: count as i64,
        }
    }
}

fn unquote(text: &str) -> String {
    text.trim_matches('"').trim_matches('`').to_string()
}

/// Splits `schema.name` at the first dot outside quotes, returning the
/// unquoted schema (when present) and the unquoted leaf.
pub(crate) fn split_qualified(table: &str) -> (Option<String>, String) {
    let mut in_quotes = false;
    for (index, ch) in table.char_indices() {
        match ch {
            '"' => in_quotes = !in_quotes,
            '.' if !in_quotes => {
                let schema = unquote(&table[..index]);
                let leaf = unquote(&table[index + 1..]);
                return (Some(schema), leaf);
            }
            _ => {}
        }
    }
    (None, unquote(table))
}

/// Substitutes `?`-placeholders positionally, SQL-text order: SET values
/// first, then WHERE predicates. Leftover placeholders with no parameter
/// raise a query error.
pub(crate) fn bind_parameters(info: &QueryInfo, parameters: &[Value]) -> Result<QueryInfo> {
    let mut bound = info.clone();
    let mut supply = parameters.iter();
    let mut next = || -> Result<Value> {
        supply
            .next()
            .cloned()
            .ok_or_else(|| Error::query("not enough parameters for statement placeholders"))
    };

    for (_, value) in bound.values.iter_mut() {
        if value.is_placeholder() {
            *value = next()?;
        }
    }
    for predicate in bound.predicates.iter_mut() {
        match &mut predicate.value {
            PredicateValue::Scalar(value) => {
                if value.is_placeholder() {
                    *value = next()?;
                }
            }
            PredicateValue::List(values) => {
                for value in values.iter_mut() {
                    if value.is_placeholder() {
                        *value = next()?;
                    }
                }
            }
        }
    }
    Ok(bound)
}

/// Rewrites the first `FROM <table>` occurrence (word-boundary,
/// case-insensitive) to read from a local replacement table.
pub(crate) fn rewrite_from(sql: &str, table: &str, replacement: &str) -> Result<String> {
    let escaped = regex::escape(table);
    let boundary = if table
        .chars()
        .last()
        .is_some_and(|c| c.is_alphanumeric() || c == '_')
    {
        r"\b"
    } else {
        ""
    };
    let pattern = format!(r"FROM\s+{}{}", escaped, boundary);
    let matcher = RegexBuilder::new(&pattern)
        .case_insensitive(true)
        .build()
        .map_err(|e| Error::query(format!("failed to rewrite statement: {}", e)))?;
    if !matcher.is_match(sql) {
        return Err(Error::query(format!(
            "could not locate FROM {} for local re-execution",
            table
        )));
    }
    Ok(matcher
        .replace(sql, format!("FROM {}", replacement).as_str())
        .into_owned())
}

fn temp_name() -> String {
    format!("t_{}", uuid::Uuid::new_v4().simple())
}

/// Tracks temporary registrations and releases every one of them on drop,
/// so fallback and virtual-join cleanup happens on success, error and
/// panic paths alike.
struct TempRegistrations<'a> {
    local: &'a LocalEngine,
    tables: Vec<String>,
    views: Vec<(String, String)>,
}

impl<'a> TempRegistrations<'a> {
    fn new(local: &'a LocalEngine) -> Self {
        Self {
            local,
            tables: Vec::new(),
            views: Vec::new(),
        }
    }
}

impl Drop for TempRegistrations<'_> {
    fn drop(&mut self) {
        for (schema, name) in self.views.drain(..) {
            self.local.deregister_view(&schema, &name);
        }
        for name in self.tables.drain(..) {
            self.local.deregister(&name);
        }
    }
}

/// Routes planned statements to adapters with pushdown, falling back to
/// local re-execution over materialised batches when a source declines
/// part of the plan.
pub struct Executor {
    adapters: RwLock<HashMap<String, Arc<dyn Adapter>>>,
    local: Arc<LocalEngine>,
}

impl Executor {
    pub fn new(local: Arc<LocalEngine>) -> Self {
        Self {
            adapters: RwLock::new(HashMap::new()),
            local,
        }
    }

    pub fn local(&self) -> &Arc<LocalEngine> {
        &self.local
    }

    pub fn register_adapter(&self, name: &str, adapter: Arc<dyn Adapter>) {
        if let Ok(mut adapters) = self.adapters.write() {
            adapters.insert(name.to_string(), adapter);
        }
    }

    pub fn adapter(&self, name: &str) -> Option<Arc<dyn Adapter>> {
        self.adapters.read().ok()?.get(name).cloned()
    }

    fn resolve_adapter(&self, table: Option<&str>) -> Option<Arc<dyn Adapter>> {
        let table = table?;
        let (schema, _) = split_qualified(table);
        if let Some(schema) = schema {
            if let Some(adapter) = self.adapter(&schema) {
                return Some(adapter);
            }
        }
        self.adapter("default")
    }

    pub fn execute(&self, info: &QueryInfo, parameters: &[Value]) -> Result<StatementOutcome> {
        let info = bind_parameters(info, parameters)?;
        if !info.joins.is_empty() {
            return self.execute_virtual_join(&info);
        }
        let Some(adapter) = self.resolve_adapter(info.table.as_deref()) else {
            return self.execute_local(&info);
        };
        let table = info.table.clone().unwrap_or_default();
        match info.operation {
            Operation::Select => self.execute_select(&info, &table, adapter),
            Operation::Insert => {
                if info.values.is_empty() {
                    return Err(Error::query(
                        "INSERT requires an explicit column list with a single VALUES row",
                    ));
                }
                Ok(StatementOutcome::affected(adapter.insert(&table, &info.values)?))
            }
            Operation::Update => Ok(StatementOutcome::affected(adapter.update(
                &table,
                &info.values,
                &info.predicates,
            )?)),
            Operation::Delete => Ok(StatementOutcome::affected(
                adapter.delete(&table, &info.predicates)?,
            )),
            Operation::Raw => self.execute_local(&info),
        }
    }

    fn execute_local(&self, info: &QueryInfo) -> Result<StatementOutcome> {
        Ok(StatementOutcome::rows(self.local.execute(&info.raw_sql)?))
    }

    fn execute_select(
        &self,
        info: &QueryInfo,
        table: &str,
        adapter: Arc<dyn Adapter>,
    ) -> Result<StatementOutcome> {
        // Residual WHERE content (disjunctions and friends) and EXPLAIN can
        // only be answered locally.
        if info.is_explain || info.has_residual_predicates {
            return self.execute_fallback(info, table, &adapter);
        }
        let plan = FetchPlan::from_query(info);
        match adapter.fetch(table, &plan) {
            Ok(batch) => Ok(StatementOutcome::rows(batch)),
            Err(Error::PushdownUnsupported(reason)) => {
                debug!("pushdown declined ({}), running fallback", reason);
                self.execute_fallback(info, table, &adapter)
            }
            Err(other) => Err(other),
        }
    }

    /// Re-fetches with filters only, registers the batch under a fresh
    /// name, rewrites the statement's FROM clause and finishes locally.
    fn execute_fallback(
        &self,
        info: &QueryInfo,
        table: &str,
        adapter: &Arc<dyn Adapter>,
    ) -> Result<StatementOutcome> {
        let plan = FetchPlan::new().with_predicates(info.predicates.clone());
        let batch = adapter.fetch(table, &plan)?;

        let temp = temp_name();
        self.local.register_batch(&temp, batch)?;
        let mut guard = TempRegistrations::new(&self.local);
        guard.tables.push(temp.clone());

        let rewritten = rewrite_from(&info.raw_sql, table, &temp)?;
        debug!("fallback statement: {}", rewritten);
        let result = self.local.execute(&rewritten)?;
        Ok(StatementOutcome::rows(result))
    }

    /// Materialises every physical table, registers each (qualified names
    /// become schema views over temporaries) and runs the original SQL
    /// locally.
    fn execute_virtual_join(&self, info: &QueryInfo) -> Result<StatementOutcome> {
        let mut tables: Vec<String> = Vec::new();
        if let Some(table) = &info.table {
            tables.push(table.clone());
        }
        for join in &info.joins {
            if !tables.contains(&join.table) {
                tables.push(join.table.clone());
            }
        }

        let mut guard = TempRegistrations::new(&self.local);
        for table in &tables {
            let Some(adapter) = self.resolve_adapter(Some(table)) else {
                continue;
            };
            let plan = FetchPlan::new().with_columns(vec!["*".to_string()]);
            let batch = adapter.fetch(table, &plan)?;
            let (schema, leaf) = split_qualified(table);
            match schema {
                Some(schema) => {
                    let temp = temp_name();
                    self.local.register_batch(&temp, batch)?;
                    guard.tables.push(temp.clone());
                    self.local.register_view(&schema, &leaf, &temp)?;
                    guard.views.push((schema, leaf));
                }
                None => {
                    self.local.register_batch(&leaf, batch)?;
                    guard.tables.push(leaf);
                }
            }
        }

        let result = self.local.execute(&info.raw_sql)?;
        Ok(StatementOutcome::unknown_rows(result))
    }
}

/// Cooperative-concurrency twin of [`Executor`], driving [`AsyncAdapter`]s
/// and dispatching local execution to worker threads. Semantics are
/// identical.
pub struct AsyncExecutor {
    adapters: RwLock<HashMap<String, Arc<dyn AsyncAdapter>>>,
    local: Arc<LocalEngine>,
}

impl AsyncExecutor {
    pub fn new(local: Arc<LocalEngine>) -> Self {
        Self {
            adapters: RwLock::new(HashMap::new()),
            local,
        }
    }

    pub fn local(&self) -> &Arc<LocalEngine> {
        &self.local
    }

    pub fn register_adapter(&self, name: &str, adapter: Arc<dyn AsyncAdapter>) {
        if let Ok(mut adapters) = self.adapters.write() {
            adapters.insert(name.to_string(), adapter);
        }
    }

    pub fn adapter(&self, name: &str) -> Option<Arc<dyn AsyncAdapter>> {
        self.adapters.read().ok()?.get(name).cloned()
    }

    fn resolve_adapter(&self, table: Option<&str>) -> Option<Arc<dyn AsyncAdapter>> {
        let table = table?;
        let (schema, _) = split_qualified(table);
        if let Some(schema) = schema {
            if let Some(adapter) = self.adapter(&schema) {
                return Some(adapter);
            }
        }
        self.adapter("default")
    }

    pub async fn execute(
        &self,
        info: &QueryInfo,
        parameters: &[Value],
    ) -> Result<StatementOutcome> {
        let info = bind_parameters(info, parameters)?;
        if !info.joins.is_empty() {
            return self.execute_virtual_join(&info).await;
        }
        let Some(adapter) = self.resolve_adapter(info.table.as_deref()) else {
            let batch = self.local.execute_async(&info.raw_sql).await?;
            return Ok(StatementOutcome::rows(batch));
        };
        let table = info.table.clone().unwrap_or_default();
        match info.operation {
            Operation::Select => self.execute_select(&info, &table, adapter).await,
            Operation::Insert => {
                if info.values.is_empty() {
                    return Err(Error::query(
                        "INSERT requires an explicit column list with a single VALUES row",
                    ));
                }
                Ok(StatementOutcome::affected(
                    adapter.insert(&table, &info.values).await?,
                ))
            }
            Operation::Update => Ok(StatementOutcome::affected(
                adapter.update(&table, &info.values, &info.predicates).await?,
            )),
            Operation::Delete => Ok(StatementOutcome::affected(
                adapter.delete(&table, &info.predicates).await?,
            )),
            Operation::Raw => {
                let batch = self.local.execute_async(&info.raw_sql).await?;
                Ok(StatementOutcome::rows(batch))
            }
        }
    }

    async fn execute_select(
        &self,
        info: &QueryInfo,
        table: &str,
        adapter: Arc<dyn AsyncAdapter>,
    ) -> Result<StatementOutcome> {
        if info.is_explain || info.has_residual_predicates {
            return self.execute_fallback(info, table, &adapter).await;
        }
        let plan = FetchPlan::from_query(info);
        match adapter.fetch(table, &plan).await {
            Ok(batch) => Ok(StatementOutcome::rows(batch)),
            Err(Error::PushdownUnsupported(reason)) => {
                debug!("pushdown declined ({}), running fallback", reason);
                self.execute_fallback(info, table, &adapter).await
            }
            Err(other) => Err(other),
        }
    }

    async fn execute_fallback(
        &self,
        info: &QueryInfo,
        table: &str,
        adapter: &Arc<dyn AsyncAdapter>,
    ) -> Result<StatementOutcome> {
        let plan = FetchPlan::new().with_predicates(info.predicates.clone());
        let batch = adapter.fetch(table, &plan).await?;

        let temp = temp_name();
        self.local.register_batch(&temp, batch)?;
        let mut guard = TempRegistrations::new(&self.local);
        guard.tables.push(temp.clone());

        let rewritten = rewrite_from(&info.raw_sql, table, &temp)?;
        let result = self.local.execute_async(&rewritten).await?;
        Ok(StatementOutcome::rows(result))
    }

    async fn execute_virtual_join(&self, info: &QueryInfo) -> Result<StatementOutcome> {
        let mut tables: Vec<String> = Vec::new();
        if let Some(table) = &info.table {
            tables.push(table.clone());
        }
        for join in &info.joins {
            if !tables.contains(&join.table) {
                tables.push(join.table.clone());
            }
        }

        let mut guard = TempRegistrations::new(&self.local);
        for table in &tables {
            let Some(adapter) = self.resolve_adapter(Some(table)) else {
                continue;
            };
            let plan = FetchPlan::new().with_columns(vec!["*".to_string()]);
            let batch = adapter.fetch(table, &plan).await?;
            let (schema, leaf) = split_qualified(table);
            match schema {
                Some(schema) => {
                    let temp = temp_name();
                    self.local.register_batch(&temp, batch)?;
                    guard.tables.push(temp.clone());
                    self.local.register_view_async(&schema, &leaf, &temp).await?;
                    guard.views.push((schema, leaf));
                }
                None => {
                    self.local.register_batch(&leaf, batch)?;
                    guard.tables.push(leaf);
                }
            }
        }

        let result = self.local.execute_async(&info.raw_sql).await?;
        Ok(StatementOutcome::unknown_rows(result))
    }
}
