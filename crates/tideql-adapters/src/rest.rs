use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use serde_json::Value as JsonValue;
use tideql_arrow::{infer_columns, records_to_batch, JsonRecord, RecordBatch};
use tideql_common::column::ColumnInfo;
use tideql_common::error::{Error, Result};
use tideql_common::types::{Value, ValueMap};
use tideql_planner::{Predicate, PredicateOp, PredicateValue};
use tideql_http::{
    async_pool, blocking_pool, host_key, transport_error, AsyncHttpPool, HttpPool, RetryController,
};

use crate::auth::Auth;
use crate::schema_cache::SchemaCache;
use crate::{
    clean_column, key_predicate, normalize_host, rate_limit_from_headers, status_error,
    table_leaf, Adapter, AsyncAdapter, FetchPlan,
};

const ADAPTER_NAME: &str = "rest";

/// How an endpoint expects filters on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FilterFormat {
    /// Equality predicates become `col=value` query parameters.
    #[default]
    Query,
}

/// Per-endpoint configuration for the generic REST adapter.
#[derive(Debug, Clone)]
pub struct EndpointConfig {
    pub path: String,
    pub id_field: String,
    pub filter_format: FilterFormat,
    /// When false every predicate is applied client-side after fetch.
    pub supports_filter: bool,
}

impl EndpointConfig {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            id_field: "id".to_string(),
            filter_format: FilterFormat::Query,
            supports_filter: true,
        }
    }

    pub fn with_id_field(mut self, id_field: impl Into<String>) -> Self {
        self.id_field = id_field.into();
        self
    }

    pub fn with_filter_format(mut self, filter_format: FilterFormat) -> Self {
        self.filter_format = filter_format;
        self
    }

    pub fn with_supports_filter(mut self, supports_filter: bool) -> Self {
        self.supports_filter = supports_filter;
        self
    }
}

/// Adapter for plain JSON-over-HTTP APIs described by an endpoint map.
///
/// Only equality filters push down (as query parameters); every other
/// predicate, and all of them for endpoints declaring
/// `supports_filter = false`, is applied client-side under SQL
/// three-valued logic, so the adapter never returns wrong rows. Ordering
/// and aggregation never push down.
pub struct RestAdapter {
    host: String,
    pool_host: String,
    auth: Auth,
    endpoints: HashMap<String, EndpointConfig>,
    cache: Arc<SchemaCache>,
    pool: Arc<HttpPool>,
    apool: Arc<AsyncHttpPool>,
    retry: RetryController,
}

impl RestAdapter {
    pub fn new(host: impl Into<String>) -> Self {
        let host = normalize_host(&host.into());
        Self {
            pool_host: host_key(&host),
            host,
            auth: Auth::None,
            endpoints: HashMap::new(),
            cache: Arc::new(SchemaCache::new()),
            pool: blocking_pool(),
            apool: async_pool(),
            retry: RetryController::new(3, Duration::from_secs(1)),
        }
    }

    pub fn with_auth(mut self, auth: Auth) -> Self {
        self.auth = auth;
        self
    }

    pub fn with_schema_cache(mut self, cache: Arc<SchemaCache>) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_endpoint(mut self, table: impl Into<String>, config: EndpointConfig) -> Self {
        self.endpoints.insert(table.into(), config);
        self
    }

    pub fn with_retry(mut self, retry: RetryController) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_pools(mut self, pool: Arc<HttpPool>, apool: Arc<AsyncHttpPool>) -> Self {
        self.pool = pool;
        self.apool = apool;
        self
    }

    fn endpoint(&self, table: &str) -> EndpointConfig {
        self.endpoints
            .get(table)
            .cloned()
            .unwrap_or_else(|| EndpointConfig::new(format!("/{}", table)))
    }

    fn reject_unsupported(plan: &FetchPlan) -> Result<()> {
        if plan.wants_aggregation() {
            return Err(Error::pushdown_unsupported(
                "generic REST endpoints cannot aggregate",
            ));
        }
        if !plan.order_by.is_empty() {
            return Err(Error::pushdown_unsupported(
                "generic REST endpoints cannot order results",
            ));
        }
        Ok(())
    }

    /// Splits predicates into pushable query parameters and a client-side
    /// residue.
    fn split_predicates<'a>(
        config: &EndpointConfig,
        predicates: &'a [Predicate],
    ) -> (Vec<(String, String)>, Vec<&'a Predicate>) {
        let mut params = Vec::new();
        let mut residual = Vec::new();
        for predicate in predicates {
            let pushable = config.supports_filter
                && config.filter_format == FilterFormat::Query
                && predicate.op == PredicateOp::Eq;
            match (pushable, predicate.value.as_scalar()) {
                (true, Some(value)) if !value.is_null() && !value.is_placeholder() => {
                    params.push((clean_column(&predicate.column), value.to_string()));
                }
                _ => residual.push(predicate),
            }
        }
        (params, residual)
    }

    fn compare_values(field: &Value, literal: &Value) -> Option<std::cmp::Ordering> {
        match (field, literal) {
            (Value::Int64(a), Value::Int64(b)) => a.partial_cmp(b),
            (Value::Float64(a), Value::Float64(b)) => a.partial_cmp(b),
            (Value::Int64(a), Value::Float64(b)) => (*a as f64).partial_cmp(b),
            (Value::Float64(a), Value::Int64(b)) => a.partial_cmp(&(*b as f64)),
            (Value::Bool(a), Value::Bool(b)) => a.partial_cmp(b),
            _ => field.to_string().partial_cmp(&literal.to_string()),
        }
    }

    /// SQL three-valued logic over one record: comparisons against NULL are
    /// unknown and filter the record out.
    fn record_matches(record: &JsonRecord, predicate: &Predicate) -> bool {
        let column = clean_column(&predicate.column);
        let field = record.get(&column).cloned().unwrap_or(JsonValue::Null);
        match predicate.op {
            PredicateOp::IsNull => field.is_null(),
            PredicateOp::IsNotNull => !field.is_null(),
            _ if field.is_null() => false,
            PredicateOp::In => {
                let field = Value::from_json(&field);
                match &predicate.value {
                    PredicateValue::List(values) => values
                        .iter()
                        .any(|v| Self::compare_values(&field, v) == Some(std::cmp::Ordering::Equal)),
                    PredicateValue::Scalar(value) => {
                        Self::compare_values(&field, value) == Some(std::cmp::Ordering::Equal)
                    }
                }
            }
            PredicateOp::Like => {
                let Some(pattern) = predicate.value.as_scalar() else {
                    return false;
                };
                let needle = pattern.to_string().replace('%', "");
                match field {
                    JsonValue::String(s) => s.contains(&needle),
                    other => other.to_string().contains(&needle),
                }
            }
            op => {
                let Some(literal) = predicate.value.as_scalar() else {
                    return false;
                };
                if literal.is_null() {
                    return false;
                }
                let field = Value::from_json(&field);
                let Some(ordering) = Self::compare_values(&field, literal) else {
                    return false;
                };
                match op {
                    PredicateOp::Eq => ordering == std::cmp::Ordering::Equal,
                    PredicateOp::NotEq => ordering != std::cmp::Ordering::Equal,
                    PredicateOp::Lt => ordering == std::cmp::Ordering::Less,
                    PredicateOp::LtEq => ordering != std::cmp::Ordering::Greater,
                    PredicateOp::Gt => ordering == std::cmp::Ordering::Greater,
                    PredicateOp::GtEq => ordering != std::cmp::Ordering::Less,
                    _ => false,
                }
            }
        }
    }

    fn parse_records(data: JsonValue) -> Vec<JsonRecord> {
        match data {
            JsonValue::Array(items) => items
                .into_iter()
                .filter_map(|item| match item {
                    JsonValue::Object(map) => Some(map),
                    _ => None,
                })
                .collect(),
            JsonValue::Object(mut map) => {
                for key in ["values", "data", "items", "results"] {
                    if let Some(JsonValue::Array(items)) = map.remove(key) {
                        return items
                            .into_iter()
                            .filter_map(|item| match item {
                                JsonValue::Object(map) => Some(map),
                                _ => None,
                            })
                            .collect();
                    }
                }
                vec![map]
            }
            _ => Vec::new(),
        }
    }

    fn build_params(
        config: &EndpointConfig,
        plan: &FetchPlan,
    ) -> (Vec<(String, String)>, Vec<Predicate>) {
        let (mut params, residual) = Self::split_predicates(config, &plan.predicates);
        if let Some(limit) = plan.limit {
            params.push(("limit".to_string(), limit.to_string()));
        }
        if let Some(offset) = plan.offset {
            params.push(("offset".to_string(), offset.to_string()));
        }
        (params, residual.into_iter().cloned().collect())
    }

    fn finish(
        &self,
        table: &str,
        plan: &FetchPlan,
        data: JsonValue,
        residual: &[Predicate],
    ) -> Result<RecordBatch> {
        let mut records = Self::parse_records(data);
        if !residual.is_empty() {
            debug!("applying {} predicates client-side", residual.len());
            records.retain(|record| residual.iter().all(|p| Self::record_matches(record, p)));
        }
        if let Some(limit) = plan.limit {
            records.truncate(limit as usize);
        }
        let columns = match self.cache.get(ADAPTER_NAME, table) {
            Some(cached) => cached,
            None => {
                let columns = infer_columns(&records);
                if !columns.is_empty() {
                    self.cache.set(ADAPTER_NAME, table, columns.clone());
                }
                columns
            }
        };
        let selection = plan.cleaned_columns();
        records_to_batch(&records, &columns, selection.as_deref())
    }

    fn require_id(&self, config: &EndpointConfig, predicates: &[Predicate], operation: &str) -> Result<String> {
        key_predicate(predicates, &[config.id_field.as_str()]).ok_or_else(|| {
            Error::query(format!(
                "{} requires a {} equality predicate in the WHERE clause",
                operation, config.id_field
            ))
        })
    }

    fn get_json(&self, url: &str, params: &[(String, String)]) -> Result<JsonValue> {
        self.retry.execute(|| {
            let transport = self.pool.acquire(&self.pool_host)?;
            let response = self
                .auth
                .apply(transport.get(url).query(params).header("Accept", "application/json"))
                .send()
                .map_err(|e| transport_error("resource read", e))?;
            if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
                return Err(rate_limit_from_headers(response.headers()));
            }
            if !response.status().is_success() {
                return Err(status_error("resource read", response.status()));
            }
            response
                .json::<JsonValue>()
                .map_err(|e| Error::adapter(format!("malformed resource response: {}", e)))
        })
    }

    fn send_write(
        &self,
        operation: &str,
        method: reqwest::Method,
        url: &str,
        body: Option<&JsonValue>,
    ) -> Result<u64> {
        let transport = self.pool.acquire(&self.pool_host)?;
        let mut request = transport.request(method, url);
        if let Some(body) = body {
            request = request.json(body);
        }
        let response = self
            .auth
            .apply(request)
            .send()
            .map_err(|e| transport_error(operation, e))?;
        if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(rate_limit_from_headers(response.headers()));
        }
        if !response.status().is_success() {
            return Err(Error::query(format!(
                "{} failed with status {}",
                operation,
                response.status()
            )));
        }
        Ok(1)
    }

    fn values_body(values: &ValueMap) -> JsonValue {
        JsonValue::Object(values.iter().map(|(k, v)| (k.clone(), v.to_json())).collect())
    }
}

impl Adapter for RestAdapter {
    fn name(&self) -> &str {
        ADAPTER_NAME
    }

    fn supports_insert(&self) -> bool {
        true
    }

    fn supports_update(&self) -> bool {
        true
    }

    fn supports_delete(&self) -> bool {
        true
    }

    fn fetch(&self, table: &str, plan: &FetchPlan) -> Result<RecordBatch> {
        Self::reject_unsupported(plan)?;
        let table = table_leaf(table);
        let config = self.endpoint(&table);
        let (params, residual) = Self::build_params(&config, plan);
        let url = format!("{}{}", self.host, config.path);
        let data = self.get_json(&url, &params)?;
        self.finish(&table, plan, data, &residual)
    }

    fn get_schema(&self, table: &str) -> Result<Vec<ColumnInfo>> {
        let table = table_leaf(table);
        if let Some(cached) = self.cache.get(ADAPTER_NAME, &table) {
            return Ok(cached);
        }
        let batch = Adapter::fetch(self, &table, &FetchPlan::new().with_limit(1))?;
        Ok(tideql_arrow::columns_from_schema(&batch.schema()))
    }

    fn list_tables(&self) -> Result<Vec<String>> {
        let mut tables: Vec<String> = self.endpoints.keys().cloned().collect();
        tables.sort();
        Ok(tables)
    }

    fn insert(&self, table: &str, values: &ValueMap) -> Result<u64> {
        let table = table_leaf(table);
        let config = self.endpoint(&table);
        let url = format!("{}{}", self.host, config.path);
        self.send_write("INSERT", reqwest::Method::POST, &url, Some(&Self::values_body(values)))
    }

    fn update(&self, table: &str, values: &ValueMap, predicates: &[Predicate]) -> Result<u64> {
        let table = table_leaf(table);
        let config = self.endpoint(&table);
        let id = self.require_id(&config, predicates, "UPDATE")?;
        let url = format!("{}{}/{}", self.host, config.path, id);
        self.send_write("UPDATE", reqwest::Method::PATCH, &url, Some(&Self::values_body(values)))
    }

    fn delete(&self, table: &str, predicates: &[Predicate]) -> Result<u64> {
        let table = table_leaf(table);
        let config = self.endpoint(&table);
        let id = self.require_id(&config, predicates, "DELETE")?;
        let url = format!("{}{}/{}", self.host, config.path, id);
        self.send_write("DELETE", reqwest::Method::DELETE, &url, None)
    }
}

#[async_trait]
impl AsyncAdapter for RestAdapter {
    fn name(&self) -> &str {
        ADAPTER_NAME
    }

    fn supports_insert(&self) -> bool {
        true
    }

    fn supports_update(&self) -> bool {
        true
    }

    fn supports_delete(&self) -> bool {
        true
    }

    async fn fetch(&self, table: &str, plan: &FetchPlan) -> Result<RecordBatch> {
        Self::reject_unsupported(plan)?;
        let table = table_leaf(table);
        let config = self.endpoint(&table);
        let (params, residual) = Self::build_params(&config, plan);
        let url = format!("{}{}", self.host, config.path);
        let url: &str = &url;
        let params: &[(String, String)] = &params;
        let client = self.apool.client(&self.pool_host)?;
        let data = self
            .retry
            .execute_async(|| {
                let client = client.clone();
                async move {
                    let response = self
                        .auth
                        .apply_async(
                            client.get(url).query(params).header("Accept", "application/json"),
                        )
                        .send()
                        .await
                        .map_err(|e| transport_error("resource read", e))?;
                    if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
                        return Err(rate_limit_from_headers(response.headers()));
                    }
                    if !response.status().is_success() {
                        return Err(status_error("resource read", response.status()));
                    }
                    response
                        .json::<JsonValue>()
                        .await
                        .map_err(|e| Error::adapter(format!("malformed resource response: {}", e)))
                }
            })
            .await?;
        self.finish(&table, plan, data, &residual)
    }

    async fn get_schema(&self, table: &str) -> Result<Vec<ColumnInfo>> {
        let table = table_leaf(table);
        if let Some(cached) = self.cache.get(ADAPTER_NAME, &table) {
            return Ok(cached);
        }
        let batch = AsyncAdapter::fetch(self, &table, &FetchPlan::new().with_limit(1)).await?;
        Ok(tideql_arrow::columns_from_schema(&batch.schema()))
    }

    async fn list_tables(&self) -> Result<Vec<String>> {
        let mut tables: Vec<String> = self.endpoints.keys().cloned().collect();
        tables.sort();
        Ok(tables)
    }

    async fn insert(&self, table: &str, values: &ValueMap) -> Result<u64> {
        let table = table_leaf(table);
        let config = self.endpoint(&table);
        let client = self.apool.client(&self.pool_host)?;
        let url = format!("{}{}", self.host, config.path);
        let response = self
            .auth
            .apply_async(client.post(&url).json(&Self::values_body(values)))
            .send()
            .await
            .map_err(|e| transport_error("INSERT", e))?;
        if !response.status().is_success() {
            return Err(Error::query(format!(
                "INSERT failed with status {}",
                response.status()
            )));
        }
        Ok(1)
    }

    async fn update(&self, table: &str, values: &ValueMap, predicates: &[Predicate]) -> Result<u64> {
        let table = table_leaf(table);
        let config = self.endpoint(&table);
        let id = self.require_id(&config, predicates, "UPDATE")?;
        let client = self.apool.client(&self.pool_host)?;
        let url = format!("{}{}/{}", self.host, config.path, id);
        let response = self
            .auth
            .apply_async(client.patch(&url).json(&Self::values_body(values)))
            .send()
            .await
            .map_err(|e| transport_error("UPDATE", e))?;
        if !response.status().is_success() {
            return Err(Error::query(format!(
                "UPDATE failed with status {}",
                response.status()
            )));
        }
        Ok(1)
    }

    async fn delete(&self, table: &str, predicates: &[Predicate]) -> Result<u64> {
        let table = table_leaf(table);
        let config = self.endpoint(&table);
        let id = self.require_id(&config, predicates, "DELETE")?;
        let client = self.apool.client(&self.pool_host)?;
        let url = format!("{}{}/{}", self.host, config.path, id);
        let response = self
            .auth
            .apply_async(client.delete(&url))
            .send()
            .await
            .map_err(|e| transport_error("DELETE", e))?;
        if !response.status().is_success() {
            return Err(Error::query(format!(
                "DELETE failed with status {}",
                response.status()
            )));
        }
        Ok(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn users_adapter(server: &mockito::Server) -> RestAdapter {
        RestAdapter::new(server.url())
            .with_endpoint("users", EndpointConfig::new("/users"))
            .with_endpoint("posts", EndpointConfig::new("/posts"))
    }

    #[test]
    fn test_fetch_plain_listing() {
        let mut server = mockito::Server::new();
        let mock = server
            .mock("GET", "/users")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                json!([
                    {"id": 1, "name": "Alice", "role": "admin"},
                    {"id": 2, "name": "Bob", "role": "user"}
                ])
                .to_string(),
            )
            .create();

        let adapter = users_adapter(&server);
        let batch = Adapter::fetch(&adapter, "users", &FetchPlan::new()).unwrap();
        assert_eq!(batch.num_rows(), 2);
        assert_eq!(
            tideql_arrow::string_column_values(&batch, "name").unwrap(),
            vec!["Alice".to_string(), "Bob".to_string()]
        );
        mock.assert();
    }

    #[test]
    fn test_equality_predicates_become_query_params() {
        let mut server = mockito::Server::new();
        let mock = server
            .mock("GET", "/users")
            .match_query(mockito::Matcher::UrlEncoded("role".into(), "admin".into()))
            .with_status(200)
            .with_body(json!([{"id": 1, "name": "Alice", "role": "admin"}]).to_string())
            .create();

        let adapter = users_adapter(&server);
        let plan =
            FetchPlan::new().with_predicates(vec![Predicate::eq("role", Value::from("admin"))]);
        let batch = Adapter::fetch(&adapter, "users", &plan).unwrap();
        assert_eq!(batch.num_rows(), 1);
        mock.assert();
    }

    #[test]
    fn test_limit_offset_become_query_params() {
        let mut server = mockito::Server::new();
        let mock = server
            .mock("GET", "/users")
            .match_query(mockito::Matcher::AllOf(vec![
                mockito::Matcher::UrlEncoded("limit".into(), "1".into()),
                mockito::Matcher::UrlEncoded("offset".into(), "2".into()),
            ]))
            .with_status(200)
            .with_body(json!([{"id": 3, "name": "Charlie"}]).to_string())
            .create();

        let adapter = users_adapter(&server);
        let plan = FetchPlan::new().with_limit(1).with_offset(2);
        let batch = Adapter::fetch(&adapter, "users", &plan).unwrap();
        assert_eq!(batch.num_rows(), 1);
        mock.assert();
    }

    #[test]
    fn test_client_side_filtering_when_unsupported() {
        let mut server = mockito::Server::new();
        // The endpoint ignores filters and returns everything.
        let mock = server
            .mock("GET", "/users")
            .with_status(200)
            .with_body(
                json!([
                    {"id": 1, "name": "Alice", "role": "admin"},
                    {"id": 2, "name": "Bob", "role": "user"}
                ])
                .to_string(),
            )
            .create();

        let adapter = RestAdapter::new(server.url()).with_endpoint(
            "users",
            EndpointConfig::new("/users").with_supports_filter(false),
        );
        let plan =
            FetchPlan::new().with_predicates(vec![Predicate::eq("role", Value::from("admin"))]);
        let batch = Adapter::fetch(&adapter, "users", &plan).unwrap();
        assert_eq!(batch.num_rows(), 1);
        assert_eq!(
            tideql_arrow::string_column_values(&batch, "name").unwrap(),
            vec!["Alice".to_string()]
        );
        mock.assert();
    }

    #[test]
    fn test_non_equality_predicates_apply_client_side() {
        let mut server = mockito::Server::new();
        let mock = server
            .mock("GET", "/posts")
            .with_status(200)
            .with_body(
                json!([
                    {"id": 1, "score": 10},
                    {"id": 2, "score": 50},
                    {"id": 3, "score": null}
                ])
                .to_string(),
            )
            .create();

        let adapter = users_adapter(&server);
        let plan = FetchPlan::new().with_predicates(vec![Predicate::new(
            "score",
            PredicateOp::Gt,
            PredicateValue::Scalar(Value::Int64(20)),
        )]);
        let batch = Adapter::fetch(&adapter, "posts", &plan).unwrap();
        // NULL comparisons are unknown and filtered out.
        assert_eq!(batch.num_rows(), 1);
        mock.assert();
    }

    #[test]
    fn test_order_by_is_pushdown_unsupported() {
        let adapter = RestAdapter::new("https://api.example.com");
        let plan = FetchPlan::new().with_order_by(vec![(
            "name".to_string(),
            tideql_planner::SortDirection::Asc,
        )]);
        let err = Adapter::fetch(&adapter, "users", &plan).unwrap_err();
        assert!(err.is_pushdown_unsupported());
    }

    #[test]
    fn test_writes_use_id_field() {
        let mut server = mockito::Server::new();
        let insert = server
            .mock("POST", "/users")
            .match_body(mockito::Matcher::Json(json!({"name": "Charlie"})))
            .with_status(201)
            .create();
        let update = server
            .mock("PATCH", "/users/1")
            .with_status(200)
            .create();
        let delete = server
            .mock("DELETE", "/users/1")
            .with_status(204)
            .create();

        let adapter = users_adapter(&server);
        let mut values = ValueMap::new();
        values.insert("name".to_string(), Value::from("Charlie"));
        assert_eq!(Adapter::insert(&adapter, "users", &values).unwrap(), 1);

        let predicates = vec![Predicate::eq("id", Value::Int64(1))];
        let mut values = ValueMap::new();
        values.insert("name".to_string(), Value::from("Alice Updated"));
        assert_eq!(
            Adapter::update(&adapter, "users", &values, &predicates).unwrap(),
            1
        );
        assert_eq!(Adapter::delete(&adapter, "users", &predicates).unwrap(), 1);

        insert.assert();
        update.assert();
        delete.assert();

        let err = Adapter::delete(&adapter, "users", &[]).unwrap_err();
        assert!(err.to_string().contains("id equality"));
    }

    #[test]
    fn test_record_matches_three_valued_logic() {
        let record: JsonRecord = match json!({"role": "admin", "score": 10, "gone": null}) {
            JsonValue::Object(map) => map,
            _ => unreachable!(),
        };
        assert!(RestAdapter::record_matches(
            &record,
            &Predicate::eq("role", Value::from("admin"))
        ));
        assert!(!RestAdapter::record_matches(
            &record,
            &Predicate::eq("gone", Value::from("x"))
        ));
        assert!(RestAdapter::record_matches(
            &record,
            &Predicate::new(
                "gone",
                PredicateOp::IsNull,
                PredicateValue::Scalar(Value::Null)
            )
        ));
        assert!(RestAdapter::record_matches(
            &record,
            &Predicate::new(
                "score",
                PredicateOp::In,
                PredicateValue::List(vec![Value::Int64(5), Value::Int64(10)])
            )
        ));
        assert!(!RestAdapter::record_matches(
            &record,
            &Predicate::new(
                "missing",
                PredicateOp::Eq,
                PredicateValue::Scalar(Value::from("x"))
            )
        ));
    }
}
