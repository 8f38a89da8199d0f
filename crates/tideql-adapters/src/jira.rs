use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use itertools::Itertools;
use log::debug;
use serde_json::{json, Map, Value as JsonValue};
use tideql_arrow::{infer_columns, records_to_batch, JsonRecord, RecordBatch};
use tideql_common::column::ColumnInfo;
use tideql_common::error::{Error, Result};
use tideql_common::types::{Value, ValueMap};
use tideql_planner::{Predicate, PredicateOp, PredicateValue, SortDirection};
use tideql_http::{
    async_pool, blocking_pool, host_key, transport_error, AsyncHttpPool, HttpPool, RetryController,
};

use crate::auth::Auth;
use crate::schema_cache::SchemaCache;
use crate::{
    key_predicate, normalize_host, rate_limit_from_headers, status_error, Adapter, AsyncAdapter,
    FetchPlan,
};

const ADAPTER_NAME: &str = "jira";
/// The search API caps page sizes at 100.
const MAX_PAGE_SIZE: usize = 100;

#[derive(Debug, Clone, Copy)]
struct Endpoint {
    path: &'static str,
    jql: bool,
    id_field: &'static str,
}

/// Logical tables map onto fixed REST endpoints; unknown names are treated
/// as issue searches.
fn endpoint_for(table: &str) -> Endpoint {
    match table {
        "project" | "projects" => Endpoint {
            path: "/rest/api/3/project/search",
            jql: false,
            id_field: "key",
        },
        "user" | "users" => Endpoint {
            path: "/rest/api/3/users/search",
            jql: false,
            id_field: "accountId",
        },
        "status" => Endpoint {
            path: "/rest/api/3/status",
            jql: false,
            id_field: "id",
        },
        "priority" => Endpoint {
            path: "/rest/api/3/priority",
            jql: false,
            id_field: "id",
        },
        "issuetype" => Endpoint {
            path: "/rest/api/3/issuetype",
            jql: false,
            id_field: "id",
        },
        "field" => Endpoint {
            path: "/rest/api/3/field",
            jql: false,
            id_field: "id",
        },
        _ => Endpoint {
            path: "/rest/api/3/search",
            jql: true,
            id_field: "key",
        },
    }
}

pub const TABLES: &[&str] = &[
    "issue", "issues", "project", "projects", "user", "users", "status", "priority", "issuetype",
    "field",
];

/// JQL-speaking adapter for Jira-style ticketing backends.
///
/// Issue reads go through `POST /rest/api/3/search` with a JQL body and
/// `startAt`/`maxResults` paging; the other resources use their simple GET
/// endpoints. Aggregation never pushes down.
pub struct JiraAdapter {
    host: String,
    pool_host: String,
    auth: Auth,
    cache: Arc<SchemaCache>,
    pool: Arc<HttpPool>,
    apool: Arc<AsyncHttpPool>,
    retry: RetryController,
    page_size: usize,
    expand: Vec<String>,
}

impl JiraAdapter {
    pub fn new(host: impl Into<String>) -> Self {
        let host = normalize_host(&host.into());
        Self {
            pool_host: host_key(&host),
            host,
            auth: Auth::None,
            cache: Arc::new(SchemaCache::new()),
            pool: blocking_pool(),
            apool: async_pool(),
            retry: RetryController::new(3, Duration::from_secs(1)),
            page_size: MAX_PAGE_SIZE,
            expand: vec!["names".to_string(), "schema".to_string()],
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

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.clamp(1, MAX_PAGE_SIZE);
        self
    }

    pub fn with_expand(mut self, expand: Vec<String>) -> Self {
        self.expand = expand;
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

    fn table_name(table: &str) -> String {
        crate::table_leaf(table).to_lowercase()
    }

    fn quote(value: &Value) -> String {
        match value {
            Value::String(s) => format!("\"{}\"", s),
            other => other.to_string(),
        }
    }

    fn jql_term(predicate: &Predicate) -> String {
        let column = &predicate.column;
        match predicate.op {
            PredicateOp::IsNull => format!("{} IS EMPTY", column),
            PredicateOp::IsNotNull => format!("{} IS NOT EMPTY", column),
            PredicateOp::Like => {
                let pattern = predicate
                    .value
                    .as_scalar()
                    .map(|v| v.to_string())
                    .unwrap_or_default();
                let contains = pattern.replace('%', "").replace('_', "?");
                format!("{} ~ \"{}\"", column, contains)
            }
            PredicateOp::In => match &predicate.value {
                PredicateValue::List(values) => format!(
                    "{} IN ({})",
                    column,
                    values.iter().map(Self::quote).join(", ")
                ),
                PredicateValue::Scalar(value) => format!("{} IN ({})", column, Self::quote(value)),
            },
            op => {
                let value = predicate
                    .value
                    .as_scalar()
                    .map(Self::quote)
                    .unwrap_or_default();
                format!("{} {} {}", column, op, value)
            }
        }
    }

    fn build_jql(predicates: &[Predicate], order_by: &[(String, SortDirection)]) -> String {
        let mut jql = predicates.iter().map(Self::jql_term).join(" AND ");
        if !order_by.is_empty() {
            let order = order_by
                .iter()
                .map(|(column, direction)| format!("{} {}", column, direction.as_str()))
                .join(", ");
            jql.push_str(" ORDER BY ");
            jql.push_str(&order);
        }
        jql.trim().to_string()
    }

    fn search_body(&self, jql: &str, start_at: u64, max_results: usize, plan: &FetchPlan) -> JsonValue {
        let mut body = json!({
            "jql": jql,
            "startAt": start_at,
            "maxResults": max_results,
            "expand": self.expand,
        });
        if let Some(columns) = plan.cleaned_columns() {
            body["fields"] = json!(columns);
        }
        body
    }

    /// Flattens one issue: top-level identifiers plus each field, with
    /// nested objects collapsed to their display-ish member and arrays to a
    /// comma list or JSON text.
    fn flatten_issue(issue: &JsonValue) -> JsonRecord {
        let mut record = Map::new();
        for key in ["id", "key", "self"] {
            record.insert(key.to_string(), issue.get(key).cloned().unwrap_or(JsonValue::Null));
        }
        let Some(fields) = issue.get("fields").and_then(JsonValue::as_object) else {
            return record;
        };
        for (name, value) in fields {
            let flattened = match value {
                JsonValue::Null => JsonValue::Null,
                JsonValue::Object(object) => ["name", "displayName", "value", "key"]
                    .iter()
                    .find_map(|k| object.get(*k).cloned())
                    .unwrap_or_else(|| JsonValue::String(value.to_string())),
                JsonValue::Array(items) => {
                    let names: Option<Vec<&str>> = items
                        .iter()
                        .map(|item| item.get("name").and_then(JsonValue::as_str))
                        .collect();
                    match names {
                        Some(names) if !names.is_empty() => {
                            JsonValue::String(names.join(", "))
                        }
                        _ => JsonValue::String(value.to_string()),
                    }
                }
                other => other.clone(),
            };
            record.insert(name.clone(), flattened);
        }
        record
    }

    fn parse_listing(data: JsonValue) -> Vec<JsonRecord> {
        match data {
            JsonValue::Array(items) => items
                .into_iter()
                .filter_map(|item| match item {
                    JsonValue::Object(map) => Some(map),
                    _ => None,
                })
                .collect(),
            JsonValue::Object(mut map) => match map.remove("values") {
                Some(JsonValue::Array(items)) => items
                    .into_iter()
                    .filter_map(|item| match item {
                        JsonValue::Object(map) => Some(map),
                        _ => None,
                    })
                    .collect(),
                _ => vec![map],
            },
            _ => Vec::new(),
        }
    }

    fn schema_for(&self, table: &str, records: &[JsonRecord]) -> Vec<ColumnInfo> {
        if let Some(cached) = self.cache.get(ADAPTER_NAME, table) {
            return cached;
        }
        let columns = infer_columns(records);
        if !columns.is_empty() {
            self.cache.set(ADAPTER_NAME, table, columns.clone());
        }
        columns
    }

    fn reject_aggregation(plan: &FetchPlan) -> Result<()> {
        if plan.wants_aggregation() {
            return Err(Error::pushdown_unsupported(
                "the search API has no aggregation surface",
            ));
        }
        Ok(())
    }

    fn require_issue_table(table: &str, operation: &str) -> Result<()> {
        if table == "issue" || table == "issues" {
            Ok(())
        } else {
            Err(Error::query(format!(
                "{} is only supported for issues, not {}",
                operation, table
            )))
        }
    }

    fn require_issue_key(
        endpoint: &Endpoint,
        predicates: &[Predicate],
        operation: &str,
    ) -> Result<String> {
        key_predicate(predicates, &[endpoint.id_field, "id"]).ok_or_else(|| {
            Error::query(format!(
                "{} requires a key or id equality predicate in the WHERE clause",
                operation
            ))
        })
    }

    fn issue_url(&self, key: Option<&str>) -> String {
        match key {
            Some(key) => format!("{}/rest/api/3/issue/{}", self.host, key),
            None => format!("{}/rest/api/3/issue", self.host),
        }
    }

    // ---- blocking I/O -------------------------------------------------

    fn search(&self, table: &str, plan: &FetchPlan) -> Result<RecordBatch> {
        let url = format!("{}{}", self.host, "/rest/api/3/search");
        let jql = Self::build_jql(&plan.predicates, &plan.order_by);
        let offset = plan.offset.unwrap_or(0);
        let limit = plan.limit.map(|l| l as usize);
        let max_results = limit.unwrap_or(self.page_size).min(self.page_size);

        let mut issues: Vec<JsonRecord> = Vec::new();
        loop {
            let start_at = offset + issues.len() as u64;
            let body = self.search_body(&jql, start_at, max_results, plan);
            let data = self.retry.execute(|| {
                let transport = self.pool.acquire(&self.pool_host)?;
                let response = self
                    .auth
                    .apply(transport.post(&url).json(&body).header("Accept", "application/json"))
                    .send()
                    .map_err(|e| transport_error("issue search", e))?;
                if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
                    return Err(rate_limit_from_headers(response.headers()));
                }
                if !response.status().is_success() {
                    return Err(status_error("issue search", response.status()));
                }
                response
                    .json::<JsonValue>()
                    .map_err(|e| Error::adapter(format!("malformed search response: {}", e)))
            })?;

            let page: Vec<JsonRecord> = data
                .get("issues")
                .and_then(JsonValue::as_array)
                .map(|items| items.iter().map(Self::flatten_issue).collect())
                .unwrap_or_default();
            let page_len = page.len();
            issues.extend(page);

            let total = data.get("total").and_then(JsonValue::as_u64).unwrap_or(0);
            if offset + issues.len() as u64 >= total {
                break;
            }
            if let Some(limit) = limit {
                if issues.len() >= limit {
                    break;
                }
            }
            if page_len < self.page_size {
                break;
            }
        }
        if let Some(limit) = limit {
            issues.truncate(limit);
        }
        debug!("search returned {} issues", issues.len());

        let columns = self.schema_for(table, &issues);
        let selection = plan.cleaned_columns();
        records_to_batch(&issues, &columns, selection.as_deref())
    }

    fn fetch_listing(&self, table: &str, endpoint: Endpoint, plan: &FetchPlan) -> Result<RecordBatch> {
        let url = format!("{}{}", self.host, endpoint.path);
        let mut params: Vec<(String, String)> = Vec::new();
        if let Some(limit) = plan.limit {
            params.push((
                "maxResults".to_string(),
                (limit as usize).min(self.page_size).to_string(),
            ));
        }
        if let Some(offset) = plan.offset {
            params.push(("startAt".to_string(), offset.to_string()));
        }

        let data = self.retry.execute(|| {
            let transport = self.pool.acquire(&self.pool_host)?;
            let response = self
                .auth
                .apply(transport.get(&url).query(&params).header("Accept", "application/json"))
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
        })?;

        let mut records = Self::parse_listing(data);
        if let Some(limit) = plan.limit {
            records.truncate(limit as usize);
        }
        let columns = self.schema_for(table, &records);
        let selection = plan.cleaned_columns();
        records_to_batch(&records, &columns, selection.as_deref())
    }

    fn send_issue_write(
        &self,
        operation: &str,
        method: reqwest::Method,
        url: &str,
        body: Option<&JsonValue>,
    ) -> Result<u64> {
        let transport = self.pool.acquire(&self.pool_host)?;
        let mut request = transport
            .request(method, url)
            .header("Accept", "application/json");
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
        if response.status() == reqwest::StatusCode::UNAUTHORIZED
            || response.status() == reqwest::StatusCode::FORBIDDEN
        {
            return Err(status_error(operation, response.status()));
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

    fn fields_body(values: &ValueMap) -> JsonValue {
        json!({
            "fields": JsonValue::Object(
                values.iter().map(|(k, v)| (k.clone(), v.to_json())).collect::<Map<_, _>>()
            )
        })
    }
}

impl Adapter for JiraAdapter {
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
        Self::reject_aggregation(plan)?;
        let table = Self::table_name(table);
        let endpoint = endpoint_for(&table);
        if endpoint.jql {
            self.search(&table, plan)
        } else {
            if !plan.order_by.is_empty() {
                return Err(Error::pushdown_unsupported(format!(
                    "the {} endpoint cannot order results",
                    table
                )));
            }
            self.fetch_listing(&table, endpoint, plan)
        }
    }

    fn get_schema(&self, table: &str) -> Result<Vec<ColumnInfo>> {
        let table = Self::table_name(table);
        if let Some(cached) = self.cache.get(ADAPTER_NAME, &table) {
            return Ok(cached);
        }
        let batch = Adapter::fetch(self, &table, &FetchPlan::new().with_limit(1))?;
        let columns = tideql_arrow::columns_from_schema(&batch.schema());
        if !columns.is_empty() {
            self.cache.set(ADAPTER_NAME, &table, columns.clone());
        }
        Ok(columns)
    }

    fn list_tables(&self) -> Result<Vec<String>> {
        Ok(TABLES.iter().map(|t| t.to_string()).collect())
    }

    fn insert(&self, table: &str, values: &ValueMap) -> Result<u64> {
        let table = Self::table_name(table);
        Self::require_issue_table(&table, "INSERT")?;
        let body = Self::fields_body(values);
        self.send_issue_write("INSERT", reqwest::Method::POST, &self.issue_url(None), Some(&body))
    }

    fn update(&self, table: &str, values: &ValueMap, predicates: &[Predicate]) -> Result<u64> {
        let table = Self::table_name(table);
        Self::require_issue_table(&table, "UPDATE")?;
        let key = Self::require_issue_key(&endpoint_for(&table), predicates, "UPDATE")?;
        let body = Self::fields_body(values);
        self.send_issue_write(
            "UPDATE",
            reqwest::Method::PUT,
            &self.issue_url(Some(&key)),
            Some(&body),
        )
    }

    fn delete(&self, table: &str, predicates: &[Predicate]) -> Result<u64> {
        let table = Self::table_name(table);
        Self::require_issue_table(&table, "DELETE")?;
        let key = Self::require_issue_key(&endpoint_for(&table), predicates, "DELETE")?;
        self.send_issue_write("DELETE", reqwest::Method::DELETE, &self.issue_url(Some(&key)), None)
    }
}

#[async_trait]
impl AsyncAdapter for JiraAdapter {
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
        Self::reject_aggregation(plan)?;
        let table = Self::table_name(table);
        let endpoint = endpoint_for(&table);
        let client = self.apool.client(&self.pool_host)?;

        if endpoint.jql {
            let url = format!("{}{}", self.host, "/rest/api/3/search");
            let url: &str = &url;
            let jql = Self::build_jql(&plan.predicates, &plan.order_by);
            let offset = plan.offset.unwrap_or(0);
            let limit = plan.limit.map(|l| l as usize);
            let max_results = limit.unwrap_or(self.page_size).min(self.page_size);

            let mut issues: Vec<JsonRecord> = Vec::new();
            loop {
                let start_at = offset + issues.len() as u64;
                let body = self.search_body(&jql, start_at, max_results, plan);
                let data = self
                    .retry
                    .execute_async(|| {
                        let client = client.clone();
                        let body = body.clone();
                        async move {
                            let response = self
                                .auth
                                .apply_async(
                                    client.post(url).json(&body).header("Accept", "application/json"),
                                )
                                .send()
                                .await
                                .map_err(|e| transport_error("issue search", e))?;
                            if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
                                return Err(rate_limit_from_headers(response.headers()));
                            }
                            if !response.status().is_success() {
                                return Err(status_error("issue search", response.status()));
                            }
                            response.json::<JsonValue>().await.map_err(|e| {
                                Error::adapter(format!("malformed search response: {}", e))
                            })
                        }
                    })
                    .await?;

                let page: Vec<JsonRecord> = data
                    .get("issues")
                    .and_then(JsonValue::as_array)
                    .map(|items| items.iter().map(Self::flatten_issue).collect())
                    .unwrap_or_default();
                let page_len = page.len();
                issues.extend(page);

                let total = data.get("total").and_then(JsonValue::as_u64).unwrap_or(0);
                if offset + issues.len() as u64 >= total {
                    break;
                }
                if let Some(limit) = limit {
                    if issues.len() >= limit {
                        break;
                    }
                }
                if page_len < self.page_size {
                    break;
                }
            }
            if let Some(limit) = limit {
                issues.truncate(limit);
            }
            let columns = self.schema_for(&table, &issues);
            let selection = plan.cleaned_columns();
            return records_to_batch(&issues, &columns, selection.as_deref());
        }

        if !plan.order_by.is_empty() {
            return Err(Error::pushdown_unsupported(format!(
                "the {} endpoint cannot order results",
                table
            )));
        }
        let url = format!("{}{}", self.host, endpoint.path);
        let mut params: Vec<(String, String)> = Vec::new();
        if let Some(limit) = plan.limit {
            params.push((
                "maxResults".to_string(),
                (limit as usize).min(self.page_size).to_string(),
            ));
        }
        if let Some(offset) = plan.offset {
            params.push(("startAt".to_string(), offset.to_string()));
        }
        let response = self
            .auth
            .apply_async(client.get(&url).query(&params).header("Accept", "application/json"))
            .send()
            .await
            .map_err(|e| transport_error("resource read", e))?;
        if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(rate_limit_from_headers(response.headers()));
        }
        if !response.status().is_success() {
            return Err(status_error("resource read", response.status()));
        }
        let data: JsonValue = response
            .json()
            .await
            .map_err(|e| Error::adapter(format!("malformed resource response: {}", e)))?;
        let mut records = Self::parse_listing(data);
        if let Some(limit) = plan.limit {
            records.truncate(limit as usize);
        }
        let columns = self.schema_for(&table, &records);
        let selection = plan.cleaned_columns();
        records_to_batch(&records, &columns, selection.as_deref())
    }

    async fn get_schema(&self, table: &str) -> Result<Vec<ColumnInfo>> {
        let table = Self::table_name(table);
        if let Some(cached) = self.cache.get(ADAPTER_NAME, &table) {
            return Ok(cached);
        }
        let batch = AsyncAdapter::fetch(self, &table, &FetchPlan::new().with_limit(1)).await?;
        let columns = tideql_arrow::columns_from_schema(&batch.schema());
        if !columns.is_empty() {
            self.cache.set(ADAPTER_NAME, &table, columns.clone());
        }
        Ok(columns)
    }

    async fn list_tables(&self) -> Result<Vec<String>> {
        Ok(TABLES.iter().map(|t| t.to_string()).collect())
    }

    async fn insert(&self, table: &str, values: &ValueMap) -> Result<u64> {
        let table = Self::table_name(table);
        Self::require_issue_table(&table, "INSERT")?;
        let client = self.apool.client(&self.pool_host)?;
        let body = Self::fields_body(values);
        let response = self
            .auth
            .apply_async(client.post(self.issue_url(None)).json(&body))
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
        let table = Self::table_name(table);
        Self::require_issue_table(&table, "UPDATE")?;
        let key = Self::require_issue_key(&endpoint_for(&table), predicates, "UPDATE")?;
        let client = self.apool.client(&self.pool_host)?;
        let body = Self::fields_body(values);
        let response = self
            .auth
            .apply_async(client.put(self.issue_url(Some(&key))).json(&body))
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
        let table = Self::table_name(table);
        Self::require_issue_table(&table, "DELETE")?;
        let key = Self::require_issue_key(&endpoint_for(&table), predicates, "DELETE")?;
        let client = self.apool.client(&self.pool_host)?;
        let response = self
            .auth
            .apply_async(client.delete(self.issue_url(Some(&key))))
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
