use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use itertools::Itertools;
use log::debug;
use serde_json::{Map, Value as JsonValue};
use tideql_arrow::arrow::array::{ArrayRef, BinaryArray, StringArray};
use tideql_arrow::arrow::datatypes::{DataType as ArrowDataType, Field, Schema as ArrowSchema};
use tideql_arrow::{empty_batch, infer_columns, records_to_batch, JsonRecord, RecordBatch};
use tideql_common::column::ColumnInfo;
use tideql_common::error::{Error, Result};
use tideql_common::types::ValueMap;
use tideql_planner::{Aggregate, AggregateFunc, Predicate, PredicateOp, PredicateValue, SortDirection};
use tideql_http::{
    async_pool, blocking_pool, host_key, transport_error, AsyncHttpPool, HttpPool, PageFetcher,
    RetryController,
};

use crate::auth::Auth;
use crate::schema_cache::SchemaCache;
use crate::{
    clean_column, key_predicate, normalize_host, rate_limit_from_headers, status_error,
    table_leaf, Adapter, AsyncAdapter, FetchPlan,
};

/// Virtual table exposing binary attachment content. Requires a
/// `sys_id = …` predicate and yields a two-column batch.
pub const ATTACHMENT_TABLE: &str = "sys_attachment_content";

const ADAPTER_NAME: &str = "servicenow";

/// Table-API adapter for ServiceNow-style ITSM backends.
///
/// Every pushdown input translates: predicates into `sysparm_query`
/// conditions joined by `^`, projections into `sysparm_fields`, paging into
/// `sysparm_limit`/`sysparm_offset`, ordering into `ORDERBY` terms, and
/// aggregation onto the stats endpoint.
pub struct ServiceNowAdapter {
    host: String,
    pool_host: String,
    auth: Auth,
    cache: Arc<SchemaCache>,
    pool: Arc<HttpPool>,
    apool: Arc<AsyncHttpPool>,
    retry: RetryController,
    fetcher: PageFetcher,
    page_size: usize,
    max_parallel: usize,
    display_value: Option<String>,
}

impl ServiceNowAdapter {
    pub fn new(host: impl Into<String>) -> Self {
        let host = normalize_host(&host.into());
        let page_size = 1000;
        let max_parallel = 4;
        Self {
            pool_host: host_key(&host),
            host,
            auth: Auth::None,
            cache: Arc::new(SchemaCache::new()),
            pool: blocking_pool(),
            apool: async_pool(),
            retry: RetryController::new(3, Duration::from_secs(1)),
            fetcher: PageFetcher::new(page_size, max_parallel),
            page_size,
            max_parallel,
            display_value: None,
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
        self.page_size = page_size.max(1);
        self.fetcher = PageFetcher::new(self.page_size, self.max_parallel);
        self
    }

    pub fn with_max_parallel(mut self, max_parallel: usize) -> Self {
        self.max_parallel = max_parallel.max(1);
        self.fetcher = PageFetcher::new(self.page_size, self.max_parallel);
        self
    }

    /// `sysparm_display_value`: `"true"` for labels, `"all"` for both.
    pub fn with_display_value(mut self, display_value: impl Into<String>) -> Self {
        self.display_value = Some(display_value.into());
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

    fn table_url(&self, table: &str) -> String {
        format!("{}/api/now/table/{}", self.host, table)
    }

    fn stats_url(&self, table: &str) -> String {
        format!("{}/api/now/stats/{}", self.host, table)
    }

    fn attachment_url(&self, sys_id: &str) -> String {
        format!("{}/api/now/attachment/{}/file", self.host, sys_id)
    }

    /// One predicate in sysparm_query syntax, or `None` for IN over a
    /// scalarless list.
    fn predicate_term(predicate: &Predicate) -> Option<String> {
        let column = clean_column(&predicate.column);
        match predicate.op {
            PredicateOp::IsNull => Some(format!("{}ISEMPTY", column)),
            PredicateOp::IsNotNull => Some(format!("{}ISNOTEMPTY", column)),
            PredicateOp::Like => {
                // ServiceNow LIKE is contains; the SQL wildcards go away.
                let value = predicate.value.as_scalar()?.to_string();
                Some(format!("{}LIKE{}", column, value.trim_matches('%')))
            }
            PredicateOp::In => match &predicate.value {
                PredicateValue::List(values) => Some(format!(
                    "{}IN{}",
                    column,
                    values.iter().map(|v| v.to_string()).join(",")
                )),
                PredicateValue::Scalar(value) => Some(format!("{}IN{}", column, value)),
            },
            op => {
                let value = predicate.value.as_scalar()?;
                Some(format!("{}{}{}", column, op, value))
            }
        }
    }

    fn build_query_params(&self, plan: &FetchPlan) -> Vec<(String, String)> {
        let mut params: Vec<(String, String)> = Vec::new();
        if let Some(display_value) = &self.display_value {
            params.push(("sysparm_display_value".to_string(), display_value.clone()));
        }
        if let Some(columns) = plan.cleaned_columns() {
            params.push(("sysparm_fields".to_string(), columns.join(",")));
        }

        let mut query_parts: Vec<String> = plan
            .predicates
            .iter()
            .filter_map(Self::predicate_term)
            .collect();
        if !plan.order_by.is_empty() {
            let order = plan
                .order_by
                .iter()
                .map(|(column, direction)| {
                    let prefix = match direction {
                        SortDirection::Asc => "",
                        SortDirection::Desc => "DESC",
                    };
                    format!("{}{}", prefix, clean_column(column))
                })
                .join(",");
            query_parts.push(format!("ORDERBY{}", order));
        }
        if !query_parts.is_empty() {
            params.push(("sysparm_query".to_string(), query_parts.join("^")));
        }

        let page_limit = plan
            .limit
            .map(|l| (l as usize).min(self.page_size))
            .unwrap_or(self.page_size);
        params.push(("sysparm_limit".to_string(), page_limit.to_string()));
        if let Some(offset) = plan.offset {
            params.push(("sysparm_offset".to_string(), offset.to_string()));
        }
        params
    }

    fn build_stats_params(&self, plan: &FetchPlan) -> Vec<(String, String)> {
        let mut params: Vec<(String, String)> = Vec::new();
        let query = plan
            .predicates
            .iter()
            .filter_map(Self::predicate_term)
            .join("^");
        if !query.is_empty() {
            params.push(("sysparm_query".to_string(), query));
        }
        if !plan.group_by.is_empty() {
            params.push((
                "sysparm_group_by".to_string(),
                plan.group_by.iter().map(|c| clean_column(c)).join(","),
            ));
        }
        let mut sum_fields: Vec<String> = Vec::new();
        let mut avg_fields: Vec<String> = Vec::new();
        let mut min_fields: Vec<String> = Vec::new();
        let mut max_fields: Vec<String> = Vec::new();
        for aggregate in &plan.aggregates {
            let column = clean_column(&aggregate.column);
            match aggregate.func {
                AggregateFunc::Count => {
                    params.push(("sysparm_count".to_string(), "true".to_string()));
                }
                AggregateFunc::Sum => sum_fields.push(column),
                AggregateFunc::Avg => avg_fields.push(column),
                AggregateFunc::Min => min_fields.push(column),
                AggregateFunc::Max => max_fields.push(column),
            }
        }
        for (key, fields) in [
            ("sysparm_sum_fields", sum_fields),
            ("sysparm_avg_fields", avg_fields),
            ("sysparm_min_fields", min_fields),
            ("sysparm_max_fields", max_fields),
        ] {
            if !fields.is_empty() {
                params.push((key.to_string(), fields.join(",")));
            }
        }
        if !plan.order_by.is_empty() {
            params.push((
                "sysparm_order_by".to_string(),
                plan.order_by
                    .iter()
                    .map(|(column, _)| clean_column(column))
                    .join(","),
            ));
        }
        params
    }

    fn parse_result_records(body: JsonValue) -> Vec<JsonRecord> {
        match body.get("result") {
            Some(JsonValue::Array(items)) => items
                .iter()
                .filter_map(|item| item.as_object().cloned())
                .collect(),
            Some(JsonValue::Object(item)) => vec![item.clone()],
            _ => Vec::new(),
        }
    }

    /// Unpacks the stats endpoint's response into one record per group,
    /// naming columns after the requested aggregates.
    fn parse_stats_records(
        body: &JsonValue,
        aggregates: &[Aggregate],
        limit: Option<u64>,
    ) -> Vec<JsonRecord> {
        let items: Vec<&JsonValue> = match body.get("result") {
            Some(JsonValue::Array(items)) => items.iter().collect(),
            Some(item @ JsonValue::Object(_)) => vec![item],
            _ => Vec::new(),
        };

        let mut records = Vec::with_capacity(items.len());
        for item in items {
            let mut record = Map::new();
            if let Some(JsonValue::Array(groups)) = item.get("groupby_fields") {
                for group in groups {
                    if let (Some(field), Some(value)) = (
                        group.get("field").and_then(JsonValue::as_str),
                        group.get("value"),
                    ) {
                        record.insert(field.to_string(), value.clone());
                    }
                }
            }
            let stats = item.get("stats").cloned().unwrap_or(JsonValue::Null);
            if let Some(count) = stats.get("count") {
                let alias = aggregates
                    .iter()
                    .find(|a| a.func == AggregateFunc::Count)
                    .map(Aggregate::projected_name)
                    .unwrap_or_else(|| "count".to_string());
                let value = count
                    .as_str()
                    .and_then(|c| c.parse::<i64>().ok())
                    .or_else(|| count.as_i64());
                record.insert(alias, value.map(JsonValue::from).unwrap_or(JsonValue::Null));
            }
            for (func, key) in [
                (AggregateFunc::Sum, "sum"),
                (AggregateFunc::Avg, "avg"),
                (AggregateFunc::Min, "min"),
                (AggregateFunc::Max, "max"),
            ] {
                let Some(JsonValue::Object(fields)) = stats.get(key) else {
                    continue;
                };
                for (field, value) in fields {
                    let alias = aggregates
                        .iter()
                        .find(|a| {
                            a.func == func && clean_column(&a.column) == clean_column(field)
                        })
                        .map(Aggregate::projected_name)
                        .unwrap_or_else(|| format!("{}({})", key.to_uppercase(), field));
                    let numeric = value
                        .as_str()
                        .and_then(|v| v.parse::<f64>().ok())
                        .and_then(serde_json::Number::from_f64)
                        .map(JsonValue::Number);
                    record.insert(alias, numeric.unwrap_or_else(|| value.clone()));
                }
            }
            records.push(record);
        }
        if let Some(limit) = limit {
            records.truncate(limit as usize);
        }
        records
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

    fn attachment_batch(sys_id: &str, content: &[u8]) -> Result<RecordBatch> {
        let schema = Arc::new(ArrowSchema::new(vec![
            Field::new("sys_id", ArrowDataType::Utf8, false),
            Field::new("content", ArrowDataType::Binary, true),
        ]));
        let arrays: Vec<ArrayRef> = vec![
            Arc::new(StringArray::from(vec![sys_id.to_string()])),
            Arc::new(BinaryArray::from_vec(vec![content])),
        ];
        RecordBatch::try_new(schema, arrays)
            .map_err(|e| Error::adapter(format!("failed to assemble attachment batch: {}", e)))
    }

    fn require_sys_id(predicates: &[Predicate], operation: &str) -> Result<String> {
        key_predicate(predicates, &["sys_id"]).ok_or_else(|| {
            Error::query(format!(
                "{} requires a sys_id equality predicate in the WHERE clause",
                operation
            ))
        })
    }

    // ---- blocking I/O -------------------------------------------------

    fn fetch_page(&self, url: &str, params: &[(String, String)]) -> Result<Vec<JsonRecord>> {
        self.retry.execute(|| {
            let transport = self.pool.acquire(&self.pool_host)?;
            let request = self
                .auth
                .apply(transport.get(url).query(params).header("Accept", "application/json"));
            let response = request
                .send()
                .map_err(|e| transport_error("table read", e))?;
            if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
                return Err(rate_limit_from_headers(response.headers()));
            }
            if !response.status().is_success() {
                return Err(status_error("table read", response.status()));
            }
            let body: JsonValue = response
                .json()
                .map_err(|e| Error::adapter(format!("malformed table response: {}", e)))?;
            Ok(Self::parse_result_records(body))
        })
    }

    fn fetch_paged(
        &self,
        url: &str,
        params: &[(String, String)],
        limit: Option<u64>,
        offset: u64,
    ) -> Result<Vec<JsonRecord>> {
        let fetch_one = |page: usize| -> Result<Vec<JsonRecord>> {
            let mut page_params: Vec<(String, String)> = params
                .iter()
                .filter(|(key, _)| key != "sysparm_limit" && key != "sysparm_offset")
                .cloned()
                .collect();
            page_params.push(("sysparm_limit".to_string(), self.page_size.to_string()));
            page_params.push((
                "sysparm_offset".to_string(),
                (offset + (page * self.page_size) as u64).to_string(),
            ));
            self.fetch_page(url, &page_params)
        };
        self.fetcher.fetch_pages(fetch_one, limit.map(|l| l as usize))
    }

    fn fetch_stats(&self, table: &str, plan: &FetchPlan) -> Result<RecordBatch> {
        let url = self.stats_url(table);
        let params = self.build_stats_params(plan);
        let body = self.retry.execute(|| {
            let transport = self.pool.acquire(&self.pool_host)?;
            let request = self
                .auth
                .apply(transport.get(&url).query(&params).header("Accept", "application/json"));
            let response = request
                .send()
                .map_err(|e| transport_error("stats read", e))?;
            if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
                return Err(rate_limit_from_headers(response.headers()));
            }
            if !response.status().is_success() {
                return Err(status_error("stats read", response.status()));
            }
            response
                .json::<JsonValue>()
                .map_err(|e| Error::adapter(format!("malformed stats response: {}", e)))
        })?;
        let records = Self::parse_stats_records(&body, &plan.aggregates, plan.limit);
        let columns = infer_columns(&records);
        records_to_batch(&records, &columns, None)
    }

    fn fetch_attachment(&self, predicates: &[Predicate]) -> Result<RecordBatch> {
        let sys_id = Self::require_sys_id(predicates, "fetching attachment content")?;
        let url = self.attachment_url(&sys_id);
        let transport = self.pool.acquire(&self.pool_host)?;
        let response = self
            .auth
            .apply(transport.get(&url))
            .send()
            .map_err(|e| transport_error("attachment read", e))?;
        if !response.status().is_success() {
            return Err(status_error("attachment read", response.status()));
        }
        let content = response
            .bytes()
            .map_err(|e| transport_error("attachment read", e))?;
        Self::attachment_batch(&sys_id, &content)
    }

    fn send_write(
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

    // ---- cooperative I/O ----------------------------------------------

    async fn fetch_page_async(
        &self,
        url: &str,
        params: &[(String, String)],
    ) -> Result<Vec<JsonRecord>> {
        let client = self.apool.client(&self.pool_host)?;
        self.retry
            .execute_async(|| {
                let client = client.clone();
                async move {
                    let request = self.auth.apply_async(
                        client.get(url).query(params).header("Accept", "application/json"),
                    );
                    let response = request
                        .send()
                        .await
                        .map_err(|e| transport_error("table read", e))?;
                    if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
                        return Err(rate_limit_from_headers(response.headers()));
                    }
                    if !response.status().is_success() {
                        return Err(status_error("table read", response.status()));
                    }
                    let body: JsonValue = response
                        .json()
                        .await
                        .map_err(|e| Error::adapter(format!("malformed table response: {}", e)))?;
                    Ok(Self::parse_result_records(body))
                }
            })
            .await
    }

    /// Async paging walks pages sequentially; the parallel fetcher belongs
    /// to the blocking path.
    async fn fetch_paged_async(
        &self,
        url: &str,
        params: &[(String, String)],
        limit: Option<u64>,
        offset: u64,
    ) -> Result<Vec<JsonRecord>> {
        let mut records: Vec<JsonRecord> = Vec::new();
        let mut page = 0usize;
        loop {
            let mut page_params: Vec<(String, String)> = params
                .iter()
                .filter(|(key, _)| key != "sysparm_limit" && key != "sysparm_offset")
                .cloned()
                .collect();
            page_params.push(("sysparm_limit".to_string(), self.page_size.to_string()));
            page_params.push((
                "sysparm_offset".to_string(),
                (offset + (page * self.page_size) as u64).to_string(),
            ));
            let page_records = self.fetch_page_async(url, &page_params).await?;
            let short = page_records.len() < self.page_size;
            records.extend(page_records);
            if short {
                break;
            }
            if let Some(limit) = limit {
                if records.len() >= limit as usize {
                    break;
                }
            }
            page += 1;
        }
        if let Some(limit) = limit {
            records.truncate(limit as usize);
        }
        Ok(records)
    }

    fn plan_batch(
        &self,
        table: &str,
        plan: &FetchPlan,
        records: Vec<JsonRecord>,
    ) -> Result<RecordBatch> {
        let columns = self.schema_for(table, &records);
        if records.is_empty() && columns.is_empty() {
            return Ok(empty_batch(&[]));
        }
        let selection = plan.cleaned_columns();
        records_to_batch(&records, &columns, selection.as_deref())
    }
}

impl Adapter for ServiceNowAdapter {
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

    fn supports_batch(&self) -> bool {
        true
    }

    fn fetch(&self, table: &str, plan: &FetchPlan) -> Result<RecordBatch> {
        let table = table_leaf(table);
        if table == ATTACHMENT_TABLE {
            return self.fetch_attachment(&plan.predicates);
        }
        if plan.wants_aggregation() {
            return self.fetch_stats(&table, plan);
        }

        let url = self.table_url(&table);
        let params = self.build_query_params(plan);
        let records = match plan.limit {
            Some(limit) if (limit as usize) <= self.page_size => self.fetch_page(&url, &params)?,
            limit => self.fetch_paged(&url, &params, limit, plan.offset.unwrap_or(0))?,
        };
        debug!("fetched {} rows from {}", records.len(), table);
        self.plan_batch(&table, plan, records)
    }

    fn get_schema(&self, table: &str) -> Result<Vec<ColumnInfo>> {
        let table = table_leaf(table);
        if let Some(cached) = self.cache.get(ADAPTER_NAME, &table) {
            return Ok(cached);
        }
        let url = self.table_url(&table);
        let params = vec![("sysparm_limit".to_string(), "1".to_string())];
        let records = self.fetch_page(&url, &params)?;
        Ok(self.schema_for(&table, &records))
    }

    fn list_tables(&self) -> Result<Vec<String>> {
        let plan = FetchPlan::new()
            .with_columns(vec!["name".to_string(), "label".to_string()])
            .with_limit(1000);
        match Adapter::fetch(self, "sys_db_object", &plan) {
            Ok(batch) => tideql_arrow::string_column_values(&batch, "name"),
            Err(_) => Ok(Vec::new()),
        }
    }

    fn insert(&self, table: &str, values: &ValueMap) -> Result<u64> {
        let table = table_leaf(table);
        let body: JsonValue =
            JsonValue::Object(values.iter().map(|(k, v)| (k.clone(), v.to_json())).collect());
        self.send_write("INSERT", reqwest::Method::POST, &self.table_url(&table), Some(&body))
    }

    fn update(&self, table: &str, values: &ValueMap, predicates: &[Predicate]) -> Result<u64> {
        let table = table_leaf(table);
        let sys_id = Self::require_sys_id(predicates, "UPDATE")?;
        let body: JsonValue =
            JsonValue::Object(values.iter().map(|(k, v)| (k.clone(), v.to_json())).collect());
        let url = format!("{}/{}", self.table_url(&table), sys_id);
        self.send_write("UPDATE", reqwest::Method::PATCH, &url, Some(&body))
    }

    fn delete(&self, table: &str, predicates: &[Predicate]) -> Result<u64> {
        let table = table_leaf(table);
        let sys_id = Self::require_sys_id(predicates, "DELETE")?;
        let url = format!("{}/{}", self.table_url(&table), sys_id);
        self.send_write("DELETE", reqwest::Method::DELETE, &url, None)
    }
}

#[async_trait]
impl AsyncAdapter for ServiceNowAdapter {
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

    fn supports_batch(&self) -> bool {
        true
    }

    async fn fetch(&self, table: &str, plan: &FetchPlan) -> Result<RecordBatch> {
        let table = table_leaf(table);
        if table == ATTACHMENT_TABLE {
            let sys_id = Self::require_sys_id(&plan.predicates, "fetching attachment content")?;
            let client = self.apool.client(&self.pool_host)?;
            let response = self
                .auth
                .apply_async(client.get(self.attachment_url(&sys_id)))
                .send()
                .await
                .map_err(|e| transport_error("attachment read", e))?;
            if !response.status().is_success() {
                return Err(status_error("attachment read", response.status()));
            }
            let content = response
                .bytes()
                .await
                .map_err(|e| transport_error("attachment read", e))?;
            return Self::attachment_batch(&sys_id, &content);
        }
        if plan.wants_aggregation() {
            let url = self.stats_url(&table);
            let params = self.build_stats_params(plan);
            let client = self.apool.client(&self.pool_host)?;
            let response = self
                .auth
                .apply_async(client.get(&url).query(&params).header("Accept", "application/json"))
                .send()
                .await
                .map_err(|e| transport_error("stats read", e))?;
            if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
                return Err(rate_limit_from_headers(response.headers()));
            }
            if !response.status().is_success() {
                return Err(status_error("stats read", response.status()));
            }
            let body: JsonValue = response
                .json()
                .await
                .map_err(|e| Error::adapter(format!("malformed stats response: {}", e)))?;
            let records = Self::parse_stats_records(&body, &plan.aggregates, plan.limit);
            let columns = infer_columns(&records);
            return records_to_batch(&records, &columns, None);
        }

        let url = self.table_url(&table);
        let params = self.build_query_params(plan);
        let records = match plan.limit {
            Some(limit) if (limit as usize) <= self.page_size => {
                self.fetch_page_async(&url, &params).await?
            }
            limit => {
                self.fetch_paged_async(&url, &params, limit, plan.offset.unwrap_or(0))
                    .await?
            }
        };
        self.plan_batch(&table, plan, records)
    }

    async fn get_schema(&self, table: &str) -> Result<Vec<ColumnInfo>> {
        let table = table_leaf(table);
        if let Some(cached) = self.cache.get(ADAPTER_NAME, &table) {
            return Ok(cached);
        }
        let url = self.table_url(&table);
        let params = vec![("sysparm_limit".to_string(), "1".to_string())];
        let records = self.fetch_page_async(&url, &params).await?;
        Ok(self.schema_for(&table, &records))
    }

    async fn list_tables(&self) -> Result<Vec<String>> {
        let plan = FetchPlan::new()
            .with_columns(vec!["name".to_string(), "label".to_string()])
            .with_limit(1000);
        match AsyncAdapter::fetch(self, "sys_db_object", &plan).await {
            Ok(batch) => tideql_arrow::string_column_values(&batch, "name"),
            Err(_) => Ok(Vec::new()),
        }
    }

    async fn insert(&self, table: &str, values: &ValueMap) -> Result<u64> {
        let table = table_leaf(table);
        let body: JsonValue =
            JsonValue::Object(values.iter().map(|(k, v)| (k.clone(), v.to_json())).collect());
        let client = self.apool.client(&self.pool_host)?;
        let response = self
            .auth
            .apply_async(client.post(self.table_url(&table)).json(&body))
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
        let sys_id = Self::require_sys_id(predicates, "UPDATE")?;
        let body: JsonValue =
            JsonValue::Object(values.iter().map(|(k, v)| (k.clone(), v.to_json())).collect());
        let client = self.apool.client(&self.pool_host)?;
        let url = format!("{}/{}", self.table_url(&table), sys_id);
        let response = self
            .auth
            .apply_async(client.patch(&url).json(&body))
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
        let sys_id = Self::require_sys_id(predicates, "DELETE")?;
        let client = self.apool.client(&self.pool_host)?;
        let url = format!("{}/{}", self.table_url(&table), sys_id);
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
    use tideql_common::types::Value;

    fn plan_with_predicates(predicates: Vec<Predicate>) -> FetchPlan {
        FetchPlan::new().with_predicates(predicates)
    }

    #[test]
    fn test_predicate_terms() {
        let term = ServiceNowAdapter::predicate_term(&Predicate::eq("priority", Value::Int64(1)));
        assert_eq!(term.as_deref(), Some("priority=1"));

        let term = ServiceNowAdapter::predicate_term(&Predicate::new(
            "short_description",
            PredicateOp::Like,
            PredicateValue::Scalar(Value::from("%printer%")),
        ));
        assert_eq!(term.as_deref(), Some("short_descriptionLIKEprinter"));

        let term = ServiceNowAdapter::predicate_term(&Predicate::new(
            "state",
            PredicateOp::In,
            PredicateValue::List(vec![Value::Int64(1), Value::Int64(2)]),
        ));
        assert_eq!(term.as_deref(), Some("stateIN1,2"));

        let term = ServiceNowAdapter::predicate_term(&Predicate::new(
            "assigned_to",
            PredicateOp::IsNull,
            PredicateValue::Scalar(Value::Null),
        ));
        assert_eq!(term.as_deref(), Some("assigned_toISEMPTY"));

        let term = ServiceNowAdapter::predicate_term(&Predicate::new(
            "assigned_to",
            PredicateOp::IsNotNull,
            PredicateValue::Scalar(Value::Null),
        ));
        assert_eq!(term.as_deref(), Some("assigned_toISNOTEMPTY"));
    }

    #[test]
    fn test_build_query_params() {
        let adapter = ServiceNowAdapter::new("dev.example.com").with_page_size(100);
        let plan = FetchPlan::new()
            .with_columns(vec!["number".to_string(), "i.priority".to_string()])
            .with_predicates(vec![
                Predicate::eq("priority", Value::Int64(1)),
                Predicate::eq("state", Value::from("open")),
            ])
            .with_order_by(vec![
                ("created".to_string(), SortDirection::Desc),
                ("number".to_string(), SortDirection::Asc),
            ])
            .with_limit(10)
            .with_offset(5);
        let params = adapter.build_query_params(&plan);
        let get = |key: &str| {
            params
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.clone())
        };
        assert_eq!(get("sysparm_fields").as_deref(), Some("number,priority"));
        assert_eq!(
            get("sysparm_query").as_deref(),
            Some("priority=1^state=open^ORDERBYDESCcreated,number")
        );
        assert_eq!(get("sysparm_limit").as_deref(), Some("10"));
        assert_eq!(get("sysparm_offset").as_deref(), Some("5"));
    }

    #[test]
    fn test_build_stats_params() {
        let adapter = ServiceNowAdapter::new("dev.example.com");
        let plan = FetchPlan::new()
            .with_group_by(vec!["category".to_string()])
            .with_aggregates(vec![
                Aggregate::new(AggregateFunc::Count, "*"),
                Aggregate::new(AggregateFunc::Sum, "reassignment_count").with_alias("total"),
                Aggregate::new(AggregateFunc::Avg, "priority"),
            ]);
        let params = adapter.build_stats_params(&plan);
        assert!(params.contains(&("sysparm_count".to_string(), "true".to_string())));
        assert!(params.contains(&("sysparm_group_by".to_string(), "category".to_string())));
        assert!(params.contains(&(
            "sysparm_sum_fields".to_string(),
            "reassignment_count".to_string()
        )));
        assert!(params.contains(&("sysparm_avg_fields".to_string(), "priority".to_string())));
    }

    #[test]
    fn test_parse_stats_records() {
        let body = json!({
            "result": [
                {
                    "groupby_fields": [{"field": "category", "value": "hardware"}],
                    "stats": {"count": "3", "sum": {"reassignment_count": "12"}}
                },
                {
                    "groupby_fields": [{"field": "category", "value": "software"}],
                    "stats": {"count": "1", "sum": {"reassignment_count": "4"}}
                }
            ]
        });
        let aggregates = vec![
            Aggregate::new(AggregateFunc::Count, "*"),
            Aggregate::new(AggregateFunc::Sum, "reassignment_count").with_alias("total"),
        ];
        let records = ServiceNowAdapter::parse_stats_records(&body, &aggregates, None);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0]["category"], json!("hardware"));
        assert_eq!(records[0]["COUNT(*)"], json!(3));
        assert_eq!(records[0]["total"], json!(12.0));
    }

    #[test]
    fn test_mutations_without_sys_id_make_no_request() {
        let mut server = mockito::Server::new();
        let mock = server
            .mock("DELETE", mockito::Matcher::Any)
            .with_status(204)
            .expect(0)
            .create();

        let adapter = ServiceNowAdapter::new(server.url());
        let predicates = vec![Predicate::eq("priority", Value::Int64(1))];
        let err = Adapter::delete(&adapter, "incident", &predicates).unwrap_err();
        assert!(matches!(err, Error::Query(_)));
        assert!(err.to_string().contains("sys_id"));

        let err = Adapter::update(&adapter, "incident", &ValueMap::new(), &predicates).unwrap_err();
        assert!(err.to_string().contains("sys_id"));
        mock.assert();
    }

    #[test]
    fn test_fetch_pushes_predicates_into_query() {
        let mut server = mockito::Server::new();
        let mock = server
            .mock("GET", "/api/now/table/incident")
            .match_query(mockito::Matcher::UrlEncoded(
                "sysparm_query".into(),
                "priority=1".into(),
            ))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                json!({"result": [{"number": "INC0001", "short_description": "printer on fire"}]})
                    .to_string(),
            )
            .create();

        let adapter = ServiceNowAdapter::new(server.url());
        let plan = plan_with_predicates(vec![Predicate::eq("priority", Value::Int64(1))])
            .with_columns(vec!["number".to_string(), "short_description".to_string()])
            .with_limit(10);
        let batch = Adapter::fetch(&adapter, "incident", &plan).unwrap();
        assert_eq!(batch.num_rows(), 1);
        assert_eq!(
            tideql_arrow::string_column_values(&batch, "number").unwrap(),
            vec!["INC0001".to_string()]
        );
        mock.assert();
    }

    #[test]
    fn test_get_schema_probes_one_row_and_caches() {
        let mut server = mockito::Server::new();
        let mock = server
            .mock("GET", "/api/now/table/incident")
            .match_query(mockito::Matcher::UrlEncoded("sysparm_limit".into(), "1".into()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                json!({"result": [{"number": "INC0001", "priority": 1, "active": true}]})
                    .to_string(),
            )
            .expect(1)
            .create();

        let adapter = ServiceNowAdapter::new(server.url());
        let schema = Adapter::get_schema(&adapter, "incident").unwrap();
        assert_eq!(schema.len(), 3);
        assert_eq!(schema[1].data_type, tideql_common::types::DataType::Integer);
        assert_eq!(schema[2].data_type, tideql_common::types::DataType::Boolean);

        // Second call is served from the cache.
        let again = Adapter::get_schema(&adapter, "incident").unwrap();
        assert_eq!(again.len(), 3);
        mock.assert();
    }

    #[test]
    fn test_insert_posts_values() {
        let mut server = mockito::Server::new();
        let mock = server
            .mock("POST", "/api/now/table/incident")
            .match_body(mockito::Matcher::Json(json!({
                "short_description": "broken", "priority": 2
            })))
            .with_status(201)
            .with_body(json!({"result": {"sys_id": "abc"}}).to_string())
            .create();

        let adapter = ServiceNowAdapter::new(server.url());
        let mut values = ValueMap::new();
        values.insert("short_description".to_string(), Value::from("broken"));
        values.insert("priority".to_string(), Value::Int64(2));
        let affected = Adapter::insert(&adapter, "incident", &values).unwrap();
        assert_eq!(affected, 1);
        mock.assert();
    }

    #[test]
    fn test_update_patches_by_sys_id() {
        let mut server = mockito::Server::new();
        let mock = server
            .mock("PATCH", "/api/now/table/incident/abc123")
            .with_status(200)
            .with_body(json!({"result": {}}).to_string())
            .create();

        let adapter = ServiceNowAdapter::new(server.url());
        let mut values = ValueMap::new();
        values.insert("priority".to_string(), Value::Int64(3));
        let predicates = vec![Predicate::eq("sys_id", Value::from("abc123"))];
        let affected = Adapter::update(&adapter, "incident", &values, &predicates).unwrap();
        assert_eq!(affected, 1);
        mock.assert();
    }

    #[test]
    fn test_attachment_requires_sys_id() {
        let adapter = ServiceNowAdapter::new("dev.example.com");
        let err = Adapter::fetch(&adapter, ATTACHMENT_TABLE, &FetchPlan::new()).unwrap_err();
        assert!(matches!(err, Error::Query(_)));
        assert!(err.to_string().contains("sys_id"));
    }

    #[test]
    fn test_attachment_content_batch() {
        let mut server = mockito::Server::new();
        let mock = server
            .mock("GET", "/api/now/attachment/abc/file")
            .with_status(200)
            .with_body(&b"\x01\x02binary"[..])
            .create();

        let adapter = ServiceNowAdapter::new(server.url());
        let plan = plan_with_predicates(vec![Predicate::eq("sys_id", Value::from("abc"))]);
        let batch = Adapter::fetch(&adapter, ATTACHMENT_TABLE, &plan).unwrap();
        assert_eq!(batch.num_rows(), 1);
        assert_eq!(batch.schema().field(0).name(), "sys_id");
        assert_eq!(
            batch.schema().field(1).data_type(),
            &ArrowDataType::Binary
        );
        mock.assert();
    }
}
