use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use datafusion::prelude::{CsvReadOptions, NdJsonReadOptions, ParquetReadOptions, SessionContext};
use itertools::Itertools;
use log::debug;
use tideql_arrow::{concat, RecordBatch};
use tideql_common::column::ColumnInfo;
use tideql_common::error::{Error, Result};
use tideql_common::types::{Value, ValueMap};
use tideql_planner::{Predicate, PredicateOp, PredicateValue};

use crate::schema_cache::SchemaCache;
use crate::{table_leaf, Adapter, AsyncAdapter, FetchPlan};

const ADAPTER_NAME: &str = "file";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    Csv,
    Parquet,
    /// Newline-delimited JSON.
    Json,
}

fn detect_file_type(path: &Path) -> FileType {
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("parquet") => FileType::Parquet,
        Some(ext) if ext.eq_ignore_ascii_case("json") => FileType::Json,
        _ => FileType::Csv,
    }
}

/// Adapter for local CSV/Parquet/NDJSON files.
///
/// Files are registered with an embedded DataFusion context and every fetch
/// composes a full SQL statement from the plan, so every pushdown input
/// from predicates through paging is honoured natively. INSERT appends to
/// CSV files; other writes are unsupported.
pub struct FileAdapter {
    path: PathBuf,
    cache: Arc<SchemaCache>,
    ctx: SessionContext,
    runtime: Arc<tokio::runtime::Runtime>,
    registered: Mutex<HashMap<String, String>>,
}

impl FileAdapter {
    /// `path` may be a single file or a directory of files named after
    /// their tables.
    pub fn new(path: impl Into<PathBuf>) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| Error::configuration(format!("failed to start file runtime: {}", e)))?;
        Ok(Self {
            path: path.into(),
            cache: Arc::new(SchemaCache::new()),
            ctx: SessionContext::new(),
            runtime: Arc::new(runtime),
            registered: Mutex::new(HashMap::new()),
        })
    }

    pub fn with_schema_cache(mut self, cache: Arc<SchemaCache>) -> Self {
        self.cache = cache;
        self
    }

    fn resolve_path(&self, table: &str) -> Result<PathBuf> {
        let leaf = table_leaf(table);
        if self.path.is_file() {
            return Ok(self.path.clone());
        }
        if self.path.is_dir() {
            for ext in ["parquet", "csv", "json"] {
                let candidate = self.path.join(format!("{}.{}", leaf, ext));
                if candidate.is_file() {
                    return Ok(candidate);
                }
            }
        }
        let literal = Path::new(&leaf);
        if literal.is_file() {
            return Ok(literal.to_path_buf());
        }
        Err(Error::adapter(format!("file not found for table: {}", table)))
    }

    async fn ensure_registered(&self, path: &Path) -> Result<String> {
        let key = path.to_string_lossy().into_owned();
        if let Ok(registered) = self.registered.lock() {
            if let Some(alias) = registered.get(&key) {
                return Ok(alias.clone());
            }
        }
        let alias = format!("src_{}", uuid::Uuid::new_v4().simple());
        let read = match detect_file_type(path) {
            FileType::Csv => {
                self.ctx
                    .register_csv(&alias, key.as_str(), CsvReadOptions::new())
                    .await
            }
            FileType::Parquet => {
                self.ctx
                    .register_parquet(&alias, key.as_str(), ParquetReadOptions::default())
                    .await
            }
            FileType::Json => {
                self.ctx
                    .register_json(&alias, key.as_str(), NdJsonReadOptions::default())
                    .await
            }
        };
        read.map_err(|e| Error::adapter(format!("failed to read file {}: {}", key, e)))?;
        debug!("registered {} as {}", key, alias);
        if let Ok(mut registered) = self.registered.lock() {
            registered.insert(key, alias.clone());
        }
        Ok(alias)
    }

    fn sql_literal(value: &Value) -> String {
        match value {
            Value::String(s) => format!("'{}'", s.replace('\'', "''")),
            Value::Bytes(b) => format!("'{}'", String::from_utf8_lossy(b).replace('\'', "''")),
            other => other.to_string(),
        }
    }

    fn predicate_sql(predicate: &Predicate) -> String {
        let column = &predicate.column;
        match predicate.op {
            PredicateOp::IsNull => format!("{} IS NULL", column),
            PredicateOp::IsNotNull => format!("{} IS NOT NULL", column),
            PredicateOp::In => match &predicate.value {
                PredicateValue::List(values) => format!(
                    "{} IN ({})",
                    column,
                    values.iter().map(Self::sql_literal).join(", ")
                ),
                PredicateValue::Scalar(value) => {
                    format!("{} IN ({})", column, Self::sql_literal(value))
                }
            },
            op => {
                let value = predicate
                    .value
                    .as_scalar()
                    .map(Self::sql_literal)
                    .unwrap_or_else(|| "NULL".to_string());
                format!("{} {} {}", column, op, value)
            }
        }
    }

    /// Rebuilds a full SELECT against the registered file source; every
    /// pushdown input maps straight onto SQL.
    fn build_query(alias: &str, plan: &FetchPlan) -> String {
        let projection = if plan.wants_aggregation() {
            let mut parts: Vec<String> = plan.group_by.clone();
            for aggregate in &plan.aggregates {
                let mut expr = format!("{}({})", aggregate.func, aggregate.column);
                if let Some(alias) = &aggregate.alias {
                    expr.push_str(&format!(" AS {}", alias));
                }
                parts.push(expr);
            }
            if parts.is_empty() {
                "*".to_string()
            } else {
                parts.join(", ")
            }
        } else if plan.all_columns() {
            "*".to_string()
        } else {
            plan.columns
                .as_ref()
                .map(|columns| columns.join(", "))
                .unwrap_or_else(|| "*".to_string())
        };

        let mut sql = format!("SELECT {} FROM \"{}\"", projection, alias);
        if !plan.predicates.is_empty() {
            let conditions = plan.predicates.iter().map(Self::predicate_sql).join(" AND ");
            sql.push_str(" WHERE ");
            sql.push_str(&conditions);
        }
        if !plan.group_by.is_empty() {
            sql.push_str(" GROUP BY ");
            sql.push_str(&plan.group_by.join(", "));
        }
        if !plan.order_by.is_empty() {
            let order = plan
                .order_by
                .iter()
                .map(|(column, direction)| format!("{} {}", column, direction.as_str()))
                .join(", ");
            sql.push_str(" ORDER BY ");
            sql.push_str(&order);
        }
        if let Some(limit) = plan.limit {
            sql.push_str(&format!(" LIMIT {}", limit));
        }
        if let Some(offset) = plan.offset {
            sql.push_str(&format!(" OFFSET {}", offset));
        }
        sql
    }

    async fn fetch_inner(&self, table: &str, plan: &FetchPlan) -> Result<RecordBatch> {
        let path = self.resolve_path(table)?;
        let alias = self.ensure_registered(&path).await?;
        let sql = Self::build_query(&alias, plan);
        debug!("file query: {}", sql);
        let df = self
            .ctx
            .sql(&sql)
            .await
            .map_err(|e| Error::adapter(format!("failed to read file: {}", e)))?;
        let schema = df.schema().inner().clone();
        let batches = df
            .collect()
            .await
            .map_err(|e| Error::adapter(format!("failed to read file: {}", e)))?;
        if batches.is_empty() {
            Ok(RecordBatch::new_empty(schema))
        } else {
            concat(&batches)
        }
    }

    async fn schema_inner(&self, table: &str) -> Result<Vec<ColumnInfo>> {
        if let Some(cached) = self.cache.get(ADAPTER_NAME, table) {
            return Ok(cached);
        }
        let path = self.resolve_path(table)?;
        let alias = self.ensure_registered(&path).await?;
        let df = self
            .ctx
            .table(alias.as_str())
            .await
            .map_err(|e| Error::schema(format!("failed to describe file: {}", e)))?;
        let columns = tideql_arrow::columns_from_schema(df.schema().inner());
        self.cache.set(ADAPTER_NAME, table, columns.clone());
        Ok(columns)
    }

    fn append_csv(&self, table: &str, values: &ValueMap) -> Result<u64> {
        let path = self.resolve_path(table)?;
        if detect_file_type(&path) != FileType::Csv {
            return Err(Error::query("INSERT is only supported for CSV files"));
        }

        let mut reader = csv::Reader::from_path(&path)
            .map_err(|e| Error::query(format!("INSERT failed: {}", e)))?;
        let headers: Vec<String> = reader
            .headers()
            .map_err(|e| Error::query(format!("INSERT failed: {}", e)))?
            .iter()
            .map(str::to_string)
            .collect();

        let row: Vec<String> = headers
            .iter()
            .map(|header| {
                values
                    .get(header)
                    .filter(|v| !v.is_null())
                    .map(|v| v.to_string())
                    .unwrap_or_default()
            })
            .collect();

        let file = std::fs::OpenOptions::new()
            .append(true)
            .open(&path)
            .map_err(|e| Error::query(format!("INSERT failed: {}", e)))?;
        let mut writer = csv::WriterBuilder::new().has_headers(false).from_writer(file);
        writer
            .write_record(&row)
            .and_then(|_| writer.flush().map_err(csv::Error::from))
            .map_err(|e| Error::query(format!("INSERT failed: {}", e)))?;
        Ok(1)
    }
}

impl Adapter for FileAdapter {
    fn name(&self) -> &str {
        ADAPTER_NAME
    }

    fn supports_insert(&self) -> bool {
        true
    }

    fn fetch(&self, table: &str, plan: &FetchPlan) -> Result<RecordBatch> {
        self.runtime.block_on(self.fetch_inner(table, plan))
    }

    fn get_schema(&self, table: &str) -> Result<Vec<ColumnInfo>> {
        self.runtime.block_on(self.schema_inner(table))
    }

    fn list_tables(&self) -> Result<Vec<String>> {
        if self.path.is_file() {
            let stem = self
                .path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            return Ok(vec![stem]);
        }
        if self.path.is_dir() {
            let mut tables = Vec::new();
            let entries = std::fs::read_dir(&self.path)
                .map_err(|e| Error::adapter(format!("failed to list {}: {}", self.path.display(), e)))?;
            for entry in entries.flatten() {
                let path = entry.path();
                let known = matches!(
                    path.extension().and_then(|e| e.to_str()),
                    Some("csv") | Some("parquet") | Some("json")
                );
                if known {
                    if let Some(stem) = path.file_stem() {
                        tables.push(stem.to_string_lossy().into_owned());
                    }
                }
            }
            tables.sort();
            return Ok(tables);
        }
        Ok(Vec::new())
    }

    fn insert(&self, table: &str, values: &ValueMap) -> Result<u64> {
        self.append_csv(table, values)
    }
}

#[async_trait]
impl AsyncAdapter for FileAdapter {
    fn name(&self) -> &str {
        ADAPTER_NAME
    }

    fn supports_insert(&self) -> bool {
        true
    }

    async fn fetch(&self, table: &str, plan: &FetchPlan) -> Result<RecordBatch> {
        self.fetch_inner(table, plan).await
    }

    async fn get_schema(&self, table: &str) -> Result<Vec<ColumnInfo>> {
        self.schema_inner(table).await
    }

    async fn list_tables(&self) -> Result<Vec<String>> {
        Adapter::list_tables(self)
    }

    async fn insert(&self, table: &str, values: &ValueMap) -> Result<u64> {
        self.append_csv(table, values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tideql_common::types::DataType;
    use tideql_planner::{Aggregate, AggregateFunc, SortDirection};

    fn sample_csv() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let mut file = std::fs::File::create(dir.path().join("people.csv")).unwrap();
        writeln!(file, "id,name,age").unwrap();
        writeln!(file, "1,Alice,34").unwrap();
        writeln!(file, "2,Bob,28").unwrap();
        writeln!(file, "3,Carol,41").unwrap();
        dir
    }

    #[test]
    fn test_detect_file_type() {
        assert_eq!(detect_file_type(Path::new("a.parquet")), FileType::Parquet);
        assert_eq!(detect_file_type(Path::new("a.json")), FileType::Json);
        assert_eq!(detect_file_type(Path::new("a.csv")), FileType::Csv);
        assert_eq!(detect_file_type(Path::new("a")), FileType::Csv);
    }

    #[test]
    fn test_build_query() {
        let plan = FetchPlan::new()
            .with_columns(vec!["name".to_string(), "age".to_string()])
            .with_predicates(vec![Predicate::new(
                "age",
                PredicateOp::Gt,
                PredicateValue::Scalar(Value::Int64(30)),
            )])
            .with_order_by(vec![("age".to_string(), SortDirection::Desc)])
            .with_limit(5)
            .with_offset(1);
        assert_eq!(
            FileAdapter::build_query("src_1", &plan),
            "SELECT name, age FROM \"src_1\" WHERE age > 30 ORDER BY age DESC LIMIT 5 OFFSET 1"
        );
    }

    #[test]
    fn test_build_query_aggregation() {
        let plan = FetchPlan::new()
            .with_group_by(vec!["name".to_string()])
            .with_aggregates(vec![
                Aggregate::new(AggregateFunc::Sum, "age").with_alias("total"),
            ]);
        assert_eq!(
            FileAdapter::build_query("src_1", &plan),
            "SELECT name, SUM(age) AS total FROM \"src_1\" GROUP BY name"
        );
    }

    #[test]
    fn test_sql_literal_escaping() {
        assert_eq!(FileAdapter::sql_literal(&Value::from("O'Brien")), "'O''Brien'");
        assert_eq!(FileAdapter::sql_literal(&Value::Int64(4)), "4");
        assert_eq!(FileAdapter::sql_literal(&Value::Null), "NULL");
    }

    #[test]
    fn test_fetch_with_pushdown() {
        let dir = sample_csv();
        let adapter = FileAdapter::new(dir.path()).unwrap();
        let plan = FetchPlan::new()
            .with_predicates(vec![Predicate::new(
                "age",
                PredicateOp::Gt,
                PredicateValue::Scalar(Value::Int64(30)),
            )])
            .with_order_by(vec![("age".to_string(), SortDirection::Desc)]);
        let batch = Adapter::fetch(&adapter, "people", &plan).unwrap();
        assert_eq!(batch.num_rows(), 2);
        assert_eq!(
            tideql_arrow::string_column_values(&batch, "name").unwrap(),
            vec!["Carol".to_string(), "Alice".to_string()]
        );
    }

    #[test]
    fn test_aggregation_is_native() {
        let dir = sample_csv();
        let adapter = FileAdapter::new(dir.path()).unwrap();
        let plan = FetchPlan::new().with_aggregates(vec![
            Aggregate::new(AggregateFunc::Count, "*").with_alias("n"),
        ]);
        let batch = Adapter::fetch(&adapter, "people", &plan).unwrap();
        assert_eq!(batch.num_rows(), 1);
        let rows = tideql_arrow::batch_rows(&batch).unwrap();
        assert_eq!(rows[0][0], Value::Int64(3));
    }

    #[test]
    fn test_get_schema() {
        let dir = sample_csv();
        let adapter = FileAdapter::new(dir.path()).unwrap();
        let schema = Adapter::get_schema(&adapter, "people").unwrap();
        assert_eq!(schema.len(), 3);
        assert_eq!(schema[0].name, "id");
        assert_eq!(schema[0].data_type, DataType::Integer);
        assert_eq!(schema[1].data_type, DataType::String);
    }

    #[test]
    fn test_insert_appends_row() {
        let dir = sample_csv();
        let adapter = FileAdapter::new(dir.path()).unwrap();
        let mut values = ValueMap::new();
        values.insert("id".to_string(), Value::Int64(4));
        values.insert("name".to_string(), Value::from("Dave"));
        values.insert("age".to_string(), Value::Int64(19));
        assert_eq!(Adapter::insert(&adapter, "people", &values).unwrap(), 1);

        let content = std::fs::read_to_string(dir.path().join("people.csv")).unwrap();
        assert!(content.trim_end().ends_with("4,Dave,19"));
    }

    #[test]
    fn test_insert_rejected_for_parquet() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::File::create(dir.path().join("data.parquet")).unwrap();
        let adapter = FileAdapter::new(dir.path()).unwrap();
        let err = Adapter::insert(&adapter, "data", &ValueMap::new()).unwrap_err();
        assert!(matches!(err, Error::Query(_)));
    }

    #[test]
    fn test_list_tables() {
        let dir = sample_csv();
        let adapter = FileAdapter::new(dir.path()).unwrap();
        assert_eq!(Adapter::list_tables(&adapter).unwrap(), vec!["people"]);
    }

    #[test]
    fn test_missing_file_errors() {
        let dir = tempfile::tempdir().unwrap();
        let adapter = FileAdapter::new(dir.path()).unwrap();
        let err = Adapter::fetch(&adapter, "nope", &FetchPlan::new()).unwrap_err();
        assert!(matches!(err, Error::Adapter(_)));
    }
}
