use std::sync::{Arc, Mutex};

use datafusion::catalog::{CatalogProvider, SchemaProvider};
use datafusion::prelude::SessionContext;
use log::debug;
use tideql_arrow::{concat, RecordBatch};
use tideql_common::error::{Error, Result};

/// DataFusion's default catalog name.
const CATALOG: &str = "datafusion";

/// The embedded analytical engine: register a batch under a name, execute
/// arbitrary SQL, get a batch back.
///
/// The context is driven by an owned current-thread runtime and a lock is
/// taken around every execute call; the engine's connection is per
/// cursor/connection and is never shared across threads without it. The
/// blocking `execute` must not be called from inside an async runtime; the
/// cooperative path uses [`LocalEngine::execute_async`], which dispatches
/// to a worker thread.
pub struct LocalEngine {
    ctx: SessionContext,
    runtime: tokio::runtime::Runtime,
    lock: Mutex<()>,
}

impl LocalEngine {
    pub fn new() -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| Error::query(format!("failed to start local engine runtime: {}", e)))?;
        Ok(Self {
            ctx: SessionContext::new(),
            runtime,
            lock: Mutex::new(()),
        })
    }

    /// Registers a batch as a queryable table.
    pub fn register_batch(&self, name: &str, batch: RecordBatch) -> Result<()> {
        self.ctx
            .register_batch(name, batch)
            .map_err(|e| Error::query(format!("failed to register {}: {}", name, e)))?;
        debug!("registered local table {}", name);
        Ok(())
    }

    /// Removes a registered table; unknown names are ignored.
    pub fn deregister(&self, name: &str) {
        let _ = self.ctx.deregister_table(name);
    }

    /// Removes a schema-qualified view; unknown names are ignored.
    pub fn deregister_view(&self, schema: &str, name: &str) {
        if let Some(catalog) = self.ctx.catalog(CATALOG) {
            if let Some(schema) = catalog.schema(schema) {
                let _ = schema.deregister_table(name);
            }
        }
    }

    pub fn execute(&self, sql: &str) -> Result<RecordBatch> {
        let _guard = self
            .lock
            .lock()
            .map_err(|_| Error::query("local engine lock poisoned"))?;
        self.runtime.block_on(async {
            let df = self
                .ctx
                .sql(sql)
                .await
                .map_err(|e| Error::query(format!("local execution failed: {}", e)))?;
            let schema = df.schema().inner().clone();
            let batches = df
                .collect()
                .await
                .map_err(|e| Error::query(format!("local execution failed: {}", e)))?;
            if batches.is_empty() {
                Ok(RecordBatch::new_empty(schema))
            } else {
                concat(&batches).map_err(|e| Error::query(e.to_string()))
            }
        })
    }

    /// Cooperative form of [`execute`](Self::execute): the blocking call is
    /// dispatched to a worker thread so the scheduler is never blocked.
    pub async fn execute_async(self: &Arc<Self>, sql: &str) -> Result<RecordBatch> {
        let engine = Arc::clone(self);
        let sql = sql.to_string();
        tokio::task::spawn_blocking(move || engine.execute(&sql))
            .await
            .map_err(|e| Error::query(format!("local execution task failed: {}", e)))?
    }

    /// Creates `schema`.`name` as a view over an already-registered source
    /// table, creating the schema when needed.
    pub fn register_view(&self, schema: &str, name: &str, source: &str) -> Result<()> {
        self.execute(&format!("CREATE SCHEMA IF NOT EXISTS \"{}\"", schema))?;
        self.execute(&format!(
            "CREATE OR REPLACE VIEW \"{}\".\"{}\" AS SELECT * FROM \"{}\"",
            schema, name, source
        ))?;
        Ok(())
    }

    /// Cooperative form of [`register_view`](Self::register_view).
    pub async fn register_view_async(
        self: &Arc<Self>,
        schema: &str,
        name: &str,
        source: &str,
    ) -> Result<()> {
        let engine = Arc::clone(self);
        let (schema, name, source) = (schema.to_string(), name.to_string(), source.to_string());
        tokio::task::spawn_blocking(move || engine.register_view(&schema, &name, &source))
            .await
            .map_err(|e| Error::query(format!("local execution task failed: {}", e)))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tideql_arrow::{infer_columns, records_to_batch, JsonRecord};
    use tideql_common::types::Value;

    fn batch(rows: Vec<serde_json::Value>) -> RecordBatch {
        let records: Vec<JsonRecord> = rows
            .into_iter()
            .map(|v| match v {
                serde_json::Value::Object(map) => map,
                _ => unreachable!(),
            })
            .collect();
        let columns = infer_columns(&records);
        records_to_batch(&records, &columns, None).unwrap()
    }

    fn sales_batch() -> RecordBatch {
        batch(vec![
            json!({"grp": "A", "val": 10}),
            json!({"grp": "A", "val": 20}),
            json!({"grp": "B", "val": 5}),
        ])
    }

    #[test]
    fn test_register_execute() {
        let engine = LocalEngine::new().unwrap();
        engine.register_batch("t", sales_batch()).unwrap();
        let result = engine
            .execute("SELECT grp, SUM(val) AS total FROM t GROUP BY grp ORDER BY grp")
            .unwrap();
        let rows = tideql_arrow::batch_rows(&result).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0][0], Value::String("A".to_string()));
        assert_eq!(rows[0][1], Value::Int64(30));
        assert_eq!(rows[1][1], Value::Int64(5));
    }

    #[test]
    fn test_deregister() {
        let engine = LocalEngine::new().unwrap();
        engine.register_batch("gone", sales_batch()).unwrap();
        engine.deregister("gone");
        assert!(engine.execute("SELECT * FROM gone").is_err());
    }

    #[test]
    fn test_errors_surface_as_query_errors() {
        let engine = LocalEngine::new().unwrap();
        let err = engine.execute("SELECT * FROM missing_table").unwrap_err();
        assert!(matches!(err, Error::Query(_)));
    }

    #[test]
    fn test_qualified_view() {
        let engine = LocalEngine::new().unwrap();
        engine.register_batch("t_tmp", sales_batch()).unwrap();
        engine.register_view("sales", "account", "t_tmp").unwrap();
        let result = engine.execute("SELECT COUNT(*) FROM sales.account").unwrap();
        let rows = tideql_arrow::batch_rows(&result).unwrap();
        assert_eq!(rows[0][0], Value::Int64(3));

        engine.deregister_view("sales", "account");
        assert!(engine.execute("SELECT * FROM sales.account").is_err());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_execute_async() {
        let engine = Arc::new(LocalEngine::new().unwrap());
        engine.register_batch("t", sales_batch()).unwrap();
        let result = engine.execute_async("SELECT COUNT(*) AS n FROM t").await.unwrap();
        let rows = tideql_arrow::batch_rows(&result).unwrap();
        assert_eq!(rows[0][0], Value::Int64(3));
    }
}
