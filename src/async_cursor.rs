use std::sync::atomic::Ordering;
use std::sync::Arc;

use log::debug;
use tideql_arrow::{columns_from_schema, row_at, RecordBatch};
use tideql_common::error::{Error, Result};
use tideql_common::types::Value;
use tideql_planner::QueryPlanner;

use crate::async_connection::AsyncConnectionCore;
use crate::cursor::{ColumnDescription, DEFAULT_ARRAYSIZE};

/// Cooperative-concurrency cursor; semantics match the blocking
/// [`Cursor`](crate::Cursor) statement for statement. Closing the cursor is
/// observed before the next engine step begins; an in-flight request
/// completes and its result is discarded.
pub struct AsyncCursor {
    core: Arc<AsyncConnectionCore>,
    planner: QueryPlanner,
    result: Option<RecordBatch>,
    row_index: usize,
    rowcount: i64,
    description: Option<Vec<ColumnDescription>>,
    arraysize: usize,
    closed: bool,
}

impl AsyncCursor {
    pub(crate) fn new(core: Arc<AsyncConnectionCore>) -> Self {
        Self {
            core,
            planner: QueryPlanner::new(),
            result: None,
            row_index: 0,
            rowcount: -1,
            description: None,
            arraysize: DEFAULT_ARRAYSIZE,
            closed: false,
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(Error::query("cursor is closed"));
        }
        if self.core.closed.load(Ordering::SeqCst) {
            return Err(Error::connection("connection is closed"));
        }
        Ok(())
    }

    pub async fn execute(&mut self, sql: &str, parameters: &[Value]) -> Result<&mut Self> {
        self.ensure_open()?;
        let info = self.planner.parse(sql);
        debug!("executing {} statement on {:?}", info.operation, info.table);

        self.result = None;
        self.description = None;
        self.row_index = 0;
        self.rowcount = -1;

        let outcome = self.core.executor.execute(&info, parameters).await?;
        if self.closed || self.core.closed.load(Ordering::SeqCst) {
            // Closed while the statement was in flight; the result is
            // discarded.
            return Err(Error::query("cursor is closed"));
        }
        self.rowcount = outcome.rowcount;
        if let Some(batch) = &outcome.batch {
            self.description = Some(
                columns_from_schema(&batch.schema())
                    .into_iter()
                    .map(ColumnDescription::from)
                    .collect(),
            );
        }
        self.result = outcome.batch;
        Ok(self)
    }

    pub async fn executemany(&mut self, sql: &str, parameter_sets: &[Vec<Value>]) -> Result<u64> {
        let mut total = 0u64;
        for parameters in parameter_sets {
            self.execute(sql, parameters).await?;
            if self.rowcount > 0 {
                total += self.rowcount as u64;
            }
        }
        self.rowcount = total as i64;
        Ok(total)
    }

    fn current_batch(&self) -> Result<&RecordBatch> {
        self.result
            .as_ref()
            .ok_or_else(|| Error::query("no result set is available on this cursor"))
    }

    pub fn fetchone(&mut self) -> Result<Option<Vec<Value>>> {
        self.ensure_open()?;
        let batch = self.current_batch()?;
        if self.row_index >= batch.num_rows() {
            return Ok(None);
        }
        let row = row_at(batch, self.row_index)?;
        self.row_index += 1;
        Ok(Some(row))
    }

    pub fn fetchmany(&mut self, size: Option<usize>) -> Result<Vec<Vec<Value>>> {
        let size = size.unwrap_or(self.arraysize);
        let mut rows = Vec::with_capacity(size);
        while rows.len() < size {
            match self.fetchone()? {
                Some(row) => rows.push(row),
                None => break,
            }
        }
        Ok(rows)
    }

    pub fn fetchall(&mut self) -> Result<Vec<Vec<Value>>> {
        self.ensure_open()?;
        let mut rows = Vec::new();
        while let Some(row) = self.fetchone()? {
            rows.push(row);
        }
        Ok(rows)
    }

    pub fn description(&self) -> Option<&[ColumnDescription]> {
        self.description.as_deref()
    }

    pub fn rowcount(&self) -> i64 {
        self.rowcount
    }

    pub fn arraysize(&self) -> usize {
        self.arraysize
    }

    pub fn set_arraysize(&mut self, arraysize: usize) {
        self.arraysize = arraysize.max(1);
    }

    pub fn batch(&self) -> Option<&RecordBatch> {
        self.result.as_ref()
    }

    pub fn close(&mut self) {
        self.closed = true;
        self.result = None;
        self.description = None;
    }
}
