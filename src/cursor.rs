use std::sync::atomic::Ordering;
use std::sync::Arc;

use log::debug;
use tideql_arrow::{columns_from_schema, row_at, RecordBatch};
use tideql_common::column::ColumnInfo;
use tideql_common::error::{Error, Result};
use tideql_common::types::{DataType, Value};
use tideql_planner::QueryPlanner;

use crate::connection::ConnectionCore;

pub const DEFAULT_ARRAYSIZE: usize = 100;

/// One entry of a cursor's result description.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDescription {
    pub name: String,
    pub data_type: DataType,
    pub nullable: bool,
}

impl From<ColumnInfo> for ColumnDescription {
    fn from(column: ColumnInfo) -> Self {
        Self {
            name: column.name,
            data_type: column.data_type,
            nullable: column.nullable,
        }
    }
}

/// A blocking cursor over one connection.
///
/// `execute` plans the statement and drives the engine; fetch methods are
/// only valid while a result set is present and advance an internal row
/// index over the batch. Statements on one cursor are strictly sequential.
pub struct Cursor {
    core: Arc<ConnectionCore>,
    planner: QueryPlanner,
    result: Option<RecordBatch>,
    row_index: usize,
    rowcount: i64,
    description: Option<Vec<ColumnDescription>>,
    arraysize: usize,
    closed: bool,
}

impl std::fmt::Debug for Cursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cursor")
            .field("row_index", &self.row_index)
            .field("rowcount", &self.rowcount)
            .field("arraysize", &self.arraysize)
            .field("closed", &self.closed)
            .finish()
    }
}

impl Cursor {
    pub(crate) fn new(core: Arc<ConnectionCore>) -> Self {
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

    pub fn execute(&mut self, sql: &str, parameters: &[Value]) -> Result<&mut Self> {
        self.ensure_open()?;
        let info = self.planner.parse(sql);
        debug!("executing {} statement on {:?}", info.operation, info.table);

        self.result = None;
        self.description = None;
        self.row_index = 0;
        self.rowcount = -1;

        let outcome = self.core.executor.execute(&info, parameters)?;
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

    /// Executes the statement once per parameter set; for mutations the
    /// row counts accumulate.
    pub fn executemany(&mut self, sql: &str, parameter_sets: &[Vec<Value>]) -> Result<u64> {
        let mut total = 0u64;
        for parameters in parameter_sets {
            self.execute(sql, parameters)?;
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
        let batch = self.current_batch()?;
        let mut rows = Vec::with_capacity(batch.num_rows().saturating_sub(self.row_index));
        while self.row_index < self.current_batch()?.num_rows() {
            let row = row_at(self.current_batch()?, self.row_index)?;
            self.row_index += 1;
            rows.push(row);
        }
        Ok(rows)
    }

    /// Iterates over the remaining rows.
    pub fn rows(&mut self) -> Rows<'_> {
        Rows { cursor: self }
    }

    pub fn description(&self) -> Option<&[ColumnDescription]> {
        self.description.as_deref()
    }

    /// Affected rows for mutations, result rows for reads, -1 when unknown.
    pub fn rowcount(&self) -> i64 {
        self.rowcount
    }

    pub fn arraysize(&self) -> usize {
        self.arraysize
    }

    pub fn set_arraysize(&mut self, arraysize: usize) {
        self.arraysize = arraysize.max(1);
    }

    /// Returns the current result as a columnar batch.
    pub fn batch(&self) -> Option<&RecordBatch> {
        self.result.as_ref()
    }

    pub fn close(&mut self) {
        self.closed = true;
        self.result = None;
        self.description = None;
    }
}

pub struct Rows<'a> {
    cursor: &'a mut Cursor,
}

impl Iterator for Rows<'_> {
    type Item = Result<Vec<Value>>;

    fn next(&mut self) -> Option<Self::Item> {
        self.cursor.fetchone().transpose()
    }
}
