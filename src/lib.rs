//! TideQL - a SQL-over-REST federation engine.
//!
//! Ordinary SQL statements name logical tables backed by remote HTTP APIs
//! (ticketing, ITSM, generic REST) or local files. Each statement is
//! planned into a neutral pushdown record, translated into the source's
//! native filter dialect, and whatever the source cannot evaluate is
//! finished locally on an embedded analytical engine over the fetched
//! columnar batch.
//!
//! # Architecture
//!
//! ```text
//! SQL → planner → QueryInfo → engine → adapter.fetch(plan) → RecordBatch
//!                                 ↘ (fallback) local engine over rewritten SQL
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use tideql::connect;
//!
//! let connection = connect("servicenow://dev.service-now.com")?;
//! let mut cursor = connection.cursor()?;
//! cursor.execute(
//!     "SELECT number, short_description FROM incident WHERE priority = 1",
//!     &[],
//! )?;
//! for row in cursor.rows() {
//!     println!("{:?}", row?);
//! }
//! ```

pub use tideql_adapters::auth::Auth;
pub use tideql_adapters::file::FileAdapter;
pub use tideql_adapters::jira::JiraAdapter;
pub use tideql_adapters::rest::{EndpointConfig, FilterFormat, RestAdapter};
pub use tideql_adapters::schema_cache::SchemaCache;
pub use tideql_adapters::servicenow::ServiceNowAdapter;
pub use tideql_adapters::{Adapter, AsyncAdapter, FetchPlan};
pub use tideql_arrow::RecordBatch;
pub use tideql_common::column::ColumnInfo;
pub use tideql_common::error::{Error, Result};
pub use tideql_common::types::{DataType, Value, ValueMap};
pub use tideql_engine::{AsyncExecutor, Executor, LocalEngine, StatementOutcome};
pub use tideql_http::{
    close_pools, configure_pools, AsyncHttpPool, HttpPool, PageFetcher, PoolConfig,
    RetryController,
};
pub use tideql_planner::{
    Aggregate, AggregateFunc, JoinInfo, JoinKind, Operation, Predicate, PredicateOp,
    PredicateValue, QueryInfo, QueryPlanner, SortDirection,
};

mod async_connection;
mod async_cursor;
mod connection;
mod cursor;
mod options;

pub use async_connection::AsyncConnection;
pub use async_cursor::AsyncCursor;
pub use connection::Connection;
pub use cursor::{ColumnDescription, Cursor, Rows, DEFAULT_ARRAYSIZE};
pub use options::ConnectionOptions;

/// Opens a blocking connection from a URI-style connection string.
pub fn connect(connection_string: &str) -> Result<Connection> {
    Connection::open(connection_string)
}

/// Opens a cooperative-concurrency connection from the same connection
/// string grammar.
pub fn connect_async(connection_string: &str) -> Result<AsyncConnection> {
    AsyncConnection::open(connection_string)
}
