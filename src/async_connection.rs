use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tideql_adapters::schema_cache::SchemaCache;
use tideql_adapters::AsyncAdapter;
use tideql_common::error::{Error, Result};
use tideql_engine::{AsyncExecutor, LocalEngine};

use crate::async_cursor::AsyncCursor;
use crate::connection::build_adapter;
use crate::options::ConnectionOptions;

pub(crate) struct AsyncConnectionCore {
    pub(crate) executor: AsyncExecutor,
    pub(crate) cache: Arc<SchemaCache>,
    pub(crate) closed: AtomicBool,
}

/// The cooperative-concurrency connection. Construction and semantics
/// mirror [`Connection`](crate::Connection); only the scheduling mode
/// differs.
pub struct AsyncConnection {
    core: Arc<AsyncConnectionCore>,
}

impl AsyncConnection {
    pub fn open(connection_string: &str) -> Result<Self> {
        let options = ConnectionOptions::parse(connection_string)?;
        let connection = Self::local()?;
        let (_, adapter) = build_adapter(&options, &connection.core.cache)?;
        connection.core.executor.register_adapter("default", adapter);
        Ok(connection)
    }

    pub fn local() -> Result<Self> {
        let local = Arc::new(LocalEngine::new()?);
        Ok(Self {
            core: Arc::new(AsyncConnectionCore {
                executor: AsyncExecutor::new(local),
                cache: Arc::new(SchemaCache::new()),
                closed: AtomicBool::new(false),
            }),
        })
    }

    pub fn register_adapter(&self, name: &str, adapter: Arc<dyn AsyncAdapter>) {
        self.core.executor.register_adapter(name, adapter);
    }

    pub fn cursor(&self) -> Result<AsyncCursor> {
        if self.is_closed() {
            return Err(Error::connection("connection is closed"));
        }
        Ok(AsyncCursor::new(Arc::clone(&self.core)))
    }

    pub fn schema_cache(&self) -> &Arc<SchemaCache> {
        &self.core.cache
    }

    pub fn is_closed(&self) -> bool {
        self.core.closed.load(Ordering::SeqCst)
    }

    pub fn close(&self) {
        self.core.closed.store(true, Ordering::SeqCst);
    }
}
