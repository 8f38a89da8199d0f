use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tideql_adapters::file::FileAdapter;
use tideql_adapters::jira::JiraAdapter;
use tideql_adapters::rest::RestAdapter;
use tideql_adapters::schema_cache::SchemaCache;
use tideql_adapters::servicenow::ServiceNowAdapter;
use tideql_adapters::{Adapter, AsyncAdapter};
use tideql_common::error::{Error, Result};
use tideql_engine::{Executor, LocalEngine};

use crate::cursor::Cursor;
use crate::options::ConnectionOptions;

pub(crate) struct ConnectionCore {
    pub(crate) executor: Executor,
    pub(crate) cache: Arc<SchemaCache>,
    pub(crate) closed: AtomicBool,
}

/// Instantiates the adapter a connection string selects, returning it for
/// both scheduling paths (every built-in adapter implements both
/// contracts).
pub(crate) fn build_adapter(
    options: &ConnectionOptions,
    cache: &Arc<SchemaCache>,
) -> Result<(Arc<dyn Adapter>, Arc<dyn AsyncAdapter>)> {
    match options.scheme.as_str() {
        "servicenow" => {
            let mut adapter = ServiceNowAdapter::new(options.host.clone())
                .with_auth(options.auth())
                .with_schema_cache(Arc::clone(cache));
            if let Some(page_size) = options.param_usize("page_size") {
                adapter = adapter.with_page_size(page_size);
            }
            if let Some(max_parallel) = options.param_usize("max_parallel") {
                adapter = adapter.with_max_parallel(max_parallel);
            }
            if let Some(display_value) = options.params.get("display_value") {
                adapter = adapter.with_display_value(display_value.clone());
            }
            let adapter = Arc::new(adapter);
            Ok((adapter.clone(), adapter))
        }
        "jira" => {
            let mut adapter = JiraAdapter::new(options.host.clone())
                .with_auth(options.auth())
                .with_schema_cache(Arc::clone(cache));
            if let Some(page_size) = options.param_usize("page_size") {
                adapter = adapter.with_page_size(page_size);
            }
            if let Some(expand) = options.params.get("expand") {
                adapter = adapter.with_expand(expand.split(',').map(str::to_string).collect());
            }
            let adapter = Arc::new(adapter);
            Ok((adapter.clone(), adapter))
        }
        "rest" => {
            let adapter = Arc::new(
                RestAdapter::new(options.host.clone())
                    .with_auth(options.auth())
                    .with_schema_cache(Arc::clone(cache)),
            );
            Ok((adapter.clone(), adapter))
        }
        "file" => {
            let adapter = Arc::new(
                FileAdapter::new(options.host.clone())?.with_schema_cache(Arc::clone(cache)),
            );
            Ok((adapter.clone(), adapter))
        }
        other => Err(Error::configuration(format!("unknown adapter scheme: {}", other))),
    }
}

/// A blocking connection: the execution engine plus the adapters registered
/// on it. Cursors created from one connection share its adapters, schema
/// cache and local analytical engine.
pub struct Connection {
    core: Arc<ConnectionCore>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection").finish()
    }
}

impl Connection {
    /// Opens a connection whose default adapter comes from the connection
    /// string.
    pub fn open(connection_string: &str) -> Result<Self> {
        let options = ConnectionOptions::parse(connection_string)?;
        let connection = Self::local()?;
        let (adapter, _) = build_adapter(&options, &connection.core.cache)?;
        connection.core.executor.register_adapter("default", adapter);
        Ok(connection)
    }

    /// Opens a connection with no default adapter; statements run on the
    /// local analytical engine until adapters are registered.
    pub fn local() -> Result<Self> {
        let local = Arc::new(LocalEngine::new()?);
        Ok(Self {
            core: Arc::new(ConnectionCore {
                executor: Executor::new(local),
                cache: Arc::new(SchemaCache::new()),
                closed: AtomicBool::new(false),
            }),
        })
    }

    /// Registers an adapter under a schema prefix (e.g. `sales` for
    /// `sales.Account`) or as `default`.
    pub fn register_adapter(&self, name: &str, adapter: Arc<dyn Adapter>) {
        self.core.executor.register_adapter(name, adapter);
    }

    pub fn cursor(&self) -> Result<Cursor> {
        if self.is_closed() {
            return Err(Error::connection("connection is closed"));
        }
        Ok(Cursor::new(Arc::clone(&self.core)))
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
