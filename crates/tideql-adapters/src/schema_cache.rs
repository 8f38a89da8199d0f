use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use log::debug;
use tideql_common::column::ColumnInfo;

pub const DEFAULT_TTL: Duration = Duration::from_secs(3600);

struct CacheEntry {
    columns: Vec<ColumnInfo>,
    expires_at: Instant,
}

/// Caches discovered table schemas across calls, keyed by
/// `(adapter_name, table)`. Entries past their TTL read as absent; safe for
/// concurrent access from multiple cursors.
pub struct SchemaCache {
    entries: RwLock<HashMap<(String, String), CacheEntry>>,
    default_ttl: Duration,
}

impl SchemaCache {
    pub fn new() -> Self {
        Self::with_ttl(DEFAULT_TTL)
    }

    pub fn with_ttl(default_ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            default_ttl,
        }
    }

    pub fn get(&self, adapter: &str, table: &str) -> Option<Vec<ColumnInfo>> {
        let entries = self.entries.read().ok()?;
        let entry = entries.get(&(adapter.to_string(), table.to_string()))?;
        if entry.expires_at <= Instant::now() {
            return None;
        }
        Some(entry.columns.clone())
    }

    pub fn set(&self, adapter: &str, table: &str, columns: Vec<ColumnInfo>) {
        self.set_with_ttl(adapter, table, columns, self.default_ttl);
    }

    pub fn set_with_ttl(&self, adapter: &str, table: &str, columns: Vec<ColumnInfo>, ttl: Duration) {
        if let Ok(mut entries) = self.entries.write() {
            debug!("caching schema for {}.{} ({} columns)", adapter, table, columns.len());
            entries.insert(
                (adapter.to_string(), table.to_string()),
                CacheEntry {
                    columns,
                    expires_at: Instant::now() + ttl,
                },
            );
        }
    }

    pub fn invalidate(&self, adapter: &str, table: &str) {
        if let Ok(mut entries) = self.entries.write() {
            entries.remove(&(adapter.to_string(), table.to_string()));
        }
    }

    pub fn clear(&self) {
        if let Ok(mut entries) = self.entries.write() {
            entries.clear();
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for SchemaCache {
    fn default() -> Self {
        Self::new()
    }
}
