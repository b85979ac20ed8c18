//! The cached chart list and its per-consumer loopback rewriting.
use std::sync::{Arc, RwLock};

use serde_json::{Map, Value};

use crate::constants::LOOPBACK_NAMES;

/// One chart set as reported by the provider.
pub type ChartListItem = Map<String, Value>;

/// Replaces loopback host names in every top-level string field with `host`.
pub fn rewrite_loopback(item: &ChartListItem, host: &str) -> ChartListItem {
    item.iter()
        .map(|(key, value)| {
            let value = match value {
                Value::String(text) => Value::String(
                    LOOPBACK_NAMES
                        .iter()
                        .fold(text.clone(), |acc, name| acc.replace(name, host)),
                ),
                other => other.clone(),
            };
            (key.clone(), value)
        })
        .collect()
}

/// Most recent chart list from a successful probe.
///
/// Cloning shares the same cache. The list is swapped as a whole, so readers see either
/// the previous or the new list, never a mix.
#[derive(Debug, Clone, Default)]
pub struct ChartCache {
    latest: Arc<RwLock<Option<Arc<Vec<ChartListItem>>>>>,
}

impl ChartCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the cached list.
    pub fn replace(&self, items: Vec<ChartListItem>) {
        let items = Arc::new(items);
        let mut guard = self
            .latest
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = Some(items);
    }

    /// The cached list as stored, or `None` before the first successful probe.
    pub fn snapshot(&self) -> Option<Arc<Vec<ChartListItem>>> {
        self.latest
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// The chart list as seen from `host`: loopback addresses point at `host`.
    ///
    /// Empty until the provider has answered once.
    pub fn list_charts(&self, host: &str) -> Vec<ChartListItem> {
        match self.snapshot() {
            Some(items) => items.iter().map(|item| rewrite_loopback(item, host)).collect(),
            None => Vec::new(),
        }
    }
}
