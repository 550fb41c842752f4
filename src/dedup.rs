use anyhow::Result;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::db::DismissalStore;

type DuplicateKey = (String, String);

/// Earliest recorded listing per (title, company), memoized for one run.
///
/// Entries are never invalidated, negative results included, so an index
/// must be built fresh for each run and never outlive it.
pub struct DuplicateIndex {
    store: Arc<dyn DismissalStore>,
    memo: Mutex<HashMap<DuplicateKey, Option<String>>>,
}

impl DuplicateIndex {
    pub fn new(store: Arc<dyn DismissalStore>) -> Self {
        Self {
            store,
            memo: Mutex::new(HashMap::new()),
        }
    }

    pub fn earliest_duplicate(&self, title: &str, company: &str) -> Result<Option<String>> {
        let key = (title.trim().to_lowercase(), company.trim().to_lowercase());
        if let Some(hit) = self.memo.lock().ok().and_then(|memo| memo.get(&key).cloned()) {
            return Ok(hit);
        }

        // The store lookup runs outside the lock; concurrent misses on the same
        // key both query and store the same answer.
        let found = self.store.earliest_duplicate(title, company)?;
        if let Ok(mut memo) = self.memo.lock() {
            memo.entry(key).or_insert_with(|| found.clone());
        }
        Ok(found)
    }

    pub fn len(&self) -> usize {
        self.memo.lock().map(|m| m.len()).unwrap_or(0)
    }
}
