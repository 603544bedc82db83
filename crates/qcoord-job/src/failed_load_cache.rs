//! A bounded-recency cache of collections whose load recently failed,
//! short-circuiting repeated loads against a broken broker.
//!
//! Kept as a plain collaborator the embedder constructs once and passes to
//! the scheduler, rather than a process-wide global.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use qcoord_types::CollectionId;

pub struct FailedLoadCache {
    window: Duration,
    failures: Mutex<HashMap<CollectionId, Instant>>,
}

impl FailedLoadCache {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            failures: Mutex::new(HashMap::new()),
        }
    }

    /// Records that `collection_id`'s load just failed, starting the window.
    pub fn record_failure(&self, collection_id: CollectionId) {
        self.failures.lock().unwrap().insert(collection_id, Instant::now());
    }

    /// True if `collection_id` failed within the configured window.
    pub fn recently_failed(&self, collection_id: CollectionId) -> bool {
        match self.failures.lock().unwrap().get(&collection_id) {
            Some(at) => at.elapsed() < self.window,
            None => false,
        }
    }

    /// Clears a collection's failure record, e.g. once a load succeeds.
    pub fn clear(&self, collection_id: CollectionId) {
        self.failures.lock().unwrap().remove(&collection_id);
    }
}
