//! In-process event log. Each append publishes a snapshot that shares the earlier events.

use super::{AppendReport, EventStore, Snapshot};
use crate::error::Result;
use crate::events::{NewEvent, StoredRecord};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Default)]
pub struct MemoryEventStore {
    /// Serializes writers; readers never take it.
    writer: Mutex<()>,
    current: RwLock<Arc<Snapshot>>,
    version: AtomicU64,
}

impl MemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl EventStore for MemoryEventStore {
    fn append(&self, batch: Vec<NewEvent>) -> Result<AppendReport> {
        let _guard = self.writer.lock();
        let inserted = batch.len();
        if inserted == 0 {
            return Ok(AppendReport {
                inserted,
                version: self.version(),
            });
        }
        let version = self.version.load(Ordering::Acquire) + 1;
        let records = batch.into_iter().map(StoredRecord::assign);
        let next = Arc::new(self.current.read().extend(version, records));
        *self.current.write() = next;
        self.version.store(version, Ordering::Release);
        Ok(AppendReport { inserted, version })
    }

    fn snapshot(&self) -> Result<Arc<Snapshot>> {
        Ok(self.current.read().clone())
    }

    fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }
}
