//! Per-definition result cache. An entry is valid only at the store version it was built at;
//! a newer version replaces it, an older write is dropped. Bounded: past `capacity` step
//! lists the least recently used entry is evicted.

use crate::error::{EngineError, Result};
use crate::funnel::{FunnelDefinition, FunnelResult, ProgressPass};
use crate::model::SuggestionResult;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Default)]
struct Entry {
    version: u64,
    progress: Option<Arc<ProgressPass>>,
    funnel: Option<Arc<FunnelResult>>,
    /// Deterministic failures are cached too; they only change when the data does
    suggestions: Option<std::result::Result<Arc<SuggestionResult>, EngineError>>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

pub struct QueryCache {
    entries: DashMap<FunnelDefinition, Entry>,
    /// Front is least recently used
    lru: Mutex<VecDeque<FunnelDefinition>>,
    capacity: usize,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl QueryCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: DashMap::new(),
            lru: Mutex::new(VecDeque::new()),
            capacity: capacity.max(1),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    // No map guard may be held while `lru` is locked.
    fn lookup<T>(
        &self,
        def: &FunnelDefinition,
        version: u64,
        get: impl FnOnce(&Entry) -> Option<T>,
    ) -> Option<T> {
        let (found, stale) = match self.entries.get(def) {
            Some(e) if e.version == version => (get(&e), false),
            Some(e) => (None, e.version < version),
            None => (None, false),
        };
        if stale && self.entries.remove_if(def, |_, e| e.version < version).is_some() {
            self.lru.lock().retain(|k| k != def);
        }
        if found.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
            self.touch(def);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
        found
    }

    fn store(&self, def: &FunnelDefinition, version: u64, put: impl FnOnce(&mut Entry)) {
        {
            let mut entry = self.entries.entry(def.clone()).or_default();
            if entry.version > version {
                return;
            }
            if entry.version < version {
                *entry = Entry {
                    version,
                    ..Entry::default()
                };
            }
            put(&mut entry);
        }
        self.touch(def);
        self.evict();
    }

    fn touch(&self, def: &FunnelDefinition) {
        let mut lru = self.lru.lock();
        lru.retain(|k| k != def);
        lru.push_back(def.clone());
    }

    fn evict(&self) {
        let mut lru = self.lru.lock();
        while self.entries.len() > self.capacity {
            let Some(oldest) = lru.pop_front() else {
                break;
            };
            if self.entries.remove(&oldest).is_some() {
                self.evictions.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub fn progress(&self, def: &FunnelDefinition, version: u64) -> Option<Arc<ProgressPass>> {
        self.lookup(def, version, |e| e.progress.clone())
    }

    pub fn put_progress(&self, def: &FunnelDefinition, pass: Arc<ProgressPass>) {
        self.store(def, pass.version(), |e| e.progress = Some(pass));
    }

    pub fn funnel(&self, def: &FunnelDefinition, version: u64) -> Option<Arc<FunnelResult>> {
        self.lookup(def, version, |e| e.funnel.clone())
    }

    pub fn put_funnel(&self, def: &FunnelDefinition, version: u64, result: Arc<FunnelResult>) {
        self.store(def, version, |e| e.funnel = Some(result));
    }

    pub fn suggestions(
        &self,
        def: &FunnelDefinition,
        version: u64,
    ) -> Option<Result<Arc<SuggestionResult>>> {
        self.lookup(def, version, |e| e.suggestions.clone())
    }

    pub fn put_suggestions(
        &self,
        def: &FunnelDefinition,
        version: u64,
        result: Result<Arc<SuggestionResult>>,
    ) {
        self.store(def, version, |e| e.suggestions = Some(result));
    }

    /// Drop entries built before `version`.
    pub fn prune(&self, version: u64) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, e| e.version >= version);
        self.lru.lock().retain(|k| self.entries.contains_key(k));
        before - self.entries.len()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.entries.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }
}
