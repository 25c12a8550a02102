//! Append-only event store. Readers work on immutable snapshots; every append publishes a new
//! snapshot under a bumped version.

mod memory;
mod sqlite;

pub use memory::MemoryEventStore;
pub use sqlite::SqliteEventStore;

use crate::error::Result;
use crate::events::{Event, NewEvent, StoredRecord};
use serde::Serialize;
use std::collections::BTreeMap;
use std::ops::Index;
use std::sync::Arc;
use tracing::{debug, warn};

pub trait EventStore: Send + Sync {
    /// Append a batch atomically. Readers see either none or all of it.
    fn append(&self, batch: Vec<NewEvent>) -> Result<AppendReport>;

    /// Current consistent view of the log.
    fn snapshot(&self) -> Result<Arc<Snapshot>>;

    /// Version of the latest published snapshot.
    fn version(&self) -> u64;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AppendReport {
    pub inserted: usize,
    pub version: u64,
}

/// Immutable view of the event log at one version.
///
/// Events live in shared segments, so publishing the next version copies only the new
/// records plus the occasional merge of tail segments. A segment is never larger than the
/// one before it, which keeps the segment count logarithmic in the log size.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    version: u64,
    segments: Vec<Arc<[Event]>>,
    /// Global index of each segment's first event
    starts: Vec<usize>,
    len: usize,
    skipped: usize,
}

impl Snapshot {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Parse raw records into a snapshot. Corrupt records are dropped and counted.
    pub fn build(version: u64, records: impl IntoIterator<Item = StoredRecord>) -> Self {
        Self::empty().extend(version, records)
    }

    /// New snapshot containing this one's events followed by `records`.
    pub fn extend(&self, version: u64, records: impl IntoIterator<Item = StoredRecord>) -> Self {
        let mut fresh = Vec::new();
        let mut skipped = 0usize;
        for record in records {
            match record.parse() {
                Ok(ev) => fresh.push(ev),
                Err(e) => {
                    debug!(record_id = %record.id, error = %e, "skipping corrupt event record");
                    skipped += 1;
                }
            }
        }
        if skipped > 0 {
            warn!(skipped, version, "corrupt event records skipped");
        }

        let mut segments = self.segments.clone();
        if !fresh.is_empty() {
            segments.push(Arc::from(fresh));
            while segments.len() >= 2
                && segments[segments.len() - 2].len() <= segments[segments.len() - 1].len()
            {
                let pair = segments.split_off(segments.len() - 2);
                let merged: Vec<Event> = pair.iter().flat_map(|seg| seg.iter()).cloned().collect();
                segments.push(Arc::from(merged));
            }
        }
        let mut starts = Vec::with_capacity(segments.len());
        let mut len = 0;
        for seg in &segments {
            starts.push(len);
            len += seg.len();
        }
        Self {
            version,
            segments,
            starts,
            len,
            skipped: self.skipped + skipped,
        }
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// Valid events in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &Event> + '_ {
        self.segments.iter().flat_map(|seg| seg.iter())
    }

    /// Records rejected while parsing.
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    /// Event indices grouped by user, users sorted by id, indices in insertion order.
    pub fn by_user(&self) -> BTreeMap<&str, Vec<usize>> {
        let mut out: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
        for (i, ev) in self.iter().enumerate() {
            out.entry(ev.user_id.as_str()).or_default().push(i);
        }
        out
    }

    pub fn users(&self) -> Vec<&str> {
        self.by_user().into_keys().collect()
    }

    /// One user's events in insertion order.
    pub fn events_for(&self, user_id: &str) -> Vec<&Event> {
        self.iter().filter(|e| e.user_id == user_id).collect()
    }
}

impl Index<usize> for Snapshot {
    type Output = Event;

    /// Event at insertion position `i`.
    fn index(&self, i: usize) -> &Event {
        let seg = self.starts.partition_point(|&start| start <= i).saturating_sub(1);
        &self.segments[seg][i - self.starts[seg]]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(user: &str, event: &str, ts: &str) -> StoredRecord {
        StoredRecord::assign(NewEvent::new(user, event, ts))
    }

    #[test]
    fn build_skips_and_counts_corrupt_records() {
        let snap = Snapshot::build(
            1,
            vec![
                rec("u1", "visit", "2024-01-01"),
                rec("", "visit", "2024-01-01"),
                rec("u2", "visit", "garbage"),
                rec("u2", "signup", "2024-01-02"),
            ],
        );
        assert_eq!(snap.version(), 1);
        assert_eq!(snap.len(), 2);
        assert_eq!(snap.skipped(), 2);
    }

    #[test]
    fn extend_leaves_original_untouched() {
        let a = Snapshot::build(1, vec![rec("u1", "visit", "2024-01-01")]);
        let b = a.extend(2, vec![rec("u2", "visit", "2024-01-01"), rec("u3", "x", "bad")]);
        assert_eq!(a.len(), 1);
        assert_eq!(a.skipped(), 0);
        assert_eq!(b.len(), 2);
        assert_eq!(b.skipped(), 1);
        assert_eq!(b.version(), 2);
    }

    #[test]
    fn appends_share_earlier_segments() {
        let first = (0..100).map(|i| rec(&format!("u{i}"), "visit", "2024-01-01"));
        let mut snap = Snapshot::build(1, first);
        let base = snap.clone();
        for v in 2..=64 {
            snap = snap.extend(v, vec![rec("late", "signup", "2024-01-02")]);
        }
        assert_eq!(snap.len(), 163);
        assert!(Arc::ptr_eq(&snap.segments[0], &base.segments[0]));
        assert!(snap.segment_count() <= 8, "{}", snap.segment_count());
        assert_eq!(snap[0].user_id, "u0");
        assert_eq!(snap[99].user_id, "u99");
        assert_eq!(snap[162].user_id, "late");
        let names: Vec<&str> = snap.iter().map(|e| e.user_id.as_str()).collect();
        assert_eq!(names.len(), 163);
        assert_eq!(names[100], "late");
    }

    #[test]
    fn all_corrupt_batch_keeps_segments() {
        let a = Snapshot::build(1, vec![rec("u1", "visit", "2024-01-01")]);
        let b = a.extend(2, vec![rec("", "visit", "2024-01-01")]);
        assert_eq!(b.segment_count(), 1);
        assert!(Arc::ptr_eq(&a.segments[0], &b.segments[0]));
        assert_eq!((b.len(), b.skipped(), b.version()), (1, 1, 2));
    }

    #[test]
    fn grouping_by_user() {
        let snap = Snapshot::build(
            1,
            vec![
                rec("b", "visit", "2024-01-02"),
                rec("a", "visit", "2024-01-01"),
                rec("b", "signup", "2024-01-01"),
            ],
        );
        assert_eq!(snap.users(), vec!["a", "b"]);
        assert_eq!(snap.by_user()["b"], vec![0, 2]);
        let b: Vec<&str> = snap
            .events_for("b")
            .iter()
            .map(|e| e.event_name.as_str())
            .collect();
        assert_eq!(b, vec!["visit", "signup"]);
    }
}
