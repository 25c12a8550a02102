//! Per-user progress pass: how far each user got through an ordered funnel.
//! Shared by the funnel roll-up and the feature extractor so counts and labels agree.

use super::FunnelDefinition;
use crate::events::Event;
use crate::storage::Snapshot;
use chrono::{DateTime, Utc};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq)]
pub struct UserProgress {
    pub user_id: String,
    /// Index of the last matched step, -1 when step 0 was never matched
    pub max_step_index: i32,
    /// Time each matched step was reached, in step order
    pub reached_at: Vec<DateTime<Utc>>,
    /// Indices into the snapshot's events, chronological, ties in insertion order
    pub timeline: Vec<usize>,
}

impl UserProgress {
    pub fn first_seen(&self, snapshot: &Snapshot) -> Option<DateTime<Utc>> {
        self.timeline.first().map(|&i| snapshot[i].timestamp)
    }

    pub fn reached(&self, step_index: usize) -> bool {
        self.max_step_index >= 0 && step_index as i32 <= self.max_step_index
    }
}

/// Progress of every user in a snapshot against one definition.
#[derive(Debug, Clone)]
pub struct ProgressPass {
    pub definition: FunnelDefinition,
    pub snapshot: Arc<Snapshot>,
    /// One entry per user with at least one valid event, sorted by user id
    pub users: Vec<UserProgress>,
}

impl ProgressPass {
    pub fn compute(definition: &FunnelDefinition, snapshot: Arc<Snapshot>) -> Self {
        let steps = definition.steps();
        let events: &Snapshot = &snapshot;
        let users = snapshot
            .by_user()
            .into_iter()
            .map(|(user_id, mut timeline)| {
                // Stable: equal timestamps keep insertion order.
                timeline.sort_by_key(|&i| events[i].timestamp);
                let reached_at = match_steps(steps, timeline.iter().map(|&i| &events[i]));
                UserProgress {
                    user_id: user_id.to_string(),
                    max_step_index: reached_at.len() as i32 - 1,
                    reached_at,
                    timeline,
                }
            })
            .collect();
        Self {
            definition: definition.clone(),
            snapshot,
            users,
        }
    }

    pub fn version(&self) -> u64 {
        self.snapshot.version()
    }

    /// A user's events in chronological order.
    pub fn timeline<'a>(&'a self, user: &'a UserProgress) -> impl Iterator<Item = &'a Event> + 'a {
        let events: &Snapshot = &self.snapshot;
        user.timeline.iter().map(move |&i| &events[i])
    }
}

/// Greedy ordered match: advance a cursor over `steps` each time the next expected step
/// occurs. Earlier steps seen again never reset progress; later steps seen early never count.
pub fn match_steps<'a>(
    steps: &[String],
    chronological: impl IntoIterator<Item = &'a Event>,
) -> Vec<DateTime<Utc>> {
    let mut reached = Vec::with_capacity(steps.len());
    for ev in chronological {
        if reached.len() == steps.len() {
            break;
        }
        if ev.event_name == steps[reached.len()] {
            reached.push(ev.timestamp);
        }
    }
    reached
}
