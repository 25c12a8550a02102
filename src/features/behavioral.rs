//! Behavioral features derived from a user's timeline rather than their properties.

use crate::funnel::{ProgressPass, UserProgress};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BehavioralFeatures {
    pub event_count: u32,
    /// Seconds from first event to each non-final step, -1 when the step was not reached
    pub time_to_step: Vec<(String, f64)>,
}

impl BehavioralFeatures {
    pub fn from_progress(pass: &ProgressPass, user: &UserProgress) -> Self {
        let steps = pass.definition.steps();
        let first_seen = user.first_seen(&pass.snapshot);
        // The final step is the label; timing it would leak the answer.
        let time_to_step = steps[..steps.len() - 1]
            .iter()
            .enumerate()
            .map(|(i, step)| {
                let secs = match (first_seen, user.reached_at.get(i)) {
                    (Some(start), Some(at)) => (*at - start).num_milliseconds() as f64 / 1000.0,
                    _ => -1.0,
                };
                (step.clone(), secs)
            })
            .collect();
        Self {
            event_count: user.timeline.len() as u32,
            time_to_step,
        }
    }

    pub fn write_into(&self, features: &mut BTreeMap<String, f64>) {
        features.insert("_event_count".to_string(), self.event_count as f64);
        for (step, secs) in &self.time_to_step {
            features.insert(format!("_time_to_{step}"), *secs);
        }
    }
}
