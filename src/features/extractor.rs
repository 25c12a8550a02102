//! Feature extraction: progress pass → merged user properties + label → vectors.

use super::{BehavioralFeatures, FeatureVector};
use crate::config::FeaturesConfig;
use crate::funnel::ProgressPass;
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::debug;

pub struct FeatureExtractor {
    config: FeaturesConfig,
}

/// Vectors plus how many property values were dropped for not being numeric or boolean.
#[derive(Debug, Clone, Default)]
pub struct Extraction {
    pub vectors: Vec<FeatureVector>,
    pub dropped_values: usize,
}

impl FeatureExtractor {
    pub fn new(config: FeaturesConfig) -> Self {
        Self { config }
    }

    /// One vector per user in the pass. Properties merge chronologically, last write wins;
    /// labels come straight from the pass so they always agree with the funnel counts.
    pub fn extract(&self, pass: &ProgressPass) -> Extraction {
        let final_index = pass.definition.final_index() as i32;
        let mut out = Extraction::default();

        for user in &pass.users {
            let mut merged: BTreeMap<&str, &Value> = BTreeMap::new();
            for ev in pass.timeline(user) {
                for (k, v) in &ev.properties {
                    merged.insert(k.as_str(), v);
                }
            }

            let mut features = BTreeMap::new();
            for (key, value) in merged {
                match numeric(value) {
                    Some(x) => {
                        features.insert(key.to_string(), x);
                    }
                    None => {
                        debug!(user_id = %user.user_id, key, "dropping non-numeric property");
                        out.dropped_values += 1;
                    }
                }
            }

            if self.config.behavioral {
                BehavioralFeatures::from_progress(pass, user).write_into(&mut features);
            }

            out.vectors.push(FeatureVector {
                user_id: user.user_id.clone(),
                features,
                label: u8::from(user.max_step_index == final_index),
            });
        }

        if out.dropped_values > 0 {
            debug!(
                dropped = out.dropped_values,
                users = out.vectors.len(),
                "non-numeric property values dropped"
            );
        }
        out
    }
}

fn numeric(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64().filter(|x| x.is_finite()),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}
