//! Ordered funnels: definition parsing, the per-user progress pass and the count roll-up.

mod aggregate;
mod progress;

pub use aggregate::{compute_funnel, rollup, Dropoff, FunnelResult};
pub use progress::{match_steps, ProgressPass, UserProgress};

use crate::error::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

/// Ordered list of distinct, non-blank step names. Identity of a cache entry is the exact list.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct FunnelDefinition(Vec<String>);

impl FunnelDefinition {
    pub fn new(steps: Vec<String>) -> Result<Self> {
        if steps.is_empty() {
            return Err(EngineError::Validation("step list is empty".into()));
        }
        let mut seen = HashSet::with_capacity(steps.len());
        let mut out = Vec::with_capacity(steps.len());
        for (i, raw) in steps.into_iter().enumerate() {
            let step = raw.trim();
            if step.is_empty() {
                return Err(EngineError::Validation(format!(
                    "step {} has a blank name",
                    i + 1
                )));
            }
            if !seen.insert(step.to_string()) {
                return Err(EngineError::Validation(format!(
                    "duplicate step name {step:?}"
                )));
            }
            out.push(step.to_string());
        }
        Ok(Self(out))
    }

    /// Parse a comma-separated list such as `visit,signup,purchase`.
    pub fn parse(raw: &str) -> Result<Self> {
        if raw.trim().is_empty() {
            return Err(EngineError::Validation("step list is empty".into()));
        }
        Self::new(raw.split(',').map(str::to_string).collect())
    }

    pub fn steps(&self) -> &[String] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn final_index(&self) -> usize {
        self.0.len() - 1
    }
}

impl FromStr for FunnelDefinition {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<Vec<String>> for FunnelDefinition {
    type Error = EngineError;

    fn try_from(steps: Vec<String>) -> Result<Self> {
        Self::new(steps)
    }
}

impl From<FunnelDefinition> for Vec<String> {
    fn from(def: FunnelDefinition) -> Self {
        def.0
    }
}

impl fmt::Display for FunnelDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join(","))
    }
}
