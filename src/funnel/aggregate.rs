//! Roll-up of per-user progress into step counts and drop-offs.

use super::{FunnelDefinition, ProgressPass};
use crate::storage::Snapshot;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dropoff {
    pub from: String,
    pub to: String,
    pub count_from: u64,
    pub count_to: u64,
    /// Fraction of `from` users that did not reach `to`; 0 when nobody reached `from`
    pub drop_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunnelResult {
    pub steps: Vec<String>,
    /// Users whose progress reached at least step i; non-increasing
    pub counts: Vec<u64>,
    /// counts[i] / counts[0]
    pub conversion: Vec<f64>,
    pub dropoffs: Vec<Dropoff>,
    /// Largest drop rate, earliest pair on ties
    pub top_dropoff: Option<Dropoff>,
    pub total_users: u64,
    pub skipped_records: u64,
}

/// Run the progress pass and roll it up.
pub fn compute_funnel(definition: &FunnelDefinition, snapshot: Arc<Snapshot>) -> FunnelResult {
    rollup(&ProgressPass::compute(definition, snapshot))
}

pub fn rollup(pass: &ProgressPass) -> FunnelResult {
    let steps = pass.definition.steps().to_vec();
    let n = steps.len();

    // Histogram of how many steps each user reached, then suffix sums.
    let mut reached = vec![0u64; n + 1];
    for user in &pass.users {
        reached[(user.max_step_index + 1) as usize] += 1;
    }
    let mut counts = vec![0u64; n];
    let mut running = 0u64;
    for i in (0..n).rev() {
        running += reached[i + 1];
        counts[i] = running;
    }

    let conversion = counts
        .iter()
        .map(|&c| ratio(c, counts[0]))
        .collect::<Vec<_>>();

    let dropoffs: Vec<Dropoff> = steps
        .windows(2)
        .zip(counts.windows(2))
        .map(|(names, c)| Dropoff {
            from: names[0].clone(),
            to: names[1].clone(),
            count_from: c[0],
            count_to: c[1],
            drop_rate: if c[0] == 0 { 0.0 } else { 1.0 - ratio(c[1], c[0]) },
        })
        .collect();

    // Pairs nobody entered are not candidates; an empty funnel has no top drop-off.
    let mut top: Option<&Dropoff> = None;
    for d in dropoffs.iter().filter(|d| d.count_from > 0) {
        if top.map_or(true, |t| d.drop_rate > t.drop_rate) {
            top = Some(d);
        }
    }
    let top_dropoff = top.cloned();

    FunnelResult {
        steps,
        counts,
        conversion,
        dropoffs,
        top_dropoff,
        total_users: pass.users.len() as u64,
        skipped_records: pass.snapshot.skipped() as u64,
    }
}

fn ratio(num: u64, den: u64) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{NewEvent, StoredRecord};

    fn snapshot(rows: &[(&str, &str, &str)]) -> Arc<Snapshot> {
        Arc::new(Snapshot::build(
            1,
            rows.iter()
                .map(|(u, e, t)| StoredRecord::assign(NewEvent::new(*u, *e, *t))),
        ))
    }

    fn def(s: &str) -> FunnelDefinition {
        FunnelDefinition::parse(s).unwrap()
    }

    #[test]
    fn counts_literal_fixture() {
        // u1 reaches C (2), u2 reaches B (1), u3 never matches A (-1)
        let snap = snapshot(&[
            ("u1", "A", "2024-01-01T00:00:01Z"),
            ("u1", "B", "2024-01-01T00:00:02Z"),
            ("u1", "C", "2024-01-01T00:00:03Z"),
            ("u2", "A", "2024-01-01T00:00:01Z"),
            ("u2", "B", "2024-01-01T00:00:02Z"),
            ("u3", "B", "2024-01-01T00:00:01Z"),
        ]);
        let pass = ProgressPass::compute(&def("A,B,C"), snap);
        let indices: Vec<i32> = pass.users.iter().map(|u| u.max_step_index).collect();
        assert_eq!(indices, vec![2, 1, -1]);
        let r = rollup(&pass);
        assert_eq!(r.counts, vec![2, 2, 1]);
        assert_eq!(r.conversion, vec![1.0, 1.0, 0.5]);
        assert_eq!(r.dropoffs.len(), 2);
        assert_eq!(r.dropoffs[0].drop_rate, 0.0);
        assert_eq!(r.dropoffs[1].drop_rate, 0.5);
        let top = r.top_dropoff.unwrap();
        assert_eq!((top.from.as_str(), top.to.as_str()), ("B", "C"));
    }

    #[test]
    fn empty_store() {
        let r = compute_funnel(&def("A,B,C"), Arc::new(Snapshot::empty()));
        assert_eq!(r.counts, vec![0, 0, 0]);
        assert_eq!(r.conversion, vec![0.0, 0.0, 0.0]);
        assert!(r.dropoffs.iter().all(|d| d.drop_rate == 0.0));
        assert!(r.top_dropoff.is_none());
        assert_eq!(r.total_users, 0);
    }

    #[test]
    fn single_step_has_no_dropoffs() {
        let snap = snapshot(&[("u1", "A", "2024-01-01")]);
        let r = compute_funnel(&def("A"), snap);
        assert_eq!(r.counts, vec![1]);
        assert!(r.dropoffs.is_empty());
        assert!(r.top_dropoff.is_none());
    }

    #[test]
    fn top_dropoff_tie_goes_to_earliest_pair() {
        // 4 reach A, 2 reach B, 1 reaches C: both pairs drop 50%.
        let mut rows = Vec::new();
        for u in ["u1", "u2", "u3", "u4"] {
            rows.push((u, "A", "2024-01-01T00:00:01Z"));
        }
        for u in ["u1", "u2"] {
            rows.push((u, "B", "2024-01-01T00:00:02Z"));
        }
        rows.push(("u1", "C", "2024-01-01T00:00:03Z"));
        let r = compute_funnel(&def("A,B,C"), snapshot(&rows));
        assert_eq!(r.counts, vec![4, 2, 1]);
        let top = r.top_dropoff.unwrap();
        assert_eq!(top.from, "A");
        assert_eq!(top.drop_rate, 0.5);
    }

    #[test]
    fn invariants_and_idempotence() {
        let snap = snapshot(&[
            ("u1", "visit", "2024-01-01T00:00:01Z"),
            ("u1", "signup", "2024-01-01T00:00:02Z"),
            ("u2", "signup", "2024-01-01T00:00:01Z"),
            ("u2", "visit", "2024-01-01T00:00:02Z"),
            ("u3", "visit", "2024-01-01T00:00:01Z"),
            ("u3", "purchase", "2024-01-01T00:00:02Z"),
            ("u4", "purchase", "2024-01-01T00:00:01Z"),
        ]);
        for steps in ["visit,signup,purchase", "purchase,visit", "signup,visit,purchase"] {
            let d = def(steps);
            let a = compute_funnel(&d, snap.clone());
            let b = compute_funnel(&d, snap.clone());
            assert_eq!(a, b);
            assert!(a.counts.windows(2).all(|w| w[0] >= w[1]));
            for drop in &a.dropoffs {
                assert!((0.0..=1.0).contains(&drop.drop_rate));
                if drop.count_from == 0 {
                    assert_eq!(drop.drop_rate, 0.0);
                }
            }
        }
    }

    #[test]
    fn skipped_records_are_reported() {
        let snap = snapshot(&[
            ("u1", "A", "2024-01-01"),
            ("u2", "A", "whenever"),
        ]);
        let r = compute_funnel(&def("A,B"), snap);
        assert_eq!(r.skipped_records, 1);
        assert_eq!(r.counts, vec![1, 0]);
    }

    #[test]
    fn serializes_with_expected_fields() {
        let r = compute_funnel(&def("A,B"), snapshot(&[("u1", "A", "2024-01-01")]));
        let v = serde_json::to_value(&r).unwrap();
        assert_eq!(v["steps"], serde_json::json!(["A", "B"]));
        assert_eq!(v["counts"], serde_json::json!([1, 0]));
        assert_eq!(v["dropoffs"][0]["from"], "A");
        assert_eq!(v["dropoffs"][0]["count_to"], 0);
        assert_eq!(v["top_dropoff"]["drop_rate"], 1.0);
    }
}
