//! Reduction of several samples of one series into a single value
//!
//! A query usually returns one row per step for each series in the
//! evaluation window. Rows that share a label-set fingerprint are folded
//! into one sample according to the rule's match type and compare
//! operator before the threshold is checked.

use std::collections::{HashMap, HashSet};

use super::condition::{CompareOp, MatchType};
use crate::data::{Fingerprint, Sample, Vector};

/// How rows of one series are combined
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReducePolicy {
    pub match_type: MatchType,
    pub compare_op: CompareOp,
    /// Target as configured, before unit conversion. Used by the equality
    /// policies.
    pub target: f64,
    /// Drop the first row seen for every series
    pub skip_first: bool,
}

/// Fold `samples` into one sample per fingerprint, preserving the order
/// in which series first appeared.
pub fn reduce(samples: Vector, policy: &ReducePolicy) -> Vector {
    let mut index: HashMap<Fingerprint, usize> = HashMap::new();
    let mut skipped: HashSet<Fingerprint> = HashSet::new();
    let mut out: Vector = Vec::new();

    for mut sample in samples {
        let fp = sample.metric.fingerprint();

        if let Some(&i) = index.get(&fp) {
            let existing = &out[i];
            fold(existing, &mut sample, policy);
            out[i] = sample;
            continue;
        }

        if policy.skip_first && skipped.insert(fp) {
            continue;
        }

        index.insert(fp, out.len());
        out.push(sample);
    }

    for sample in &mut out {
        resolve_equality(sample, policy);
    }
    out
}

fn fold(existing: &Sample, sample: &mut Sample, policy: &ReducePolicy) {
    let (prev, cur) = (existing.point.v, sample.point.v);

    match (policy.match_type, policy.compare_op) {
        (MatchType::AllTheTimes, CompareOp::Above) => sample.point.v = prev.min(cur),
        (MatchType::AllTheTimes, CompareOp::Below) => sample.point.v = prev.max(cur),
        (MatchType::AtLeastOnce, CompareOp::Above) => sample.point.v = prev.max(cur),
        (MatchType::AtLeastOnce, CompareOp::Below) => sample.point.v = prev.min(cur),
        (MatchType::AllTheTimes | MatchType::AtLeastOnce, CompareOp::Eq | CompareOp::NotEq) => {
            let mut vs = existing.point.vs.clone();
            vs.push(cur);
            sample.point.vs = vs;
        }
        (MatchType::OnAverage, _) => sample.point.v = (prev + cur) / 2.0,
        (MatchType::InTotal, _) => sample.point.v = prev + cur,
    }
}

/// For the equality policies the retained value is the last raw value
/// that decides the outcome; intermediate values are not aggregated.
fn resolve_equality(sample: &mut Sample, policy: &ReducePolicy) {
    let target = policy.target;
    let pick: fn(f64, f64) -> bool = match (policy.match_type, policy.compare_op) {
        // any deviation breaks "always equal"
        (MatchType::AllTheTimes, CompareOp::Eq) => |v, t| v != t,
        // any match breaks "always different"
        (MatchType::AllTheTimes, CompareOp::NotEq) => |v, t| v == t,
        (MatchType::AtLeastOnce, CompareOp::Eq) => |v, t| v == t,
        (MatchType::AtLeastOnce, CompareOp::NotEq) => |v, t| v != t,
        _ => return,
    };
    for &v in &sample.point.vs {
        if pick(v, target) {
            sample.point.v = v;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{Labels, Point};

    fn series(host: &str, values: &[f64]) -> Vector {
        values
            .iter()
            .map(|&v| Sample {
                metric: Labels::from_pairs([("host", host)]),
                point: Point {
                    t: 0,
                    v,
                    vs: vec![v],
                },
            })
            .collect()
    }

    fn policy(match_type: MatchType, compare_op: CompareOp) -> ReducePolicy {
        ReducePolicy {
            match_type,
            compare_op,
            target: 10.0,
            skip_first: false,
        }
    }

    fn reduced(values: &[f64], p: ReducePolicy) -> f64 {
        let out = reduce(series("a", values), &p);
        assert_eq!(out.len(), 1);
        out[0].point.v
    }

    #[test]
    fn test_above_below_policies() {
        let rows = [5.0, 10.0, 15.0];
        assert_eq!(reduced(&rows, policy(MatchType::AllTheTimes, CompareOp::Above)), 5.0);
        assert_eq!(reduced(&rows, policy(MatchType::AllTheTimes, CompareOp::Below)), 15.0);
        assert_eq!(reduced(&rows, policy(MatchType::AtLeastOnce, CompareOp::Above)), 15.0);
        assert_eq!(reduced(&rows, policy(MatchType::AtLeastOnce, CompareOp::Below)), 5.0);
    }

    #[test]
    fn test_average_is_pairwise_in_arrival_order() {
        let rows = [5.0, 10.0, 15.0];
        assert_eq!(reduced(&rows, policy(MatchType::OnAverage, CompareOp::Above)), 11.25);
        let rows = [15.0, 10.0, 5.0];
        assert_eq!(reduced(&rows, policy(MatchType::OnAverage, CompareOp::Above)), 8.75);
    }

    #[test]
    fn test_total() {
        let rows = [5.0, 10.0, 15.0];
        assert_eq!(reduced(&rows, policy(MatchType::InTotal, CompareOp::Below)), 30.0);
    }

    #[test]
    fn test_equality_policies() {
        // target is 10
        let rows = [10.0, 7.0, 10.0];
        assert_eq!(reduced(&rows, policy(MatchType::AllTheTimes, CompareOp::Eq)), 7.0);
        assert_eq!(reduced(&rows, policy(MatchType::AtLeastOnce, CompareOp::Eq)), 10.0);

        let rows = [3.0, 10.0, 4.0];
        assert_eq!(reduced(&rows, policy(MatchType::AllTheTimes, CompareOp::NotEq)), 10.0);
        assert_eq!(reduced(&rows, policy(MatchType::AtLeastOnce, CompareOp::NotEq)), 4.0);

        // no sample decides the outcome: the latest value is kept
        let rows = [10.0, 10.0];
        assert_eq!(reduced(&rows, policy(MatchType::AtLeastOnce, CompareOp::NotEq)), 10.0);
    }

    #[test]
    fn test_skip_first_row_per_series() {
        let mut rows = series("a", &[1000.0, 5.0, 10.0]);
        rows.extend(series("b", &[2000.0, 1.0, 2.0]));

        let p = ReducePolicy {
            skip_first: true,
            ..policy(MatchType::InTotal, CompareOp::Above)
        };
        let out = reduce(rows, &p);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].metric.get("host"), Some("a"));
        assert_eq!(out[0].point.v, 15.0);
        assert_eq!(out[1].point.v, 3.0);
    }

    #[test]
    fn test_series_are_kept_apart() {
        let mut rows = series("a", &[1.0, 2.0]);
        rows.extend(series("b", &[7.0]));
        let out = reduce(rows, &policy(MatchType::InTotal, CompareOp::Above));
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].point.v, 3.0);
        assert_eq!(out[1].point.v, 7.0);
    }
}
