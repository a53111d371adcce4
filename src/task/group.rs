//! Rule groups and their evaluation loop

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::time::{self, MissedTickBehavior};

use super::config::DEFAULT_FREQUENCY;
use crate::data::{Fingerprint, Labels};
use crate::rules::threshold::{to_delta, ThresholdRule};
use crate::rules::{name_and_labels, NotifyFunc, Queriers, Rule, RuleHealth, RuleType};

/// What every task of a manager shares
#[derive(Clone)]
pub struct TaskContext {
    pub queriers: Queriers,
    pub notify: NotifyFunc,
    pub resend_delay: Duration,
}

#[derive(Debug, Default)]
struct TaskState {
    /// Label sets each rule reported on its last successful evaluation,
    /// indexed like the rules
    series_in_previous_eval: Vec<HashMap<Fingerprint, Labels>>,
    stale_series: Vec<Labels>,
    paused: bool,
    mark_stale: bool,
    started: bool,
    evaluation_time: Duration,
    last_evaluation: Option<DateTime<Utc>>,
}

/// A group of rules evaluated together at a fixed frequency
pub struct Task {
    name: String,
    file: String,
    frequency: Duration,
    rules: Vec<Arc<dyn Rule>>,
    ctx: TaskContext,
    state: Mutex<TaskState>,
    done: watch::Sender<bool>,
    terminated: watch::Sender<bool>,
}

/// Timestamp of the evaluation following `prev` when the tick fires at
/// `now`, together with the number of periods advanced. Whole periods that
/// already passed are skipped; at least one period is always advanced.
fn next_eval_ts(prev: DateTime<Utc>, now: DateTime<Utc>, freq: Duration) -> (DateTime<Utc>, u128) {
    let elapsed = (now - prev).to_std().unwrap_or_default();
    let periods = (elapsed.as_nanos() / freq.as_nanos()).max(1);
    let next = prev + to_delta(freq) * periods.min(i32::MAX as u128) as i32;
    (next, periods)
}

/// Key a group is registered under
pub fn group_key(name: &str, file: &str) -> String {
    format!("{};{}", name, file)
}

impl Task {
    /// Group of `rules` evaluated every `frequency`, or every minute when
    /// the frequency is zero
    pub fn new(
        name: impl Into<String>,
        file: impl Into<String>,
        frequency: Duration,
        rules: Vec<Arc<dyn Rule>>,
        ctx: TaskContext,
    ) -> Self {
        let frequency = if frequency.is_zero() {
            DEFAULT_FREQUENCY
        } else {
            frequency
        };
        let state = TaskState {
            series_in_previous_eval: vec![HashMap::new(); rules.len()],
            ..Default::default()
        };

        Self {
            name: name.into(),
            file: file.into(),
            frequency,
            rules,
            ctx,
            state: Mutex::new(state),
            done: watch::Sender::new(false),
            terminated: watch::Sender::new(false),
        }
    }

    /// Group name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// File the group was loaded from, empty for single-rule groups
    pub fn file(&self) -> &str {
        &self.file
    }

    /// Registry key, `name;file`
    pub fn key(&self) -> String {
        group_key(&self.name, &self.file)
    }

    /// Evaluation frequency
    pub fn interval(&self) -> Duration {
        self.frequency
    }

    /// Rules in evaluation order
    pub fn rules(&self) -> &[Arc<dyn Rule>] {
        &self.rules
    }

    /// Alerting rules, most severe state first and then by name
    pub fn threshold_rules(&self) -> Vec<Arc<dyn Rule>> {
        let mut rules: Vec<_> = self
            .rules
            .iter()
            .filter(|r| r.rule_type() == RuleType::Threshold)
            .map(|r| (r.state(), r.clone()))
            .collect();
        rules.sort_by(|(sa, a), (sb, b)| sb.cmp(sa).then_with(|| a.name().cmp(b.name())));
        rules.into_iter().map(|(_, r)| r).collect()
    }

    /// Whether any rule of the group is a threshold rule
    pub fn has_alerting_rules(&self) -> bool {
        self.rules.iter().any(|r| r.rule_type() == RuleType::Threshold)
    }

    /// Wall time the last full evaluation took
    pub fn evaluation_time(&self) -> Duration {
        self.state.lock().evaluation_time
    }

    /// Start of the last full evaluation
    pub fn last_evaluation(&self) -> Option<DateTime<Utc>> {
        self.state.lock().last_evaluation
    }

    /// Series that disappeared, as of the last evaluation or loop exit
    pub fn stale_series(&self) -> Vec<Labels> {
        self.state.lock().stale_series.clone()
    }

    /// Report the group's series as stale once the loop exits
    pub fn set_mark_stale(&self, mark_stale: bool) {
        self.state.lock().mark_stale = mark_stale;
    }

    /// Keep evaluating but stop sending alerts while paused
    pub fn pause(&self, paused: bool) {
        self.state.lock().paused = paused;
    }

    /// Whether sending is currently paused
    pub fn is_paused(&self) -> bool {
        self.state.lock().paused
    }

    /// Scheduled timestamp of the period containing `now`.
    ///
    /// Each group gets a stable offset within the period, derived from its
    /// name, so groups sharing a frequency do not all evaluate at once.
    pub fn eval_timestamp(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let freq = self.frequency.as_nanos() as i128;
        let fp = Labels::from_pairs([("name", self.name.as_str())]).fingerprint();
        let offset = (fp as i128).rem_euclid(freq);

        let now_ns = now.timestamp() as i128 * 1_000_000_000 + now.timestamp_subsec_nanos() as i128;
        let adjusted = now_ns - offset;
        let base = adjusted - adjusted.rem_euclid(freq);
        let ts = base + offset;

        let secs = ts.div_euclid(1_000_000_000) as i64;
        let nanos = ts.rem_euclid(1_000_000_000) as u32;
        DateTime::from_timestamp(secs, nanos).unwrap_or(now)
    }

    /// Adopt the evaluation state of the task this one replaces.
    ///
    /// Rules are matched by name and labels; when several rules share an
    /// identity they are paired in order. Series of source rules without a
    /// counterpart become stale.
    pub fn copy_state(&self, from: &Task) {
        if std::ptr::eq(self, from) {
            return;
        }

        let (src_series, src_stale, evaluation_time, last_evaluation) = {
            let src = from.state.lock();
            (
                src.series_in_previous_eval.clone(),
                src.stale_series.clone(),
                src.evaluation_time,
                src.last_evaluation,
            )
        };

        let mut by_identity: HashMap<String, Vec<usize>> = HashMap::new();
        for (j, rule) in from.rules.iter().enumerate() {
            by_identity
                .entry(name_and_labels(rule.as_ref()))
                .or_default()
                .push(j);
        }
        for indices in by_identity.values_mut() {
            indices.reverse();
        }

        let mut matched = HashSet::new();
        let mut series = vec![HashMap::new(); self.rules.len()];

        for (i, rule) in self.rules.iter().enumerate() {
            let Some(j) = by_identity
                .get_mut(&name_and_labels(rule.as_ref()))
                .and_then(|indices| indices.pop())
            else {
                continue;
            };
            matched.insert(j);
            series[i] = src_series.get(j).cloned().unwrap_or_default();

            let old = from.rules[j].as_any().downcast_ref::<ThresholdRule>();
            let new = rule.as_any().downcast_ref::<ThresholdRule>();
            if let (Some(new), Some(old)) = (new, old) {
                new.merge_active_from(old);
            }
        }

        let mut stale = src_stale;
        for (j, prev) in src_series.into_iter().enumerate() {
            if !matched.contains(&j) {
                stale.extend(prev.into_values());
            }
        }

        let mut state = self.state.lock();
        state.evaluation_time = evaluation_time;
        state.last_evaluation = last_evaluation;
        state.series_in_previous_eval = series;
        state.stale_series = stale;
    }

    /// Evaluate every rule once at `ts`, in order.
    ///
    /// A failing rule is marked unhealthy and the next rule still runs.
    /// Stops between rules once the task is told to stop.
    pub fn eval(&self, ts: DateTime<Utc>) {
        for (i, rule) in self.rules.iter().enumerate() {
            if *self.done.borrow() {
                return;
            }

            let start = Instant::now();
            rule.set_evaluation_timestamp(ts);
            let result = rule.eval(ts, &self.ctx.queriers);
            rule.set_evaluation_duration(start.elapsed());

            if let Err(e) = result {
                rule.set_health(RuleHealth::Bad);
                rule.set_last_error(Some(e.to_string()));
                tracing::warn!(
                    group = %self.name,
                    rule = %rule.name(),
                    error = %e,
                    "Evaluating rule failed"
                );
                continue;
            }

            let series = rule
                .active_alerts()
                .into_iter()
                .map(|a| (a.fingerprint(), a.labels))
                .collect();
            let paused = {
                let mut state = self.state.lock();
                if let Some(slot) = state.series_in_previous_eval.get_mut(i) {
                    *slot = series;
                }
                state.paused
            };

            if !paused {
                rule.send_alerts(ts, self.ctx.resend_delay, self.frequency, &self.ctx.notify);
            }
        }
    }

    /// Start the evaluation loop on the runtime
    pub fn spawn(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        self.state.lock().started = true;
        tokio::spawn(Arc::clone(self).run())
    }

    /// Evaluation loop: aligns to the group's phase, then evaluates once
    /// per period until stopped. Late ticks skip the missed periods.
    pub async fn run(self: Arc<Self>) {
        self.state.lock().started = true;
        let mut done = self.done.subscribe();

        tracing::info!(group = %self.name, interval = ?self.frequency, "Rule group started");

        let mut eval_ts = self.eval_timestamp(Utc::now()) + to_delta(self.frequency);
        let wait = (eval_ts - Utc::now()).to_std().unwrap_or_default();

        tokio::select! {
            _ = signalled(&mut done) => {
                self.finish();
                return;
            }
            _ = time::sleep(wait) => {}
        }

        self.run_eval(eval_ts).await;

        let mut ticker = time::interval_at(time::Instant::now() + self.frequency, self.frequency);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = signalled(&mut done) => break,
                _ = ticker.tick() => {
                    let (next, periods) = next_eval_ts(eval_ts, Utc::now(), self.frequency);
                    if periods > 1 {
                        tracing::warn!(
                            group = %self.name,
                            missed = periods - 1,
                            "Rule group missed evaluations"
                        );
                    }
                    eval_ts = next;
                    self.run_eval(eval_ts).await;
                }
            }
        }

        self.finish();
    }

    async fn run_eval(self: &Arc<Self>, ts: DateTime<Utc>) {
        let started_at = Utc::now();
        let start = Instant::now();

        let task = Arc::clone(self);
        if let Err(e) = tokio::task::spawn_blocking(move || task.eval(ts)).await {
            tracing::error!(group = %self.name, error = %e, "Rule group evaluation panicked");
        }

        let mut state = self.state.lock();
        state.evaluation_time = start.elapsed();
        state.last_evaluation = Some(started_at);
    }

    fn finish(&self) {
        {
            let mut state = self.state.lock();
            if state.mark_stale {
                let prev = std::mem::take(&mut state.series_in_previous_eval);
                state.series_in_previous_eval = vec![HashMap::new(); prev.len()];
                let series: Vec<Labels> = prev.into_iter().flat_map(|s| s.into_values()).collect();
                state.stale_series.extend(series);
            }
        }
        tracing::info!(group = %self.name, "Rule group stopped");
        self.terminated.send_replace(true);
    }

    /// Signal the loop to stop and wait until it has exited.
    pub async fn stop(&self) {
        self.done.send_replace(true);
        if !self.state.lock().started {
            return;
        }
        signalled(&mut self.terminated.subscribe()).await;
    }
}

/// Resolves once the flag behind `rx` is set
async fn signalled(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            return;
        }
    }
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("name", &self.name)
            .field("file", &self.file)
            .field("frequency", &self.frequency)
            .field("rules", &self.rules.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::testutil::{capture, ch_rule_with_query, t0, StaticRows};
    use crate::rules::{AlertState, CompareOp, MatchType, ThresholdRuleOpts};
    use chrono::TimeDelta;
    use tokio_test::{assert_pending, assert_ready};

    fn rule(name: &str) -> Arc<dyn Rule> {
        let def = ch_rule_with_query(
            name,
            "SELECT host, v AS value FROM t",
            CompareOp::Above,
            MatchType::AtLeastOnce,
            1.0,
        );
        Arc::new(ThresholdRule::new(name, &def, ThresholdRuleOpts::default(), None).unwrap())
    }

    struct Fixture {
        rows: Arc<StaticRows>,
        sent: Arc<Mutex<Vec<Vec<crate::rules::Alert>>>>,
        ctx: TaskContext,
    }

    fn fixture() -> Fixture {
        let rows = Arc::new(StaticRows::default());
        rows.set(&[("a", 5.0)]);
        let (notify, sent) = capture();
        let ctx = TaskContext {
            queriers: Queriers::new(rows.clone()),
            notify,
            resend_delay: Duration::from_secs(3600),
        };
        Fixture { rows, sent, ctx }
    }

    fn task(name: &str, frequency: Duration, rules: Vec<Arc<dyn Rule>>, ctx: &TaskContext) -> Arc<Task> {
        Arc::new(Task::new(name, "rules.yml", frequency, rules, ctx.clone()))
    }

    #[test]
    fn test_defaults_and_key() {
        let f = fixture();
        let t = task("g", Duration::ZERO, vec![rule("r")], &f.ctx);
        assert_eq!(t.interval(), Duration::from_secs(60));
        assert_eq!(t.key(), "g;rules.yml");
        assert!(t.has_alerting_rules());
        assert!(!task("empty", Duration::ZERO, vec![], &f.ctx).has_alerting_rules());
    }

    #[test]
    fn test_eval_timestamp_is_phase_aligned() {
        let f = fixture();
        let freq = Duration::from_secs(60);
        let a = task("group-a", freq, vec![], &f.ctx);
        let b = task("group-b", freq, vec![], &f.ctx);

        let now = t0() + TimeDelta::milliseconds(90_500);
        let ts = a.eval_timestamp(now);
        assert!(ts <= now);
        assert!(now - ts < TimeDelta::seconds(60));
        assert_eq!(a.eval_timestamp(now), ts);
        // any instant in the same period maps to the same timestamp
        assert_eq!(a.eval_timestamp(ts + TimeDelta::seconds(59)), ts);
        assert_eq!(a.eval_timestamp(ts + TimeDelta::seconds(60)), ts + TimeDelta::seconds(60));

        assert_ne!(b.eval_timestamp(now), ts);
    }

    #[test]
    fn test_eval_continues_after_failing_rule() {
        let f = fixture();
        let broken = ch_rule_with_query(
            "broken",
            "SELECT {{.nope}}",
            CompareOp::Above,
            MatchType::AtLeastOnce,
            1.0,
        );
        let broken: Arc<dyn Rule> =
            Arc::new(ThresholdRule::new("1", &broken, Default::default(), None).unwrap());
        let t = task("g", Duration::from_secs(60), vec![broken, rule("ok")], &f.ctx);

        t.eval(t0());

        let rules = t.rules();
        assert_eq!(rules[0].health(), RuleHealth::Bad);
        assert!(rules[0].last_error().is_some());
        assert_eq!(rules[0].evaluation_timestamp(), Some(t0()));
        assert_eq!(rules[1].health(), RuleHealth::Good);
        assert_eq!(rules[1].state(), AlertState::Firing);
        assert_eq!(f.sent.lock().len(), 1);
    }

    #[test]
    fn test_paused_group_evaluates_without_sending() {
        let f = fixture();
        let t = task("g", Duration::from_secs(60), vec![rule("r")], &f.ctx);

        t.pause(true);
        assert!(t.is_paused());
        t.eval(t0());
        assert_eq!(t.rules()[0].active_alerts().len(), 1);
        assert!(f.sent.lock().is_empty());

        t.pause(false);
        t.eval(t0() + TimeDelta::minutes(1));
        assert_eq!(f.sent.lock().len(), 1);
    }

    #[test]
    fn test_threshold_rules_sorted_by_state_then_name() {
        let f = fixture();
        let t = task("g", Duration::from_secs(60), vec![rule("b"), rule("c"), rule("a")], &f.ctx);
        t.rules()[1].eval(t0(), &f.ctx.queriers).unwrap();

        let names: Vec<String> = t.threshold_rules().iter().map(|r| r.name().to_string()).collect();
        assert_eq!(names, vec!["c", "a", "b"]);
    }

    #[test]
    fn test_copy_state_matches_rules_in_order() {
        let f = fixture();
        let old = task("g", Duration::from_secs(60), vec![rule("dup"), rule("dup"), rule("gone")], &f.ctx);
        old.eval(t0());
        f.rows.set(&[("a", 9.0)]);
        old.rules()[1].eval(t0() + TimeDelta::minutes(1), &f.ctx.queriers).unwrap();

        let new = task("g", Duration::from_secs(60), vec![rule("dup"), rule("dup")], &f.ctx);
        new.copy_state(&old);

        assert_eq!(new.last_evaluation(), old.last_evaluation());
        let first = new.rules()[0].active_alerts();
        let second = new.rules()[1].active_alerts();
        assert_eq!(first, old.rules()[0].active_alerts());
        assert_eq!(second, old.rules()[1].active_alerts());
        assert_eq!(first[0].value, 5.0);
        assert_eq!(second[0].value, 9.0);

        // the unmatched rule's series become stale
        let stale = new.stale_series();
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].get("alertname"), Some("gone"));
    }

    #[test]
    fn test_copy_state_from_self_is_noop() {
        let f = fixture();
        let t = task("g", Duration::from_secs(60), vec![rule("r")], &f.ctx);
        t.eval(t0());
        t.copy_state(&t);
        assert_eq!(t.rules()[0].active_alerts().len(), 1);
    }

    #[tokio::test]
    async fn test_stop_without_run_returns() {
        let f = fixture();
        let t = task("g", Duration::from_secs(60), vec![rule("r")], &f.ctx);
        t.stop().await;
    }

    #[tokio::test]
    async fn test_stop_marks_series_stale() {
        let f = fixture();
        let t = task("g", Duration::from_secs(60), vec![rule("r")], &f.ctx);
        t.eval(t0());

        t.set_mark_stale(true);
        let handle = t.spawn();
        t.stop().await;
        handle.await.unwrap();

        let stale = t.stale_series();
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].get("host"), Some("a"));
    }

    #[tokio::test]
    async fn test_stop_waits_for_loop_exit() {
        let f = fixture();
        let t = task("g", Duration::from_secs(60), vec![rule("r")], &f.ctx);
        t.spawn();

        let mut stop = tokio_test::task::spawn(t.stop());
        // the loop has not observed the signal yet
        assert_pending!(stop.poll());
        stop.await;
        assert_ready!(tokio_test::task::spawn(t.stop()).poll());
    }

    #[tokio::test]
    async fn test_run_evaluates_periodically() {
        let f = fixture();
        f.rows.set(&[("a", 5.0), ("b", 7.0)]);
        let t = task("fast", Duration::from_millis(50), vec![rule("r")], &f.ctx);
        let handle = t.spawn();

        tokio::time::sleep(Duration::from_millis(400)).await;
        t.stop().await;
        handle.await.unwrap();

        assert!(t.last_evaluation().is_some());
        let rule = &t.rules()[0];
        assert_eq!(rule.health(), RuleHealth::Good);
        assert_eq!(rule.active_alerts().len(), 2);
        // firing alerts are sent once within the resend delay
        assert_eq!(f.sent.lock().len(), 1);
    }

    #[test]
    fn test_next_eval_ts_skips_missed_periods() {
        let freq = Duration::from_secs(60);

        // three and a half periods late: three periods advanced, two missed
        let (next, periods) = next_eval_ts(t0(), t0() + TimeDelta::seconds(210), freq);
        assert_eq!(next, t0() + TimeDelta::seconds(180));
        assert_eq!(periods, 3);

        // on time
        let (next, periods) = next_eval_ts(t0(), t0() + TimeDelta::milliseconds(60_005), freq);
        assert_eq!(next, t0() + TimeDelta::seconds(60));
        assert_eq!(periods, 1);

        // a tick firing early still moves one period forward
        let (next, periods) = next_eval_ts(t0(), t0() - TimeDelta::seconds(5), freq);
        assert_eq!(next, t0() + TimeDelta::seconds(60));
        assert_eq!(periods, 1);
    }

    #[test]
    fn test_group_key() {
        assert_eq!(group_key("a", ""), "a;");
    }
}
