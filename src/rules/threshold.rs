//! Threshold rule: compare the reduced result of one query against a target

use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::Mutex;

use super::alert::{Alert, AlertState, RuleHealth};
use super::condition::{CompareOp, QueryType, RuleCondition};
use super::postable::PostableRule;
use super::query::{render_clickhouse_queries, select_query, Queriers, QueryRangeParams};
use super::reduce::{reduce, ReducePolicy};
use super::rule::{FeatureLookup, NotifyFunc, Rule, RuleError, RuleType, FEATURE_PREFER_RPM};
use super::template::{expand, TemplateData};
use crate::data::labels::{
    ALERT_NAME_LABEL, ALERT_RULE_ID_LABEL, METRIC_NAME_LABEL, RULE_SOURCE_LABEL,
};
use crate::data::{Fingerprint, Label, Labels, LabelsBuilder, Vector};
use crate::units;

/// How long a resolved alert is kept so the resolution can be reported
pub const RESOLVED_RETENTION: Duration = Duration::from_secs(15 * 60);

const DEFAULT_EVAL_WINDOW: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone, Copy, Default)]
pub struct ThresholdRuleOpts {
    /// Pass every reduced series through regardless of the condition.
    /// Used when test-running a rule.
    pub send_unmatched: bool,
    /// Ignore the resend delay when sending
    pub send_always: bool,
}

#[derive(Debug, Default)]
struct RuleState {
    health: RuleHealth,
    last_error: Option<String>,
    evaluation_duration: Duration,
    evaluation_timestamp: Option<DateTime<Utc>>,
    active: HashMap<Fingerprint, Alert>,
}

pub struct ThresholdRule {
    id: String,
    name: String,
    source: String,
    condition: RuleCondition,
    eval_window: Duration,
    hold_duration: Duration,
    labels: Labels,
    annotations: Labels,
    preferred_channels: Vec<String>,
    prefer_rpm: bool,
    opts: ThresholdRuleOpts,
    state: Mutex<RuleState>,
}

pub(crate) fn to_delta(d: Duration) -> TimeDelta {
    TimeDelta::from_std(d).unwrap_or(TimeDelta::MAX)
}

/// Link back to the rule's edit page, derived from the page it was created on
pub fn prepare_rule_generator_url(rule_id: &str, source: &str) -> String {
    if source.is_empty() {
        return String::new();
    }
    match source.rfind("new") {
        Some(i) => format!("{}edit?ruleId={}", &source[..i], rule_id),
        None => source.to_string(),
    }
}

impl ThresholdRule {
    pub fn new(
        id: impl Into<String>,
        p: &PostableRule,
        opts: ThresholdRuleOpts,
        features: Option<&dyn FeatureLookup>,
    ) -> Result<Self, RuleError> {
        let condition = p.rule_condition.clone().ok_or(RuleError::NoCondition)?;
        condition.validate()?;

        let query_type = condition.query_type();
        if !matches!(query_type, QueryType::Builder | QueryType::ClickHouseSql) {
            return Err(RuleError::UnsupportedQueryType(query_type));
        }

        let eval_window = if p.eval_window.is_zero() {
            DEFAULT_EVAL_WINDOW
        } else {
            p.eval_window
        };

        let rule = Self {
            id: id.into(),
            name: p.alert.clone(),
            source: p.source.clone(),
            condition,
            eval_window,
            hold_duration: p.hold_duration,
            labels: Labels::from_pairs(p.labels.clone()),
            annotations: Labels::from_pairs(p.annotations.clone()),
            preferred_channels: p.preferred_channels.clone(),
            prefer_rpm: features.is_some_and(|f| f.is_enabled(FEATURE_PREFER_RPM)),
            opts,
            state: Mutex::new(RuleState::default()),
        };

        tracing::info!(
            rule_id = %rule.id,
            name = %rule.name,
            condition = %rule.condition,
            generator_url = %rule.generator_url(),
            "Creating threshold rule"
        );

        Ok(rule)
    }

    /// Link to the rule's edit page, empty without a source
    pub fn generator_url(&self) -> String {
        prepare_rule_generator_url(&self.id, &self.source)
    }

    /// Unit of the query result
    pub fn unit(&self) -> &str {
        self.condition.result_unit()
    }

    fn target_val(&self) -> f64 {
        self.condition.target.unwrap_or(0.0)
    }

    fn compare_op(&self) -> CompareOp {
        self.condition.compare_op.unwrap_or(CompareOp::Eq)
    }

    /// Target converted from the target unit into the result unit
    fn converted_target(&self) -> Option<f64> {
        self.condition
            .target
            .map(|t| units::convert(t, &self.condition.target_unit, self.unit()))
    }

    /// Whether a reduced value satisfies the condition, compared in
    /// result units.
    pub fn check_condition(&self, v: f64) -> bool {
        if v.is_nan() {
            tracing::debug!(rule = %self.name, "Found NaN in rule condition");
            return false;
        }
        let Some(target) = self.converted_target() else {
            tracing::debug!(rule = %self.name, "Found null target in rule condition");
            return false;
        };

        tracing::trace!(
            rule = %self.name,
            converter = units::converter_name(&self.condition.target_unit),
            value = v,
            threshold = target,
            op = %self.compare_op(),
            "Checking condition"
        );
        self.compare_op().check(v, target)
    }

    fn prepare_queries(
        &self,
        ts: DateTime<Utc>,
        queriers: &Queriers,
    ) -> Result<HashMap<String, String>, RuleError> {
        let params = QueryRangeParams::for_eval(ts, self.eval_window, &self.condition, self.prefer_rpm);

        let queries = match self.condition.query_type() {
            QueryType::Builder => queriers
                .builder
                .as_ref()
                .ok_or(RuleError::MissingQueryBuilder)?
                .prepare_queries(&params)
                .map_err(RuleError::Prepare)?,
            QueryType::ClickHouseSql => {
                render_clickhouse_queries(&params).map_err(RuleError::Prepare)?
            }
            other => return Err(RuleError::UnsupportedQueryType(other)),
        };

        if queries.is_empty() {
            return Err(RuleError::NoQueries);
        }
        Ok(queries)
    }

    /// Name of the sub-query this rule evaluates
    pub fn selected_query(&self, queriers: &Queriers) -> Option<String> {
        match self.prepare_queries(Utc::now(), queriers) {
            Ok(queries) => select_query(&self.condition.selected_query, &queries),
            Err(e) => {
                tracing::error!(rule_id = %self.id, error = %e, "Failed to prepare queries");
                None
            }
        }
    }

    fn build_and_run_query(
        &self,
        ts: DateTime<Utc>,
        queriers: &Queriers,
    ) -> Result<Vector, RuleError> {
        let queries = self.prepare_queries(ts, queriers)?;
        tracing::debug!(rule_id = %self.id, queries = ?queries, "Prepared rule queries");

        let label = select_query(&self.condition.selected_query, &queries)
            .ok_or(RuleError::NoQueries)?;
        let query = queries
            .get(&label)
            .ok_or_else(|| RuleError::InvalidQueryLabel(label.clone()))?;

        let result = queriers.executor.execute(query).map_err(RuleError::Execute)?;

        let policy = ReducePolicy {
            match_type: self.condition.match_type,
            compare_op: self.compare_op(),
            // equality policies compare raw samples with the unconverted target
            target: self.target_val(),
            skip_first: self.condition.query_type() == QueryType::Builder
                && self.condition.should_skip_first_record(),
        };
        let reduced = reduce(result.samples(), &policy);
        tracing::debug!(rule_id = %self.id, series = reduced.len(), "Reduced query result");

        let matched: Vector = reduced
            .into_iter()
            .filter(|s| self.opts.send_unmatched || self.check_condition(s.point.v))
            .collect();

        if !matched.is_empty() {
            tracing::info!(
                rule_id = %self.id,
                query = %query,
                alerts = matched.len(),
                "Rule query matched"
            );
        }
        Ok(matched)
    }

    /// Turn matched samples into alerts keyed by fingerprint.
    fn build_alerts(
        &self,
        ts: DateTime<Utc>,
        samples: Vector,
    ) -> Result<HashMap<Fingerprint, Alert>, RuleError> {
        let generator_url = self.generator_url();
        let threshold = units::format(self.target_val(), &self.condition.target_unit);
        let mut alerts = HashMap::with_capacity(samples.len());

        for sample in samples {
            let data = TemplateData::new(
                sample.metric.to_map(),
                units::format(sample.point.v, self.unit()),
                threshold.clone(),
            );
            let expand_field = |text: &str| match expand(text, &data) {
                Ok(s) => s,
                Err(e) => {
                    tracing::error!(rule_id = %self.id, error = %e, "Expanding alert template failed");
                    format!("<error expanding template: {}>", e)
                }
            };

            let mut lb = LabelsBuilder::new(&sample.metric);
            lb.del(METRIC_NAME_LABEL);
            for l in self.labels.iter() {
                lb.set(l.name.clone(), expand_field(&l.value));
            }
            lb.set(ALERT_NAME_LABEL, self.name.clone())
                .set(ALERT_RULE_ID_LABEL, self.id.clone())
                .set(RULE_SOURCE_LABEL, generator_url.clone());

            let annotations = Labels::new(
                self.annotations
                    .iter()
                    .map(|a| Label::new(a.name.clone(), expand_field(&a.value)))
                    .collect(),
            );

            let labels = lb.labels();
            let fp = labels.fingerprint();
            if alerts.contains_key(&fp) {
                tracing::error!(rule_id = %self.id, labels = %labels, "Alert query returned duplicate records");
                return Err(RuleError::DuplicateAlert);
            }

            alerts.insert(
                fp,
                Alert {
                    state: AlertState::Pending,
                    labels,
                    annotations,
                    generator_url: generator_url.clone(),
                    receivers: self.preferred_channels.clone(),
                    value: sample.point.v,
                    active_at: ts,
                    fired_at: None,
                    resolved_at: None,
                    last_sent_at: None,
                    valid_until: None,
                },
            );
        }
        Ok(alerts)
    }

    /// Merge the fingerprints of another rule's alerts into this one
    pub(crate) fn merge_active_from(&self, from: &ThresholdRule) {
        if std::ptr::eq(self, from) {
            return;
        }
        let source = from.state.lock().active.clone();
        let mut state = self.state.lock();
        for (fp, alert) in source {
            state.active.insert(fp, alert);
        }
    }

    #[cfg(test)]
    pub(crate) fn active_snapshot(&self) -> HashMap<Fingerprint, Alert> {
        self.state.lock().active.clone()
    }
}

impl Rule for ThresholdRule {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn rule_type(&self) -> RuleType {
        RuleType::Threshold
    }

    fn condition(&self) -> &RuleCondition {
        &self.condition
    }

    fn labels(&self) -> &Labels {
        &self.labels
    }

    fn annotations(&self) -> &Labels {
        &self.annotations
    }

    fn preferred_channels(&self) -> &[String] {
        &self.preferred_channels
    }

    fn hold_duration(&self) -> Duration {
        self.hold_duration
    }

    fn eval_window(&self) -> Duration {
        self.eval_window
    }

    fn health(&self) -> RuleHealth {
        self.state.lock().health
    }

    fn set_health(&self, health: RuleHealth) {
        self.state.lock().health = health;
    }

    fn last_error(&self) -> Option<String> {
        self.state.lock().last_error.clone()
    }

    fn set_last_error(&self, err: Option<String>) {
        self.state.lock().last_error = err;
    }

    fn evaluation_duration(&self) -> Duration {
        self.state.lock().evaluation_duration
    }

    fn set_evaluation_duration(&self, dur: Duration) {
        self.state.lock().evaluation_duration = dur;
    }

    fn evaluation_timestamp(&self) -> Option<DateTime<Utc>> {
        self.state.lock().evaluation_timestamp
    }

    fn set_evaluation_timestamp(&self, ts: DateTime<Utc>) {
        self.state.lock().evaluation_timestamp = Some(ts);
    }

    fn state(&self) -> AlertState {
        self.state
            .lock()
            .active
            .values()
            .map(|a| a.state)
            .max()
            .unwrap_or_default()
    }

    fn active_alerts(&self) -> Vec<Alert> {
        self.state
            .lock()
            .active
            .values()
            .filter(|a| !a.is_resolved())
            .cloned()
            .collect()
    }

    fn for_each_active_alert(&self, f: &mut dyn FnMut(&mut Alert)) {
        let mut state = self.state.lock();
        for alert in state.active.values_mut() {
            f(alert);
        }
    }

    fn eval(&self, ts: DateTime<Utc>, queriers: &Queriers) -> Result<usize, RuleError> {
        let built = self
            .build_and_run_query(ts, queriers)
            .and_then(|samples| self.build_alerts(ts, samples));

        let alerts = match built {
            Ok(alerts) => alerts,
            Err(e) => {
                let mut state = self.state.lock();
                state.health = RuleHealth::Bad;
                state.last_error = Some(e.to_string());
                tracing::debug!(rule_id = %self.id, error = %e, "Rule evaluation failed");
                return Err(e);
            }
        };

        tracing::info!(rule = %self.name, alerts = alerts.len(), "Alerts found");

        let hold = to_delta(self.hold_duration);
        let retention = to_delta(RESOLVED_RETENTION);
        let result_fps: HashSet<Fingerprint> = alerts.keys().copied().collect();

        let mut state = self.state.lock();

        for (fp, alert) in alerts {
            if let Some(existing) = state.active.get_mut(&fp) {
                if existing.state != AlertState::Inactive {
                    existing.value = alert.value;
                    existing.annotations = alert.annotations;
                    existing.receivers = self.preferred_channels.clone();
                    continue;
                }
            }
            state.active.insert(fp, alert);
        }

        state.active.retain(|fp, a| {
            if !result_fps.contains(fp) {
                // a pending alert never fired, nothing to resolve
                if a.state == AlertState::Pending {
                    return false;
                }
                if a.resolved_at.is_some_and(|r| ts - r > retention) {
                    return false;
                }
                if a.state != AlertState::Inactive {
                    a.state = AlertState::Inactive;
                    a.resolved_at = Some(ts);
                }
                return true;
            }

            if a.state == AlertState::Pending && ts - a.active_at >= hold {
                a.state = AlertState::Firing;
                a.fired_at = Some(ts);
            }
            true
        });

        state.health = RuleHealth::Good;
        state.last_error = None;

        Ok(state.active.len())
    }

    fn send_alerts(
        &self,
        ts: DateTime<Utc>,
        resend_delay: Duration,
        interval: Duration,
        notify: &NotifyFunc,
    ) {
        let delay = to_delta(resend_delay);
        // allow for two missed evaluations or notification failures
        let validity = to_delta(resend_delay.max(interval)) * 4;

        let mut due = Vec::new();
        self.for_each_active_alert(&mut |alert: &mut Alert| {
            if self.opts.send_always || alert.needs_sending(ts, delay) {
                alert.last_sent_at = Some(ts);
                alert.valid_until = Some(ts + validity);
                due.push(alert.clone());
            } else {
                tracing::debug!(rule = %self.name, labels = %alert.labels, "Skipping send due to resend delay");
            }
        });

        if due.is_empty() {
            return;
        }
        tracing::info!(rule = %self.name, alerts = due.len(), "Sending alerts");
        notify("", due);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl std::fmt::Debug for ThresholdRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThresholdRule")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("condition", &self.condition)
            .field("eval_window", &self.eval_window)
            .field("hold_duration", &self.hold_duration)
            .finish_non_exhaustive()
    }
}
