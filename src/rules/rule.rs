//! The capability set every rule kind provides to the scheduler

use std::any::Any;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::alert::{Alert, AlertState, RuleHealth};
use super::condition::{QueryType, RuleCondition};
use super::query::{QueryError, Queriers};
use crate::data::Labels;

/// Feature that asks query builders for per-minute rates
pub const FEATURE_PREFER_RPM: &str = "PreferRPM";

/// Receives alerts that are due for sending: a grouping key (empty for
/// none) and snapshot copies of the alerts. Delivery failures are the
/// notifier's concern.
pub type NotifyFunc = Arc<dyn Fn(&str, Vec<Alert>) + Send + Sync>;

/// Optional feature flag lookup consulted while building rules
pub trait FeatureLookup: Send + Sync {
    fn is_enabled(&self, feature: &str) -> bool;
}

impl FeatureLookup for HashSet<String> {
    fn is_enabled(&self, feature: &str) -> bool {
        self.contains(feature)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleType {
    Threshold,
    Prom,
}

#[derive(Debug, thiserror::Error)]
pub enum RuleError {
    #[error("no rule condition")]
    NoCondition,

    #[error("invalid rule condition: {0}")]
    InvalidCondition(String),

    #[error("invalid rule: {0}")]
    InvalidRule(String),

    #[error("unsupported query type: {0}")]
    UnsupportedQueryType(QueryType),

    #[error("no query builder configured for builder queries")]
    MissingQueryBuilder,

    #[error("failed to prepare queries: {0}")]
    Prepare(#[source] QueryError),

    #[error("no queries could be built with the rule config")]
    NoQueries,

    #[error("invalid query label: {0}")]
    InvalidQueryLabel(String),

    #[error("failed to run query: {0}")]
    Execute(#[source] QueryError),

    #[error("duplicate alert found, vector contains metrics with the same labelset after applying alert labels")]
    DuplicateAlert,
}

/// A rule owned by a task and evaluated on every tick of it.
///
/// All methods take `&self`; implementations guard mutable state with
/// their own lock so status readers can call in while the task evaluates.
pub trait Rule: Send + Sync {
    fn id(&self) -> &str;

    fn name(&self) -> &str;

    fn rule_type(&self) -> RuleType;

    fn condition(&self) -> &RuleCondition;

    /// Static label templates
    fn labels(&self) -> &Labels;

    fn annotations(&self) -> &Labels;

    fn preferred_channels(&self) -> &[String];

    fn hold_duration(&self) -> Duration;

    fn eval_window(&self) -> Duration;

    fn health(&self) -> RuleHealth;

    fn set_health(&self, health: RuleHealth);

    fn last_error(&self) -> Option<String>;

    fn set_last_error(&self, err: Option<String>);

    fn evaluation_duration(&self) -> Duration;

    fn set_evaluation_duration(&self, dur: Duration);

    fn evaluation_timestamp(&self) -> Option<DateTime<Utc>>;

    fn set_evaluation_timestamp(&self, ts: DateTime<Utc>);

    /// Highest state among the rule's alerts
    fn state(&self) -> AlertState;

    /// Copies of the alerts that are not resolved
    fn active_alerts(&self) -> Vec<Alert>;

    /// Run `f` on every alert of the live map while holding the rule lock
    fn for_each_active_alert(&self, f: &mut dyn FnMut(&mut Alert));

    /// Evaluate at `ts`, returning the number of tracked alerts.
    fn eval(&self, ts: DateTime<Utc>, queriers: &Queriers) -> Result<usize, RuleError>;

    fn send_alerts(
        &self,
        ts: DateTime<Utc>,
        resend_delay: Duration,
        interval: Duration,
        notify: &NotifyFunc,
    );

    fn as_any(&self) -> &dyn Any;
}

/// Identity used to match rules across reloads
pub fn name_and_labels(rule: &dyn Rule) -> String {
    format!("{}{}", rule.name(), rule.labels())
}
