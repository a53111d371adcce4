//! Fixtures shared by rule and task tests

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;

use super::alert::Alert;
use super::condition::{ClickHouseQuery, CompareOp, CompositeQuery, MatchType, QueryType, RuleCondition};
use super::postable::PostableRule;
use super::query::{QueryError, QueryExecutor};
use super::rule::NotifyFunc;
use crate::data::{QueryResult, Value};

/// Executor returning whatever rows are currently set
pub(crate) struct StaticRows {
    pub result: Mutex<Result<QueryResult, String>>,
    pub queries: Mutex<Vec<String>>,
}

impl Default for StaticRows {
    fn default() -> Self {
        Self {
            result: Mutex::new(Ok(QueryResult::empty())),
            queries: Mutex::new(Vec::new()),
        }
    }
}

impl StaticRows {
    pub fn set(&self, rows: &[(&str, f64)]) {
        *self.result.lock() = Ok(host_rows(rows));
    }

    pub fn fail(&self, msg: &str) {
        *self.result.lock() = Err(msg.to_string());
    }
}

impl QueryExecutor for StaticRows {
    fn execute(&self, query: &str) -> Result<QueryResult, QueryError> {
        self.queries.lock().push(query.to_string());
        self.result.lock().clone().map_err(QueryError::Execute)
    }
}

pub(crate) fn host_rows(rows: &[(&str, f64)]) -> QueryResult {
    QueryResult::new(
        vec!["host".into(), "value".into()],
        rows.iter()
            .map(|(h, v)| vec![Value::String(h.to_string()), Value::Float64(*v)])
            .collect(),
    )
}

pub(crate) fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
}

/// A ClickHouse rule named "cpu high" over a single query
pub(crate) fn ch_rule_def(op: CompareOp, match_type: MatchType, target: f64) -> PostableRule {
    ch_rule_with_query("cpu high", "SELECT host, avg(v) AS value FROM cpu", op, match_type, target)
}

pub(crate) fn ch_rule_with_query(
    name: &str,
    query: &str,
    op: CompareOp,
    match_type: MatchType,
    target: f64,
) -> PostableRule {
    let mut composite = CompositeQuery {
        query_type: QueryType::ClickHouseSql,
        ..Default::default()
    };
    composite.clickhouse_queries.insert(
        "A".into(),
        ClickHouseQuery {
            query: query.into(),
            disabled: false,
        },
    );
    PostableRule {
        alert: name.into(),
        rule_condition: Some(RuleCondition {
            composite_query: Some(composite),
            compare_op: Some(op),
            target: Some(target),
            match_type,
            ..Default::default()
        }),
        source: "http://localhost:3301/alerts/new".into(),
        preferred_channels: vec!["ops".into()],
        ..Default::default()
    }
}

/// Notify function recording every dispatched batch
pub(crate) fn capture() -> (NotifyFunc, Arc<Mutex<Vec<Vec<Alert>>>>) {
    let sent: Arc<Mutex<Vec<Vec<Alert>>>> = Arc::default();
    let sink = sent.clone();
    let notify: NotifyFunc = Arc::new(move |_key: &str, alerts: Vec<Alert>| {
        sink.lock().push(alerts);
    });
    (notify, sent)
}
