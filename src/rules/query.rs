//! Query range preparation and the query collaborators a rule depends on

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use regex::Regex;

use super::condition::{CompositeQuery, QueryType, RuleCondition};
use crate::data::QueryResult;

/// Delay applied to the evaluation timestamp so that recently ingested
/// data has landed before it is queried
pub const INGESTION_DELAY_MS: i64 = 2 * 60 * 1000;

/// Step, in seconds, for rule queries
pub const RULE_QUERY_STEP_SECS: i64 = 60;

const MINUTE_MS: i64 = 60 * 1000;

/// Name preferred when no query is explicitly selected
const LEGACY_DEFAULT_QUERY: &str = "F1";

/// Time range and query definition handed to the query builder
#[derive(Debug, Clone, PartialEq)]
pub struct QueryRangeParams {
    /// Unix epoch milliseconds
    pub start: i64,
    /// Unix epoch milliseconds
    pub end: i64,
    /// Seconds
    pub step: i64,
    pub composite_query: CompositeQuery,
    pub variables: HashMap<String, String>,
    /// Ask for per-minute instead of per-second rates
    pub prefer_rpm: bool,
}

impl QueryRangeParams {
    /// Build the range for an evaluation at `ts`.
    ///
    /// Both bounds sit [`INGESTION_DELAY_MS`] in the past and are truncated
    /// to the whole minute.
    pub fn for_eval(
        ts: DateTime<Utc>,
        eval_window: Duration,
        condition: &RuleCondition,
        prefer_rpm: bool,
    ) -> Self {
        let window_ms = eval_window.as_millis() as i64;
        let mut end = ts.timestamp_millis() - INGESTION_DELAY_MS;
        let mut start = end - window_ms;
        start -= start.rem_euclid(MINUTE_MS);
        end -= end.rem_euclid(MINUTE_MS);

        let mut composite_query = condition.composite_query.clone().unwrap_or_default();
        if composite_query.query_type == QueryType::Builder {
            for q in composite_query.builder_queries.values_mut() {
                q.step_interval = RULE_QUERY_STEP_SECS;
            }
        }

        let mut params = Self {
            start,
            end,
            step: RULE_QUERY_STEP_SECS,
            composite_query,
            variables: HashMap::new(),
            prefer_rpm,
        };
        params.assign_reserved_vars();
        params
    }

    fn assign_reserved_vars(&mut self) {
        let (start, end) = (self.start, self.end);
        let vars = [
            ("start_timestamp", (start / 1000).to_string()),
            ("end_timestamp", (end / 1000).to_string()),
            ("start_timestamp_ms", start.to_string()),
            ("end_timestamp_ms", end.to_string()),
            ("start_timestamp_nano", (start * 1_000_000).to_string()),
            ("end_timestamp_nano", (end * 1_000_000).to_string()),
            ("start_datetime", format!("toDateTime({})", start / 1000)),
            ("end_datetime", format!("toDateTime({})", end / 1000)),
        ];
        for (k, v) in vars {
            self.variables.insert(k.to_string(), v);
        }
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum QueryError {
    #[error("Query build error: {0}")]
    Build(String),

    #[error("Query execution error: {0}")]
    Execute(String),
}

/// Turns builder query definitions into backend query text, keyed by query name
pub trait QueryBuilder: Send + Sync {
    fn prepare_queries(&self, params: &QueryRangeParams) -> Result<HashMap<String, String>, QueryError>;
}

impl<F> QueryBuilder for F
where
    F: Fn(&QueryRangeParams) -> Result<HashMap<String, String>, QueryError> + Send + Sync,
{
    fn prepare_queries(&self, params: &QueryRangeParams) -> Result<HashMap<String, String>, QueryError> {
        self(params)
    }
}

/// Runs backend query text and returns its rows
pub trait QueryExecutor: Send + Sync {
    fn execute(&self, query: &str) -> Result<QueryResult, QueryError>;
}

impl<F> QueryExecutor for F
where
    F: Fn(&str) -> Result<QueryResult, QueryError> + Send + Sync,
{
    fn execute(&self, query: &str) -> Result<QueryResult, QueryError> {
        self(query)
    }
}

/// Query collaborators shared by every rule of a manager
#[derive(Clone)]
pub struct Queriers {
    /// Required for builder conditions only
    pub builder: Option<Arc<dyn QueryBuilder>>,
    pub executor: Arc<dyn QueryExecutor>,
}

impl Queriers {
    pub fn new(executor: Arc<dyn QueryExecutor>) -> Self {
        Self {
            builder: None,
            executor,
        }
    }

    pub fn with_builder(mut self, builder: Arc<dyn QueryBuilder>) -> Self {
        self.builder = Some(builder);
        self
    }
}

impl std::fmt::Debug for Queriers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Queriers")
            .field("builder", &self.builder.is_some())
            .finish_non_exhaustive()
    }
}

fn var_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{\{\s*\.(\w+)\s*\}\}").expect("valid variable regex"))
}

/// Substitute `{{.name}}` variables in every enabled ClickHouse query.
pub fn render_clickhouse_queries(
    params: &QueryRangeParams,
) -> Result<HashMap<String, String>, QueryError> {
    let mut queries = HashMap::new();

    for (name, q) in &params.composite_query.clickhouse_queries {
        if q.disabled {
            continue;
        }
        let mut missing = None;
        let rendered = var_re().replace_all(&q.query, |caps: &regex::Captures| {
            match params.variables.get(&caps[1]) {
                Some(v) => v.clone(),
                None => {
                    missing.get_or_insert_with(|| caps[1].to_string());
                    String::new()
                }
            }
        });
        if let Some(var) = missing {
            return Err(QueryError::Build(format!(
                "query {} references unknown variable {}",
                name, var
            )));
        }
        if rendered.contains("{{") {
            return Err(QueryError::Build(format!(
                "query {} has an unsupported template action",
                name
            )));
        }
        queries.insert(name.clone(), rendered.into_owned());
    }
    Ok(queries)
}

/// Pick the query to evaluate: the configured one, else `F1`, else the
/// lexicographically greatest name.
pub fn select_query(selected: &str, queries: &HashMap<String, String>) -> Option<String> {
    if !selected.is_empty() {
        return Some(selected.to_string());
    }
    if queries.contains_key(LEGACY_DEFAULT_QUERY) {
        return Some(LEGACY_DEFAULT_QUERY.to_string());
    }
    queries.keys().max().cloned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::condition::ClickHouseQuery;
    use chrono::TimeZone;

    fn ch_condition(query: &str) -> RuleCondition {
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
        RuleCondition {
            composite_query: Some(composite),
            ..Default::default()
        }
    }

    #[test]
    fn test_range_is_delayed_and_minute_aligned() {
        let ts = Utc.with_ymd_and_hms(2024, 1, 1, 12, 10, 30).unwrap();
        let params = QueryRangeParams::for_eval(
            ts,
            Duration::from_secs(300),
            &ch_condition("SELECT 1"),
            false,
        );

        let end = Utc.with_ymd_and_hms(2024, 1, 1, 12, 8, 0).unwrap();
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 12, 3, 0).unwrap();
        assert_eq!(params.end, end.timestamp_millis());
        assert_eq!(params.start, start.timestamp_millis());
        assert_eq!(params.step, 60);
    }

    #[test]
    fn test_render_clickhouse_variables() {
        let ts = Utc.with_ymd_and_hms(2024, 1, 1, 0, 10, 0).unwrap();
        let params = QueryRangeParams::for_eval(
            ts,
            Duration::from_secs(60),
            &ch_condition("SELECT v AS value FROM t WHERE ts BETWEEN {{.start_timestamp}} AND {{ .end_timestamp }}"),
            false,
        );
        let queries = render_clickhouse_queries(&params).unwrap();
        let expected = format!(
            "SELECT v AS value FROM t WHERE ts BETWEEN {} AND {}",
            params.start / 1000,
            params.end / 1000
        );
        assert_eq!(queries["A"], expected);
    }

    #[test]
    fn test_render_rejects_unknown_variable() {
        let params = QueryRangeParams::for_eval(
            Utc::now(),
            Duration::from_secs(60),
            &ch_condition("SELECT {{.nope}}"),
            false,
        );
        assert!(matches!(
            render_clickhouse_queries(&params),
            Err(QueryError::Build(_))
        ));
    }

    #[test]
    fn test_select_query() {
        let mut queries = HashMap::new();
        queries.insert("A".to_string(), "qa".to_string());
        queries.insert("C".to_string(), "qc".to_string());
        queries.insert("B".to_string(), "qb".to_string());

        assert_eq!(select_query("", &queries).as_deref(), Some("C"));
        assert_eq!(select_query("A", &queries).as_deref(), Some("A"));

        queries.insert("F1".to_string(), "formula".to_string());
        assert_eq!(select_query("", &queries).as_deref(), Some("F1"));

        assert_eq!(select_query("", &HashMap::new()), None);
    }
}
