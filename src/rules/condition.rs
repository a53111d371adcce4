//! Rule condition: which query to run and how to compare its result

use std::collections::BTreeMap;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::rule::RuleError;

/// How the query of a condition is expressed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueryType {
    #[serde(rename = "builder")]
    Builder,
    #[serde(rename = "clickhouse_sql")]
    ClickHouseSql,
    #[serde(rename = "promql")]
    PromQL,
    #[default]
    #[serde(other)]
    Unknown,
}

impl std::fmt::Display for QueryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QueryType::Builder => write!(f, "builder"),
            QueryType::ClickHouseSql => write!(f, "clickhouse_sql"),
            QueryType::PromQL => write!(f, "promql"),
            QueryType::Unknown => write!(f, "unknown"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataSource {
    #[default]
    Metrics,
    Traces,
    Logs,
}

/// Aggregation applied by a builder query
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregateOperator {
    #[default]
    Noop,
    Count,
    CountDistinct,
    Sum,
    Avg,
    Min,
    Max,
    P50,
    P90,
    P95,
    P99,
    Rate,
    SumRate,
    AvgRate,
    MinRate,
    MaxRate,
    RateSum,
    RateAvg,
    RateMin,
    RateMax,
    #[serde(other)]
    Other,
}

impl AggregateOperator {
    /// Rate-style aggregates emit an artifact value on the first row of a series.
    pub fn is_rate_operator(&self) -> bool {
        matches!(
            self,
            AggregateOperator::Rate
                | AggregateOperator::SumRate
                | AggregateOperator::AvgRate
                | AggregateOperator::MinRate
                | AggregateOperator::MaxRate
                | AggregateOperator::RateSum
                | AggregateOperator::RateAvg
                | AggregateOperator::RateMin
                | AggregateOperator::RateMax
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BuilderQuery {
    pub query_name: String,
    pub step_interval: i64,
    pub data_source: DataSource,
    pub aggregate_operator: AggregateOperator,
    pub aggregate_attribute: String,
    pub expression: String,
    pub disabled: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClickHouseQuery {
    pub query: String,
    pub disabled: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PromQuery {
    pub query: String,
    pub disabled: bool,
}

/// Named sub-queries of one kind plus the unit of their result
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CompositeQuery {
    pub builder_queries: BTreeMap<String, BuilderQuery>,
    #[serde(rename = "chQueries")]
    pub clickhouse_queries: BTreeMap<String, ClickHouseQuery>,
    pub prom_queries: BTreeMap<String, PromQuery>,
    pub query_type: QueryType,
    pub unit: String,
}

impl CompositeQuery {
    /// Number of sub-queries declared for the composite's own query type
    pub fn query_count(&self) -> usize {
        match self.query_type {
            QueryType::Builder => self.builder_queries.len(),
            QueryType::ClickHouseSql => self.clickhouse_queries.len(),
            QueryType::PromQL => self.prom_queries.len(),
            QueryType::Unknown => 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompareOp {
    #[serde(rename = "above", alias = "1")]
    Above,
    #[serde(rename = "below", alias = "2")]
    Below,
    #[serde(rename = "eq", alias = "3")]
    Eq,
    #[serde(rename = "not_eq", alias = "4")]
    NotEq,
}

impl CompareOp {
    pub fn check(&self, value: f64, target: f64) -> bool {
        match self {
            CompareOp::Above => value > target,
            CompareOp::Below => value < target,
            CompareOp::Eq => value == target,
            CompareOp::NotEq => value != target,
        }
    }
}

impl FromStr for CompareOp {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "above" | "1" | ">" => Ok(Self::Above),
            "below" | "2" | "<" => Ok(Self::Below),
            "eq" | "3" | "==" => Ok(Self::Eq),
            "not_eq" | "4" | "!=" => Ok(Self::NotEq),
            _ => Err(format!("unknown compare operator: {s}")),
        }
    }
}

impl std::fmt::Display for CompareOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Above => write!(f, "above"),
            Self::Below => write!(f, "below"),
            Self::Eq => write!(f, "eq"),
            Self::NotEq => write!(f, "not_eq"),
        }
    }
}

/// How several samples of one series within the window are combined
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchType {
    #[default]
    #[serde(rename = "at_least_once", alias = "1")]
    AtLeastOnce,
    #[serde(rename = "all_the_times", alias = "2")]
    AllTheTimes,
    #[serde(rename = "on_average", alias = "3")]
    OnAverage,
    #[serde(rename = "in_total", alias = "4")]
    InTotal,
}

impl FromStr for MatchType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "at_least_once" | "1" => Ok(Self::AtLeastOnce),
            "all_the_times" | "2" => Ok(Self::AllTheTimes),
            "on_average" | "3" => Ok(Self::OnAverage),
            "in_total" | "4" => Ok(Self::InTotal),
            _ => Err(format!("unknown match type: {s}")),
        }
    }
}

impl std::fmt::Display for MatchType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AtLeastOnce => write!(f, "at_least_once"),
            Self::AllTheTimes => write!(f, "all_the_times"),
            Self::OnAverage => write!(f, "on_average"),
            Self::InTotal => write!(f, "in_total"),
        }
    }
}

/// Query plus comparison policy of a threshold rule
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleCondition {
    #[serde(default)]
    pub composite_query: Option<CompositeQuery>,
    #[serde(rename = "op", default)]
    pub compare_op: Option<CompareOp>,
    #[serde(default)]
    pub target: Option<f64>,
    #[serde(default)]
    pub match_type: MatchType,
    #[serde(default)]
    pub target_unit: String,
    #[serde(rename = "selectedQueryName", default)]
    pub selected_query: String,
}

impl RuleCondition {
    pub fn query_type(&self) -> QueryType {
        self.composite_query
            .as_ref()
            .map(|q| q.query_type)
            .unwrap_or_default()
    }

    /// Unit of the query result, empty when unset
    pub fn result_unit(&self) -> &str {
        self.composite_query
            .as_ref()
            .map(|q| q.unit.as_str())
            .unwrap_or("")
    }

    pub fn validate(&self) -> Result<(), RuleError> {
        let query = self
            .composite_query
            .as_ref()
            .ok_or_else(|| RuleError::InvalidCondition("composite query is missing".into()))?;

        if query.query_type == QueryType::Unknown {
            return Err(RuleError::InvalidCondition("query type is not set".into()));
        }
        if query.query_count() == 0 {
            return Err(RuleError::InvalidCondition(format!(
                "no {} queries in composite query",
                query.query_type
            )));
        }
        if query.query_type == QueryType::Builder {
            if self.target.is_none() {
                return Err(RuleError::InvalidCondition("target is not set".into()));
            }
            if self.compare_op.is_none() {
                return Err(RuleError::InvalidCondition(
                    "compare operator is not set".into(),
                ));
            }
        }
        Ok(())
    }

    pub fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }

    /// True when a builder metrics query uses a rate-style aggregate
    pub fn should_skip_first_record(&self) -> bool {
        let Some(query) = &self.composite_query else {
            return false;
        };
        query.builder_queries.values().any(|q| {
            q.data_source == DataSource::Metrics && q.aggregate_operator.is_rate_operator()
        })
    }
}

impl std::fmt::Display for RuleCondition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.query_type(), self.match_type)?;
        if let Some(op) = self.compare_op {
            write!(f, " {}", op)?;
        }
        if let Some(target) = self.target {
            write!(f, " {}", target)?;
            if !self.target_unit.is_empty() {
                write!(f, " {}", self.target_unit)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn builder_condition() -> RuleCondition {
        let mut queries = BTreeMap::new();
        queries.insert(
            "A".to_string(),
            BuilderQuery {
                query_name: "A".into(),
                aggregate_operator: AggregateOperator::Sum,
                ..Default::default()
            },
        );
        RuleCondition {
            composite_query: Some(CompositeQuery {
                builder_queries: queries,
                query_type: QueryType::Builder,
                ..Default::default()
            }),
            compare_op: Some(CompareOp::Above),
            target: Some(10.0),
            ..Default::default()
        }
    }

    #[test]
    fn test_builder_condition_is_valid() {
        assert!(builder_condition().is_valid());
    }

    #[test]
    fn test_missing_pieces_are_invalid() {
        assert!(!RuleCondition::default().is_valid());

        let mut cond = builder_condition();
        cond.target = None;
        assert!(!cond.is_valid());

        let mut cond = builder_condition();
        cond.compare_op = None;
        assert!(!cond.is_valid());

        let mut cond = builder_condition();
        cond.composite_query.as_mut().unwrap().query_type = QueryType::Unknown;
        assert!(!cond.is_valid());

        let mut cond = builder_condition();
        cond.composite_query.as_mut().unwrap().query_type = QueryType::ClickHouseSql;
        assert!(!cond.is_valid());
    }

    #[test]
    fn test_skip_first_record_only_for_metric_rates() {
        let mut cond = builder_condition();
        assert!(!cond.should_skip_first_record());

        let q = cond.composite_query.as_mut().unwrap();
        q.builder_queries.get_mut("A").unwrap().aggregate_operator = AggregateOperator::SumRate;
        assert!(cond.should_skip_first_record());

        let q = cond.composite_query.as_mut().unwrap();
        q.builder_queries.get_mut("A").unwrap().data_source = DataSource::Logs;
        assert!(!cond.should_skip_first_record());
    }

    #[test]
    fn test_deserialize_wire_format() {
        let json = r#"{
            "compositeQuery": {
                "queryType": "clickhouse_sql",
                "unit": "ms",
                "chQueries": {"A": {"query": "SELECT 1 AS value"}}
            },
            "op": "1",
            "target": 1,
            "matchType": "2",
            "targetUnit": "s"
        }"#;
        let cond: RuleCondition = serde_json::from_str(json).unwrap();
        assert_eq!(cond.query_type(), QueryType::ClickHouseSql);
        assert_eq!(cond.compare_op, Some(CompareOp::Above));
        assert_eq!(cond.match_type, MatchType::AllTheTimes);
        assert_eq!(cond.result_unit(), "ms");
        assert!(cond.is_valid());
    }

    #[test]
    fn test_compare_op_parse() {
        assert_eq!("above".parse::<CompareOp>().unwrap(), CompareOp::Above);
        assert_eq!("4".parse::<CompareOp>().unwrap(), CompareOp::NotEq);
        assert!("sideways".parse::<CompareOp>().is_err());
        assert_eq!("in_total".parse::<MatchType>().unwrap(), MatchType::InTotal);
    }
}
