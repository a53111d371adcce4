//! Alerting rules
//!
//! A rule runs one query per evaluation, reduces the rows of each series
//! to a single value and compares it against a target. Series that match
//! become alerts which move through the pending, firing and resolved
//! states across evaluations.

pub mod alert;
pub mod condition;
pub mod notifier;
pub mod postable;
pub mod query;
pub mod reduce;
pub mod rule;
pub mod template;
pub mod threshold;

#[cfg(test)]
pub(crate) mod testutil;

pub use alert::{Alert, AlertState, RuleHealth};
pub use condition::{
    AggregateOperator, BuilderQuery, ClickHouseQuery, CompareOp, CompositeQuery, DataSource,
    MatchType, PromQuery, QueryType, RuleCondition,
};
pub use notifier::{channel_notifier, log_notifier, Notification};
pub use postable::PostableRule;
pub use query::{Queriers, QueryBuilder, QueryError, QueryExecutor, QueryRangeParams};
pub use rule::{name_and_labels, FeatureLookup, NotifyFunc, Rule, RuleError, RuleType};
pub use threshold::{ThresholdRule, ThresholdRuleOpts, RESOLVED_RETENTION};
