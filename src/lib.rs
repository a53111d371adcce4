//! Snorkel Rules: alert rule evaluation and scheduling
//!
//! Rules run a query against an external store on a fixed schedule, reduce
//! the returned rows per series and compare the result against a
//! threshold. Matching series become alerts that move from pending to
//! firing once the hold duration has passed, and are resolved when they
//! stop matching.
//!
//! # Features
//!
//! - **Threshold Rules**: Builder or ClickHouse SQL queries compared with a target
//! - **Match Types**: at least once, all the times, on average, in total
//! - **Unit Aware**: Targets are converted into the unit of the query result
//! - **Alert Lifecycle**: Pending, firing and resolved alerts with resend control
//! - **Rule Groups**: Phase-aligned evaluation with missed-tick coalescing
//! - **Hot Reload**: Groups are replaced without losing alert state
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use snorkel_rules::data::QueryResult;
//! use snorkel_rules::rules::{log_notifier, PostableRule, Queriers, QueryError};
//! use snorkel_rules::task::{Manager, ManagerOptions};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let executor = |_query: &str| -> Result<QueryResult, QueryError> { Ok(QueryResult::empty()) };
//! let manager = Manager::new(
//!     ManagerOptions::from_env()?,
//!     Queriers::new(Arc::new(executor)),
//!     log_notifier(),
//! );
//!
//! let rule = PostableRule::parse(r#"{
//!     "alert": "High error rate",
//!     "frequency": "1m",
//!     "condition": {
//!         "compositeQuery": {
//!             "queryType": "clickhouse_sql",
//!             "chQueries": {"A": {"query": "SELECT count() AS value FROM errors"}}
//!         },
//!         "op": "above",
//!         "target": 100
//!     }
//! }"#)?;
//! manager.add_rule("1", &rule).await?;
//!
//! tokio::time::sleep(Duration::from_secs(300)).await;
//! manager.stop().await;
//! # Ok(())
//! # }
//! ```

pub mod data;
pub mod logging;
pub mod rules;
pub mod task;
pub mod units;

// Re-export commonly used types
pub use data::{Labels, QueryResult, Value};
pub use rules::{Alert, AlertState, PostableRule, Rule, RuleError, ThresholdRule};
pub use task::{Manager, ManagerOptions, Task};
