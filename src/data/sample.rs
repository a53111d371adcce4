use serde::Serialize;

use super::labels::{Labels, LabelsBuilder};
use super::value::Value;

/// Column names whose value is taken as the sample value rather than a label
pub const RESERVED_VALUE_ALIASES: [&str; 5] = ["__result", "__value", "result", "res", "value"];

/// Column names whose timestamp is taken as the sample time
const TIME_COLUMNS: [&str; 2] = ["ts", "interval"];

pub fn is_value_alias(column: &str) -> bool {
    RESERVED_VALUE_ALIASES.contains(&column)
}

/// A single observation. `vs` accumulates raw values while rows are reduced.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Point {
    /// Unix seconds
    pub t: i64,
    pub v: f64,
    #[serde(skip)]
    pub vs: Vec<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Sample {
    pub metric: Labels,
    pub point: Point,
}

/// Ordered collection of samples from one query execution
pub type Vector = Vec<Sample>;

/// Raw result returned by a query executor
#[derive(Debug, Clone, Default, Serialize)]
pub struct QueryResult {
    /// Column names
    pub columns: Vec<String>,
    /// Result rows, one cell per column
    pub rows: Vec<Vec<Value>>,
}

impl QueryResult {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Value>>) -> Self {
        Self { columns, rows }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Convert every row into a sample, in row order.
    ///
    /// Rows whose value is NaN are dropped. A row without any value
    /// column yields a value of zero.
    pub fn samples(&self) -> Vector {
        self.rows
            .iter()
            .filter_map(|row| parse_row(&self.columns, row))
            .collect()
    }
}

/// Parse one row: value aliases set the value, time columns set the point
/// time, everything else becomes a label.
pub fn parse_row(columns: &[String], row: &[Value]) -> Option<Sample> {
    let mut point = Point::default();
    let mut lbls = LabelsBuilder::default();

    for (name, cell) in columns.iter().zip(row.iter()) {
        if is_value_alias(name) {
            if let Some(v) = cell.as_f64() {
                point.v = v;
                continue;
            }
        }
        if TIME_COLUMNS.contains(&name.as_str()) {
            if let Some(t) = cell.as_timestamp() {
                point.t = t.timestamp();
                continue;
            }
        }
        match cell.label_text() {
            Some(text) => {
                lbls.set(name.clone(), text);
            }
            None if !cell.is_null() => {
                tracing::debug!(column = %name, kind = cell.type_name(), "ignoring column in query result");
            }
            None => {}
        }
    }

    if point.v.is_nan() {
        return None;
    }
    point.vs.push(point.v);

    Some(Sample {
        metric: lbls.labels(),
        point,
    })
}
