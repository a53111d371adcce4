pub mod labels;
pub mod sample;
pub mod value;

pub use labels::{Fingerprint, Label, Labels, LabelsBuilder};
pub use sample::{parse_row, Point, QueryResult, Sample, Vector, RESERVED_VALUE_ALIASES};
pub use value::Value;
