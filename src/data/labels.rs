//! Label sets and their fingerprints
//!
//! A [`Labels`] value is always sorted by name with unique names, so two
//! label sets with the same pairs hash to the same fingerprint regardless
//! of insertion order.

use std::collections::{BTreeMap, HashMap};
use std::hash::Hasher;

use fxhash::FxHasher64;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Label holding the metric name of a series
pub const METRIC_NAME_LABEL: &str = "__name__";
/// Label carrying the alerting rule name
pub const ALERT_NAME_LABEL: &str = "alertname";
/// Label carrying the alerting rule id
pub const ALERT_RULE_ID_LABEL: &str = "ruleId";
/// Label carrying the rule's generator URL
pub const RULE_SOURCE_LABEL: &str = "ruleSource";

const SEP: u8 = 0xff;

/// Fingerprint of a label set
pub type Fingerprint = u64;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Label {
    pub name: String,
    pub value: String,
}

impl Label {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Sorted set of name/value pairs
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Labels(Vec<Label>);

impl Labels {
    pub fn new(mut labels: Vec<Label>) -> Self {
        labels.sort();
        labels.dedup_by(|a, b| a.name == b.name);
        Self(labels)
    }

    pub fn empty() -> Self {
        Self(Vec::new())
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self::new(pairs.into_iter().map(|(k, v)| Label::new(k, v)).collect())
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .binary_search_by(|l| l.name.as_str().cmp(name))
            .ok()
            .map(|i| self.0[i].value.as_str())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Label> {
        self.0.iter()
    }

    pub fn to_map(&self) -> HashMap<String, String> {
        self.0
            .iter()
            .map(|l| (l.name.clone(), l.value.clone()))
            .collect()
    }

    /// Stable 64-bit fingerprint over all names and values.
    pub fn fingerprint(&self) -> Fingerprint {
        let mut hasher = FxHasher64::default();
        for label in &self.0 {
            hasher.write(label.name.as_bytes());
            hasher.write_u8(SEP);
            hasher.write(label.value.as_bytes());
            hasher.write_u8(SEP);
        }
        hasher.finish()
    }
}

impl std::fmt::Display for Labels {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{{")?;
        for (i, l) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}=\"{}\"", l.name, l.value)?;
        }
        write!(f, "}}")
    }
}

impl Serialize for Labels {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let map: BTreeMap<&str, &str> = self
            .0
            .iter()
            .map(|l| (l.name.as_str(), l.value.as_str()))
            .collect();
        map.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Labels {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let map = BTreeMap::<String, String>::deserialize(deserializer)?;
        Ok(Labels::from_pairs(map))
    }
}

/// Incremental editor for a label set
#[derive(Debug, Clone, Default)]
pub struct LabelsBuilder {
    labels: BTreeMap<String, String>,
}

impl LabelsBuilder {
    pub fn new(base: &Labels) -> Self {
        Self {
            labels: base
                .iter()
                .map(|l| (l.name.clone(), l.value.clone()))
                .collect(),
        }
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.labels.insert(name.into(), value.into());
        self
    }

    pub fn del(&mut self, name: &str) -> &mut Self {
        self.labels.remove(name);
        self
    }

    pub fn labels(&self) -> Labels {
        // BTreeMap iteration is already sorted and unique
        Labels(
            self.labels
                .iter()
                .map(|(k, v)| Label::new(k.clone(), v.clone()))
                .collect(),
        )
    }
}
