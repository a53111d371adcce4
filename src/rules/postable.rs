//! Rule definitions as received from callers

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::condition::{QueryType, RuleCondition};
use super::rule::{RuleError, RuleType};

/// Input a rule is constructed from
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostableRule {
    /// Rule name
    pub alert: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub rule_type: Option<RuleType>,
    #[serde(default, with = "duration_serde")]
    pub eval_window: Duration,
    #[serde(default, with = "duration_serde")]
    pub frequency: Duration,
    /// How long an alert stays pending before it fires
    #[serde(rename = "for", default, with = "duration_serde")]
    pub hold_duration: Duration,
    #[serde(rename = "condition", default)]
    pub rule_condition: Option<RuleCondition>,
    #[serde(default)]
    pub labels: HashMap<String, String>,
    #[serde(default)]
    pub annotations: HashMap<String, String>,
    #[serde(default)]
    pub disabled: bool,
    /// URL of the page the rule was created from
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub preferred_channels: Vec<String>,
}

impl PostableRule {
    /// Parse and validate a JSON rule definition.
    pub fn parse(json: &str) -> Result<Self, RuleError> {
        let mut rule: PostableRule =
            serde_json::from_str(json).map_err(|e| RuleError::InvalidRule(e.to_string()))?;

        if rule.rule_type.is_none() {
            rule.rule_type = Some(match rule.rule_condition.as_ref().map(|c| c.query_type()) {
                Some(QueryType::PromQL) => RuleType::Prom,
                _ => RuleType::Threshold,
            });
        }
        rule.validate()?;
        Ok(rule)
    }

    pub fn validate(&self) -> Result<(), RuleError> {
        if self.alert.trim().is_empty() {
            return Err(RuleError::InvalidRule("alert name is required".into()));
        }
        match &self.rule_condition {
            None => Err(RuleError::NoCondition),
            Some(cond) => cond.validate(),
        }
    }
}

/// Durations as `"1h30m"`, `"90s"`, `"250ms"` or whole seconds
pub(crate) mod duration_serde {
    use serde::de::{self, Visitor};
    use serde::{Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format(*duration))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct DurationVisitor;

        impl<'de> Visitor<'de> for DurationVisitor {
            type Value = Duration;

            fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
                f.write_str("a duration string like \"5m\" or a number of seconds")
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<Duration, E> {
                Ok(Duration::from_secs(v))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<Duration, E> {
                u64::try_from(v)
                    .map(Duration::from_secs)
                    .map_err(|_| E::custom("negative duration"))
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Duration, E> {
                parse(v).map_err(E::custom)
            }
        }

        deserializer.deserialize_any(DurationVisitor)
    }

    pub fn parse(s: &str) -> Result<Duration, String> {
        let s = s.trim();
        if s.is_empty() || s == "0" {
            return Ok(Duration::ZERO);
        }
        let mut total = Duration::ZERO;
        let mut rest = s;
        while !rest.is_empty() {
            let digits = rest
                .find(|c: char| !c.is_ascii_digit())
                .ok_or_else(|| format!("missing unit in duration {s:?}"))?;
            if digits == 0 {
                return Err(format!("invalid duration {s:?}"));
            }
            let n: u64 = rest[..digits]
                .parse()
                .map_err(|_| format!("invalid duration {s:?}"))?;
            rest = &rest[digits..];
            let unit_len = rest
                .find(|c: char| c.is_ascii_digit())
                .unwrap_or(rest.len());
            let too_large = || format!("duration {s:?} is too large");
            let unit = match &rest[..unit_len] {
                "ms" => Some(Duration::from_millis(n)),
                "s" => Some(Duration::from_secs(n)),
                "m" => n.checked_mul(60).map(Duration::from_secs),
                "h" => n.checked_mul(3600).map(Duration::from_secs),
                "d" => n.checked_mul(86400).map(Duration::from_secs),
                other => return Err(format!("unknown unit {other:?} in duration {s:?}")),
            }
            .ok_or_else(too_large)?;
            total = total.checked_add(unit).ok_or_else(too_large)?;
            rest = &rest[unit_len..];
        }
        Ok(total)
    }

    pub fn format(d: Duration) -> String {
        let secs = d.as_secs();
        let millis = d.subsec_millis();
        if secs == 0 {
            return if millis == 0 { "0s".into() } else { format!("{millis}ms") };
        }
        let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);
        let mut out = String::new();
        if h > 0 {
            out.push_str(&format!("{h}h"));
        }
        if m > 0 || (h > 0 && s > 0) {
            out.push_str(&format!("{m}m"));
        }
        if s > 0 || out.is_empty() {
            out.push_str(&format!("{s}s"));
        }
        out
    }
}
