//! Alert instances produced by rules

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::data::Labels;

/// Lifecycle state of an alert, ordered Inactive < Pending < Firing
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertState {
    #[default]
    Inactive,
    Pending,
    Firing,
}

impl std::fmt::Display for AlertState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AlertState::Inactive => write!(f, "inactive"),
            AlertState::Pending => write!(f, "pending"),
            AlertState::Firing => write!(f, "firing"),
        }
    }
}

/// Outcome of a rule's most recent evaluation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleHealth {
    #[default]
    Unknown,
    Good,
    Bad,
}

impl std::fmt::Display for RuleHealth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RuleHealth::Unknown => write!(f, "unknown"),
            RuleHealth::Good => write!(f, "ok"),
            RuleHealth::Bad => write!(f, "err"),
        }
    }
}

/// One alert instance, identified by the fingerprint of its labels
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    pub state: AlertState,
    pub labels: Labels,
    pub annotations: Labels,
    pub generator_url: String,
    /// Preferred notification channels of the owning rule
    pub receivers: Vec<String>,
    pub value: f64,
    pub active_at: DateTime<Utc>,
    pub fired_at: Option<DateTime<Utc>>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub last_sent_at: Option<DateTime<Utc>>,
    pub valid_until: Option<DateTime<Utc>>,
}

impl Alert {
    pub fn fingerprint(&self) -> u64 {
        self.labels.fingerprint()
    }

    pub fn is_resolved(&self) -> bool {
        self.resolved_at.is_some()
    }

    /// Whether the alert is due for (re)sending at `ts`.
    ///
    /// An alert resolved after its last send must go out so the
    /// resolution is reported.
    pub fn needs_sending(&self, ts: DateTime<Utc>, resend_delay: TimeDelta) -> bool {
        if self.state == AlertState::Pending {
            return false;
        }
        let Some(last_sent) = self.last_sent_at else {
            return true;
        };
        if let Some(resolved) = self.resolved_at {
            if last_sent < resolved {
                return true;
            }
        }
        ts - last_sent >= resend_delay
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn firing_alert(ts: DateTime<Utc>) -> Alert {
        Alert {
            state: AlertState::Firing,
            labels: Labels::from_pairs([("host", "a")]),
            annotations: Labels::empty(),
            generator_url: String::new(),
            receivers: vec![],
            value: 1.0,
            active_at: ts,
            fired_at: Some(ts),
            resolved_at: None,
            last_sent_at: None,
            valid_until: None,
        }
    }

    #[test]
    fn test_state_ordering() {
        assert!(AlertState::Firing > AlertState::Pending);
        assert!(AlertState::Pending > AlertState::Inactive);
    }

    #[test]
    fn test_needs_sending() {
        let ts = Utc::now();
        let mut alert = firing_alert(ts);
        let delay = TimeDelta::minutes(5);

        assert!(alert.needs_sending(ts, delay));

        alert.last_sent_at = Some(ts);
        assert!(!alert.needs_sending(ts + TimeDelta::minutes(1), delay));
        assert!(alert.needs_sending(ts + TimeDelta::minutes(5), delay));

        alert.state = AlertState::Inactive;
        alert.resolved_at = Some(ts + TimeDelta::minutes(1));
        assert!(alert.needs_sending(ts + TimeDelta::minutes(2), delay));
    }

    #[test]
    fn test_pending_is_never_sent() {
        let ts = Utc::now();
        let mut alert = firing_alert(ts);
        alert.state = AlertState::Pending;
        assert!(!alert.needs_sending(ts, TimeDelta::zero()));
    }
}
