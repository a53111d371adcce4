//! Manager configuration

use std::time::Duration;

/// Default delay before a still-firing alert is sent again
pub const DEFAULT_RESEND_DELAY: Duration = Duration::from_secs(60 * 60);

/// Frequency used by groups that do not set one
pub const DEFAULT_FREQUENCY: Duration = Duration::from_secs(60);

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {name}: {reason}")]
    InvalidValue {
        name: &'static str,
        value: String,
        reason: String,
    },
}

/// Options shared by every group a manager runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ManagerOptions {
    pub resend_delay: Duration,
    pub default_frequency: Duration,
}

impl Default for ManagerOptions {
    fn default() -> Self {
        Self {
            resend_delay: DEFAULT_RESEND_DELAY,
            default_frequency: DEFAULT_FREQUENCY,
        }
    }
}

impl ManagerOptions {
    /// Load from `SNORKEL_RULES_RESEND_DELAY_SECS` and
    /// `SNORKEL_RULES_FREQUENCY_SECS`, falling back to the defaults for
    /// unset variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let secs = |name: &'static str, default: Duration| -> Result<Duration, ConfigError> {
            let Some(raw) = lookup(name) else {
                return Ok(default);
            };
            let n: u64 = raw.trim().parse().map_err(|e: std::num::ParseIntError| {
                ConfigError::InvalidValue {
                    name,
                    value: raw.clone(),
                    reason: e.to_string(),
                }
            })?;
            if n == 0 {
                return Err(ConfigError::InvalidValue {
                    name,
                    value: raw,
                    reason: "must be positive".into(),
                });
            }
            Ok(Duration::from_secs(n))
        };

        Ok(Self {
            resend_delay: secs("SNORKEL_RULES_RESEND_DELAY_SECS", defaults.resend_delay)?,
            default_frequency: secs("SNORKEL_RULES_FREQUENCY_SECS", defaults.default_frequency)?,
        })
    }

    pub fn with_resend_delay(mut self, delay: Duration) -> Self {
        self.resend_delay = delay;
        self
    }

    pub fn with_default_frequency(mut self, frequency: Duration) -> Self {
        self.default_frequency = frequency;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let opts = ManagerOptions::from_lookup(lookup(&[])).unwrap();
        assert_eq!(opts, ManagerOptions::default());
        assert_eq!(opts.resend_delay, Duration::from_secs(3600));
        assert_eq!(opts.default_frequency, Duration::from_secs(60));
    }

    #[test]
    fn test_env_overrides() {
        let opts = ManagerOptions::from_lookup(lookup(&[
            ("SNORKEL_RULES_RESEND_DELAY_SECS", "300"),
            ("SNORKEL_RULES_FREQUENCY_SECS", " 30 "),
        ]))
        .unwrap();
        assert_eq!(opts.resend_delay, Duration::from_secs(300));
        assert_eq!(opts.default_frequency, Duration::from_secs(30));
    }

    #[test]
    fn test_invalid_values() {
        let err = ManagerOptions::from_lookup(lookup(&[("SNORKEL_RULES_FREQUENCY_SECS", "1m")]))
            .unwrap_err();
        assert!(err.to_string().contains("SNORKEL_RULES_FREQUENCY_SECS"));

        assert!(
            ManagerOptions::from_lookup(lookup(&[("SNORKEL_RULES_RESEND_DELAY_SECS", "0")]))
                .is_err()
        );
    }
}
