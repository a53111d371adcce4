//! Ready-made notify functions

use std::sync::Arc;

use tokio::sync::mpsc;

use super::alert::Alert;
use super::rule::NotifyFunc;

/// One dispatch from a rule
#[derive(Debug, Clone)]
pub struct Notification {
    pub key: String,
    pub alerts: Vec<Alert>,
}

/// Notify function that only logs each alert
pub fn log_notifier() -> NotifyFunc {
    Arc::new(|key: &str, alerts: Vec<Alert>| {
        for alert in &alerts {
            tracing::warn!(
                key = %key,
                state = %alert.state,
                labels = %alert.labels,
                value = alert.value,
                resolved = alert.is_resolved(),
                "Alert notification"
            );
        }
    })
}

/// Notify function that forwards dispatches to a bounded channel.
///
/// Sending never blocks the evaluating task: when the receiver lags
/// behind and the channel is full, the dispatch is dropped and logged.
pub fn channel_notifier(capacity: usize) -> (NotifyFunc, mpsc::Receiver<Notification>) {
    let (tx, rx) = mpsc::channel(capacity);
    let notify: NotifyFunc = Arc::new(move |key: &str, alerts: Vec<Alert>| {
        let count = alerts.len();
        let notification = Notification {
            key: key.to_string(),
            alerts,
        };
        if let Err(e) = tx.try_send(notification) {
            tracing::error!(alerts = count, error = %e, "Dropping alert notification");
        }
    });
    (notify, rx)
}
