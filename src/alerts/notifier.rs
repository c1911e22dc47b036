//! Delivery of warning transitions to notification targets

use std::collections::HashMap;

use futures::future::join_all;

use super::config::{NotifyConfig, NotifyTarget};
use crate::data::Transition;

/// Sends persisted transitions to the configured targets.
///
/// Failures are reported to the caller but never retried. Each webhook
/// request is bounded by the configured timeout.
pub struct Notifier {
    client: reqwest::Client,
    config: NotifyConfig,
}

impl Notifier {
    pub fn new(config: NotifyConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Failed to build notification client, using defaults");
                reqwest::Client::new()
            });
        Self { client, config }
    }

    /// A notifier with no targets
    pub fn disabled() -> Self {
        Self::new(NotifyConfig::default())
    }

    pub fn is_enabled(&self) -> bool {
        !self.config.targets.is_empty()
    }

    pub fn config(&self) -> &NotifyConfig {
        &self.config
    }

    /// Send one transition to all targets
    pub async fn notify(&self, transition: &Transition) -> Result<(), NotifierError> {
        if !self.config.wants(transition) {
            return Ok(());
        }

        let results = join_all(
            self.config
                .targets
                .iter()
                .map(|target| self.notify_target(target, transition)),
        )
        .await;

        let errors: Vec<NotifierError> = results.into_iter().filter_map(Result::err).collect();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(NotifierError::Multiple(errors))
        }
    }

    /// Send every transition of a persisted batch, logging failures
    pub async fn notify_batch(&self, transitions: &[Transition]) {
        if !self.is_enabled() {
            return;
        }
        for transition in transitions {
            if let Err(e) = self.notify(transition).await {
                tracing::warn!(
                    event_id = %transition.event.event_id,
                    error = %e,
                    "Notification failed"
                );
            }
        }
    }

    async fn notify_target(
        &self,
        target: &NotifyTarget,
        transition: &Transition,
    ) -> Result<(), NotifierError> {
        match target {
            NotifyTarget::Log => {
                tracing::warn!(
                    event_id = %transition.event.event_id,
                    signal_id = %transition.event.signal_id,
                    kind = ?transition.kind,
                    "{}",
                    transition.event.message
                );
                Ok(())
            }
            NotifyTarget::Webhook { url, headers } => {
                self.send_webhook(url, headers, transition).await
            }
        }
    }

    async fn send_webhook(
        &self,
        url: &str,
        headers: &HashMap<String, String>,
        transition: &Transition,
    ) -> Result<(), NotifierError> {
        let payload = serde_json::json!({
            "kind": transition.kind,
            "event": transition.event,
            "timestamp": chrono::Utc::now().to_rfc3339(),
        });

        let mut request = self.client.post(url).json(&payload);
        for (key, value) in headers {
            request = request.header(key, value);
        }

        let response = request
            .send()
            .await
            .map_err(|e| NotifierError::Webhook(format!("Failed to send webhook: {}", e)))?;

        if !response.status().is_success() {
            return Err(NotifierError::Webhook(format!(
                "Webhook returned status {}",
                response.status()
            )));
        }

        tracing::debug!(
            event_id = %transition.event.event_id,
            url = %url,
            "Webhook notification sent"
        );
        Ok(())
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Self::disabled()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum NotifierError {
    #[error("Webhook error: {0}")]
    Webhook(String),

    #[error("Multiple notification failures: {0:?}")]
    Multiple(Vec<NotifierError>),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{EventState, Severity, ThresholdType, TransitionKind, WarningEvent};
    use chrono::Utc;

    fn transition(kind: TransitionKind, severity: Severity) -> Transition {
        Transition::new(
            kind,
            WarningEvent {
                event_id: "PPA:2_0".to_string(),
                signal_id: "PPA:2".to_string(),
                signal_type: "frequency".to_string(),
                severity,
                state: EventState::Active,
                threshold_type: ThresholdType::Max,
                threshold_value: 60.15,
                trigger_value: 60.2,
                trigger_count: 3,
                max_deviation: 0.05,
                event_start_time: Utc::now(),
                event_end_time: None,
                duration: None,
                message: "WARNING: frequency above 60.15 (deviation: +0.05)".to_string(),
                acknowledged: false,
                acknowledged_by: None,
                acknowledged_at: None,
            },
        )
    }

    #[tokio::test]
    async fn test_log_notification() {
        let notifier = Notifier::new(NotifyConfig::default().with_target(NotifyTarget::Log));
        let result = notifier
            .notify(&transition(TransitionKind::Opened, Severity::Warning))
            .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_unreachable_webhook_reports_error() {
        let notifier = Notifier::new(
            NotifyConfig::default().with_target(NotifyTarget::webhook("http://127.0.0.1:1/hook")),
        );
        let result = notifier
            .notify(&transition(TransitionKind::Opened, Severity::Critical))
            .await;
        assert!(matches!(result, Err(NotifierError::Multiple(_))));
    }

    #[tokio::test]
    async fn test_silent_webhook_times_out() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/hook", listener.local_addr().unwrap());
        // Accept connections and never answer
        let silent = tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let notifier = Notifier::new(
            NotifyConfig::default()
                .with_target(NotifyTarget::webhook(url))
                .with_timeout(std::time::Duration::from_millis(200)),
        );
        let result = tokio::time::timeout(
            std::time::Duration::from_secs(5),
            notifier.notify(&transition(TransitionKind::Opened, Severity::Critical)),
        )
        .await
        .expect("webhook request was not bounded");
        assert!(result.is_err());

        silent.abort();
    }

    #[tokio::test]
    async fn test_filtered_transitions_skip_targets() {
        let notifier = Notifier::new(
            NotifyConfig::default()
                .with_target(NotifyTarget::webhook("http://127.0.0.1:1/hook"))
                .with_min_severity(Severity::Critical),
        );
        // Below min severity, and acknowledgments are not in the default kinds
        assert!(notifier
            .notify(&transition(TransitionKind::Opened, Severity::Warning))
            .await
            .is_ok());
        assert!(notifier
            .notify(&transition(TransitionKind::Acknowledged, Severity::Critical))
            .await
            .is_ok());
    }
}
