//! Notification configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::data::{Severity, Transition, TransitionKind};

/// Notification target
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum NotifyTarget {
    /// Log to tracing
    Log,
    /// HTTP webhook, receives the transition as JSON
    Webhook {
        url: String,
        #[serde(default)]
        headers: std::collections::HashMap<String, String>,
    },
}

impl NotifyTarget {
    pub fn webhook(url: impl Into<String>) -> Self {
        NotifyTarget::Webhook {
            url: url.into(),
            headers: Default::default(),
        }
    }
}

/// Which persisted transitions are announced, and where
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifyConfig {
    #[serde(default)]
    pub targets: Vec<NotifyTarget>,
    #[serde(default = "default_kinds")]
    pub kinds: Vec<TransitionKind>,
    #[serde(default = "default_min_severity")]
    pub min_severity: Severity,
    /// Upper bound on a single webhook request
    #[serde(default = "default_timeout")]
    pub timeout: Duration,
}

fn default_kinds() -> Vec<TransitionKind> {
    vec![
        TransitionKind::Opened,
        TransitionKind::Escalated,
        TransitionKind::Recovered,
    ]
}

fn default_min_severity() -> Severity {
    Severity::Warning
}

fn default_timeout() -> Duration {
    Duration::from_secs(5)
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            targets: Vec::new(),
            kinds: default_kinds(),
            min_severity: default_min_severity(),
            timeout: default_timeout(),
        }
    }
}

impl NotifyConfig {
    /// Build from a comma-separated list of webhook URLs. The log target is
    /// always included.
    pub fn from_webhook_list(list: &str) -> Self {
        let mut targets = vec![NotifyTarget::Log];
        targets.extend(
            list.split(',')
                .map(str::trim)
                .filter(|url| !url.is_empty())
                .map(NotifyTarget::webhook),
        );
        Self {
            targets,
            ..Default::default()
        }
    }

    pub fn with_target(mut self, target: NotifyTarget) -> Self {
        self.targets.push(target);
        self
    }

    pub fn with_min_severity(mut self, severity: Severity) -> Self {
        self.min_severity = severity;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn wants(&self, transition: &Transition) -> bool {
        self.kinds.contains(&transition.kind) && transition.event.severity >= self.min_severity
    }
}
