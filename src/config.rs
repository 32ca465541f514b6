//! Tunable engine settings.
//!
//! Everything here has a default, so a missing or partial TOML file is fine:
//!
//! ```toml
//! event_window_secs = 600
//! teacher_dedup_scope = "room"
//!
//! [[thresholds]]
//! event_kind = "eyes_closed"
//! alert_kind = "student_sleeping"
//! severity = "critical"
//! threshold_seconds = 90
//! ```

use std::collections::HashSet;
use std::path::Path;

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::error::{MonitorError, Result};
use crate::models::{AlertKind, EventKind, Severity};

pub const CONFIG_ENV: &str = "ATTENTION_MONITOR_CONFIG";

/// Maps an accumulated negative signal onto the alert it should raise.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdRule {
    pub event_kind: EventKind,
    pub alert_kind: AlertKind,
    pub severity: Severity,
    pub threshold_seconds: i64,
}

impl ThresholdRule {
    fn new(
        event_kind: EventKind,
        alert_kind: AlertKind,
        severity: Severity,
        threshold_seconds: i64,
    ) -> Self {
        Self {
            event_kind,
            alert_kind,
            severity,
            threshold_seconds,
        }
    }
}

pub fn default_thresholds() -> Vec<ThresholdRule> {
    vec![
        ThresholdRule::new(
            EventKind::EyesClosed,
            AlertKind::StudentSleeping,
            Severity::Critical,
            120,
        ),
        ThresholdRule::new(
            EventKind::LookingAway,
            AlertKind::StudentNotLooking,
            Severity::Warning,
            240,
        ),
        ThresholdRule::new(
            EventKind::NotInFrame,
            AlertKind::StudentLeftFrame,
            Severity::Warning,
            180,
        ),
        ThresholdRule::new(
            EventKind::Distracted,
            AlertKind::StudentDistracted,
            Severity::Warning,
            300,
        ),
        ThresholdRule::new(
            EventKind::PhoneDetected,
            AlertKind::PhoneDetected,
            Severity::Warning,
            60,
        ),
    ]
}

/// Which identity a teacher-side alert is deduplicated on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TeacherDedupScope {
    /// One alert per (room, kind), whoever the teacher is.
    Room,
    /// One alert per (room, teacher, kind); room-only when no teacher is named.
    RoomAndTeacher,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub event_window_secs: i64,
    pub suppression_window_secs: i64,
    pub history_window_hours: i64,
    pub default_alert_limit: usize,
    pub teacher_room_alert_limit: usize,
    pub late_grace_minutes: i64,
    pub reconcile_interval_secs: u64,
    pub retry_limit: u32,
    pub teacher_dedup_scope: TeacherDedupScope,
    pub thresholds: Vec<ThresholdRule>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            event_window_secs: 600,
            suppression_window_secs: 1800,
            history_window_hours: 24,
            default_alert_limit: 50,
            teacher_room_alert_limit: 20,
            late_grace_minutes: 5,
            reconcile_interval_secs: 60,
            retry_limit: 3,
            teacher_dedup_scope: TeacherDedupScope::RoomAndTeacher,
            thresholds: default_thresholds(),
        }
    }
}

impl MonitorConfig {
    /// Loads from `path`, else from `$ATTENTION_MONITOR_CONFIG`, else defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let from_env = std::env::var(CONFIG_ENV).ok();
        let path = match (path, from_env.as_deref()) {
            (Some(path), _) => path.to_path_buf(),
            (None, Some(value)) if !value.is_empty() => value.into(),
            _ => return Ok(Self::default()),
        };

        let content = std::fs::read_to_string(&path).map_err(|err| {
            MonitorError::Config(format!("failed to read {}: {}", path.display(), err))
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: MonitorConfig =
            toml::from_str(content).map_err(|err| MonitorError::Config(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.event_window_secs <= 0 || self.suppression_window_secs <= 0 {
            return Err(MonitorError::Config(
                "window lengths must be positive".to_string(),
            ));
        }
        if self.history_window_hours <= 0 {
            return Err(MonitorError::Config(
                "history_window_hours must be positive".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for rule in &self.thresholds {
            if rule.event_kind.is_positive() {
                return Err(MonitorError::Config(format!(
                    "{} is a positive signal and cannot raise alerts",
                    rule.event_kind
                )));
            }
            if rule.threshold_seconds <= 0 {
                return Err(MonitorError::Config(format!(
                    "threshold for {} must be positive",
                    rule.event_kind
                )));
            }
            if !seen.insert(rule.event_kind) {
                return Err(MonitorError::Config(format!(
                    "duplicate threshold rule for {}",
                    rule.event_kind
                )));
            }
        }
        Ok(())
    }

    pub fn rule_for(&self, kind: EventKind) -> Option<&ThresholdRule> {
        self.thresholds.iter().find(|rule| rule.event_kind == kind)
    }

    pub fn rule_for_alert(&self, kind: AlertKind) -> Option<&ThresholdRule> {
        self.thresholds.iter().find(|rule| rule.alert_kind == kind)
    }

    pub fn event_window(&self) -> Duration {
        Duration::seconds(self.event_window_secs)
    }

    pub fn suppression_window(&self) -> Duration {
        Duration::seconds(self.suppression_window_secs)
    }

    pub fn history_window(&self) -> Duration {
        Duration::hours(self.history_window_hours)
    }
}
