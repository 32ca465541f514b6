//! Storage seams for the engine.
//!
//! The event ledger, alert store and report store are owned by this crate.
//! `Registry`, `AttendanceSource` and `ActivityLog` front data that belongs to
//! the surrounding product; the engine only reads from (or appends to) them.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

use crate::error::Result;
use crate::models::{
    Alert, AlertKind, AlertStatus, BatchContext, EventKind, NotifyRole, PerceptionEvent,
    PeriodKind, Report, ReportKind, RoomActivity, Severity, StudentAttendance, TargetRole,
    TeachingSession,
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AlertOrder {
    #[default]
    Newest,
    /// critical, warning, info; newest first within a severity.
    SeverityThenNewest,
}

#[derive(Debug, Clone, Default)]
pub struct AlertFilter {
    pub status: Option<AlertStatus>,
    pub visible_to: Option<NotifyRole>,
    /// Empty means any room.
    pub room_ids: Vec<String>,
    pub batch_id: Option<String>,
    pub kind: Option<AlertKind>,
    pub target_email: Option<String>,
    /// Alerts aimed at this participant, or at the room as a whole.
    pub target_or_room_wide: Option<String>,
    pub created_from: Option<DateTime<Utc>>,
    /// Exclusive.
    pub created_until: Option<DateTime<Utc>>,
    pub order: AlertOrder,
    pub offset: usize,
    pub limit: Option<usize>,
}

impl AlertFilter {
    pub fn matches(&self, alert: &Alert) -> bool {
        if self.status.is_some_and(|status| alert.status != status) {
            return false;
        }
        if self.visible_to.is_some_and(|role| !alert.is_visible_to(role)) {
            return false;
        }
        if !self.room_ids.is_empty()
            && !alert
                .room_id
                .as_ref()
                .is_some_and(|room| self.room_ids.contains(room))
        {
            return false;
        }
        if self.batch_id.is_some() && alert.batch_id != self.batch_id {
            return false;
        }
        if self.kind.is_some_and(|kind| alert.kind != kind) {
            return false;
        }
        if self.target_email.is_some() && alert.target_email != self.target_email {
            return false;
        }
        if let Some(target) = &self.target_or_room_wide {
            if alert.target_email.as_ref().is_some_and(|email| email != target) {
                return false;
            }
        }
        if self.created_from.is_some_and(|from| alert.created_at < from) {
            return false;
        }
        if self.created_until.is_some_and(|until| alert.created_at >= until) {
            return false;
        }
        true
    }
}

/// Orders alerts the way `order` asks, in place.
pub fn sort_alerts(alerts: &mut [Alert], order: AlertOrder) {
    match order {
        AlertOrder::Newest => alerts.sort_by(|a, b| b.created_at.cmp(&a.created_at)),
        AlertOrder::SeverityThenNewest => alerts.sort_by(|a, b| {
            b.severity
                .cmp(&a.severity)
                .then_with(|| b.created_at.cmp(&a.created_at))
        }),
    }
}

/// Identity an alert is deduplicated on. `target_email == None` means the
/// key covers the whole room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DedupKey {
    pub room_id: Option<String>,
    pub target_email: Option<String>,
    pub kind: AlertKind,
}

impl DedupKey {
    pub fn for_alert(alert: &Alert) -> Self {
        Self {
            room_id: alert.room_id.clone(),
            target_email: alert.target_email.clone(),
            kind: alert.kind,
        }
    }

    pub fn room_wide(alert: &Alert) -> Self {
        Self {
            target_email: None,
            ..Self::for_alert(alert)
        }
    }

    /// Text used to serialize writers that share this key.
    pub fn lock_key(&self) -> String {
        format!(
            "{}|{}|{}",
            self.room_id.as_deref().unwrap_or("-"),
            self.target_email.as_deref().unwrap_or("*"),
            self.kind
        )
    }

    pub fn covers(&self, alert: &Alert) -> bool {
        alert.kind == self.kind
            && alert.room_id == self.room_id
            && (self.target_email.is_none() || alert.target_email == self.target_email)
    }
}

/// Moves an alert out of `active`.
#[derive(Debug, Clone, PartialEq)]
pub struct AlertTransition {
    pub to: AlertStatus,
    pub actor: Option<String>,
    pub at: DateTime<Utc>,
}

impl AlertTransition {
    pub fn dismissed(actor: &str, at: DateTime<Utc>) -> Self {
        Self {
            to: AlertStatus::Dismissed,
            actor: Some(actor.to_string()),
            at,
        }
    }

    pub fn resolved(at: DateTime<Utc>) -> Self {
        Self {
            to: AlertStatus::Resolved,
            actor: None,
            at,
        }
    }

    pub fn apply(&self, alert: &mut Alert) {
        alert.status = self.to;
        match self.to {
            AlertStatus::Dismissed => {
                alert.dismissed_by = self.actor.clone();
                alert.dismissed_at = Some(self.at);
            }
            AlertStatus::Resolved => alert.resolved_at = Some(self.at),
            AlertStatus::Active | AlertStatus::Escalated => {}
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ReportFilter {
    pub kind: Option<ReportKind>,
    pub period_kind: Option<PeriodKind>,
    pub target_role: Option<TargetRole>,
    pub target_email: Option<String>,
    pub batch_id: Option<String>,
    /// Reports whose period starts on or after this date.
    pub period_from: Option<NaiveDate>,
    /// Reports whose period ends on or before this date.
    pub period_until: Option<NaiveDate>,
    pub offset: usize,
    pub limit: Option<usize>,
}

impl ReportFilter {
    pub fn matches(&self, report: &Report) -> bool {
        if self.kind.is_some_and(|kind| report.kind != kind) {
            return false;
        }
        if self.period_kind.is_some_and(|period| report.kind.period != period) {
            return false;
        }
        if self.target_role.is_some_and(|role| report.kind.role != role) {
            return false;
        }
        if self.target_email.is_some()
            && Some(&report.target_email) != self.target_email.as_ref()
        {
            return false;
        }
        if self.batch_id.is_some() && report.batch_id != self.batch_id {
            return false;
        }
        if self.period_from.is_some_and(|from| report.period_start < from) {
            return false;
        }
        if self.period_until.is_some_and(|until| report.period_end > until) {
            return false;
        }
        true
    }
}

/// Append-only perception ledger. Reads return rows oldest first, ties broken
/// by insertion order.
#[async_trait]
pub trait EventStore: Send + Sync {
    async fn insert_event(&self, event: &PerceptionEvent) -> Result<()>;

    async fn sum_duration(
        &self,
        room_id: &str,
        participant_email: &str,
        kind: EventKind,
        since: DateTime<Utc>,
    ) -> Result<i64>;

    async fn room_events_since(
        &self,
        room_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<PerceptionEvent>>;

    async fn count_room_events(&self, room_id: &str) -> Result<i64>;

    async fn participant_events_between(
        &self,
        participant_email: &str,
        from: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<PerceptionEvent>>;

    async fn rooms_events_between(
        &self,
        room_ids: &[String],
        from: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<PerceptionEvent>>;
}

#[async_trait]
pub trait AlertStore: Send + Sync {
    /// Inserts `alert` unless an active alert covered by `key` was created at
    /// or after `since`. Check and insert are atomic. Returns whether the alert
    /// was written.
    async fn insert_alert_unless_recent(
        &self,
        alert: &Alert,
        key: &DedupKey,
        since: DateTime<Utc>,
    ) -> Result<bool>;

    async fn get_alert(&self, id: Uuid) -> Result<Option<Alert>>;

    /// Applies `transition` only if the alert is currently active.
    async fn transition_alert(&self, id: Uuid, transition: &AlertTransition) -> Result<bool>;

    async fn list_alerts(&self, filter: &AlertFilter) -> Result<Vec<Alert>>;

    /// Ignores `offset`, `limit` and `order`.
    async fn count_alerts(&self, filter: &AlertFilter) -> Result<i64>;
}

#[async_trait]
pub trait ReportStore: Send + Sync {
    /// Writes `report`, replacing any existing report for the same
    /// (target, kind, period). Returns the id of the stored row.
    async fn upsert_report(&self, report: &Report) -> Result<Uuid>;

    async fn get_report(&self, id: Uuid) -> Result<Option<Report>>;

    async fn list_reports(&self, filter: &ReportFilter) -> Result<Vec<Report>>;

    async fn count_reports(&self, filter: &ReportFilter) -> Result<i64>;

    async fn mark_report_forwarded(&self, id: Uuid, at: DateTime<Utc>) -> Result<bool>;
}

/// Room, batch and participant identity owned by the scheduling side.
#[async_trait]
pub trait Registry: Send + Sync {
    async fn room_batch(&self, room_id: &str) -> Result<Option<String>>;

    async fn participant_name(&self, email: &str) -> Result<Option<String>>;

    async fn batch_context(&self, batch_id: &str) -> Result<Option<BatchContext>>;
}

/// Session attendance owned by the attendance subsystem. Date bounds are
/// inclusive.
#[async_trait]
pub trait AttendanceSource: Send + Sync {
    async fn student_attendance(
        &self,
        email: &str,
        from: NaiveDate,
        to: NaiveDate,
        batch_id: Option<&str>,
    ) -> Result<Vec<StudentAttendance>>;

    async fn teaching_sessions(
        &self,
        teacher_email: &str,
        from: NaiveDate,
        to: NaiveDate,
        batch_id: Option<&str>,
    ) -> Result<Vec<TeachingSession>>;
}

/// Generic room activity feed shared with other features.
#[async_trait]
pub trait ActivityLog: Send + Sync {
    async fn record_activity(&self, entry: &RoomActivity) -> Result<()>;
}

pub trait MonitorStore:
    EventStore + AlertStore + ReportStore + Registry + AttendanceSource + ActivityLog
{
}

impl<T> MonitorStore for T where
    T: EventStore + AlertStore + ReportStore + Registry + AttendanceSource + ActivityLog
{
}

/// Stored next to `severity` so SQL can order by it.
pub fn severity_rank(severity: Severity) -> i16 {
    match severity {
        Severity::Info => 0,
        Severity::Warning => 1,
        Severity::Critical => 2,
    }
}
