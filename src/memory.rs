//! In-process store with the same contract as the Postgres one.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

use crate::engine::lock;
use crate::error::Result;
use crate::models::{
    Alert, AlertStatus, BatchContext, EventKind, PerceptionEvent, Report, RoomActivity,
    SessionStatus, StudentAttendance, TeachingSession,
};
use crate::store::{
    sort_alerts, ActivityLog, AlertFilter, AlertStore, AlertTransition, AttendanceSource,
    DedupKey, EventStore, Registry, ReportFilter, ReportStore,
};

#[derive(Default)]
struct MemoryState {
    events: Vec<PerceptionEvent>,
    alerts: Vec<Alert>,
    reports: Vec<Report>,
    room_batches: HashMap<String, String>,
    participants: HashMap<String, String>,
    batches: HashMap<String, BatchContext>,
    attendance: Vec<(String, StudentAttendance)>,
    sessions: Vec<TeachingSession>,
    activity: Vec<RoomActivity>,
    #[cfg(test)]
    failing_reads: bool,
    #[cfg(test)]
    failing_write_room: Option<String>,
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_room(&self, room_id: &str, batch_id: &str) {
        lock(&self.state)
            .room_batches
            .insert(room_id.to_string(), batch_id.to_string());
    }

    pub fn add_participant(&self, email: &str, name: &str) {
        lock(&self.state)
            .participants
            .insert(email.to_string(), name.to_string());
    }

    pub fn add_batch(&self, context: BatchContext) {
        lock(&self.state)
            .batches
            .insert(context.batch_id.clone(), context);
    }

    pub fn add_attendance(&self, email: &str, record: StudentAttendance) {
        lock(&self.state)
            .attendance
            .push((email.to_string(), record));
    }

    pub fn add_teaching_session(&self, session: TeachingSession) {
        lock(&self.state).sessions.push(session);
    }

    pub fn activity(&self) -> Vec<RoomActivity> {
        lock(&self.state).activity.clone()
    }

    pub fn alerts(&self) -> Vec<Alert> {
        lock(&self.state).alerts.clone()
    }

    #[cfg(test)]
    pub(crate) fn set_failing_reads(&self, failing: bool) {
        lock(&self.state).failing_reads = failing;
    }

    /// Makes event writes for `room_id` fail.
    #[cfg(test)]
    pub(crate) fn set_failing_writes_for(&self, room_id: &str) {
        lock(&self.state).failing_write_room = Some(room_id.to_string());
    }

    #[cfg(test)]
    fn check_write(&self, event: &PerceptionEvent) -> Result<()> {
        if lock(&self.state).failing_write_room.as_deref() == Some(event.room_id.as_str()) {
            return Err(sqlx::Error::PoolTimedOut.into());
        }
        Ok(())
    }

    #[cfg(not(test))]
    fn check_write(&self, _event: &PerceptionEvent) -> Result<()> {
        Ok(())
    }

    #[cfg(test)]
    fn check_reads(&self) -> Result<()> {
        if lock(&self.state).failing_reads {
            return Err(sqlx::Error::PoolTimedOut.into());
        }
        Ok(())
    }

    #[cfg(not(test))]
    fn check_reads(&self) -> Result<()> {
        Ok(())
    }

    fn events_where(&self, keep: impl Fn(&PerceptionEvent) -> bool) -> Vec<PerceptionEvent> {
        let mut events: Vec<PerceptionEvent> = lock(&self.state)
            .events
            .iter()
            .filter(|event| keep(event))
            .cloned()
            .collect();
        events.sort_by_key(|event| event.created_at);
        events
    }
}

#[async_trait]
impl EventStore for MemoryStore {
    async fn insert_event(&self, event: &PerceptionEvent) -> Result<()> {
        self.check_write(event)?;
        lock(&self.state).events.push(event.clone());
        Ok(())
    }

    async fn sum_duration(
        &self,
        room_id: &str,
        participant_email: &str,
        kind: EventKind,
        since: DateTime<Utc>,
    ) -> Result<i64> {
        self.check_reads()?;
        Ok(lock(&self.state)
            .events
            .iter()
            .filter(|event| {
                event.room_id == room_id
                    && event.participant_email == participant_email
                    && event.kind == kind
                    && event.created_at >= since
            })
            .map(|event| i64::from(event.duration_seconds))
            .sum())
    }

    async fn room_events_since(
        &self,
        room_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<PerceptionEvent>> {
        self.check_reads()?;
        Ok(self.events_where(|event| event.room_id == room_id && event.created_at >= since))
    }

    async fn count_room_events(&self, room_id: &str) -> Result<i64> {
        self.check_reads()?;
        let count = lock(&self.state)
            .events
            .iter()
            .filter(|event| event.room_id == room_id)
            .count();
        Ok(count as i64)
    }

    async fn participant_events_between(
        &self,
        participant_email: &str,
        from: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<PerceptionEvent>> {
        self.check_reads()?;
        Ok(self.events_where(|event| {
            event.participant_email == participant_email
                && event.created_at >= from
                && event.created_at < until
        }))
    }

    async fn rooms_events_between(
        &self,
        room_ids: &[String],
        from: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<PerceptionEvent>> {
        self.check_reads()?;
        Ok(self.events_where(|event| {
            room_ids.contains(&event.room_id)
                && event.created_at >= from
                && event.created_at < until
        }))
    }
}

#[async_trait]
impl AlertStore for MemoryStore {
    async fn insert_alert_unless_recent(
        &self,
        alert: &Alert,
        key: &DedupKey,
        since: DateTime<Utc>,
    ) -> Result<bool> {
        let mut state = lock(&self.state);
        let duplicate = state.alerts.iter().any(|existing| {
            existing.status == AlertStatus::Active
                && existing.created_at >= since
                && key.covers(existing)
        });
        if duplicate {
            return Ok(false);
        }
        state.alerts.push(alert.clone());
        Ok(true)
    }

    async fn get_alert(&self, id: Uuid) -> Result<Option<Alert>> {
        Ok(lock(&self.state)
            .alerts
            .iter()
            .find(|alert| alert.id == id)
            .cloned())
    }

    async fn transition_alert(&self, id: Uuid, transition: &AlertTransition) -> Result<bool> {
        let mut state = lock(&self.state);
        match state
            .alerts
            .iter_mut()
            .find(|alert| alert.id == id && alert.status == AlertStatus::Active)
        {
            Some(alert) => {
                transition.apply(alert);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn list_alerts(&self, filter: &AlertFilter) -> Result<Vec<Alert>> {
        let mut alerts: Vec<Alert> = lock(&self.state)
            .alerts
            .iter()
            .filter(|alert| filter.matches(alert))
            .cloned()
            .collect();
        sort_alerts(&mut alerts, filter.order);
        Ok(alerts
            .into_iter()
            .skip(filter.offset)
            .take(filter.limit.unwrap_or(usize::MAX))
            .collect())
    }

    async fn count_alerts(&self, filter: &AlertFilter) -> Result<i64> {
        let count = lock(&self.state)
            .alerts
            .iter()
            .filter(|alert| filter.matches(alert))
            .count();
        Ok(count as i64)
    }
}

#[async_trait]
impl ReportStore for MemoryStore {
    async fn upsert_report(&self, report: &Report) -> Result<Uuid> {
        let mut state = lock(&self.state);
        let existing = state.reports.iter_mut().find(|stored| {
            stored.target_email == report.target_email
                && stored.kind == report.kind
                && stored.period_start == report.period_start
                && stored.period_end == report.period_end
        });
        match existing {
            Some(stored) => {
                let id = stored.id;
                *stored = Report {
                    id,
                    ..report.clone()
                };
                Ok(id)
            }
            None => {
                state.reports.push(report.clone());
                Ok(report.id)
            }
        }
    }

    async fn get_report(&self, id: Uuid) -> Result<Option<Report>> {
        Ok(lock(&self.state)
            .reports
            .iter()
            .find(|report| report.id == id)
            .cloned())
    }

    async fn list_reports(&self, filter: &ReportFilter) -> Result<Vec<Report>> {
        let mut reports: Vec<Report> = lock(&self.state)
            .reports
            .iter()
            .filter(|report| filter.matches(report))
            .cloned()
            .collect();
        reports.sort_by(|a, b| {
            b.period_start
                .cmp(&a.period_start)
                .then_with(|| b.created_at.cmp(&a.created_at))
        });
        Ok(reports
            .into_iter()
            .skip(filter.offset)
            .take(filter.limit.unwrap_or(usize::MAX))
            .collect())
    }

    async fn count_reports(&self, filter: &ReportFilter) -> Result<i64> {
        let count = lock(&self.state)
            .reports
            .iter()
            .filter(|report| filter.matches(report))
            .count();
        Ok(count as i64)
    }

    async fn mark_report_forwarded(&self, id: Uuid, at: DateTime<Utc>) -> Result<bool> {
        let mut state = lock(&self.state);
        match state.reports.iter_mut().find(|report| report.id == id) {
            Some(report) => {
                report.sent_to_guardian = true;
                report.sent_at = Some(at);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[async_trait]
impl Registry for MemoryStore {
    async fn room_batch(&self, room_id: &str) -> Result<Option<String>> {
        Ok(lock(&self.state).room_batches.get(room_id).cloned())
    }

    async fn participant_name(&self, email: &str) -> Result<Option<String>> {
        Ok(lock(&self.state).participants.get(email).cloned())
    }

    async fn batch_context(&self, batch_id: &str) -> Result<Option<BatchContext>> {
        Ok(lock(&self.state).batches.get(batch_id).cloned())
    }
}

#[async_trait]
impl AttendanceSource for MemoryStore {
    async fn student_attendance(
        &self,
        email: &str,
        from: NaiveDate,
        to: NaiveDate,
        batch_id: Option<&str>,
    ) -> Result<Vec<StudentAttendance>> {
        let state = lock(&self.state);
        let mut records: Vec<StudentAttendance> = state
            .attendance
            .iter()
            .filter(|(student, record)| {
                student == email
                    && record.scheduled_date >= from
                    && record.scheduled_date <= to
                    && batch_id.map_or(true, |batch| record.batch_id.as_deref() == Some(batch))
            })
            .map(|(_, record)| record.clone())
            .collect();

        // Batch sessions the student has no row for count as missed.
        if let Some(batch) = batch_id {
            for session in &state.sessions {
                let date = session.scheduled_start.date_naive();
                if session.batch_id.as_deref() != Some(batch)
                    || session.status == SessionStatus::Cancelled
                    || date < from
                    || date > to
                    || records
                        .iter()
                        .any(|record| record.session_id == session.session_id)
                {
                    continue;
                }
                records.push(StudentAttendance {
                    session_id: session.session_id.clone(),
                    room_id: session.room_id.clone(),
                    batch_id: session.batch_id.clone(),
                    scheduled_date: date,
                    attended: false,
                });
            }
        }
        records.sort_by_key(|record| record.scheduled_date);
        Ok(records)
    }

    async fn teaching_sessions(
        &self,
        teacher_email: &str,
        from: NaiveDate,
        to: NaiveDate,
        batch_id: Option<&str>,
    ) -> Result<Vec<TeachingSession>> {
        Ok(lock(&self.state)
            .sessions
            .iter()
            .filter(|session| {
                let date = session.scheduled_start.date_naive();
                session.teacher_email == teacher_email
                    && date >= from
                    && date <= to
                    && batch_id.map_or(true, |batch| session.batch_id.as_deref() == Some(batch))
            })
            .cloned()
            .collect())
    }
}

#[async_trait]
impl ActivityLog for MemoryStore {
    async fn record_activity(&self, entry: &RoomActivity) -> Result<()> {
        lock(&self.state).activity.push(entry.clone());
        Ok(())
    }
}
