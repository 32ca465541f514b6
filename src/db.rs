use std::str::FromStr;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, QueryBuilder, Row};
use uuid::Uuid;

use crate::error::{MonitorError, Result};
use crate::models::{
    Alert, AlertStatus, BatchContext, EventDetails, EventKind, PerceptionEvent, Report,
    ReportKind, ReportMetrics, RoomActivity, StudentAttendance, TeachingSession,
};
use crate::store::{
    severity_rank, ActivityLog, AlertFilter, AlertOrder, AlertStore, AlertTransition,
    AttendanceSource, DedupKey, EventStore, Registry, ReportFilter, ReportStore,
};

const EVENT_COLUMNS: &str = "id, room_id, session_id, participant_email, participant_name, \
     kind, confidence, duration_seconds, details, created_at";

const ALERT_COLUMNS: &str = "id, room_id, session_id, batch_id, kind, severity, title, message, \
     target_email, target_name, notify_coordinator, notify_academic_operator, notify_teacher, \
     status, dismissed_by, dismissed_at, resolved_at, created_at";

const REPORT_COLUMNS: &str = "id, report_kind, period_start, period_end, target_email, \
     target_name, batch_id, grade, section, metrics, summary, sent_to_guardian, sent_at, \
     generated_by, created_at";

/// Postgres-backed store for the ledger, alerts and reports, plus read access
/// to the registry and attendance tables.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(10))
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

pub async fn init_db(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

fn parse_text<T>(row: &PgRow, column: &'static str) -> Result<T>
where
    T: FromStr<Err = String>,
{
    let value: String = row.try_get(column)?;
    let parsed: std::result::Result<T, String> = value.parse();
    match parsed {
        Ok(parsed) => Ok(parsed),
        Err(_) => Err(MonitorError::Corrupt { column, value }),
    }
}

fn event_from_row(row: &PgRow) -> Result<PerceptionEvent> {
    let Json(details): Json<EventDetails> = row.try_get("details")?;
    Ok(PerceptionEvent {
        id: row.try_get("id")?,
        room_id: row.try_get("room_id")?,
        session_id: row.try_get("session_id")?,
        participant_email: row.try_get("participant_email")?,
        participant_name: row.try_get("participant_name")?,
        kind: parse_text(row, "kind")?,
        confidence: row.try_get("confidence")?,
        duration_seconds: row.try_get("duration_seconds")?,
        details,
        created_at: row.try_get("created_at")?,
    })
}

fn alert_from_row(row: &PgRow) -> Result<Alert> {
    Ok(Alert {
        id: row.try_get("id")?,
        room_id: row.try_get("room_id")?,
        session_id: row.try_get("session_id")?,
        batch_id: row.try_get("batch_id")?,
        kind: parse_text(row, "kind")?,
        severity: parse_text(row, "severity")?,
        title: row.try_get("title")?,
        message: row.try_get("message")?,
        target_email: row.try_get("target_email")?,
        target_name: row.try_get("target_name")?,
        notify_coordinator: row.try_get("notify_coordinator")?,
        notify_academic_operator: row.try_get("notify_academic_operator")?,
        notify_teacher: row.try_get("notify_teacher")?,
        status: parse_text(row, "status")?,
        dismissed_by: row.try_get("dismissed_by")?,
        dismissed_at: row.try_get("dismissed_at")?,
        resolved_at: row.try_get("resolved_at")?,
        created_at: row.try_get("created_at")?,
    })
}

fn report_from_row(row: &PgRow) -> Result<Report> {
    let Json(metrics): Json<ReportMetrics> = row.try_get("metrics")?;
    let kind: ReportKind = parse_text(row, "report_kind")?;
    Ok(Report {
        id: row.try_get("id")?,
        kind,
        period_start: row.try_get("period_start")?,
        period_end: row.try_get("period_end")?,
        target_email: row.try_get("target_email")?,
        target_name: row.try_get("target_name")?,
        batch_id: row.try_get("batch_id")?,
        grade: row.try_get("grade")?,
        section: row.try_get("section")?,
        metrics,
        summary: row.try_get("summary")?,
        sent_to_guardian: row.try_get("sent_to_guardian")?,
        sent_at: row.try_get("sent_at")?,
        generated_by: row.try_get("generated_by")?,
        created_at: row.try_get("created_at")?,
    })
}

fn push_alert_filter(builder: &mut QueryBuilder<'_, Postgres>, filter: &AlertFilter) {
    builder.push(" WHERE TRUE");
    if let Some(status) = filter.status {
        builder.push(" AND status = ").push_bind(status.as_str());
    }
    if let Some(role) = filter.visible_to {
        builder.push(match role {
            crate::models::NotifyRole::Coordinator => " AND notify_coordinator",
            crate::models::NotifyRole::AcademicOperator => " AND notify_academic_operator",
            crate::models::NotifyRole::Teacher => " AND notify_teacher",
        });
    }
    if !filter.room_ids.is_empty() {
        builder
            .push(" AND room_id = ANY(")
            .push_bind(filter.room_ids.clone())
            .push(")");
    }
    if let Some(batch_id) = &filter.batch_id {
        builder.push(" AND batch_id = ").push_bind(batch_id.clone());
    }
    if let Some(kind) = filter.kind {
        builder.push(" AND kind = ").push_bind(kind.as_str());
    }
    if let Some(target) = &filter.target_email {
        builder.push(" AND target_email = ").push_bind(target.clone());
    }
    if let Some(target) = &filter.target_or_room_wide {
        builder
            .push(" AND (target_email IS NULL OR target_email = ")
            .push_bind(target.clone())
            .push(")");
    }
    if let Some(from) = filter.created_from {
        builder.push(" AND created_at >= ").push_bind(from);
    }
    if let Some(until) = filter.created_until {
        builder.push(" AND created_at < ").push_bind(until);
    }
}

fn push_report_filter(builder: &mut QueryBuilder<'_, Postgres>, filter: &ReportFilter) {
    builder.push(" WHERE TRUE");
    if let Some(kind) = filter.kind {
        builder.push(" AND report_kind = ").push_bind(kind.to_string());
    }
    if let Some(period) = filter.period_kind {
        builder.push(" AND period_kind = ").push_bind(period.as_str());
    }
    if let Some(role) = filter.target_role {
        builder.push(" AND target_role = ").push_bind(role.as_str());
    }
    if let Some(target) = &filter.target_email {
        builder.push(" AND target_email = ").push_bind(target.clone());
    }
    if let Some(batch_id) = &filter.batch_id {
        builder.push(" AND batch_id = ").push_bind(batch_id.clone());
    }
    if let Some(from) = filter.period_from {
        builder.push(" AND period_start >= ").push_bind(from);
    }
    if let Some(until) = filter.period_until {
        builder.push(" AND period_end <= ").push_bind(until);
    }
}

/// Postgres rejects negative LIMIT and OFFSET values.
fn page_bound(value: usize) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn push_page(builder: &mut QueryBuilder<'_, Postgres>, offset: usize, limit: Option<usize>) {
    if let Some(limit) = limit {
        builder.push(" LIMIT ").push_bind(page_bound(limit));
    }
    if offset > 0 {
        builder.push(" OFFSET ").push_bind(page_bound(offset));
    }
}

#[async_trait]
impl EventStore for PgStore {
    async fn insert_event(&self, event: &PerceptionEvent) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO class_monitor.perception_events
            (id, room_id, session_id, participant_email, participant_name,
             kind, confidence, duration_seconds, details, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(event.id)
        .bind(&event.room_id)
        .bind(event.session_id.as_deref())
        .bind(&event.participant_email)
        .bind(&event.participant_name)
        .bind(event.kind.as_str())
        .bind(event.confidence)
        .bind(event.duration_seconds)
        .bind(Json(&event.details))
        .bind(event.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn sum_duration(
        &self,
        room_id: &str,
        participant_email: &str,
        kind: EventKind,
        since: DateTime<Utc>,
    ) -> Result<i64> {
        let total: i64 = sqlx::query_scalar(
            r#"
            SELECT COALESCE(SUM(duration_seconds), 0)::BIGINT
            FROM class_monitor.perception_events
            WHERE room_id = $1 AND participant_email = $2 AND kind = $3 AND created_at >= $4
            "#,
        )
        .bind(room_id)
        .bind(participant_email)
        .bind(kind.as_str())
        .bind(since)
        .fetch_one(&self.pool)
        .await?;
        Ok(total)
    }

    async fn room_events_since(
        &self,
        room_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<PerceptionEvent>> {
        let query = format!(
            "SELECT {EVENT_COLUMNS} FROM class_monitor.perception_events \
             WHERE room_id = $1 AND created_at >= $2 ORDER BY created_at ASC, seq ASC"
        );
        let rows = sqlx::query(&query)
            .bind(room_id)
            .bind(since)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(event_from_row).collect()
    }

    async fn count_room_events(&self, room_id: &str) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM class_monitor.perception_events WHERE room_id = $1",
        )
        .bind(room_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    async fn participant_events_between(
        &self,
        participant_email: &str,
        from: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<PerceptionEvent>> {
        let query = format!(
            "SELECT {EVENT_COLUMNS} FROM class_monitor.perception_events \
             WHERE participant_email = $1 AND created_at >= $2 AND created_at < $3 \
             ORDER BY created_at ASC, seq ASC"
        );
        let rows = sqlx::query(&query)
            .bind(participant_email)
            .bind(from)
            .bind(until)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(event_from_row).collect()
    }

    async fn rooms_events_between(
        &self,
        room_ids: &[String],
        from: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<PerceptionEvent>> {
        let query = format!(
            "SELECT {EVENT_COLUMNS} FROM class_monitor.perception_events \
             WHERE room_id = ANY($1) AND created_at >= $2 AND created_at < $3 \
             ORDER BY created_at ASC, seq ASC"
        );
        let rows = sqlx::query(&query)
            .bind(room_ids)
            .bind(from)
            .bind(until)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(event_from_row).collect()
    }
}

#[async_trait]
impl AlertStore for PgStore {
    async fn insert_alert_unless_recent(
        &self,
        alert: &Alert,
        key: &DedupKey,
        since: DateTime<Utc>,
    ) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        // Writers for the same key queue here until the holder commits.
        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(key.lock_key())
            .execute(&mut *tx)
            .await?;

        let duplicate: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM class_monitor.alerts
                WHERE status = 'active'
                  AND kind = $1
                  AND room_id IS NOT DISTINCT FROM $2
                  AND ($3::TEXT IS NULL OR target_email = $3)
                  AND created_at >= $4
            )
            "#,
        )
        .bind(key.kind.as_str())
        .bind(key.room_id.as_deref())
        .bind(key.target_email.as_deref())
        .bind(since)
        .fetch_one(&mut *tx)
        .await?;

        if duplicate {
            tx.rollback().await?;
            return Ok(false);
        }

        sqlx::query(
            r#"
            INSERT INTO class_monitor.alerts
            (id, room_id, session_id, batch_id, kind, severity, severity_rank, title, message,
             target_email, target_name, notify_coordinator, notify_academic_operator,
             notify_teacher, status, dismissed_by, dismissed_at, resolved_at, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17,
                    $18, $19)
            "#,
        )
        .bind(alert.id)
        .bind(alert.room_id.as_deref())
        .bind(alert.session_id.as_deref())
        .bind(alert.batch_id.as_deref())
        .bind(alert.kind.as_str())
        .bind(alert.severity.as_str())
        .bind(severity_rank(alert.severity))
        .bind(&alert.title)
        .bind(&alert.message)
        .bind(alert.target_email.as_deref())
        .bind(alert.target_name.as_deref())
        .bind(alert.notify_coordinator)
        .bind(alert.notify_academic_operator)
        .bind(alert.notify_teacher)
        .bind(alert.status.as_str())
        .bind(alert.dismissed_by.as_deref())
        .bind(alert.dismissed_at)
        .bind(alert.resolved_at)
        .bind(alert.created_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(true)
    }

    async fn get_alert(&self, id: Uuid) -> Result<Option<Alert>> {
        let query = format!("SELECT {ALERT_COLUMNS} FROM class_monitor.alerts WHERE id = $1");
        let row = sqlx::query(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(alert_from_row).transpose()
    }

    async fn transition_alert(&self, id: Uuid, transition: &AlertTransition) -> Result<bool> {
        let result = match transition.to {
            AlertStatus::Dismissed => {
                sqlx::query(
                    "UPDATE class_monitor.alerts \
                     SET status = 'dismissed', dismissed_by = $2, dismissed_at = $3 \
                     WHERE id = $1 AND status = 'active'",
                )
                .bind(id)
                .bind(transition.actor.as_deref())
                .bind(transition.at)
                .execute(&self.pool)
                .await?
            }
            AlertStatus::Resolved => {
                sqlx::query(
                    "UPDATE class_monitor.alerts SET status = 'resolved', resolved_at = $2 \
                     WHERE id = $1 AND status = 'active'",
                )
                .bind(id)
                .bind(transition.at)
                .execute(&self.pool)
                .await?
            }
            other => {
                sqlx::query(
                    "UPDATE class_monitor.alerts SET status = $2 \
                     WHERE id = $1 AND status = 'active'",
                )
                .bind(id)
                .bind(other.as_str())
                .execute(&self.pool)
                .await?
            }
        };
        Ok(result.rows_affected() > 0)
    }

    async fn list_alerts(&self, filter: &AlertFilter) -> Result<Vec<Alert>> {
        let mut builder = QueryBuilder::<Postgres>::new(format!(
            "SELECT {ALERT_COLUMNS} FROM class_monitor.alerts"
        ));
        push_alert_filter(&mut builder, filter);
        builder.push(match filter.order {
            AlertOrder::Newest => " ORDER BY created_at DESC",
            AlertOrder::SeverityThenNewest => " ORDER BY severity_rank DESC, created_at DESC",
        });
        push_page(&mut builder, filter.offset, filter.limit);

        let rows = builder.build().fetch_all(&self.pool).await?;
        rows.iter().map(alert_from_row).collect()
    }

    async fn count_alerts(&self, filter: &AlertFilter) -> Result<i64> {
        let mut builder =
            QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM class_monitor.alerts");
        push_alert_filter(&mut builder, filter);
        let count: i64 = builder.build_query_scalar().fetch_one(&self.pool).await?;
        Ok(count)
    }
}

#[async_trait]
impl ReportStore for PgStore {
    async fn upsert_report(&self, report: &Report) -> Result<Uuid> {
        let id: Uuid = sqlx::query_scalar(
            r#"
            INSERT INTO class_monitor.reports
            (id, report_kind, target_role, period_kind, period_start, period_end,
             target_email, target_name, batch_id, grade, section, metrics, summary,
             sent_to_guardian, sent_at, generated_by, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
            ON CONFLICT (target_email, report_kind, period_start, period_end) DO UPDATE
            SET target_name = EXCLUDED.target_name,
                batch_id = EXCLUDED.batch_id,
                grade = EXCLUDED.grade,
                section = EXCLUDED.section,
                metrics = EXCLUDED.metrics,
                summary = EXCLUDED.summary,
                sent_to_guardian = FALSE,
                sent_at = NULL,
                generated_by = EXCLUDED.generated_by,
                created_at = EXCLUDED.created_at
            RETURNING id
            "#,
        )
        .bind(report.id)
        .bind(report.kind.to_string())
        .bind(report.kind.role.as_str())
        .bind(report.kind.period.as_str())
        .bind(report.period_start)
        .bind(report.period_end)
        .bind(&report.target_email)
        .bind(&report.target_name)
        .bind(report.batch_id.as_deref())
        .bind(report.grade.as_deref())
        .bind(report.section.as_deref())
        .bind(Json(&report.metrics))
        .bind(&report.summary)
        .bind(report.sent_to_guardian)
        .bind(report.sent_at)
        .bind(&report.generated_by)
        .bind(report.created_at)
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }

    async fn get_report(&self, id: Uuid) -> Result<Option<Report>> {
        let query = format!("SELECT {REPORT_COLUMNS} FROM class_monitor.reports WHERE id = $1");
        let row = sqlx::query(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(report_from_row).transpose()
    }

    async fn list_reports(&self, filter: &ReportFilter) -> Result<Vec<Report>> {
        let mut builder = QueryBuilder::<Postgres>::new(format!(
            "SELECT {REPORT_COLUMNS} FROM class_monitor.reports"
        ));
        push_report_filter(&mut builder, filter);
        builder.push(" ORDER BY period_start DESC, created_at DESC");
        push_page(&mut builder, filter.offset, filter.limit);

        let rows = builder.build().fetch_all(&self.pool).await?;
        rows.iter().map(report_from_row).collect()
    }

    async fn count_reports(&self, filter: &ReportFilter) -> Result<i64> {
        let mut builder =
            QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM class_monitor.reports");
        push_report_filter(&mut builder, filter);
        let count: i64 = builder.build_query_scalar().fetch_one(&self.pool).await?;
        Ok(count)
    }

    async fn mark_report_forwarded(&self, id: Uuid, at: DateTime<Utc>) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE class_monitor.reports SET sent_to_guardian = TRUE, sent_at = $2 WHERE id = $1",
        )
        .bind(id)
        .bind(at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl Registry for PgStore {
    async fn room_batch(&self, room_id: &str) -> Result<Option<String>> {
        let batch: Option<Option<String>> =
            sqlx::query_scalar("SELECT batch_id FROM class_monitor.rooms WHERE room_id = $1")
                .bind(room_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(batch.flatten())
    }

    async fn participant_name(&self, email: &str) -> Result<Option<String>> {
        let name: Option<String> =
            sqlx::query_scalar("SELECT full_name FROM class_monitor.participants WHERE email = $1")
                .bind(email)
                .fetch_optional(&self.pool)
                .await?;
        Ok(name)
    }

    async fn batch_context(&self, batch_id: &str) -> Result<Option<BatchContext>> {
        let row = sqlx::query(
            "SELECT batch_id, grade, section FROM class_monitor.batches WHERE batch_id = $1",
        )
        .bind(batch_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(BatchContext {
                batch_id: row.try_get("batch_id")?,
                grade: row.try_get("grade")?,
                section: row.try_get("section")?,
            })),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl AttendanceSource for PgStore {
    async fn student_attendance(
        &self,
        email: &str,
        from: NaiveDate,
        to: NaiveDate,
        batch_id: Option<&str>,
    ) -> Result<Vec<StudentAttendance>> {
        // With a batch, every non-cancelled batch session counts and a
        // missing attendance row means the student did not attend.
        let sql = match batch_id {
            Some(_) => {
                r#"
                SELECT s.session_id, s.room_id, s.batch_id,
                       (s.scheduled_start AT TIME ZONE 'UTC')::DATE AS scheduled_date,
                       COALESCE(a.attended, FALSE) AS attended
                FROM class_monitor.class_sessions s
                LEFT JOIN class_monitor.attendance a
                    ON a.session_id = s.session_id AND a.student_email = $1
                WHERE s.batch_id = $4
                  AND s.status <> 'cancelled'
                  AND (s.scheduled_start AT TIME ZONE 'UTC')::DATE BETWEEN $2 AND $3
                ORDER BY s.scheduled_start
                "#
            }
            None => {
                r#"
                SELECT s.session_id, s.room_id, s.batch_id,
                       (s.scheduled_start AT TIME ZONE 'UTC')::DATE AS scheduled_date,
                       a.attended
                FROM class_monitor.attendance a
                JOIN class_monitor.class_sessions s ON s.session_id = a.session_id
                WHERE a.student_email = $1
                  AND s.status <> 'cancelled'
                  AND (s.scheduled_start AT TIME ZONE 'UTC')::DATE BETWEEN $2 AND $3
                ORDER BY s.scheduled_start
                "#
            }
        };
        let mut query = sqlx::query(sql).bind(email).bind(from).bind(to);
        if let Some(batch) = batch_id {
            query = query.bind(batch);
        }
        let rows = query.fetch_all(&self.pool).await?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            records.push(StudentAttendance {
                session_id: row.try_get("session_id")?,
                room_id: row.try_get("room_id")?,
                batch_id: row.try_get("batch_id")?,
                scheduled_date: row.try_get("scheduled_date")?,
                attended: row.try_get("attended")?,
            });
        }
        Ok(records)
    }

    async fn teaching_sessions(
        &self,
        teacher_email: &str,
        from: NaiveDate,
        to: NaiveDate,
        batch_id: Option<&str>,
    ) -> Result<Vec<TeachingSession>> {
        let rows = sqlx::query(
            r#"
            SELECT session_id, room_id, batch_id, teacher_email,
                   scheduled_start, actual_start, ended_at, status
            FROM class_monitor.class_sessions
            WHERE teacher_email = $1
              AND (scheduled_start AT TIME ZONE 'UTC')::DATE BETWEEN $2 AND $3
              AND ($4::TEXT IS NULL OR batch_id = $4)
            ORDER BY scheduled_start
            "#,
        )
        .bind(teacher_email)
        .bind(from)
        .bind(to)
        .bind(batch_id)
        .fetch_all(&self.pool)
        .await?;

        let mut sessions = Vec::with_capacity(rows.len());
        for row in &rows {
            sessions.push(TeachingSession {
                session_id: row.try_get("session_id")?,
                room_id: row.try_get("room_id")?,
                batch_id: row.try_get("batch_id")?,
                teacher_email: row.try_get("teacher_email")?,
                scheduled_start: row.try_get("scheduled_start")?,
                actual_start: row.try_get("actual_start")?,
                ended_at: row.try_get("ended_at")?,
                status: parse_text(row, "status")?,
            });
        }
        Ok(sessions)
    }
}

#[async_trait]
impl ActivityLog for PgStore {
    async fn record_activity(&self, entry: &RoomActivity) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO class_monitor.room_activity
            (room_id, activity, participant_email, summary, created_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(&entry.room_id)
        .bind(&entry.activity)
        .bind(entry.participant_email.as_deref())
        .bind(&entry.summary)
        .bind(entry.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

/// Loads a small demo roster: one batch, its room, a teacher and three
/// students with a week of sessions.
pub async fn seed(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        INSERT INTO class_monitor.batches (batch_id, grade, section)
        VALUES ('batch-7a', '7', 'A')
        ON CONFLICT (batch_id) DO UPDATE SET grade = EXCLUDED.grade, section = EXCLUDED.section
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        INSERT INTO class_monitor.rooms (room_id, batch_id, title)
        VALUES ('room-7a-math', 'batch-7a', 'Grade 7A Mathematics')
        ON CONFLICT (room_id) DO UPDATE SET batch_id = EXCLUDED.batch_id, title = EXCLUDED.title
        "#,
    )
    .execute(pool)
    .await?;

    let people = vec![
        ("meera.iyer@school.org", "Meera Iyer", "teacher"),
        ("asha.kumar@school.org", "Asha Kumar", "student"),
        ("ravi.shah@school.org", "Ravi Shah", "student"),
        ("kiara.patel@school.org", "Kiara Patel", "student"),
    ];
    for (email, name, role) in &people {
        sqlx::query(
            r#"
            INSERT INTO class_monitor.participants (email, full_name, role)
            VALUES ($1, $2, $3)
            ON CONFLICT (email) DO UPDATE SET full_name = EXCLUDED.full_name, role = EXCLUDED.role
            "#,
        )
        .bind(email)
        .bind(name)
        .bind(role)
        .execute(pool)
        .await?;
    }

    for day in 2..=6 {
        let session_id = format!("seed-7a-math-2026-03-0{day}");
        let scheduled = Utc
            .with_ymd_and_hms(2026, 3, day, 9, 0, 0)
            .single()
            .context("invalid seed date")?;
        let (status, delay_minutes) = match day {
            4 => ("cancelled", None),
            5 => ("conducted", Some(12)),
            _ => ("conducted", Some(1)),
        };
        let actual_start =
            delay_minutes.map(|minutes| scheduled + chrono::Duration::minutes(minutes));
        let ended_at = actual_start.map(|start| start + chrono::Duration::minutes(50));

        sqlx::query(
            r#"
            INSERT INTO class_monitor.class_sessions
            (session_id, room_id, batch_id, teacher_email,
             scheduled_start, actual_start, ended_at, status)
            VALUES ($1, 'room-7a-math', 'batch-7a', 'meera.iyer@school.org', $2, $3, $4, $5)
            ON CONFLICT (session_id) DO NOTHING
            "#,
        )
        .bind(&session_id)
        .bind(scheduled)
        .bind(actual_start)
        .bind(ended_at)
        .bind(status)
        .execute(pool)
        .await?;

        for (email, _, role) in &people {
            if *role != "student" {
                continue;
            }
            let attended = !(*email == "ravi.shah@school.org" && day == 6);
            sqlx::query(
                r#"
                INSERT INTO class_monitor.attendance (session_id, student_email, attended)
                VALUES ($1, $2, $3)
                ON CONFLICT (session_id, student_email) DO NOTHING
                "#,
            )
            .bind(&session_id)
            .bind(email)
            .bind(attended)
            .execute(pool)
            .await?;
        }
    }

    Ok(())
}
