use std::collections::BTreeSet;
use std::fmt::Write;

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::engine::Monitor;
use crate::error::{MonitorError, Result};
use crate::models::{
    display_name_from_email, AlertKind, CategoryMinutes, DailyAttention, DurationTotals,
    EventKind, PeriodKind, PerceptionEvent, Report, ReportKind, ReportMetrics, SessionStatus,
    StudentAttendance, StudentMetrics, TargetRole, TeacherMetrics, TeachingSession,
};
use crate::store::{AlertFilter, MonitorStore, ReportFilter};

#[derive(Debug, Clone, Deserialize)]
pub struct ReportRequest {
    pub target_email: String,
    pub role: TargetRole,
    pub period_kind: PeriodKind,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    #[serde(default)]
    pub batch_id: Option<String>,
    pub generated_by: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportPage {
    pub reports: Vec<Report>,
    pub total: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttentionBand {
    Excellent,
    Good,
    NeedsImprovement,
    Concerning,
}

pub fn attention_band(score: f64) -> AttentionBand {
    if score >= 80.0 {
        AttentionBand::Excellent
    } else if score >= 60.0 {
        AttentionBand::Good
    } else if score >= 40.0 {
        AttentionBand::NeedsImprovement
    } else {
        AttentionBand::Concerning
    }
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

fn percent(part: u32, whole: u32) -> f64 {
    if whole == 0 {
        0.0
    } else {
        round1(f64::from(part) / f64::from(whole) * 100.0)
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

fn plural(count: u32, one: &str, many: &str) -> String {
    if count == 1 {
        format!("{} {}", count, one)
    } else {
        format!("{} {}", count, many)
    }
}

/// `[start 00:00, end + 1 day 00:00)` in UTC.
pub fn period_bounds(start: NaiveDate, end: NaiveDate) -> (DateTime<Utc>, DateTime<Utc>) {
    let from = start.and_time(NaiveTime::MIN).and_utc();
    let until = (end + Duration::days(1)).and_time(NaiveTime::MIN).and_utc();
    (from, until)
}

pub fn student_metrics(
    attendance: &[StudentAttendance],
    events: &[PerceptionEvent],
    alert_count: u32,
    period_start: NaiveDate,
    period_end: NaiveDate,
) -> StudentMetrics {
    let sessions_scheduled = attendance.len() as u32;
    let sessions_attended = attendance.iter().filter(|record| record.attended).count() as u32;
    let totals = DurationTotals::from_events(events);

    let attention_trend = period_start
        .iter_days()
        .take_while(|date| *date <= period_end)
        .map(|date| {
            let day = DurationTotals::from_events(
                events.iter().filter(|event| event.created_at.date_naive() == date),
            );
            DailyAttention {
                date,
                attention_score: day.attentive_share().map(round1),
            }
        })
        .collect();

    StudentMetrics {
        sessions_scheduled,
        sessions_attended,
        attendance_rate: percent(sessions_attended, sessions_scheduled),
        average_attention_score: totals.attentive_share().map(round1).unwrap_or(0.0),
        minutes: CategoryMinutes {
            looking_away: round1(totals.minutes(EventKind::LookingAway)),
            eyes_closed: round1(totals.minutes(EventKind::EyesClosed)),
            not_in_frame: round1(totals.minutes(EventKind::NotInFrame)),
            distracted: round1(totals.minutes(EventKind::Distracted)),
            phone_detected: round1(totals.minutes(EventKind::PhoneDetected)),
            low_engagement: round1(totals.minutes(EventKind::LowEngagement)),
            multiple_faces: round1(totals.minutes(EventKind::MultipleFaces)),
        },
        hand_raise_count: events
            .iter()
            .filter(|event| event.kind == EventKind::HandRaised)
            .count() as u32,
        alert_count,
        attention_trend,
    }
}

pub fn student_narrative(name: &str, metrics: &StudentMetrics) -> String {
    let mut sentences = Vec::new();

    if metrics.sessions_scheduled == 0 {
        sentences.push(format!("No sessions were scheduled for {} in this period.", name));
    } else {
        sentences.push(format!(
            "{} attended {} of {} scheduled sessions ({:.0}% attendance).",
            name, metrics.sessions_attended, metrics.sessions_scheduled, metrics.attendance_rate
        ));
    }

    let score = metrics.average_attention_score;
    sentences.push(match attention_band(score) {
        AttentionBand::Excellent => format!(
            "Attention was excellent, averaging {:.0}% of monitored time.",
            score
        ),
        AttentionBand::Good => format!("Attention was good overall at {:.0}%.", score),
        AttentionBand::NeedsImprovement => {
            format!("Attention needs improvement, averaging {:.0}%.", score)
        }
        AttentionBand::Concerning => format!(
            "Attention was concerning at {:.0}%; a follow-up conversation is recommended.",
            score
        ),
    });

    if metrics.minutes.eyes_closed > 5.0 {
        sentences.push(format!(
            "Signs of drowsiness were observed for {:.0} minutes.",
            metrics.minutes.eyes_closed
        ));
    }
    if metrics.minutes.looking_away > 10.0 {
        sentences.push(format!(
            "{} looked away from the screen for {:.0} minutes.",
            name, metrics.minutes.looking_away
        ));
    }
    if metrics.minutes.distracted > 10.0 {
        sentences.push(format!(
            "Distractions accounted for {:.0} minutes of class time.",
            metrics.minutes.distracted
        ));
    }
    if metrics.hand_raise_count > 0 {
        sentences.push(format!(
            "{} raised a hand {} to participate.",
            name,
            plural(metrics.hand_raise_count, "time", "times")
        ));
    }

    sentences.join(" ")
}

/// `teacher_email`'s own events in `room_events` are excluded from the
/// engagement figure.
pub fn teacher_metrics(
    teacher_email: &str,
    sessions: &[TeachingSession],
    room_events: &[PerceptionEvent],
    camera_off_incidents: u32,
    late_grace_minutes: i64,
) -> TeacherMetrics {
    let sessions_scheduled = sessions.len() as u32;
    let conducted: Vec<&TeachingSession> = sessions
        .iter()
        .filter(|session| session.status == SessionStatus::Conducted)
        .collect();
    let sessions_cancelled = sessions
        .iter()
        .filter(|session| session.status == SessionStatus::Cancelled)
        .count() as u32;

    let mut delays = Vec::new();
    let mut durations = Vec::new();
    let mut late_starts = 0u32;
    let mut total_late_minutes = 0.0;
    for session in &conducted {
        let Some(started) = session.actual_start else {
            continue;
        };
        let delay = ((started - session.scheduled_start).num_seconds() as f64 / 60.0).max(0.0);
        delays.push(delay);
        if delay > late_grace_minutes as f64 {
            late_starts += 1;
            total_late_minutes += delay;
        }
        if let Some(ended) = session.ended_at {
            durations.push(((ended - started).num_seconds() as f64 / 60.0).max(0.0));
        }
    }

    let on_time_rate = if sessions_scheduled == 0 {
        100.0
    } else {
        percent(sessions_scheduled.saturating_sub(late_starts), sessions_scheduled)
    };

    let student_totals = DurationTotals::from_events(
        room_events
            .iter()
            .filter(|event| event.participant_email != teacher_email),
    );

    let batches_taught: BTreeSet<String> = conducted
        .iter()
        .filter_map(|session| session.batch_id.clone())
        .collect();

    TeacherMetrics {
        sessions_scheduled,
        sessions_conducted: conducted.len() as u32,
        sessions_cancelled,
        average_start_delay_minutes: round1(mean(&delays)),
        on_time_rate,
        average_class_minutes: round1(mean(&durations)),
        average_student_engagement: student_totals.attentive_share().map(round1).unwrap_or(0.0),
        camera_off_incidents,
        total_teaching_hours: round1(durations.iter().sum::<f64>() / 60.0),
        late_starts,
        total_late_minutes: round1(total_late_minutes),
        batches_taught: batches_taught.into_iter().collect(),
    }
}

pub fn teacher_narrative(name: &str, metrics: &TeacherMetrics) -> String {
    let mut sentences = Vec::new();

    if metrics.sessions_scheduled == 0 {
        sentences.push(format!("No sessions were scheduled for {} in this period.", name));
    } else {
        sentences.push(format!(
            "{} conducted {} of {} scheduled sessions, totalling {:.1} teaching hours.",
            name,
            metrics.sessions_conducted,
            metrics.sessions_scheduled,
            metrics.total_teaching_hours
        ));
    }

    if metrics.sessions_cancelled > 0 {
        let verb = if metrics.sessions_cancelled == 1 { "was" } else { "were" };
        sentences.push(format!(
            "{} {} cancelled.",
            plural(metrics.sessions_cancelled, "session", "sessions"),
            verb
        ));
    }

    if metrics.late_starts == 0 {
        sentences.push(format!(
            "All sessions started on time ({:.0}% on-time rate).",
            metrics.on_time_rate
        ));
    } else {
        sentences.push(format!(
            "{} started late, {:.0} minutes in total ({:.0}% on-time rate).",
            plural(metrics.late_starts, "session", "sessions"),
            metrics.total_late_minutes,
            metrics.on_time_rate
        ));
    }

    let engagement = metrics.average_student_engagement;
    sentences.push(match attention_band(engagement) {
        AttentionBand::Excellent => format!(
            "Student engagement in these classes was excellent at {:.0}%.",
            engagement
        ),
        AttentionBand::Good => format!("Student engagement was good at {:.0}%.", engagement),
        AttentionBand::NeedsImprovement => format!(
            "Student engagement needs improvement at {:.0}%.",
            engagement
        ),
        AttentionBand::Concerning => format!(
            "Student engagement was concerning at {:.0}%.",
            engagement
        ),
    });

    sentences.join(" ")
}

impl<S: MonitorStore> Monitor<S> {
    /// Aggregates the period and stores the report, replacing an earlier one
    /// for the same (target, kind, period). Returns the stored report's id.
    pub async fn generate_report(&self, request: ReportRequest) -> Result<Uuid> {
        let target_email = request.target_email.trim().to_string();
        if target_email.is_empty() {
            return Err(MonitorError::validation("target_email is required"));
        }
        if request.period_end < request.period_start {
            return Err(MonitorError::validation(format!(
                "period_end {} is before period_start {}",
                request.period_end, request.period_start
            )));
        }

        let (from, until) = period_bounds(request.period_start, request.period_end);
        let batch_id = request.batch_id.as_deref();
        let target_name = self
            .store
            .participant_name(&target_email)
            .await?
            .unwrap_or_else(|| display_name_from_email(&target_email));

        let (metrics, summary) = match request.role {
            TargetRole::Student => {
                let attendance = self
                    .store
                    .student_attendance(
                        &target_email,
                        request.period_start,
                        request.period_end,
                        batch_id,
                    )
                    .await?;
                let events = self
                    .store
                    .participant_events_between(&target_email, from, until)
                    .await?;
                let alert_count = self
                    .store
                    .count_alerts(&AlertFilter {
                        target_email: Some(target_email.clone()),
                        batch_id: request.batch_id.clone(),
                        created_from: Some(from),
                        created_until: Some(until),
                        ..Default::default()
                    })
                    .await?;
                let metrics = student_metrics(
                    &attendance,
                    &events,
                    alert_count as u32,
                    request.period_start,
                    request.period_end,
                );
                let summary = student_narrative(&target_name, &metrics);
                (ReportMetrics::Student(metrics), summary)
            }
            TargetRole::Teacher => {
                let sessions = self
                    .store
                    .teaching_sessions(
                        &target_email,
                        request.period_start,
                        request.period_end,
                        batch_id,
                    )
                    .await?;
                let rooms: Vec<String> = sessions
                    .iter()
                    .map(|session| session.room_id.clone())
                    .collect::<BTreeSet<_>>()
                    .into_iter()
                    .collect();
                let (room_events, camera_off) = if rooms.is_empty() {
                    (Vec::new(), 0)
                } else {
                    let events = self.store.rooms_events_between(&rooms, from, until).await?;
                    let camera_off = self
                        .store
                        .count_alerts(&AlertFilter {
                            kind: Some(AlertKind::TeacherCameraOff),
                            room_ids: rooms.clone(),
                            target_or_room_wide: Some(target_email.clone()),
                            created_from: Some(from),
                            created_until: Some(until),
                            ..Default::default()
                        })
                        .await?;
                    (events, camera_off)
                };
                let metrics = teacher_metrics(
                    &target_email,
                    &sessions,
                    &room_events,
                    camera_off as u32,
                    self.config.late_grace_minutes,
                );
                let summary = teacher_narrative(&target_name, &metrics);
                (ReportMetrics::Teacher(metrics), summary)
            }
        };

        let context = match batch_id {
            Some(batch) => self.store.batch_context(batch).await?,
            None => None,
        };
        let report = Report {
            id: Uuid::new_v4(),
            kind: ReportKind {
                role: request.role,
                period: request.period_kind,
            },
            period_start: request.period_start,
            period_end: request.period_end,
            target_email,
            target_name,
            batch_id: request.batch_id,
            grade: context.as_ref().and_then(|c| c.grade.clone()),
            section: context.and_then(|c| c.section),
            metrics,
            summary,
            sent_to_guardian: false,
            sent_at: None,
            generated_by: request.generated_by,
            created_at: self.clock.now(),
        };

        let id = self.store.upsert_report(&report).await?;
        info!(
            report_id = %id,
            kind = %report.kind,
            target = %report.target_email,
            period_start = %report.period_start,
            period_end = %report.period_end,
            "Report generated"
        );
        Ok(id)
    }

    pub async fn get_report(&self, id: Uuid) -> Result<Option<Report>> {
        self.store.get_report(id).await
    }

    /// Like `get_report`, but a missing report is an error.
    pub async fn require_report(&self, id: Uuid) -> Result<Report> {
        self.store
            .get_report(id)
            .await?
            .ok_or_else(|| MonitorError::NotFound(format!("report {}", id)))
    }

    pub async fn list_reports(&self, filter: ReportFilter) -> Result<ReportPage> {
        let total = self.store.count_reports(&filter).await?;
        let reports = self.store.list_reports(&filter).await?;
        Ok(ReportPage { reports, total })
    }

    /// Records that the report went out to the guardian.
    pub async fn mark_forwarded(&self, id: Uuid) -> Result<()> {
        if self.store.mark_report_forwarded(id, self.clock.now()).await? {
            Ok(())
        } else {
            Err(MonitorError::NotFound(format!("report {}", id)))
        }
    }
}

pub fn render_markdown(report: &Report) -> String {
    let mut output = String::new();

    let _ = writeln!(
        output,
        "# {} report: {}",
        title_case(report.kind.role.as_str()),
        report.target_name
    );
    let _ = writeln!(
        output,
        "{} period {} to {} ({})",
        title_case(report.kind.period.as_str()),
        report.period_start,
        report.period_end,
        report.target_email
    );
    if let Some(batch) = &report.batch_id {
        let grade = report.grade.as_deref().unwrap_or("-");
        let section = report.section.as_deref().unwrap_or("-");
        let _ = writeln!(output, "Batch {} (grade {}, section {})", batch, grade, section);
    }
    let _ = writeln!(output);
    let _ = writeln!(output, "## Summary");
    let _ = writeln!(output, "{}", report.summary);
    let _ = writeln!(output);
    let _ = writeln!(output, "## Metrics");

    match &report.metrics {
        ReportMetrics::Student(m) => {
            let _ = writeln!(
                output,
                "- Attendance: {}/{} sessions ({:.1}%)",
                m.sessions_attended, m.sessions_scheduled, m.attendance_rate
            );
            let _ = writeln!(output, "- Average attention: {:.1}%", m.average_attention_score);
            let _ = writeln!(output, "- Eyes closed: {:.1} min", m.minutes.eyes_closed);
            let _ = writeln!(output, "- Looking away: {:.1} min", m.minutes.looking_away);
            let _ = writeln!(output, "- Out of frame: {:.1} min", m.minutes.not_in_frame);
            let _ = writeln!(output, "- Distracted: {:.1} min", m.minutes.distracted);
            let _ = writeln!(output, "- Phone use: {:.1} min", m.minutes.phone_detected);
            let _ = writeln!(output, "- Hand raises: {}", m.hand_raise_count);
            let _ = writeln!(output, "- Alerts: {}", m.alert_count);

            let _ = writeln!(output);
            let _ = writeln!(output, "## Daily Attention");
            for day in &m.attention_trend {
                match day.attention_score {
                    Some(score) => {
                        let _ = writeln!(output, "- {}: {:.1}%", day.date, score);
                    }
                    None => {
                        let _ = writeln!(output, "- {}: no data", day.date);
                    }
                }
            }
        }
        ReportMetrics::Teacher(m) => {
            let _ = writeln!(
                output,
                "- Sessions: {} conducted, {} cancelled, {} scheduled",
                m.sessions_conducted, m.sessions_cancelled, m.sessions_scheduled
            );
            let _ = writeln!(output, "- On-time rate: {:.1}%", m.on_time_rate);
            let _ = writeln!(
                output,
                "- Late starts: {} ({:.1} min total, {:.1} min average delay)",
                m.late_starts, m.total_late_minutes, m.average_start_delay_minutes
            );
            let _ = writeln!(output, "- Average class length: {:.1} min", m.average_class_minutes);
            let _ = writeln!(output, "- Teaching hours: {:.1}", m.total_teaching_hours);
            let _ = writeln!(output, "- Student engagement: {:.1}%", m.average_student_engagement);
            let _ = writeln!(output, "- Camera-off incidents: {}", m.camera_off_incidents);
            if m.batches_taught.is_empty() {
                let _ = writeln!(output, "- Batches taught: none");
            } else {
                let _ = writeln!(output, "- Batches taught: {}", m.batches_taught.join(", "));
            }
        }
    }

    if report.sent_to_guardian {
        let _ = writeln!(output);
        match report.sent_at {
            Some(at) => {
                let _ = writeln!(output, "Forwarded to guardian on {}.", at.date_naive());
            }
            None => {
                let _ = writeln!(output, "Forwarded to guardian.");
            }
        }
    }

    output
}

fn title_case(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use crate::models::{BatchContext, Severity};
    use crate::store::EventStore;
    use crate::testutil::{fixture, stored_event, ROOM, STUDENT, TEACHER};
    use crate::threshold::TeacherAlertRequest;
    use chrono::TimeZone;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, d).unwrap()
    }

    fn at(d: u32, hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, d, hour, minute, 0).unwrap()
    }

    fn attendance(d: u32, attended: bool) -> StudentAttendance {
        StudentAttendance {
            session_id: format!("s-{}", d),
            room_id: ROOM.to_string(),
            batch_id: Some("batch-7a".to_string()),
            scheduled_date: day(d),
            attended,
        }
    }

    fn session(
        d: u32,
        status: SessionStatus,
        delay_minutes: i64,
        length_minutes: i64,
    ) -> TeachingSession {
        let scheduled_start = at(d, 9, 0);
        let actual_start = (status == SessionStatus::Conducted)
            .then(|| scheduled_start + Duration::minutes(delay_minutes));
        TeachingSession {
            session_id: format!("t-{}", d),
            room_id: ROOM.to_string(),
            batch_id: Some("batch-7a".to_string()),
            teacher_email: TEACHER.to_string(),
            scheduled_start,
            actual_start,
            ended_at: actual_start.map(|start| start + Duration::minutes(length_minutes)),
            status,
        }
    }

    #[test]
    fn attendance_rate_scenarios() {
        let records: Vec<_> = (1..=10).map(|d| attendance(d, d <= 8)).collect();
        let metrics = student_metrics(&records, &[], 0, day(1), day(10));
        assert_eq!(metrics.attendance_rate, 80.0);
        assert_eq!(metrics.average_attention_score, 0.0);

        let empty = student_metrics(&[], &[], 0, day(1), day(10));
        assert_eq!(empty.attendance_rate, 0.0);
    }

    #[test]
    fn on_time_rate_scenarios() {
        let mut sessions: Vec<_> = (1..=8)
            .map(|d| session(d, SessionStatus::Conducted, 2, 60))
            .collect();
        sessions.push(session(9, SessionStatus::Conducted, 12, 45));
        sessions.push(session(10, SessionStatus::Conducted, 20, 40));
        let metrics = teacher_metrics(TEACHER, &sessions, &[], 0, 5);
        assert_eq!(metrics.late_starts, 2);
        assert_eq!(metrics.on_time_rate, 80.0);
        assert_eq!(metrics.total_late_minutes, 32.0);
        assert_eq!(metrics.average_start_delay_minutes, 4.8);

        let idle = teacher_metrics(TEACHER, &[], &[], 0, 5);
        assert_eq!(idle.on_time_rate, 100.0);
        assert_eq!(idle.total_teaching_hours, 0.0);
    }

    #[test]
    fn teacher_metrics_count_sessions_hours_and_batches() {
        let sessions = vec![
            session(2, SessionStatus::Conducted, 0, 60),
            session(3, SessionStatus::Conducted, 0, 30),
            session(4, SessionStatus::Cancelled, 0, 0),
            session(5, SessionStatus::Scheduled, 0, 0),
        ];
        let events = vec![
            stored_event(STUDENT, EventKind::Attentive, 300, at(2, 9, 10)),
            stored_event(STUDENT, EventKind::LookingAway, 100, at(2, 9, 20)),
            stored_event(TEACHER, EventKind::LookingAway, 900, at(2, 9, 30)),
        ];
        let metrics = teacher_metrics(TEACHER, &sessions, &events, 1, 5);
        assert_eq!(metrics.sessions_scheduled, 4);
        assert_eq!(metrics.sessions_conducted, 2);
        assert_eq!(metrics.sessions_cancelled, 1);
        assert_eq!(metrics.average_class_minutes, 45.0);
        assert_eq!(metrics.total_teaching_hours, 1.5);
        assert_eq!(metrics.average_student_engagement, 75.0);
        assert_eq!(metrics.batches_taught, vec!["batch-7a".to_string()]);
        assert_eq!(metrics.camera_off_incidents, 1);
    }

    #[test]
    fn trend_has_one_entry_per_day() {
        let events = vec![
            stored_event(STUDENT, EventKind::Attentive, 90, at(1, 10, 0)),
            stored_event(STUDENT, EventKind::EyesClosed, 10, at(1, 10, 5)),
            stored_event(STUDENT, EventKind::Attentive, 60, at(3, 10, 0)),
        ];
        let metrics = student_metrics(&[], &events, 0, day(1), day(3));
        let scores: Vec<_> = metrics.attention_trend.iter().map(|d| d.attention_score).collect();
        assert_eq!(scores, vec![Some(90.0), None, Some(100.0)]);
        assert_eq!(metrics.average_attention_score, 93.8);
    }

    #[test]
    fn bands_follow_thresholds() {
        assert_eq!(attention_band(80.0), AttentionBand::Excellent);
        assert_eq!(attention_band(79.9), AttentionBand::Good);
        assert_eq!(attention_band(60.0), AttentionBand::Good);
        assert_eq!(attention_band(40.0), AttentionBand::NeedsImprovement);
        assert_eq!(attention_band(39.9), AttentionBand::Concerning);
    }

    #[test]
    fn student_narrative_adds_conditional_sentences() {
        let records: Vec<_> = (1..=10).map(|d| attendance(d, d <= 8)).collect();
        let events = vec![
            stored_event(STUDENT, EventKind::Attentive, 1900, at(2, 9, 0)),
            stored_event(STUDENT, EventKind::EyesClosed, 420, at(2, 9, 30)),
            stored_event(STUDENT, EventKind::LookingAway, 660, at(2, 9, 40)),
            stored_event(STUDENT, EventKind::HandRaised, 0, at(2, 9, 50)),
            stored_event(STUDENT, EventKind::HandRaised, 0, at(2, 9, 55)),
        ];
        let metrics = student_metrics(&records, &events, 1, day(1), day(10));
        let text = student_narrative("Asha", &metrics);

        assert!(text.starts_with("Asha attended 8 of 10 scheduled sessions (80% attendance)."));
        assert!(text.contains("Attention was good overall at 64%."));
        assert!(text.contains("Signs of drowsiness were observed for 7 minutes."));
        assert!(text.contains("Asha looked away from the screen for 11 minutes."));
        assert!(!text.contains("Distractions"));
        assert!(text.ends_with("Asha raised a hand 2 times to participate."));
    }

    #[test]
    fn quiet_student_narrative_is_short() {
        let metrics = student_metrics(&[], &[], 0, day(1), day(1));
        assert_eq!(
            student_narrative("Ravi", &metrics),
            "No sessions were scheduled for Ravi in this period. \
             Attention was concerning at 0%; a follow-up conversation is recommended."
        );
    }

    #[test]
    fn teacher_narrative_mentions_cancellations_and_lateness() {
        let sessions = vec![
            session(2, SessionStatus::Conducted, 15, 60),
            session(3, SessionStatus::Cancelled, 0, 0),
        ];
        let events = vec![stored_event(STUDENT, EventKind::Attentive, 600, at(2, 9, 30))];
        let metrics = teacher_metrics(TEACHER, &sessions, &events, 0, 5);
        let text = teacher_narrative("Meera", &metrics);
        assert!(text.starts_with(
            "Meera conducted 1 of 2 scheduled sessions, totalling 1.0 teaching hours."
        ));
        assert!(text.contains("1 session was cancelled."));
        assert!(text.contains("1 session started late, 15 minutes in total (50% on-time rate)."));
        assert!(text.ends_with("Student engagement in these classes was excellent at 100%."));
    }

    #[tokio::test]
    async fn student_report_is_stored_and_regeneration_replaces_it() {
        let (monitor, clock) = fixture();
        clock.set(at(11, 8, 0));
        let store = monitor.store();
        store.add_batch(BatchContext {
            batch_id: "batch-7a".to_string(),
            grade: Some("7".to_string()),
            section: Some("A".to_string()),
        });
        for d in 1..=10 {
            store.add_attendance(STUDENT, attendance(d, d <= 8));
        }
        store
            .insert_event(&stored_event(STUDENT, EventKind::Attentive, 600, at(2, 9, 0)))
            .await
            .unwrap();

        let request = ReportRequest {
            target_email: STUDENT.to_string(),
            role: TargetRole::Student,
            period_kind: PeriodKind::Weekly,
            period_start: day(1),
            period_end: day(10),
            batch_id: Some("batch-7a".to_string()),
            generated_by: "scheduler".to_string(),
        };
        let id = monitor.generate_report(request.clone()).await.unwrap();
        monitor.mark_forwarded(id).await.unwrap();

        let report = monitor.require_report(id).await.unwrap();
        assert_eq!(report.target_name, "Asha Kumar");
        assert_eq!(report.grade.as_deref(), Some("7"));
        assert!(report.sent_to_guardian);
        match &report.metrics {
            ReportMetrics::Student(m) => {
                assert_eq!(m.attendance_rate, 80.0);
                assert_eq!(m.average_attention_score, 100.0);
            }
            other => panic!("unexpected metrics {:?}", other),
        }

        let again = monitor.generate_report(request).await.unwrap();
        assert_eq!(again, id);
        let page = monitor
            .list_reports(ReportFilter {
                target_email: Some(STUDENT.to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(page.total, 1);
        assert!(!page.reports[0].sent_to_guardian);

        let markdown = render_markdown(&page.reports[0]);
        assert!(markdown.starts_with("# Student report: Asha Kumar"));
        assert!(markdown.contains("- Attendance: 8/10 sessions (80.0%)"));
    }

    async fn camera_off(monitor: &Monitor<MemoryStore>, teacher: Option<&str>) {
        monitor
            .raise_teacher_alert(TeacherAlertRequest {
                room_id: ROOM.to_string(),
                session_id: None,
                teacher_email: teacher.map(str::to_string),
                teacher_name: None,
                kind: AlertKind::TeacherCameraOff,
                severity: Severity::Warning,
                title: None,
                message: "Camera off".to_string(),
                notify_coordinator: true,
                notify_academic_operator: true,
                notify_teacher: false,
            })
            .await
            .unwrap()
            .unwrap();
    }

    async fn daily_teacher_metrics(monitor: &Monitor<MemoryStore>) -> TeacherMetrics {
        let id = monitor
            .generate_report(ReportRequest {
                target_email: TEACHER.to_string(),
                role: TargetRole::Teacher,
                period_kind: PeriodKind::Daily,
                period_start: day(2),
                period_end: day(2),
                batch_id: None,
                generated_by: "scheduler".to_string(),
            })
            .await
            .unwrap();
        let report = monitor.get_report(id).await.unwrap().unwrap();
        assert_eq!(report.kind.to_string(), "teacher_daily");
        match report.metrics {
            ReportMetrics::Teacher(m) => m,
            other => panic!("unexpected metrics {:?}", other),
        }
    }

    #[tokio::test]
    async fn teacher_report_counts_camera_off_alerts_in_their_rooms() {
        let (monitor, clock) = fixture();
        monitor
            .store()
            .add_teaching_session(session(2, SessionStatus::Conducted, 0, 60));
        clock.set(at(2, 9, 20));
        camera_off(&monitor, Some(TEACHER)).await;

        let metrics = daily_teacher_metrics(&monitor).await;
        assert_eq!(metrics.camera_off_incidents, 1);
        assert_eq!(metrics.sessions_conducted, 1);
    }

    #[tokio::test]
    async fn shared_room_camera_off_counts_only_this_teacher() {
        let (monitor, clock) = fixture();
        monitor
            .store()
            .add_teaching_session(session(2, SessionStatus::Conducted, 0, 60));
        clock.set(at(2, 9, 20));
        camera_off(&monitor, None).await;
        camera_off(&monitor, Some("arjun.rao@school.org")).await;

        let metrics = daily_teacher_metrics(&monitor).await;
        assert_eq!(metrics.camera_off_incidents, 1);
    }

    #[tokio::test]
    async fn batch_sessions_without_an_attendance_row_count_as_missed() {
        let (monitor, _clock) = fixture();
        let store = monitor.store();
        for d in 2..=5 {
            let status = if d == 4 {
                SessionStatus::Cancelled
            } else {
                SessionStatus::Conducted
            };
            let mut scheduled = session(d, status, 0, 60);
            scheduled.session_id = format!("s-{}", d);
            store.add_teaching_session(scheduled);
        }
        store.add_attendance(STUDENT, attendance(2, true));
        store.add_attendance(STUDENT, attendance(3, true));

        let id = monitor
            .generate_report(ReportRequest {
                target_email: STUDENT.to_string(),
                role: TargetRole::Student,
                period_kind: PeriodKind::Weekly,
                period_start: day(2),
                period_end: day(6),
                batch_id: Some("batch-7a".to_string()),
                generated_by: "scheduler".to_string(),
            })
            .await
            .unwrap();
        match monitor.require_report(id).await.unwrap().metrics {
            ReportMetrics::Student(m) => {
                assert_eq!(m.sessions_scheduled, 3);
                assert_eq!(m.sessions_attended, 2);
            }
            other => panic!("unexpected metrics {:?}", other),
        }
    }

    #[tokio::test]
    async fn unknown_report_ids_are_not_found() {
        let (monitor, _clock) = fixture();
        let missing = Uuid::new_v4();
        assert!(matches!(
            monitor.require_report(missing).await,
            Err(MonitorError::NotFound(_))
        ));
        assert!(matches!(
            monitor.mark_forwarded(missing).await,
            Err(MonitorError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn rejects_inverted_periods() {
        let (monitor, _clock) = fixture();
        let result = monitor
            .generate_report(ReportRequest {
                target_email: STUDENT.to_string(),
                role: TargetRole::Student,
                period_kind: PeriodKind::Daily,
                period_start: day(5),
                period_end: day(4),
                batch_id: None,
                generated_by: "scheduler".to_string(),
            })
            .await;
        assert!(matches!(result, Err(MonitorError::Validation(_))));
    }
}
