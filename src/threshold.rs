use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{TeacherDedupScope, ThresholdRule};
use crate::engine::Monitor;
use crate::error::{MonitorError, Result};
use crate::models::{
    display_name_from_email, Alert, AlertKind, AlertStatus, PerceptionEvent, RoomActivity,
    Severity,
};
use crate::store::{DedupKey, MonitorStore};

/// Whole minutes for alert text, rounded half away from zero.
pub fn rounded_minutes(total_seconds: i64) -> i64 {
    (total_seconds as f64 / 60.0).round() as i64
}

pub fn student_alert_text(kind: AlertKind, name: &str, minutes: i64) -> (String, String) {
    let title = format!("{} — {}", kind.default_title(), name);
    let message = match kind {
        AlertKind::StudentSleeping => format!(
            "{} appears to be sleeping (eyes closed for {} minutes)",
            name, minutes
        ),
        AlertKind::StudentNotLooking => format!(
            "{} has been looking away from the screen for {} minutes",
            name, minutes
        ),
        AlertKind::StudentLeftFrame => {
            format!("{} has been out of the camera frame for {} minutes", name, minutes)
        }
        AlertKind::StudentDistracted => {
            format!("{} has been distracted for {} minutes", name, minutes)
        }
        AlertKind::PhoneDetected => {
            format!("{} has been using a phone for {} minutes", name, minutes)
        }
        other => format!("{} for {} ({} minutes)", other.default_title(), name, minutes),
    };
    (title, message)
}

/// Builds the alert a crossed threshold should raise.
pub fn build_student_alert(
    event: &PerceptionEvent,
    rule: &ThresholdRule,
    total_seconds: i64,
    batch_id: Option<String>,
    now: DateTime<Utc>,
) -> Alert {
    let (title, message) = student_alert_text(
        rule.alert_kind,
        &event.participant_name,
        rounded_minutes(total_seconds),
    );
    Alert {
        id: Uuid::new_v4(),
        room_id: Some(event.room_id.clone()),
        session_id: event.session_id.clone(),
        batch_id,
        kind: rule.alert_kind,
        severity: rule.severity,
        title,
        message,
        target_email: Some(event.participant_email.clone()),
        target_name: Some(event.participant_name.clone()),
        notify_coordinator: true,
        notify_academic_operator: true,
        notify_teacher: true,
        status: AlertStatus::Active,
        dismissed_by: None,
        dismissed_at: None,
        resolved_at: None,
        created_at: now,
    }
}

fn default_true() -> bool {
    true
}

/// Explicit alert about the teacher or the class as a whole.
#[derive(Debug, Clone, Deserialize)]
pub struct TeacherAlertRequest {
    pub room_id: String,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub teacher_email: Option<String>,
    #[serde(default)]
    pub teacher_name: Option<String>,
    pub kind: AlertKind,
    pub severity: Severity,
    #[serde(default)]
    pub title: Option<String>,
    pub message: String,
    #[serde(default = "default_true")]
    pub notify_coordinator: bool,
    #[serde(default = "default_true")]
    pub notify_academic_operator: bool,
    #[serde(default)]
    pub notify_teacher: bool,
}

impl<S: MonitorStore> Monitor<S> {
    /// Decides whether `event` pushes its (room, participant, kind) over the
    /// configured threshold. Returns the alert only when a new one was written.
    pub async fn evaluate(&self, event: &PerceptionEvent) -> Result<Option<Alert>> {
        if event.kind.is_positive() {
            return Ok(None);
        }
        let Some(rule) = self.config.rule_for(event.kind) else {
            return Ok(None);
        };

        let now = self.clock.now();
        let total = self
            .store
            .sum_duration(
                &event.room_id,
                &event.participant_email,
                event.kind,
                now - self.config.event_window(),
            )
            .await?;
        if total < rule.threshold_seconds {
            return Ok(None);
        }

        let batch_id = self.store.room_batch(&event.room_id).await?;
        let alert = build_student_alert(event, rule, total, batch_id, now);
        let key = DedupKey::for_alert(&alert);
        let written = self
            .store
            .insert_alert_unless_recent(&alert, &key, now - self.config.suppression_window())
            .await?;
        if !written {
            debug!(
                room_id = %event.room_id,
                participant = %event.participant_email,
                alert_kind = %alert.kind,
                "Suppressed duplicate alert"
            );
            return Ok(None);
        }

        info!(
            room_id = %event.room_id,
            participant = %event.participant_email,
            alert_kind = %alert.kind,
            total_seconds = total,
            "Alert raised"
        );
        self.mirror_activity(&alert, now).await;
        Ok(Some(alert))
    }

    /// Raises a teacher-side alert supplied directly by the caller. Returns
    /// `None` when an equivalent active alert exists inside the suppression
    /// window.
    pub async fn raise_teacher_alert(&self, request: TeacherAlertRequest) -> Result<Option<Alert>> {
        if request.room_id.trim().is_empty() {
            return Err(MonitorError::validation("room_id is required"));
        }
        if request.message.trim().is_empty() {
            return Err(MonitorError::validation("message is required"));
        }
        if !request.kind.is_teacher_side() {
            return Err(MonitorError::validation(format!(
                "{} alerts are raised by threshold evaluation",
                request.kind
            )));
        }

        let now = self.clock.now();
        let target_name = match (&request.teacher_name, &request.teacher_email) {
            (Some(name), _) => Some(name.clone()),
            (None, Some(email)) => Some(
                self.store
                    .participant_name(email)
                    .await?
                    .unwrap_or_else(|| display_name_from_email(email)),
            ),
            (None, None) => None,
        };
        let alert = Alert {
            id: Uuid::new_v4(),
            room_id: Some(request.room_id.clone()),
            session_id: request.session_id,
            batch_id: self.store.room_batch(&request.room_id).await?,
            kind: request.kind,
            severity: request.severity,
            title: request
                .title
                .unwrap_or_else(|| request.kind.default_title().to_string()),
            message: request.message,
            target_email: request.teacher_email,
            target_name,
            notify_coordinator: request.notify_coordinator,
            notify_academic_operator: request.notify_academic_operator,
            notify_teacher: request.notify_teacher,
            status: AlertStatus::Active,
            dismissed_by: None,
            dismissed_at: None,
            resolved_at: None,
            created_at: now,
        };

        let key = match self.config.teacher_dedup_scope {
            TeacherDedupScope::Room => DedupKey::room_wide(&alert),
            TeacherDedupScope::RoomAndTeacher => DedupKey::for_alert(&alert),
        };
        let written = self
            .store
            .insert_alert_unless_recent(&alert, &key, now - self.config.suppression_window())
            .await?;
        if !written {
            debug!(
                room_id = %request.room_id,
                alert_kind = %alert.kind,
                "Suppressed duplicate teacher alert"
            );
            return Ok(None);
        }

        info!(room_id = %request.room_id, alert_kind = %alert.kind, "Teacher alert raised");
        self.mirror_activity(&alert, now).await;
        Ok(Some(alert))
    }

    async fn mirror_activity(&self, alert: &Alert, now: DateTime<Utc>) {
        let Some(room_id) = alert.room_id.clone() else {
            return;
        };
        let entry = RoomActivity {
            room_id,
            activity: format!("monitoring_{}", alert.kind),
            participant_email: alert.target_email.clone(),
            summary: alert.title.clone(),
            created_at: now,
        };
        if let Err(err) = self.store.record_activity(&entry).await {
            warn!(
                error = %err,
                room_id = %entry.room_id,
                "Failed to mirror alert to room activity"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MonitorConfig;
    use crate::models::EventKind;
    use crate::testutil::{event, fixture, fixture_with, ingest_one, ROOM, STUDENT};
    use chrono::Duration;

    #[test]
    fn minutes_round_half_up() {
        assert_eq!(rounded_minutes(150), 3);
        assert_eq!(rounded_minutes(120), 2);
        assert_eq!(rounded_minutes(89), 1);
    }

    #[test]
    fn sleeping_text_names_the_student() {
        let (title, message) = student_alert_text(AlertKind::StudentSleeping, "Asha", 3);
        assert_eq!(title, "Student Sleeping — Asha");
        assert_eq!(message, "Asha appears to be sleeping (eyes closed for 3 minutes)");
    }

    #[tokio::test]
    async fn positive_signals_never_alert() {
        let (monitor, _clock) = fixture();
        for kind in [EventKind::Attentive, EventKind::HandRaised, EventKind::Speaking] {
            for _ in 0..20 {
                let stored = ingest_one(&monitor, event(kind, 600)).await;
                assert!(monitor.evaluate(&stored).await.unwrap().is_none());
            }
        }
        assert!(monitor.store().alerts().is_empty());
    }

    #[tokio::test]
    async fn eyes_closed_for_150_seconds_raises_one_critical_alert() {
        let (monitor, clock) = fixture();
        let outcome = monitor
            .ingest(vec![event(EventKind::EyesClosed, 90)])
            .await
            .unwrap();
        assert_eq!(outcome.alerts_generated, 0);

        clock.advance(Duration::seconds(30));
        let outcome = monitor
            .ingest(vec![event(EventKind::EyesClosed, 60)])
            .await
            .unwrap();
        assert_eq!(outcome.alerts_generated, 1);

        let alerts = monitor.store().alerts();
        assert_eq!(alerts.len(), 1);
        let alert = &alerts[0];
        assert_eq!(alert.kind, AlertKind::StudentSleeping);
        assert_eq!(alert.severity, Severity::Critical);
        assert_eq!(alert.target_email.as_deref(), Some(STUDENT));
        assert_eq!(alert.batch_id.as_deref(), Some("batch-7a"));
        assert!(alert.message.contains("3 minutes"));
        assert!(alert.notify_coordinator && alert.notify_academic_operator && alert.notify_teacher);
        assert_eq!(monitor.store().activity().len(), 1);
    }

    #[tokio::test]
    async fn sustained_condition_keeps_a_single_alert_for_thirty_minutes() {
        let (monitor, clock) = fixture();
        for _ in 0..28 {
            monitor
                .ingest(vec![event(EventKind::EyesClosed, 60)])
                .await
                .unwrap();
            clock.advance(Duration::minutes(1));
        }
        let active: Vec<_> = monitor
            .store()
            .alerts()
            .into_iter()
            .filter(|a| a.kind == AlertKind::StudentSleeping && a.status == AlertStatus::Active)
            .collect();
        assert_eq!(active.len(), 1);

        clock.advance(Duration::minutes(4));
        let outcome = monitor
            .ingest(vec![event(EventKind::EyesClosed, 60)])
            .await
            .unwrap();
        assert_eq!(outcome.alerts_generated, 1);
        assert_eq!(monitor.store().alerts().len(), 2);
    }

    #[tokio::test]
    async fn concurrent_evaluations_write_one_alert() {
        let (monitor, _clock) = fixture();
        let first = ingest_one(&monitor, event(EventKind::EyesClosed, 70)).await;
        let second = ingest_one(&monitor, event(EventKind::EyesClosed, 70)).await;

        let (a, b) = tokio::join!(monitor.evaluate(&first), monitor.evaluate(&second));
        let raised = [a.unwrap(), b.unwrap()].into_iter().flatten().count();
        assert_eq!(raised, 1);
        assert_eq!(monitor.store().alerts().len(), 1);
    }

    #[tokio::test]
    async fn durations_outside_the_window_do_not_count() {
        let (monitor, clock) = fixture();
        monitor
            .ingest(vec![event(EventKind::LookingAway, 200)])
            .await
            .unwrap();
        clock.advance(Duration::minutes(11));
        let outcome = monitor
            .ingest(vec![event(EventKind::LookingAway, 100)])
            .await
            .unwrap();
        assert_eq!(outcome.alerts_generated, 0);
    }

    #[tokio::test]
    async fn kinds_accumulate_separately() {
        let (monitor, _clock) = fixture();
        let outcome = monitor
            .ingest(vec![
                event(EventKind::LookingAway, 100),
                event(EventKind::NotInFrame, 100),
                event(EventKind::Distracted, 100),
            ])
            .await
            .unwrap();
        assert_eq!(outcome.alerts_generated, 0);
    }

    #[tokio::test]
    async fn unmapped_negative_kinds_do_not_alert() {
        let (monitor, _clock) = fixture();
        let outcome = monitor
            .ingest(vec![
                event(EventKind::LowEngagement, 900),
                event(EventKind::MultipleFaces, 900),
            ])
            .await
            .unwrap();
        assert_eq!(outcome.inserted, 2);
        assert_eq!(outcome.alerts_generated, 0);
    }

    #[tokio::test]
    async fn injected_thresholds_replace_the_table() {
        let mut config = MonitorConfig::default();
        config.thresholds = vec![ThresholdRule {
            event_kind: EventKind::MultipleFaces,
            alert_kind: AlertKind::ContactViolation,
            severity: Severity::Info,
            threshold_seconds: 30,
        }];
        let (monitor, _clock) = fixture_with(config);
        let outcome = monitor
            .ingest(vec![
                event(EventKind::MultipleFaces, 45),
                event(EventKind::EyesClosed, 600),
            ])
            .await
            .unwrap();
        assert_eq!(outcome.alerts_generated, 1);
        assert_eq!(monitor.store().alerts()[0].kind, AlertKind::ContactViolation);
    }

    fn camera_off(teacher: Option<&str>) -> TeacherAlertRequest {
        TeacherAlertRequest {
            room_id: ROOM.to_string(),
            session_id: None,
            teacher_email: teacher.map(str::to_string),
            teacher_name: None,
            kind: AlertKind::TeacherCameraOff,
            severity: Severity::Warning,
            title: None,
            message: "Teacher camera has been off for 5 minutes".to_string(),
            notify_coordinator: true,
            notify_academic_operator: true,
            notify_teacher: false,
        }
    }

    #[tokio::test]
    async fn teacher_alerts_dedup_per_teacher_by_default() {
        let (monitor, _clock) = fixture();
        let first = monitor
            .raise_teacher_alert(camera_off(Some("meera@school.org")))
            .await
            .unwrap();
        let repeat = monitor
            .raise_teacher_alert(camera_off(Some("meera@school.org")))
            .await
            .unwrap();
        let co_teacher = monitor
            .raise_teacher_alert(camera_off(Some("arjun@school.org")))
            .await
            .unwrap();

        let first = first.unwrap();
        assert_eq!(first.title, "Teacher Camera Off");
        assert_eq!(first.target_name.as_deref(), Some("Meera"));
        assert!(repeat.is_none());
        assert!(co_teacher.is_some());
    }

    #[tokio::test]
    async fn room_scope_dedups_across_teachers() {
        let mut config = MonitorConfig::default();
        config.teacher_dedup_scope = TeacherDedupScope::Room;
        let (monitor, clock) = fixture_with(config);
        assert!(monitor
            .raise_teacher_alert(camera_off(Some("meera@school.org")))
            .await
            .unwrap()
            .is_some());
        assert!(monitor
            .raise_teacher_alert(camera_off(Some("arjun@school.org")))
            .await
            .unwrap()
            .is_none());

        clock.advance(Duration::minutes(31));
        assert!(monitor
            .raise_teacher_alert(camera_off(Some("arjun@school.org")))
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn teacher_entry_point_rejects_student_kinds() {
        let (monitor, _clock) = fixture();
        let mut request = camera_off(None);
        request.kind = AlertKind::StudentSleeping;
        let result = monitor.raise_teacher_alert(request).await;
        assert!(matches!(result, Err(MonitorError::Validation(_))));
    }
}
