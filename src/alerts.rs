use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::engine::Monitor;
use crate::error::{MonitorError, Result};
use crate::models::{Alert, AlertKind, AlertStatus, NotifyRole};
use crate::store::{AlertFilter, AlertOrder, AlertTransition, MonitorStore};

#[derive(Debug, Clone, Deserialize)]
pub struct RoleAlertQuery {
    pub role: NotifyRole,
    #[serde(default)]
    pub batch_id: Option<String>,
    #[serde(default)]
    pub room_id: Option<String>,
    #[serde(default)]
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct HistoryQuery {
    #[serde(default)]
    pub room_id: Option<String>,
    #[serde(default)]
    pub batch_id: Option<String>,
    #[serde(default)]
    pub kind: Option<AlertKind>,
    #[serde(default)]
    pub offset: Option<usize>,
    #[serde(default)]
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertPage {
    pub alerts: Vec<Alert>,
    pub total: i64,
}

impl<S: MonitorStore> Monitor<S> {
    /// active -> dismissed. `false` if the alert is missing or not active.
    pub async fn dismiss(&self, alert_id: Uuid, actor: &str) -> Result<bool> {
        if actor.trim().is_empty() {
            return Err(MonitorError::validation("actor is required"));
        }
        let transition = AlertTransition::dismissed(actor, self.clock.now());
        let changed = self.store.transition_alert(alert_id, &transition).await?;
        if changed {
            info!(alert_id = %alert_id, actor, "Alert dismissed");
        } else {
            debug!(alert_id = %alert_id, "Dismiss ignored; alert not active");
        }
        Ok(changed)
    }

    /// active -> resolved. `false` if the alert is missing or not active.
    pub async fn resolve(&self, alert_id: Uuid) -> Result<bool> {
        let transition = AlertTransition::resolved(self.clock.now());
        let changed = self.store.transition_alert(alert_id, &transition).await?;
        if changed {
            info!(alert_id = %alert_id, "Alert resolved");
        }
        Ok(changed)
    }

    pub async fn get_alert(&self, alert_id: Uuid) -> Result<Option<Alert>> {
        self.store.get_alert(alert_id).await
    }

    /// Active alerts routed to `query.role`, critical first, newest first
    /// within a severity.
    pub async fn active_alerts_for_role(&self, query: RoleAlertQuery) -> Result<Vec<Alert>> {
        let filter = AlertFilter {
            status: Some(AlertStatus::Active),
            visible_to: Some(query.role),
            room_ids: query.room_id.into_iter().collect(),
            batch_id: query.batch_id,
            order: AlertOrder::SeverityThenNewest,
            limit: Some(query.limit.unwrap_or(self.config.default_alert_limit)),
            ..Default::default()
        };
        self.store.list_alerts(&filter).await
    }

    /// Alerts of any status created inside the history window.
    pub async fn alert_history(&self, query: HistoryQuery) -> Result<AlertPage> {
        let filter = AlertFilter {
            room_ids: query.room_id.into_iter().collect(),
            batch_id: query.batch_id,
            kind: query.kind,
            created_from: Some(self.clock.now() - self.config.history_window()),
            order: AlertOrder::Newest,
            offset: query.offset.unwrap_or(0),
            limit: Some(query.limit.unwrap_or(self.config.default_alert_limit)),
            ..Default::default()
        };
        let total = self.store.count_alerts(&filter).await?;
        let alerts = self.store.list_alerts(&filter).await?;
        Ok(AlertPage { alerts, total })
    }

    /// Active alerts a teacher should see for one room, newest first.
    pub async fn teacher_room_alerts(
        &self,
        room_id: &str,
        limit: Option<usize>,
    ) -> Result<Vec<Alert>> {
        let filter = AlertFilter {
            status: Some(AlertStatus::Active),
            visible_to: Some(NotifyRole::Teacher),
            room_ids: vec![room_id.to_string()],
            order: AlertOrder::Newest,
            limit: Some(limit.unwrap_or(self.config.teacher_room_alert_limit)),
            ..Default::default()
        };
        self.store.list_alerts(&filter).await
    }

    /// Resolves active threshold alerts whose rolling sum has dropped back
    /// below the threshold. Teacher-side alerts are left alone.
    pub async fn reconcile(&self) -> Result<usize> {
        let now = self.clock.now();
        let active = self
            .store
            .list_alerts(&AlertFilter {
                status: Some(AlertStatus::Active),
                ..Default::default()
            })
            .await?;

        let mut resolved = 0;
        for alert in active {
            let Some(rule) = self.config.rule_for_alert(alert.kind) else {
                continue;
            };
            let (Some(room_id), Some(target)) = (&alert.room_id, &alert.target_email) else {
                continue;
            };
            let total = self
                .store
                .sum_duration(room_id, target, rule.event_kind, now - self.config.event_window())
                .await?;
            if total >= rule.threshold_seconds {
                continue;
            }
            if self
                .store
                .transition_alert(alert.id, &AlertTransition::resolved(now))
                .await?
            {
                debug!(
                    alert_id = %alert.id,
                    alert_kind = %alert.kind,
                    total_seconds = total,
                    "Condition cleared"
                );
                resolved += 1;
            }
        }

        if resolved > 0 {
            info!(resolved, "Reconciled cleared alerts");
        }
        Ok(resolved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use crate::models::{EventKind, Severity};
    use crate::testutil::{event, event_for, fixture, ROOM};
    use crate::threshold::TeacherAlertRequest;
    use chrono::Duration;

    async fn raise(
        monitor: &Monitor<MemoryStore>,
        kind: AlertKind,
        severity: Severity,
        notify_teacher: bool,
    ) -> Alert {
        monitor
            .raise_teacher_alert(TeacherAlertRequest {
                room_id: ROOM.to_string(),
                session_id: None,
                teacher_email: None,
                teacher_name: None,
                kind,
                severity,
                title: None,
                message: format!("{} in progress", kind),
                notify_coordinator: true,
                notify_academic_operator: false,
                notify_teacher,
            })
            .await
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn coordinator_listing_is_filtered_and_ordered() {
        let (monitor, clock) = fixture();
        let info = raise(&monitor, AlertKind::LowAttendance, Severity::Info, false).await;
        clock.advance(Duration::minutes(1));
        let old_warning =
            raise(&monitor, AlertKind::ClassStartedLate, Severity::Warning, false).await;
        clock.advance(Duration::minutes(1));
        let critical = raise(&monitor, AlertKind::TeacherAbsent, Severity::Critical, false).await;
        clock.advance(Duration::minutes(1));
        let new_warning =
            raise(&monitor, AlertKind::TeacherCameraOff, Severity::Warning, false).await;
        clock.advance(Duration::minutes(1));
        let dismissed =
            raise(&monitor, AlertKind::ClassDisruption, Severity::Critical, false).await;
        assert!(monitor.dismiss(dismissed.id, "ops@school.org").await.unwrap());

        let alerts = monitor
            .active_alerts_for_role(RoleAlertQuery {
                role: NotifyRole::Coordinator,
                batch_id: None,
                room_id: None,
                limit: None,
            })
            .await
            .unwrap();
        let ids: Vec<_> = alerts.iter().map(|a| a.id).collect();
        assert_eq!(ids, vec![critical.id, new_warning.id, old_warning.id, info.id]);

        let operator = monitor
            .active_alerts_for_role(RoleAlertQuery {
                role: NotifyRole::AcademicOperator,
                batch_id: None,
                room_id: None,
                limit: None,
            })
            .await
            .unwrap();
        assert!(operator.is_empty());
    }

    #[tokio::test]
    async fn role_listing_caps_and_narrows_by_batch() {
        let (monitor, _clock) = fixture();
        raise(&monitor, AlertKind::TeacherAbsent, Severity::Critical, false).await;
        raise(&monitor, AlertKind::LowAttendance, Severity::Info, false).await;

        let capped = monitor
            .active_alerts_for_role(RoleAlertQuery {
                role: NotifyRole::Coordinator,
                batch_id: Some("batch-7a".to_string()),
                room_id: None,
                limit: Some(1),
            })
            .await
            .unwrap();
        assert_eq!(capped.len(), 1);
        assert_eq!(capped[0].kind, AlertKind::TeacherAbsent);

        let other_batch = monitor
            .active_alerts_for_role(RoleAlertQuery {
                role: NotifyRole::Coordinator,
                batch_id: Some("batch-9c".to_string()),
                room_id: None,
                limit: None,
            })
            .await
            .unwrap();
        assert!(other_batch.is_empty());
    }

    #[tokio::test]
    async fn dismiss_is_idempotent() {
        let (monitor, _clock) = fixture();
        let alert = raise(&monitor, AlertKind::TeacherAbsent, Severity::Critical, true).await;

        assert!(monitor.dismiss(alert.id, "coord@school.org").await.unwrap());
        let after_first = monitor.get_alert(alert.id).await.unwrap().unwrap();
        assert!(!monitor.dismiss(alert.id, "someone-else@school.org").await.unwrap());
        let after_second = monitor.get_alert(alert.id).await.unwrap().unwrap();

        assert_eq!(after_first, after_second);
        assert_eq!(after_second.status, AlertStatus::Dismissed);
        assert_eq!(after_second.dismissed_by.as_deref(), Some("coord@school.org"));
        assert!(!monitor.resolve(alert.id).await.unwrap());
        assert!(!monitor.dismiss(Uuid::new_v4(), "coord@school.org").await.unwrap());
    }

    #[tokio::test]
    async fn history_covers_the_last_day_in_any_status() {
        let (monitor, clock) = fixture();
        let stale = raise(&monitor, AlertKind::TeacherAbsent, Severity::Critical, false).await;
        clock.advance(Duration::hours(25));
        let resolved = raise(&monitor, AlertKind::TeacherAbsent, Severity::Critical, false).await;
        monitor.resolve(resolved.id).await.unwrap();
        raise(&monitor, AlertKind::LowAttendance, Severity::Info, false).await;

        let page = monitor.alert_history(HistoryQuery::default()).await.unwrap();
        assert_eq!(page.total, 2);
        assert!(page.alerts.iter().all(|a| a.id != stale.id));

        let filtered = monitor
            .alert_history(HistoryQuery {
                kind: Some(AlertKind::TeacherAbsent),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(filtered.total, 1);
        assert_eq!(filtered.alerts[0].status, AlertStatus::Resolved);

        let second_page = monitor
            .alert_history(HistoryQuery {
                offset: Some(1),
                limit: Some(1),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(second_page.total, 2);
        assert_eq!(second_page.alerts.len(), 1);
    }

    #[tokio::test]
    async fn teacher_room_view_only_shows_teacher_flagged_alerts() {
        let (monitor, _clock) = fixture();
        raise(&monitor, AlertKind::TeacherAbsent, Severity::Critical, false).await;
        let visible = raise(&monitor, AlertKind::ClassDisruption, Severity::Warning, true).await;

        let alerts = monitor.teacher_room_alerts(ROOM, None).await.unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].id, visible.id);
        assert!(monitor.teacher_room_alerts("room-other", None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn reconcile_resolves_cleared_conditions_only() {
        let (monitor, clock) = fixture();
        monitor
            .ingest(vec![
                event(EventKind::EyesClosed, 130),
                event_for("ravi@school.org", "Ravi", EventKind::PhoneDetected, 70),
            ])
            .await
            .unwrap();
        let teacher = raise(&monitor, AlertKind::TeacherAbsent, Severity::Critical, false).await;
        assert_eq!(monitor.reconcile().await.unwrap(), 0);

        clock.advance(Duration::minutes(8));
        monitor
            .ingest(vec![event_for("ravi@school.org", "Ravi", EventKind::PhoneDetected, 70)])
            .await
            .unwrap();
        clock.advance(Duration::minutes(3));
        assert_eq!(monitor.reconcile().await.unwrap(), 1);

        let alerts = monitor.store().alerts();
        let status_of = |kind: AlertKind| alerts.iter().find(|a| a.kind == kind).unwrap().status;
        assert_eq!(status_of(AlertKind::StudentSleeping), AlertStatus::Resolved);
        assert_eq!(status_of(AlertKind::PhoneDetected), AlertStatus::Active);
        assert_eq!(
            monitor.get_alert(teacher.id).await.unwrap().unwrap().status,
            AlertStatus::Active
        );
    }
}
