use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::engine::Monitor;
use crate::error::Result;
use crate::models::{Alert, AlertStatus, DurationTotals, EventKind, PerceptionEvent};
use crate::store::{AlertFilter, AlertOrder, MonitorStore};

/// Score given to a participant with no monitored time yet.
pub const NEUTRAL_ATTENTION_SCORE: u32 = 50;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParticipantLive {
    pub participant_email: String,
    pub participant_name: String,
    pub attention_score: u32,
    pub current_state: EventKind,
    pub seconds: DurationTotals,
    pub active_alerts: usize,
    pub last_event_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LiveSummary {
    pub room_id: String,
    pub total_events: i64,
    pub students: Vec<ParticipantLive>,
    pub alerts: Vec<Alert>,
    pub class_engagement_score: u32,
}

pub fn attention_score(totals: &DurationTotals) -> u32 {
    totals
        .attentive_share()
        .map(|share| share.round() as u32)
        .unwrap_or(NEUTRAL_ATTENTION_SCORE)
}

/// Rounded mean of per-participant scores; 0 for an empty room.
pub fn class_engagement_score(scores: &[u32]) -> u32 {
    if scores.is_empty() {
        return 0;
    }
    let sum: u64 = scores.iter().map(|score| u64::from(*score)).sum();
    (sum as f64 / scores.len() as f64).round() as u32
}

/// Folds windowed events (oldest first) into one row per participant, sorted
/// by email.
pub fn summarize_participants(
    events: &[PerceptionEvent],
    active_alerts: &[Alert],
) -> Vec<ParticipantLive> {
    let mut grouped: BTreeMap<&str, Vec<&PerceptionEvent>> = BTreeMap::new();
    for event in events {
        grouped
            .entry(event.participant_email.as_str())
            .or_default()
            .push(event);
    }

    grouped
        .into_iter()
        .filter_map(|(email, events)| {
            let latest = *events.last()?;
            let seconds = DurationTotals::from_events(events.iter().copied());
            Some(ParticipantLive {
                participant_email: email.to_string(),
                participant_name: latest.participant_name.clone(),
                attention_score: attention_score(&seconds),
                current_state: latest.kind,
                seconds,
                active_alerts: active_alerts
                    .iter()
                    .filter(|alert| {
                        alert.status == AlertStatus::Active
                            && alert.target_email.as_deref() == Some(email)
                    })
                    .count(),
                last_event_at: latest.created_at,
            })
        })
        .collect()
}

impl<S: MonitorStore> Monitor<S> {
    /// How engaged the room is right now, from the trailing event window.
    pub async fn live_summary(&self, room_id: &str) -> Result<LiveSummary> {
        let since = self.clock.now() - self.config.event_window();
        let events = self.store.room_events_since(room_id, since).await?;
        let alerts = self
            .store
            .list_alerts(&AlertFilter {
                status: Some(AlertStatus::Active),
                room_ids: vec![room_id.to_string()],
                order: AlertOrder::SeverityThenNewest,
                ..Default::default()
            })
            .await?;
        let total_events = self.store.count_room_events(room_id).await?;

        let students = summarize_participants(&events, &alerts);
        let scores: Vec<u32> = students.iter().map(|s| s.attention_score).collect();

        Ok(LiveSummary {
            room_id: room_id.to_string(),
            total_events,
            class_engagement_score: class_engagement_score(&scores),
            students,
            alerts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{event, event_for, fixture, ROOM, STUDENT};
    use chrono::Duration;

    #[test]
    fn neutral_score_without_monitored_time() {
        let mut totals = DurationTotals::default();
        assert_eq!(attention_score(&totals), 50);
        totals.add(EventKind::HandRaised, 20);
        assert_eq!(attention_score(&totals), 50);
    }

    #[test]
    fn score_is_rounded_attentive_share() {
        let mut totals = DurationTotals::default();
        totals.add(EventKind::Attentive, 200);
        totals.add(EventKind::LookingAway, 100);
        assert_eq!(attention_score(&totals), 67);

        let mut asleep = DurationTotals::default();
        asleep.add(EventKind::EyesClosed, 150);
        assert_eq!(attention_score(&asleep), 0);
    }

    #[test]
    fn class_score_is_rounded_mean() {
        assert_eq!(class_engagement_score(&[80, 60, 40, 20]), 50);
        assert_eq!(class_engagement_score(&[]), 0);
        assert_eq!(class_engagement_score(&[50, 51]), 51);
    }

    #[tokio::test]
    async fn sleeping_student_scores_zero_and_shows_their_alert() {
        let (monitor, _clock) = fixture();
        monitor
            .ingest(vec![event(EventKind::EyesClosed, 150)])
            .await
            .unwrap();

        let summary = monitor.live_summary(ROOM).await.unwrap();
        assert_eq!(summary.students.len(), 1);
        let student = &summary.students[0];
        assert_eq!(student.participant_email, STUDENT);
        assert_eq!(student.attention_score, 0);
        assert_eq!(student.current_state, EventKind::EyesClosed);
        assert_eq!(student.active_alerts, 1);
        assert_eq!(summary.alerts.len(), 1);
        assert!(summary.alerts[0].message.contains("3 minutes"));
        assert_eq!(summary.class_engagement_score, 0);
    }

    #[tokio::test]
    async fn class_score_averages_participants() {
        let (monitor, _clock) = fixture();
        let mut batch = Vec::new();
        for (i, attentive) in [80, 60, 40, 20].into_iter().enumerate() {
            let email = format!("student{}@school.org", i);
            batch.push(event_for(&email, "S", EventKind::Attentive, attentive));
            batch.push(event_for(&email, "S", EventKind::LookingAway, 100 - attentive));
        }
        monitor.ingest(batch).await.unwrap();

        let summary = monitor.live_summary(ROOM).await.unwrap();
        let scores: Vec<u32> = summary.students.iter().map(|s| s.attention_score).collect();
        assert_eq!(scores, vec![80, 60, 40, 20]);
        assert_eq!(summary.class_engagement_score, 50);
    }

    #[tokio::test]
    async fn current_state_follows_the_latest_row() {
        let (monitor, clock) = fixture();
        monitor
            .ingest(vec![event(EventKind::LookingAway, 20)])
            .await
            .unwrap();
        monitor
            .ingest(vec![event(EventKind::Attentive, 20), event(EventKind::HandRaised, 0)])
            .await
            .unwrap();
        let summary = monitor.live_summary(ROOM).await.unwrap();
        assert_eq!(summary.students[0].current_state, EventKind::HandRaised);

        clock.advance(Duration::seconds(30));
        monitor
            .ingest(vec![event(EventKind::Speaking, 10)])
            .await
            .unwrap();
        let summary = monitor.live_summary(ROOM).await.unwrap();
        assert_eq!(summary.students[0].current_state, EventKind::Speaking);
    }

    #[tokio::test]
    async fn window_drops_old_events_but_total_counts_everything() {
        let (monitor, clock) = fixture();
        monitor
            .ingest(vec![event(EventKind::Attentive, 30), event(EventKind::Attentive, 30)])
            .await
            .unwrap();
        clock.advance(Duration::minutes(15));

        let summary = monitor.live_summary(ROOM).await.unwrap();
        assert!(summary.students.is_empty());
        assert_eq!(summary.class_engagement_score, 0);
        assert_eq!(summary.total_events, 2);
    }
}
