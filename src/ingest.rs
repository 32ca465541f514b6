use std::path::Path;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::engine::{lock, Monitor, PendingEvaluation};
use crate::error::Result;
use crate::models::{display_name_from_email, EventDetails, EventKind, NewEvent, PerceptionEvent};
use crate::store::MonitorStore;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RejectedEvent {
    /// Position in the submitted batch.
    pub index: usize,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IngestOutcome {
    pub inserted: usize,
    pub alerts_generated: usize,
    pub rejected: Vec<RejectedEvent>,
    /// Valid events the ledger could not store. Safe to resubmit on their own.
    pub failed: Vec<RejectedEvent>,
}

fn required(value: Option<String>, field: &str) -> std::result::Result<String, String> {
    match value {
        Some(value) if !value.trim().is_empty() => Ok(value.trim().to_string()),
        _ => Err(format!("{} is required", field)),
    }
}

/// Turns a submitted event into a ledger row stamped at `now`.
pub fn validate_event(
    input: NewEvent,
    now: DateTime<Utc>,
) -> std::result::Result<PerceptionEvent, String> {
    let room_id = required(input.room_id, "room_id")?;
    let participant_email = required(input.participant_email, "participant_email")?;
    if !participant_email.contains('@') {
        return Err(format!("participant_email '{}' is not an email", participant_email));
    }
    let kind: EventKind = required(input.event_kind, "event_kind")?.parse()?;

    let confidence = input.confidence.unwrap_or(100);
    if !(0..=100).contains(&confidence) {
        return Err(format!("confidence {} is outside 0-100", confidence));
    }
    let duration_seconds = input.duration_seconds.unwrap_or(0);
    if duration_seconds < 0 {
        return Err(format!("duration_seconds {} is negative", duration_seconds));
    }
    let duration_seconds = i32::try_from(duration_seconds)
        .map_err(|_| format!("duration_seconds {} is too large", duration_seconds))?;

    let details = EventDetails::from_payload(kind, input.details)?;
    let participant_name = input
        .participant_name
        .filter(|name| !name.trim().is_empty())
        .unwrap_or_else(|| display_name_from_email(&participant_email));

    Ok(PerceptionEvent {
        id: Uuid::new_v4(),
        room_id,
        session_id: input.session_id.filter(|id| !id.is_empty()),
        participant_email,
        participant_name,
        kind,
        confidence: confidence as i16,
        duration_seconds,
        details,
        created_at: now,
    })
}

impl<S: MonitorStore> Monitor<S> {
    /// Persists each valid event, then evaluates it. A failed evaluation never
    /// un-persists the event; it is queued for `retry_failed_evaluations`.
    /// A failed write is recorded in `failed` and the batch carries on.
    pub async fn ingest(&self, events: Vec<NewEvent>) -> Result<IngestOutcome> {
        let mut outcome = IngestOutcome::default();

        for (index, input) in events.into_iter().enumerate() {
            let event = match validate_event(input, self.clock.now()) {
                Ok(event) => event,
                Err(reason) => {
                    warn!(index, reason = %reason, "Rejected perception event");
                    outcome.rejected.push(RejectedEvent { index, reason });
                    continue;
                }
            };

            if let Err(err) = self.store.insert_event(&event).await {
                warn!(
                    index,
                    error = %err,
                    room_id = %event.room_id,
                    participant = %event.participant_email,
                    "Failed to store perception event"
                );
                outcome.failed.push(RejectedEvent {
                    index,
                    reason: err.to_string(),
                });
                continue;
            }
            outcome.inserted += 1;

            match self.evaluate(&event).await {
                Ok(Some(_)) => outcome.alerts_generated += 1,
                Ok(None) => {}
                Err(err) => {
                    warn!(
                        error = %err,
                        event_id = %event.id,
                        room_id = %event.room_id,
                        participant = %event.participant_email,
                        "Threshold evaluation failed; queued for retry"
                    );
                    lock(&self.pending).push_back(PendingEvaluation { event, attempts: 1 });
                }
            }
        }

        Ok(outcome)
    }

    /// Re-runs evaluations that failed during ingestion. Returns how many
    /// alerts the retries produced.
    pub async fn retry_failed_evaluations(&self) -> Result<usize> {
        let batch: Vec<PendingEvaluation> = lock(&self.pending).drain(..).collect();
        let mut generated = 0;

        for mut pending in batch {
            match self.evaluate(&pending.event).await {
                Ok(Some(_)) => generated += 1,
                Ok(None) => {}
                Err(err) => {
                    pending.attempts += 1;
                    if pending.attempts > self.config.retry_limit {
                        warn!(
                            error = %err,
                            event_id = %pending.event.id,
                            attempts = pending.attempts,
                            "Giving up on threshold evaluation"
                        );
                    } else {
                        lock(&self.pending).push_back(pending);
                    }
                }
            }
        }

        if generated > 0 {
            info!(generated, "Retried evaluations raised alerts");
        }
        Ok(generated)
    }
}

/// Reads a JSON array of submitted events.
pub fn read_events_json(path: &Path) -> Result<Vec<NewEvent>> {
    let content = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

/// Reads events from CSV with columns `room_id, session_id, participant_email,
/// participant_name, event_kind, confidence, duration_seconds`.
pub fn read_events_csv(path: &Path) -> Result<Vec<NewEvent>> {
    #[derive(serde::Deserialize)]
    struct CsvRow {
        room_id: Option<String>,
        session_id: Option<String>,
        participant_email: Option<String>,
        participant_name: Option<String>,
        event_kind: Option<String>,
        confidence: Option<i64>,
        duration_seconds: Option<i64>,
    }

    let mut reader = csv::Reader::from_path(path)?;
    let mut events = Vec::new();

    for result in reader.deserialize::<CsvRow>() {
        let row = result?;
        events.push(NewEvent {
            room_id: row.room_id,
            session_id: row.session_id,
            participant_email: row.participant_email,
            participant_name: row.participant_name,
            event_kind: row.event_kind,
            confidence: row.confidence,
            duration_seconds: row.duration_seconds,
            details: None,
        });
    }

    Ok(events)
}
