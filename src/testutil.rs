//! Fixtures shared by the unit tests.

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use uuid::Uuid;

use crate::config::MonitorConfig;
use crate::engine::{ManualClock, Monitor};
use crate::ingest::validate_event;
use crate::memory::MemoryStore;
use crate::models::{EventDetails, EventKind, NewEvent, PerceptionEvent};
use crate::store::EventStore;

pub const ROOM: &str = "room-7a-math";
pub const STUDENT: &str = "asha.kumar@school.org";
pub const TEACHER: &str = "meera.iyer@school.org";

pub fn fixture() -> (Monitor<MemoryStore>, Arc<ManualClock>) {
    fixture_with(MonitorConfig::default())
}

pub fn fixture_with(config: MonitorConfig) -> (Monitor<MemoryStore>, Arc<ManualClock>) {
    let store = MemoryStore::new();
    store.add_room(ROOM, "batch-7a");
    store.add_participant(STUDENT, "Asha Kumar");
    let start = Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap();
    let clock = Arc::new(ManualClock::new(start));
    let monitor = Monitor::new(Arc::new(store), config).with_clock(clock.clone());
    (monitor, clock)
}

pub fn event(kind: EventKind, seconds: i64) -> NewEvent {
    event_for(STUDENT, "Asha", kind, seconds)
}

pub fn event_for(email: &str, name: &str, kind: EventKind, seconds: i64) -> NewEvent {
    NewEvent {
        room_id: Some(ROOM.to_string()),
        session_id: Some("session-1".to_string()),
        participant_email: Some(email.to_string()),
        participant_name: Some(name.to_string()),
        event_kind: Some(kind.as_str().to_string()),
        confidence: Some(95),
        duration_seconds: Some(seconds),
        details: None,
    }
}

/// Validates and stores `input` without evaluating it.
pub async fn ingest_one(monitor: &Monitor<MemoryStore>, input: NewEvent) -> PerceptionEvent {
    let event = validate_event(input, monitor.now()).unwrap();
    monitor.store().insert_event(&event).await.unwrap();
    event
}

pub fn stored_event(
    email: &str,
    kind: EventKind,
    seconds: i32,
    at: DateTime<Utc>,
) -> PerceptionEvent {
    PerceptionEvent {
        id: Uuid::new_v4(),
        room_id: ROOM.to_string(),
        session_id: None,
        participant_email: email.to_string(),
        participant_name: "Participant".to_string(),
        kind,
        confidence: 100,
        duration_seconds: seconds,
        details: EventDetails::empty(kind),
        created_at: at,
    }
}
