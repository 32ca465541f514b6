use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Declares a closed set of values stored as text columns and sent as
/// snake_case strings on the wire.
macro_rules! text_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub enum $name {
            $(#[serde(rename = $text)] $variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = String;

            fn from_str(value: &str) -> Result<Self, Self::Err> {
                match value {
                    $($text => Ok($name::$variant),)+
                    other => Err(format!("unknown {} '{}'", stringify!($name), other)),
                }
            }
        }
    };
}

text_enum!(
    /// Pre-classified behaviour reported by the client-side perception model.
    EventKind {
        Attentive => "attentive",
        LookingAway => "looking_away",
        EyesClosed => "eyes_closed",
        NotInFrame => "not_in_frame",
        LowEngagement => "low_engagement",
        HandRaised => "hand_raised",
        Speaking => "speaking",
        Distracted => "distracted",
        PhoneDetected => "phone_detected",
        MultipleFaces => "multiple_faces",
    }
);

impl EventKind {
    /// Positive signals never generate alerts.
    pub fn is_positive(&self) -> bool {
        matches!(
            self,
            EventKind::Attentive | EventKind::HandRaised | EventKind::Speaking
        )
    }

    /// Kinds that count towards monitored time in attention scores.
    pub fn is_monitored(&self) -> bool {
        matches!(
            self,
            EventKind::Attentive
                | EventKind::LookingAway
                | EventKind::EyesClosed
                | EventKind::NotInFrame
                | EventKind::Distracted
        )
    }
}

text_enum!(
    AlertKind {
        TeacherAbsent => "teacher_absent",
        TeacherCameraOff => "teacher_camera_off",
        ClassStartedLate => "class_started_late",
        ClassCancelled => "class_cancelled",
        LowAttendance => "low_attendance",
        StudentSleeping => "student_sleeping",
        StudentNotLooking => "student_not_looking",
        StudentLeftFrame => "student_left_frame",
        StudentDistracted => "student_distracted",
        ClassDisruption => "class_disruption",
        ContactViolation => "contact_violation",
        PhoneDetected => "phone_detected",
        UnusualLeave => "unusual_leave",
    }
);

impl AlertKind {
    /// Kinds raised through the explicit teacher-side entry point rather than
    /// by accumulating perception events.
    pub fn is_teacher_side(&self) -> bool {
        !matches!(
            self,
            AlertKind::StudentSleeping
                | AlertKind::StudentNotLooking
                | AlertKind::StudentLeftFrame
                | AlertKind::StudentDistracted
                | AlertKind::PhoneDetected
        )
    }

    pub fn default_title(&self) -> &'static str {
        match self {
            AlertKind::TeacherAbsent => "Teacher Absent",
            AlertKind::TeacherCameraOff => "Teacher Camera Off",
            AlertKind::ClassStartedLate => "Class Started Late",
            AlertKind::ClassCancelled => "Class Cancelled",
            AlertKind::LowAttendance => "Low Attendance",
            AlertKind::StudentSleeping => "Student Sleeping",
            AlertKind::StudentNotLooking => "Student Not Looking",
            AlertKind::StudentLeftFrame => "Student Left Frame",
            AlertKind::StudentDistracted => "Student Distracted",
            AlertKind::ClassDisruption => "Class Disruption",
            AlertKind::ContactViolation => "Contact Violation",
            AlertKind::PhoneDetected => "Phone Detected",
            AlertKind::UnusualLeave => "Unusual Leave",
        }
    }
}

text_enum!(
    /// Ordered `Info < Warning < Critical`; governs display order only.
    Severity {
        Info => "info",
        Warning => "warning",
        Critical => "critical",
    }
);

text_enum!(
    /// `Escalated` is reserved: it decodes from storage but nothing
    /// transitions into it.
    AlertStatus {
        Active => "active",
        Dismissed => "dismissed",
        Resolved => "resolved",
        Escalated => "escalated",
    }
);

text_enum!(
    /// Stakeholder roles an alert can be routed to.
    NotifyRole {
        Coordinator => "coordinator",
        AcademicOperator => "academic_operator",
        Teacher => "teacher",
    }
);

text_enum!(
    PeriodKind {
        Daily => "daily",
        Weekly => "weekly",
        Monthly => "monthly",
    }
);

text_enum!(
    TargetRole {
        Student => "student",
        Teacher => "teacher",
    }
);

text_enum!(
    SessionStatus {
        Scheduled => "scheduled",
        Conducted => "conducted",
        Cancelled => "cancelled",
    }
);

text_enum!(
    GazeDirection {
        Left => "left",
        Right => "right",
        Up => "up",
        Down => "down",
    }
);

/// Structured detail payload, tagged by the event kind it belongs to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventDetails {
    Attentive {},
    LookingAway {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        direction: Option<GazeDirection>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        head_yaw_degrees: Option<f32>,
    },
    EyesClosed {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        eye_aspect_ratio: Option<f32>,
    },
    NotInFrame {},
    LowEngagement {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        engagement_score: Option<f32>,
    },
    HandRaised {},
    Speaking {},
    Distracted {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    PhoneDetected {},
    MultipleFaces {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        face_count: Option<u32>,
    },
}

impl EventDetails {
    pub fn empty(kind: EventKind) -> Self {
        match kind {
            EventKind::Attentive => EventDetails::Attentive {},
            EventKind::LookingAway => EventDetails::LookingAway {
                direction: None,
                head_yaw_degrees: None,
            },
            EventKind::EyesClosed => EventDetails::EyesClosed {
                eye_aspect_ratio: None,
            },
            EventKind::NotInFrame => EventDetails::NotInFrame {},
            EventKind::LowEngagement => EventDetails::LowEngagement {
                engagement_score: None,
            },
            EventKind::HandRaised => EventDetails::HandRaised {},
            EventKind::Speaking => EventDetails::Speaking {},
            EventKind::Distracted => EventDetails::Distracted { reason: None },
            EventKind::PhoneDetected => EventDetails::PhoneDetected {},
            EventKind::MultipleFaces => EventDetails::MultipleFaces { face_count: None },
        }
    }

    pub fn kind(&self) -> EventKind {
        match self {
            EventDetails::Attentive {} => EventKind::Attentive,
            EventDetails::LookingAway { .. } => EventKind::LookingAway,
            EventDetails::EyesClosed { .. } => EventKind::EyesClosed,
            EventDetails::NotInFrame {} => EventKind::NotInFrame,
            EventDetails::LowEngagement { .. } => EventKind::LowEngagement,
            EventDetails::HandRaised {} => EventKind::HandRaised,
            EventDetails::Speaking {} => EventKind::Speaking,
            EventDetails::Distracted { .. } => EventKind::Distracted,
            EventDetails::PhoneDetected {} => EventKind::PhoneDetected,
            EventDetails::MultipleFaces { .. } => EventKind::MultipleFaces,
        }
    }

    /// Parses a client payload for an event of `kind`. The payload may omit
    /// the `kind` tag; if present it has to agree with the event kind.
    pub fn from_payload(kind: EventKind, payload: Option<Value>) -> Result<Self, String> {
        let mut map = match payload {
            None | Some(Value::Null) => return Ok(Self::empty(kind)),
            Some(Value::Object(map)) => map,
            Some(_) => return Err("details must be a JSON object".to_string()),
        };

        match map.get("kind") {
            None => {}
            Some(Value::String(tag)) if tag == kind.as_str() => {}
            Some(other) => {
                return Err(format!(
                    "details kind {} does not match event kind {}",
                    other, kind
                ))
            }
        }

        map.insert("kind".to_string(), Value::String(kind.as_str().to_string()));
        serde_json::from_value(Value::Object(map)).map_err(|err| err.to_string())
    }
}

/// One immutable ledger row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerceptionEvent {
    pub id: Uuid,
    pub room_id: String,
    pub session_id: Option<String>,
    pub participant_email: String,
    pub participant_name: String,
    pub kind: EventKind,
    pub confidence: i16,
    pub duration_seconds: i32,
    pub details: EventDetails,
    pub created_at: DateTime<Utc>,
}

/// Event as submitted by a client. Every field is optional at the wire level
/// so a single malformed entry can be rejected without failing its batch.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct NewEvent {
    pub room_id: Option<String>,
    pub session_id: Option<String>,
    pub participant_email: Option<String>,
    pub participant_name: Option<String>,
    pub event_kind: Option<String>,
    pub confidence: Option<i64>,
    pub duration_seconds: Option<i64>,
    pub details: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: Uuid,
    pub room_id: Option<String>,
    pub session_id: Option<String>,
    pub batch_id: Option<String>,
    pub kind: AlertKind,
    pub severity: Severity,
    pub title: String,
    pub message: String,
    pub target_email: Option<String>,
    pub target_name: Option<String>,
    pub notify_coordinator: bool,
    pub notify_academic_operator: bool,
    pub notify_teacher: bool,
    pub status: AlertStatus,
    pub dismissed_by: Option<String>,
    pub dismissed_at: Option<DateTime<Utc>>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Alert {
    pub fn is_visible_to(&self, role: NotifyRole) -> bool {
        match role {
            NotifyRole::Coordinator => self.notify_coordinator,
            NotifyRole::AcademicOperator => self.notify_academic_operator,
            NotifyRole::Teacher => self.notify_teacher,
        }
    }
}

/// Lower-detail mirror of an alert for the generic room activity feed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoomActivity {
    pub room_id: String,
    pub activity: String,
    pub participant_email: Option<String>,
    pub summary: String,
    pub created_at: DateTime<Utc>,
}

/// `student_daily`, `teacher_monthly`, ...
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct ReportKind {
    pub role: TargetRole,
    pub period: PeriodKind,
}

impl fmt::Display for ReportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.role, self.period)
    }
}

impl FromStr for ReportKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let (role, period) = value
            .split_once('_')
            .ok_or_else(|| format!("unknown ReportKind '{}'", value))?;
        Ok(ReportKind {
            role: role.parse()?,
            period: period.parse()?,
        })
    }
}

impl From<ReportKind> for String {
    fn from(kind: ReportKind) -> Self {
        kind.to_string()
    }
}

impl TryFrom<String> for ReportKind {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CategoryMinutes {
    pub looking_away: f64,
    pub eyes_closed: f64,
    pub not_in_frame: f64,
    pub distracted: f64,
    pub phone_detected: f64,
    pub low_engagement: f64,
    pub multiple_faces: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyAttention {
    pub date: NaiveDate,
    pub attention_score: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudentMetrics {
    pub sessions_scheduled: u32,
    pub sessions_attended: u32,
    pub attendance_rate: f64,
    pub average_attention_score: f64,
    pub minutes: CategoryMinutes,
    pub hand_raise_count: u32,
    pub alert_count: u32,
    pub attention_trend: Vec<DailyAttention>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeacherMetrics {
    pub sessions_scheduled: u32,
    pub sessions_conducted: u32,
    pub sessions_cancelled: u32,
    pub average_start_delay_minutes: f64,
    pub on_time_rate: f64,
    pub average_class_minutes: f64,
    pub average_student_engagement: f64,
    pub camera_off_incidents: u32,
    pub total_teaching_hours: f64,
    pub late_starts: u32,
    pub total_late_minutes: f64,
    pub batches_taught: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum ReportMetrics {
    Student(StudentMetrics),
    Teacher(TeacherMetrics),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub id: Uuid,
    pub kind: ReportKind,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub target_email: String,
    pub target_name: String,
    pub batch_id: Option<String>,
    pub grade: Option<String>,
    pub section: Option<String>,
    pub metrics: ReportMetrics,
    pub summary: String,
    pub sent_to_guardian: bool,
    pub sent_at: Option<DateTime<Utc>>,
    pub generated_by: String,
    pub created_at: DateTime<Utc>,
}

impl Report {
    pub fn target_role(&self) -> TargetRole {
        self.kind.role
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchContext {
    pub batch_id: String,
    pub grade: Option<String>,
    pub section: Option<String>,
}

/// A student's attendance at one scheduled session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudentAttendance {
    pub session_id: String,
    pub room_id: String,
    pub batch_id: Option<String>,
    pub scheduled_date: NaiveDate,
    pub attended: bool,
}

/// A class session as recorded by the scheduling side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeachingSession {
    pub session_id: String,
    pub room_id: String,
    pub batch_id: Option<String>,
    pub teacher_email: String,
    pub scheduled_start: DateTime<Utc>,
    pub actual_start: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub status: SessionStatus,
}

/// Seconds accumulated per event kind.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DurationTotals(BTreeMap<EventKind, i64>);

impl DurationTotals {
    pub fn from_events<'a>(events: impl IntoIterator<Item = &'a PerceptionEvent>) -> Self {
        let mut totals = Self::default();
        for event in events {
            totals.add(event.kind, i64::from(event.duration_seconds));
        }
        totals
    }

    pub fn add(&mut self, kind: EventKind, seconds: i64) {
        *self.0.entry(kind).or_insert(0) += seconds;
    }

    pub fn get(&self, kind: EventKind) -> i64 {
        self.0.get(&kind).copied().unwrap_or(0)
    }

    pub fn minutes(&self, kind: EventKind) -> f64 {
        self.get(kind) as f64 / 60.0
    }

    /// attentive + looking_away + eyes_closed + not_in_frame + distracted
    pub fn monitored(&self) -> i64 {
        self.0
            .iter()
            .filter(|(kind, _)| kind.is_monitored())
            .map(|(_, seconds)| *seconds)
            .sum()
    }

    /// Share of monitored time spent attentive, as a percentage. `None` when
    /// nothing was monitored.
    pub fn attentive_share(&self) -> Option<f64> {
        let monitored = self.monitored();
        if monitored <= 0 {
            return None;
        }
        Some(self.get(EventKind::Attentive) as f64 / monitored as f64 * 100.0)
    }
}

/// Falls back to a readable name built from the email's local part.
pub fn display_name_from_email(email: &str) -> String {
    let local = email.split('@').next().unwrap_or(email);
    let words: Vec<String> = local
        .split(['.', '_', '-', '+'])
        .filter(|word| !word.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect();

    if words.is_empty() {
        email.to_string()
    } else {
        words.join(" ")
    }
}
