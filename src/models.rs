use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use ulid::Ulid;
use utoipa::ToSchema;

/// A gym site (sede). Every schedule rule resolves against its timezone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Location {
    pub id: String,
    pub name: String,
    pub timezone: Tz,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Intensity {
    Low,
    Medium,
    High,
}

/// A bookable activity type. `capacity` is snapshotted onto each resolved
/// occurrence, so editing a template never retroactively shrinks a session
/// that already has reservations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassTemplate {
    pub id: String,
    pub name: String,
    pub duration_min: u32,
    pub intensity: Intensity,
    pub capacity: u32,
    pub instructor: String,
    pub location_id: String,
}

/// Weekly recurrence bound to one template. Weekday 0 is Monday, 6 is Sunday.
/// The optional validity dates bound the rule itself, both ends inclusive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleRule {
    pub id: String,
    pub template_id: String,
    pub weekday: u8,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub active: bool,
    pub valid_from: Option<NaiveDate>,
    pub valid_until: Option<NaiveDate>,
}

/// Identity of one concrete session: the template plus the resolved start
/// instant in UTC.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OccurrenceKey {
    pub template_id: String,
    pub start: DateTime<Utc>,
}

impl std::fmt::Display for OccurrenceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.template_id, self.start.to_rfc3339())
    }
}

/// A dated instance of a schedule rule. Derived on demand by the resolver,
/// never persisted verbatim; timestamps carry the location-local offset in
/// effect on that date.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Occurrence {
    pub template_id: String,
    pub rule_id: String,
    pub name: String,
    pub instructor: String,
    pub location_id: String,
    pub start: DateTime<FixedOffset>,
    pub end: DateTime<FixedOffset>,
    pub capacity: u32,
}

impl Occurrence {
    pub fn key(&self) -> OccurrenceKey {
        OccurrenceKey {
            template_id: self.template_id.clone(),
            start: self.start.with_timezone(&Utc),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ReservationStatus {
    Confirmed,
    Cancelled,
    Completed,
    NoShow,
}

impl std::fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ReservationStatus::Confirmed => "confirmed",
            ReservationStatus::Cancelled => "cancelled",
            ReservationStatus::Completed => "completed",
            ReservationStatus::NoShow => "no_show",
        };
        f.write_str(name)
    }
}

/// One member's claim on one occurrence. The occurrence reference is
/// embedded (template + resolved window + capacity snapshot) so conflict
/// checks and reconciliation never need to re-resolve the schedule.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Reservation {
    #[schema(value_type = String)]
    pub id: Ulid,
    pub member_id: String,
    pub template_id: String,
    pub occurrence_start: DateTime<Utc>,
    pub occurrence_end: DateTime<Utc>,
    pub capacity: u32,
    pub status: ReservationStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Reservation {
    pub fn confirmed(member_id: &str, occurrence: &Occurrence, now: DateTime<Utc>) -> Self {
        Self {
            id: Ulid::new(),
            member_id: member_id.to_string(),
            template_id: occurrence.template_id.clone(),
            occurrence_start: occurrence.start.with_timezone(&Utc),
            occurrence_end: occurrence.end.with_timezone(&Utc),
            capacity: occurrence.capacity,
            status: ReservationStatus::Confirmed,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn key(&self) -> OccurrenceKey {
        OccurrenceKey {
            template_id: self.template_id.clone(),
            start: self.occurrence_start,
        }
    }
}
