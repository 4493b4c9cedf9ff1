use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Deserialize;
use thiserror::Error;
use ulid::Ulid;

use crate::lifecycle::Transition;
use crate::models::{
    ClassTemplate, Location, OccurrenceKey, Reservation, ReservationStatus, ScheduleRule,
};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Read access to the template/schedule catalog. The durable catalog lives
/// with the rest of the gym chain's data; the engine only ever reads it.
#[async_trait]
pub trait CatalogStore: Send + Sync {
    async fn location(&self, id: &str) -> Result<Option<Location>, StoreError>;
    async fn template(&self, id: &str) -> Result<Option<ClassTemplate>, StoreError>;
    async fn templates(&self) -> Result<Vec<ClassTemplate>, StoreError>;
    async fn rules_for(&self, template_id: &str) -> Result<Vec<ScheduleRule>, StoreError>;
}

/// Durable reservation state — the single source of truth. The capacity
/// ledger's cached counts are always rebuildable from `count_confirmed`.
#[async_trait]
pub trait ReservationStore: Send + Sync {
    async fn insert(&self, reservation: Reservation) -> Result<(), StoreError>;

    async fn get(&self, id: Ulid) -> Result<Option<Reservation>, StoreError>;

    /// Compare-and-swap status update keyed by (id, expected, target).
    /// Reports a replay (`AlreadyInTarget`) instead of re-applying when the
    /// reservation already reached `target`.
    async fn transition(
        &self,
        id: Ulid,
        expected: ReservationStatus,
        target: ReservationStatus,
        at: DateTime<Utc>,
    ) -> Result<Transition, StoreError>;

    async fn find_confirmed(
        &self,
        member_id: &str,
        key: &OccurrenceKey,
    ) -> Result<Option<Reservation>, StoreError>;

    async fn count_confirmed(&self, key: &OccurrenceKey) -> Result<u32, StoreError>;

    /// Confirmed reservations for one member whose occurrence window
    /// intersects `[from, until)`.
    async fn confirmed_for_member(
        &self,
        member_id: &str,
        from: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<Reservation>, StoreError>;

    async fn reservations_for_member(
        &self,
        member_id: &str,
    ) -> Result<Vec<Reservation>, StoreError>;

    /// Confirmed reservations whose occurrence has already ended — the
    /// reconciliation sweep's work list.
    async fn confirmed_ended_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Reservation>, StoreError>;
}

/// In-memory reservation store. Statements against one reservation id are
/// serialized by the map shard lock, which is what makes `transition` a
/// real compare-and-swap.
#[derive(Default)]
pub struct InMemoryReservationStore {
    reservations: DashMap<Ulid, Reservation>,
}

impl InMemoryReservationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ReservationStore for InMemoryReservationStore {
    async fn insert(&self, reservation: Reservation) -> Result<(), StoreError> {
        self.reservations.insert(reservation.id, reservation);
        Ok(())
    }

    async fn get(&self, id: Ulid) -> Result<Option<Reservation>, StoreError> {
        Ok(self.reservations.get(&id).map(|r| r.clone()))
    }

    async fn transition(
        &self,
        id: Ulid,
        expected: ReservationStatus,
        target: ReservationStatus,
        at: DateTime<Utc>,
    ) -> Result<Transition, StoreError> {
        let Some(mut entry) = self.reservations.get_mut(&id) else {
            return Ok(Transition::NotFound);
        };
        if entry.status == target {
            return Ok(Transition::AlreadyInTarget(entry.clone()));
        }
        if entry.status != expected {
            return Ok(Transition::Mismatch {
                actual: entry.status,
            });
        }
        entry.status = target;
        entry.updated_at = at;
        Ok(Transition::Applied(entry.clone()))
    }

    async fn find_confirmed(
        &self,
        member_id: &str,
        key: &OccurrenceKey,
    ) -> Result<Option<Reservation>, StoreError> {
        Ok(self
            .reservations
            .iter()
            .find(|r| {
                r.status == ReservationStatus::Confirmed
                    && r.member_id == member_id
                    && r.value().key() == *key
            })
            .map(|r| r.clone()))
    }

    async fn count_confirmed(&self, key: &OccurrenceKey) -> Result<u32, StoreError> {
        Ok(self
            .reservations
            .iter()
            .filter(|r| r.status == ReservationStatus::Confirmed && r.value().key() == *key)
            .count() as u32)
    }

    async fn confirmed_for_member(
        &self,
        member_id: &str,
        from: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<Reservation>, StoreError> {
        Ok(self
            .reservations
            .iter()
            .filter(|r| {
                r.status == ReservationStatus::Confirmed
                    && r.member_id == member_id
                    && r.occurrence_start < until
                    && r.occurrence_end > from
            })
            .map(|r| r.clone())
            .collect())
    }

    async fn reservations_for_member(
        &self,
        member_id: &str,
    ) -> Result<Vec<Reservation>, StoreError> {
        let mut found: Vec<Reservation> = self
            .reservations
            .iter()
            .filter(|r| r.member_id == member_id)
            .map(|r| r.clone())
            .collect();
        found.sort_by_key(|r| r.occurrence_start);
        Ok(found)
    }

    async fn confirmed_ended_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Reservation>, StoreError> {
        Ok(self
            .reservations
            .iter()
            .filter(|r| r.status == ReservationStatus::Confirmed && r.occurrence_end <= cutoff)
            .map(|r| r.clone())
            .collect())
    }
}

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("failed to read catalog file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse catalog file: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("schedule rule {rule_id}: {reason}")]
    InvalidRule { rule_id: String, reason: String },
}

#[derive(Debug, Deserialize)]
struct CatalogFile {
    locations: Vec<Location>,
    templates: Vec<ClassTemplate>,
    rules: Vec<ScheduleRule>,
}

/// Catalog snapshot held in memory; rules are validated on load so the
/// resolver can assume weekday and time invariants hold.
#[derive(Debug)]
pub struct InMemoryCatalog {
    locations: Vec<Location>,
    templates: Vec<ClassTemplate>,
    rules: Vec<ScheduleRule>,
}

impl InMemoryCatalog {
    pub fn empty() -> Self {
        Self {
            locations: Vec::new(),
            templates: Vec::new(),
            rules: Vec::new(),
        }
    }

    pub fn from_parts(
        locations: Vec<Location>,
        templates: Vec<ClassTemplate>,
        rules: Vec<ScheduleRule>,
    ) -> Result<Self, CatalogError> {
        for rule in &rules {
            if rule.weekday > 6 {
                return Err(CatalogError::InvalidRule {
                    rule_id: rule.id.clone(),
                    reason: format!("weekday {} out of range 0-6", rule.weekday),
                });
            }
            if rule.end_time <= rule.start_time {
                return Err(CatalogError::InvalidRule {
                    rule_id: rule.id.clone(),
                    reason: "end time must be after start time".to_string(),
                });
            }
            if !templates.iter().any(|t| t.id == rule.template_id) {
                return Err(CatalogError::InvalidRule {
                    rule_id: rule.id.clone(),
                    reason: format!("unknown template {}", rule.template_id),
                });
            }
        }
        Ok(Self {
            locations,
            templates,
            rules,
        })
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, CatalogError> {
        let raw = std::fs::read_to_string(path)?;
        let file: CatalogFile = serde_json::from_str(&raw)?;
        Self::from_parts(file.locations, file.templates, file.rules)
    }
}

#[async_trait]
impl CatalogStore for InMemoryCatalog {
    async fn location(&self, id: &str) -> Result<Option<Location>, StoreError> {
        Ok(self.locations.iter().find(|l| l.id == id).cloned())
    }

    async fn template(&self, id: &str) -> Result<Option<ClassTemplate>, StoreError> {
        Ok(self.templates.iter().find(|t| t.id == id).cloned())
    }

    async fn templates(&self) -> Result<Vec<ClassTemplate>, StoreError> {
        Ok(self.templates.clone())
    }

    async fn rules_for(&self, template_id: &str) -> Result<Vec<ScheduleRule>, StoreError> {
        Ok(self
            .rules
            .iter()
            .filter(|r| r.template_id == template_id)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveTime;

    use super::*;
    use crate::models::Intensity;

    fn template() -> ClassTemplate {
        ClassTemplate {
            id: "yoga".to_string(),
            name: "Yoga".to_string(),
            duration_min: 60,
            intensity: Intensity::Low,
            capacity: 5,
            instructor: "Ana".to_string(),
            location_id: "centro".to_string(),
        }
    }

    fn rule(weekday: u8, start: (u32, u32), end: (u32, u32)) -> ScheduleRule {
        ScheduleRule {
            id: "yoga-rule".to_string(),
            template_id: "yoga".to_string(),
            weekday,
            start_time: NaiveTime::from_hms_opt(start.0, start.1, 0).unwrap(),
            end_time: NaiveTime::from_hms_opt(end.0, end.1, 0).unwrap(),
            active: true,
            valid_from: None,
            valid_until: None,
        }
    }

    #[test]
    fn test_catalog_rejects_bad_weekday() {
        let err = InMemoryCatalog::from_parts(vec![], vec![template()], vec![rule(7, (6, 0), (7, 0))])
            .unwrap_err();
        assert!(matches!(err, CatalogError::InvalidRule { .. }));
    }

    #[test]
    fn test_catalog_rejects_inverted_times() {
        let err = InMemoryCatalog::from_parts(vec![], vec![template()], vec![rule(0, (7, 0), (6, 0))])
            .unwrap_err();
        assert!(matches!(err, CatalogError::InvalidRule { .. }));
    }

    #[test]
    fn test_catalog_loads_from_json_file() {
        let raw = r#"{
            "locations": [
                {"id": "centro", "name": "Sede Centro", "timezone": "Europe/Madrid"}
            ],
            "templates": [
                {
                    "id": "spinning", "name": "Spinning", "duration_min": 60,
                    "intensity": "high", "capacity": 2,
                    "instructor": "Marta", "location_id": "centro"
                }
            ],
            "rules": [
                {
                    "id": "spinning-mon", "template_id": "spinning", "weekday": 0,
                    "start_time": "06:00:00", "end_time": "07:00:00",
                    "active": true, "valid_from": null, "valid_until": "2026-12-31"
                }
            ]
        }"#;
        let path = std::env::temp_dir().join("class-booking-catalog-test.json");
        std::fs::write(&path, raw).unwrap();
        let catalog = InMemoryCatalog::load(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(catalog.templates.len(), 1);
        assert_eq!(catalog.locations[0].timezone, chrono_tz::Europe::Madrid);
        assert_eq!(catalog.rules[0].weekday, 0);
        assert_eq!(
            catalog.rules[0].valid_until,
            Some(chrono::NaiveDate::from_ymd_opt(2026, 12, 31).unwrap())
        );
    }

    #[test]
    fn test_catalog_rejects_orphan_rule() {
        let err =
            InMemoryCatalog::from_parts(vec![], vec![], vec![rule(0, (6, 0), (7, 0))]).unwrap_err();
        assert!(matches!(err, CatalogError::InvalidRule { .. }));
    }

    #[tokio::test]
    async fn test_transition_is_compare_and_swap() {
        let store = InMemoryReservationStore::new();
        let now = Utc::now();
        let occurrence = crate::models::Occurrence {
            template_id: "yoga".to_string(),
            rule_id: "yoga-rule".to_string(),
            name: "Yoga".to_string(),
            instructor: "Ana".to_string(),
            location_id: "centro".to_string(),
            start: (now + chrono::Duration::days(1)).fixed_offset(),
            end: (now + chrono::Duration::days(1) + chrono::Duration::hours(1)).fixed_offset(),
            capacity: 5,
        };
        let reservation = Reservation::confirmed("member-a", &occurrence, now);
        let id = reservation.id;
        store.insert(reservation).await.unwrap();

        let first = store
            .transition(id, ReservationStatus::Confirmed, ReservationStatus::Cancelled, now)
            .await
            .unwrap();
        assert!(matches!(first, Transition::Applied(_)));

        // Retry replays instead of re-applying.
        let retry = store
            .transition(id, ReservationStatus::Confirmed, ReservationStatus::Cancelled, now)
            .await
            .unwrap();
        assert!(matches!(retry, Transition::AlreadyInTarget(_)));

        // A different target from a terminal state is a mismatch.
        let cross = store
            .transition(id, ReservationStatus::Confirmed, ReservationStatus::Completed, now)
            .await
            .unwrap();
        assert!(matches!(
            cross,
            Transition::Mismatch {
                actual: ReservationStatus::Cancelled
            }
        ));
    }
}
