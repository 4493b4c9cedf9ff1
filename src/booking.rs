use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use futures::future::try_join_all;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};
use ulid::Ulid;

use crate::conflict;
use crate::error::BookingError;
use crate::ledger::CapacityLedger;
use crate::lifecycle::Transition;
use crate::models::{Occurrence, Reservation, ReservationStatus};
use crate::resolver;
use crate::settings::Settings;
use crate::store::{CatalogStore, ReservationStore};

/// Tunable booking policy, kept out of the engine logic: the cutoff and the
/// horizon are deployment decisions, not behavior.
#[derive(Debug, Clone)]
pub struct BookingPolicy {
    pub cancellation_cutoff: ChronoDuration,
    pub booking_horizon_weeks: u8,
    pub lock_wait: Duration,
}

impl BookingPolicy {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            cancellation_cutoff: ChronoDuration::minutes(i64::from(
                settings.cancellation_cutoff_min,
            )),
            booking_horizon_weeks: settings.booking_horizon_weeks,
            lock_wait: Duration::from_millis(settings.lock_wait_ms),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BookingOutcome {
    pub reservation: Reservation,
    pub remaining: u32,
}

#[derive(Debug, Clone)]
pub struct TimetableSlot {
    pub occurrence: Occurrence,
    pub remaining: u32,
}

/// Orchestrates booking and cancellation. Per-member work (conflict check +
/// insert) serializes on a member mutex, per-occurrence capacity on the
/// ledger's slot mutex; the member lock is always taken first.
pub struct BookingService {
    catalog: Arc<dyn CatalogStore>,
    store: Arc<dyn ReservationStore>,
    ledger: CapacityLedger,
    policy: BookingPolicy,
    member_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl BookingService {
    pub fn new(
        catalog: Arc<dyn CatalogStore>,
        store: Arc<dyn ReservationStore>,
        policy: BookingPolicy,
    ) -> Self {
        let ledger = CapacityLedger::new(Arc::clone(&store), policy.lock_wait);
        Self {
            catalog,
            store,
            ledger,
            policy,
            member_locks: DashMap::new(),
        }
    }

    async fn lock_member(&self, member_id: &str) -> Result<OwnedMutexGuard<()>, BookingError> {
        let lock = self
            .member_locks
            .entry(member_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        timeout(self.policy.lock_wait, lock.lock_owned())
            .await
            .map_err(|_| BookingError::Busy)
    }

    /// Maps a (template, requested start) pair back onto the schedule. Only
    /// instants the resolver itself would produce are accepted, and only
    /// inside the future-facing booking horizon.
    async fn resolve_occurrence(
        &self,
        template_id: &str,
        start: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Occurrence, BookingError> {
        if start <= now {
            return Err(BookingError::InvalidOccurrence);
        }
        if start > now + ChronoDuration::weeks(i64::from(self.policy.booking_horizon_weeks)) {
            return Err(BookingError::InvalidOccurrence);
        }
        let template = self
            .catalog
            .template(template_id)
            .await?
            .ok_or_else(|| BookingError::NotFound(format!("class template {template_id}")))?;
        let location = self
            .catalog
            .location(&template.location_id)
            .await?
            .ok_or_else(|| BookingError::NotFound(format!("location {}", template.location_id)))?;
        for rule in self.catalog.rules_for(template_id).await? {
            if let Some(occurrence) = resolver::resolve_at(&template, &rule, location.timezone, start)
            {
                return Ok(occurrence);
            }
        }
        Err(BookingError::InvalidOccurrence)
    }

    pub async fn book(
        &self,
        member_id: &str,
        template_id: &str,
        occurrence_start: DateTime<Utc>,
    ) -> Result<BookingOutcome, BookingError> {
        let now = Utc::now();
        let occurrence = self
            .resolve_occurrence(template_id, occurrence_start, now)
            .await?;
        let key = occurrence.key();

        let _member = self.lock_member(member_id).await?;

        // Idempotency: (member, occurrence) is the natural booking key. A
        // repeat of a successful request returns the original reservation.
        if let Some(existing) = self.store.find_confirmed(member_id, &key).await? {
            debug!(member = member_id, occurrence = %key, "replaying existing booking");
            let remaining = self.ledger.remaining(&key, occurrence.capacity).await?;
            return Ok(BookingOutcome {
                reservation: existing,
                remaining,
            });
        }

        let start_utc = occurrence.start.with_timezone(&Utc);
        let end_utc = occurrence.end.with_timezone(&Utc);
        let held = self
            .store
            .confirmed_for_member(member_id, start_utc, end_utc)
            .await?;
        if let Some(conflicting) = conflict::find_overlap(&held, start_utc, end_utc) {
            return Err(BookingError::OverlappingReservation(conflicting.id));
        }

        let acquisition = self.ledger.try_acquire(&key, occurrence.capacity).await?;
        if !acquisition.acquired {
            return Err(BookingError::CapacityExceeded);
        }

        let reservation = Reservation::confirmed(member_id, &occurrence, now);
        if let Err(err) = self.store.insert(reservation.clone()).await {
            // An acquisition without a committed write must not survive.
            if let Err(release_err) = self.ledger.release(&key).await {
                error!("failed to release slot after aborted booking: {release_err}");
            }
            return Err(err.into());
        }

        info!(
            reservation = %reservation.id,
            member = member_id,
            occurrence = %key,
            remaining = acquisition.remaining,
            "booking confirmed"
        );
        Ok(BookingOutcome {
            reservation,
            remaining: acquisition.remaining,
        })
    }

    /// Cancels on behalf of the member or an admin; the identity provider
    /// already vouched for `actor_id`, so it is only recorded, not checked.
    pub async fn cancel(
        &self,
        reservation_id: Ulid,
        actor_id: Option<&str>,
    ) -> Result<BookingOutcome, BookingError> {
        let now = Utc::now();
        let reservation = self
            .store
            .get(reservation_id)
            .await?
            .ok_or_else(|| BookingError::NotFound(format!("reservation {reservation_id}")))?;
        let key = reservation.key();

        match reservation.status {
            ReservationStatus::Confirmed => {}
            // Retried cancellation replays without a second release.
            ReservationStatus::Cancelled => {
                let remaining = self.ledger.remaining(&key, reservation.capacity).await?;
                return Ok(BookingOutcome {
                    reservation,
                    remaining,
                });
            }
            other => {
                return Err(BookingError::InvalidTransition {
                    from: other,
                    to: ReservationStatus::Cancelled,
                });
            }
        }

        if now >= reservation.occurrence_start - self.policy.cancellation_cutoff {
            return Err(BookingError::NotCancellable);
        }

        match self
            .store
            .transition(
                reservation_id,
                ReservationStatus::Confirmed,
                ReservationStatus::Cancelled,
                now,
            )
            .await?
        {
            Transition::Applied(updated) => {
                self.ledger.release(&key).await?;
                info!(
                    reservation = %updated.id,
                    member = updated.member_id,
                    actor = actor_id.unwrap_or(&updated.member_id),
                    "booking cancelled"
                );
                let remaining = self.ledger.remaining(&key, updated.capacity).await?;
                Ok(BookingOutcome {
                    reservation: updated,
                    remaining,
                })
            }
            // A concurrent retry won the race; its release already happened.
            Transition::AlreadyInTarget(updated) => {
                let remaining = self.ledger.remaining(&key, updated.capacity).await?;
                Ok(BookingOutcome {
                    reservation: updated,
                    remaining,
                })
            }
            Transition::Mismatch { actual } => Err(BookingError::InvalidTransition {
                from: actual,
                to: ReservationStatus::Cancelled,
            }),
            Transition::NotFound => {
                Err(BookingError::NotFound(format!("reservation {reservation_id}")))
            }
        }
    }

    /// Upcoming occurrences for the next `weeks` weeks across the whole
    /// catalog, each with its remaining capacity.
    pub async fn upcoming(&self, weeks: u8) -> Result<Vec<TimetableSlot>, BookingError> {
        let now = Utc::now();
        let mut found: Vec<Occurrence> = Vec::new();
        for template in self.catalog.templates().await? {
            let Some(location) = self.catalog.location(&template.location_id).await? else {
                warn!(template = %template.id, "template references unknown location");
                continue;
            };
            let from = now.with_timezone(&location.timezone).date_naive();
            let until = from + ChronoDuration::days(i64::from(weeks) * 7);
            for rule in self.catalog.rules_for(&template.id).await? {
                for occurrence in
                    resolver::occurrences(&template, &rule, location.timezone, from, until)
                {
                    if occurrence.start.with_timezone(&Utc) > now {
                        found.push(occurrence);
                    }
                }
            }
        }
        found.sort_by(|a, b| a.start.cmp(&b.start).then_with(|| a.name.cmp(&b.name)));

        let lookups = found.into_iter().map(|occurrence| async move {
            let remaining = self
                .ledger
                .remaining(&occurrence.key(), occurrence.capacity)
                .await?;
            Ok::<TimetableSlot, BookingError>(TimetableSlot {
                occurrence,
                remaining,
            })
        });
        try_join_all(lookups).await
    }

    pub async fn member_reservations(
        &self,
        member_id: &str,
    ) -> Result<Vec<Reservation>, BookingError> {
        Ok(self.store.reservations_for_member(member_id).await?)
    }

    pub fn store(&self) -> Arc<dyn ReservationStore> {
        Arc::clone(&self.store)
    }
}
