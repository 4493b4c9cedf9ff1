use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};
use utoipa::ToSchema;

use crate::checkin::AttendanceSource;
use crate::error::BookingError;
use crate::lifecycle::Transition;
use crate::models::{OccurrenceKey, Reservation, ReservationStatus};
use crate::store::ReservationStore;

#[derive(Debug, Default, Clone, Copy, Serialize, ToSchema)]
pub struct ReconcileOutcome {
    pub completed: u32,
    pub no_show: u32,
}

/// Finalizes attendance for occurrences that have ended: members with a
/// check-in become `completed`, the rest `no_show`. Runs outside the
/// real-time booking path, either on the periodic sweep or on demand.
pub struct Reconciler {
    store: Arc<dyn ReservationStore>,
    attendance: Arc<dyn AttendanceSource>,
}

impl Reconciler {
    pub fn new(store: Arc<dyn ReservationStore>, attendance: Arc<dyn AttendanceSource>) -> Self {
        Self { store, attendance }
    }

    pub async fn run_once(&self, now: DateTime<Utc>) -> Result<ReconcileOutcome, BookingError> {
        let due = self.store.confirmed_ended_before(now).await?;
        let mut by_occurrence: HashMap<OccurrenceKey, Vec<Reservation>> = HashMap::new();
        for reservation in due {
            by_occurrence
                .entry(reservation.key())
                .or_default()
                .push(reservation);
        }

        let mut outcome = ReconcileOutcome::default();
        for (key, group) in by_occurrence {
            let present = match self.attendance.checked_in_members(&key).await {
                Ok(present) => present,
                // No guessing on collaborator failure: the occurrence stays
                // confirmed and is retried on the next sweep.
                Err(err) => {
                    warn!(occurrence = %key, error = %err, "attendance fetch failed, skipping");
                    continue;
                }
            };
            for reservation in group {
                let target = if present.contains(&reservation.member_id) {
                    ReservationStatus::Completed
                } else {
                    ReservationStatus::NoShow
                };
                if !reservation.status.can_transition_to(target) {
                    continue;
                }
                match self
                    .store
                    .transition(reservation.id, ReservationStatus::Confirmed, target, now)
                    .await?
                {
                    Transition::Applied(_) => match target {
                        ReservationStatus::Completed => outcome.completed += 1,
                        _ => outcome.no_show += 1,
                    },
                    // Another sweep got there first.
                    other => {
                        debug!(reservation = %reservation.id, ?other, "reconciliation skipped")
                    }
                }
            }
        }
        Ok(outcome)
    }
}

/// Periodic reconciliation sweep. Lives for the whole process; missed ticks
/// collapse instead of bursting.
pub fn spawn_sweeper(reconciler: Arc<Reconciler>, every: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match reconciler.run_once(Utc::now()).await {
                Ok(outcome) if outcome.completed + outcome.no_show > 0 => {
                    info!(
                        completed = outcome.completed,
                        no_show = outcome.no_show,
                        "reconciliation sweep finished"
                    );
                }
                Ok(_) => {}
                Err(err) => warn!(error = %err, "reconciliation sweep failed"),
            }
        }
    })
}
