use crate::models::{Reservation, ReservationStatus};

impl ReservationStatus {
    /// `Confirmed` is the only live state; everything else is terminal.
    pub fn is_terminal(self) -> bool {
        !matches!(self, ReservationStatus::Confirmed)
    }

    /// The full transition table. Terminal states never move again;
    /// re-booking after cancellation is a new reservation, not a transition.
    pub fn can_transition_to(self, target: ReservationStatus) -> bool {
        matches!(
            (self, target),
            (
                ReservationStatus::Confirmed,
                ReservationStatus::Cancelled
                    | ReservationStatus::Completed
                    | ReservationStatus::NoShow,
            )
        )
    }
}

/// Result of a compare-and-swap status update in the reservation store.
/// `AlreadyInTarget` is how retried requests replay without re-applying side
/// effects: the ledger is only touched on `Applied`.
#[derive(Debug, Clone)]
pub enum Transition {
    Applied(Reservation),
    AlreadyInTarget(Reservation),
    Mismatch { actual: ReservationStatus },
    NotFound,
}
