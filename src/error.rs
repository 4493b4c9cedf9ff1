use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use tracing::error;
use ulid::Ulid;

use crate::models::ReservationStatus;
use crate::store::StoreError;

/// Engine-level failure taxonomy. Validation variants are terminal for the
/// request; `Busy` and `Unavailable` are retryable by the caller.
#[derive(Debug, Error)]
pub enum BookingError {
    #[error("no scheduled class matches the requested start time, or it already started")]
    InvalidOccurrence,
    #[error("class is fully booked")]
    CapacityExceeded,
    #[error("member already holds an overlapping confirmed reservation {0}")]
    OverlappingReservation(Ulid),
    #[error("reservation cannot move from {from} to {to}")]
    InvalidTransition {
        from: ReservationStatus,
        to: ReservationStatus,
    },
    #[error("reservation is past the cancellation cutoff or not confirmed")]
    NotCancellable,
    #[error("booking system is busy, retry shortly")]
    Busy,
    #[error("{0} not found")]
    NotFound(String),
    #[error("reservation store unavailable: {0}")]
    Unavailable(String),
}

impl From<StoreError> for BookingError {
    fn from(value: StoreError) -> Self {
        BookingError::Unavailable(value.to_string())
    }
}

/// HTTP-facing error: a status code plus a machine-readable kind and a
/// human-readable reason, rendered as a JSON body.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    kind: &'static str,
    reason: String,
}

impl ApiError {
    fn new(status: StatusCode, kind: &'static str, reason: impl Into<String>) -> Self {
        Self {
            status,
            kind,
            reason: reason.into(),
        }
    }

    pub fn unauthorized(reason: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "unauthorized", reason)
    }

    pub fn bad_request(reason: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "bad_request", reason)
    }

    pub fn not_found(reason: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "not_found", reason)
    }

    pub fn internal(reason: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal", reason)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(serde_json::json!({
            "error": self.kind,
            "reason": self.reason,
        }));
        (self.status, body).into_response()
    }
}

impl From<BookingError> for ApiError {
    fn from(value: BookingError) -> Self {
        let reason = value.to_string();
        match value {
            BookingError::InvalidOccurrence => {
                Self::new(StatusCode::BAD_REQUEST, "invalid_occurrence", reason)
            }
            BookingError::CapacityExceeded => {
                Self::new(StatusCode::CONFLICT, "capacity_exceeded", reason)
            }
            BookingError::OverlappingReservation(_) => {
                Self::new(StatusCode::CONFLICT, "overlapping_reservation", reason)
            }
            BookingError::InvalidTransition { .. } => {
                Self::new(StatusCode::CONFLICT, "invalid_transition", reason)
            }
            BookingError::NotCancellable => {
                Self::new(StatusCode::CONFLICT, "not_cancellable", reason)
            }
            BookingError::Busy => Self::new(StatusCode::SERVICE_UNAVAILABLE, "busy", reason),
            BookingError::NotFound(_) => Self::new(StatusCode::NOT_FOUND, "not_found", reason),
            BookingError::Unavailable(err) => {
                error!("storage error: {err}");
                Self::new(
                    StatusCode::SERVICE_UNAVAILABLE,
                    "unavailable",
                    "reservation store unavailable",
                )
            }
        }
    }
}
