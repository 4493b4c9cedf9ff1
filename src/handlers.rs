use axum::extract::Path;
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use axum_extra::extract::TypedHeader;
use axum_extra::headers::{Authorization, authorization::Bearer};
use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;
use utoipa::ToSchema;

use crate::booking::TimetableSlot;
use crate::reconcile::ReconcileOutcome;
use crate::{
    AppState, auth::verify_token, error::ApiError, models::Reservation,
    models::ReservationStatus, validation::validate_weeks,
};

#[derive(Debug, serde::Deserialize)]
pub struct TimetableQuery {
    #[serde(default = "default_weeks")]
    pub weeks: u8,
    pub token: Option<String>,
}

fn default_weeks() -> u8 {
    1
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct BookingRequest {
    pub member_id: String,
    pub class_template_id: String,
    /// Must be an instant the timetable itself lists for this class.
    #[schema(value_type = String, format = "date-time", example = "2026-01-05T06:00:00+01:00")]
    pub occurrence_start: DateTime<FixedOffset>,
    /// Optional caller token, kept for request tracing. Deduplication is
    /// keyed by (member, occurrence) regardless.
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct BookingResponse {
    #[schema(value_type = String)]
    pub reservation_id: Ulid,
    pub remaining_capacity: u32,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CancellationRequest {
    #[schema(value_type = String)]
    pub reservation_id: Ulid,
    /// Member or admin performing the cancellation.
    pub actor_id: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CancellationResponse {
    #[schema(value_type = String)]
    pub reservation_id: Ulid,
    pub status: ReservationStatus,
    pub remaining_capacity: u32,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct TimetableEntry {
    pub class_template_id: String,
    pub name: String,
    pub instructor: String,
    pub location_id: String,
    #[schema(value_type = String, format = "date-time")]
    pub start: DateTime<FixedOffset>,
    #[schema(value_type = String, format = "date-time")]
    pub end: DateTime<FixedOffset>,
    pub capacity: u32,
    pub remaining: u32,
}

impl From<TimetableSlot> for TimetableEntry {
    fn from(slot: TimetableSlot) -> Self {
        Self {
            class_template_id: slot.occurrence.template_id,
            name: slot.occurrence.name,
            instructor: slot.occurrence.instructor,
            location_id: slot.occurrence.location_id,
            start: slot.occurrence.start,
            end: slot.occurrence.end,
            capacity: slot.occurrence.capacity,
            remaining: slot.remaining,
        }
    }
}

#[utoipa::path(get, path = "/", tag = "booking")]
pub async fn root() -> impl IntoResponse {
    Json(serde_json::json!({
        "message": "Class Booking API",
        "endpoints": {
            "/timetable": "Upcoming class occurrences with remaining capacity",
            "/bookings": "POST a booking request",
            "/cancellations": "POST a cancellation request",
            "/members/{member_id}/bookings": "A member's reservations",
            "/reconciliation": "POST to finalize attendance for past classes"
        }
    }))
}

#[utoipa::path(get, path = "/healthz/live", tag = "booking")]
pub async fn healthz_live() -> impl IntoResponse {
    Json(serde_json::json!({"status": "ok"}))
}

#[utoipa::path(get, path = "/healthz/ready", tag = "booking")]
pub async fn healthz_ready() -> impl IntoResponse {
    Json(serde_json::json!({"status": "ok"}))
}

#[utoipa::path(
    get,
    path = "/timetable",
    params(
        ("weeks" = u8, Query, description = "Number of weeks ahead (1 to the booking horizon)"),
        ("token" = Option<String>, Query, description = "Authentication token (alternative to Bearer header)")
    ),
    responses(
        (status = 200, description = "Upcoming occurrences", body = [TimetableEntry]),
        (status = 401, description = "Invalid authentication token")
    ),
    security(("bearer_auth" = []), ("query_token" = [])),
    tag = "booking"
)]
pub async fn get_timetable(
    State(state): State<AppState>,
    auth: Option<TypedHeader<Authorization<Bearer>>>,
    axum::extract::Query(query): axum::extract::Query<TimetableQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let auth_header = auth.map(|TypedHeader(a)| a);
    verify_token(&state.settings, auth_header, query.token.as_deref())?;

    let weeks = validate_weeks(query.weeks, state.settings.booking_horizon_weeks)?;
    let slots = state.service.upcoming(weeks).await?;
    let entries: Vec<TimetableEntry> = slots.into_iter().map(TimetableEntry::from).collect();
    Ok(Json(entries))
}

#[utoipa::path(
    post,
    path = "/bookings",
    request_body = BookingRequest,
    responses(
        (status = 201, description = "Booking confirmed", body = BookingResponse),
        (status = 400, description = "Fabricated or past occurrence start"),
        (status = 401, description = "Invalid authentication token"),
        (status = 404, description = "Unknown class template"),
        (status = 409, description = "Capacity exhausted or overlapping reservation"),
        (status = 503, description = "Busy, retry with backoff")
    ),
    security(("bearer_auth" = [])),
    tag = "booking"
)]
pub async fn post_booking(
    State(state): State<AppState>,
    auth: Option<TypedHeader<Authorization<Bearer>>>,
    Json(request): Json<BookingRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let auth_header = auth.map(|TypedHeader(a)| a);
    verify_token(&state.settings, auth_header, None)?;

    if let Some(key) = &request.idempotency_key {
        tracing::debug!(idempotency_key = key, member = request.member_id, "booking request");
    }
    let outcome = state
        .service
        .book(
            &request.member_id,
            &request.class_template_id,
            request.occurrence_start.with_timezone(&Utc),
        )
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(BookingResponse {
            reservation_id: outcome.reservation.id,
            remaining_capacity: outcome.remaining,
        }),
    ))
}

#[utoipa::path(
    post,
    path = "/cancellations",
    request_body = CancellationRequest,
    responses(
        (status = 200, description = "Reservation cancelled", body = CancellationResponse),
        (status = 401, description = "Invalid authentication token"),
        (status = 404, description = "Unknown reservation"),
        (status = 409, description = "Past the cutoff or not cancellable")
    ),
    security(("bearer_auth" = [])),
    tag = "booking"
)]
pub async fn post_cancellation(
    State(state): State<AppState>,
    auth: Option<TypedHeader<Authorization<Bearer>>>,
    Json(request): Json<CancellationRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let auth_header = auth.map(|TypedHeader(a)| a);
    verify_token(&state.settings, auth_header, None)?;

    let outcome = state
        .service
        .cancel(request.reservation_id, request.actor_id.as_deref())
        .await?;
    Ok(Json(CancellationResponse {
        reservation_id: outcome.reservation.id,
        status: outcome.reservation.status,
        remaining_capacity: outcome.remaining,
    }))
}

#[utoipa::path(
    get,
    path = "/members/{member_id}/bookings",
    params(("member_id" = String, Path, description = "Member identity")),
    responses(
        (status = 200, description = "The member's reservations", body = [Reservation]),
        (status = 401, description = "Invalid authentication token")
    ),
    security(("bearer_auth" = [])),
    tag = "booking"
)]
pub async fn get_member_bookings(
    State(state): State<AppState>,
    auth: Option<TypedHeader<Authorization<Bearer>>>,
    Path(member_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let auth_header = auth.map(|TypedHeader(a)| a);
    verify_token(&state.settings, auth_header, None)?;

    let reservations = state.service.member_reservations(&member_id).await?;
    Ok(Json(reservations))
}

#[utoipa::path(
    post,
    path = "/reconciliation",
    responses(
        (status = 200, description = "Attendance finalized", body = ReconcileOutcome),
        (status = 401, description = "Invalid authentication token")
    ),
    security(("bearer_auth" = [])),
    tag = "booking"
)]
pub async fn post_reconciliation(
    State(state): State<AppState>,
    auth: Option<TypedHeader<Authorization<Bearer>>>,
) -> Result<impl IntoResponse, ApiError> {
    let auth_header = auth.map(|TypedHeader(a)| a);
    verify_token(&state.settings, auth_header, None)?;

    let outcome = state.reconciler.run_once(Utc::now()).await?;
    Ok(Json(outcome))
}
