use utoipa::openapi::security::{ApiKey, ApiKeyValue, HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};

use crate::handlers::{
    BookingRequest, BookingResponse, CancellationRequest, CancellationResponse, TimetableEntry,
};
use crate::models::{Reservation, ReservationStatus};
use crate::reconcile::ReconcileOutcome;

pub struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.as_mut().unwrap();
        components.add_security_scheme(
            "bearer_auth",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .build(),
            ),
        );
        components.add_security_scheme(
            "query_token",
            SecurityScheme::ApiKey(ApiKey::Query(ApiKeyValue::new("token"))),
        );
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::handlers::root,
        crate::handlers::healthz_live,
        crate::handlers::healthz_ready,
        crate::handlers::get_timetable,
        crate::handlers::post_booking,
        crate::handlers::post_cancellation,
        crate::handlers::get_member_bookings,
        crate::handlers::post_reconciliation
    ),
    components(schemas(
        TimetableEntry,
        BookingRequest,
        BookingResponse,
        CancellationRequest,
        CancellationResponse,
        Reservation,
        ReservationStatus,
        ReconcileOutcome
    )),
    tags(
        (name = "booking", description = "Class scheduling and reservation operations")
    ),
    modifiers(&SecurityAddon),
)]
pub struct ApiDoc;
