use std::sync::Arc;

use axum::{
    body::Body,
    http::{Request, StatusCode, header},
};
use chrono::{DateTime, Datelike, Duration, NaiveTime, TimeZone, Utc};
use chrono_tz::Europe::Madrid;
use chrono_tz::Tz;
use class_booking::models::{
    ClassTemplate, Intensity, Location, Occurrence, Reservation, ScheduleRule,
};
use class_booking::checkin::HttpCheckinClient;
use class_booking::settings::Settings;
use class_booking::store::{InMemoryCatalog, InMemoryReservationStore, ReservationStore};
use class_booking::{AppState, build_router};
use httpmock::prelude::*;
use serde_json::{Value, json};
use tower::Service;
use url::Url;

/// Helper to build the test catalog: one sede, Spinning (capacity 2, Monday
/// 06:00-07:00) and Yoga (capacity 5, Monday 06:30-07:30).
fn test_catalog() -> InMemoryCatalog {
    let locations = vec![Location {
        id: "centro".to_string(),
        name: "Sede Centro".to_string(),
        timezone: Madrid,
    }];
    let templates = vec![
        ClassTemplate {
            id: "spinning".to_string(),
            name: "Spinning".to_string(),
            duration_min: 60,
            intensity: Intensity::High,
            capacity: 2,
            instructor: "Marta".to_string(),
            location_id: "centro".to_string(),
        },
        ClassTemplate {
            id: "yoga".to_string(),
            name: "Yoga".to_string(),
            duration_min: 60,
            intensity: Intensity::Low,
            capacity: 5,
            instructor: "Ana".to_string(),
            location_id: "centro".to_string(),
        },
    ];
    let rules = vec![
        ScheduleRule {
            id: "spinning-mon".to_string(),
            template_id: "spinning".to_string(),
            weekday: 0,
            start_time: NaiveTime::from_hms_opt(6, 0, 0).unwrap(),
            end_time: NaiveTime::from_hms_opt(7, 0, 0).unwrap(),
            active: true,
            valid_from: None,
            valid_until: None,
        },
        ScheduleRule {
            id: "yoga-mon".to_string(),
            template_id: "yoga".to_string(),
            weekday: 0,
            start_time: NaiveTime::from_hms_opt(6, 30, 0).unwrap(),
            end_time: NaiveTime::from_hms_opt(7, 30, 0).unwrap(),
            active: true,
            valid_from: None,
            valid_until: None,
        },
    ];
    InMemoryCatalog::from_parts(locations, templates, rules).unwrap()
}

/// Helper function to create test app state; returns the reservation store
/// handle so tests can seed durable state directly.
fn create_test_state(checkin_url: Url) -> (AppState, Arc<InMemoryReservationStore>) {
    let settings = Settings {
        checkin_base_url: checkin_url,
        debug: true,
        auth_token: "test-token-123".to_string(),
        enable_swagger: true,
        port: 8080,
        catalog_path: None,
        cancellation_cutoff_min: 0,
        booking_horizon_weeks: 6,
        lock_wait_ms: 2000,
        reconcile_interval_secs: 300,
    };

    let store = Arc::new(InMemoryReservationStore::new());
    let reservations: Arc<dyn ReservationStore> = store.clone();
    let attendance = Arc::new(HttpCheckinClient::new(settings.checkin_base_url.clone()));
    let state = AppState::new(settings, Arc::new(test_catalog()), reservations, attendance);
    (state, store)
}

/// The next Monday strictly after today at the given Madrid wall time.
fn next_monday(hour: u32, minute: u32) -> DateTime<Tz> {
    let mut date = Utc::now().with_timezone(&Madrid).date_naive() + Duration::days(1);
    while date.weekday().num_days_from_monday() != 0 {
        date += Duration::days(1);
    }
    Madrid
        .from_local_datetime(&date.and_time(NaiveTime::from_hms_opt(hour, minute, 0).unwrap()))
        .earliest()
        .unwrap()
}

/// Helper to extract response body as string
async fn response_body_string(body: Body) -> String {
    let bytes = axum::body::to_bytes(body, usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

async fn response_body_json(body: Body) -> Value {
    serde_json::from_str(&response_body_string(body).await).unwrap()
}

fn get_request(uri: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header(header::AUTHORIZATION, "Bearer test-token-123")
        .body(Body::empty())
        .unwrap()
}

fn post_request(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::AUTHORIZATION, "Bearer test-token-123")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn booking_body(member_id: &str, template_id: &str, start: DateTime<Tz>) -> Value {
    json!({
        "member_id": member_id,
        "class_template_id": template_id,
        "occurrence_start": start.to_rfc3339(),
    })
}

#[tokio::test]
async fn test_root_endpoint() {
    // Arrange
    let (state, _) = create_test_state(Url::parse("http://example.com").unwrap());
    let mut app = build_router(state);

    // Act
    let response = app
        .call(Request::builder().uri("/").body(Body::empty()).unwrap())
        .await
        .unwrap();

    // Assert
    assert_eq!(response.status(), StatusCode::OK);

    let body = response_body_string(response.into_body()).await;
    assert!(body.contains("Class Booking API"));
    assert!(body.contains("/timetable"));
    assert!(body.contains("/bookings"));
}

#[tokio::test]
async fn test_healthz_endpoints() {
    // Arrange
    let (state, _) = create_test_state(Url::parse("http://example.com").unwrap());
    let mut app = build_router(state);

    for uri in ["/healthz/live", "/healthz/ready"] {
        // Act
        let response = app
            .call(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();

        // Assert
        assert_eq!(response.status(), StatusCode::OK);
        let body = response_body_string(response.into_body()).await;
        assert!(body.contains(r#""status":"ok"#));
    }
}

#[tokio::test]
async fn test_timetable_requires_auth() {
    // Arrange
    let (state, _) = create_test_state(Url::parse("http://example.com").unwrap());
    let mut app = build_router(state);

    // Act - no token at all
    let response = app
        .call(
            Request::builder()
                .uri("/timetable")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    // Act - wrong token
    let response = app
        .call(
            Request::builder()
                .uri("/timetable?token=invalid-token")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_timetable_lists_occurrences_with_remaining() {
    // Arrange
    let (state, _) = create_test_state(Url::parse("http://example.com").unwrap());
    let mut app = build_router(state);

    // Act - two weeks always include at least one Monday
    let response = app.call(get_request("/timetable?weeks=2")).await.unwrap();

    // Assert
    assert_eq!(response.status(), StatusCode::OK);
    let entries = response_body_json(response.into_body()).await;
    let entries = entries.as_array().unwrap();
    assert!(entries.iter().any(|e| e["class_template_id"] == "spinning"));
    assert!(entries.iter().any(|e| e["class_template_id"] == "yoga"));
    let spinning = entries
        .iter()
        .find(|e| e["class_template_id"] == "spinning")
        .unwrap();
    assert_eq!(spinning["capacity"], 2);
    assert_eq!(spinning["remaining"], 2);
}

#[tokio::test]
async fn test_timetable_invalid_weeks_param() {
    // Arrange
    let (state, _) = create_test_state(Url::parse("http://example.com").unwrap());
    let mut app = build_router(state);

    for uri in ["/timetable?weeks=0", "/timetable?weeks=7"] {
        // Act
        let response = app.call(get_request(uri)).await.unwrap();

        // Assert
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}

#[tokio::test]
async fn test_booking_requires_auth() {
    // Arrange
    let (state, _) = create_test_state(Url::parse("http://example.com").unwrap());
    let mut app = build_router(state);

    // Act
    let response = app
        .call(
            Request::builder()
                .method("POST")
                .uri("/bookings")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(
                    booking_body("member-a", "spinning", next_monday(6, 0)).to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();

    // Assert
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_booking_capacity_flow() {
    // Arrange
    let (state, _) = create_test_state(Url::parse("http://example.com").unwrap());
    let mut app = build_router(state);
    let start = next_monday(6, 0);

    // Act - fill the class
    let first = app
        .call(post_request("/bookings", booking_body("member-a", "spinning", start)))
        .await
        .unwrap();
    assert_eq!(first.status(), StatusCode::CREATED);
    let first_body = response_body_json(first.into_body()).await;
    assert_eq!(first_body["remaining_capacity"], 1);

    let second = app
        .call(post_request("/bookings", booking_body("member-b", "spinning", start)))
        .await
        .unwrap();
    assert_eq!(second.status(), StatusCode::CREATED);
    let second_body = response_body_json(second.into_body()).await;
    assert_eq!(second_body["remaining_capacity"], 0);

    // Act - one over capacity
    let third = app
        .call(post_request("/bookings", booking_body("member-c", "spinning", start)))
        .await
        .unwrap();

    // Assert
    assert_eq!(third.status(), StatusCode::CONFLICT);
    let third_body = response_body_json(third.into_body()).await;
    assert_eq!(third_body["error"], "capacity_exceeded");
}

#[tokio::test]
async fn test_booking_rejects_overlapping_reservation() {
    // Arrange
    let (state, _) = create_test_state(Url::parse("http://example.com").unwrap());
    let mut app = build_router(state);

    let spinning = app
        .call(post_request(
            "/bookings",
            booking_body("member-a", "spinning", next_monday(6, 0)),
        ))
        .await
        .unwrap();
    assert_eq!(spinning.status(), StatusCode::CREATED);

    // Act - yoga overlaps 06:30-07:00
    let yoga = app
        .call(post_request(
            "/bookings",
            booking_body("member-a", "yoga", next_monday(6, 30)),
        ))
        .await
        .unwrap();

    // Assert
    assert_eq!(yoga.status(), StatusCode::CONFLICT);
    let body = response_body_json(yoga.into_body()).await;
    assert_eq!(body["error"], "overlapping_reservation");
}

#[tokio::test]
async fn test_booking_rejects_fabricated_start() {
    // Arrange
    let (state, _) = create_test_state(Url::parse("http://example.com").unwrap());
    let mut app = build_router(state);

    // Act - 06:17 is not on the timetable
    let response = app
        .call(post_request(
            "/bookings",
            booking_body("member-a", "spinning", next_monday(6, 17)),
        ))
        .await
        .unwrap();

    // Assert
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = response_body_json(response.into_body()).await;
    assert_eq!(body["error"], "invalid_occurrence");
}

#[tokio::test]
async fn test_booking_is_idempotent() {
    // Arrange
    let (state, _) = create_test_state(Url::parse("http://example.com").unwrap());
    let mut app = build_router(state);
    let start = next_monday(6, 0);

    // Act
    let first = app
        .call(post_request("/bookings", booking_body("member-a", "spinning", start)))
        .await
        .unwrap();
    let first_body = response_body_json(first.into_body()).await;
    let replay = app
        .call(post_request("/bookings", booking_body("member-a", "spinning", start)))
        .await
        .unwrap();
    let replay_body = response_body_json(replay.into_body()).await;

    // Assert - same reservation, one unit consumed
    assert_eq!(first_body["reservation_id"], replay_body["reservation_id"]);
    assert_eq!(replay_body["remaining_capacity"], 1);
}

#[tokio::test]
async fn test_cancellation_flow() {
    // Arrange
    let (state, _) = create_test_state(Url::parse("http://example.com").unwrap());
    let mut app = build_router(state);
    let start = next_monday(6, 0);

    let booked = app
        .call(post_request("/bookings", booking_body("member-a", "spinning", start)))
        .await
        .unwrap();
    let booked_body = response_body_json(booked.into_body()).await;
    let reservation_id = booked_body["reservation_id"].clone();

    // Act
    let cancelled = app
        .call(post_request(
            "/cancellations",
            json!({"reservation_id": reservation_id}),
        ))
        .await
        .unwrap();

    // Assert
    assert_eq!(cancelled.status(), StatusCode::OK);
    let cancelled_body = response_body_json(cancelled.into_body()).await;
    assert_eq!(cancelled_body["status"], "cancelled");
    assert_eq!(cancelled_body["remaining_capacity"], 2);

    // Act - retried cancellation replays, no double release
    let retried = app
        .call(post_request(
            "/cancellations",
            json!({"reservation_id": reservation_id}),
        ))
        .await
        .unwrap();
    assert_eq!(retried.status(), StatusCode::OK);
    let retried_body = response_body_json(retried.into_body()).await;
    assert_eq!(retried_body["remaining_capacity"], 2);
}

#[tokio::test]
async fn test_cancellation_unknown_reservation() {
    // Arrange
    let (state, _) = create_test_state(Url::parse("http://example.com").unwrap());
    let mut app = build_router(state);

    // Act
    let response = app
        .call(post_request(
            "/cancellations",
            json!({"reservation_id": "01ARZ3NDEKTSV4RRFFQ69G5FAV"}),
        ))
        .await
        .unwrap();

    // Assert
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_member_bookings_listing() {
    // Arrange
    let (state, _) = create_test_state(Url::parse("http://example.com").unwrap());
    let mut app = build_router(state);

    app.call(post_request(
        "/bookings",
        booking_body("member-a", "spinning", next_monday(6, 0)),
    ))
    .await
    .unwrap();

    // Act
    let response = app
        .call(get_request("/members/member-a/bookings"))
        .await
        .unwrap();

    // Assert
    assert_eq!(response.status(), StatusCode::OK);
    let bookings = response_body_json(response.into_body()).await;
    let bookings = bookings.as_array().unwrap().to_vec();
    assert_eq!(bookings.len(), 1);
    assert_eq!(bookings[0]["member_id"], "member-a");
    assert_eq!(bookings[0]["status"], "confirmed");
}

#[tokio::test]
async fn test_reconciliation_with_checkin_collaborator() {
    // Arrange - a past occurrence seeded straight into the store
    let mock_server = MockServer::start();
    let (state, store) = create_test_state(Url::parse(&mock_server.base_url()).unwrap());

    let now = Utc::now();
    let occurrence = Occurrence {
        template_id: "spinning".to_string(),
        rule_id: "spinning-mon".to_string(),
        name: "Spinning".to_string(),
        instructor: "Marta".to_string(),
        location_id: "centro".to_string(),
        start: (now - Duration::hours(2)).fixed_offset(),
        end: (now - Duration::hours(1)).fixed_offset(),
        capacity: 2,
    };
    let attended = Reservation::confirmed("member-a", &occurrence, now);
    let skipped = Reservation::confirmed("member-b", &occurrence, now);
    store.insert(attended.clone()).await.unwrap();
    store.insert(skipped.clone()).await.unwrap();

    mock_server.mock(|when, then| {
        when.method(GET).path_matches("attendance");
        then.status(200).json_body(json!({"members": ["member-a"]}));
    });

    let mut app = build_router(state);

    // Act
    let response = app.call(post_request("/reconciliation", json!({}))).await.unwrap();

    // Assert
    assert_eq!(response.status(), StatusCode::OK);
    let outcome = response_body_json(response.into_body()).await;
    assert_eq!(outcome["completed"], 1);
    assert_eq!(outcome["no_show"], 1);

    let attended = store.get(attended.id).await.unwrap().unwrap();
    assert_eq!(attended.status.to_string(), "completed");
    let skipped = store.get(skipped.id).await.unwrap().unwrap();
    assert_eq!(skipped.status.to_string(), "no_show");
}
