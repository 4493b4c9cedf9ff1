pub mod auth;
pub mod booking;
pub mod checkin;
pub mod conflict;
pub mod error;
pub mod handlers;
pub mod ledger;
pub mod lifecycle;
pub mod models;
pub mod openapi;
pub mod reconcile;
pub mod resolver;
pub mod settings;
pub mod store;
pub mod validation;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    routing::{get, post},
};
use handlers::{
    get_member_bookings, get_timetable, healthz_live, healthz_ready, post_booking,
    post_cancellation, post_reconciliation, root,
};
use http::Method;
use tower_http::LatencyUnit;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::{Level, info, warn};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::booking::{BookingPolicy, BookingService};
use crate::checkin::{AttendanceSource, HttpCheckinClient};
use crate::openapi::ApiDoc;
use crate::reconcile::Reconciler;
use crate::settings::Settings;
use crate::store::{CatalogStore, InMemoryCatalog, InMemoryReservationStore, ReservationStore};

#[derive(Clone)]
pub struct AppState {
    pub settings: Settings,
    pub service: Arc<BookingService>,
    pub reconciler: Arc<Reconciler>,
}

impl AppState {
    pub fn new(
        settings: Settings,
        catalog: Arc<dyn CatalogStore>,
        store: Arc<dyn ReservationStore>,
        attendance: Arc<dyn AttendanceSource>,
    ) -> Self {
        let policy = BookingPolicy::from_settings(&settings);
        let service = Arc::new(BookingService::new(catalog, Arc::clone(&store), policy));
        let reconciler = Arc::new(Reconciler::new(store, attendance));
        Self {
            settings,
            service,
            reconciler,
        }
    }
}

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let settings = Settings::from_env()?;

    let env_filter = if settings.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .without_time()
        .init();

    let catalog = match &settings.catalog_path {
        Some(path) => Arc::new(InMemoryCatalog::load(path)?),
        None => {
            warn!("no catalog_path configured, starting with an empty timetable");
            Arc::new(InMemoryCatalog::empty())
        }
    };
    let store = Arc::new(InMemoryReservationStore::new());
    let attendance = Arc::new(HttpCheckinClient::new(settings.checkin_base_url.clone()));

    let state = AppState::new(settings, catalog, store, attendance);

    reconcile::spawn_sweeper(
        Arc::clone(&state.reconciler),
        Duration::from_secs(state.settings.reconcile_interval_secs),
    );

    let app = build_router(state.clone());

    let addr = SocketAddr::from(([0, 0, 0, 0], state.settings.port));
    info!("Starting Class Booking API on {addr}");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

pub fn build_router(state: AppState) -> Router {
    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
        .on_response(
            DefaultOnResponse::new()
                .level(Level::INFO)
                .latency_unit(LatencyUnit::Millis),
        );

    // The member/instructor/admin dashboards call this API cross-origin.
    let cors_layer = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);

    let mut router = Router::new()
        .route("/", get(root))
        .route("/healthz/live", get(healthz_live))
        .route("/healthz/ready", get(healthz_ready))
        .route("/timetable", get(get_timetable))
        .route("/bookings", post(post_booking))
        .route("/cancellations", post(post_cancellation))
        .route("/members/{member_id}/bookings", get(get_member_bookings))
        .route("/reconciliation", post(post_reconciliation))
        .with_state(state.clone());

    if state.settings.enable_swagger {
        let openapi = ApiDoc::openapi();
        let swagger = SwaggerUi::new("/docs").url("/openapi.json", openapi);
        router = router.merge(swagger);
    }

    router.layer(trace_layer).layer(cors_layer)
}
