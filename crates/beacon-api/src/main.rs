// Beacon API server
// Decision: identity arrives pre-authenticated via the x-beacon-user header
// Decision: the event registry is populated once here, before any traffic

mod auth;
mod events;

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use beacon_core::{
    BusConfig, BusStats, Event, EventManager, EventPriority, EventRegistry, NotificationPayload,
    TaskResultPayload,
};
use beacon_storage::PgEventStore;

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    stats: BusStats,
}

async fn health(State(manager): State<Arc<EventManager>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        stats: manager.stats(),
    })
}

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    paths(
        events::create_event,
        events::mark_read,
        events::mark_read_batch,
        events::stream_events,
    ),
    components(
        schemas(
            Event,
            EventPriority,
            BusStats,
            events::CreateEventRequest,
            events::MarkReadResponse,
            events::MarkReadBatchRequest,
            events::MarkReadBatchResponse,
        )
    ),
    tags(
        (name = "events", description = "Event creation, read acknowledgment, and SSE streaming")
    ),
    info(
        title = "Beacon API",
        version = "0.1.0",
        description = "Per-user server-push notification bus",
        license(name = "MIT", url = "https://opensource.org/licenses/MIT")
    )
)]
struct ApiDoc;

/// Build the application router (extracted for testing)
fn build_router(manager: Arc<EventManager>) -> Router {
    Router::new()
        .route("/health", get(health).with_state(manager.clone()))
        .merge(events::routes(events::AppState { manager }))
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "beacon_api=debug,beacon_core=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("beacon-api starting...");

    // Initialize database
    let database_url =
        std::env::var("DATABASE_URL").context("DATABASE_URL environment variable required")?;
    let store = PgEventStore::from_url(&database_url)
        .await
        .context("Failed to connect to database")?;
    store
        .run_migrations()
        .await
        .context("Failed to run migrations")?;
    tracing::info!("Connected to database");

    // The registry is populated once, before any traffic is accepted
    let registry = Arc::new(
        EventRegistry::builder()
            .register::<NotificationPayload>("notification")
            .register::<TaskResultPayload>("task_result")
            .build(),
    );

    let config = BusConfig::from_env();
    tracing::info!(
        max_connections_per_user = config.max_connections_per_user,
        dispatch_queue_capacity = config.dispatch_queue_capacity,
        stream_queue_capacity = config.stream_queue_capacity,
        "Event bus configured"
    );

    let manager = EventManager::start(Arc::new(store), registry, config)
        .await
        .context("Failed to start event manager")?;

    let app = build_router(manager.clone())
        .merge(SwaggerUi::new("/swagger-ui").url("/api-doc/openapi.json", ApiDoc::openapi()))
        .layer(TraceLayer::new_for_http());

    // Start server
    let addr = std::env::var("BEACON_LISTEN_ADDR").unwrap_or_else(|_| "0.0.0.0:9000".to_string());
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;
    tracing::info!("Listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    // Ordered teardown: close streams, drain the dispatch queue, final purge
    manager.shutdown().await;

    Ok(())
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c().await.ok();
    tracing::info!("shutdown signal received");
}
