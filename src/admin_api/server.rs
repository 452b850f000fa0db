use axum::{
    middleware,
    routing::{get, post, put},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::admin_api::routes::AppState;
use crate::admin_api::{auth, routes};

/// Operator-facing HTTP API: blocklist management, request-log and finding
/// review, and batch-job triggers for external schedulers.
pub struct AdminApiServer {
    state: AppState,
    bind_addr: String,
}

impl AdminApiServer {
    pub fn new(state: AppState, bind_addr: String) -> Self {
        Self { state, bind_addr }
    }

    pub async fn run(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let state = self.state.clone();
        let api_key = state.api_key.clone();

        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);

        let app = Router::new()
            .route("/api/warden/status", get(routes::get_status))
            .route("/api/warden/requests", get(routes::get_requests))
            .route(
                "/api/warden/blocklist",
                get(routes::get_blocklist).post(routes::add_to_blocklist),
            )
            .route(
                "/api/warden/blocklist/{address}/active",
                put(routes::set_block_active),
            )
            .route("/api/warden/suspicious", get(routes::get_suspicious))
            .route(
                "/api/warden/suspicious/resolve",
                post(routes::resolve_suspicious),
            )
            .route("/api/warden/jobs/detection/run", post(routes::run_detection))
            .route("/api/warden/jobs/retention/run", post(routes::run_retention))
            .layer(middleware::from_fn_with_state(
                api_key,
                auth::auth_middleware,
            ))
            .layer(cors)
            .with_state(state);

        let listener = tokio::net::TcpListener::bind(&self.bind_addr).await?;
        info!("Admin API listening on {}", self.bind_addr);
        axum::serve(listener, app).await?;

        Ok(())
    }
}
