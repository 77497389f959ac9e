use crate::config::ServeArgs;
use crate::error::ProvisionError;
use crate::fragment::SandboxRequest;
use crate::provisioner::SessionProvisioner;
use crate::sandbox::e2b::E2bProvider;
use anyhow::Result;
use axum::{
    error_handling::HandleErrorLayer,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    BoxError, Json, Router,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tower::timeout::error::Elapsed;
use tower::timeout::TimeoutLayer;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

pub struct AppState {
    pub provisioner: SessionProvisioner,
}

pub fn router(state: Arc<AppState>, max_request: Duration) -> Router {
    Router::new()
        .route("/api/sandbox", post(create_sandbox))
        .route("/health", get(health))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(HandleErrorLayer::new(handle_middleware_error))
                .layer(TimeoutLayer::new(max_request)),
        )
        .layer(TraceLayer::new_for_http())
}

pub async fn start_server(args: &ServeArgs) -> Result<()> {
    let provider = Arc::new(E2bProvider::new(args.e2b_domain.clone()));
    let provisioner = SessionProvisioner::new(args.provisioner_config(), provider);
    if provisioner.config().api_key().is_none() {
        error!("E2B_API_KEY is not set; sandbox requests will fail until it is configured");
    }

    let state = Arc::new(AppState { provisioner });
    let app = router(state, args.max_request_duration());

    let addr = args.socket_addr();
    info!(%addr, "fragments sandbox server listening");

    axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .await?;

    Ok(())
}

/// The handler deadline is a server-side limit, so it reports 504.
async fn handle_middleware_error(err: BoxError) -> Response {
    if err.is::<Elapsed>() {
        error!("sandbox request exceeded the handler deadline");
        return (
            StatusCode::GATEWAY_TIMEOUT,
            Json(json!({ "error": "Sandbox request timed out" })),
        )
            .into_response();
    }

    error!(error = %err, "unhandled middleware error");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": err.to_string() })),
    )
        .into_response()
}

async fn health() -> &'static str {
    "ok"
}

async fn create_sandbox(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SandboxRequest>,
) -> Response {
    let (fragment, caller) = request.into_parts();

    match state.provisioner.provision(&fragment, &caller).await {
        Ok(result) => {
            info!(sandbox_id = result.sbx_id(), template = %fragment.template, "fragment ready");
            (StatusCode::OK, Json(result)).into_response()
        }
        Err(e) => e.into_response(),
    }
}

impl IntoResponse for ProvisionError {
    fn into_response(self) -> Response {
        if !self.is_guarded() {
            error!(error = %self, "provisioning aborted");
        }
        (StatusCode::INTERNAL_SERVER_ERROR, Json(self.response_body())).into_response()
    }
}
