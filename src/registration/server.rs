//! HTTP surface serving registration commands.
//!
//! `GET /v3/clusterregistrationtokens/{cluster}/{token}` returns the
//! composed command set as JSON. The Host header of the request supplies
//! the fallback server root when the `server-url` setting is unset.

use axum::{
    Json, Router,
    extract::{Path, State},
    http::{HeaderMap, StatusCode, header},
    routing::get,
};
use kube::{Api, Client};
use tracing::{error, info};

use crate::crd::Cluster;
use crate::registration::commands::{RegistrationCommands, compose};
use crate::settings::SettingStore;

/// Shared state for the registration server
#[derive(Clone)]
pub struct RegistrationState {
    pub client: Client,
    pub settings: SettingStore,
}

/// Create the registration server router
pub fn create_router(state: RegistrationState) -> Router {
    Router::new()
        .route(
            "/v3/clusterregistrationtokens/{cluster}/{token}",
            get(registration_commands),
        )
        .with_state(state)
}

/// Derive the externally visible server root from the request's Host header.
fn request_root_from_host(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::HOST)
        .and_then(|h| h.to_str().ok())
        .filter(|host| !host.is_empty())
        .map(|host| format!("https://{host}"))
}

async fn registration_commands(
    State(state): State<RegistrationState>,
    Path((cluster_name, token)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<Json<RegistrationCommands>, StatusCode> {
    let settings = state.settings.load().await.map_err(|e| {
        error!(error = %e, "Failed to load settings");
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    // command composition tolerates a cluster that no longer exists
    let api: Api<Cluster> = Api::all(state.client.clone());
    let cluster = api.get_opt(&cluster_name).await.map_err(|e| {
        error!(cluster = %cluster_name, error = %e, "Failed to fetch cluster");
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    let request_root = request_root_from_host(&headers);
    Ok(Json(compose(
        &settings,
        cluster.as_ref(),
        &token,
        request_root.as_deref(),
    )))
}

/// Run the registration server
///
/// Binds to 0.0.0.0:8081 and serves registration command endpoints.
pub async fn run_registration_server(state: RegistrationState) -> Result<(), std::io::Error> {
    let app = create_router(state);

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], 8081));
    info!(port = 8081, "Starting registration server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
