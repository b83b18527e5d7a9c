use axum::{
    extract::{ConnectInfo, Path, State, WebSocketUpgrade},
    response::{Html, Json, Response},
};
use serde::Serialize;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

use crate::connection::split_websocket;
use crate::relay::Relay;
use crate::session::{run_controller_session, run_device_session};

const FALLBACK_INDEX: &str = "<html><body>\n  <h2>Tank Relay</h2>\n  <p>Index not found. Put the controller page at index.html in the page directory.</p>\n</body></html>\n";

#[derive(Clone)]
pub struct AppState {
    pub relay: Relay,
    pub page_dir: Arc<PathBuf>,
}

impl AppState {
    pub fn new(relay: Relay, page_dir: PathBuf) -> Self {
        Self {
            relay,
            page_dir: Arc::new(page_dir),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HealthStatus {
    status: &'static str,
    tanks: Vec<String>,
}

pub async fn health_check(State(state): State<AppState>) -> Json<HealthStatus> {
    Json(HealthStatus {
        status: "ok",
        tanks: state.relay.list_online_device_ids(),
    })
}

pub async fn index(State(state): State<AppState>) -> Html<String> {
    let path = state.page_dir.join("index.html");
    match tokio::fs::read_to_string(&path).await {
        Ok(page) => Html(page),
        Err(e) => {
            debug!("serving fallback index, {} unreadable: {}", path.display(), e);
            Html(FALLBACK_INDEX.to_string())
        }
    }
}

/// Tank firmware connects here, one socket per tank id.
pub async fn device_ws_handler(
    ws: WebSocketUpgrade,
    Path(tank_id): Path<String>,
    remote: Option<ConnectInfo<SocketAddr>>,
    State(state): State<AppState>,
) -> Response {
    ws.on_upgrade(move |socket| async move {
        info!(
            tank_id = %tank_id,
            remote = ?remote.map(|ConnectInfo(addr)| addr),
            "tank websocket accepted"
        );
        let (outbound, inbound) = split_websocket(socket);
        run_device_session(state.relay, tank_id, Arc::new(outbound), inbound).await;
    })
}

/// Browser controllers connect here.
pub async fn control_ws_handler(
    ws: WebSocketUpgrade,
    remote: Option<ConnectInfo<SocketAddr>>,
    State(state): State<AppState>,
) -> Response {
    ws.on_upgrade(move |socket| async move {
        info!(
            remote = ?remote.map(|ConnectInfo(addr)| addr),
            "controller websocket accepted"
        );
        let (outbound, inbound) = split_websocket(socket);
        run_controller_session(state.relay, Arc::new(outbound), inbound).await;
    })
}
