// =============================================================================
// REST API Endpoints: Axum 0.7
// =============================================================================
//
// All endpoints live under `/api/v1/`.  Health requires no authentication;
// every other endpoint requires a valid Bearer token checked via the
// `AuthBearer` extractor.
//
//   GET  /api/v1/health            liveness + connection state
//   GET  /api/v1/status            full session snapshot
//   POST /api/v1/control/trading   {"enabled": bool} sets, {} toggles
//   POST /api/v1/control/shutdown  cooperative shutdown
//
// CORS is configured permissively; the API is meant for a local operator.
// =============================================================================

use std::sync::Arc;

use axum::{
    extract::{Json, State},
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use crate::api::auth::AuthBearer;
use crate::app_state::AppState;

// =============================================================================
// Router construction
// =============================================================================

/// Build the REST API router with CORS middleware and shared state.
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // ── Public ──────────────────────────────────────────────────
        .route("/api/v1/health", get(health))
        // ── Authenticated ───────────────────────────────────────────
        .route("/api/v1/status", get(status))
        .route("/api/v1/control/trading", post(control_trading))
        .route("/api/v1/control/shutdown", post(control_shutdown))
        // ── Middleware & State ───────────────────────────────────────
        .layer(cors)
        .with_state(state)
}

// =============================================================================
// Health (public)
// =============================================================================

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthResponse {
    status: &'static str,
    connection: String,
    state_version: u64,
    server_time: i64,
}

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        connection: state.connection.state().to_string(),
        state_version: state.current_state_version(),
        server_time: Utc::now().timestamp_millis(),
    })
}

// =============================================================================
// Status (authenticated)
// =============================================================================

async fn status(_auth: AuthBearer, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.build_snapshot(Utc::now()))
}

// =============================================================================
// Control endpoints (authenticated)
// =============================================================================

#[derive(Deserialize)]
struct TradingRequest {
    #[serde(default)]
    enabled: Option<bool>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ControlResponse {
    trading_enabled: bool,
    message: String,
}

async fn control_trading(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
    Json(req): Json<TradingRequest>,
) -> impl IntoResponse {
    let enabled = match req.enabled {
        Some(enabled) => state.set_trading_enabled(enabled),
        None => state.toggle_trading(),
    };
    info!(enabled, "trading switch changed via API");

    Json(ControlResponse {
        trading_enabled: enabled,
        message: if enabled {
            "Trading enabled".to_string()
        } else {
            "Trading disabled, signals take the paper path".to_string()
        },
    })
}

async fn control_shutdown(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    warn!("shutdown requested via API");
    state.shutdown.trigger();

    Json(ControlResponse {
        trading_enabled: state.tracker.is_trading_enabled(),
        message: "Shutdown initiated".to_string(),
    })
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app_state::fixture::{session, test_config};
    use axum::body::to_bytes;
    use axum::http::StatusCode;
    use serde_json::Value;

    async fn body_json(resp: axum::response::Response) -> Value {
        assert_eq!(resp.status(), StatusCode::OK);
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn auth() -> AuthBearer {
        AuthBearer("t".into())
    }

    #[tokio::test]
    async fn health_reports_connection_state() {
        let s = session(test_config());
        let body = body_json(health(State(s.state.clone())).await.into_response()).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["connection"], "Disconnected");
    }

    #[tokio::test]
    async fn status_serialises_snapshot() {
        let s = session(test_config());
        s.state.set_balance(1234.5, "USD");
        let body = body_json(status(auth(), State(s.state.clone())).await.into_response()).await;
        assert_eq!(body["balance"], 1234.5);
        assert_eq!(body["tradingEnabled"], true);
        assert_eq!(body["symbols"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn trading_endpoint_sets_and_toggles() {
        let s = session(test_config());

        let req = TradingRequest {
            enabled: Some(false),
        };
        let body = body_json(
            control_trading(auth(), State(s.state.clone()), Json(req))
                .await
                .into_response(),
        )
        .await;
        assert_eq!(body["tradingEnabled"], false);
        assert!(!s.state.tracker.is_trading_enabled());

        let body = body_json(
            control_trading(auth(), State(s.state.clone()), Json(TradingRequest { enabled: None }))
                .await
                .into_response(),
        )
        .await;
        assert_eq!(body["tradingEnabled"], true);
    }

    #[tokio::test]
    async fn shutdown_endpoint_triggers_signal() {
        let s = session(test_config());
        let body = body_json(
            control_shutdown(auth(), State(s.state.clone()))
                .await
                .into_response(),
        )
        .await;
        assert_eq!(body["message"], "Shutdown initiated");
        assert!(s.state.shutdown.is_triggered());
    }

    #[test]
    fn trading_request_accepts_empty_object() {
        let req: TradingRequest = serde_json::from_str("{}").unwrap();
        assert!(req.enabled.is_none());
    }
}
