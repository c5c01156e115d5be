use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;
use tracing::error;

use crate::app::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub(crate) struct HealthReport {
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<String>,
}

impl HealthReport {
    fn ready() -> Self {
        Self {
            status: "ready",
            detail: None,
        }
    }

    fn degraded(detail: impl Into<String>) -> Self {
        Self {
            status: "degraded",
            detail: Some(detail.into()),
        }
    }
}

/// 構成済みプロバイダーのうち1つでも応答すれば ready とする。
/// 部分障害は通常運転の範囲で、フォールバックが吸収する。
pub(crate) async fn ready(
    State(state): State<AppState>,
) -> Result<Json<HealthReport>, (StatusCode, Json<HealthReport>)> {
    state.telemetry().record_ready_probe();

    let mut last_error = None;
    for client in state.provider_clients() {
        match client.ping().await {
            Ok(()) => return Ok(Json(HealthReport::ready())),
            Err(e) => {
                error!(provider = client.name(), error = %e, "provider readiness check failed");
                last_error = Some(format!("{}: {e}", client.name()));
            }
        }
    }

    Err((
        StatusCode::SERVICE_UNAVAILABLE,
        Json(HealthReport::degraded(
            last_error.unwrap_or_else(|| "no providers configured".to_string()),
        )),
    ))
}

pub(crate) async fn live(State(state): State<AppState>) -> Json<HealthReport> {
    state.telemetry().record_live_probe();
    Json(HealthReport {
        status: "live",
        detail: None,
    })
}
