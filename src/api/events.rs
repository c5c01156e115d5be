use axum::{
    extract::State,
    http::{HeaderMap, HeaderName, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::app::AppState;
use crate::domain::request::{DeviceClass, Geo};

const SESSION_HEADER: HeaderName = HeaderName::from_static("x-session-id");
const COUNTRY_HEADER: HeaderName = HeaderName::from_static("x-geo-country");
const MOBILE_HINT_HEADER: HeaderName = HeaderName::from_static("sec-ch-ua-mobile");

#[derive(Debug, Deserialize)]
pub(crate) struct ImpressionBody {
    slot_id: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ScrollBody {
    depth: f64,
}

#[derive(Debug, Serialize)]
struct EventAck {
    accepted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    scroll_depth: Option<f64>,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

/// POST /v1/events/impression
/// クリエイティブ読み込み成功の通知。スロットごとに1回だけ記録される。
pub(crate) async fn record_impression(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<ImpressionBody>,
) -> impl IntoResponse {
    let Some(session_id) = session_id(&headers) else {
        return missing_session();
    };
    let geo = Geo::from_country_code(header_str(&headers, &COUNTRY_HEADER).unwrap_or("unknown"));
    let device = DeviceClass::from_client_hint(header_str(&headers, &MOBILE_HINT_HEADER));
    let now = chrono::Utc::now();

    let recorded = state
        .slots()
        .creative_loaded(&body.slot_id, geo, device, now)
        .await;
    if recorded.is_some() {
        state.sessions().record_impression(session_id, now).await;
    } else {
        debug!(slot_id = %body.slot_id, "impression ignored");
    }

    (
        StatusCode::ACCEPTED,
        Json(EventAck {
            accepted: recorded.is_some(),
            scroll_depth: None,
        }),
    )
        .into_response()
}

/// POST /v1/events/scroll
/// スクロール深度の報告。高水位だけが進む。
pub(crate) async fn record_scroll(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<ScrollBody>,
) -> impl IntoResponse {
    let Some(session_id) = session_id(&headers) else {
        return missing_session();
    };

    let depth = state
        .sessions()
        .record_scroll(session_id, body.depth, chrono::Utc::now())
        .await;

    match depth {
        Some(scroll_depth) => (
            StatusCode::ACCEPTED,
            Json(EventAck {
                accepted: true,
                scroll_depth: Some(scroll_depth),
            }),
        )
            .into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(ErrorResponse {
                error: "unknown session".to_string(),
            }),
        )
            .into_response(),
    }
}

fn session_id(headers: &HeaderMap) -> Option<Uuid> {
    header_str(headers, &SESSION_HEADER).and_then(|raw| Uuid::parse_str(raw).ok())
}

fn missing_session() -> axum::response::Response {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse {
            error: "x-session-id header is required".to_string(),
        }),
    )
        .into_response()
}

fn header_str<'a>(headers: &'a HeaderMap, name: &HeaderName) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}
