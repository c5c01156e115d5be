use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{error, info};
use uuid::Uuid;

use crate::app::AppState;
use crate::cache::FreshnessClass;
use crate::domain::request::{DeviceClass, ListingRequest, PageKind};

#[derive(Debug, Deserialize)]
pub(crate) struct ListingQuery {
    #[serde(default = "default_page")]
    page: u32,
}

fn default_page() -> u32 {
    1
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

const SESSION_HEADER: HeaderName = HeaderName::from_static("x-session-id");
const CDN_CACHE_CONTROL: HeaderName = HeaderName::from_static("cdn-cache-control");
const COUNTRY_HEADER: HeaderName = HeaderName::from_static("x-geo-country");
const MOBILE_HINT_HEADER: HeaderName = HeaderName::from_static("sec-ch-ua-mobile");

/// GET /v1/listings/{kind}/{key}
/// リスティングページを構成して返す。
pub(crate) async fn get_listing(
    State(state): State<AppState>,
    Path((kind, key)): Path<(String, String)>,
    Query(query): Query<ListingQuery>,
    headers: HeaderMap,
) -> Response {
    let started = Instant::now();
    let kind = PageKind::from_segment(&kind);
    let country = header_str(&headers, &COUNTRY_HEADER).unwrap_or("unknown");
    let device = DeviceClass::from_client_hint(header_str(&headers, &MOBILE_HINT_HEADER));
    let encoding = header_str(&headers, &header::ACCEPT_ENCODING).unwrap_or("identity");
    let session_id = header_str(&headers, &SESSION_HEADER)
        .and_then(|raw| Uuid::parse_str(raw).ok())
        .unwrap_or_else(Uuid::new_v4);

    let request =
        ListingRequest::new(kind, key, query.page).with_context(country, device, encoding);

    let composed = match state
        .orchestrator()
        .compose(&request, session_id, chrono::Utc::now())
        .await
    {
        Ok(composed) => composed,
        Err(e) => {
            error!(error = %e, "failed to compose listing page");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse {
                    error: "failed to compose listing page".to_string(),
                }),
            )
                .into_response();
        }
    };

    state
        .telemetry()
        .metrics()
        .request_duration
        .observe(started.elapsed().as_secs_f64());
    info!(
        kind = request.kind.as_str(),
        key = %request.key,
        from_cache = composed.from_cache,
        fallback = composed.fallback,
        "listing served"
    );

    let mut response = (StatusCode::OK, composed.body).into_response();
    let response_headers = response.headers_mut();
    response_headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    response_headers.insert(header::CACHE_CONTROL, cache_control(composed.freshness));
    response_headers.insert(CDN_CACHE_CONTROL, cdn_cache_control(composed.freshness));
    response_headers.insert(
        header::VARY,
        HeaderValue::from_static("Accept-Encoding, Country, Device"),
    );
    if let Ok(value) = HeaderValue::from_str(&session_id.to_string()) {
        response_headers.insert(SESSION_HEADER, value);
    }
    response
}

/// エッジとブラウザ双方へのキャッシュ指示。s-maxage はエッジ側の寿命。
fn cache_control(freshness: FreshnessClass) -> HeaderValue {
    match freshness {
        FreshnessClass::Hourly => HeaderValue::from_static("public, max-age=3600, s-maxage=7200"),
        FreshnessClass::Daily => {
            HeaderValue::from_static("public, max-age=86400, s-maxage=172800")
        }
    }
}

/// CDN側だけに効く寿命。ブラウザ向けの max-age とは独立に設定する。
fn cdn_cache_control(freshness: FreshnessClass) -> HeaderValue {
    match freshness {
        FreshnessClass::Hourly => HeaderValue::from_static("max-age=7200"),
        FreshnessClass::Daily => HeaderValue::from_static("max-age=172800"),
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &HeaderName) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}
