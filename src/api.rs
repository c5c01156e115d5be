pub(crate) mod events;
pub(crate) mod health;
pub(crate) mod listings;
pub(crate) mod metrics;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

use crate::app::AppState;

pub(crate) fn router(state: AppState) -> Router {
    Router::new()
        .route("/health/ready", get(health::ready))
        .route("/health/live", get(health::live))
        .route("/metrics", get(metrics::exporter))
        .route("/v1/listings/{kind}/{key}", get(listings::get_listing))
        .route("/v1/events/impression", post(events::record_impression))
        .route("/v1/events/scroll", post(events::record_scroll))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
