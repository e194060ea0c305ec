use actix_web::{http::header, web::Data, HttpResponse};

use crate::state::AppState;

const PROMETHEUS_TEXT: &str = "text/plain; version=0.0.4";

/// Prometheus exposition of the process-wide recorder.
pub async fn metrics_handler(state: Data<AppState>) -> HttpResponse {
    HttpResponse::Ok()
        .content_type(PROMETHEUS_TEXT)
        .insert_header((header::CACHE_CONTROL, "no-store"))
        .body(state.telemetry().render_metrics())
}
