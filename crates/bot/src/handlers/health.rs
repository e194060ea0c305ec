use actix_web::{web::Data, HttpResponse};
use keydrop_domain::storage::KeyStore;
use serde::{Deserialize, Serialize};

use super::ApiError;
use crate::state::AppState;

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct HealthResponse {
    pub status: String,
    pub available_keys: u64,
}

/// Liveness text for hosting platforms that only probe `/`.
pub async fn index_handler() -> HttpResponse {
    HttpResponse::Ok()
        .content_type("text/plain; charset=utf-8")
        .body("Bot is running!")
}

/// Reports `ok` together with the unused key count; fails with 503 when the
/// database cannot be reached.
pub async fn health_handler(state: Data<AppState>) -> Result<HttpResponse, ApiError> {
    let inventory = state.storage().inventory().await?;
    Ok(HttpResponse::Ok().json(HealthResponse {
        status: "ok".to_string(),
        available_keys: inventory.available,
    }))
}
