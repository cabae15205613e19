use axum::extract::DefaultBodyLimit;
use axum::http::HeaderName;
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::propagate_header::PropagateHeaderLayer;
use tower_http::request_id::{MakeRequestUuid, SetRequestIdLayer};
use tower_http::services::ServeDir;

use crate::AppState;

mod auth;
mod error;
mod handlers;
mod response;
mod routes;
mod upload;

pub use auth::AuthUser;
pub use error::AppError;
pub use response::ApiResponse;

const REQUEST_ID_HEADER: HeaderName = HeaderName::from_static("x-request-id");

/// Multipart overhead allowed on top of the file payloads of one request.
const FORM_OVERHEAD_BYTES: u64 = 1024 * 1024;

pub fn router(state: AppState) -> Router {
    // Profile updates carry up to two files.
    let body_limit = state
        .storage
        .max_bytes()
        .saturating_mul(2)
        .saturating_add(FORM_OVERHEAD_BYTES);
    let body_limit = usize::try_from(body_limit).unwrap_or(usize::MAX);

    let api = Router::new()
        .merge(routes::auth())
        .merge(routes::users())
        .merge(routes::posts())
        .merge(routes::topics())
        .merge(routes::notifications());

    Router::new()
        .merge(routes::health())
        .nest("/api/v1", api)
        .nest_service("/uploads", ServeDir::new(state.storage.root()))
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(body_limit))
        .layer(CorsLayer::permissive())
        .layer(PropagateHeaderLayer::new(REQUEST_ID_HEADER))
        .layer(SetRequestIdLayer::new(REQUEST_ID_HEADER, MakeRequestUuid))
        .with_state(state)
}
