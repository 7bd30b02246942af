use std::sync::Arc;

use axum::{
    Router,
    extract::{Path, State},
    http::{
        HeaderName, HeaderValue, StatusCode,
        header::{CACHE_CONTROL, CONTENT_TYPE},
    },
    middleware,
    response::{IntoResponse, Response},
    routing::get,
};

use crate::{
    application::{
        error::HttpError,
        gateway::{AssetGateway, AssetResponse},
    },
    domain::{assets::AssetClass, error::DomainError},
};

use super::{
    middleware::{log_responses, set_request_context},
    store_health_response,
};

pub(crate) const X_FALLBACK: HeaderName = HeaderName::from_static("x-fallback");
pub(crate) const X_CACHE: HeaderName = HeaderName::from_static("x-cache");
const FALLBACK_CONTENT_TYPE: &str = "application/octet-stream";

#[derive(Clone)]
pub struct HttpState {
    pub gateway: Arc<AssetGateway>,
}

pub fn build_router(state: HttpState) -> Router {
    Router::new()
        .route("/asset/{class}/{identifier}", get(serve_asset))
        .route("/asset/{class}", get(missing_identifier))
        .route("/asset/{class}/", get(missing_identifier))
        .route("/_health", get(liveness))
        .route("/_health/store", get(store_health))
        .with_state(state)
        .layer(middleware::from_fn(log_responses))
        .layer(middleware::from_fn(set_request_context))
}

async fn serve_asset(
    State(state): State<HttpState>,
    Path((class, identifier)): Path<(String, String)>,
) -> Result<Response, HttpError> {
    let class: AssetClass = class.parse()?;
    let asset = state.gateway.get_asset(class, &identifier).await?;
    Ok(asset_response(asset))
}

async fn missing_identifier(Path(class): Path<String>) -> HttpError {
    match class.parse::<AssetClass>() {
        Ok(_) => HttpError::from(DomainError::InvalidIdentifier),
        Err(err) => HttpError::from(err),
    }
}

async fn liveness() -> StatusCode {
    StatusCode::NO_CONTENT
}

async fn store_health(State(state): State<HttpState>) -> Response {
    store_health_response(state.gateway.store().health_check().await)
}

fn asset_response(asset: AssetResponse) -> Response {
    let content_type = HeaderValue::from_str(&asset.content_type)
        .unwrap_or_else(|_| HeaderValue::from_static(FALLBACK_CONTENT_TYPE));
    let cache_status = if asset.served_from_cache {
        HeaderValue::from_static("HIT")
    } else {
        HeaderValue::from_static("MISS")
    };

    let mut response = (StatusCode::OK, asset.body).into_response();
    let headers = response.headers_mut();
    headers.insert(CONTENT_TYPE, content_type);
    if let Ok(value) = HeaderValue::from_str(&asset.cache_control) {
        headers.insert(CACHE_CONTROL, value);
    }
    headers.insert(X_CACHE, cache_status);
    if asset.placeholder {
        headers.insert(X_FALLBACK, HeaderValue::from_static("true"));
    }
    response
}
