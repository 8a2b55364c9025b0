use axum::Json;
use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;

use crate::state::{AppState, GeoCollection};

pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "collections": GeoCollection::ALL.len(),
    }))
}

pub async fn get_countries(State(state): State<AppState>, headers: HeaderMap) -> Response {
    geo_response(&state, GeoCollection::Countries, &headers)
}

pub async fn get_cities(State(state): State<AppState>, headers: HeaderMap) -> Response {
    geo_response(&state, GeoCollection::Cities, &headers)
}

pub async fn get_roads(State(state): State<AppState>, headers: HeaderMap) -> Response {
    geo_response(&state, GeoCollection::Roads, &headers)
}

/// Serve a pre-serialized collection; no re-serialization per request.
fn geo_response(state: &AppState, collection: GeoCollection, headers: &HeaderMap) -> Response {
    let payload = state.payload(collection);
    let cache_control = state.fixture_cache_control.clone();

    if if_none_match_matches(headers, &payload.etag) {
        tracing::debug!(collection = collection.name(), "fixture not modified");
        return not_modified_response(cache_control, &payload.etag);
    }

    json_bytes_response((*payload.json).clone(), cache_control, &payload.etag)
}

fn json_bytes_response(body: Bytes, cache_control: HeaderValue, etag: &str) -> Response {
    let mut response = Response::new(Body::from(body));
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/geo+json"),
    );
    headers.insert(header::CACHE_CONTROL, cache_control);
    if let Ok(etag_header) = HeaderValue::from_str(etag) {
        headers.insert(header::ETAG, etag_header);
    }
    response
}

fn not_modified_response(cache_control: HeaderValue, etag: &str) -> Response {
    let mut response = StatusCode::NOT_MODIFIED.into_response();
    let headers = response.headers_mut();
    headers.insert(header::CACHE_CONTROL, cache_control);
    if let Ok(etag_header) = HeaderValue::from_str(etag) {
        headers.insert(header::ETAG, etag_header);
    }
    response
}

fn normalize_etag(candidate: &str) -> &str {
    candidate.strip_prefix("W/").unwrap_or(candidate).trim()
}

fn if_none_match_matches(headers: &HeaderMap, etag: &str) -> bool {
    let Some(value) = headers.get(header::IF_NONE_MATCH) else {
        return false;
    };
    let Ok(raw) = value.to_str() else {
        return false;
    };

    raw.split(',').any(|candidate| {
        let candidate = candidate.trim();
        candidate == "*" || normalize_etag(candidate) == normalize_etag(etag)
    })
}
