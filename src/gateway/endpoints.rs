//! Bootstrap, admin and blob endpoints.

use std::collections::HashMap;

use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures_util::TryStreamExt;
use serde::Deserialize;

use super::server::AppState;
use crate::blob::{BlobMeta, CONTENT_LENGTH_HINT};
use crate::error::RelayResult;
use crate::protocol::WormholeBootstrap;
use crate::registry::ConnectionEntry;

const BLOB_PATH: &str = "/wormholeBlobs";

/// `GET /wormholeConfig`.
pub(super) async fn wormhole_config(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let Some(host) = header_str(&headers, header::HOST) else {
        return (StatusCode::BAD_REQUEST, "missing Host header").into_response();
    };
    let secure = header_str(&headers, header::HeaderName::from_static("x-forwarded-proto"))
        .map(|proto| proto.eq_ignore_ascii_case("https"))
        .unwrap_or(false);
    let (ws, http) = if secure { ("wss", "https") } else { ("ws", "http") };

    let config = &state.config;
    let bootstrap = WormholeBootstrap {
        ws_endpoint: config
            .hub
            .public_ws_endpoint
            .clone()
            .unwrap_or_else(|| format!("{}://{}{}", ws, host, config.hub.path)),
        bucket: config
            .blob
            .public_url
            .clone()
            .unwrap_or_else(|| format!("{}://{}{}", http, host, BLOB_PATH)),
        region: config.blob.region.clone(),
        host: host.to_ascii_lowercase(),
    };
    Json(bootstrap).into_response()
}

#[derive(Debug, Deserialize)]
pub(super) struct ConnectionsQuery {
    host: Option<String>,
}

/// `GET /wormholeConnections[?host=h]`.
pub(super) async fn list_connections(
    State(state): State<AppState>,
    Query(query): Query<ConnectionsQuery>,
) -> RelayResult<Json<Vec<ConnectionEntry>>> {
    let entries = match query.host.filter(|h| !h.is_empty()) {
        Some(host) => state
            .registry
            .query_by_host_key(&host.to_ascii_lowercase())
            .await?
            .into_iter()
            .collect(),
        None => state.registry.scan_all().await?,
    };
    Ok(Json(entries))
}

/// `DELETE /wormholeConnections/{id}`.
pub(super) async fn delete_connection(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> RelayResult<Response> {
    match state.hub.force_disconnect(&id).await? {
        Some(entry) => {
            if let Some(host) = &entry.host_key {
                state.bindings.invalidate(host);
            }
            Ok(Json(entry).into_response())
        }
        None => Ok((StatusCode::NOT_FOUND, "no such connection").into_response()),
    }
}

pub(super) async fn head_blob(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> RelayResult<StatusCode> {
    if state.blobs.head_exists(&key).await? {
        Ok(StatusCode::OK)
    } else {
        Ok(StatusCode::NOT_FOUND)
    }
}

pub(super) async fn get_blob(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> RelayResult<Response> {
    let object = state.blobs.get_stream(&key).await?;
    let mut response = Response::new(Body::from_stream(object.body));
    let headers = response.headers_mut();
    let meta = [
        (header::CONTENT_TYPE, object.meta.content_type),
        (header::CACHE_CONTROL, object.meta.cache_control),
        (header::CONTENT_LENGTH, object.meta.content_length.map(|n| n.to_string())),
    ];
    for (name, value) in meta {
        if let Some(value) = value.and_then(|v| v.parse().ok()) {
            headers.insert(name, value);
        }
    }
    Ok(response)
}

pub(super) async fn put_blob(
    State(state): State<AppState>,
    Path(key): Path<String>,
    headers: HeaderMap,
    body: Body,
) -> RelayResult<Json<HashMap<&'static str, u64>>> {
    let meta = BlobMeta {
        content_type: header_str(&headers, header::CONTENT_TYPE).map(str::to_owned),
        content_length: header_str(&headers, header::HeaderName::from_static(CONTENT_LENGTH_HINT))
            .or_else(|| header_str(&headers, header::CONTENT_LENGTH))
            .and_then(|v| v.parse().ok()),
        cache_control: header_str(&headers, header::CACHE_CONTROL).map(str::to_owned),
    };
    let stream = body
        .into_data_stream()
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e));
    let bytes = state.blobs.put_stream(&key, meta, Box::pin(stream)).await?;
    tracing::info!(key = %key, bytes, "Stored blob");
    Ok(Json(HashMap::from([("bytes", bytes)])))
}

fn header_str(headers: &HeaderMap, name: header::HeaderName) -> Option<&str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}
