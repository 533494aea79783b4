//! Idempotency middleware.
//!
//! Opt-in per write via the `Idempotency-Key` header. The record is a
//! first-class store primitive keyed by `(tenant, project, method, path,
//! idem_key)`: the first request inserts a placeholder, executes, and
//! stores a response snapshot; replays with a matching request hash return
//! the stored bytes, divergent hashes are rejected, and a still-in-progress
//! placeholder reports a conflict rather than executing twice.

use axum::body::{to_bytes, Body, Bytes};
use axum::extract::{Request, State};
use axum::http::{HeaderMap, Method, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use modelops_core::error::CoreError;
use modelops_core::tenancy::Tenancy;
use sha2::{Digest, Sha256};

use modelops_db::models::idempotency::{IdempotencyRecord, IdempotencyScope};
use modelops_db::repositories::{IdempotencyRepo, PlaceholderInsert};

use crate::error::AppError;
use crate::state::AppState;

pub const IDEMPOTENCY_KEY_HEADER: &str = "idempotency-key";

/// Marker header set on replayed responses.
pub const REPLAYED_HEADER: &str = "x-idempotent-replayed";

/// Headers never copied into a replayed response.
const HOP_BY_HOP: [&str; 3] = ["content-length", "transfer-encoding", "connection"];

fn request_hash(body: &[u8], method: &Method, path: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(body);
    hasher.update(format!("|{method}|{path}").as_bytes());
    format!("{:x}", hasher.finalize())
}

fn headers_to_json(headers: &HeaderMap) -> serde_json::Value {
    let mut map = serde_json::Map::new();
    for (name, value) in headers {
        if let Ok(value) = value.to_str() {
            map.insert(name.as_str().to_string(), value.into());
        }
    }
    serde_json::Value::Object(map)
}

/// Rebuild the stored response, byte-identical to the original body.
fn replay(record: &IdempotencyRecord) -> Response {
    let status =
        StatusCode::from_u16(record.status_code.unwrap_or(200) as u16).unwrap_or(StatusCode::OK);
    let mut builder = Response::builder().status(status);

    if let Some(serde_json::Value::Object(headers)) = &record.response_headers {
        for (name, value) in headers {
            if HOP_BY_HOP.contains(&name.as_str()) {
                continue;
            }
            if let Some(value) = value.as_str() {
                builder = builder.header(name.as_str(), value);
            }
        }
    }

    builder = builder.header(REPLAYED_HEADER, "true");
    let body = record.response_body.clone().unwrap_or_default();
    builder
        .body(Body::from(body))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

/// Store-backed request deduplication for writes carrying an
/// `Idempotency-Key`. Must run after the tenancy middleware.
pub async fn idempotency_middleware(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Response {
    let method = req.method().clone();
    let is_write = method == Method::POST || method == Method::PUT || method == Method::PATCH;
    if !is_write {
        return next.run(req).await;
    }

    let Some(idem_key) = req
        .headers()
        .get(IDEMPOTENCY_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
    else {
        return next.run(req).await;
    };

    // Skip-path requests carry no tenancy and are never deduplicated.
    let Some(tenancy) = req.extensions().get::<Tenancy>().cloned() else {
        return next.run(req).await;
    };

    let (parts, body) = req.into_parts();
    let body_bytes = match to_bytes(body, usize::MAX).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::warn!(error = %e, "Failed to buffer request body");
            return AppError::validation("Unreadable request body").into_response();
        }
    };

    let path = parts.uri.path().to_string();
    let hash = request_hash(&body_bytes, &parts.method, &path);
    let scope = IdempotencyScope {
        tenant_id: tenancy.tenant_id,
        project_id: tenancy.project_id,
        method: parts.method.to_string(),
        path,
        idem_key,
    };

    match IdempotencyRepo::find(&state.pool, &scope).await {
        Ok(Some(record)) => return settle_existing(&record, &hash),
        Ok(None) => {}
        Err(e) => return AppError::Database(e).into_response(),
    }

    match IdempotencyRepo::insert_placeholder(
        &state.pool,
        &scope,
        &hash,
        state.config.idempotency.ttl_seconds,
    )
    .await
    {
        Ok(PlaceholderInsert::Inserted) => {}
        Ok(PlaceholderInsert::AlreadyExists) => {
            // Lost the insert race; the winner's record decides.
            return match IdempotencyRepo::find(&state.pool, &scope).await {
                Ok(Some(record)) => settle_existing(&record, &hash),
                Ok(None) => in_progress_response(),
                Err(e) => AppError::Database(e).into_response(),
            };
        }
        Err(e) => return AppError::Database(e).into_response(),
    }

    let req = Request::from_parts(parts, Body::from(body_bytes));
    let response = next.run(req).await;

    finalize(&state, &scope, response).await
}

fn settle_existing(record: &IdempotencyRecord, hash: &str) -> Response {
    if record.request_hash != hash {
        return AppError::Core(CoreError::IdempotencyConflict(
            "Idempotency-Key already used with a different request payload".to_string(),
        ))
        .into_response();
    }
    match record.status_code {
        Some(_) => replay(record),
        None => in_progress_response(),
    }
}

fn in_progress_response() -> Response {
    let body = serde_json::json!({
        "error": "A request with this Idempotency-Key is still in progress",
        "code": "IDEMPOTENCY_IN_PROGRESS",
    });
    (StatusCode::CONFLICT, axum::Json(body)).into_response()
}

/// Buffer the handler's response, snapshot it for replay, and return it.
async fn finalize(state: &AppState, scope: &IdempotencyScope, response: Response) -> Response {
    let (parts, body) = response.into_parts();
    let body_bytes: Bytes = match to_bytes(body, usize::MAX).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::error!(error = %e, "Failed to buffer response body");
            // Drop the placeholder so a retry is not wedged behind it.
            let _ = IdempotencyRepo::release_placeholder(&state.pool, scope).await;
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let stored_body = (body_bytes.len() <= state.config.idempotency.max_body_bytes)
        .then(|| body_bytes.as_ref());

    if let Err(e) = IdempotencyRepo::finalize(
        &state.pool,
        scope,
        parts.status.as_u16() as i32,
        &headers_to_json(&parts.headers),
        stored_body,
    )
    .await
    {
        tracing::error!(error = %e, "Failed to finalize idempotency record");
    }

    Response::from_parts(parts, Body::from(body_bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_covers_body_method_and_path() {
        let base = request_hash(b"{}", &Method::POST, "/api/v1/gpu-jobs");
        assert_ne!(base, request_hash(b"{\"a\":1}", &Method::POST, "/api/v1/gpu-jobs"));
        assert_ne!(base, request_hash(b"{}", &Method::PUT, "/api/v1/gpu-jobs"));
        assert_ne!(base, request_hash(b"{}", &Method::POST, "/api/v1/deployments"));
        assert_eq!(base, request_hash(b"{}", &Method::POST, "/api/v1/gpu-jobs"));
    }
}
