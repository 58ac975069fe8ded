use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    Extension, Json,
};
use serde::Serialize;
use trawl_core::TriggerSource;
use trawl_pipeline::{CollectionRequest, TriggerOutcome};

use crate::middleware::RequestId;

use super::{ApiError, ApiResponse, AppState, ResponseMeta};

#[derive(Debug, Serialize)]
pub(super) struct CollectAccepted {
    status: &'static str,
    topic: Option<String>,
    max_items: Option<u32>,
}

/// `POST /api/v1/collect` with an optional `{topic, max_items}` body.
///
/// Starts a cycle in the background and answers immediately.
pub(super) async fn trigger_collection(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    body: Bytes,
) -> Result<(StatusCode, Json<ApiResponse<CollectAccepted>>), ApiError> {
    let request = parse_request(&body).map_err(|message| {
        ApiError::new(req_id.0.clone(), "validation_error", message)
    })?;

    match state
        .scheduler
        .request_collection(request.clone(), TriggerSource::Api)
    {
        TriggerOutcome::Accepted => Ok((
            StatusCode::ACCEPTED,
            Json(ApiResponse {
                data: CollectAccepted {
                    status: "accepted",
                    topic: request.topic,
                    max_items: request.max_items,
                },
                meta: ResponseMeta::new(req_id.0),
            }),
        )),
        TriggerOutcome::Busy => Err(ApiError::new(
            req_id.0,
            "already_running",
            "a collection cycle is already running",
        )),
        TriggerOutcome::Stopping => Err(ApiError::new(
            req_id.0,
            "stopping",
            "the collector is shutting down",
        )),
    }
}

fn parse_request(body: &[u8]) -> Result<CollectionRequest, String> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(CollectionRequest::default());
    }
    let request: CollectionRequest =
        serde_json::from_slice(body).map_err(|e| format!("invalid request body: {e}"))?;

    if request.topic.as_deref().is_some_and(|t| t.trim().is_empty()) {
        return Err("topic must not be blank".to_owned());
    }
    if request.max_items == Some(0) {
        return Err("max_items must be at least 1".to_owned());
    }
    Ok(request)
}
