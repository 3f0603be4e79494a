//! `POST /execute`: run a request and stream its events as NDJSON.

use axum::body::Body;
use axum::extract::rejection::JsonRejection;
use axum::http::header::{self, HeaderName};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use capsules_code_exec::encoder::{self, ndjson_stream};
use capsules_code_exec::{ExecError, ExecutionRequest, ExecutionService};
use serde_json::json;
use tracing::{info, warn};

pub const EXECUTION_ID_HEADER: &str = "x-execution-id";

pub async fn execute(
    Extension(service): Extension<ExecutionService>,
    payload: Result<Json<ExecutionRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match payload {
        Ok(payload) => payload,
        Err(rejection) => {
            let message = rejection.body_text();
            warn!(error = %message, "rejected malformed execution request");
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": message })),
            )
                .into_response();
        }
    };

    match service.submit(request) {
        Ok(stream) => {
            let execution_id = stream.execution_id().to_string();
            info!(execution = %execution_id, "streaming execution events");
            // The body owns the stream; a client that disconnects drops it and
            // cancels the execution.
            let body = Body::from_stream(ndjson_stream(stream));
            (
                StatusCode::OK,
                [
                    (header::CONTENT_TYPE, encoder::CONTENT_TYPE.to_string()),
                    (header::CACHE_CONTROL, "no-cache".to_string()),
                    (HeaderName::from_static(EXECUTION_ID_HEADER), execution_id),
                ],
                body,
            )
                .into_response()
        }
        Err(err) => {
            let status = classify_error(&err);
            warn!(code = err.code(), error = %err, "execution request refused");
            (
                status,
                Json(json!({ "error": err.to_string(), "code": err.code() })),
            )
                .into_response()
        }
    }
}

fn classify_error(err: &ExecError) -> StatusCode {
    if err.is_validation() {
        StatusCode::BAD_REQUEST
    } else if matches!(err, ExecError::Busy { .. }) {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refusals_map_to_transport_status_codes() {
        assert_eq!(
            classify_error(&ExecError::validation("Field 'code' must be provided")),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            classify_error(&ExecError::UnsupportedLanguage {
                language: "cobol".to_string()
            }),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            classify_error(&ExecError::Busy { limit: 4 }),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            classify_error(&ExecError::internal("gate closed")),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
