//! HTTP surface: `POST /phone` and `GET /phone/{id}`

use std::time::Duration;

use axum::{
    body::Bytes,
    error_handling::HandleErrorLayer,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    BoxError, Json, Router,
};
use serde::{Deserialize, Serialize};
use tower::ServiceBuilder;
use uuid::Uuid;

use crate::error::EnvelopeError;
use crate::service::{DecryptedPhoneNumber, RecordService};
use crate::storage::EncryptedRecord;

#[derive(Debug, Deserialize)]
struct CreatePhoneRequest {
    phone_number: String,
}

/// Error body returned for every failed request
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub details: String,
}

/// Build the router. `request_timeout` is the deadline for a whole request;
/// when it passes the handler future is dropped, cancelling in-flight calls.
pub fn router(service: RecordService, request_timeout: Duration) -> Router {
    Router::new()
        .route("/phone", post(create_phone))
        .route("/phone/{id}", get(get_phone))
        .layer(
            ServiceBuilder::new()
                .layer(HandleErrorLayer::new(handle_middleware_error))
                .timeout(request_timeout),
        )
        .with_state(service)
}

async fn create_phone(
    State(service): State<RecordService>,
    body: Bytes,
) -> Result<(StatusCode, Json<EncryptedRecord>), EnvelopeError> {
    // The body is JSON whatever the Content-Type header claims
    let request: CreatePhoneRequest = serde_json::from_slice(&body)
        .map_err(|e| EnvelopeError::Validation(format!("invalid request body: {}", e)))?;
    let record = service.submit(&request.phone_number).await?;
    Ok((StatusCode::CREATED, Json(record)))
}

async fn get_phone(
    State(service): State<RecordService>,
    Path(id): Path<String>,
) -> Result<Json<DecryptedPhoneNumber>, EnvelopeError> {
    // A malformed id cannot name any record
    let id = Uuid::parse_str(&id).map_err(|_| EnvelopeError::NotFound(id.clone()))?;
    let phone = service.fetch(&id).await?;
    Ok(Json(phone))
}

async fn handle_middleware_error(err: BoxError) -> (StatusCode, Json<ErrorBody>) {
    if err.is::<tower::timeout::error::Elapsed>() {
        tracing::warn!("request deadline exceeded");
        (
            StatusCode::REQUEST_TIMEOUT,
            Json(ErrorBody {
                error: "Request timed out".into(),
                details: err.to_string(),
            }),
        )
    } else {
        tracing::error!(error = %err, "unhandled middleware error");
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorBody {
                error: "Internal server error".into(),
                details: err.to_string(),
            }),
        )
    }
}

impl EnvelopeError {
    fn status_and_summary(&self) -> (StatusCode, &'static str) {
        match self {
            EnvelopeError::Validation(_) => (StatusCode::BAD_REQUEST, "Invalid request"),
            EnvelopeError::NotFound(_) => (StatusCode::NOT_FOUND, "The phone number was not found"),
            EnvelopeError::Encryption(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "Failed to encrypt phone number")
            }
            EnvelopeError::Decryption(_) | EnvelopeError::Decoding(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "Failed to decrypt phone number")
            }
            EnvelopeError::Storage(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "Failed to access phone number storage")
            }
            EnvelopeError::KeyNotFound(_)
            | EnvelopeError::Config(_)
            | EnvelopeError::Connection(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "Encryption service is not configured")
            }
        }
    }
}

impl IntoResponse for EnvelopeError {
    fn into_response(self) -> Response {
        let (status, summary) = self.status_and_summary();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        } else {
            tracing::debug!(error = %self, "request rejected");
        }

        let body = ErrorBody {
            error: summary.to_string(),
            details: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}
