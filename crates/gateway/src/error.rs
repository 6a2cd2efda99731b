//! JSON reply envelope shared by every route.
//!
//! Success: `{"code": 200, "success": true, "data": {...}}`.
//! Failure: `{"code": <status>, "success": false, "error": "..."}`.

use {
    axum::{
        Json,
        extract::{FromRequest, Request},
        http::StatusCode,
        response::{IntoResponse, Response},
    },
    serde::de::DeserializeOwned,
    serde_json::{Value, json},
    tracing::debug,
    wagate_common::Error,
};

pub type ApiResult<T = Response> = Result<T, ApiError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }

    pub fn unauthorized() -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "Unauthorized")
    }
}

/// Caller mistakes are 400; everything else, session-state violations
/// included, is 500.
impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        let status = if err.is_client_error() {
            StatusCode::BAD_REQUEST
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        };
        Self::new(status, err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = json!({
            "code": self.status.as_u16(),
            "success": false,
            "error": self.message,
        });
        (self.status, Json(body)).into_response()
    }
}

/// `200 OK` with `data` wrapped in the success envelope.
pub fn ok(data: Value) -> Response {
    let body = json!({ "code": 200, "success": true, "data": data });
    (StatusCode::OK, Json(body)).into_response()
}

/// JSON body extractor whose rejection uses the error envelope.
pub struct Payload<T>(pub T);

impl<S, T> FromRequest<S> for Payload<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(Self(value)),
            Err(rejection) => {
                debug!(error = %rejection.body_text(), "rejected request body");
                Err(ApiError::bad_request("Could not decode payload"))
            },
        }
    }
}
