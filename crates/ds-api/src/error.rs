//! ---
//! ds_section: "05-networking-external-interfaces"
//! ds_subsection: "module"
//! ds_type: "source"
//! ds_scope: "code"
//! ds_description: "Mapping of runtime errors onto HTTP responses."
//! ds_version: "v0.0.0-prealpha"
//! ds_owner: "tbd"
//! ---
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use ds_common::DsError;
use ds_models::BaseResponse;
use tracing::debug;

/// Error returned by handlers; rendered as a `BaseResponse` body whose
/// `statusCode` matches the HTTP status.
#[derive(Debug)]
pub struct ApiError(DsError);

impl ApiError {
    pub fn status(&self) -> StatusCode {
        StatusCode::from_u16(self.0.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }
}

impl From<DsError> for ApiError {
    fn from(err: DsError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        debug!(status = status.as_u16(), kind = self.0.kind().as_str(), error = %self.0, "request failed");
        let body = BaseResponse::error(status.as_u16(), self.0.message());
        (status, Json(body)).into_response()
    }
}
