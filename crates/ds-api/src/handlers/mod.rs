//! ---
//! ds_section: "05-networking-external-interfaces"
//! ds_subsection: "module"
//! ds_type: "source"
//! ds_scope: "code"
//! ds_description: "Route handlers of the v2 API."
//! ds_version: "v0.0.0-prealpha"
//! ds_owner: "tbd"
//! ---
use axum::body::Bytes;
use axum::Json;
use ds_common::{DsError, ErrorKind};
use ds_models::BaseResponse;
use serde::de::DeserializeOwned;

use crate::ApiError;

pub(crate) mod callback;
pub(crate) mod command;
pub(crate) mod system;

/// Decode a JSON body. Bodies are taken as raw bytes so malformed input
/// surfaces as a `ContractInvalid` response instead of axum's rejection.
pub(crate) fn parse_body<T: DeserializeOwned>(body: &Bytes) -> Result<T, ApiError> {
    serde_json::from_slice(body).map_err(|err| {
        DsError::wrap(ErrorKind::ContractInvalid, "failed to parse request body", err).into()
    })
}

/// Like [`parse_body`] but an empty body yields `None`.
pub(crate) fn parse_optional_body<T: DeserializeOwned>(body: &Bytes) -> Result<Option<T>, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    parse_body(body).map(Some)
}

pub(crate) fn ok() -> Json<BaseResponse> {
    Json(BaseResponse::new(200))
}
