//! ---
//! ds_section: "05-networking-external-interfaces"
//! ds_subsection: "module"
//! ds_type: "source"
//! ds_scope: "code"
//! ds_description: "Device command endpoints."
//! ds_version: "v0.0.0-prealpha"
//! ds_owner: "tbd"
//! ---
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Extension, Path, RawQuery, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use ds_common::CorrelationId;
use ds_core::{CommandOptions, WriteParams};
use ds_models::{BaseResponse, EventResponse, MultiEventResponse};
use serde_json::Value as JsonValue;

use super::{ok, parse_optional_body};
use crate::{ApiError, ApiState};

fn command_options(
    query: Option<String>,
    correlation_id: CorrelationId,
) -> Result<CommandOptions, ApiError> {
    let query = query.unwrap_or_default();
    let pairs = url::form_urlencoded::parse(query.as_bytes()).into_owned();
    Ok(CommandOptions::from_query(pairs, correlation_id)?)
}

fn write_params(body: &Bytes) -> Result<WriteParams, ApiError> {
    let body: Option<JsonValue> = parse_optional_body(body)?;
    Ok(ds_core::write_params(body.as_ref().unwrap_or(&JsonValue::Null))?)
}

pub(crate) async fn read(
    State(state): State<Arc<ApiState>>,
    Extension(correlation_id): Extension<CorrelationId>,
    Path((name, command)): Path<(String, String)>,
    RawQuery(query): RawQuery,
) -> Result<Response, ApiError> {
    let options = command_options(query, correlation_id)?;
    let event = ds_core::read_command(state.container(), &name, &command, &options).await?;
    if !options.return_event {
        return Ok(ok().into_response());
    }
    Ok(Json(EventResponse {
        base: BaseResponse::new(200),
        event: Some(event),
    })
    .into_response())
}

pub(crate) async fn write(
    State(state): State<Arc<ApiState>>,
    Extension(correlation_id): Extension<CorrelationId>,
    Path((name, command)): Path<(String, String)>,
    RawQuery(query): RawQuery,
    body: Bytes,
) -> Result<Json<BaseResponse>, ApiError> {
    let options = command_options(query, correlation_id)?;
    let params = write_params(&body)?;
    ds_core::write_command(state.container(), &name, &command, &params, &options).await?;
    Ok(ok())
}

pub(crate) async fn read_all(
    State(state): State<Arc<ApiState>>,
    Extension(correlation_id): Extension<CorrelationId>,
    Path(command): Path<String>,
    RawQuery(query): RawQuery,
) -> Result<Json<MultiEventResponse>, ApiError> {
    let options = command_options(query, correlation_id)?;
    let events = ds_core::read_all(state.container(), &command, &options).await?;
    Ok(Json(MultiEventResponse {
        base: BaseResponse::new(200),
        events: if options.return_event { events } else { Vec::new() },
    }))
}

pub(crate) async fn write_all(
    State(state): State<Arc<ApiState>>,
    Extension(correlation_id): Extension<CorrelationId>,
    Path(command): Path<String>,
    RawQuery(query): RawQuery,
    body: Bytes,
) -> Result<Json<BaseResponse>, ApiError> {
    let options = command_options(query, correlation_id)?;
    let params = write_params(&body)?;
    ds_core::write_all(state.container(), &command, &params, &options).await?;
    Ok(ok())
}
