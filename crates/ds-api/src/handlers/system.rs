//! ---
//! ds_section: "05-networking-external-interfaces"
//! ds_subsection: "module"
//! ds_type: "source"
//! ds_scope: "code"
//! ds_description: "Ping, version, config, metrics, discovery and validation endpoints."
//! ds_version: "v0.0.0-prealpha"
//! ds_owner: "tbd"
//! ---
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Extension, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use chrono::{SecondsFormat, Utc};
use ds_common::{CorrelationId, DsError, ErrorKind, API_VERSION};
use ds_core::trigger_discovery;
use ds_models::{
    BaseResponse, ConfigResponse, Device, DiscoveryResponse, MetricsResponse, PingResponse,
    VersionResponse,
};
use serde::Deserialize;
use tracing::info;

use super::{ok, parse_body};
use crate::{ApiError, ApiState};

pub(crate) async fn ping(State(state): State<Arc<ApiState>>) -> Json<PingResponse> {
    Json(PingResponse {
        api_version: API_VERSION.to_owned(),
        timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        service_name: state.container().service_name().to_owned(),
    })
}

pub(crate) async fn version(State(state): State<Arc<ApiState>>) -> Json<VersionResponse> {
    let version = state.version();
    Json(VersionResponse {
        api_version: API_VERSION.to_owned(),
        version: version.version.clone(),
        sdk_version: version.sdk_version.clone(),
        service_name: state.container().service_name().to_owned(),
    })
}

pub(crate) async fn config(
    State(state): State<Arc<ApiState>>,
) -> Result<Json<ConfigResponse>, ApiError> {
    let container = state.container();
    let config = serde_json::to_value(container.config.as_ref())
        .map_err(|err| DsError::wrap(ErrorKind::ServerError, "failed to render configuration", err))?;
    Ok(Json(ConfigResponse {
        api_version: API_VERSION.to_owned(),
        service_name: container.service_name().to_owned(),
        config,
    }))
}

pub(crate) async fn metrics(
    State(state): State<Arc<ApiState>>,
) -> Result<Json<MetricsResponse>, ApiError> {
    let container = state.container();
    let metrics = serde_json::to_value(container.metrics.snapshot())
        .map_err(|err| DsError::wrap(ErrorKind::ServerError, "failed to render metrics", err))?;
    Ok(Json(MetricsResponse {
        api_version: API_VERSION.to_owned(),
        service_name: container.service_name().to_owned(),
        metrics,
    }))
}

pub(crate) async fn discovery(
    State(state): State<Arc<ApiState>>,
    Extension(correlation_id): Extension<CorrelationId>,
) -> Result<impl IntoResponse, ApiError> {
    let ticket = trigger_discovery(state.container(), &correlation_id)?;
    let body = DiscoveryResponse {
        base: BaseResponse::new(StatusCode::ACCEPTED.as_u16()),
        discovery_id: ticket.id().to_owned(),
    };
    Ok((StatusCode::ACCEPTED, Json(body)))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ValidateDeviceRequest {
    #[serde(default)]
    #[allow(dead_code)]
    api_version: String,
    device: Device,
}

/// Ask the driver whether a device definition is acceptable before it is
/// added to metadata.
pub(crate) async fn validate_device(
    State(state): State<Arc<ApiState>>,
    Extension(correlation_id): Extension<CorrelationId>,
    body: Bytes,
) -> Result<Json<BaseResponse>, ApiError> {
    let request: ValidateDeviceRequest = parse_body(&body)?;
    let name = request.device.name.clone();
    state
        .container()
        .driver
        .validate_device(&request.device)
        .await
        .map_err(|err| {
            DsError::wrap(
                ErrorKind::ContractInvalid,
                format!("device {name} failed driver validation"),
                err,
            )
        })?;
    info!(correlation_id = %correlation_id.as_str(), device = %name, "device validated");
    Ok(ok())
}
