//! ---
//! ds_section: "05-networking-external-interfaces"
//! ds_subsection: "module"
//! ds_type: "source"
//! ds_scope: "code"
//! ds_description: "Metadata change callbacks."
//! ds_version: "v0.0.0-prealpha"
//! ds_owner: "tbd"
//! ---
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Extension, Path, State};
use axum::Json;
use ds_common::CorrelationId;
use ds_models::{BaseResponse, DeviceCallback, ProfileCallback, ServiceCallback, WatcherCallback};

use super::{ok, parse_body};
use crate::{ApiError, ApiState};

type Reply = Result<Json<BaseResponse>, ApiError>;

pub(crate) async fn add_device(
    State(state): State<Arc<ApiState>>,
    Extension(correlation_id): Extension<CorrelationId>,
    body: Bytes,
) -> Reply {
    let request: DeviceCallback = parse_body(&body)?;
    state
        .callbacks()
        .add_device(&request.device.name, &correlation_id)
        .await?;
    Ok(ok())
}

pub(crate) async fn update_device(
    State(state): State<Arc<ApiState>>,
    Extension(correlation_id): Extension<CorrelationId>,
    body: Bytes,
) -> Reply {
    let request: DeviceCallback = parse_body(&body)?;
    state
        .callbacks()
        .update_device(&request.device.name, &correlation_id)
        .await?;
    Ok(ok())
}

pub(crate) async fn delete_device(
    State(state): State<Arc<ApiState>>,
    Extension(correlation_id): Extension<CorrelationId>,
    Path(name): Path<String>,
) -> Reply {
    state.callbacks().delete_device(&name, &correlation_id).await?;
    Ok(ok())
}

pub(crate) async fn update_profile(
    State(state): State<Arc<ApiState>>,
    Extension(correlation_id): Extension<CorrelationId>,
    body: Bytes,
) -> Reply {
    let request: ProfileCallback = parse_body(&body)?;
    state
        .callbacks()
        .update_profile(request.profile, &correlation_id)
        .await?;
    Ok(ok())
}

pub(crate) async fn add_watcher(
    State(state): State<Arc<ApiState>>,
    Extension(correlation_id): Extension<CorrelationId>,
    body: Bytes,
) -> Reply {
    let request: WatcherCallback = parse_body(&body)?;
    state
        .callbacks()
        .add_watcher(request.provision_watcher, &correlation_id)
        .await?;
    Ok(ok())
}

pub(crate) async fn update_watcher(
    State(state): State<Arc<ApiState>>,
    Extension(correlation_id): Extension<CorrelationId>,
    body: Bytes,
) -> Reply {
    let request: WatcherCallback = parse_body(&body)?;
    state
        .callbacks()
        .update_watcher(request.provision_watcher, &correlation_id)
        .await?;
    Ok(ok())
}

pub(crate) async fn delete_watcher(
    State(state): State<Arc<ApiState>>,
    Extension(correlation_id): Extension<CorrelationId>,
    Path(name): Path<String>,
) -> Reply {
    state.callbacks().delete_watcher(&name, &correlation_id).await?;
    Ok(ok())
}

pub(crate) async fn update_service(
    State(state): State<Arc<ApiState>>,
    Extension(correlation_id): Extension<CorrelationId>,
    body: Bytes,
) -> Reply {
    let request: ServiceCallback = parse_body(&body)?;
    state
        .callbacks()
        .update_service(&request.service, &correlation_id)
        .await?;
    Ok(ok())
}
