//! ---
//! ds_section: "05-networking-external-interfaces"
//! ds_subsection: "module"
//! ds_type: "source"
//! ds_scope: "code"
//! ds_description: "HTTP v2 surface of the device service."
//! ds_version: "v0.0.0-prealpha"
//! ds_owner: "tbd"
//! ---

use std::fmt;
use std::net::{SocketAddr, TcpListener as StdTcpListener};
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::Request;
use axum::http::{HeaderName, HeaderValue};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{delete, get, post, put};
use axum::Router;
use ds_common::{CorrelationId, VersionInfo};
use ds_core::{DeviceService, MetadataCallbacks, ServiceContainer};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

mod error;
mod handlers;

pub use error::ApiError;

/// Lower-case form of `ds_common::CORRELATION_HEADER`.
pub const CORRELATION_HEADER_NAME: HeaderName = HeaderName::from_static("x-correlation-id");

/// Shared API state exposed to handlers.
pub struct ApiState {
    container: ServiceContainer,
    callbacks: MetadataCallbacks,
    version: VersionInfo,
}

impl ApiState {
    pub fn new(
        container: ServiceContainer,
        callbacks: MetadataCallbacks,
        version: VersionInfo,
    ) -> Self {
        Self {
            container,
            callbacks,
            version,
        }
    }

    pub fn from_service(service: &DeviceService, version: VersionInfo) -> Self {
        Self::new(
            service.container().clone(),
            service.callbacks().clone(),
            version,
        )
    }

    pub(crate) fn container(&self) -> &ServiceContainer {
        &self.container
    }

    pub(crate) fn callbacks(&self) -> &MetadataCallbacks {
        &self.callbacks
    }

    pub(crate) fn version(&self) -> &VersionInfo {
        &self.version
    }
}

impl fmt::Debug for ApiState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiState")
            .field("service", &self.container.service_name())
            .field("version", &self.version)
            .finish_non_exhaustive()
    }
}

/// Handle to the running API server.
#[derive(Debug)]
pub struct ApiServer {
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<Result<()>>,
}

impl ApiServer {
    /// Bound address; differs from the requested one when port 0 was asked for.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub async fn shutdown(mut self) -> Result<()> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        match self.task.await {
            Ok(result) => result,
            Err(err) => Err(err.into()),
        }
    }
}

/// Every v2 route, with correlation and trace layers applied.
pub fn router(state: Arc<ApiState>) -> Router {
    use handlers::{callback, command, system};

    Router::new()
        .route("/api/v2/ping", get(system::ping))
        .route("/api/v2/version", get(system::version))
        .route("/api/v2/config", get(system::config))
        .route("/api/v2/metrics", get(system::metrics))
        .route("/api/v2/discovery", post(system::discovery))
        .route("/api/v2/validate/device", post(system::validate_device))
        .route(
            "/api/v2/device/name/:name/:command",
            get(command::read).put(command::write),
        )
        .route(
            "/api/v2/device/all/:command",
            get(command::read_all).put(command::write_all),
        )
        .route(
            "/api/v2/callback/device",
            post(callback::add_device).put(callback::update_device),
        )
        .route(
            "/api/v2/callback/device/name/:name",
            delete(callback::delete_device),
        )
        .route("/api/v2/callback/profile", put(callback::update_profile))
        .route(
            "/api/v2/callback/watcher",
            post(callback::add_watcher).put(callback::update_watcher),
        )
        .route(
            "/api/v2/callback/watcher/name/:name",
            delete(callback::delete_watcher),
        )
        .route("/api/v2/callback/service", put(callback::update_service))
        .with_state(state)
        .layer(middleware::from_fn(correlation))
        .layer(TraceLayer::new_for_http())
}

/// Adopt or mint the request's correlation id and echo it on the response.
async fn correlation(mut request: Request, next: Next) -> Response {
    let correlation_id = CorrelationId::from_header(
        request
            .headers()
            .get(&CORRELATION_HEADER_NAME)
            .and_then(|value| value.to_str().ok()),
    );
    request.extensions_mut().insert(correlation_id.clone());
    let mut response = next.run(request).await;
    if let Ok(value) = HeaderValue::from_str(correlation_id.as_str()) {
        response
            .headers_mut()
            .insert(CORRELATION_HEADER_NAME, value);
    }
    response
}

/// Bind `addr` and serve the v2 API until [`ApiServer::shutdown`].
pub fn spawn_api_server(state: Arc<ApiState>, addr: SocketAddr) -> Result<ApiServer> {
    let router = router(state);

    let listener = StdTcpListener::bind(addr)
        .with_context(|| format!("failed to bind API listener {addr}"))?;
    listener
        .set_nonblocking(true)
        .context("failed to configure API listener as non-blocking")?;
    let addr = listener
        .local_addr()
        .context("failed to read bound API address")?;
    let tcp_listener =
        TcpListener::from_std(listener).context("failed to create tokio listener")?;

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let handle: JoinHandle<Result<()>> = tokio::spawn(async move {
        info!(address = %addr, "api server listening");
        if let Err(err) = axum::serve(tcp_listener, router)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            })
            .await
        {
            error!(address = %addr, error = %err, "api server exited with error");
            return Err(err.into());
        }
        Ok(())
    });

    Ok(ApiServer {
        addr,
        shutdown: Some(shutdown_tx),
        task: handle,
    })
}
