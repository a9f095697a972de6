//! ---
//! ds_section: "05-networking-external-interfaces"
//! ds_subsection: "module"
//! ds_type: "source"
//! ds_scope: "code"
//! ds_description: "HTTP clients for the metadata and core-data services."
//! ds_version: "v0.0.0-prealpha"
//! ds_owner: "tbd"
//! ---
use std::time::Duration;

use async_trait::async_trait;
use ds_common::{DsError, DsResult, ErrorKind, API_VERSION};
use ds_models::{
    AddEventRequest, BaseResponse, Device, DeviceProfile, DeviceServiceRecord, OperatingState,
    ProvisionWatcher, UpdateDeviceService,
};
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;
use url::Url;

use super::{CoreDataClient, MetadataClient};

/// Base URL plus a configured reqwest client for one upstream service.
#[derive(Debug, Clone)]
struct RestClient {
    service: &'static str,
    base: Url,
    http: Client,
}

impl RestClient {
    fn new(service: &'static str, base: &str, timeout: Duration) -> DsResult<Self> {
        let base = Url::parse(base).map_err(|err| {
            DsError::wrap(
                ErrorKind::ContractInvalid,
                format!("invalid {service} url {base}"),
                err,
            )
        })?;
        let http = Client::builder().timeout(timeout).build().map_err(|err| {
            DsError::wrap(ErrorKind::ServerError, "failed to build http client", err)
        })?;
        Ok(Self {
            service,
            base,
            http,
        })
    }

    /// `{base}/api/v2/{segments...}` with every segment percent-encoded.
    fn url(&self, segments: &[&str]) -> DsResult<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| {
                DsError::contract_invalid(format!("{} url cannot carry a path", self.service))
            })?
            .pop_if_empty()
            .extend(["api", API_VERSION])
            .extend(segments);
        Ok(url)
    }

    fn transport_error(&self, err: reqwest::Error) -> DsError {
        let kind = if err.is_connect() || err.is_timeout() {
            ErrorKind::ServiceUnavailable
        } else {
            ErrorKind::ServerError
        };
        DsError::wrap(kind, format!("{} request failed", self.service), err)
    }

    async fn execute(&self, request: reqwest::RequestBuilder) -> DsResult<Vec<u8>> {
        let response = request.send().await.map_err(|err| self.transport_error(err))?;
        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|err| self.transport_error(err))?
            .to_vec();
        if !status.is_success() {
            return Err(status_error(self.service, status.as_u16(), &body));
        }
        Ok(body)
    }

    async fn get<T: DeserializeOwned>(&self, url: Url) -> DsResult<T> {
        debug!(service = self.service, url = %url, "GET");
        let body = self.execute(self.http.get(url)).await?;
        serde_json::from_slice(&body).map_err(|err| {
            DsError::wrap(
                ErrorKind::ServerError,
                format!("malformed {} response", self.service),
                err,
            )
        })
    }

    /// Send a JSON body and check the per-item statuses of a multi-status reply.
    async fn send<B: Serialize + ?Sized>(&self, method: Method, url: Url, body: &B) -> DsResult<()> {
        debug!(service = self.service, method = %method, url = %url, "request");
        let body = self.execute(self.http.request(method, url).json(body)).await?;
        if let Ok(items) = serde_json::from_slice::<Vec<BaseResponse>>(&body) {
            if let Some(failed) = items.iter().find(|item| item.status_code >= 400) {
                return Err(status_error(
                    self.service,
                    failed.status_code,
                    failed.message.as_deref().unwrap_or_default().as_bytes(),
                ));
            }
        }
        Ok(())
    }
}

fn status_error(service: &str, status: u16, body: &[u8]) -> DsError {
    let detail = serde_json::from_slice::<BaseResponse>(body)
        .ok()
        .and_then(|resp| resp.message)
        .unwrap_or_else(|| String::from_utf8_lossy(body).trim().to_owned());
    let kind = match StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR) {
        StatusCode::BAD_REQUEST => ErrorKind::ContractInvalid,
        StatusCode::NOT_FOUND => ErrorKind::EntityDoesNotExist,
        StatusCode::CONFLICT => ErrorKind::DuplicateName,
        StatusCode::LOCKED => ErrorKind::ServiceLocked,
        StatusCode::SERVICE_UNAVAILABLE => ErrorKind::ServiceUnavailable,
        StatusCode::NOT_IMPLEMENTED => ErrorKind::NotImplemented,
        _ => ErrorKind::ServerError,
    };
    DsError::new(kind, format!("{service} returned {status}: {detail}"))
}

#[derive(Deserialize)]
struct ServiceReply {
    service: DeviceServiceRecord,
}

#[derive(Deserialize)]
struct DeviceReply {
    device: Device,
}

#[derive(Deserialize)]
struct DevicesReply {
    #[serde(default)]
    devices: Vec<Device>,
}

#[derive(Deserialize)]
struct ProfileReply {
    profile: DeviceProfile,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WatchersReply {
    #[serde(default)]
    provision_watchers: Vec<ProvisionWatcher>,
}

/// Metadata service over HTTP.
#[derive(Debug, Clone)]
pub struct HttpMetadataClient {
    rest: RestClient,
}

impl HttpMetadataClient {
    pub fn new(base: &str, timeout: Duration) -> DsResult<Self> {
        Ok(Self {
            rest: RestClient::new("core-metadata", base, timeout)?,
        })
    }

    fn list_url(&self, segments: &[&str]) -> DsResult<Url> {
        let mut url = self.rest.url(segments)?;
        url.query_pairs_mut()
            .append_pair("offset", "0")
            .append_pair("limit", "-1");
        Ok(url)
    }
}

#[async_trait]
impl MetadataClient for HttpMetadataClient {
    async fn ping(&self) -> DsResult<()> {
        let _: serde_json::Value = self.rest.get(self.rest.url(&["ping"])?).await?;
        Ok(())
    }

    async fn device_service_by_name(&self, name: &str) -> DsResult<DeviceServiceRecord> {
        let reply: ServiceReply = self
            .rest
            .get(self.rest.url(&["deviceservice", "name", name])?)
            .await?;
        Ok(reply.service)
    }

    async fn add_device_service(&self, record: &DeviceServiceRecord) -> DsResult<()> {
        let body = json!([{ "apiVersion": API_VERSION, "service": record }]);
        self.rest
            .send(Method::POST, self.rest.url(&["deviceservice"])?, &body)
            .await
    }

    async fn update_device_service(&self, update: &UpdateDeviceService) -> DsResult<()> {
        let body = json!([{ "apiVersion": API_VERSION, "service": update }]);
        self.rest
            .send(Method::PATCH, self.rest.url(&["deviceservice"])?, &body)
            .await
    }

    async fn devices_by_service_name(&self, service: &str) -> DsResult<Vec<Device>> {
        let reply: DevicesReply = self
            .rest
            .get(self.list_url(&["device", "service", "name", service])?)
            .await?;
        Ok(reply.devices)
    }

    async fn device_by_name(&self, name: &str) -> DsResult<Device> {
        let reply: DeviceReply = self.rest.get(self.rest.url(&["device", "name", name])?).await?;
        Ok(reply.device)
    }

    async fn device_profile_by_name(&self, name: &str) -> DsResult<DeviceProfile> {
        let reply: ProfileReply = self
            .rest
            .get(self.rest.url(&["deviceprofile", "name", name])?)
            .await?;
        Ok(reply.profile)
    }

    async fn provision_watchers_by_service_name(
        &self,
        service: &str,
    ) -> DsResult<Vec<ProvisionWatcher>> {
        let reply: WatchersReply = self
            .rest
            .get(self.list_url(&["provisionwatcher", "service", "name", service])?)
            .await?;
        Ok(reply.provision_watchers)
    }

    async fn update_device_operating_state(
        &self,
        name: &str,
        state: OperatingState,
    ) -> DsResult<()> {
        let body = json!([{
            "apiVersion": API_VERSION,
            "device": { "name": name, "operatingState": state }
        }]);
        self.rest
            .send(Method::PATCH, self.rest.url(&["device"])?, &body)
            .await
    }

    async fn update_device_last_connected(&self, name: &str, at: i64) -> DsResult<()> {
        let body = json!([{
            "apiVersion": API_VERSION,
            "device": { "name": name, "lastConnected": at }
        }]);
        self.rest
            .send(Method::PATCH, self.rest.url(&["device"])?, &body)
            .await
    }
}

/// Core-data service over HTTP. Events with binary readings are sent as CBOR.
#[derive(Debug, Clone)]
pub struct HttpCoreDataClient {
    rest: RestClient,
}

impl HttpCoreDataClient {
    pub fn new(base: &str, timeout: Duration) -> DsResult<Self> {
        Ok(Self {
            rest: RestClient::new("core-data", base, timeout)?,
        })
    }
}

#[async_trait]
impl CoreDataClient for HttpCoreDataClient {
    async fn ping(&self) -> DsResult<()> {
        let _: serde_json::Value = self.rest.get(self.rest.url(&["ping"])?).await?;
        Ok(())
    }

    async fn add_event(&self, request: &AddEventRequest) -> DsResult<()> {
        let event = &request.event;
        let url = self.rest.url(&[
            "event",
            &event.profile_name,
            &event.device_name,
            &event.source_name,
        ])?;
        let builder = if event.has_binary() {
            let payload = serde_cbor::to_vec(request).map_err(|err| {
                DsError::wrap(ErrorKind::ServerError, "failed to encode event as cbor", err)
            })?;
            self.rest
                .http
                .post(url)
                .header(CONTENT_TYPE, "application/cbor")
                .body(payload)
        } else {
            self.rest.http.post(url).json(request)
        };
        self.rest.execute(builder).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urls_escape_names() {
        let client = RestClient::new("core-metadata", "http://localhost:59881", Duration::from_secs(1)).unwrap();
        let url = client.url(&["device", "name", "pump 1/a"]).unwrap();
        assert_eq!(
            url.as_str(),
            "http://localhost:59881/api/v2/device/name/pump%201%2Fa"
        );
    }

    #[test]
    fn statuses_map_onto_kinds() {
        let err = status_error("core-metadata", 404, br#"{"apiVersion":"v2","statusCode":404,"message":"no such device"}"#);
        assert!(err.is(ErrorKind::EntityDoesNotExist));
        assert!(err.message().contains("no such device"));
        assert!(status_error("core-metadata", 409, b"").is(ErrorKind::DuplicateName));
        assert!(status_error("core-metadata", 418, b"teapot").is(ErrorKind::ServerError));
    }

    #[tokio::test]
    async fn unreachable_service_is_unavailable() {
        // Port 9 (discard) is closed on test hosts; connection is refused immediately.
        let client = HttpMetadataClient::new("http://127.0.0.1:9", Duration::from_millis(500)).unwrap();
        let err = client.ping().await.unwrap_err();
        assert!(err.is(ErrorKind::ServiceUnavailable), "{err:?}");
    }
}
