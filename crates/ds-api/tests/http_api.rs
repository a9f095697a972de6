//! ---
//! ds_section: "05-networking-external-interfaces"
//! ds_subsection: "integration-tests"
//! ds_type: "source"
//! ds_scope: "code"
//! ds_description: "HTTP v2 endpoints driven over a real socket."
//! ds_version: "v0.0.0-prealpha"
//! ds_owner: "tbd"
//! ---
use std::sync::Arc;
use std::time::Duration;

use ds_api::{spawn_api_server, ApiServer, ApiState};
use ds_common::{AppConfig, VersionInfo};
use ds_core::{DeviceService, DeviceServiceBuilder, DriverCall, InMemoryMetadataClient, SimulatedDriver};
use ds_models::{
    BaseResponse, CommandValue, Device, DeviceProfile, DeviceResource, DiscoveryResponse,
    EventResponse, MetricsResponse, MultiEventResponse, PingResponse, ResourceProperties, Value,
    ValueType, VersionResponse,
};
use ds_msg::InMemoryBus;
use reqwest::StatusCode;
use serde_json::json;

struct Harness {
    service: DeviceService,
    server: ApiServer,
    driver: SimulatedDriver,
    metadata: InMemoryMetadataClient,
    bus: Arc<InMemoryBus>,
    client: reqwest::Client,
}

impl Harness {
    async fn start() -> Self {
        Self::start_with(|_| {}).await
    }

    async fn start_with(tweak: impl FnOnce(&mut AppConfig)) -> Self {
        Self::start_with_driver(SimulatedDriver::new(), tweak).await
    }

    async fn start_with_driver(driver: SimulatedDriver, tweak: impl FnOnce(&mut AppConfig)) -> Self {
        let mut config = AppConfig::default();
        config.service.name = "ds".into();
        config.service.connect_retries = 2;
        config.service.retry_interval = Duration::from_millis(10);
        config.service.shutdown_grace = Duration::from_secs(1);
        config.message_bus.base_topic = "edgex".into();
        tweak(&mut config);

        let metadata = InMemoryMetadataClient::new();
        let mut profile = DeviceProfile::new("P");
        profile.device_resources.push(DeviceResource::new(
            "temperature",
            ResourceProperties::new(ValueType::Int16),
        ));
        metadata.insert_profile(profile);
        for name in ["d1", "d2"] {
            let mut device = Device::new(name, "P");
            device.service_name = "ds".into();
            metadata.insert_device(device);
        }

        for (name, value) in [("d1", 21), ("d2", 22)] {
            driver
                .set_value(
                    name,
                    CommandValue::new("temperature", ValueType::Int16, Value::Int16(value)).unwrap(),
                )
                .await;
        }
        let bus = Arc::new(InMemoryBus::new());
        let service = DeviceServiceBuilder::new(config, Arc::new(driver.clone()))
            .metadata_client(Arc::new(metadata.clone()))
            .message_bus(bus.clone())
            .start()
            .await
            .unwrap();
        let state = Arc::new(ApiState::from_service(
            &service,
            VersionInfo::for_service("1.2.3"),
        ));
        let server = spawn_api_server(state, "127.0.0.1:0".parse().unwrap()).unwrap();
        Self {
            service,
            server,
            driver,
            metadata,
            bus,
            client: reqwest::Client::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("http://{}/api/v2{path}", self.server.addr())
    }

    async fn stop(self) {
        self.server.shutdown().await.unwrap();
        self.service.shutdown(false).await.unwrap();
    }
}

#[tokio::test]
async fn ping_echoes_correlation_id() {
    let h = Harness::start().await;
    let response = h
        .client
        .get(h.url("/ping"))
        .header("X-Correlation-ID", "corr-42")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get("x-correlation-id").unwrap(),
        "corr-42"
    );
    let body: PingResponse = response.json().await.unwrap();
    assert_eq!(body.api_version, "v2");
    assert_eq!(body.service_name, "ds");
    assert!(chrono::DateTime::parse_from_rfc3339(&body.timestamp).is_ok());
    h.stop().await;
}

#[tokio::test]
async fn correlation_id_is_generated_when_absent() {
    let h = Harness::start().await;
    let response = h.client.get(h.url("/version")).send().await.unwrap();
    let header = response
        .headers()
        .get("x-correlation-id")
        .unwrap()
        .to_str()
        .unwrap()
        .to_owned();
    assert!(!header.is_empty());
    let body: VersionResponse = response.json().await.unwrap();
    assert_eq!(body.version, "1.2.3");
    assert_eq!(body.service_name, "ds");
    h.stop().await;
}

#[tokio::test]
async fn read_command_returns_event() {
    let h = Harness::start().await;
    let response = h
        .client
        .get(h.url("/device/name/d1/temperature"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body: EventResponse = response.json().await.unwrap();
    let event = body.event.unwrap();
    assert_eq!(event.device_name, "d1");
    assert_eq!(event.readings[0].value.as_deref(), Some("21"));
    assert!(h.bus.published_matching("edgex/device/#").is_empty());
    h.stop().await;
}

#[tokio::test]
async fn read_command_honours_event_switches() {
    let h = Harness::start().await;
    let response = h
        .client
        .get(h.url("/device/name/d1/temperature?ds-returnevent=no&ds-pushevent=yes"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["statusCode"], 200);
    assert!(body.get("event").is_none());

    for _ in 0..200 {
        if !h.bus.published_matching("edgex/device/ds/P/d1/temperature").is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(
        h.bus
            .published_matching("edgex/device/ds/P/d1/temperature")
            .len(),
        1
    );
    h.stop().await;
}

#[tokio::test]
async fn bad_switch_value_is_rejected() {
    let h = Harness::start().await;
    let response = h
        .client
        .get(h.url("/device/name/d1/temperature?ds-pushevent=maybe"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: BaseResponse = response.json().await.unwrap();
    assert_eq!(body.status_code, 400);
    assert!(body.message.unwrap().contains("ds-pushevent"));
    h.stop().await;
}

#[tokio::test]
async fn write_command_reaches_driver() {
    let h = Harness::start().await;
    let response = h
        .client
        .put(h.url("/device/name/d1/temperature"))
        .json(&json!({"temperature": "42"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let written = h.driver.value("d1", "temperature").await.unwrap();
    assert_eq!(written.value(), &Value::Int16(42));
    h.stop().await;
}

#[tokio::test]
async fn malformed_write_body_is_contract_invalid() {
    let h = Harness::start().await;
    let response = h
        .client
        .put(h.url("/device/name/d1/temperature"))
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    h.stop().await;
}

#[tokio::test]
async fn unknown_device_is_not_found() {
    let h = Harness::start().await;
    let response = h
        .client
        .get(h.url("/device/name/ghost/temperature"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body: BaseResponse = response.json().await.unwrap();
    assert_eq!(body.status_code, 404);
    assert!(body.message.is_some());
    h.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn read_all_collects_every_device() {
    let h = Harness::start().await;
    let response = h
        .client
        .get(h.url("/device/all/temperature"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body: MultiEventResponse = response.json().await.unwrap();
    let devices: Vec<_> = body.events.iter().map(|e| e.device_name.as_str()).collect();
    assert_eq!(devices, vec!["d1", "d2"]);
    h.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn write_all_reaches_every_device() {
    let h = Harness::start().await;
    let response = h
        .client
        .put(h.url("/device/all/temperature"))
        .json(&json!({"temperature": 7}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    for name in ["d1", "d2"] {
        let written = h.driver.value(name, "temperature").await.unwrap();
        assert_eq!(written.value(), &Value::Int16(7));
    }
    h.stop().await;
}

#[tokio::test]
async fn discovery_is_accepted() {
    let h = Harness::start().await;
    let response = h.client.post(h.url("/discovery")).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let body: DiscoveryResponse = response.json().await.unwrap();
    assert!(!body.discovery_id.is_empty());

    for _ in 0..200 {
        if h.driver.calls().contains(&DriverCall::Discover) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(h.driver.calls().contains(&DriverCall::Discover));
    h.stop().await;
}

#[tokio::test]
async fn discovery_disabled_is_unavailable() {
    let h = Harness::start_with(|config| config.device.discovery_enabled = false).await;
    let response = h.client.post(h.url("/discovery")).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    h.stop().await;
}

#[tokio::test]
async fn discovery_without_driver_support_is_not_implemented() {
    let h = Harness::start_with_driver(SimulatedDriver::new().without_discovery(), |_| {}).await;
    let response = h.client.post(h.url("/discovery")).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_IMPLEMENTED);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["statusCode"], 501);
    assert!(!h.driver.calls().contains(&DriverCall::Discover));
    h.stop().await;
}

#[tokio::test]
async fn locking_the_service_rejects_commands() {
    let h = Harness::start().await;
    let response = h
        .client
        .put(h.url("/callback/service"))
        .json(&json!({"apiVersion": "v2", "service": {"name": "ds", "adminState": "LOCKED"}}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = h
        .client
        .get(h.url("/device/name/d1/temperature"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::LOCKED);
    h.stop().await;
}

#[tokio::test]
async fn device_callbacks_follow_metadata() {
    let h = Harness::start().await;
    let mut device = Device::new("d3", "P");
    device.service_name = "ds".into();
    h.metadata.insert_device(device);

    let response = h
        .client
        .post(h.url("/callback/device"))
        .json(&json!({"apiVersion": "v2", "device": {"name": "d3", "profileName": "P"}}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(h.service.container().caches.devices.contains("d3"));

    h.metadata.remove_device("d3");
    let response = h
        .client
        .delete(h.url("/callback/device/name/d3"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(!h.service.container().caches.devices.contains("d3"));

    let response = h
        .client
        .delete(h.url("/callback/device/name/d3"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    h.stop().await;
}

#[tokio::test]
async fn watcher_callbacks_update_cache() {
    let h = Harness::start().await;
    let watcher = json!({
        "apiVersion": "v2",
        "provisionWatcher": {"name": "w1", "profileName": "P", "serviceName": "ds"}
    });
    let response = h
        .client
        .post(h.url("/callback/watcher"))
        .json(&watcher)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(h.service.container().caches.watchers.len(), 1);

    let response = h
        .client
        .delete(h.url("/callback/watcher/name/w1"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(h.service.container().caches.watchers.len(), 0);
    h.stop().await;
}

#[tokio::test]
async fn profile_callback_replaces_cached_profile() {
    let h = Harness::start().await;
    let response = h
        .client
        .put(h.url("/callback/profile"))
        .json(&json!({
            "apiVersion": "v2",
            "profile": {
                "name": "P",
                "deviceResources": [
                    {"name": "temperature", "properties": {"valueType": "Int16", "readWrite": "RW", "scale": "10"}}
                ]
            }
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = h
        .client
        .put(h.url("/callback/profile"))
        .json(&json!({"apiVersion": "v2", "profile": {"name": "unused"}}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    h.stop().await;
}

#[tokio::test]
async fn metrics_and_config_are_reported() {
    let h = Harness::start().await;
    h.client
        .get(h.url("/device/name/d1/temperature"))
        .send()
        .await
        .unwrap();

    let metrics: MetricsResponse = h
        .client
        .get(h.url("/metrics"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(metrics.metrics["readCommands"], 1);

    let config: serde_json::Value = h
        .client
        .get(h.url("/config"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(config["serviceName"], "ds");
    assert_eq!(config["config"]["service"]["name"], "ds");
    h.stop().await;
}

#[tokio::test]
async fn validate_device_consults_driver() {
    let h = Harness::start().await;
    let response = h
        .client
        .post(h.url("/validate/device"))
        .json(&json!({"apiVersion": "v2", "device": {"name": "new", "profileName": "P"}}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = h
        .client
        .post(h.url("/validate/device"))
        .json(&json!({"apiVersion": "v2", "device": {"name": "new", "profileName": ""}}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: BaseResponse = response.json().await.unwrap();
    assert!(body.message.unwrap().contains("no profile"));
    h.stop().await;
}
