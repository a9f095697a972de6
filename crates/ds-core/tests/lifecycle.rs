//! ---
//! ds_section: "01-core-functionality"
//! ds_subsection: "integration-tests"
//! ds_type: "source"
//! ds_scope: "code"
//! ds_description: "Bootstrap, metadata callbacks, auto events and shutdown."
//! ds_version: "v0.0.0-prealpha"
//! ds_owner: "tbd"
//! ---
use std::sync::Arc;
use std::time::Duration;

use ds_common::{AppConfig, CorrelationId, ErrorKind};
use ds_core::{
    read_command, trigger_discovery, AsyncValues, CommandOptions, DeviceService,
    DeviceServiceBuilder, DiscoveryTicket, DriverCall, InMemoryCoreDataClient,
    InMemoryMetadataClient, SimulatedDriver,
};
use ds_models::{
    AdminState, AutoEvent, CommandValue, Device, DeviceProfile, DeviceResource,
    DeviceServiceRecord, ProvisionWatcher, ResourceProperties, UpdateDeviceService, Value,
    ValueType,
};
use ds_msg::InMemoryBus;

fn config() -> AppConfig {
    let mut config = AppConfig::default();
    config.service.name = "ds".into();
    config.service.connect_retries = 3;
    config.service.retry_interval = Duration::from_millis(10);
    config.service.shutdown_grace = Duration::from_secs(1);
    config.message_bus.base_topic = "edgex".into();
    config
}

fn profile(name: &str) -> DeviceProfile {
    let mut profile = DeviceProfile::new(name);
    profile.device_resources.push(DeviceResource::new(
        "t",
        ResourceProperties::new(ValueType::Int16),
    ));
    profile
}

fn device(name: &str, profile: &str) -> Device {
    let mut device = Device::new(name, profile);
    device.service_name = "ds".into();
    device
}

fn ticking(mut device: Device, interval: &str, on_change: bool) -> Device {
    device.auto_events.push(AutoEvent {
        source_name: "t".into(),
        interval: interval.into(),
        on_change,
    });
    device
}

struct Fixture {
    metadata: InMemoryMetadataClient,
    driver: SimulatedDriver,
    bus: Arc<InMemoryBus>,
}

impl Fixture {
    fn new() -> Self {
        let metadata = InMemoryMetadataClient::new();
        metadata.insert_profile(profile("P"));
        Self {
            metadata,
            driver: SimulatedDriver::new(),
            bus: Arc::new(InMemoryBus::new()),
        }
    }

    async fn start(&self, config: AppConfig) -> anyhow::Result<DeviceService> {
        DeviceServiceBuilder::new(config, Arc::new(self.driver.clone()))
            .metadata_client(Arc::new(self.metadata.clone()))
            .message_bus(self.bus.clone())
            .start()
            .await
    }
}

async fn wait_until<F: Fn() -> bool>(condition: F) {
    for _ in 0..400 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached in time");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn bootstrap_registers_and_populates_caches() {
    let fx = Fixture::new();
    fx.metadata.insert_device(device("d1", "P"));
    let mut foreign = device("d2", "P");
    foreign.service_name = "other".into();
    fx.metadata.insert_device(foreign);
    let mut watcher = ProvisionWatcher::new("w1", "P");
    watcher.service_name = "ds".into();
    fx.metadata.insert_watcher(watcher);
    fx.metadata.fail_pings(2);

    let cfg = config();
    let expected_address = cfg.service.base_address();
    let service = fx.start(cfg).await.unwrap();

    let record = fx.metadata.service("ds").unwrap();
    assert_eq!(record.base_address, expected_address);
    assert_eq!(record.admin_state, AdminState::Unlocked);

    let caches = &service.container().caches;
    assert!(caches.devices.contains("d1"));
    assert!(!caches.devices.contains("d2"));
    assert!(caches.profiles.contains("P"));
    assert_eq!(caches.watchers.len(), 1);

    let calls = fx.driver.calls();
    assert_eq!(calls[0], DriverCall::Initialize { async_enabled: true });
    assert!(calls.contains(&DriverCall::AddDevice {
        name: "d1".into(),
        admin_state: AdminState::Unlocked,
    }));

    service.shutdown(false).await.unwrap();
    assert!(fx.driver.calls().contains(&DriverCall::Stop { force: false }));
}

#[tokio::test]
async fn bootstrap_gives_up_after_connect_retries() {
    let fx = Fixture::new();
    fx.metadata.fail_pings(10);
    let err = fx.start(config()).await.unwrap_err();
    assert!(err.to_string().contains("core-metadata"));
    assert!(fx.metadata.service("ds").is_none());
}

#[tokio::test]
async fn existing_registration_is_adopted() {
    let fx = Fixture::new();
    let mut record = DeviceServiceRecord::new("ds", "http://old-host:1");
    record.admin_state = AdminState::Locked;
    record.labels = vec!["edge".into()];
    fx.metadata.insert_service(record);

    let cfg = config();
    let expected_address = cfg.service.base_address();
    let service = fx.start(cfg).await.unwrap();

    assert!(service.container().service_locked());
    assert_eq!(service.container().service_record().labels, vec!["edge"]);
    let updates = fx.metadata.service_updates();
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].base_address.as_deref(), Some(expected_address.as_str()));
    service.shutdown(true).await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn device_delete_cascades() {
    let fx = Fixture::new();
    fx.metadata
        .insert_device(ticking(device("d1", "P"), "10ms", false));
    let service = fx.start(config()).await.unwrap();
    assert_eq!(service.auto_events().running("d1"), 1);

    let driver = fx.driver.clone();
    wait_until(move || driver.read_count("d1") > 0).await;

    fx.metadata.remove_device("d1");
    service
        .callbacks()
        .delete_device("d1", &CorrelationId::new())
        .await
        .unwrap();

    let caches = &service.container().caches;
    assert!(!caches.devices.contains("d1"));
    assert!(!caches.profiles.contains("P"));
    assert_eq!(service.auto_events().running("d1"), 0);
    assert!(fx
        .driver
        .calls()
        .contains(&DriverCall::RemoveDevice { name: "d1".into() }));

    let reads = fx.driver.read_count("d1");
    tokio::time::sleep(Duration::from_millis(60)).await;
    assert_eq!(fx.driver.read_count("d1"), reads);
    service.shutdown(false).await.unwrap();
}

#[tokio::test]
async fn device_add_fetches_missing_profile() {
    let fx = Fixture::new();
    let service = fx.start(config()).await.unwrap();
    fx.metadata.insert_profile(profile("Q"));
    fx.metadata.insert_device(device("d2", "Q"));

    let correlation = CorrelationId::new();
    service
        .callbacks()
        .add_device("d2", &correlation)
        .await
        .unwrap();
    let caches = &service.container().caches;
    assert!(caches.devices.contains("d2"));
    assert!(caches.profiles.contains("Q"));
    assert!(fx.driver.calls().contains(&DriverCall::AddDevice {
        name: "d2".into(),
        admin_state: AdminState::Unlocked,
    }));

    let err = service
        .callbacks()
        .add_device("d2", &correlation)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DuplicateName);
    service.shutdown(false).await.unwrap();
}

#[tokio::test]
async fn device_update_follows_metadata() {
    let fx = Fixture::new();
    fx.metadata.insert_device(device("d1", "P"));
    let service = fx.start(config()).await.unwrap();
    let correlation = CorrelationId::new();

    let mut locked = device("d1", "P");
    locked.admin_state = AdminState::Locked;
    fx.metadata.insert_device(locked);
    service
        .callbacks()
        .update_device("d1", &correlation)
        .await
        .unwrap();
    let err = read_command(service.container(), "d1", "t", &CommandOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ServiceLocked);

    let mut moved = device("d1", "P");
    moved.service_name = "other".into();
    fx.metadata.insert_device(moved);
    service
        .callbacks()
        .update_device("d1", &correlation)
        .await
        .unwrap();
    assert!(!service.container().caches.devices.contains("d1"));
    service.shutdown(false).await.unwrap();
}

#[tokio::test]
async fn service_update_applies_admin_state_and_labels_only() {
    let fx = Fixture::new();
    fx.metadata.insert_device(device("d1", "P"));
    let service = fx.start(config()).await.unwrap();
    let correlation = CorrelationId::new();

    let renamed = UpdateDeviceService {
        name: "someone-else".into(),
        admin_state: Some(AdminState::Locked),
        ..UpdateDeviceService::default()
    };
    let err = service
        .callbacks()
        .update_service(&renamed, &correlation)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::EntityDoesNotExist);
    assert!(!service.container().service_locked());

    let update = UpdateDeviceService {
        name: "ds".into(),
        admin_state: Some(AdminState::Locked),
        labels: Some(vec!["a".into(), "b".into()]),
        ..UpdateDeviceService::default()
    };
    service
        .callbacks()
        .update_service(&update, &correlation)
        .await
        .unwrap();
    assert!(service.container().service_locked());
    assert_eq!(service.container().service_record().labels, vec!["a", "b"]);
    service.shutdown(false).await.unwrap();
}

#[tokio::test]
async fn watcher_callbacks_touch_the_cache_only() {
    let fx = Fixture::new();
    let service = fx.start(config()).await.unwrap();
    let correlation = CorrelationId::new();
    let callbacks = service.callbacks();

    callbacks
        .add_watcher(ProvisionWatcher::new("w1", "P"), &correlation)
        .await
        .unwrap();
    let mut changed = ProvisionWatcher::new("w1", "P");
    changed.labels = vec!["x".into()];
    callbacks.update_watcher(changed, &correlation).await.unwrap();
    assert_eq!(
        service.container().caches.watchers.for_name("w1").unwrap().labels,
        vec!["x"]
    );
    callbacks.delete_watcher("w1", &correlation).await.unwrap();
    assert!(service.container().caches.watchers.is_empty());
    let err = callbacks
        .delete_watcher("w1", &correlation)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::EntityDoesNotExist);
    service.shutdown(false).await.unwrap();
}

#[tokio::test]
async fn profile_update_requires_a_cached_profile() {
    let fx = Fixture::new();
    fx.metadata.insert_device(device("d1", "P"));
    let service = fx.start(config()).await.unwrap();
    let correlation = CorrelationId::new();

    let err = service
        .callbacks()
        .update_profile(profile("Unused"), &correlation)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::EntityDoesNotExist);

    let mut changed = profile("P");
    changed.device_resources.push(DeviceResource::new(
        "h",
        ResourceProperties::new(ValueType::Float32),
    ));
    service
        .callbacks()
        .update_profile(changed, &correlation)
        .await
        .unwrap();
    assert!(service
        .container()
        .caches
        .profiles
        .device_resource("P", "h")
        .is_some());
    service.shutdown(false).await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn on_change_auto_events_publish_only_changes() {
    let fx = Fixture::new();
    fx.metadata
        .insert_device(ticking(device("d1", "P"), "10ms", true));
    fx.driver
        .set_value(
            "d1",
            CommandValue::new("t", ValueType::Int16, Value::Int16(7)).unwrap(),
        )
        .await;
    let service = fx.start(config()).await.unwrap();

    let metrics = service.container().metrics.clone();
    wait_until(move || metrics.snapshot().auto_event_ticks >= 4).await;
    let bus = fx.bus.clone();
    wait_until(move || !bus.published_matching("edgex/device/ds/P/d1/t").is_empty()).await;
    assert_eq!(fx.bus.published_matching("edgex/device/ds/P/d1/t").len(), 1);
    service.shutdown(false).await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn core_data_receives_async_readings_without_a_bus() {
    let fx = Fixture::new();
    fx.metadata.insert_device(device("d1", "P"));
    let core_data = InMemoryCoreDataClient::new();
    let mut cfg = config();
    cfg.message_bus.enabled = false;
    let service = DeviceServiceBuilder::new(cfg, Arc::new(fx.driver.clone()))
        .metadata_client(Arc::new(fx.metadata.clone()))
        .core_data_client(Arc::new(core_data.clone()))
        .start()
        .await
        .unwrap();

    fx.driver
        .push_async(AsyncValues {
            device_name: "d1".into(),
            source_name: "t".into(),
            command_values: vec![
                CommandValue::new("t", ValueType::Int16, Value::Int16(3)).unwrap(),
            ],
        })
        .await
        .unwrap();
    let received = core_data.clone();
    wait_until(move || !received.received().is_empty()).await;
    assert_eq!(core_data.received()[0].event.device_name, "d1");
    assert!(fx.bus.published().is_empty());
    service.shutdown(false).await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn discovery_is_single_flight() {
    let fx = Fixture::new();
    let service = fx.start(config()).await.unwrap();
    let correlation = CorrelationId::new();
    let gate = fx.driver.hold_discovery();

    let first = trigger_discovery(service.container(), &correlation).unwrap();
    assert!(matches!(first, DiscoveryTicket::Started(_)));
    let driver = fx.driver.clone();
    wait_until(move || driver.calls().contains(&DriverCall::Discover)).await;

    let second = trigger_discovery(service.container(), &correlation).unwrap();
    assert_eq!(second, DiscoveryTicket::InProgress(first.id().to_owned()));
    let discover_calls = fx
        .driver
        .calls()
        .iter()
        .filter(|call| **call == DriverCall::Discover)
        .count();
    assert_eq!(discover_calls, 1);

    gate.notify_one();
    let container = service.container().clone();
    wait_until(move || !container.discovery.is_busy()).await;

    let third = trigger_discovery(service.container(), &correlation).unwrap();
    assert!(matches!(third, DiscoveryTicket::Started(ref id) if id != first.id()));
    service.shutdown(false).await.unwrap();
}

#[tokio::test]
async fn discovery_is_rejected_when_disabled_or_unsupported() {
    let correlation = CorrelationId::new();

    let mut cfg = config();
    cfg.device.discovery_enabled = false;
    let disabled = Fixture::new();
    let service = disabled.start(cfg).await.unwrap();
    let err = trigger_discovery(service.container(), &correlation).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ServiceUnavailable);
    service.shutdown(false).await.unwrap();

    let unsupported = Fixture {
        driver: SimulatedDriver::new().without_discovery(),
        ..Fixture::new()
    };
    let service = unsupported.start(config()).await.unwrap();
    let err = trigger_discovery(service.container(), &correlation).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotImplemented);
    assert!(!service.container().discovery.is_busy());
    assert!(!unsupported.driver.calls().contains(&DriverCall::Discover));
    service.shutdown(false).await.unwrap();
}
