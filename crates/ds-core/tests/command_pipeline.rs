//! ---
//! ds_section: "01-core-functionality"
//! ds_subsection: "integration-tests"
//! ds_type: "source"
//! ds_scope: "code"
//! ds_description: "End-to-end command pipeline scenarios against the simulated driver."
//! ds_version: "v0.0.0-prealpha"
//! ds_owner: "tbd"
//! ---
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use ds_common::{AppConfig, CorrelationId, DsError, ErrorKind};
use ds_core::driver::URL_RAW_QUERY;
use ds_core::ingest::ingest;
use ds_core::{
    read_all, read_command, write_command, AsyncValues, CommandOptions, DriverCall, EgressSink,
    InMemoryMetadataClient, ServiceContainer, SimulatedDriver, WriteParams,
};
use ds_metrics::ServiceMetrics;
use ds_models::{
    AdminState, CommandValue, Device, DeviceCommand, DeviceProfile, DeviceResource,
    OperatingState, ReadWrite, ResourceOperation, ResourceProperties, Value, ValueType,
};
use ds_msg::{InMemoryBus, MessageBus};

struct Harness {
    container: ServiceContainer,
    driver: SimulatedDriver,
    metadata: InMemoryMetadataClient,
    bus: Arc<InMemoryBus>,
}

async fn harness(profile: DeviceProfile, devices: Vec<Device>) -> Harness {
    let bus = Arc::new(InMemoryBus::new());
    bus.connect().await.unwrap();
    let driver = SimulatedDriver::new();
    let metadata = InMemoryMetadataClient::new();
    let mut config = AppConfig::default();
    config.service.name = "ds".into();
    config.message_bus.base_topic = "edgex".into();
    let container = ServiceContainer::new(
        config,
        Arc::new(driver.clone()),
        Arc::new(metadata.clone()),
        EgressSink::Bus {
            bus: bus.clone(),
            base_topic: "edgex".into(),
        },
        Some(bus.clone()),
        ServiceMetrics::standalone().unwrap(),
    );
    container.caches.profiles.add(profile).unwrap();
    for device in devices {
        container.caches.devices.add(device).unwrap();
    }
    Harness {
        container,
        driver,
        metadata,
        bus,
    }
}

fn resource(name: &str, value_type: ValueType) -> DeviceResource {
    DeviceResource::new(name, ResourceProperties::new(value_type))
}

fn profile_with(resources: Vec<DeviceResource>) -> DeviceProfile {
    let mut profile = DeviceProfile::new("P");
    profile.device_resources = resources;
    profile
}

fn value(name: &str, value_type: ValueType, value: Value) -> CommandValue {
    CommandValue::new(name, value_type, value).unwrap()
}

fn options() -> CommandOptions {
    CommandOptions::default()
}

async fn wait_until<F: Fn() -> bool>(condition: F) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached in time");
}

#[tokio::test]
async fn scale_is_applied_on_read() {
    let mut t = resource("t", ValueType::Int16);
    t.properties.scale = Some(10.0);
    let h = harness(profile_with(vec![t]), vec![Device::new("d1", "P")]).await;
    h.driver
        .script_read("d1", Ok(vec![value("t", ValueType::Int16, Value::Int16(23))]));

    let event = read_command(&h.container, "d1", "t", &options()).await.unwrap();
    assert_eq!(event.readings.len(), 1);
    assert_eq!(event.readings[0].value_type, ValueType::Int16);
    assert_eq!(event.readings[0].value.as_deref(), Some("230"));
    assert_eq!(event.source_name, "t");
    assert_eq!(event.origin, event.readings[0].origin);
}

#[tokio::test]
async fn overflow_becomes_a_synthetic_reading_and_is_published() {
    let mut u = resource("u", ValueType::Uint8);
    u.properties.scale = Some(10.0);
    let h = harness(profile_with(vec![u]), vec![Device::new("d1", "P")]).await;
    h.driver
        .script_read("d1", Ok(vec![value("u", ValueType::Uint8, Value::Uint8(30))]));

    let opts = CommandOptions {
        send_event: true,
        ..options()
    };
    let event = read_command(&h.container, "d1", "u", &opts).await.unwrap();
    assert_eq!(event.readings[0].value_type, ValueType::String);
    assert_eq!(event.readings[0].value.as_deref(), Some("overflow"));

    let bus = h.bus.clone();
    wait_until(move || !bus.published_matching("edgex/device/ds/P/d1/u").is_empty()).await;
}

#[tokio::test]
async fn nan_becomes_a_synthetic_reading() {
    let h = harness(
        profile_with(vec![resource("f", ValueType::Float32)]),
        vec![Device::new("d1", "P")],
    )
    .await;
    h.driver.script_read(
        "d1",
        Ok(vec![value("f", ValueType::Float32, Value::Float32(f32::NAN))]),
    );

    let event = read_command(&h.container, "d1", "f", &options()).await.unwrap();
    assert_eq!(event.readings[0].value.as_deref(), Some("NaN"));
}

#[tokio::test]
async fn write_below_minimum_never_reaches_the_driver() {
    let mut p = resource("p", ValueType::Int8);
    p.properties.minimum = Some(0.0);
    let h = harness(profile_with(vec![p]), vec![Device::new("d1", "P")]).await;

    let params = WriteParams::from([("p".to_owned(), "-1".to_owned())]);
    let err = write_command(&h.container, "d1", "p", &params, &options())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ContractInvalid);
    assert_eq!(err.http_status(), 400);
    assert!(!h
        .driver
        .calls()
        .iter()
        .any(|call| matches!(call, DriverCall::Write { .. })));
}

#[tokio::test]
async fn write_applies_inverse_transform() {
    let mut p = resource("p", ValueType::Int16);
    p.properties.scale = Some(10.0);
    let h = harness(profile_with(vec![p]), vec![Device::new("d1", "P")]).await;

    let params = WriteParams::from([("p".to_owned(), "230".to_owned())]);
    write_command(&h.container, "d1", "p", &params, &options())
        .await
        .unwrap();
    let written = h.driver.value("d1", "p").await.unwrap();
    assert_eq!(written.value(), &Value::Int16(23));
}

#[tokio::test]
async fn locked_device_is_rejected() {
    let mut device = Device::new("d1", "P");
    device.admin_state = AdminState::Locked;
    let h = harness(profile_with(vec![resource("t", ValueType::Int16)]), vec![device]).await;

    let err = read_command(&h.container, "d1", "t", &options())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ServiceLocked);
    assert_eq!(err.http_status(), 423);
    assert_eq!(err.message(), "d1 is locked");
    assert_eq!(h.driver.read_count("d1"), 0);
}

#[tokio::test]
async fn locked_service_rejects_every_command() {
    let h = harness(
        profile_with(vec![resource("t", ValueType::Int16)]),
        vec![Device::new("d1", "P")],
    )
    .await;
    h.container.service.write().admin_state = AdminState::Locked;

    let err = read_command(&h.container, "d1", "t", &options())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ServiceLocked);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn command_all_skips_down_devices() {
    let mut down = Device::new("d3", "P");
    down.operating_state = OperatingState::Down;
    let h = harness(
        profile_with(vec![resource("t", ValueType::Int16)]),
        vec![Device::new("d2", "P"), Device::new("d1", "P"), down],
    )
    .await;

    let events = read_all(&h.container, "t", &options()).await.unwrap();
    let names: Vec<_> = events.iter().map(|e| e.device_name.as_str()).collect();
    assert_eq!(names, vec!["d1", "d2"]);
    assert_eq!(h.driver.read_count("d3"), 0);
}

#[tokio::test]
async fn command_all_fails_only_when_every_device_fails() {
    let h = harness(
        profile_with(vec![resource("t", ValueType::Int16)]),
        vec![Device::new("d1", "P"), Device::new("d2", "P")],
    )
    .await;
    h.driver.script_read("d1", Err(DsError::server("timeout")));
    let events = read_all(&h.container, "t", &options()).await.unwrap();
    assert_eq!(events.len(), 1);

    h.driver.script_read("d1", Err(DsError::server("timeout")));
    h.driver.script_read("d2", Err(DsError::server("timeout")));
    let err = read_all(&h.container, "t", &options()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ServerError);
}

#[tokio::test]
async fn origins_strictly_increase_across_reads() {
    let mut profile = profile_with(vec![
        resource("a", ValueType::Int32),
        resource("b", ValueType::Int32),
    ]);
    profile.device_commands.push(DeviceCommand {
        name: "both".into(),
        is_hidden: false,
        read_write: ReadWrite::Read,
        resource_operations: vec![ResourceOperation::new("a"), ResourceOperation::new("b")],
        tags: BTreeMap::new(),
    });
    let h = harness(profile, vec![Device::new("d1", "P")]).await;

    let mut origins = Vec::new();
    for _ in 0..20 {
        // Driver-supplied origins collide on purpose.
        h.driver.script_read(
            "d1",
            Ok(vec![
                value("a", ValueType::Int32, Value::Int32(1)).with_origin(5),
                value("b", ValueType::Int32, Value::Int32(2)).with_origin(5),
            ]),
        );
        let event = read_command(&h.container, "d1", "both", &options())
            .await
            .unwrap();
        assert_eq!(event.readings.len(), 2);
        origins.extend(event.readings.iter().map(|r| r.origin));
    }
    assert!(origins.windows(2).all(|pair| pair[0] < pair[1]));
}

#[tokio::test]
async fn unknown_resources_from_the_driver_are_discarded() {
    let h = harness(
        profile_with(vec![resource("t", ValueType::Int16)]),
        vec![Device::new("d1", "P")],
    )
    .await;
    h.driver.script_read(
        "d1",
        Ok(vec![
            value("t", ValueType::Int16, Value::Int16(1)),
            value("ghost", ValueType::Int16, Value::Int16(2)),
        ]),
    );
    let event = read_command(&h.container, "d1", "t", &options()).await.unwrap();
    assert_eq!(event.readings.len(), 1);
    assert_eq!(event.readings[0].resource_name, "t");
}

#[tokio::test]
async fn failed_assertion_marks_device_down() {
    let mut t = resource("t", ValueType::Int16);
    t.properties.assertion = "1".into();
    let h = harness(profile_with(vec![t]), vec![Device::new("d1", "P")]).await;
    h.driver
        .script_read("d1", Ok(vec![value("t", ValueType::Int16, Value::Int16(0))]));

    let err = read_command(&h.container, "d1", "t", &options())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ServerError);
    assert_eq!(
        h.container.caches.devices.for_name("d1").unwrap().operating_state,
        OperatingState::Down
    );
    let metadata = h.metadata.clone();
    wait_until(move || {
        metadata.operating_state_updates() == vec![("d1".to_owned(), OperatingState::Down)]
    })
    .await;
}

#[tokio::test]
async fn command_mappings_replace_values() {
    let mut profile = profile_with(vec![resource("s", ValueType::Bool)]);
    let mut operation = ResourceOperation::new("s");
    operation.mappings = BTreeMap::from([("true".to_owned(), "on".to_owned())]);
    profile.device_commands.push(DeviceCommand {
        name: "switch".into(),
        is_hidden: false,
        read_write: ReadWrite::ReadWrite,
        resource_operations: vec![operation],
        tags: BTreeMap::from([("zone".to_owned(), serde_json::json!("north"))]),
    });
    let h = harness(profile, vec![Device::new("d1", "P")]).await;
    h.driver
        .script_read("d1", Ok(vec![value("s", ValueType::Bool, Value::Bool(true))]));

    let event = read_command(&h.container, "d1", "switch", &options())
        .await
        .unwrap();
    assert_eq!(event.readings[0].value.as_deref(), Some("on"));
    assert_eq!(event.tags.get("zone"), Some(&serde_json::json!("north")));
}

#[tokio::test]
async fn command_resolution_errors() {
    let mut ro = resource("ro", ValueType::Int16);
    ro.properties.read_write = ReadWrite::Read;
    let h = harness(profile_with(vec![ro]), vec![Device::new("d1", "P")]).await;

    let err = read_command(&h.container, "d1", "missing", &options())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::EntityDoesNotExist);

    let err = read_command(&h.container, "nobody", "ro", &options())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::EntityDoesNotExist);

    let params = WriteParams::from([("ro".to_owned(), "1".to_owned())]);
    let err = write_command(&h.container, "d1", "ro", &params, &options())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotAllowed);

    let snapshot = h.container.metrics.snapshot();
    assert_eq!(snapshot.read_commands, 2);
    assert_eq!(snapshot.write_commands, 1);
    assert_eq!(snapshot.command_errors, 3);
}

#[test]
fn reserved_query_parameters_are_split_from_the_rest() {
    let options = CommandOptions::from_query(
        [("ds-pushevent", "yes"), ("ds-returnevent", "no"), ("unit", "c")],
        CorrelationId::new(),
    )
    .unwrap();
    assert!(options.send_event);
    assert!(!options.return_event);
    assert_eq!(options.query.as_deref(), Some("unit=c"));
    assert_eq!(URL_RAW_QUERY, "urlRawQuery");

    let err = CommandOptions::from_query([("ds-pushevent", "maybe")], CorrelationId::new())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ContractInvalid);
}

#[tokio::test]
async fn asynchronous_values_are_published() {
    let mut t = resource("t", ValueType::Int16);
    t.properties.offset = Some(1.0);
    let h = harness(profile_with(vec![t]), vec![Device::new("d1", "P")]).await;

    let values = AsyncValues {
        device_name: "d1".into(),
        source_name: "t".into(),
        command_values: vec![value("t", ValueType::Int16, Value::Int16(41))],
    };
    ingest(&h.container, values, &CorrelationId::new()).unwrap();

    let bus = h.bus.clone();
    wait_until(move || !bus.published().is_empty()).await;
    let published = h.bus.published();
    assert_eq!(published[0].topic, "edgex/device/ds/P/d1/t");
    let request: ds_models::AddEventRequest = published[0].envelope.decode().unwrap();
    assert_eq!(request.event.readings[0].value.as_deref(), Some("42"));

    let unknown = AsyncValues {
        device_name: "ghost".into(),
        source_name: "t".into(),
        command_values: Vec::new(),
    };
    let err = ingest(&h.container, unknown, &CorrelationId::new()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::EntityDoesNotExist);
}

#[tokio::test]
async fn failed_assertion_in_an_async_batch_drops_only_that_reading() {
    let mut status = resource("status", ValueType::Int16);
    status.properties.assertion = "1".into();
    let h = harness(
        profile_with(vec![status, resource("t", ValueType::Int16)]),
        vec![Device::new("d1", "P")],
    )
    .await;

    let values = AsyncValues {
        device_name: "d1".into(),
        source_name: "t".into(),
        command_values: vec![
            value("status", ValueType::Int16, Value::Int16(0)),
            value("t", ValueType::Int16, Value::Int16(21)),
        ],
    };
    ingest(&h.container, values, &CorrelationId::new()).unwrap();

    let bus = h.bus.clone();
    wait_until(move || !bus.published().is_empty()).await;
    let request: ds_models::AddEventRequest = h.bus.published()[0].envelope.decode().unwrap();
    assert_eq!(request.event.readings.len(), 1);
    assert_eq!(request.event.readings[0].resource_name, "t");
    assert_eq!(request.event.readings[0].value.as_deref(), Some("21"));
    assert_eq!(
        h.container.caches.devices.for_name("d1").unwrap().operating_state,
        OperatingState::Down
    );
}
