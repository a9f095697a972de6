//! ---
//! ds_section: "01-core-functionality"
//! ds_subsection: "module"
//! ds_type: "source"
//! ds_scope: "code"
//! ds_description: "Command engine: resolution, driver dispatch and event assembly."
//! ds_version: "v0.0.0-prealpha"
//! ds_owner: "tbd"
//! ---
//! A command name resolves first to a device command of the device's profile
//! and then to a single device resource. Reads turn driver values into an
//! [`Event`]; writes never produce one.

use std::collections::BTreeMap;

use ds_cache::CommandMethod;
use ds_common::{now_millis, CorrelationId, DsError, DsResult, ErrorKind};
use ds_models::{
    AdminState, CommandValue, Device, DeviceResource, Event, OperatingState, Reading,
    ResourceOperation, Value,
};
use serde_json::Value as JsonValue;
use tokio::task::JoinSet;
use tracing::{debug, error, warn};

use crate::container::ServiceContainer;
use crate::driver::{CommandRequest, URL_RAW_QUERY};
use crate::transformer;

/// Resource name to textual value, as sent in a write request body.
pub type WriteParams = BTreeMap<String, String>;

/// Per-invocation switches.
#[derive(Debug, Clone)]
pub struct CommandOptions {
    /// Publish the resulting event.
    pub send_event: bool,
    /// Include the event in the response.
    pub return_event: bool,
    /// Raw query string forwarded to the driver as `urlRawQuery`.
    pub query: Option<String>,
    pub correlation_id: CorrelationId,
}

impl Default for CommandOptions {
    fn default() -> Self {
        Self {
            send_event: false,
            return_event: true,
            query: None,
            correlation_id: CorrelationId::new(),
        }
    }
}

/// Query parameter selecting whether the event is published.
pub const PUSH_EVENT_PARAM: &str = "ds-pushevent";
/// Query parameter selecting whether the event is returned.
pub const RETURN_EVENT_PARAM: &str = "ds-returnevent";

impl CommandOptions {
    /// Split request query pairs into the reserved `ds-` switches and the
    /// remainder, which is forwarded to the driver re-encoded.
    pub fn from_query<I, K, V>(pairs: I, correlation_id: CorrelationId) -> DsResult<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut options = CommandOptions {
            correlation_id,
            ..CommandOptions::default()
        };
        let mut forwarded = url::form_urlencoded::Serializer::new(String::new());
        let mut any_forwarded = false;
        for (key, value) in pairs {
            let (key, value) = (key.as_ref(), value.as_ref());
            match key.to_ascii_lowercase().as_str() {
                PUSH_EVENT_PARAM => options.send_event = yes_no(key, value)?,
                RETURN_EVENT_PARAM => options.return_event = yes_no(key, value)?,
                _ => {
                    forwarded.append_pair(key, value);
                    any_forwarded = true;
                }
            }
        }
        if any_forwarded {
            options.query = Some(forwarded.finish());
        }
        Ok(options)
    }
}

fn yes_no(key: &str, value: &str) -> DsResult<bool> {
    match value.to_ascii_lowercase().as_str() {
        "yes" | "true" => Ok(true),
        "no" | "false" => Ok(false),
        other => Err(DsError::contract_invalid(format!(
            "{key} must be yes or no, got '{other}'"
        ))),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CommandOutcome {
    /// A read completed with this event.
    Event(Event),
    /// A write completed.
    Written,
}

impl CommandOutcome {
    pub fn into_event(self) -> Option<Event> {
        match self {
            CommandOutcome::Event(event) => Some(event),
            CommandOutcome::Written => None,
        }
    }
}

/// A command name resolved against a device.
struct Resolved {
    device: Device,
    operations: Vec<(ResourceOperation, DeviceResource)>,
    command_tags: BTreeMap<String, JsonValue>,
}

/// Decode a write body. Non-string JSON values are passed on as JSON text.
pub fn write_params(body: &JsonValue) -> DsResult<WriteParams> {
    let object = body.as_object().ok_or_else(|| {
        DsError::contract_invalid("write request body must be a JSON object")
    })?;
    Ok(object
        .iter()
        .map(|(name, value)| {
            let text = match value {
                JsonValue::String(text) => text.clone(),
                other => other.to_string(),
            };
            (name.clone(), text)
        })
        .collect())
}

/// Entry point shared by the HTTP surface and the messaging subscriber.
pub async fn handle_command(
    container: &ServiceContainer,
    method: CommandMethod,
    device_name: &str,
    command: &str,
    body: Option<&JsonValue>,
    options: &CommandOptions,
) -> DsResult<CommandOutcome> {
    match method {
        CommandMethod::Get => read_command(container, device_name, command, options)
            .await
            .map(CommandOutcome::Event),
        CommandMethod::Set => {
            let params = match body {
                Some(body) => write_params(body)?,
                None => WriteParams::new(),
            };
            write_command(container, device_name, command, &params, options)
                .await
                .map(|()| CommandOutcome::Written)
        }
    }
}

/// Read `command` from `device_name`.
pub async fn read_command(
    container: &ServiceContainer,
    device_name: &str,
    command: &str,
    options: &CommandOptions,
) -> DsResult<Event> {
    container.metrics.observe_command(CommandMethod::Get.as_str());
    let result = execute_read(container, device_name, command, options).await;
    if let Err(err) = &result {
        observe_failure(container, device_name, command, CommandMethod::Get, options, err);
    }
    result
}

/// Write `params` through `command` to `device_name`.
pub async fn write_command(
    container: &ServiceContainer,
    device_name: &str,
    command: &str,
    params: &WriteParams,
    options: &CommandOptions,
) -> DsResult<()> {
    container.metrics.observe_command(CommandMethod::Set.as_str());
    let result = execute_write(container, device_name, command, params, options).await;
    if let Err(err) = &result {
        observe_failure(container, device_name, command, CommandMethod::Set, options, err);
    }
    result
}

/// Read `command` from every operational device in parallel.
///
/// Events are ordered by device name. Fails only when every device failed,
/// with the last error observed.
pub async fn read_all(
    container: &ServiceContainer,
    command: &str,
    options: &CommandOptions,
) -> DsResult<Vec<Event>> {
    let mut set = JoinSet::new();
    for device in container.caches.devices.operational() {
        let container = container.clone();
        let command = command.to_owned();
        let options = options.clone();
        set.spawn(async move { read_command(&container, &device.name, &command, &options).await });
    }
    let mut events = Vec::new();
    let mut last_error = None;
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok(Ok(event)) => events.push(event),
            Ok(Err(err)) => last_error = Some(err),
            Err(join) => last_error = Some(DsError::server(format!("command task failed: {join}"))),
        }
    }
    if let Some(err) = last_error.filter(|_| events.is_empty()) {
        return Err(err);
    }
    events.sort_by(|a, b| a.device_name.cmp(&b.device_name));
    Ok(events)
}

/// Write `params` through `command` on every operational device in parallel.
/// Returns the number of devices that accepted the write.
pub async fn write_all(
    container: &ServiceContainer,
    command: &str,
    params: &WriteParams,
    options: &CommandOptions,
) -> DsResult<usize> {
    let mut set = JoinSet::new();
    for device in container.caches.devices.operational() {
        let container = container.clone();
        let command = command.to_owned();
        let params = params.clone();
        let options = options.clone();
        set.spawn(async move {
            write_command(&container, &device.name, &command, &params, &options).await
        });
    }
    let mut succeeded = 0;
    let mut last_error = None;
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok(Ok(())) => succeeded += 1,
            Ok(Err(err)) => last_error = Some(err),
            Err(join) => last_error = Some(DsError::server(format!("command task failed: {join}"))),
        }
    }
    match last_error {
        Some(err) if succeeded == 0 => Err(err),
        _ => Ok(succeeded),
    }
}

async fn execute_read(
    container: &ServiceContainer,
    device_name: &str,
    command: &str,
    options: &CommandOptions,
) -> DsResult<Event> {
    let resolved = resolve(container, device_name, command, CommandMethod::Get)?;
    let requests = command_requests(&resolved, options);
    let device = &resolved.device;
    debug!(
        correlation_id = %options.correlation_id.as_str(),
        device = %device.name,
        command = %command,
        resources = requests.len(),
        "dispatching read"
    );
    let values = container
        .driver
        .handle_read_commands(&device.name, &device.protocols, &requests)
        .await
        .map_err(|err| {
            DsError::wrap(
                ErrorKind::ServerError,
                format!("error reading {command} from device {}", device.name),
                err,
            )
        })?;

    let operations: Vec<ResourceOperation> =
        resolved.operations.iter().map(|(op, _)| op.clone()).collect();
    let event = build_event(
        container,
        device,
        command,
        values,
        &operations,
        &resolved.command_tags,
        OnAssertionFailure::FailCall,
    )?;

    after_contact(container, &device.name);
    if options.send_event {
        container
            .publisher
            .spawn_publish(event.clone(), options.correlation_id.clone());
    }
    Ok(event)
}

async fn execute_write(
    container: &ServiceContainer,
    device_name: &str,
    command: &str,
    params: &WriteParams,
    options: &CommandOptions,
) -> DsResult<()> {
    let resolved = resolve(container, device_name, command, CommandMethod::Set)?;
    if params.is_empty() {
        return Err(DsError::server("no parameters specified"));
    }
    let requests = command_requests(&resolved, options);
    let mut values = Vec::with_capacity(resolved.operations.len());
    for (operation, resource) in &resolved.operations {
        values.push(write_value(container, operation, resource, params)?);
    }

    let device = &resolved.device;
    debug!(
        correlation_id = %options.correlation_id.as_str(),
        device = %device.name,
        command = %command,
        values = values.len(),
        "dispatching write"
    );
    container
        .driver
        .handle_write_commands(&device.name, &device.protocols, &requests, &values)
        .await
        .map_err(|err| {
            DsError::wrap(
                ErrorKind::ServerError,
                format!("error writing {command} to device {}", device.name),
                err,
            )
        })?;
    after_contact(container, &device.name);
    Ok(())
}

/// Resolve the value to write for one operation: body, then operation
/// default, then resource default.
fn write_value(
    container: &ServiceContainer,
    operation: &ResourceOperation,
    resource: &DeviceResource,
    params: &WriteParams,
) -> DsResult<CommandValue> {
    let props = &resource.properties;
    let text = params
        .get(&resource.name)
        .map(String::as_str)
        .or_else(|| Some(operation.default_value.as_str()).filter(|v| !v.is_empty()))
        .or_else(|| Some(props.default_value.as_str()).filter(|v| !v.is_empty()))
        .ok_or_else(|| {
            DsError::server(format!("no value given for resource {}", resource.name))
        })?;
    let text = transformer::map_write_parameter(&resource.name, text, &operation.mappings);
    let value = Value::parse(props.value_type, text)?;
    let value = CommandValue::new(resource.name.clone(), props.value_type, value)?;
    transformer::check_range(&value, props)?;
    if container.config.device.data_transform {
        transformer::transform_write(&value, props)
    } else {
        Ok(value)
    }
}

fn resolve(
    container: &ServiceContainer,
    device_name: &str,
    command: &str,
    method: CommandMethod,
) -> DsResult<Resolved> {
    if container.service_locked() {
        return Err(DsError::locked(format!(
            "service {} is locked",
            container.service_name()
        )));
    }
    let device = container
        .caches
        .devices
        .for_name(device_name)
        .ok_or_else(|| DsError::not_found(format!("device {device_name} not found")))?;
    if device.admin_state == AdminState::Locked {
        return Err(DsError::locked(format!("{device_name} is locked")));
    }

    let profiles = &container.caches.profiles;
    let profile = device.profile_name.as_str();
    let (operations, command_tags) = if profiles.command_exists(profile, command, method)? {
        let operations = profiles.resource_operations(profile, command, method)?;
        let tags = profiles
            .device_command(profile, command)
            .map(|cmd| cmd.tags)
            .unwrap_or_default();
        (operations, tags)
    } else if profiles.device_resource(profile, command).is_some() {
        let operation = profiles
            .resource_operation(profile, command, method)
            .unwrap_or_else(|_| ResourceOperation::new(command));
        (vec![operation], BTreeMap::new())
    } else if profiles.command_exists(profile, command, opposite(method))? {
        return Err(DsError::not_allowed(format!(
            "command {command} does not support {method}"
        )));
    } else {
        return Err(DsError::not_found(format!(
            "command or resource {command} not found in profile {profile}"
        )));
    };

    if operations.len() > container.config.device.max_cmd_ops {
        return Err(DsError::server(format!(
            "command {command} has {} operations, more than the {} allowed",
            operations.len(),
            container.config.device.max_cmd_ops
        )));
    }

    let mut resolved = Vec::with_capacity(operations.len());
    for operation in operations {
        let resource = profiles
            .device_resource(profile, &operation.device_resource)
            .ok_or_else(|| {
                DsError::not_found(format!(
                    "resource {} not found in profile {profile}",
                    operation.device_resource
                ))
            })?;
        let access = resource.properties.read_write;
        let permitted = match method {
            CommandMethod::Get => access.readable(),
            CommandMethod::Set => access.writable(),
        };
        if !permitted {
            return Err(DsError::not_allowed(format!(
                "resource {} does not support {method}",
                resource.name
            )));
        }
        resolved.push((operation, resource));
    }

    Ok(Resolved {
        device,
        operations: resolved,
        command_tags,
    })
}

fn opposite(method: CommandMethod) -> CommandMethod {
    match method {
        CommandMethod::Get => CommandMethod::Set,
        CommandMethod::Set => CommandMethod::Get,
    }
}

fn command_requests(resolved: &Resolved, options: &CommandOptions) -> Vec<CommandRequest> {
    resolved
        .operations
        .iter()
        .map(|(_, resource)| {
            let mut attributes = resource.attributes.clone();
            if let Some(query) = options.query.as_deref().filter(|q| !q.is_empty()) {
                attributes.insert(URL_RAW_QUERY.to_owned(), JsonValue::String(query.to_owned()));
            }
            CommandRequest {
                device_resource_name: resource.name.clone(),
                attributes,
                value_type: resource.properties.value_type,
            }
        })
        .collect()
}

/// What a failed resource assertion does to the rest of the values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum OnAssertionFailure {
    /// Fail the whole call. Used for synchronous reads.
    FailCall,
    /// Drop only the offending reading. Used for asynchronous batches.
    DropReading,
}

/// Turn driver values into an event for `source`.
///
/// Values naming resources outside the device's profile are discarded with a
/// warning. Overflow and NaN results become synthetic string readings. An
/// assertion failure always marks the device DOWN; `on_assertion` decides
/// whether it also fails the call.
pub(crate) fn build_event(
    container: &ServiceContainer,
    device: &Device,
    source: &str,
    values: Vec<CommandValue>,
    operations: &[ResourceOperation],
    command_tags: &BTreeMap<String, JsonValue>,
    on_assertion: OnAssertionFailure,
) -> DsResult<Event> {
    let profiles = &container.caches.profiles;
    let profile = device.profile_name.as_str();
    let mut readings = Vec::with_capacity(values.len());

    for value in values {
        let Some(resource) = profiles.device_resource(profile, &value.device_resource_name) else {
            warn!(
                device = %device.name,
                resource = %value.device_resource_name,
                "driver returned a value for an unknown resource, discarding"
            );
            continue;
        };
        let props = &resource.properties;
        let value = if value.is_null() {
            value
        } else {
            match process_value(container, device, value, &resource, operations, on_assertion)? {
                Some(value) => value,
                None => continue,
            }
        };

        let origin = container.clock.next_after(value.origin);
        let mut reading =
            Reading::from_command_value(profile, &device.name, &value, &props.media_type, origin);
        reading.units = props.units.clone();
        reading.tags = resource.tags.clone();
        reading.tags.extend(
            value
                .tags
                .iter()
                .map(|(key, tag)| (key.clone(), JsonValue::String(tag.clone()))),
        );
        readings.push(reading);
    }

    let origin = readings
        .last()
        .map(|reading| reading.origin)
        .unwrap_or_else(|| container.clock.next());
    let mut event = Event::new(profile, &device.name, source, origin);
    event.tags = device.tags.clone();
    event
        .tags
        .extend(command_tags.iter().map(|(k, v)| (k.clone(), v.clone())));
    event.readings = readings;
    Ok(event)
}

/// Transformation, assertion and mapping for one non-null value.
///
/// `None` means the reading was dropped.
fn process_value(
    container: &ServiceContainer,
    device: &Device,
    value: CommandValue,
    resource: &DeviceResource,
    operations: &[ResourceOperation],
    on_assertion: OnAssertionFailure,
) -> DsResult<Option<CommandValue>> {
    let props = &resource.properties;
    let value = if container.config.device.data_transform {
        match transformer::transform_read(&value, props) {
            Ok(transformed) => transformed,
            Err(err) if err.is(ErrorKind::OverflowError) || err.is(ErrorKind::NaNError) => {
                warn!(
                    device = %device.name,
                    resource = %resource.name,
                    error = %err,
                    "transformation failed, substituting reading"
                );
                let text = if err.is(ErrorKind::NaNError) { "NaN" } else { "overflow" };
                let mut synthetic =
                    CommandValue::string(value.device_resource_name.clone(), text)
                        .with_origin(value.origin);
                synthetic.tags = value.tags;
                return Ok(Some(synthetic));
            }
            Err(err) => return Err(err),
        }
    } else {
        value
    };

    if let Err(err) = transformer::check_assertion(&value, &props.assertion) {
        error!(device = %device.name, resource = %resource.name, error = %err, "assertion failed");
        mark_device_down(container, &device.name);
        return match on_assertion {
            OnAssertionFailure::FailCall => Err(err),
            OnAssertionFailure::DropReading => Ok(None),
        };
    }

    let mappings = operations
        .iter()
        .find(|op| op.device_resource == resource.name)
        .map(|op| op.mappings.clone())
        .or_else(|| {
            container
                .caches
                .profiles
                .resource_operation(&device.profile_name, &resource.name, CommandMethod::Get)
                .ok()
                .map(|op| op.mappings)
        })
        .unwrap_or_default();
    Ok(Some(transformer::map_value(value, props.value_type, &mappings)))
}

/// Set the device DOWN locally and ask metadata to do the same.
pub(crate) fn mark_device_down(container: &ServiceContainer, device_name: &str) {
    match container
        .caches
        .devices
        .update_operating_state(device_name, OperatingState::Down)
    {
        Ok(OperatingState::Down) => {}
        Ok(OperatingState::Up) => {
            let metadata = container.metadata.clone();
            let name = device_name.to_owned();
            container.spawn(async move {
                if let Err(err) = metadata
                    .update_device_operating_state(&name, OperatingState::Down)
                    .await
                {
                    error!(device = %name, error = %err, "failed to report operating state");
                }
            });
        }
        Err(err) => warn!(device = %device_name, error = %err, "cannot mark device down"),
    }
}

/// Bookkeeping after the driver was reached successfully.
pub(crate) fn after_contact(container: &ServiceContainer, device_name: &str) {
    if !container.config.device.update_last_connected {
        return;
    }
    let metadata = container.metadata.clone();
    let name = device_name.to_owned();
    container.spawn(async move {
        if let Err(err) = metadata.update_device_last_connected(&name, now_millis()).await {
            warn!(device = %name, error = %err, "failed to update last connected");
        }
    });
}

fn observe_failure(
    container: &ServiceContainer,
    device_name: &str,
    command: &str,
    method: CommandMethod,
    options: &CommandOptions,
    err: &DsError,
) {
    container.metrics.observe_command_error(err.kind().as_str());
    warn!(
        correlation_id = %options.correlation_id.as_str(),
        device = %device_name,
        command = %command,
        method = %method,
        kind = err.kind().as_str(),
        error = %err,
        "command failed"
    );
}
