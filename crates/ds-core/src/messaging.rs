//! ---
//! ds_section: "02-messaging-ipc-data-model"
//! ds_subsection: "module"
//! ds_type: "source"
//! ds_scope: "code"
//! ds_description: "Command requests received over the message bus."
//! ds_version: "v0.0.0-prealpha"
//! ds_owner: "tbd"
//! ---
use std::sync::Arc;

use ds_cache::CommandMethod;
use ds_common::{CorrelationId, DsError, DsResult, ErrorKind};
use ds_models::{BaseResponse, EventResponse, MultiEventResponse};
use ds_msg::{
    command_request_filter, command_response_topic, parse_command_topic, BusMessage,
    MessageBus, MessageEnvelope,
};
use serde_json::Value as JsonValue;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::command::{
    handle_command, read_all, write_all, write_params, CommandOptions, CommandOutcome,
};
use crate::container::ServiceContainer;
use crate::egress::bus_error;

/// Device segment addressing every operational device.
pub const ALL_DEVICES: &str = "all";

/// Subscribe to this service's command request topics and answer each
/// request on its response topic. Requests are handled concurrently.
pub async fn start_command_subscriber(
    container: ServiceContainer,
    bus: Arc<dyn MessageBus>,
) -> DsResult<JoinHandle<()>> {
    let base = container.config.message_bus.base_topic.clone();
    let filter = command_request_filter(&base, container.service_name());
    let mut subscription = bus.subscribe(&filter).await.map_err(bus_error)?;
    info!(filter = %filter, bus = bus.name(), "command subscriber started");

    Ok(tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = container.cancel.cancelled() => break,
                received = subscription.recv() => match received {
                    Some(message) => {
                        let container_for_task = container.clone();
                        let bus = bus.clone();
                        container.spawn(async move {
                            respond(&container_for_task, bus.as_ref(), message).await;
                        });
                    }
                    None => {
                        warn!("command subscription closed");
                        break;
                    }
                },
            }
        }
        info!("command subscriber stopped");
    }))
}

async fn respond(container: &ServiceContainer, bus: &dyn MessageBus, message: BusMessage) {
    let request = &message.envelope;
    let base = &container.config.message_bus.base_topic;
    let (payload, is_error) = match dispatch(container, &message).await {
        Ok(payload) => (payload, false),
        Err(err) => {
            debug!(
                correlation_id = %request.correlation_id,
                topic = %message.topic,
                error = %err,
                "command request failed"
            );
            let body = BaseResponse {
                request_id: request.request_id.clone(),
                ..BaseResponse::error(err.http_status(), err.message())
            };
            (serde_json::to_value(body).unwrap_or(JsonValue::Null), true)
        }
    };
    let topic = command_response_topic(base, container.service_name(), &request.request_id);
    let sent = match MessageEnvelope::response_to(request, &payload, is_error) {
        Ok(envelope) => bus.publish(&topic, envelope).await,
        Err(err) => Err(err),
    };
    if let Err(err) = sent {
        container.metrics.observe_publish_failure();
        error!(
            correlation_id = %request.correlation_id,
            topic = %topic,
            error = %err,
            "failed to publish command response"
        );
    }
}

/// Execute one request and render the success payload.
async fn dispatch(container: &ServiceContainer, message: &BusMessage) -> DsResult<JsonValue> {
    let request = &message.envelope;
    let base = &container.config.message_bus.base_topic;
    let target = parse_command_topic(base, container.service_name(), &message.topic)
        .ok_or_else(|| {
            DsError::contract_invalid(format!("malformed command topic {}", message.topic))
        })?;
    let method: CommandMethod = target.method.parse()?;
    let correlation_id = CorrelationId::from_header(Some(&request.correlation_id));
    let options = CommandOptions::from_query(&request.query_params, correlation_id)?;
    let body: Option<JsonValue> = if request.payload.is_empty() {
        None
    } else {
        Some(request.decode().map_err(|err| {
            DsError::wrap(
                ErrorKind::ContractInvalid,
                "failed to decode command payload",
                err,
            )
        })?)
    };
    let ok = |status| BaseResponse {
        request_id: request.request_id.clone(),
        ..BaseResponse::new(status)
    };

    if target.device == ALL_DEVICES {
        let value = match method {
            CommandMethod::Get => {
                let events = read_all(container, &target.command, &options).await?;
                let events = if options.return_event { events } else { Vec::new() };
                serde_json::to_value(MultiEventResponse { base: ok(200), events })
            }
            CommandMethod::Set => {
                let params = write_params(body.as_ref().unwrap_or(&JsonValue::Null))?;
                write_all(container, &target.command, &params, &options).await?;
                serde_json::to_value(ok(200))
            }
        };
        return value.map_err(|err| DsError::server(format!("failed to encode response: {err}")));
    }

    let outcome = handle_command(
        container,
        method,
        &target.device,
        &target.command,
        body.as_ref(),
        &options,
    )
    .await?;
    let value = match outcome {
        CommandOutcome::Event(event) => serde_json::to_value(EventResponse {
            base: ok(200),
            event: options.return_event.then_some(event),
        }),
        CommandOutcome::Written => serde_json::to_value(ok(200)),
    };
    value.map_err(|err| DsError::server(format!("failed to encode response: {err}")))
}
