//! ---
//! ds_section: "02-messaging-ipc-data-model"
//! ds_subsection: "module"
//! ds_type: "source"
//! ds_scope: "code"
//! ds_description: "Typed value model and metadata/event contracts."
//! ds_version: "v0.0.0-prealpha"
//! ds_owner: "tbd"
//! ---
#![warn(missing_docs)]
//! Typed command values plus the device, profile, watcher, service and
//! event contracts exchanged with drivers and upstream services.

pub mod device;
pub mod event;
pub mod profile;
pub mod requests;
pub mod responses;
pub mod service;
pub mod value;
pub mod watcher;

pub use device::{AdminState, AutoEvent, Device, OperatingState, ProtocolProperties, Protocols};
pub use event::{AddEventRequest, Event, Reading};
pub use profile::{
    DeviceCommand, DeviceProfile, DeviceResource, ReadWrite, ResourceOperation,
    ResourceProperties,
};
pub use requests::{
    DeviceCallback, EntityName, ProfileCallback, ServiceCallback, UpdateDeviceService,
    WatcherCallback,
};
pub use responses::{
    BaseResponse, ConfigResponse, DiscoveryResponse, EventResponse, MetricsResponse,
    MultiEventResponse, PingResponse, VersionResponse,
};
pub use service::DeviceServiceRecord;
pub use value::{CommandValue, Value, ValueType, MAX_BINARY_BYTES};
pub use watcher::ProvisionWatcher;
