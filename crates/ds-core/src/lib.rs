//! ---
//! ds_section: "01-core-functionality"
//! ds_subsection: "module"
//! ds_type: "source"
//! ds_scope: "code"
//! ds_description: "Device service runtime core."
//! ds_version: "v0.0.0-prealpha"
//! ds_owner: "tbd"
//! ---
//! The runtime threads a single [`ServiceContainer`] through every component;
//! there is no process-global state besides the tracing subscriber.

pub mod autoevent;
pub mod bootstrap;
pub mod callback;
pub mod clients;
pub mod command;
pub mod container;
pub mod discovery;
pub mod driver;
pub mod duration;
pub mod egress;
pub mod ingest;
pub mod messaging;
pub mod transformer;

pub use autoevent::AutoEventManager;
pub use bootstrap::{DeviceService, DeviceServiceBuilder};
pub use callback::MetadataCallbacks;
pub use clients::{
    CoreDataClient, HttpCoreDataClient, HttpMetadataClient, InMemoryCoreDataClient,
    InMemoryMetadataClient, MetadataClient,
};
pub use command::{
    handle_command, read_all, read_command, write_all, write_command, write_params,
    CommandOptions, CommandOutcome, WriteParams, PUSH_EVENT_PARAM, RETURN_EVENT_PARAM,
};
pub use container::ServiceContainer;
pub use discovery::{trigger_discovery, DiscoveryInterlock, DiscoveryTicket};
pub use driver::simulated::{DriverCall, SimulatedDriver};
pub use driver::{AsyncValues, CommandRequest, DriverContext, ProtocolDriver};
pub use duration::parse_interval;
pub use egress::{EgressSink, EventPublisher};
pub use messaging::{start_command_subscriber, ALL_DEVICES};
