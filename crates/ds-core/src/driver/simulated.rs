//! ---
//! ds_section: "05-networking-external-interfaces"
//! ds_subsection: "module"
//! ds_type: "source"
//! ds_scope: "code"
//! ds_description: "Register-map driver used by the daemon and by tests."
//! ds_version: "v0.0.0-prealpha"
//! ds_owner: "tbd"
//! ---
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use ds_common::{DsError, DsResult};
use ds_models::{AdminState, CommandValue, Device, Protocols, Value, ValueType};
use rand::Rng;
use tokio::sync::{mpsc, Mutex, Notify};
use tracing::{debug, info};

use super::{AsyncValues, CommandRequest, DriverContext, ProtocolDriver};

/// Every interaction the core had with the driver, in call order.
#[derive(Debug, Clone, PartialEq)]
pub enum DriverCall {
    Initialize { async_enabled: bool },
    AddDevice { name: String, admin_state: AdminState },
    UpdateDevice { name: String, admin_state: AdminState },
    RemoveDevice { name: String },
    Read { device: String, resources: Vec<String> },
    Write { device: String, values: Vec<CommandValue> },
    Stop { force: bool },
    Discover,
}

type ScriptedRead = DsResult<Vec<CommandValue>>;

/// In-memory driver that simulates a register per (device, resource).
///
/// Reads of a register that was never written produce a random value for
/// numeric and boolean types and a null value for everything else. Tests can
/// script the next read results of a device to return exact values or errors.
#[derive(Debug, Clone, Default)]
pub struct SimulatedDriver {
    registers: Arc<Mutex<HashMap<String, HashMap<String, CommandValue>>>>,
    scripted: Arc<parking_lot::Mutex<HashMap<String, VecDeque<ScriptedRead>>>>,
    calls: Arc<parking_lot::Mutex<Vec<DriverCall>>>,
    async_tx: Arc<parking_lot::Mutex<Option<mpsc::Sender<AsyncValues>>>>,
    discovery_unsupported: Arc<AtomicBool>,
    discovery_gate: Arc<parking_lot::Mutex<Option<Arc<Notify>>>>,
}

impl SimulatedDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the register backing `device`/`value.device_resource_name`.
    pub async fn set_value(&self, device: &str, value: CommandValue) {
        let mut registers = self.registers.lock().await;
        registers
            .entry(device.to_owned())
            .or_default()
            .insert(value.device_resource_name.clone(), value);
    }

    /// Current register content.
    pub async fn value(&self, device: &str, resource: &str) -> Option<CommandValue> {
        let registers = self.registers.lock().await;
        registers
            .get(device)
            .and_then(|resources| resources.get(resource))
            .cloned()
    }

    /// Queue the result of the next read of `device`, bypassing the registers.
    pub fn script_read(&self, device: &str, result: ScriptedRead) {
        self.scripted
            .lock()
            .entry(device.to_owned())
            .or_default()
            .push_back(result);
    }

    /// Calls observed so far.
    pub fn calls(&self) -> Vec<DriverCall> {
        self.calls.lock().clone()
    }

    /// Number of read calls issued for `device`.
    pub fn read_count(&self, device: &str) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|call| matches!(call, DriverCall::Read { device: d, .. } if d == device))
            .count()
    }

    /// Push values through the asynchronous channel handed over at initialisation.
    pub async fn push_async(&self, values: AsyncValues) -> DsResult<()> {
        let sender = self
            .async_tx
            .lock()
            .clone()
            .ok_or_else(|| DsError::not_allowed("asynchronous readings are disabled"))?;
        sender
            .send(values)
            .await
            .map_err(|_| DsError::unavailable("asynchronous reading channel is closed"))
    }

    /// Report discovery as unsupported.
    pub fn without_discovery(self) -> Self {
        self.discovery_unsupported.store(true, Ordering::Relaxed);
        self
    }

    /// Make the next discovery pass wait until the returned gate is notified.
    pub fn hold_discovery(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.discovery_gate.lock() = Some(gate.clone());
        gate
    }

    fn record(&self, call: DriverCall) {
        self.calls.lock().push(call);
    }
}

fn simulated_value(resource: &str, value_type: ValueType) -> CommandValue {
    let mut rng = rand::thread_rng();
    let value = match value_type {
        ValueType::Bool => Value::Bool(rng.gen()),
        ValueType::Uint8 => Value::Uint8(rng.gen_range(0..100)),
        ValueType::Uint16 => Value::Uint16(rng.gen_range(0..100)),
        ValueType::Uint32 => Value::Uint32(rng.gen_range(0..100)),
        ValueType::Uint64 => Value::Uint64(rng.gen_range(0..100)),
        ValueType::Int8 => Value::Int8(rng.gen_range(-50..50)),
        ValueType::Int16 => Value::Int16(rng.gen_range(-50..50)),
        ValueType::Int32 => Value::Int32(rng.gen_range(-50..50)),
        ValueType::Int64 => Value::Int64(rng.gen_range(-50..50)),
        ValueType::Float32 => Value::Float32(rng.gen_range(0.0..100.0)),
        ValueType::Float64 => Value::Float64(rng.gen_range(0.0..100.0)),
        _ => return CommandValue::null(resource, value_type),
    };
    CommandValue::new(resource, value_type, value)
        .unwrap_or_else(|_| CommandValue::null(resource, value_type))
}

#[async_trait]
impl ProtocolDriver for SimulatedDriver {
    async fn initialize(&self, ctx: DriverContext) -> DsResult<()> {
        info!(service = %ctx.service_name, async_enabled = ctx.async_values.is_some(), "simulated driver initialised");
        self.record(DriverCall::Initialize {
            async_enabled: ctx.async_values.is_some(),
        });
        *self.async_tx.lock() = ctx.async_values;
        Ok(())
    }

    async fn add_device(
        &self,
        name: &str,
        _protocols: &Protocols,
        admin_state: AdminState,
    ) -> DsResult<()> {
        self.record(DriverCall::AddDevice {
            name: name.to_owned(),
            admin_state,
        });
        self.registers
            .lock()
            .await
            .entry(name.to_owned())
            .or_default();
        Ok(())
    }

    async fn update_device(
        &self,
        name: &str,
        _protocols: &Protocols,
        admin_state: AdminState,
    ) -> DsResult<()> {
        self.record(DriverCall::UpdateDevice {
            name: name.to_owned(),
            admin_state,
        });
        Ok(())
    }

    async fn remove_device(&self, name: &str, _protocols: &Protocols) -> DsResult<()> {
        self.record(DriverCall::RemoveDevice {
            name: name.to_owned(),
        });
        self.registers.lock().await.remove(name);
        Ok(())
    }

    async fn handle_read_commands(
        &self,
        device_name: &str,
        _protocols: &Protocols,
        requests: &[CommandRequest],
    ) -> DsResult<Vec<CommandValue>> {
        self.record(DriverCall::Read {
            device: device_name.to_owned(),
            resources: requests
                .iter()
                .map(|req| req.device_resource_name.clone())
                .collect(),
        });
        let scripted = self
            .scripted
            .lock()
            .get_mut(device_name)
            .and_then(VecDeque::pop_front);
        if let Some(result) = scripted {
            return result;
        }
        let registers = self.registers.lock().await;
        let device = registers.get(device_name);
        let values = requests
            .iter()
            .map(|req| {
                device
                    .and_then(|resources| resources.get(&req.device_resource_name))
                    .cloned()
                    .unwrap_or_else(|| simulated_value(&req.device_resource_name, req.value_type))
            })
            .collect();
        Ok(values)
    }

    async fn handle_write_commands(
        &self,
        device_name: &str,
        _protocols: &Protocols,
        requests: &[CommandRequest],
        values: &[CommandValue],
    ) -> DsResult<()> {
        if requests.len() != values.len() {
            return Err(DsError::server(format!(
                "{} write requests but {} values",
                requests.len(),
                values.len()
            )));
        }
        self.record(DriverCall::Write {
            device: device_name.to_owned(),
            values: values.to_vec(),
        });
        let mut registers = self.registers.lock().await;
        let device = registers.entry(device_name.to_owned()).or_default();
        for value in values {
            debug!(device = %device_name, resource = %value.device_resource_name, value = %value, "simulated write");
            device.insert(value.device_resource_name.clone(), value.clone());
        }
        Ok(())
    }

    async fn stop(&self, force: bool) -> DsResult<()> {
        self.record(DriverCall::Stop { force });
        self.async_tx.lock().take();
        Ok(())
    }

    fn supports_discovery(&self) -> bool {
        !self.discovery_unsupported.load(Ordering::Relaxed)
    }

    async fn discover(&self) -> DsResult<()> {
        self.record(DriverCall::Discover);
        let gate = self.discovery_gate.lock().take();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        Ok(())
    }

    async fn validate_device(&self, device: &Device) -> DsResult<()> {
        if device.profile_name.trim().is_empty() {
            return Err(DsError::contract_invalid(format!(
                "device {} has no profile",
                device.name
            )));
        }
        Ok(())
    }
}
