/* Device manager: owns every configured `Device` for the lifetime of a test
 * session, binds serial handles produced by discovery, and serializes
 * dispatch per device so that concurrent foreground callers never confuse
 * two commands sharing a response opcode. */

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::info;

use crate::dbc::DbcCodec;
use crate::device::Device;
use crate::discovery;
use crate::dispatcher::{self, Action, ActionResult};
use crate::error::{EngineError, Result};

/// Owns every configured device and serializes dispatch to each.
pub struct DeviceManager {
    devices: HashMap<String, Mutex<Device>>,
}

impl DeviceManager {
    /// Build a manager from already-constructed devices, keyed by name.
    /// Devices are not yet attached to a serial handle; call
    /// `discover_and_attach` before issuing any dispatch.
    pub fn new(devices: Vec<Device>) -> Self {
        Self {
            devices: devices
                .into_iter()
                .map(|d| (d.name.clone(), Mutex::new(d)))
                .collect(),
        }
    }

    pub fn device_names(&self) -> impl Iterator<Item = &str> {
        self.devices.keys().map(String::as_str)
    }

    /// Run discovery for `expected_ids` and attach the claimed serial
    /// handles to the matching managed devices, by `Device::id`.
    pub async fn discover_and_attach(&self, expected_ids: &[u8]) -> Result<()> {
        let mut claimed = discovery::discover(expected_ids).await?;
        for (name, slot) in &self.devices {
            let mut device = slot.lock().await;
            if let Some(engine) = claimed.remove(&device.id) {
                info!(device = %name, id = device.id, "attaching serial handle");
                device.attach(engine)?;
            }
        }
        Ok(())
    }

    /// Attach a serial handle to a managed device directly, bypassing
    /// discovery. Used when a handle is already known (a fixed port
    /// mapping) or in tests that stand up a device against a loopback pipe.
    pub async fn attach(&self, device_name: &str, serial: Arc<crate::serial::SerialEngine>) -> Result<()> {
        let slot = self.devices.get(device_name).ok_or_else(|| {
            EngineError::connection(format!("device '{device_name}' is not managed"))
        })?;
        slot.lock().await.attach(serial)
    }

    /// Dispatch `action` against `port_name` on the named device, holding
    /// that device's lock for the whole call so that two foreground callers
    /// can never interleave commands that share a response opcode.
    pub async fn dispatch(
        &self,
        device_name: &str,
        port_name: &str,
        action: Action,
        dbc: &dyn DbcCodec,
    ) -> Result<ActionResult> {
        let slot = self.devices.get(device_name).ok_or_else(|| {
            EngineError::connection(format!("device '{device_name}' is not managed"))
        })?;
        let mut device = slot.lock().await;
        dispatcher::dispatch(&mut device, port_name, action, dbc).await
    }

    /// Stop every attached serial link. Best-effort: a device with no
    /// attached handle (discovery never ran, or never claimed it) is
    /// silently skipped.
    pub async fn stop_all(&self) {
        for slot in self.devices.values() {
            let device = slot.lock().await;
            if let Ok(serial) = device.serial() {
                Arc::clone(serial).stop().await;
            }
        }
    }
}
