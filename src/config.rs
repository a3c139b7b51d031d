/* JSON config loader: test configuration (devices + harness wiring) and
 * per-device configuration files. DTOs are kept separate from the
 * runtime data model and converted by fallible constructors. */

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;

use crate::device::{AdcCalibration, CanBus, DacCalibration, Device, Mux, Port, PortMode, PotCalibration};
use crate::error::Result;
use crate::resolve::{DutCon, HarnessConnection, HilDutCon};

/// Top-level test configuration: `{ "hil_devices": [...], "dut_connections": {...} }`.
#[derive(Debug, Deserialize)]
pub struct TestConfigDto {
    pub hil_devices: Vec<HilDeviceEntryDto>,
    pub dut_connections: HashMap<String, DutConnectionsDto>,
}

#[derive(Debug, Deserialize)]
pub struct HilDeviceEntryDto {
    pub id: u8,
    pub name: String,
    /// Path to this device's own configuration file (see `DeviceConfigDto`).
    pub config: String,
}

#[derive(Debug, Deserialize)]
pub struct DutConnectionsDto {
    pub harness_connections: Vec<HarnessConnectionDto>,
}

#[derive(Debug, Deserialize)]
pub struct HarnessConnectionDto {
    pub dut: DutConDto,
    pub hil: HilDutConDto,
}

#[derive(Debug, Deserialize)]
pub struct DutConDto {
    pub connector: String,
    pub pin: u32,
}

#[derive(Debug, Deserialize)]
pub struct HilDutConDto {
    pub device: String,
    pub port: String,
}

/// Per-device configuration file: ports, muxes, CAN buses, calibration.
#[derive(Debug, Deserialize)]
pub struct DeviceConfigDto {
    pub ports: Vec<PortDto>,
    #[serde(default)]
    pub muxs: Vec<MuxDto>,
    #[serde(default)]
    pub can: Vec<CanBusDto>,
    pub adc_config: AdcConfigDto,
    pub dac_config: Option<DacConfigDto>,
    pub pot_config: Option<PotConfigDto>,
}

#[derive(Debug, Deserialize)]
pub struct PortDto {
    pub name: String,
    pub port: u8,
    pub mode: String,
}

#[derive(Debug, Deserialize)]
pub struct MuxDto {
    pub name: String,
    pub mode: String,
    pub select_ports: Vec<u8>,
    pub port: u8,
}

#[derive(Debug, Deserialize)]
pub struct CanBusDto {
    pub name: String,
    pub bus: u8,
}

#[derive(Debug, Deserialize)]
pub struct AdcConfigDto {
    pub bit_resolution: u8,
    pub adc_reference_v: f64,
    #[serde(rename = "5v_reference_v")]
    pub v5_reference_v: Option<f64>,
    #[serde(rename = "24v_reference_v")]
    pub v24_reference_v: Option<f64>,
}

#[derive(Debug, Deserialize)]
pub struct DacConfigDto {
    pub bit_resolution: u8,
    pub reference_v: f64,
}

#[derive(Debug, Deserialize)]
pub struct PotConfigDto {
    pub bit_resolution: u8,
    pub reference_ohms: f64,
    pub wiper_ohms: f64,
}

/// Parse a test configuration file.
pub fn load_test_config(path: &Path) -> Result<TestConfigDto> {
    let bytes = std::fs::read(path)?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// Parse a per-device configuration file.
pub fn load_device_config(path: &Path) -> Result<DeviceConfigDto> {
    let bytes = std::fs::read(path)?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// Convert a parsed device config into a runtime `Device`.
pub fn build_device(id: u8, name: impl Into<String>, cfg: DeviceConfigDto) -> Result<Device> {
    let ports = cfg
        .ports
        .into_iter()
        .map(|p| -> Result<Port> {
            Ok(Port { name: p.name, pin: p.port, mode: PortMode::from_config_str(&p.mode)? })
        })
        .collect::<Result<Vec<_>>>()?;

    let muxes = cfg
        .muxs
        .into_iter()
        .map(|m| -> Result<Mux> {
            Ok(Mux {
                name: m.name,
                mode: PortMode::from_config_str(&m.mode)?,
                select_pins: m.select_ports,
                data_pin: m.port,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let can_buses = cfg
        .can
        .into_iter()
        .map(|c| CanBus { name: c.name, bus_index: c.bus })
        .collect();

    let adc_cfg = AdcCalibration {
        resolution_bits: cfg.adc_config.bit_resolution,
        ref_v: cfg.adc_config.adc_reference_v,
        v5_ref: cfg.adc_config.v5_reference_v,
        v24_ref: cfg.adc_config.v24_reference_v,
    };
    let dac_cfg = cfg.dac_config.map(|d| DacCalibration {
        resolution_bits: d.bit_resolution,
        ref_v: d.reference_v,
    });
    let pot_cfg = cfg.pot_config.map(|p| PotCalibration {
        resolution_bits: p.bit_resolution,
        ref_ohms: p.reference_ohms,
        wiper_ohms: p.wiper_ohms,
    });

    Ok(Device::new(id, name, ports, muxes, can_buses, adc_cfg, dac_cfg, pot_cfg))
}

/// Convert the `dut_connections` section of a test configuration into the
/// harness table `Resolver` consumes.
pub fn build_harness(
    dut_connections: HashMap<String, DutConnectionsDto>,
) -> HashMap<String, Vec<HarnessConnection>> {
    dut_connections
        .into_iter()
        .map(|(board, dto)| {
            let connections = dto
                .harness_connections
                .into_iter()
                .map(|c| HarnessConnection {
                    dut: DutCon { connector: c.dut.connector, pin: c.dut.pin },
                    hil: HilDutCon { device: c.hil.device, port: c.hil.port },
                })
                .collect();
            (board, connections)
        })
        .collect()
}
