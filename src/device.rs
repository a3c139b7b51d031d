/* Static description of one HIL device: its ports, MUXes, CAN buses, and
 * ADC/DAC/POT calibration, plus the per-bus CAN store. A HIL device's port
 * layout never changes at runtime, so the static description and the
 * runtime CAN state live in one struct. */

use std::collections::HashMap;
use std::sync::Arc;

use crate::can_store::CanStore;
use crate::error::{EngineError, Result};
use crate::serial::SerialEngine;

/// The electrical role of a port; determines which `Action` shapes are
/// legal against it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PortMode {
    Do,
    Di,
    Ao,
    Ai,
    Ai5,
    Ai24,
    Pot,
}

impl PortMode {
    pub fn from_config_str(s: &str) -> Result<Self> {
        match s {
            "DO" => Ok(Self::Do),
            "DI" => Ok(Self::Di),
            "AO" => Ok(Self::Ao),
            "AI" => Ok(Self::Ai),
            "AI5" => Ok(Self::Ai5),
            "AI24" => Ok(Self::Ai24),
            "POT" => Ok(Self::Pot),
            other => Err(EngineError::configuration(format!(
                "unknown port mode '{other}'"
            ))),
        }
    }
}

/// A single named pin on a HIL device.
#[derive(Debug, Clone)]
pub struct Port {
    pub name: String,
    pub pin: u8,
    pub mode: PortMode,
}

/// An analog/digital multiplexer attached to a device. Channel selection is
/// encoded across `select_pins`, LSB first.
#[derive(Debug, Clone)]
pub struct Mux {
    pub name: String,
    pub mode: PortMode,
    pub select_pins: Vec<u8>,
    pub data_pin: u8,
}

impl Mux {
    /// Number of addressable channels: `2^|select_pins|`.
    pub fn channel_count(&self) -> u32 {
        1u32 << self.select_pins.len()
    }
}

/// A numbered CAN bus exposed by a device.
#[derive(Debug, Clone)]
pub struct CanBus {
    pub name: String,
    pub bus_index: u8,
}

/// ADC calibration: raw reading → volts, with optional 5V/24V divider
/// conversions.
#[derive(Debug, Clone, Copy)]
pub struct AdcCalibration {
    pub resolution_bits: u8,
    pub ref_v: f64,
    pub v5_ref: Option<f64>,
    pub v24_ref: Option<f64>,
}

impl AdcCalibration {
    fn full_scale(&self) -> f64 {
        ((1u32 << self.resolution_bits) - 1) as f64
    }

    pub fn raw_to_v(&self, raw: u16) -> f64 {
        raw as f64 / self.full_scale() * self.ref_v
    }

    pub fn raw_to_5v(&self, raw: u16) -> Result<f64> {
        let v5_ref = self
            .v5_ref
            .ok_or_else(|| EngineError::engine("AI5 port used on a device with no 5v_reference_v configured"))?;
        Ok(self.raw_to_v(raw) / v5_ref * 5.0)
    }

    pub fn raw_to_24v(&self, raw: u16) -> Result<f64> {
        let v24_ref = self
            .v24_ref
            .ok_or_else(|| EngineError::engine("AI24 port used on a device with no 24v_reference_v configured"))?;
        Ok(self.raw_to_v(raw) / v24_ref * 24.0)
    }
}

/// DAC calibration: volts → raw, the inverse of `AdcCalibration::raw_to_v`.
#[derive(Debug, Clone, Copy)]
pub struct DacCalibration {
    pub resolution_bits: u8,
    pub ref_v: f64,
}

impl DacCalibration {
    fn full_scale(&self) -> f64 {
        ((1u32 << self.resolution_bits) - 1) as f64
    }

    pub fn v_to_raw(&self, volts: f64) -> Result<u8> {
        if volts < 0.0 || volts > self.ref_v {
            return Err(EngineError::range(format!(
                "{volts} V is outside the DAC's calibrated range [0, {}]",
                self.ref_v
            )));
        }
        Ok((volts / self.ref_v * self.full_scale()).floor() as u8)
    }

    pub fn raw_to_v(&self, raw: u8) -> f64 {
        raw as f64 / self.full_scale() * self.ref_v
    }
}

/// POT calibration: ohms → raw wiper position.
#[derive(Debug, Clone, Copy)]
pub struct PotCalibration {
    pub resolution_bits: u8,
    pub ref_ohms: f64,
    pub wiper_ohms: f64,
}

impl PotCalibration {
    fn full_scale(&self) -> f64 {
        ((1u32 << self.resolution_bits) - 1) as f64
    }

    pub fn ohms_to_raw(&self, ohms: f64) -> Result<u8> {
        let max = self.wiper_ohms + self.ref_ohms;
        if ohms < self.wiper_ohms || ohms > max {
            return Err(EngineError::range(format!(
                "{ohms} ohms is outside the POT's calibrated range [{}, {}]",
                self.wiper_ohms, max
            )));
        }
        Ok((self.full_scale() * (ohms - self.wiper_ohms) / self.ref_ohms).floor() as u8)
    }
}

/// The resolved target of a port-name lookup against a `Device`.
pub enum PortTarget<'a> {
    Port(&'a Port),
    Mux(&'a Mux, u32),
    CanBus(&'a CanBus),
}

/// Static description of one HIL device plus its runtime CAN stores. Does
/// not own a serial handle until `attach` is called by the device manager
/// (C8); at most one handle is ever attached.
pub struct Device {
    pub id: u8,
    pub name: String,
    ports: HashMap<String, Port>,
    muxes: HashMap<String, Mux>,
    can_buses: HashMap<String, CanBus>,
    pub adc_cfg: AdcCalibration,
    pub dac_cfg: Option<DacCalibration>,
    pub pot_cfg: Option<PotCalibration>,
    can_stores: HashMap<u8, CanStore>,
    serial: Option<Arc<SerialEngine>>,
}

impl Device {
    pub fn new(
        id: u8,
        name: impl Into<String>,
        ports: Vec<Port>,
        muxes: Vec<Mux>,
        can_buses: Vec<CanBus>,
        adc_cfg: AdcCalibration,
        dac_cfg: Option<DacCalibration>,
        pot_cfg: Option<PotCalibration>,
    ) -> Self {
        let can_stores = can_buses
            .iter()
            .map(|b| (b.bus_index, CanStore::new()))
            .collect();
        Self {
            id,
            name: name.into(),
            ports: ports.into_iter().map(|p| (p.name.clone(), p)).collect(),
            muxes: muxes.into_iter().map(|m| (m.name.clone(), m)).collect(),
            can_buses: can_buses
                .into_iter()
                .map(|b| (b.name.clone(), b))
                .collect(),
            adc_cfg,
            dac_cfg,
            pot_cfg,
            can_stores,
            serial: None,
        }
    }

    /// Attach the live serial handle to this device. May only be called
    /// once; a second call is an invariant violation.
    pub fn attach(&mut self, serial: Arc<SerialEngine>) -> Result<()> {
        if self.serial.is_some() {
            return Err(EngineError::engine(format!(
                "device '{}' already has a serial handle attached",
                self.name
            )));
        }
        self.serial = Some(serial);
        Ok(())
    }

    pub fn serial(&self) -> Result<&Arc<SerialEngine>> {
        self.serial.as_ref().ok_or_else(|| {
            EngineError::engine(format!(
                "device '{}' has no serial handle attached yet",
                self.name
            ))
        })
    }

    pub fn can_store_mut(&mut self, bus_index: u8) -> &mut CanStore {
        self.can_stores.entry(bus_index).or_default()
    }

    pub fn can_store(&self, bus_index: u8) -> Option<&CanStore> {
        self.can_stores.get(&bus_index)
    }

    /// Resolve a port name to a direct port, a mux channel, or a CAN bus.
    /// A direct port match always wins over an ambiguous mux-channel
    /// parse.
    pub fn resolve_target(&self, port_name: &str) -> Result<PortTarget<'_>> {
        if let Some(port) = self.ports.get(port_name) {
            return Ok(PortTarget::Port(port));
        }
        if let Some(bus) = self.can_buses.get(port_name) {
            return Ok(PortTarget::CanBus(bus));
        }
        if let Some((mux_name, channel)) = Self::split_mux_channel(port_name) {
            if let Some(mux) = self.muxes.get(mux_name) {
                if channel < mux.channel_count() {
                    return Ok(PortTarget::Mux(mux, channel));
                }
            }
        }
        Err(EngineError::engine(format!(
            "device '{}' has no port, mux channel, or CAN bus named '{port_name}'",
            self.name
        )))
    }

    fn split_mux_channel(port_name: &str) -> Option<(&str, u32)> {
        let (prefix, suffix) = port_name.rsplit_once('_')?;
        let channel: u32 = suffix.parse().ok()?;
        Some((prefix, channel))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_device() -> Device {
        Device::new(
            1,
            "X",
            vec![
                Port { name: "DO1".into(), pin: 1, mode: PortMode::Do },
                Port { name: "DI1".into(), pin: 2, mode: PortMode::Di },
            ],
            vec![Mux {
                name: "DMUX".into(),
                mode: PortMode::Di,
                select_pins: vec![5, 6, 7],
                data_pin: 8,
            }],
            vec![CanBus { name: "CAN1".into(), bus_index: 1 }],
            AdcCalibration { resolution_bits: 12, ref_v: 3.3, v5_ref: None, v24_ref: None },
            None,
            None,
        )
    }

    #[test]
    fn direct_port_resolves_over_ambiguous_mux_parse() {
        let device = sample_device();
        match device.resolve_target("DO1").unwrap() {
            PortTarget::Port(p) => assert_eq!(p.pin, 1),
            _ => panic!("expected direct port"),
        }
    }

    #[test]
    fn mux_channel_name_resolves() {
        let device = sample_device();
        match device.resolve_target("DMUX_5").unwrap() {
            PortTarget::Mux(mux, channel) => {
                assert_eq!(mux.name, "DMUX");
                assert_eq!(channel, 5);
            }
            _ => panic!("expected mux channel"),
        }
    }

    #[test]
    fn mux_channel_out_of_range_fails() {
        let device = sample_device();
        assert!(device.resolve_target("DMUX_8").is_err());
    }

    #[test]
    fn can_bus_resolves_by_name() {
        let device = sample_device();
        match device.resolve_target("CAN1").unwrap() {
            PortTarget::CanBus(bus) => assert_eq!(bus.bus_index, 1),
            _ => panic!("expected CAN bus"),
        }
    }

    #[test]
    fn unknown_name_fails() {
        let device = sample_device();
        assert!(device.resolve_target("NOPE").is_err());
    }

    #[test]
    fn adc_conversion_matches_scenario_s2() {
        let cal = AdcCalibration { resolution_bits: 12, ref_v: 3.3, v5_ref: None, v24_ref: None };
        let v = cal.raw_to_v(2048);
        assert!((v - 1.6503_6630_03).abs() < 1e-6);
    }

    #[test]
    fn dac_round_trip_within_one_lsb() {
        let cal = DacCalibration { resolution_bits: 8, ref_v: 5.0 };
        let lsb = cal.ref_v / 255.0;
        let mut v = 0.0;
        while v <= cal.ref_v {
            let raw = cal.v_to_raw(v).unwrap();
            let back = cal.raw_to_v(raw);
            assert!((back - v).abs() <= lsb + 1e-9);
            v += 0.137;
        }
    }

    #[test]
    fn dac_out_of_range_is_range_error() {
        let cal = DacCalibration { resolution_bits: 8, ref_v: 5.0 };
        assert!(matches!(cal.v_to_raw(-0.1), Err(EngineError::Range(_))));
        assert!(matches!(cal.v_to_raw(5.1), Err(EngineError::Range(_))));
    }

    #[test]
    fn pot_ohms_to_raw_monotonic() {
        let cal = PotCalibration { resolution_bits: 8, ref_ohms: 1000.0, wiper_ohms: 50.0 };
        let mut prev = None;
        let mut o = cal.wiper_ohms;
        while o <= cal.wiper_ohms + cal.ref_ohms {
            let raw = cal.ohms_to_raw(o).unwrap();
            if let Some(p) = prev {
                assert!(raw >= p);
            }
            prev = Some(raw);
            o += 17.0;
        }
    }

    #[test]
    fn pot_out_of_range_is_range_error() {
        let cal = PotCalibration { resolution_bits: 8, ref_ohms: 1000.0, wiper_ohms: 50.0 };
        assert!(cal.ohms_to_raw(10.0).is_err());
        assert!(cal.ohms_to_raw(2000.0).is_err());
    }
}
