/* Action dispatcher: resolves a tagged `Action` against a resolved
 * port/mux/bus on a device into a sequence of wire calls. */

use std::collections::HashMap;

use tracing::{debug, warn};

use crate::can_store::{CanFilter, CanMessage, CanRef};
use crate::dbc::DbcCodec;
use crate::device::{Device, Mux, PortMode, PortTarget};
use crate::error::{EngineError, Result};
use crate::protocol::{
    encode_hiz_dac, encode_hiz_gpio, encode_read_adc, encode_read_gpio, encode_send_can,
    encode_write_dac, encode_write_gpio, encode_write_pot, Opcode,
};
use crate::serial::DEFAULT_RESPONSE_TIMEOUT;

/// A tagged action to perform against a resolved device port.
#[derive(Debug, Clone)]
pub enum Action {
    SetDo(bool),
    HiZDo,
    GetDi,
    SetAo(f64),
    HiZAo,
    GetAi,
    SetPot(f64),
    SendCan {
        signal: CanRef,
        fields: HashMap<String, f64>,
    },
    GetLastCan {
        filter: CanFilter,
    },
    GetAllCan {
        filter: CanFilter,
    },
    ClearCan {
        filter: CanFilter,
    },
}

/// The result of dispatching one `Action`.
#[derive(Debug, Clone, PartialEq)]
pub enum ActionResult {
    Unit,
    Bool(bool),
    Volts(f64),
    LastCan(Option<CanMessage>),
    AllCan(Vec<CanMessage>),
}

impl ActionResult {
    pub fn into_bool(self) -> Result<bool> {
        match self {
            Self::Bool(b) => Ok(b),
            _ => Err(EngineError::engine("action did not produce a boolean result")),
        }
    }

    pub fn into_volts(self) -> Result<f64> {
        match self {
            Self::Volts(v) => Ok(v),
            _ => Err(EngineError::engine("action did not produce a voltage result")),
        }
    }
}

async fn program_mux(device: &Device, mux: &Mux, channel: u32) -> Result<()> {
    let serial = device.serial()?.clone();
    for (i, &pin) in mux.select_pins.iter().enumerate() {
        let level = (channel >> i) & 1 == 1;
        serial.write(&encode_write_gpio(pin, level)).await?;
    }
    Ok(())
}

/// Resolve any pending inbound `RECV_CAN` frames for `bus_index` against
/// the DBC database and append them to the device's per-bus store. Called
/// before every CAN action so readers always see the freshest state.
///
/// A frame that fails to decode (unknown id, malformed payload) is logged
/// and skipped rather than aborting the batch — the frames have already
/// been drained from the parser's queue, so bailing out on one bad frame
/// would silently lose every other already-drained frame behind it.
async fn drain_can_into_store(device: &mut Device, bus_index: u8, dbc: &dyn DbcCodec) -> Result<()> {
    let raw_frames = device.serial()?.drain_can(bus_index);
    let store = device.can_store_mut(bus_index);
    for frame in raw_frames {
        match dbc.decode(frame.id, &frame.data) {
            Ok(fields) => {
                let signal = dbc.signal_ref_for_id(frame.id);
                store.push(CanMessage { signal, fields });
            }
            Err(err) => {
                warn!(id = frame.id, %err, "failed to decode CAN frame, skipping");
            }
        }
    }
    Ok(())
}

/// Dispatch `action` against `port_name` on `device`, issuing whatever wire
/// calls the action and resolved target require.
pub async fn dispatch(
    device: &mut Device,
    port_name: &str,
    action: Action,
    dbc: &dyn DbcCodec,
) -> Result<ActionResult> {
    let target = device.resolve_target(port_name)?;

    match (&action, &target) {
        (Action::SetDo(level), PortTarget::Port(port)) if port.mode == PortMode::Do => {
            let serial = device.serial()?.clone();
            serial.write(&encode_write_gpio(port.pin, *level)).await?;
            Ok(ActionResult::Unit)
        }
        (Action::SetDo(level), PortTarget::Mux(mux, channel)) if mux.mode == PortMode::Do => {
            let (mux, channel, data_pin) = (mux.clone(), *channel, mux.data_pin);
            program_mux(device, &mux, channel).await?;
            let serial = device.serial()?.clone();
            serial.write(&encode_write_gpio(data_pin, *level)).await?;
            Ok(ActionResult::Unit)
        }
        (Action::HiZDo, PortTarget::Port(port)) if port.mode == PortMode::Do => {
            let serial = device.serial()?.clone();
            serial.write(&encode_hiz_gpio(port.pin)).await?;
            Ok(ActionResult::Unit)
        }
        (Action::HiZDo, PortTarget::Mux(mux, channel)) if mux.mode == PortMode::Do => {
            let (mux, channel, data_pin) = (mux.clone(), *channel, mux.data_pin);
            program_mux(device, &mux, channel).await?;
            let serial = device.serial()?.clone();
            serial.write(&encode_hiz_gpio(data_pin)).await?;
            Ok(ActionResult::Unit)
        }
        (Action::GetDi, PortTarget::Port(port)) if port.mode == PortMode::Di => {
            let serial = device.serial()?.clone();
            serial.write(&encode_read_gpio(port.pin)).await?;
            let resp = serial
                .await_response(Opcode::ReadGpio.as_byte(), DEFAULT_RESPONSE_TIMEOUT)
                .await?;
            Ok(ActionResult::Bool(read_single_byte(&resp)? != 0))
        }
        (Action::GetDi, PortTarget::Mux(mux, channel)) if mux.mode == PortMode::Di => {
            let (mux, channel, data_pin) = (mux.clone(), *channel, mux.data_pin);
            program_mux(device, &mux, channel).await?;
            let serial = device.serial()?.clone();
            serial.write(&encode_read_gpio(data_pin)).await?;
            let resp = serial
                .await_response(Opcode::ReadGpio.as_byte(), DEFAULT_RESPONSE_TIMEOUT)
                .await?;
            Ok(ActionResult::Bool(read_single_byte(&resp)? != 0))
        }
        (Action::SetAo(volts), PortTarget::Port(port)) if port.mode == PortMode::Ao => {
            let raw = device
                .dac_cfg
                .ok_or_else(|| EngineError::engine("device has no dac_cfg configured"))?
                .v_to_raw(*volts)?;
            let serial = device.serial()?.clone();
            serial.write(&encode_write_dac(port.pin, raw)).await?;
            Ok(ActionResult::Unit)
        }
        (Action::HiZAo, PortTarget::Port(port)) if port.mode == PortMode::Ao => {
            let serial = device.serial()?.clone();
            serial.write(&encode_hiz_dac(port.pin)).await?;
            Ok(ActionResult::Unit)
        }
        (Action::GetAi, PortTarget::Port(port))
            if matches!(port.mode, PortMode::Ai | PortMode::Ai5 | PortMode::Ai24) =>
        {
            let volts = read_ai(device, port.pin, port.mode).await?;
            Ok(ActionResult::Volts(volts))
        }
        (Action::GetAi, PortTarget::Mux(mux, channel))
            if matches!(mux.mode, PortMode::Ai | PortMode::Ai5 | PortMode::Ai24) =>
        {
            let (mux_clone, channel, data_pin, mode) = (mux.clone(), *channel, mux.data_pin, mux.mode);
            program_mux(device, &mux_clone, channel).await?;
            let volts = read_ai(device, data_pin, mode).await?;
            Ok(ActionResult::Volts(volts))
        }
        (Action::SetPot(ohms), PortTarget::Port(port)) if port.mode == PortMode::Pot => {
            let raw = device
                .pot_cfg
                .ok_or_else(|| EngineError::engine("device has no pot_cfg configured"))?
                .ohms_to_raw(*ohms)?;
            let serial = device.serial()?.clone();
            serial.write(&encode_write_pot(port.pin, raw)).await?;
            Ok(ActionResult::Unit)
        }
        (Action::SendCan { signal, fields }, PortTarget::CanBus(bus)) => {
            let bus_index = bus.bus_index;
            drain_can_into_store(device, bus_index, dbc).await?;
            let id = dbc.resolve_id(signal)?;
            let payload = dbc.encode(signal, fields)?;
            let serial = device.serial()?.clone();
            debug!(bus = bus_index, id, "sending CAN frame");
            serial.write(&encode_send_can(bus_index, id, &payload)).await?;
            Ok(ActionResult::Unit)
        }
        (Action::GetLastCan { filter }, PortTarget::CanBus(bus)) => {
            let bus_index = bus.bus_index;
            drain_can_into_store(device, bus_index, dbc).await?;
            let msg = device.can_store(bus_index).and_then(|s| s.last(filter));
            Ok(ActionResult::LastCan(msg))
        }
        (Action::GetAllCan { filter }, PortTarget::CanBus(bus)) => {
            let bus_index = bus.bus_index;
            drain_can_into_store(device, bus_index, dbc).await?;
            let msgs = device
                .can_store(bus_index)
                .map(|s| s.all(filter))
                .unwrap_or_default();
            Ok(ActionResult::AllCan(msgs))
        }
        (Action::ClearCan { filter }, PortTarget::CanBus(bus)) => {
            let bus_index = bus.bus_index;
            drain_can_into_store(device, bus_index, dbc).await?;
            device.can_store_mut(bus_index).clear(filter);
            Ok(ActionResult::Unit)
        }
        _ => Err(EngineError::engine(format!(
            "action not supported on port '{port_name}'"
        ))),
    }
}

fn read_single_byte(resp: &[u8]) -> Result<u8> {
    resp.first()
        .copied()
        .ok_or_else(|| EngineError::engine("expected a 1-byte response, got an empty one"))
}

async fn read_ai(device: &mut Device, pin: u8, mode: PortMode) -> Result<f64> {
    let serial = device.serial()?.clone();
    serial.write(&encode_read_adc(pin)).await?;
    let resp = serial
        .await_response(Opcode::ReadAdc.as_byte(), DEFAULT_RESPONSE_TIMEOUT)
        .await?;
    if resp.len() != 2 {
        return Err(EngineError::engine(format!(
            "expected a 2-byte ADC response, got {} bytes",
            resp.len()
        )));
    }
    let raw = u16::from_be_bytes([resp[0], resp[1]]);
    match mode {
        PortMode::Ai => Ok(device.adc_cfg.raw_to_v(raw)),
        PortMode::Ai5 => device.adc_cfg.raw_to_5v(raw),
        PortMode::Ai24 => device.adc_cfg.raw_to_24v(raw),
        _ => unreachable!("read_ai is only called for AI/AI5/AI24"),
    }
}
