/* Device discovery: enumerate candidate USB-serial ports, probe each for an
 * ID byte behind a sync preamble, and claim the ports matching an expected
 * id list. */

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::Instant;
use tokio_serial::{DataBits, Parity, SerialPort, SerialPortType, StopBits};
use tracing::{debug, info, warn};

use crate::error::{EngineError, Result};
use crate::protocol::encode_read_id;
use crate::serial::SerialEngine;

const BAUD_RATE: u32 = 115_200;
const BYTE_READ_TIMEOUT: Duration = Duration::from_millis(100);
const DTR_SETTLE: Duration = Duration::from_secs(1);
const MAX_ATTEMPTS: u8 = 5;
const ATTEMPT_INTERVAL: Duration = Duration::from_secs(1);
const ATTEMPT_DEADLINE: Duration = Duration::from_secs(1);
const SYNC_PREAMBLE: [u8; 4] = [0xDE, 0xAD, 0xBE, 0xEF];
const USB_SERIAL_MARKER: &str = "USB Serial";

/// Probe every candidate port and claim the ones whose `READ_ID` reply
/// matches an id in `expected_ids`. Fails if any expected id goes unclaimed
/// once every candidate has been exhausted.
pub async fn discover(expected_ids: &[u8]) -> Result<HashMap<u8, std::sync::Arc<SerialEngine>>> {
    let mut remaining: HashSet<u8> = expected_ids.iter().copied().collect();
    let mut claimed = HashMap::new();

    for path in candidate_ports()? {
        if remaining.is_empty() {
            break;
        }

        match probe_port(&path).await {
            Ok(Some((id, leftover, stream))) if remaining.remove(&id) => {
                info!(port = %path, id, "claimed HIL device");
                let engine = SerialEngine::spawn(format!("id={id}"), Box::new(stream), &leftover);
                claimed.insert(id, engine);
            }
            Ok(Some((id, _, _))) => {
                debug!(port = %path, id, "port answered but id is unclaimed or unexpected, closing");
            }
            Ok(None) => {
                debug!(port = %path, "no response to discovery within budget, closing");
            }
            Err(err) => {
                warn!(port = %path, %err, "error probing port, closing");
            }
        }
    }

    if !remaining.is_empty() {
        let mut missing: Vec<u8> = remaining.into_iter().collect();
        missing.sort_unstable();
        return Err(EngineError::serial(format!(
            "devices with ids {missing:?} were not found among candidate serial ports"
        )));
    }

    Ok(claimed)
}

fn candidate_ports() -> Result<Vec<String>> {
    let ports = serialport::available_ports().map_err(|err| EngineError::serial(err.to_string()))?;
    Ok(ports
        .into_iter()
        .filter(|p| match &p.port_type {
            SerialPortType::UsbPort(info) => info
                .product
                .as_deref()
                .unwrap_or("")
                .contains(USB_SERIAL_MARKER),
            _ => false,
        })
        .map(|p| p.port_name)
        .collect())
}

/// Open, reset, and probe one candidate port for a `READ_ID` reply. On
/// success, returns the matched id, any bytes read past the sync preamble
/// (which must be replayed into the engine's parser), and the still-open
/// stream ready to be handed to `SerialEngine::spawn`.
async fn probe_port(path: &str) -> Result<Option<(u8, Vec<u8>, tokio_serial::SerialStream)>> {
    let builder = tokio_serial::new(path, BAUD_RATE)
        .data_bits(DataBits::Eight)
        .parity(Parity::None)
        .stop_bits(StopBits::One)
        .timeout(BYTE_READ_TIMEOUT);
    let mut stream = tokio_serial::SerialStream::open(&builder)?;

    stream.write_data_terminal_ready(false)?;
    tokio::time::sleep(DTR_SETTLE).await;
    drain(&mut stream).await;
    stream.write_data_terminal_ready(true)?;

    let mut buf: Vec<u8> = Vec::new();
    for attempt in 1..=MAX_ATTEMPTS {
        stream.write_all(&encode_read_id()).await?;

        let deadline = Instant::now() + ATTEMPT_DEADLINE;
        loop {
            if let Some((id, leftover)) = find_id_reply(&buf) {
                return Ok(Some((id, leftover, stream)));
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }

            let mut byte = [0u8; 1];
            match tokio::time::timeout(remaining.min(BYTE_READ_TIMEOUT), stream.read(&mut byte)).await {
                Ok(Ok(0)) => break,
                Ok(Ok(_)) => buf.push(byte[0]),
                Ok(Err(_)) => break,
                Err(_elapsed) => continue,
            }
        }

        if attempt < MAX_ATTEMPTS {
            tokio::time::sleep(ATTEMPT_INTERVAL).await;
        }
    }

    Ok(None)
}

/// Locate `DE AD BE EF [0, id]` anywhere in `buf` (boards may emit boot
/// garbage before the reply). Returns the id and any bytes that followed
/// it, which must not be discarded.
fn find_id_reply(buf: &[u8]) -> Option<(u8, Vec<u8>)> {
    for start in 0..buf.len() {
        if buf[start..].starts_with(&SYNC_PREAMBLE) {
            let after_preamble = start + SYNC_PREAMBLE.len();
            if buf.len() >= after_preamble + 2 && buf[after_preamble] == 0 {
                let id = buf[after_preamble + 1];
                let leftover = buf[after_preamble + 2..].to_vec();
                return Some((id, leftover));
            }
        }
    }
    None
}

async fn drain(stream: &mut tokio_serial::SerialStream) {
    let mut byte = [0u8; 1];
    loop {
        match tokio::time::timeout(Duration::from_millis(50), stream.read(&mut byte)).await {
            Ok(Ok(n)) if n > 0 => continue,
            _ => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn find_id_reply_locates_preamble_amid_boot_garbage() {
        let mut buf = vec![0x01, 0x02, 0x03];
        buf.extend_from_slice(&SYNC_PREAMBLE);
        buf.extend_from_slice(&[0, 7, 0xAA]);
        let (id, leftover) = find_id_reply(&buf).unwrap();
        assert_eq!(id, 7);
        assert_eq!(leftover, vec![0xAA]);
    }

    #[test]
    fn find_id_reply_returns_none_when_incomplete() {
        let mut buf = SYNC_PREAMBLE.to_vec();
        buf.push(0);
        assert!(find_id_reply(&buf).is_none());
    }
}
