/* Harness & net-map resolver: two-layer translation of `(board, net)` into
 * `(hil_device, hil_port)`. */

use std::collections::HashMap;

use crate::error::{EngineError, Result};
use crate::netmap::NetMapRow;

/// A DUT-side connector/pin pair, used only as a harness lookup key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DutCon {
    pub connector: String,
    pub pin: u32,
}

/// A resolved HIL-side address: a named device and a port/mux-channel/bus
/// name on it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HilDutCon {
    pub device: String,
    pub port: String,
}

/// One entry of a board's harness wiring: a DUT connector/pin wired to a
/// HIL device port.
#[derive(Debug, Clone)]
pub struct HarnessConnection {
    pub dut: DutCon,
    pub hil: HilDutCon,
}

/// Resolves `(board, net)` pairs against harness wiring and an optional
/// net-map. Construction is infallible; `resolve` is a pure function of
/// the tables it was built from.
pub struct Resolver {
    device_names: std::collections::HashSet<String>,
    harness: HashMap<String, Vec<HarnessConnection>>,
    net_map: HashMap<(String, String), NetMapRow>,
}

impl Resolver {
    pub fn new(
        device_names: std::collections::HashSet<String>,
        harness: HashMap<String, Vec<HarnessConnection>>,
        net_map: HashMap<(String, String), NetMapRow>,
    ) -> Self {
        Self { device_names, harness, net_map }
    }

    /// Resolve `(board, net)` into a concrete HIL device port.
    ///
    /// A direct match (board names a managed device) and a net-map+harness
    /// match are each attempted independently; exactly one must succeed.
    pub fn resolve(&self, board: &str, net: &str) -> Result<HilDutCon> {
        let direct = self
            .device_names
            .contains(board)
            .then(|| HilDutCon { device: board.to_string(), port: net.to_string() });

        let mapped = self.resolve_via_net_map(board, net)?;

        match (direct, mapped) {
            (Some(_), Some(_)) => Err(EngineError::connection(format!(
                "'{board}'/'{net}' resolves both directly and via the net-map; ambiguous"
            ))),
            (Some(con), None) => Ok(con),
            (None, Some(con)) => Ok(con),
            (None, None) => Err(EngineError::connection(format!(
                "no harness or net-map entry resolves '{board}'/'{net}'"
            ))),
        }
    }

    fn resolve_via_net_map(&self, board: &str, net: &str) -> Result<Option<HilDutCon>> {
        let Some(row) = self.net_map.get(&(board.to_string(), net.to_string())) else {
            return Ok(None);
        };

        let dut = DutCon { connector: row.component.clone(), pin: row.designator };
        let connections = match self.harness.get(board) {
            Some(c) => c,
            None => return Ok(None),
        };

        Ok(connections
            .iter()
            .find(|c| c.dut == dut)
            .map(|c| c.hil.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn netmap_row(board: &str, net: &str, connector: &str, pin: u32) -> ((String, String), NetMapRow) {
        (
            (board.to_string(), net.to_string()),
            NetMapRow {
                board: board.to_string(),
                net: net.to_string(),
                component: connector.to_string(),
                designator: pin,
                connector_name: None,
            },
        )
    }

    #[test]
    fn direct_device_match_resolves() {
        let mut device_names = HashSet::new();
        device_names.insert("HIL1".to_string());
        let resolver = Resolver::new(device_names, HashMap::new(), HashMap::new());
        let con = resolver.resolve("HIL1", "DO1").unwrap();
        assert_eq!(con, HilDutCon { device: "HIL1".into(), port: "DO1".into() });
    }

    #[test]
    fn net_map_and_harness_match_resolves() {
        let net_map = HashMap::from([netmap_row("BOARD_A", "NET_X", "J1", 3)]);
        let harness = HashMap::from([(
            "BOARD_A".to_string(),
            vec![HarnessConnection {
                dut: DutCon { connector: "J1".into(), pin: 3 },
                hil: HilDutCon { device: "HIL1".into(), port: "DO1".into() },
            }],
        )]);
        let resolver = Resolver::new(HashSet::new(), harness, net_map);
        let con = resolver.resolve("BOARD_A", "NET_X").unwrap();
        assert_eq!(con, HilDutCon { device: "HIL1".into(), port: "DO1".into() });
    }

    #[test]
    fn neither_match_is_connection_error() {
        let resolver = Resolver::new(HashSet::new(), HashMap::new(), HashMap::new());
        let err = resolver.resolve("BOARD_A", "NET_X").unwrap_err();
        assert!(matches!(err, EngineError::Connection(_)));
    }

    #[test]
    fn both_direct_and_mapped_match_is_ambiguous() {
        let mut device_names = HashSet::new();
        device_names.insert("BOARD_A".to_string());
        let net_map = HashMap::from([netmap_row("BOARD_A", "NET_X", "J1", 3)]);
        let harness = HashMap::from([(
            "BOARD_A".to_string(),
            vec![HarnessConnection {
                dut: DutCon { connector: "J1".into(), pin: 3 },
                hil: HilDutCon { device: "HIL1".into(), port: "DO1".into() },
            }],
        )]);
        let resolver = Resolver::new(device_names, harness, net_map);
        let err = resolver.resolve("BOARD_A", "NET_X").unwrap_err();
        assert!(matches!(err, EngineError::Connection(_)));
    }

    #[test]
    fn net_map_entry_without_matching_harness_connection_fails() {
        let net_map = HashMap::from([netmap_row("BOARD_A", "NET_X", "J1", 3)]);
        let resolver = Resolver::new(HashSet::new(), HashMap::new(), net_map);
        assert!(resolver.resolve("BOARD_A", "NET_X").is_err());
    }
}
