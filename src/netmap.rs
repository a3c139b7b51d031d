/* Net-map loader: CSV export mapping a DUT board's schematic nets to
 * connector/pin locations. */

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;

use crate::error::{EngineError, Result};

/// One row of a net-map CSV file. Header: `Board,Net,Component,Designator[,Connector Name]`.
#[derive(Debug, Clone, Deserialize)]
pub struct NetMapRow {
    #[serde(rename = "Board")]
    pub board: String,
    #[serde(rename = "Net")]
    pub net: String,
    #[serde(rename = "Component")]
    pub component: String,
    #[serde(rename = "Designator")]
    pub designator: u32,
    #[serde(rename = "Connector Name")]
    pub connector_name: Option<String>,
}

/// Load a net-map CSV file into a `(board, net) -> row` table. Fails with
/// `EngineError::Configuration` on a duplicate `(Board, Net)` pair.
pub fn load_net_map(path: &Path) -> Result<HashMap<(String, String), NetMapRow>> {
    let mut reader = csv::Reader::from_path(path)?;
    let mut table = HashMap::new();

    for record in reader.deserialize() {
        let row: NetMapRow = record?;
        let key = (row.board.clone(), row.net.clone());
        if table.insert(key, row).is_some() {
            return Err(EngineError::configuration(format!(
                "duplicate net-map entry for board/net in {}",
                path.display()
            )));
        }
    }

    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_csv(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn loads_rows_keyed_by_board_and_net() {
        let file = write_csv(
            "Board,Net,Component,Designator,Connector Name\nBOARD_A,NET_X,J1,3,Power\n",
        );
        let table = load_net_map(file.path()).unwrap();
        let row = &table[&("BOARD_A".to_string(), "NET_X".to_string())];
        assert_eq!(row.component, "J1");
        assert_eq!(row.designator, 3);
        assert_eq!(row.connector_name.as_deref(), Some("Power"));
    }

    #[test]
    fn duplicate_board_net_pair_is_configuration_error() {
        let file = write_csv(
            "Board,Net,Component,Designator\nBOARD_A,NET_X,J1,3\nBOARD_A,NET_X,J2,4\n",
        );
        let err = load_net_map(file.path()).unwrap_err();
        assert!(matches!(err, EngineError::Configuration(_)));
    }

    #[test]
    fn optional_connector_name_may_be_absent() {
        let file = write_csv("Board,Net,Component,Designator\nBOARD_A,NET_X,J1,3\n");
        let table = load_net_map(file.path()).unwrap();
        assert!(table[&("BOARD_A".to_string(), "NET_X".to_string())]
            .connector_name
            .is_none());
    }
}
