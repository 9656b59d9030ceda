//! Distinct field-values export (spec.md §6), grounded on
//! `zigator/analysis/field_values.py`'s fixed `PACKET_TYPES` table and the
//! `write_tsv` row shape from `zigator/fs.py`.
//!
//! Two packet types from the source table (`zdp_activeepreq*`,
//! `zdp_deviceannce*`) matched on a human-readable cluster label
//! (`"0x0005: Active_EP_req"`); this crate only decodes `aps_cluster_id` as
//! a raw hex value (cluster catalogs are the ZCL-payload-interpretation
//! Non-goal), so the conditions below match on the hex value alone.

use std::fs;
use std::io::Write as _;
use std::path::Path;

use log::info;

use crate::error::Result;
use crate::frame::PACKET_COLUMNS;
use crate::store::Store;

/// Columns excluded from the export: high-cardinality or purely incidental
/// fields that would otherwise dominate every output file (mirrors
/// `IGNORED_COLUMNS` in the source).
const IGNORED_COLUMNS: &[&str] = &[
    "pkt_num",
    "pkt_time",
    "phy_payload",
    "mac_show",
    "mac_fcs",
    "mac_seqnum",
    "nwk_seqnum",
    "nwk_aux_framecounter",
    "nwk_aux_decpayload",
    "nwk_aux_decshow",
    "aps_counter",
    "aps_aux_framecounter",
    "aps_aux_decpayload",
    "aps_aux_decshow",
    "aps_tunnel_counter",
    "zdp_seqnum",
    "zcl_seqnum",
];

type Condition = (&'static str, Option<&'static str>);

struct PacketType {
    filename: &'static str,
    conditions: &'static [Condition],
}

macro_rules! packet_type {
    ($filename:literal, [$(($col:literal, $val:expr)),+ $(,)?]) => {
        PacketType { filename: $filename, conditions: &[$(($col, $val)),+] }
    };
}

const PACKET_TYPES: &[PacketType] = &[
    packet_type!("mac_acknowledgment.tsv", [("error_msg", None), ("mac_frametype", Some("0b010: MAC Acknowledgment"))]),
    packet_type!("mac_beacon.tsv", [("error_msg", None), ("mac_frametype", Some("0b000: MAC Beacon"))]),
    packet_type!("mac_assocreq.tsv", [("error_msg", None), ("mac_cmd_id", Some("0x01: MAC Association Request"))]),
    packet_type!("mac_assocrsp.tsv", [("error_msg", None), ("mac_cmd_id", Some("0x02: MAC Association Response"))]),
    packet_type!("mac_disassoc.tsv", [("error_msg", None), ("mac_cmd_id", Some("0x03: MAC Disassociation Notification"))]),
    packet_type!("mac_datareq.tsv", [("error_msg", None), ("mac_cmd_id", Some("0x04: MAC Data Request"))]),
    packet_type!("mac_conflictnotif.tsv", [("error_msg", None), ("mac_cmd_id", Some("0x05: MAC PAN ID Conflict Notification"))]),
    packet_type!("mac_orphannotif.tsv", [("error_msg", None), ("mac_cmd_id", Some("0x06: MAC Orphan Notification"))]),
    packet_type!("mac_beaconreq.tsv", [("error_msg", None), ("mac_cmd_id", Some("0x07: MAC Beacon Request"))]),
    packet_type!("mac_realign.tsv", [("error_msg", None), ("mac_cmd_id", Some("0x08: MAC Coordinator Realignment"))]),
    packet_type!("mac_gtsreq.tsv", [("error_msg", None), ("mac_cmd_id", Some("0x09: MAC GTS Request"))]),
    packet_type!("nwk_routerequest.tsv", [("error_msg", None), ("nwk_cmd_id", Some("0x01: NWK Route Request"))]),
    packet_type!("nwk_routereply.tsv", [("error_msg", None), ("nwk_cmd_id", Some("0x02: NWK Route Reply"))]),
    packet_type!("nwk_networkstatus.tsv", [("error_msg", None), ("nwk_cmd_id", Some("0x03: NWK Network Status"))]),
    packet_type!("nwk_leave.tsv", [("error_msg", None), ("nwk_cmd_id", Some("0x04: NWK Leave"))]),
    packet_type!("nwk_routerecord.tsv", [("error_msg", None), ("nwk_cmd_id", Some("0x05: NWK Route Record"))]),
    packet_type!("nwk_rejoinreq.tsv", [("error_msg", None), ("nwk_cmd_id", Some("0x06: NWK Rejoin Request"))]),
    packet_type!("nwk_rejoinrsp.tsv", [("error_msg", None), ("nwk_cmd_id", Some("0x07: NWK Rejoin Response"))]),
    packet_type!("nwk_linkstatus.tsv", [("error_msg", None), ("nwk_cmd_id", Some("0x08: NWK Link Status"))]),
    packet_type!("nwk_networkreport.tsv", [("error_msg", None), ("nwk_cmd_id", Some("0x09: NWK Network Report"))]),
    packet_type!("nwk_networkupdate.tsv", [("error_msg", None), ("nwk_cmd_id", Some("0x0a: NWK Network Update"))]),
    packet_type!("nwk_edtimeoutreq.tsv", [("error_msg", None), ("nwk_cmd_id", Some("0x0b: NWK End Device Timeout Request"))]),
    packet_type!("nwk_edtimeoutrsp.tsv", [("error_msg", None), ("nwk_cmd_id", Some("0x0c: NWK End Device Timeout Response"))]),
    packet_type!("aps_acknowledgment.tsv", [("error_msg", None), ("aps_frametype", Some("0b10: APS Acknowledgment"))]),
    packet_type!("aps_transportkey.tsv", [("error_msg", None), ("aps_cmd_id", Some("0x05: APS Transport Key"))]),
    packet_type!("aps_updatedevice.tsv", [("error_msg", None), ("aps_cmd_id", Some("0x06: APS Update Device"))]),
    packet_type!("aps_removedevice.tsv", [("error_msg", None), ("aps_cmd_id", Some("0x07: APS Remove Device"))]),
    packet_type!("aps_requestkey.tsv", [("error_msg", None), ("aps_cmd_id", Some("0x08: APS Request Key"))]),
    packet_type!("aps_switchkey.tsv", [("error_msg", None), ("aps_cmd_id", Some("0x09: APS Switch Key"))]),
    packet_type!("aps_tunnel.tsv", [("error_msg", None), ("aps_cmd_id", Some("0x0e: APS Tunnel"))]),
    packet_type!("aps_verifykey.tsv", [("error_msg", None), ("aps_cmd_id", Some("0x0f: APS Verify Key"))]),
    packet_type!("aps_confirmkey.tsv", [("error_msg", None), ("aps_cmd_id", Some("0x10: APS Confirm Key"))]),
    packet_type!("zdp_activeepreq.tsv", [
        ("error_msg", None),
        ("aps_frametype", Some("0b00: APS Data")),
        ("aps_profile_id", Some("0x0000")),
        ("aps_cluster_id", Some("0x0005")),
    ]),
    packet_type!("zdp_activeepreq_specialcase.tsv", [
        ("error_msg", None),
        ("nwk_srcroute", Some("0")),
        ("aps_frametype", Some("0b00: APS Data")),
        ("aps_profile_id", Some("0x0000")),
        ("aps_cluster_id", Some("0x0005")),
        ("der_same_macnwksrc", Some("Same MAC/NWK Src: true")),
    ]),
    packet_type!("zdp_deviceannce.tsv", [
        ("error_msg", None),
        ("aps_frametype", Some("0b00: APS Data")),
        ("aps_profile_id", Some("0x0000")),
        ("aps_cluster_id", Some("0x0013")),
    ]),
    packet_type!("zdp_deviceannce_specialcase.tsv", [
        ("error_msg", None),
        ("mac_dstshortaddr", Some("0xffff")),
        ("nwk_extendedsrc", Some("1")),
        ("aps_frametype", Some("0b00: APS Data")),
        ("aps_profile_id", Some("0x0000")),
        ("aps_cluster_id", Some("0x0013")),
        ("der_same_macnwksrc", Some("Same MAC/NWK Src: true")),
    ]),
];

fn inspected_columns() -> Vec<&'static str> {
    PACKET_COLUMNS
        .iter()
        .copied()
        .filter(|c| !IGNORED_COLUMNS.contains(c))
        .collect()
}

/// Runs every packet type in [`PACKET_TYPES`] against `store`, writing one
/// TSV per type under `out_dir`. Does not parallelize across packet types
/// (the source splits this across `num_workers` processes; this crate's
/// `WorkerPool` already parallelizes the much heavier parsing phase, so a
/// single thread here keeps the SQLite connection usage simple).
pub fn export(store: &Store, out_dir: &Path) -> Result<()> {
    fs::create_dir_all(out_dir)?;
    let columns = inspected_columns();
    info!(
        "computing distinct field values of {} packet types across {} columns",
        PACKET_TYPES.len(),
        columns.len()
    );

    for packet_type in PACKET_TYPES {
        let out_path = out_dir.join(packet_type.filename);
        let rows = fetch_distinct_values(store, &columns, packet_type.conditions)?;
        write_tsv(&rows, &out_path)?;
    }

    info!("wrote {} field-value tables to {}", PACKET_TYPES.len(), out_dir.display());
    Ok(())
}

/// Columns whose `packets` value is stored as an integer rather than text,
/// so a matching condition must use a bare numeric SQL literal (SQLite's
/// comparison rules never equate an INTEGER storage class with a TEXT one,
/// even for columns with no declared type affinity).
const NUMERIC_CONDITION_COLUMNS: &[&str] = &["nwk_srcroute", "nwk_extendedsrc"];

fn fetch_distinct_values(
    store: &Store,
    columns: &[&'static str],
    conditions: &[Condition],
) -> Result<Vec<(String, Vec<Option<String>>)>> {
    let where_clause = conditions
        .iter()
        .map(|(col, val)| match val {
            None => format!("\"{}\" IS NULL", col),
            Some(v) if NUMERIC_CONDITION_COLUMNS.contains(col) => format!("\"{}\" = {}", col, v),
            Some(v) => format!("\"{}\" = '{}'", col, v.replace('\'', "''")),
        })
        .collect::<Vec<_>>()
        .join(" AND ");

    let mut rows = Vec::with_capacity(columns.len());
    for column in columns {
        let sql = format!(
            "SELECT DISTINCT \"{col}\" FROM packets WHERE {where_clause}",
            col = column,
            where_clause = where_clause
        );
        let mut stmt = store.connection().prepare(&sql)?;
        let mut values: Vec<Option<String>> = stmt
            .query_map([], |row| row.get_ref(0).map(value_ref_to_string))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        values.sort_by(|a, b| sort_key(a).cmp(&sort_key(b)));
        rows.push((column.to_string(), values));
    }
    Ok(rows)
}

/// Renders any SQLite storage class as the text a human would read in a
/// TSV cell, since the `packets` table mixes integer, real, and text
/// columns under no declared type affinity.
fn value_ref_to_string(value: rusqlite::types::ValueRef<'_>) -> Option<String> {
    use rusqlite::types::ValueRef;
    match value {
        ValueRef::Null => None,
        ValueRef::Integer(i) => Some(i.to_string()),
        ValueRef::Real(f) => Some(f.to_string()),
        ValueRef::Text(t) => Some(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Some(hex::encode(b)),
    }
}

/// Orders values null-first, then by the numeric interpretation of any
/// leading `0x`/`0b` prefix, then lexicographically (spec.md §6).
fn sort_key(value: &Option<String>) -> (u8, bool, u64, String) {
    let text = match value {
        None => return (0, false, 0, String::new()),
        Some(t) => t,
    };

    let prefix_end = text
        .find(|c: char| !c.is_ascii_hexdigit() && c != 'x' && c != 'b')
        .unwrap_or(text.len());
    let candidate = &text[..prefix_end];
    let numeric = if let Some(hex) = candidate.strip_prefix("0x") {
        u64::from_str_radix(hex, 16).ok()
    } else if let Some(bin) = candidate.strip_prefix("0b") {
        u64::from_str_radix(bin, 2).ok()
    } else {
        None
    };

    match numeric {
        Some(n) => (1, false, n, text.clone()),
        None => (1, true, 0, text.clone()),
    }
}

fn write_tsv(rows: &[(String, Vec<Option<String>>)], out_path: &Path) -> Result<()> {
    let mut out = String::new();
    for (column, values) in rows {
        out.push_str(column);
        for value in values {
            out.push_str(", ");
            out.push_str(value.as_deref().unwrap_or(""));
        }
        out.push('\t');
        out.push_str(&values.len().to_string());
        out.push('\n');
    }
    let mut file = fs::File::create(out_path)?;
    file.write_all(out.as_bytes())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    #[test]
    fn sort_key_orders_null_then_numeric_then_lexicographic() {
        let mut values = vec![
            Some("0x0010".to_string()),
            None,
            Some("0x0002".to_string()),
            Some("zz".to_string()),
            Some("aa".to_string()),
        ];
        values.sort_by(|a, b| sort_key(a).cmp(&sort_key(b)));
        assert_eq!(
            values,
            vec![
                None,
                Some("0x0002".to_string()),
                Some("0x0010".to_string()),
                Some("aa".to_string()),
                Some("zz".to_string()),
            ]
        );
    }

    #[test]
    fn inspected_columns_excludes_high_cardinality_fields() {
        let columns = inspected_columns();
        assert!(!columns.contains(&"phy_payload"));
        assert!(!columns.contains(&"mac_show"));
        assert!(columns.contains(&"mac_frametype"));
    }

    #[test]
    fn export_writes_one_tsv_per_packet_type() {
        let mut store = Store::open_in_memory().unwrap();
        let mut frame = crate::frame::Frame::new("t.pcap", 1, 0.0);
        frame.set("mac_frametype", "0b010: MAC Acknowledgment");
        store
            .finalize(
                &[frame],
                &BTreeSet::new(),
                &Default::default(),
                &Default::default(),
                &Default::default(),
            )
            .unwrap();

        let dir = tempfile::tempdir().unwrap();
        export(&store, dir.path()).unwrap();
        let contents = fs::read_to_string(dir.path().join("mac_acknowledgment.tsv")).unwrap();
        assert!(contents.contains("mac_frametype, 0b010: MAC Acknowledgment\t1"));
    }
}
