//! Relational persistence of the `packets` table and the four corpus-wide
//! derived tables (spec.md §4.7, §6). All writes for one finalize pass
//! happen inside a single transaction.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use rusqlite::types::Value as SqlValue;
use rusqlite::Connection;

use crate::error::Result;
use crate::frame::{FieldValue, Frame, PACKET_COLUMNS};

pub struct Store {
    conn: Connection,
}

impl Store {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;
        let store = Store { conn };
        store.create_schema()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Store { conn };
        store.create_schema()?;
        Ok(store)
    }

    fn create_schema(&self) -> Result<()> {
        let columns = PACKET_COLUMNS
            .iter()
            .map(|c| format!("\"{}\"", c))
            .collect::<Vec<_>>()
            .join(", ");
        self.conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS packets ({});
             CREATE TABLE IF NOT EXISTS addresses (
                 shortaddr TEXT NOT NULL,
                 panid TEXT NOT NULL,
                 extendedaddr TEXT NOT NULL,
                 UNIQUE(shortaddr, panid, extendedaddr)
             );
             CREATE TABLE IF NOT EXISTS devices (
                 extendedaddr TEXT PRIMARY KEY,
                 macdevtype TEXT,
                 nwkdevtype TEXT
             );
             CREATE TABLE IF NOT EXISTS networks (
                 epid TEXT PRIMARY KEY,
                 panids TEXT NOT NULL
             );
             CREATE TABLE IF NOT EXISTS pairs (
                 srcaddr TEXT NOT NULL,
                 dstaddr TEXT NOT NULL,
                 panid TEXT NOT NULL,
                 first REAL NOT NULL,
                 last REAL NOT NULL,
                 UNIQUE(srcaddr, dstaddr, panid)
             );",
            columns
        ))?;
        Ok(())
    }

    /// Writes every staged record plus the four derived tables in one
    /// transaction (spec.md §4.7).
    pub fn finalize(
        &mut self,
        frames: &[Frame],
        addresses: &BTreeSet<(String, String, String)>,
        devices: &BTreeMap<String, (Option<String>, Option<String>)>,
        networks: &BTreeMap<String, BTreeSet<String>>,
        pairs: &BTreeMap<(String, String, String), (f64, f64)>,
    ) -> Result<()> {
        let tx = self.conn.transaction()?;
        write_packets_tx(&tx, frames)?;
        write_derived_tx(&tx, addresses, devices, networks, pairs)?;
        tx.commit()?;
        Ok(())
    }

    /// Writes only the `packets` table, leaving the four derived tables
    /// untouched. Used by the CLI's `parse` subcommand, which defers
    /// corpus-wide inference to a later `finalize` call.
    pub fn write_packets(&mut self, frames: &[Frame]) -> Result<()> {
        let tx = self.conn.transaction()?;
        write_packets_tx(&tx, frames)?;
        tx.commit()?;
        Ok(())
    }

    /// Replaces every row of `packets` with `frames` and (re)writes the
    /// four derived tables, all in one transaction. Used by the CLI's
    /// `finalize` subcommand: the `InferenceEngine`'s sniffed-key pass may
    /// have re-decrypted records that failed the first time, so the
    /// previously stored rows need replacing, not appending to
    /// (spec.md §4.6, §4.7's "one transaction per finalize").
    pub fn replace_and_finalize(
        &mut self,
        frames: &[Frame],
        addresses: &BTreeSet<(String, String, String)>,
        devices: &BTreeMap<String, (Option<String>, Option<String>)>,
        networks: &BTreeMap<String, BTreeSet<String>>,
        pairs: &BTreeMap<(String, String, String), (f64, f64)>,
    ) -> Result<()> {
        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM packets", [])?;
        write_packets_tx(&tx, frames)?;
        write_derived_tx(&tx, addresses, devices, networks, pairs)?;
        tx.commit()?;
        Ok(())
    }

    /// Writes only the four derived tables, leaving `packets` untouched.
    /// Used by the CLI's `finalize` subcommand to recompute derived data
    /// (e.g. after the `InferenceEngine` sniffs new keys) without
    /// re-inserting packets already on disk.
    pub fn write_derived(
        &mut self,
        addresses: &BTreeSet<(String, String, String)>,
        devices: &BTreeMap<String, (Option<String>, Option<String>)>,
        networks: &BTreeMap<String, BTreeSet<String>>,
        pairs: &BTreeMap<(String, String, String), (f64, f64)>,
    ) -> Result<()> {
        let tx = self.conn.transaction()?;
        write_derived_tx(&tx, addresses, devices, networks, pairs)?;
        tx.commit()?;
        Ok(())
    }

    /// Reloads every row of the `packets` table as a `Frame`, ordered by
    /// `(pcap_filename, pkt_num)` (spec.md §5's ordering guarantee). Used by
    /// the CLI's `finalize` subcommand to recompute the derived tables for
    /// packets that were written by a prior `parse` run.
    pub fn load_frames(&self) -> Result<Vec<Frame>> {
        let columns = PACKET_COLUMNS
            .iter()
            .map(|c| format!("\"{}\"", c))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "SELECT {} FROM packets ORDER BY \"pcap_filename\", \"pkt_num\"",
            columns
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let frames = stmt
            .query_map([], |row| {
                let mut values = std::collections::HashMap::new();
                for (i, column) in PACKET_COLUMNS.iter().enumerate() {
                    if let Some(value) = sql_to_field(row.get_ref(i)?) {
                        values.insert(*column, value);
                    }
                }
                Ok(Frame::from_stored(values))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(frames)
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }
}

fn write_packets_tx(tx: &rusqlite::Transaction, frames: &[Frame]) -> Result<()> {
    let placeholders = (1..=PACKET_COLUMNS.len())
        .map(|i| format!("?{}", i))
        .collect::<Vec<_>>()
        .join(", ");
    let columns = PACKET_COLUMNS
        .iter()
        .map(|c| format!("\"{}\"", c))
        .collect::<Vec<_>>()
        .join(", ");
    let sql = format!("INSERT INTO packets ({}) VALUES ({})", columns, placeholders);
    let mut stmt = tx.prepare(&sql)?;
    for frame in frames {
        let values: Vec<SqlValue> = frame.ordered_columns().into_iter().map(field_to_sql).collect();
        let params: Vec<&dyn rusqlite::ToSql> = values.iter().map(|v| v as &dyn rusqlite::ToSql).collect();
        stmt.execute(params.as_slice())?;
    }
    Ok(())
}

fn write_derived_tx(
    tx: &rusqlite::Transaction,
    addresses: &BTreeSet<(String, String, String)>,
    devices: &BTreeMap<String, (Option<String>, Option<String>)>,
    networks: &BTreeMap<String, BTreeSet<String>>,
    pairs: &BTreeMap<(String, String, String), (f64, f64)>,
) -> Result<()> {
    {
        let mut stmt = tx.prepare(
            "INSERT OR IGNORE INTO addresses (shortaddr, panid, extendedaddr) VALUES (?1, ?2, ?3)",
        )?;
        for (short, panid, extended) in addresses {
            stmt.execute(rusqlite::params![short, panid, extended])?;
        }
    }

    {
        let mut stmt = tx.prepare(
            "INSERT INTO devices (extendedaddr, macdevtype, nwkdevtype) VALUES (?1, ?2, ?3)
             ON CONFLICT(extendedaddr) DO UPDATE SET
               macdevtype = COALESCE(devices.macdevtype, excluded.macdevtype),
               nwkdevtype = COALESCE(devices.nwkdevtype, excluded.nwkdevtype)",
        )?;
        for (extended, (mac_type, nwk_type)) in devices {
            stmt.execute(rusqlite::params![extended, mac_type, nwk_type])?;
        }
    }

    {
        let mut stmt = tx.prepare(
            "INSERT INTO networks (epid, panids) VALUES (?1, ?2)
             ON CONFLICT(epid) DO UPDATE SET panids = excluded.panids",
        )?;
        for (epid, panids) in networks {
            let joined = panids.iter().cloned().collect::<Vec<_>>().join(",");
            stmt.execute(rusqlite::params![epid, joined])?;
        }
    }

    {
        let mut stmt = tx.prepare(
            "INSERT INTO pairs (srcaddr, dstaddr, panid, first, last) VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(srcaddr, dstaddr, panid) DO UPDATE SET
               first = MIN(pairs.first, excluded.first),
               last = MAX(pairs.last, excluded.last)",
        )?;
        for ((src, dst, panid), (first, last)) in pairs {
            stmt.execute(rusqlite::params![src, dst, panid, first, last])?;
        }
    }

    Ok(())
}

fn sql_to_field(value: rusqlite::types::ValueRef<'_>) -> Option<FieldValue> {
    use rusqlite::types::ValueRef;
    match value {
        ValueRef::Null => None,
        ValueRef::Integer(i) => Some(FieldValue::UInt(i as u64)),
        ValueRef::Real(f) => Some(FieldValue::Float(f)),
        ValueRef::Text(t) => Some(FieldValue::Text(String::from_utf8_lossy(t).into_owned())),
        ValueRef::Blob(b) => Some(FieldValue::Text(hex::encode(b))),
    }
}

fn field_to_sql(value: Option<&FieldValue>) -> SqlValue {
    match value {
        None => SqlValue::Null,
        Some(FieldValue::UInt(v)) => SqlValue::Integer(*v as i64),
        Some(FieldValue::Float(v)) => SqlValue::Real(*v),
        Some(FieldValue::Text(v)) => SqlValue::Text(v.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packets_table_round_trips_a_frame() {
        let mut store = Store::open_in_memory().unwrap();
        let mut frame = Frame::new("test.pcap", 1, 123.5);
        frame.set("mac_seqnum", 42u64);
        store
            .finalize(
                &[frame],
                &BTreeSet::new(),
                &BTreeMap::new(),
                &BTreeMap::new(),
                &BTreeMap::new(),
            )
            .unwrap();

        let count: i64 = store
            .connection()
            .query_row("SELECT COUNT(*) FROM packets", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);

        let seq: i64 = store
            .connection()
            .query_row("SELECT mac_seqnum FROM packets", [], |row| row.get(0))
            .unwrap();
        assert_eq!(seq, 42);
    }

    #[test]
    fn devices_table_merges_without_overwriting_known_fields() {
        let mut store = Store::open_in_memory().unwrap();
        let mut devices = BTreeMap::new();
        devices.insert(
            "1122334455667788".to_string(),
            (Some("Full-Function Device".to_string()), None),
        );
        store
            .finalize(&[], &BTreeSet::new(), &devices, &BTreeMap::new(), &BTreeMap::new())
            .unwrap();

        let mut devices2 = BTreeMap::new();
        devices2.insert(
            "1122334455667788".to_string(),
            (None, Some("Zigbee Router".to_string())),
        );
        store
            .finalize(&[], &BTreeSet::new(), &devices2, &BTreeMap::new(), &BTreeMap::new())
            .unwrap();

        let (mac, nwk): (String, String) = store
            .connection()
            .query_row(
                "SELECT macdevtype, nwkdevtype FROM devices WHERE extendedaddr = '1122334455667788'",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .unwrap();
        assert_eq!(mac, "Full-Function Device");
        assert_eq!(nwk, "Zigbee Router");
    }
}
