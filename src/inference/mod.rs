//! InferenceEngine (spec.md §4.6): the corpus-wide post-pass that runs once
//! every worker has finished, joining staged records into the four derived
//! tables and optionally re-running decryption once new keys are sniffed.
//!
//! Device-type attribution (phase 3) is not pinned by any file kept in
//! `examples/original_source/` (the filtered retrieval only kept
//! `zigator/parsing/aps_fields.py`, not the module that classifies device
//! types from association/beacon fields), so the classification rules here
//! are derived directly from the Zigbee/IEEE 802.15.4 field semantics
//! already decoded elsewhere in this crate; see DESIGN.md.

use std::collections::{BTreeMap, BTreeSet};

use log::info;

use crate::decode::security::DecryptPolicy;
use crate::frame::Frame;
use crate::keyring::{KeyRing, KeyType, NamedKey};
use crate::pipeline::{decode_packet, StagedRecord};

#[derive(Debug, Default)]
pub struct InferenceResult {
    pub addresses: BTreeSet<(String, String, String)>,
    pub devices: BTreeMap<String, (Option<String>, Option<String>)>,
    pub networks: BTreeMap<String, BTreeSet<String>>,
    pub pairs: BTreeMap<(String, String, String), (f64, f64)>,
    pub sniffed_key_count: usize,
}

/// Runs all four phases over `records`, mutating records in place when a
/// phase-1 re-decryption succeeds. `records` should already be sorted by
/// `(pcap_filename, pkt_num)` for deterministic output (spec.md §5).
pub fn run(records: &mut Vec<StagedRecord>, keyring: &KeyRing, policy: DecryptPolicy) -> InferenceResult {
    let sniffed_key_count = phase1_sniffed_keys(records, keyring, policy);
    let networks = phase2_epid_discovery(records);
    let (addresses, devices) = phase3_address_device_discovery(records);
    let pairs = phase4_pair_flows(records);

    InferenceResult {
        addresses,
        devices,
        networks,
        pairs,
        sniffed_key_count,
    }
}

fn stdkeytype_text(frame: &Frame) -> Option<&str> {
    frame
        .get_text("aps_transportkey_stdkeytype")
        .map(|s| s.trim_start_matches(|c: char| c != ' ').trim())
}

/// Scans decrypted APS Transport-Key commands for Standard/High-Security
/// Network Keys and Trust Center Link Keys, appends any not already in
/// `keyring`, and re-runs the pipeline for every record that failed to
/// decrypt on the first pass. Returns the number of distinct keys sniffed.
fn phase1_sniffed_keys(
    records: &mut Vec<StagedRecord>,
    keyring: &KeyRing,
    policy: DecryptPolicy,
) -> usize {
    let mut sniffed_network = Vec::new();
    let mut sniffed_link = Vec::new();

    for staged in records.iter() {
        let frame = &staged.frame;
        if frame.get_text("aps_cmd_id").map(|s| s.starts_with("0x05")) != Some(true) {
            continue;
        }
        let key_hex = match frame.get_text("aps_transportkey_key") {
            Some(h) => h,
            None => continue,
        };
        let key_bytes = match hex::decode(key_hex) {
            Ok(b) if b.len() == 16 => {
                let mut out = [0u8; 16];
                out.copy_from_slice(&b);
                out
            }
            _ => continue,
        };
        let name = format!("_sniffed_{}", key_hex);
        let key_seq_num = frame.get_u64("aps_transportkey_keyseqnum").map(|v| v as u8);

        match stdkeytype_text(frame) {
            Some(t) if t.contains("Standard Network Key") || t.contains("High-Security Network Key") => {
                sniffed_network.push(NamedKey { name, bytes: key_bytes, key_seq_num });
            }
            Some(t) if t.contains("Trust Center Link Key") => {
                sniffed_link.push(NamedKey { name, bytes: key_bytes, key_seq_num: None });
            }
            _ => {}
        }
    }

    let sniffed_count = sniffed_network.len() + sniffed_link.len();
    if sniffed_count == 0 {
        return 0;
    }

    let mut augmented = keyring.clone();
    augmented.extend_network_keys(sniffed_network);
    augmented.extend_link_keys(sniffed_link);
    info!("sniffed {} new key(s) from the corpus, re-running undecrypted records", sniffed_count);

    for staged in records.iter_mut() {
        let needs_retry = staged
            .frame
            .warning_msg()
            .map(|w| w.starts_with("PW301"))
            .unwrap_or(false);
        if !needs_retry {
            continue;
        }
        let pcap_filename = staged.frame.pcap_filename().to_string();
        let pkt_num = staged.frame.pkt_num();
        let pkt_time = staged.frame.pkt_time();
        staged.frame = decode_packet(
            &pcap_filename,
            pkt_num,
            pkt_time,
            &staged.raw_phy_payload,
            &augmented,
            policy,
        );
    }

    sniffed_count
}

fn phase2_epid_discovery(records: &[StagedRecord]) -> BTreeMap<String, BTreeSet<String>> {
    let mut networks: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    for staged in records {
        let frame = &staged.frame;
        let epid = frame
            .get_text("nwk_beacon_epid")
            .or_else(|| frame.get_text("nwk_networkreport_epid"))
            .or_else(|| frame.get_text("nwk_networkupdate_epid"));
        let (epid, panid) = match (epid, frame.get_text("mac_srcpanid")) {
            (Some(e), Some(p)) => (e.to_string(), p.to_string()),
            _ => continue,
        };
        networks.entry(epid).or_default().insert(panid);
    }
    networks
}

fn addr_triple(frame: &Frame, short_col: &str, panid_col: &str, ext_col: &str) -> Option<(String, String, String)> {
    let short = frame.get_text(short_col)?;
    let panid = frame.get_text(panid_col)?;
    let ext = frame.get_text(ext_col)?;
    Some((short.to_string(), panid.to_string(), ext.to_string()))
}

/// Classifies a device's NWK role from beacon capacity/depth fields
/// (IEEE 802.15.4/Zigbee beacon payload semantics, not pinned by any kept
/// source file — see module docs).
fn nwk_devtype_from_beacon(frame: &Frame) -> Option<&'static str> {
    let depth = frame.get_u64("nwk_beacon_devdepth")?;
    if depth == 0 {
        return Some("Zigbee Coordinator");
    }
    match frame.get_u64("nwk_beacon_routercap") {
        Some(1) => Some("Zigbee Router"),
        _ => Some("Zigbee End Device"),
    }
}

fn mac_devtype_from_assocreq(frame: &Frame) -> Option<&'static str> {
    match frame.get_u64("mac_assocreq_devtype") {
        Some(1) => Some("Full-Function Device"),
        Some(0) => Some("Reduced-Function Device"),
        _ => None,
    }
}

fn merge_device(
    devices: &mut BTreeMap<String, (Option<String>, Option<String>)>,
    extended: String,
    mac_type: Option<&'static str>,
    nwk_type: Option<&'static str>,
) {
    let entry = devices.entry(extended).or_insert((None, None));
    if entry.0.is_none() {
        entry.0 = mac_type.map(str::to_owned);
    }
    if entry.1.is_none() {
        entry.1 = nwk_type.map(str::to_owned);
    }
}

fn phase3_address_device_discovery(
    records: &[StagedRecord],
) -> (
    BTreeSet<(String, String, String)>,
    BTreeMap<String, (Option<String>, Option<String>)>,
) {
    let mut addresses = BTreeSet::new();
    let mut devices: BTreeMap<String, (Option<String>, Option<String>)> = BTreeMap::new();

    for staged in records {
        let frame = &staged.frame;

        if let Some(triple) = addr_triple(frame, "mac_dstshortaddr", "mac_dstpanid", "mac_dstextendedaddr") {
            addresses.insert(triple);
        }
        if let Some(triple) = addr_triple(frame, "mac_srcshortaddr", "mac_srcpanid", "mac_srcextendedaddr") {
            addresses.insert(triple);
        }
        if let Some(triple) = addr_triple(frame, "nwk_dstshortaddr", "mac_dstpanid", "nwk_dstextendedaddr") {
            addresses.insert(triple);
        }
        if let Some(triple) = addr_triple(frame, "nwk_srcshortaddr", "mac_srcpanid", "nwk_srcextendedaddr") {
            addresses.insert(triple);
        }

        if let Some(ext) = frame.get_text("mac_srcextendedaddr") {
            merge_device(&mut devices, ext.to_string(), mac_devtype_from_assocreq(frame), None);
        }
        if let Some(ext) = frame.get_text("nwk_srcextendedaddr").or_else(|| frame.get_text("mac_srcextendedaddr")) {
            merge_device(&mut devices, ext.to_string(), None, nwk_devtype_from_beacon(frame));
        }
    }

    (addresses, devices)
}

fn phase4_pair_flows(records: &[StagedRecord]) -> BTreeMap<(String, String, String), (f64, f64)> {
    let mut pairs: BTreeMap<(String, String, String), (f64, f64)> = BTreeMap::new();
    for staged in records {
        let frame = &staged.frame;
        if frame.get_text("mac_frametype").map(|t| t.starts_with("0b001")) != Some(true) {
            continue;
        }
        let (src, dst, panid) = match (
            frame.get_text("mac_srcshortaddr"),
            frame.get_text("mac_dstshortaddr"),
            frame.get_text("mac_dstpanid").or_else(|| frame.get_text("mac_srcpanid")),
        ) {
            (Some(s), Some(d), Some(p)) => (s.to_string(), d.to_string(), p.to_string()),
            _ => continue,
        };
        let time = frame.pkt_time();
        let key = (src, dst, panid);
        pairs
            .entry(key)
            .and_modify(|(first, last)| {
                if time < *first {
                    *first = time;
                }
                if time > *last {
                    *last = time;
                }
            })
            .or_insert((time, time));
    }
    pairs
}

#[allow(dead_code)]
fn unused_key_type_reference() -> KeyType {
    // Keeps the `KeyType` import meaningful to readers grepping for where
    // sniffed keys ultimately get consulted (`SecurityStage::candidate_pool`).
    KeyType::Network
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Frame;

    fn staged(frame: Frame) -> StagedRecord {
        StagedRecord {
            frame,
            raw_phy_payload: Vec::new(),
        }
    }

    #[test]
    fn pair_flow_tracks_first_and_last_seen() {
        let mut f1 = Frame::new("a.pcap", 1, 10.0);
        f1.set("mac_frametype", "0b001: MAC Data");
        f1.set("mac_srcshortaddr", "0x0001");
        f1.set("mac_dstshortaddr", "0x0002");
        f1.set("mac_dstpanid", "0x1234");

        let mut f2 = Frame::new("a.pcap", 2, 20.0);
        f2.set("mac_frametype", "0b001: MAC Data");
        f2.set("mac_srcshortaddr", "0x0001");
        f2.set("mac_dstshortaddr", "0x0002");
        f2.set("mac_dstpanid", "0x1234");

        let records = vec![staged(f1), staged(f2)];
        let pairs = phase4_pair_flows(&records);
        let key = ("0x0001".to_string(), "0x0002".to_string(), "0x1234".to_string());
        assert_eq!(pairs.get(&key), Some(&(10.0, 20.0)));
    }

    #[test]
    fn address_discovery_requires_both_short_and_extended() {
        let mut f = Frame::new("a.pcap", 1, 0.0);
        f.set("mac_srcshortaddr", "0x0001");
        f.set("mac_srcpanid", "0x1234");
        f.set("mac_srcextendedaddr", "0x0000000000000001");
        let records = vec![staged(f)];
        let (addresses, _) = phase3_address_device_discovery(&records);
        assert!(addresses.contains(&(
            "0x0001".to_string(),
            "0x1234".to_string(),
            "0x0000000000000001".to_string()
        )));
    }
}
