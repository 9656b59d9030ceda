//! A forensic analyzer for captured IEEE 802.15.4/Zigbee radio traffic
//! (spec.md §1): decodes MAC/NWK/APS frames, decrypts what the supplied
//! key material allows, infers corpus-wide relationships, and persists
//! everything to a relational store.

pub mod analysis;
pub mod capture;
pub mod config;
pub mod crypto;
pub mod decode;
pub mod error;
pub mod frame;
pub mod inference;
pub mod keyring;
pub mod pipeline;
pub mod store;
pub mod worker;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::info;

use crate::decode::security::DecryptPolicy;
use crate::error::Result;
use crate::keyring::KeyRing;
use crate::store::Store;

/// Recognized capture file extensions (spec.md §4.5).
const CAPTURE_EXTENSIONS: &[&str] = &["pcap", "pcapng", "cap"];

/// Lists capture files directly under `dir`, sorted by filename so a fixed
/// input directory always yields the same work order across runs.
pub fn discover_capture_files<P: AsRef<Path>>(dir: P) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let matches_ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| CAPTURE_EXTENSIONS.iter().any(|c| c.eq_ignore_ascii_case(e)))
            .unwrap_or(false);
        if matches_ext {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Core entry point (a): parses one capture directory across `worker_count`
/// threads and writes every decoded frame to the `packets` table. Does not
/// run the corpus-wide `InferenceEngine` or populate the derived tables —
/// call [`finalize_corpus`] afterwards to do that (spec.md §1, line 12).
pub fn parse_capture_dir<P: AsRef<Path>, Q: AsRef<Path>>(
    capture_dir: P,
    db_path: Q,
    keyring: KeyRing,
    policy: DecryptPolicy,
    worker_count: usize,
) -> Result<usize> {
    let files = discover_capture_files(capture_dir)?;
    info!("found {} capture file(s)", files.len());

    let keyring = Arc::new(keyring);
    let file_results = worker::parse_all(files, Arc::clone(&keyring), policy, worker_count)?;

    let mut records: Vec<pipeline::StagedRecord> = Vec::new();
    for file_result in file_results {
        records.extend(file_result.records);
    }
    records.sort_by(|a, b| {
        a.frame
            .pcap_filename()
            .cmp(b.frame.pcap_filename())
            .then(a.frame.pkt_num().cmp(&b.frame.pkt_num()))
    });

    let frames: Vec<frame::Frame> = records.into_iter().map(|r| r.frame).collect();
    let count = frames.len();

    let mut store = Store::open(db_path)?;
    store.write_packets(&frames)?;

    Ok(count)
}

/// Core entry point (b): reloads every packet already written to `db_path`,
/// re-runs the corpus-wide `InferenceEngine` (spec.md §4.6) against them,
/// and (re)writes the four derived tables. Takes no key material — phase 1
/// of the `InferenceEngine` only needs keys sniffed from APS Transport-Key
/// commands already decrypted in the stored corpus.
pub fn finalize_corpus<P: AsRef<Path>>(db_path: P, policy: DecryptPolicy) -> Result<usize> {
    let mut store = Store::open(db_path)?;
    let frames = store.load_frames()?;

    let mut records: Vec<pipeline::StagedRecord> = frames
        .into_iter()
        .map(|frame| {
            let raw_phy_payload = frame
                .get_text("phy_payload")
                .and_then(|hex_str| hex::decode(hex_str).ok())
                .unwrap_or_default();
            pipeline::StagedRecord { frame, raw_phy_payload }
        })
        .collect();

    let keyring = KeyRing::new();
    let result = inference::run(&mut records, &keyring, policy);
    info!("sniffed {} key(s) from the corpus", result.sniffed_key_count);

    let frames: Vec<frame::Frame> = records.into_iter().map(|r| r.frame).collect();
    let count = frames.len();

    store.replace_and_finalize(&frames, &result.addresses, &result.devices, &result.networks, &result.pairs)?;

    Ok(count)
}
