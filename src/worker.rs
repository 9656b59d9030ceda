//! WorkerPool (spec.md §4.5, §5): shards a list of capture files across a
//! fixed number of OS threads. Scheduling is pull-based through a single
//! `Mutex<usize>` shared task index, mirroring the teacher's own
//! `thread::spawn` + `Arc<Mutex<_>>` shape for background work (see
//! `legacy_teacher/src/lib.rs`'s timeout-manager thread).

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::thread;

use log::{info, warn};

use crate::decode::security::DecryptPolicy;
use crate::error::Result;
use crate::frame::Frame;
use crate::keyring::KeyRing;
use crate::pipeline::{decode_packet, StagedRecord};

/// Every record produced by one worker for one capture file, kept together
/// so a caller can attribute errors/warnings back to their source file.
pub struct FileResult {
    pub pcap_filename: String,
    pub records: Vec<StagedRecord>,
}

struct Shared {
    files: Vec<PathBuf>,
    next_index: Mutex<usize>,
}

impl Shared {
    fn take_next(&self) -> Option<(usize, &PathBuf)> {
        let mut guard = self.next_index.lock().unwrap();
        if *guard >= self.files.len() {
            return None;
        }
        let i = *guard;
        *guard += 1;
        Some((i, &self.files[i]))
    }
}

/// Parses every capture file in `files` across `worker_count` threads and
/// returns one [`FileResult`] per file, in no particular order (the caller
/// sorts by `(pcap_filename, pkt_num)` before joining, per spec.md §5).
pub fn parse_all(
    files: Vec<PathBuf>,
    keyring: Arc<KeyRing>,
    policy: DecryptPolicy,
    worker_count: usize,
) -> Result<Vec<FileResult>> {
    let total = files.len();
    let shared = Arc::new(Shared {
        files,
        next_index: Mutex::new(0),
    });
    let worker_count = worker_count.max(1);

    let results: Arc<Mutex<Vec<FileResult>>> = Arc::new(Mutex::new(Vec::with_capacity(total)));
    let parsed_count = Arc::new(Mutex::new(0usize));

    thread::scope(|scope| {
        for worker_id in 0..worker_count {
            let shared = Arc::clone(&shared);
            let keyring = Arc::clone(&keyring);
            let results = Arc::clone(&results);
            let parsed_count = Arc::clone(&parsed_count);

            scope.spawn(move || {
                // Pulls the next unclaimed file until the shared list is
                // exhausted; each worker stages its own Vec<StagedRecord>
                // before handing it to the shared result collector, so no
                // lock is held while decoding.
                while let Some((_, path)) = shared.take_next() {
                    match parse_one_file(path, &keyring, policy, worker_id) {
                        Ok(file_result) => {
                            let mut done = parsed_count.lock().unwrap();
                            *done += 1;
                            info!("parsed {} of {} files", *done, total);
                            results.lock().unwrap().push(file_result);
                        }
                        Err(e) => {
                            warn!("worker {} could not open {}: {}", worker_id, path.display(), e);
                        }
                    }
                }
            });
        }
    });

    // `thread::scope` joins every worker before returning, so no other
    // strong reference to `results` remains.
    let results = Arc::try_unwrap(results)
        .unwrap_or_else(|_| unreachable!("all worker threads are joined by thread::scope"))
        .into_inner()
        .unwrap();
    Ok(results)
}

fn parse_one_file(
    path: &PathBuf,
    keyring: &KeyRing,
    policy: DecryptPolicy,
    worker_id: usize,
) -> Result<FileResult> {
    let reader = crate::capture::CaptureReader::open(path)?;
    let pcap_filename = reader.filename();
    info!("worker {} opened capture file {}", worker_id, pcap_filename);

    let mut records = Vec::new();
    for captured in reader {
        let captured = captured?;
        let frame = if captured.recognized_linktype {
            decode_packet(
                &pcap_filename,
                captured.pkt_num,
                captured.pkt_time,
                &captured.phy_payload,
                keyring,
                policy,
            )
        } else {
            let mut frame = Frame::new(&pcap_filename, captured.pkt_num, captured.pkt_time);
            frame.set_error("PE102: There are no IEEE 802.15.4 MAC fields");
            frame
        };
        records.push(StagedRecord {
            frame,
            raw_phy_payload: captured.phy_payload,
        });
    }

    info!(
        "worker {} finished {} ({} packets)",
        worker_id,
        pcap_filename,
        records.len()
    );
    Ok(FileResult {
        pcap_filename,
        records,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shared_index_hands_out_each_file_once() {
        let shared = Shared {
            files: vec![PathBuf::from("a"), PathBuf::from("b"), PathBuf::from("c")],
            next_index: Mutex::new(0),
        };
        let mut seen = Vec::new();
        while let Some((i, _)) = shared.take_next() {
            seen.push(i);
        }
        assert_eq!(seen, vec![0, 1, 2]);
        assert!(shared.take_next().is_none());
    }
}
