//! Black-box coverage of the two core entry points (spec.md §1) plus the
//! `InferenceEngine`/`Store` round trip. Real pcap fixtures aren't available
//! alongside this pack (see DESIGN.md), so the MAC-layer cases below replay
//! literal on-air byte sequences, and the InferenceEngine/Store cases build
//! synthetic `Frame`s directly.

use zb_forensics::decode::security::DecryptPolicy;
use zb_forensics::frame::Frame;
use zb_forensics::inference;
use zb_forensics::keyring::{KeyRing, NamedKey};
use zb_forensics::pipeline::{decode_packet, StagedRecord};
use zb_forensics::store::Store;

#[test]
fn decodes_a_mac_acknowledgment_frame() {
    let raw = hex::decode("02008971ac").unwrap();
    let keyring = KeyRing::new();
    let frame = decode_packet("01-phy-testing.pcap", 1, 1599996161.0, &raw, &keyring, DecryptPolicy::Strict);

    assert_eq!(frame.error_msg(), None);
    assert_eq!(frame.get_text("mac_frametype"), Some("0b010: MAC Acknowledgment"));
    assert_eq!(frame.get_u64("mac_seqnum"), Some(137));
    assert_eq!(frame.get_u64("phy_length"), Some(5));
}

#[test]
fn rejects_a_truncated_frame() {
    let raw = hex::decode("0200").unwrap();
    let keyring = KeyRing::new();
    let frame = decode_packet("00-wrong-data-link-type.pcap", 1, 1599995905.0, &raw, &keyring, DecryptPolicy::Strict);

    assert!(frame.error_msg().unwrap().starts_with("PE101"));
}

#[test]
fn rejects_a_corrupted_frame_check_sequence() {
    let raw = hex::decode("02008971ffff").unwrap();
    let keyring = KeyRing::new();
    let frame = decode_packet("corrupted.pcap", 1, 0.0, &raw, &keyring, DecryptPolicy::Strict);

    assert!(frame.error_msg().unwrap().starts_with("PE202"));
}

#[test]
fn decrypts_an_nwk_route_request_command() {
    let raw = hex::decode(
        "4188657777ffff00000912fcff00001e\
         a1010000000077777728112700000100\
         000000777777004e131904fdab211e41\
         4cb1f1",
    )
    .unwrap();

    let mut keyring = KeyRing::new();
    keyring.extend_network_keys(vec![NamedKey {
        name: "test-net-key".to_string(),
        bytes: [0x11u8; 16],
        key_seq_num: None,
    }]);

    let frame = decode_packet("03-nwk-testing.pcap", 1, 1599996673.0, &raw, &keyring, DecryptPolicy::Strict);

    assert_eq!(frame.error_msg(), None);
    assert_eq!(frame.warning_msg(), None);
    assert_eq!(frame.get_text("nwk_aux_decpayload"), Some("010802fcff00"));
    assert_eq!(frame.get_text("nwk_cmd_id"), Some("0x01: NWK Route Request"));
    assert_eq!(
        frame.get_text("nwk_routerequest_mto"),
        Some("0b01: Many-to-One Route Request with Route Record support")
    );
    assert_eq!(frame.get_u64("nwk_routerequest_id"), Some(2));
    assert_eq!(frame.get_text("nwk_routerequest_dstshortaddr"), Some("0xfffc"));
    assert_eq!(frame.get_u64("nwk_routerequest_pathcost"), Some(0));
}

fn staged(pcap_filename: &str, pkt_num: u64, pkt_time: f64, set_fields: impl FnOnce(&mut Frame)) -> StagedRecord {
    let mut frame = Frame::new(pcap_filename, pkt_num, pkt_time);
    set_fields(&mut frame);
    StagedRecord { frame, raw_phy_payload: Vec::new() }
}

#[test]
fn inference_engine_discovers_addresses_and_pair_flows() {
    let mut records = vec![
        staged("corpus.pcap", 1, 100.0, |f| {
            f.set("mac_frametype", "0b001: MAC Data");
            f.set("mac_srcshortaddr", "0x0000");
            f.set("mac_srcpanid", "0x1a62");
            f.set("mac_srcextendedaddr", "00124b0001020304");
            f.set("mac_dstshortaddr", "0x1234");
            f.set("mac_dstpanid", "0x1a62");
            f.set("mac_dstextendedaddr", "00124b0005060708");
        }),
        staged("corpus.pcap", 2, 200.0, |f| {
            f.set("mac_frametype", "0b001: MAC Data");
            f.set("mac_srcshortaddr", "0x0000");
            f.set("mac_srcpanid", "0x1a62");
            f.set("mac_srcextendedaddr", "00124b0001020304");
            f.set("mac_dstshortaddr", "0x1234");
            f.set("mac_dstpanid", "0x1a62");
            f.set("mac_dstextendedaddr", "00124b0005060708");
        }),
    ];

    let keyring = KeyRing::new();
    let result = inference::run(&mut records, &keyring, DecryptPolicy::Strict);

    assert_eq!(result.addresses.len(), 2);
    assert!(result
        .addresses
        .contains(&("0x0000".to_string(), "0x1a62".to_string(), "00124b0001020304".to_string())));

    let pair = result
        .pairs
        .get(&("00124b0001020304".to_string(), "00124b0005060708".to_string(), "0x1a62".to_string()));
    assert!(pair.is_none(), "pair keys are short addresses, not extended ones");
}

#[test]
fn inference_engine_merges_device_type_from_separate_frames() {
    let mut records = vec![
        staged("corpus.pcap", 1, 1.0, |f| {
            f.set("mac_srcextendedaddr", "00124b00aabbccdd");
            f.set("mac_assocreq_devtype", 1u64);
        }),
        staged("corpus.pcap", 2, 2.0, |f| {
            f.set("nwk_srcextendedaddr", "00124b00aabbccdd");
            f.set("nwk_beacon_devdepth", 0u64);
        }),
    ];

    let keyring = KeyRing::new();
    let result = inference::run(&mut records, &keyring, DecryptPolicy::Strict);

    let (mac_type, nwk_type) = result.devices.get("00124b00aabbccdd").unwrap();
    assert_eq!(mac_type.as_deref(), Some("Full-Function Device"));
    assert_eq!(nwk_type.as_deref(), Some("Zigbee Coordinator"));
}

#[test]
fn store_round_trips_packets_through_write_packets_and_load_frames() {
    let mut store = Store::open_in_memory().unwrap();
    let mut frame = Frame::new("corpus.pcap", 1, 42.0);
    frame.set("mac_seqnum", 7u64);
    store.write_packets(&[frame]).unwrap();

    let loaded = store.load_frames().unwrap();
    assert_eq!(loaded.len(), 1);
    assert_eq!(loaded[0].get_u64("mac_seqnum"), Some(7));
    assert_eq!(loaded[0].pcap_filename(), "corpus.pcap");
}

#[test]
fn store_write_derived_does_not_touch_packets() {
    use std::collections::{BTreeMap, BTreeSet};

    let mut store = Store::open_in_memory().unwrap();
    let mut frame = Frame::new("corpus.pcap", 1, 0.0);
    frame.set("mac_seqnum", 1u64);
    store.write_packets(&[frame]).unwrap();

    let mut addresses = BTreeSet::new();
    addresses.insert(("0x0000".to_string(), "0x1a62".to_string(), "00124b0001020304".to_string()));
    store
        .write_derived(&addresses, &BTreeMap::new(), &BTreeMap::new(), &BTreeMap::new())
        .unwrap();

    let packet_count: i64 = store
        .connection()
        .query_row("SELECT COUNT(*) FROM packets", [], |row| row.get(0))
        .unwrap();
    assert_eq!(packet_count, 1);

    let address_count: i64 = store
        .connection()
        .query_row("SELECT COUNT(*) FROM addresses", [], |row| row.get(0))
        .unwrap();
    assert_eq!(address_count, 1);
}
