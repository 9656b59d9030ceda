//! Zigbee NWK layer decoding (spec.md §4.3), present only inside MAC Data
//! frames.

use super::mac::MacAddressing;
use super::{bin_prefix, hex_prefix, render_enum, Cursor};
use crate::frame::Frame;

/// The auxiliary security header (spec.md §3), shared shape with APS.
#[derive(Debug, Clone)]
pub struct AuxHeader {
    pub security_level: u8,
    pub key_type: u8,
    pub extended_nonce: bool,
    /// The raw security-control octet as parsed off the wire, kept
    /// alongside the decomposed fields above because nonce construction
    /// needs to override only the security-level bits, not discard the
    /// rest of the octet (spec.md §4.1).
    pub security_control: u8,
    pub frame_counter: u32,
    pub source_addr: Option<u64>,
    pub key_seq_num: Option<u8>,
}

/// Maps a 3-bit security level to (encrypt, mic_len) per IEEE 802.15.4
/// Annex B: bit 2 selects encryption, the low two bits select the MIC
/// length code.
pub fn security_level_params(level: u8) -> (bool, usize) {
    let encrypt = (level >> 2) & 0b1 == 1;
    let mic_len = match level & 0b011 {
        0 => 0,
        1 => 4,
        2 => 8,
        3 => 16,
        _ => unreachable!(),
    };
    (encrypt, mic_len)
}

fn security_level_label(level: u8) -> &'static str {
    match level {
        0 => "No Security",
        1 => "MIC-32",
        2 => "MIC-64",
        3 => "MIC-128",
        4 => "ENC",
        5 => "ENC-MIC-32",
        6 => "ENC-MIC-64",
        7 => "ENC-MIC-128",
        _ => unreachable!(),
    }
}

fn key_type_label(t: u8) -> Option<&'static str> {
    match t {
        0 => Some("Data Key"),
        1 => Some("Network Key"),
        2 => Some("Key-Transport Key"),
        3 => Some("Key-Load Key"),
        _ => None,
    }
}

/// Parses an auxiliary security header, writing its fields under the given
/// column prefix (`"nwk_aux_"` or `"aps_aux_"`).
pub fn parse_aux_header(cur: &mut Cursor, frame: &mut Frame, prefix: &str) -> Option<AuxHeader> {
    let control = cur.read_u8()?;
    let security_level = control & 0b111;
    let key_type = (control >> 3) & 0b11;
    let extended_nonce = ((control >> 5) & 0b1) == 1;

    let key_type_label = match key_type_label(key_type) {
        Some(l) => l,
        None => {
            frame.set_error("PE201: Unknown auxiliary header key type state");
            return None;
        }
    };

    frame.set_dynamic(
        &format!("{}seclevel", prefix),
        render_enum(&bin_prefix(security_level as u64, 3), security_level_label(security_level)),
    );
    frame.set_dynamic(
        &format!("{}keytype", prefix),
        render_enum(&bin_prefix(key_type as u64, 2), key_type_label),
    );
    frame.set_dynamic(&format!("{}extnonce", prefix), extended_nonce as u64);

    let frame_counter = cur.read_u32_le()?;
    frame.set_dynamic(&format!("{}framecounter", prefix), frame_counter as u64);

    let source_addr = if extended_nonce {
        let a = cur.read_u64_le()?;
        frame.set_dynamic(&format!("{}srcaddr", prefix), hex_prefix(a, 16));
        Some(a)
    } else {
        None
    };

    let key_seq_num = if key_type == 1 {
        let k = cur.read_u8()?;
        frame.set_dynamic(&format!("{}keyseqnum", prefix), k as u64);
        Some(k)
    } else {
        None
    };

    Some(AuxHeader {
        security_level,
        key_type,
        extended_nonce,
        security_control: control,
        frame_counter,
        source_addr,
        key_seq_num,
    })
}

/// Addressing facts contributed by the NWK header, consumed by the
/// auxiliary-nonce source-address priority rule in spec.md §3.
#[derive(Debug, Default, Clone)]
pub struct NwkAddressing {
    pub dst_extended: Option<u64>,
    pub src_extended: Option<u64>,
}

pub struct NwkDecoded<'a> {
    pub is_command: bool,
    pub addressing: NwkAddressing,
    pub aux: Option<AuxHeader>,
    /// Bytes from the start of the NWK header through the end of the
    /// auxiliary header (AAD for decryption), when security is enabled.
    pub aad: &'a [u8],
    /// The ciphertext+MIC (if security enabled) or cleartext payload
    /// (NWK command body or APS frame) otherwise.
    pub payload: &'a [u8],
}

fn frame_type_label(t: u8) -> &'static str {
    match t {
        0 => "NWK Data",
        1 => "NWK Command",
        2 => "Inter-PAN (Reserved)",
        _ => "Reserved",
    }
}

pub fn decode_nwk<'a>(
    raw: &'a [u8],
    frame: &mut Frame,
    mac_addressing: &MacAddressing,
) -> Option<NwkDecoded<'a>> {
    let mut cur = Cursor::new(raw);
    let fcf = match cur.read_u16_le() {
        Some(v) => v,
        None => {
            frame.set_error("PE101: Invalid packet length");
            return None;
        }
    };

    let frame_type = (fcf & 0b11) as u8;
    let protocol_version = ((fcf >> 2) & 0b1111) as u8;
    let discover_route = ((fcf >> 6) & 0b11) as u8;
    let multicast = ((fcf >> 8) & 0b1) as u8;
    let security = ((fcf >> 9) & 0b1) as u8;
    let source_route = ((fcf >> 10) & 0b1) as u8;
    let extended_dst = ((fcf >> 11) & 0b1) as u8;
    let extended_src = ((fcf >> 12) & 0b1) as u8;
    let ed_initiator = ((fcf >> 13) & 0b1) as u8;

    frame.set("nwk_frametype", render_enum(&bin_prefix(frame_type as u64, 2), frame_type_label(frame_type)));
    frame.set("nwk_protocolversion", protocol_version as u64);
    frame.set("nwk_discroute", discover_route as u64);
    frame.set("nwk_multicast", multicast as u64);
    frame.set("nwk_security", security as u64);
    frame.set("nwk_srcroute", source_route as u64);
    frame.set("nwk_extendeddst", extended_dst as u64);
    frame.set("nwk_extendedsrc", extended_src as u64);
    frame.set("nwk_edinitiator", ed_initiator as u64);

    let dst_short = match cur.read_u16_le() {
        Some(v) => v,
        None => {
            frame.set_error("PE101: Invalid packet length");
            return None;
        }
    };
    frame.set("nwk_dstshortaddr", hex_prefix(dst_short as u64, 4));
    let src_short = match cur.read_u16_le() {
        Some(v) => v,
        None => {
            frame.set_error("PE101: Invalid packet length");
            return None;
        }
    };
    frame.set("nwk_srcshortaddr", hex_prefix(src_short as u64, 4));
    let radius = match cur.read_u8() {
        Some(v) => v,
        None => {
            frame.set_error("PE101: Invalid packet length");
            return None;
        }
    };
    frame.set("nwk_radius", radius as u64);
    let seqnum = match cur.read_u8() {
        Some(v) => v,
        None => {
            frame.set_error("PE101: Invalid packet length");
            return None;
        }
    };
    frame.set("nwk_seqnum", seqnum as u64);

    let mut addressing = NwkAddressing::default();

    if extended_dst == 1 {
        let a = match cur.read_u64_le() {
            Some(v) => v,
            None => {
                frame.set_error("PE101: Invalid packet length");
                return None;
            }
        };
        frame.set("nwk_dstextendedaddr", hex_prefix(a, 16));
        addressing.dst_extended = Some(a);
    } else {
        addressing.dst_extended = mac_addressing.dst_extended;
    }

    if extended_src == 1 {
        let a = match cur.read_u64_le() {
            Some(v) => v,
            None => {
                frame.set_error("PE101: Invalid packet length");
                return None;
            }
        };
        frame.set("nwk_srcextendedaddr", hex_prefix(a, 16));
        addressing.src_extended = Some(a);
    } else {
        addressing.src_extended = mac_addressing.src_extended;
    }

    if multicast == 1 && cur.read_u8().is_none() {
        frame.set_error("PE101: Invalid packet length");
        return None;
    }

    if source_route == 1 {
        let relay_count = match cur.read_u8() {
            Some(v) => v,
            None => {
                frame.set_error("PE101: Invalid packet length");
                return None;
            }
        };
        let relay_index = match cur.read_u8() {
            Some(v) => v,
            None => {
                frame.set_error("PE101: Invalid packet length");
                return None;
            }
        };
        frame.set("nwk_srcroute_relaycount", relay_count as u64);
        frame.set("nwk_srcroute_relayindex", relay_index as u64);
        let relay_bytes = match cur.read_bytes(relay_count as usize * 2) {
            Some(v) => v,
            None => {
                frame.set_error("PE101: Invalid packet length");
                return None;
            }
        };
        frame.set(
            "nwk_srcroute_relaylist",
            relay_bytes
                .chunks(2)
                .map(|c| hex_prefix(u16::from_le_bytes([c[0], c[1]]) as u64, 4))
                .collect::<Vec<_>>()
                .join(","),
        );
    }

    if security == 1 {
        let aux_start = cur.pos();
        let aux = match parse_aux_header(&mut cur, frame, "nwk_aux_") {
            Some(a) => a,
            None => {
                frame.set_error("PE101: Invalid packet length");
                return None;
            }
        };
        let aad = &raw[..cur.pos()];
        let _ = aux_start;
        Some(NwkDecoded {
            is_command: frame_type == 1,
            addressing,
            aux: Some(aux),
            aad,
            payload: cur.rest(),
        })
    } else {
        Some(NwkDecoded {
            is_command: frame_type == 1,
            addressing,
            aux: None,
            aad: &raw[..0],
            payload: cur.rest(),
        })
    }
}

fn nwk_cmd_label(id: u8) -> Option<&'static str> {
    match id {
        0x01 => Some("NWK Route Request"),
        0x02 => Some("NWK Route Reply"),
        0x03 => Some("NWK Network Status"),
        0x04 => Some("NWK Leave"),
        0x05 => Some("NWK Route Record"),
        0x06 => Some("NWK Rejoin Request"),
        0x07 => Some("NWK Rejoin Response"),
        0x08 => Some("NWK Link Status"),
        0x09 => Some("NWK Network Report"),
        0x0a => Some("NWK Network Update"),
        0x0b => Some("NWK End Device Timeout Request"),
        0x0c => Some("NWK End Device Timeout Response"),
        _ => None,
    }
}

fn mto_label(v: u8) -> &'static str {
    match v {
        0b00 => "Not a Many-to-One Route Request",
        0b01 => "Many-to-One Route Request with Route Record support",
        0b10 => "Many-to-One Route Request without Route Record support",
        _ => "Reserved",
    }
}

/// Decodes a NWK command frame body (after the 1-byte command id), which
/// may be the recovered plaintext of an encrypted NWK Data/Command frame.
pub fn decode_nwk_command(payload: &[u8], frame: &mut Frame) {
    frame.set("nwk_cmd_payloadlength", payload.len() as u64);
    let mut cur = Cursor::new(payload);
    let id = match cur.read_u8() {
        Some(v) => v,
        None => {
            frame.set_error("PE101: Invalid packet length");
            return;
        }
    };
    let label = match nwk_cmd_label(id) {
        Some(l) => l,
        None => {
            frame.set_error("PE201: Unknown NWK command identifier state");
            return;
        }
    };
    frame.set("nwk_cmd_id", render_enum(&hex_prefix(id as u64, 2), label));

    match id {
        0x01 => {
            if let Some(opts) = cur.read_u8() {
                let mto = (opts >> 3) & 0b11;
                let ed = (opts >> 5) & 0b1;
                let mc = (opts >> 6) & 0b1;
                frame.set("nwk_routerequest_mto", render_enum(&bin_prefix(mto as u64, 2), mto_label(mto)));
                frame.set("nwk_routerequest_ed", ed as u64);
                frame.set("nwk_routerequest_mc", mc as u64);
                if let (Some(req_id), Some(dst), Some(cost)) =
                    (cur.read_u8(), cur.read_u16_le(), cur.read_u8())
                {
                    frame.set("nwk_routerequest_id", req_id as u64);
                    frame.set("nwk_routerequest_dstshortaddr", hex_prefix(dst as u64, 4));
                    frame.set("nwk_routerequest_pathcost", cost as u64);
                    if ed == 1 {
                        if let Some(ext) = cur.read_u64_le() {
                            frame.set("nwk_routerequest_dstextendedaddr", hex_prefix(ext, 16));
                        }
                    }
                }
            }
        }
        0x02 => {
            if let Some(opts) = cur.read_u8() {
                let mc = (opts >> 3) & 0b1;
                let er = (opts >> 4) & 0b1;
                let eo = (opts >> 5) & 0b1;
                frame.set("nwk_routereply_mc", mc as u64);
                frame.set("nwk_routereply_er", er as u64);
                frame.set("nwk_routereply_eo", eo as u64);
                if let (Some(req_id), Some(orig), Some(resp), Some(cost)) =
                    (cur.read_u8(), cur.read_u16_le(), cur.read_u16_le(), cur.read_u8())
                {
                    frame.set("nwk_routereply_id", req_id as u64);
                    frame.set("nwk_routereply_origshortaddr", hex_prefix(orig as u64, 4));
                    frame.set("nwk_routereply_respshortaddr", hex_prefix(resp as u64, 4));
                    frame.set("nwk_routereply_pathcost", cost as u64);
                    if eo == 1 {
                        if let Some(ext) = cur.read_u64_le() {
                            frame.set("nwk_routereply_origextendedaddr", hex_prefix(ext, 16));
                        }
                    }
                    if er == 1 {
                        if let Some(ext) = cur.read_u64_le() {
                            frame.set("nwk_routereply_respextendedaddr", hex_prefix(ext, 16));
                        }
                    }
                }
            }
        }
        0x03 => {
            if let (Some(code), Some(dst)) = (cur.read_u8(), cur.read_u16_le()) {
                frame.set("nwk_networkstatus_code", code as u64);
                frame.set("nwk_networkstatus_dstshortaddr", hex_prefix(dst as u64, 4));
            }
        }
        0x04 => {
            if let Some(opts) = cur.read_u8() {
                frame.set("nwk_leave_rejoin", ((opts >> 7) & 0b1) as u64);
                frame.set("nwk_leave_request", ((opts >> 6) & 0b1) as u64);
                frame.set("nwk_leave_rmch", ((opts >> 5) & 0b1) as u64);
            }
        }
        0x05 => {
            if let Some(count) = cur.read_u8() {
                frame.set("nwk_routerecord_relaycount", count as u64);
                if let Some(bytes) = cur.read_bytes(count as usize * 2) {
                    frame.set(
                        "nwk_routerecord_relaylist",
                        bytes
                            .chunks(2)
                            .map(|c| hex_prefix(u16::from_le_bytes([c[0], c[1]]) as u64, 4))
                            .collect::<Vec<_>>()
                            .join(","),
                    );
                }
            }
        }
        0x06 => {
            if let Some(cap) = cur.read_u8() {
                frame.set("nwk_rejoinreq_apc", (cap & 0b1) as u64);
                frame.set("nwk_rejoinreq_devtype", ((cap >> 1) & 0b1) as u64);
                frame.set("nwk_rejoinreq_powsrc", ((cap >> 2) & 0b1) as u64);
                frame.set("nwk_rejoinreq_rxidle", ((cap >> 3) & 0b1) as u64);
                frame.set("nwk_rejoinreq_seccap", ((cap >> 6) & 0b1) as u64);
                frame.set("nwk_rejoinreq_allocaddr", ((cap >> 7) & 0b1) as u64);
            }
        }
        0x07 => {
            if let (Some(addr), Some(status)) = (cur.read_u16_le(), cur.read_u8()) {
                frame.set("nwk_rejoinrsp_shortaddr", hex_prefix(addr as u64, 4));
                frame.set("nwk_rejoinrsp_status", status as u64);
            }
        }
        0x08 => {
            if let Some(opts) = cur.read_u8() {
                let count = opts & 0b0001_1111;
                let first = (opts >> 5) & 0b1;
                let last = (opts >> 6) & 0b1;
                frame.set("nwk_linkstatus_count", count as u64);
                frame.set("nwk_linkstatus_first", first as u64);
                frame.set("nwk_linkstatus_last", last as u64);
                let mut addrs = Vec::new();
                let mut incoming = Vec::new();
                let mut outgoing = Vec::new();
                for _ in 0..count {
                    match (cur.read_u16_le(), cur.read_u8()) {
                        (Some(addr), Some(cost)) => {
                            addrs.push(hex_prefix(addr as u64, 4));
                            incoming.push((cost & 0b111).to_string());
                            outgoing.push(((cost >> 4) & 0b111).to_string());
                        }
                        _ => {
                            frame.set_error("PE101: Invalid packet length");
                            return;
                        }
                    }
                }
                frame.set("nwk_linkstatus_addresses", addrs.join(","));
                frame.set("nwk_linkstatus_incomingcosts", incoming.join(","));
                frame.set("nwk_linkstatus_outgoingcosts", outgoing.join(","));
            }
        }
        0x09 => {
            if let Some(opts) = cur.read_u8() {
                let count = opts & 0b0001_1111;
                let report_type = (opts >> 5) & 0b111;
                frame.set("nwk_networkreport_count", count as u64);
                frame.set("nwk_networkreport_type", report_type as u64);
                if let Some(epid) = cur.read_u64_le() {
                    frame.set("nwk_networkreport_epid", hex_prefix(epid, 16));
                }
                if let Some(info) = cur.read_bytes(count as usize * 2) {
                    frame.set(
                        "nwk_networkreport_info",
                        info.chunks(2)
                            .map(|c| hex_prefix(u16::from_le_bytes([c[0], c[1]]) as u64, 4))
                            .collect::<Vec<_>>()
                            .join(","),
                    );
                }
            }
        }
        0x0a => {
            if let Some(opts) = cur.read_u8() {
                let count = opts & 0b0001_1111;
                let update_type = (opts >> 5) & 0b111;
                frame.set("nwk_networkupdate_count", count as u64);
                frame.set("nwk_networkupdate_type", update_type as u64);
                if let (Some(epid), Some(update_id)) = (cur.read_u64_le(), cur.read_u8()) {
                    frame.set("nwk_networkupdate_epid", hex_prefix(epid, 16));
                    frame.set("nwk_networkupdate_updateid", update_id as u64);
                    if update_type == 0 {
                        if let Some(panid) = cur.read_u16_le() {
                            frame.set("nwk_networkupdate_newpanid", hex_prefix(panid as u64, 4));
                        }
                    }
                }
            }
        }
        0x0b => {
            if let (Some(reqtime), Some(edconf)) = (cur.read_u8(), cur.read_u8()) {
                frame.set("nwk_edtimeoutreq_reqtime", reqtime as u64);
                frame.set("nwk_edtimeoutreq_edconf", edconf as u64);
            }
        }
        0x0c => {
            if let (Some(status), Some(info)) = (cur.read_u8(), cur.read_u8()) {
                frame.set("nwk_edtimeoutrsp_status", status as u64);
                frame.set("nwk_edtimeoutrsp_poll", (info & 0b1) as u64);
                frame.set("nwk_edtimeoutrsp_timeout", ((info >> 1) & 0b1) as u64);
            }
        }
        _ => unreachable!(),
    }
}
