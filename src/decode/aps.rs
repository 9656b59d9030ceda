//! Zigbee APS layer decoding (spec.md §4.3), present inside decrypted NWK
//! payloads.

use super::nwk::{parse_aux_header, AuxHeader};
use super::{bin_prefix, hex_prefix, render_enum, Cursor};
use crate::frame::Frame;

fn frame_type_label(t: u8) -> &'static str {
    match t {
        0 => "APS Data",
        1 => "APS Command",
        2 => "APS Acknowledgment",
        3 => "APS Inter-PAN",
        _ => unreachable!(),
    }
}

fn delivery_mode_label(m: u8) -> &'static str {
    match m {
        0b00 => "Unicast",
        0b01 => "Reserved",
        0b10 => "Broadcast",
        0b11 => "Group Addressing",
        _ => unreachable!(),
    }
}

fn fragmentation_label(f: u8) -> Option<&'static str> {
    match f {
        0b00 => Some("None"),
        0b01 => Some("First Fragment"),
        0b10 => Some("Continued Fragment"),
        _ => None,
    }
}

pub struct ApsDecoded<'a> {
    pub is_command: bool,
    pub aux: Option<AuxHeader>,
    pub aad: &'a [u8],
    /// The ciphertext+MIC (if security enabled) or cleartext command/data
    /// payload otherwise.
    pub payload: &'a [u8],
}

/// Decodes the APS frame control byte and, for Data/Ack/Command frame
/// types, the fixed addressing header that follows it. Inter-PAN frames
/// are out of scope (spec.md §1) and are recorded with only their frame
/// control fields.
pub fn decode_aps<'a>(raw: &'a [u8], frame: &mut Frame) -> Option<ApsDecoded<'a>> {
    let mut cur = Cursor::new(raw);
    let fcf = match cur.read_u8() {
        Some(v) => v,
        None => {
            frame.set_error("PE101: Invalid packet length");
            return None;
        }
    };

    let frame_type = fcf & 0b11;
    let delivery_mode = (fcf >> 2) & 0b11;
    let ack_format = (fcf >> 4) & 0b1;
    let security = (fcf >> 5) & 0b1;
    let ack_request = (fcf >> 6) & 0b1;
    let extended_header = (fcf >> 7) & 0b1;

    frame.set("aps_frametype", render_enum(&bin_prefix(frame_type as u64, 2), frame_type_label(frame_type)));
    frame.set("aps_delmode", render_enum(&bin_prefix(delivery_mode as u64, 2), delivery_mode_label(delivery_mode)));
    frame.set("aps_ackformat", ack_format as u64);
    frame.set("aps_security", security as u64);
    frame.set("aps_ackreq", ack_request as u64);
    frame.set("aps_exthdr", extended_header as u64);

    if frame_type == 3 {
        // Inter-PAN: no further header fields are in scope.
        return Some(ApsDecoded {
            is_command: false,
            aux: None,
            aad: &raw[..cur.pos()],
            payload: cur.rest(),
        });
    }

    if frame_type != 1 {
        // Data or Ack frames carry endpoint/cluster/profile addressing.
        if delivery_mode == 0b11 {
            if let Some(group) = cur.read_u16_le() {
                frame.set("aps_groupaddr", hex_prefix(group as u64, 4));
            }
        } else if let Some(ep) = cur.read_u8() {
            frame.set("aps_dstendpoint", ep as u64);
        }
        if let (Some(cluster), Some(profile), Some(srcep)) =
            (cur.read_u16_le(), cur.read_u16_le(), cur.read_u8())
        {
            frame.set("aps_cluster_id", hex_prefix(cluster as u64, 4));
            frame.set("aps_profile_id", hex_prefix(profile as u64, 4));
            frame.set("aps_srcendpoint", srcep as u64);
        }
    }

    let counter = match cur.read_u8() {
        Some(v) => v,
        None => {
            frame.set_error("PE101: Invalid packet length");
            return None;
        }
    };
    frame.set("aps_counter", counter as u64);

    if extended_header == 1 {
        let ext = match cur.read_u8() {
            Some(v) => v,
            None => {
                frame.set_error("PE101: Invalid packet length");
                return None;
            }
        };
        let fragmentation = ext & 0b11;
        let label = match fragmentation_label(fragmentation) {
            Some(l) => l,
            None => {
                frame.set_error("PE201: Unknown APS fragmentation state");
                return None;
            }
        };
        frame.set("aps_fragmentation", render_enum(&bin_prefix(fragmentation as u64, 2), label));
        if fragmentation != 0 {
            if let Some(block) = cur.read_u8() {
                frame.set("aps_blocknumber", block as u64);
            }
            if frame_type == 2 {
                if let Some(bitfield) = cur.read_u8() {
                    frame.set("aps_ackbitfield", hex_prefix(bitfield as u64, 2));
                }
            }
        }
    }

    if security == 1 {
        let aux = match parse_aux_header(&mut cur, frame, "aps_aux_") {
            Some(a) => a,
            None => {
                frame.set_error("PE101: Invalid packet length");
                return None;
            }
        };
        let aad = &raw[..cur.pos()];
        return Some(ApsDecoded {
            is_command: frame_type == 1,
            aux: Some(aux),
            aad,
            payload: cur.rest(),
        });
    }

    Some(ApsDecoded {
        is_command: frame_type == 1,
        aux: None,
        aad: &raw[..0],
        payload: cur.rest(),
    })
}

/// Decodes the ZDP/ZCL header sitting directly atop an APS Data frame
/// (SPEC_FULL.md "DATA MODEL"). ZDP frames (profile id `0x0000`) carry only
/// a transaction sequence number; anything else is treated as a general
/// ZCL frame (cluster-specific payload interpretation is out of scope,
/// spec.md Non-goals).
pub fn decode_zdp_zcl(payload: &[u8], frame: &mut Frame) {
    let mut cur = Cursor::new(payload);
    if frame.get_text("aps_profile_id") == Some("0x0000") {
        if let Some(seq) = cur.read_u8() {
            frame.set("zdp_seqnum", seq as u64);
        }
        return;
    }

    let fcf = match cur.read_u8() {
        Some(v) => v,
        None => return,
    };
    let frame_type = fcf & 0b11;
    let manuf_specific = (fcf >> 2) & 0b1;
    let direction = (fcf >> 3) & 0b1;
    let disable_default_rsp = (fcf >> 4) & 0b1;
    frame.set("zcl_frametype", frame_type as u64);
    frame.set("zcl_manufspecific", manuf_specific as u64);
    frame.set("zcl_direction", direction as u64);
    frame.set("zcl_disdefrsp", disable_default_rsp as u64);

    if manuf_specific == 1 {
        if let Some(code) = cur.read_u16_le() {
            frame.set("zcl_manufcode", hex_prefix(code as u64, 4));
        }
    }
    if let (Some(seq), Some(cmd)) = (cur.read_u8(), cur.read_u8()) {
        frame.set("zcl_seqnum", seq as u64);
        frame.set("zcl_cmd_id", cmd as u64);
    }
}

fn aps_cmd_label(id: u8) -> Option<&'static str> {
    match id {
        0x05 => Some("APS Transport Key"),
        0x06 => Some("APS Update Device"),
        0x07 => Some("APS Remove Device"),
        0x08 => Some("APS Request Key"),
        0x09 => Some("APS Switch Key"),
        0x0e => Some("APS Tunnel"),
        0x0f => Some("APS Verify Key"),
        0x10 => Some("APS Confirm Key"),
        _ => None,
    }
}

fn stdkeytype_label(t: u8) -> Option<&'static str> {
    match t {
        0x00 => Some("Trust Center Master Key"),
        0x01 => Some("Standard Network Key"),
        0x02 => Some("Application Link Key"),
        0x03 => Some("Trust Center Link Key"),
        0x04 => Some("High-Security Network Key"),
        _ => None,
    }
}

/// Decodes an APS command frame body (after the 1-byte command id).
///
/// `potential_keys` governs whether Data/Key-Transport/Key-Load transport-key
/// types are treated as decrypt-worthy — the open question flagged in
/// spec.md §9.
pub fn decode_aps_command(payload: &[u8], frame: &mut Frame) {
    let mut cur = Cursor::new(payload);
    let id = match cur.read_u8() {
        Some(v) => v,
        None => {
            frame.set_error("PE101: Invalid packet length");
            return;
        }
    };
    let label = match aps_cmd_label(id) {
        Some(l) => l,
        None => {
            frame.set_error("PE201: Unknown APS command identifier state");
            return;
        }
    };
    frame.set("aps_cmd_id", render_enum(&hex_prefix(id as u64, 2), label));

    match id {
        0x05 => {
            let keytype = match cur.read_u8() {
                Some(v) => v,
                None => {
                    frame.set_error("PE101: Invalid packet length");
                    return;
                }
            };
            let label = match stdkeytype_label(keytype) {
                Some(l) => l,
                None => {
                    frame.set_error("PE201: Unknown APS transport-key type state");
                    return;
                }
            };
            frame.set("aps_transportkey_stdkeytype", render_enum(&hex_prefix(keytype as u64, 2), label));
            let key = match cur.read_bytes(16) {
                Some(v) => v,
                None => {
                    frame.set_error("PE101: Invalid packet length");
                    return;
                }
            };
            frame.set("aps_transportkey_key", hex::encode(key));
            match keytype {
                0x01 | 0x04 => {
                    if let (Some(seq), Some(dst), Some(src)) =
                        (cur.read_u8(), cur.read_u64_le(), cur.read_u64_le())
                    {
                        frame.set("aps_transportkey_keyseqnum", seq as u64);
                        frame.set("aps_transportkey_dstextendedaddr", hex_prefix(dst, 16));
                        frame.set("aps_transportkey_srcextendedaddr", hex_prefix(src, 16));
                    }
                }
                0x03 => {
                    if let (Some(dst), Some(src)) = (cur.read_u64_le(), cur.read_u64_le()) {
                        frame.set("aps_transportkey_dstextendedaddr", hex_prefix(dst, 16));
                        frame.set("aps_transportkey_srcextendedaddr", hex_prefix(src, 16));
                    }
                }
                0x02 => {
                    if let (Some(prt), Some(init)) = (cur.read_u64_le(), cur.read_u8()) {
                        frame.set("aps_transportkey_prtextendedaddr", hex_prefix(prt, 16));
                        frame.set("aps_transportkey_initflag", init as u64);
                    }
                }
                _ => {}
            }
        }
        0x06 => {
            if let (Some(ext), Some(short), Some(status)) =
                (cur.read_u64_le(), cur.read_u16_le(), cur.read_u8())
            {
                frame.set("aps_updatedevice_extendedaddr", hex_prefix(ext, 16));
                frame.set("aps_updatedevice_shortaddr", hex_prefix(short as u64, 4));
                frame.set("aps_updatedevice_status", status as u64);
            }
        }
        0x07 => {
            if let Some(ext) = cur.read_u64_le() {
                frame.set("aps_removedevice_extendedaddr", hex_prefix(ext, 16));
            }
        }
        0x08 => {
            if let Some(reqtype) = cur.read_u8() {
                frame.set("aps_requestkey_reqkeytype", reqtype as u64);
                if reqtype == 0x02 {
                    if let Some(prt) = cur.read_u64_le() {
                        frame.set("aps_requestkey_prtextendedaddr", hex_prefix(prt, 16));
                    }
                }
            }
        }
        0x09 => {
            if let Some(seq) = cur.read_u8() {
                frame.set("aps_switchkey_keyseqnum", seq as u64);
            }
        }
        0x0e => {
            if let (Some(ext), Some(inner_fcf)) = (cur.read_u64_le(), cur.read_u8()) {
                frame.set("aps_tunnel_dstextendedaddr", hex_prefix(ext, 16));
                let frame_type = inner_fcf & 0b11;
                let delivery_mode = (inner_fcf >> 2) & 0b11;
                frame.set(
                    "aps_tunnel_frametype",
                    render_enum(&bin_prefix(frame_type as u64, 2), frame_type_label(frame_type)),
                );
                frame.set(
                    "aps_tunnel_delmode",
                    render_enum(&bin_prefix(delivery_mode as u64, 2), delivery_mode_label(delivery_mode)),
                );
                frame.set("aps_tunnel_ackformat", ((inner_fcf >> 4) & 0b1) as u64);
                frame.set("aps_tunnel_security", ((inner_fcf >> 5) & 0b1) as u64);
                frame.set("aps_tunnel_ackreq", ((inner_fcf >> 6) & 0b1) as u64);
                frame.set("aps_tunnel_exthdr", ((inner_fcf >> 7) & 0b1) as u64);
                if let Some(counter) = cur.read_u8() {
                    frame.set("aps_tunnel_counter", counter as u64);
                }
            }
        }
        0x0f => {
            if let (Some(keytype), Some(ext), Some(hash)) =
                (cur.read_u8(), cur.read_u64_le(), cur.read_bytes(16))
            {
                frame.set("aps_verifykey_stdkeytype", keytype as u64);
                frame.set("aps_verifykey_extendedaddr", hex_prefix(ext, 16));
                frame.set("aps_verifykey_keyhash", hex::encode(hash));
            }
        }
        0x10 => {
            if let (Some(status), Some(keytype), Some(ext)) =
                (cur.read_u8(), cur.read_u8(), cur.read_u64_le())
            {
                frame.set("aps_confirmkey_status", status as u64);
                frame.set("aps_confirmkey_stdkeytype", keytype as u64);
                frame.set("aps_confirmkey_extendedaddr", hex_prefix(ext, 16));
            }
        }
        _ => unreachable!(),
    }
}
