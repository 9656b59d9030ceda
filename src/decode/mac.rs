//! IEEE 802.15.4 MAC layer decoding (spec.md §4.3).

use crc::{Algorithm, Crc};

use super::{bin_prefix, hex_prefix, render_enum, Cursor};
use crate::frame::Frame;

const FCS_CCITT: Algorithm<u16> = Algorithm {
    width: 16,
    poly: 0x1021,
    init: 0x0000,
    refin: true,
    refout: true,
    xorout: 0x0000,
    check: 0x2189,
    residue: 0x0000,
};

fn compute_fcs(bytes: &[u8]) -> u16 {
    Crc::<u16>::new(&FCS_CCITT).checksum(bytes)
}

/// Minimum on-air frame size: 2-byte frame control + 1-byte sequence number
/// + 2-byte FCS.
const MIN_FRAME_LEN: usize = 5;

/// Addressing facts the NWK layer's nonce construction needs when the
/// auxiliary header's extended-nonce flag is clear (spec.md §3).
#[derive(Debug, Default, Clone)]
pub struct MacAddressing {
    pub dst_extended: Option<u64>,
    pub src_extended: Option<u64>,
}

/// Outcome of decoding the MAC layer of one raw frame.
pub struct MacDecoded<'a> {
    pub is_data: bool,
    pub addressing: MacAddressing,
    /// The MAC payload (NWK layer bytes), present only for Data frames that
    /// decoded without error.
    pub payload: &'a [u8],
}

fn addr_mode_label(mode: u8) -> Option<&'static str> {
    match mode {
        0b00 => Some("None"),
        0b10 => Some("Short (16-bit) Addressing"),
        0b11 => Some("Extended (64-bit) Addressing"),
        _ => None,
    }
}

fn frame_type_label(t: u8) -> &'static str {
    match t {
        0b000 => "MAC Beacon",
        0b001 => "MAC Data",
        0b010 => "MAC Acknowledgment",
        0b011 => "MAC Command",
        _ => "Reserved",
    }
}

fn frame_version_label(v: u8) -> &'static str {
    match v {
        0b00 => "IEEE 802.15.4-2003",
        0b01 => "IEEE 802.15.4-2006",
        0b10 => "IEEE 802.15.4e-2012",
        _ => "Reserved",
    }
}

/// Decodes the MAC layer. Returns `None` when a terminal error was recorded
/// on `frame`; otherwise returns enough context for the NWK layer to
/// continue.
pub fn decode_mac<'a>(raw: &'a [u8], frame: &mut Frame) -> Option<MacDecoded<'a>> {
    frame.set("phy_length", raw.len() as u64);
    frame.set("phy_payload", hex::encode(raw));
    frame.set(
        "mac_show",
        raw.iter().map(|b| format!("{:02x}", b)).collect::<Vec<_>>().join(" "),
    );

    if raw.len() < MIN_FRAME_LEN {
        frame.set_error("PE101: Invalid packet length");
        return None;
    }

    let body = &raw[..raw.len() - 2];
    let fcs_bytes = [raw[raw.len() - 2], raw[raw.len() - 1]];
    let on_wire_fcs = u16::from_le_bytes(fcs_bytes);
    frame.set("mac_fcs", hex_prefix(on_wire_fcs as u64, 4));

    if compute_fcs(body) != on_wire_fcs {
        frame.set_error("PE202: Incorrect frame check sequence (FCS)");
        return None;
    }

    let mut cur = Cursor::new(body);
    let fcf = cur.read_u16_le()?;

    let frame_type = (fcf & 0b111) as u8;
    let security = ((fcf >> 3) & 0b1) as u8;
    let frame_pending = ((fcf >> 4) & 0b1) as u8;
    let ack_request = ((fcf >> 5) & 0b1) as u8;
    let panid_compression = ((fcf >> 6) & 0b1) as u8;
    let dst_addr_mode = ((fcf >> 10) & 0b11) as u8;
    let frame_version = ((fcf >> 12) & 0b11) as u8;
    let src_addr_mode = ((fcf >> 14) & 0b11) as u8;

    frame.set("mac_frametype", render_enum(&bin_prefix(frame_type as u64, 3), frame_type_label(frame_type)));
    frame.set("mac_security", security as u64);
    frame.set("mac_framepending", frame_pending as u64);
    frame.set("mac_ackreq", ack_request as u64);
    frame.set("mac_panidcomp", panid_compression as u64);

    let dst_label = match addr_mode_label(dst_addr_mode) {
        Some(l) => l,
        None => {
            frame.set_error("PE201: Unknown MAC destination addressing mode state");
            return None;
        }
    };
    frame.set("mac_dstaddrmode", render_enum(&bin_prefix(dst_addr_mode as u64, 2), dst_label));
    frame.set("mac_frameversion", render_enum(&bin_prefix(frame_version as u64, 2), frame_version_label(frame_version)));

    let src_label = match addr_mode_label(src_addr_mode) {
        Some(l) => l,
        None => {
            frame.set_error("PE201: Unknown MAC source addressing mode state");
            return None;
        }
    };
    frame.set("mac_srcaddrmode", render_enum(&bin_prefix(src_addr_mode as u64, 2), src_label));

    let seqnum = match cur.read_u8() {
        Some(v) => v,
        None => {
            frame.set_error("PE101: Invalid packet length");
            return None;
        }
    };
    frame.set("mac_seqnum", seqnum as u64);

    let mut addressing = MacAddressing::default();

    let mut dst_panid: Option<u16> = None;
    if dst_addr_mode != 0 {
        let panid = match cur.read_u16_le() {
            Some(v) => v,
            None => {
                frame.set_error("PE101: Invalid packet length");
                return None;
            }
        };
        dst_panid = Some(panid);
        frame.set("mac_dstpanid", hex_prefix(panid as u64, 4));
        match dst_addr_mode {
            0b10 => {
                let a = match cur.read_u16_le() {
                    Some(v) => v,
                    None => {
                        frame.set_error("PE101: Invalid packet length");
                        return None;
                    }
                };
                frame.set("mac_dstshortaddr", hex_prefix(a as u64, 4));
            }
            0b11 => {
                let a = match cur.read_u64_le() {
                    Some(v) => v,
                    None => {
                        frame.set_error("PE101: Invalid packet length");
                        return None;
                    }
                };
                frame.set("mac_dstextendedaddr", hex_prefix(a, 16));
                addressing.dst_extended = Some(a);
            }
            _ => unreachable!(),
        }
    }

    if src_addr_mode != 0 {
        let src_panid = if panid_compression == 1 && dst_addr_mode != 0 {
            dst_panid
        } else {
            let panid = match cur.read_u16_le() {
                Some(v) => v,
                None => {
                    frame.set_error("PE101: Invalid packet length");
                    return None;
                }
            };
            Some(panid)
        };
        if let Some(panid) = src_panid {
            frame.set("mac_srcpanid", hex_prefix(panid as u64, 4));
        }
        match src_addr_mode {
            0b10 => {
                let a = match cur.read_u16_le() {
                    Some(v) => v,
                    None => {
                        frame.set_error("PE101: Invalid packet length");
                        return None;
                    }
                };
                frame.set("mac_srcshortaddr", hex_prefix(a as u64, 4));
            }
            0b11 => {
                let a = match cur.read_u64_le() {
                    Some(v) => v,
                    None => {
                        frame.set_error("PE101: Invalid packet length");
                        return None;
                    }
                };
                frame.set("mac_srcextendedaddr", hex_prefix(a, 16));
                addressing.src_extended = Some(a);
            }
            _ => unreachable!(),
        }
    }

    match frame_type {
        0b011 => decode_command(&mut cur, frame),
        0b000 => decode_beacon(&mut cur, frame),
        _ => {}
    }

    if frame.error_msg().is_some() {
        return None;
    }

    Some(MacDecoded {
        is_data: frame_type == 0b001,
        addressing,
        payload: cur.rest(),
    })
}

fn mac_cmd_label(id: u8) -> Option<&'static str> {
    match id {
        0x01 => Some("MAC Association Request"),
        0x02 => Some("MAC Association Response"),
        0x03 => Some("MAC Disassociation Notification"),
        0x04 => Some("MAC Data Request"),
        0x05 => Some("MAC PAN ID Conflict Notification"),
        0x06 => Some("MAC Orphan Notification"),
        0x07 => Some("MAC Beacon Request"),
        0x08 => Some("MAC Coordinator Realignment"),
        0x09 => Some("MAC GTS Request"),
        _ => None,
    }
}

fn decode_command(cur: &mut Cursor, frame: &mut Frame) {
    frame.set("mac_cmd_payloadlength", cur.remaining() as u64);
    let id = match cur.read_u8() {
        Some(v) => v,
        None => {
            frame.set_error("PE101: Invalid packet length");
            return;
        }
    };
    let label = match mac_cmd_label(id) {
        Some(l) => l,
        None => {
            frame.set_error("PE201: Unknown MAC command identifier state");
            return;
        }
    };
    frame.set("mac_cmd_id", render_enum(&hex_prefix(id as u64, 2), label));

    match id {
        0x01 => {
            if let Some(cap) = cur.read_u8() {
                frame.set("mac_assocreq_apc", (cap & 0b1) as u64);
                frame.set("mac_assocreq_devtype", ((cap >> 1) & 0b1) as u64);
                frame.set("mac_assocreq_powsrc", ((cap >> 2) & 0b1) as u64);
                frame.set("mac_assocreq_rxidle", ((cap >> 3) & 0b1) as u64);
                frame.set("mac_assocreq_seccap", ((cap >> 6) & 0b1) as u64);
                frame.set("mac_assocreq_allocaddr", ((cap >> 7) & 0b1) as u64);
            }
        }
        0x02 => {
            if let (Some(addr), Some(status)) = (cur.read_u16_le(), cur.read_u8()) {
                frame.set("mac_assocrsp_shortaddr", hex_prefix(addr as u64, 4));
                let label = match status {
                    0x00 => "Association Successful",
                    0x01 => "PAN at Capacity",
                    0x02 => "PAN Access Denied",
                    _ => "Reserved",
                };
                frame.set("mac_assocrsp_status", render_enum(&hex_prefix(status as u64, 2), label));
            }
        }
        0x03 => {
            if let Some(reason) = cur.read_u8() {
                let label = match reason {
                    0x01 => "Coordinator wishes device to leave",
                    0x02 => "Device wishes to leave",
                    _ => "Reserved",
                };
                frame.set("mac_disassoc_reason", render_enum(&hex_prefix(reason as u64, 2), label));
            }
        }
        0x08 => {
            if let (Some(panid), Some(coordaddr), Some(channel)) =
                (cur.read_u16_le(), cur.read_u16_le(), cur.read_u8())
            {
                frame.set("mac_realign_panid", hex_prefix(panid as u64, 4));
                frame.set("mac_realign_coordaddr", hex_prefix(coordaddr as u64, 4));
                frame.set("mac_realign_channel", channel as u64);
                if let Some(shortaddr) = cur.read_u16_le() {
                    frame.set("mac_realign_shortaddr", hex_prefix(shortaddr as u64, 4));
                }
                if let Some(page) = cur.read_u8() {
                    frame.set("mac_realign_page", page as u64);
                }
            }
        }
        0x09 => {
            if let Some(characteristics) = cur.read_u8() {
                frame.set("mac_gtsreq_length", (characteristics & 0b1111) as u64);
                frame.set("mac_gtsreq_dir", ((characteristics >> 4) & 0b1) as u64);
                frame.set("mac_gtsreq_chartype", ((characteristics >> 5) & 0b1) as u64);
            }
        }
        // Data Request, PAN ID Conflict, Orphan, Beacon Request carry no
        // command-specific payload.
        _ => {}
    }
}

fn decode_beacon(cur: &mut Cursor, frame: &mut Frame) {
    let superframe = match cur.read_u16_le() {
        Some(v) => v,
        None => {
            frame.set_error("PE101: Invalid packet length");
            return;
        }
    };
    frame.set("mac_beacon_beaconorder", (superframe & 0b1111) as u64);
    frame.set("mac_beacon_sforder", ((superframe >> 4) & 0b1111) as u64);
    frame.set("mac_beacon_finalcap", ((superframe >> 8) & 0b1111) as u64);
    frame.set("mac_beacon_ble", ((superframe >> 12) & 0b1) as u64);
    frame.set("mac_beacon_pancoord", ((superframe >> 14) & 0b1) as u64);
    frame.set("mac_beacon_assocpermit", ((superframe >> 15) & 0b1) as u64);

    let gts = match cur.read_u8() {
        Some(v) => v,
        None => {
            frame.set_error("PE101: Invalid packet length");
            return;
        }
    };
    let gts_count = gts & 0b111;
    frame.set("mac_beacon_gtsnum", gts_count as u64);
    frame.set("mac_beacon_gtspermit", ((gts >> 7) & 0b1) as u64);
    if gts_count > 0 {
        let mask = match cur.read_u8() {
            Some(v) => v,
            None => {
                frame.set_error("PE101: Invalid packet length");
                return;
            }
        };
        frame.set("mac_beacon_gtsmask", hex_prefix(mask as u64, 2));
        // Each GTS descriptor is a short address (2) + timing slot (2).
        if cur.read_bytes(gts_count as usize * 4).is_none() {
            frame.set_error("PE101: Invalid packet length");
            return;
        }
    }

    let pending = match cur.read_u8() {
        Some(v) => v,
        None => {
            frame.set_error("PE101: Invalid packet length");
            return;
        }
    };
    let nsap = pending & 0b111;
    let neap = (pending >> 4) & 0b111;
    frame.set("mac_beacon_nsap", nsap as u64);
    frame.set("mac_beacon_neap", neap as u64);
    if nsap > 0 {
        let addrs = match cur.read_bytes(nsap as usize * 2) {
            Some(v) => v,
            None => {
                frame.set_error("PE101: Invalid packet length");
                return;
            }
        };
        frame.set(
            "mac_beacon_shortaddresses",
            addrs
                .chunks(2)
                .map(|c| hex_prefix(u16::from_le_bytes([c[0], c[1]]) as u64, 4))
                .collect::<Vec<_>>()
                .join(","),
        );
    }
    if neap > 0 {
        let addrs = match cur.read_bytes(neap as usize * 8) {
            Some(v) => v,
            None => {
                frame.set_error("PE101: Invalid packet length");
                return;
            }
        };
        frame.set(
            "mac_beacon_extendedaddresses",
            addrs
                .chunks(8)
                .map(|c| {
                    let mut buf = [0u8; 8];
                    buf.copy_from_slice(c);
                    hex_prefix(u64::from_le_bytes(buf), 16)
                })
                .collect::<Vec<_>>()
                .join(","),
        );
    }

    decode_zigbee_beacon_payload(cur, frame);
}

/// The Zigbee beacon payload trailing the MAC superframe fields.
fn decode_zigbee_beacon_payload(cur: &mut Cursor, frame: &mut Frame) {
    if cur.remaining() < 15 {
        // Not every 802.15.4 beacon carries a Zigbee payload; absence is not
        // an error at this layer.
        return;
    }
    let protocol_id = cur.read_u8().unwrap();
    let stack = cur.read_u16_le().unwrap();
    frame.set("nwk_beacon_protocolid", protocol_id as u64);
    frame.set("nwk_beacon_stackprofile", (stack & 0b1111) as u64);
    frame.set("nwk_beacon_protocolversion", ((stack >> 4) & 0b1111) as u64);
    frame.set("nwk_beacon_routercap", ((stack >> 10) & 0b1) as u64);
    frame.set("nwk_beacon_devdepth", ((stack >> 11) & 0b1111) as u64);
    frame.set("nwk_beacon_edcap", ((stack >> 15) & 0b1) as u64);

    if let Some(epid) = cur.read_u64_le() {
        frame.set("nwk_beacon_epid", hex_prefix(epid, 16));
    }
    if let (Some(txoffset_lo), Some(txoffset_hi)) = (cur.read_u16_le(), cur.read_u8()) {
        let txoffset = (txoffset_lo as u32) | ((txoffset_hi as u32) << 16);
        frame.set("nwk_beacon_txoffset", txoffset as u64);
    }
    if let Some(update_id) = cur.read_u8() {
        frame.set("nwk_beacon_updateid", update_id as u64);
    }
}
