//! The decoded record produced for every captured frame.
//!
//! This replaces the original tool's module-level "current entry" dictionary
//! (see DESIGN.md) with an explicit value threaded through every decoder.
//! `Frame` is append-only: once a column is set it is never retracted, and
//! once `error_msg` is set no decoder may add further columns.

use std::collections::HashMap;
use std::fmt;

/// One value stored under a `Frame` column.
///
/// The on-air fields of a Zigbee/IEEE 802.15.4 packet all reduce to one of
/// these four shapes (see spec.md §3): a small unsigned integer, a fixed
/// width hex string (address or key material), a timestamp, or a
/// human-readable enum render such as `"0b010: MAC Acknowledgment"`.
#[derive(Clone, Debug, PartialEq)]
pub enum FieldValue {
    UInt(u64),
    Float(f64),
    Text(String),
}

impl FieldValue {
    pub fn as_text(&self) -> String {
        match self {
            FieldValue::UInt(v) => v.to_string(),
            FieldValue::Float(v) => v.to_string(),
            FieldValue::Text(v) => v.clone(),
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            FieldValue::UInt(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::Text(v) => Some(v.as_str()),
            _ => None,
        }
    }
}

impl From<u8> for FieldValue {
    fn from(v: u8) -> Self {
        FieldValue::UInt(v as u64)
    }
}
impl From<u16> for FieldValue {
    fn from(v: u16) -> Self {
        FieldValue::UInt(v as u64)
    }
}
impl From<u32> for FieldValue {
    fn from(v: u32) -> Self {
        FieldValue::UInt(v as u64)
    }
}
impl From<u64> for FieldValue {
    fn from(v: u64) -> Self {
        FieldValue::UInt(v)
    }
}
impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        FieldValue::Float(v)
    }
}
impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        FieldValue::Text(v)
    }
}
impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        FieldValue::Text(v.to_owned())
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_text())
    }
}

/// The full, pinned column order for the `packets` table and for every
/// derived TSV export. Order is part of the external contract (spec.md §6).
pub const PACKET_COLUMNS: &[&str] = &[
    "pcap_directory",
    "pcap_filename",
    "pkt_num",
    "pkt_time",
    "sll_pkttype",
    "sll_arphrdtype",
    "sll_addrlength",
    "sll_addr",
    "sll_protocoltype",
    "phy_length",
    "phy_payload",
    "mac_show",
    "mac_fcs",
    "mac_frametype",
    "mac_security",
    "mac_framepending",
    "mac_ackreq",
    "mac_panidcomp",
    "mac_dstaddrmode",
    "mac_frameversion",
    "mac_srcaddrmode",
    "mac_seqnum",
    "mac_dstpanid",
    "mac_dstshortaddr",
    "mac_dstextendedaddr",
    "mac_srcpanid",
    "mac_srcshortaddr",
    "mac_srcextendedaddr",
    "mac_cmd_id",
    "mac_cmd_payloadlength",
    "mac_assocreq_apc",
    "mac_assocreq_devtype",
    "mac_assocreq_powsrc",
    "mac_assocreq_rxidle",
    "mac_assocreq_seccap",
    "mac_assocreq_allocaddr",
    "mac_assocrsp_shortaddr",
    "mac_assocrsp_status",
    "mac_disassoc_reason",
    "mac_realign_panid",
    "mac_realign_coordaddr",
    "mac_realign_channel",
    "mac_realign_shortaddr",
    "mac_realign_page",
    "mac_gtsreq_length",
    "mac_gtsreq_dir",
    "mac_gtsreq_chartype",
    "mac_beacon_beaconorder",
    "mac_beacon_sforder",
    "mac_beacon_finalcap",
    "mac_beacon_ble",
    "mac_beacon_pancoord",
    "mac_beacon_assocpermit",
    "mac_beacon_gtsnum",
    "mac_beacon_gtspermit",
    "mac_beacon_gtsmask",
    "mac_beacon_nsap",
    "mac_beacon_neap",
    "mac_beacon_shortaddresses",
    "mac_beacon_extendedaddresses",
    "nwk_beacon_protocolid",
    "nwk_beacon_stackprofile",
    "nwk_beacon_protocolversion",
    "nwk_beacon_routercap",
    "nwk_beacon_devdepth",
    "nwk_beacon_edcap",
    "nwk_beacon_epid",
    "nwk_beacon_txoffset",
    "nwk_beacon_updateid",
    "nwk_frametype",
    "nwk_protocolversion",
    "nwk_discroute",
    "nwk_multicast",
    "nwk_security",
    "nwk_srcroute",
    "nwk_extendeddst",
    "nwk_extendedsrc",
    "nwk_edinitiator",
    "nwk_dstshortaddr",
    "nwk_srcshortaddr",
    "nwk_radius",
    "nwk_seqnum",
    "nwk_dstextendedaddr",
    "nwk_srcextendedaddr",
    "nwk_srcroute_relaycount",
    "nwk_srcroute_relayindex",
    "nwk_srcroute_relaylist",
    "nwk_aux_seclevel",
    "nwk_aux_keytype",
    "nwk_aux_extnonce",
    "nwk_aux_framecounter",
    "nwk_aux_srcaddr",
    "nwk_aux_keyseqnum",
    "nwk_aux_deckey",
    "nwk_aux_decsrc",
    "nwk_aux_decpayload",
    "nwk_aux_decshow",
    "nwk_cmd_id",
    "nwk_cmd_payloadlength",
    "nwk_routerequest_mto",
    "nwk_routerequest_ed",
    "nwk_routerequest_mc",
    "nwk_routerequest_id",
    "nwk_routerequest_dstshortaddr",
    "nwk_routerequest_pathcost",
    "nwk_routerequest_dstextendedaddr",
    "nwk_routereply_eo",
    "nwk_routereply_er",
    "nwk_routereply_mc",
    "nwk_routereply_id",
    "nwk_routereply_origshortaddr",
    "nwk_routereply_respshortaddr",
    "nwk_routereply_pathcost",
    "nwk_routereply_origextendedaddr",
    "nwk_routereply_respextendedaddr",
    "nwk_networkstatus_code",
    "nwk_networkstatus_dstshortaddr",
    "nwk_leave_rejoin",
    "nwk_leave_request",
    "nwk_leave_rmch",
    "nwk_routerecord_relaycount",
    "nwk_routerecord_relaylist",
    "nwk_rejoinreq_apc",
    "nwk_rejoinreq_devtype",
    "nwk_rejoinreq_powsrc",
    "nwk_rejoinreq_rxidle",
    "nwk_rejoinreq_seccap",
    "nwk_rejoinreq_allocaddr",
    "nwk_rejoinrsp_shortaddr",
    "nwk_rejoinrsp_status",
    "nwk_linkstatus_count",
    "nwk_linkstatus_first",
    "nwk_linkstatus_last",
    "nwk_linkstatus_addresses",
    "nwk_linkstatus_incomingcosts",
    "nwk_linkstatus_outgoingcosts",
    "nwk_networkreport_count",
    "nwk_networkreport_type",
    "nwk_networkreport_epid",
    "nwk_networkreport_info",
    "nwk_networkupdate_count",
    "nwk_networkupdate_type",
    "nwk_networkupdate_epid",
    "nwk_networkupdate_updateid",
    "nwk_networkupdate_newpanid",
    "nwk_edtimeoutreq_reqtime",
    "nwk_edtimeoutreq_edconf",
    "nwk_edtimeoutrsp_status",
    "nwk_edtimeoutrsp_poll",
    "nwk_edtimeoutrsp_timeout",
    "aps_frametype",
    "aps_delmode",
    "aps_ackformat",
    "aps_security",
    "aps_ackreq",
    "aps_exthdr",
    "aps_dstendpoint",
    "aps_groupaddr",
    "aps_cluster_id",
    "aps_profile_id",
    "aps_srcendpoint",
    "aps_counter",
    "aps_fragmentation",
    "aps_blocknumber",
    "aps_ackbitfield",
    "aps_aux_seclevel",
    "aps_aux_keytype",
    "aps_aux_extnonce",
    "aps_aux_framecounter",
    "aps_aux_srcaddr",
    "aps_aux_keyseqnum",
    "aps_aux_deckey",
    "aps_aux_decsrc",
    "aps_aux_decpayload",
    "aps_aux_decshow",
    "aps_cmd_id",
    "aps_transportkey_stdkeytype",
    "aps_transportkey_key",
    "aps_transportkey_keyseqnum",
    "aps_transportkey_dstextendedaddr",
    "aps_transportkey_srcextendedaddr",
    "aps_transportkey_prtextendedaddr",
    "aps_transportkey_initflag",
    "aps_updatedevice_extendedaddr",
    "aps_updatedevice_shortaddr",
    "aps_updatedevice_status",
    "aps_removedevice_extendedaddr",
    "aps_requestkey_reqkeytype",
    "aps_requestkey_prtextendedaddr",
    "aps_switchkey_keyseqnum",
    "aps_tunnel_dstextendedaddr",
    "aps_tunnel_frametype",
    "aps_tunnel_delmode",
    "aps_tunnel_ackformat",
    "aps_tunnel_security",
    "aps_tunnel_ackreq",
    "aps_tunnel_exthdr",
    "aps_tunnel_counter",
    "aps_verifykey_stdkeytype",
    "aps_verifykey_extendedaddr",
    "aps_verifykey_keyhash",
    "aps_confirmkey_status",
    "aps_confirmkey_stdkeytype",
    "aps_confirmkey_extendedaddr",
    "zdp_seqnum",
    "zcl_frametype",
    "zcl_manufspecific",
    "zcl_direction",
    "zcl_disdefrsp",
    "zcl_manufcode",
    "zcl_seqnum",
    "zcl_cmd_id",
    "der_same_macnwkdst",
    "der_same_macnwksrc",
    "der_tx_type",
    "der_mac_dsttype",
    "der_mac_srctype",
    "der_nwk_dsttype",
    "der_nwk_srctype",
    "der_mac_dstpanid",
    "der_mac_dstshortaddr",
    "der_mac_dstextendedaddr",
    "der_mac_srcpanid",
    "der_mac_srcshortaddr",
    "der_mac_srcextendedaddr",
    "der_nwk_dstpanid",
    "der_nwk_dstshortaddr",
    "der_nwk_dstextendedaddr",
    "der_nwk_srcpanid",
    "der_nwk_srcshortaddr",
    "der_nwk_srcextendedaddr",
    "warning_msg",
    "error_msg",
];

/// One decoded packet record: a flat, append-only column→value mapping plus
/// the identifying columns common to every record (spec.md §3).
#[derive(Clone, Debug, Default)]
pub struct Frame {
    values: HashMap<&'static str, FieldValue>,
}

impl Frame {
    pub fn new(pcap_filename: &str, pkt_num: u64, pkt_time: f64) -> Self {
        let mut frame = Frame {
            values: HashMap::new(),
        };
        frame.set("pcap_filename", pcap_filename);
        frame.set("pkt_num", pkt_num);
        frame.set("pkt_time", pkt_time);
        frame
    }

    /// Sets a column, unless a terminal error has already been recorded.
    ///
    /// `name` must be one of [`PACKET_COLUMNS`]; this is only checked by
    /// debug assertion since the column set is closed and known at compile
    /// time by construction (every call site passes a literal).
    pub fn set<V: Into<FieldValue>>(&mut self, name: &'static str, value: V) {
        debug_assert!(
            PACKET_COLUMNS.contains(&name),
            "{} is not a declared packet column",
            name
        );
        if self.error_msg().is_some() {
            return;
        }
        self.values.insert(name, value.into());
    }

    /// Sets a column whose name was assembled at runtime (e.g. an
    /// `"nwk_aux_"` / `"aps_aux_"` prefix shared by both auxiliary-header
    /// decoders). Looks the name up against [`PACKET_COLUMNS`] to recover
    /// the `'static` key; unlike `set`, an unknown name is a silent no-op
    /// in release builds but a debug assertion failure.
    pub fn set_dynamic<V: Into<FieldValue>>(&mut self, name: &str, value: V) {
        if self.error_msg().is_some() {
            return;
        }
        match PACKET_COLUMNS.iter().find(|c| **c == name) {
            Some(&col) => {
                self.values.insert(col, value.into());
            }
            None => debug_assert!(false, "{} is not a declared packet column", name),
        }
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.values.get(name)
    }

    pub fn get_text(&self, name: &str) -> Option<&str> {
        self.values.get(name).and_then(FieldValue::as_str)
    }

    pub fn get_u64(&self, name: &str) -> Option<u64> {
        self.values.get(name).and_then(FieldValue::as_u64)
    }

    /// Records a fatal parse error. Per spec.md §3, once set no further
    /// columns may be added; `set` becomes a no-op after this call.
    pub fn set_error(&mut self, msg: impl Into<String>) {
        if self.values.contains_key("error_msg") {
            return;
        }
        self.values.insert("error_msg", FieldValue::Text(msg.into()));
    }

    /// Records the first non-fatal anomaly. Unlike `error_msg`, decoding of
    /// outer fields continues; only the later layer's own fields stop.
    pub fn set_warning(&mut self, msg: impl Into<String>) {
        if self.values.contains_key("warning_msg") {
            return;
        }
        self.values
            .insert("warning_msg", FieldValue::Text(msg.into()));
    }

    pub fn error_msg(&self) -> Option<&str> {
        self.get_text("error_msg")
    }

    pub fn warning_msg(&self) -> Option<&str> {
        self.get_text("warning_msg")
    }

    pub fn pcap_filename(&self) -> &str {
        self.get_text("pcap_filename").unwrap_or_default()
    }

    pub fn pkt_num(&self) -> u64 {
        self.get_u64("pkt_num").unwrap_or_default()
    }

    pub fn pkt_time(&self) -> f64 {
        match self.get("pkt_time") {
            Some(FieldValue::Float(v)) => *v,
            _ => 0.0,
        }
    }

    /// Columns in pinned order, `None` for columns that were never set.
    pub fn ordered_columns(&self) -> Vec<Option<&FieldValue>> {
        PACKET_COLUMNS.iter().map(|c| self.values.get(c)).collect()
    }

    /// Rebuilds a `Frame` directly from already-decoded column values (used
    /// to reload a row previously written to the `packets` table), bypassing
    /// the after-`error_msg` write gate since these values already reflect
    /// whatever coexisted at the time the row was written.
    pub fn from_stored(values: HashMap<&'static str, FieldValue>) -> Frame {
        Frame { values }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_stops_further_columns() {
        let mut frame = Frame::new("x.pcap", 1, 0.0);
        frame.set_error("PE101: Invalid packet length");
        frame.set("mac_fcs", "0xffff");
        assert!(frame.get("mac_fcs").is_none());
        assert_eq!(frame.error_msg(), Some("PE101: Invalid packet length"));
    }

    #[test]
    fn warning_does_not_block_columns() {
        let mut frame = Frame::new("x.pcap", 1, 0.0);
        frame.set_warning("PW301: Unable to decrypt the NWK payload");
        frame.set("nwk_seqnum", 5u8);
        assert_eq!(frame.get_u64("nwk_seqnum"), Some(5));
    }

    #[test]
    fn column_list_has_no_duplicates() {
        let mut seen = std::collections::HashSet::new();
        for c in PACKET_COLUMNS {
            assert!(seen.insert(c), "duplicate column {}", c);
        }
    }
}
