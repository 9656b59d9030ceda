//! Bit-exact MAC/NWK/APS frame decoding (spec.md §4.3).
//!
//! Each layer is strictly additive: the first malformed condition records
//! `error_msg` from the fixed taxonomy (spec.md §7) and decoding stops for
//! that packet. No module-level "current frame" accumulator is used here —
//! every sub-decoder receives the `Frame` it is populating as an explicit
//! argument.

pub mod aps;
pub mod mac;
pub mod nwk;
pub mod security;

/// A forward-only byte cursor shared by the MAC/NWK/APS decoders.
///
/// Every `read_*` call either advances the cursor and returns the value, or
/// leaves the cursor untouched and returns `None` — callers turn that into
/// an `error_msg` at the point where the attempted read makes sense to name.
pub struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Cursor { bytes, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    pub fn pos(&self) -> usize {
        self.pos
    }

    pub fn rest(&self) -> &'a [u8] {
        &self.bytes[self.pos..]
    }

    pub fn read_u8(&mut self) -> Option<u8> {
        let b = *self.bytes.get(self.pos)?;
        self.pos += 1;
        Some(b)
    }

    pub fn read_u16_le(&mut self) -> Option<u16> {
        if self.remaining() < 2 {
            return None;
        }
        let v = u16::from_le_bytes([self.bytes[self.pos], self.bytes[self.pos + 1]]);
        self.pos += 2;
        Some(v)
    }

    pub fn read_u32_le(&mut self) -> Option<u32> {
        if self.remaining() < 4 {
            return None;
        }
        let v = u32::from_le_bytes([
            self.bytes[self.pos],
            self.bytes[self.pos + 1],
            self.bytes[self.pos + 2],
            self.bytes[self.pos + 3],
        ]);
        self.pos += 4;
        Some(v)
    }

    pub fn read_u64_le(&mut self) -> Option<u64> {
        if self.remaining() < 8 {
            return None;
        }
        let mut buf = [0u8; 8];
        buf.copy_from_slice(&self.bytes[self.pos..self.pos + 8]);
        self.pos += 8;
        Some(u64::from_le_bytes(buf))
    }

    pub fn read_bytes(&mut self, n: usize) -> Option<&'a [u8]> {
        if self.remaining() < n {
            return None;
        }
        let slice = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Some(slice)
    }
}

/// Renders a bit-field enum value the way the original tool does:
/// `"<prefix>: <label>"`, e.g. `"0b010: MAC Acknowledgment"` or
/// `"0x07: MAC Beacon Request"`.
pub fn render_enum(prefix: &str, label: &str) -> String {
    format!("{}: {}", prefix, label)
}

/// Renders a value as a zero-padded binary literal prefix, e.g. `0b010` for
/// `(2, 3)`.
pub fn bin_prefix(value: u64, bits: u32) -> String {
    format!("0b{:0width$b}", value, width = bits as usize)
}

/// Renders a value as a zero-padded hex literal prefix, e.g. `0x07` for
/// `(7, 2)`.
pub fn hex_prefix(value: u64, digits: u32) -> String {
    format!("0x{:0width$x}", value, width = digits as usize)
}

/// Renders a fixed-width big-endian address as a `0x`-prefixed hex string,
/// most significant byte first in the rendered string but the bytes
/// themselves are taken as already given in display order.
pub fn hex_addr(value: u64, bytes: u32) -> String {
    format!("0x{:0width$x}", value, width = (bytes * 2) as usize)
}
