//! Loads network keys, link keys, and install codes from tab-separated
//! tablet files, and hands out decrypt candidates by key type.
//!
//! Grounded on `zigator/fs.py`'s `load_enc_keys`/`load_install_codes`: same
//! line shape (`<hex>\t<name>`), same validation order, same
//! duplicate-value/duplicate-name warning behavior, and the same
//! `_derived_<hex>` naming scheme for link keys recovered from install
//! codes.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use log::{debug, warn};

use crate::crypto::{derive_link_key_from_install_code, validate_install_code};
use crate::error::{Result, ZbError};

/// The role a loaded key plays, which determines which security-header
/// fields make it a decrypt candidate (spec.md §4.1, §9).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyType {
    Network,
    Link,
}

/// A named 128-bit key loaded from a tablet file, or derived from an
/// install code.
#[derive(Debug, Clone)]
pub struct NamedKey {
    pub name: String,
    pub bytes: [u8; 16],
    /// The NWK key sequence number this key was sniffed under, when known
    /// (spec.md §4.4's key-sequence-number candidate filter). Tablet-file
    /// keys never carry one, since the tablet format has no such column.
    pub key_seq_num: Option<u8>,
}

#[derive(Debug, Default, Clone)]
pub struct KeyRing {
    network_keys: Vec<NamedKey>,
    link_keys: Vec<NamedKey>,
    install_codes: Vec<(String, [u8; 18])>,
}

impl KeyRing {
    pub fn new() -> Self {
        Self::default()
    }

    /// Candidate keys for the given key type, in load order. Derived link
    /// keys (from install codes) are appended after the explicitly
    /// configured ones.
    pub fn candidates(&self, key_type: KeyType) -> &[NamedKey] {
        match key_type {
            KeyType::Network => &self.network_keys,
            KeyType::Link => &self.link_keys,
        }
    }

    pub fn install_codes(&self) -> &[(String, [u8; 18])] {
        &self.install_codes
    }

    /// Appends keys sniffed from decrypted Transport-Key commands
    /// (spec.md §4.6 phase 1), skipping any whose bytes already appear in
    /// the ring under any name.
    pub fn extend_network_keys(&mut self, keys: Vec<NamedKey>) {
        for key in keys {
            if !self.network_keys.iter().any(|k| k.bytes == key.bytes) {
                self.network_keys.push(key);
            }
        }
    }

    pub fn extend_link_keys(&mut self, keys: Vec<NamedKey>) {
        for key in keys {
            if !self.link_keys.iter().any(|k| k.bytes == key.bytes) {
                self.link_keys.push(key);
            }
        }
    }

    /// Loads a `<32-hex-digit key>\t<name>` tablet into the network-key
    /// ring. A missing path is tolerated when `optional` is set.
    pub fn load_network_keys<P: AsRef<Path>>(&mut self, path: P, optional: bool) -> Result<()> {
        self.network_keys = load_enc_keys(path.as_ref(), optional)?;
        Ok(())
    }

    /// Loads a `<32-hex-digit key>\t<name>` tablet into the link-key ring.
    pub fn load_link_keys<P: AsRef<Path>>(&mut self, path: P, optional: bool) -> Result<()> {
        self.link_keys = load_enc_keys(path.as_ref(), optional)?;
        Ok(())
    }

    /// Loads a `<36-hex-digit install code>\t<name>` tablet, validates each
    /// code's trailing CRC-16/X-25, and derives + appends a `_derived_<hex>`
    /// link key for every code that passes.
    pub fn load_install_codes<P: AsRef<Path>>(&mut self, path: P, optional: bool) -> Result<()> {
        let path = path.as_ref();
        if !path.exists() {
            if optional {
                return Ok(());
            }
            return Err(ZbError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("install code file {} does not exist", path.display()),
            )));
        }

        let contents = fs::read_to_string(path)?;
        let mut codes: BTreeMap<String, [u8; 18]> = BTreeMap::new();
        let mut derived: Vec<NamedKey> = Vec::new();

        for (i, line) in contents.lines().enumerate() {
            let line_no = i + 1;
            if line.is_empty() {
                continue;
            }
            let fields: Vec<&str> = line.split('\t').collect();
            if fields.len() != 2 {
                return Err(ZbError::KeyFileShape {
                    path: path.to_path_buf(),
                    line: line_no,
                    found: fields.len(),
                });
            }
            let (code_hex, code_name) = (fields[0], fields[1]);

            if code_hex.len() != 36 || !code_hex.chars().all(|c| c.is_ascii_hexdigit()) {
                return Err(ZbError::KeyFileHexLength {
                    path: path.to_path_buf(),
                    line: line_no,
                    expected: 36,
                    found: code_hex.len(),
                });
            }
            if code_name.is_empty() || code_name.starts_with('_') {
                return Err(ZbError::KeyFileName {
                    path: path.to_path_buf(),
                    line: line_no,
                });
            }

            let code_bytes = decode_hex_18(code_hex);

            if !validate_install_code(&code_bytes) {
                warn!(
                    "ignoring install code {} because its CRC does not match",
                    hex_string(&code_bytes)
                );
                continue;
            }

            if let Some((existing_name, _)) =
                codes.iter().find(|(_, v)| **v == code_bytes)
            {
                warn!(
                    "the install code {} appears more than once in {} (already loaded as {})",
                    hex_string(&code_bytes),
                    path.display(),
                    existing_name
                );
                continue;
            }
            if let Some(existing) = codes.get(code_name) {
                warn!(
                    "the install code {} from {} was ignored because its name \"{}\" is also used by {}",
                    hex_string(&code_bytes),
                    path.display(),
                    code_name,
                    hex_string(existing)
                );
                continue;
            }

            let key_bytes = derive_link_key_from_install_code(&code_bytes);
            let key_name = format!("_derived_{}", hex_string(&code_bytes));
            debug!(
                "derived link key {} from install code {}",
                hex_string(&key_bytes),
                hex_string(&code_bytes)
            );
            derived.push(NamedKey {
                name: key_name,
                bytes: key_bytes,
                key_seq_num: None,
            });
            codes.insert(code_name.to_string(), code_bytes);
        }

        self.install_codes = codes.into_iter().collect();
        self.link_keys.extend(derived);
        Ok(())
    }
}

fn load_enc_keys(path: &Path, optional: bool) -> Result<Vec<NamedKey>> {
    if !path.exists() {
        if optional {
            return Ok(Vec::new());
        }
        return Err(ZbError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("key file {} does not exist", path.display()),
        )));
    }

    let contents = fs::read_to_string(path)?;
    let mut by_name: BTreeMap<String, [u8; 16]> = BTreeMap::new();

    for (i, line) in contents.lines().enumerate() {
        let line_no = i + 1;
        if line.is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() != 2 {
            return Err(ZbError::KeyFileShape {
                path: path.to_path_buf(),
                line: line_no,
                found: fields.len(),
            });
        }
        let (key_hex, key_name) = (fields[0], fields[1]);

        if key_hex.len() != 32 || !key_hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(ZbError::KeyFileHexLength {
                path: path.to_path_buf(),
                line: line_no,
                expected: 32,
                found: key_hex.len(),
            });
        }
        if key_name.is_empty() || key_name.starts_with('_') {
            return Err(ZbError::KeyFileName {
                path: path.to_path_buf(),
                line: line_no,
            });
        }

        let key_bytes = decode_hex_16(key_hex);

        if by_name.values().any(|v| *v == key_bytes) {
            warn!(
                "the encryption key {} appears more than once in {}",
                hex_string(&key_bytes),
                path.display()
            );
            continue;
        }
        if let Some(existing) = by_name.get(key_name) {
            warn!(
                "the encryption key {} from {} was ignored because its name \"{}\" is also used by {}",
                hex_string(&key_bytes),
                path.display(),
                key_name,
                hex_string(existing)
            );
            continue;
        }
        by_name.insert(key_name.to_string(), key_bytes);
    }

    Ok(by_name
        .into_iter()
        .map(|(name, bytes)| NamedKey { name, bytes, key_seq_num: None })
        .collect())
}

fn decode_hex_16(s: &str) -> [u8; 16] {
    let mut out = [0u8; 16];
    for (i, b) in out.iter_mut().enumerate() {
        *b = u8::from_str_radix(&s[i * 2..i * 2 + 2], 16).unwrap();
    }
    out
}

fn decode_hex_18(s: &str) -> [u8; 18] {
    let mut out = [0u8; 18];
    for (i, b) in out.iter_mut().enumerate() {
        *b = u8::from_str_radix(&s[i * 2..i * 2 + 2], 16).unwrap();
    }
    out
}

fn hex_string(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn loads_network_keys_and_rejects_bad_length() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "000102030405060708090a0b0c0d0e0f\tnet1").unwrap();
        let mut ring = KeyRing::new();
        ring.load_network_keys(file.path(), false).unwrap();
        assert_eq!(ring.candidates(KeyType::Network).len(), 1);
        assert_eq!(ring.candidates(KeyType::Network)[0].name, "net1");

        let mut bad_file = tempfile::NamedTempFile::new().unwrap();
        writeln!(bad_file, "0001\tnet1").unwrap();
        let mut bad_ring = KeyRing::new();
        assert!(bad_ring.load_network_keys(bad_file.path(), false).is_err());
    }

    #[test]
    fn missing_optional_file_is_empty() {
        let mut ring = KeyRing::new();
        ring.load_link_keys("/nonexistent/path.tsv", true).unwrap();
        assert!(ring.candidates(KeyType::Link).is_empty());
    }

    #[test]
    fn install_codes_derive_named_link_keys() {
        let secret = [0x11u8; 16];
        let crc = crate::crypto::crc16_x25(&secret);
        let mut code = [0u8; 18];
        code[..16].copy_from_slice(&secret);
        code[16..].copy_from_slice(&crc.to_le_bytes());
        let code_hex: String = code.iter().map(|b| format!("{:02x}", b)).collect();

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "{}\tdevice1", code_hex).unwrap();

        let mut ring = KeyRing::new();
        ring.load_install_codes(file.path(), false).unwrap();

        assert_eq!(ring.install_codes().len(), 1);
        assert_eq!(ring.candidates(KeyType::Link).len(), 1);
        assert!(ring.candidates(KeyType::Link)[0]
            .name
            .starts_with("_derived_"));
    }

    #[test]
    fn bad_crc_install_code_is_skipped_not_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "{}\tdevice1", "00".repeat(18)).unwrap();
        let mut ring = KeyRing::new();
        ring.load_install_codes(file.path(), false).unwrap();
        assert!(ring.install_codes().is_empty());
        assert!(ring.candidates(KeyType::Link).is_empty());
    }
}
