//! Loads a [`KeyRing`] from a directory of key-tablet files (ambient stack,
//! SPEC_FULL.md "AMBIENT STACK"), mirroring `zigator.fs.load_enc_keys` /
//! `load_install_codes`'s file-naming convention.

use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::keyring::KeyRing;

pub const NETWORK_KEYS_FILENAME: &str = "network-keys.tsv";
pub const LINK_KEYS_FILENAME: &str = "link-keys.tsv";
pub const INSTALL_CODES_FILENAME: &str = "install-codes.tsv";

/// Key-tablet file paths resolved by the CLI (spec.md's `--network-keys`,
/// `--link-keys`, `--install-codes` flags), each optional.
#[derive(Debug, Default, Clone)]
pub struct Config {
    pub network_keys_path: Option<PathBuf>,
    pub link_keys_path: Option<PathBuf>,
    pub install_codes_path: Option<PathBuf>,
}

impl Config {
    /// Resolves the three tablet files from a single directory using the
    /// fixed filenames above, tolerating any of them being absent.
    pub fn from_key_dir<P: AsRef<Path>>(dir: P) -> Self {
        let dir = dir.as_ref();
        Config {
            network_keys_path: Some(dir.join(NETWORK_KEYS_FILENAME)),
            link_keys_path: Some(dir.join(LINK_KEYS_FILENAME)),
            install_codes_path: Some(dir.join(INSTALL_CODES_FILENAME)),
        }
    }

    pub fn build_keyring(&self) -> Result<KeyRing> {
        let mut keyring = KeyRing::new();
        if let Some(path) = &self.network_keys_path {
            keyring.load_network_keys(path, true)?;
        }
        if let Some(path) = &self.link_keys_path {
            keyring.load_link_keys(path, true)?;
        }
        if let Some(path) = &self.install_codes_path {
            keyring.load_install_codes(path, true)?;
        }
        Ok(keyring)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn missing_key_dir_files_yield_an_empty_keyring() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::from_key_dir(dir.path());
        let keyring = config.build_keyring().unwrap();
        assert!(keyring.candidates(crate::keyring::KeyType::Network).is_empty());
        assert!(keyring.candidates(crate::keyring::KeyType::Link).is_empty());
    }

    #[test]
    fn loads_whichever_tablet_files_are_present() {
        let dir = tempfile::tempdir().unwrap();
        let mut file = std::fs::File::create(dir.path().join(NETWORK_KEYS_FILENAME)).unwrap();
        writeln!(file, "000102030405060708090a0b0c0d0e0f\tnet1").unwrap();

        let config = Config::from_key_dir(dir.path());
        let keyring = config.build_keyring().unwrap();
        assert_eq!(keyring.candidates(crate::keyring::KeyType::Network).len(), 1);
    }
}
