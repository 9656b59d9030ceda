//! The Cryptographic Toolbox
//!
//! This contains the primitive cryptographic functions used to derive and
//! apply Zigbee key material (spec.md §4.1). As in the teacher's own
//! `sm::toolbox` module, these are built directly from a block-cipher
//! primitive rather than through a turnkey AEAD wrapper, since the
//! Matyas-Meyer-Oseas hash and the install-code CRC are not themselves
//! AEAD operations.

use aes::cipher::{BlockEncrypt, KeyInit};
use aes::Aes128;
use cipher::generic_array::GenericArray;
use crc::{Algorithm, Crc};

/// A single AES-128 ECB block encryption: the one primitive every other
/// function in this module (and `crypto::ccm`) is built from.
pub fn aes128_encrypt_block(key: &[u8; 16], block: &[u8; 16]) -> [u8; 16] {
    let cipher = Aes128::new(GenericArray::from_slice(key));
    let mut buf = GenericArray::clone_from_slice(block);
    cipher.encrypt_block(&mut buf);
    let mut out = [0u8; 16];
    out.copy_from_slice(&buf);
    out
}

/// The Zigbee variant of the Matyas-Meyer-Oseas hash construction, using
/// AES-128 as the block function with an all-zero initial chaining value.
///
/// The input is padded with a single `0x80` octet followed by zeros up to a
/// 16-byte block multiple, except that the final block's last two octets
/// always carry the bit length of the *unpadded* input, big-endian. For an
/// 18-byte install code this yields exactly two blocks.
pub fn mmo_hash(input: &[u8]) -> [u8; 16] {
    let bit_length = (input.len() as u16).wrapping_mul(8);

    let mut padded = input.to_vec();
    padded.push(0x80);
    // Pad with zeros until only the trailing 2-byte length field is left to
    // place, then round up to a full block.
    while padded.len() % 16 != 14 {
        padded.push(0x00);
    }
    padded.extend_from_slice(&bit_length.to_be_bytes());
    debug_assert_eq!(padded.len() % 16, 0);

    let mut chaining_value = [0u8; 16];
    for block in padded.chunks_exact(16) {
        let mut block_arr = [0u8; 16];
        block_arr.copy_from_slice(block);

        // H_i = E_{H_(i-1)}(M_i) XOR M_i
        let encrypted = aes128_encrypt_block(&chaining_value, &block_arr);
        for i in 0..16 {
            chaining_value[i] = encrypted[i] ^ block_arr[i];
        }
    }
    chaining_value
}

const CRC16_X25: Algorithm<u16> = Algorithm {
    width: 16,
    poly: 0x1021,
    init: 0xffff,
    refin: true,
    refout: true,
    xorout: 0xffff,
    check: 0xf0b8,
    residue: 0x0f47,
};

/// CRC-16/X-25 over `bytes`, used only to validate install codes.
pub fn crc16_x25(bytes: &[u8]) -> u16 {
    let crc = Crc::<u16>::new(&CRC16_X25);
    crc.checksum(bytes)
}

/// Validates an 18-byte install code (16-byte secret ‖ little-endian CRC).
pub fn validate_install_code(code: &[u8; 18]) -> bool {
    let computed = crc16_x25(&code[0..16]);
    let received = u16::from_le_bytes([code[16], code[17]]);
    computed == received
}

/// Derives the preconfigured Trust Center link key from an install code
/// (MMO hash of the full 18-byte code).
pub fn derive_link_key_from_install_code(code: &[u8; 18]) -> [u8; 16] {
    mmo_hash(code)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aes_ecb_matches_fips197_vector() {
        let key = [0x00u8; 16];
        let block = [0x00u8; 16];
        let out = aes128_encrypt_block(&key, &block);
        assert_eq!(
            out,
            [
                0x66, 0xe9, 0x4b, 0xd4, 0xef, 0x8a, 0x2c, 0x3b, 0x88, 0x4c, 0xfa, 0x59, 0xca,
                0x34, 0x2b, 0x2e
            ]
        );
    }

    #[test]
    fn crc16_x25_all_zero_message() {
        // Known CRC-16/X-25 check value for the ASCII string "123456789".
        let crc = crc16_x25(b"123456789");
        assert_eq!(crc, 0x906e);
    }

    #[test]
    fn install_code_round_trip() {
        let secret = [0x11u8; 16];
        let computed = crc16_x25(&secret);
        let mut code = [0u8; 18];
        code[..16].copy_from_slice(&secret);
        code[16..].copy_from_slice(&computed.to_le_bytes());
        assert!(validate_install_code(&code));

        code[0] ^= 0xff;
        assert!(!validate_install_code(&code));
    }

    #[test]
    fn mmo_hash_is_deterministic_and_sensitive() {
        let code_a = [0x11u8; 18];
        let mut code_b = code_a;
        code_b[0] = 0x12;
        assert_eq!(mmo_hash(&code_a), mmo_hash(&code_a));
        assert_ne!(mmo_hash(&code_a), mmo_hash(&code_b));
    }
}
