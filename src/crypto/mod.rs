//! Cryptographic primitives used to decrypt NWK/APS security headers and
//! derive key material, grounded on the teacher's `sm::toolbox` module.

pub mod ccm;
pub mod primitives;

pub use ccm::{ccm_star_decrypt, ccm_star_encrypt, valid_mic_length};
pub use primitives::{
    aes128_encrypt_block, crc16_x25, derive_link_key_from_install_code, mmo_hash,
    validate_install_code,
};
