//! AES-CCM* (IEEE 802.15.4-2020 Annex B) authenticated decryption.
//!
//! The MIC length `M` is a runtime value selected per-packet by the
//! auxiliary header's security-level field (`M ∈ {0, 4, 8, 16}`), so this is
//! built directly on [`super::primitives::aes128_encrypt_block`] (CTR-mode
//! keystream plus CBC-MAC over the formatted blocks) rather than through the
//! `ccm` crate's `Ccm<C, MacSize, NonceSize>`, which fixes `MacSize` at
//! compile time. See DESIGN.md for the crate-selection rationale.

use super::primitives::aes128_encrypt_block;

/// Allowed MIC lengths for CCM* as used by Zigbee NWK/APS security.
pub fn valid_mic_length(m: usize) -> bool {
    matches!(m, 0 | 4 | 8 | 16)
}

fn xor_into(dst: &mut [u8], src: &[u8]) {
    for (d, s) in dst.iter_mut().zip(src.iter()) {
        *d ^= s;
    }
}

/// Builds the CCM* `A_i` counter block for keystream generation, `i` is
/// 1-based (`A_0` is reserved for the encrypted MIC).
fn counter_block(nonce: &[u8; 13], i: u16) -> [u8; 16] {
    let mut block = [0u8; 16];
    block[0] = 0x01; // Flags: L'=1 (L=2, 2-byte counter), no Adata bit here.
    block[1..14].copy_from_slice(nonce);
    block[14..16].copy_from_slice(&i.to_be_bytes());
    block
}

/// Builds the CCM* `B_0` block that seeds the CBC-MAC.
fn b0_block(nonce: &[u8; 13], aad_len: usize, msg_len: usize, mic_len: usize) -> [u8; 16] {
    let mut flags = 0u8;
    if aad_len > 0 {
        flags |= 1 << 6;
    }
    if mic_len > 0 {
        flags |= (((mic_len - 2) / 2) as u8) << 3;
    }
    flags |= 0x01; // L' = 1 (2-byte length field), matching the counter block.

    let mut block = [0u8; 16];
    block[0] = flags;
    block[1..14].copy_from_slice(nonce);
    block[14..16].copy_from_slice(&(msg_len as u16).to_be_bytes());
    block
}

/// Runs CBC-MAC over `B0 ‖ encoded(aad) ‖ message`, zero-padding every
/// component to a 16-byte boundary, and returns the raw (unencrypted) MIC
/// candidate `T`.
fn cbc_mac(key: &[u8; 16], nonce: &[u8; 13], aad: &[u8], message: &[u8], mic_len: usize) -> [u8; 16] {
    let mut state = b0_block(nonce, aad.len(), message.len(), mic_len);
    state = aes128_encrypt_block(key, &state);

    if !aad.is_empty() {
        let mut encoded_len = Vec::with_capacity(2 + aad.len());
        encoded_len.extend_from_slice(&(aad.len() as u16).to_be_bytes());
        encoded_len.extend_from_slice(aad);
        for chunk in encoded_len.chunks(16) {
            let mut block = [0u8; 16];
            block[..chunk.len()].copy_from_slice(chunk);
            xor_into(&mut state, &block);
            state = aes128_encrypt_block(key, &state);
        }
    }

    for chunk in message.chunks(16) {
        let mut block = [0u8; 16];
        block[..chunk.len()].copy_from_slice(chunk);
        xor_into(&mut state, &block);
        state = aes128_encrypt_block(key, &state);
    }

    state
}

fn ctr_apply(key: &[u8; 16], nonce: &[u8; 13], data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    for (block_idx, chunk) in data.chunks(16).enumerate() {
        let counter = counter_block(nonce, (block_idx + 1) as u16);
        let keystream = aes128_encrypt_block(key, &counter);
        let mut block = chunk.to_vec();
        xor_into(&mut block, &keystream[..chunk.len()]);
        out.extend_from_slice(&block);
    }
    out
}

/// Decrypts and verifies a CCM*-protected payload.
///
/// `encrypt` reflects bit 2 of the IEEE 802.15.4 security level: when
/// clear, the message travels in the clear and only the trailing `m`-byte
/// MIC is checked (security levels 1-3); when set, the message is also
/// CTR-masked (levels 4-7). The MIC itself is always CTR-masked with
/// counter 0 regardless of `encrypt` — that masking is what lets CCM*
/// authenticate an unencrypted message. Returns `None` on any
/// authentication failure; the comparison is constant-time.
pub fn ccm_star_decrypt(
    key: &[u8; 16],
    nonce: &[u8; 13],
    aad: &[u8],
    ciphertext_with_mic: &[u8],
    m: usize,
    encrypt: bool,
) -> Option<Vec<u8>> {
    if !valid_mic_length(m) || ciphertext_with_mic.len() < m {
        return None;
    }
    let (ciphertext, received_mic) =
        ciphertext_with_mic.split_at(ciphertext_with_mic.len() - m);

    let plaintext = if encrypt {
        ctr_apply(key, nonce, ciphertext)
    } else {
        ciphertext.to_vec()
    };

    if m == 0 {
        return Some(plaintext);
    }

    let mic_keystream = aes128_encrypt_block(key, &counter_block(nonce, 0));
    let mac = cbc_mac(key, nonce, aad, &plaintext, m);
    let mut computed_mic = [0u8; 16];
    computed_mic.copy_from_slice(&mac);
    xor_into(&mut computed_mic, &mic_keystream);

    if constant_time_eq(&computed_mic[..m], received_mic) {
        Some(plaintext)
    } else {
        None
    }
}

/// Encrypts and authenticates `plaintext`, for round-trip testing.
pub fn ccm_star_encrypt(
    key: &[u8; 16],
    nonce: &[u8; 13],
    aad: &[u8],
    plaintext: &[u8],
    m: usize,
    encrypt: bool,
) -> Vec<u8> {
    assert!(valid_mic_length(m));
    let mut out = if encrypt {
        ctr_apply(key, nonce, plaintext)
    } else {
        plaintext.to_vec()
    };

    if m > 0 {
        let mic_keystream = aes128_encrypt_block(key, &counter_block(nonce, 0));
        let mac = cbc_mac(key, nonce, aad, plaintext, m);
        let mut mic = [0u8; 16];
        mic.copy_from_slice(&mac);
        xor_into(&mut mic, &mic_keystream);
        out.extend_from_slice(&mic[..m]);
    }
    out
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nonce() -> [u8; 13] {
        let mut n = [0u8; 13];
        n[0..8].copy_from_slice(&0x0102030405060708u64.to_le_bytes());
        n[8..12].copy_from_slice(&1u32.to_le_bytes());
        n[12] = 0x05;
        n
    }

    #[test]
    fn round_trip_all_mic_lengths() {
        let key = [0x11u8; 16];
        let aad = b"additional authenticated data";
        let plaintext = b"a zigbee frame payload of some length";
        for &m in &[0usize, 4, 8, 16] {
            let ct = ccm_star_encrypt(&key, &nonce(), aad, plaintext, m, true);
            let pt = ccm_star_decrypt(&key, &nonce(), aad, &ct, m, true);
            assert_eq!(pt.as_deref(), Some(&plaintext[..]), "m = {}", m);
        }
    }

    #[test]
    fn tamper_detection() {
        let key = [0x22u8; 16];
        let aad = b"aad";
        let plaintext = b"payload";
        let m = 8;
        let mut ct = ccm_star_encrypt(&key, &nonce(), aad, plaintext, m, true);

        let mut tampered_ct = ct.clone();
        tampered_ct[0] ^= 0x01;
        assert!(ccm_star_decrypt(&key, &nonce(), aad, &tampered_ct, m, true).is_none());

        let last = ct.len() - 1;
        ct[last] ^= 0x01;
        assert!(ccm_star_decrypt(&key, &nonce(), aad, &ct, m, true).is_none());

        assert!(ccm_star_decrypt(&key, &nonce(), b"different aad", &ct, m, true).is_none());

        let mut tampered_nonce = nonce();
        tampered_nonce[0] ^= 0x01;
        assert!(ccm_star_decrypt(&key, &tampered_nonce, aad, &ct, m, true).is_none());
    }

    #[test]
    fn mic_zero_is_encryption_only() {
        let key = [0x33u8; 16];
        let plaintext = b"twelve bytes";
        let ct = ccm_star_encrypt(&key, &nonce(), b"", plaintext, 0, true);
        assert_eq!(ct.len(), plaintext.len());
        let pt = ccm_star_decrypt(&key, &nonce(), b"", &ct, 0, true).unwrap();
        assert_eq!(pt, plaintext);
    }

    #[test]
    fn authentication_only_leaves_message_in_clear() {
        let key = [0x44u8; 16];
        let aad = b"aad";
        let plaintext = b"visible payload bytes";
        let m = 4;
        let ct = ccm_star_encrypt(&key, &nonce(), aad, plaintext, m, false);
        assert_eq!(&ct[..plaintext.len()], &plaintext[..]);
        let pt = ccm_star_decrypt(&key, &nonce(), aad, &ct, m, false).unwrap();
        assert_eq!(pt, plaintext);

        let mut tampered = ct.clone();
        tampered[0] ^= 0x01;
        assert!(ccm_star_decrypt(&key, &nonce(), aad, &tampered, m, false).is_none());
    }
}
