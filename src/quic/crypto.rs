//! QUIC packet crypto computations (RFC 9001).
//!
//! Pure derivation logic writing results into the connection crypto
//! state: Initial secrets from the first destination connection id,
//! per-level key/IV/header-protection expansion of TLS traffic secrets,
//! header-protection masks, and Retry integrity tags.

use aes::cipher::{generic_array::GenericArray, BlockEncrypt, KeyInit as AesKeyInit};
use aes::{Aes128, Aes256};
use aes_gcm::{
    aead::{Aead, KeyInit, Payload},
    Aes128Gcm, Nonce,
};
use chacha20::cipher::{KeyIvInit, StreamCipher, StreamCipherSeek};
use chacha20::ChaCha20;
use hkdf::Hkdf;
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::context::{DirectionKeys, LevelKeys, QuicCryptoState};
use crate::quic::QuicVersion;
use crate::types::CipherAlgorithm;
use crate::Error;

/// RFC 9001 Section 5.2.
const INITIAL_SALT_V1: [u8; 20] = [
    0x38, 0x76, 0x2c, 0xf7, 0xf5, 0x59, 0x34, 0xb3, 0x4d, 0x17, 0x9a, 0xe6, 0xa4, 0xc8, 0x0c,
    0xad, 0xcc, 0xbb, 0x7f, 0x0a,
];
const INITIAL_SALT_DRAFT29: [u8; 20] = [
    0xaf, 0xbf, 0xec, 0x28, 0x99, 0x93, 0xd2, 0x4c, 0x9e, 0x97, 0x86, 0xf1, 0x9c, 0x61, 0x11,
    0xe0, 0x43, 0x90, 0xa8, 0x99,
];

/// RFC 9001 Section 5.8.
const RETRY_KEY_V1: [u8; 16] = [
    0xbe, 0x0c, 0x69, 0x0b, 0x9f, 0x66, 0x57, 0x5a, 0x1d, 0x76, 0x6b, 0x54, 0xe3, 0x68, 0xc8,
    0x4e,
];
const RETRY_NONCE_V1: [u8; 12] = [
    0x46, 0x15, 0x99, 0xd3, 0x5d, 0x63, 0x2b, 0xf2, 0x23, 0x98, 0x25, 0xbb,
];
const RETRY_KEY_DRAFT29: [u8; 16] = [
    0xcc, 0xce, 0x18, 0x7e, 0xd0, 0x9a, 0x09, 0xd0, 0x57, 0x28, 0x15, 0x5a, 0x6c, 0xb9, 0x6b,
    0xe1,
];
const RETRY_NONCE_DRAFT29: [u8; 12] = [
    0xe5, 0x49, 0x30, 0xf9, 0x7f, 0x21, 0x36, 0xf0, 0x53, 0x0a, 0x8c, 0x1c,
];

const RETRY_TAG_LEN: usize = 16;

fn initial_salt(version: QuicVersion) -> &'static [u8; 20] {
    match version {
        QuicVersion::V1 => &INITIAL_SALT_V1,
        QuicVersion::Draft29 => &INITIAL_SALT_DRAFT29,
    }
}

fn retry_key_nonce(version: QuicVersion) -> (&'static [u8; 16], &'static [u8; 12]) {
    match version {
        QuicVersion::V1 => (&RETRY_KEY_V1, &RETRY_NONCE_V1),
        QuicVersion::Draft29 => (&RETRY_KEY_DRAFT29, &RETRY_NONCE_DRAFT29),
    }
}

/// HKDF-Expand-Label (RFC 8446 Section 7.1) with the "tls13 " prefix.
pub fn hkdf_expand_label(secret: &[u8], label: &[u8], context: &[u8], len: usize) -> Vec<u8> {
    let mut info = Vec::with_capacity(10 + label.len() + context.len());
    info.extend_from_slice(&(len as u16).to_be_bytes());
    info.push((6 + label.len()) as u8);
    info.extend_from_slice(b"tls13 ");
    info.extend_from_slice(label);
    info.push(context.len() as u8);
    info.extend_from_slice(context);

    let hk = Hkdf::<Sha256>::from_prk(secret).expect("secret at least one hash long");
    let mut out = vec![0u8; len];
    hk.expand(&info, &mut out).expect("label output length");
    out
}

/// Expand one traffic secret into key, IV and header-protection key.
fn expand_direction(secret: &[u8], key_len: usize) -> DirectionKeys {
    DirectionKeys {
        secret: Zeroizing::new(secret.to_vec()),
        key: Zeroizing::new(hkdf_expand_label(secret, b"quic key", &[], key_len)),
        iv: Zeroizing::new(hkdf_expand_label(secret, b"quic iv", &[], 12)),
        hp_key: Zeroizing::new(hkdf_expand_label(secret, b"quic hp", &[], key_len)),
    }
}

/// Derive and install the Initial secrets from the first observed
/// destination connection id (RFC 9001 Section 5.2).
///
/// Initial packets always use AES-128-GCM: 16-byte key, 12-byte IV,
/// 16-byte header-protection key.
pub fn derive_initial_secrets(state: &mut QuicCryptoState) {
    let salt = initial_salt(state.version);
    let (initial_secret, _) = Hkdf::<Sha256>::extract(Some(salt), &state.first_dcid);

    let client_secret = hkdf_expand_label(&initial_secret, b"client in", &[], 32);
    let server_secret = hkdf_expand_label(&initial_secret, b"server in", &[], 32);

    debug!("initial secrets derived for {:?}", state.version);

    state.initial = Some(LevelKeys {
        client: expand_direction(&client_secret, 16),
        server: expand_direction(&server_secret, 16),
    });
}

/// Key length for the negotiated AEAD: 16 or 32 bytes by strength.
fn negotiated_key_len(aead: CipherAlgorithm) -> usize {
    match aead {
        CipherAlgorithm::Aes256Gcm | CipherAlgorithm::ChaCha20Poly1305 => 32,
        _ => 16,
    }
}

/// Install handshake-level keys from already-derived TLS handshake
/// traffic secrets. No fresh extraction happens here.
pub fn install_handshake_secrets(
    state: &mut QuicCryptoState,
    client_secret: &[u8],
    server_secret: &[u8],
) {
    let key_len = negotiated_key_len(state.aead);
    state.handshake = Some(LevelKeys {
        client: expand_direction(client_secret, key_len),
        server: expand_direction(server_secret, key_len),
    });
    debug!("handshake secrets installed");
}

/// Install application-level (1-RTT) keys from TLS application traffic
/// secrets.
pub fn install_application_secrets(
    state: &mut QuicCryptoState,
    client_secret: &[u8],
    server_secret: &[u8],
) {
    let key_len = negotiated_key_len(state.aead);
    state.application = Some(LevelKeys {
        client: expand_direction(client_secret, key_len),
        server: expand_direction(server_secret, key_len),
    });
    debug!("application secrets installed");
}

/// Install 0-RTT keys from the TLS early traffic secret. 0-RTT data only
/// flows client to server; the secret is expanded for both slots so the
/// sealing code does not need a special case.
pub fn install_zero_rtt_secret(state: &mut QuicCryptoState, early_secret: &[u8]) {
    let key_len = negotiated_key_len(state.aead);
    state.zero_rtt = Some(LevelKeys {
        client: expand_direction(early_secret, key_len),
        server: expand_direction(early_secret, key_len),
    });
    debug!("0-rtt secret installed");
}

/// Compute the 5-byte header-protection mask for one packet
/// (RFC 9001 Section 5.4).
///
/// AES-based suites run one AES-ECB pass over the 16-byte ciphertext
/// sample. ChaCha20-based suites read a little-endian block counter from
/// the first 4 sample bytes and a nonce from the remaining 12, then take
/// the first 5 keystream bytes.
pub fn header_protection_mask(
    aead: CipherAlgorithm,
    hp_key: &[u8],
    sample: &[u8; 16],
) -> Result<[u8; 5], Error> {
    match aead {
        CipherAlgorithm::Aes128Gcm => {
            let cipher = Aes128::new_from_slice(hp_key)
                .map_err(|_| Error::BadKeyMaterial("aes-128 hp key"))?;
            let mut block = GenericArray::clone_from_slice(sample);
            cipher.encrypt_block(&mut block);
            // Unwrap is OK, the block is 16 bytes.
            Ok(block[..5].try_into().unwrap())
        }
        CipherAlgorithm::Aes256Gcm => {
            let cipher = Aes256::new_from_slice(hp_key)
                .map_err(|_| Error::BadKeyMaterial("aes-256 hp key"))?;
            let mut block = GenericArray::clone_from_slice(sample);
            cipher.encrypt_block(&mut block);
            Ok(block[..5].try_into().unwrap())
        }
        CipherAlgorithm::ChaCha20Poly1305 => {
            let counter = u32::from_le_bytes(sample[..4].try_into().unwrap());
            let nonce: [u8; 12] = sample[4..].try_into().unwrap();
            let mut cipher = ChaCha20::new_from_slices(hp_key, &nonce)
                .map_err(|_| Error::BadKeyMaterial("chacha20 hp key"))?;
            cipher
                .try_seek(u64::from(counter) * 64)
                .map_err(|_| Error::Crypto("chacha20 hp seek"))?;
            let mut mask = [0u8; 5];
            cipher.apply_keystream(&mut mask);
            Ok(mask)
        }
        _ => Err(Error::BadKeyMaterial("not a quic aead")),
    }
}

/// Compute the Retry integrity tag over the retry pseudo-packet
/// (RFC 9001 Section 5.8): the original destination connection id
/// (length-prefixed) followed by the Retry packet up to the tag,
/// AEAD-sealed with an empty plaintext under the version's fixed
/// key/nonce.
pub fn retry_integrity_tag(
    version: QuicVersion,
    original_dcid: &[u8],
    retry_without_tag: &[u8],
) -> Result<[u8; 16], Error> {
    let (key, nonce) = retry_key_nonce(version);

    let mut pseudo = Vec::with_capacity(1 + original_dcid.len() + retry_without_tag.len());
    pseudo.push(original_dcid.len() as u8);
    pseudo.extend_from_slice(original_dcid);
    pseudo.extend_from_slice(retry_without_tag);

    let cipher =
        Aes128Gcm::new_from_slice(key).map_err(|_| Error::BadKeyMaterial("retry key"))?;
    let sealed = cipher
        .encrypt(
            Nonce::from_slice(nonce),
            Payload {
                msg: &[],
                aad: &pseudo,
            },
        )
        .map_err(|_| Error::Crypto("retry tag"))?;

    // Empty plaintext: the ciphertext is exactly the tag.
    sealed
        .as_slice()
        .try_into()
        .map_err(|_| Error::Crypto("retry tag length"))
}

/// Verify the integrity tag carried at the end of a Retry packet.
pub fn verify_retry_integrity(
    version: QuicVersion,
    original_dcid: &[u8],
    retry_packet: &[u8],
) -> Result<bool, Error> {
    if retry_packet.len() < RETRY_TAG_LEN {
        return Ok(false);
    }
    let (body, wire_tag) = retry_packet.split_at(retry_packet.len() - RETRY_TAG_LEN);
    let expected = retry_integrity_tag(version, original_dcid, body)?;
    Ok(expected[..] == wire_tag[..])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hex_decode(s: &str) -> Vec<u8> {
        (0..s.len())
            .step_by(2)
            .map(|i| u8::from_str_radix(&s[i..i + 2], 16).expect("valid hex"))
            .collect()
    }

    /// RFC 9001 Appendix A.1: DCID 0x8394c8f03e515708.
    #[test]
    fn initial_secrets_match_rfc9001_appendix_a() {
        let mut state = QuicCryptoState::default();
        state.first_dcid = hex_decode("8394c8f03e515708");
        derive_initial_secrets(&mut state);

        let keys = state.initial.as_ref().unwrap();
        assert_eq!(
            keys.client.key.to_vec(),
            hex_decode("1f369613dd76d5467730efcbe3b1a22d")
        );
        assert_eq!(keys.client.iv.to_vec(), hex_decode("fa044b2f42a3fd3b46fb255c"));
        assert_eq!(
            keys.client.hp_key.to_vec(),
            hex_decode("9f50449e04a0e810283a1e9933adedd2")
        );
        assert_eq!(
            keys.server.key.to_vec(),
            hex_decode("cf3a5331653c364c88f0f379b6067e37")
        );
        assert_eq!(keys.server.iv.to_vec(), hex_decode("0ac1493ca1905853b0bba03e"));
        assert_eq!(
            keys.server.hp_key.to_vec(),
            hex_decode("c206b8d9b9f0f37644430b490eeaa314")
        );
    }

    /// RFC 9001 Appendix A.5 Retry reference vector.
    #[test]
    fn retry_integrity_rfc9001_vector() {
        let odcid = hex_decode("8394c8f03e515708");

        // Header byte, version 1, empty dcid, 8-byte scid, token "token",
        // then the 16-byte tag from the appendix.
        let mut packet = hex_decode("ff0000000100");
        packet.extend_from_slice(&hex_decode("08f067a5502a4262b5"));
        packet.extend_from_slice(b"token");
        packet.extend_from_slice(&hex_decode("04a265ba2eff4d829058fb3f0f2496ba"));

        assert!(verify_retry_integrity(QuicVersion::V1, &odcid, &packet).unwrap());

        // Tampering with the token must fail verification.
        let mut tampered = packet.clone();
        let token_at = tampered.len() - RETRY_TAG_LEN - 5;
        tampered[token_at] ^= 0x01;
        assert!(!verify_retry_integrity(QuicVersion::V1, &odcid, &tampered).unwrap());
    }

    #[test]
    fn aes_mask_is_deterministic_and_keyed() {
        let key = [7u8; 16];
        let sample = [9u8; 16];
        let m1 = header_protection_mask(CipherAlgorithm::Aes128Gcm, &key, &sample).unwrap();
        let m2 = header_protection_mask(CipherAlgorithm::Aes128Gcm, &key, &sample).unwrap();
        assert_eq!(m1, m2);

        let other = header_protection_mask(CipherAlgorithm::Aes128Gcm, &[8u8; 16], &sample).unwrap();
        assert_ne!(m1, other);
    }

    #[test]
    fn chacha_mask_uses_counter_and_nonce_from_sample() {
        let key = [3u8; 32];
        let mut sample = [0u8; 16];
        sample[0] = 1; // counter = 1
        let m1 = header_protection_mask(CipherAlgorithm::ChaCha20Poly1305, &key, &sample).unwrap();

        sample[0] = 2; // different counter, same nonce
        let m2 = header_protection_mask(CipherAlgorithm::ChaCha20Poly1305, &key, &sample).unwrap();
        assert_ne!(m1, m2);
    }

    #[test]
    fn expand_label_lengths() {
        let secret = [0x42u8; 32];
        assert_eq!(hkdf_expand_label(&secret, b"quic key", &[], 16).len(), 16);
        assert_eq!(hkdf_expand_label(&secret, b"quic iv", &[], 12).len(), 12);
        assert_eq!(hkdf_expand_label(&secret, b"quic hp", &[], 32).len(), 32);
    }
}
