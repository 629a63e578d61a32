//! The record transform: one implementation per cipher family.
//!
//! Encrypt never drops input; decrypt failures are reported as a value so
//! the record layer can fall back to a flagged passthrough, keeping the
//! bytes for inspection.

use aes::cipher::{block_padding::NoPadding, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use aes_gcm::{
    aead::{Aead, KeyInit, Payload},
    Aes128Gcm, Aes256Gcm, Nonce,
};
use chacha20poly1305::ChaCha20Poly1305;
use hmac::{Hmac, Mac};
use rand::{rngs::OsRng, RngCore};
use rc4::consts::U16;
use rc4::{KeyInit as Rc4KeyInit, Rc4, StreamCipher as Rc4StreamCipher};
use sha2::{Sha256, Sha384};
use tinyvec::ArrayVec;

use crate::record::KeySet;
use crate::types::{CipherAlgorithm, ContentType, ProtocolVersion, Sequence};
use crate::Error;

type Aes128CbcEnc = cbc::Encryptor<aes::Aes128>;
type Aes128CbcDec = cbc::Decryptor<aes::Aes128>;
type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;
type HmacSha256 = Hmac<Sha256>;
type HmacSha384 = Hmac<Sha384>;

const CBC_BLOCK_LEN: usize = 16;

/// Decryption failed: bad tag, bad padding, or impossible framing.
///
/// Deliberately carries only a static reason. The record layer logs it and
/// preserves the ciphertext; nothing is thrown away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecryptError(pub &'static str);

/// Additional authenticated data / MAC header for one record:
/// epoch(2) || sequence(6) || type(1) || version(2) || length(2).
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Aad(ArrayVec<[u8; 13]>);

impl Aad {
    pub(crate) fn new(
        content_type: ContentType,
        version: ProtocolVersion,
        sequence: Sequence,
        length: u16,
    ) -> Self {
        let mut aad = ArrayVec::new();

        // Full 8-byte counter: epoch in the top 2 bytes, 48-bit sequence
        // number below.
        aad.extend_from_slice(&sequence.epoch.to_be_bytes());
        aad.extend_from_slice(&sequence.sequence_number.to_be_bytes()[2..]);

        aad.push(content_type.as_u8());
        aad.extend_from_slice(&version.as_u16().to_be_bytes());
        aad.extend_from_slice(&length.to_be_bytes());

        Aad(aad)
    }

    pub(crate) fn as_slice(&self) -> &[u8] {
        &self.0
    }
}

/// Full AEAD nonce: IV XOR left-padded sequence number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct AeadNonce(pub [u8; 12]);

impl AeadNonce {
    /// nonce = iv XOR pad_left(seq, iv_len), per RFC 8446 Section 5.3.
    pub(crate) fn xor(iv: &[u8; 12], seq: u64) -> Self {
        let mut nonce = *iv;
        let seq_bytes = seq.to_be_bytes(); // 8 bytes
        for i in 0..8 {
            nonce[4 + i] ^= seq_bytes[i];
        }
        Self(nonce)
    }
}

/// Active record transform for one direction of one epoch.
///
/// Stream ciphers keep their keystream position across records, so the
/// transform is stateful and owned by exactly one epoch/direction.
pub enum RecordCipher {
    /// Identity, used before any keys are installed.
    Null,
    Aead(AeadCipher),
    CbcHmac(CbcHmacCipher),
    Stream(StreamCipherState),
}

impl RecordCipher {
    pub fn new(keys: &KeySet) -> Result<Self, Error> {
        Ok(match keys.algorithm {
            CipherAlgorithm::Null => RecordCipher::Null,
            CipherAlgorithm::Aes128Gcm
            | CipherAlgorithm::Aes256Gcm
            | CipherAlgorithm::ChaCha20Poly1305 => RecordCipher::Aead(AeadCipher::new(keys)?),
            CipherAlgorithm::Aes128CbcHmacSha256 | CipherAlgorithm::Aes256CbcHmacSha384 => {
                RecordCipher::CbcHmac(CbcHmacCipher::new(keys))
            }
            CipherAlgorithm::Rc4HmacSha256 => RecordCipher::Stream(StreamCipherState::new(keys)?),
        })
    }

    /// Transform plaintext into a record payload.
    pub fn encrypt(
        &mut self,
        content_type: ContentType,
        version: ProtocolVersion,
        sequence: Sequence,
        plaintext: &[u8],
    ) -> Result<Vec<u8>, Error> {
        let aad = Aad::new(content_type, version, sequence, plaintext.len() as u16);
        match self {
            RecordCipher::Null => Ok(plaintext.to_vec()),
            RecordCipher::Aead(c) => c.encrypt(&aad, sequence.sequence_number, plaintext),
            RecordCipher::CbcHmac(c) => c.encrypt(&aad, plaintext),
            RecordCipher::Stream(c) => c.encrypt(&aad, plaintext),
        }
    }

    /// Transform a record payload back into plaintext.
    pub fn decrypt(
        &mut self,
        content_type: ContentType,
        version: ProtocolVersion,
        sequence: Sequence,
        payload: &[u8],
    ) -> Result<Vec<u8>, DecryptError> {
        match self {
            RecordCipher::Null => Ok(payload.to_vec()),
            RecordCipher::Aead(c) => {
                let plaintext_len = payload
                    .len()
                    .checked_sub(16)
                    .ok_or(DecryptError("payload shorter than tag"))?;
                let aad = Aad::new(content_type, version, sequence, plaintext_len as u16);
                c.decrypt(&aad, sequence.sequence_number, payload)
            }
            RecordCipher::CbcHmac(c) => {
                c.decrypt(content_type, version, sequence, payload)
            }
            RecordCipher::Stream(c) => c.decrypt(content_type, version, sequence, payload),
        }
    }

    /// Extra bytes this transform adds to a plaintext.
    pub fn overhead(&self) -> usize {
        match self {
            RecordCipher::Null => 0,
            RecordCipher::Aead(_) => 16,
            // Explicit IV + MAC + worst-case padding.
            RecordCipher::CbcHmac(c) => CBC_BLOCK_LEN + c.mac_len() + CBC_BLOCK_LEN,
            RecordCipher::Stream(c) => c.mac_len(),
        }
    }
}

/// AEAD family: AES-GCM 128/256 and ChaCha20-Poly1305.
pub struct AeadCipher {
    kind: AeadKind,
    iv: [u8; 12],
}

enum AeadKind {
    Aes128(Aes128Gcm),
    Aes256(Aes256Gcm),
    ChaCha(ChaCha20Poly1305),
}

impl AeadCipher {
    fn new(keys: &KeySet) -> Result<Self, Error> {
        let kind = match keys.algorithm {
            CipherAlgorithm::Aes128Gcm => AeadKind::Aes128(
                Aes128Gcm::new_from_slice(&keys.key)
                    .map_err(|_| Error::BadKeyMaterial("aes-128-gcm key"))?,
            ),
            CipherAlgorithm::Aes256Gcm => AeadKind::Aes256(
                Aes256Gcm::new_from_slice(&keys.key)
                    .map_err(|_| Error::BadKeyMaterial("aes-256-gcm key"))?,
            ),
            CipherAlgorithm::ChaCha20Poly1305 => AeadKind::ChaCha(
                ChaCha20Poly1305::new_from_slice(&keys.key)
                    .map_err(|_| Error::BadKeyMaterial("chacha20-poly1305 key"))?,
            ),
            _ => return Err(Error::BadKeyMaterial("not an aead algorithm")),
        };
        let iv: [u8; 12] = keys.iv[..]
            .try_into()
            .map_err(|_| Error::BadKeyMaterial("aead iv"))?;
        Ok(AeadCipher { kind, iv })
    }

    fn encrypt(&self, aad: &Aad, seq: u64, plaintext: &[u8]) -> Result<Vec<u8>, Error> {
        let nonce = AeadNonce::xor(&self.iv, seq);
        let nonce = Nonce::from_slice(&nonce.0);
        let payload = Payload {
            msg: plaintext,
            aad: aad.as_slice(),
        };
        let result = match &self.kind {
            AeadKind::Aes128(c) => c.encrypt(nonce, payload),
            AeadKind::Aes256(c) => c.encrypt(nonce, payload),
            AeadKind::ChaCha(c) => c.encrypt(nonce, payload),
        };
        result.map_err(|_| Error::Crypto("aead encrypt"))
    }

    fn decrypt(&self, aad: &Aad, seq: u64, ciphertext: &[u8]) -> Result<Vec<u8>, DecryptError> {
        let nonce = AeadNonce::xor(&self.iv, seq);
        let nonce = Nonce::from_slice(&nonce.0);
        let payload = Payload {
            msg: ciphertext,
            aad: aad.as_slice(),
        };
        let result = match &self.kind {
            AeadKind::Aes128(c) => c.decrypt(nonce, payload),
            AeadKind::Aes256(c) => c.decrypt(nonce, payload),
            AeadKind::ChaCha(c) => c.decrypt(nonce, payload),
        };
        result.map_err(|_| DecryptError("bad aead tag"))
    }
}

/// CBC-then-MAC family: MAC over header and plaintext, then pad and
/// CBC-encrypt with a fresh explicit IV per record.
pub struct CbcHmacCipher {
    algorithm: CipherAlgorithm,
    key: Vec<u8>,
    mac_key: Vec<u8>,
}

impl CbcHmacCipher {
    fn new(keys: &KeySet) -> Self {
        CbcHmacCipher {
            algorithm: keys.algorithm,
            key: keys.key.to_vec(),
            mac_key: keys.mac_key.to_vec(),
        }
    }

    fn mac_len(&self) -> usize {
        self.algorithm.mac_len()
    }

    fn compute_mac(&self, aad: &[u8], data: &[u8]) -> Vec<u8> {
        match self.algorithm {
            CipherAlgorithm::Aes256CbcHmacSha384 => {
                // Unwrap is OK, HMAC accepts any key length.
                let mut mac = <HmacSha384 as Mac>::new_from_slice(&self.mac_key).unwrap();
                mac.update(aad);
                mac.update(data);
                mac.finalize().into_bytes().to_vec()
            }
            _ => {
                let mut mac = <HmacSha256 as Mac>::new_from_slice(&self.mac_key).unwrap();
                mac.update(aad);
                mac.update(data);
                mac.finalize().into_bytes().to_vec()
            }
        }
    }

    fn encrypt(&self, aad: &Aad, plaintext: &[u8]) -> Result<Vec<u8>, Error> {
        let mac = self.compute_mac(aad.as_slice(), plaintext);

        // plaintext || MAC || padding, where the padding is p+1 bytes of
        // value p and the total is a block multiple.
        let mut block = Vec::with_capacity(plaintext.len() + mac.len() + CBC_BLOCK_LEN);
        block.extend_from_slice(plaintext);
        block.extend_from_slice(&mac);
        let pad = CBC_BLOCK_LEN - (block.len() + 1) % CBC_BLOCK_LEN;
        let pad = if pad == CBC_BLOCK_LEN { 0 } else { pad };
        for _ in 0..=pad {
            block.push(pad as u8);
        }

        let mut iv = [0u8; CBC_BLOCK_LEN];
        OsRng.fill_bytes(&mut iv);

        let encrypted = match self.algorithm {
            CipherAlgorithm::Aes256CbcHmacSha384 => {
                Aes256CbcEnc::new_from_slices(&self.key, &iv)
                    .map_err(|_| Error::BadKeyMaterial("aes-256-cbc key/iv"))?
                    .encrypt_padded_vec_mut::<NoPadding>(&block)
            }
            _ => Aes128CbcEnc::new_from_slices(&self.key, &iv)
                .map_err(|_| Error::BadKeyMaterial("aes-128-cbc key/iv"))?
                .encrypt_padded_vec_mut::<NoPadding>(&block),
        };

        let mut out = Vec::with_capacity(iv.len() + encrypted.len());
        out.extend_from_slice(&iv);
        out.extend_from_slice(&encrypted);
        Ok(out)
    }

    fn decrypt(
        &self,
        content_type: ContentType,
        version: ProtocolVersion,
        sequence: Sequence,
        payload: &[u8],
    ) -> Result<Vec<u8>, DecryptError> {
        if payload.len() < CBC_BLOCK_LEN * 2 || payload.len() % CBC_BLOCK_LEN != 0 {
            return Err(DecryptError("bad cbc framing"));
        }
        let (iv, ciphertext) = payload.split_at(CBC_BLOCK_LEN);

        let block = match self.algorithm {
            CipherAlgorithm::Aes256CbcHmacSha384 => {
                Aes256CbcDec::new_from_slices(&self.key, iv)
                    .map_err(|_| DecryptError("bad cbc key/iv"))?
                    .decrypt_padded_vec_mut::<NoPadding>(ciphertext)
                    .map_err(|_| DecryptError("cbc decrypt"))?
            }
            _ => Aes128CbcDec::new_from_slices(&self.key, iv)
                .map_err(|_| DecryptError("bad cbc key/iv"))?
                .decrypt_padded_vec_mut::<NoPadding>(ciphertext)
                .map_err(|_| DecryptError("cbc decrypt"))?,
        };

        // Strip padding: p+1 trailing bytes of value p.
        let pad = *block.last().ok_or(DecryptError("empty cbc block"))? as usize;
        if block.len() < pad + 1 + self.mac_len() {
            return Err(DecryptError("bad cbc padding"));
        }
        if block[block.len() - 1 - pad..].iter().any(|&b| b as usize != pad) {
            return Err(DecryptError("bad cbc padding"));
        }
        let stripped = &block[..block.len() - 1 - pad];

        let (plaintext, mac) = stripped.split_at(stripped.len() - self.mac_len());

        let aad = Aad::new(content_type, version, sequence, plaintext.len() as u16);
        let expected = self.compute_mac(aad.as_slice(), plaintext);
        if expected != mac {
            return Err(DecryptError("bad record mac"));
        }

        Ok(plaintext.to_vec())
    }
}

/// Legacy stream cipher family: RC4 with an appended HMAC.
///
/// The keystream runs continuously across records, which is why the
/// transform is `&mut` and bound to one direction.
pub struct StreamCipherState {
    rc4: Rc4<U16>,
    mac: RecordMac,
}

struct RecordMac {
    mac_key: Vec<u8>,
}

impl RecordMac {
    fn compute(&self, aad: &[u8], data: &[u8]) -> Vec<u8> {
        // Unwrap is OK, HMAC accepts any key length.
        let mut mac = <HmacSha256 as Mac>::new_from_slice(&self.mac_key).unwrap();
        mac.update(aad);
        mac.update(data);
        mac.finalize().into_bytes().to_vec()
    }
}

impl StreamCipherState {
    fn new(keys: &KeySet) -> Result<Self, Error> {
        let rc4 = Rc4::new_from_slice(&keys.key).map_err(|_| Error::BadKeyMaterial("rc4 key"))?;
        Ok(StreamCipherState {
            rc4,
            mac: RecordMac {
                mac_key: keys.mac_key.to_vec(),
            },
        })
    }

    fn mac_len(&self) -> usize {
        32
    }

    fn encrypt(&mut self, aad: &Aad, plaintext: &[u8]) -> Result<Vec<u8>, Error> {
        let mac = self.mac.compute(aad.as_slice(), plaintext);

        let mut buf = Vec::with_capacity(plaintext.len() + mac.len());
        buf.extend_from_slice(plaintext);
        buf.extend_from_slice(&mac);
        self.rc4.apply_keystream(&mut buf);
        Ok(buf)
    }

    fn decrypt(
        &mut self,
        content_type: ContentType,
        version: ProtocolVersion,
        sequence: Sequence,
        payload: &[u8],
    ) -> Result<Vec<u8>, DecryptError> {
        if payload.len() < self.mac_len() {
            return Err(DecryptError("payload shorter than mac"));
        }

        let mut buf = payload.to_vec();
        self.rc4.apply_keystream(&mut buf);

        let (plaintext, mac) = buf.split_at(buf.len() - self.mac_len());
        let aad = Aad::new(content_type, version, sequence, plaintext.len() as u16);
        let expected = self.mac.compute(aad.as_slice(), plaintext);
        if expected != mac {
            return Err(DecryptError("bad record mac"));
        }

        Ok(plaintext.to_vec())
    }
}
