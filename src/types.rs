use std::fmt;

use nom::number::complete::{be_u16, be_u8};
use nom::IResult;

/// TLS/DTLS record content type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentType {
    ChangeCipherSpec,
    Alert,
    Handshake,
    ApplicationData,
    Unknown(u8),
}

impl ContentType {
    pub fn from_u8(value: u8) -> Self {
        match value {
            20 => ContentType::ChangeCipherSpec,
            21 => ContentType::Alert,
            22 => ContentType::Handshake,
            23 => ContentType::ApplicationData,
            _ => ContentType::Unknown(value),
        }
    }

    pub fn as_u8(&self) -> u8 {
        match self {
            ContentType::ChangeCipherSpec => 20,
            ContentType::Alert => 21,
            ContentType::Handshake => 22,
            ContentType::ApplicationData => 23,
            ContentType::Unknown(value) => *value,
        }
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], ContentType> {
        let (input, byte) = be_u8(input)?;
        Ok((input, Self::from_u8(byte)))
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContentType::Unknown(v) => write!(f, "Unknown({})", v),
            other => write!(f, "{:?}", other),
        }
    }
}

/// TLS/DTLS protocol version as carried on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolVersion {
    SSL3_0,
    TLS1_0,
    TLS1_2,
    TLS1_3,
    DTLS1_0,
    DTLS1_2,
    Unknown(u16),
}

impl ProtocolVersion {
    pub fn from_u16(value: u16) -> Self {
        match value {
            0x0300 => ProtocolVersion::SSL3_0,
            0x0301 => ProtocolVersion::TLS1_0,
            0x0303 => ProtocolVersion::TLS1_2,
            0x0304 => ProtocolVersion::TLS1_3,
            0xfeff => ProtocolVersion::DTLS1_0,
            0xfefd => ProtocolVersion::DTLS1_2,
            _ => ProtocolVersion::Unknown(value),
        }
    }

    pub fn as_u16(&self) -> u16 {
        match self {
            ProtocolVersion::SSL3_0 => 0x0300,
            ProtocolVersion::TLS1_0 => 0x0301,
            ProtocolVersion::TLS1_2 => 0x0303,
            ProtocolVersion::TLS1_3 => 0x0304,
            ProtocolVersion::DTLS1_0 => 0xfeff,
            ProtocolVersion::DTLS1_2 => 0xfefd,
            ProtocolVersion::Unknown(value) => *value,
        }
    }

    /// Whether this is a datagram (DTLS) version.
    pub fn is_dtls(&self) -> bool {
        matches!(self, ProtocolVersion::DTLS1_0 | ProtocolVersion::DTLS1_2)
    }

    pub fn parse(input: &[u8]) -> IResult<&[u8], ProtocolVersion> {
        let (input, value) = be_u16(input)?;
        Ok((input, Self::from_u16(value)))
    }

    pub fn serialize(&self, output: &mut Vec<u8>) {
        output.extend_from_slice(&self.as_u16().to_be_bytes());
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Epoch plus 48-bit sequence number, the DTLS record counter pair.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct Sequence {
    pub epoch: u16,
    pub sequence_number: u64,
}

impl fmt::Display for Sequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.epoch, self.sequence_number)
    }
}

/// The closed set of record transform algorithms this engine implements.
///
/// Cipher-suite-to-algorithm resolution happens outside the engine; callers
/// install one of these labels together with key material. The set is
/// deliberately small: one representative per transform family plus the
/// AEAD variants QUIC needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CipherAlgorithm {
    /// Identity transform, used before any keys are installed.
    Null,
    Aes128Gcm,
    Aes256Gcm,
    ChaCha20Poly1305,
    Aes128CbcHmacSha256,
    Aes256CbcHmacSha384,
    Rc4HmacSha256,
}

/// Record transform family, deciding the framing arithmetic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CipherFamily {
    Null,
    Aead,
    CbcHmac,
    Stream,
}

impl CipherAlgorithm {
    pub fn family(&self) -> CipherFamily {
        match self {
            CipherAlgorithm::Null => CipherFamily::Null,
            CipherAlgorithm::Aes128Gcm
            | CipherAlgorithm::Aes256Gcm
            | CipherAlgorithm::ChaCha20Poly1305 => CipherFamily::Aead,
            CipherAlgorithm::Aes128CbcHmacSha256 | CipherAlgorithm::Aes256CbcHmacSha384 => {
                CipherFamily::CbcHmac
            }
            CipherAlgorithm::Rc4HmacSha256 => CipherFamily::Stream,
        }
    }

    /// Symmetric key length in bytes.
    pub fn key_len(&self) -> usize {
        match self {
            CipherAlgorithm::Null => 0,
            CipherAlgorithm::Aes128Gcm | CipherAlgorithm::Aes128CbcHmacSha256 => 16,
            CipherAlgorithm::Aes256Gcm
            | CipherAlgorithm::ChaCha20Poly1305
            | CipherAlgorithm::Aes256CbcHmacSha384 => 32,
            CipherAlgorithm::Rc4HmacSha256 => 16,
        }
    }

    /// IV length in bytes (AEAD fixed IV or CBC block size).
    pub fn iv_len(&self) -> usize {
        match self {
            CipherAlgorithm::Null | CipherAlgorithm::Rc4HmacSha256 => 0,
            CipherAlgorithm::Aes128Gcm
            | CipherAlgorithm::Aes256Gcm
            | CipherAlgorithm::ChaCha20Poly1305 => 12,
            CipherAlgorithm::Aes128CbcHmacSha256 | CipherAlgorithm::Aes256CbcHmacSha384 => 16,
        }
    }

    /// MAC key length in bytes, zero for AEAD and null.
    pub fn mac_key_len(&self) -> usize {
        match self {
            CipherAlgorithm::Aes128CbcHmacSha256 | CipherAlgorithm::Rc4HmacSha256 => 32,
            CipherAlgorithm::Aes256CbcHmacSha384 => 48,
            _ => 0,
        }
    }

    /// MAC output length in bytes, zero for AEAD and null.
    pub fn mac_len(&self) -> usize {
        match self {
            CipherAlgorithm::Aes128CbcHmacSha256 | CipherAlgorithm::Rc4HmacSha256 => 32,
            CipherAlgorithm::Aes256CbcHmacSha384 => 48,
            _ => 0,
        }
    }

    /// AEAD tag length, zero for non-AEAD families.
    pub fn tag_len(&self) -> usize {
        match self.family() {
            CipherFamily::Aead => 16,
            _ => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_type_u8_roundtrip() {
        for v in [20u8, 21, 22, 23, 99] {
            assert_eq!(ContentType::from_u8(v).as_u8(), v);
        }
    }

    #[test]
    fn version_u16_roundtrip() {
        for v in [0x0300u16, 0x0301, 0x0303, 0x0304, 0xfeff, 0xfefd, 0x1234] {
            assert_eq!(ProtocolVersion::from_u16(v).as_u16(), v);
        }
    }

    #[test]
    fn family_lengths_consistent() {
        use CipherAlgorithm::*;
        for alg in [
            Null,
            Aes128Gcm,
            Aes256Gcm,
            ChaCha20Poly1305,
            Aes128CbcHmacSha256,
            Aes256CbcHmacSha384,
            Rc4HmacSha256,
        ] {
            match alg.family() {
                CipherFamily::Aead => {
                    assert_eq!(alg.tag_len(), 16);
                    assert_eq!(alg.mac_len(), 0);
                }
                CipherFamily::CbcHmac | CipherFamily::Stream => {
                    assert_eq!(alg.tag_len(), 0);
                    assert!(alg.mac_len() > 0);
                }
                CipherFamily::Null => {
                    assert_eq!(alg.key_len(), 0);
                }
            }
        }
    }
}
