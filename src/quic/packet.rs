//! QUIC packet sealing and opening.
//!
//! Long (Initial/0-RTT/Handshake) and short (1-RTT) headers, payload
//! AEAD under the per-level keys, and header protection via
//! [`crate::quic::crypto`]. A packet that cannot be opened degrades into
//! a flagged passthrough container; the bytes are never discarded.

use aes_gcm::{
    aead::{Aead, KeyInit, Payload},
    Aes128Gcm, Aes256Gcm, Nonce,
};
use chacha20poly1305::ChaCha20Poly1305;

use crate::buffer::Buf;
use crate::container::{Container, UnrecognizedContainer};
use crate::context::{ConnectionContext, DirectionKeys};
use crate::hint::Hint;
use crate::layer::{Chunk, LayerCore, LayerKind, Lower, Progress, ProtocolLayer};
use crate::quic::crypto::header_protection_mask;
use crate::quic::varint::{parse_varint, serialize_varint};
use crate::quic::{PacketSpace, QuicVersion};
use crate::types::CipherAlgorithm;
use crate::Error;

const AEAD_TAG_LEN: usize = 16;
const SAMPLE_LEN: usize = 16;
const RETRY_TAG_LEN: usize = 16;

/// Wire packet type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketType {
    Initial,
    ZeroRtt,
    Handshake,
    OneRtt,
    Retry,
}

impl PacketType {
    pub fn space(&self) -> PacketSpace {
        match self {
            PacketType::Initial | PacketType::Retry => PacketSpace::Initial,
            PacketType::Handshake => PacketSpace::Handshake,
            PacketType::ZeroRtt | PacketType::OneRtt => PacketSpace::ApplicationData,
        }
    }

    fn long_type_bits(&self) -> u8 {
        match self {
            PacketType::Initial => 0,
            PacketType::ZeroRtt => 1,
            PacketType::Handshake => 2,
            PacketType::Retry => 3,
            PacketType::OneRtt => unreachable!("1-RTT is a short header"),
        }
    }
}

/// One packet as produced by this layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketContainer {
    pub packet_type: PacketType,
    pub packet_number: Option<u64>,
    /// Decrypted frame bytes, or the protected payload when opening
    /// failed.
    pub payload: Vec<u8>,
    pub raw: Vec<u8>,
    pub decrypt_failed: bool,
}

/// The QUIC packet layer.
pub struct QuicPacketLayer {
    core: LayerCore,
    /// Connection ids stamped into long headers.
    dcid: Vec<u8>,
    scid: Vec<u8>,
}

impl QuicPacketLayer {
    pub fn new(dcid: Vec<u8>, scid: Vec<u8>) -> Self {
        QuicPacketLayer {
            core: LayerCore::new(LayerKind::QuicPacket),
            dcid,
            scid,
        }
    }

    /// AEAD algorithm for a level: Initial is fixed to AES-128-GCM, the
    /// rest use the negotiated AEAD.
    fn level_aead(ctx: &ConnectionContext, packet_type: PacketType) -> CipherAlgorithm {
        match packet_type {
            PacketType::Initial | PacketType::Retry => CipherAlgorithm::Aes128Gcm,
            _ => ctx.quic.aead,
        }
    }

    fn seal_keys<'c>(
        ctx: &'c ConnectionContext,
        packet_type: PacketType,
    ) -> Result<&'c DirectionKeys, Error> {
        let keys = match packet_type {
            PacketType::Initial | PacketType::Retry => ctx.quic.initial.as_ref(),
            PacketType::Handshake => ctx.quic.handshake.as_ref(),
            PacketType::ZeroRtt => ctx.quic.zero_rtt.as_ref(),
            PacketType::OneRtt => ctx.quic.application.as_ref(),
        };
        keys.map(|k| k.local(ctx.is_client))
            .ok_or(Error::MissingSecrets(match packet_type {
                PacketType::Initial | PacketType::Retry => "initial",
                PacketType::Handshake => "handshake",
                PacketType::ZeroRtt => "0-rtt",
                PacketType::OneRtt => "1-rtt",
            }))
    }

    fn open_keys<'c>(
        ctx: &'c ConnectionContext,
        packet_type: PacketType,
    ) -> Option<&'c DirectionKeys> {
        let keys = match packet_type {
            PacketType::Initial | PacketType::Retry => ctx.quic.initial.as_ref(),
            PacketType::Handshake => ctx.quic.handshake.as_ref(),
            PacketType::ZeroRtt => ctx.quic.zero_rtt.as_ref(),
            PacketType::OneRtt => ctx.quic.application.as_ref(),
        };
        keys.map(|k| k.remote(ctx.is_client))
    }

    /// The packet type for an outbound payload in a space, decided by
    /// installed secrets for the application space.
    fn outbound_type(ctx: &ConnectionContext, space: PacketSpace) -> PacketType {
        match space {
            PacketSpace::Initial => PacketType::Initial,
            PacketSpace::Handshake => PacketType::Handshake,
            PacketSpace::ApplicationData => {
                if ctx.quic.application.is_some() {
                    PacketType::OneRtt
                } else {
                    PacketType::ZeroRtt
                }
            }
        }
    }

    /// Build, seal and protect one packet.
    fn seal_packet(
        &mut self,
        ctx: &mut ConnectionContext,
        packet_type: PacketType,
        payload: &[u8],
    ) -> Result<(Vec<u8>, u64), Error> {
        let space = packet_type.space();
        let packet_number = ctx.quic.next_packet_number(space);
        let pn_len: usize = if packet_number < 0x1_0000 { 2 } else { 4 };

        let aead = Self::level_aead(ctx, packet_type);
        let keys = Self::seal_keys(ctx, packet_type)?.clone();

        // Header up to and including the unprotected packet number.
        let mut header = Vec::new();
        match packet_type {
            PacketType::OneRtt => {
                header.push(0x40 | (pn_len - 1) as u8);
                header.extend_from_slice(&self.dcid);
            }
            _ => {
                header.push(
                    0xc0 | (packet_type.long_type_bits() << 4) | (pn_len - 1) as u8,
                );
                header.extend_from_slice(&ctx.quic.version.as_u32().to_be_bytes());
                header.push(self.dcid.len() as u8);
                header.extend_from_slice(&self.dcid);
                header.push(self.scid.len() as u8);
                header.extend_from_slice(&self.scid);
                if packet_type == PacketType::Initial {
                    // Empty token.
                    serialize_varint(0, &mut header);
                }
                serialize_varint((pn_len + payload.len() + AEAD_TAG_LEN) as u64, &mut header);
            }
        }
        let pn_offset = header.len();
        header.extend_from_slice(&packet_number.to_be_bytes()[8 - pn_len..]);

        let nonce = nonce_for(&keys.iv, packet_number);
        let sealed = aead_seal(aead, &keys.key, &nonce, &header, payload)?;

        let mut wire = header;
        wire.extend_from_slice(&sealed);

        // Header protection: sample starts 4 bytes past the packet number
        // offset.
        let sample_at = pn_offset + 4;
        if wire.len() < sample_at + SAMPLE_LEN {
            return Err(Error::Crypto("packet too short to sample"));
        }
        // Unwrap is OK, the slice is exactly SAMPLE_LEN.
        let sample: [u8; 16] = wire[sample_at..sample_at + SAMPLE_LEN].try_into().unwrap();
        let mask = header_protection_mask(aead, &keys.hp_key, &sample)?;

        let first_mask = if packet_type == PacketType::OneRtt {
            0x1f
        } else {
            0x0f
        };
        wire[0] ^= mask[0] & first_mask;
        for i in 0..pn_len {
            wire[pn_offset + i] ^= mask[1 + i];
        }

        trace!(
            "packet tx {:?} pn {} payload {}",
            packet_type,
            packet_number,
            payload.len()
        );
        Ok((wire, packet_number))
    }

    /// Parse, unprotect and open one packet from the front of `input`.
    /// Returns the container and the bytes consumed.
    fn open_packet(
        &mut self,
        ctx: &mut ConnectionContext,
        input: &[u8],
    ) -> Option<(PacketContainer, usize)> {
        if input.is_empty() {
            return None;
        }
        let first = input[0];

        if first & 0x80 == 0 {
            // Short header: dcid is ours (scid on the wire), everything
            // after it is protected payload reaching to the datagram end.
            let pn_offset = 1 + self.scid.len();
            let consumed = input.len();
            let container =
                self.open_protected(ctx, PacketType::OneRtt, input, pn_offset, consumed);
            return Some((container, consumed));
        }

        // Long header.
        let mut at = 1;
        if input.len() < at + 4 {
            return None;
        }
        let version = u32::from_be_bytes(input[at..at + 4].try_into().unwrap());
        at += 4;
        let packet_type = match version {
            v if v == QuicVersion::V1.as_u32() || v == QuicVersion::Draft29.as_u32() => {
                match (first >> 4) & 0x03 {
                    0 => PacketType::Initial,
                    1 => PacketType::ZeroRtt,
                    2 => PacketType::Handshake,
                    _ => PacketType::Retry,
                }
            }
            _ => {
                debug!("unknown quic version {:#010x}", version);
                return Some((
                    PacketContainer {
                        packet_type: PacketType::Initial,
                        packet_number: None,
                        payload: input.to_vec(),
                        raw: input.to_vec(),
                        decrypt_failed: true,
                    },
                    input.len(),
                ));
            }
        };

        // Connection ids.
        let dcid_len = *input.get(at)? as usize;
        at += 1 + dcid_len;
        let scid_len = *input.get(at)? as usize;
        at += 1 + scid_len;
        if at > input.len() {
            return None;
        }

        if packet_type == PacketType::Retry {
            // Retry: token up to the 16-byte integrity tag, no packet
            // number, consumes the rest of the datagram.
            let ok = crate::quic::crypto::verify_retry_integrity(
                ctx.quic.version,
                &ctx.quic.first_dcid,
                input,
            )
            .unwrap_or(false);
            let token_end = input.len().saturating_sub(RETRY_TAG_LEN).max(at);
            return Some((
                PacketContainer {
                    packet_type,
                    packet_number: None,
                    payload: input[at..token_end].to_vec(),
                    raw: input.to_vec(),
                    decrypt_failed: !ok,
                },
                input.len(),
            ));
        }

        if packet_type == PacketType::Initial {
            let (rest, token) = parse_varint_prefixed(&input[at..])?;
            let _ = token;
            at = input.len() - rest.len();
        }

        let (rest, length) = match parse_varint(&input[at..]) {
            Ok(r) => r,
            Err(_) => return None,
        };
        at = input.len() - rest.len();
        let end = at.checked_add(length as usize)?;
        if end > input.len() {
            return None;
        }

        let container = self.open_protected(ctx, packet_type, &input[..end], at, end);
        Some((container, end))
    }

    /// Remove header protection and AEAD-open a packet whose protected
    /// packet number starts at `pn_offset` and whose wire image ends at
    /// `end`.
    fn open_protected(
        &mut self,
        ctx: &mut ConnectionContext,
        packet_type: PacketType,
        wire: &[u8],
        pn_offset: usize,
        end: usize,
    ) -> PacketContainer {
        let aead = Self::level_aead(ctx, packet_type);
        let failed = |reason: &'static str| {
            debug!("cannot open {:?} packet: {}", packet_type, reason);
            PacketContainer {
                packet_type,
                packet_number: None,
                payload: wire[..end].to_vec(),
                raw: wire[..end].to_vec(),
                decrypt_failed: true,
            }
        };

        let Some(keys) = Self::open_keys(ctx, packet_type) else {
            return failed("no keys installed");
        };
        let keys = keys.clone();

        let sample_at = pn_offset + 4;
        if end < sample_at + SAMPLE_LEN {
            return failed("too short to sample");
        }
        // Unwrap is OK, the slice is exactly SAMPLE_LEN.
        let sample: [u8; 16] = wire[sample_at..sample_at + SAMPLE_LEN].try_into().unwrap();
        let Ok(mask) = header_protection_mask(aead, &keys.hp_key, &sample) else {
            return failed("header protection");
        };

        let mut unprotected = wire[..end].to_vec();
        let first_mask = if packet_type == PacketType::OneRtt {
            0x1f
        } else {
            0x0f
        };
        unprotected[0] ^= mask[0] & first_mask;
        let pn_len = (unprotected[0] & 0x03) as usize + 1;
        if pn_offset + pn_len > end {
            return failed("truncated packet number");
        }
        for i in 0..pn_len {
            unprotected[pn_offset + i] ^= mask[1 + i];
        }

        let mut truncated = 0u64;
        for &b in &unprotected[pn_offset..pn_offset + pn_len] {
            truncated = (truncated << 8) | b as u64;
        }
        let space = packet_type.space();
        let packet_number = decode_packet_number(
            ctx.quic.largest_received(space).map_or(0, |l| l + 1),
            truncated,
            pn_len,
        );

        let header = &unprotected[..pn_offset + pn_len];
        let protected = &unprotected[pn_offset + pn_len..];
        let nonce = nonce_for(&keys.iv, packet_number);

        let payload = match aead_open(aead, &keys.key, &nonce, header, protected) {
            Ok(p) => p,
            Err(_) => {
                warn!(
                    "{:?} packet pn {} failed to open, preserving {} bytes",
                    packet_type,
                    packet_number,
                    wire[..end].len()
                );
                return PacketContainer {
                    packet_type,
                    packet_number: Some(packet_number),
                    payload: wire[..end].to_vec(),
                    raw: wire[..end].to_vec(),
                    decrypt_failed: true,
                };
            }
        };

        ctx.quic.note_received(space, packet_number);
        trace!(
            "packet rx {:?} pn {} payload {}",
            packet_type,
            packet_number,
            payload.len()
        );

        PacketContainer {
            packet_type,
            packet_number: Some(packet_number),
            payload,
            raw: wire[..end].to_vec(),
            decrypt_failed: false,
        }
    }

    /// Process buffered datagram bytes into packets, queuing decrypted
    /// payloads upward. `None` means nothing could be produced.
    fn process_buffered(&mut self, ctx: &mut ConnectionContext) -> Option<Progress> {
        let mut progress = None;
        loop {
            let leftover: Vec<u8> = self.core.leftover().to_vec();
            if leftover.is_empty() {
                return progress;
            }

            match self.open_packet(ctx, &leftover) {
                Some((container, consumed)) => {
                    self.core.leftover().consume(consumed);

                    if !container.decrypt_failed {
                        self.core.push_upward(Chunk::new(
                            Some(Hint::quic_packet(container.packet_type.space())),
                            Buf::from_slice(&container.payload),
                        ));
                    }
                    let p = self.core.record_container(Container::QuicPacket(container));
                    progress = Some(p);
                    if p != Progress::Continue {
                        return progress;
                    }
                }
                None => {
                    // Not even a parseable header: preserve and surface.
                    self.core.leftover().clear();
                    debug!("unparseable packet, {} bytes preserved", leftover.len());
                    return Some(self.core.record_container(Container::Unrecognized(
                        UnrecognizedContainer {
                            bytes: leftover,
                            reason: "packet header",
                        },
                    )));
                }
            }
        }
    }
}

impl ProtocolLayer for QuicPacketLayer {
    fn kind(&self) -> LayerKind {
        LayerKind::QuicPacket
    }

    fn core(&self) -> &LayerCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut LayerCore {
        &mut self.core
    }

    fn send_configuration(
        &mut self,
        _ctx: &mut ConnectionContext,
        _lower: &mut Lower<'_>,
    ) -> Result<(), Error> {
        // Packets are built from frame-layer data, not from templates.
        Err(Error::UnsupportedConfiguration(
            LayerKind::QuicPacket,
            "packet layer sends only frame-layer data",
        ))
    }

    fn send_data(
        &mut self,
        ctx: &mut ConnectionContext,
        hint: Option<&Hint>,
        data: &[u8],
        lower: &mut Lower<'_>,
    ) -> Result<(), Error> {
        let space = hint
            .and_then(|h| h.as_quic_packet())
            .map(|h| h.space)
            .unwrap_or(PacketSpace::ApplicationData);
        let packet_type = Self::outbound_type(ctx, space);

        let (wire, packet_number) = self.seal_packet(ctx, packet_type, data)?;

        self.core.record_container(Container::QuicPacket(PacketContainer {
            packet_type,
            packet_number: Some(packet_number),
            payload: data.to_vec(),
            raw: wire.clone(),
            decrypt_failed: false,
        }));

        lower.send_data(ctx, None, &wire)
    }

    fn receive_data(
        &mut self,
        ctx: &mut ConnectionContext,
        lower: &mut Lower<'_>,
    ) -> Result<(), Error> {
        loop {
            match self.process_buffered(ctx) {
                Some(Progress::Continue) => continue,
                Some(_) => break,
                None => match lower.receive_more_for_hint(ctx, None)? {
                    Some(chunk) => {
                        self.core.leftover().extend_from_slice(&chunk.data);
                    }
                    None => break,
                },
            }
        }
        Ok(())
    }

    fn receive_more_for_hint(
        &mut self,
        ctx: &mut ConnectionContext,
        hint: Option<&Hint>,
        lower: &mut Lower<'_>,
    ) -> Result<Option<Chunk>, Error> {
        loop {
            if let Some(chunk) = self.core.pop_upward(hint) {
                return Ok(Some(chunk));
            }
            self.process_buffered(ctx);
            if let Some(chunk) = self.core.pop_upward(hint) {
                return Ok(Some(chunk));
            }
            match lower.receive_more_for_hint(ctx, None)? {
                Some(chunk) => {
                    self.core.leftover().extend_from_slice(&chunk.data);
                }
                None => return Ok(None),
            }
        }
    }
}

fn parse_varint_prefixed(input: &[u8]) -> Option<(&[u8], &[u8])> {
    let (rest, len) = parse_varint(input).ok()?;
    if len as usize > rest.len() {
        return None;
    }
    let (bytes, rest) = rest.split_at(len as usize);
    Some((rest, bytes))
}

/// nonce = iv XOR left-padded packet number.
fn nonce_for(iv: &[u8], packet_number: u64) -> [u8; 12] {
    let mut nonce = [0u8; 12];
    nonce[..iv.len().min(12)].copy_from_slice(&iv[..iv.len().min(12)]);
    let pn = packet_number.to_be_bytes();
    for i in 0..8 {
        nonce[4 + i] ^= pn[i];
    }
    nonce
}

/// Recover a full packet number from its truncated wire encoding
/// (RFC 9000 Appendix A.3).
fn decode_packet_number(expected: u64, truncated: u64, pn_len: usize) -> u64 {
    let bits = pn_len as u32 * 8;
    let win = 1u64 << bits;
    let hwin = win / 2;
    let mask = win - 1;

    let candidate = (expected & !mask) | truncated;
    if candidate + hwin <= expected && candidate + win < (1 << 62) {
        candidate + win
    } else if candidate > expected + hwin && candidate >= win {
        candidate - win
    } else {
        candidate
    }
}

fn aead_seal(
    aead: CipherAlgorithm,
    key: &[u8],
    nonce: &[u8; 12],
    aad: &[u8],
    plaintext: &[u8],
) -> Result<Vec<u8>, Error> {
    let nonce = Nonce::from_slice(nonce);
    let payload = Payload {
        msg: plaintext,
        aad,
    };
    let result = match aead {
        CipherAlgorithm::Aes128Gcm => Aes128Gcm::new_from_slice(key)
            .map_err(|_| Error::BadKeyMaterial("packet key"))?
            .encrypt(nonce, payload),
        CipherAlgorithm::Aes256Gcm => Aes256Gcm::new_from_slice(key)
            .map_err(|_| Error::BadKeyMaterial("packet key"))?
            .encrypt(nonce, payload),
        CipherAlgorithm::ChaCha20Poly1305 => ChaCha20Poly1305::new_from_slice(key)
            .map_err(|_| Error::BadKeyMaterial("packet key"))?
            .encrypt(nonce, payload),
        _ => return Err(Error::BadKeyMaterial("not a quic aead")),
    };
    result.map_err(|_| Error::Crypto("packet seal"))
}

fn aead_open(
    aead: CipherAlgorithm,
    key: &[u8],
    nonce: &[u8; 12],
    aad: &[u8],
    ciphertext: &[u8],
) -> Result<Vec<u8>, ()> {
    let nonce = Nonce::from_slice(nonce);
    let payload = Payload {
        msg: ciphertext,
        aad,
    };
    let result = match aead {
        CipherAlgorithm::Aes128Gcm => Aes128Gcm::new_from_slice(key)
            .map_err(|_| ())?
            .decrypt(nonce, payload),
        CipherAlgorithm::Aes256Gcm => Aes256Gcm::new_from_slice(key)
            .map_err(|_| ())?
            .decrypt(nonce, payload),
        CipherAlgorithm::ChaCha20Poly1305 => ChaCha20Poly1305::new_from_slice(key)
            .map_err(|_| ())?
            .decrypt(nonce, payload),
        _ => return Err(()),
    };
    result.map_err(|_| ())
}
