//! The record layer: fragments/coalesces data into wire records, applies
//! the active cipher, and tracks read/write epochs and sequence numbers.
//!
//! Three framings share this layer: TLS (stream records), DTLS (records
//! with explicit epoch and 48-bit sequence number) and legacy SSLv2
//! (2-byte msb-set headers). Cryptographic treatment of a DTLS record is
//! selected by the epoch carried on the wire, not the connection's
//! current epoch, because retransmissions from a prior epoch may arrive
//! after a rekey.

mod cipher;
mod keys;

pub use cipher::{DecryptError, RecordCipher};
pub use keys::{KeySet, ReplayWindow};

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::buffer::Buf;
use crate::config::Config;
use crate::container::{Container, ContainerKind, UnrecognizedContainer};
use crate::context::ConnectionContext;
use crate::hint::Hint;
use crate::layer::{Chunk, LayerCore, LayerKind, Lower, Progress, ProtocolLayer};
use crate::types::{ContentType, ProtocolVersion, Sequence};
use crate::Error;

/// Upper bound on an incoming record payload before we call the framing
/// garbage: max plaintext plus generous expansion room.
const MAX_WIRE_PAYLOAD: usize = 16_384 + 2_048;

const TLS_HEADER_LEN: usize = 5;
const DTLS_HEADER_LEN: usize = 13;
const SSLV2_HEADER_LEN: usize = 2;

/// Which wire framing the layer speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordMode {
    Tls,
    Dtls,
    Sslv2,
}

/// One record as produced by this layer.
///
/// `payload` is the plaintext when decryption succeeded, otherwise the
/// untouched ciphertext with `decrypt_failed` set. `raw` is always the
/// full wire image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordContainer {
    pub content_type: ContentType,
    pub version: ProtocolVersion,
    pub sequence: Sequence,
    pub payload: Vec<u8>,
    pub raw: Vec<u8>,
    pub decrypt_failed: bool,
}

/// Per-direction epoch bookkeeping.
struct DirectionState {
    active_epoch: u16,
    epochs: BTreeMap<u16, EpochState>,
}

struct EpochState {
    cipher: RecordCipher,
    sequence: u64,
    replay: ReplayWindow,
}

impl EpochState {
    fn null() -> Self {
        EpochState {
            cipher: RecordCipher::Null,
            sequence: 0,
            replay: ReplayWindow::new(),
        }
    }
}

impl DirectionState {
    fn new() -> Self {
        let mut epochs = BTreeMap::new();
        // Epoch 0 is the null cipher until keys are installed.
        epochs.insert(0, EpochState::null());
        DirectionState {
            active_epoch: 0,
            epochs,
        }
    }

    /// State for an epoch, creating a null-cipher one if the peer (or an
    /// attack script) references an epoch we never keyed.
    fn state_mut(&mut self, epoch: u16) -> &mut EpochState {
        self.epochs.entry(epoch).or_insert_with(|| {
            debug!("no keys for epoch {}, using null cipher", epoch);
            EpochState::null()
        })
    }

    fn active_mut(&mut self) -> &mut EpochState {
        let epoch = self.active_epoch;
        self.state_mut(epoch)
    }

    /// Install a fresh key set for an epoch. The per-epoch sequence
    /// counter starts at 0; an existing counter is never reused.
    fn install(&mut self, epoch: u16, keys: KeySet) -> Result<(), Error> {
        let cipher = RecordCipher::new(&keys)?;
        self.epochs.insert(
            epoch,
            EpochState {
                cipher,
                sequence: 0,
                replay: ReplayWindow::new(),
            },
        );
        Ok(())
    }
}

enum Step {
    /// A container was produced and recorded.
    Produced(Progress),
    /// Not enough buffered bytes for the next record.
    NeedMore,
}

/// The record layer.
pub struct RecordLayer {
    config: Arc<Config>,
    core: LayerCore,
    mode: RecordMode,
    write: DirectionState,
    read: DirectionState,
}

impl RecordLayer {
    pub fn new(config: Arc<Config>, mode: RecordMode) -> Self {
        RecordLayer {
            config,
            core: LayerCore::new(LayerKind::Record),
            mode,
            write: DirectionState::new(),
            read: DirectionState::new(),
        }
    }

    /// Install write keys for an epoch without activating them.
    pub fn install_write_keys(&mut self, epoch: u16, keys: KeySet) -> Result<(), Error> {
        self.write.install(epoch, keys)
    }

    /// Install read keys for an epoch without activating them.
    pub fn install_read_keys(&mut self, epoch: u16, keys: KeySet) -> Result<(), Error> {
        self.read.install(epoch, keys)
    }

    /// Swap the active write key set. The read direction's sequence
    /// numbers are untouched.
    pub fn set_write_epoch(&mut self, epoch: u16) {
        debug!("write epoch {} -> {}", self.write.active_epoch, epoch);
        self.write.active_epoch = epoch;
    }

    /// Swap the active read key set. The write direction's sequence
    /// numbers are untouched.
    pub fn set_read_epoch(&mut self, epoch: u16) {
        debug!("read epoch {} -> {}", self.read.active_epoch, epoch);
        self.read.active_epoch = epoch;
    }

    /// Override the next write sequence number.
    ///
    /// Sequence numbers must never repeat under one key in a correct
    /// deployment; this exists for attack scenarios and only warns.
    pub fn force_write_sequence(&mut self, sequence_number: u64) {
        let state = self.write.active_mut();
        warn!(
            "forcing write sequence {} -> {} (possible nonce reuse)",
            state.sequence, sequence_number
        );
        state.sequence = sequence_number;
    }

    /// Encrypt and frame one chunk as a single record, incrementing the
    /// write sequence exactly once even if the cryptographic step fails.
    fn send_record(
        &mut self,
        ctx: &mut ConnectionContext,
        content_type: ContentType,
        plaintext: &[u8],
        lower: &mut Lower<'_>,
    ) -> Result<(), Error> {
        let version = ctx.version;
        let epoch = self.write.active_epoch;
        let state = self.write.state_mut(epoch);

        let sequence = Sequence {
            epoch,
            sequence_number: state.sequence,
        };
        // Consumed now: never skipped, never reused on retry.
        state.sequence += 1;

        let payload = state
            .cipher
            .encrypt(content_type, version, sequence, plaintext)?;

        let mut wire = Vec::with_capacity(DTLS_HEADER_LEN + payload.len());
        match self.mode {
            RecordMode::Tls => {
                wire.push(content_type.as_u8());
                version.serialize(&mut wire);
                wire.extend_from_slice(&(payload.len() as u16).to_be_bytes());
                wire.extend_from_slice(&payload);
            }
            RecordMode::Dtls => {
                wire.push(content_type.as_u8());
                version.serialize(&mut wire);
                wire.extend_from_slice(&sequence.epoch.to_be_bytes());
                wire.extend_from_slice(&sequence.sequence_number.to_be_bytes()[2..]);
                wire.extend_from_slice(&(payload.len() as u16).to_be_bytes());
                wire.extend_from_slice(&payload);
            }
            RecordMode::Sslv2 => {
                // 15-bit length with the msb set; no crypto in this
                // framing.
                let len = payload.len().min(0x7fff);
                wire.push(0x80 | (len >> 8) as u8);
                wire.push(len as u8);
                wire.extend_from_slice(&payload[..len]);
            }
        }

        trace!(
            "record tx {} {} len {}",
            content_type,
            sequence,
            payload.len()
        );

        self.core.record_container(Container::Record(RecordContainer {
            content_type,
            version,
            sequence,
            payload: plaintext.to_vec(),
            raw: wire.clone(),
            decrypt_failed: false,
        }));

        lower.send_data(ctx, None, &wire)
    }

    /// Try to parse and accept one record from the leftover cursor.
    fn process_buffered(&mut self, ctx: &mut ConnectionContext) -> Step {
        let leftover: &[u8] = self.core.leftover();
        if leftover.is_empty() {
            return Step::NeedMore;
        }

        let parsed = match self.mode {
            RecordMode::Tls => parse_tls_record(leftover),
            RecordMode::Dtls => parse_dtls_record(leftover),
            RecordMode::Sslv2 => parse_sslv2_record(leftover),
        };

        match parsed {
            Parse::NeedMore => Step::NeedMore,
            Parse::Bad => {
                // Structural failure on attacker-controlled bytes: keep
                // the bytes, drop nothing, surface an unrecognized unit.
                let bytes = self.core.leftover().to_vec();
                self.core.leftover().clear();
                debug!("unparseable record framing, {} bytes preserved", bytes.len());
                let progress = self
                    .core
                    .record_container(Container::Unrecognized(UnrecognizedContainer {
                        bytes,
                        reason: "record framing",
                    }));
                Step::Produced(progress)
            }
            Parse::Record {
                content_type,
                version,
                wire_sequence,
                payload_start,
                payload_len,
                consumed,
            } => {
                let raw = self.core.leftover()[..consumed].to_vec();
                let payload = raw[payload_start..payload_start + payload_len].to_vec();
                self.core.leftover().consume(consumed);

                let progress = self.accept_record(ctx, content_type, version, wire_sequence, payload, raw);
                Step::Produced(progress)
            }
        }
    }

    /// Decrypt an inbound record and record the container, degrading to a
    /// flagged passthrough when decryption fails.
    fn accept_record(
        &mut self,
        _ctx: &mut ConnectionContext,
        content_type: ContentType,
        version: ProtocolVersion,
        wire_sequence: Option<Sequence>,
        payload: Vec<u8>,
        raw: Vec<u8>,
    ) -> Progress {
        // DTLS: the record's own epoch decides the cryptographic
        // treatment. TLS/SSLv2: the connection's active read epoch.
        let epoch = wire_sequence
            .map(|s| s.epoch)
            .unwrap_or(self.read.active_epoch);
        let state = self.read.state_mut(epoch);

        let sequence = match wire_sequence {
            Some(s) => {
                if !state.replay.check_and_update(s.sequence_number) {
                    debug!("replayed or stale record {}", s);
                }
                s
            }
            None => {
                let s = Sequence {
                    epoch,
                    sequence_number: state.sequence,
                };
                state.sequence += 1;
                s
            }
        };

        let (plaintext, decrypt_failed) =
            match state.cipher.decrypt(content_type, version, sequence, &payload) {
                Ok(pt) => (pt, false),
                Err(e) => {
                    warn!("decrypt failed ({}), preserving {} bytes", e.0, payload.len());
                    (payload, true)
                }
            };

        trace!(
            "record rx {} {} len {} failed={}",
            content_type,
            sequence,
            plaintext.len(),
            decrypt_failed
        );

        if !decrypt_failed {
            self.core.push_upward(Chunk::new(
                Some(Hint::record(content_type)),
                Buf::from_slice(&plaintext),
            ));
        }

        self.core.record_container(Container::Record(RecordContainer {
            content_type,
            version,
            sequence,
            payload: plaintext,
            raw,
            decrypt_failed,
        }))
    }
}

impl ProtocolLayer for RecordLayer {
    fn kind(&self) -> LayerKind {
        LayerKind::Record
    }

    fn core(&self) -> &LayerCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut LayerCore {
        &mut self.core
    }

    fn send_configuration(
        &mut self,
        ctx: &mut ConnectionContext,
        lower: &mut Lower<'_>,
    ) -> Result<(), Error> {
        let Some(config) = self.core.configuration() else {
            return Err(Error::NoConfiguration(LayerKind::Record));
        };

        let mut to_send = Vec::new();
        for spec in config.send_specs() {
            if spec.kind != ContainerKind::Record {
                return Err(Error::UnsupportedConfiguration(
                    LayerKind::Record,
                    "record layer only sends record containers",
                ));
            }
            let content_type = spec
                .kind_byte
                .map(ContentType::from_u8)
                .unwrap_or(ContentType::Handshake);
            let payload = spec.payload.clone().unwrap_or_default();
            to_send.push((content_type, payload));
        }

        for (content_type, payload) in to_send {
            self.send_record(ctx, content_type, &payload, lower)?;
        }
        Ok(())
    }

    fn send_data(
        &mut self,
        ctx: &mut ConnectionContext,
        hint: Option<&Hint>,
        data: &[u8],
        lower: &mut Lower<'_>,
    ) -> Result<(), Error> {
        let content_type = hint
            .and_then(|h| h.as_record())
            .map(|h| h.content_type)
            .unwrap_or(ContentType::Handshake);

        // Split oversized plaintext into records bounded by the
        // negotiated maximum fragment length.
        let max = self.config.max_fragment_len().max(1);
        if data.is_empty() {
            return self.send_record(ctx, content_type, data, lower);
        }
        for chunk in data.chunks(max) {
            self.send_record(ctx, content_type, chunk, lower)?;
        }
        Ok(())
    }

    fn receive_data(
        &mut self,
        ctx: &mut ConnectionContext,
        lower: &mut Lower<'_>,
    ) -> Result<(), Error> {
        loop {
            match self.process_buffered(ctx) {
                Step::Produced(Progress::Continue) => continue,
                Step::Produced(_) => break,
                Step::NeedMore => match lower.receive_more_for_hint(ctx, None)? {
                    Some(chunk) => {
                        self.core.leftover().extend_from_slice(&chunk.data);
                    }
                    // Timeout or end-of-stream: stop with whatever the
                    // policy evaluation says. Not an error.
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
            match self.process_buffered(ctx) {
                Step::Produced(_) => continue,
                Step::NeedMore => match lower.receive_more_for_hint(ctx, None)? {
                    Some(chunk) => {
                        self.core.leftover().extend_from_slice(&chunk.data);
                    }
                    None => return Ok(None),
                },
            }
        }
    }
}

enum Parse {
    Record {
        content_type: ContentType,
        version: ProtocolVersion,
        /// Epoch and sequence read off the wire (DTLS only).
        wire_sequence: Option<Sequence>,
        payload_start: usize,
        payload_len: usize,
        consumed: usize,
    },
    NeedMore,
    Bad,
}

fn parse_tls_record(input: &[u8]) -> Parse {
    if input.len() < TLS_HEADER_LEN {
        return Parse::NeedMore;
    }
    let content_type = ContentType::from_u8(input[0]);
    let version = ProtocolVersion::from_u16(u16::from_be_bytes([input[1], input[2]]));
    let length = u16::from_be_bytes([input[3], input[4]]) as usize;
    if length > MAX_WIRE_PAYLOAD {
        return Parse::Bad;
    }
    if input.len() < TLS_HEADER_LEN + length {
        return Parse::NeedMore;
    }
    Parse::Record {
        content_type,
        version,
        wire_sequence: None,
        payload_start: TLS_HEADER_LEN,
        payload_len: length,
        consumed: TLS_HEADER_LEN + length,
    }
}

fn parse_dtls_record(input: &[u8]) -> Parse {
    if input.len() < DTLS_HEADER_LEN {
        return Parse::NeedMore;
    }
    let content_type = ContentType::from_u8(input[0]);
    let version = ProtocolVersion::from_u16(u16::from_be_bytes([input[1], input[2]]));
    let epoch = u16::from_be_bytes([input[3], input[4]]);
    let mut sequence_number = 0u64;
    for &b in &input[5..11] {
        sequence_number = (sequence_number << 8) | b as u64;
    }
    let length = u16::from_be_bytes([input[11], input[12]]) as usize;
    if length > MAX_WIRE_PAYLOAD {
        return Parse::Bad;
    }
    if input.len() < DTLS_HEADER_LEN + length {
        return Parse::NeedMore;
    }
    Parse::Record {
        content_type,
        version,
        wire_sequence: Some(Sequence {
            epoch,
            sequence_number,
        }),
        payload_start: DTLS_HEADER_LEN,
        payload_len: length,
        consumed: DTLS_HEADER_LEN + length,
    }
}

fn parse_sslv2_record(input: &[u8]) -> Parse {
    if input.len() < SSLV2_HEADER_LEN {
        return Parse::NeedMore;
    }
    // Only the 2-byte header form: msb set, 15-bit length.
    if input[0] & 0x80 == 0 {
        return Parse::Bad;
    }
    let length = (((input[0] & 0x7f) as usize) << 8) | input[1] as usize;
    if input.len() < SSLV2_HEADER_LEN + length {
        return Parse::NeedMore;
    }
    Parse::Record {
        content_type: ContentType::Handshake,
        version: ProtocolVersion::SSL3_0,
        wire_sequence: None,
        payload_start: SSLV2_HEADER_LEN,
        payload_len: length,
        consumed: SSLV2_HEADER_LEN + length,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DTLS_RECORD: &[u8] = &[
        0x16, // ContentType::Handshake
        0xFE, 0xFD, // ProtocolVersion::DTLS1_2
        0x00, 0x01, // epoch
        0x00, 0x00, 0x00, 0x00, 0x00, 0x07, // sequence_number
        0x00, 0x04, // length
        0xDE, 0xAD, 0xBE, 0xEF, // fragment
    ];

    #[test]
    fn parse_dtls_wire_image() {
        let Parse::Record {
            content_type,
            version,
            wire_sequence,
            payload_start,
            payload_len,
            consumed,
        } = parse_dtls_record(DTLS_RECORD)
        else {
            panic!("expected record");
        };

        assert_eq!(content_type, ContentType::Handshake);
        assert_eq!(version, ProtocolVersion::DTLS1_2);
        assert_eq!(
            wire_sequence,
            Some(Sequence {
                epoch: 1,
                sequence_number: 7
            })
        );
        assert_eq!(&DTLS_RECORD[payload_start..payload_start + payload_len], &[
            0xDE, 0xAD, 0xBE, 0xEF
        ]);
        assert_eq!(consumed, DTLS_RECORD.len());
    }

    #[test]
    fn short_input_wants_more() {
        assert!(matches!(parse_dtls_record(&DTLS_RECORD[..4]), Parse::NeedMore));
        assert!(matches!(
            parse_dtls_record(&DTLS_RECORD[..DTLS_RECORD.len() - 1]),
            Parse::NeedMore
        ));
        assert!(matches!(parse_tls_record(&[0x16, 3]), Parse::NeedMore));
    }

    #[test]
    fn sslv2_framing_roundtrip() {
        // msb set, 15-bit length 0x0103.
        let mut wire = vec![0x81, 0x03];
        wire.extend_from_slice(&[0xAA; 0x0103]);

        let Parse::Record {
            payload_start,
            payload_len,
            consumed,
            ..
        } = parse_sslv2_record(&wire)
        else {
            panic!("expected record");
        };
        assert_eq!(payload_start, 2);
        assert_eq!(payload_len, 0x0103);
        assert_eq!(consumed, wire.len());

        // Cleared msb is the 3-byte header form we do not speak.
        assert!(matches!(parse_sslv2_record(&[0x01, 0x03, 0x00]), Parse::Bad));
    }
}
