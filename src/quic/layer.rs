//! The QUIC frame layer.
//!
//! Decodes frames out of decrypted packet payloads, reassembles the
//! CRYPTO stream per encryption level, decides ack-elicitation and emits
//! ACK frames, and turns outbound bytes into CRYPTO or STREAM frames
//! tagged with the right packet-space hint.

use std::sync::Arc;

use crate::buffer::Buf;
use crate::config::Config;
use crate::container::{Container, ContainerKind, MessageContainer, UnrecognizedContainer};
use crate::context::ConnectionContext;
use crate::hint::Hint;
use crate::layer::{Chunk, LayerCore, LayerKind, Lower, Progress, ProtocolLayer};
use crate::quic::frame::{AckFrame, CryptoFrame, Frame, FrameContainer, StreamFrame};
use crate::quic::{EncryptionLevel, PacketSpace};
use crate::Error;

/// Handshake bytes (CRYPTO path) carry this hint kind.
pub const MESSAGE_KIND_HANDSHAKE: u8 = 22;
/// Application bytes (STREAM path) carry this hint kind.
pub const MESSAGE_KIND_APPLICATION: u8 = 23;

/// A pre-configured CRYPTO frame template for the send path.
///
/// Templates are consumed in order before any remaining bytes are chunked
/// at the layer default size.
#[derive(Debug, Clone, Default)]
pub struct CryptoTemplate {
    /// Maximum data bytes this template absorbs; the layer default
    /// applies when unset.
    pub max_len: Option<usize>,
}

/// Buffered out-of-order CRYPTO frames for one encryption level.
///
/// Levels are strictly isolated: a buffer never drains into another
/// level's stream, and switching levels leaves stale fragments behind
/// rather than letting them satisfy the new level's contiguity.
#[derive(Debug, Default)]
struct CryptoReassembly {
    expected_offset: u64,
    buffered: Vec<CryptoFrame>,
}

impl CryptoReassembly {
    /// Sort, deduplicate and, if one contiguous run starts at the
    /// expected offset, drain it. Otherwise everything is retained.
    fn take_contiguous(&mut self, level: EncryptionLevel) -> Option<Vec<u8>> {
        if self.buffered.is_empty() {
            return None;
        }

        self.buffered.sort_by_key(|f| (f.offset, f.data.len()));
        self.buffered
            .dedup_by(|a, b| a.offset == b.offset && a.data == b.data);

        // Retransmissions of already-delivered data cannot contribute.
        let expected = self.expected_offset;
        self.buffered.retain(|f| {
            let stale = f.offset + f.data.len() as u64 <= expected;
            if stale {
                debug!(
                    "{} crypto frame [{}, {}) below expected {}, dropped",
                    level,
                    f.offset,
                    f.offset + f.data.len() as u64,
                    expected
                );
            }
            !stale
        });

        let mut next = self.expected_offset;
        for f in &self.buffered {
            if f.offset != next {
                let pairs: Vec<(u64, usize)> =
                    self.buffered.iter().map(|f| (f.offset, f.data.len())).collect();
                debug!(
                    "{} crypto stream gap at {}, retaining {:?}",
                    level, next, pairs
                );
                return None;
            }
            next += f.data.len() as u64;
        }

        let mut out = Vec::with_capacity((next - self.expected_offset) as usize);
        for f in self.buffered.drain(..) {
            out.extend_from_slice(&f.data);
        }
        self.expected_offset = next;
        debug!(
            "{} crypto stream delivered {} bytes, expected offset now {}",
            level,
            out.len(),
            next
        );
        Some(out)
    }
}

/// The QUIC frame layer.
pub struct QuicFrameLayer {
    config: Arc<Config>,
    core: LayerCore,
    /// One reassembly per encryption level, selected by installed
    /// secrets.
    crypto: [CryptoReassembly; 3],
    /// Outbound CRYPTO stream offsets, per packet space.
    send_offset: [u64; 3],
    /// Outbound application STREAM offset.
    stream_offset: u64,
    templates: Vec<CryptoTemplate>,
    first_handshake_sent: bool,
}

impl QuicFrameLayer {
    pub fn new(config: Arc<Config>) -> Self {
        QuicFrameLayer {
            config,
            core: LayerCore::new(LayerKind::QuicFrame),
            crypto: Default::default(),
            send_offset: [0; 3],
            stream_offset: 0,
            templates: Vec::new(),
            first_handshake_sent: false,
        }
    }

    /// Install CRYPTO frame templates to be filled by the next handshake
    /// send.
    pub fn set_crypto_templates(&mut self, templates: Vec<CryptoTemplate>) {
        self.templates = templates;
    }

    /// The expected next CRYPTO offset of a level, for inspection.
    pub fn expected_offset(&self, level: EncryptionLevel) -> u64 {
        self.crypto[level.index()].expected_offset
    }

    /// Process one decrypted packet payload: the frame loop, the CRYPTO
    /// flush, and ack emission.
    fn process_packet(
        &mut self,
        ctx: &mut ConnectionContext,
        space: PacketSpace,
        payload: &[u8],
        lower: &mut Lower<'_>,
    ) -> Result<Progress, Error> {
        let level = ctx.quic.active_level();
        let mut ack_eliciting = false;
        let mut progress = Progress::Continue;

        let mut rest = payload;
        while !rest.is_empty() {
            match Frame::parse(rest) {
                Ok((r, frame)) => {
                    let raw = rest[..rest.len() - r.len()].to_vec();
                    rest = r;

                    if frame.is_ack_eliciting() {
                        ack_eliciting = true;
                    }
                    if let Frame::Crypto(c) = &frame {
                        trace!(
                            "{} crypto frame [{}, {}) buffered",
                            level,
                            c.offset,
                            c.offset + c.data.len() as u64
                        );
                        let buffer = &mut self.crypto[level.index()];
                        if buffer.buffered.len() < self.config.max_buffered_fragments() {
                            buffer.buffered.push(c.clone());
                        } else {
                            warn!("{} crypto buffer full, frame dropped", level);
                        }
                    }

                    progress = self
                        .core
                        .record_container(Container::QuicFrame(FrameContainer { frame, raw }));
                    if progress != Progress::Continue {
                        break;
                    }
                }
                Err(_) => {
                    debug!("unparseable frame, {} bytes preserved", rest.len());
                    progress = self.core.record_container(Container::Unrecognized(
                        UnrecognizedContainer {
                            bytes: rest.to_vec(),
                            reason: "frame type",
                        },
                    ));
                    break;
                }
            }
        }

        // Only a fully contiguous run starting at the level's expected
        // offset is delivered; a partial buffer is retained for the next
        // packet to fill.
        if let Some(stream) = self.crypto[level.index()].take_contiguous(level) {
            self.core
                .push_upward(Chunk::new(None, Buf::from_slice(&stream)));
            let kind = stream.first().copied().unwrap_or(0);
            let p = self
                .core
                .record_container(Container::Message(MessageContainer::new(kind, stream)));
            if progress == Progress::Continue {
                progress = p;
            }
        }

        if ack_eliciting {
            self.emit_ack(ctx, space, lower)?;
        }

        Ok(progress)
    }

    /// Emit exactly one ACK frame for the largest packet number seen in
    /// the given space: fixed delay, no additional ranges.
    fn emit_ack(
        &mut self,
        ctx: &mut ConnectionContext,
        space: PacketSpace,
        lower: &mut Lower<'_>,
    ) -> Result<(), Error> {
        let Some(largest) = ctx.quic.largest_received(space) else {
            debug!("ack elicited but no packet number seen in {}", space);
            return Ok(());
        };

        let frame = Frame::Ack(AckFrame {
            largest_acknowledged: largest,
            ack_delay: self.config.quic_ack_delay(),
            first_range: 0,
            ranges: Vec::new(),
            ecn: None,
        });
        let mut payload = Vec::new();
        frame.serialize(&mut payload);

        debug!("ack {} in {}", largest, space);
        self.core
            .record_container(Container::QuicFrame(FrameContainer::new(frame)));

        let hint = Hint::quic_packet(space);
        lower.send_data(ctx, Some(&hint), &payload)
    }

    /// Handshake-space send: fill templates first, then chunk the rest.
    fn send_handshake(
        &mut self,
        ctx: &mut ConnectionContext,
        is_first: bool,
        data: &[u8],
        lower: &mut Lower<'_>,
    ) -> Result<(), Error> {
        let space = if is_first {
            PacketSpace::Initial
        } else {
            PacketSpace::Handshake
        };
        self.first_handshake_sent = true;

        let default_len = self.config.quic_crypto_chunk_len().max(1);
        let mut offset = self.send_offset[space.index()];
        let mut remaining = data;
        let mut frames = Vec::new();

        let templates = std::mem::take(&mut self.templates);
        for template in templates {
            if remaining.is_empty() {
                break;
            }
            let take = template.max_len.unwrap_or(default_len).min(remaining.len());
            if take == 0 {
                continue;
            }
            frames.push(CryptoFrame {
                offset,
                data: remaining[..take].to_vec(),
            });
            offset += take as u64;
            remaining = &remaining[take..];
        }

        while !remaining.is_empty() {
            let take = default_len.min(remaining.len());
            frames.push(CryptoFrame {
                offset,
                data: remaining[..take].to_vec(),
            });
            offset += take as u64;
            remaining = &remaining[take..];
        }
        self.send_offset[space.index()] = offset;

        let mut payload = Vec::new();
        for crypto in frames {
            let frame = Frame::Crypto(crypto);
            frame.serialize(&mut payload);
            self.core
                .record_container(Container::QuicFrame(FrameContainer::new(frame)));
        }

        debug!(
            "crypto tx {} bytes as {} in {}",
            data.len(),
            if is_first { "first flight" } else { "follow-up" },
            space
        );

        let hint = Hint::quic_packet(space);
        lower.send_data(ctx, Some(&hint), &payload)
    }

    /// Application-space send: one STREAM frame on the fixed stream id,
    /// padded up to the minimum frame size.
    fn send_application(
        &mut self,
        ctx: &mut ConnectionContext,
        data: &[u8],
        lower: &mut Lower<'_>,
    ) -> Result<(), Error> {
        let frame = Frame::Stream(StreamFrame {
            stream_id: self.config.quic_stream_id(),
            offset: self.stream_offset,
            fin: false,
            data: data.to_vec(),
        });
        self.stream_offset += data.len() as u64;

        let mut payload = Vec::new();
        frame.serialize(&mut payload);

        // Anti-traffic-analysis floor.
        let min = self.config.quic_min_stream_frame_len();
        if payload.len() < min {
            let pad = Frame::Padding {
                len: min - payload.len(),
            };
            pad.serialize(&mut payload);
            self.core
                .record_container(Container::QuicFrame(FrameContainer::new(pad)));
        }

        self.core
            .record_container(Container::QuicFrame(FrameContainer::new(frame)));

        // The packet layer tags this 0-RTT or 1-RTT by installed
        // application secrets.
        let hint = Hint::quic_packet(PacketSpace::ApplicationData);
        lower.send_data(ctx, Some(&hint), &payload)
    }

    fn pull_lower(
        &mut self,
        ctx: &mut ConnectionContext,
        lower: &mut Lower<'_>,
    ) -> Result<Option<(PacketSpace, Buf)>, Error> {
        match lower.receive_more_for_hint(ctx, None)? {
            Some(chunk) => {
                let space = chunk
                    .hint
                    .as_ref()
                    .and_then(|h| h.as_quic_packet())
                    .map(|h| h.space)
                    .unwrap_or(PacketSpace::ApplicationData);
                Ok(Some((space, chunk.data)))
            }
            None => Ok(None),
        }
    }
}

impl ProtocolLayer for QuicFrameLayer {
    fn kind(&self) -> LayerKind {
        LayerKind::QuicFrame
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
            return Err(Error::NoConfiguration(LayerKind::QuicFrame));
        };

        enum Action {
            Handshake(Vec<u8>),
            RawFrame(Vec<u8>),
        }

        let mut actions = Vec::new();
        for spec in config.send_specs() {
            let payload = spec.payload.clone().unwrap_or_default();
            match spec.kind {
                ContainerKind::Message => actions.push(Action::Handshake(payload)),
                ContainerKind::QuicFrame => actions.push(Action::RawFrame(payload)),
                _ => {
                    return Err(Error::UnsupportedConfiguration(
                        LayerKind::QuicFrame,
                        "frame layer sends message or frame containers",
                    ));
                }
            }
        }

        for action in actions {
            match action {
                Action::Handshake(payload) => {
                    let is_first = !self.first_handshake_sent;
                    self.send_handshake(ctx, is_first, &payload, lower)?;
                }
                Action::RawFrame(payload) => {
                    let space = if !self.first_handshake_sent {
                        PacketSpace::Initial
                    } else {
                        PacketSpace::Handshake
                    };
                    if let Ok((_, frame)) = Frame::parse(&payload) {
                        self.core
                            .record_container(Container::QuicFrame(FrameContainer {
                                frame,
                                raw: payload.clone(),
                            }));
                    }
                    let hint = Hint::quic_packet(space);
                    lower.send_data(ctx, Some(&hint), &payload)?;
                }
            }
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
        let frame_hint = match hint {
            Some(Hint::QuicFrame(h)) => Some(h),
            _ => None,
        };

        let is_handshake = match frame_hint {
            Some(h) => h.message_kind == MESSAGE_KIND_HANDSHAKE,
            // Without a hint: handshake until any application-space
            // secrets exist.
            None => ctx.quic.application.is_none() && ctx.quic.zero_rtt.is_none(),
        };

        if is_handshake {
            let is_first = frame_hint
                .map(|h| h.is_first)
                .unwrap_or(!self.first_handshake_sent);
            self.send_handshake(ctx, is_first, data, lower)
        } else {
            self.send_application(ctx, data, lower)
        }
    }

    fn receive_data(
        &mut self,
        ctx: &mut ConnectionContext,
        lower: &mut Lower<'_>,
    ) -> Result<(), Error> {
        loop {
            match self.pull_lower(ctx, lower)? {
                Some((space, payload)) => {
                    let progress = self.process_packet(ctx, space, &payload, lower)?;
                    if progress != Progress::Continue {
                        break;
                    }
                }
                None => break,
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
            match self.pull_lower(ctx, lower)? {
                Some((space, payload)) => {
                    self.process_packet(ctx, space, &payload, lower)?;
                }
                None => return Ok(None),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{DirectionKeys, LevelKeys};
    use crate::types::ProtocolVersion;
    use zeroize::Zeroizing;

    fn ctx() -> ConnectionContext {
        ConnectionContext::new(true, ProtocolVersion::TLS1_3)
    }

    fn dummy_level() -> LevelKeys {
        let d = DirectionKeys {
            secret: Zeroizing::new(vec![0; 32]),
            key: Zeroizing::new(vec![0; 16]),
            iv: Zeroizing::new(vec![0; 12]),
            hp_key: Zeroizing::new(vec![0; 16]),
        };
        LevelKeys {
            client: d.clone(),
            server: d,
        }
    }

    fn crypto_payload(frames: &[(u64, &[u8])]) -> Vec<u8> {
        let mut payload = Vec::new();
        for (offset, data) in frames {
            Frame::Crypto(CryptoFrame {
                offset: *offset,
                data: data.to_vec(),
            })
            .serialize(&mut payload);
        }
        payload
    }

    #[test]
    fn crypto_reassembly_in_reverse_order() {
        let mut layer = QuicFrameLayer::new(Arc::new(Config::default()));
        let mut ctx = ctx();
        let mut lower = Lower::new(&mut []);

        let a = vec![0x01; 100];
        let b = vec![0x02; 150];
        let c = vec![0x03; 150];

        // [250,400), [100,250), [0,100) in that order.
        let p1 = crypto_payload(&[(250, &c)]);
        let p2 = crypto_payload(&[(100, &b)]);
        let p3 = crypto_payload(&[(0, &a)]);

        layer
            .process_packet(&mut ctx, PacketSpace::Initial, &p1, &mut lower)
            .unwrap();
        assert_eq!(layer.expected_offset(EncryptionLevel::Initial), 0);
        layer
            .process_packet(&mut ctx, PacketSpace::Initial, &p2, &mut lower)
            .unwrap();
        assert_eq!(layer.expected_offset(EncryptionLevel::Initial), 0);
        layer
            .process_packet(&mut ctx, PacketSpace::Initial, &p3, &mut lower)
            .unwrap();

        // One 400-byte delivery, expected offset advanced to 400.
        assert_eq!(layer.expected_offset(EncryptionLevel::Initial), 400);
        let chunk = layer.core.pop_upward(None).unwrap();
        assert_eq!(chunk.data.len(), 400);
        assert_eq!(&chunk.data[..100], &a[..]);
        assert_eq!(&chunk.data[100..250], &b[..]);
        assert!(layer.core.pop_upward(None).is_none());
    }

    #[test]
    fn crypto_gap_delivers_nothing_and_retains_both() {
        let mut layer = QuicFrameLayer::new(Arc::new(Config::default()));
        let mut ctx = ctx();
        let mut lower = Lower::new(&mut []);

        let payload = crypto_payload(&[(0, &[0x0a; 100]), (150, &[0x0b; 100])]);
        layer
            .process_packet(&mut ctx, PacketSpace::Initial, &payload, &mut lower)
            .unwrap();

        assert_eq!(layer.expected_offset(EncryptionLevel::Initial), 0);
        assert!(layer.core.pop_upward(None).is_none());
        assert_eq!(layer.crypto[0].buffered.len(), 2);

        // Filling the gap delivers one contiguous run.
        let fill = crypto_payload(&[(100, &[0x0c; 50])]);
        layer
            .process_packet(&mut ctx, PacketSpace::Initial, &fill, &mut lower)
            .unwrap();
        assert_eq!(layer.expected_offset(EncryptionLevel::Initial), 250);
        assert_eq!(layer.core.pop_upward(None).unwrap().data.len(), 250);
    }

    #[test]
    fn crypto_buffers_are_isolated_per_level() {
        let mut layer = QuicFrameLayer::new(Arc::new(Config::default()));
        let mut ctx = ctx();
        let mut lower = Lower::new(&mut []);

        // A fragment buffered while Initial secrets are active...
        let stale = crypto_payload(&[(100, &[0x0e; 20])]);
        layer
            .process_packet(&mut ctx, PacketSpace::Initial, &stale, &mut lower)
            .unwrap();
        assert_eq!(layer.crypto[0].buffered.len(), 1);

        // ...must not satisfy contiguity after the handshake level
        // becomes active.
        ctx.quic.handshake = Some(dummy_level());
        let fresh = crypto_payload(&[(0, &[0x0f; 100])]);
        layer
            .process_packet(&mut ctx, PacketSpace::Handshake, &fresh, &mut lower)
            .unwrap();

        assert_eq!(layer.expected_offset(EncryptionLevel::Handshake), 100);
        assert_eq!(layer.core.pop_upward(None).unwrap().data.len(), 100);
        // The stale Initial fragment is still there, untouched.
        assert_eq!(layer.crypto[0].buffered.len(), 1);
        assert_eq!(layer.expected_offset(EncryptionLevel::Initial), 0);
    }

    #[test]
    fn duplicate_crypto_frames_are_deduplicated() {
        let mut layer = QuicFrameLayer::new(Arc::new(Config::default()));
        let mut ctx = ctx();
        let mut lower = Lower::new(&mut []);

        let payload = crypto_payload(&[(0, &[0x01; 50]), (0, &[0x01; 50]), (50, &[0x02; 50])]);
        layer
            .process_packet(&mut ctx, PacketSpace::Initial, &payload, &mut lower)
            .unwrap();

        assert_eq!(layer.expected_offset(EncryptionLevel::Initial), 100);
        assert_eq!(layer.core.pop_upward(None).unwrap().data.len(), 100);
    }

    #[test]
    fn ping_only_packet_elicits_exactly_one_ack() {
        use crate::transport::{MemoryPipe, TransportLayer};

        let config = Arc::new(Config::default());
        let (pipe, peer) = MemoryPipe::pair();
        let mut layers: Vec<Box<dyn ProtocolLayer>> =
            vec![Box::new(TransportLayer::new(config.clone(), pipe))];

        let mut layer = QuicFrameLayer::new(config.clone());
        let mut ctx = ctx();
        ctx.quic.note_received(PacketSpace::Initial, 7);

        let mut payload = Vec::new();
        Frame::Ping.serialize(&mut payload);

        let mut lower = Lower::new(&mut layers);
        layer
            .process_packet(&mut ctx, PacketSpace::Initial, &payload, &mut lower)
            .unwrap();

        use crate::transport::{ReadOutcome, WireTransport};
        use std::time::Duration;

        let mut peer = peer;
        let mut sent = Buf::new();
        assert_eq!(
            peer.read_chunk(&mut sent, Duration::from_millis(1)).unwrap(),
            ReadOutcome::Data
        );
        let (rest, frame) = Frame::parse(&sent).unwrap();
        assert!(rest.is_empty());
        assert_eq!(
            frame,
            Frame::Ack(AckFrame {
                largest_acknowledged: 7,
                ack_delay: config.quic_ack_delay(),
                first_range: 0,
                ranges: vec![],
                ecn: None,
            })
        );
        // Exactly one: nothing further was written.
        assert_eq!(
            peer.read_chunk(&mut Buf::new(), Duration::from_millis(1))
                .unwrap(),
            ReadOutcome::TimedOut
        );
    }

    #[test]
    fn padding_and_ack_only_packet_elicits_nothing() {
        use crate::transport::{MemoryPipe, TransportLayer};

        let config = Arc::new(Config::default());
        let (pipe, peer) = MemoryPipe::pair();
        let mut layers: Vec<Box<dyn ProtocolLayer>> =
            vec![Box::new(TransportLayer::new(config.clone(), pipe))];

        let mut layer = QuicFrameLayer::new(config);
        let mut ctx = ctx();
        ctx.quic.note_received(PacketSpace::Initial, 3);

        let mut payload = vec![0u8; 7]; // PADDING run
        Frame::Ack(AckFrame {
            largest_acknowledged: 1,
            ack_delay: 0,
            first_range: 0,
            ranges: vec![],
            ecn: None,
        })
        .serialize(&mut payload);

        let mut lower = Lower::new(&mut layers);
        layer
            .process_packet(&mut ctx, PacketSpace::Initial, &payload, &mut lower)
            .unwrap();

        use crate::transport::{ReadOutcome, WireTransport};
        use std::time::Duration;

        let mut peer = peer;
        assert_eq!(
            peer.read_chunk(&mut Buf::new(), Duration::from_millis(1))
                .unwrap(),
            ReadOutcome::TimedOut
        );
    }

    #[test]
    fn handshake_send_uses_templates_then_default_chunks() {
        let config = Config::builder().quic_crypto_chunk_len(100).build();
        let mut layer = QuicFrameLayer::new(Arc::new(config));
        let mut ctx = ctx();
        let mut lower = Lower::new(&mut []);

        layer.set_crypto_templates(vec![CryptoTemplate { max_len: Some(40) }]);

        let data = vec![0xAB; 250];
        // No packet layer below; EndOfStack is fine, the frames are
        // already recorded.
        let _ = layer.send_handshake(&mut ctx, true, &data, &mut lower);

        let crypto: Vec<(u64, usize)> = layer
            .core
            .containers()
            .iter()
            .filter_map(|c| match c {
                Container::QuicFrame(FrameContainer {
                    frame: Frame::Crypto(c),
                    ..
                }) => Some((c.offset, c.data.len())),
                _ => None,
            })
            .collect();

        // Template takes 40, then default 100-byte chunks.
        assert_eq!(crypto, vec![(0, 40), (40, 100), (140, 100), (240, 10)]);
        assert_eq!(layer.send_offset[PacketSpace::Initial.index()], 250);
    }

    #[test]
    fn short_stream_frame_is_padded_to_floor() {
        let config = Config::builder().quic_min_stream_frame_len(64).build();
        let mut layer = QuicFrameLayer::new(Arc::new(config));
        let mut ctx = ctx();
        let mut lower = Lower::new(&mut []);

        let _ = layer.send_application(&mut ctx, b"hi", &mut lower);

        let has_padding = layer.core.containers().iter().any(|c| {
            matches!(
                c,
                Container::QuicFrame(FrameContainer {
                    frame: Frame::Padding { .. },
                    ..
                })
            )
        });
        assert!(has_padding);
    }
}
