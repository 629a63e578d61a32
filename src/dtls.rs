//! DTLS handshake fragmentation and reassembly.
//!
//! Outbound handshake messages are split into bounded fragments; inbound
//! fragments are buffered per message sequence and delivered exactly once
//! when their byte ranges cover the whole message, tolerating reorder,
//! duplication and gaps.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use nom::bytes::complete::take;
use nom::number::complete::{be_u16, be_u24, be_u8};
use nom::IResult;

use crate::buffer::Buf;
use crate::config::Config;
use crate::container::{Container, ContainerKind, MessageContainer, UnrecognizedContainer};
use crate::context::ConnectionContext;
use crate::hint::Hint;
use crate::layer::{Chunk, LayerCore, LayerKind, Lower, Progress, ProtocolLayer};
use crate::types::ContentType;
use crate::Error;

/// Fragment header: type(1) + length(3) + message_seq(2) + offset(3) +
/// fragment_length(3).
const FRAGMENT_HEADER_LEN: usize = 12;

/// One handshake fragment as carried on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FragmentContainer {
    pub handshake_type: u8,
    pub total_length: u32,
    pub message_seq: u16,
    pub fragment_offset: u32,
    pub fragment_length: u32,
    pub body: Vec<u8>,
    pub raw: Vec<u8>,
}

impl FragmentContainer {
    pub fn parse(input: &[u8]) -> IResult<&[u8], FragmentContainer> {
        let full = input;
        let (input, handshake_type) = be_u8(input)?;
        let (input, total_length) = be_u24(input)?;
        let (input, message_seq) = be_u16(input)?;
        let (input, fragment_offset) = be_u24(input)?;
        let (input, fragment_length) = be_u24(input)?;
        let (input, body) = take(fragment_length as usize)(input)?;

        let consumed = full.len() - input.len();

        Ok((
            input,
            FragmentContainer {
                handshake_type,
                total_length,
                message_seq,
                fragment_offset,
                fragment_length,
                body: body.to_vec(),
                raw: full[..consumed].to_vec(),
            },
        ))
    }

    pub fn serialize(&self, output: &mut Vec<u8>) {
        output.push(self.handshake_type);
        output.extend_from_slice(&self.total_length.to_be_bytes()[1..]);
        output.extend_from_slice(&self.message_seq.to_be_bytes());
        output.extend_from_slice(&self.fragment_offset.to_be_bytes()[1..]);
        output.extend_from_slice(&self.fragment_length.to_be_bytes()[1..]);
        output.extend_from_slice(&self.body);
    }
}

/// Buffered fragments of one partially received message.
struct Reassembly {
    handshake_type: u8,
    total_length: u32,
    /// Merged, sorted, non-overlapping covered ranges [start, end).
    ranges: Vec<(u32, u32)>,
    data: Vec<u8>,
}

impl Reassembly {
    fn new(handshake_type: u8, total_length: u32) -> Self {
        Reassembly {
            handshake_type,
            total_length,
            ranges: Vec::new(),
            data: vec![0; total_length as usize],
        }
    }

    /// Merge one fragment's bytes in. Overlaps and duplicates are fine;
    /// the concatenation is by offset, so identical retransmitted bytes
    /// land in the same place.
    fn insert(&mut self, offset: u32, body: &[u8]) {
        let start = offset;
        let end = offset + body.len() as u32;
        self.data[start as usize..end as usize].copy_from_slice(body);

        self.ranges.push((start, end));
        self.ranges.sort_unstable();
        let mut merged: Vec<(u32, u32)> = Vec::with_capacity(self.ranges.len());
        for &(s, e) in self.ranges.iter() {
            match merged.last_mut() {
                Some(last) if s <= last.1 => last.1 = last.1.max(e),
                _ => merged.push((s, e)),
            }
        }
        self.ranges = merged;
    }

    /// Complete once the ranges cover [0, total_length) without gaps.
    fn complete(&self) -> bool {
        self.ranges == [(0, self.total_length)] || (self.total_length == 0 && !self.ranges.is_empty())
    }
}

/// The DTLS fragment layer.
///
/// Sits between a message producer and the record layer. Send input is a
/// serialized handshake message (type, 3-byte length, body); receive
/// output is the same shape, reassembled.
pub struct DtlsFragmentLayer {
    config: Arc<Config>,
    core: LayerCore,
    /// Message-sequence counter for outbound messages.
    next_message_seq: u16,
    reassembly: BTreeMap<u16, Reassembly>,
    /// Message sequences already delivered, for retransmission detection.
    seen: BTreeSet<u16>,
}

impl DtlsFragmentLayer {
    pub fn new(config: Arc<Config>) -> Self {
        DtlsFragmentLayer {
            config,
            core: LayerCore::new(LayerKind::DtlsFragment),
            next_message_seq: 0,
            reassembly: BTreeMap::new(),
            seen: BTreeSet::new(),
        }
    }

    /// Split one serialized handshake message into fragments and push
    /// them down. The last fragment's offset+length equals the total
    /// length.
    fn send_message(
        &mut self,
        ctx: &mut ConnectionContext,
        data: &[u8],
        lower: &mut Lower<'_>,
    ) -> Result<(), Error> {
        // TLS handshake framing: type(1) || length(3) || body.
        let (handshake_type, body) = if data.len() >= 4 {
            (data[0], &data[4..])
        } else {
            debug!("handshake message shorter than its header, sending as-is");
            (data.first().copied().unwrap_or(0), &data[data.len().min(1)..])
        };
        let total_length = body.len() as u32;
        let message_seq = self.next_message_seq;
        self.next_message_seq += 1;

        let max = self.config.dtls_max_fragment_len().max(1);
        let hint = Hint::record(ContentType::Handshake);

        let mut offset = 0u32;
        let empty: &[u8] = &[];
        let chunks: Vec<&[u8]> = if body.is_empty() {
            // Zero-length messages still travel as one header-only
            // fragment.
            vec![empty]
        } else {
            body.chunks(max).collect()
        };
        for chunk in chunks {
            let fragment = FragmentContainer {
                handshake_type,
                total_length,
                message_seq,
                fragment_offset: offset,
                fragment_length: chunk.len() as u32,
                body: chunk.to_vec(),
                raw: Vec::new(),
            };
            let mut wire = Vec::with_capacity(FRAGMENT_HEADER_LEN + chunk.len());
            fragment.serialize(&mut wire);

            trace!(
                "fragment tx seq {} offset {} len {} of {}",
                message_seq,
                offset,
                chunk.len(),
                total_length
            );
            offset += chunk.len() as u32;

            self.core.record_container(Container::Fragment(FragmentContainer {
                raw: wire.clone(),
                ..fragment
            }));

            lower.send_data(ctx, Some(&hint), &wire)?;
        }
        Ok(())
    }

    /// Feed one received fragment into the reassembly state. Returns the
    /// configured-policy progress after recording containers.
    fn accept_fragment(&mut self, fragment: FragmentContainer) -> Progress {
        let seq = fragment.message_seq;

        let in_range = fragment
            .fragment_offset
            .checked_add(fragment.fragment_length)
            .map_or(false, |end| end <= fragment.total_length)
            && fragment.body.len() == fragment.fragment_length as usize;

        let progress = self.core.record_container(Container::Fragment(fragment.clone()));

        if !in_range {
            debug!(
                "fragment seq {} offset {} len {} outside total {}",
                seq, fragment.fragment_offset, fragment.fragment_length, fragment.total_length
            );
            return progress;
        }

        if self.seen.contains(&seq) {
            // Already delivered once; this is a retransmission.
            debug!("retransmitted fragment for delivered message seq {}", seq);
            return progress;
        }

        if !self.reassembly.contains_key(&seq)
            && self.reassembly.len() >= self.config.max_buffered_fragments()
        {
            warn!("reassembly buffer full, dropping fragment seq {}", seq);
            return progress;
        }

        let entry = self
            .reassembly
            .entry(seq)
            .or_insert_with(|| Reassembly::new(fragment.handshake_type, fragment.total_length));

        if entry.handshake_type != fragment.handshake_type
            || entry.total_length != fragment.total_length
        {
            debug!(
                "fragment seq {} disagrees with buffered header (type {} vs {}, total {} vs {})",
                seq,
                fragment.handshake_type,
                entry.handshake_type,
                fragment.total_length,
                entry.total_length
            );
            return progress;
        }

        entry.insert(fragment.fragment_offset, &fragment.body);

        if !entry.complete() {
            return progress;
        }

        // Complete: deliver exactly once, concatenated by offset, in the
        // original serialized-message shape.
        let entry = self.reassembly.remove(&seq).unwrap();
        self.seen.insert(seq);

        let mut message = Vec::with_capacity(4 + entry.data.len());
        message.push(entry.handshake_type);
        message.extend_from_slice(&entry.total_length.to_be_bytes()[1..]);
        message.extend_from_slice(&entry.data);

        debug!(
            "message seq {} complete, {} bytes delivered",
            seq, entry.total_length
        );

        self.core
            .push_upward(Chunk::new(None, Buf::from_slice(&message)));
        self.core.record_container(Container::Message(MessageContainer::new(
            entry.handshake_type,
            message,
        )))
    }

    /// Parse every fragment out of the buffered bytes.
    fn process_buffered(&mut self) -> Option<Progress> {
        let mut last = None;
        loop {
            let leftover: &[u8] = self.core.leftover();
            if leftover.is_empty() {
                return last;
            }

            match FragmentContainer::parse(leftover) {
                Ok((rest, fragment)) => {
                    let consumed = leftover.len() - rest.len();
                    self.core.leftover().consume(consumed);
                    last = Some(self.accept_fragment(fragment));
                    if matches!(last, Some(Progress::Satisfied) | Some(Progress::Mismatched)) {
                        return last;
                    }
                }
                Err(nom::Err::Incomplete(_)) => return last,
                Err(_) => {
                    // A truncated header inside a record payload cannot be
                    // completed by later records; surface it and move on.
                    let bytes = self.core.leftover().to_vec();
                    self.core.leftover().clear();
                    debug!("unparseable fragment, {} bytes preserved", bytes.len());
                    return Some(self.core.record_container(Container::Unrecognized(
                        UnrecognizedContainer {
                            bytes,
                            reason: "fragment header",
                        },
                    )));
                }
            }
        }
    }

    fn pull_lower(
        &mut self,
        ctx: &mut ConnectionContext,
        lower: &mut Lower<'_>,
    ) -> Result<bool, Error> {
        let wanted = Hint::record(ContentType::Handshake);
        match lower.receive_more_for_hint(ctx, Some(&wanted))? {
            Some(chunk) => {
                self.core.leftover().extend_from_slice(&chunk.data);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

impl ProtocolLayer for DtlsFragmentLayer {
    fn kind(&self) -> LayerKind {
        LayerKind::DtlsFragment
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
            return Err(Error::NoConfiguration(LayerKind::DtlsFragment));
        };

        let mut to_send = Vec::new();
        for spec in config.send_specs() {
            if spec.kind != ContainerKind::Message {
                return Err(Error::UnsupportedConfiguration(
                    LayerKind::DtlsFragment,
                    "fragment layer only sends message containers",
                ));
            }
            to_send.push(spec.payload.clone().unwrap_or_default());
        }

        for payload in to_send {
            self.send_message(ctx, &payload, lower)?;
        }
        Ok(())
    }

    fn send_data(
        &mut self,
        ctx: &mut ConnectionContext,
        _hint: Option<&Hint>,
        data: &[u8],
        lower: &mut Lower<'_>,
    ) -> Result<(), Error> {
        self.send_message(ctx, data, lower)
    }

    fn receive_data(
        &mut self,
        ctx: &mut ConnectionContext,
        lower: &mut Lower<'_>,
    ) -> Result<(), Error> {
        loop {
            match self.process_buffered() {
                Some(Progress::Satisfied) | Some(Progress::Mismatched) => break,
                _ => {}
            }
            if !self.pull_lower(ctx, lower)? {
                break;
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
            self.process_buffered();
            if let Some(chunk) = self.core.pop_upward(hint) {
                return Ok(Some(chunk));
            }
            if !self.pull_lower(ctx, lower)? {
                return Ok(None);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FRAGMENT: &[u8] = &[
        0x01, // handshake_type (ClientHello)
        0x00, 0x00, 0x08, // total length
        0x00, 0x02, // message_seq
        0x00, 0x00, 0x04, // fragment_offset
        0x00, 0x00, 0x04, // fragment_length
        0x05, 0x06, 0x07, 0x08, // body
    ];

    #[test]
    fn fragment_roundtrip() {
        let (rest, parsed) = FragmentContainer::parse(FRAGMENT).unwrap();
        assert!(rest.is_empty());
        assert_eq!(parsed.handshake_type, 1);
        assert_eq!(parsed.total_length, 8);
        assert_eq!(parsed.message_seq, 2);
        assert_eq!(parsed.fragment_offset, 4);
        assert_eq!(parsed.fragment_length, 4);
        assert_eq!(parsed.body, &[5, 6, 7, 8]);

        let mut serialized = Vec::new();
        parsed.serialize(&mut serialized);
        assert_eq!(serialized, FRAGMENT);
    }

    #[test]
    fn reassembly_tolerates_reorder_and_duplicates() {
        let mut r = Reassembly::new(1, 8);
        r.insert(4, &[5, 6, 7, 8]);
        assert!(!r.complete());
        r.insert(4, &[5, 6, 7, 8]); // duplicate
        assert!(!r.complete());
        r.insert(0, &[1, 2, 3, 4]);
        assert!(r.complete());
        assert_eq!(r.data, &[1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn reassembly_with_gap_is_incomplete() {
        let mut r = Reassembly::new(1, 10);
        r.insert(0, &[0; 4]);
        r.insert(6, &[0; 4]);
        assert!(!r.complete());
        // Filling the gap completes it.
        r.insert(4, &[9, 9]);
        assert!(r.complete());
    }

    #[test]
    fn overlapping_ranges_merge() {
        let mut r = Reassembly::new(1, 8);
        r.insert(0, &[1, 2, 3, 4, 5]);
        r.insert(3, &[4, 5, 6, 7, 8]);
        assert!(r.complete());
        assert_eq!(r.data, &[1, 2, 3, 4, 5, 6, 7, 8]);
    }
}
