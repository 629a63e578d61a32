//! Inter-layer hints.
//!
//! A hint is a small tagged value travelling with a chunk of bytes between
//! two adjacent layers. Each layer boundary has its own closed variant set;
//! a layer only ever interprets the hint produced by its one known
//! neighbor.

use crate::quic::PacketSpace;
use crate::types::ContentType;

/// A per-chunk tag read by exactly one neighboring layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hint {
    Record(RecordHint),
    QuicPacket(QuicPacketHint),
    QuicFrame(QuicFrameHint),
}

impl Hint {
    pub fn record(content_type: ContentType) -> Hint {
        Hint::Record(RecordHint { content_type })
    }

    pub fn quic_packet(space: PacketSpace) -> Hint {
        Hint::QuicPacket(QuicPacketHint { space })
    }

    /// The record hint, if this is one.
    pub fn as_record(&self) -> Option<&RecordHint> {
        match self {
            Hint::Record(h) => Some(h),
            _ => None,
        }
    }

    /// The packet hint, if this is one.
    pub fn as_quic_packet(&self) -> Option<&QuicPacketHint> {
        match self {
            Hint::QuicPacket(h) => Some(h),
            _ => None,
        }
    }
}

/// Produced by the record layer for the layer above: what kind of record
/// the chunk was carried in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHint {
    pub content_type: ContentType,
}

/// Exchanged between the QUIC frame and packet layers: which packet number
/// space the chunk belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuicPacketHint {
    pub space: PacketSpace,
}

/// Produced for the QUIC frame layer by the layer above: what kind of unit
/// the bytes are and whether this is the first send of its kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuicFrameHint {
    pub message_kind: u8,
    pub is_first: bool,
}
