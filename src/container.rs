//! Containers: the structured units layers produce and consume.
//!
//! A container is one message, record, fragment, frame or packet. On the
//! receive path a parser fills it from wire bytes; on the send path it is
//! built filled and serialized out. Containers always retain their raw
//! bytes so that flagged results (failed decryption, unrecognized
//! structure) stay inspectable.

use std::fmt;

use crate::dtls::FragmentContainer;
use crate::quic::{FrameContainer, PacketContainer};
use crate::record::RecordContainer;

/// One structured unit exchanged between adjacent layers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Container {
    Message(MessageContainer),
    Record(RecordContainer),
    Fragment(FragmentContainer),
    QuicFrame(FrameContainer),
    QuicPacket(PacketContainer),
    HttpMessage(HttpMessageContainer),
    /// Structural parse failure on attacker-controlled bytes. The bytes
    /// are preserved; the stack is not aborted.
    Unrecognized(UnrecognizedContainer),
}

impl Container {
    pub fn kind(&self) -> ContainerKind {
        match self {
            Container::Message(_) => ContainerKind::Message,
            Container::Record(_) => ContainerKind::Record,
            Container::Fragment(_) => ContainerKind::Fragment,
            Container::QuicFrame(_) => ContainerKind::QuicFrame,
            Container::QuicPacket(_) => ContainerKind::QuicPacket,
            Container::HttpMessage(_) => ContainerKind::HttpMessage,
            Container::Unrecognized(_) => ContainerKind::Unrecognized,
        }
    }

    /// The discriminating byte of the unit, used for structure matching:
    /// handshake/message type for messages and fragments, content type for
    /// records, first type byte for frames.
    pub fn kind_byte(&self) -> Option<u8> {
        match self {
            Container::Message(m) => Some(m.kind),
            Container::Record(r) => Some(r.content_type.as_u8()),
            Container::Fragment(f) => Some(f.handshake_type),
            Container::QuicFrame(f) => Some(f.type_byte()),
            Container::QuicPacket(_) => None,
            Container::HttpMessage(_) => None,
            Container::Unrecognized(_) => None,
        }
    }

    /// The raw wire bytes of the unit.
    pub fn raw(&self) -> &[u8] {
        match self {
            Container::Message(m) => &m.bytes,
            Container::Record(r) => &r.raw,
            Container::Fragment(f) => &f.raw,
            Container::QuicFrame(f) => &f.raw,
            Container::QuicPacket(p) => &p.raw,
            Container::HttpMessage(m) => &m.bytes,
            Container::Unrecognized(u) => &u.bytes,
        }
    }
}

/// Discriminator for [`Container`] variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerKind {
    Message,
    Record,
    Fragment,
    QuicFrame,
    QuicPacket,
    HttpMessage,
    Unrecognized,
}

impl fmt::Display for ContainerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// An opaque application-level unit: a handshake message or a blob of
/// application data. Field-level structure is outside this engine; the
/// layers only need the discriminating kind byte and the serialized bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageContainer {
    pub kind: u8,
    pub bytes: Vec<u8>,
}

impl MessageContainer {
    pub fn new(kind: u8, bytes: Vec<u8>) -> Self {
        MessageContainer { kind, bytes }
    }
}

/// Minimal HTTP message unit, carried opaque.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpMessageContainer {
    pub bytes: Vec<u8>,
}

/// Bytes no parser recognized, preserved for inspection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnrecognizedContainer {
    pub bytes: Vec<u8>,
    pub reason: &'static str,
}

/// A template describing one expected or to-be-sent container.
///
/// Configurations are lists of these. A spec matches a container when the
/// kinds agree and, if `kind_byte` is set, the discriminating byte agrees
/// too.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSpec {
    pub kind: ContainerKind,
    pub kind_byte: Option<u8>,
    /// Payload for the send path; ignored when matching received units.
    pub payload: Option<Vec<u8>>,
}

impl ContainerSpec {
    pub fn new(kind: ContainerKind) -> Self {
        ContainerSpec {
            kind,
            kind_byte: None,
            payload: None,
        }
    }

    pub fn with_kind_byte(mut self, byte: u8) -> Self {
        self.kind_byte = Some(byte);
        self
    }

    pub fn with_payload(mut self, payload: Vec<u8>) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Whether a received container structurally matches this template.
    pub fn matches(&self, container: &Container) -> bool {
        if self.kind != container.kind() {
            return false;
        }
        match self.kind_byte {
            Some(expected) => container.kind_byte() == Some(expected),
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spec_matches_on_kind_and_byte() {
        let c = Container::Message(MessageContainer::new(1, vec![1, 0, 0, 0]));

        assert!(ContainerSpec::new(ContainerKind::Message).matches(&c));
        assert!(ContainerSpec::new(ContainerKind::Message)
            .with_kind_byte(1)
            .matches(&c));
        assert!(!ContainerSpec::new(ContainerKind::Message)
            .with_kind_byte(2)
            .matches(&c));
        assert!(!ContainerSpec::new(ContainerKind::Record).matches(&c));
    }
}
