#![forbid(unsafe_code)]
#![warn(clippy::all)]
//! Layered wire-protocol engine for TLS/DTLS/QUIC security testing.
//!
//! A stack of composable protocol layers converts application-level units
//! (handshake messages, opaque records, datagram frames) into wire bytes
//! and back, while tracking per-layer state: fragmentation/reassembly,
//! cryptographic framing, acknowledgment.
//!
//! The engine is built to be driven against hostile peers: malformed,
//! truncated, reordered or duplicated input degrades into flagged
//! containers rather than aborting the stack, and cryptographic failures
//! preserve the raw bytes for inspection.

#[macro_use]
extern crate log;

mod buffer;
mod config;
mod container;
mod context;
mod error;
mod hint;
mod layer;
mod transport;
mod types;

pub mod dtls;
pub mod quic;
pub mod record;

pub use buffer::{Buf, BufferPool};
pub use config::{Config, ConfigBuilder};
pub use container::{
    Container, ContainerKind, ContainerSpec, HttpMessageContainer, MessageContainer,
    UnrecognizedContainer,
};
pub use context::{ConnectionContext, DirectionKeys, LevelKeys, QuicCryptoState};
pub use error::Error;
pub use hint::{Hint, QuicFrameHint, QuicPacketHint, RecordHint};
pub use layer::{
    Chunk, Evaluation, LayerConfiguration, LayerCore, LayerKind, LayerResult, LayerStack, Lower,
    Mismatch, Progress, ProtocolLayer,
};
pub use transport::{
    DatagramTransport, MemoryPipe, ReadOutcome, StreamTransport, TransportLayer, WireTransport,
};
pub use types::{CipherAlgorithm, CipherFamily, ContentType, ProtocolVersion, Sequence};
