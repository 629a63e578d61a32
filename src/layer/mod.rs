//! The layer abstraction: one trait, an ordered stack, and the embeddable
//! state helper every layer carries.
//!
//! The contract between adjacent layers is exactly four operations:
//! `send_configuration`, `send_data(hint, bytes)`, `receive_data` and
//! `receive_more_for_hint(hint)`. Everything protocol-specific lives in
//! the implementations; the plumbing here is shared.

mod config;
mod stack;

pub use config::{Evaluation, LayerConfiguration, Mismatch};
pub use stack::{LayerStack, Lower};

use std::collections::VecDeque;
use std::fmt;

use crate::buffer::Buf;
use crate::container::Container;
use crate::context::ConnectionContext;
use crate::hint::Hint;
use crate::Error;

/// Identifies a layer position/implementation in a stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerKind {
    Record,
    DtlsFragment,
    QuicFrame,
    QuicPacket,
    Transport,
}

impl fmt::Display for LayerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// A chunk of payload bytes travelling upward between adjacent layers,
/// tagged with the producing layer's hint.
#[derive(Debug)]
pub struct Chunk {
    pub hint: Option<Hint>,
    pub data: Buf,
}

impl Chunk {
    pub fn new(hint: Option<Hint>, data: Buf) -> Self {
        Chunk { hint, data }
    }
}

/// What one send/receive action produced on one layer.
#[derive(Debug)]
pub struct LayerResult {
    pub kind: LayerKind,
    /// Containers produced (receive) or emitted (send), in order.
    pub containers: Vec<Container>,
    /// Whether the active configuration's policy completed. A timeout or
    /// end-of-stream leaves this `false`; that is a result, not an error.
    pub satisfied: bool,
    /// Set when a Tight policy failed on a structural mismatch.
    pub mismatch: Option<Mismatch>,
}

/// One position in an ordered layer stack.
///
/// Implementations keep their cross-call state (leftover bytes, buffered
/// upward chunks, configuration bookkeeping) in an embedded [`LayerCore`].
/// Calls reach the neighbor below through the [`Lower`] cursor; a layer
/// never sees anything but its immediate neighbors.
pub trait ProtocolLayer {
    fn kind(&self) -> LayerKind;

    /// Access the embedded shared state.
    fn core(&self) -> &LayerCore;
    fn core_mut(&mut self) -> &mut LayerCore;

    /// Send every container in the layer's current configuration.
    fn send_configuration(
        &mut self,
        ctx: &mut ConnectionContext,
        lower: &mut Lower<'_>,
    ) -> Result<(), Error>;

    /// Push raw bytes down, mapped into this layer's container type using
    /// the hint.
    fn send_data(
        &mut self,
        ctx: &mut ConnectionContext,
        hint: Option<&Hint>,
        data: &[u8],
        lower: &mut Lower<'_>,
    ) -> Result<(), Error>;

    /// Pull containers until the active configuration is satisfied or the
    /// underlying stream ends/times out.
    fn receive_data(
        &mut self,
        ctx: &mut ConnectionContext,
        lower: &mut Lower<'_>,
    ) -> Result<(), Error>;

    /// Upward request from the consumer above: produce the next chunk of
    /// payload bytes matching the hint, processing more lower-layer input
    /// if nothing suitable is buffered. `None` means no more data is
    /// available right now (timeout or end-of-stream).
    fn receive_more_for_hint(
        &mut self,
        ctx: &mut ConnectionContext,
        hint: Option<&Hint>,
        lower: &mut Lower<'_>,
    ) -> Result<Option<Chunk>, Error>;
}

/// Embeddable per-layer state: configuration bookkeeping, produced
/// containers, buffered upward chunks and the leftover-bytes cursor.
///
/// This is composition, not inheritance: layers hold one of these and
/// delegate the shared bookkeeping to it.
#[derive(Debug)]
pub struct LayerCore {
    kind: LayerKind,
    config: Option<LayerConfiguration>,
    containers: Vec<Container>,
    upward: VecDeque<Chunk>,
    leftover: Buf,
    mismatch: Option<Mismatch>,
}

/// Progress of the active configuration after recording a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    /// Keep receiving.
    Continue,
    /// Policy complete; stop.
    Satisfied,
    /// Tight mismatch recorded; stop.
    Mismatched,
}

impl LayerCore {
    pub fn new(kind: LayerKind) -> Self {
        LayerCore {
            kind,
            config: None,
            containers: Vec::new(),
            upward: VecDeque::new(),
            leftover: Buf::new(),
            mismatch: None,
        }
    }

    pub fn kind(&self) -> LayerKind {
        self.kind
    }

    /// Install a fresh configuration for the next action, clearing the
    /// bookkeeping of the previous one. Leftover bytes and buffered
    /// upward chunks survive; partial reads are never dropped.
    pub fn set_configuration(&mut self, config: LayerConfiguration) {
        self.config = Some(config);
        self.containers.clear();
        self.mismatch = None;
    }

    pub fn configuration(&self) -> Option<&LayerConfiguration> {
        self.config.as_ref()
    }

    pub fn has_configuration(&self) -> bool {
        self.config.is_some()
    }

    /// Record a produced container and evaluate the policy.
    pub fn record_container(&mut self, container: Container) -> Progress {
        self.containers.push(container);

        let Some(config) = &self.config else {
            return Progress::Continue;
        };

        match config.evaluate(&self.containers) {
            Evaluation::Unsatisfied => Progress::Continue,
            Evaluation::Satisfied => Progress::Satisfied,
            Evaluation::Mismatch(m) => {
                debug!(
                    "{}: tight mismatch at index {} (got kind byte {:?})",
                    self.kind, m.index, m.actual
                );
                self.mismatch = Some(m);
                Progress::Mismatched
            }
        }
    }

    /// Queue a payload chunk for the layer above.
    pub fn push_upward(&mut self, chunk: Chunk) {
        self.upward.push_back(chunk);
    }

    /// Take the oldest buffered chunk whose hint is compatible with the
    /// requested one. A request without a hint takes anything.
    pub fn pop_upward(&mut self, hint: Option<&Hint>) -> Option<Chunk> {
        let index = match hint {
            None => {
                if self.upward.is_empty() {
                    return None;
                }
                0
            }
            Some(wanted) => self
                .upward
                .iter()
                .position(|c| c.hint.as_ref() == Some(wanted))?,
        };
        self.upward.remove(index)
    }

    /// The leftover-bytes cursor: unconsumed lower-layer bytes retained
    /// across calls.
    pub fn leftover(&mut self) -> &mut Buf {
        &mut self.leftover
    }

    /// Containers produced since the configuration was installed.
    pub fn containers(&self) -> &[Container] {
        &self.containers
    }

    /// Close out the current action, consuming the configuration.
    pub fn take_result(&mut self) -> LayerResult {
        let satisfied = match (&self.config, &self.mismatch) {
            (_, Some(_)) => false,
            (Some(config), None) => {
                config.evaluate(&self.containers) == Evaluation::Satisfied
            }
            (None, None) => true,
        };
        self.config = None;
        LayerResult {
            kind: self.kind,
            containers: std::mem::take(&mut self.containers),
            satisfied,
            mismatch: self.mismatch.take(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::{ContainerKind, ContainerSpec, MessageContainer};

    fn msg(kind: u8) -> Container {
        Container::Message(MessageContainer::new(kind, vec![kind]))
    }

    #[test]
    fn core_tracks_progress_and_result() {
        let mut core = LayerCore::new(LayerKind::Record);
        core.set_configuration(LayerConfiguration::Specific(vec![
            ContainerSpec::new(ContainerKind::Message).with_kind_byte(1),
        ]));

        assert_eq!(core.record_container(msg(9)), Progress::Continue);
        assert_eq!(core.record_container(msg(1)), Progress::Satisfied);

        let result = core.take_result();
        assert!(result.satisfied);
        assert_eq!(result.containers.len(), 2);
        assert!(result.mismatch.is_none());
    }

    #[test]
    fn unsatisfied_without_required_container() {
        let mut core = LayerCore::new(LayerKind::Record);
        core.set_configuration(LayerConfiguration::Specific(vec![
            ContainerSpec::new(ContainerKind::Message).with_kind_byte(1),
        ]));

        core.record_container(msg(2));
        let result = core.take_result();
        assert!(!result.satisfied);
    }

    #[test]
    fn upward_chunks_filtered_by_hint() {
        use crate::types::ContentType;

        let mut core = LayerCore::new(LayerKind::Record);
        core.push_upward(Chunk::new(
            Some(Hint::record(ContentType::Alert)),
            Buf::from_slice(b"a"),
        ));
        core.push_upward(Chunk::new(
            Some(Hint::record(ContentType::Handshake)),
            Buf::from_slice(b"h"),
        ));

        let wanted = Hint::record(ContentType::Handshake);
        let chunk = core.pop_upward(Some(&wanted)).unwrap();
        assert_eq!(&*chunk.data, b"h");

        // No hint takes the oldest remaining chunk.
        let chunk = core.pop_upward(None).unwrap();
        assert_eq!(&*chunk.data, b"a");
        assert!(core.pop_upward(None).is_none());
    }
}
