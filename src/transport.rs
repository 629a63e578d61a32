//! The bottom transport layer.
//!
//! Wraps a blocking byte stream or datagram socket behind the layer
//! contract. A read timeout or end-of-stream is not an error: it surfaces
//! as "no more data" so the layers above can return a partial,
//! unsatisfied result.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::io::{ErrorKind, Read, Write};
use std::net::{TcpStream, UdpSocket};
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

use crate::buffer::Buf;
use crate::config::Config;
use crate::context::ConnectionContext;
use crate::hint::Hint;
use crate::layer::{Chunk, LayerCore, LayerKind, Lower, ProtocolLayer};
use crate::Error;

/// Outcome of one blocking transport read.
#[derive(Debug, PartialEq, Eq)]
pub enum ReadOutcome {
    /// Bytes arrived.
    Data,
    /// The timeout elapsed with nothing to read.
    TimedOut,
    /// The peer closed the stream.
    Closed,
}

/// A blocking byte source/sink with a per-read timeout.
pub trait WireTransport {
    /// Read the next chunk into `buf` (appended), waiting at most
    /// `timeout`.
    fn read_chunk(&mut self, buf: &mut Buf, timeout: Duration) -> Result<ReadOutcome, Error>;

    /// Write one chunk. For datagram transports this is one datagram.
    fn write_chunk(&mut self, data: &[u8]) -> Result<(), Error>;
}

/// TCP byte-stream transport.
pub struct StreamTransport {
    stream: TcpStream,
}

impl StreamTransport {
    pub fn new(stream: TcpStream) -> Self {
        StreamTransport { stream }
    }
}

impl WireTransport for StreamTransport {
    fn read_chunk(&mut self, buf: &mut Buf, timeout: Duration) -> Result<ReadOutcome, Error> {
        self.stream.set_read_timeout(Some(timeout))?;

        let mut tmp = [0u8; 16 * 1024];
        match self.stream.read(&mut tmp) {
            Ok(0) => Ok(ReadOutcome::Closed),
            Ok(n) => {
                buf.extend_from_slice(&tmp[..n]);
                Ok(ReadOutcome::Data)
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::TimedOut => {
                Ok(ReadOutcome::TimedOut)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn write_chunk(&mut self, data: &[u8]) -> Result<(), Error> {
        self.stream.write_all(data)?;
        Ok(())
    }
}

/// UDP datagram transport against one connected peer.
pub struct DatagramTransport {
    socket: UdpSocket,
}

impl DatagramTransport {
    pub fn new(socket: UdpSocket) -> Self {
        DatagramTransport { socket }
    }
}

impl WireTransport for DatagramTransport {
    fn read_chunk(&mut self, buf: &mut Buf, timeout: Duration) -> Result<ReadOutcome, Error> {
        self.socket.set_read_timeout(Some(timeout))?;

        let mut tmp = [0u8; 64 * 1024];
        match self.socket.recv(&mut tmp) {
            Ok(n) => {
                buf.extend_from_slice(&tmp[..n]);
                Ok(ReadOutcome::Data)
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::TimedOut => {
                Ok(ReadOutcome::TimedOut)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn write_chunk(&mut self, data: &[u8]) -> Result<(), Error> {
        self.socket.send(data)?;
        Ok(())
    }
}

/// In-memory datagram pair, used to drive two stacks against each other
/// in tests without sockets.
pub struct MemoryPipe {
    rx: Rc<RefCell<VecDeque<Vec<u8>>>>,
    tx: Rc<RefCell<VecDeque<Vec<u8>>>>,
}

impl MemoryPipe {
    /// Create both ends of a pipe.
    pub fn pair() -> (MemoryPipe, MemoryPipe) {
        let a = Rc::new(RefCell::new(VecDeque::new()));
        let b = Rc::new(RefCell::new(VecDeque::new()));
        (
            MemoryPipe {
                rx: a.clone(),
                tx: b.clone(),
            },
            MemoryPipe { rx: b, tx: a },
        )
    }

    /// Inject a datagram directly into the receive queue (attack vector
    /// for tests: reorder, duplicate, truncate at will).
    pub fn inject(&self, datagram: Vec<u8>) {
        self.rx.borrow_mut().push_back(datagram);
    }

    /// Datagrams written by this end, oldest first.
    pub fn sent(&self) -> Vec<Vec<u8>> {
        self.tx.borrow().iter().cloned().collect()
    }

    /// Drain datagrams written by this end.
    pub fn drain_sent(&self) -> Vec<Vec<u8>> {
        self.tx.borrow_mut().drain(..).collect()
    }
}

impl WireTransport for MemoryPipe {
    fn read_chunk(&mut self, buf: &mut Buf, _timeout: Duration) -> Result<ReadOutcome, Error> {
        match self.rx.borrow_mut().pop_front() {
            Some(datagram) => {
                buf.extend_from_slice(&datagram);
                Ok(ReadOutcome::Data)
            }
            // Nothing queued: the in-memory pipe never blocks, so an empty
            // queue is the timeout case.
            None => Ok(ReadOutcome::TimedOut),
        }
    }

    fn write_chunk(&mut self, data: &[u8]) -> Result<(), Error> {
        self.tx.borrow_mut().push_back(data.to_vec());
        Ok(())
    }
}

/// Bottom layer adapting a [`WireTransport`] to the layer contract.
pub struct TransportLayer<T: WireTransport> {
    config: Arc<Config>,
    core: LayerCore,
    transport: T,
    closed: bool,
}

impl<T: WireTransport> TransportLayer<T> {
    pub fn new(config: Arc<Config>, transport: T) -> Self {
        TransportLayer {
            config,
            core: LayerCore::new(LayerKind::Transport),
            transport,
            closed: false,
        }
    }

    /// Access the wrapped transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }
}

impl<T: WireTransport> ProtocolLayer for TransportLayer<T> {
    fn kind(&self) -> LayerKind {
        LayerKind::Transport
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
        // The transport has no container types to send.
        Err(Error::UnsupportedConfiguration(
            LayerKind::Transport,
            "transport cannot send containers",
        ))
    }

    fn send_data(
        &mut self,
        _ctx: &mut ConnectionContext,
        _hint: Option<&Hint>,
        data: &[u8],
        _lower: &mut Lower<'_>,
    ) -> Result<(), Error> {
        trace!("transport: write {} bytes", data.len());
        self.transport.write_chunk(data)
    }

    fn receive_data(
        &mut self,
        ctx: &mut ConnectionContext,
        lower: &mut Lower<'_>,
    ) -> Result<(), Error> {
        // Pull one chunk so a configured stack above has bytes waiting.
        self.receive_more_for_hint(ctx, None, lower).map(|_| ())
    }

    fn receive_more_for_hint(
        &mut self,
        _ctx: &mut ConnectionContext,
        _hint: Option<&Hint>,
        _lower: &mut Lower<'_>,
    ) -> Result<Option<Chunk>, Error> {
        if self.closed {
            return Ok(None);
        }

        let mut data = Buf::new();
        match self
            .transport
            .read_chunk(&mut data, self.config.receive_timeout())?
        {
            ReadOutcome::Data => {
                trace!("transport: read {} bytes", data.len());
                Ok(Some(Chunk::new(None, data)))
            }
            ReadOutcome::TimedOut => Ok(None),
            ReadOutcome::Closed => {
                debug!("transport: stream closed");
                self.closed = true;
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ProtocolVersion;

    #[test]
    fn memory_pipe_carries_datagrams_both_ways() {
        let (mut a, mut b) = MemoryPipe::pair();

        a.write_chunk(b"ping").unwrap();
        let mut buf = Buf::new();
        assert_eq!(
            b.read_chunk(&mut buf, Duration::from_millis(1)).unwrap(),
            ReadOutcome::Data
        );
        assert_eq!(&*buf, b"ping");

        let mut buf = Buf::new();
        assert_eq!(
            a.read_chunk(&mut buf, Duration::from_millis(1)).unwrap(),
            ReadOutcome::TimedOut
        );
    }

    #[test]
    fn transport_layer_times_out_to_none() {
        let (pipe, _peer) = MemoryPipe::pair();
        let mut layer = TransportLayer::new(Arc::new(Config::default()), pipe);
        let mut ctx = ConnectionContext::new(true, ProtocolVersion::TLS1_2);
        let mut lower = Lower::new(&mut []);

        let chunk = layer
            .receive_more_for_hint(&mut ctx, None, &mut lower)
            .unwrap();
        assert!(chunk.is_none());
    }
}
