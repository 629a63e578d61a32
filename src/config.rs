use std::time::Duration;

/// Engine configuration.
///
/// One `Config` is shared by every layer of a stack. All values have
/// defaults tuned for interoperability; attack scenarios override them
/// freely (e.g. shrinking fragment bounds to force pathological
/// fragmentation).
#[derive(Debug, Clone)]
pub struct Config {
    receive_timeout: Duration,
    max_fragment_len: usize,
    dtls_max_fragment_len: usize,
    quic_crypto_chunk_len: usize,
    quic_min_stream_frame_len: usize,
    quic_ack_delay: u64,
    quic_stream_id: u64,
    max_buffered_fragments: usize,
}

impl Config {
    /// Create a new configuration builder.
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder {
            receive_timeout: Duration::from_secs(2),
            max_fragment_len: 16_384,
            dtls_max_fragment_len: 1150,
            quic_crypto_chunk_len: 1000,
            quic_min_stream_frame_len: 32,
            quic_ack_delay: 100,
            quic_stream_id: 0,
            max_buffered_fragments: 64,
        }
    }

    /// Timeout for one blocking read on the transport.
    ///
    /// A timeout is not an error: the receive call returns with an
    /// unsatisfied result instead.
    #[inline(always)]
    pub fn receive_timeout(&self) -> Duration {
        self.receive_timeout
    }

    /// Largest record plaintext we will produce.
    #[inline(always)]
    pub fn max_fragment_len(&self) -> usize {
        self.max_fragment_len
    }

    /// Largest DTLS handshake fragment body we will produce.
    #[inline(always)]
    pub fn dtls_max_fragment_len(&self) -> usize {
        self.dtls_max_fragment_len
    }

    /// Default data size for freshly chunked CRYPTO frames.
    #[inline(always)]
    pub fn quic_crypto_chunk_len(&self) -> usize {
        self.quic_crypto_chunk_len
    }

    /// Minimum serialized STREAM frame size.
    ///
    /// Shorter frames are padded up to this floor.
    #[inline(always)]
    pub fn quic_min_stream_frame_len(&self) -> usize {
        self.quic_min_stream_frame_len
    }

    /// Fixed ack-delay value carried in emitted ACK frames.
    #[inline(always)]
    pub fn quic_ack_delay(&self) -> u64 {
        self.quic_ack_delay
    }

    /// Stream id used for application data STREAM frames.
    #[inline(always)]
    pub fn quic_stream_id(&self) -> u64 {
        self.quic_stream_id
    }

    /// Max number of fragments/frames buffered per reassembly before
    /// rejecting more input from a misbehaving peer.
    #[inline(always)]
    pub fn max_buffered_fragments(&self) -> usize {
        self.max_buffered_fragments
    }
}

impl Default for Config {
    fn default() -> Self {
        Config::builder().build()
    }
}

/// Builder for [`Config`].
pub struct ConfigBuilder {
    receive_timeout: Duration,
    max_fragment_len: usize,
    dtls_max_fragment_len: usize,
    quic_crypto_chunk_len: usize,
    quic_min_stream_frame_len: usize,
    quic_ack_delay: u64,
    quic_stream_id: u64,
    max_buffered_fragments: usize,
}

impl ConfigBuilder {
    /// Set the timeout for one blocking transport read.
    ///
    /// Defaults to 2 seconds.
    pub fn receive_timeout(mut self, timeout: Duration) -> Self {
        self.receive_timeout = timeout;
        self
    }

    /// Set the largest record plaintext to produce.
    ///
    /// Defaults to 16384.
    pub fn max_fragment_len(mut self, len: usize) -> Self {
        self.max_fragment_len = len;
        self
    }

    /// Set the largest DTLS handshake fragment body to produce.
    ///
    /// Defaults to 1150.
    pub fn dtls_max_fragment_len(mut self, len: usize) -> Self {
        self.dtls_max_fragment_len = len;
        self
    }

    /// Set the default data size for freshly chunked CRYPTO frames.
    ///
    /// Defaults to 1000.
    pub fn quic_crypto_chunk_len(mut self, len: usize) -> Self {
        self.quic_crypto_chunk_len = len;
        self
    }

    /// Set the minimum serialized STREAM frame size (padding floor).
    ///
    /// Defaults to 32.
    pub fn quic_min_stream_frame_len(mut self, len: usize) -> Self {
        self.quic_min_stream_frame_len = len;
        self
    }

    /// Set the fixed ack-delay value for emitted ACK frames.
    ///
    /// Defaults to 100.
    pub fn quic_ack_delay(mut self, delay: u64) -> Self {
        self.quic_ack_delay = delay;
        self
    }

    /// Set the stream id for application data STREAM frames.
    ///
    /// Defaults to 0.
    pub fn quic_stream_id(mut self, id: u64) -> Self {
        self.quic_stream_id = id;
        self
    }

    /// Set the max number of buffered fragments per reassembly.
    ///
    /// Defaults to 64.
    pub fn max_buffered_fragments(mut self, max: usize) -> Self {
        self.max_buffered_fragments = max;
        self
    }

    /// Build the configuration.
    pub fn build(self) -> Config {
        Config {
            receive_timeout: self.receive_timeout,
            max_fragment_len: self.max_fragment_len,
            dtls_max_fragment_len: self.dtls_max_fragment_len,
            quic_crypto_chunk_len: self.quic_crypto_chunk_len,
            quic_min_stream_frame_len: self.quic_min_stream_frame_len,
            quic_ack_delay: self.quic_ack_delay,
            quic_stream_id: self.quic_stream_id,
            max_buffered_fragments: self.max_buffered_fragments,
        }
    }
}
