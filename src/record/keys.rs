//! Per-epoch symmetric state.

use zeroize::Zeroizing;

use crate::types::CipherAlgorithm;
use crate::Error;

/// The symmetric keys, IV and connection id active for one direction of
/// one epoch.
///
/// A key set is replaced, never mutated, on rekey. Key material is wiped
/// on drop.
#[derive(Debug, Clone)]
pub struct KeySet {
    pub algorithm: CipherAlgorithm,
    pub key: Zeroizing<Vec<u8>>,
    pub iv: Zeroizing<Vec<u8>>,
    pub mac_key: Zeroizing<Vec<u8>>,
    pub connection_id: Vec<u8>,
}

impl KeySet {
    /// Create a key set, validating the material lengths against the
    /// algorithm.
    pub fn new(
        algorithm: CipherAlgorithm,
        key: Vec<u8>,
        iv: Vec<u8>,
        mac_key: Vec<u8>,
    ) -> Result<Self, Error> {
        if key.len() != algorithm.key_len() {
            return Err(Error::BadKeyMaterial("key length"));
        }
        if iv.len() != algorithm.iv_len() {
            return Err(Error::BadKeyMaterial("iv length"));
        }
        if mac_key.len() != algorithm.mac_key_len() {
            return Err(Error::BadKeyMaterial("mac key length"));
        }
        Ok(KeySet {
            algorithm,
            key: Zeroizing::new(key),
            iv: Zeroizing::new(iv),
            mac_key: Zeroizing::new(mac_key),
            connection_id: Vec::new(),
        })
    }

    /// Attach a connection id (DTLS 1.2 CID records).
    pub fn with_connection_id(mut self, cid: Vec<u8>) -> Self {
        self.connection_id = cid;
        self
    }
}

/// Sliding replay window for record sequence numbers.
///
/// Maintains the latest accepted sequence number and a 64-bit bitmap of
/// the last 64 seen sequence numbers. Each read epoch has its own window;
/// a replay hit is a diagnostic for this engine, not a drop.
#[derive(Debug, Default)]
pub struct ReplayWindow {
    max_seq: u64,
    window: u64,
}

impl ReplayWindow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if the given sequence number is fresh and update the window.
    /// Returns true if fresh/acceptable, false if duplicate/too old.
    pub fn check_and_update(&mut self, seqno: u64) -> bool {
        if seqno > self.max_seq {
            let delta = seqno - self.max_seq;
            let shift = core::cmp::min(delta, 63);
            self.window <<= shift;
            self.window |= 1; // mark newest as seen
            self.max_seq = seqno;
            true
        } else {
            let offset = self.max_seq - seqno;
            if offset >= 64 {
                return false; // too old
            }
            let mask = 1u64 << offset;
            if (self.window & mask) != 0 {
                return false; // duplicate
            }
            self.window |= mask;
            true
        }
    }
}
