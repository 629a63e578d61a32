//! Per-connection state.
//!
//! Everything mutable that outlives a single call — epochs, offsets,
//! installed secrets, packet counters — lives here and is passed
//! explicitly to every layer operation. No layer shares state across
//! connections.

use zeroize::Zeroizing;

use crate::quic::{EncryptionLevel, PacketSpace, QuicVersion};
use crate::types::{CipherAlgorithm, ProtocolVersion};

/// The explicit per-connection context handed to every layer call.
#[derive(Debug)]
pub struct ConnectionContext {
    /// Whether this endpoint plays the client role (decides which
    /// direction of each key set is used for sending).
    pub is_client: bool,
    /// Negotiated TLS/DTLS version, stamped into record headers.
    pub version: ProtocolVersion,
    /// QUIC cryptographic state, populated by the derivation functions in
    /// [`crate::quic::crypto`].
    pub quic: QuicCryptoState,
}

impl ConnectionContext {
    pub fn new(is_client: bool, version: ProtocolVersion) -> Self {
        ConnectionContext {
            is_client,
            version,
            quic: QuicCryptoState::default(),
        }
    }
}

/// Derived QUIC secrets and per-space packet counters.
///
/// The derivation logic owns writing the key slots; the frame and packet
/// layers read the installed-secret flags to select encryption levels and
/// mutate only the counters.
#[derive(Debug)]
pub struct QuicCryptoState {
    pub version: QuicVersion,
    /// First destination connection id observed, the Initial key material.
    pub first_dcid: Vec<u8>,
    /// Negotiated AEAD for handshake and application levels.
    pub aead: CipherAlgorithm,
    pub initial: Option<LevelKeys>,
    pub handshake: Option<LevelKeys>,
    pub zero_rtt: Option<LevelKeys>,
    pub application: Option<LevelKeys>,
    largest_received: [Option<u64>; 3],
    next_packet_number: [u64; 3],
}

impl Default for QuicCryptoState {
    fn default() -> Self {
        QuicCryptoState {
            version: QuicVersion::V1,
            first_dcid: Vec::new(),
            aead: CipherAlgorithm::Aes128Gcm,
            initial: None,
            handshake: None,
            zero_rtt: None,
            application: None,
            largest_received: [None; 3],
            next_packet_number: [0; 3],
        }
    }
}

impl QuicCryptoState {
    /// The encryption level CRYPTO data currently belongs to, selected by
    /// which secrets are installed.
    pub fn active_level(&self) -> EncryptionLevel {
        if self.application.is_some() {
            EncryptionLevel::Application
        } else if self.handshake.is_some() {
            EncryptionLevel::Handshake
        } else {
            EncryptionLevel::Initial
        }
    }

    pub fn level_keys(&self, level: EncryptionLevel) -> Option<&LevelKeys> {
        match level {
            EncryptionLevel::Initial => self.initial.as_ref(),
            EncryptionLevel::Handshake => self.handshake.as_ref(),
            EncryptionLevel::Application => self.application.as_ref(),
        }
    }

    /// Largest packet number seen in a space, feeding ACK emission.
    pub fn largest_received(&self, space: PacketSpace) -> Option<u64> {
        self.largest_received[space.index()]
    }

    /// Note a received packet number.
    pub fn note_received(&mut self, space: PacketSpace, packet_number: u64) {
        let slot = &mut self.largest_received[space.index()];
        if slot.map_or(true, |cur| packet_number > cur) {
            *slot = Some(packet_number);
        }
    }

    /// Take the next packet number for a space, incrementing exactly once.
    pub fn next_packet_number(&mut self, space: PacketSpace) -> u64 {
        let slot = &mut self.next_packet_number[space.index()];
        let pn = *slot;
        *slot += 1;
        pn
    }
}

/// Both directions of one encryption level's keys.
#[derive(Debug, Clone)]
pub struct LevelKeys {
    pub client: DirectionKeys,
    pub server: DirectionKeys,
}

impl LevelKeys {
    /// The keys this endpoint seals with.
    pub fn local(&self, is_client: bool) -> &DirectionKeys {
        if is_client {
            &self.client
        } else {
            &self.server
        }
    }

    /// The keys this endpoint opens with.
    pub fn remote(&self, is_client: bool) -> &DirectionKeys {
        if is_client {
            &self.server
        } else {
            &self.client
        }
    }
}

/// Secret plus expanded key material for one direction of one level.
///
/// All fields are wiped on drop.
#[derive(Debug, Clone)]
pub struct DirectionKeys {
    pub secret: Zeroizing<Vec<u8>>,
    pub key: Zeroizing<Vec<u8>>,
    pub iv: Zeroizing<Vec<u8>>,
    pub hp_key: Zeroizing<Vec<u8>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn active_level_follows_installed_secrets() {
        let mut state = QuicCryptoState::default();
        assert_eq!(state.active_level(), EncryptionLevel::Initial);

        let keys = DirectionKeys {
            secret: Zeroizing::new(vec![0; 32]),
            key: Zeroizing::new(vec![0; 16]),
            iv: Zeroizing::new(vec![0; 12]),
            hp_key: Zeroizing::new(vec![0; 16]),
        };
        let level = LevelKeys {
            client: keys.clone(),
            server: keys.clone(),
        };

        state.handshake = Some(level.clone());
        assert_eq!(state.active_level(), EncryptionLevel::Handshake);

        state.application = Some(level);
        assert_eq!(state.active_level(), EncryptionLevel::Application);
    }

    #[test]
    fn packet_numbers_increment_once_per_take() {
        let mut state = QuicCryptoState::default();
        assert_eq!(state.next_packet_number(PacketSpace::Initial), 0);
        assert_eq!(state.next_packet_number(PacketSpace::Initial), 1);
        assert_eq!(state.next_packet_number(PacketSpace::Handshake), 0);
    }

    #[test]
    fn largest_received_is_monotonic() {
        let mut state = QuicCryptoState::default();
        state.note_received(PacketSpace::ApplicationData, 7);
        state.note_received(PacketSpace::ApplicationData, 3);
        assert_eq!(state.largest_received(PacketSpace::ApplicationData), Some(7));
    }
}
