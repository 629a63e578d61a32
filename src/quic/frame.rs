//! QUIC frame encoding/decoding (RFC 9000 Section 19).

use nom::bytes::complete::take;
use nom::IResult;

use crate::quic::varint::{parse_varint, parse_varint_bytes, serialize_varint};

const FRAME_PADDING: u64 = 0x00;
const FRAME_PING: u64 = 0x01;
const FRAME_ACK: u64 = 0x02;
const FRAME_ACK_ECN: u64 = 0x03;
const FRAME_CRYPTO: u64 = 0x06;
const FRAME_NEW_TOKEN: u64 = 0x07;
const FRAME_STREAM_BASE: u64 = 0x08;
const FRAME_STREAM_MAX: u64 = 0x0f;
const FRAME_NEW_CONNECTION_ID: u64 = 0x18;
const FRAME_PATH_CHALLENGE: u64 = 0x1a;
const FRAME_PATH_RESPONSE: u64 = 0x1b;
const FRAME_CONNECTION_CLOSE: u64 = 0x1c;
const FRAME_CONNECTION_CLOSE_APP: u64 = 0x1d;
const FRAME_HANDSHAKE_DONE: u64 = 0x1e;

/// One decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A run of consecutive PADDING bytes.
    Padding { len: usize },
    Ping,
    Ack(AckFrame),
    Crypto(CryptoFrame),
    NewToken { token: Vec<u8> },
    Stream(StreamFrame),
    NewConnectionId(NewConnectionIdFrame),
    PathChallenge([u8; 8]),
    PathResponse([u8; 8]),
    ConnectionClose(ConnectionCloseFrame),
    HandshakeDone,
    /// Unrecognized type: the body cannot be delimited, so the remainder
    /// of the payload is preserved raw.
    Unknown { frame_type: u64, body: Vec<u8> },
}

/// ACK frame: largest acknowledged, delay, first range and further
/// gap/length pairs, optional ECN counts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AckFrame {
    pub largest_acknowledged: u64,
    pub ack_delay: u64,
    pub first_range: u64,
    /// (gap, range length) pairs below the first range.
    pub ranges: Vec<(u64, u64)>,
    pub ecn: Option<(u64, u64, u64)>,
}

/// CRYPTO frame: a slice of the handshake byte stream at an offset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CryptoFrame {
    pub offset: u64,
    pub data: Vec<u8>,
}

/// STREAM frame (types 0x08-0x0f).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamFrame {
    pub stream_id: u64,
    pub offset: u64,
    pub fin: bool,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewConnectionIdFrame {
    pub sequence_number: u64,
    pub retire_prior_to: u64,
    pub connection_id: Vec<u8>,
    pub stateless_reset_token: [u8; 16],
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionCloseFrame {
    /// 0x1d application close vs 0x1c transport close.
    pub is_application: bool,
    pub error_code: u64,
    pub frame_type: Option<u64>,
    pub reason: Vec<u8>,
}

impl Frame {
    /// Whether receipt of this frame obliges the receiver to acknowledge
    /// the containing packet.
    pub fn is_ack_eliciting(&self) -> bool {
        !matches!(
            self,
            Frame::Padding { .. } | Frame::Ack(_) | Frame::ConnectionClose(_)
        )
    }

    /// The (first byte of the) wire type.
    pub fn type_byte(&self) -> u8 {
        match self {
            Frame::Padding { .. } => FRAME_PADDING as u8,
            Frame::Ping => FRAME_PING as u8,
            Frame::Ack(a) if a.ecn.is_some() => FRAME_ACK_ECN as u8,
            Frame::Ack(_) => FRAME_ACK as u8,
            Frame::Crypto(_) => FRAME_CRYPTO as u8,
            Frame::NewToken { .. } => FRAME_NEW_TOKEN as u8,
            Frame::Stream(s) => {
                let mut ty = FRAME_STREAM_BASE as u8;
                if s.offset > 0 {
                    ty |= 0x04;
                }
                ty |= 0x02; // always emitted with an explicit length
                if s.fin {
                    ty |= 0x01;
                }
                ty
            }
            Frame::NewConnectionId(_) => FRAME_NEW_CONNECTION_ID as u8,
            Frame::PathChallenge(_) => FRAME_PATH_CHALLENGE as u8,
            Frame::PathResponse(_) => FRAME_PATH_RESPONSE as u8,
            Frame::ConnectionClose(c) if c.is_application => FRAME_CONNECTION_CLOSE_APP as u8,
            Frame::ConnectionClose(_) => FRAME_CONNECTION_CLOSE as u8,
            Frame::HandshakeDone => FRAME_HANDSHAKE_DONE as u8,
            Frame::Unknown { frame_type, .. } => *frame_type as u8,
        }
    }

    /// Parse one frame off the front of a packet payload.
    pub fn parse(input: &[u8]) -> IResult<&[u8], Frame> {
        let (rest, frame_type) = parse_varint(input)?;

        match frame_type {
            FRAME_PADDING => {
                // Coalesce the run of zero bytes.
                let mut len = 1;
                let mut rest = rest;
                while let [0, tail @ ..] = rest {
                    len += 1;
                    rest = tail;
                }
                Ok((rest, Frame::Padding { len }))
            }
            FRAME_PING => Ok((rest, Frame::Ping)),
            FRAME_ACK | FRAME_ACK_ECN => {
                let (rest, largest_acknowledged) = parse_varint(rest)?;
                let (rest, ack_delay) = parse_varint(rest)?;
                let (rest, range_count) = parse_varint(rest)?;
                let (mut rest, first_range) = parse_varint(rest)?;
                let mut ranges = Vec::new();
                for _ in 0..range_count {
                    let (r, gap) = parse_varint(rest)?;
                    let (r, len) = parse_varint(r)?;
                    ranges.push((gap, len));
                    rest = r;
                }
                let (rest, ecn) = if frame_type == FRAME_ACK_ECN {
                    let (r, ect0) = parse_varint(rest)?;
                    let (r, ect1) = parse_varint(r)?;
                    let (r, ce) = parse_varint(r)?;
                    (r, Some((ect0, ect1, ce)))
                } else {
                    (rest, None)
                };
                Ok((
                    rest,
                    Frame::Ack(AckFrame {
                        largest_acknowledged,
                        ack_delay,
                        first_range,
                        ranges,
                        ecn,
                    }),
                ))
            }
            FRAME_CRYPTO => {
                let (rest, offset) = parse_varint(rest)?;
                let (rest, data) = parse_varint_bytes(rest)?;
                Ok((
                    rest,
                    Frame::Crypto(CryptoFrame {
                        offset,
                        data: data.to_vec(),
                    }),
                ))
            }
            FRAME_NEW_TOKEN => {
                let (rest, token) = parse_varint_bytes(rest)?;
                Ok((
                    rest,
                    Frame::NewToken {
                        token: token.to_vec(),
                    },
                ))
            }
            t if (FRAME_STREAM_BASE..=FRAME_STREAM_MAX).contains(&t) => {
                let has_offset = t & 0x04 != 0;
                let has_len = t & 0x02 != 0;
                let fin = t & 0x01 != 0;

                let (rest, stream_id) = parse_varint(rest)?;
                let (rest, offset) = if has_offset {
                    parse_varint(rest)?
                } else {
                    (rest, 0)
                };
                let (rest, data) = if has_len {
                    parse_varint_bytes(rest)?
                } else {
                    // No length: the frame extends to the end of the
                    // packet payload.
                    (&rest[rest.len()..], rest)
                };
                Ok((
                    rest,
                    Frame::Stream(StreamFrame {
                        stream_id,
                        offset,
                        fin,
                        data: data.to_vec(),
                    }),
                ))
            }
            FRAME_NEW_CONNECTION_ID => {
                let (rest, sequence_number) = parse_varint(rest)?;
                let (rest, retire_prior_to) = parse_varint(rest)?;
                let (rest, cid_len) = nom::number::complete::be_u8(rest)?;
                let (rest, cid) = take(cid_len as usize)(rest)?;
                let (rest, token) = take(16usize)(rest)?;
                // Unwrap is OK, take(16) guarantees the length.
                let stateless_reset_token: [u8; 16] = token.try_into().unwrap();
                Ok((
                    rest,
                    Frame::NewConnectionId(NewConnectionIdFrame {
                        sequence_number,
                        retire_prior_to,
                        connection_id: cid.to_vec(),
                        stateless_reset_token,
                    }),
                ))
            }
            FRAME_PATH_CHALLENGE | FRAME_PATH_RESPONSE => {
                let (rest, data) = take(8usize)(rest)?;
                // Unwrap is OK, take(8) guarantees the length.
                let data: [u8; 8] = data.try_into().unwrap();
                if frame_type == FRAME_PATH_CHALLENGE {
                    Ok((rest, Frame::PathChallenge(data)))
                } else {
                    Ok((rest, Frame::PathResponse(data)))
                }
            }
            FRAME_CONNECTION_CLOSE | FRAME_CONNECTION_CLOSE_APP => {
                let is_application = frame_type == FRAME_CONNECTION_CLOSE_APP;
                let (rest, error_code) = parse_varint(rest)?;
                let (rest, offending) = if is_application {
                    (rest, None)
                } else {
                    let (r, t) = parse_varint(rest)?;
                    (r, Some(t))
                };
                let (rest, reason) = parse_varint_bytes(rest)?;
                Ok((
                    rest,
                    Frame::ConnectionClose(ConnectionCloseFrame {
                        is_application,
                        error_code,
                        frame_type: offending,
                        reason: reason.to_vec(),
                    }),
                ))
            }
            FRAME_HANDSHAKE_DONE => Ok((rest, Frame::HandshakeDone)),
            _ => {
                // Unknown type tag: the body length is unknowable, so the
                // rest of the payload is preserved as-is.
                Ok((
                    &rest[rest.len()..],
                    Frame::Unknown {
                        frame_type,
                        body: rest.to_vec(),
                    },
                ))
            }
        }
    }

    pub fn serialize(&self, output: &mut Vec<u8>) {
        match self {
            Frame::Padding { len } => {
                output.resize(output.len() + len.max(&1), 0);
            }
            Frame::Ping => serialize_varint(FRAME_PING, output),
            Frame::Ack(a) => {
                let ty = if a.ecn.is_some() {
                    FRAME_ACK_ECN
                } else {
                    FRAME_ACK
                };
                serialize_varint(ty, output);
                serialize_varint(a.largest_acknowledged, output);
                serialize_varint(a.ack_delay, output);
                serialize_varint(a.ranges.len() as u64, output);
                serialize_varint(a.first_range, output);
                for (gap, len) in &a.ranges {
                    serialize_varint(*gap, output);
                    serialize_varint(*len, output);
                }
                if let Some((ect0, ect1, ce)) = a.ecn {
                    serialize_varint(ect0, output);
                    serialize_varint(ect1, output);
                    serialize_varint(ce, output);
                }
            }
            Frame::Crypto(c) => {
                serialize_varint(FRAME_CRYPTO, output);
                serialize_varint(c.offset, output);
                serialize_varint(c.data.len() as u64, output);
                output.extend_from_slice(&c.data);
            }
            Frame::NewToken { token } => {
                serialize_varint(FRAME_NEW_TOKEN, output);
                serialize_varint(token.len() as u64, output);
                output.extend_from_slice(token);
            }
            Frame::Stream(s) => {
                serialize_varint(self.type_byte() as u64, output);
                serialize_varint(s.stream_id, output);
                if s.offset > 0 {
                    serialize_varint(s.offset, output);
                }
                serialize_varint(s.data.len() as u64, output);
                output.extend_from_slice(&s.data);
            }
            Frame::NewConnectionId(n) => {
                serialize_varint(FRAME_NEW_CONNECTION_ID, output);
                serialize_varint(n.sequence_number, output);
                serialize_varint(n.retire_prior_to, output);
                output.push(n.connection_id.len() as u8);
                output.extend_from_slice(&n.connection_id);
                output.extend_from_slice(&n.stateless_reset_token);
            }
            Frame::PathChallenge(data) => {
                serialize_varint(FRAME_PATH_CHALLENGE, output);
                output.extend_from_slice(data);
            }
            Frame::PathResponse(data) => {
                serialize_varint(FRAME_PATH_RESPONSE, output);
                output.extend_from_slice(data);
            }
            Frame::ConnectionClose(c) => {
                serialize_varint(
                    if c.is_application {
                        FRAME_CONNECTION_CLOSE_APP
                    } else {
                        FRAME_CONNECTION_CLOSE
                    },
                    output,
                );
                serialize_varint(c.error_code, output);
                if !c.is_application {
                    serialize_varint(c.frame_type.unwrap_or(0), output);
                }
                serialize_varint(c.reason.len() as u64, output);
                output.extend_from_slice(&c.reason);
            }
            Frame::HandshakeDone => serialize_varint(FRAME_HANDSHAKE_DONE, output),
            Frame::Unknown { frame_type, body } => {
                serialize_varint(*frame_type, output);
                output.extend_from_slice(body);
            }
        }
    }

    /// Serialized length.
    pub fn wire_len(&self) -> usize {
        match self {
            Frame::Padding { len } => *len.max(&1),
            _ => {
                let mut buf = Vec::new();
                self.serialize(&mut buf);
                buf.len()
            }
        }
    }
}

/// A decoded frame plus its raw wire image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameContainer {
    pub frame: Frame,
    pub raw: Vec<u8>,
}

impl FrameContainer {
    pub fn new(frame: Frame) -> Self {
        let mut raw = Vec::new();
        frame.serialize(&mut raw);
        FrameContainer { frame, raw }
    }

    pub fn type_byte(&self) -> u8 {
        self.frame.type_byte()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(frame: Frame) {
        let mut wire = Vec::new();
        frame.serialize(&mut wire);
        let (rest, parsed) = Frame::parse(&wire).unwrap();
        assert!(rest.is_empty());
        assert_eq!(parsed, frame);
    }

    #[test]
    fn crypto_frame_wire_format() {
        let frame = Frame::Crypto(CryptoFrame {
            offset: 100,
            data: vec![0xAB; 5],
        });
        let mut wire = Vec::new();
        frame.serialize(&mut wire);
        // type 0x06, offset 100 as 2-byte varint, length 5 as 1-byte.
        assert_eq!(&wire[..4], &[0x06, 0x40, 0x64, 0x05]);
        roundtrip(frame);
    }

    #[test]
    fn ack_frame_wire_format() {
        let frame = Frame::Ack(AckFrame {
            largest_acknowledged: 7,
            ack_delay: 100,
            first_range: 0,
            ranges: vec![],
            ecn: None,
        });
        let mut wire = Vec::new();
        frame.serialize(&mut wire);
        assert_eq!(&wire, &[0x02, 0x07, 0x40, 0x64, 0x00, 0x00]);
        roundtrip(frame);
    }

    #[test]
    fn stream_and_control_roundtrips() {
        roundtrip(Frame::Ping);
        roundtrip(Frame::HandshakeDone);
        roundtrip(Frame::PathChallenge([1, 2, 3, 4, 5, 6, 7, 8]));
        roundtrip(Frame::NewToken {
            token: vec![9; 17],
        });
        roundtrip(Frame::Stream(StreamFrame {
            stream_id: 0,
            offset: 0,
            fin: false,
            data: b"GET /".to_vec(),
        }));
        roundtrip(Frame::Stream(StreamFrame {
            stream_id: 4,
            offset: 77,
            fin: true,
            data: vec![],
        }));
        roundtrip(Frame::NewConnectionId(NewConnectionIdFrame {
            sequence_number: 3,
            retire_prior_to: 1,
            connection_id: vec![0xCC; 8],
            stateless_reset_token: [0xEE; 16],
        }));
        roundtrip(Frame::ConnectionClose(ConnectionCloseFrame {
            is_application: false,
            error_code: 0x0a,
            frame_type: Some(0x06),
            reason: b"tls alert".to_vec(),
        }));
    }

    #[test]
    fn padding_run_is_coalesced() {
        let wire = [0u8, 0, 0, 0, 1];
        let (rest, frame) = Frame::parse(&wire).unwrap();
        assert_eq!(frame, Frame::Padding { len: 4 });
        assert_eq!(rest, &[1]);
    }

    #[test]
    fn ack_eliciting_classification() {
        assert!(Frame::Ping.is_ack_eliciting());
        assert!(Frame::HandshakeDone.is_ack_eliciting());
        assert!(Frame::PathChallenge([0; 8]).is_ack_eliciting());
        assert!(Frame::Crypto(CryptoFrame {
            offset: 0,
            data: vec![]
        })
        .is_ack_eliciting());
        assert!(!Frame::Padding { len: 3 }.is_ack_eliciting());
        assert!(!Frame::Ack(AckFrame {
            largest_acknowledged: 0,
            ack_delay: 0,
            first_range: 0,
            ranges: vec![],
            ecn: None,
        })
        .is_ack_eliciting());
    }

    #[test]
    fn unknown_frame_preserves_body() {
        let wire = [0x40u8, 0x21, 0xDE, 0xAD];
        let (rest, frame) = Frame::parse(&wire).unwrap();
        assert!(rest.is_empty());
        assert_eq!(
            frame,
            Frame::Unknown {
                frame_type: 0x21,
                body: vec![0xDE, 0xAD]
            }
        );
    }
}
