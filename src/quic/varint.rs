//! QUIC variable-length integers (RFC 9000 Section 16).
//!
//! The two most significant bits of the first byte select a 1, 2, 4 or
//! 8 byte encoding.

use nom::bytes::complete::take;
use nom::error::{make_error, ErrorKind};
use nom::number::complete::be_u8;
use nom::{Err, IResult};

/// Parse one variable-length integer.
pub fn parse_varint(input: &[u8]) -> IResult<&[u8], u64> {
    let (rest, first) = be_u8(input)?;
    let prefix = first >> 6;
    let extra: usize = match prefix {
        0 => 0,
        1 => 1,
        2 => 3,
        _ => 7,
    };
    let (rest, tail) = take(extra)(rest)?;

    let mut value = (first & 0x3f) as u64;
    for &b in tail {
        value = (value << 8) | b as u64;
    }
    Ok((rest, value))
}

/// Append the shortest encoding of `value`.
///
/// Values above 2^62-1 are not encodable; the top bits are masked off the
/// way a fuzzing peer would see them.
pub fn serialize_varint(value: u64, output: &mut Vec<u8>) {
    let value = value & 0x3fff_ffff_ffff_ffff;
    if value < 1 << 6 {
        output.push(value as u8);
    } else if value < 1 << 14 {
        output.extend_from_slice(&((value as u16) | 0x4000).to_be_bytes());
    } else if value < 1 << 30 {
        output.extend_from_slice(&((value as u32) | 0x8000_0000).to_be_bytes());
    } else {
        output.extend_from_slice(&(value | 0xc000_0000_0000_0000).to_be_bytes());
    }
}

/// Length in bytes of the shortest encoding of `value`.
pub fn varint_len(value: u64) -> usize {
    if value < 1 << 6 {
        1
    } else if value < 1 << 14 {
        2
    } else if value < 1 << 30 {
        4
    } else {
        8
    }
}

/// Parse a varint-prefixed byte string.
pub fn parse_varint_bytes(input: &[u8]) -> IResult<&[u8], &[u8]> {
    let (rest, len) = parse_varint(input)?;
    if len > rest.len() as u64 {
        return Err(Err::Error(make_error(input, ErrorKind::Eof)));
    }
    take(len as usize)(rest)
}

#[cfg(test)]
mod tests {
    use super::*;

    // The four reference encodings from RFC 9000 Appendix A.1.
    const CASES: &[(&[u8], u64)] = &[
        (&[0x25], 37),
        (&[0x7b, 0xbd], 15_293),
        (&[0x9d, 0x7f, 0x3e, 0x7d], 494_878_333),
        (
            &[0xc2, 0x19, 0x7c, 0x5e, 0xff, 0x14, 0xe8, 0x8c],
            151_288_809_941_952_652,
        ),
    ];

    #[test]
    fn rfc9000_vectors() {
        for (bytes, value) in CASES {
            let (rest, parsed) = parse_varint(bytes).unwrap();
            assert!(rest.is_empty());
            assert_eq!(parsed, *value);

            let mut out = Vec::new();
            serialize_varint(*value, &mut out);
            assert_eq!(&out, bytes);
            assert_eq!(varint_len(*value), bytes.len());
        }
    }

    #[test]
    fn two_byte_encoding_of_small_value() {
        // 37 can also arrive in a 2-byte encoding; we parse it but always
        // emit the shortest.
        let (rest, parsed) = parse_varint(&[0x40, 0x25]).unwrap();
        assert!(rest.is_empty());
        assert_eq!(parsed, 37);
    }

    #[test]
    fn truncated_input_errors() {
        assert!(parse_varint(&[]).is_err());
        assert!(parse_varint(&[0x7b]).is_err());
        assert!(parse_varint(&[0xc2, 0x19]).is_err());
    }
}
