//! Inner payload codec.
//!
//! Parsed from the plaintext the envelope produces. A payload is
//! `flags:u8 || [ack] || [data_header] || data`, little-endian, where
//! `ack = stream_id:u32 || offset:u24|u48 || len:u16 || rcv_wnd:u8` and
//! `data_header = stream_id:u32 || offset:u24|u48`.
//!
//! Flags byte, least-significant bit first:
//!
//! | Bits | Meaning |
//! |------|---------|
//! | 7-6  | type: `00` data+ACK, `01` data, `10` close+ACK, `11` close |
//! | 3    | no data header (pure ACK) |
//! | 2    | ACK offset is 48-bit |
//! | 1    | stream offset is 48-bit |
//! | 5, 4, 0 | version, must be zero |
//!
//! A payload with a data header, offset and no data bytes is a ping; a
//! payload with no data header at all carries only its ACK.

use crate::error::PayloadError;
use crate::wire;
use crate::MIN_PAYLOAD_SIZE;

/// Type field: no ACK block present.
const FLAG_NO_ACK: u8 = 0b0100_0000;
/// Type field: half-close for the stream.
const FLAG_CLOSE: u8 = 0b1000_0000;
/// Stream offset is 48-bit instead of 24-bit.
const FLAG_OFFSET_48: u8 = 0b0000_0010;
/// ACK offset is 48-bit instead of 24-bit.
const FLAG_ACK_OFFSET_48: u8 = 0b0000_0100;
/// No data header follows; the payload is a pure ACK.
const FLAG_NO_DATA_HEADER: u8 = 0b0000_1000;
/// Version bits; any set bit makes the payload undecodable.
const VERSION_MASK: u8 = 0b0011_0001;

/// Largest value a 24-bit offset can carry.
const U24_MAX: u64 = 0x00FF_FFFF;
/// Largest value a 48-bit offset can carry.
const U48_MAX: u64 = 0xFFFF_FFFF_FFFF;

/// Piggybacked selective acknowledgement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ack {
    /// Stream the acknowledged range belongs to.
    pub stream_id: u32,
    /// First acknowledged byte offset.
    pub offset: u64,
    /// Length of the acknowledged range.
    pub len: u16,
    /// Advertised receive window in bytes; travels log-encoded in one byte,
    /// so the decoded value is the encoding's round-up of what was set.
    pub rcv_wnd: u64,
}

/// Parsed payload header.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PayloadHeader {
    /// Logical stream within the connection.
    pub stream_id: u32,
    /// Byte offset of the enclosed data within the stream.
    pub stream_offset: u64,
    /// Half-close signal for the stream.
    pub is_close: bool,
    /// Piggybacked acknowledgement, if any.
    pub ack: Option<Ack>,
}

/// Codec overhead in bytes for a flag combination.
///
/// `offset48` budgets both offsets wide, which is what the packet-sizing
/// caller wants as its worst case; the encoder itself picks each width
/// independently.
#[must_use]
pub fn calc_overhead(has_ack: bool, offset48: bool, no_data_header: bool) -> usize {
    let offset_size = if offset48 { 6 } else { 3 };
    let mut overhead = 1;
    if has_ack {
        overhead += 4 + offset_size + 2 + 1;
    }
    if !(has_ack && no_data_header) {
        overhead += 4 + offset_size;
    }
    overhead
}

/// Encode a payload header plus stream data.
///
/// `data: None` with an ACK present encodes a pure ACK without a data
/// header; `Some(&[])` keeps the data header and is the ping encoding.
///
/// # Errors
///
/// Returns [`PayloadError::OffsetTooLarge`] when an offset exceeds 48 bits.
pub fn encode_payload(hdr: &PayloadHeader, data: Option<&[u8]>) -> Result<Vec<u8>, PayloadError> {
    if hdr.stream_offset > U48_MAX || hdr.ack.as_ref().is_some_and(|a| a.offset > U48_MAX) {
        return Err(PayloadError::OffsetTooLarge);
    }

    let has_ack = hdr.ack.is_some();
    let no_data_header = has_ack && data.is_none() && !hdr.is_close;
    let data = data.unwrap_or(&[]);
    let offset48 = hdr.stream_offset > U24_MAX;
    let ack48 = hdr.ack.as_ref().is_some_and(|a| a.offset > U24_MAX);

    let mut flags = 0u8;
    if !has_ack {
        flags |= FLAG_NO_ACK;
    }
    if hdr.is_close {
        flags |= FLAG_CLOSE;
    }
    if offset48 {
        flags |= FLAG_OFFSET_48;
    }
    if ack48 {
        flags |= FLAG_ACK_OFFSET_48;
    }
    if no_data_header {
        flags |= FLAG_NO_DATA_HEADER;
    }

    let overhead = calc_overhead_split(has_ack, offset48, ack48, no_data_header);
    let mut buf = vec![0u8; overhead + data.len()];
    buf[0] = flags;
    let mut pos = 1;

    if let Some(ack) = &hdr.ack {
        pos += wire::put_u32(&mut buf[pos..], ack.stream_id);
        pos += if ack48 {
            wire::put_u48(&mut buf[pos..], ack.offset)
        } else {
            wire::put_u24(&mut buf[pos..], ack.offset)
        };
        pos += wire::put_u16(&mut buf[pos..], ack.len);
        buf[pos] = encode_rcv_window(ack.rcv_wnd);
        pos += 1;
    }

    if !no_data_header {
        pos += wire::put_u32(&mut buf[pos..], hdr.stream_id);
        pos += if offset48 {
            wire::put_u48(&mut buf[pos..], hdr.stream_offset)
        } else {
            wire::put_u24(&mut buf[pos..], hdr.stream_offset)
        };
    }

    buf[pos..].copy_from_slice(data);
    Ok(buf)
}

/// Decode a payload produced by [`encode_payload`].
///
/// Returns the parsed header and the stream data; the data is `None` for a
/// pure ACK (no data header on the wire) and `Some` otherwise, empty for a
/// ping.
///
/// # Errors
///
/// - [`PayloadError::TooShort`] below the 8-byte floor or the length the
///   flags demand
/// - [`PayloadError::UnsupportedVersion`] when reserved version bits are set
pub fn decode_payload(encoded: &[u8]) -> Result<(PayloadHeader, Option<Vec<u8>>), PayloadError> {
    if encoded.len() < MIN_PAYLOAD_SIZE {
        return Err(PayloadError::TooShort {
            expected: MIN_PAYLOAD_SIZE,
            actual: encoded.len(),
        });
    }

    let flags = encoded[0];
    if flags & VERSION_MASK != 0 {
        return Err(PayloadError::UnsupportedVersion(flags & VERSION_MASK));
    }

    let has_ack = flags & FLAG_NO_ACK == 0;
    let is_close = flags & FLAG_CLOSE != 0;
    let offset48 = flags & FLAG_OFFSET_48 != 0;
    let ack48 = flags & FLAG_ACK_OFFSET_48 != 0;
    let no_data_header = has_ack && flags & FLAG_NO_DATA_HEADER != 0;

    let required = calc_overhead_split(has_ack, offset48, ack48, no_data_header);
    if encoded.len() < required {
        return Err(PayloadError::TooShort {
            expected: required,
            actual: encoded.len(),
        });
    }

    let mut pos = 1;
    let mut hdr = PayloadHeader {
        is_close,
        ..PayloadHeader::default()
    };

    if has_ack {
        let stream_id = wire::read_u32(&encoded[pos..]);
        pos += 4;
        let offset = if ack48 {
            let v = wire::read_u48(&encoded[pos..]);
            pos += 6;
            v
        } else {
            let v = wire::read_u24(&encoded[pos..]);
            pos += 3;
            v
        };
        let len = wire::read_u16(&encoded[pos..]);
        pos += 2;
        let rcv_wnd = decode_rcv_window(encoded[pos]);
        pos += 1;
        hdr.ack = Some(Ack {
            stream_id,
            offset,
            len,
            rcv_wnd,
        });
    }

    if no_data_header {
        return Ok((hdr, None));
    }

    hdr.stream_id = wire::read_u32(&encoded[pos..]);
    pos += 4;
    hdr.stream_offset = if offset48 {
        let v = wire::read_u48(&encoded[pos..]);
        pos += 6;
        v
    } else {
        let v = wire::read_u24(&encoded[pos..]);
        pos += 3;
        v
    };

    Ok((hdr, Some(encoded[pos..].to_vec())))
}

/// Exact byte length the flags demand, with each offset width independent.
fn calc_overhead_split(has_ack: bool, offset48: bool, ack48: bool, no_data_header: bool) -> usize {
    let mut required = 1;
    if has_ack {
        required += 4 + if ack48 { 6 } else { 3 } + 2 + 1;
    }
    if !no_data_header {
        required += 4 + if offset48 { 6 } else { 3 };
    }
    required
}

/// Compress a byte count into the one-byte log-scale window code.
///
/// Codes cover doublings with a 3-bit mantissa: everything up to 255 bytes
/// maps to code 1 (decoded as 128), and the scale saturates at code 255,
/// roughly 832 GiB.
#[must_use]
pub fn encode_rcv_window(wnd: u64) -> u8 {
    if wnd == 0 {
        return 0;
    }
    if wnd <= u64::from(u8::MAX) {
        return 1;
    }

    let bits = 63 - u64::from(wnd.leading_zeros());
    let exp = bits - 8;
    if exp > 31 {
        return 255;
    }
    let mantissa = wnd.div_ceil(1u64 << (exp + 5)) - 8;
    let (exp, mantissa) = if mantissa > 7 {
        (exp + 1, 0)
    } else {
        (exp, mantissa)
    };
    let q = 8 * exp + mantissa;
    if q > 253 {
        255
    } else {
        (q + 2) as u8
    }
}

/// Expand a window code back to a byte count.
///
/// The result is always at least the value that was encoded, except past
/// the saturation point of code 255.
#[must_use]
pub fn decode_rcv_window(code: u8) -> u64 {
    match code {
        0 => 0,
        1 => 128,
        c => {
            let q = u64::from(c) - 2;
            let exp = q >> 3;
            let mantissa = q & 7;
            (8 + mantissa) << (exp + 5)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(hdr: &PayloadHeader, data: Option<&[u8]>) -> (PayloadHeader, Option<Vec<u8>>) {
        let encoded = encode_payload(hdr, data).unwrap();
        decode_payload(&encoded).unwrap()
    }

    fn assert_payload_eq(expected: &PayloadHeader, actual: &PayloadHeader) {
        assert_eq!(expected.stream_id, actual.stream_id);
        assert_eq!(expected.stream_offset, actual.stream_offset);
        assert_eq!(expected.is_close, actual.is_close);
        match (&expected.ack, &actual.ack) {
            (None, None) => {}
            (Some(e), Some(a)) => {
                assert_eq!(e.stream_id, a.stream_id);
                assert_eq!(e.offset, a.offset);
                assert_eq!(e.len, a.len);
                assert_eq!(decode_rcv_window(encode_rcv_window(e.rcv_wnd)), a.rcv_wnd);
            }
            _ => panic!("ack presence mismatch"),
        }
    }

    #[test]
    fn test_data_no_ack() {
        let original = PayloadHeader {
            stream_id: 12345,
            stream_offset: 100,
            ..PayloadHeader::default()
        };
        let (decoded, data) = round_trip(&original, Some(b"test data"));
        assert_payload_eq(&original, &decoded);
        assert_eq!(data.unwrap(), b"test data");
    }

    #[test]
    fn test_ping() {
        let original = PayloadHeader {
            stream_id: 1,
            ..PayloadHeader::default()
        };
        let (decoded, data) = round_trip(&original, Some(&[]));
        assert_payload_eq(&original, &decoded);
        assert!(data.unwrap().is_empty());
    }

    #[test]
    fn test_data_with_ack() {
        let original = PayloadHeader {
            stream_id: 1,
            stream_offset: 100,
            is_close: false,
            ack: Some(Ack {
                stream_id: 10,
                offset: 200,
                len: 300,
                rcv_wnd: 1000,
            }),
        };
        let (decoded, data) = round_trip(&original, Some(b"payload"));
        assert_payload_eq(&original, &decoded);
        assert_eq!(data.unwrap(), b"payload");
    }

    #[test]
    fn test_ping_with_ack() {
        let original = PayloadHeader {
            stream_id: 1,
            stream_offset: 100,
            is_close: false,
            ack: Some(Ack {
                stream_id: 1,
                offset: 50,
                len: 0,
                rcv_wnd: 1000,
            }),
        };
        let encoded = encode_payload(&original, Some(&[])).unwrap();
        assert_eq!(encoded[0] & 0b1100_0000, 0);

        let (decoded, data) = decode_payload(&encoded).unwrap();
        assert_payload_eq(&original, &decoded);
        assert!(data.unwrap().is_empty());
    }

    #[test]
    fn test_pure_ack_no_data_header() {
        let original = PayloadHeader {
            ack: Some(Ack {
                stream_id: 10,
                offset: 200,
                len: 300,
                rcv_wnd: 1000,
            }),
            ..PayloadHeader::default()
        };
        let encoded = encode_payload(&original, None).unwrap();
        assert_eq!(encoded.len(), 11);
        assert_eq!(encoded[0] & 0b1100_0000, 0);

        let (decoded, data) = decode_payload(&encoded).unwrap();
        assert_payload_eq(&original, &decoded);
        assert!(data.is_none());
    }

    #[test]
    fn test_pure_ack_wide_offset() {
        let original = PayloadHeader {
            ack: Some(Ack {
                stream_id: 10,
                offset: 0x0100_0000,
                len: 300,
                rcv_wnd: 1000,
            }),
            ..PayloadHeader::default()
        };
        let encoded = encode_payload(&original, None).unwrap();
        assert_eq!(encoded.len(), 14);
    }

    #[test]
    fn test_close_with_ack() {
        let original = PayloadHeader {
            stream_id: 1,
            stream_offset: 9999,
            is_close: true,
            ack: Some(Ack {
                stream_id: 1,
                offset: 123_456,
                len: 10,
                rcv_wnd: 1000,
            }),
        };
        let (decoded, data) = round_trip(&original, Some(b"closing"));
        assert_payload_eq(&original, &decoded);
        assert_eq!(data.unwrap(), b"closing");
    }

    #[test]
    fn test_close_no_ack() {
        let original = PayloadHeader {
            stream_id: 1,
            stream_offset: 100,
            is_close: true,
            ack: None,
        };
        let (decoded, _) = round_trip(&original, Some(&[]));
        assert_payload_eq(&original, &decoded);
    }

    #[test]
    fn test_offset_width_boundary() {
        let narrow = PayloadHeader {
            stream_id: 1,
            stream_offset: 0x00FF_FFFF,
            ..PayloadHeader::default()
        };
        let encoded = encode_payload(&narrow, Some(&[])).unwrap();
        assert_eq!(encoded.len(), 8);
        let (decoded, _) = decode_payload(&encoded).unwrap();
        assert_payload_eq(&narrow, &decoded);

        let wide = PayloadHeader {
            stream_id: 1,
            stream_offset: 0x0100_0000,
            ..PayloadHeader::default()
        };
        let encoded = encode_payload(&wide, Some(&[])).unwrap();
        assert_eq!(encoded.len(), 11);
        let (decoded, _) = decode_payload(&encoded).unwrap();
        assert_payload_eq(&wide, &decoded);
    }

    #[test]
    fn test_mixed_offset_widths() {
        let original = PayloadHeader {
            stream_id: 1,
            stream_offset: 0x0100_0000,
            is_close: false,
            ack: Some(Ack {
                stream_id: 10,
                offset: 100,
                len: 50,
                rcv_wnd: 1000,
            }),
        };
        let (decoded, _) = round_trip(&original, Some(&[]));
        assert_payload_eq(&original, &decoded);

        let both_wide = PayloadHeader {
            stream_id: 5,
            stream_offset: 0x0100_0000,
            is_close: false,
            ack: Some(Ack {
                stream_id: 50,
                offset: 0x0100_0000,
                len: 200,
                rcv_wnd: 5000,
            }),
        };
        let (decoded, _) = round_trip(&both_wide, Some(&[]));
        assert_payload_eq(&both_wide, &decoded);
    }

    #[test]
    fn test_below_min_size() {
        for size in [0usize, 1, 7] {
            let data = vec![0u8; size];
            assert!(decode_payload(&data).is_err());
        }
    }

    #[test]
    fn test_invalid_version_bits() {
        let mut data = [0u8; 8];
        data[0] = 0xF8;
        let err = decode_payload(&data).unwrap_err();
        assert!(err.to_string().contains("version"));

        data[0] = 0x1F;
        let err = decode_payload(&data).unwrap_err();
        assert!(err.to_string().contains("version"));
    }

    #[test]
    fn test_insufficient_for_ack() {
        // Type 00 with a 24-bit ACK and data header needs 18 bytes.
        let data = [0u8; 10];
        assert!(matches!(
            decode_payload(&data),
            Err(PayloadError::TooShort { .. })
        ));
    }

    #[test]
    fn test_offset_overflow_rejected() {
        let hdr = PayloadHeader {
            stream_id: 1,
            stream_offset: 1 << 48,
            ..PayloadHeader::default()
        };
        assert!(matches!(
            encode_payload(&hdr, Some(&[])),
            Err(PayloadError::OffsetTooLarge)
        ));
    }

    #[test]
    fn test_large_data() {
        let large: Vec<u8> = (0..65000u32).map(|i| (i % 256) as u8).collect();
        let original = PayloadHeader {
            stream_id: 1,
            ..PayloadHeader::default()
        };
        let (decoded, data) = round_trip(&original, Some(&large));
        assert_payload_eq(&original, &decoded);
        assert_eq!(data.unwrap(), large);
    }

    #[test]
    fn test_ack_zero_length_range() {
        let original = PayloadHeader {
            stream_id: 1,
            stream_offset: 100,
            is_close: false,
            ack: Some(Ack {
                stream_id: 1,
                offset: 100,
                len: 0,
                rcv_wnd: 1000,
            }),
        };
        let (decoded, _) = round_trip(&original, Some(&[]));
        assert_eq!(decoded.ack.unwrap().len, 0);
    }

    #[test]
    fn test_overhead_table() {
        assert_eq!(calc_overhead(false, false, false), 8);
        assert_eq!(calc_overhead(false, true, false), 11);
        assert_eq!(calc_overhead(true, false, false), 18);
        assert_eq!(calc_overhead(true, true, false), 24);
        assert_eq!(calc_overhead(true, false, true), 11);
        assert_eq!(calc_overhead(true, true, true), 14);
    }

    #[test]
    fn test_rcv_window_edges() {
        assert_eq!(encode_rcv_window(0), 0);
        assert_eq!(encode_rcv_window(1), 1);
        assert_eq!(encode_rcv_window(128), 1);
        assert_eq!(encode_rcv_window(255), 1);
        assert_eq!(encode_rcv_window(256), 2);
        assert_eq!(encode_rcv_window(1 << 63), 255);

        assert_eq!(decode_rcv_window(0), 0);
        assert_eq!(decode_rcv_window(1), 128);
        assert_eq!(decode_rcv_window(2), 256);
    }

    #[test]
    fn test_rcv_window_max() {
        let max = decode_rcv_window(255);
        assert!(max > 800_000_000_000);
        assert!(max < 900_000_000_000);
    }

    #[test]
    fn test_rcv_window_monotonic() {
        let mut prev = decode_rcv_window(2);
        for code in 3u8..=254 {
            let curr = decode_rcv_window(code);
            assert!(curr > prev, "code {code}: {curr} <= {prev}");
            prev = curr;
        }
    }

    #[test]
    fn test_rcv_window_covers() {
        for wnd in [
            0u64, 512, 1024, 2048, 4096, 8192, 16384, 32768, 65536, 131_072, 262_144, 524_288,
            1_048_576, 1_073_741_824,
        ] {
            let decoded = decode_rcv_window(encode_rcv_window(wnd));
            assert!(decoded >= wnd, "window {wnd} decoded to {decoded}");
        }
    }
}
