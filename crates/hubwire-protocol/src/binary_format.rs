//! Length-prefixed binary framing.
//!
//! Each message is preceded by its length as a base-128 varint: the low
//! seven bits of every prefix byte carry data, least significant group
//! first, and the high bit says "another prefix byte follows".
//!
//! ```text
//!   0x35            → 53
//!   0x80 0x25       → 0x25 << 7 = 4736
//!   0xFF 0xFF 0xFF 0xFF 0x07 → 0x7FFF_FFFF (the largest allowed length)
//! ```
//!
//! Lengths are capped at `i32::MAX`, so a prefix is never longer than five
//! bytes and its fifth byte never exceeds `0x07`.

use crate::error::FormatError;

/// Longest possible length prefix, in bytes.
pub const MAX_LENGTH_PREFIX_SIZE: usize = 5;

/// Largest payload the framing can describe.
pub const MAX_MESSAGE_SIZE: usize = i32::MAX as usize;

/// Appends the varint length prefix for a `length`-byte payload.
pub fn write_length_prefix(length: usize, output: &mut Vec<u8>) -> Result<(), FormatError> {
    if length > MAX_MESSAGE_SIZE {
        return Err(FormatError::MessageTooLarge);
    }

    let mut remaining = length;
    loop {
        let mut byte = (remaining & 0x7f) as u8;
        remaining >>= 7;
        if remaining > 0 {
            byte |= 0x80;
        }
        output.push(byte);
        if remaining == 0 {
            return Ok(());
        }
    }
}

/// Appends `payload` with its length prefix.
pub fn write_message(payload: &[u8], output: &mut Vec<u8>) -> Result<(), FormatError> {
    write_length_prefix(payload.len(), output)?;
    output.extend_from_slice(payload);
    Ok(())
}

/// Splits one complete message off the front of `input`.
///
/// Returns `Ok(None)` when `input` does not yet hold a whole message; in
/// that case `input` is left untouched so the caller can retry once more
/// bytes arrive. On success `input` is advanced past the prefix and the
/// payload.
pub fn try_slice_message<'a>(input: &mut &'a [u8]) -> Result<Option<&'a [u8]>, FormatError> {
    let buffer: &'a [u8] = input;
    let Some((prefix_len, length)) = parse_length_prefix(buffer)? else {
        return Ok(None);
    };

    let Some(end) = prefix_len.checked_add(length) else {
        return Err(FormatError::MessageTooLarge);
    };
    if buffer.len() < end {
        return Ok(None);
    }

    *input = &buffer[end..];
    Ok(Some(&buffer[prefix_len..end]))
}

/// Returns `(prefix bytes, payload length)`, or `None` if the prefix is
/// still incomplete.
fn parse_length_prefix(buffer: &[u8]) -> Result<Option<(usize, usize)>, FormatError> {
    let prefix = &buffer[..buffer.len().min(MAX_LENGTH_PREFIX_SIZE)];
    let mut length: u64 = 0;

    for (index, &byte) in prefix.iter().enumerate() {
        length |= u64::from(byte & 0x7f) << (index * 7);
        let more = byte & 0x80 != 0;
        let read = index + 1;

        if !more {
            if read == MAX_LENGTH_PREFIX_SIZE && byte > 0x07 {
                return Err(FormatError::MessageTooLarge);
            }
            return Ok(Some((read, length as usize)));
        }
        if read == MAX_LENGTH_PREFIX_SIZE {
            return Err(FormatError::MessageTooLarge);
        }
    }

    // Empty, or every available byte still says "more follows".
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prefix(length: usize) -> Vec<u8> {
        let mut out = Vec::new();
        write_length_prefix(length, &mut out).unwrap();
        out
    }

    #[test]
    fn test_write_length_prefix_known_encodings() {
        assert_eq!(prefix(0), [0x00]);
        assert_eq!(prefix(0x35), [0x35]);
        assert_eq!(prefix(0x7f), [0x7f]);
        assert_eq!(prefix(0x80), [0x80, 0x01]);
        assert_eq!(prefix(0x1480), [0x80, 0x29]);
        assert_eq!(prefix(MAX_MESSAGE_SIZE), [0xff, 0xff, 0xff, 0xff, 0x07]);
    }

    #[test]
    fn test_write_length_prefix_over_limit_rejected() {
        let mut out = Vec::new();
        assert_eq!(
            write_length_prefix(MAX_MESSAGE_SIZE + 1, &mut out),
            Err(FormatError::MessageTooLarge)
        );
        assert!(out.is_empty());
    }

    #[test]
    fn test_try_slice_message_empty_is_incomplete() {
        let mut input: &[u8] = &[];
        assert_eq!(try_slice_message(&mut input), Ok(None));
    }

    #[test]
    fn test_try_slice_message_complete_frame_advances_input() {
        let mut data = Vec::new();
        write_message(b"hello", &mut data).unwrap();
        data.extend_from_slice(b"rest");

        let mut input: &[u8] = &data;
        assert_eq!(try_slice_message(&mut input), Ok(Some(&b"hello"[..])));
        assert_eq!(input, b"rest");
    }

    #[test]
    fn test_try_slice_message_empty_payload() {
        let mut input: &[u8] = &[0x00, 0xAA];
        assert_eq!(try_slice_message(&mut input), Ok(Some(&[][..])));
        assert_eq!(input, [0xAA]);
    }

    #[test]
    fn test_try_slice_message_short_payload_does_not_consume() {
        let data = [0x05, b'a', b'b'];
        let mut input: &[u8] = &data;
        assert_eq!(try_slice_message(&mut input), Ok(None));
        assert_eq!(input, data);
    }

    #[test]
    fn test_try_slice_message_unterminated_short_prefix_is_incomplete() {
        let data = [0x80, 0x80, 0x80];
        let mut input: &[u8] = &data;
        assert_eq!(try_slice_message(&mut input), Ok(None));
        assert_eq!(input.len(), 3);
    }

    #[test]
    fn test_try_slice_message_five_continuation_bytes_is_fatal() {
        let mut input: &[u8] = &[0x80, 0x80, 0x80, 0x80, 0x80, 0x01];
        assert_eq!(
            try_slice_message(&mut input),
            Err(FormatError::MessageTooLarge)
        );
    }

    #[test]
    fn test_try_slice_message_fifth_byte_over_seven_is_fatal() {
        let mut input: &[u8] = &[0xff, 0xff, 0xff, 0xff, 0x08];
        assert_eq!(
            try_slice_message(&mut input),
            Err(FormatError::MessageTooLarge)
        );
    }

    #[test]
    fn test_try_slice_message_max_prefix_waits_for_payload() {
        let mut input: &[u8] = &[0xff, 0xff, 0xff, 0xff, 0x07, 0x00];
        assert_eq!(try_slice_message(&mut input), Ok(None));
        assert_eq!(input.len(), 6);
    }

    #[test]
    fn test_try_slice_message_consecutive_frames() {
        let mut data = Vec::new();
        write_message(b"one", &mut data).unwrap();
        write_message(b"two", &mut data).unwrap();

        let mut input: &[u8] = &data;
        assert_eq!(try_slice_message(&mut input), Ok(Some(&b"one"[..])));
        assert_eq!(try_slice_message(&mut input), Ok(Some(&b"two"[..])));
        assert_eq!(try_slice_message(&mut input), Ok(None));
    }
}
