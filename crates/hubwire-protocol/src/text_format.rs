//! Record-separator text framing.
//!
//! Text messages end with the ASCII record separator (`0x1E`). The
//! payload format must never emit that byte unescaped; JSON qualifies.

/// Terminates every text frame.
pub const RECORD_SEPARATOR: u8 = 0x1e;

/// Appends the frame terminator.
pub fn write_record_separator(output: &mut Vec<u8>) {
    output.push(RECORD_SEPARATOR);
}

/// Appends `payload` followed by the frame terminator.
pub fn write_message(payload: &[u8], output: &mut Vec<u8>) {
    output.extend_from_slice(payload);
    write_record_separator(output);
}

/// Splits one complete message off the front of `input`.
///
/// Returns `None` without touching `input` if no terminator has arrived
/// yet. On success the terminator is consumed but not returned.
pub fn try_slice_message<'a>(input: &mut &'a [u8]) -> Option<&'a [u8]> {
    let buffer: &'a [u8] = input;
    let end = buffer.iter().position(|&b| b == RECORD_SEPARATOR)?;
    *input = &buffer[end + 1..];
    Some(&buffer[..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_message_appends_separator() {
        let mut out = Vec::new();
        write_message(b"ABC", &mut out);
        assert_eq!(out, b"ABC\x1e");
    }

    #[test]
    fn test_try_slice_message_single() {
        let mut input: &[u8] = b"ABC\x1e";
        assert_eq!(try_slice_message(&mut input), Some(&b"ABC"[..]));
        assert!(input.is_empty());
    }

    #[test]
    fn test_try_slice_message_empty_payload() {
        let mut input: &[u8] = b"\x1e";
        assert_eq!(try_slice_message(&mut input), Some(&b""[..]));
        assert!(input.is_empty());
    }

    #[test]
    fn test_try_slice_message_multiple() {
        let mut input: &[u8] = b"Hello,\x1eWorld!\x1e";
        assert_eq!(try_slice_message(&mut input), Some(&b"Hello,"[..]));
        assert_eq!(try_slice_message(&mut input), Some(&b"World!"[..]));
        assert_eq!(try_slice_message(&mut input), None);
    }

    #[test]
    fn test_try_slice_message_incomplete_does_not_consume() {
        let mut input: &[u8] = b"ABC";
        assert_eq!(try_slice_message(&mut input), None);
        assert_eq!(input, b"ABC");
    }

    #[test]
    fn test_try_slice_message_keeps_trailing_partial() {
        let mut input: &[u8] = b"ABC\x1eDE";
        assert_eq!(try_slice_message(&mut input), Some(&b"ABC"[..]));
        assert_eq!(input, b"DE");
    }
}
