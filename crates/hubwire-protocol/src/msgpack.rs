//! The MessagePack subset used to move a serialization cache between
//! servers: one map of protocol name (str) to payload (bin).
//!
//! Thin wrappers over `rmp` that borrow from the input slice and turn
//! its errors into [`ProtocolError`]s.

use std::fmt::Display;

use rmp::{decode, encode};

use crate::error::ProtocolError;

pub(crate) fn write_map_header(count: usize, output: &mut Vec<u8>) -> Result<(), ProtocolError> {
    encode::write_map_len(output, length(count)?).map_err(invalid)?;
    Ok(())
}

pub(crate) fn write_str(value: &str, output: &mut Vec<u8>) -> Result<(), ProtocolError> {
    encode::write_str(output, value).map_err(invalid)
}

pub(crate) fn write_bin(value: &[u8], output: &mut Vec<u8>) -> Result<(), ProtocolError> {
    encode::write_bin(output, value).map_err(invalid)
}

pub(crate) fn read_map_header(input: &mut &[u8]) -> Result<usize, ProtocolError> {
    let count = decode::read_map_len(input).map_err(invalid)?;
    Ok(count as usize)
}

pub(crate) fn read_str<'a>(input: &mut &'a [u8]) -> Result<&'a str, ProtocolError> {
    let len = decode::read_str_len(input).map_err(invalid)?;
    let bytes = take(input, len as usize)?;
    std::str::from_utf8(bytes)
        .map_err(|_| ProtocolError::invalid("Serialized protocol name is not valid UTF-8."))
}

pub(crate) fn read_bin<'a>(input: &mut &'a [u8]) -> Result<&'a [u8], ProtocolError> {
    let len = decode::read_bin_len(input).map_err(invalid)?;
    take(input, len as usize)
}

fn take<'a>(input: &mut &'a [u8], len: usize) -> Result<&'a [u8], ProtocolError> {
    let buffer: &'a [u8] = input;
    if buffer.len() < len {
        return Err(ProtocolError::invalid("Unexpected end of serialized message data."));
    }
    let (head, tail) = buffer.split_at(len);
    *input = tail;
    Ok(head)
}

fn length(len: usize) -> Result<u32, ProtocolError> {
    u32::try_from(len)
        .map_err(|_| ProtocolError::invalid("Serialized message data is too large."))
}

fn invalid(error: impl Display) -> ProtocolError {
    ProtocolError::invalid(format!("Invalid serialized message data: {error}"))
}
