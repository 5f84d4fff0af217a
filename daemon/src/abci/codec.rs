//! Frame codec for the consensus-driver socket.
//!
//! Every message travels as an unsigned varint byte count (7 bits per byte,
//! little-endian groups, high bit = continuation) followed by the protobuf
//! body. The reader keeps partial frames in its buffer until the rest
//! arrives.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use prost::Message;
use thiserror::Error;

/// Upper bound on a single frame body. A frame claiming more than this is
/// treated as a protocol violation and the connection is dropped.
pub const MAX_FRAME_SIZE: u64 = 64 * 1024 * 1024;

const MAX_VARINT_BYTES: usize = 10;

#[derive(Error, Debug)]
pub enum FrameError {
    #[error("Frame length {0} exceeds maximum {MAX_FRAME_SIZE}")]
    Oversized(u64),

    #[error("Malformed varint length prefix")]
    BadVarint,

    #[error("Failed to decode protobuf message: {0}")]
    Decode(#[from] prost::DecodeError),
}

/// Append a varint to a buffer.
pub fn put_uvarint(buf: &mut BytesMut, mut value: u64) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            buf.put_u8(byte);
            return;
        }
        buf.put_u8(byte | 0x80);
    }
}

/// Try to read a varint from the start of `buf`.
///
/// Returns `Ok(None)` when the buffer ends mid-varint, `Ok(Some((value,
/// consumed)))` on success.
pub fn get_uvarint(buf: &[u8]) -> Result<Option<(u64, usize)>, FrameError> {
    let mut value: u64 = 0;
    for (i, byte) in buf.iter().enumerate() {
        if i >= MAX_VARINT_BYTES {
            return Err(FrameError::BadVarint);
        }
        value |= ((byte & 0x7f) as u64) << (7 * i);
        if byte & 0x80 == 0 {
            return Ok(Some((value, i + 1)));
        }
    }
    Ok(None)
}

/// Encode a message into a fresh length-prefixed frame.
pub fn write_frame<M: Message>(msg: &M) -> BytesMut {
    let body_len = msg.encoded_len();
    let mut buf = BytesMut::with_capacity(body_len + MAX_VARINT_BYTES);
    put_uvarint(&mut buf, body_len as u64);
    msg.encode(&mut buf)
        .unwrap_or_else(|_| unreachable!("buffer sized from encoded_len"));
    buf
}

/// Extract one complete frame body from the front of `buf`, consuming it.
///
/// Returns `Ok(None)` when the buffer holds only part of a frame; callers
/// retain the buffer and read more bytes.
pub fn extract_frame(buf: &mut BytesMut) -> Result<Option<Bytes>, FrameError> {
    let Some((length, prefix_len)) = get_uvarint(buf)? else {
        return Ok(None);
    };
    if length > MAX_FRAME_SIZE {
        return Err(FrameError::Oversized(length));
    }
    let total = prefix_len + length as usize;
    if buf.len() < total {
        return Ok(None);
    }
    buf.advance(prefix_len);
    Ok(Some(buf.split_to(length as usize).freeze()))
}

/// Decode every complete frame currently buffered into messages, leaving
/// any trailing partial frame in place.
pub fn drain_frames<M: Message + Default>(buf: &mut BytesMut) -> Result<Vec<M>, FrameError> {
    let mut messages = Vec::new();
    while let Some(body) = extract_frame(buf)? {
        messages.push(M::decode(body)?);
    }
    Ok(messages)
}
