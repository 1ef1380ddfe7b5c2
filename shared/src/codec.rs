//! Length-prefixed JSON framing
//!
//! Every message travels as `[length: u32 LE][payload][0x0A]` where
//! `length = payload.len() + 1`. The first frame of a connection is held to a
//! much smaller cap than the following ones, so an unauthenticated peer cannot
//! make the reader allocate megabytes before it has even logged in.

use serde::Serialize;
use serde_json::Value;
use std::io;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Maximum value of the length field for the first frame of a connection
pub const FIRST_FRAME_MAX_SIZE: usize = 1023;
/// Maximum value of the length field for every other frame (24-bit)
pub const FRAME_MAX_SIZE: usize = 16_777_215;
/// Byte appended after every payload
pub const FRAME_TERMINATOR: u8 = 0x0A;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("Cannot read content size. Remote endpoint closed? {0}")]
    ReadSize(#[source] io::Error),
    #[error("Cannot read content. Remote endpoint closed? {0}")]
    ReadContent(#[source] io::Error),
    #[error("Received message size of first message is too big (size={size}, max={max})")]
    FirstFrameTooBig { size: usize, max: usize },
    #[error("Received message size is too big (size={size}, max={max})")]
    FrameTooBig { size: usize, max: usize },
    #[error("Non-JSON message received")]
    NonJson(#[source] serde_json::Error),
    #[error("Content too big to be sent (size={size}, max={max})")]
    ContentTooBig { size: usize, max: usize },
    #[error("Cannot serialize message. {0}")]
    Serialize(#[source] serde_json::Error),
    #[error("Cannot write message. Remote endpoint closed? {0}")]
    Write(#[source] io::Error),
}

/// Which size cap applies to the next frame read from a stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameLimit {
    FirstMessage,
    Regular,
}

impl FrameLimit {
    pub fn max_size(self) -> usize {
        match self {
            FrameLimit::FirstMessage => FIRST_FRAME_MAX_SIZE,
            FrameLimit::Regular => FRAME_MAX_SIZE,
        }
    }

    fn too_big(self, size: usize) -> CodecError {
        let max = self.max_size();
        match self {
            FrameLimit::FirstMessage => CodecError::FirstFrameTooBig { size, max },
            FrameLimit::Regular => CodecError::FrameTooBig { size, max },
        }
    }
}

/// Wraps a payload into a frame ready to be written on the wire
pub fn encode_frame(payload: &[u8]) -> Result<Vec<u8>, CodecError> {
    let length = payload.len() + 1;
    if length > FRAME_MAX_SIZE {
        return Err(CodecError::ContentTooBig {
            size: length,
            max: FRAME_MAX_SIZE,
        });
    }

    let mut frame = Vec::with_capacity(4 + length);
    frame.extend_from_slice(&(length as u32).to_le_bytes());
    frame.extend_from_slice(payload);
    frame.push(FRAME_TERMINATOR);
    Ok(frame)
}

/// Reads one frame and returns its payload without the trailing terminator
///
/// The length field is checked against `limit` before any payload byte is
/// read, so an oversized frame is rejected without a partial read.
pub async fn read_frame<R>(reader: &mut R, limit: FrameLimit) -> Result<Vec<u8>, CodecError>
where
    R: AsyncRead + Unpin,
{
    let mut size_buf = [0u8; 4];
    reader
        .read_exact(&mut size_buf)
        .await
        .map_err(CodecError::ReadSize)?;

    let size = u32::from_le_bytes(size_buf) as usize;
    if size > limit.max_size() {
        return Err(limit.too_big(size));
    }

    let mut content = vec![0u8; size];
    reader
        .read_exact(&mut content)
        .await
        .map_err(CodecError::ReadContent)?;

    if content.last() == Some(&FRAME_TERMINATOR) {
        content.pop();
    }
    Ok(content)
}

/// Reads one frame and parses its payload as JSON
pub async fn read_message<R>(reader: &mut R, limit: FrameLimit) -> Result<Value, CodecError>
where
    R: AsyncRead + Unpin,
{
    let content = read_frame(reader, limit).await?;
    serde_json::from_slice(&content).map_err(CodecError::NonJson)
}

pub async fn write_frame<W>(writer: &mut W, payload: &[u8]) -> Result<(), CodecError>
where
    W: AsyncWrite + Unpin,
{
    let frame = encode_frame(payload)?;
    writer.write_all(&frame).await.map_err(CodecError::Write)?;
    writer.flush().await.map_err(CodecError::Write)
}

/// Serializes `message` as JSON and writes it as a single frame
pub async fn write_message<W, T>(writer: &mut W, message: &T) -> Result<(), CodecError>
where
    W: AsyncWrite + Unpin,
    T: Serialize + ?Sized,
{
    let payload = serde_json::to_vec(message).map_err(CodecError::Serialize)?;
    write_frame(writer, &payload).await
}
