// Framing - One JSON message per line over a TCP stream
//
// The stream is split into an owned read half and write half so that the
// reader task and concurrent senders never contend for the socket.

use crate::sync::Message;
use futures::StreamExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec, LinesCodecError};

/// Default limit on a single line, large enough for a full sync response
pub const DEFAULT_MAX_FRAME_LENGTH: usize = 16 * 1024 * 1024;

pub type FrameReader = FramedRead<OwnedReadHalf, LinesCodec>;
pub type FrameWriter = FramedWrite<OwnedWriteHalf, LinesCodec>;

/// Split a stream into framed halves
pub fn split(stream: TcpStream, max_frame_length: usize) -> (FrameReader, FrameWriter) {
    let (read_half, write_half) = stream.into_split();
    (
        FramedRead::new(read_half, LinesCodec::new_with_max_length(max_frame_length)),
        FramedWrite::new(write_half, LinesCodec::new_with_max_length(max_frame_length)),
    )
}

/// What the reader pulled off the wire
#[derive(Debug)]
pub enum Inbound {
    /// A well-formed message (possibly of an unknown type)
    Message(Message),
    /// A line that is not a valid message; carries the decode error
    Malformed(String),
    /// A line longer than the configured limit; the connection cannot recover
    Oversized,
}

/// Read the next frame.
///
/// Returns `None` when the stream has ended or failed. After `Oversized` the
/// caller must stop reading as well.
pub async fn next_inbound(reader: &mut FrameReader) -> Option<Inbound> {
    match reader.next().await? {
        Ok(line) => {
            if line.trim().is_empty() {
                return Some(Inbound::Malformed("empty line".to_string()));
            }
            Some(match Message::from_json(&line) {
                Ok(message) => Inbound::Message(message),
                Err(e) => Inbound::Malformed(e.to_string()),
            })
        }
        Err(LinesCodecError::MaxLineLengthExceeded) => Some(Inbound::Oversized),
        Err(LinesCodecError::Io(e)) => {
            tracing::debug!("Read failed: {}", e);
            None
        }
    }
}
