// Length-delimited frames for the relay stream.
//
// The relay stream multiplexes two kinds of payload, the way a WebSocket
// does: text frames (JSON control messages, see `message.rs`) and binary
// frames (one raw `WireRun` each). On a byte stream each frame is
//
//   [length: u32 BE][kind: u8][payload: length bytes]
//
// where `kind` is 0 for text and 1 for binary. `MAX_FRAME_SIZE` bounds the
// allocation a malformed or hostile length prefix can cause; a history batch
// for a long match is the largest expected frame.

use std::io::{self, Read, Write};

use serde::Serialize;
use serde::de::DeserializeOwned;

/// Maximum payload size of a single frame (16 MB).
pub const MAX_FRAME_SIZE: u32 = 16 * 1024 * 1024;

const KIND_TEXT: u8 = 0;
const KIND_BINARY: u8 = 1;

/// One relay-stream frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
}

impl Frame {
    /// Serialize a control message into a text frame.
    pub fn json<T: Serialize>(msg: &T) -> serde_json::Result<Self> {
        serde_json::to_string(msg).map(Self::Text)
    }

    /// Parse a text frame as a control message. Binary frames are not JSON.
    pub fn parse_json<T: DeserializeOwned>(&self) -> Option<serde_json::Result<T>> {
        match self {
            Self::Text(text) => Some(serde_json::from_str(text)),
            Self::Binary(_) => None,
        }
    }

    fn kind(&self) -> u8 {
        match self {
            Self::Text(_) => KIND_TEXT,
            Self::Binary(_) => KIND_BINARY,
        }
    }

    fn payload(&self) -> &[u8] {
        match self {
            Self::Text(text) => text.as_bytes(),
            Self::Binary(bytes) => bytes,
        }
    }
}

pub fn write_frame<W: Write>(writer: &mut W, frame: &Frame) -> io::Result<()> {
    let payload = frame.payload();
    let len = u32::try_from(payload.len())
        .ok()
        .filter(|&len| len <= MAX_FRAME_SIZE)
        .ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "frame too large: {} bytes (max {MAX_FRAME_SIZE})",
                    payload.len()
                ),
            )
        })?;
    writer.write_all(&len.to_be_bytes())?;
    writer.write_all(&[frame.kind()])?;
    writer.write_all(payload)?;
    writer.flush()
}

/// Read one frame.
///
/// Returns `UnexpectedEof` if the stream closes before or during a frame and
/// `InvalidData` for an oversized length, an unknown kind byte, or a text
/// frame that is not UTF-8.
pub fn read_frame<R: Read>(reader: &mut R) -> io::Result<Frame> {
    let mut header = [0u8; 5];
    reader.read_exact(&mut header)?;
    let len = u32::from_be_bytes([header[0], header[1], header[2], header[3]]);
    if len > MAX_FRAME_SIZE {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame too large: {len} bytes (max {MAX_FRAME_SIZE})"),
        ));
    }
    let mut payload = vec![0u8; len as usize];
    reader.read_exact(&mut payload)?;
    match header[4] {
        KIND_TEXT => String::from_utf8(payload)
            .map(Frame::Text)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e)),
        KIND_BINARY => Ok(Frame::Binary(payload)),
        other => Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("unknown frame kind {other}"),
        )),
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;
    use crate::message::ClientMessage;

    #[test]
    fn text_and_binary_in_sequence() {
        let frames = vec![
            Frame::Text(r#"{"type":"watch"}"#.into()),
            Frame::Binary(vec![0, 5, 0, 5, 0]),
            Frame::Binary(vec![]),
            Frame::Text(String::new()),
        ];
        let mut buf = Vec::new();
        for frame in &frames {
            write_frame(&mut buf, frame).unwrap();
        }
        let mut cursor = Cursor::new(&buf);
        for expected in &frames {
            assert_eq!(&read_frame(&mut cursor).unwrap(), expected);
        }
    }

    #[test]
    fn header_layout() {
        let mut buf = Vec::new();
        write_frame(&mut buf, &Frame::Binary(vec![9, 8])).unwrap();
        assert_eq!(buf, vec![0, 0, 0, 2, 1, 9, 8]);
    }

    #[test]
    fn json_helpers() {
        let frame = Frame::json(&ClientMessage::Watch).unwrap();
        assert_eq!(frame, Frame::Text(r#"{"type":"watch"}"#.into()));
        let parsed: ClientMessage = frame.parse_json().unwrap().unwrap();
        assert_eq!(parsed, ClientMessage::Watch);
        assert!(Frame::Binary(vec![1]).parse_json::<ClientMessage>().is_none());
    }

    #[test]
    fn rejects_oversized_read() {
        let mut bytes = (MAX_FRAME_SIZE + 1).to_be_bytes().to_vec();
        bytes.push(KIND_BINARY);
        let err = read_frame(&mut Cursor::new(bytes)).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn rejects_oversized_write() {
        let big = Frame::Binary(vec![0u8; MAX_FRAME_SIZE as usize + 1]);
        let err = write_frame(&mut Vec::new(), &big).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[test]
    fn rejects_unknown_kind() {
        let bytes = vec![0, 0, 0, 0, 7];
        let err = read_frame(&mut Cursor::new(bytes)).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn rejects_non_utf8_text() {
        let bytes = vec![0, 0, 0, 2, KIND_TEXT, 0xff, 0xfe];
        let err = read_frame(&mut Cursor::new(bytes)).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn truncated_stream_is_eof() {
        let mut cursor = Cursor::new(vec![0u8, 0, 0]);
        let err = read_frame(&mut cursor).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }
}
