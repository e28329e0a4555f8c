//! Wire frames
//!
//! Every frame on the wire is
//!
//! ```text
//! ┌──────────────────────────┬──────────┬──────────────────────┐
//! │ length: usize (native)   │ tag: u8  │ body (tag-specific)  │
//! └──────────────────────────┴──────────┴──────────────────────┘
//! ```
//!
//! `length` counts the whole frame, itself included. Frames are encoded and
//! decoded field by field; a receive buffer is never reinterpreted in place.
//!
//! A declared length smaller than the length field is treated as exactly the
//! length field ([`frame_len`]), so a corrupt prefix always advances the
//! stream.

use crate::error::{FrameError, FrameResult};

/// Width of the length prefix
pub const LENGTH_FIELD_SIZE: usize = core::mem::size_of::<usize>();

/// Length prefix plus type tag
pub const HEADER_SIZE: usize = LENGTH_FIELD_SIZE + 1;

/// An Ack carries the acknowledged frame's header as its body
pub const ACK_FRAME_SIZE: usize = HEADER_SIZE + HEADER_SIZE;

/// Known message tags
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MsgType {
    HeartBeat = 0,
    Ack = 1,
    VariableLength = 2,
}

impl MsgType {
    #[inline]
    pub const fn from_tag(tag: u8) -> Option<MsgType> {
        match tag {
            0 => Some(MsgType::HeartBeat),
            1 => Some(MsgType::Ack),
            2 => Some(MsgType::VariableLength),
            _ => None,
        }
    }

    #[inline]
    pub const fn tag(self) -> u8 {
        self as u8
    }

    pub const fn name(self) -> &'static str {
        match self {
            MsgType::HeartBeat => "HeartBeat",
            MsgType::Ack => "Ack",
            MsgType::VariableLength => "VarLength",
        }
    }
}

/// Display name for any tag, known or not
pub fn tag_name(tag: u8) -> &'static str {
    MsgType::from_tag(tag).map_or("Unknown", MsgType::name)
}

/// Read the length prefix, if enough bytes are present.
#[inline]
pub fn read_length(bytes: &[u8]) -> Option<usize> {
    let prefix = bytes.get(..LENGTH_FIELD_SIZE)?;
    let mut raw = [0u8; LENGTH_FIELD_SIZE];
    raw.copy_from_slice(prefix);
    Some(usize::from_ne_bytes(raw))
}

/// Number of bytes a frame with this declared length occupies in the stream.
#[inline]
pub const fn frame_len(declared: usize) -> usize {
    if declared < LENGTH_FIELD_SIZE {
        LENGTH_FIELD_SIZE
    } else {
        declared
    }
}

/// Frame header: length prefix and type tag
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub length: usize,
    pub tag: u8,
}

impl Header {
    pub const fn new(length: usize, tag: u8) -> Self {
        Self { length, tag }
    }

    /// Decode the header at the start of `bytes`.
    pub fn decode(bytes: &[u8]) -> FrameResult<Header> {
        if bytes.len() < HEADER_SIZE {
            return Err(FrameError::Truncated {
                needed: HEADER_SIZE,
                available: bytes.len(),
            });
        }
        let length = read_length(bytes).ok_or(FrameError::Truncated {
            needed: LENGTH_FIELD_SIZE,
            available: bytes.len(),
        })?;
        Ok(Header {
            length,
            tag: bytes[LENGTH_FIELD_SIZE],
        })
    }

    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut out = [0u8; HEADER_SIZE];
        out[..LENGTH_FIELD_SIZE].copy_from_slice(&self.length.to_ne_bytes());
        out[LENGTH_FIELD_SIZE] = self.tag;
        out
    }

    #[inline]
    pub fn msg_type(&self) -> Option<MsgType> {
        MsgType::from_tag(self.tag)
    }

    /// Body size implied by the declared length, never negative.
    #[inline]
    pub fn body_len(&self) -> usize {
        self.length.max(HEADER_SIZE) - HEADER_SIZE
    }
}

/// Anything that can lay itself out as one frame.
pub trait WireFrame {
    /// Append the complete frame, length prefix included, to `out`.
    fn write_frame(&self, out: &mut Vec<u8>);
}

/// A decoded frame, borrowing its body from the decoder's buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Message<'a> {
    HeartBeat,
    Ack { original: Header },
    VariableLength { text: &'a [u8] },
    Unknown { tag: u8, body: &'a [u8] },
}

impl<'a> Message<'a> {
    /// Interpret exactly one frame's bytes, as handed out by the decoder.
    pub fn decode(frame: &'a [u8]) -> FrameResult<Message<'a>> {
        let header = Header::decode(frame)?;
        if frame.len() != frame_len(header.length) {
            return Err(FrameError::LengthMismatch {
                declared: header.length,
                actual: frame.len(),
            });
        }
        let body = &frame[HEADER_SIZE..];
        Ok(match header.msg_type() {
            Some(MsgType::HeartBeat) => Message::HeartBeat,
            Some(MsgType::Ack) => Message::Ack {
                original: Header::decode(body)?,
            },
            Some(MsgType::VariableLength) => Message::VariableLength { text: body },
            None => Message::Unknown {
                tag: header.tag,
                body,
            },
        })
    }

    pub fn tag(&self) -> u8 {
        match self {
            Message::HeartBeat => MsgType::HeartBeat.tag(),
            Message::Ack { .. } => MsgType::Ack.tag(),
            Message::VariableLength { .. } => MsgType::VariableLength.tag(),
            Message::Unknown { tag, .. } => *tag,
        }
    }

    fn body_len(&self) -> usize {
        match self {
            Message::HeartBeat => 0,
            Message::Ack { .. } => HEADER_SIZE,
            Message::VariableLength { text } => text.len(),
            Message::Unknown { body, .. } => body.len(),
        }
    }

    /// Encode into a freshly allocated buffer.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_SIZE + self.body_len());
        self.write_frame(&mut out);
        out
    }
}

impl WireFrame for Message<'_> {
    fn write_frame(&self, out: &mut Vec<u8>) {
        let header = Header::new(HEADER_SIZE + self.body_len(), self.tag());
        out.extend_from_slice(&header.encode());
        match self {
            Message::HeartBeat => {}
            Message::Ack { original } => out.extend_from_slice(&original.encode()),
            Message::VariableLength { text } => out.extend_from_slice(text),
            Message::Unknown { body, .. } => out.extend_from_slice(body),
        }
    }
}

/// Ack frame acknowledging the frame with header `original`.
pub fn encode_ack(original: &Header) -> [u8; ACK_FRAME_SIZE] {
    let mut out = [0u8; ACK_FRAME_SIZE];
    out[..HEADER_SIZE].copy_from_slice(&Header::new(ACK_FRAME_SIZE, MsgType::Ack.tag()).encode());
    out[HEADER_SIZE..].copy_from_slice(&original.encode());
    out
}

/// VariableLength frame carrying `text`.
pub fn encode_variable_length(text: &[u8]) -> Vec<u8> {
    Message::VariableLength { text }.to_bytes()
}

pub fn encode_heartbeat() -> [u8; HEADER_SIZE] {
    Header::new(HEADER_SIZE, MsgType::HeartBeat.tag()).encode()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_layout() {
        let bytes = Header::new(14, MsgType::VariableLength.tag()).encode();
        assert_eq!(bytes.len(), HEADER_SIZE);
        assert_eq!(read_length(&bytes), Some(14));
        assert_eq!(bytes[LENGTH_FIELD_SIZE], 2);
    }

    #[test]
    fn test_variable_length_frame() {
        let frame = encode_variable_length(b"hello");
        assert_eq!(frame.len(), HEADER_SIZE + 5);
        assert_eq!(read_length(&frame), Some(HEADER_SIZE + 5));

        match Message::decode(&frame).unwrap() {
            Message::VariableLength { text } => assert_eq!(text, b"hello"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_ack_carries_original_header() {
        let original = Header::new(HEADER_SIZE + 5, MsgType::VariableLength.tag());
        let ack = encode_ack(&original);
        assert_eq!(read_length(&ack), Some(ACK_FRAME_SIZE));

        assert_eq!(
            Message::decode(&ack).unwrap(),
            Message::Ack { original }
        );
        assert_eq!(Message::Ack { original }.to_bytes(), ack.to_vec());
    }

    #[test]
    fn test_heartbeat_and_unknown() {
        assert_eq!(Message::decode(&encode_heartbeat()).unwrap(), Message::HeartBeat);

        let unknown = Message::Unknown { tag: 42, body: b"xyz" }.to_bytes();
        assert_eq!(
            Message::decode(&unknown).unwrap(),
            Message::Unknown { tag: 42, body: b"xyz" }
        );
        assert_eq!(tag_name(42), "Unknown");
        assert_eq!(tag_name(1), "Ack");
    }

    #[test]
    fn test_short_length_occupies_length_field() {
        assert_eq!(frame_len(0), LENGTH_FIELD_SIZE);
        assert_eq!(frame_len(3), LENGTH_FIELD_SIZE);
        assert_eq!(frame_len(HEADER_SIZE), HEADER_SIZE);

        // Only the length field exists, so there is no tag to interpret.
        let zero = 0usize.to_ne_bytes();
        assert!(matches!(
            Message::decode(&zero),
            Err(FrameError::Truncated { .. })
        ));
    }

    #[test]
    fn test_body_len_floor() {
        assert_eq!(Header::new(0, 2).body_len(), 0);
        assert_eq!(Header::new(HEADER_SIZE + 7, 2).body_len(), 7);
    }

    #[test]
    fn test_length_mismatch() {
        let mut frame = encode_variable_length(b"abc");
        frame.push(b'!');
        assert_eq!(
            Message::decode(&frame),
            Err(FrameError::LengthMismatch {
                declared: HEADER_SIZE + 3,
                actual: HEADER_SIZE + 4,
            })
        );
    }
}
