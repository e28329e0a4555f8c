//! Streaming length-prefixed frame decoder
//!
//! Bytes arrive in arbitrary chunks. The decoder keeps them in one growable
//! buffer and hands out complete frames, leaving at most one partial frame
//! behind after every [`StreamFrameDecoder::decode`] pass.
//!
//! ```text
//!  buffer: [ frame | frame | partial .... | (spare capacity) ]
//!          0                              populated          len
//! ```

use crate::frame::{frame_len, read_length};
use crate::io::ByteSource;

/// Receives each complete frame extracted by the decoder.
///
/// The slice covers exactly one frame, length prefix included, and is only
/// valid for the duration of the call.
pub trait FrameHandler {
    fn on_frame(&mut self, frame: &[u8]);
}

impl<F> FrameHandler for F
where
    F: FnMut(&[u8]),
{
    #[inline]
    fn on_frame(&mut self, frame: &[u8]) {
        self(frame)
    }
}

/// Accumulates raw bytes and extracts length-prefixed frames.
#[derive(Debug, Default)]
pub struct StreamFrameDecoder {
    /// Backing storage; `len()` is the usable capacity
    buffer: Vec<u8>,
    /// Valid bytes at the front of `buffer`
    populated: usize,
}

impl StreamFrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: vec![0; capacity],
            populated: 0,
        }
    }

    /// Bytes currently buffered and not yet handed out
    #[inline]
    pub fn populated(&self) -> usize {
        self.populated
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.populated == 0
    }

    /// Buffered bytes, for inspection
    #[inline]
    pub fn buffered(&self) -> &[u8] {
        &self.buffer[..self.populated]
    }

    fn reserve_tail(&mut self, n: usize) {
        let needed = self.populated + n;
        if self.buffer.len() < needed {
            self.buffer.resize(needed, 0);
        }
    }

    /// Let `source` fill up to `max_bytes` past the populated mark.
    ///
    /// Returns how many bytes the source supplied; `0` is not an error.
    pub fn append_from<S>(&mut self, source: &mut S, max_bytes: usize) -> usize
    where
        S: ByteSource + ?Sized,
    {
        if max_bytes == 0 {
            return 0;
        }
        self.reserve_tail(max_bytes);
        let tail = &mut self.buffer[self.populated..self.populated + max_bytes];
        let n = source.fill(tail).min(max_bytes);
        self.populated += n;
        n
    }

    /// Append an in-memory byte range.
    pub fn append_bytes(&mut self, bytes: &[u8]) {
        self.reserve_tail(bytes.len());
        self.buffer[self.populated..self.populated + bytes.len()].copy_from_slice(bytes);
        self.populated += bytes.len();
    }

    /// Hand every complete buffered frame to `handler`, in order.
    ///
    /// A declared length below the length field width consumes exactly the
    /// length field. Remaining bytes are moved to the front once at the end
    /// of the pass. Returns the number of frames extracted.
    pub fn decode<H>(&mut self, handler: &mut H) -> usize
    where
        H: FrameHandler + ?Sized,
    {
        let mut offset = 0;
        let mut count = 0;

        while let Some(declared) = read_length(&self.buffer[offset..self.populated]) {
            let len = frame_len(declared);
            if self.populated - offset < len {
                break;
            }
            handler.on_frame(&self.buffer[offset..offset + len]);
            offset += len;
            count += 1;
        }

        if offset > 0 {
            self.buffer.copy_within(offset..self.populated, 0);
            self.populated -= offset;
        }
        count
    }

    /// Drop buffered bytes, keeping capacity.
    pub fn reset(&mut self) {
        self.populated = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{encode_ack, encode_heartbeat, encode_variable_length, Header, MsgType};
    use crate::frame::{HEADER_SIZE, LENGTH_FIELD_SIZE};

    fn sample_stream() -> (Vec<Vec<u8>>, Vec<u8>) {
        let frames = vec![
            encode_variable_length(b"hello"),
            encode_heartbeat().to_vec(),
            encode_ack(&Header::new(HEADER_SIZE + 5, MsgType::VariableLength.tag())).to_vec(),
            encode_variable_length(&[b'x'; 300]),
            encode_variable_length(b""),
        ];
        let stream = frames.concat();
        (frames, stream)
    }

    fn collect(decoder: &mut StreamFrameDecoder, out: &mut Vec<Vec<u8>>) -> usize {
        decoder.decode(&mut |f: &[u8]| out.push(f.to_vec()))
    }

    #[test]
    fn test_single_frame() {
        let mut decoder = StreamFrameDecoder::new();
        decoder.append_bytes(&encode_variable_length(b"hello"));

        let mut out = Vec::new();
        assert_eq!(collect(&mut decoder, &mut out), 1);
        assert_eq!(out[0], encode_variable_length(b"hello"));
        assert!(decoder.is_empty());
    }

    #[test]
    fn test_any_chunking_yields_same_frames() {
        let (frames, stream) = sample_stream();

        for chunk in [1, 2, 3, 7, LENGTH_FIELD_SIZE, HEADER_SIZE + 1, 64, stream.len()] {
            let mut decoder = StreamFrameDecoder::new();
            let mut out = Vec::new();
            let mut total = 0;
            for piece in stream.chunks(chunk) {
                decoder.append_bytes(piece);
                total += collect(&mut decoder, &mut out);
                // Never more than one partial frame left behind
                assert!(decoder.populated() < 300 + HEADER_SIZE);
            }
            assert_eq!(total, frames.len(), "chunk size {}", chunk);
            assert_eq!(out, frames, "chunk size {}", chunk);
            assert!(decoder.is_empty());
        }
    }

    #[test]
    fn test_uneven_chunking() {
        let (frames, stream) = sample_stream();
        let cuts = [3usize, 1, 20, 2, 50, 9, 400];

        let mut decoder = StreamFrameDecoder::new();
        let mut out = Vec::new();
        let mut rest: &[u8] = &stream;
        let mut i = 0;
        while !rest.is_empty() {
            let n = cuts[i % cuts.len()].min(rest.len());
            decoder.append_bytes(&rest[..n]);
            rest = &rest[n..];
            collect(&mut decoder, &mut out);
            i += 1;
        }
        assert_eq!(out, frames);
    }

    #[test]
    fn test_short_length_is_floored() {
        let mut stream = 0usize.to_ne_bytes().to_vec();
        stream.extend_from_slice(&encode_variable_length(b"after"));

        let mut decoder = StreamFrameDecoder::new();
        decoder.append_bytes(&stream);

        let mut out = Vec::new();
        assert_eq!(collect(&mut decoder, &mut out), 2);
        assert_eq!(out[0].len(), LENGTH_FIELD_SIZE);
        assert_eq!(out[1], encode_variable_length(b"after"));
    }

    #[test]
    fn test_partial_frame_waits() {
        let frame = encode_variable_length(b"partial");
        let mut decoder = StreamFrameDecoder::new();
        decoder.append_bytes(&frame[..frame.len() - 1]);

        let mut out = Vec::new();
        assert_eq!(collect(&mut decoder, &mut out), 0);
        assert_eq!(decoder.populated(), frame.len() - 1);

        decoder.append_bytes(&frame[frame.len() - 1..]);
        assert_eq!(collect(&mut decoder, &mut out), 1);
        assert_eq!(out[0], frame);
    }

    #[test]
    fn test_append_from_source() {
        let (frames, stream) = sample_stream();
        let mut source: &[u8] = &stream;
        let mut decoder = StreamFrameDecoder::with_capacity(16);
        let mut out = Vec::new();

        loop {
            let n = decoder.append_from(&mut source, 10);
            collect(&mut decoder, &mut out);
            if n == 0 {
                break;
            }
        }
        assert_eq!(out, frames);
        assert_eq!(decoder.append_from(&mut source, 10), 0);
    }

    #[test]
    fn test_reset_keeps_capacity() {
        let mut decoder = StreamFrameDecoder::new();
        decoder.append_bytes(&[1, 2, 3]);
        decoder.reset();
        assert!(decoder.is_empty());
        assert!(decoder.buffered().is_empty());
    }
}
