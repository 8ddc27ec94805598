//! End-of-message framing.
//!
//! Each message on the client transport is followed by [`END_OF_MESSAGE`].
//! [`FrameDecoder`] accumulates raw bytes and hands out complete frames; it
//! never blocks, so callers decide when and how to read from the transport.

use std::io::{self, Read, Write};

use thiserror::Error;

/// Marker terminating every message.
pub const END_OF_MESSAGE: &[u8] = b"]]>]]>";

const READ_CHUNK: usize = 8 * 1024;

/// Errors raised while splitting the byte stream into frames.
#[derive(Debug, Error)]
pub enum FramingError {
    /// Buffered data without a terminator exceeded the configured limit.
    #[error("message exceeds {limit} bytes without an end-of-message marker")]
    TooLarge {
        /// Configured frame limit.
        limit: usize,
    },
    /// Reading from the transport failed.
    #[error("failed to read from transport: {source}")]
    Read {
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
}

/// Incremental frame splitter.
#[derive(Debug)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
    /// Prefix of `buffer` already searched without finding a marker.
    scanned: usize,
    limit: usize,
}

impl FrameDecoder {
    /// Creates a decoder that rejects frames longer than `limit` bytes.
    #[must_use]
    pub const fn new(limit: usize) -> Self {
        Self {
            buffer: Vec::new(),
            scanned: 0,
            limit,
        }
    }

    /// Performs a single read from `reader`, appending the bytes to the buffer.
    ///
    /// Interrupted reads are retried. Returns the number of bytes read; zero
    /// means the peer closed the stream.
    ///
    /// # Errors
    ///
    /// Returns [`FramingError::Read`] when the transport read fails.
    pub fn fill_from<R: Read + ?Sized>(&mut self, reader: &mut R) -> Result<usize, FramingError> {
        let mut chunk = [0_u8; READ_CHUNK];
        loop {
            match reader.read(&mut chunk) {
                Ok(read) => {
                    self.push(chunk.get(..read).unwrap_or_default());
                    return Ok(read);
                }
                Err(error) if error.kind() == io::ErrorKind::Interrupted => {}
                Err(source) => return Err(FramingError::Read { source }),
            }
        }
    }

    /// Appends raw bytes to the buffer.
    pub fn push(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Removes and returns the next complete frame, if one is buffered.
    ///
    /// # Errors
    ///
    /// Returns [`FramingError::TooLarge`] when the buffered data holds no
    /// terminator within the configured limit. The stream cannot be
    /// resynchronised afterwards.
    pub fn next_frame(&mut self) -> Result<Option<Vec<u8>>, FramingError> {
        match find_marker(&self.buffer, self.scanned) {
            Some(position) if position <= self.limit => {
                let frame: Vec<u8> = self.buffer.drain(..position).collect();
                self.buffer.drain(..END_OF_MESSAGE.len());
                self.scanned = 0;
                Ok(Some(frame))
            }
            Some(_) => Err(FramingError::TooLarge { limit: self.limit }),
            None if self.buffer.len() > self.limit + END_OF_MESSAGE.len() => {
                Err(FramingError::TooLarge { limit: self.limit })
            }
            None => {
                // A marker may straddle the next push.
                self.scanned = self
                    .buffer
                    .len()
                    .saturating_sub(END_OF_MESSAGE.len() - 1);
                Ok(None)
            }
        }
    }

    /// Reports whether bytes of an incomplete frame are buffered.
    #[must_use]
    pub fn has_partial(&self) -> bool {
        !self.buffer.is_empty()
    }

    /// Discards any buffered bytes.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.scanned = 0;
    }
}

fn find_marker(buffer: &[u8], from: usize) -> Option<usize> {
    buffer
        .get(from..)?
        .windows(END_OF_MESSAGE.len())
        .position(|window| window == END_OF_MESSAGE)
        .map(|offset| from + offset)
}

/// Writes `payload` followed by the end-of-message marker and flushes.
///
/// # Errors
///
/// Propagates write and flush failures from `writer`.
pub fn write_frame<W: Write + ?Sized>(writer: &mut W, payload: &[u8]) -> io::Result<()> {
    writer.write_all(payload)?;
    writer.write_all(END_OF_MESSAGE)?;
    writer.flush()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn yields_frames_in_order() {
        let mut decoder = FrameDecoder::new(64);
        decoder.push(b"first]]>]]>second]]>");
        assert_eq!(
            decoder.next_frame().expect("within limit"),
            Some(b"first".to_vec())
        );
        assert_eq!(decoder.next_frame().expect("within limit"), None);
        assert!(decoder.has_partial());
        decoder.push(b"]]>");
        assert_eq!(
            decoder.next_frame().expect("within limit"),
            Some(b"second".to_vec())
        );
        assert!(!decoder.has_partial());
    }

    #[test]
    fn marker_split_across_single_byte_pushes_is_found() {
        let mut decoder = FrameDecoder::new(64);
        let mut frames = Vec::new();
        for byte in b"<hello/>]]>]]><bye/>]]>]]>" {
            decoder.push(std::slice::from_ref(byte));
            if let Some(frame) = decoder.next_frame().expect("within limit") {
                frames.push(frame);
            }
            assert!(decoder.scanned <= decoder.buffer.len());
        }
        assert_eq!(frames, [b"<hello/>".to_vec(), b"<bye/>".to_vec()]);
        assert!(!decoder.has_partial());
    }

    #[test]
    fn searching_resumes_where_the_last_scan_stopped() {
        let mut decoder = FrameDecoder::new(64);
        decoder.push(b"0123456789]]>]");
        assert_eq!(decoder.next_frame().expect("within limit"), None);
        assert_eq!(decoder.scanned, 14 - (END_OF_MESSAGE.len() - 1));

        decoder.push(b"]>tail");
        assert_eq!(
            decoder.next_frame().expect("within limit"),
            Some(b"0123456789".to_vec())
        );
        assert_eq!(decoder.scanned, 0);
        assert_eq!(decoder.next_frame().expect("within limit"), None);
        assert_eq!(decoder.scanned, 0);
    }

    #[test]
    fn rejects_oversized_frames() {
        let mut decoder = FrameDecoder::new(4);
        decoder.push(b"0123456789abc");
        assert!(matches!(
            decoder.next_frame(),
            Err(FramingError::TooLarge { limit: 4 })
        ));
    }

    #[test]
    fn rejects_terminated_frame_over_limit() {
        let mut decoder = FrameDecoder::new(4);
        decoder.push(b"toolong]]>]]>");
        assert!(decoder.next_frame().is_err());
    }

    #[test]
    fn fill_from_reports_end_of_stream() {
        let mut decoder = FrameDecoder::new(64);
        let mut reader: &[u8] = b"abc";
        assert_eq!(decoder.fill_from(&mut reader).expect("read"), 3);
        assert_eq!(decoder.fill_from(&mut reader).expect("read"), 0);
    }

    #[test]
    fn write_frame_appends_marker() {
        let mut output = Vec::new();
        write_frame(&mut output, b"{}").expect("write");
        assert_eq!(output, b"{}]]>]]>");
    }
}
