//! JSON line framing for bus traffic.

use std::io::{self, BufRead, BufReader, Read, Write};

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::BusError;

/// Largest accepted bus frame in bytes.
pub const DEFAULT_MAX_FRAME_BYTES: usize = 1024 * 1024;

/// Serialises `frame` as one JSON line and flushes the writer.
///
/// # Errors
///
/// Returns [`BusError::Encode`] when serialisation fails and
/// [`BusError::Io`] when the write fails.
pub fn write_frame<W, T>(writer: &mut W, frame: &T) -> Result<(), BusError>
where
    W: Write + ?Sized,
    T: Serialize + ?Sized,
{
    let mut line = serde_json::to_vec(frame).map_err(BusError::Encode)?;
    line.push(b'\n');
    writer.write_all(&line)?;
    writer.flush()?;
    Ok(())
}

/// Reads bounded JSON line frames from a stream.
#[derive(Debug)]
pub struct FrameReader<R> {
    inner: BufReader<R>,
    limit: usize,
}

impl<R: Read> FrameReader<R> {
    /// Wraps `reader`, rejecting frames longer than `limit` bytes.
    pub fn new(reader: R, limit: usize) -> Self {
        Self {
            inner: BufReader::new(reader),
            limit,
        }
    }

    /// Reads the next frame.
    ///
    /// Returns `Ok(None)` on a clean end of stream. A trailing line without a
    /// newline is still decoded.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::FrameTooLarge`] for oversized frames,
    /// [`BusError::Decode`] for lines that do not parse and [`BusError::Io`]
    /// for read failures.
    pub fn read_frame<T: DeserializeOwned>(&mut self) -> Result<Option<T>, BusError> {
        loop {
            let Some(line) = self.read_line()? else {
                return Ok(None);
            };
            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            return serde_json::from_slice(&line)
                .map(Some)
                .map_err(BusError::Decode);
        }
    }

    /// Reports whether bytes are buffered but not yet consumed.
    pub fn has_buffered(&self) -> bool {
        !self.inner.buffer().is_empty()
    }

    /// Returns the wrapped reader.
    pub fn get_ref(&self) -> &R {
        self.inner.get_ref()
    }

    /// Returns the wrapped reader mutably, for writing replies.
    pub fn get_mut(&mut self) -> &mut R {
        self.inner.get_mut()
    }

    fn read_line(&mut self) -> Result<Option<Vec<u8>>, BusError> {
        let mut line = Vec::new();
        let cap = u64::try_from(self.limit.saturating_add(1)).unwrap_or(u64::MAX);
        loop {
            let mut limited = (&mut self.inner).take(cap);
            match limited.read_until(b'\n', &mut line) {
                Ok(0) if line.is_empty() => return Ok(None),
                Ok(_) => break,
                Err(error) if error.kind() == io::ErrorKind::Interrupted => {}
                Err(error) => return Err(BusError::Io(error)),
            }
        }
        if line.last() == Some(&b'\n') {
            line.pop();
        }
        if line.len() > self.limit {
            return Err(BusError::FrameTooLarge { limit: self.limit });
        }
        Ok(Some(line))
    }
}
