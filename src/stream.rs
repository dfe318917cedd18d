//! Polymorphic byte-stream abstraction.
//!
//! The engine performs all I/O through [`Stream`] so it can run against
//! files, in-memory buffers, or caller-provided callbacks (see the C vtable
//! in `ffi`) without ever assuming a file system. Read, write, and seek are
//! mandatory behaviors; flush and close default to no-ops.

use std::fs::File;
use std::io::{self, Cursor, Read, Seek, SeekFrom, Write};

use crate::error::{Error, Result};

/// Byte stream driven by the archive engine.
///
/// `read` returns the number of bytes read, 0 on EOF; a single call may
/// return fewer bytes than requested, so callers loop to drain (see
/// [`read_exact_from`]). `seek` returns the new absolute position. `close`
/// is invoked exactly once when the owning archive releases the stream.
pub trait Stream {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;
    fn write(&mut self, buf: &[u8]) -> Result<usize>;
    fn seek(&mut self, pos: SeekFrom) -> Result<u64>;

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Reads exactly `buf.len()` bytes, looping over short reads. EOF before
/// the buffer fills is an `Io` error.
pub fn read_exact_from(stream: &mut dyn Stream, buf: &mut [u8]) -> Result<()> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = stream.read(&mut buf[filled..])?;
        if n == 0 {
            return Err(Error::Io(format!(
                "unexpected EOF after {filled} of {} bytes",
                buf.len()
            )));
        }
        filled += n;
    }
    Ok(())
}

/// Writes the whole buffer, looping over short writes.
pub fn write_all_to(stream: &mut dyn Stream, buf: &[u8]) -> Result<()> {
    let mut written = 0;
    while written < buf.len() {
        let n = stream.write(&buf[written..])?;
        if n == 0 {
            return Err(Error::Io(format!(
                "short write after {written} of {} bytes",
                buf.len()
            )));
        }
        written += n;
    }
    Ok(())
}

// ── File-backed stream ───────────────────────────────────────────────────────

/// [`Stream`] over a [`File`]. Write calls on a read-only file surface the
/// OS error as `Io`.
pub struct FileStream {
    file: File,
}

impl FileStream {
    pub fn new(file: File) -> Self {
        Self { file }
    }
}

impl Stream for FileStream {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        Ok(self.file.read(buf)?)
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        Ok(self.file.write(buf)?)
    }

    fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        Ok(self.file.seek(pos)?)
    }

    fn flush(&mut self) -> Result<()> {
        Ok(self.file.flush()?)
    }

    fn close(&mut self) -> Result<()> {
        // The descriptor itself is released when the File drops.
        Ok(self.file.flush()?)
    }
}

// ── In-memory stream ─────────────────────────────────────────────────────────

/// Growable in-memory [`Stream`]; the primary test vehicle and the content
/// source for buffer-backed callers.
#[derive(Debug)]
pub struct MemStream {
    cursor: Cursor<Vec<u8>>,
}

impl MemStream {
    pub fn new() -> Self {
        Self::from_vec(Vec::new())
    }

    pub fn from_vec(data: Vec<u8>) -> Self {
        Self {
            cursor: Cursor::new(data),
        }
    }

    pub fn get_ref(&self) -> &[u8] {
        self.cursor.get_ref()
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.cursor.into_inner()
    }
}

impl Default for MemStream {
    fn default() -> Self {
        Self::new()
    }
}

impl Stream for MemStream {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        Ok(self.cursor.read(buf)?)
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        Ok(self.cursor.write(buf)?)
    }

    fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        Ok(self.cursor.seek(pos)?)
    }
}

// Mutable references forward to the underlying stream, so a caller can
// lend a stream to an archive and keep using the buffer afterwards.
impl<S: Stream + ?Sized> Stream for &mut S {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        (**self).read(buf)
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        (**self).write(buf)
    }

    fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        (**self).seek(pos)
    }

    fn flush(&mut self) -> Result<()> {
        (**self).flush()
    }

    fn close(&mut self) -> Result<()> {
        (**self).close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mem_stream_read_write_seek() {
        let mut s = MemStream::new();
        write_all_to(&mut s, b"hello world").unwrap();
        assert_eq!(s.seek(SeekFrom::Start(6)).unwrap(), 6);

        let mut buf = [0u8; 5];
        read_exact_from(&mut s, &mut buf).unwrap();
        assert_eq!(&buf, b"world");

        // EOF: read returns 0.
        assert_eq!(s.read(&mut buf).unwrap(), 0);
        assert_eq!(s.seek(SeekFrom::End(0)).unwrap(), 11);
    }

    #[test]
    fn read_exact_past_eof_is_io_error() {
        let mut s = MemStream::from_vec(vec![1, 2, 3]);
        let mut buf = [0u8; 8];
        let err = read_exact_from(&mut s, &mut buf).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Io);
    }

    #[test]
    fn file_stream_round_trip() {
        let tmp = tempfile::tempfile().unwrap();
        let mut s = FileStream::new(tmp);
        write_all_to(&mut s, b"0123456789").unwrap();
        s.flush().unwrap();

        s.seek(SeekFrom::Start(2)).unwrap();
        let mut buf = [0u8; 4];
        read_exact_from(&mut s, &mut buf).unwrap();
        assert_eq!(&buf, b"2345");
    }
}
