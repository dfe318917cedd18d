//! High-level [`Archive`] API — the primary embedding surface.
//!
//! ```no_run
//! use e8pack::archive::Archive;
//! use e8pack::stream::MemStream;
//!
//! // Write
//! let mut ar = Archive::create_path("out.e8", None)?;
//! let mut content = MemStream::from_vec(b"Hello, world!".to_vec());
//! ar.add("readme.txt", &mut content, None)?;
//! ar.close()?;
//!
//! // Read
//! let mut ar = Archive::open_path("out.e8", None)?;
//! let mut out = MemStream::new();
//! ar.extract(0, &mut out, None)?;
//! assert_eq!(out.get_ref(), b"Hello, world!");
//! # Ok::<(), e8pack::error::Error>(())
//! ```

use std::fs::File;
use std::path::Path;

use crate::codec::CodecId;
use crate::engine::{ArchiveReader, ArchiveWriter, Entry, ProgressFn};
use crate::error::{track, Error, Result};
use crate::stream::{FileStream, Stream};

// ── ArchiveMode ──────────────────────────────────────────────────────────────

enum ArchiveMode<S: Stream> {
    Read(ArchiveReader<S>),
    Write(ArchiveWriter<S>),
}

// ── Archive ──────────────────────────────────────────────────────────────────

/// Mode-tagged archive handle over any [`Stream`].
pub struct Archive<S: Stream> {
    mode: ArchiveMode<S>,
}

impl Archive<FileStream> {
    /// Creates an archive file at `path`.
    pub fn create_path<P: AsRef<Path>>(path: P, password: Option<&str>) -> Result<Self> {
        let file = track(File::create(path).map_err(Error::from))?;
        Self::create(FileStream::new(file), password)
    }

    /// Opens an archive file at `path`.
    pub fn open_path<P: AsRef<Path>>(path: P, password: Option<&str>) -> Result<Self> {
        let file = track(File::open(path).map_err(Error::from))?;
        Self::open(FileStream::new(file), password)
    }
}

impl<S: Stream> Archive<S> {
    // ── Constructors ─────────────────────────────────────────────────────────

    pub fn create(stream: S, password: Option<&str>) -> Result<Self> {
        Ok(Self {
            mode: ArchiveMode::Write(ArchiveWriter::create(stream, password)?),
        })
    }

    pub fn open(stream: S, password: Option<&str>) -> Result<Self> {
        Ok(Self {
            mode: ArchiveMode::Read(ArchiveReader::open(stream, password)?),
        })
    }

    // ── Write ────────────────────────────────────────────────────────────────

    pub fn add(
        &mut self,
        path: &str,
        content: &mut dyn Stream,
        progress: Option<ProgressFn>,
    ) -> Result<()> {
        match &mut self.mode {
            ArchiveMode::Write(w) => w.add(path, content, progress),
            ArchiveMode::Read(_) => track(Err(read_only())),
        }
    }

    pub fn add_with_codec(
        &mut self,
        path: &str,
        content: &mut dyn Stream,
        progress: Option<ProgressFn>,
        codec: CodecId,
        level: i32,
    ) -> Result<()> {
        match &mut self.mode {
            ArchiveMode::Write(w) => w.add_with_codec(path, content, progress, codec, level),
            ArchiveMode::Read(_) => track(Err(read_only())),
        }
    }

    // ── Read ─────────────────────────────────────────────────────────────────

    pub fn extract(
        &mut self,
        index: usize,
        output: &mut dyn Stream,
        progress: Option<ProgressFn>,
    ) -> Result<()> {
        match &mut self.mode {
            ArchiveMode::Read(r) => r.extract(index, output, progress),
            ArchiveMode::Write(_) => track(Err(write_only())),
        }
    }

    // ── Metadata ─────────────────────────────────────────────────────────────

    pub fn count(&self) -> usize {
        match &self.mode {
            ArchiveMode::Read(r) => r.count(),
            ArchiveMode::Write(w) => w.count(),
        }
    }

    /// Entry metadata at `index` (read mode).
    pub fn entry(&self, index: usize) -> Result<&Entry> {
        match &self.mode {
            ArchiveMode::Read(r) => r.entry(index),
            ArchiveMode::Write(_) => track(Err(write_only())),
        }
    }

    // ── Teardown ─────────────────────────────────────────────────────────────

    /// Finalizes (write mode) and releases the stream. Dropping the handle
    /// has the same effect with errors discarded.
    pub fn close(self) -> Result<()> {
        match self.mode {
            ArchiveMode::Read(r) => r.close(),
            ArchiveMode::Write(w) => w.close(),
        }
    }
}

fn read_only() -> Error {
    Error::InvalidArg("archive is open for reading".into())
}

fn write_only() -> Error {
    Error::InvalidArg("archive is open for writing".into())
}
