//! Archive engine — writer and reader.
//!
//! # Writer
//! [`ArchiveWriter`] accepts entries one at a time, buffers each content
//! stream whole, compresses it through the codec registry, and appends the
//! block to the output. When a codec fails or fails to shrink the input the
//! entry falls back to store. `finalize()` emits the trailer directory;
//! for encrypted archives the entire payload (data blocks + directory +
//! trailer) accumulates in memory and is encrypted as one blob behind the
//! magic.
//!
//! # Reader
//! [`ArchiveReader`] checks the 4-byte magic, decrypts the tail into memory
//! for encrypted archives, locates the directory via the trailing
//! `dir_size` field, and extracts entries on demand.
//!
//! # Layout
//! All binary fields are strictly little-endian. `data_offset` is relative
//! to the payload region (the byte immediately after the magic), so both
//! the streaming and the decrypted-buffer paths consume
//! `payload[data_offset .. data_offset + compressed_size]`.

use std::io::{Cursor, Read, SeekFrom};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::codec::{codec_get, codecs_init, CodecId};
use crate::crypto;
use crate::error::{track, Error, Result};
use crate::stream::{read_exact_from, write_all_to, Stream};

/// Unencrypted container magic.
pub const MAGIC_PLAIN: &[u8; 4] = b"E8A1";
/// Encrypted container magic.
pub const MAGIC_ENC: &[u8; 4] = b"E8AE";

const MAGIC_LEN: u64 = 4;

/// Content streams are drained in chunks of this size.
const READ_CHUNK: usize = 256 * 1024;

/// `path_len` is a u16 on disk.
const MAX_PATH_LEN: usize = 65_535;

pub const DEFAULT_CODEC: CodecId = CodecId::Zstd;
pub const DEFAULT_LEVEL: i32 = 3;

/// Progress callback: `(current, total)` in uncompressed bytes. Returning
/// `false` aborts the surrounding operation with an `Io` error.
pub type ProgressFn<'a> = &'a mut dyn FnMut(u64, u64) -> bool;

// ── Entry ────────────────────────────────────────────────────────────────────

/// One logical file inside the archive.
#[derive(Debug, Clone)]
pub struct Entry {
    pub path: String,
    pub uncompressed_size: u64,
    /// Offset of the compressed block within the payload region.
    pub data_offset: u64,
    pub compressed_size: u32,
    pub codec_id: u8,
}

// ── Directory serialization ──────────────────────────────────────────────────

/// Serializes `num_entries(4) | entry...`; the trailer `dir_size` field is
/// written separately by the caller.
fn encode_directory(entries: &[Entry]) -> Result<Vec<u8>> {
    let mut dir = Vec::new();
    dir.write_u32::<LittleEndian>(entries.len() as u32)?;
    for e in entries {
        let path = e.path.as_bytes();
        dir.write_u16::<LittleEndian>(path.len() as u16)?;
        dir.extend_from_slice(path);
        dir.write_u64::<LittleEndian>(e.uncompressed_size)?;
        dir.write_u64::<LittleEndian>(e.data_offset)?;
        dir.write_u32::<LittleEndian>(e.compressed_size)?;
        dir.write_u8(e.codec_id)?;
    }
    Ok(dir)
}

fn parse_directory(dir: &[u8]) -> Result<Vec<Entry>> {
    let truncated = |_| Error::Format("truncated directory".into());

    let mut cur = Cursor::new(dir);
    let num = cur.read_u32::<LittleEndian>().map_err(truncated)?;

    let mut entries = Vec::new();
    entries
        .try_reserve_exact(num as usize)
        .map_err(|_| Error::Memory("directory entry table".into()))?;

    for _ in 0..num {
        let path_len = cur.read_u16::<LittleEndian>().map_err(truncated)? as usize;
        let mut path_bytes = vec![0u8; path_len];
        cur.read_exact(&mut path_bytes).map_err(truncated)?;
        let path = String::from_utf8(path_bytes)
            .map_err(|_| Error::Format("entry path is not valid UTF-8".into()))?;

        let uncompressed_size = cur.read_u64::<LittleEndian>().map_err(truncated)?;
        let data_offset = cur.read_u64::<LittleEndian>().map_err(truncated)?;
        let compressed_size = cur.read_u32::<LittleEndian>().map_err(truncated)?;
        let codec_id = cur.read_u8().map_err(truncated)?;

        CodecId::try_from(codec_id)
            .map_err(|_| Error::Format(format!("codec id {codec_id} out of range")))?;
        if codec_id == CodecId::Store as u8 && u64::from(compressed_size) != uncompressed_size {
            return Err(Error::Format("stored entry size mismatch".into()));
        }

        entries.push(Entry {
            path,
            uncompressed_size,
            data_offset,
            compressed_size,
            codec_id,
        });
    }
    Ok(entries)
}

// ── Writer ───────────────────────────────────────────────────────────────────

pub struct ArchiveWriter<S: Stream> {
    stream: S,
    entries: Vec<Entry>,
    /// `Some` = encrypted mode; the payload accumulates in `mem_buf`.
    password: Option<String>,
    mem_buf: Vec<u8>,
    finalized: bool,
    closed: bool,
}

impl<S: Stream> ArchiveWriter<S> {
    /// Creates a new archive on `stream` and writes the format magic.
    /// A non-empty `password` switches to encrypted mode: entry data then
    /// accumulates in memory and is encrypted on finalize.
    pub fn create(stream: S, password: Option<&str>) -> Result<Self> {
        track(Self::create_inner(stream, password))
    }

    fn create_inner(mut stream: S, password: Option<&str>) -> Result<Self> {
        codecs_init();
        let password = password.filter(|p| !p.is_empty()).map(str::to_owned);
        let magic = if password.is_some() {
            MAGIC_ENC
        } else {
            MAGIC_PLAIN
        };
        write_all_to(&mut stream, magic)?;
        Ok(Self {
            stream,
            entries: Vec::new(),
            password,
            mem_buf: Vec::new(),
            finalized: false,
            closed: false,
        })
    }

    /// Adds an entry with the default codec and level.
    pub fn add(
        &mut self,
        path: &str,
        content: &mut dyn Stream,
        progress: Option<ProgressFn>,
    ) -> Result<()> {
        self.add_with_codec(path, content, progress, DEFAULT_CODEC, DEFAULT_LEVEL)
    }

    /// Adds an entry, compressing with `codec` at `level`.
    ///
    /// The content stream is drained fully into memory. If the codec fails
    /// or produces output at least as large as the input, the raw bytes are
    /// stored and the entry is re-tagged as store.
    pub fn add_with_codec(
        &mut self,
        path: &str,
        content: &mut dyn Stream,
        progress: Option<ProgressFn>,
        codec: CodecId,
        level: i32,
    ) -> Result<()> {
        track(self.add_inner(path, content, progress, codec, level))
    }

    fn add_inner(
        &mut self,
        path: &str,
        content: &mut dyn Stream,
        progress: Option<ProgressFn>,
        codec: CodecId,
        level: i32,
    ) -> Result<()> {
        if self.finalized {
            return Err(Error::InvalidArg("archive already finalized".into()));
        }
        if path.len() > MAX_PATH_LEN {
            return Err(Error::InvalidArg(format!(
                "entry path exceeds {MAX_PATH_LEN} bytes"
            )));
        }

        // Drain the content stream whole.
        let mut raw = Vec::new();
        let mut chunk = vec![0u8; READ_CHUNK];
        loop {
            let n = content.read(&mut chunk)?;
            if n == 0 {
                break;
            }
            raw.try_reserve(n)
                .map_err(|_| Error::Memory("entry content buffer".into()))?;
            raw.extend_from_slice(&chunk[..n]);
        }
        let raw_size = raw.len() as u64;

        // Compress; fall back to store unless the codec strictly shrinks.
        let mut block = raw;
        let mut used_codec = CodecId::Store;
        if let Some(compress) = codec_get(codec).and_then(|cv| cv.compress) {
            let bound = codec_get(codec)
                .and_then(|cv| cv.bound)
                .map_or(block.len() + block.len() / 3 + 1024, |b| b(block.len()));
            let mut comp = Vec::new();
            comp.try_reserve_exact(bound)
                .map_err(|_| Error::Memory("compression buffer".into()))?;
            comp.resize(bound, 0);

            let csize = compress(&block, &mut comp, level);
            if csize > 0 && (csize as u64) < raw_size {
                comp.truncate(csize);
                block = comp;
                used_codec = codec;
            } else {
                log::debug!("codec {codec:?} did not shrink {raw_size} bytes, storing raw");
            }
        }

        if block.len() as u64 > u64::from(u32::MAX) {
            return Err(Error::Unsupported(
                "entry exceeds the 4 GiB per-entry compressed-size cap".into(),
            ));
        }
        let compressed_size = block.len() as u32;

        let data_offset = if self.password.is_some() {
            let offset = self.mem_buf.len() as u64;
            self.mem_buf
                .try_reserve(block.len())
                .map_err(|_| Error::Memory("payload buffer".into()))?;
            self.mem_buf.extend_from_slice(&block);
            offset
        } else {
            let pos = self.stream.seek(SeekFrom::Current(0))?;
            write_all_to(&mut self.stream, &block)?;
            pos - MAGIC_LEN
        };

        if let Some(cb) = progress {
            if !cb(raw_size, raw_size) {
                return Err(Error::Io("operation aborted by progress callback".into()));
            }
        }

        self.entries.push(Entry {
            path: path.to_owned(),
            uncompressed_size: raw_size,
            data_offset,
            compressed_size,
            codec_id: used_codec as u8,
        });
        Ok(())
    }

    /// Number of entries added so far.
    pub fn count(&self) -> usize {
        self.entries.len()
    }

    /// Writes the directory and trailer; encrypts and flushes the payload
    /// in encrypted mode. Runs at most once; later calls are no-ops.
    pub fn finalize(&mut self) -> Result<()> {
        track(self.finalize_inner())
    }

    fn finalize_inner(&mut self) -> Result<()> {
        if self.finalized {
            return Ok(());
        }
        self.finalized = true;

        let dir = encode_directory(&self.entries)?;
        let dir_size = dir.len() as u32;

        if let Some(password) = self.password.take() {
            self.mem_buf
                .try_reserve(dir.len() + 4)
                .map_err(|_| Error::Memory("payload buffer".into()))?;
            self.mem_buf.extend_from_slice(&dir);
            self.mem_buf.extend_from_slice(&dir_size.to_le_bytes());

            let blob = crypto::encrypt(&password, &self.mem_buf)?;
            write_all_to(&mut self.stream, &blob)?;
            self.mem_buf.clear();
        } else {
            self.stream.seek(SeekFrom::End(0))?;
            write_all_to(&mut self.stream, &dir)?;
            write_all_to(&mut self.stream, &dir_size.to_le_bytes())?;
        }

        log::debug!("finalized archive: {} entries", self.entries.len());
        self.stream.flush()
    }

    /// Finalizes (if not already done) and releases the stream.
    pub fn close(mut self) -> Result<()> {
        let finalize_result = self.finalize();
        self.closed = true;
        let close_result = track(self.stream.close());
        finalize_result.and(close_result)
    }
}

impl<S: Stream> Drop for ArchiveWriter<S> {
    fn drop(&mut self) {
        if !self.finalized {
            let _ = self.finalize_inner();
        }
        if !self.closed {
            self.closed = true;
            let _ = self.stream.close();
        }
    }
}

// ── Reader ───────────────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct ArchiveReader<S: Stream> {
    stream: S,
    entries: Vec<Entry>,
    encrypted: bool,
    /// Decrypted payload for encrypted archives; empty otherwise.
    mem_buf: Vec<u8>,
    closed: bool,
}

impl<S: Stream> ArchiveReader<S> {
    /// Opens an archive and loads its directory.
    ///
    /// An `E8AE` magic requires a non-empty `password`; a missing password
    /// is `InvalidArg`, while a wrong one surfaces as `Format` exactly like
    /// corruption.
    pub fn open(stream: S, password: Option<&str>) -> Result<Self> {
        track(Self::open_inner(stream, password))
    }

    fn open_inner(mut stream: S, password: Option<&str>) -> Result<Self> {
        codecs_init();

        stream.seek(SeekFrom::Start(0))?;
        let mut magic = [0u8; 4];
        read_exact_from(&mut stream, &mut magic)
            .map_err(|_| Error::Format("missing format magic".into()))?;

        let encrypted = match &magic {
            m if m == MAGIC_PLAIN => false,
            m if m == MAGIC_ENC => true,
            _ => return Err(Error::Format("unrecognized format magic".into())),
        };

        let (entries, mem_buf) = if encrypted {
            let password = password
                .filter(|p| !p.is_empty())
                .ok_or_else(|| Error::InvalidArg("encrypted archive requires a password".into()))?;

            let file_end = stream.seek(SeekFrom::End(0))?;
            if file_end < MAGIC_LEN + (crypto::SALT_LEN + crypto::IV_LEN + crypto::AES_BLOCK) as u64
            {
                return Err(Error::Format("encrypted archive too short".into()));
            }

            let enc_len = (file_end - MAGIC_LEN) as usize;
            let mut enc = Vec::new();
            enc.try_reserve_exact(enc_len)
                .map_err(|_| Error::Memory("encrypted payload buffer".into()))?;
            enc.resize(enc_len, 0);
            stream.seek(SeekFrom::Start(MAGIC_LEN))?;
            read_exact_from(&mut stream, &mut enc)?;

            let payload = crypto::decrypt(password, &enc)?;
            if payload.len() < 8 {
                return Err(Error::Format("decrypted payload too short".into()));
            }

            let dir_size =
                u32::from_le_bytes(payload[payload.len() - 4..].try_into().unwrap()) as usize;
            if dir_size == 0 || dir_size > payload.len() - 4 {
                return Err(Error::Format("directory size out of bounds".into()));
            }
            let dir_start = payload.len() - 4 - dir_size;
            let entries = parse_directory(&payload[dir_start..payload.len() - 4])?;
            (entries, payload)
        } else {
            let file_end = stream.seek(SeekFrom::End(0))?;
            // magic(4) + num_entries(4) + dir_size(4) at minimum
            if file_end < 12 {
                return Err(Error::Format("archive too short".into()));
            }

            stream.seek(SeekFrom::Start(file_end - 4))?;
            let mut trailer = [0u8; 4];
            read_exact_from(&mut stream, &mut trailer)?;
            let dir_size = u32::from_le_bytes(trailer);

            if dir_size == 0 || u64::from(dir_size) > file_end - 8 {
                return Err(Error::Format("directory size out of bounds".into()));
            }
            let dir_start = file_end - 4 - u64::from(dir_size);
            if dir_start < MAGIC_LEN {
                return Err(Error::Format("directory overlaps format magic".into()));
            }

            stream.seek(SeekFrom::Start(dir_start))?;
            let mut dir = Vec::new();
            dir.try_reserve_exact(dir_size as usize)
                .map_err(|_| Error::Memory("directory buffer".into()))?;
            dir.resize(dir_size as usize, 0);
            read_exact_from(&mut stream, &mut dir)
                .map_err(|_| Error::Format("truncated directory".into()))?;

            (parse_directory(&dir)?, Vec::new())
        };

        log::debug!(
            "opened {} archive: {} entries",
            if encrypted { "encrypted" } else { "plain" },
            entries.len()
        );

        Ok(Self {
            stream,
            entries,
            encrypted,
            mem_buf,
            closed: false,
        })
    }

    pub fn count(&self) -> usize {
        self.entries.len()
    }

    pub fn encrypted(&self) -> bool {
        self.encrypted
    }

    /// Entry metadata at `index`.
    pub fn entry(&self, index: usize) -> Result<&Entry> {
        track(self.entries.get(index).ok_or(Error::NotFound(index)))
    }

    /// Extracts entry `index` into `output`. Decompression must produce
    /// exactly `uncompressed_size` bytes; any mismatch is `Format`. On
    /// failure the output stream holds unspecified bytes and should be
    /// discarded by the caller.
    pub fn extract(
        &mut self,
        index: usize,
        output: &mut dyn Stream,
        progress: Option<ProgressFn>,
    ) -> Result<()> {
        track(self.extract_inner(index, output, progress))
    }

    fn extract_inner(
        &mut self,
        index: usize,
        output: &mut dyn Stream,
        progress: Option<ProgressFn>,
    ) -> Result<()> {
        let entry = self.entries.get(index).ok_or(Error::NotFound(index))?.clone();
        let comp_len = entry.compressed_size as usize;

        let mut comp = Vec::new();
        comp.try_reserve_exact(comp_len)
            .map_err(|_| Error::Memory("compressed block buffer".into()))?;
        comp.resize(comp_len, 0);

        if self.encrypted {
            let start = entry.data_offset as usize;
            let end = start
                .checked_add(comp_len)
                .filter(|&end| end <= self.mem_buf.len())
                .ok_or_else(|| Error::Format("entry data out of payload bounds".into()))?;
            comp.copy_from_slice(&self.mem_buf[start..end]);
        } else {
            self.stream
                .seek(SeekFrom::Start(MAGIC_LEN + entry.data_offset))?;
            read_exact_from(&mut self.stream, &mut comp)?;
        }

        // `parse_directory` guarantees the codec id is in range; store (or a
        // codec without a decompressor) passes the block through verbatim.
        let codec = CodecId::try_from(entry.codec_id)
            .map_err(|_| Error::Format("codec id out of range".into()))?;
        let plain = match codec_get(codec).and_then(|cv| cv.decompress) {
            None => comp,
            Some(decompress) => {
                let out_len = entry.uncompressed_size as usize;
                let mut plain = Vec::new();
                plain
                    .try_reserve_exact(out_len)
                    .map_err(|_| Error::Memory("decompression buffer".into()))?;
                plain.resize(out_len, 0);
                let produced = decompress(&comp, &mut plain);
                if produced as u64 != entry.uncompressed_size {
                    return Err(Error::Format("decompressed size mismatch".into()));
                }
                plain
            }
        };

        write_all_to(output, &plain)?;

        if let Some(cb) = progress {
            if !cb(entry.uncompressed_size, entry.uncompressed_size) {
                return Err(Error::Io("operation aborted by progress callback".into()));
            }
        }
        Ok(())
    }

    /// Releases the stream.
    pub fn close(mut self) -> Result<()> {
        self.closed = true;
        track(self.stream.close())
    }
}

impl<S: Stream> Drop for ArchiveReader<S> {
    fn drop(&mut self) {
        if !self.closed {
            self.closed = true;
            let _ = self.stream.close();
        }
    }
}
