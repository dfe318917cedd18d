//! Codec registry — compress/decompress dispatch for pluggable algorithms.
//!
//! Each codec is a plain record of function references ([`CodecDesc`]);
//! absent functions mean store (pass-through) semantics. The registry is a
//! fixed table indexed by [`CodecId`], populated exactly once by
//! [`codecs_init`]. The archive stores a codec id per entry so extraction
//! knows which decompressor to run.
//!
//! Compression functions return the produced byte count, or 0 on any
//! failure (including "output would not fit"), which the writer treats as
//! "did not shrink" and falls back to store.

use std::io::{Read, Write};
use std::sync::{Once, RwLock};

use crate::error::{Error, Result};

/// Stable on-disk codec identifiers. Part of the format contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CodecId {
    Store = 0,
    Lz4 = 1,
    Lzma = 2,
    Zstd = 3,
}

pub const CODEC_COUNT: usize = 4;

impl TryFrom<u8> for CodecId {
    type Error = Error;

    fn try_from(id: u8) -> Result<Self> {
        match id {
            0 => Ok(CodecId::Store),
            1 => Ok(CodecId::Lz4),
            2 => Ok(CodecId::Lzma),
            3 => Ok(CodecId::Zstd),
            other => Err(Error::InvalidArg(format!("codec id {other} out of range"))),
        }
    }
}

pub type CompressFn = fn(src: &[u8], dst: &mut [u8], level: i32) -> usize;
pub type DecompressFn = fn(src: &[u8], dst: &mut [u8]) -> usize;
pub type BoundFn = fn(src_size: usize) -> usize;

/// Codec descriptor: identifier, display name, and optional behaviors.
pub struct CodecDesc {
    pub id: CodecId,
    pub name: &'static str,
    pub compress: Option<CompressFn>,
    pub decompress: Option<DecompressFn>,
    pub bound: Option<BoundFn>,
}

// ── Registry ─────────────────────────────────────────────────────────────────

static REGISTRY: RwLock<[Option<&'static CodecDesc>; CODEC_COUNT]> =
    RwLock::new([None; CODEC_COUNT]);
static INIT: Once = Once::new();

/// Registers a codec in its identifier's slot, replacing any previous
/// occupant. Called by [`codecs_init`] for the built-ins.
pub fn codec_register(desc: &'static CodecDesc) {
    let mut table = REGISTRY.write().expect("codec registry poisoned");
    table[desc.id as usize] = Some(desc);
}

/// Initializes the built-in codecs (store, lz4, lzma, zstd). Idempotent.
pub fn codecs_init() {
    INIT.call_once(|| {
        codec_register(&STORE_DESC);
        codec_register(&LZ4_DESC);
        codec_register(&LZMA_DESC);
        codec_register(&ZSTD_DESC);
    });
}

/// Codec descriptor for `id`, or `None` if the slot is unregistered.
pub fn codec_get(id: CodecId) -> Option<&'static CodecDesc> {
    codecs_init();
    let table = REGISTRY.read().expect("codec registry poisoned");
    table[id as usize]
}

/// Case-insensitive lookup by display name.
pub fn codec_find(name: &str) -> Option<&'static CodecDesc> {
    codecs_init();
    let table = REGISTRY.read().expect("codec registry poisoned");
    table
        .iter()
        .flatten()
        .find(|desc| desc.name.eq_ignore_ascii_case(name))
        .copied()
}

// ── Store ────────────────────────────────────────────────────────────────────

static STORE_DESC: CodecDesc = CodecDesc {
    id: CodecId::Store,
    name: "store",
    compress: None,
    decompress: None,
    bound: None,
};

// ── LZ4 ──────────────────────────────────────────────────────────────────────

/// LZ4_MAX_INPUT_SIZE; the block API cannot take more in one shot.
const LZ4_MAX_INPUT: usize = 0x7E00_0000;

fn lz4_compress(src: &[u8], dst: &mut [u8], level: i32) -> usize {
    if src.len() > LZ4_MAX_INPUT {
        return 0;
    }
    // Levels 0-1 take the fast path; 2+ the high-compression variant.
    let mode = if level > 1 {
        Some(lz4::block::CompressionMode::HIGHCOMPRESSION(level.min(12)))
    } else {
        None
    };
    match lz4::block::compress(src, mode, false) {
        Ok(out) if out.len() <= dst.len() => {
            dst[..out.len()].copy_from_slice(&out);
            out.len()
        }
        _ => 0,
    }
}

fn lz4_decompress(src: &[u8], dst: &mut [u8]) -> usize {
    if dst.len() > i32::MAX as usize {
        return 0;
    }
    match lz4::block::decompress(src, Some(dst.len() as i32)) {
        Ok(out) if out.len() == dst.len() => {
            dst.copy_from_slice(&out);
            out.len()
        }
        _ => 0,
    }
}

fn lz4_bound(src_size: usize) -> usize {
    if src_size > LZ4_MAX_INPUT {
        return 0;
    }
    // LZ4_COMPRESSBOUND
    src_size + src_size / 255 + 16
}

static LZ4_DESC: CodecDesc = CodecDesc {
    id: CodecId::Lz4,
    name: "lz4",
    compress: Some(lz4_compress),
    decompress: Some(lz4_decompress),
    bound: Some(lz4_bound),
};

// ── LZMA ─────────────────────────────────────────────────────────────────────

/// Decoder dictionary ceiling; hostile headers demanding more are rejected.
const LZMA_MEM_LIMIT: u32 = 128 * 1024 * 1024;

/// Self-describing block header: props(1) | dict_size(4 LE) | unpacked(8 LE).
const LZMA_HEADER_LEN: usize = 13;

fn lzma_compress(src: &[u8], dst: &mut [u8], level: i32) -> usize {
    let preset = if (0..=9).contains(&level) { level as u32 } else { 6 };
    let opts = lzma_rust2::LZMA2Options::with_preset(preset);

    let mut out = Vec::with_capacity(LZMA_HEADER_LEN + src.len() / 2);
    out.push(opts.get_props());
    out.extend_from_slice(&opts.dict_size.to_le_bytes());
    out.extend_from_slice(&(src.len() as u64).to_le_bytes());

    {
        let mut writer = match lzma_rust2::LZMAWriter::new_no_header(&mut out, &opts, false) {
            Ok(w) => w,
            Err(_) => return 0,
        };
        if writer.write_all(src).is_err() {
            return 0;
        }
        if writer.finish().is_err() {
            return 0;
        }
    }

    if out.len() > dst.len() {
        return 0;
    }
    dst[..out.len()].copy_from_slice(&out);
    out.len()
}

fn lzma_decompress(src: &[u8], dst: &mut [u8]) -> usize {
    if src.len() < LZMA_HEADER_LEN {
        return 0;
    }
    let props = src[0];
    let dict_size = u32::from_le_bytes(src[1..5].try_into().unwrap());
    let unpacked = u64::from_le_bytes(src[5..13].try_into().unwrap());
    if dict_size > LZMA_MEM_LIMIT || unpacked != dst.len() as u64 {
        return 0;
    }

    let mut reader = match lzma_rust2::LZMAReader::new_with_props(
        &src[LZMA_HEADER_LEN..],
        unpacked,
        props,
        dict_size,
        None,
    ) {
        Ok(r) => r,
        Err(_) => return 0,
    };

    let mut filled = 0;
    while filled < dst.len() {
        match reader.read(&mut dst[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(_) => return 0,
        }
    }
    if filled == dst.len() {
        filled
    } else {
        0
    }
}

fn lzma_bound(src_size: usize) -> usize {
    src_size + src_size / 3 + 1024 + LZMA_HEADER_LEN
}

static LZMA_DESC: CodecDesc = CodecDesc {
    id: CodecId::Lzma,
    name: "lzma",
    compress: Some(lzma_compress),
    decompress: Some(lzma_decompress),
    bound: Some(lzma_bound),
};

// ── Zstd ─────────────────────────────────────────────────────────────────────

fn zstd_compress(src: &[u8], dst: &mut [u8], level: i32) -> usize {
    let level = if (1..=22).contains(&level) { level } else { 3 };
    match zstd::bulk::compress(src, level) {
        Ok(out) if out.len() <= dst.len() => {
            dst[..out.len()].copy_from_slice(&out);
            out.len()
        }
        _ => 0,
    }
}

fn zstd_decompress(src: &[u8], dst: &mut [u8]) -> usize {
    match zstd::bulk::decompress(src, dst.len()) {
        Ok(out) if out.len() == dst.len() => {
            dst.copy_from_slice(&out);
            out.len()
        }
        _ => 0,
    }
}

fn zstd_bound(src_size: usize) -> usize {
    zstd::zstd_safe::compress_bound(src_size)
}

static ZSTD_DESC: CodecDesc = CodecDesc {
    id: CodecId::Zstd,
    name: "zstd",
    compress: Some(zstd_compress),
    decompress: Some(zstd_decompress),
    bound: Some(zstd_bound),
};
