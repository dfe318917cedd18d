//! Frozen C ABI over the archive engine.
//!
//! Streams cross the boundary as a `(vtable, context)` pair; the context is
//! owned by the caller and passed back to every callback. Read, write, and
//! seek are mandatory; flush and close may be null. `e8_stream_destroy`
//! invokes the close callback exactly once and is safe to call repeatedly
//! or on a zero-initialized stream.
//!
//! Every archive function returns a stable error ordinal (see
//! [`ErrorKind`]) and records it in the thread-local slot read by
//! [`e8_last_error`], so callers that only see a null handle can still
//! retrieve the cause.
//!
//! # Stability contract
//! - Field offsets of `E8StreamVtable` and `E8Stream` are frozen.
//! - Error ordinals are never renumbered.

use std::ffi::{c_char, c_int, c_void, CStr};
use std::io::SeekFrom;
use std::ptr;

use crate::archive::Archive;
use crate::error::{last_error, set_last_error, Error, ErrorKind, Result};
use crate::stream::Stream;

// ── C stream surface ─────────────────────────────────────────────────────────

/// Read up to `size` bytes into `buf`. Returns bytes read, 0 on EOF,
/// negative on error.
pub type E8ReadFn = unsafe extern "C" fn(ctx: *mut c_void, buf: *mut u8, size: usize) -> isize;
/// Write `size` bytes from `buf`. Returns bytes written or negative.
pub type E8WriteFn = unsafe extern "C" fn(ctx: *mut c_void, buf: *const u8, size: usize) -> isize;
/// Seek to `offset` from `origin` (0=set, 1=current, 2=end). Returns the
/// new absolute position or negative.
pub type E8SeekFn = unsafe extern "C" fn(ctx: *mut c_void, offset: i64, origin: c_int) -> i64;
pub type E8FlushFn = unsafe extern "C" fn(ctx: *mut c_void) -> c_int;
pub type E8CloseFn = unsafe extern "C" fn(ctx: *mut c_void) -> c_int;

/// Progress callback: return 0 to continue, non-zero to abort.
pub type E8ProgressFn =
    Option<unsafe extern "C" fn(user: *mut c_void, current: u64, total: u64) -> c_int>;

#[repr(C)]
pub struct E8StreamVtable {
    pub read: Option<E8ReadFn>,
    pub write: Option<E8WriteFn>,
    pub seek: Option<E8SeekFn>,
    pub flush: Option<E8FlushFn>,
    pub close: Option<E8CloseFn>,
}

#[repr(C)]
pub struct E8Stream {
    pub vtable: *const E8StreamVtable,
    pub ctx: *mut c_void,
}

/// Installs `vtable`/`ctx` into `out`. Fails unless read, write, and seek
/// are all provided.
///
/// # Safety
/// `out` must point to writable `E8Stream` storage; `vtable` must either be
/// null or point to a vtable that outlives the stream.
#[no_mangle]
pub unsafe extern "C" fn e8_stream_create(
    out: *mut E8Stream,
    vtable: *const E8StreamVtable,
    ctx: *mut c_void,
) -> c_int {
    if out.is_null() || vtable.is_null() {
        return -1;
    }
    let vt = &*vtable;
    if vt.read.is_none() || vt.write.is_none() || vt.seek.is_none() {
        return -1;
    }
    (*out).vtable = vtable;
    (*out).ctx = ctx;
    0
}

/// Calls the close callback if present and clears the stream. Idempotent;
/// safe on a zero-initialized stream.
///
/// # Safety
/// `stream` must be null or point to a valid `E8Stream`.
#[no_mangle]
pub unsafe extern "C" fn e8_stream_destroy(stream: *mut E8Stream) {
    if stream.is_null() {
        return;
    }
    let s = &mut *stream;
    if !s.vtable.is_null() {
        if let Some(close) = (*s.vtable).close {
            if !s.ctx.is_null() {
                close(s.ctx);
            }
        }
    }
    s.vtable = ptr::null();
    s.ctx = ptr::null_mut();
}

/// # Safety
/// `stream` must be a stream initialized by [`e8_stream_create`]; `buf`
/// must be writable for `size` bytes.
#[no_mangle]
pub unsafe extern "C" fn e8_stream_read(stream: *mut E8Stream, buf: *mut u8, size: usize) -> isize {
    if stream.is_null() || buf.is_null() {
        return -1;
    }
    let s = &*stream;
    match s.vtable.as_ref().and_then(|vt| vt.read) {
        Some(read) => read(s.ctx, buf, size),
        None => -1,
    }
}

/// # Safety
/// `stream` must be a stream initialized by [`e8_stream_create`]; `buf`
/// must be readable for `size` bytes.
#[no_mangle]
pub unsafe extern "C" fn e8_stream_write(
    stream: *mut E8Stream,
    buf: *const u8,
    size: usize,
) -> isize {
    if stream.is_null() || buf.is_null() {
        return -1;
    }
    let s = &*stream;
    match s.vtable.as_ref().and_then(|vt| vt.write) {
        Some(write) => write(s.ctx, buf, size),
        None => -1,
    }
}

/// # Safety
/// `stream` must be a stream initialized by [`e8_stream_create`].
#[no_mangle]
pub unsafe extern "C" fn e8_stream_seek(stream: *mut E8Stream, offset: i64, origin: c_int) -> i64 {
    if stream.is_null() {
        return -1;
    }
    let s = &*stream;
    match s.vtable.as_ref().and_then(|vt| vt.seek) {
        Some(seek) => seek(s.ctx, offset, origin),
        None => -1,
    }
}

/// No-op when the stream provides no flush callback.
///
/// # Safety
/// `stream` must be null or a stream initialized by [`e8_stream_create`].
#[no_mangle]
pub unsafe extern "C" fn e8_stream_flush(stream: *mut E8Stream) -> c_int {
    if stream.is_null() {
        return 0;
    }
    let s = &*stream;
    match s.vtable.as_ref().and_then(|vt| vt.flush) {
        Some(flush) if !s.ctx.is_null() => flush(s.ctx),
        _ => 0,
    }
}

// ── Stream adapter ───────────────────────────────────────────────────────────

/// [`Stream`] over a caller-provided `E8Stream`. The caller keeps ownership
/// of the stream storage and destroys it after closing the archive.
struct RawStream {
    stream: *mut E8Stream,
}

impl Stream for RawStream {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let n = unsafe { e8_stream_read(self.stream, buf.as_mut_ptr(), buf.len()) };
        if n < 0 {
            Err(Error::Io("stream read callback failed".into()))
        } else {
            Ok(n as usize)
        }
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        let n = unsafe { e8_stream_write(self.stream, buf.as_ptr(), buf.len()) };
        if n < 0 {
            Err(Error::Io("stream write callback failed".into()))
        } else {
            Ok(n as usize)
        }
    }

    fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        let (offset, origin) = match pos {
            SeekFrom::Start(o) => (o as i64, 0),
            SeekFrom::Current(o) => (o, 1),
            SeekFrom::End(o) => (o, 2),
        };
        let pos = unsafe { e8_stream_seek(self.stream, offset, origin) };
        if pos < 0 {
            Err(Error::Io("stream seek callback failed".into()))
        } else {
            Ok(pos as u64)
        }
    }

    fn flush(&mut self) -> Result<()> {
        if unsafe { e8_stream_flush(self.stream) } < 0 {
            Err(Error::Io("stream flush callback failed".into()))
        } else {
            Ok(())
        }
    }
}

// ── Archive surface ──────────────────────────────────────────────────────────

/// Opaque archive handle.
pub struct E8Archive {
    inner: Archive<RawStream>,
}

fn opt_str<'a>(ptr: *const c_char) -> std::result::Result<Option<&'a str>, ()> {
    if ptr.is_null() {
        return Ok(None);
    }
    unsafe { CStr::from_ptr(ptr) }.to_str().map(Some).map_err(|_| ())
}

/// Creates a new archive writing to `stream`. A non-null, non-empty
/// `password` produces an encrypted archive. Returns null on error; the
/// cause is available from [`e8_last_error`].
///
/// # Safety
/// `stream` must be a stream initialized by [`e8_stream_create`] that
/// outlives the archive; `password` must be null or a NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn e8_archive_create(
    stream: *mut E8Stream,
    password: *const c_char,
) -> *mut E8Archive {
    if stream.is_null() {
        set_last_error(ErrorKind::InvalidArg);
        return ptr::null_mut();
    }
    let Ok(password) = opt_str(password) else {
        set_last_error(ErrorKind::InvalidArg);
        return ptr::null_mut();
    };
    match Archive::create(RawStream { stream }, password) {
        Ok(inner) => Box::into_raw(Box::new(E8Archive { inner })),
        Err(_) => ptr::null_mut(),
    }
}

/// Opens an existing archive from `stream`. Encrypted archives require the
/// password. Returns null on error.
///
/// # Safety
/// Same contract as [`e8_archive_create`].
#[no_mangle]
pub unsafe extern "C" fn e8_archive_open(
    stream: *mut E8Stream,
    password: *const c_char,
) -> *mut E8Archive {
    if stream.is_null() {
        set_last_error(ErrorKind::InvalidArg);
        return ptr::null_mut();
    }
    let Ok(password) = opt_str(password) else {
        set_last_error(ErrorKind::InvalidArg);
        return ptr::null_mut();
    };
    match Archive::open(RawStream { stream }, password) {
        Ok(inner) => Box::into_raw(Box::new(E8Archive { inner })),
        Err(_) => ptr::null_mut(),
    }
}

/// Finalizes (write mode) and releases the archive. The caller still owns
/// the stream and destroys it separately.
///
/// # Safety
/// `archive` must be null or a handle returned by create/open, not yet
/// closed.
#[no_mangle]
pub unsafe extern "C" fn e8_archive_close(archive: *mut E8Archive) {
    if !archive.is_null() {
        let ar = Box::from_raw(archive);
        let _ = ar.inner.close();
    }
}

fn progress_adapter(
    progress: E8ProgressFn,
    user: *mut c_void,
) -> Option<impl FnMut(u64, u64) -> bool> {
    progress.map(move |cb| move |current: u64, total: u64| unsafe { cb(user, current, total) == 0 })
}

/// Adds an entry named `path` with content drained from `content_stream`.
///
/// # Safety
/// `archive` must be a live handle; `path` a NUL-terminated UTF-8 string;
/// `content_stream` a stream initialized by [`e8_stream_create`].
#[no_mangle]
pub unsafe extern "C" fn e8_archive_add(
    archive: *mut E8Archive,
    path: *const c_char,
    content_stream: *mut E8Stream,
    progress: E8ProgressFn,
    progress_user: *mut c_void,
) -> c_int {
    if archive.is_null() || path.is_null() || content_stream.is_null() {
        set_last_error(ErrorKind::InvalidArg);
        return ErrorKind::InvalidArg as c_int;
    }
    let Ok(Some(path)) = opt_str(path) else {
        set_last_error(ErrorKind::InvalidArg);
        return ErrorKind::InvalidArg as c_int;
    };

    let ar = &mut *archive;
    let mut content = RawStream {
        stream: content_stream,
    };
    let mut cb = progress_adapter(progress, progress_user);
    let cb = cb.as_mut().map(|c| c as &mut dyn FnMut(u64, u64) -> bool);

    match ar.inner.add(path, &mut content, cb) {
        Ok(()) => ErrorKind::Ok as c_int,
        Err(e) => e.kind() as c_int,
    }
}

/// Extracts entry `index` into `output_stream`.
///
/// # Safety
/// `archive` must be a live handle; `output_stream` a stream initialized by
/// [`e8_stream_create`].
#[no_mangle]
pub unsafe extern "C" fn e8_archive_extract(
    archive: *mut E8Archive,
    index: usize,
    output_stream: *mut E8Stream,
    progress: E8ProgressFn,
    progress_user: *mut c_void,
) -> c_int {
    if archive.is_null() || output_stream.is_null() {
        set_last_error(ErrorKind::InvalidArg);
        return ErrorKind::InvalidArg as c_int;
    }
    let ar = &mut *archive;
    let mut output = RawStream {
        stream: output_stream,
    };
    let mut cb = progress_adapter(progress, progress_user);
    let cb = cb.as_mut().map(|c| c as &mut dyn FnMut(u64, u64) -> bool);

    match ar.inner.extract(index, &mut output, cb) {
        Ok(()) => ErrorKind::Ok as c_int,
        Err(e) => e.kind() as c_int,
    }
}

/// Number of entries, or 0 for a null handle.
///
/// # Safety
/// `archive` must be null or a live handle.
#[no_mangle]
pub unsafe extern "C" fn e8_archive_count(archive: *mut E8Archive) -> usize {
    if archive.is_null() {
        return 0;
    }
    (*archive).inner.count()
}

/// Copies entry metadata at `index`. `path` (when non-null) receives at
/// most `path_size - 1` bytes and is always NUL-terminated;
/// `uncompressed_size` (when non-null) receives the entry's original size.
///
/// # Safety
/// `archive` must be a live handle; `path` must be null or writable for
/// `path_size` bytes; `uncompressed_size` must be null or writable.
#[no_mangle]
pub unsafe extern "C" fn e8_archive_entry(
    archive: *mut E8Archive,
    index: usize,
    path: *mut c_char,
    path_size: usize,
    uncompressed_size: *mut u64,
) -> c_int {
    if archive.is_null() {
        set_last_error(ErrorKind::InvalidArg);
        return ErrorKind::InvalidArg as c_int;
    }
    match (*archive).inner.entry(index) {
        Ok(entry) => {
            if !uncompressed_size.is_null() {
                *uncompressed_size = entry.uncompressed_size;
            }
            if !path.is_null() && path_size > 0 {
                let bytes = entry.path.as_bytes();
                let len = bytes.len().min(path_size - 1);
                ptr::copy_nonoverlapping(bytes.as_ptr(), path as *mut u8, len);
                *path.add(len) = 0;
            }
            ErrorKind::Ok as c_int
        }
        Err(e) => e.kind() as c_int,
    }
}

/// Last error ordinal recorded on the calling thread.
#[no_mangle]
pub extern "C" fn e8_last_error() -> c_int {
    last_error() as c_int
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::CString;

    // Memory-backed C stream used to drive the ABI end to end.
    struct MemCtx {
        data: Vec<u8>,
        pos: usize,
        closed: u32,
    }

    unsafe extern "C" fn mem_read(ctx: *mut c_void, buf: *mut u8, size: usize) -> isize {
        let m = &mut *(ctx as *mut MemCtx);
        let n = size.min(m.data.len().saturating_sub(m.pos));
        ptr::copy_nonoverlapping(m.data.as_ptr().add(m.pos), buf, n);
        m.pos += n;
        n as isize
    }

    unsafe extern "C" fn mem_write(ctx: *mut c_void, buf: *const u8, size: usize) -> isize {
        let m = &mut *(ctx as *mut MemCtx);
        if m.pos + size > m.data.len() {
            m.data.resize(m.pos + size, 0);
        }
        ptr::copy_nonoverlapping(buf, m.data.as_mut_ptr().add(m.pos), size);
        m.pos += size;
        size as isize
    }

    unsafe extern "C" fn mem_seek(ctx: *mut c_void, offset: i64, origin: c_int) -> i64 {
        let m = &mut *(ctx as *mut MemCtx);
        let base = match origin {
            0 => 0i64,
            1 => m.pos as i64,
            2 => m.data.len() as i64,
            _ => return -1,
        };
        let target = base + offset;
        if target < 0 {
            return -1;
        }
        m.pos = target as usize;
        target
    }

    unsafe extern "C" fn mem_close(ctx: *mut c_void) -> c_int {
        (*(ctx as *mut MemCtx)).closed += 1;
        0
    }

    static VTABLE: E8StreamVtable = E8StreamVtable {
        read: Some(mem_read),
        write: Some(mem_write),
        seek: Some(mem_seek),
        flush: None,
        close: Some(mem_close),
    };

    fn make_stream(ctx: &mut MemCtx) -> E8Stream {
        let mut stream = E8Stream {
            vtable: ptr::null(),
            ctx: ptr::null_mut(),
        };
        let rc = unsafe {
            e8_stream_create(&mut stream, &VTABLE, ctx as *mut MemCtx as *mut c_void)
        };
        assert_eq!(rc, 0);
        stream
    }

    #[test]
    fn stream_create_requires_mandatory_callbacks() {
        static BAD: E8StreamVtable = E8StreamVtable {
            read: Some(mem_read),
            write: None,
            seek: Some(mem_seek),
            flush: None,
            close: None,
        };
        let mut stream = E8Stream {
            vtable: ptr::null(),
            ctx: ptr::null_mut(),
        };
        assert_eq!(
            unsafe { e8_stream_create(&mut stream, &BAD, ptr::null_mut()) },
            -1
        );
    }

    #[test]
    fn stream_destroy_is_idempotent() {
        let mut ctx = MemCtx {
            data: Vec::new(),
            pos: 0,
            closed: 0,
        };
        let mut stream = make_stream(&mut ctx);
        unsafe {
            e8_stream_destroy(&mut stream);
            e8_stream_destroy(&mut stream);
            e8_stream_destroy(ptr::null_mut());
        }
        assert_eq!(ctx.closed, 1);
        assert!(stream.vtable.is_null());
    }

    #[test]
    fn c_abi_round_trip() {
        let mut archive_ctx = MemCtx {
            data: Vec::new(),
            pos: 0,
            closed: 0,
        };
        let mut archive_stream = make_stream(&mut archive_ctx);

        // Write two entries through the C surface.
        let ar = unsafe { e8_archive_create(&mut archive_stream, ptr::null()) };
        assert!(!ar.is_null());

        for (name, content) in [("a.txt", b"alpha".as_slice()), ("b.txt", b"beta".as_slice())] {
            let mut ctx = MemCtx {
                data: content.to_vec(),
                pos: 0,
                closed: 0,
            };
            let mut content_stream = make_stream(&mut ctx);
            let path = CString::new(name).unwrap();
            let rc = unsafe {
                e8_archive_add(ar, path.as_ptr(), &mut content_stream, None, ptr::null_mut())
            };
            assert_eq!(rc, 0);
        }
        unsafe { e8_archive_close(ar) };

        // Reopen the produced bytes and read everything back.
        archive_ctx.pos = 0;
        let mut archive_stream = make_stream(&mut archive_ctx);
        let ar = unsafe { e8_archive_open(&mut archive_stream, ptr::null()) };
        assert!(!ar.is_null());
        assert_eq!(unsafe { e8_archive_count(ar) }, 2);

        let mut path_buf = [0 as c_char; 64];
        let mut size = 0u64;
        let rc = unsafe {
            e8_archive_entry(ar, 0, path_buf.as_mut_ptr(), path_buf.len(), &mut size)
        };
        assert_eq!(rc, 0);
        assert_eq!(size, 5);
        let name = unsafe { CStr::from_ptr(path_buf.as_ptr()) };
        assert_eq!(name.to_str().unwrap(), "a.txt");

        let mut out_ctx = MemCtx {
            data: Vec::new(),
            pos: 0,
            closed: 0,
        };
        let mut out_stream = make_stream(&mut out_ctx);
        let rc = unsafe { e8_archive_extract(ar, 1, &mut out_stream, None, ptr::null_mut()) };
        assert_eq!(rc, 0);
        assert_eq!(out_ctx.data, b"beta");

        // Out-of-range index reports not-found.
        let rc = unsafe { e8_archive_extract(ar, 9, &mut out_stream, None, ptr::null_mut()) };
        assert_eq!(rc, ErrorKind::NotFound as c_int);
        assert_eq!(e8_last_error(), ErrorKind::NotFound as c_int);

        unsafe { e8_archive_close(ar) };
    }

    #[test]
    fn entry_truncates_long_paths() {
        let mut archive_ctx = MemCtx {
            data: Vec::new(),
            pos: 0,
            closed: 0,
        };
        let mut archive_stream = make_stream(&mut archive_ctx);
        let ar = unsafe { e8_archive_create(&mut archive_stream, ptr::null()) };

        let mut ctx = MemCtx {
            data: b"x".to_vec(),
            pos: 0,
            closed: 0,
        };
        let mut content_stream = make_stream(&mut ctx);
        let path = CString::new("a-rather-long-entry-name.bin").unwrap();
        unsafe {
            e8_archive_add(ar, path.as_ptr(), &mut content_stream, None, ptr::null_mut());
            e8_archive_close(ar);
        }

        archive_ctx.pos = 0;
        let mut archive_stream = make_stream(&mut archive_ctx);
        let ar = unsafe { e8_archive_open(&mut archive_stream, ptr::null()) };

        let mut path_buf = [0x7F as c_char; 8];
        let rc = unsafe {
            e8_archive_entry(ar, 0, path_buf.as_mut_ptr(), path_buf.len(), ptr::null_mut())
        };
        assert_eq!(rc, 0);
        let name = unsafe { CStr::from_ptr(path_buf.as_ptr()) };
        assert_eq!(name.to_str().unwrap(), "a-rathe");

        unsafe { e8_archive_close(ar) };
    }

    #[test]
    fn null_handles_report_invalid_arg() {
        let rc = unsafe {
            e8_archive_add(
                ptr::null_mut(),
                ptr::null(),
                ptr::null_mut(),
                None,
                ptr::null_mut(),
            )
        };
        assert_eq!(rc, ErrorKind::InvalidArg as c_int);
        assert_eq!(e8_last_error(), ErrorKind::InvalidArg as c_int);
        assert_eq!(unsafe { e8_archive_count(ptr::null_mut()) }, 0);
    }
}
