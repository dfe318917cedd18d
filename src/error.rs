//! Crate-wide error type, stable error ordinals, and the thread-local
//! last-error slot consumed by C-style callers.

use std::cell::Cell;
use std::io;
use thiserror::Error;

/// Stable error ordinals shared with the C ABI. Values are part of the
/// format contract and must never be renumbered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ErrorKind {
    Ok = 0,
    Io = 1,
    Format = 2,
    Memory = 3,
    InvalidArg = 4,
    NotFound = 5,
    Unsupported = 6,
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(String),
    #[error("format error: {0}")]
    Format(String),
    #[error("out of memory: {0}")]
    Memory(String),
    #[error("invalid argument: {0}")]
    InvalidArg(String),
    #[error("entry not found: index {0}")]
    NotFound(usize),
    #[error("unsupported: {0}")]
    Unsupported(String),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Io(_) => ErrorKind::Io,
            Error::Format(_) => ErrorKind::Format,
            Error::Memory(_) => ErrorKind::Memory,
            Error::InvalidArg(_) => ErrorKind::InvalidArg,
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::Unsupported(_) => ErrorKind::Unsupported,
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

thread_local! {
    static LAST_ERROR: Cell<ErrorKind> = const { Cell::new(ErrorKind::Ok) };
}

/// Last error kind recorded on this thread. Set by every failing public
/// archive operation; unchanged on success.
pub fn last_error() -> ErrorKind {
    LAST_ERROR.with(|slot| slot.get())
}

pub(crate) fn set_last_error(kind: ErrorKind) {
    LAST_ERROR.with(|slot| slot.set(kind));
}

/// Records the error kind in the thread-local slot and passes the result
/// through unchanged.
pub(crate) fn track<T>(result: Result<T>) -> Result<T> {
    if let Err(ref e) = result {
        set_last_error(e.kind());
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_keep_stable_ordinals() {
        assert_eq!(ErrorKind::Ok as i32, 0);
        assert_eq!(ErrorKind::Io as i32, 1);
        assert_eq!(ErrorKind::Format as i32, 2);
        assert_eq!(ErrorKind::Memory as i32, 3);
        assert_eq!(ErrorKind::InvalidArg as i32, 4);
        assert_eq!(ErrorKind::NotFound as i32, 5);
        assert_eq!(ErrorKind::Unsupported as i32, 6);
    }

    #[test]
    fn track_records_failures_per_thread() {
        set_last_error(ErrorKind::Ok);
        let r: Result<()> = track(Err(Error::Format("bad magic".into())));
        assert!(r.is_err());
        assert_eq!(last_error(), ErrorKind::Format);

        // Success leaves the slot untouched.
        let _ = track(Ok(()));
        assert_eq!(last_error(), ErrorKind::Format);
    }
}
