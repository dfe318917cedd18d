//! E8 archive container: per-entry compression through a pluggable codec
//! registry, optional AES-256-CBC encryption of the whole payload, and a
//! stream abstraction that keeps the engine off the file system.

pub mod archive;
pub mod codec;
pub mod crypto;
pub mod engine;
pub mod error;
pub mod ffi;
pub mod stream;

pub use archive::Archive;
pub use codec::{codec_find, codec_get, codecs_init, CodecId};
pub use engine::{ArchiveReader, ArchiveWriter, Entry, DEFAULT_CODEC, DEFAULT_LEVEL};
pub use error::{last_error, Error, ErrorKind, Result};
pub use stream::{FileStream, MemStream, Stream};
