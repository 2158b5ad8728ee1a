//! # zipio: format-faithful ZIP archive reader/writer
//!
//! `zipio` parses and emits the PKZIP archive structure — local file
//! headers, the central directory, the classic and ZIP64
//! end-of-central-directory records — and drives compression and
//! encryption through a stack of [`Stream`] layers, exposing a sequential
//! cursor over archive entries for both reading and appending.
//!
//! ## Features
//!
//! - **Reading**: EOCD discovery with ZIP64 upgrade and tolerance for
//!   archives whose central-directory offset is off by a constant
//! - **Writing**: streaming entries with data descriptors, automatic
//!   ZIP64 promotion, archive comments
//! - **Appending**: add entries to an existing archive in place
//! - **Compression**: store and deflate built in; bzip2 and LZMA behind
//!   the `bzip2-support` / `lzma-support` features
//! - **Encryption**: WinZip AES (AE-1/AE-2, 128/192/256) and the
//!   traditional PKZIP cipher behind the `encryption` feature (default)
//!
//! ## Reading an archive
//!
//! ```no_run
//! use zipio::{FileStream, OpenMode, ZipArchive};
//!
//! let storage = FileStream::open("archive.zip")?;
//! let mut archive = ZipArchive::open(storage, OpenMode::READ)?;
//!
//! archive.locate_entry("file.txt", false)?;
//! archive.entry_read_open(false, None)?;
//! let data = archive.entry_read_to_end()?;
//! archive.entry_close()?;
//! # Ok::<(), zipio::ZipError>(())
//! ```
//!
//! ## Writing an archive
//!
//! ```no_run
//! use zipio::{FileInfo, FileStream, OpenMode, ZipArchive};
//!
//! let storage = FileStream::create("output.zip")?;
//! let mut archive = ZipArchive::open(storage, OpenMode::WRITE | OpenMode::CREATE)?;
//!
//! let info = FileInfo {
//!     filename: "file.txt".into(),
//!     compression_method: zipio::method::DEFLATE,
//!     ..FileInfo::default()
//! };
//! archive.entry_write_open(&info, 6, false, None)?;
//! archive.entry_write(b"Hello, World!")?;
//! archive.entry_close()?;
//! archive.close()?;
//! # Ok::<(), zipio::ZipError>(())
//! ```

pub mod archive;
pub mod attrib;
#[cfg(feature = "encryption")]
pub mod crypto;
pub mod dostime;
pub mod entry;
pub mod eocd;
pub mod error;
pub mod pathcmp;
pub mod stream;

pub use archive::{OpenMode, ZipArchive};
pub use entry::{flag, method, FileInfo, Zip64Policy};
pub use error::{Result, ZipError};
pub use stream::{FileStream, MemStream, Stream, StreamProp};
