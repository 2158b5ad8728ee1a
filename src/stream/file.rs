//! File-backed storage stream.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use crate::error::Result;
use crate::stream::{Stream, StreamProp};

/// Storage stream over [`std::fs::File`].
#[derive(Debug)]
pub struct FileStream {
    file: File,
}

impl FileStream {
    /// Open an existing file read-only.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Ok(Self {
            file: File::open(path)?,
        })
    }

    /// Create (or truncate) a file for writing.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        Ok(Self {
            file: File::create(path)?,
        })
    }

    /// Open an existing file for reading and writing, as needed when
    /// appending entries to an archive in place.
    pub fn open_read_write<P: AsRef<Path>>(path: P) -> Result<Self> {
        Ok(Self {
            file: OpenOptions::new().read(true).write(true).open(path)?,
        })
    }

    /// Wrap an already-opened file.
    pub fn from_file(file: File) -> Self {
        Self { file }
    }

    /// Consume the stream, returning the file handle.
    pub fn into_inner(self) -> File {
        self.file
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

    fn tell(&mut self) -> Result<u64> {
        Ok(self.file.stream_position()?)
    }

    fn flush(&mut self) -> Result<()> {
        Ok(self.file.flush()?)
    }

    fn get_prop(&self, prop: StreamProp) -> Option<i64> {
        match prop {
            // Single-file storage: everything lives on disk 0 and there is
            // no split size.
            StreamProp::DiskNumber => Some(0),
            _ => None,
        }
    }
}
