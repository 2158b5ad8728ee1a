//! Archive handle: open modes, central-directory cursor and the per-entry
//! stream pipeline.
//!
//! The handle owns the storage stream. While an entry is open the storage
//! is threaded through the entry pipeline (CRC tap → compressor →
//! encryptor → storage) and handed back when the entry closes, so at most
//! one entry is ever open. In any write path central-directory records are
//! staged in an in-memory stream and flushed, followed by the EOCD chain,
//! when the archive closes.

use std::io::SeekFrom;
use std::ops::BitOr;

use tracing::{debug, trace};

#[cfg(feature = "encryption")]
use crate::crypto::{self, AesState, AesStream, ZipCryptoKeys, ZipCryptoStream};
#[cfg(feature = "encryption")]
use crate::dostime;
use crate::entry::{self, flag, method, FileInfo, Zip64Policy, DATA_DESCRIPTOR_SIGNATURE};
use crate::eocd::{self, EmitParams};
use crate::error::{Result, ZipError};
use crate::pathcmp;
#[cfg(feature = "bzip2-support")]
use crate::stream::bzip::BzipStream;
use crate::stream::deflate::DeflateStream;
#[cfg(feature = "lzma-support")]
use crate::stream::lzma::{self, LzmaStream};
use crate::stream::{copy_stream, CrcStream, MemStream, RawStream, Stream, StreamProp};

/// Bit-composable archive open modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenMode(u32);

impl OpenMode {
    pub const READ: OpenMode = OpenMode(0x01);
    pub const WRITE: OpenMode = OpenMode(0x02);
    pub const APPEND: OpenMode = OpenMode(0x04);
    pub const CREATE: OpenMode = OpenMode(0x08);

    pub fn contains(self, other: OpenMode) -> bool {
        self.0 & other.0 == other.0
    }

    fn writable(self) -> bool {
        self.0 & (Self::WRITE.0 | Self::APPEND.0 | Self::CREATE.0) != 0
    }
}

impl BitOr for OpenMode {
    type Output = OpenMode;

    fn bitor(self, rhs: OpenMode) -> OpenMode {
        OpenMode(self.0 | rhs.0)
    }
}

/// Encryption layer of the entry pipeline.
enum CryptStream<S: Stream> {
    Plain(S),
    #[cfg(feature = "encryption")]
    ZipCrypto(ZipCryptoStream<S>),
    #[cfg(feature = "encryption")]
    Aes(AesStream<S>),
}

/// Derived cipher state prepared while the archive still owns the storage
/// stream; wrapped into a layer once the header bytes are settled.
#[cfg(feature = "encryption")]
enum CryptPrep {
    ZipCrypto(ZipCryptoKeys),
    /// State plus, on the read side, the ciphertext payload length.
    Aes(AesState, u64),
}

impl<S: Stream> CryptStream<S> {
    fn finish_writer(self) -> Result<S> {
        match self {
            CryptStream::Plain(s) => Ok(s),
            #[cfg(feature = "encryption")]
            CryptStream::ZipCrypto(c) => c.finish(),
            #[cfg(feature = "encryption")]
            CryptStream::Aes(a) => a.finish_writer(),
        }
    }

    fn finish_reader(self, fully_consumed: bool) -> Result<S> {
        match self {
            CryptStream::Plain(s) => Ok(s),
            #[cfg(feature = "encryption")]
            CryptStream::ZipCrypto(c) => c.finish(),
            #[cfg(feature = "encryption")]
            CryptStream::Aes(a) => a.finish_reader(fully_consumed),
        }
    }

    /// Abandon the layer, returning the storage stream untouched.
    fn into_base(self) -> S {
        match self {
            CryptStream::Plain(s) => s,
            #[cfg(feature = "encryption")]
            CryptStream::ZipCrypto(c) => c.into_inner(),
            #[cfg(feature = "encryption")]
            CryptStream::Aes(a) => a.into_inner(),
        }
    }
}

impl<S: Stream> Stream for CryptStream<S> {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        match self {
            CryptStream::Plain(s) => s.read(buf),
            #[cfg(feature = "encryption")]
            CryptStream::ZipCrypto(c) => c.read(buf),
            #[cfg(feature = "encryption")]
            CryptStream::Aes(a) => a.read(buf),
        }
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        match self {
            CryptStream::Plain(s) => s.write(buf),
            #[cfg(feature = "encryption")]
            CryptStream::ZipCrypto(c) => c.write(buf),
            #[cfg(feature = "encryption")]
            CryptStream::Aes(a) => a.write(buf),
        }
    }

    fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        match self {
            CryptStream::Plain(s) => s.seek(pos),
            #[cfg(feature = "encryption")]
            CryptStream::ZipCrypto(c) => c.seek(pos),
            #[cfg(feature = "encryption")]
            CryptStream::Aes(a) => a.seek(pos),
        }
    }

    fn tell(&mut self) -> Result<u64> {
        match self {
            CryptStream::Plain(s) => s.tell(),
            #[cfg(feature = "encryption")]
            CryptStream::ZipCrypto(c) => c.tell(),
            #[cfg(feature = "encryption")]
            CryptStream::Aes(a) => a.tell(),
        }
    }

    fn flush(&mut self) -> Result<()> {
        match self {
            CryptStream::Plain(s) => s.flush(),
            #[cfg(feature = "encryption")]
            CryptStream::ZipCrypto(c) => c.flush(),
            #[cfg(feature = "encryption")]
            CryptStream::Aes(a) => a.flush(),
        }
    }

    fn get_prop(&self, prop: StreamProp) -> Option<i64> {
        match self {
            // A missing layer has no header or footer.
            CryptStream::Plain(s) => match prop {
                StreamProp::HeaderSize | StreamProp::FooterSize => Some(0),
                _ => s.get_prop(prop),
            },
            #[cfg(feature = "encryption")]
            CryptStream::ZipCrypto(c) => c.get_prop(prop),
            #[cfg(feature = "encryption")]
            CryptStream::Aes(a) => a.get_prop(prop),
        }
    }
}

/// Compression layer of the entry pipeline.
enum CompressStream<S: Stream> {
    Raw(RawStream<CryptStream<S>>),
    Deflate(DeflateStream<CryptStream<S>>),
    #[cfg(feature = "bzip2-support")]
    Bzip2(BzipStream<CryptStream<S>>),
    #[cfg(feature = "lzma-support")]
    Lzma(LzmaStream<CryptStream<S>>),
}

impl<S: Stream> CompressStream<S> {
    /// Flush (write direction) and unwrap to the encryption layer.
    fn finish(self) -> Result<CryptStream<S>> {
        match self {
            CompressStream::Raw(r) => Ok(r.into_inner()),
            CompressStream::Deflate(d) => d.finish().map(|(s, _, _)| s),
            #[cfg(feature = "bzip2-support")]
            CompressStream::Bzip2(b) => b.finish().map(|(s, _, _)| s),
            #[cfg(feature = "lzma-support")]
            CompressStream::Lzma(l) => l.finish().map(|(s, _, _)| s),
        }
    }
}

impl<S: Stream> Stream for CompressStream<S> {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        match self {
            CompressStream::Raw(r) => r.read(buf),
            CompressStream::Deflate(d) => d.read(buf),
            #[cfg(feature = "bzip2-support")]
            CompressStream::Bzip2(b) => b.read(buf),
            #[cfg(feature = "lzma-support")]
            CompressStream::Lzma(l) => l.read(buf),
        }
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        match self {
            CompressStream::Raw(r) => r.write(buf),
            CompressStream::Deflate(d) => d.write(buf),
            #[cfg(feature = "bzip2-support")]
            CompressStream::Bzip2(b) => b.write(buf),
            #[cfg(feature = "lzma-support")]
            CompressStream::Lzma(l) => l.write(buf),
        }
    }

    fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        match self {
            CompressStream::Raw(r) => r.seek(pos),
            CompressStream::Deflate(d) => d.seek(pos),
            #[cfg(feature = "bzip2-support")]
            CompressStream::Bzip2(b) => b.seek(pos),
            #[cfg(feature = "lzma-support")]
            CompressStream::Lzma(l) => l.seek(pos),
        }
    }

    fn tell(&mut self) -> Result<u64> {
        match self {
            CompressStream::Raw(r) => r.tell(),
            CompressStream::Deflate(d) => d.tell(),
            #[cfg(feature = "bzip2-support")]
            CompressStream::Bzip2(b) => b.tell(),
            #[cfg(feature = "lzma-support")]
            CompressStream::Lzma(l) => l.tell(),
        }
    }

    fn flush(&mut self) -> Result<()> {
        match self {
            CompressStream::Raw(r) => r.flush(),
            CompressStream::Deflate(d) => d.flush(),
            #[cfg(feature = "bzip2-support")]
            CompressStream::Bzip2(b) => b.flush(),
            #[cfg(feature = "lzma-support")]
            CompressStream::Lzma(l) => l.flush(),
        }
    }
}

/// A live entry payload pipeline.
struct EntryPipeline<S: Stream> {
    stream: CrcStream<CompressStream<S>>,
    writing: bool,
    /// Storage position where the entry's stored bytes begin.
    data_start: u64,
}

/// Archive handle over a storage stream.
///
/// All operations are synchronous and the handle is single-threaded;
/// serialising access is the caller's responsibility.
pub struct ZipArchive<S: Stream> {
    storage: Option<S>,
    mode: OpenMode,
    /// Central-directory staging buffer (write/append paths).
    cd_mem: Option<MemStream>,
    cd_start_pos: u64,
    cd_current_pos: u64,
    cd_size: u64,
    disk_offset_shift: u64,
    disk_number_with_cd: u32,
    number_entry: u64,
    version_madeby: u16,
    comment: String,
    file_info: FileInfo,
    local_file_info: FileInfo,
    entry_scanned: bool,
    entry_raw: bool,
    entry_zip64: bool,
    entry_offset: u64,
    entry_record_size: u64,
    /// Where the next local header goes (write paths).
    next_write_pos: u64,
    pipeline: Option<EntryPipeline<S>>,
}

impl<S: Stream> ZipArchive<S> {
    /// Open an archive over `storage`.
    ///
    /// Without [`OpenMode::CREATE`], EOCD discovery runs; in any write path
    /// a non-empty central directory is staged in memory and the storage
    /// repositioned so new entries overwrite it.
    pub fn open(mut storage: S, mode: OpenMode) -> Result<Self> {
        if !mode.contains(OpenMode::READ) && !mode.writable() {
            return Err(ZipError::Param("open mode selects neither read nor write"));
        }

        let mut archive = Self {
            storage: None,
            mode,
            cd_mem: mode.writable().then(MemStream::new),
            cd_start_pos: 0,
            cd_current_pos: 0,
            cd_size: 0,
            disk_offset_shift: 0,
            disk_number_with_cd: 0,
            number_entry: 0,
            version_madeby: entry::DEFAULT_VERSION_MADEBY,
            comment: String::new(),
            file_info: FileInfo::default(),
            local_file_info: FileInfo::default(),
            entry_scanned: false,
            entry_raw: false,
            entry_zip64: false,
            entry_offset: 0,
            entry_record_size: 0,
            next_write_pos: 0,
            pipeline: None,
        };

        if mode.contains(OpenMode::CREATE) {
            archive.next_write_pos = storage.tell()?;
        } else {
            let dir = eocd::discover(&mut storage)?;
            archive.number_entry = dir.entries;
            archive.disk_offset_shift = dir.offset_shift;
            archive.disk_number_with_cd = dir.disk_with_cd;
            archive.comment = dir.comment;
            archive.cd_size = dir.size;
            if dir.version_madeby != 0 {
                archive.version_madeby = dir.version_madeby;
            }
            let cd_pos = dir.offset + dir.offset_shift;

            if mode.writable() {
                // Stage the existing central directory; new entries will
                // overwrite it in place.
                let cd_mem = archive.cd_mem.as_mut().expect("staging buffer");
                if dir.size > 0 {
                    storage.seek(SeekFrom::Start(cd_pos))?;
                    copy_stream(cd_mem, &mut storage, dir.size)?;
                    archive.next_write_pos = cd_pos;
                } else {
                    archive.next_write_pos = storage.seek(SeekFrom::End(0))?;
                }
                archive.cd_start_pos = 0;
                archive.cd_current_pos = 0;
            } else {
                archive.cd_start_pos = cd_pos;
                archive.cd_current_pos = cd_pos;
            }
            debug!(
                entries = dir.entries,
                cd_pos,
                shift = dir.offset_shift,
                "opened archive"
            );
        }

        archive.storage = Some(storage);
        Ok(archive)
    }

    /// Number of entries the central directory accounts for.
    pub fn number_entries(&self) -> u64 {
        self.number_entry
    }

    /// Archive-level comment, if any.
    pub fn comment(&self) -> Option<&str> {
        if self.comment.is_empty() {
            None
        } else {
            Some(&self.comment)
        }
    }

    /// Set the archive comment emitted on close.
    pub fn set_comment(&mut self, comment: &str) -> Result<()> {
        if comment.len() > u16::MAX as usize {
            return Err(ZipError::Param("archive comment too long"));
        }
        self.comment = comment.to_string();
        Ok(())
    }

    pub fn version_madeby(&self) -> u16 {
        self.version_madeby
    }

    pub fn set_version_madeby(&mut self, version_madeby: u16) {
        self.version_madeby = version_madeby;
    }

    /// Correction applied to stored offsets, nonzero only when discovery
    /// detected a shifted central directory.
    pub fn disk_offset_shift(&self) -> u64 {
        self.disk_offset_shift
    }

    /// Disk the central directory lives on (always 0 for single-file
    /// storage).
    pub fn disk_number_with_cd(&self) -> u32 {
        self.disk_number_with_cd
    }

    /// Metadata of the current (scanned or just-written) entry.
    pub fn entry_info(&self) -> Result<&FileInfo> {
        if !self.entry_scanned {
            return Err(ZipError::Param("no entry has been scanned"));
        }
        Ok(&self.file_info)
    }

    /// Local-header view of the entry most recently opened for reading.
    pub fn entry_local_info(&self) -> Result<&FileInfo> {
        if self.pipeline.is_none() {
            return Err(ZipError::Param("no entry is open"));
        }
        Ok(&self.local_file_info)
    }

    /// True when the current entry describes a directory.
    pub fn entry_is_dir(&self) -> Result<bool> {
        Ok(self.entry_info()?.is_dir())
    }

    pub fn entry_is_open(&self) -> bool {
        self.pipeline.is_some()
    }

    /// Cursor position of the current central-directory record.
    pub fn entry_pos(&self) -> u64 {
        self.cd_current_pos
    }

    fn require_entry_closed(&self) -> Result<()> {
        if self.pipeline.is_some() {
            return Err(ZipError::Param("an entry is still open"));
        }
        Ok(())
    }

    fn scan_at(&mut self, pos: u64) -> Result<()> {
        self.require_entry_closed()?;
        self.entry_scanned = false;
        if pos < self.cd_start_pos || pos > self.cd_start_pos + self.cd_size {
            return Err(ZipError::Param("cursor outside the central directory"));
        }
        self.cd_current_pos = pos;
        if pos == self.cd_start_pos + self.cd_size {
            return Err(ZipError::EndOfList);
        }

        let (info, record_size) = match self.cd_mem.as_mut() {
            Some(cd) => {
                cd.seek(SeekFrom::Start(pos))?;
                entry::read_header(cd, false)?
            }
            None => {
                let storage = self
                    .storage
                    .as_mut()
                    .ok_or(ZipError::Internal("storage missing"))?;
                storage.seek(SeekFrom::Start(pos))?;
                entry::read_header(storage, false)?
            }
        };
        self.file_info = info;
        self.entry_record_size = record_size;
        self.entry_scanned = true;
        Ok(())
    }

    /// Move the cursor to the first entry and scan its header.
    pub fn goto_first_entry(&mut self) -> Result<()> {
        self.scan_at(self.cd_start_pos)
    }

    /// Advance the cursor past the current record and scan the next one.
    pub fn goto_next_entry(&mut self) -> Result<()> {
        if !self.entry_scanned {
            return Err(ZipError::Param("no entry has been scanned"));
        }
        self.scan_at(self.cd_current_pos + self.entry_record_size)
    }

    /// Reseat the cursor on a record position previously obtained from
    /// [`entry_pos`](Self::entry_pos).
    pub fn goto_entry(&mut self, pos: u64) -> Result<()> {
        self.scan_at(pos)
    }

    /// Linear search for `name`. The current entry is checked first;
    /// otherwise the scan restarts from the first entry.
    pub fn locate_entry(&mut self, name: &str, ignore_case: bool) -> Result<()> {
        if self.entry_scanned && pathcmp::equal(&self.file_info.filename, name, ignore_case) {
            return Ok(());
        }
        let mut step = self.goto_first_entry();
        loop {
            match step {
                Ok(()) => {
                    if pathcmp::equal(&self.file_info.filename, name, ignore_case) {
                        return Ok(());
                    }
                }
                Err(ZipError::EndOfList) => return Err(ZipError::EntryNotFound(name.to_string())),
                Err(err) => return Err(err),
            }
            step = self.goto_next_entry();
        }
    }

    /// Scan from the first entry until `matches` accepts one.
    /// Terminates with [`ZipError::EndOfList`] when no entry matches.
    pub fn locate_first_entry<F>(&mut self, mut matches: F) -> Result<()>
    where
        F: FnMut(&FileInfo) -> bool,
    {
        self.goto_first_entry()?;
        loop {
            if matches(&self.file_info) {
                return Ok(());
            }
            self.goto_next_entry()?;
        }
    }

    /// Continue a [`locate_first_entry`](Self::locate_first_entry) scan.
    pub fn locate_next_entry<F>(&mut self, mut matches: F) -> Result<()>
    where
        F: FnMut(&FileInfo) -> bool,
    {
        loop {
            self.goto_next_entry()?;
            if matches(&self.file_info) {
                return Ok(());
            }
        }
    }

    fn take_storage(&mut self) -> Result<S> {
        self.storage
            .take()
            .ok_or(ZipError::Internal("storage missing"))
    }

    /// Open the current entry's payload for reading.
    ///
    /// `raw` bypasses decompression and decryption: the stored bytes come
    /// out verbatim. Reading a non-raw encrypted entry requires the
    /// password.
    pub fn entry_read_open(&mut self, raw: bool, password: Option<&str>) -> Result<()> {
        self.require_entry_closed()?;
        if !self.entry_scanned {
            return Err(ZipError::Param("no entry has been scanned"));
        }
        #[cfg(not(feature = "encryption"))]
        if password.is_some() {
            return Err(ZipError::Param("encryption support not compiled in"));
        }
        let info = self.file_info.clone();
        if info.is_encrypted() && !raw && password.is_none() {
            return Err(ZipError::Param("password required for encrypted entry"));
        }
        if !raw {
            check_method_support(info.compression_method)?;
        }

        let storage = self
            .storage
            .as_mut()
            .ok_or(ZipError::Internal("storage missing"))?;
        storage.seek(SeekFrom::Start(info.disk_offset + self.disk_offset_shift))?;
        let (local_info, _) = entry::read_header(storage, true)?;
        self.local_file_info = local_info;

        // Settle the cipher header while the storage is still owned by the
        // handle, so a wrong password leaves it fully usable.
        let use_crypt = info.is_encrypted() && !raw && password.is_some();
        #[cfg(feature = "encryption")]
        let crypt_prep: Option<CryptPrep> = if use_crypt {
            let pw = password.unwrap_or_default().as_bytes();
            if info.aes_version != 0 {
                let salt_len = crypto::aes_salt_len(info.aes_strength)
                    .ok_or(ZipError::Format("invalid AES strength"))?;
                let overhead = crypto::aes_overhead(info.aes_strength)
                    .ok_or(ZipError::Format("invalid AES strength"))?;
                if info.compressed_size < overhead {
                    return Err(ZipError::Format("encrypted payload shorter than AES overhead"));
                }
                let mut salt = vec![0u8; salt_len];
                storage.read_exact(&mut salt)?;
                let mut verify = [0u8; crypto::AES_VERIFY_SIZE];
                storage.read_exact(&mut verify)?;
                let state = AesState::for_reader(pw, info.aes_strength, &salt, verify)?;
                Some(CryptPrep::Aes(state, info.compressed_size - overhead))
            } else {
                if info.compressed_size < crypto::ZIPCRYPTO_HEADER_SIZE as u64 {
                    return Err(ZipError::Format("encrypted payload shorter than its header"));
                }
                let mut keys = ZipCryptoKeys::new(pw);
                let mut header = [0u8; crypto::ZIPCRYPTO_HEADER_SIZE];
                storage.read_exact(&mut header)?;
                keys.check_header(header, zipcrypto_verifier(&info))?;
                Some(CryptPrep::ZipCrypto(keys))
            }
        } else {
            None
        };
        #[cfg(not(feature = "encryption"))]
        let _ = use_crypt;

        let storage = self.take_storage()?;
        #[cfg(feature = "encryption")]
        let crypt = match crypt_prep {
            None => CryptStream::Plain(storage),
            Some(CryptPrep::Aes(state, data_len)) => {
                CryptStream::Aes(AesStream::reader(storage, state, data_len))
            }
            Some(CryptPrep::ZipCrypto(keys)) => {
                CryptStream::ZipCrypto(ZipCryptoStream::new(storage, keys))
            }
        };
        #[cfg(not(feature = "encryption"))]
        let crypt = CryptStream::Plain(storage);

        // The encryption layer reports how much of the stored payload is
        // its own framing; the compressor gets the remainder.
        let header = crypt.get_prop(StreamProp::HeaderSize).unwrap_or(0) as u64;
        let footer = crypt.get_prop(StreamProp::FooterSize).unwrap_or(0) as u64;
        let data_budget = info
            .compressed_size
            .saturating_sub(header)
            .saturating_sub(footer);

        let compress = if raw || info.compression_method == method::STORE {
            CompressStream::Raw(RawStream::with_limit(crypt, data_budget))
        } else {
            match info.compression_method {
                method::DEFLATE => {
                    CompressStream::Deflate(DeflateStream::new_reader(crypt, data_budget))
                }
                #[cfg(feature = "bzip2-support")]
                method::BZIP2 => CompressStream::Bzip2(BzipStream::new_reader(crypt, data_budget)),
                #[cfg(feature = "lzma-support")]
                method::LZMA => {
                    let mut crypt = crypt;
                    if data_budget < lzma::ZIP_HEADER_SIZE {
                        self.storage = Some(crypt.into_base());
                        return Err(ZipError::Format("lzma payload shorter than its header"));
                    }
                    let props = match lzma::read_zip_header(&mut crypt) {
                        Ok(props) => props,
                        Err(err) => {
                            self.storage = Some(crypt.into_base());
                            return Err(err);
                        }
                    };
                    let max_out = if info.flag & flag::LZMA_EOS_MARKER == 0 {
                        Some(info.uncompressed_size)
                    } else {
                        None
                    };
                    match LzmaStream::new_reader(
                        crypt,
                        props,
                        data_budget - lzma::ZIP_HEADER_SIZE,
                        max_out,
                    ) {
                        Ok(reader) => CompressStream::Lzma(reader),
                        Err((crypt, err)) => {
                            self.storage = Some(crypt.into_base());
                            return Err(err);
                        }
                    }
                }
                other => {
                    self.storage = Some(crypt.into_base());
                    return Err(ZipError::UnsupportedMethod(other));
                }
            }
        };

        self.pipeline = Some(EntryPipeline {
            stream: CrcStream::new(compress),
            writing: false,
            data_start: 0,
        });
        self.entry_raw = raw;
        trace!(name = %info.filename, raw, "entry opened for read");
        Ok(())
    }

    /// Open a new entry for writing.
    ///
    /// The local header is emitted immediately with the data-descriptor
    /// flag set; sizes and CRC follow the payload in the descriptor. A
    /// `level` of zero, or a directory entry, stores the payload.
    pub fn entry_write_open(
        &mut self,
        info: &FileInfo,
        level: u32,
        raw: bool,
        password: Option<&str>,
    ) -> Result<()> {
        self.require_entry_closed()?;
        if !self.mode.writable() {
            return Err(ZipError::Param("archive is not open for writing"));
        }
        if info.filename.is_empty() {
            return Err(ZipError::Param("entry filename is empty"));
        }
        #[cfg(not(feature = "encryption"))]
        if password.is_some() {
            return Err(ZipError::Param("encryption support not compiled in"));
        }

        let mut info = info.clone();
        if info.version_madeby == 0 {
            info.version_madeby = self.version_madeby;
        }
        if info.flag & flag::ENCRYPTED != 0 && password.is_none() {
            return Err(ZipError::Param("password required for encrypted entry"));
        }
        if password.is_some() {
            info.flag |= flag::ENCRYPTED;
        }
        info.flag |= flag::DATA_DESCRIPTOR;

        if !raw {
            if level == 0 || info.is_dir() {
                info.compression_method = method::STORE;
            }
            check_method_support(info.compression_method)?;
            info.flag &= !flag::DEFLATE_SUPER_FAST;
            if info.compression_method == method::DEFLATE {
                match level {
                    8 | 9 => info.flag |= flag::DEFLATE_MAX,
                    2 => info.flag |= flag::DEFLATE_FAST,
                    1 => info.flag |= flag::DEFLATE_SUPER_FAST,
                    _ => {}
                }
            }
            if info.compression_method == method::LZMA {
                info.flag |= flag::LZMA_EOS_MARKER;
            }
        }
        #[cfg(feature = "encryption")]
        if password.is_some() && info.aes_version != 0 {
            if info.aes_strength == 0 {
                info.aes_strength = 3;
            }
            if crypto::aes_key_len(info.aes_strength).is_none() {
                return Err(ZipError::Param("invalid AES strength"));
            }
        }

        self.entry_zip64 = match info.zip64 {
            Zip64Policy::Force => true,
            Zip64Policy::Disable => {
                if info.uncompressed_size > u32::MAX as u64 {
                    return Err(ZipError::Param("entry requires zip64 but it is disabled"));
                }
                false
            }
            Zip64Policy::Auto => info.uncompressed_size > u32::MAX as u64,
        };

        let storage = self
            .storage
            .as_mut()
            .ok_or(ZipError::Internal("storage missing"))?;
        storage.seek(SeekFrom::Start(self.next_write_pos))?;
        self.entry_offset = self.next_write_pos - self.disk_offset_shift;

        // Local header: sizes and CRC unknown, carried by the descriptor.
        let mut local_info = info.clone();
        local_info.crc = 0;
        local_info.compressed_size = 0;
        local_info.uncompressed_size = 0;
        local_info.zip64 = if self.entry_zip64 {
            Zip64Policy::Force
        } else {
            Zip64Policy::Auto
        };
        entry::write_header(storage, &local_info, true)?;
        let data_start = storage.tell()?;
        self.local_file_info = local_info;

        let use_crypt = !raw && password.is_some();
        #[cfg(feature = "encryption")]
        let crypt_prep: Option<CryptPrep> = if use_crypt {
            let pw = password.unwrap_or_default().as_bytes();
            if info.aes_version != 0 {
                let (state, header) = AesState::for_writer(pw, info.aes_strength)?;
                storage.write_all(&header)?;
                Some(CryptPrep::Aes(state, 0))
            } else {
                let mut keys = ZipCryptoKeys::new(pw);
                let header = keys.make_header(zipcrypto_verifier(&info))?;
                storage.write_all(&header)?;
                Some(CryptPrep::ZipCrypto(keys))
            }
        } else {
            None
        };
        #[cfg(not(feature = "encryption"))]
        let _ = use_crypt;

        let storage = self.take_storage()?;
        #[cfg(feature = "encryption")]
        let crypt = match crypt_prep {
            None => CryptStream::Plain(storage),
            Some(CryptPrep::Aes(state, _)) => CryptStream::Aes(AesStream::writer(storage, state)),
            Some(CryptPrep::ZipCrypto(keys)) => {
                CryptStream::ZipCrypto(ZipCryptoStream::new(storage, keys))
            }
        };
        #[cfg(not(feature = "encryption"))]
        let crypt = CryptStream::Plain(storage);

        let compress = if raw || info.compression_method == method::STORE {
            CompressStream::Raw(RawStream::new(crypt))
        } else {
            match info.compression_method {
                method::DEFLATE => CompressStream::Deflate(DeflateStream::new_writer(crypt, level)),
                #[cfg(feature = "bzip2-support")]
                method::BZIP2 => CompressStream::Bzip2(BzipStream::new_writer(crypt, level)),
                #[cfg(feature = "lzma-support")]
                method::LZMA => {
                    let mut crypt = crypt;
                    if let Err(err) = lzma::write_zip_header(&mut crypt) {
                        self.storage = Some(crypt.into_base());
                        return Err(err);
                    }
                    match LzmaStream::new_writer(crypt, level) {
                        Ok(writer) => CompressStream::Lzma(writer),
                        Err((crypt, err)) => {
                            self.storage = Some(crypt.into_base());
                            return Err(err);
                        }
                    }
                }
                other => {
                    self.storage = Some(crypt.into_base());
                    return Err(ZipError::UnsupportedMethod(other));
                }
            }
        };

        self.pipeline = Some(EntryPipeline {
            stream: CrcStream::new(compress),
            writing: true,
            data_start,
        });
        self.entry_raw = raw;
        self.file_info = info;
        self.entry_scanned = true;
        trace!(name = %self.file_info.filename, level, raw, "entry opened for write");
        Ok(())
    }

    /// Read payload bytes from the open entry.
    pub fn entry_read(&mut self, buf: &mut [u8]) -> Result<usize> {
        match self.pipeline.as_mut() {
            Some(p) if !p.writing => p.stream.read(buf),
            Some(_) => Err(ZipError::Param("entry is open for writing")),
            None => Err(ZipError::Param("no entry is open")),
        }
    }

    /// Drain the open entry into a vector.
    pub fn entry_read_to_end(&mut self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        let mut buf = [0u8; 16 * 1024];
        loop {
            let n = self.entry_read(&mut buf)?;
            if n == 0 {
                return Ok(out);
            }
            out.extend_from_slice(&buf[..n]);
        }
    }

    /// Write payload bytes to the open entry.
    pub fn entry_write(&mut self, buf: &[u8]) -> Result<usize> {
        match self.pipeline.as_mut() {
            Some(p) if p.writing => p.stream.write(buf),
            Some(_) => Err(ZipError::Param("entry is open for reading")),
            None => Err(ZipError::Param("no entry is open")),
        }
    }

    /// Close the open entry.
    ///
    /// Reading: when the payload was fully drained, the computed CRC is
    /// checked (AES-2 entries rely on their authentication trailer
    /// instead). Writing: the data descriptor is emitted and a central
    /// record staged.
    pub fn entry_close(&mut self) -> Result<()> {
        let pipeline = self
            .pipeline
            .take()
            .ok_or(ZipError::Param("no entry is open"))?;
        if pipeline.writing {
            self.finish_write_entry(pipeline, None)
        } else {
            self.finish_read_entry(pipeline)
        }
    }

    /// Close a raw-written entry, supplying the accounting the bypassed
    /// layers could not produce.
    pub fn entry_close_raw(&mut self, uncompressed_size: u64, crc: u32) -> Result<()> {
        let pipeline = self
            .pipeline
            .take()
            .ok_or(ZipError::Param("no entry is open"))?;
        if !pipeline.writing || !self.entry_raw {
            return Err(ZipError::Param("entry is not open for raw writing"));
        }
        self.finish_write_entry(pipeline, Some((uncompressed_size, crc)))
    }

    fn finish_read_entry(&mut self, pipeline: EntryPipeline<S>) -> Result<()> {
        let raw = self.entry_raw;
        self.entry_raw = false;
        let (compress, crc, total) = pipeline.stream.finish();
        let fully_consumed = if raw {
            total == self.file_info.compressed_size
        } else {
            total == self.file_info.uncompressed_size
        };
        let crypt = compress.finish()?;
        let storage = crypt.finish_reader(fully_consumed && !raw)?;
        self.storage = Some(storage);

        if fully_consumed && !raw && self.file_info.aes_version != 2 && crc != self.file_info.crc {
            return Err(ZipError::Crc {
                expected: self.file_info.crc,
                actual: crc,
            });
        }
        Ok(())
    }

    fn finish_write_entry(
        &mut self,
        pipeline: EntryPipeline<S>,
        raw_totals: Option<(u64, u32)>,
    ) -> Result<()> {
        self.entry_raw = false;
        let data_start = pipeline.data_start;
        let (compress, crc_tap, total_tap) = pipeline.stream.finish();
        let crypt = compress.finish()?;
        let mut storage = crypt.finish_writer()?;
        let data_end = storage.tell()?;
        let compressed_size = data_end - data_start;

        let (uncompressed_size, mut crc) = raw_totals.unwrap_or((total_tap, crc_tap));
        if self.file_info.aes_version == 2 {
            // AE-2 stores no CRC; the HMAC trailer authenticates instead.
            crc = 0;
        }

        storage.write_u32(DATA_DESCRIPTOR_SIGNATURE)?;
        storage.write_u32(crc)?;
        if self.entry_zip64 {
            storage.write_u64(compressed_size)?;
            storage.write_u64(uncompressed_size)?;
        } else {
            storage.write_u32(compressed_size as u32)?;
            storage.write_u32(uncompressed_size as u32)?;
        }
        self.next_write_pos = storage.tell()?;
        self.storage = Some(storage);

        self.file_info.crc = crc;
        self.file_info.compressed_size = compressed_size;
        self.file_info.uncompressed_size = uncompressed_size;
        self.file_info.disk_offset = self.entry_offset;
        self.file_info.disk_number = 0;
        if self.entry_zip64 {
            self.file_info.zip64 = Zip64Policy::Force;
        }

        let cd = self
            .cd_mem
            .as_mut()
            .ok_or(ZipError::Internal("staging buffer missing"))?;
        cd.seek(SeekFrom::End(0))?;
        entry::write_header(cd, &self.file_info, false)?;
        self.cd_size = cd.len();
        self.number_entry += 1;
        trace!(
            name = %self.file_info.filename,
            compressed_size,
            uncompressed_size,
            "entry closed"
        );
        Ok(())
    }

    /// Close the archive.
    ///
    /// Any open entry is closed first (errors propagate). In write paths
    /// the staged central directory is flushed and the EOCD chain emitted.
    /// The storage stream is handed back to the caller, not closed.
    pub fn close(mut self) -> Result<S> {
        if self.pipeline.is_some() {
            self.entry_close()?;
        }

        if self.mode.writable() {
            let mut cd = self
                .cd_mem
                .take()
                .ok_or(ZipError::Internal("staging buffer missing"))?;
            let storage = self
                .storage
                .as_mut()
                .ok_or(ZipError::Internal("storage missing"))?;
            storage.seek(SeekFrom::Start(self.next_write_pos))?;
            let cd_offset = storage.tell()?;
            cd.seek(SeekFrom::Start(0))?;
            let cd_size = cd.len();
            copy_stream(storage, &mut cd, cd_size)?;

            let (disk_number, mut disk_with_cd, split) = eocd::disk_placement(storage);
            if split {
                disk_with_cd += 1;
            }
            eocd::emit(
                storage,
                &EmitParams {
                    cd_offset: cd_offset - self.disk_offset_shift,
                    cd_size,
                    entries: self.number_entry,
                    disk_number,
                    disk_with_cd,
                    version_madeby: self.version_madeby,
                    comment: &self.comment,
                },
            )?;
            debug!(
                entries = self.number_entry,
                cd_offset, cd_size, "archive closed"
            );
        }

        self.take_storage()
    }
}

/// Traditional-cipher verifier: high bytes of the DOS time when the
/// descriptor flag defers the CRC, bytes 2 and 3 of the CRC otherwise.
#[cfg(feature = "encryption")]
fn zipcrypto_verifier(info: &FileInfo) -> u16 {
    if info.flag & flag::DATA_DESCRIPTOR != 0 {
        (dostime::unix_to_dos(info.modified_date) >> 16) as u16
    } else {
        (info.crc >> 16) as u16
    }
}

fn check_method_support(compression_method: u16) -> Result<()> {
    match compression_method {
        method::STORE | method::DEFLATE => Ok(()),
        #[cfg(feature = "bzip2-support")]
        method::BZIP2 => Ok(()),
        #[cfg(feature = "lzma-support")]
        method::LZMA => Ok(()),
        other => Err(ZipError::UnsupportedMethod(other)),
    }
}
