use std::io::SeekFrom;

use zipio::entry::ExtraFieldIter;
use zipio::{method, FileInfo, MemStream, OpenMode, Stream, ZipArchive, Zip64Policy};

// Craft a minimal ZIP64 archive by hand: one stored entry with sentinel
// sizes, a central record with the ZIP64 extra field, the ZIP64 EOCD
// record and locator, and a classic EOCD full of placeholders.
#[test]
fn read_crafted_zip64() {
    let mut f = MemStream::new();

    // Local file header for a.txt (sizes deferred to the descriptor).
    f.write_all(&[0x50, 0x4b, 0x03, 0x04]).unwrap();
    f.write_all(&[45, 0]).unwrap(); // version needed
    f.write_all(&[8, 0]).unwrap(); // flags (bit 3 set)
    f.write_all(&[0, 0]).unwrap(); // compression method (stored)
    f.write_all(&[0, 0, 0, 0]).unwrap(); // mod time/date
    f.write_all(&0u32.to_le_bytes()).unwrap(); // crc placeholder
    f.write_all(&0u32.to_le_bytes()).unwrap(); // compressed size
    f.write_all(&0u32.to_le_bytes()).unwrap(); // uncompressed size
    f.write_all(&5u16.to_le_bytes()).unwrap(); // name len
    f.write_all(&0u16.to_le_bytes()).unwrap(); // extra len
    f.write_all(b"a.txt").unwrap();

    let data = b"hello";
    let local_offset = 0u64;
    let crc = crc32fast::hash(data);
    f.write_all(data).unwrap();

    // ZIP64-style data descriptor (64-bit sizes).
    f.write_all(&[0x50, 0x4b, 0x07, 0x08]).unwrap();
    f.write_all(&crc.to_le_bytes()).unwrap();
    f.write_all(&(data.len() as u64).to_le_bytes()).unwrap();
    f.write_all(&(data.len() as u64).to_le_bytes()).unwrap();

    let cd_start = f.tell().unwrap();

    // Central record with sentinel sizes resolved by the ZIP64 extra.
    f.write_all(&[0x50, 0x4b, 0x01, 0x02]).unwrap();
    f.write_all(&[45, 0]).unwrap(); // version made by
    f.write_all(&[45, 0]).unwrap(); // version needed
    f.write_all(&[8, 0]).unwrap(); // flags
    f.write_all(&[0, 0]).unwrap(); // method
    f.write_all(&[0, 0, 0, 0]).unwrap(); // mod time/date
    f.write_all(&crc.to_le_bytes()).unwrap();
    f.write_all(&0xffffffffu32.to_le_bytes()).unwrap(); // compressed
    f.write_all(&0xffffffffu32.to_le_bytes()).unwrap(); // uncompressed
    f.write_all(&5u16.to_le_bytes()).unwrap(); // name len
    f.write_all(&28u16.to_le_bytes()).unwrap(); // extra len
    f.write_all(&0u16.to_le_bytes()).unwrap(); // comment len
    f.write_all(&0u16.to_le_bytes()).unwrap(); // disk start
    f.write_all(&0u16.to_le_bytes()).unwrap(); // internal attrs
    f.write_all(&0u32.to_le_bytes()).unwrap(); // external attrs
    f.write_all(&0xffffffffu32.to_le_bytes()).unwrap(); // offset
    f.write_all(b"a.txt").unwrap();
    // ZIP64 extra: uncompressed, compressed, offset.
    f.write_all(&0x0001u16.to_le_bytes()).unwrap();
    f.write_all(&24u16.to_le_bytes()).unwrap();
    f.write_all(&(data.len() as u64).to_le_bytes()).unwrap();
    f.write_all(&(data.len() as u64).to_le_bytes()).unwrap();
    f.write_all(&local_offset.to_le_bytes()).unwrap();

    let cd_end = f.tell().unwrap();
    let cd_size = cd_end - cd_start;

    // ZIP64 EOCD record.
    let zip64_eocd_start = f.tell().unwrap();
    f.write_all(&[0x50, 0x4b, 0x06, 0x06]).unwrap();
    f.write_all(&44u64.to_le_bytes()).unwrap();
    f.write_all(&[45, 0]).unwrap();
    f.write_all(&[45, 0]).unwrap();
    f.write_all(&0u32.to_le_bytes()).unwrap();
    f.write_all(&0u32.to_le_bytes()).unwrap();
    f.write_all(&1u64.to_le_bytes()).unwrap();
    f.write_all(&1u64.to_le_bytes()).unwrap();
    f.write_all(&cd_size.to_le_bytes()).unwrap();
    f.write_all(&cd_start.to_le_bytes()).unwrap();

    // ZIP64 EOCD locator.
    f.write_all(&[0x50, 0x4b, 0x06, 0x07]).unwrap();
    f.write_all(&0u32.to_le_bytes()).unwrap();
    f.write_all(&zip64_eocd_start.to_le_bytes()).unwrap();
    f.write_all(&1u32.to_le_bytes()).unwrap();

    // Classic EOCD with placeholders.
    f.write_all(&[0x50, 0x4b, 0x05, 0x06]).unwrap();
    f.write_all(&0u16.to_le_bytes()).unwrap();
    f.write_all(&0u16.to_le_bytes()).unwrap();
    f.write_all(&0xffffu16.to_le_bytes()).unwrap();
    f.write_all(&0xffffu16.to_le_bytes()).unwrap();
    f.write_all(&0xffffffffu32.to_le_bytes()).unwrap();
    f.write_all(&0xffffffffu32.to_le_bytes()).unwrap();
    f.write_all(&0u16.to_le_bytes()).unwrap();

    let mut archive = ZipArchive::open(f, OpenMode::READ).unwrap();
    assert_eq!(archive.number_entries(), 1);
    archive.locate_entry("a.txt", false).unwrap();
    let info = archive.entry_info().unwrap();
    assert_eq!(info.uncompressed_size, data.len() as u64);
    assert_eq!(info.compressed_size, data.len() as u64);
    archive.entry_read_open(false, None).unwrap();
    let out = archive.entry_read_to_end().unwrap();
    archive.entry_close().unwrap();
    assert_eq!(out, data);
}

#[test]
fn declared_large_size_promotes_entry() {
    let mut archive =
        ZipArchive::open(MemStream::new(), OpenMode::WRITE | OpenMode::CREATE).unwrap();
    let info = FileInfo {
        filename: "big".into(),
        compression_method: method::STORE,
        uncompressed_size: (1u64 << 32) + 10,
        ..FileInfo::default()
    };
    archive.entry_write_open(&info, 0, false, None).unwrap();
    archive.entry_write(b"tiny").unwrap();
    archive.entry_close().unwrap();
    let bytes = archive.close().unwrap().into_inner();

    // The central record carries sentinel sizes and a ZIP64 extra field
    // with the true values; the classic EOCD still counts one entry.
    let cd = find_central_record(&bytes);
    assert_eq!(&bytes[cd + 20..cd + 24], &[0xff; 4], "compressed sentinel");
    assert_eq!(&bytes[cd + 24..cd + 28], &[0xff; 4], "uncompressed sentinel");
    let eocd = bytes.len() - 22;
    assert_eq!(u16::from_le_bytes([bytes[eocd + 10], bytes[eocd + 11]]), 1);

    let mut archive = ZipArchive::open(MemStream::from_vec(bytes), OpenMode::READ).unwrap();
    archive.goto_first_entry().unwrap();
    let info = archive.entry_info().unwrap();
    assert_eq!(info.uncompressed_size, 4);
    assert_eq!(info.compressed_size, 4);
    assert!(
        ExtraFieldIter::new(&info.extrafield).any(|(id, _)| id == 0x0001),
        "zip64 extra present"
    );
    archive.entry_read_open(false, None).unwrap();
    assert_eq!(archive.entry_read_to_end().unwrap(), b"tiny");
    archive.entry_close().unwrap();
}

#[test]
fn boundary_size_stays_classic() {
    let mut archive =
        ZipArchive::open(MemStream::new(), OpenMode::WRITE | OpenMode::CREATE).unwrap();
    let info = FileInfo {
        filename: "edge".into(),
        compression_method: method::STORE,
        uncompressed_size: u32::MAX as u64,
        ..FileInfo::default()
    };
    archive.entry_write_open(&info, 0, false, None).unwrap();
    archive.entry_write(b"x").unwrap();
    archive.entry_close().unwrap();
    let bytes = archive.close().unwrap().into_inner();

    let mut archive = ZipArchive::open(MemStream::from_vec(bytes), OpenMode::READ).unwrap();
    archive.goto_first_entry().unwrap();
    let info = archive.entry_info().unwrap();
    assert!(
        !ExtraFieldIter::new(&info.extrafield).any(|(id, _)| id == 0x0001),
        "no zip64 extra at 2^32 - 1"
    );
}

#[test]
fn forced_zip64_policy() {
    let mut archive =
        ZipArchive::open(MemStream::new(), OpenMode::WRITE | OpenMode::CREATE).unwrap();
    let info = FileInfo {
        filename: "forced".into(),
        compression_method: method::STORE,
        zip64: Zip64Policy::Force,
        ..FileInfo::default()
    };
    archive.entry_write_open(&info, 0, false, None).unwrap();
    archive.entry_write(b"abc").unwrap();
    archive.entry_close().unwrap();
    let bytes = archive.close().unwrap().into_inner();

    let mut archive = ZipArchive::open(MemStream::from_vec(bytes), OpenMode::READ).unwrap();
    archive.goto_first_entry().unwrap();
    let info = archive.entry_info().unwrap();
    assert_eq!(info.uncompressed_size, 3);
    assert!(ExtraFieldIter::new(&info.extrafield).any(|(id, _)| id == 0x0001));
    archive.entry_read_open(false, None).unwrap();
    assert_eq!(archive.entry_read_to_end().unwrap(), b"abc");
    archive.entry_close().unwrap();
}

#[test]
fn many_entries_promote_the_footer() {
    let mut archive =
        ZipArchive::open(MemStream::new(), OpenMode::WRITE | OpenMode::CREATE).unwrap();
    for i in 0..(1u32 << 16) {
        let info = FileInfo {
            filename: format!("{i:05x}"),
            ..FileInfo::default()
        };
        archive.entry_write_open(&info, 0, false, None).unwrap();
        archive.entry_close().unwrap();
    }
    assert_eq!(archive.number_entries(), 1 << 16);
    let bytes = archive.close().unwrap().into_inner();

    // Classic EOCD clamps the count; the ZIP64 record carries the truth.
    let eocd = bytes.len() - 22;
    assert_eq!(
        u16::from_le_bytes([bytes[eocd + 10], bytes[eocd + 11]]),
        0xffff
    );

    let mut archive = ZipArchive::open(MemStream::from_vec(bytes), OpenMode::READ).unwrap();
    assert_eq!(archive.number_entries(), 1 << 16);
    archive.locate_entry("0ffff", false).unwrap();
}

fn find_central_record(bytes: &[u8]) -> usize {
    let sig = 0x02014b50u32.to_le_bytes();
    (0..bytes.len() - 4)
        .find(|&i| bytes[i..i + 4] == sig)
        .expect("central record")
}

#[test]
fn tell_matches_memstream_len_after_close() {
    let mut archive =
        ZipArchive::open(MemStream::new(), OpenMode::WRITE | OpenMode::CREATE).unwrap();
    let info = FileInfo {
        filename: "t".into(),
        ..FileInfo::default()
    };
    archive.entry_write_open(&info, 0, false, None).unwrap();
    archive.entry_write(b"data").unwrap();
    archive.entry_close().unwrap();
    let mut storage = archive.close().unwrap();
    assert_eq!(storage.seek(SeekFrom::End(0)).unwrap(), storage.len());
}
