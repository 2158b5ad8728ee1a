use zipio::{method, FileInfo, MemStream, OpenMode, ZipArchive, ZipError};

fn two_entry_archive() -> Vec<u8> {
    let mut archive =
        ZipArchive::open(MemStream::new(), OpenMode::WRITE | OpenMode::CREATE).unwrap();
    for (name, data) in [("alpha.txt", b"alpha payload".as_slice()), ("beta.txt", b"beta")] {
        let info = FileInfo {
            filename: name.into(),
            compression_method: method::DEFLATE,
            ..FileInfo::default()
        };
        archive.entry_write_open(&info, 6, false, None).unwrap();
        archive.entry_write(data).unwrap();
        archive.entry_close().unwrap();
    }
    archive.close().unwrap().into_inner()
}

// Archives that gained a self-extractor stub after creation carry
// central-directory offsets relative to the wrong origin. The reader
// compensates by probing the directory's real position.
#[test]
fn prepended_stub_is_compensated() {
    let original = two_entry_archive();
    let mut shifted = vec![0u8; 512];
    shifted.extend_from_slice(&original);

    let mut archive = ZipArchive::open(MemStream::from_vec(shifted), OpenMode::READ).unwrap();
    assert_eq!(archive.disk_offset_shift(), 512);
    assert_eq!(archive.number_entries(), 2);

    archive.locate_entry("alpha.txt", false).unwrap();
    archive.entry_read_open(false, None).unwrap();
    let data = archive.entry_read_to_end().unwrap();
    archive.entry_close().unwrap();
    assert_eq!(data, b"alpha payload");

    archive.locate_entry("beta.txt", false).unwrap();
    archive.entry_read_open(false, None).unwrap();
    let data = archive.entry_read_to_end().unwrap();
    archive.entry_close().unwrap();
    assert_eq!(data, b"beta");
}

#[test]
fn unshifted_archive_reports_zero_shift() {
    let archive = ZipArchive::open(
        MemStream::from_vec(two_entry_archive()),
        OpenMode::READ,
    )
    .unwrap();
    assert_eq!(archive.disk_offset_shift(), 0);
}

#[test]
fn eocd_found_behind_maximum_comment() {
    let mut archive =
        ZipArchive::open(MemStream::new(), OpenMode::WRITE | OpenMode::CREATE).unwrap();
    let comment: String = std::iter::repeat('c').take(65535).collect();
    archive.set_comment(&comment).unwrap();
    let info = FileInfo {
        filename: "f".into(),
        ..FileInfo::default()
    };
    archive.entry_write_open(&info, 0, false, None).unwrap();
    archive.entry_write(b"data").unwrap();
    archive.entry_close().unwrap();
    let bytes = archive.close().unwrap().into_inner();

    let mut archive = ZipArchive::open(MemStream::from_vec(bytes), OpenMode::READ).unwrap();
    assert_eq!(archive.comment().map(str::len), Some(65535));
    archive.locate_entry("f", false).unwrap();
    archive.entry_read_open(false, None).unwrap();
    assert_eq!(archive.entry_read_to_end().unwrap(), b"data");
    archive.entry_close().unwrap();
}

#[test]
fn comment_too_long_is_rejected() {
    let mut archive =
        ZipArchive::open(MemStream::new(), OpenMode::WRITE | OpenMode::CREATE).unwrap();
    let oversized: String = std::iter::repeat('x').take(65536).collect();
    assert!(matches!(
        archive.set_comment(&oversized),
        Err(ZipError::Param(_))
    ));
}

#[test]
fn append_to_shifted_archive() {
    let original = two_entry_archive();
    let mut shifted = vec![0u8; 128];
    shifted.extend_from_slice(&original);

    let mut archive = ZipArchive::open(MemStream::from_vec(shifted), OpenMode::APPEND).unwrap();
    assert_eq!(archive.disk_offset_shift(), 128);
    let info = FileInfo {
        filename: "gamma.txt".into(),
        ..FileInfo::default()
    };
    archive.entry_write_open(&info, 0, false, None).unwrap();
    archive.entry_write(b"gamma").unwrap();
    archive.entry_close().unwrap();
    let bytes = archive.close().unwrap().into_inner();

    // Offsets stay relative to the stub-less origin, so the reopened
    // archive still needs (and finds) the same shift.
    let mut archive = ZipArchive::open(MemStream::from_vec(bytes), OpenMode::READ).unwrap();
    assert_eq!(archive.disk_offset_shift(), 128);
    assert_eq!(archive.number_entries(), 3);
    for (name, expected) in [
        ("alpha.txt", b"alpha payload".as_slice()),
        ("beta.txt", b"beta"),
        ("gamma.txt", b"gamma"),
    ] {
        archive.locate_entry(name, false).unwrap();
        archive.entry_read_open(false, None).unwrap();
        let data = archive.entry_read_to_end().unwrap();
        archive.entry_close().unwrap();
        assert_eq!(data, expected, "{name}");
    }
}
