use pgbak::catalog::FileEntry;
use pgbak::compress::CompressAlg;
use pgbak::datafile::{
    backup_uses_crc32c, page_may_be_compressed, write_frame, BackupCrc, FrameHeader,
};
use pgbak::page::{maxalign, BLCKSZ};

#[path = "../common/mod.rs"]
mod common;

use common::{broken_page, valid_page};

#[test]
fn frame_header_layout_is_little_endian() {
    let header = FrameHeader {
        block: 0x01020304,
        compressed_size: BLCKSZ as i32,
    };
    let bytes = header.encode();

    assert_eq!(&bytes[0..4], &[0x04, 0x03, 0x02, 0x01]);
    assert_eq!(&bytes[4..8], &(BLCKSZ as i32).to_le_bytes());
    assert_eq!(FrameHeader::decode(&bytes), header);
}

#[test]
fn uncompressible_page_is_stored_raw() {
    let page = [0u8; BLCKSZ];
    let mut file = FileEntry::new("base/1/100");
    let mut crc = BackupCrc::new(true);
    let mut out = Vec::new();

    write_frame(
        &mut out,
        &mut file,
        0,
        &page,
        &mut crc,
        CompressAlg::None,
        1,
        "src",
        "dst",
    )
    .unwrap();

    assert_eq!(out.len(), FrameHeader::SIZE + BLCKSZ);
    let header = FrameHeader::decode(&out[..8].try_into().unwrap());
    assert_eq!(header.block, 0);
    assert_eq!(header.compressed_size, BLCKSZ as i32);
    assert_eq!(&out[8..], &page[..]);

    assert_eq!(file.write_size, (FrameHeader::SIZE + BLCKSZ) as i64);
    assert_eq!(file.uncompressed_size, BLCKSZ as i64);
    assert_eq!(crc.finish(), crc32c::crc32c(&out));
}

#[test]
fn compressed_frame_is_padded_and_crc_covers_padding() {
    let page = valid_page(7, 0, 3, 0x11);
    let mut file = FileEntry::new("base/1/100");
    let mut crc = BackupCrc::new(true);
    let mut out = Vec::new();

    write_frame(
        &mut out,
        &mut file,
        3,
        &page,
        &mut crc,
        CompressAlg::Zlib,
        6,
        "src",
        "dst",
    )
    .unwrap();

    let header = FrameHeader::decode(&out[..8].try_into().unwrap());
    assert_eq!(header.block, 3);
    let n = header.compressed_size as usize;
    assert!(n > 0 && n < BLCKSZ);
    assert_eq!(out.len(), FrameHeader::SIZE + maxalign(n));
    assert_eq!(file.write_size, out.len() as i64);
    assert_eq!(file.uncompressed_size, BLCKSZ as i64);
    assert_eq!(crc.finish(), crc32c::crc32c(&out));
}

#[test]
fn consecutive_frames_roll_one_crc() {
    let mut file = FileEntry::new("base/1/100");
    let mut crc = BackupCrc::new(true);
    let mut out = Vec::new();

    for blknum in 0..3u32 {
        let page = valid_page(10 + blknum as u64, 0, blknum, blknum as u8);
        write_frame(
            &mut out,
            &mut file,
            blknum,
            &page,
            &mut crc,
            CompressAlg::None,
            1,
            "src",
            "dst",
        )
        .unwrap();
    }

    assert_eq!(out.len(), 3 * (FrameHeader::SIZE + BLCKSZ));
    assert_eq!(crc.finish(), crc32c::crc32c(&out));
    assert_eq!(file.uncompressed_size, 3 * BLCKSZ as i64);
}

#[test]
fn crc_flavours_match_their_reference_implementations() {
    let data = b"the quick brown fox jumps over the lazy dog";

    let mut crc = BackupCrc::new(true);
    crc.update(&data[..10]);
    crc.update(&data[10..]);
    assert_eq!(crc.finish(), crc32c::crc32c(data));

    let mut crc = BackupCrc::new(false);
    crc.update(&data[..10]);
    crc.update(&data[10..]);
    assert_eq!(crc.finish(), crc32fast::hash(data));
}

#[test]
fn crc_flavour_selection_by_backup_version() {
    assert!(backup_uses_crc32c(20021));
    assert!(backup_uses_crc32c(20000));
    assert!(!backup_uses_crc32c(20022));
    assert!(!backup_uses_crc32c(20023));
    assert!(!backup_uses_crc32c(20024));
    assert!(backup_uses_crc32c(20025));
    assert!(backup_uses_crc32c(20207));
}

#[test]
fn compression_guess_requires_old_version_and_broken_header() {
    let sane = valid_page(1, 0, 0, 0x22);
    assert!(!page_may_be_compressed(&sane, CompressAlg::Zlib, 20022));

    let mut broken = broken_page(0xAA);
    broken[0] = 0x78;
    assert!(page_may_be_compressed(&broken, CompressAlg::Zlib, 20022));
    assert!(!page_may_be_compressed(&broken, CompressAlg::Zlib, 20023));

    broken[0] = 0x42;
    assert!(!page_may_be_compressed(&broken, CompressAlg::Zlib, 20022));
    // without a magic byte to consult, only the header verdict is left
    assert!(page_may_be_compressed(&broken, CompressAlg::Pglz, 20022));
}
