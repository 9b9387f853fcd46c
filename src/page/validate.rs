//! Page classification: zeroed, valid, damaged, or from the future.
//!
//! Runs inside the read-retry loop, so everything here is side-effect-free;
//! callers decide what to log.

use super::checksum::page_checksum;
use super::{maxalign, Lsn, PageBuf, PageHeader, BLCKSZ, HEADER_SIZE};

/// Outcome of classifying one raw block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageCheck {
    /// Every byte of the block is zero. Not damage.
    Zeroed,
    /// Header sane, checksum (when enabled) matches, LSN not past the cutoff.
    Valid(Lsn),
    /// Header predicate failed on a non-zero block.
    HeaderInvalid,
    /// Header sane but the stored checksum disagrees with the computed one.
    ChecksumMismatch(Lsn),
    /// Page LSN is newer than the supplied cutoff.
    LsnFromFuture(Lsn),
}

impl PageCheck {
    pub fn lsn(self) -> Lsn {
        match self {
            PageCheck::Valid(lsn) | PageCheck::ChecksumMismatch(lsn) | PageCheck::LsnFromFuture(lsn) => lsn,
            _ => Lsn::INVALID,
        }
    }
}

/// Classify `page` located at `absolute_blkno`.
///
/// `stop_lsn` engages the from-the-future check and is only passed by backup
/// validation; live reads pass `None`.
pub fn validate_one_page(
    page: &PageBuf,
    absolute_blkno: u32,
    stop_lsn: Option<Lsn>,
    checksum_enabled: bool,
) -> PageCheck {
    let header = PageHeader::decode(page);

    if !header.is_sane() {
        if page.iter().all(|b| *b == 0) {
            return PageCheck::Zeroed;
        }
        return PageCheck::HeaderInvalid;
    }

    if checksum_enabled && page_checksum(page, absolute_blkno) != header.checksum {
        return PageCheck::ChecksumMismatch(header.lsn);
    }

    if let Some(stop_lsn) = stop_lsn {
        if stop_lsn.is_valid() && header.lsn > stop_lsn {
            return PageCheck::LsnFromFuture(header.lsn);
        }
    }

    PageCheck::Valid(header.lsn)
}

/// Spell out which header inequality failed. Only called on pages already
/// known to be invalid, so the fallback arm is unreachable in practice.
pub fn header_error_message(page: &PageBuf) -> String {
    let h = PageHeader::decode(page);

    if h.page_size() != BLCKSZ {
        format!(
            "page header invalid, page size {} is not equal to block size {}",
            h.page_size(),
            BLCKSZ
        )
    } else if (h.lower as usize) < HEADER_SIZE {
        format!(
            "page header invalid, lower {} is less than page header size {}",
            h.lower, HEADER_SIZE
        )
    } else if h.lower > h.upper {
        format!(
            "page header invalid, lower {} is greater than upper {}",
            h.lower, h.upper
        )
    } else if h.upper > h.special {
        format!(
            "page header invalid, upper {} is greater than special {}",
            h.upper, h.special
        )
    } else if h.special as usize > BLCKSZ {
        format!(
            "page header invalid, special {} is greater than block size {}",
            h.special, BLCKSZ
        )
    } else if h.special as usize != maxalign(h.special as usize) {
        format!(
            "page header invalid, special {} is misaligned, expected {}",
            h.special,
            maxalign(h.special as usize)
        )
    } else if h.flags & !super::PD_VALID_FLAG_BITS != 0 {
        "page header invalid, flags mask contain illegal bits".to_string()
    } else {
        "page header invalid".to_string()
    }
}

/// Spell out a checksum mismatch: what the page claims vs what it hashes to.
pub fn checksum_error_message(page: &PageBuf, absolute_blkno: u32) -> String {
    let h = PageHeader::decode(page);
    format!(
        "page verification failed, calculated checksum {} but expected {}",
        h.checksum,
        page_checksum(page, absolute_blkno)
    )
}
