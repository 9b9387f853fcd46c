//! Contract with the remote page agent.
//!
//! When the source database lives on another host, the backup driver hands
//! the whole per-file loop to an agent that runs next to the data and streams
//! back frames in the exact format the local writer produces. Only the
//! command surface is defined here; the transport is the caller's concern.

use crate::catalog::FileEntry;
use crate::compress::CompressAlg;
use crate::page::Lsn;
use crate::pagemap::PageBitmap;
use crate::Result;

/// Outcome of a `send_pages` command.
#[derive(Debug, Clone)]
pub enum SendPagesOutcome {
    /// Number of blocks the agent read from the source file.
    Blocks(u32),
    /// Agent could not read the source; `blknum` is the failing block.
    RemoteError { blknum: u32 },
    /// Agent saw unrecoverable page damage; message carries the detail.
    PageCorruption { blknum: u32, message: Option<String> },
    /// Agent could not write a frame; `blknum` is the failing block.
    WriteFailed { blknum: u32 },
}

pub trait PageAgent: Send + Sync {
    /// Run the read-validate-compress-frame loop for one file on the agent
    /// side, appending frames to `to_path`. `lsn_cutoff` carries the DELTA
    /// filter (invalid LSN disables it), `pagemap` the PAGE-mode selection.
    #[allow(clippy::too_many_arguments)]
    fn send_pages(
        &self,
        from_path: &str,
        to_path: &str,
        file: &mut FileEntry,
        lsn_cutoff: Lsn,
        calg: CompressAlg,
        clevel: u32,
        checksum_enabled: bool,
        pagemap: Option<&PageBitmap>,
    ) -> Result<SendPagesOutcome>;
}
