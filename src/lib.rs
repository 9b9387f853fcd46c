use thiserror::Error;

pub mod cancel;
pub mod catalog;
pub mod cli;
pub mod compress;
pub mod datafile;
pub mod logging;
pub mod page;
pub mod pagemap;
pub mod remote;
pub mod workers;

pub type Result<T> = anyhow::Result<T>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Corruption detected in file \"{path}\", block {blknum}: {reason}")]
    Corruption {
        path: String,
        blknum: u32,
        reason: String,
    },
    #[error("Backup is broken at block {blknum} of \"{path}\"")]
    BackupBroken { path: String, blknum: u32 },
    #[error("Odd size page found at block {blknum} of \"{path}\"")]
    OddSizePage { path: String, blknum: u32 },
    #[error("Size of a blknum {blknum} exceed BLCKSZ: {size}")]
    FrameTooLarge { blknum: u32, size: i32 },
    #[error("File \"{path}\", block {blknum}, expected block size {expected}, but read {actual}")]
    BadProviderPage {
        path: String,
        blknum: u32,
        expected: usize,
        actual: usize,
    },
    #[error("Page of file \"{path}\" uncompressed to {actual} bytes, expected {expected}")]
    BadUncompressedSize {
        path: String,
        actual: i64,
        expected: usize,
    },
    #[error("Interrupted during {0}")]
    Interrupted(&'static str),
    #[error("invalid backup store path: {0}")]
    InvalidStorePath(String),
    #[error("missing backup: {0}")]
    MissingBackup(String),
    #[error("backup chain contains a cycle near {0}")]
    ChainCycle(String),
    #[error("backup chain of {0} does not start with a FULL backup")]
    ChainNoFull(String),
    #[error("unsupported compression algorithm: {0}")]
    UnsupportedCompressionAlgorithm(String),
    #[error("serialization error")]
    Serde(#[from] serde_json::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("cli error: {0}")]
    Cli(String),
}

/// Entry point for the library, called by the CLI thin wrapper.
pub fn run<I, S>(args: I) -> Result<()>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let cli_args = cli::parse_args(args.into_iter().map(Into::into))?;

    logging::init_logging(cli_args.logging.clone())?;
    cancel::install_signal_handler()?;

    cli::dispatch(cli_args)
}
