//! Cooperative cancellation.
//!
//! The engine polls a [`CancelToken`] at every block boundary instead of
//! consulting process-global flags. One process-wide source installs a signal
//! handler that trips the shared token; workers carry clones.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use tracing::warn;

use crate::{Error, Result};

#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Fail fatally when the token has been tripped. `what` names the phase
    /// for the error message, e.g. "page reading".
    pub fn check(&self, what: &'static str) -> Result<()> {
        if self.is_cancelled() {
            return Err(Error::Interrupted(what).into());
        }
        Ok(())
    }
}

fn process_token() -> &'static CancelToken {
    static TOKEN: OnceLock<CancelToken> = OnceLock::new();
    TOKEN.get_or_init(CancelToken::new)
}

/// The token shared by all workers of this process.
pub fn shared_token() -> CancelToken {
    process_token().clone()
}

/// Install the SIGINT/SIGTERM handler that trips the shared token. Safe to
/// call once per process; the CLI entry point does this before dispatch.
pub fn install_signal_handler() -> Result<()> {
    let token = shared_token();
    ctrlc::set_handler(move || {
        warn!("termination signal received, cancelling");
        token.cancel();
    })
    .map_err(|e| Error::Cli(format!("cannot install signal handler: {e}")))?;
    Ok(())
}
