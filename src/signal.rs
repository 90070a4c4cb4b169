//! Cancellation: SIGINT/SIGTERM flip a shared flag instead of killing the
//! process, so the poller can return and the teardown guards still run.

use anyhow::{bail, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

/// Shared cancellation flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

static INTERRUPT_TOKEN: OnceLock<CancelToken> = OnceLock::new();

extern "C" fn on_interrupt(_signal: libc::c_int) {
    // Only an atomic store happens here.
    if let Some(token) = INTERRUPT_TOKEN.get() {
        token.cancel();
    }
}

/// Route SIGINT and SIGTERM to `token`. May be called once per process.
pub fn install_interrupt_handler(token: &CancelToken) -> Result<()> {
    if INTERRUPT_TOKEN.set(token.clone()).is_err() {
        bail!("interrupt handler already installed");
    }

    let handler = on_interrupt as extern "C" fn(libc::c_int) as libc::sighandler_t;
    for signal in [libc::SIGINT, libc::SIGTERM] {
        // SAFETY: `on_interrupt` only performs an atomic store, which is
        // async-signal-safe.
        let previous = unsafe { libc::signal(signal, handler) };
        if previous == libc::SIG_ERR {
            bail!(
                "installing handler for signal {} failed: {}",
                signal,
                std::io::Error::last_os_error()
            );
        }
    }
    Ok(())
}
