//! Signal handling using signal-hook.
//!
//! The first SIGINT, SIGTERM or SIGHUP:
//! - sets the shutdown flag and wakes [`wait_for_shutdown`] callers
//! - signals abort on every registered [`AbortHandle`], so an engine busy
//!   opening or unlocking a volume group stops early
//!
//! A second signal exits the process immediately.

use std::sync::OnceLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use fvde_core::AbortHandle;
use parking_lot::{Condvar, Mutex};
use signal_hook::consts::TERM_SIGNALS;

/// Exit status after a second signal, as a shell reports SIGINT.
const FORCED_EXIT_CODE: i32 = 130;

#[derive(Default)]
struct Shutdown {
    requested: Mutex<bool>,
    woken: Condvar,
    aborts: Mutex<Vec<AbortHandle>>,
}

static SHUTDOWN: OnceLock<Shutdown> = OnceLock::new();
static INSTALLED: AtomicBool = AtomicBool::new(false);

fn shutdown() -> &'static Shutdown {
    SHUTDOWN.get_or_init(Shutdown::default)
}

/// Installs the SIGINT/SIGTERM (and SIGHUP on unix) listener.
///
/// Only the first call installs anything.
pub fn install_signal_handler() -> Result<(), std::io::Error> {
    if INSTALLED.swap(true, Ordering::SeqCst) {
        return Ok(());
    }

    spawn_listener()
}

#[cfg(unix)]
fn spawn_listener() -> Result<(), std::io::Error> {
    let mut watched = TERM_SIGNALS.to_vec();
    watched.push(signal_hook::consts::SIGHUP);
    let mut signals = signal_hook::iterator::Signals::new(&watched)?;

    std::thread::Builder::new()
        .name("fvde-signal".to_string())
        .spawn(move || {
            for signal in signals.forever() {
                on_signal(signal);
            }
        })?;
    Ok(())
}

// No signal iterator on Windows: the handler only raises a flag.
#[cfg(windows)]
fn spawn_listener() -> Result<(), std::io::Error> {
    use std::sync::Arc;

    let raised = Arc::new(AtomicBool::new(false));
    for &signal in TERM_SIGNALS {
        signal_hook::flag::register(signal, Arc::clone(&raised))?;
    }

    std::thread::Builder::new()
        .name("fvde-signal".to_string())
        .spawn(move || {
            loop {
                if raised.swap(false, Ordering::SeqCst) {
                    on_signal(0);
                }
                std::thread::sleep(Duration::from_millis(50));
            }
        })?;
    Ok(())
}

fn on_signal(signal: i32) {
    if shutdown_requested() {
        tracing::warn!(signal, "second signal, exiting");
        std::process::exit(FORCED_EXIT_CODE);
    }
    tracing::info!(signal, "shutdown signal received");
    request_shutdown();
    eprintln!("\nUnmounting (Ctrl+C again to force exit)");
}

/// Whether [`install_signal_handler`] has run in this process.
pub fn handler_installed() -> bool {
    INSTALLED.load(Ordering::SeqCst)
}

/// Forwards the next shutdown request to `handle`.
///
/// If shutdown was already requested the abort is signalled right away.
pub fn register_abort(handle: AbortHandle) {
    let state = shutdown();
    let mut aborts = state.aborts.lock();
    if *state.requested.lock() {
        handle.signal();
    }
    aborts.push(handle);
}

/// Requests shutdown as if a signal had arrived.
pub fn request_shutdown() {
    let state = shutdown();
    {
        let aborts = state.aborts.lock();
        *state.requested.lock() = true;
        aborts.iter().for_each(AbortHandle::signal);
        tracing::debug!(handles = aborts.len(), "abort forwarded");
    }
    state.woken.notify_all();
}

pub fn shutdown_requested() -> bool {
    *shutdown().requested.lock()
}

/// Blocks until shutdown is requested.
pub fn wait_for_shutdown() {
    let state = shutdown();
    let mut requested = state.requested.lock();
    while !*requested {
        state.woken.wait(&mut requested);
    }
}

/// Like [`wait_for_shutdown`] but gives up after `timeout`.
///
/// Returns whether shutdown was requested.
pub fn wait_for_shutdown_timeout(timeout: Duration) -> bool {
    let state = shutdown();
    let mut requested = state.requested.lock();
    if !*requested {
        state.woken.wait_for(&mut requested, timeout);
    }
    *requested
}

/// Resets the shutdown flag and forgets registered abort handles.
pub fn clear_shutdown() {
    let state = shutdown();
    state.aborts.lock().clear();
    *state.requested.lock() = false;
}
