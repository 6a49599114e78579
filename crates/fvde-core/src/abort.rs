//! Abort flag shared between the signal path and the volume engine.

use crate::engine::VolumeGroup;
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

#[derive(Default)]
struct AbortState {
    aborted: AtomicBool,
    group: Mutex<Option<Weak<dyn VolumeGroup>>>,
}

/// Cloneable handle that stops engine work in progress.
///
/// The mount session attaches its volume group once opened; signalling
/// before that only sets the flag, which the session checks between
/// volumes.
#[derive(Clone, Default)]
pub struct AbortHandle {
    inner: Arc<AbortState>,
}

impl AbortHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the flag and forwards the abort to the attached volume group.
    pub fn signal(&self) {
        if !self.inner.aborted.swap(true, Ordering::SeqCst) {
            tracing::info!("Abort requested");
        }
        let group = self.inner.group.lock().as_ref().and_then(Weak::upgrade);
        if let Some(group) = group {
            group.signal_abort();
        }
    }

    pub fn is_aborted(&self) -> bool {
        self.inner.aborted.load(Ordering::SeqCst)
    }

    pub(crate) fn attach(&self, group: &Arc<dyn VolumeGroup>) {
        *self.inner.group.lock() = Some(Arc::downgrade(group));
        if self.is_aborted() {
            group.signal_abort();
        }
    }

    pub(crate) fn detach(&self) {
        self.inner.group.lock().take();
    }
}

impl fmt::Debug for AbortHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AbortHandle")
            .field("aborted", &self.is_aborted())
            .field("attached", &self.inner.group.lock().is_some())
            .finish()
    }
}
