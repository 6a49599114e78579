//! In-memory volume engine.

use crate::engine::{EngineOptions, LogicalVolume, UnlockOutcome, VolumeEngine, VolumeGroup};
use crate::error::{EngineError, EngineResult};
use crate::pool::IoPool;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Ordered record of engine calls, shared by the engine, its group and
/// every volume handle it hands out.
#[derive(Debug, Clone, Default)]
pub struct EventLog(Arc<Mutex<Vec<String>>>);

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, event: impl Into<String>) {
        self.0.lock().push(event.into());
    }

    pub fn events(&self) -> Vec<String> {
        self.0.lock().clone()
    }

    /// Events that start with `prefix`.
    pub fn matching(&self, prefix: &str) -> Vec<String> {
        self.0
            .lock()
            .iter()
            .filter(|event| event.starts_with(prefix))
            .cloned()
            .collect()
    }
}

#[derive(Debug, Clone, Default)]
struct Secrets {
    key: Option<Vec<u8>>,
    password: Option<String>,
    recovery_password: Option<String>,
}

impl Secrets {
    fn is_empty(&self) -> bool {
        self.key.is_none() && self.password.is_none() && self.recovery_password.is_none()
    }

    fn accepts(&self, offered: &Secrets) -> bool {
        fn matches<T: PartialEq>(expected: Option<&T>, given: Option<&T>) -> bool {
            expected.is_some() && expected == given
        }
        matches(self.key.as_ref(), offered.key.as_ref())
            || matches(self.password.as_ref(), offered.password.as_ref())
            || matches(
                self.recovery_password.as_ref(),
                offered.recovery_password.as_ref(),
            )
    }
}

/// A logical volume held in memory.
///
/// Used both as a template registered with [`MemoryEngine`] and as the
/// handle the engine returns for each `logical_volume` call.
#[derive(Debug, Clone)]
pub struct MemoryVolume {
    data: Arc<Vec<u8>>,
    name: Option<String>,
    identifier: [u8; 16],
    secrets: Secrets,
    offered: Secrets,
    locked: bool,
    unlock_failure: Option<String>,
    // Set only on handed-out handles.
    number: usize,
    log: Option<EventLog>,
    abort: Arc<AtomicBool>,
}

impl MemoryVolume {
    /// A volume without encryption; it unlocks with no credentials.
    pub fn unlocked(data: Vec<u8>) -> Self {
        Self {
            data: Arc::new(data),
            name: None,
            identifier: [0u8; 16],
            secrets: Secrets::default(),
            offered: Secrets::default(),
            locked: false,
            unlock_failure: None,
            number: 0,
            log: None,
            abort: Arc::new(AtomicBool::new(false)),
        }
    }

    /// A locked volume that opens with `password`.
    pub fn with_password(data: Vec<u8>, password: &str) -> Self {
        let mut volume = Self::unlocked(data);
        volume.secrets.password = Some(password.to_owned());
        volume.locked = true;
        volume
    }

    /// A locked volume that opens with the raw `key`.
    pub fn with_key(data: Vec<u8>, key: &[u8]) -> Self {
        let mut volume = Self::unlocked(data);
        volume.secrets.key = Some(key.to_vec());
        volume.locked = true;
        volume
    }

    /// Also accept `recovery_password`.
    #[must_use]
    pub fn recovery_password(mut self, recovery_password: &str) -> Self {
        self.secrets.recovery_password = Some(recovery_password.to_owned());
        self.locked = true;
        self
    }

    /// Every unlock attempt fails hard with `reason`.
    #[must_use]
    pub fn failing_unlock(mut self, reason: &str) -> Self {
        self.unlock_failure = Some(reason.to_owned());
        self
    }

    #[must_use]
    pub fn named(mut self, name: &str) -> Self {
        self.name = Some(name.to_owned());
        self
    }

    #[must_use]
    pub fn identifier(mut self, identifier: [u8; 16]) -> Self {
        self.identifier = identifier;
        self
    }

    pub fn into_boxed(self) -> Box<dyn LogicalVolume> {
        Box::new(self)
    }

    fn record(&self, event: &str) {
        if let Some(log) = &self.log {
            log.push(format!("volume {}: {event}", self.number));
        }
    }
}

impl LogicalVolume for MemoryVolume {
    fn identifier(&self) -> EngineResult<[u8; 16]> {
        Ok(self.identifier)
    }

    fn name(&self) -> EngineResult<Option<String>> {
        Ok(self.name.clone())
    }

    fn size(&self) -> EngineResult<u64> {
        Ok(self.data.len() as u64)
    }

    fn is_locked(&self) -> EngineResult<bool> {
        Ok(self.locked)
    }

    fn set_key(&mut self, key: &[u8]) -> EngineResult<()> {
        self.record("set_key");
        self.offered.key = Some(key.to_vec());
        Ok(())
    }

    fn set_password(&mut self, password: &str) -> EngineResult<()> {
        self.record("set_password");
        self.offered.password = Some(password.to_owned());
        Ok(())
    }

    fn set_recovery_password(&mut self, recovery_password: &str) -> EngineResult<()> {
        self.record("set_recovery_password");
        self.offered.recovery_password = Some(recovery_password.to_owned());
        Ok(())
    }

    fn unlock(&mut self) -> EngineResult<UnlockOutcome> {
        if let Some(reason) = &self.unlock_failure {
            self.record("unlock failed");
            return Err(EngineError::Unlock(reason.clone()));
        }
        if self.locked && (self.secrets.is_empty() || self.secrets.accepts(&self.offered)) {
            self.locked = false;
        }
        let outcome = if self.locked {
            UnlockOutcome::Locked
        } else {
            UnlockOutcome::Unlocked
        };
        self.record(match outcome {
            UnlockOutcome::Unlocked => "unlock -> unlocked",
            UnlockOutcome::Locked => "unlock -> locked",
        });
        Ok(outcome)
    }

    fn read_at(&self, buf: &mut [u8], offset: u64) -> EngineResult<usize> {
        if self.abort.load(Ordering::SeqCst) {
            return Err(EngineError::Aborted);
        }
        if self.locked {
            return Err(EngineError::Locked);
        }
        let Ok(start) = usize::try_from(offset) else {
            return Ok(0);
        };
        if start >= self.data.len() {
            return Ok(0);
        }
        let len = buf.len().min(self.data.len() - start);
        buf[..len].copy_from_slice(&self.data[start..start + len]);
        Ok(len)
    }
}

impl Drop for MemoryVolume {
    fn drop(&mut self) {
        self.record("released");
    }
}

/// Engine serving [`MemoryVolume`] templates.
#[derive(Debug, Clone, Default)]
pub struct MemoryEngine {
    volumes: Vec<MemoryVolume>,
    open_failure: Option<String>,
    log: EventLog,
    abort: Arc<AtomicBool>,
}

impl MemoryEngine {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_volume(mut self, volume: MemoryVolume) -> Self {
        self.volumes.push(volume);
        self
    }

    /// `open` fails with `reason`.
    #[must_use]
    pub fn failing_open(mut self, reason: &str) -> Self {
        self.open_failure = Some(reason.to_owned());
        self
    }

    pub fn volume_count(&self) -> usize {
        self.volumes.len()
    }

    pub fn log(&self) -> &EventLog {
        &self.log
    }

    pub fn abort_signalled(&self) -> bool {
        self.abort.load(Ordering::SeqCst)
    }
}

impl VolumeEngine for MemoryEngine {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn open(
        &self,
        pool: Arc<IoPool>,
        options: &EngineOptions,
    ) -> EngineResult<Arc<dyn VolumeGroup>> {
        if let Some(reason) = &self.open_failure {
            return Err(EngineError::Open(reason.clone()));
        }
        self.log.push(format!("open: {} sources", pool.len()));
        if let Some(plist) = &options.encrypted_root_plist {
            self.log.push(format!("plist: {}", plist.display()));
        }
        Ok(Arc::new(MemoryGroup {
            volumes: self.volumes.clone(),
            log: self.log.clone(),
            abort: Arc::clone(&self.abort),
            _pool: pool,
        }))
    }
}

struct MemoryGroup {
    volumes: Vec<MemoryVolume>,
    log: EventLog,
    abort: Arc<AtomicBool>,
    _pool: Arc<IoPool>,
}

impl VolumeGroup for MemoryGroup {
    fn logical_volume_count(&self) -> EngineResult<usize> {
        Ok(self.volumes.len())
    }

    fn logical_volume(&self, index: usize) -> EngineResult<Box<dyn LogicalVolume>> {
        let mut volume = self
            .volumes
            .get(index)
            .cloned()
            .ok_or(EngineError::NoSuchVolume(index))?;
        volume.number = index + 1;
        volume.log = Some(self.log.clone());
        volume.abort = Arc::clone(&self.abort);
        Ok(Box::new(volume))
    }

    fn signal_abort(&self) {
        self.abort.store(true, Ordering::SeqCst);
        self.log.push("abort");
    }
}

impl Drop for MemoryGroup {
    fn drop(&mut self) {
        self.log.push("group released");
    }
}
