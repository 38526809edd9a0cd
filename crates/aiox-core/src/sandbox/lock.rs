use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use fs2::FileExt;
use log::{debug, warn};
use uuid::Uuid;

use crate::constants::RUN_LOCK_FILE;
use crate::errors::CoreEngineError;

const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Lock exclusivo de un run sobre `logs/.run.lock`.
///
/// Es un lock advisory del sistema operativo: si el proceso muere, el kernel lo
/// libera. Se suelta explícitamente en `Drop`.
#[derive(Debug)]
pub struct RunLock {
    file: File,
    path: PathBuf,
    run_id: Uuid,
}

impl RunLock {
    pub(crate) fn acquire(root: &Path, run_id: Uuid, timeout: Duration) -> Result<Self, CoreEngineError> {
        let path = root.join(RUN_LOCK_FILE);
        let mut file = OpenOptions::new().create(true)
                                         .read(true)
                                         .write(true)
                                         .truncate(false)
                                         .open(&path)?;
        let started = Instant::now();
        loop {
            match FileExt::try_lock_exclusive(&file) {
                Ok(()) => break,
                Err(e) if e.kind() == ErrorKind::WouldBlock || e.raw_os_error() == fs2::lock_contended_error().raw_os_error() => {
                    if started.elapsed() >= timeout {
                        return Err(CoreEngineError::SandboxBusy(format!("{} held by another run", path.display())));
                    }
                    thread::sleep(POLL_INTERVAL);
                }
                Err(e) => return Err(CoreEngineError::Io(format!("lock {}: {e}", path.display()))),
            }
        }
        // Holder informativo; el contenido no participa del locking.
        file.set_len(0)?;
        file.seek(SeekFrom::Start(0))?;
        writeln!(file, "{run_id} {}", std::process::id())?;
        debug!("run lock acquired by {run_id}");
        Ok(Self { file, path, run_id })
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            warn!("failed to release run lock {}: {e}", self.path.display());
        }
    }
}
