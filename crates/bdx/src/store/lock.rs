use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

pub const LOCK_FILE: &str = "lock";

/// Exclusive writer lock for a store directory. Acquired on creation,
/// released on drop. A second writer fails fast instead of queueing.
#[derive(Debug)]
pub struct WriterLock {
    path: PathBuf,
}

impl WriterLock {
    pub fn acquire(store_dir: &Path) -> std::io::Result<Self> {
        let path = store_dir.join(LOCK_FILE);
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(mut file) => {
                let _ = writeln!(file, "{}", std::process::id());
                Ok(WriterLock { path })
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Err(std::io::Error::new(
                ErrorKind::AlreadyExists,
                format!(
                    "store is locked by another writer (remove {} if stale)",
                    path.display()
                ),
            )),
            Err(e) => Err(e),
        }
    }
}

impl Drop for WriterLock {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}
