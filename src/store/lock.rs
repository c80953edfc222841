use std::fs::{self, File, OpenOptions};
use std::path::Path;

use fs2::FileExt;

use crate::error::{ChainError, ChainResult};

const LOCK_FILE_NAME: &str = "chainstore.lock";

/// Exclusive lock on the data directory. A second writer fails fast
/// instead of corrupting the stores.
#[derive(Debug)]
pub struct StoreLockGuard {
    file: File,
}

impl StoreLockGuard {
    pub fn acquire(data_dir: &Path) -> ChainResult<Self> {
        fs::create_dir_all(data_dir)?;

        let lock_path = data_dir.join(LOCK_FILE_NAME);
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&lock_path)?;

        if FileExt::try_lock_exclusive(&file).is_err() {
            return Err(ChainError::DataDirLocked { path: lock_path });
        }

        Ok(Self { file })
    }
}

impl Drop for StoreLockGuard {
    fn drop(&mut self) {
        // Release errors are unrecoverable during drop; the OS frees the
        // lock with the descriptor anyway.
        let _ = self.file.unlock();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    use tempfile::tempdir_in;

    #[test]
    fn second_writer_is_rejected() {
        let workspace_tmp = std::env::current_dir().unwrap().join("target/testdata");
        fs::create_dir_all(&workspace_tmp).unwrap();
        let tmp = tempdir_in(&workspace_tmp).unwrap();

        let guard = StoreLockGuard::acquire(tmp.path()).expect("first lock");
        let err = StoreLockGuard::acquire(tmp.path()).unwrap_err();
        match err {
            ChainError::DataDirLocked { path } => {
                assert!(path.ends_with(LOCK_FILE_NAME));
            }
            other => panic!("unexpected error: {other:?}"),
        }

        drop(guard);
        StoreLockGuard::acquire(tmp.path()).expect("lock reacquired after drop");
    }
}
