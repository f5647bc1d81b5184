use crate::domain::ports::Storage;
use crate::utils::error::{PostexError, Result};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Snapshot files under a data directory.
#[derive(Debug, Clone)]
pub struct LocalStorage {
    base_path: PathBuf,
}

impl LocalStorage {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }
}

/// Advisory lock on `<snapshot>.lock`; released when the file is closed.
#[derive(Debug)]
pub struct FileLock {
    _file: File,
}

impl Storage for LocalStorage {
    type Lock = FileLock;

    async fn lock(&self, path: &str) -> Result<FileLock> {
        tokio::fs::create_dir_all(&self.base_path).await?;
        let lock_path = self.base_path.join(format!("{}.lock", path));

        // 阻塞式等待，放到 blocking 執行緒
        let file = tokio::task::spawn_blocking(move || -> std::io::Result<File> {
            let file = OpenOptions::new()
                .create(true)
                .truncate(false)
                .write(true)
                .open(&lock_path)?;
            file.lock()?;
            Ok(file)
        })
        .await
        .map_err(|e| PostexError::IoError(std::io::Error::other(e)))??;

        Ok(FileLock { _file: file })
    }

    async fn read_file(&self, path: &str) -> Result<Vec<u8>> {
        let full_path = self.base_path.join(path);
        let data = tokio::fs::read(full_path).await?;
        Ok(data)
    }

    async fn write_file(&self, path: &str, data: &[u8]) -> Result<()> {
        let full_path = self.base_path.join(path);

        if let Some(parent) = full_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        // 先寫暫存檔再改名，避免中斷時留下半個快照
        let tmp_path = full_path.with_extension("tmp");
        tokio::fs::write(&tmp_path, data).await?;
        tokio::fs::rename(&tmp_path, &full_path).await?;
        Ok(())
    }
}

/// Process-local storage; cloned handles share the same files.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    files: Arc<Mutex<HashMap<String, Vec<u8>>>>,
    locks: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Storage for MemoryStorage {
    type Lock = OwnedMutexGuard<()>;

    async fn lock(&self, path: &str) -> Result<OwnedMutexGuard<()>> {
        let lock = {
            let mut locks = self.locks.lock().await;
            Arc::clone(locks.entry(path.to_string()).or_default())
        };
        Ok(lock.lock_owned().await)
    }

    async fn read_file(&self, path: &str) -> Result<Vec<u8>> {
        let files = self.files.lock().await;
        files.get(path).cloned().ok_or_else(|| {
            PostexError::IoError(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("File not found: {}", path),
            ))
        })
    }

    async fn write_file(&self, path: &str, data: &[u8]) -> Result<()> {
        let mut files = self.files.lock().await;
        files.insert(path.to_string(), data.to_vec());
        Ok(())
    }
}

/// Memory storage whose writes can be switched to fail.
#[cfg(test)]
#[derive(Debug, Clone, Default)]
pub(crate) struct FlakyStorage {
    inner: MemoryStorage,
    fail_writes: Arc<std::sync::atomic::AtomicBool>,
}

#[cfg(test)]
impl FlakyStorage {
    pub(crate) fn fail_writes(&self, fail: bool) {
        self.fail_writes
            .store(fail, std::sync::atomic::Ordering::SeqCst);
    }
}

#[cfg(test)]
impl Storage for FlakyStorage {
    type Lock = OwnedMutexGuard<()>;

    async fn lock(&self, path: &str) -> Result<Self::Lock> {
        self.inner.lock(path).await
    }

    async fn read_file(&self, path: &str) -> Result<Vec<u8>> {
        self.inner.read_file(path).await
    }

    async fn write_file(&self, path: &str, data: &[u8]) -> Result<()> {
        if self.fail_writes.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(PostexError::IoError(std::io::Error::other("disk full")));
        }
        self.inner.write_file(path, data).await
    }
}
