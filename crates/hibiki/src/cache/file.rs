use std::{
    io::SeekFrom,
    path::{Path, PathBuf},
};

use tokio::{
    fs::{File, OpenOptions},
    io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt},
    sync::Mutex,
};

use super::range::ValidRegion;
use crate::error::{HibikiError, HibikiResult};

/// Cache of a single resource, backed by one file on disk.
///
/// Bytes are stored at their offset in the resource, so after a restart at a
/// non-zero offset the file has a hole before the valid region.
pub struct FileCache {
    path: PathBuf,
    inner: Mutex<FileCacheInner>,
}

struct FileCacheInner {
    file: Option<File>,
    region: ValidRegion,
    complete_size: Option<u64>,
}

impl FileCache {
    pub async fn open(path: impl Into<PathBuf>) -> HibikiResult<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                tokio::fs::create_dir_all(parent).await.map_err(|e| {
                    HibikiError::cache_io(&path, "creating cache directory", e)
                })?;
            }
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .await
            .map_err(|e| HibikiError::cache_io(&path, "using file as disc cache", e))?;

        Ok(Self {
            path,
            inner: Mutex::new(FileCacheInner {
                file: Some(file),
                region: ValidRegion::default(),
                complete_size: None,
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of bytes physically present in the file.
    pub async fn available(&self) -> HibikiResult<u64> {
        let inner = self.inner.lock().await;
        inner.available(&self.path).await
    }

    /// Reads up to `buffer.len()` bytes at `offset`. Returns 0 at the end of the file.
    pub async fn read(&self, buffer: &mut [u8], offset: u64) -> HibikiResult<usize> {
        let mut inner = self.inner.lock().await;
        let result = inner.read(&self.path, buffer, offset).await;
        match result {
            Ok(read) => Ok(read),
            Err(e) => {
                let available = inner.available(&self.path).await.unwrap_or_default();
                Err(HibikiError::cache_io(
                    &self.path,
                    format!(
                        "reading {} bytes with offset {offset} from file[{available} bytes]",
                        buffer.len()
                    ),
                    e,
                ))
            }
        }
    }

    /// Writes `data` at `offset` and moves the valid region's upper bound past it.
    pub async fn append(&self, data: &[u8], offset: u64) -> HibikiResult<()> {
        let mut inner = self.inner.lock().await;
        if inner.is_completed(&self.path).await {
            return Err(HibikiError::CacheCompleted(self.path.clone()));
        }

        let Some(file) = inner.file.as_mut() else {
            return Err(HibikiError::CacheClosed(self.path.clone()));
        };
        let write = async {
            file.seek(SeekFrom::Start(offset)).await?;
            file.write_all(data).await?;
            file.flush().await
        };
        write.await.map_err(|e| {
            HibikiError::cache_io(
                &self.path,
                format!("writing {} bytes at offset {offset}", data.len()),
                e,
            )
        })?;

        inner.region.set_upper_bound(offset + data.len() as u64);
        Ok(())
    }

    /// Whether the file holds the whole resource from byte 0.
    ///
    /// Errors are logged and reported as "not completed".
    pub async fn is_completed(&self) -> bool {
        let inner = self.inner.lock().await;
        inner.is_completed(&self.path).await
    }

    /// Records the total size of the resource.
    ///
    /// A file already holding exactly `size` bytes while nothing else has been
    /// cached yet is adopted as complete.
    pub async fn set_known_size(&self, size: Option<u64>) {
        let mut inner = self.inner.lock().await;
        inner.complete_size = size;

        if let Some(size) = size {
            if inner.region == ValidRegion::default()
                && inner.available(&self.path).await.ok() == Some(size)
            {
                inner.region.set_upper_bound(size);
            }
        }
    }

    pub async fn known_size(&self) -> Option<u64> {
        self.inner.lock().await.complete_size
    }

    /// Starts a new epoch at `offset`: nothing is valid and the file is emptied.
    pub async fn reset_to(&self, offset: u64) -> HibikiResult<()> {
        let mut inner = self.inner.lock().await;
        inner.region.set_start(offset);
        inner.region.set_upper_bound(offset);

        let Some(file) = inner.file.as_mut() else {
            return Err(HibikiError::CacheClosed(self.path.clone()));
        };
        file.set_len(0)
            .await
            .map_err(|e| HibikiError::cache_io(&self.path, "truncating", e))?;
        log::debug!(
            "Cache {} restarts at offset {offset}",
            self.path.display()
        );
        Ok(())
    }

    /// Cuts the file down to `size` bytes, dropping anything after the resource's end.
    pub async fn truncate(&self, size: u64) -> HibikiResult<()> {
        let mut inner = self.inner.lock().await;
        let Some(file) = inner.file.as_mut() else {
            return Err(HibikiError::CacheClosed(self.path.clone()));
        };
        let len = file
            .metadata()
            .await
            .map_err(|e| HibikiError::cache_io(&self.path, "reading length", e))?
            .len();
        if len > size {
            file.set_len(size)
                .await
                .map_err(|e| HibikiError::cache_io(&self.path, "truncating", e))?;
        }
        if inner.region.upper_bound() > size {
            inner.region.set_upper_bound(size);
        }
        Ok(())
    }

    /// Start of the valid region.
    pub async fn offset(&self) -> u64 {
        self.inner.lock().await.region.start()
    }

    pub async fn region(&self) -> ValidRegion {
        self.inner.lock().await.region
    }

    pub async fn in_range(&self, offset: u64) -> bool {
        self.inner.lock().await.region.contains(offset)
    }

    /// Releases the file. Closing twice is a no-op.
    pub async fn close(&self) -> HibikiResult<()> {
        let mut inner = self.inner.lock().await;
        let Some(mut file) = inner.file.take() else {
            return Ok(());
        };

        let close = async {
            file.flush().await?;
            file.sync_all().await
        };
        close
            .await
            .map_err(|e| HibikiError::cache_io(&self.path, "closing", e))
    }
}

impl FileCacheInner {
    async fn available(&self, path: &Path) -> HibikiResult<u64> {
        let Some(file) = &self.file else {
            return Err(HibikiError::CacheClosed(path.to_path_buf()));
        };
        let metadata = file
            .metadata()
            .await
            .map_err(|e| HibikiError::cache_io(path, "reading length", e))?;
        Ok(metadata.len())
    }

    async fn read(&mut self, path: &Path, buffer: &mut [u8], offset: u64) -> std::io::Result<usize> {
        let Some(file) = self.file.as_mut() else {
            return Err(std::io::Error::other(HibikiError::CacheClosed(
                path.to_path_buf(),
            )));
        };
        file.seek(SeekFrom::Start(offset)).await?;
        file.read(buffer).await
    }

    async fn is_completed(&self, path: &Path) -> bool {
        let Some(complete_size) = self.complete_size else {
            return false;
        };
        match self.available(path).await {
            Ok(available) => self.region.start() == 0 && available >= complete_size,
            Err(e) => {
                log::warn!("Failed to check completion of {}: {e}", path.display());
                false
            }
        }
    }
}
