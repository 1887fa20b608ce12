//! Crash-atomic stable storage for the local epoch counter.
//!
//! The epoch is the only piece of recovery state this system ever persists:
//! 8 bytes big-endian in a single file, replaced by writing a temp sibling
//! and renaming it over the canonical file. The rename is the single point
//! at which a new value becomes visible, so a crash at any moment leaves the
//! canonical file holding either the old value or the new one.

use std::path::{Path, PathBuf};

use crate::server::ReplicaId;
use crate::utils::WintersetError;

use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// Fixed name of the epoch file inside the log directory.
const EPOCH_FILE_NAME: &str = "sync.epoch";

/// Fixed suffix of the temp sibling used for atomic replacement.
const TEMP_SUFFIX: &str = ".tmp";

/// Stable-storage backend for the local epoch number.
#[derive(Debug, Clone)]
pub struct EpochFile {
    /// My replica ID.
    me: ReplicaId,

    /// Canonical epoch file path.
    path: PathBuf,

    /// Temp sibling path renamed over the canonical file on write.
    temp_path: PathBuf,
}

impl EpochFile {
    /// Creates an epoch file handle under the given log directory. No file
    /// I/O happens until `read()`/`write()`.
    pub fn new(me: ReplicaId, log_dir: &Path) -> Self {
        let path = log_dir.join(EPOCH_FILE_NAME);
        let mut temp_name = String::from(EPOCH_FILE_NAME);
        temp_name.push_str(TEMP_SUFFIX);
        let temp_path = log_dir.join(temp_name);

        EpochFile {
            me,
            path,
            temp_path,
        }
    }

    /// Reads the last persisted epoch number. Returns 0 if no epoch has ever
    /// been persisted.
    pub async fn read(&self) -> Result<u64, WintersetError> {
        if !fs::try_exists(&self.path).await? {
            return Ok(0);
        }

        let mut file = File::open(&self.path).await?;
        let epoch = file.read_u64().await?;
        Ok(epoch)
    }

    /// Atomically replaces the persisted epoch number with `epoch`. Callers
    /// must only write values strictly greater than the last `read()`; any
    /// failure here is fatal to recovery and must not be swallowed.
    pub async fn write(&self, epoch: u64) -> Result<(), WintersetError> {
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir).await?;
        }

        // a torn write can only ever affect the temp sibling
        let mut temp_file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&self.temp_path)
            .await?;
        temp_file.write_u64(epoch).await?;
        temp_file.sync_data().await?;

        // the rename is the visibility point
        fs::rename(&self.temp_path, &self.path).await?;

        pf_debug!(self.me; "persisted epoch {} to '{}'",
                           epoch, self.path.display());
        Ok(())
    }
}

#[cfg(test)]
mod epochfile_tests {
    use super::*;

    async fn prepare_test_dir(dir: &str) -> Result<(), WintersetError> {
        if fs::try_exists(dir).await? {
            fs::remove_dir_all(dir).await?;
        }
        fs::create_dir_all(dir).await?;
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn read_absent_is_zero() -> Result<(), WintersetError> {
        let dir = "/tmp/test-epoch-0";
        prepare_test_dir(dir).await?;
        let epoch_file = EpochFile::new(0, Path::new(dir));
        assert_eq!(epoch_file.read().await?, 0);
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn write_then_read() -> Result<(), WintersetError> {
        let dir = "/tmp/test-epoch-1";
        prepare_test_dir(dir).await?;
        let epoch_file = EpochFile::new(0, Path::new(dir));
        epoch_file.write(1).await?;
        assert_eq!(epoch_file.read().await?, 1);
        epoch_file.write(7).await?;
        assert_eq!(epoch_file.read().await?, 7);
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn file_is_big_endian_u64() -> Result<(), WintersetError> {
        let dir = "/tmp/test-epoch-2";
        prepare_test_dir(dir).await?;
        let epoch_file = EpochFile::new(0, Path::new(dir));
        epoch_file.write(0x0102030405060708).await?;
        let raw = fs::read(format!("{}/{}", dir, EPOCH_FILE_NAME)).await?;
        assert_eq!(raw, vec![1, 2, 3, 4, 5, 6, 7, 8]);
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn torn_temp_write_keeps_old_value() -> Result<(), WintersetError> {
        let dir = "/tmp/test-epoch-3";
        prepare_test_dir(dir).await?;
        let epoch_file = EpochFile::new(0, Path::new(dir));
        epoch_file.write(5).await?;

        // simulate a crash that tore the temp file before the rename
        let temp_path = format!("{}/{}{}", dir, EPOCH_FILE_NAME, TEMP_SUFFIX);
        fs::write(&temp_path, vec![0xde, 0xad]).await?;
        assert_eq!(epoch_file.read().await?, 5);

        // a subsequent write replaces the torn temp file cleanly
        epoch_file.write(6).await?;
        assert_eq!(epoch_file.read().await?, 6);
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn rename_failure_surfaces() -> Result<(), WintersetError> {
        let dir = "/tmp/test-epoch-4";
        prepare_test_dir(dir).await?;
        // a directory squatting on the canonical path makes rename fail
        fs::create_dir_all(format!("{}/{}", dir, EPOCH_FILE_NAME)).await?;
        let epoch_file = EpochFile::new(0, Path::new(dir));
        assert!(epoch_file.write(1).await.is_err());
        Ok(())
    }
}
