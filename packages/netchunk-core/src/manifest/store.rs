//! Local manifest cache with atomic writes and timestamped backups.
//!
//! Every upload keeps a local copy of the manifest next to the remote
//! copies, so `list` and `verify` work even when only a subset of servers
//! is reachable. Saves go through `<path>.tmp` + rename so a crash never
//! leaves a half-written manifest, and the previous version is snapshotted
//! as `<path>.backup.<unix-seconds>` (bounded by `max_backups`).

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::manifest::{codec, Manifest, MANIFEST_EXTENSION};
use crate::time::now_timestamp;

/// Temp-file suffix used by the atomic write path.
const TEMP_SUFFIX: &str = ".tmp";

/// Infix between the manifest filename and the backup timestamp.
const BACKUP_INFIX: &str = ".backup.";

/// Local manifest cache rooted at one directory.
pub struct ManifestStore {
    directory: PathBuf,
    auto_backup: bool,
    max_backups: usize,
}

impl ManifestStore {
    /// Open (and create, if needed) a manifest store at `directory`.
    pub fn open(directory: impl Into<PathBuf>, auto_backup: bool, max_backups: usize) -> Result<Self> {
        let directory = directory.into();
        fs::create_dir_all(&directory)?;
        Ok(Self { directory, auto_backup, max_backups })
    }

    /// Directory this store is rooted at.
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// The on-disk path for `remote_name`.
    pub fn path_for(&self, remote_name: &str) -> Result<PathBuf> {
        validate_remote_name(remote_name)?;
        Ok(self.directory.join(format!("{}{}", remote_name, MANIFEST_EXTENSION)))
    }

    /// Whether a manifest for `remote_name` exists locally.
    pub fn exists(&self, remote_name: &str) -> bool {
        self.path_for(remote_name).map(|p| p.is_file()).unwrap_or(false)
    }

    /// Save a manifest atomically, snapshotting any previous version first.
    pub fn save(&self, manifest: &Manifest) -> Result<()> {
        let path = self.path_for(&manifest.remote_name)?;
        let json = codec::to_json(manifest)?;

        if self.auto_backup && path.is_file() {
            if let Err(e) = self.backup(&manifest.remote_name) {
                warn!(remote_name = %manifest.remote_name, error = %e, "manifest backup failed");
            }
        }

        let tmp_path = path.with_extension(format!(
            "{}{}",
            MANIFEST_EXTENSION.trim_start_matches('.'),
            TEMP_SUFFIX
        ));

        let mut file = fs::File::create(&tmp_path)?;
        file.write_all(json.as_bytes())?;
        file.sync_all()?;
        drop(file);

        fs::rename(&tmp_path, &path)?;
        debug!(remote_name = %manifest.remote_name, path = %path.display(), "manifest saved");

        self.cleanup_backups(&manifest.remote_name)?;
        Ok(())
    }

    /// Load and validate the manifest for `remote_name`.
    pub fn load(&self, remote_name: &str) -> Result<Manifest> {
        let path = self.path_for(remote_name)?;
        if !path.is_file() {
            return Err(Error::NotFound(format!("no local manifest for '{}'", remote_name)));
        }
        let json = fs::read_to_string(&path)?;
        codec::from_json(&json)
    }

    /// Delete the manifest for `remote_name`. Missing is not an error.
    pub fn delete(&self, remote_name: &str) -> Result<()> {
        let path = self.path_for(remote_name)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Remote names of every manifest in the store, sorted.
    pub fn list(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.directory)? {
            let entry = entry?;
            let filename = entry.file_name();
            let filename = filename.to_string_lossy();
            if let Some(name) = filename.strip_suffix(MANIFEST_EXTENSION) {
                // Skip temp files and backups
                if !name.contains(BACKUP_INFIX) && !filename.ends_with(TEMP_SUFFIX) {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    // ------------------------------------------------------------------------
    // Backups
    // ------------------------------------------------------------------------

    /// Snapshot the current manifest file as a timestamped backup.
    pub fn backup(&self, remote_name: &str) -> Result<i64> {
        let path = self.path_for(remote_name)?;
        if !path.is_file() {
            return Err(Error::NotFound(format!("no manifest to back up for '{}'", remote_name)));
        }
        let timestamp = now_timestamp();
        let backup_path = self.backup_path(remote_name, timestamp)?;
        fs::copy(&path, &backup_path)?;
        debug!(remote_name, timestamp, "manifest backed up");
        Ok(timestamp)
    }

    /// Timestamps of available backups, newest first.
    pub fn list_backups(&self, remote_name: &str) -> Result<Vec<i64>> {
        validate_remote_name(remote_name)?;
        let prefix = format!("{}{}{}", remote_name, MANIFEST_EXTENSION, BACKUP_INFIX);

        let mut timestamps = Vec::new();
        for entry in fs::read_dir(&self.directory)? {
            let filename = entry?.file_name();
            let filename = filename.to_string_lossy();
            if let Some(suffix) = filename.strip_prefix(&prefix) {
                if let Ok(ts) = suffix.parse::<i64>() {
                    timestamps.push(ts);
                }
            }
        }
        timestamps.sort_unstable_by(|a, b| b.cmp(a));
        Ok(timestamps)
    }

    /// Restore a backup over the live manifest file.
    ///
    /// `timestamp = None` restores the most recent backup. Restoring is an
    /// explicit operation; a corrupt live manifest is never silently
    /// replaced.
    pub fn restore_backup(&self, remote_name: &str, timestamp: Option<i64>) -> Result<i64> {
        let timestamp = match timestamp {
            Some(ts) => ts,
            None => *self
                .list_backups(remote_name)?
                .first()
                .ok_or_else(|| Error::NotFound(format!("no backups for '{}'", remote_name)))?,
        };

        let backup_path = self.backup_path(remote_name, timestamp)?;
        if !backup_path.is_file() {
            return Err(Error::NotFound(format!(
                "no backup of '{}' at timestamp {}",
                remote_name, timestamp
            )));
        }

        // Refuse to restore garbage.
        let json = fs::read_to_string(&backup_path)?;
        codec::from_json(&json)?;

        fs::copy(&backup_path, self.path_for(remote_name)?)?;
        Ok(timestamp)
    }

    /// Drop all but the `max_backups` most recent backups.
    pub fn cleanup_backups(&self, remote_name: &str) -> Result<usize> {
        let timestamps = self.list_backups(remote_name)?;
        let mut removed = 0;
        for ts in timestamps.iter().skip(self.max_backups) {
            fs::remove_file(self.backup_path(remote_name, *ts)?)?;
            removed += 1;
        }
        Ok(removed)
    }

    fn backup_path(&self, remote_name: &str, timestamp: i64) -> Result<PathBuf> {
        validate_remote_name(remote_name)?;
        Ok(self.directory.join(format!(
            "{}{}{}{}",
            remote_name, MANIFEST_EXTENSION, BACKUP_INFIX, timestamp
        )))
    }
}

/// Remote names become filenames and remote object paths, so path
/// separators and traversal sequences are rejected outright.
fn validate_remote_name(remote_name: &str) -> Result<()> {
    if remote_name.is_empty() {
        return Err(Error::InvalidInput("remote name must not be empty".into()));
    }
    if remote_name.contains('/') || remote_name.contains('\\') || remote_name.contains("..") {
        return Err(Error::InvalidInput(format!(
            "remote name '{}' must not contain path separators",
            remote_name
        )));
    }
    Ok(())
}

// ============================================================================
// TESTS
// ============================================================================
