use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::Serialize;
use walkdir::WalkDir;

use crate::classes::ClassSet;
use crate::error::StorageError;
use crate::sanitize::{redact_path, sanitize_filename, split_extension};

const MAX_NAME_ATTEMPTS: usize = 1000;

/// A labelled file waiting in the upload area.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UploadedSample {
    pub label: String,
    pub path: PathBuf,
}

/// A file received from a client.
#[derive(Debug, Clone)]
pub struct IncomingFile {
    pub filename: String,
    pub content: Vec<u8>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UploadReport {
    pub uploaded_count: usize,
    pub saved_path: PathBuf,
    pub stored: Vec<PathBuf>,
    pub errors: Vec<String>,
}

pub fn is_image_path(path: &Path) -> bool {
    mime_guess::from_path(path)
        .first()
        .map(|m| m.type_() == mime_guess::mime::IMAGE)
        .unwrap_or(false)
}

/// Move a file from `src` to `dst`, using `rename` when possible and
/// copy + delete across filesystems.
fn move_file(src: &Path, dst: &Path) -> Result<(), StorageError> {
    if std::fs::rename(src, dst).is_ok() {
        return Ok(());
    }

    std::fs::copy(src, dst).map_err(|e| StorageError::MoveFile {
        from: src.to_path_buf(),
        to: dst.to_path_buf(),
        source: e,
    })?;
    std::fs::remove_file(src).map_err(|e| StorageError::MoveFile {
        from: src.to_path_buf(),
        to: dst.to_path_buf(),
        source: e,
    })?;
    Ok(())
}

/// Labelled training uploads stored as `<root>/<label>/<file>`.
pub struct UploadStore {
    root: PathBuf,
    archive_root: PathBuf,
    classes: ClassSet,
}

impl UploadStore {
    pub fn new<P: AsRef<Path>, Q: AsRef<Path>>(root: P, archive_root: Q, classes: ClassSet) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            archive_root: archive_root.as_ref().to_path_buf(),
            classes,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn classes(&self) -> &ClassSet {
        &self.classes
    }

    pub fn validate_label(&self, label: &str) -> Result<(), StorageError> {
        if self.classes.contains(label) {
            Ok(())
        } else {
            Err(StorageError::InvalidLabel {
                label: label.to_string(),
                allowed: self.classes.labels().join(", "),
            })
        }
    }

    /// Stores every file under the label's directory. The label is checked
    /// before anything touches the disk. Individual write failures are
    /// reported per file rather than aborting the batch.
    pub fn store_batch(
        &self,
        label: &str,
        files: Vec<IncomingFile>,
    ) -> Result<UploadReport, StorageError> {
        self.validate_label(label)?;

        let _span = tracing::info_span!("store_batch", label, files = files.len()).entered();

        let dir_path = self.root.join(label);
        ensure_directory(&dir_path)?;

        let mut stored = Vec::new();
        let mut errors = Vec::new();
        for file in files {
            let filename = sanitize_filename(&file.filename);
            match store_exclusive(&dir_path, &filename, &file.content) {
                Ok(path) => {
                    log::debug!("Stored upload {}", redact_path(&path));
                    stored.push(path);
                }
                Err(e) => {
                    log::warn!("Failed to store upload {}: {}", filename, e);
                    errors.push(format!("{}: {}", filename, e));
                }
            }
        }

        log::info!(
            "Stored {} training file(s) for label {}",
            stored.len(),
            label
        );

        Ok(UploadReport {
            uploaded_count: stored.len(),
            saved_path: dir_path,
            stored,
            errors,
        })
    }

    /// All pending image files, grouped by their label directory.
    pub fn scan(&self) -> Result<Vec<UploadedSample>, StorageError> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }

        let mut samples = Vec::new();
        for entry in WalkDir::new(&self.root)
            .min_depth(2)
            .max_depth(2)
            .sort_by_file_name()
        {
            let entry = entry.map_err(|e| StorageError::ScanFailed {
                path: self.root.clone(),
                source: e,
            })?;
            let path = entry.path();
            if !entry.file_type().is_file() || !is_image_path(path) {
                continue;
            }
            let Some(label) = path
                .parent()
                .and_then(|p| p.file_name())
                .and_then(|n| n.to_str())
            else {
                continue;
            };
            samples.push(UploadedSample {
                label: label.to_string(),
                path: path.to_path_buf(),
            });
        }

        log::debug!("Scanned {} pending uploads in {:?}", samples.len(), self.root);
        Ok(samples)
    }

    /// Pending file count per label. Every configured label is present.
    pub fn counts(&self) -> Result<BTreeMap<String, usize>, StorageError> {
        let mut counts: BTreeMap<String, usize> =
            self.classes.labels().into_iter().map(|l| (l, 0)).collect();
        for sample in self.scan()? {
            *counts.entry(sample.label).or_insert(0) += 1;
        }
        Ok(counts)
    }

    /// Moves `samples` under `<archive_root>/<YYYYmmdd_HHMMSS>_<tag>/<label>/`
    /// and returns that directory.
    pub fn archive(&self, samples: &[UploadedSample], tag: &str) -> Result<PathBuf, StorageError> {
        let _span = tracing::info_span!("archive", files = samples.len()).entered();

        let archive_dir = self
            .archive_root
            .join(format!("{}_{}", Utc::now().format("%Y%m%d_%H%M%S"), tag));
        ensure_directory(&archive_dir)?;

        for sample in samples {
            let label_dir = archive_dir.join(&sample.label);
            ensure_directory(&label_dir)?;

            let filename = sample
                .path
                .file_name()
                .and_then(|n| n.to_str())
                .map(sanitize_filename)
                .unwrap_or_else(|| sanitize_filename(""));
            let target = resolve_conflict(&label_dir, &filename)?;
            move_file(&sample.path, &target)?;
        }

        log::info!("Archived {} file(s) to {:?}", samples.len(), archive_dir);
        Ok(archive_dir)
    }
}

fn ensure_directory(path: &Path) -> Result<(), StorageError> {
    if !path.exists() {
        std::fs::create_dir_all(path).map_err(|e| StorageError::CreateDirectory {
            path: path.to_path_buf(),
            source: e,
        })?;
    }
    Ok(())
}

fn candidate_name(filename: &str, counter: usize) -> String {
    if counter == 1 {
        return filename.to_string();
    }
    match split_extension(filename) {
        (base, Some(ext)) => format!("{}_{}{}", base, counter, ext),
        (base, None) => format!("{}_{}", base, counter),
    }
}

/// Creates the file with `create_new`, trying `name_2.ext`, `name_3.ext`...
/// when the name is taken.
fn store_exclusive(dir_path: &Path, filename: &str, content: &[u8]) -> Result<PathBuf, StorageError> {
    for counter in 1..=MAX_NAME_ATTEMPTS {
        let try_path = dir_path.join(candidate_name(filename, counter));

        match std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&try_path)
        {
            Ok(mut file) => {
                file.write_all(content).map_err(|e| StorageError::WriteFile {
                    path: try_path.clone(),
                    source: e,
                })?;
                return Ok(try_path);
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
            Err(e) => {
                return Err(StorageError::WriteFile {
                    path: try_path,
                    source: e,
                });
            }
        }
    }

    Err(StorageError::FileExists(dir_path.join(filename)))
}

fn resolve_conflict(directory: &Path, filename: &str) -> Result<PathBuf, StorageError> {
    for counter in 1..=MAX_NAME_ATTEMPTS {
        let path = directory.join(candidate_name(filename, counter));
        if std::fs::symlink_metadata(&path).is_err() {
            return Ok(path);
        }
    }
    Err(StorageError::FileExists(directory.join(filename)))
}
