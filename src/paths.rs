//! Output path computation and collision avoidance.
//!
//! Uniqueness is check-then-use: a path reported free here can still be taken
//! by another process before the conversion writes it. Within one batch the
//! [`PathReservations`] set keeps two tasks from being handed the same path.

use std::collections::HashSet;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

/// Compute `output_folder/<input stem>.<target_format>` (format lowercased).
pub fn output_path_for(input: &Path, output_folder: &Path, target_format: &str) -> PathBuf {
    let mut file_name = input
        .file_stem()
        .map(|stem| stem.to_os_string())
        .unwrap_or_else(|| OsString::from("output"));
    file_name.push(".");
    file_name.push(target_format.trim_start_matches('.').to_lowercase());
    output_folder.join(file_name)
}

/// Return `desired` if nothing exists there, otherwise the first free
/// `base_N.ext` for N = 1, 2, ...
///
/// Only checks for existence; no file is created.
pub fn resolve_unique_path(desired: &Path) -> PathBuf {
    resolve_with(desired, |candidate| candidate.exists())
}

/// Output paths handed out during one batch.
#[derive(Debug, Default)]
pub struct PathReservations {
    claimed: HashSet<PathBuf>,
}

impl PathReservations {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve `desired` against the filesystem and earlier reservations,
    /// then claim the result.
    pub fn reserve(&mut self, desired: &Path) -> PathBuf {
        let resolved = resolve_with(desired, |candidate| {
            self.claimed.contains(candidate) || candidate.exists()
        });
        self.claimed.insert(resolved.clone());
        resolved
    }

    pub fn len(&self) -> usize {
        self.claimed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.claimed.is_empty()
    }
}

fn resolve_with(desired: &Path, taken: impl Fn(&Path) -> bool) -> PathBuf {
    if !taken(desired) {
        return desired.to_path_buf();
    }

    let stem = desired
        .file_stem()
        .map(|s| s.to_os_string())
        .unwrap_or_default();
    let extension = desired.extension().map(|e| e.to_os_string());

    let mut counter: u64 = 1;
    loop {
        let mut file_name = stem.clone();
        file_name.push(format!("_{}", counter));
        if let Some(ext) = &extension {
            file_name.push(".");
            file_name.push(ext);
        }

        let candidate = desired.with_file_name(file_name);
        if !taken(&candidate) {
            return candidate;
        }
        counter += 1;
    }
}
