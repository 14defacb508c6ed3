//! The working set of files picked for conversion, with their metadata.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::media::{MediaDetails, MediaProber};

/// What happened when files were added to a [`FileSelection`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AddSummary {
    pub added: usize,
    pub duplicates: usize,
    /// `(file name, error)` for newly added files whose probe failed.
    pub probe_errors: Vec<(String, String)>,
}

impl AddSummary {
    /// Every requested file was already selected.
    pub fn nothing_new(&self) -> bool {
        self.added == 0 && self.duplicates > 0
    }
}

/// Ordered, duplicate-free list of selected files and their probed details.
///
/// Files are keyed by their path as given. A failed probe does not keep a
/// file out of the selection; its details carry the error instead.
pub struct FileSelection {
    prober: MediaProber,
    probe_concurrency: usize,
    entries: Vec<MediaDetails>,
}

impl FileSelection {
    pub fn new(prober: MediaProber, probe_concurrency: usize) -> Self {
        Self {
            prober,
            probe_concurrency: probe_concurrency.max(1),
            entries: Vec::new(),
        }
    }

    pub async fn add<P: AsRef<Path>>(&mut self, paths: &[P]) -> AddSummary {
        let mut known: HashSet<String> = self.entries.iter().map(|d| d.full_path.clone()).collect();
        let mut summary = AddSummary::default();
        let mut fresh = Vec::new();

        for path in paths {
            let path = path.as_ref();
            if known.insert(path.to_string_lossy().into_owned()) {
                fresh.push(path.to_path_buf());
            } else {
                summary.duplicates += 1;
            }
        }

        for details in self.prober.probe_many(&fresh, self.probe_concurrency).await {
            if let Some(error) = &details.error {
                warn!("Could not read details of {}: {}", details.name, error);
                summary.probe_errors.push((details.name.clone(), error.clone()));
            }
            self.entries.push(details);
            summary.added += 1;
        }

        info!(
            "Selection: {} added, {} already present, {} total",
            summary.added,
            summary.duplicates,
            self.entries.len()
        );
        summary
    }

    /// Drop a file from the selection, returning its details.
    pub fn remove(&mut self, path: &Path) -> Option<MediaDetails> {
        let key = path.to_string_lossy();
        let index = self.entries.iter().position(|d| d.full_path == key)?;
        Some(self.entries.remove(index))
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn entries(&self) -> &[MediaDetails] {
        &self.entries
    }

    /// Selected paths in insertion order, ready to hand to the engine.
    pub fn paths(&self) -> Vec<PathBuf> {
        self.entries
            .iter()
            .map(|d| PathBuf::from(&d.full_path))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
