//! Output file naming.
//!
//! Source files from different directories may share a stem
//! (`a/scan.png`, `b/scan.png`); everything lands in one output
//! directory, so colliding stems get a stable numeric label. Labels
//! are assigned on first registration and persist with the project so
//! names do not shuffle between sessions.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::pages::{ImageId, PageId};

/// Assigns a per-stem label to each source path.
///
/// The first path registered for a stem gets label 0 (rendered with no
/// suffix); later paths with the same stem get 1, 2, and so on.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct FileNameDisambiguator {
    labels: BTreeMap<PathBuf, u32>,
    next_label: BTreeMap<String, u32>,
}

impl FileNameDisambiguator {
    /// Register a source path, returning its label. Re-registering an
    /// already-known path returns the existing label.
    pub fn register(&mut self, path: &Path) -> u32 {
        if let Some(label) = self.labels.get(path) {
            return *label;
        }
        let stem = stem_of(path);
        let counter = self.next_label.entry(stem).or_insert(0);
        let label = *counter;
        *counter += 1;
        self.labels.insert(path.to_path_buf(), label);
        label
    }

    /// Label for an already-registered path.
    #[must_use]
    pub fn label_of(&self, path: &Path) -> Option<u32> {
        self.labels.get(path).copied()
    }

    /// Forget a path. Its label is not reused; later registrations of
    /// the same stem continue from where the counter left off.
    pub fn unregister(&mut self, path: &Path) {
        self.labels.remove(path);
    }

    /// Move labels to new paths after source files were relocated.
    /// Settings stay keyed by logical page identity; only the path
    /// half of the mapping changes.
    pub fn perform_relinking(&mut self, rewrite: impl Fn(&Path) -> Option<PathBuf>) {
        let old = std::mem::take(&mut self.labels);
        for (path, label) in old {
            let key = rewrite(&path).unwrap_or(path);
            self.labels.insert(key, label);
        }
    }
}

/// Produces final output file names: stem, collision label, sub-page
/// suffix, `.png` extension.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct OutputFileNameGenerator {
    disambiguator: FileNameDisambiguator,
}

impl OutputFileNameGenerator {
    /// Wrap an existing disambiguator (e.g. restored from a project).
    #[must_use]
    pub const fn new(disambiguator: FileNameDisambiguator) -> Self {
        Self { disambiguator }
    }

    /// Access to the underlying disambiguator.
    #[must_use]
    pub const fn disambiguator(&self) -> &FileNameDisambiguator {
        &self.disambiguator
    }

    /// Register every path up front so labels reflect catalog order.
    pub fn register(&mut self, image: &ImageId) {
        self.disambiguator.register(image.path());
    }

    /// Forget a source that left the catalog.
    pub fn unregister(&mut self, image: &ImageId) {
        self.disambiguator.unregister(image.path());
    }

    /// The output file name for a page, e.g. `scan_v1_L.png`.
    #[must_use]
    pub fn file_name(&mut self, page: &PageId) -> String {
        let image = page.image();
        let label = self.disambiguator.register(image.path());
        let mut name = image.stem().to_owned();
        if label > 0 {
            name.push_str(&format!("_v{label}"));
        }
        name.push_str(page.sub_page().file_suffix());
        name.push_str(".png");
        name
    }

    /// Rewrite registered paths after relinking.
    pub fn perform_relinking(&mut self, rewrite: impl Fn(&Path) -> Option<PathBuf>) {
        self.disambiguator.perform_relinking(rewrite);
    }
}

fn stem_of(path: &Path) -> String {
    path.file_stem()
        .map_or_else(|| "page".to_owned(), |s| s.to_string_lossy().into_owned())
}
