//! Shared state a task chain runs against.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::naming::OutputFileNameGenerator;
use crate::pages::PageId;
use crate::stages::StageSequence;
use crate::thumbnails::ThumbnailCache;

/// Cooperative cancellation flag, checkable between stages.
///
/// Clones share the same flag, so one handle can be kept by the caller
/// while another travels with the processing context.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag {
    inner: Arc<AtomicBool>,
}

impl CancelFlag {
    /// A fresh, unset flag.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Tasks already past their last check still
    /// finish their current stage.
    pub fn cancel(&self) {
        self.inner.store(true, Ordering::Release);
    }

    /// Whether cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.inner.load(Ordering::Acquire)
    }
}

/// Everything a running chain needs: the stage settings, the preview
/// cache, output naming, and the cancellation flag.
#[derive(Debug)]
pub struct ProcessingContext {
    /// The six stages with their settings stores.
    pub stages: StageSequence,
    /// Shared preview cache.
    pub thumbnails: ThumbnailCache,
    /// Output file naming state.
    pub naming: OutputFileNameGenerator,
    output_dir: PathBuf,
    cancel: CancelFlag,
}

impl ProcessingContext {
    /// Build a context writing into `output_dir`.
    #[must_use]
    pub fn new(stages: StageSequence, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            stages,
            thumbnails: ThumbnailCache::default(),
            naming: OutputFileNameGenerator::default(),
            output_dir: output_dir.into(),
            cancel: CancelFlag::new(),
        }
    }

    /// Replace the naming state (e.g. restored from a project).
    #[must_use]
    pub fn with_naming(mut self, naming: OutputFileNameGenerator) -> Self {
        self.naming = naming;
        self
    }

    /// Share `flag` as this context's cancellation signal.
    #[must_use]
    pub fn with_cancel_flag(mut self, flag: CancelFlag) -> Self {
        self.cancel = flag;
        self
    }

    /// The directory rendered pages are written into.
    #[must_use]
    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Full path the rendered page will be written to.
    #[must_use]
    pub fn output_path(&mut self, page: &PageId) -> PathBuf {
        self.output_dir.join(self.naming.file_name(page))
    }

    /// Whether cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Drop every piece of per-page state this context holds for
    /// `page`: stage settings and cached thumbnails. Called when the
    /// page leaves the catalog.
    pub fn remove_page(&mut self, page: &PageId) {
        self.stages.remove_page(page);
        self.thumbnails.remove_page(page);
    }

    /// Tear the context down into the pieces project persistence
    /// needs, discarding the preview cache.
    #[must_use]
    pub fn into_parts(self) -> (StageSequence, OutputFileNameGenerator, PathBuf) {
        (self.stages, self.naming, self.output_dir)
    }
}
