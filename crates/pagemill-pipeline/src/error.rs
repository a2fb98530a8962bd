//! Error taxonomy of the engine.
//!
//! Two tiers, matching how far an error is allowed to propagate:
//!
//! - [`ProjectError`] — configuration problems (malformed project
//!   file, missing output directory). Fatal before any page runs.
//! - [`StageError`] — one stage's computation failed for one page.
//!   Caught at the page boundary; the batch continues.
//!
//! A cache probe answering `Invalid` is none of these: it merely
//! triggers recomputation.

use std::path::PathBuf;

use crate::stages::StageIndex;

/// Where in a page's chain a failure occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageLabel {
    /// The load step that reads the source image, before any stage.
    Load,
    /// A pipeline stage proper.
    Stage(StageIndex),
}

impl std::fmt::Display for StageLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Load => f.write_str("load"),
            Self::Stage(stage) => f.write_str(stage.name()),
        }
    }
}

/// A single stage computation failure.
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    /// Reading or writing a file failed.
    #[error("I/O error on {path}: {source}")]
    Io {
        /// The file involved.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    /// Decoding or encoding an image failed.
    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    /// A computed or configured geometry is unusable
    /// (e.g. a content box outside the page).
    #[error("invalid geometry: {0}")]
    InvalidGeometry(String),

    /// Cancellation was requested; partial output is discarded.
    #[error("processing cancelled")]
    Cancelled,
}

impl TaskError {
    /// Whether this error is a cancellation rather than a failure.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// A [`TaskError`] tagged with the stage it came from. This is the
/// per-page error type the executor records without aborting the
/// batch.
#[derive(Debug, thiserror::Error)]
#[error("stage {stage}: {source}")]
pub struct StageError {
    /// The failing stage.
    pub stage: StageLabel,
    /// What went wrong.
    #[source]
    pub source: TaskError,
}

impl StageError {
    /// Tag a task error with its stage.
    #[must_use]
    pub const fn at(stage: StageIndex, source: TaskError) -> Self {
        Self {
            stage: StageLabel::Stage(stage),
            source,
        }
    }

    /// Tag a task error as a load-step failure.
    #[must_use]
    pub const fn at_load(source: TaskError) -> Self {
        Self {
            stage: StageLabel::Load,
            source,
        }
    }
}

/// Configuration errors, fatal before any processing starts.
#[derive(Debug, thiserror::Error)]
pub enum ProjectError {
    /// The project file could not be read.
    #[error("unable to read project file: {0}")]
    Io(#[from] std::io::Error),

    /// The project document is not well-formed.
    #[error("the project file is broken: {0}")]
    Malformed(#[from] serde_json::Error),

    /// The document carries an unsupported format version.
    #[error("unsupported project version {0}")]
    UnsupportedVersion(u32),

    /// The output directory is not set.
    #[error("output directory is not set")]
    MissingOutputDirectory,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_error_display_names_the_stage() {
        let err = StageError::at(
            StageIndex::Deskew,
            TaskError::InvalidGeometry("empty page".to_owned()),
        );
        assert_eq!(err.to_string(), "stage deskew: invalid geometry: empty page");
    }

    #[test]
    fn load_failures_are_labelled_load() {
        let err = StageError::at_load(TaskError::Io {
            path: PathBuf::from("missing.png"),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "no such file"),
        });
        assert!(err.to_string().starts_with("stage load:"));
        assert!(err.to_string().contains("missing.png"));
    }

    #[test]
    fn cancelled_is_not_a_failure() {
        assert!(TaskError::Cancelled.is_cancelled());
        assert!(
            !TaskError::InvalidGeometry(String::new()).is_cancelled()
        );
    }

    #[test]
    fn project_error_missing_output_directory_display() {
        assert_eq!(
            ProjectError::MissingOutputDirectory.to_string(),
            "output directory is not set",
        );
    }
}
