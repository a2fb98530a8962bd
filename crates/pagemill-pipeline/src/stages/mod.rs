//! The six processing stages and their fixed sequence.
//!
//! Stage order is total and never changes at runtime:
//! orientation → split → deskew → select_content → page_layout →
//! output. Each stage submodule owns its parameter type, its settings
//! store, its unit of work ([`Task`]) and a cache probe that answers
//! "are the recorded parameters still valid?" without recomputation.
//!
//! Units of work are wired stage-to-stage as owned continuations: a
//! stage's `Task` holds `Option<NextStageTask>` and, on success, hands
//! its output forward. The chain for one page is built backward by
//! [`crate::composer`] and executes forward.

pub mod deskew;
pub mod orientation;
pub mod output;
pub mod page_layout;
pub mod select_content;
pub mod split;

use image::DynamicImage;
use serde::{Deserialize, Serialize};

use crate::pages::PageId;
use crate::settings::Relinker;

/// Total number of pipeline stages.
pub const STAGE_COUNT: usize = 6;

/// Position of a stage in the fixed pipeline order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum StageIndex {
    /// Orthogonal rotation correction.
    Orientation,
    /// Page splitting (two-page spreads into halves).
    Split,
    /// Skew correction by arbitrary-angle rotation.
    Deskew,
    /// Content bounding-box selection.
    SelectContent,
    /// Margin and alignment normalization.
    PageLayout,
    /// Final rendering and file output.
    Output,
}

impl StageIndex {
    /// All stages in pipeline order.
    pub const ALL: [Self; STAGE_COUNT] = [
        Self::Orientation,
        Self::Split,
        Self::Deskew,
        Self::SelectContent,
        Self::PageLayout,
        Self::Output,
    ];

    /// Zero-based pipeline position.
    #[must_use]
    pub const fn as_usize(self) -> usize {
        match self {
            Self::Orientation => 0,
            Self::Split => 1,
            Self::Deskew => 2,
            Self::SelectContent => 3,
            Self::PageLayout => 4,
            Self::Output => 5,
        }
    }

    /// Human-readable stage name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Orientation => "orientation",
            Self::Split => "split",
            Self::Deskew => "deskew",
            Self::SelectContent => "select_content",
            Self::PageLayout => "page_layout",
            Self::Output => "output",
        }
    }

    /// The final stage of the pipeline.
    #[must_use]
    pub const fn last() -> Self {
        Self::Output
    }
}

impl std::fmt::Display for StageIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Verdict of a cache probe: can previously recorded parameters be
/// trusted, or must the stage recompute?
///
/// `Invalid` is not an error; it only means the dependency snapshot
/// recorded at the last successful run no longer matches the current
/// upstream state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheState {
    /// Recorded parameters match the current upstream state.
    Valid,
    /// No recorded parameters, or the dependency snapshot differs.
    Invalid,
}

/// Output of the last executed stage in a chain.
#[derive(Debug)]
pub struct ChainOutput {
    /// The stage that produced this output.
    pub stage: StageIndex,
    /// The page image as of that stage.
    pub image: DynamicImage,
}

/// The six stages in their fixed pipeline order, each owning its
/// settings store.
#[derive(Debug, Default)]
pub struct StageSequence {
    /// Orientation stage.
    pub orientation: orientation::Stage,
    /// Split stage.
    pub split: split::Stage,
    /// Deskew stage.
    pub deskew: deskew::Stage,
    /// Content selection stage.
    pub select_content: select_content::Stage,
    /// Page layout stage.
    pub page_layout: page_layout::Stage,
    /// Output stage.
    pub output: output::Stage,
}

impl StageSequence {
    /// Create a sequence with empty settings stores.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Index of the final stage.
    #[must_use]
    pub const fn last_stage_index(&self) -> StageIndex {
        StageIndex::last()
    }

    /// Apply a relinking pass to every stage's settings store.
    ///
    /// Bulk mutation; must complete before any task execution starts.
    pub fn perform_relinking(&mut self, relinker: &Relinker) {
        self.orientation.settings.perform_relinking(relinker);
        self.split.settings.perform_relinking(relinker);
        self.deskew.settings.perform_relinking(relinker);
        self.select_content.settings.perform_relinking(relinker);
        self.page_layout.settings.perform_relinking(relinker);
        self.output.settings.perform_relinking(relinker);
    }

    /// Drop every stage's entry for a page removed from the catalog.
    pub fn remove_page(&mut self, page: &PageId) {
        self.orientation.settings.remove(page);
        self.split.settings.remove(page);
        self.deskew.settings.remove(page);
        self.select_content.settings.remove(page);
        self.page_layout.settings.remove(page);
        self.output.settings.remove(page);
    }
}
