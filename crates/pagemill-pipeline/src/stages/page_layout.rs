//! Stage 4: page layout.
//!
//! Chooses physical margins around the content box and how the content
//! sits inside the final page when extra space is available. Nothing is
//! rendered here; the stage validates and records the layout and hands
//! it to output, which applies it at the output resolution.

use image::DynamicImage;
use serde::{Deserialize, Serialize};

use crate::context::ProcessingContext;
use crate::error::{StageError, TaskError};
use crate::pages::PageId;
use crate::settings::SettingsStore;
use crate::stages::{
    CacheState, ChainOutput, StageIndex, output, select_content::ContentBox,
};
use crate::thumbnails::ArtifactKind;

/// Physical margins in millimetres.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Margins {
    /// Top margin.
    pub top: f64,
    /// Bottom margin.
    pub bottom: f64,
    /// Left margin.
    pub left: f64,
    /// Right margin.
    pub right: f64,
}

impl Margins {
    /// Uniform margins on all four sides.
    #[must_use]
    pub const fn uniform(mm: f64) -> Self {
        Self {
            top: mm,
            bottom: mm,
            left: mm,
            right: mm,
        }
    }

    /// All margins are finite and non-negative.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        [self.top, self.bottom, self.left, self.right]
            .iter()
            .all(|m| m.is_finite() && *m >= 0.0)
    }
}

impl Default for Margins {
    fn default() -> Self {
        Self::uniform(10.0)
    }
}

/// Horizontal placement of content within the final page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum HorizontalAlignment {
    /// Pin to the left edge.
    Left,
    /// Centre horizontally.
    #[default]
    Center,
    /// Pin to the right edge.
    Right,
}

/// Vertical placement of content within the final page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum VerticalAlignment {
    /// Pin to the top edge.
    Top,
    /// Centre vertically.
    #[default]
    Center,
    /// Pin to the bottom edge.
    Bottom,
}

/// Where the content sits when the page is larger than content plus
/// margins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Alignment {
    /// Horizontal placement.
    pub horizontal: HorizontalAlignment,
    /// Vertical placement.
    pub vertical: VerticalAlignment,
}

/// Upstream state a recorded layout depends on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependencies {
    /// The content box the margins were chosen for.
    pub content_box: ContentBox,
}

/// Per-page layout parameters.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Params {
    /// Margins around the content.
    pub margins: Margins,
    /// Content alignment inside the page.
    pub alignment: Alignment,
    /// Dependency snapshot recorded at the last successful run.
    pub deps: Option<Dependencies>,
}

/// The validated layout passed to output.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Layout {
    /// Margins around the content.
    pub margins: Margins,
    /// Content alignment inside the page.
    pub alignment: Alignment,
}

/// The page layout stage.
#[derive(Debug, Default)]
pub struct Stage {
    /// Per-page layout settings.
    pub settings: SettingsStore<Params>,
}

impl Stage {
    /// Build the unit of work for one page.
    #[must_use]
    pub fn create_task(
        &self,
        page: PageId,
        next: Option<output::Task>,
        batch: bool,
        debug: bool,
    ) -> Task {
        Task {
            page,
            next,
            batch,
            debug,
        }
    }

    /// Is the recorded layout still valid under `deps`?
    #[must_use]
    pub fn cache_probe(&self, page: &PageId, deps: &Dependencies) -> CacheState {
        match self.settings.get_recorded(page) {
            Some(params) if params.deps.as_ref() == Some(deps) => CacheState::Valid,
            _ => CacheState::Invalid,
        }
    }
}

/// Unit of work: validate the layout and continue.
#[derive(Debug)]
pub struct Task {
    page: PageId,
    next: Option<output::Task>,
    batch: bool,
    debug: bool,
}

impl Task {
    /// Run this stage and, on success, its continuation.
    ///
    /// # Errors
    ///
    /// Fails with [`TaskError::InvalidGeometry`] on negative or
    /// non-finite margins.
    pub fn process(
        self,
        ctx: &mut ProcessingContext,
        image: DynamicImage,
        content_box: ContentBox,
    ) -> Result<ChainOutput, StageError> {
        if ctx.is_cancelled() {
            return Err(StageError::at(
                StageIndex::PageLayout,
                TaskError::Cancelled,
            ));
        }

        let mut params = ctx.stages.page_layout.settings.get(&self.page);
        if !params.margins.is_valid() {
            return Err(StageError::at(
                StageIndex::PageLayout,
                TaskError::InvalidGeometry(format!(
                    "margins must be finite and non-negative, got {:?}",
                    params.margins,
                )),
            ));
        }

        params.deps = Some(Dependencies { content_box });
        let layout = Layout {
            margins: params.margins,
            alignment: params.alignment,
        };
        ctx.stages
            .page_layout
            .settings
            .set(self.page.clone(), params);

        if self.debug && !self.batch {
            ctx.thumbnails.insert(
                self.page.clone(),
                ArtifactKind::StageDebug(StageIndex::PageLayout),
                &image,
            );
        }

        match self.next {
            Some(next) => next.process(ctx, image, content_box, layout),
            None => Ok(ChainOutput {
                stage: StageIndex::PageLayout,
                image,
            }),
        }
    }
}
