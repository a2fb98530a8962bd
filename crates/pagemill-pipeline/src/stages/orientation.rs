//! Stage 0: orthogonal rotation correction.
//!
//! Scanners often produce pages rotated by a multiple of 90°. This
//! stage applies the per-page recorded rotation (no detection — the
//! rotation comes from configuration or interactive edits) and hands
//! the upright image to the split stage.

use image::DynamicImage;
use serde::{Deserialize, Serialize};

use crate::context::ProcessingContext;
use crate::error::{StageError, TaskError};
use crate::pages::PageId;
use crate::settings::SettingsStore;
use crate::stages::{CacheState, ChainOutput, StageIndex, split};
use crate::thumbnails::ArtifactKind;

/// Orthogonal rotation, clockwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Rotation {
    /// No rotation.
    #[default]
    R0,
    /// 90° clockwise.
    R90,
    /// 180°.
    R180,
    /// 270° clockwise (90° counter-clockwise).
    R270,
}

impl Rotation {
    /// The next rotation, 90° further clockwise.
    #[must_use]
    pub const fn next_clockwise(self) -> Self {
        match self {
            Self::R0 => Self::R90,
            Self::R90 => Self::R180,
            Self::R180 => Self::R270,
            Self::R270 => Self::R0,
        }
    }

    /// The previous rotation, 90° counter-clockwise.
    #[must_use]
    pub const fn prev_clockwise(self) -> Self {
        match self {
            Self::R0 => Self::R270,
            Self::R90 => Self::R0,
            Self::R180 => Self::R90,
            Self::R270 => Self::R180,
        }
    }

    /// Apply this rotation to an image.
    #[must_use]
    pub fn apply(self, image: &DynamicImage) -> DynamicImage {
        match self {
            Self::R0 => image.clone(),
            Self::R90 => image.rotate90(),
            Self::R180 => image.rotate180(),
            Self::R270 => image.rotate270(),
        }
    }
}

/// Per-page orientation parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Params {
    /// The rotation to apply.
    pub rotation: Rotation,
}

/// Orientation has no upstream stages, so its dependency snapshot is
/// empty; a recorded entry is always consistent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Dependencies;

/// The orientation stage: settings store plus task/probe factories.
#[derive(Debug, Default)]
pub struct Stage {
    /// Per-page rotation settings.
    pub settings: SettingsStore<Params>,
}

impl Stage {
    /// Build the unit of work for one page.
    #[must_use]
    pub fn create_task(
        &self,
        page: PageId,
        next: Option<split::Task>,
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

    /// Cheap validity check: is the recorded rotation still usable?
    #[must_use]
    pub fn cache_probe(&self, page: &PageId, _deps: &Dependencies) -> CacheState {
        if self.settings.get_recorded(page).is_some() {
            CacheState::Valid
        } else {
            CacheState::Invalid
        }
    }
}

/// Unit of work: rotate the loaded image and continue.
#[derive(Debug)]
pub struct Task {
    page: PageId,
    next: Option<split::Task>,
    batch: bool,
    debug: bool,
}

impl Task {
    /// Run this stage and, on success, its continuation.
    ///
    /// # Errors
    ///
    /// Returns a [`StageError`] tagged with the failing stage, or
    /// [`TaskError::Cancelled`] if a stop was requested.
    pub fn process(
        self,
        ctx: &mut ProcessingContext,
        image: &DynamicImage,
    ) -> Result<ChainOutput, StageError> {
        if ctx.is_cancelled() {
            return Err(StageError::at(StageIndex::Orientation, TaskError::Cancelled));
        }

        let params = ctx.stages.orientation.settings.get(&self.page);
        let rotated = params.rotation.apply(image);

        // Materialize the entry so downstream probes see a recorded run.
        ctx.stages.orientation.settings.set(self.page.clone(), params);

        if self.debug && !self.batch {
            ctx.thumbnails.insert(
                self.page.clone(),
                ArtifactKind::StageDebug(StageIndex::Orientation),
                &rotated,
            );
        }

        match self.next {
            Some(next) => next.process(ctx, rotated, params.rotation),
            None => Ok(ChainOutput {
                stage: StageIndex::Orientation,
                image: rotated,
            }),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn rotation_cycle_is_closed() {
        let mut r = Rotation::R0;
        for _ in 0..4 {
            r = r.next_clockwise();
        }
        assert_eq!(r, Rotation::R0);
        assert_eq!(Rotation::R0.prev_clockwise(), Rotation::R270);
        assert_eq!(Rotation::R90.prev_clockwise().next_clockwise(), Rotation::R90);
    }

    #[test]
    fn rotation_swaps_dimensions_for_quarter_turns() {
        let img = DynamicImage::new_rgba8(30, 20);
        assert_eq!(Rotation::R90.apply(&img).width(), 20);
        assert_eq!(Rotation::R90.apply(&img).height(), 30);
        assert_eq!(Rotation::R180.apply(&img).width(), 30);
        assert_eq!(Rotation::R270.apply(&img).height(), 30);
    }

    #[test]
    fn probe_is_invalid_until_recorded() {
        use crate::pages::{ImageId, SubPage};
        let mut stage = Stage::default();
        let page = PageId::new(ImageId::new("a.png"), SubPage::Whole);
        assert_eq!(stage.cache_probe(&page, &Dependencies), CacheState::Invalid);

        stage.settings.set(page.clone(), Params::default());
        assert_eq!(stage.cache_probe(&page, &Dependencies), CacheState::Valid);
    }
}
