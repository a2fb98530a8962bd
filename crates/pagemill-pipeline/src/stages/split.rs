//! Stage 1: page splitting.
//!
//! A landscape scan of an open book holds two logical pages. This
//! stage resolves the per-page layout (single page or two-page
//! spread) and crops the oriented image down to the half this
//! [`PageId`] covers. The resolved layout is cached in the settings
//! store together with the rotation it was computed under; a changed
//! rotation invalidates it.

use image::DynamicImage;
use serde::{Deserialize, Serialize};

use crate::context::ProcessingContext;
use crate::error::{StageError, TaskError};
use crate::pages::{PageId, SubPage};
use crate::settings::SettingsStore;
use crate::stages::{CacheState, ChainOutput, StageIndex, deskew, orientation::Rotation};
use crate::thumbnails::ArtifactKind;

/// How the layout for a source image is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LayoutKind {
    /// Decide from the oriented image's aspect ratio.
    #[default]
    Auto,
    /// Force a single page covering the whole image.
    SinglePage,
    /// Force a two-page spread.
    TwoPages,
}

/// A layout after auto-detection has run (or was bypassed).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResolvedLayout {
    /// One logical page.
    SinglePage,
    /// Two logical pages, split down the vertical centre.
    TwoPages,
}

/// Upstream state the cached resolution depends on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependencies {
    /// The orientation applied before splitting.
    pub rotation: Rotation,
}

/// Per-page split parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Params {
    /// The configured layout choice.
    pub layout: LayoutKind,
    /// Layout resolved at the last successful run, if any.
    pub resolved: Option<ResolvedLayout>,
    /// Dependency snapshot recorded with `resolved`.
    pub deps: Option<Dependencies>,
}

/// The split stage.
#[derive(Debug, Default)]
pub struct Stage {
    /// Per-page split settings.
    pub settings: SettingsStore<Params>,
}

impl Stage {
    /// Build the unit of work for one page.
    #[must_use]
    pub fn create_task(
        &self,
        page: PageId,
        next: Option<deskew::Task>,
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

    /// Is the recorded resolution still valid under `deps`?
    #[must_use]
    pub fn cache_probe(&self, page: &PageId, deps: &Dependencies) -> CacheState {
        match self.settings.get_recorded(page) {
            Some(params) if params.resolved.is_some() && params.deps.as_ref() == Some(deps) => {
                CacheState::Valid
            }
            _ => CacheState::Invalid,
        }
    }
}

/// Decide a layout from the oriented image's shape: wider than tall
/// means a two-page spread.
#[must_use]
pub fn auto_detect_layout(image: &DynamicImage) -> ResolvedLayout {
    if image.width() > image.height() {
        ResolvedLayout::TwoPages
    } else {
        ResolvedLayout::SinglePage
    }
}

/// Unit of work: resolve the layout, crop to this page's half, continue.
#[derive(Debug)]
pub struct Task {
    page: PageId,
    next: Option<deskew::Task>,
    batch: bool,
    debug: bool,
}

impl Task {
    /// Run this stage and, on success, its continuation.
    ///
    /// # Errors
    ///
    /// Fails with [`TaskError::InvalidGeometry`] when the page's
    /// sub-page selector does not fit the resolved layout.
    pub fn process(
        self,
        ctx: &mut ProcessingContext,
        image: DynamicImage,
        rotation: Rotation,
    ) -> Result<ChainOutput, StageError> {
        if ctx.is_cancelled() {
            return Err(StageError::at(StageIndex::Split, TaskError::Cancelled));
        }

        let deps = Dependencies { rotation };
        let mut params = ctx.stages.split.settings.get(&self.page);

        let layout = match (params.resolved, &params.deps) {
            // Recorded resolution still valid: reuse, skip detection.
            (Some(resolved), Some(recorded)) if *recorded == deps => resolved,
            _ => {
                let resolved = match params.layout {
                    LayoutKind::Auto => auto_detect_layout(&image),
                    LayoutKind::SinglePage => ResolvedLayout::SinglePage,
                    LayoutKind::TwoPages => ResolvedLayout::TwoPages,
                };
                params.resolved = Some(resolved);
                params.deps = Some(deps);
                ctx.stages.split.settings.set(self.page.clone(), params);
                resolved
            }
        };

        let cropped = crop_to_sub_page(&image, layout, self.page.sub_page())
            .map_err(|e| StageError::at(StageIndex::Split, e))?;

        if self.debug && !self.batch {
            ctx.thumbnails.insert(
                self.page.clone(),
                ArtifactKind::StageDebug(StageIndex::Split),
                &cropped,
            );
        }

        match self.next {
            Some(next) => next.process(ctx, cropped, rotation, layout),
            None => Ok(ChainOutput {
                stage: StageIndex::Split,
                image: cropped,
            }),
        }
    }
}

/// Crop the oriented image down to one sub-page.
fn crop_to_sub_page(
    image: &DynamicImage,
    layout: ResolvedLayout,
    sub_page: SubPage,
) -> Result<DynamicImage, TaskError> {
    let half = image.width() / 2;
    match (layout, sub_page) {
        (_, SubPage::Whole) | (ResolvedLayout::SinglePage, _) => Ok(image.clone()),
        (ResolvedLayout::TwoPages, _) if half == 0 => Err(TaskError::InvalidGeometry(
            format!("image too narrow to split: {}px wide", image.width()),
        )),
        (ResolvedLayout::TwoPages, SubPage::Left) => {
            Ok(image.crop_imm(0, 0, half, image.height()))
        }
        (ResolvedLayout::TwoPages, SubPage::Right) => {
            Ok(image.crop_imm(half, 0, image.width() - half, image.height()))
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::pages::ImageId;

    fn page(sub: SubPage) -> PageId {
        PageId::new(ImageId::new("spread.png"), sub)
    }

    #[test]
    fn auto_detection_prefers_two_pages_for_landscape() {
        assert_eq!(
            auto_detect_layout(&DynamicImage::new_rgba8(400, 200)),
            ResolvedLayout::TwoPages,
        );
        assert_eq!(
            auto_detect_layout(&DynamicImage::new_rgba8(200, 400)),
            ResolvedLayout::SinglePage,
        );
    }

    #[test]
    fn crop_halves_split_the_width() {
        let img = DynamicImage::new_rgba8(401, 200);
        let left = crop_to_sub_page(&img, ResolvedLayout::TwoPages, SubPage::Left).unwrap();
        let right = crop_to_sub_page(&img, ResolvedLayout::TwoPages, SubPage::Right).unwrap();
        assert_eq!(left.width(), 200);
        assert_eq!(right.width(), 201);
        assert_eq!(left.height(), 200);
    }

    #[test]
    fn whole_sub_page_is_untouched() {
        let img = DynamicImage::new_rgba8(400, 200);
        let whole = crop_to_sub_page(&img, ResolvedLayout::TwoPages, SubPage::Whole).unwrap();
        assert_eq!(whole.width(), 400);
    }

    #[test]
    fn probe_tracks_dependency_snapshot() {
        let mut stage = Stage::default();
        let p = page(SubPage::Left);
        let deps = Dependencies {
            rotation: Rotation::R0,
        };
        assert_eq!(stage.cache_probe(&p, &deps), CacheState::Invalid);

        stage.settings.set(
            p.clone(),
            Params {
                layout: LayoutKind::Auto,
                resolved: Some(ResolvedLayout::TwoPages),
                deps: Some(deps),
            },
        );
        assert_eq!(stage.cache_probe(&p, &deps), CacheState::Valid);

        // A rotation change upstream invalidates the cached resolution.
        let rotated = Dependencies {
            rotation: Rotation::R90,
        };
        assert_eq!(stage.cache_probe(&p, &rotated), CacheState::Invalid);
    }
}
