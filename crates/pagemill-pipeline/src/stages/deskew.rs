//! Stage 2: skew correction.
//!
//! Book pages rarely lie perfectly straight on the scanner glass.
//! This stage rotates the split page by a small arbitrary angle,
//! either configured manually or estimated from the image. The
//! estimate is the expensive part, so a successful run records the
//! angle together with the upstream state it was computed under;
//! while that snapshot matches, the recorded angle is reused.

use image::{DynamicImage, Rgba};
use imageproc::geometric_transformations::{Interpolation, rotate_about_center};
use serde::{Deserialize, Serialize};

use crate::context::ProcessingContext;
use crate::error::{StageError, TaskError};
use crate::pages::PageId;
use crate::settings::SettingsStore;
use crate::stages::{
    CacheState, ChainOutput, StageIndex, orientation::Rotation, select_content,
    split::ResolvedLayout,
};
use crate::thumbnails::ArtifactKind;

/// Largest angle (either direction) the estimator searches, degrees.
const MAX_SKEW_DEG: f64 = 5.0;

/// Estimator search step, degrees.
const SKEW_STEP_DEG: f64 = 0.5;

/// How the deskew angle is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Mode {
    /// Estimate the angle from the image.
    #[default]
    Auto,
    /// Use the configured angle as-is.
    Manual,
}

/// Upstream state a recorded angle depends on.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Dependencies {
    /// Orientation applied upstream.
    pub rotation: Rotation,
    /// Layout the page was split under.
    pub layout: ResolvedLayout,
}

/// Per-page deskew parameters.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Params {
    /// Angle selection mode.
    pub mode: Mode,
    /// Rotation angle in degrees, counter-clockwise positive.
    pub angle_deg: f64,
    /// Dependency snapshot recorded at the last successful run.
    pub deps: Option<Dependencies>,
}

/// The deskew stage.
#[derive(Debug, Default)]
pub struct Stage {
    /// Per-page deskew settings.
    pub settings: SettingsStore<Params>,
}

impl Stage {
    /// Build the unit of work for one page.
    #[must_use]
    pub fn create_task(
        &self,
        page: PageId,
        next: Option<select_content::Task>,
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

    /// Is the recorded angle still valid under `deps`?
    #[must_use]
    pub fn cache_probe(&self, page: &PageId, deps: &Dependencies) -> CacheState {
        match self.settings.get_recorded(page) {
            Some(params) if params.deps.as_ref() == Some(deps) => CacheState::Valid,
            _ => CacheState::Invalid,
        }
    }
}

/// Unit of work: straighten the page and continue.
#[derive(Debug)]
pub struct Task {
    page: PageId,
    next: Option<select_content::Task>,
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
        image: DynamicImage,
        rotation: Rotation,
        layout: ResolvedLayout,
    ) -> Result<ChainOutput, StageError> {
        if ctx.is_cancelled() {
            return Err(StageError::at(StageIndex::Deskew, TaskError::Cancelled));
        }

        let deps = Dependencies { rotation, layout };
        let mut params = ctx.stages.deskew.settings.get(&self.page);

        let angle_deg = match params.mode {
            Mode::Manual => params.angle_deg,
            Mode::Auto => {
                if params.deps == Some(deps) {
                    // Snapshot unchanged: reuse the recorded estimate.
                    params.angle_deg
                } else {
                    estimate_skew_angle(&image.to_luma8())
                }
            }
        };

        params.angle_deg = angle_deg;
        params.deps = Some(deps);
        ctx.stages.deskew.settings.set(self.page.clone(), params);

        let straightened = if angle_deg.abs() < f64::EPSILON {
            image
        } else {
            rotate_image(&image, angle_deg)
        };

        if self.debug && !self.batch {
            ctx.thumbnails.insert(
                self.page.clone(),
                ArtifactKind::StageDebug(StageIndex::Deskew),
                &straightened,
            );
        }

        match self.next {
            Some(next) => next.process(ctx, straightened, rotation, layout, angle_deg),
            None => Ok(ChainOutput {
                stage: StageIndex::Deskew,
                image: straightened,
            }),
        }
    }
}

/// Rotate an image about its centre, filling exposed corners white.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
fn rotate_image(image: &DynamicImage, angle_deg: f64) -> DynamicImage {
    let rgba = image.to_rgba8();
    let theta = angle_deg.to_radians() as f32;
    let rotated = rotate_about_center(
        &rgba,
        theta,
        Interpolation::Bilinear,
        Rgba([255, 255, 255, 255]),
    );
    DynamicImage::ImageRgba8(rotated)
}

/// Estimate the skew angle of a page image, in degrees.
///
/// Projection-profile search: for each candidate angle, rows of the
/// sheared binarized image are summed and the variance of the row
/// sums is scored. Straight text lines concentrate ink into few rows,
/// maximizing variance. Coarse but adequate for the small angles this
/// stage corrects; anything beyond ±5° should be fixed by
/// orientation instead.
#[must_use]
pub fn estimate_skew_angle(gray: &image::GrayImage) -> f64 {
    let (width, height) = gray.dimensions();
    if width < 2 || height < 2 {
        return 0.0;
    }

    let mut best_angle: f64 = 0.0;
    let mut best_score = f64::MIN;

    let mut angle = -MAX_SKEW_DEG;
    while angle <= MAX_SKEW_DEG {
        let score = projection_variance(gray, angle);
        // Ties go to the smaller correction; a featureless page must
        // not pick up the scan boundary angle.
        if score > best_score
            || ((score - best_score).abs() < f64::EPSILON && angle.abs() < best_angle.abs())
        {
            best_score = score;
            best_angle = angle;
        }
        angle += SKEW_STEP_DEG;
    }

    // The image is skewed by `best_angle`; correct by its negation.
    -best_angle
}

/// Variance of dark-pixel row sums after shearing by `angle_deg`.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
fn projection_variance(gray: &image::GrayImage, angle_deg: f64) -> f64 {
    let (width, height) = gray.dimensions();
    let slope = angle_deg.to_radians().tan();
    let mut rows = vec![0u64; height as usize];

    // Sample a pixel grid rather than every pixel; the profile shape
    // survives and the search loop runs an order of magnitude faster.
    let step = usize::max(1, (width as usize * height as usize) / 100_000);
    let mut index = 0usize;
    for y in 0..height {
        for x in 0..width {
            index += 1;
            if index % step != 0 {
                continue;
            }
            if gray.get_pixel(x, y).0[0] < 128 {
                let sheared_y = f64::from(y) + f64::from(x) * slope;
                let bin = sheared_y.round();
                if bin >= 0.0 && bin < f64::from(height) {
                    rows[bin as usize] += 1;
                }
            }
        }
    }

    let n = rows.len() as f64;
    let mean = rows.iter().sum::<u64>() as f64 / n;
    rows.iter()
        .map(|&r| {
            let d = r as f64 - mean;
            d * d
        })
        .sum::<f64>()
        / n
}
