//! Stage 5: output rendering.
//!
//! The terminal stage. Scales the content to the output resolution,
//! converts to the configured colour mode, lays it on a page with
//! the margins and alignment chosen upstream, and writes the
//! result as a PNG into the output directory.

use std::fs;

use image::{DynamicImage, Luma, imageops};
use imageproc::contrast::otsu_level;
use imageproc::filter::median_filter;
use serde::{Deserialize, Serialize};

use crate::context::ProcessingContext;
use crate::error::{StageError, TaskError};
use crate::pages::PageId;
use crate::settings::SettingsStore;
use crate::stages::{
    CacheState, ChainOutput, StageIndex,
    page_layout::{HorizontalAlignment, Layout, Margins, VerticalAlignment},
    select_content::ContentBox,
};
use crate::thumbnails::ArtifactKind;

/// Resolution the source scans are assumed to carry.
const SOURCE_DPI: u32 = 300;

const MM_PER_INCH: f64 = 25.4;

/// Colour treatment of the rendered page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ColorMode {
    /// Keep the source colours.
    #[default]
    Color,
    /// Eight-bit grayscale.
    Grayscale,
    /// One-bit binarization via Otsu's method.
    BlackAndWhite,
}

/// Dewarping treatment. Distortion correction is recorded per page but
/// rendering it is out of scope; `Auto` currently renders flat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Dewarping {
    /// No distortion model.
    #[default]
    Off,
    /// Build a distortion model automatically.
    Auto,
}

/// How aggressively isolated specks are removed after binarization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DespeckleLevel {
    /// Leave the binarized image untouched.
    Off,
    /// Remove single-pixel specks only.
    Cautious,
    /// Remove small speck clusters.
    #[default]
    Normal,
    /// Remove larger clusters; may eat fine detail.
    Aggressive,
}

impl DespeckleLevel {
    /// Median filter radius for this level, or `None` for [`Self::Off`].
    const fn filter_radius(self) -> Option<u32> {
        match self {
            Self::Off => None,
            Self::Cautious => Some(1),
            Self::Normal => Some(2),
            Self::Aggressive => Some(3),
        }
    }
}

/// Upstream state a rendered page depends on.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Dependencies {
    /// The content box that was rendered.
    pub content_box: ContentBox,
    /// The margins that were applied.
    pub margins: Margins,
}

/// Per-page output parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Params {
    /// Output resolution in dots per inch.
    pub dpi: u32,
    /// Colour treatment.
    pub color_mode: ColorMode,
    /// Shifts the Otsu threshold; positive darkens, negative lightens.
    pub threshold_adjustment: i32,
    /// Speck removal level applied after binarization.
    pub despeckle: DespeckleLevel,
    /// Distortion correction mode.
    pub dewarping: Dewarping,
    /// Perceived depth used by dewarping, in the 1.0..=3.0 range.
    pub depth_perception: f64,
    /// Force margins to render white even in colour mode.
    pub white_margins: bool,
    /// Flatten uneven lighting before binarization.
    pub normalize_illumination: bool,
    /// Dependency snapshot recorded at the last successful render.
    pub deps: Option<Dependencies>,
}

impl Default for Params {
    fn default() -> Self {
        Self {
            dpi: 600,
            color_mode: ColorMode::default(),
            threshold_adjustment: 0,
            despeckle: DespeckleLevel::default(),
            dewarping: Dewarping::default(),
            depth_perception: 2.0,
            white_margins: true,
            normalize_illumination: false,
            deps: None,
        }
    }
}

/// The output stage.
#[derive(Debug, Default)]
pub struct Stage {
    /// Per-page output settings.
    pub settings: SettingsStore<Params>,
}

impl Stage {
    /// Build the unit of work for one page.
    #[must_use]
    pub fn create_task(&self, page: PageId, batch: bool, debug: bool) -> Task {
        Task { page, batch, debug }
    }

    /// Is the file on disk still valid under `deps`? A valid probe
    /// additionally requires the file to exist; the settings record
    /// alone does not prove the render survived.
    #[must_use]
    pub fn cache_probe(
        &self,
        page: &PageId,
        deps: &Dependencies,
        output_file_exists: bool,
    ) -> CacheState {
        match self.settings.get_recorded(page) {
            Some(params)
                if output_file_exists && params.deps.as_ref() == Some(deps) =>
            {
                CacheState::Valid
            }
            _ => CacheState::Invalid,
        }
    }
}

/// Unit of work: render the final page and write it to disk.
#[derive(Debug)]
pub struct Task {
    page: PageId,
    batch: bool,
    debug: bool,
}

impl Task {
    /// Render, write, and record.
    ///
    /// # Errors
    ///
    /// Fails on invalid geometry, image encoding failures, or I/O
    /// errors writing the output file.
    pub fn process(
        self,
        ctx: &mut ProcessingContext,
        image: DynamicImage,
        content_box: ContentBox,
        layout: Layout,
    ) -> Result<ChainOutput, StageError> {
        if ctx.is_cancelled() {
            return Err(StageError::at(StageIndex::Output, TaskError::Cancelled));
        }

        if !content_box.fits_within(image.width(), image.height()) {
            return Err(StageError::at(
                StageIndex::Output,
                TaskError::InvalidGeometry(format!(
                    "content box {content_box:?} outside {}x{} page",
                    image.width(),
                    image.height(),
                )),
            ));
        }

        let mut params = ctx.stages.output.settings.get(&self.page);
        if params.dpi == 0 {
            return Err(StageError::at(
                StageIndex::Output,
                TaskError::InvalidGeometry("output dpi must be non-zero".to_owned()),
            ));
        }

        let rendered = render_page(&image, content_box, &layout, &params);

        let path = ctx.output_path(&self.page);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| {
                StageError::at(
                    StageIndex::Output,
                    TaskError::Io {
                        path: parent.to_path_buf(),
                        source,
                    },
                )
            })?;
        }
        rendered
            .save(&path)
            .map_err(|err| StageError::at(StageIndex::Output, TaskError::Image(err)))?;

        params.deps = Some(Dependencies {
            content_box,
            margins: layout.margins,
        });
        ctx.stages.output.settings.set(self.page.clone(), params);

        if !self.batch {
            if self.debug {
                ctx.thumbnails.insert(
                    self.page.clone(),
                    ArtifactKind::StageDebug(StageIndex::Output),
                    &rendered,
                );
            }
            ctx.thumbnails
                .insert(self.page.clone(), ArtifactKind::Preview, &rendered);
        }

        Ok(ChainOutput {
            stage: StageIndex::Output,
            image: rendered,
        })
    }
}

/// Pure rendering step, separated from disk and settings traffic.
#[must_use]
pub fn render_page(
    image: &DynamicImage,
    content_box: ContentBox,
    layout: &Layout,
    params: &Params,
) -> DynamicImage {
    let content = image.crop_imm(
        content_box.x,
        content_box.y,
        content_box.width,
        content_box.height,
    );

    // Content scales from the assumed source resolution to the target.
    let scale = f64::from(params.dpi) / f64::from(SOURCE_DPI);
    let scaled_w = scale_dim(content_box.width, scale);
    let scaled_h = scale_dim(content_box.height, scale);
    let content = content.resize_exact(scaled_w, scaled_h, imageops::FilterType::Lanczos3);

    let content = match params.color_mode {
        ColorMode::Color => content,
        ColorMode::Grayscale => DynamicImage::ImageLuma8(content.to_luma8()),
        ColorMode::BlackAndWhite => DynamicImage::ImageLuma8(binarize(
            &content,
            params.threshold_adjustment,
            params.despeckle,
            params.normalize_illumination,
        )),
    };

    let left_px = mm_to_px(layout.margins.left, params.dpi);
    let right_px = mm_to_px(layout.margins.right, params.dpi);
    let top_px = mm_to_px(layout.margins.top, params.dpi);
    let bottom_px = mm_to_px(layout.margins.bottom, params.dpi);

    let page_w = scaled_w + left_px + right_px;
    let page_h = scaled_h + top_px + bottom_px;

    let x = match layout.alignment.horizontal {
        HorizontalAlignment::Left => left_px,
        HorizontalAlignment::Center => (page_w - scaled_w) / 2,
        HorizontalAlignment::Right => page_w - scaled_w - right_px,
    };
    let y = match layout.alignment.vertical {
        VerticalAlignment::Top => top_px,
        VerticalAlignment::Center => (page_h - scaled_h) / 2,
        VerticalAlignment::Bottom => page_h - scaled_h - bottom_px,
    };

    let content_rgba = content.to_rgba8();
    let margin_fill = if params.white_margins {
        image::Rgba([255, 255, 255, 255])
    } else {
        border_color(&content_rgba)
    };
    let mut canvas = image::RgbaImage::from_pixel(page_w, page_h, margin_fill);
    imageops::overlay(&mut canvas, &content_rgba, i64::from(x), i64::from(y));

    match params.color_mode {
        ColorMode::Color => DynamicImage::ImageRgba8(canvas),
        ColorMode::Grayscale | ColorMode::BlackAndWhite => {
            DynamicImage::ImageLuma8(DynamicImage::ImageRgba8(canvas).to_luma8())
        }
    }
}

/// Mean colour of the content's outer pixel ring; stands in for the
/// scan background when white margins are disabled.
#[allow(clippy::cast_possible_truncation)]
fn border_color(image: &image::RgbaImage) -> image::Rgba<u8> {
    let (w, h) = image.dimensions();
    if w == 0 || h == 0 {
        return image::Rgba([255, 255, 255, 255]);
    }
    let mut sums = [0u64; 3];
    let mut count = 0u64;
    let mut add = |p: &image::Rgba<u8>| {
        for (sum, channel) in sums.iter_mut().zip(p.0) {
            *sum += u64::from(channel);
        }
        count += 1;
    };
    for x in 0..w {
        add(image.get_pixel(x, 0));
        add(image.get_pixel(x, h - 1));
    }
    for y in 0..h {
        add(image.get_pixel(0, y));
        add(image.get_pixel(w - 1, y));
    }
    // Corners are counted twice; close enough for a fill estimate.
    image::Rgba([
        (sums[0] / count) as u8,
        (sums[1] / count) as u8,
        (sums[2] / count) as u8,
        255,
    ])
}

/// Otsu binarization with a threshold bias and optional despeckling.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn binarize(
    image: &DynamicImage,
    threshold_adjustment: i32,
    despeckle: DespeckleLevel,
    normalize_illumination: bool,
) -> image::GrayImage {
    let mut gray = image.to_luma8();
    if normalize_illumination {
        normalize(&mut gray);
    }

    let level = i32::from(otsu_level(&gray)).saturating_add(threshold_adjustment);
    let level = level.clamp(0, 255) as u8;
    for pixel in gray.pixels_mut() {
        pixel.0[0] = if pixel.0[0] <= level { 0 } else { 255 };
    }

    if let Some(radius) = despeckle.filter_radius() {
        gray = median_filter(&gray, radius, radius);
        // Median filtering reintroduces intermediate values at edges.
        for pixel in gray.pixels_mut() {
            pixel.0[0] = if pixel.0[0] < 128 { 0 } else { 255 };
        }
    }
    gray
}

/// Stretch the luma histogram to the full range.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn normalize(gray: &mut image::GrayImage) {
    let mut lo = 255u8;
    let mut hi = 0u8;
    for Luma([v]) in gray.pixels() {
        lo = lo.min(*v);
        hi = hi.max(*v);
    }
    if hi <= lo {
        return;
    }
    let span = f64::from(hi - lo);
    for pixel in gray.pixels_mut() {
        let v = f64::from(pixel.0[0] - lo) / span * 255.0;
        pixel.0[0] = v.round().clamp(0.0, 255.0) as u8;
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn mm_to_px(mm: f64, dpi: u32) -> u32 {
    (mm / MM_PER_INCH * f64::from(dpi)).round().max(0.0) as u32
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn scale_dim(dim: u32, scale: f64) -> u32 {
    ((f64::from(dim) * scale).round() as u32).max(1)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::stages::page_layout::Alignment;
    use image::Rgba;

    fn layout_mm(mm: f64) -> Layout {
        Layout {
            margins: Margins::uniform(mm),
            alignment: Alignment::default(),
        }
    }

    #[test]
    fn millimetre_conversion_rounds_at_the_output_resolution() {
        assert_eq!(mm_to_px(25.4, 300), 300);
        assert_eq!(mm_to_px(10.0, 600), 236);
        assert_eq!(mm_to_px(0.0, 600), 0);
    }

    #[test]
    fn rendered_page_is_content_plus_margins() {
        let img = DynamicImage::ImageRgba8(image::RgbaImage::from_pixel(
            100,
            80,
            Rgba([40, 40, 40, 255]),
        ));
        let content_box = ContentBox::full(100, 80);
        let params = Params {
            dpi: 300,
            ..Params::default()
        };
        let page = render_page(&img, content_box, &layout_mm(25.4), &params);
        // 300 px of margin on each side at 300 dpi.
        assert_eq!(page.width(), 100 + 600);
        assert_eq!(page.height(), 80 + 600);
    }

    #[test]
    fn disabled_white_margins_take_the_content_border_colour() {
        let img = DynamicImage::ImageRgba8(image::RgbaImage::from_pixel(
            50,
            40,
            Rgba([40, 80, 120, 255]),
        ));
        let params = Params {
            dpi: 300,
            white_margins: false,
            ..Params::default()
        };
        let page = render_page(&img, ContentBox::full(50, 40), &layout_mm(25.4), &params);
        // A corner pixel sits inside the margin band.
        assert_eq!(page.to_rgba8().get_pixel(0, 0), &Rgba([40, 80, 120, 255]));
    }

    #[test]
    fn black_and_white_mode_produces_only_extremes() {
        let mut img = image::RgbaImage::from_pixel(40, 40, Rgba([230, 230, 230, 255]));
        for y in 10..30 {
            for x in 10..30 {
                img.put_pixel(x, y, Rgba([25, 25, 25, 255]));
            }
        }
        let params = Params {
            dpi: 300,
            color_mode: ColorMode::BlackAndWhite,
            ..Params::default()
        };
        let page = render_page(
            &DynamicImage::ImageRgba8(img),
            ContentBox::full(40, 40),
            &layout_mm(0.0),
            &params,
        );
        for Luma([v]) in page.to_luma8().pixels() {
            assert!(*v == 0 || *v == 255, "intermediate value {v}");
        }
    }

    #[test]
    fn probe_distrusts_a_missing_output_file() {
        use crate::pages::{ImageId, SubPage};
        let mut stage = Stage::default();
        let page = PageId::new(ImageId::new("a.png"), SubPage::Whole);
        let deps = Dependencies {
            content_box: ContentBox::full(10, 10),
            margins: Margins::default(),
        };
        stage.settings.set(
            page.clone(),
            Params {
                deps: Some(deps),
                ..Params::default()
            },
        );
        assert_eq!(stage.cache_probe(&page, &deps, true), CacheState::Valid);
        assert_eq!(stage.cache_probe(&page, &deps, false), CacheState::Invalid);
    }
}
