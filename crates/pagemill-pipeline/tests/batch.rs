//! Integration test: run synthetic scans through the full pipeline.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::path::Path;

use image::{DynamicImage, Rgba, RgbaImage};
use pagemill_pipeline::executor::SilentListener;
use pagemill_pipeline::pages::{ImageFileInfo, PageView};
use pagemill_pipeline::project::{self, Project};
use pagemill_pipeline::{
    ImageId, LayoutDirection, PageCatalog, ProcessingContext, StageIndex, StageSequence,
    run_batch,
};

/// Write a white page with a dark text-like block to `path`.
fn write_scan(path: &Path, width: u32, height: u32) -> ImageFileInfo {
    let mut img = RgbaImage::from_pixel(width, height, Rgba([250, 250, 250, 255]));
    for y in height / 4..height / 2 {
        for x in width / 4..(3 * width / 4) {
            img.put_pixel(x, y, Rgba([20, 20, 20, 255]));
        }
    }
    DynamicImage::ImageRgba8(img).save(path).unwrap();
    ImageFileInfo {
        id: ImageId::new(path),
        width,
        height,
    }
}

#[test]
fn full_batch_writes_one_file_per_logical_page() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("out");

    // Two portrait scans and one landscape spread (two logical pages).
    let infos = vec![
        write_scan(&dir.path().join("p1.png"), 120, 160),
        write_scan(&dir.path().join("p2.png"), 120, 160),
        write_scan(&dir.path().join("spread.png"), 320, 160),
    ];
    let catalog = PageCatalog::from_images(infos, LayoutDirection::LeftToRight);
    let pages = catalog.to_page_sequence(PageView::Pages);
    assert_eq!(pages.num_pages(), 4);

    let mut ctx = ProcessingContext::new(StageSequence::new(), &out);
    let summary = run_batch(&mut ctx, &pages, StageIndex::Output, &mut SilentListener);

    assert!(summary.all_succeeded(), "failures: {:?}", summary.results);
    for name in ["p1.png", "p2.png", "spread_L.png", "spread_R.png"] {
        assert!(out.join(name).is_file(), "missing output {name}");
    }

    // Every stage recorded settings for every page.
    for info in &pages {
        assert!(
            ctx.stages
                .output
                .settings
                .get_recorded(info.id())
                .is_some(),
        );
    }
}

#[test]
fn one_broken_page_does_not_abort_the_rest() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("out");

    let good = write_scan(&dir.path().join("good.png"), 100, 140);
    // Catalog entry whose file never existed.
    let missing = ImageFileInfo {
        id: ImageId::new(dir.path().join("gone.png")),
        width: 100,
        height: 140,
    };
    let also_good = write_scan(&dir.path().join("tail.png"), 100, 140);

    let catalog = PageCatalog::from_images(
        vec![good, missing, also_good],
        LayoutDirection::LeftToRight,
    );
    let pages = catalog.to_page_sequence(PageView::Pages);

    let mut ctx = ProcessingContext::new(StageSequence::new(), &out);
    let summary = run_batch(&mut ctx, &pages, StageIndex::Output, &mut SilentListener);

    assert_eq!(summary.results.len(), 3);
    assert_eq!(summary.succeeded(), 2);
    assert_eq!(summary.failed(), 1);
    assert!(!summary.all_succeeded());
    assert!(out.join("good.png").is_file());
    assert!(out.join("tail.png").is_file());

    let failure = summary
        .results
        .iter()
        .find(|r| !r.status.is_success())
        .unwrap();
    assert!(failure.page.image().path().ends_with("gone.png"));
}

#[test]
fn project_saved_after_a_run_restores_computed_state() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("out");
    let infos = vec![write_scan(&dir.path().join("page.png"), 120, 160)];
    let catalog = PageCatalog::from_images(infos, LayoutDirection::LeftToRight);
    let pages = catalog.to_page_sequence(PageView::Pages);

    let mut ctx = ProcessingContext::new(StageSequence::new(), &out);
    let summary = run_batch(&mut ctx, &pages, StageIndex::Output, &mut SilentListener);
    assert!(summary.all_succeeded());

    let (stages, naming, output_dir) = ctx.into_parts();
    let saved = Project {
        catalog: catalog.clone(),
        stages,
        naming,
        output_dir,
    };
    let path = dir.path().join("book.pagemill");
    project::write(&saved, &path).unwrap();

    let restored = project::read(&path).unwrap();
    assert_eq!(restored.catalog, catalog);
    let page = pages.page_at(0).unwrap().id();
    // What the run computed survives the round trip.
    let deskew = restored.stages.deskew.settings.get_recorded(page).unwrap();
    assert!(deskew.deps.is_some());
    let output = restored.stages.output.settings.get_recorded(page).unwrap();
    assert!(output.deps.is_some());
}
