//! Composite task construction.
//!
//! A processing request names a page and the last stage to run. The
//! chain is assembled backward from that stage down to orientation,
//! each stage wrapping the continuation built so far, and then
//! executes forward. Only the first stage actually built receives the
//! debug flag; every inner stage gets `false` so diagnostic work is
//! done once.

use std::fs;

use image::DynamicImage;

use crate::context::ProcessingContext;
use crate::error::{StageError, TaskError};
use crate::pages::PageId;
use crate::stages::{ChainOutput, StageIndex, StageSequence, orientation};

/// Single-use chain of stage tasks for one page. Built fresh per
/// request, consumed by [`CompositeTask::execute`].
#[derive(Debug)]
pub struct CompositeTask {
    page: PageId,
    root: orientation::Task,
}

/// Assemble the chain covering stages `[Orientation, last_stage]`.
///
/// Orientation is always the root, so the chain is non-empty by
/// construction.
#[must_use]
pub fn build(
    stages: &StageSequence,
    page: &PageId,
    last_stage: StageIndex,
    batch: bool,
    debug: bool,
) -> CompositeTask {
    let mut debug = debug;
    let mut take_debug = || {
        let flag = debug;
        debug = false;
        flag
    };

    let output_task = (last_stage >= StageIndex::Output)
        .then(|| stages.output.create_task(page.clone(), batch, take_debug()));
    let page_layout_task = (last_stage >= StageIndex::PageLayout).then(|| {
        stages
            .page_layout
            .create_task(page.clone(), output_task, batch, take_debug())
    });
    let select_content_task = (last_stage >= StageIndex::SelectContent).then(|| {
        stages
            .select_content
            .create_task(page.clone(), page_layout_task, batch, take_debug())
    });
    let deskew_task = (last_stage >= StageIndex::Deskew).then(|| {
        stages
            .deskew
            .create_task(page.clone(), select_content_task, batch, take_debug())
    });
    let split_task = (last_stage >= StageIndex::Split).then(|| {
        stages
            .split
            .create_task(page.clone(), deskew_task, batch, take_debug())
    });
    let root = stages
        .orientation
        .create_task(page.clone(), split_task, batch, take_debug());

    CompositeTask {
        page: page.clone(),
        root,
    }
}

impl CompositeTask {
    /// The page this chain processes.
    #[must_use]
    pub const fn page(&self) -> &PageId {
        &self.page
    }

    /// Load the source image and run the chain forward.
    ///
    /// # Errors
    ///
    /// Load failures are tagged as pre-pipeline; stage failures carry
    /// the failing stage. Either way the error stays scoped to this
    /// page.
    pub fn execute(self, ctx: &mut ProcessingContext) -> Result<ChainOutput, StageError> {
        let image = load_source(&self.page)?;
        self.root.process(ctx, &image)
    }

    /// Run the chain against an already-decoded image. Used by tests
    /// and callers that manage decoding themselves.
    ///
    /// # Errors
    ///
    /// Propagates the first stage failure.
    pub fn execute_on(
        self,
        ctx: &mut ProcessingContext,
        image: &DynamicImage,
    ) -> Result<ChainOutput, StageError> {
        self.root.process(ctx, image)
    }
}

fn load_source(page: &PageId) -> Result<DynamicImage, StageError> {
    let path = page.image().path();
    let bytes = fs::read(path).map_err(|source| {
        StageError::at_load(TaskError::Io {
            path: path.to_path_buf(),
            source,
        })
    })?;
    // Multi-frame sources decode to their first frame; the frame index
    // on ImageId keeps the pages distinct in the catalog.
    image::load_from_memory(&bytes).map_err(|err| StageError::at_load(TaskError::Image(err)))
}
