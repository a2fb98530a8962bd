//! pagemill-pipeline: Scanned-page post-processing engine.
//!
//! Turns raw scans into clean output pages through six fixed stages:
//! orientation -> split -> deskew -> select_content -> page_layout ->
//! output.
//!
//! The engine is organised around per-page state, not bulk pixel
//! buffers: each stage owns a [`settings::SettingsStore`] keyed by
//! [`pages::PageId`], records a dependency snapshot with every result,
//! and can answer "is the recorded result still valid?" without
//! recomputation. Processing requests build a single-use chain of
//! stage tasks ([`composer`]), run it forward ([`executor`]), and
//! isolate any per-page failure from the rest of the batch.

pub mod composer;
pub mod context;
pub mod error;
pub mod executor;
pub mod naming;
pub mod pages;
pub mod project;
pub mod settings;
pub mod stages;
pub mod thumbnails;

pub use composer::{CompositeTask, build};
pub use context::{CancelFlag, ProcessingContext};
pub use error::{ProjectError, StageError, StageLabel, TaskError};
pub use executor::{
    BatchSummary, PageResult, PageStatus, ProgressListener, run_batch,
};
pub use pages::{
    ImageFileInfo, ImageId, LayoutDirection, PageCatalog, PageId, PageInfo, PageSequence,
    PageView, SubPage,
};
pub use stages::{CacheState, ChainOutput, StageIndex, StageSequence};
