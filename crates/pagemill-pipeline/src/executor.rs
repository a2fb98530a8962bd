//! Task execution.
//!
//! Batch mode walks a page sequence in order, builds a chain per page,
//! and isolates failures: a page that cannot decode or fails mid-stage
//! is recorded and the batch moves on. Interactive callers submit
//! chains to a [`TaskQueue`] instead and drain results one at a time,
//! with cancellation checked between stages.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::composer::{self, CompositeTask};
use crate::context::ProcessingContext;
use crate::error::StageError;
use crate::pages::{PageId, PageSequence};
use crate::stages::StageIndex;

/// Outcome of one page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageStatus {
    /// Every requested stage ran.
    Success,
    /// A stage failed; the reason names the stage.
    Failure(String),
}

impl PageStatus {
    /// Whether this page completed.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

/// A page paired with its outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageResult {
    /// The page processed.
    pub page: PageId,
    /// How it went.
    pub status: PageStatus,
}

/// Rolled-up outcome of a batch run.
#[derive(Debug, Default)]
pub struct BatchSummary {
    /// Per-page outcomes in processing order.
    pub results: Vec<PageResult>,
    /// Pages skipped because cancellation arrived first.
    pub skipped: usize,
}

impl BatchSummary {
    /// Pages that completed.
    #[must_use]
    pub fn succeeded(&self) -> usize {
        self.results
            .iter()
            .filter(|r| r.status.is_success())
            .count()
    }

    /// Pages that failed.
    #[must_use]
    pub fn failed(&self) -> usize {
        self.results.len() - self.succeeded()
    }

    /// The run is successful only if every attempted page succeeded
    /// and none were skipped.
    #[must_use]
    pub fn all_succeeded(&self) -> bool {
        self.failed() == 0 && self.skipped == 0
    }
}

/// Periodic aggregate progress for long batches.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AggregateProgress {
    /// Completed fraction in `0.0..=1.0`.
    pub fraction: f64,
    /// Wall time since the batch started.
    pub elapsed: Duration,
    /// Extrapolated time to completion, once at least one page is done.
    pub estimated_remaining: Option<Duration>,
}

impl AggregateProgress {
    #[allow(clippy::cast_precision_loss)]
    fn compute(done: usize, total: usize, started: Instant) -> Self {
        let elapsed = started.elapsed();
        let fraction = if total == 0 {
            1.0
        } else {
            done as f64 / total as f64
        };
        let estimated_remaining = (done > 0 && done < total).then(|| {
            let per_page = elapsed.div_f64(done as f64);
            per_page.mul_f64((total - done) as f64)
        });
        Self {
            fraction,
            elapsed,
            estimated_remaining,
        }
    }
}

/// Receives batch progress callbacks.
pub trait ProgressListener {
    /// A page is about to be processed. `index` is zero-based.
    fn page_started(&mut self, index: usize, total: usize, page: &PageId);

    /// A page finished, successfully or not.
    fn page_finished(&mut self, index: usize, total: usize, result: &PageResult);

    /// Aggregate progress after each page.
    fn progress(&mut self, progress: AggregateProgress);
}

/// Listener that ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentListener;

impl ProgressListener for SilentListener {
    fn page_started(&mut self, _index: usize, _total: usize, _page: &PageId) {}
    fn page_finished(&mut self, _index: usize, _total: usize, _result: &PageResult) {}
    fn progress(&mut self, _progress: AggregateProgress) {}
}

/// Run every page in `pages` through stages up to `last_stage`.
///
/// Per-page failures are captured in the summary; only the summary
/// says whether the batch as a whole succeeded.
pub fn run_batch(
    ctx: &mut ProcessingContext,
    pages: &PageSequence,
    last_stage: StageIndex,
    listener: &mut dyn ProgressListener,
) -> BatchSummary {
    let total = pages.num_pages();
    let started = Instant::now();
    let mut summary = BatchSummary::default();

    for (index, info) in pages.iter().enumerate() {
        if ctx.is_cancelled() {
            summary.skipped = total - index;
            break;
        }
        let page = info.id();
        listener.page_started(index, total, page);

        let task = composer::build(&ctx.stages, page, last_stage, true, false);
        let result = PageResult {
            page: page.clone(),
            status: status_of(task.execute(ctx)),
        };

        listener.page_finished(index, total, &result);
        summary.results.push(result);
        listener.progress(AggregateProgress::compute(index + 1, total, started));
    }
    summary
}

fn status_of<T>(outcome: Result<T, StageError>) -> PageStatus {
    match outcome {
        Ok(_) => PageStatus::Success,
        Err(err) => PageStatus::Failure(err.to_string()),
    }
}

/// FIFO queue for interactive processing: chains go in, results come
/// out as [`drain_next`](TaskQueue::drain_next) is called.
#[derive(Debug, Default)]
pub struct TaskQueue {
    pending: VecDeque<CompositeTask>,
}

impl TaskQueue {
    /// An empty queue.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            pending: VecDeque::new(),
        }
    }

    /// Enqueue a chain for later execution.
    pub fn submit(&mut self, task: CompositeTask) {
        self.pending.push_back(task);
    }

    /// Execute the oldest pending chain, if any. Cancellation empties
    /// the queue without running anything.
    pub fn drain_next(&mut self, ctx: &mut ProcessingContext) -> Option<PageResult> {
        if ctx.is_cancelled() {
            self.pending.clear();
            return None;
        }
        let task = self.pending.pop_front()?;
        let page = task.page().clone();
        Some(PageResult {
            page,
            status: status_of(task.execute(ctx)),
        })
    }

    /// Pending chains not yet executed.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Whether nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::context::CancelFlag;
    use crate::pages::{ImageId, SubPage};
    use crate::stages::StageSequence;

    fn sequence_of(names: &[&str]) -> PageSequence {
        names
            .iter()
            .map(|n| {
                crate::pages::PageInfo::new(
                    PageId::new(ImageId::new(*n), SubPage::Whole),
                    false,
                )
            })
            .collect::<Vec<_>>()
            .into()
    }

    #[derive(Default)]
    struct Recording {
        started: Vec<usize>,
        finished: Vec<bool>,
        fractions: Vec<f64>,
    }

    impl ProgressListener for Recording {
        fn page_started(&mut self, index: usize, _total: usize, _page: &PageId) {
            self.started.push(index);
        }
        fn page_finished(&mut self, _index: usize, _total: usize, result: &PageResult) {
            self.finished.push(result.status.is_success());
        }
        fn progress(&mut self, progress: AggregateProgress) {
            self.fractions.push(progress.fraction);
        }
    }

    #[test]
    fn missing_files_fail_their_page_without_stopping_the_batch() {
        let mut ctx = ProcessingContext::new(StageSequence::new(), "out");
        let pages = sequence_of(&["missing-1.png", "missing-2.png"]);
        let mut listener = Recording::default();

        let summary = run_batch(&mut ctx, &pages, StageIndex::Orientation, &mut listener);

        assert_eq!(summary.results.len(), 2);
        assert_eq!(summary.failed(), 2);
        assert!(!summary.all_succeeded());
        assert_eq!(listener.started, vec![0, 1]);
        assert_eq!(listener.finished, vec![false, false]);
        assert_eq!(listener.fractions, vec![0.5, 1.0]);
    }

    #[test]
    fn cancellation_skips_the_remaining_pages() {
        let flag = CancelFlag::new();
        flag.cancel();
        let mut ctx = ProcessingContext::new(StageSequence::new(), "out")
            .with_cancel_flag(flag);
        let pages = sequence_of(&["a.png", "b.png", "c.png"]);

        let summary = run_batch(
            &mut ctx,
            &pages,
            StageIndex::Output,
            &mut SilentListener,
        );
        assert_eq!(summary.results.len(), 0);
        assert_eq!(summary.skipped, 3);
        assert!(!summary.all_succeeded());
    }

    #[test]
    fn empty_batch_succeeds_trivially() {
        let mut ctx = ProcessingContext::new(StageSequence::new(), "out");
        let summary = run_batch(
            &mut ctx,
            &sequence_of(&[]),
            StageIndex::Output,
            &mut SilentListener,
        );
        assert!(summary.all_succeeded());
    }

    #[test]
    fn queue_drains_in_submission_order() {
        let mut ctx = ProcessingContext::new(StageSequence::new(), "out");
        let mut queue = TaskQueue::new();
        for name in ["first.png", "second.png"] {
            let page = PageId::new(ImageId::new(name), SubPage::Whole);
            queue.submit(composer::build(
                &ctx.stages,
                &page,
                StageIndex::Orientation,
                false,
                false,
            ));
        }
        assert_eq!(queue.len(), 2);

        let first = queue.drain_next(&mut ctx).unwrap();
        assert_eq!(first.page.image().path().to_str(), Some("first.png"));
        assert!(!first.status.is_success());
        assert_eq!(queue.len(), 1);
    }
}
