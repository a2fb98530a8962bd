//! Page identity and the page catalog.
//!
//! A scanned source image can hold one logical page or two (a book
//! opened flat). [`PageId`] names one logical page: the source image
//! plus a sub-page selector. The [`PageCatalog`] keeps the ordered set
//! of sources and produces immutable [`PageSequence`] snapshots for
//! the execution engine.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Identity of a source image: file path plus the frame index within
/// a multi-image file (e.g. a multi-page TIFF).
///
/// Equality and ordering are by `(path, frame)`. The path may be
/// rewritten by a relinking pass without disturbing any per-page
/// settings — see [`crate::settings::Relinker`].
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ImageId {
    path: PathBuf,
    frame: usize,
}

impl ImageId {
    /// Create an identity for a single-frame source file.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            frame: 0,
        }
    }

    /// Create an identity for a specific frame of a multi-image file.
    #[must_use]
    pub fn with_frame(path: impl Into<PathBuf>, frame: usize) -> Self {
        Self {
            path: path.into(),
            frame,
        }
    }

    /// The source file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Frame index within the source file (0 for single-frame files).
    #[must_use]
    pub const fn frame(&self) -> usize {
        self.frame
    }

    /// The file stem, used for output naming. Falls back to `"page"`
    /// for paths with no usable stem.
    #[must_use]
    pub fn stem(&self) -> &str {
        self.path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("page")
    }

    /// Return a copy with the path replaced, keeping the frame index.
    #[must_use]
    pub fn relinked_to(&self, new_path: impl Into<PathBuf>) -> Self {
        Self {
            path: new_path.into(),
            frame: self.frame,
        }
    }
}

/// Which part of a source image a logical page covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum SubPage {
    /// The entire source image.
    Whole,
    /// The left half of a two-page source.
    Left,
    /// The right half of a two-page source.
    Right,
}

impl SubPage {
    /// Output file name suffix for this sub-page (`""` for whole pages).
    #[must_use]
    pub const fn file_suffix(self) -> &'static str {
        match self {
            Self::Whole => "",
            Self::Left => "_L",
            Self::Right => "_R",
        }
    }
}

/// Stable logical identifier of one processable page.
///
/// Every settings store and the thumbnail cache are keyed by this
/// type. Equality is by `(image identity, sub-page selector)`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PageId {
    image: ImageId,
    sub_page: SubPage,
}

impl PageId {
    /// Create a page identity.
    #[must_use]
    pub const fn new(image: ImageId, sub_page: SubPage) -> Self {
        Self { image, sub_page }
    }

    /// The source image identity.
    #[must_use]
    pub const fn image(&self) -> &ImageId {
        &self.image
    }

    /// The sub-page selector.
    #[must_use]
    pub const fn sub_page(&self) -> SubPage {
        self.sub_page
    }
}

impl std::fmt::Display for PageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}", self.image.path().display(), self.sub_page.file_suffix())
    }
}

/// One entry of a [`PageSequence`]: the page identity plus catalog
/// metadata the load step needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageInfo {
    id: PageId,
    /// Whether the source image is split into two logical pages.
    two_page_source: bool,
}

impl PageInfo {
    /// Create a page info record.
    #[must_use]
    pub const fn new(id: PageId, two_page_source: bool) -> Self {
        Self { id, two_page_source }
    }

    /// The page identity.
    #[must_use]
    pub const fn id(&self) -> &PageId {
        &self.id
    }

    /// The source image identity.
    #[must_use]
    pub const fn image_id(&self) -> &ImageId {
        self.id.image()
    }

    /// Whether the source image yields two logical pages.
    #[must_use]
    pub const fn is_two_page_source(&self) -> bool {
        self.two_page_source
    }
}

/// Snapshot granularity for [`PageCatalog::to_page_sequence`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageView {
    /// One entry per source image.
    Images,
    /// One entry per logical page after splitting.
    Pages,
}

/// Reading order of two-page sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LayoutDirection {
    /// Left page comes first.
    #[default]
    LeftToRight,
    /// Right page comes first (e.g. Hebrew, Japanese books).
    RightToLeft,
}

/// One source image and its current sub-page split.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRecord {
    image: ImageId,
    /// Sub-pages in reading order: `[Whole]` or `[Left, Right]` /
    /// `[Right, Left]` depending on layout direction.
    sub_pages: Vec<SubPage>,
}

impl SourceRecord {
    /// The source image identity.
    #[must_use]
    pub const fn image(&self) -> &ImageId {
        &self.image
    }

    /// Sub-pages in reading order.
    #[must_use]
    pub fn sub_pages(&self) -> &[SubPage] {
        &self.sub_pages
    }
}

/// Ordered collection of source images and their logical pages,
/// independent of any processing state.
///
/// The catalog is never handed out mutably to stages; the engine
/// takes an immutable [`PageSequence`] snapshot before a run and the
/// snapshot is what gets iterated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageCatalog {
    sources: Vec<SourceRecord>,
    layout_direction: LayoutDirection,
}

/// Source description used to build a catalog: identity plus pixel
/// dimensions (read cheaply from the file header, not a full decode).
#[derive(Debug, Clone)]
pub struct ImageFileInfo {
    /// Source image identity.
    pub id: ImageId,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl PageCatalog {
    /// Build a catalog from source descriptions, deciding the
    /// per-source split automatically: landscape sources (wider than
    /// tall) are treated as two-page spreads.
    #[must_use]
    pub fn from_images(images: Vec<ImageFileInfo>, layout_direction: LayoutDirection) -> Self {
        let sources = images
            .into_iter()
            .map(|info| {
                let sub_pages = if info.width > info.height {
                    Self::two_page_order(layout_direction)
                } else {
                    vec![SubPage::Whole]
                };
                SourceRecord {
                    image: info.id,
                    sub_pages,
                }
            })
            .collect();
        Self {
            sources,
            layout_direction,
        }
    }

    /// Rebuild a catalog from persisted source records.
    #[must_use]
    pub const fn from_sources(
        sources: Vec<SourceRecord>,
        layout_direction: LayoutDirection,
    ) -> Self {
        Self {
            sources,
            layout_direction,
        }
    }

    fn two_page_order(direction: LayoutDirection) -> Vec<SubPage> {
        match direction {
            LayoutDirection::LeftToRight => vec![SubPage::Left, SubPage::Right],
            LayoutDirection::RightToLeft => vec![SubPage::Right, SubPage::Left],
        }
    }

    /// The configured reading order.
    #[must_use]
    pub const fn layout_direction(&self) -> LayoutDirection {
        self.layout_direction
    }

    /// Persisted source records, in catalog order.
    #[must_use]
    pub fn sources(&self) -> &[SourceRecord] {
        &self.sources
    }

    /// Number of source images.
    #[must_use]
    pub const fn num_images(&self) -> usize {
        self.sources.len()
    }

    /// Override the split of one source image (applied by batch
    /// configuration or an interactive edit, never mid-run).
    pub fn set_split(&mut self, image: &ImageId, two_pages: bool) {
        let direction = self.layout_direction;
        if let Some(record) = self.sources.iter_mut().find(|r| &r.image == image) {
            record.sub_pages = if two_pages {
                Self::two_page_order(direction)
            } else {
                vec![SubPage::Whole]
            };
        }
    }

    /// Remove a source image and all of its logical pages. Returns the
    /// page identities that left the catalog so per-page state held
    /// elsewhere (settings, thumbnails, naming) can be dropped with
    /// them.
    pub fn remove_image(&mut self, image: &ImageId) -> Vec<PageId> {
        let mut removed = Vec::new();
        self.sources.retain(|r| {
            if &r.image != image {
                return true;
            }
            // Both view granularities may have keyed state by now.
            removed.push(PageId::new(r.image.clone(), SubPage::Whole));
            for &sub in &r.sub_pages {
                if sub != SubPage::Whole {
                    removed.push(PageId::new(r.image.clone(), sub));
                }
            }
            false
        });
        removed
    }

    /// Rewrite source paths according to the relinker, preserving
    /// catalog order and splits.
    pub fn perform_relinking(&mut self, relinker: &crate::settings::Relinker) {
        for record in &mut self.sources {
            if let Some(new_path) = relinker.rewrite(record.image.path()) {
                record.image = record.image.relinked_to(new_path);
            }
        }
    }

    /// Take an immutable snapshot of the pages in processing order.
    ///
    /// The snapshot is independent of later catalog mutation; a new
    /// one must be taken after any change.
    #[must_use]
    pub fn to_page_sequence(&self, view: PageView) -> PageSequence {
        let mut pages = Vec::new();
        for record in &self.sources {
            match view {
                PageView::Images => {
                    pages.push(PageInfo::new(
                        PageId::new(record.image.clone(), SubPage::Whole),
                        record.sub_pages.len() > 1,
                    ));
                }
                PageView::Pages => {
                    let two = record.sub_pages.len() > 1;
                    for &sub in &record.sub_pages {
                        pages.push(PageInfo::new(PageId::new(record.image.clone(), sub), two));
                    }
                }
            }
        }
        PageSequence { pages }
    }
}

/// Read-only, ordered snapshot of pages for one run.
#[derive(Debug, Clone)]
pub struct PageSequence {
    pages: Vec<PageInfo>,
}

impl PageSequence {
    /// Number of pages in the snapshot.
    #[must_use]
    pub const fn num_pages(&self) -> usize {
        self.pages.len()
    }

    /// The page at the given position, or `None` past the end.
    #[must_use]
    pub fn page_at(&self, index: usize) -> Option<&PageInfo> {
        self.pages.get(index)
    }

    /// Iterate the pages in processing order.
    pub fn iter(&self) -> std::slice::Iter<'_, PageInfo> {
        self.pages.iter()
    }
}

impl From<Vec<PageInfo>> for PageSequence {
    fn from(pages: Vec<PageInfo>) -> Self {
        Self { pages }
    }
}

impl<'a> IntoIterator for &'a PageSequence {
    type Item = &'a PageInfo;
    type IntoIter = std::slice::Iter<'a, PageInfo>;

    fn into_iter(self) -> Self::IntoIter {
        self.pages.iter()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn info(path: &str, width: u32, height: u32) -> ImageFileInfo {
        ImageFileInfo {
            id: ImageId::new(path),
            width,
            height,
        }
    }

    #[test]
    fn page_id_equality_is_by_image_and_sub_page() {
        let a = PageId::new(ImageId::new("scan.png"), SubPage::Left);
        let b = PageId::new(ImageId::new("scan.png"), SubPage::Left);
        let c = PageId::new(ImageId::new("scan.png"), SubPage::Right);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn image_id_frames_are_distinct() {
        let a = ImageId::with_frame("book.tif", 0);
        let b = ImageId::with_frame("book.tif", 1);
        assert_ne!(a, b);
        assert_eq!(a.path(), b.path());
    }

    #[test]
    fn relinked_image_id_keeps_frame() {
        let original = ImageId::with_frame("old/book.tif", 3);
        let moved = original.relinked_to("new/book.tif");
        assert_eq!(moved.frame(), 3);
        assert_eq!(moved.path(), Path::new("new/book.tif"));
    }

    #[test]
    fn portrait_source_yields_single_page() {
        let catalog = PageCatalog::from_images(
            vec![info("portrait.png", 100, 200)],
            LayoutDirection::LeftToRight,
        );
        let seq = catalog.to_page_sequence(PageView::Pages);
        assert_eq!(seq.num_pages(), 1);
        assert_eq!(seq.page_at(0).unwrap().id().sub_page(), SubPage::Whole);
    }

    #[test]
    fn landscape_source_yields_two_pages_in_reading_order() {
        let catalog = PageCatalog::from_images(
            vec![info("spread.png", 400, 200)],
            LayoutDirection::LeftToRight,
        );
        let seq = catalog.to_page_sequence(PageView::Pages);
        assert_eq!(seq.num_pages(), 2);
        assert_eq!(seq.page_at(0).unwrap().id().sub_page(), SubPage::Left);
        assert_eq!(seq.page_at(1).unwrap().id().sub_page(), SubPage::Right);
    }

    #[test]
    fn right_to_left_reverses_sub_page_order() {
        let catalog = PageCatalog::from_images(
            vec![info("spread.png", 400, 200)],
            LayoutDirection::RightToLeft,
        );
        let seq = catalog.to_page_sequence(PageView::Pages);
        assert_eq!(seq.page_at(0).unwrap().id().sub_page(), SubPage::Right);
        assert_eq!(seq.page_at(1).unwrap().id().sub_page(), SubPage::Left);
    }

    #[test]
    fn images_view_has_one_entry_per_source() {
        let catalog = PageCatalog::from_images(
            vec![info("spread.png", 400, 200), info("portrait.png", 100, 200)],
            LayoutDirection::LeftToRight,
        );
        let seq = catalog.to_page_sequence(PageView::Images);
        assert_eq!(seq.num_pages(), 2);
        assert!(seq.page_at(0).unwrap().is_two_page_source());
        assert!(!seq.page_at(1).unwrap().is_two_page_source());
    }

    #[test]
    fn snapshot_is_unaffected_by_later_catalog_changes() {
        let mut catalog = PageCatalog::from_images(
            vec![info("a.png", 100, 200)],
            LayoutDirection::LeftToRight,
        );
        let before = catalog.to_page_sequence(PageView::Pages);
        catalog.set_split(&ImageId::new("a.png"), true);
        assert_eq!(before.num_pages(), 1);
        assert_eq!(catalog.to_page_sequence(PageView::Pages).num_pages(), 2);
    }

    #[test]
    fn set_split_respects_layout_direction() {
        let mut catalog = PageCatalog::from_images(
            vec![info("a.png", 100, 200)],
            LayoutDirection::RightToLeft,
        );
        catalog.set_split(&ImageId::new("a.png"), true);
        let seq = catalog.to_page_sequence(PageView::Pages);
        assert_eq!(seq.page_at(0).unwrap().id().sub_page(), SubPage::Right);
    }

    #[test]
    fn remove_image_drops_its_pages() {
        let mut catalog = PageCatalog::from_images(
            vec![info("a.png", 100, 200), info("b.png", 100, 200)],
            LayoutDirection::LeftToRight,
        );
        let removed = catalog.remove_image(&ImageId::new("a.png"));
        assert_eq!(
            removed,
            [PageId::new(ImageId::new("a.png"), SubPage::Whole)]
        );
        let seq = catalog.to_page_sequence(PageView::Pages);
        assert_eq!(seq.num_pages(), 1);
        assert_eq!(seq.page_at(0).unwrap().image_id(), &ImageId::new("b.png"));
    }

    #[test]
    fn removing_a_spread_reports_every_sub_page() {
        let mut catalog = PageCatalog::from_images(
            vec![info("spread.png", 400, 200)],
            LayoutDirection::LeftToRight,
        );
        let removed = catalog.remove_image(&ImageId::new("spread.png"));
        let subs: Vec<SubPage> = removed.iter().map(PageId::sub_page).collect();
        assert_eq!(subs, [SubPage::Whole, SubPage::Left, SubPage::Right]);
    }

    #[test]
    fn stem_falls_back_for_bare_paths() {
        assert_eq!(ImageId::new("dir/scan_001.png").stem(), "scan_001");
        assert_eq!(ImageId::new("..").stem(), "page");
    }
}
