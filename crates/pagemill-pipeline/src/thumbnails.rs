//! Bounded preview cache.
//!
//! Holds downscaled renderings keyed by page and artifact kind.
//! Insertion past capacity evicts the least-recently-used entry; a
//! hit refreshes recency. Previews only — stage results live in the
//! settings stores, never here.

use std::collections::BTreeMap;

use image::{DynamicImage, imageops::FilterType};

use crate::pages::PageId;
use crate::stages::StageIndex;

/// Bounding box previews are rendered into.
pub const THUMBNAIL_MAX_DIM: u32 = 200;

const DEFAULT_CAPACITY: usize = 120;

/// What a cached artifact depicts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ArtifactKind {
    /// The page as it would finally render.
    Preview,
    /// A diagnostic snapshot taken after the named stage ran.
    StageDebug(StageIndex),
}

#[derive(Debug)]
struct Entry {
    image: DynamicImage,
    last_used: u64,
}

/// LRU cache of fixed-size previews.
#[derive(Debug)]
pub struct ThumbnailCache {
    entries: BTreeMap<(PageId, ArtifactKind), Entry>,
    capacity: usize,
    clock: u64,
}

impl ThumbnailCache {
    /// A cache holding at most `capacity` previews.
    #[must_use]
    pub const fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: BTreeMap::new(),
            capacity,
            clock: 0,
        }
    }

    /// Downscale `image` to the thumbnail box and store it, evicting
    /// the least-recently-used entry if the cache is full.
    pub fn insert(&mut self, page: PageId, kind: ArtifactKind, image: &DynamicImage) {
        if self.capacity == 0 {
            return;
        }
        let thumb = image.resize(THUMBNAIL_MAX_DIM, THUMBNAIL_MAX_DIM, FilterType::Triangle);
        self.clock += 1;
        self.entries.insert(
            (page, kind),
            Entry {
                image: thumb,
                last_used: self.clock,
            },
        );
        while self.entries.len() > self.capacity {
            self.evict_lru();
        }
    }

    /// Fetch a preview and mark it recently used. `None` means the
    /// caller must (re)render.
    pub fn get(&mut self, page: &PageId, kind: ArtifactKind) -> Option<&DynamicImage> {
        self.clock += 1;
        let clock = self.clock;
        let entry = self.entries.get_mut(&(page.clone(), kind))?;
        entry.last_used = clock;
        Some(&entry.image)
    }

    /// Drop every artifact belonging to `page`.
    pub fn remove_page(&mut self, page: &PageId) {
        self.entries.retain(|(p, _), _| p != page);
    }

    /// Number of cached previews.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn evict_lru(&mut self) {
        let victim = self
            .entries
            .iter()
            .min_by_key(|(_, entry)| entry.last_used)
            .map(|(key, _)| key.clone());
        if let Some(key) = victim {
            self.entries.remove(&key);
        }
    }
}

impl Default for ThumbnailCache {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::pages::{ImageId, SubPage};
    use image::Rgba;

    fn page(name: &str) -> PageId {
        PageId::new(ImageId::new(name), SubPage::Whole)
    }

    fn sample(w: u32, h: u32) -> DynamicImage {
        DynamicImage::ImageRgba8(image::RgbaImage::from_pixel(
            w,
            h,
            Rgba([10, 20, 30, 255]),
        ))
    }

    #[test]
    fn thumbnails_fit_the_bounding_box_preserving_aspect() {
        let mut cache = ThumbnailCache::with_capacity(4);
        cache.insert(page("a.png"), ArtifactKind::Preview, &sample(800, 400));
        let thumb = cache.get(&page("a.png"), ArtifactKind::Preview).unwrap();
        assert_eq!(thumb.width(), 200);
        assert_eq!(thumb.height(), 100);
    }

    #[test]
    fn capacity_overflow_evicts_the_least_recently_used() {
        let mut cache = ThumbnailCache::with_capacity(2);
        cache.insert(page("a.png"), ArtifactKind::Preview, &sample(10, 10));
        cache.insert(page("b.png"), ArtifactKind::Preview, &sample(10, 10));
        // Touch "a" so "b" becomes the eviction victim.
        assert!(cache.get(&page("a.png"), ArtifactKind::Preview).is_some());
        cache.insert(page("c.png"), ArtifactKind::Preview, &sample(10, 10));

        assert_eq!(cache.len(), 2);
        assert!(cache.get(&page("a.png"), ArtifactKind::Preview).is_some());
        assert!(cache.get(&page("b.png"), ArtifactKind::Preview).is_none());
        assert!(cache.get(&page("c.png"), ArtifactKind::Preview).is_some());
    }

    #[test]
    fn kinds_are_cached_independently_per_page() {
        let mut cache = ThumbnailCache::default();
        cache.insert(page("a.png"), ArtifactKind::Preview, &sample(10, 10));
        cache.insert(
            page("a.png"),
            ArtifactKind::StageDebug(StageIndex::Deskew),
            &sample(10, 10),
        );
        assert_eq!(cache.len(), 2);

        cache.remove_page(&page("a.png"));
        assert!(cache.is_empty());
    }

    #[test]
    fn zero_capacity_caches_nothing() {
        let mut cache = ThumbnailCache::with_capacity(0);
        cache.insert(page("a.png"), ArtifactKind::Preview, &sample(10, 10));
        assert!(cache.is_empty());
    }
}
