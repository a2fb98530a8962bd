//! Per-stage settings storage and source relinking.
//!
//! Every stage owns one [`SettingsStore`] mapping [`PageId`] to that
//! stage's parameters. Stores are independent of each other; a stage
//! never reads another stage's raw parameters, only the dependency
//! snapshot handed to it along the task chain.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::pages::PageId;

/// Keyed storage of one stage's per-page parameters.
///
/// Reads are lazy: [`get`](Self::get) returns the default parameters
/// for pages that have never been written, without inserting anything,
/// so repeated reads before the first write are deterministic and
/// idempotent. Entries are only removed explicitly, when a page
/// leaves the catalog.
#[derive(Debug, Clone, PartialEq)]
pub struct SettingsStore<P> {
    entries: BTreeMap<PageId, P>,
}

impl<P> Default for SettingsStore<P> {
    fn default() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }
}

impl<P: Clone + Default> SettingsStore<P> {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parameters for a page, or the stage defaults if none were
    /// recorded yet. Never inserts.
    #[must_use]
    pub fn get(&self, page: &PageId) -> P {
        self.entries.get(page).cloned().unwrap_or_default()
    }

    /// Recorded parameters for a page, if any.
    #[must_use]
    pub fn get_recorded(&self, page: &PageId) -> Option<&P> {
        self.entries.get(page)
    }

    /// Overwrite the parameters for a page.
    pub fn set(&mut self, page: PageId, params: P) {
        self.entries.insert(page, params);
    }

    /// Mutate the parameters for a page in place, materializing the
    /// defaults first if the page has no recorded entry.
    pub fn update(&mut self, page: &PageId, f: impl FnOnce(&mut P)) {
        f(self.entries.entry(page.clone()).or_default());
    }

    /// Remove a page's entry. Called only when the page is removed
    /// from the catalog.
    pub fn remove(&mut self, page: &PageId) -> Option<P> {
        self.entries.remove(page)
    }

    /// Number of recorded entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no entries were recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate recorded entries in page order.
    pub fn iter(&self) -> impl Iterator<Item = (&PageId, &P)> {
        self.entries.iter()
    }

    /// Rekey every entry whose source path the relinker rewrites.
    ///
    /// Parameters are preserved byte-for-byte; only the key's path
    /// component changes, so settings stay retrievable under the
    /// page's post-relink identity.
    pub fn perform_relinking(&mut self, relinker: &Relinker) {
        let entries = std::mem::take(&mut self.entries);
        self.entries = entries
            .into_iter()
            .map(|(page, params)| match relinker.relink_page(&page) {
                Some(new_page) => (new_page, params),
                None => (page, params),
            })
            .collect();
    }
}

/// A set of source path rewrites, applied uniformly to the catalog
/// and every settings store before any task execution starts.
#[derive(Debug, Clone, Default)]
pub struct Relinker {
    rules: Vec<(PathBuf, PathBuf)>,
}

impl Relinker {
    /// Create an empty relinker (rewrites nothing).
    #[must_use]
    pub const fn new() -> Self {
        Self { rules: Vec::new() }
    }

    /// Add an exact path rewrite rule. Earlier rules win.
    pub fn add_rule(&mut self, from: impl Into<PathBuf>, to: impl Into<PathBuf>) {
        self.rules.push((from.into(), to.into()));
    }

    /// Whether any rules are present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Rewritten path for `path`, or `None` if no rule matches.
    #[must_use]
    pub fn rewrite(&self, path: &Path) -> Option<PathBuf> {
        self.rules
            .iter()
            .find(|(from, _)| from == path)
            .map(|(_, to)| to.clone())
    }

    /// Rewritten page identity, or `None` if no rule matches the
    /// page's source path.
    #[must_use]
    pub fn relink_page(&self, page: &PageId) -> Option<PageId> {
        self.rewrite(page.image().path()).map(|new_path| {
            PageId::new(page.image().relinked_to(new_path), page.sub_page())
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::pages::{ImageId, SubPage};

    #[derive(Debug, Clone, PartialEq, Default)]
    struct Params {
        value: i32,
    }

    fn page(path: &str) -> PageId {
        PageId::new(ImageId::new(path), SubPage::Whole)
    }

    #[test]
    fn get_before_write_returns_defaults_without_inserting() {
        let store: SettingsStore<Params> = SettingsStore::new();
        let p = page("a.png");
        assert_eq!(store.get(&p), Params::default());
        assert_eq!(store.get(&p), Params::default());
        assert!(store.is_empty());
        assert!(store.get_recorded(&p).is_none());
    }

    #[test]
    fn set_overwrites_in_place() {
        let mut store = SettingsStore::new();
        let p = page("a.png");
        store.set(p.clone(), Params { value: 1 });
        store.set(p.clone(), Params { value: 2 });
        assert_eq!(store.get(&p), Params { value: 2 });
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn update_materializes_defaults_first() {
        let mut store: SettingsStore<Params> = SettingsStore::new();
        let p = page("a.png");
        store.update(&p, |params| params.value += 5);
        assert_eq!(store.get(&p), Params { value: 5 });
        assert!(store.get_recorded(&p).is_some());
    }

    #[test]
    fn remove_drops_the_entry() {
        let mut store = SettingsStore::new();
        let p = page("a.png");
        store.set(p.clone(), Params { value: 9 });
        assert_eq!(store.remove(&p), Some(Params { value: 9 }));
        assert_eq!(store.get(&p), Params::default());
    }

    #[test]
    fn entries_are_independent_per_page() {
        let mut store = SettingsStore::new();
        store.set(page("a.png"), Params { value: 1 });
        store.set(page("b.png"), Params { value: 2 });
        assert_eq!(store.get(&page("a.png")), Params { value: 1 });
        assert_eq!(store.get(&page("b.png")), Params { value: 2 });
    }

    #[test]
    fn relinking_rekeys_matching_entries_only() {
        let mut store = SettingsStore::new();
        store.set(page("old/a.png"), Params { value: 1 });
        store.set(page("keep/b.png"), Params { value: 2 });

        let mut relinker = Relinker::new();
        relinker.add_rule("old/a.png", "new/a.png");
        store.perform_relinking(&relinker);

        assert_eq!(store.len(), 2);
        assert_eq!(store.get(&page("new/a.png")), Params { value: 1 });
        assert!(store.get_recorded(&page("old/a.png")).is_none());
        assert_eq!(store.get(&page("keep/b.png")), Params { value: 2 });
    }

    #[test]
    fn relinking_preserves_sub_page_selector() {
        let mut store = SettingsStore::new();
        let left = PageId::new(ImageId::new("old/spread.png"), SubPage::Left);
        store.set(left, Params { value: 7 });

        let mut relinker = Relinker::new();
        relinker.add_rule("old/spread.png", "new/spread.png");
        store.perform_relinking(&relinker);

        let relinked = PageId::new(ImageId::new("new/spread.png"), SubPage::Left);
        assert_eq!(store.get(&relinked), Params { value: 7 });
    }

    #[test]
    fn relinker_first_matching_rule_wins() {
        let mut relinker = Relinker::new();
        relinker.add_rule("a.png", "first.png");
        relinker.add_rule("a.png", "second.png");
        assert_eq!(
            relinker.rewrite(Path::new("a.png")),
            Some(PathBuf::from("first.png")),
        );
    }

    #[test]
    fn relinker_without_match_returns_none() {
        let relinker = Relinker::new();
        assert!(relinker.rewrite(Path::new("a.png")).is_none());
        assert!(relinker.relink_page(&page("a.png")).is_none());
    }
}
