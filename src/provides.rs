//! Sorted index of virtual → provider relationships across repositories.

use std::cell::RefCell;
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;
use std::rc::Rc;

use tracing::debug;

use crate::error::Result;
use crate::name::{CategoryName, QualifiedPackageName};
use crate::version::VersionSpec;

/// The only category a virtuals index answers for.
pub const VIRTUAL_CATEGORY: &str = "virtual";

/// One provider of one virtual version.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VirtualEntry {
    /// The virtual, e.g. `virtual/editor`.
    pub virtual_name: QualifiedPackageName,
    /// The version the virtual is provided at.
    pub version: VersionSpec,
    /// The concrete package providing it.
    pub provided_by: QualifiedPackageName,
    /// Repository holding `provided_by`.
    pub provided_by_repository: String,
}

/// A [`VirtualEntry`] together with its repository's importance, as
/// produced by an [`EntrySource`].
pub type RankedEntry = (i32, VirtualEntry);

/// Collects every entry when the index is (re)built.
pub type EntrySource = Box<dyn Fn() -> Result<Vec<RankedEntry>>>;

/// Order by virtual name, then version, then best provider first: the more
/// important repository, then the greater provider name.
fn rank(a: &RankedEntry, b: &RankedEntry) -> Ordering {
    a.1.virtual_name
        .cmp(&b.1.virtual_name)
        .then_with(|| a.1.version.cmp(&b.1.version))
        .then_with(|| b.0.cmp(&a.0))
        .then_with(|| b.1.provided_by.cmp(&a.1.provided_by))
}

/// Sorted vector of [`VirtualEntry`], queried by range search.
///
/// Built from its [`EntrySource`] on first access and kept until
/// [`invalidate`](ProvidesIndex::invalidate). Rebuilding wholesale is
/// cheaper than maintaining it incrementally.
pub struct ProvidesIndex {
    source: EntrySource,
    entries: RefCell<Option<Rc<Vec<VirtualEntry>>>>,
}

impl fmt::Debug for ProvidesIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProvidesIndex")
            .field("entries", &self.entries)
            .finish_non_exhaustive()
    }
}

fn is_virtual(category: &CategoryName) -> bool {
    category.as_str() == VIRTUAL_CATEGORY
}

impl ProvidesIndex {
    /// An unbuilt index over `source`.
    pub fn new(source: EntrySource) -> Self {
        ProvidesIndex {
            source,
            entries: RefCell::new(None),
        }
    }

    fn need_entries(&self) -> Result<Rc<Vec<VirtualEntry>>> {
        if let Some(entries) = self.entries.borrow().as_ref() {
            return Ok(Rc::clone(entries));
        }
        let mut ranked = (self.source)()?;
        ranked.sort_by(rank);
        let entries: Rc<Vec<VirtualEntry>> =
            Rc::new(ranked.into_iter().map(|(_, entry)| entry).collect());
        debug!("built virtuals index with {} entries", entries.len());
        *self.entries.borrow_mut() = Some(Rc::clone(&entries));
        Ok(entries)
    }

    /// Entries for `name`, all versions, best provider first per version.
    pub fn entries_named(&self, name: &QualifiedPackageName) -> Result<Vec<VirtualEntry>> {
        if !is_virtual(&name.category) {
            return Ok(Vec::new());
        }
        let entries = self.need_entries()?;
        Ok(name_range(&entries, name).to_vec())
    }

    /// Entries for `name-version`, best provider first.
    pub fn entries_for(
        &self,
        name: &QualifiedPackageName,
        version: &VersionSpec,
    ) -> Result<Vec<VirtualEntry>> {
        if !is_virtual(&name.category) {
            return Ok(Vec::new());
        }
        let entries = self.need_entries()?;
        Ok(version_range(&entries, name, version).to_vec())
    }

    /// The best provider of `name-version`, if any.
    pub fn best(
        &self,
        name: &QualifiedPackageName,
        version: &VersionSpec,
    ) -> Result<Option<VirtualEntry>> {
        if !is_virtual(&name.category) {
            return Ok(None);
        }
        let entries = self.need_entries()?;
        Ok(version_range(&entries, name, version).first().cloned())
    }

    /// Whether any virtual in `category` has a provider.
    pub fn has_category_named(&self, category: &CategoryName) -> Result<bool> {
        if !is_virtual(category) {
            return Ok(false);
        }
        let entries = self.need_entries()?;
        Ok(!category_range(&entries, category).is_empty())
    }

    /// Distinct virtual names in `category`.
    pub fn package_names(&self, category: &CategoryName) -> Result<BTreeSet<QualifiedPackageName>> {
        if !is_virtual(category) {
            return Ok(BTreeSet::new());
        }
        let entries = self.need_entries()?;
        Ok(category_range(&entries, category)
            .iter()
            .map(|e| e.virtual_name.clone())
            .collect())
    }

    /// Whether `name` has any provider.
    pub fn has_package_named(&self, name: &QualifiedPackageName) -> Result<bool> {
        if !is_virtual(&name.category) {
            return Ok(false);
        }
        let entries = self.need_entries()?;
        Ok(!name_range(&entries, name).is_empty())
    }

    /// Versions `name` is provided at.
    pub fn version_specs(&self, name: &QualifiedPackageName) -> Result<BTreeSet<VersionSpec>> {
        if !is_virtual(&name.category) {
            return Ok(BTreeSet::new());
        }
        let entries = self.need_entries()?;
        Ok(name_range(&entries, name)
            .iter()
            .map(|e| e.version.clone())
            .collect())
    }

    /// Whether `name-version` has a provider.
    pub fn has_version(&self, name: &QualifiedPackageName, version: &VersionSpec) -> Result<bool> {
        Ok(self.best(name, version)?.is_some())
    }

    /// Number of (virtual, provider) entries.
    pub fn len(&self) -> Result<usize> {
        Ok(self.need_entries()?.len())
    }

    /// Whether the index has no entries at all.
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Drop the built index; the next query rebuilds it from the source.
    pub fn invalidate(&self) {
        *self.entries.borrow_mut() = None;
    }
}

fn category_range<'a>(entries: &'a [VirtualEntry], category: &CategoryName) -> &'a [VirtualEntry] {
    let lo = entries.partition_point(|e| e.virtual_name.category < *category);
    let hi = entries.partition_point(|e| e.virtual_name.category <= *category);
    &entries[lo..hi]
}

fn name_range<'a>(entries: &'a [VirtualEntry], name: &QualifiedPackageName) -> &'a [VirtualEntry] {
    let lo = entries.partition_point(|e| e.virtual_name < *name);
    let hi = entries.partition_point(|e| e.virtual_name <= *name);
    &entries[lo..hi]
}

fn version_range<'a>(
    entries: &'a [VirtualEntry],
    name: &QualifiedPackageName,
    version: &VersionSpec,
) -> &'a [VirtualEntry] {
    let named = name_range(entries, name);
    let lo = named.partition_point(|e| e.version < *version);
    let hi = named.partition_point(|e| e.version <= *version);
    &named[lo..hi]
}
