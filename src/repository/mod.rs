//! The repository abstraction and the built-in repository formats.
//!
//! Every repository answers the same index queries. Optional capabilities
//! are exposed as interface objects, so callers ask a repository what it
//! can do instead of matching on its concrete type:
//!
//! | format               | type                             | interfaces           |
//! |----------------------|----------------------------------|----------------------|
//! | `ebuild`             | [`EbuildRepository`]             | mask, virtuals, sync |
//! | `vdb`                | [`InstalledRepository`]          | installed, provides  |
//! | `installed_virtuals` | [`InstalledVirtualsRepository`]  | mask, installed      |
//! | `virtuals`           | [`VirtualsRepository`]           |                      |

mod ebuild;
mod installed;
mod installed_virtuals;
mod virtuals;

use std::collections::BTreeSet;
use std::fmt;
use std::path::Path;
use std::rc::{Rc, Weak};

use portage_atom::Dep;
use tracing::debug;

use crate::error::{Error, Result};
use crate::index::RepositoryIndex;
use crate::metadata::VersionMetadata;
use crate::name::{CategoryName, PackageNamePart, QualifiedPackageName};
use crate::name_cache::NameCache;
use crate::provides::VirtualEntry;
use crate::registry::RepositoryRegistry;
use crate::version::VersionSpec;

pub use ebuild::EbuildRepository;
pub use installed::{InstalledRepository, PROVIDES_CACHE_FORMAT};
pub use installed_virtuals::{installed_virtuals_name, InstalledVirtualsRepository};
pub use virtuals::VirtualsRepository;

/// Which optional interfaces a repository implements.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities {
    /// Repository and profile masks.
    pub mask: bool,
    /// Installed-package tracking.
    pub installed: bool,
    /// Declares profile virtuals.
    pub virtuals: bool,
    /// Lists virtuals its packages provide.
    pub provides: bool,
    /// Can be synced from a remote.
    pub sync: bool,
}

/// A named source of packages.
pub trait Repository: fmt::Debug {
    /// Repository name.
    fn name(&self) -> &str;

    /// Format name, as used by the factory.
    fn format(&self) -> &str;

    /// On-disk root, if the repository has one.
    fn location(&self) -> Option<&Path> {
        None
    }

    /// Whether `category` exists.
    fn has_category_named(&self, category: &CategoryName) -> Result<bool>;

    /// All categories.
    fn category_names(&self) -> Result<BTreeSet<CategoryName>>;

    /// All packages in `category`.
    fn package_names(&self, category: &CategoryName) -> Result<BTreeSet<QualifiedPackageName>>;

    /// Whether `name` exists.
    fn has_package_named(&self, name: &QualifiedPackageName) -> Result<bool>;

    /// All versions of `name`.
    fn version_specs(&self, name: &QualifiedPackageName) -> Result<BTreeSet<VersionSpec>>;

    /// Whether `name-version` exists.
    fn has_version(&self, name: &QualifiedPackageName, version: &VersionSpec) -> Result<bool>;

    /// Metadata for `name-version`. Fails with [`Error::NoSuchPackage`] if
    /// it does not exist.
    fn version_metadata(
        &self,
        name: &QualifiedPackageName,
        version: &VersionSpec,
    ) -> Result<Rc<VersionMetadata>>;

    /// Categories holding a package called `package`.
    fn category_names_containing_package(
        &self,
        package: &PackageNamePart,
    ) -> Result<BTreeSet<CategoryName>> {
        let mut result = BTreeSet::new();
        for category in self.category_names()? {
            let name = QualifiedPackageName::new(category.clone(), package.clone());
            if self.has_package_named(&name)? {
                result.insert(category);
            }
        }
        Ok(result)
    }

    /// Rebuild any on-disk caches from the current tree.
    fn regenerate_cache(&self) -> Result<()> {
        Ok(())
    }

    /// Drop all lazily built state.
    fn invalidate(&self);

    /// Masking, if supported.
    fn mask_interface(&self) -> Option<&dyn MaskInterface> {
        None
    }

    /// Installed-package tracking, if supported.
    fn installed_interface(&self) -> Option<&dyn InstalledInterface> {
        None
    }

    /// Profile virtuals, if supported.
    fn virtuals_interface(&self) -> Option<&dyn VirtualsInterface> {
        None
    }

    /// Provided virtuals, if supported.
    fn provides_interface(&self) -> Option<&dyn ProvidesInterface> {
        None
    }

    /// Syncing, if supported.
    fn sync_interface(&self) -> Option<&dyn SyncInterface> {
        None
    }

    /// Summary of the optional interfaces.
    fn capabilities(&self) -> Capabilities {
        Capabilities {
            mask: self.mask_interface().is_some(),
            installed: self.installed_interface().is_some(),
            virtuals: self.virtuals_interface().is_some(),
            provides: self.provides_interface().is_some(),
            sync: self.sync_interface().is_some(),
        }
    }
}

/// Repository and profile masking.
pub trait MaskInterface {
    /// Whether a repository-wide `package.mask` masks `name-version`.
    fn query_repository_masks(
        &self,
        name: &QualifiedPackageName,
        version: &VersionSpec,
    ) -> Result<bool>;

    /// Whether the selected profile masks `name-version`.
    fn query_profile_masks(&self, name: &QualifiedPackageName, version: &VersionSpec)
        -> Result<bool>;
}

/// A database of installed packages.
pub trait InstalledInterface {
    /// Filesystem root the packages are installed into.
    fn root(&self) -> &Path;
}

/// Virtual packages declared by a repository's profile.
pub trait VirtualsInterface {
    /// Virtual name → default provider dep-spec.
    fn virtual_packages(&self) -> Result<Vec<(QualifiedPackageName, Dep)>>;

    /// Metadata for a virtual provided by a package in this repository.
    fn virtual_package_version_metadata(&self, entry: &VirtualEntry) -> Result<Rc<VersionMetadata>>;
}

/// Virtuals provided by packages in a repository (`PROVIDE`).
pub trait ProvidesInterface {
    /// Every (virtual, version, provider) this repository provides.
    fn provided_packages(&self) -> Result<Rc<Vec<VirtualEntry>>>;

    /// Metadata for a virtual provided by a package in this repository.
    fn provided_package_version_metadata(&self, entry: &VirtualEntry)
        -> Result<Rc<VersionMetadata>>;
}

/// Syncing from remote targets.
pub trait SyncInterface {
    /// Sync from the configured targets. `Ok(false)` means there was
    /// nothing to sync from.
    fn sync(&self) -> Result<bool>;
}

/// Names cache lookup with the full scan as fallback.
fn cached_category_names_containing_package(
    names_cache: &NameCache,
    index: &RepositoryIndex,
    package: &PackageNamePart,
) -> Result<BTreeSet<CategoryName>> {
    match names_cache.category_names_containing_package(package) {
        Some(categories) => Ok(categories),
        None => {
            debug!("names cache unavailable, scanning for '{package}'");
            index.category_names_containing_package(package)
        }
    }
}

/// The metadata record for `entry`, built from its provider's metadata.
fn virtual_metadata(
    index: &RepositoryIndex,
    entry: &VirtualEntry,
) -> Result<Rc<VersionMetadata>> {
    let provider = index.version_metadata(&entry.provided_by, &entry.version)?;
    VersionMetadata::for_virtual(&entry.virtual_name, &entry.provided_by, &entry.version, &provider)
        .map(Rc::new)
}

fn upgrade(registry: &Weak<RepositoryRegistry>) -> Result<Rc<RepositoryRegistry>> {
    registry
        .upgrade()
        .ok_or_else(|| Error::Configuration("repository registry is no longer available".to_string()))
}

fn no_such_package(
    name: &QualifiedPackageName,
    version: &VersionSpec,
    repository: &str,
) -> Error {
    Error::NoSuchPackage {
        name: name.to_string(),
        version: version.to_string(),
        repository: repository.to_string(),
    }
}
