//! Repository metadata layer for Gentoo-style package trees, based on [PMS].
//!
//! This crate answers "which categories, packages and versions exist",
//! "what metadata and masks apply to a version" and "which package provides
//! a virtual" for ebuild trees and installed-package databases.
//!
//! [PMS]: https://projects.gentoo.org/pms/latest/pms.html
//!
//! # Overview
//!
//! Every [`Repository`] is backed by a lazily filled [`RepositoryIndex`]:
//! categories, packages and versions are scanned from disk at most once,
//! and metadata is generated on first request, until the repository is
//! invalidated. Source trees add a [`ProfileChain`] for masks, arch flags,
//! mirrors and profile virtuals. A [`NameCache`] on disk speeds up the
//! "which categories contain this package" query, and a [`ProvidesIndex`]
//! merges provided virtuals across all repositories in a
//! [`RepositoryRegistry`].
//!
//! Repositories are built from string key/value configuration through a
//! [`RepositoryFactory`]. Nothing here is thread-safe; a registry and its
//! repositories belong to one thread.
//!
//! # Examples
//!
//! ```
//! use std::fs;
//! use portage_repository::{
//!     FactoryContext, QualifiedPackageName, Repository, RepositoryFactory, RepositoryKeys,
//!     RepositoryRegistry, VersionSpec,
//! };
//!
//! let dir = tempfile::tempdir()?;
//! let root = dir.path();
//! fs::create_dir_all(root.join("profiles"))?;
//! fs::write(root.join("profiles/repo_name"), "example\n")?;
//! fs::create_dir_all(root.join("dev-lang/rust"))?;
//! fs::write(root.join("dev-lang/rust/rust-1.75.0.ebuild"), "")?;
//! fs::create_dir_all(root.join("metadata/md5-cache/dev-lang"))?;
//! fs::write(
//!     root.join("metadata/md5-cache/dev-lang/rust-1.75.0"),
//!     "EAPI=8\nDESCRIPTION=Rust\nSLOT=stable/1.75\n",
//! )?;
//!
//! let registry = RepositoryRegistry::new();
//! let ctx = FactoryContext::new(&registry);
//! let keys = RepositoryKeys::new()
//!     .with("location", root.to_string_lossy())
//!     .with("names_cache", "/var/empty");
//! let repo = RepositoryFactory::default().add_to_registry(&ctx, &keys)?;
//! assert_eq!(repo.name(), "example");
//!
//! let rust: QualifiedPackageName = "dev-lang/rust".parse()?;
//! let version = VersionSpec::parse("1.75.0")?;
//! assert!(repo.has_version(&rust, &version)?);
//! assert_eq!(repo.version_metadata(&rust, &version)?.slot.slot, "stable");
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod config;
mod eapi;
mod error;
mod generator;
mod index;
mod keyword;
pub mod matching;
mod metadata;
mod name;
mod name_cache;
mod profile;
mod provides;
mod registry;
pub mod repository;
mod sync;
mod version;

#[cfg(test)]
mod test_util;

// Re-export public types
pub use config::RepositoryKeys;
pub use eapi::{Eapi, EapiConfig, EapiRegistry, DEFAULT_EAPIS_DIR, EAPIS_DIR_VAR};
pub use error::{Error, Result};
pub use generator::{make_generator, Md5CacheGenerator, MetadataGenerator, VdbGenerator};
pub use index::{Layout, RepositoryIndex};
pub use keyword::{Keyword, Stability};
pub use metadata::VersionMetadata;
pub use name::{CategoryName, PackageNamePart, QualifiedPackageName, RepositoryName, UseFlagName};
pub use name_cache::{NameCache, NAMES_CACHE_FORMAT};
pub use profile::{Profile, ProfileChain, ProfileDescriptor, MIRROR_LIMIT};
pub use provides::{EntrySource, ProvidesIndex, RankedEntry, VirtualEntry, VIRTUAL_CATEGORY};
pub use registry::{
    Constructor, FactoryContext, MissingFormat, RepositoryFactory, RepositoryRegistry,
};
pub use repository::{
    Capabilities, EbuildRepository, InstalledInterface, InstalledRepository,
    InstalledVirtualsRepository, MaskInterface, ProvidesInterface, Repository, SyncInterface,
    VirtualsInterface, VirtualsRepository,
};
pub use sync::{sync_targets, Syncer};
pub use version::VersionSpec;
