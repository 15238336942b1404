use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::rc::{Rc, Weak};

use indexmap::IndexSet;
use portage_atom::Dep;
use tracing::{debug, warn};

use super::{
    cached_category_names_containing_package, upgrade, virtual_metadata, MaskInterface,
    Repository, SyncInterface, VirtualsInterface,
};
use crate::config::{read_line_file, RepositoryKeys};
use crate::error::{Error, Result};
use crate::generator::make_generator;
use crate::index::{Layout, RepositoryIndex};
use crate::metadata::VersionMetadata;
use crate::name::{
    CategoryName, PackageNamePart, QualifiedPackageName, RepositoryName, UseFlagName,
};
use crate::name_cache::NameCache;
use crate::profile::{Profile, ProfileChain, ProfileDescriptor};
use crate::provides::VirtualEntry;
use crate::registry::{FactoryContext, RepositoryRegistry};
use crate::sync::{sync_targets, Syncer};
use crate::version::VersionSpec;

/// A source tree of ebuilds (`cat/pkg/pkg-ver.ebuild`) with profiles.
///
/// Configuration keys:
///
/// - `location` (required): tree root.
/// - `name`: defaults to `profiles/repo_name`, else `x-<basename>`.
/// - `master_repository`: name of an `ebuild` repository in the registry
///   whose profiles, categories and licenses this tree inherits.
/// - `profiles`: whitespace-separated profile directories forming the
///   default profile.
/// - `names_cache`: names cache base, `<location>/.cache/names` by default;
///   `/var/empty` disables it.
/// - `entry_format`: metadata generator, `ebuild` by default.
/// - `sync`, `sync_options`: sync targets and transport options.
#[derive(Debug)]
pub struct EbuildRepository {
    name: String,
    location: PathBuf,
    master_location: Option<PathBuf>,
    registry: Weak<RepositoryRegistry>,
    syncer: Option<Rc<dyn Syncer>>,
    sync: String,
    sync_options: String,
    index: RepositoryIndex,
    profiles: ProfileChain,
    names_cache: NameCache,
}

impl EbuildRepository {
    /// Build from configuration keys.
    pub fn from_keys(ctx: &FactoryContext, keys: &RepositoryKeys) -> Result<Self> {
        let location = PathBuf::from(keys.require("location")?);
        let name = match keys.get("name") {
            Some(name) => RepositoryName::new(name)?.to_string(),
            None => Self::fetch_repo_name(&location),
        };

        let master_location = match keys.get("master_repository") {
            Some(master) => Some(master_location(&ctx.registry, master)?),
            None => None,
        };

        let mut profiles_dirs = Vec::new();
        if let Some(master) = &master_location {
            profiles_dirs.push(master.join("profiles"));
        }
        if location.join("profiles").exists() {
            profiles_dirs.push(location.join("profiles"));
        }

        let configured: Vec<PathBuf> = keys
            .get("profiles")
            .map(|p| p.split_whitespace().map(PathBuf::from).collect())
            .unwrap_or_default();

        let names_cache_base = keys
            .path("names_cache")
            .unwrap_or_else(|| location.join(".cache").join("names"));

        let generator = make_generator(keys.get("entry_format").unwrap_or("ebuild"), ctx.eapis.clone())?;

        debug!("{name}: ebuild repository at {location:?}");
        Ok(EbuildRepository {
            index: RepositoryIndex::new(
                &name,
                &location,
                Layout::Tree,
                profiles_dirs.clone(),
                generator,
            ),
            profiles: ProfileChain::new(&name, profiles_dirs, configured),
            names_cache: NameCache::new(&names_cache_base, &name),
            name,
            location,
            master_location,
            registry: ctx.registry.clone(),
            syncer: ctx.syncer.clone(),
            sync: keys.get("sync").unwrap_or("").to_string(),
            sync_options: keys.get("sync_options").unwrap_or("").to_string(),
        })
    }

    /// The name declared in `<location>/profiles/repo_name`, or
    /// `x-<basename>` if there is none.
    pub fn fetch_repo_name(location: &Path) -> String {
        let path = location.join("profiles").join("repo_name");
        match read_line_file(&path) {
            Ok(Some(lines)) => match lines.first().map(|l| RepositoryName::new(l)) {
                Some(Ok(name)) => return name.to_string(),
                Some(Err(e)) => warn!("{e}: {path:?}"),
                None => {}
            },
            Ok(None) => {}
            Err(e) => warn!("{e}"),
        }

        let basename = location
            .file_name()
            .map(|b| b.to_string_lossy().replace('/', "-"))
            .unwrap_or_default();
        let fallback = format!("x-{basename}");
        warn!(
            "couldn't read a repo_name file in {:?}, falling back to generated name '{fallback}' \
             (ignore this if the repository has not been synced yet)",
            location.join("profiles")
        );
        fallback
    }

    /// The profile chain.
    pub fn profiles(&self) -> &ProfileChain {
        &self.profiles
    }

    /// The `profiles.desc` catalog.
    pub fn profiles_desc(&self) -> Result<Rc<Vec<ProfileDescriptor>>> {
        self.profiles.profiles_desc()
    }

    /// The active profile.
    pub fn profile(&self) -> Result<Rc<Profile>> {
        self.profiles.profile()
    }

    /// Select a profile. The registry's `virtuals` repository, if any, is
    /// invalidated since profile virtuals may have changed.
    pub fn set_profile(&self, descriptor: &ProfileDescriptor) -> Result<()> {
        self.profiles.set_profile(descriptor)?;
        self.invalidate_virtuals();
        Ok(())
    }

    /// Select the best profile for `arch`, preferring a stable one.
    pub fn set_profile_by_arch(&self, arch: &str) -> Result<ProfileDescriptor> {
        let descriptor = self.profiles.set_profile_by_arch(arch)?;
        self.invalidate_virtuals();
        Ok(descriptor)
    }

    fn invalidate_virtuals(&self) {
        if let Some(virtuals) = self.registry.upgrade().and_then(|r| r.fetch("virtuals")) {
            debug!("{}: profile changed, invalidating virtuals", self.name);
            virtuals.invalidate();
        }
    }

    /// Arch flags from `arch.list`.
    pub fn arch_flags(&self) -> Result<Rc<IndexSet<UseFlagName>>> {
        self.profiles.arch_flags()
    }

    /// Whether `flag` is masked for the active profile.
    pub fn use_mask(&self, flag: &UseFlagName) -> Result<bool> {
        self.profiles.use_mask(flag)
    }

    /// Whether `flag` is forced for the active profile.
    pub fn use_force(&self, flag: &UseFlagName) -> Result<bool> {
        self.profiles.use_force(flag)
    }

    /// Base URLs for a third-party mirror.
    pub fn mirrors(&self, mirror: &str) -> Result<Vec<String>> {
        self.profiles.mirrors(mirror)
    }

    /// USE_EXPAND flags set by the active profile.
    pub fn use_expand_flags(&self) -> Result<BTreeSet<UseFlagName>> {
        self.profiles.use_expand_flags()
    }

    /// Lowercased USE_EXPAND names.
    pub fn use_expand_prefixes(&self) -> Result<Vec<String>> {
        self.profiles.use_expand_prefixes()
    }

    /// Lowercased USE_EXPAND_HIDDEN names.
    pub fn use_expand_hidden_prefixes(&self) -> Result<Vec<String>> {
        self.profiles.use_expand_hidden_prefixes()
    }

    /// The USE_EXPAND variable `flag` belongs to.
    pub fn use_expand_name(&self, flag: &UseFlagName) -> Result<String> {
        self.profiles.use_expand_name(flag)
    }

    /// The value part of USE_EXPAND flag `flag`.
    pub fn use_expand_value(&self, flag: &UseFlagName) -> Result<String> {
        self.profiles.use_expand_value(flag)
    }

    /// A `make.defaults` variable of the active profile.
    pub fn profile_variable(&self, var: &str) -> Result<String> {
        self.profiles.profile_variable(var)
    }

    /// Path of the license file for `license`. The local tree's copy wins
    /// over the master's.
    pub fn license_exists(&self, license: &str) -> Option<PathBuf> {
        let local = self.location.join("licenses").join(license);
        if local.is_file() {
            return Some(local);
        }
        self.master_location
            .as_ref()
            .map(|m| m.join("licenses").join(license))
            .filter(|p| p.is_file())
    }

    fn slot_of(&self, name: &QualifiedPackageName, version: &VersionSpec) -> Option<portage_atom::Slot> {
        match self.index.version_metadata(name, version) {
            Ok(md) => Some(md.slot.clone()),
            Err(e) => {
                warn!("{}: no slot for {name}-{version}: {e}", self.name);
                None
            }
        }
    }
}

fn master_location(registry: &Weak<RepositoryRegistry>, master: &str) -> Result<PathBuf> {
    let repository = upgrade(registry)?.fetch(master).ok_or_else(|| {
        Error::Configuration(format!("master repository '{master}' does not exist"))
    })?;
    if repository.format() != "ebuild" {
        return Err(Error::Configuration(format!(
            "master repository '{master}' is not an ebuild repository"
        )));
    }
    repository
        .location()
        .map(Path::to_path_buf)
        .ok_or_else(|| Error::Configuration(format!("master repository '{master}' has no location")))
}

impl Repository for EbuildRepository {
    fn name(&self) -> &str {
        &self.name
    }

    fn format(&self) -> &str {
        "ebuild"
    }

    fn location(&self) -> Option<&Path> {
        Some(&self.location)
    }

    fn has_category_named(&self, category: &CategoryName) -> Result<bool> {
        self.index.has_category_named(category)
    }

    fn category_names(&self) -> Result<BTreeSet<CategoryName>> {
        self.index.category_names()
    }

    fn package_names(&self, category: &CategoryName) -> Result<BTreeSet<QualifiedPackageName>> {
        self.index.package_names(category)
    }

    fn has_package_named(&self, name: &QualifiedPackageName) -> Result<bool> {
        self.index.has_package_named(name)
    }

    fn version_specs(&self, name: &QualifiedPackageName) -> Result<BTreeSet<VersionSpec>> {
        self.index.version_specs(name)
    }

    fn has_version(&self, name: &QualifiedPackageName, version: &VersionSpec) -> Result<bool> {
        self.index.has_version(name, version)
    }

    fn version_metadata(
        &self,
        name: &QualifiedPackageName,
        version: &VersionSpec,
    ) -> Result<Rc<VersionMetadata>> {
        self.index.version_metadata(name, version)
    }

    fn category_names_containing_package(
        &self,
        package: &PackageNamePart,
    ) -> Result<BTreeSet<CategoryName>> {
        cached_category_names_containing_package(&self.names_cache, &self.index, package)
    }

    fn regenerate_cache(&self) -> Result<()> {
        let names = self.index.all_package_names()?;
        self.names_cache.regenerate(&names)
    }

    fn invalidate(&self) {
        self.index.invalidate();
        self.profiles.invalidate();
        self.names_cache.invalidate();
    }

    fn mask_interface(&self) -> Option<&dyn MaskInterface> {
        Some(self)
    }

    fn virtuals_interface(&self) -> Option<&dyn VirtualsInterface> {
        Some(self)
    }

    fn sync_interface(&self) -> Option<&dyn SyncInterface> {
        Some(self)
    }
}

impl MaskInterface for EbuildRepository {
    fn query_repository_masks(
        &self,
        name: &QualifiedPackageName,
        version: &VersionSpec,
    ) -> Result<bool> {
        self.profiles
            .repository_masked(name, version, || self.slot_of(name, version))
    }

    fn query_profile_masks(
        &self,
        name: &QualifiedPackageName,
        version: &VersionSpec,
    ) -> Result<bool> {
        self.profiles
            .profile_masked(name, version, || self.slot_of(name, version))
    }
}

impl VirtualsInterface for EbuildRepository {
    fn virtual_packages(&self) -> Result<Vec<(QualifiedPackageName, Dep)>> {
        let virtuals: BTreeMap<QualifiedPackageName, Dep> = self.profiles.virtuals()?;
        Ok(virtuals.into_iter().collect())
    }

    fn virtual_package_version_metadata(&self, entry: &VirtualEntry) -> Result<Rc<VersionMetadata>> {
        if entry.provided_by_repository != self.name {
            return Err(Error::Configuration(format!(
                "{} is provided by repository '{}', not '{}'",
                entry.virtual_name, entry.provided_by_repository, self.name
            )));
        }
        virtual_metadata(&self.index, entry)
    }
}

impl SyncInterface for EbuildRepository {
    fn sync(&self) -> Result<bool> {
        if self.sync.trim().is_empty() {
            return Ok(false);
        }
        let syncer = self.syncer.as_deref().ok_or_else(|| {
            Error::Configuration(format!("no syncer available for repository '{}'", self.name))
        })?;
        sync_targets(syncer, &self.location, &self.sync, &self.sync_options)
    }
}
