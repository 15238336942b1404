use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::rc::{Rc, Weak};

use super::{no_such_package, upgrade, InstalledInterface, MaskInterface, Repository};
use crate::config::RepositoryKeys;
use crate::error::{Error, Result};
use crate::metadata::VersionMetadata;
use crate::name::{CategoryName, QualifiedPackageName};
use crate::provides::{EntrySource, ProvidesIndex, RankedEntry};
use crate::registry::{FactoryContext, RepositoryRegistry};
use crate::version::VersionSpec;

/// Repository name for the installed virtuals of `root`.
///
/// ```
/// use std::path::Path;
/// use portage_repository::repository::installed_virtuals_name;
///
/// assert_eq!(installed_virtuals_name(Path::new("/")), "installed_virtuals");
/// assert_eq!(
///     installed_virtuals_name(Path::new("/mnt/gentoo")),
///     "installed_virtuals--mnt-gentoo"
/// );
/// ```
pub fn installed_virtuals_name(root: &Path) -> String {
    if root == Path::new("/") {
        return "installed_virtuals".to_string();
    }
    format!("installed_virtuals-{}", root.display())
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '-'
            }
        })
        .collect()
}

/// Every virtual provided by an installed package, across all
/// provides-capable repositories in the registry.
#[derive(Debug)]
pub struct InstalledVirtualsRepository {
    name: String,
    root: PathBuf,
    registry: Weak<RepositoryRegistry>,
    index: ProvidesIndex,
}

impl InstalledVirtualsRepository {
    /// Build from configuration keys. `root` is required.
    pub fn from_keys(ctx: &FactoryContext, keys: &RepositoryKeys) -> Result<Self> {
        let root = keys.path("root").ok_or_else(|| {
            Error::Configuration("no root specified for installed_virtuals repository".to_string())
        })?;
        Ok(Self::new(ctx.registry.clone(), root))
    }

    /// Installed virtuals of `root`, drawn from `registry`.
    pub fn new(registry: Weak<RepositoryRegistry>, root: PathBuf) -> Self {
        InstalledVirtualsRepository {
            name: installed_virtuals_name(&root),
            root,
            index: ProvidesIndex::new(provided_entries(registry.clone())),
            registry,
        }
    }

    /// The provider index.
    pub fn provides_index(&self) -> &ProvidesIndex {
        &self.index
    }
}

fn provided_entries(registry: Weak<RepositoryRegistry>) -> EntrySource {
    Box::new(move || {
        let mut entries: Vec<RankedEntry> = Vec::new();
        for (importance, repository) in upgrade(&registry)?.repositories() {
            let Some(provides) = repository.provides_interface() else {
                continue;
            };
            entries.extend(
                provides
                    .provided_packages()?
                    .iter()
                    .map(|entry| (importance, entry.clone())),
            );
        }
        Ok(entries)
    })
}

impl Repository for InstalledVirtualsRepository {
    fn name(&self) -> &str {
        &self.name
    }

    fn format(&self) -> &str {
        "installed_virtuals"
    }

    fn has_category_named(&self, category: &CategoryName) -> Result<bool> {
        self.index.has_category_named(category)
    }

    fn category_names(&self) -> Result<BTreeSet<CategoryName>> {
        let virt = CategoryName::new(crate::provides::VIRTUAL_CATEGORY)?;
        Ok(if self.index.has_category_named(&virt)? {
            BTreeSet::from([virt])
        } else {
            BTreeSet::new()
        })
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
        let entry = self
            .index
            .best(name, version)?
            .ok_or_else(|| no_such_package(name, version, &self.name))?;
        let provider = upgrade(&self.registry)?
            .fetch(&entry.provided_by_repository)
            .ok_or_else(|| {
                Error::Configuration(format!(
                    "provider repository '{}' is gone",
                    entry.provided_by_repository
                ))
            })?;
        let provides = provider.provides_interface().ok_or_else(|| {
            Error::Configuration(format!(
                "repository '{}' no longer provides virtuals",
                entry.provided_by_repository
            ))
        })?;
        provides.provided_package_version_metadata(&entry)
    }

    fn invalidate(&self) {
        self.index.invalidate();
    }

    fn mask_interface(&self) -> Option<&dyn MaskInterface> {
        Some(self)
    }

    fn installed_interface(&self) -> Option<&dyn InstalledInterface> {
        Some(self)
    }
}

impl MaskInterface for InstalledVirtualsRepository {
    fn query_repository_masks(&self, _: &QualifiedPackageName, _: &VersionSpec) -> Result<bool> {
        Ok(false)
    }

    fn query_profile_masks(&self, _: &QualifiedPackageName, _: &VersionSpec) -> Result<bool> {
        Ok(false)
    }
}

impl InstalledInterface for InstalledVirtualsRepository {
    fn root(&self) -> &Path {
        &self.root
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::RepositoryFactory;
    use crate::test_util::TreeBuilder;

    fn q(s: &str) -> QualifiedPackageName {
        s.parse().unwrap()
    }

    fn v(s: &str) -> VersionSpec {
        VersionSpec::parse(s).unwrap()
    }

    fn setup(dir: &TreeBuilder) -> (Rc<RepositoryRegistry>, Rc<dyn Repository>) {
        let registry = RepositoryRegistry::new();
        let ctx = FactoryContext::new(&registry);
        let factory = RepositoryFactory::default();
        let vdb = RepositoryKeys::new()
            .with("format", "vdb")
            .with("location", dir.join("vdb").to_string_lossy())
            .with("names_cache", "/var/empty")
            .with("provides_cache", dir.join("provides").to_string_lossy());
        factory.add_to_registry(&ctx, &vdb).unwrap();
        let virtuals = RepositoryKeys::new()
            .with("format", "installed_virtuals")
            .with("root", "/");
        let repo = factory.add_to_registry(&ctx, &virtuals).unwrap();
        (registry, repo)
    }

    #[test]
    fn requires_root() {
        let err = InstalledVirtualsRepository::from_keys(
            &FactoryContext::default(),
            &RepositoryKeys::new().with("root", ""),
        )
        .unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn providers_are_counted_per_pair() {
        let dir = TreeBuilder::new();
        dir.installed("vdb/cat1/pkg1-1", "virtual/foo virtual/bar")
            .installed("vdb/cat1/pkg2-1", "virtual/foo");
        let (registry, repo) = setup(&dir);
        assert_eq!(repo.name(), "installed_virtuals");

        registry.fetch("installed").unwrap().regenerate_cache().unwrap();
        repo.invalidate();

        let virtuals = registry.fetch("installed_virtuals").unwrap();
        assert!(virtuals.has_version(&q("virtual/foo"), &v("1")).unwrap());
        assert!(!virtuals.has_version(&q("virtual/foo"), &v("2")).unwrap());
        assert_eq!(virtuals.package_names(&CategoryName::new("virtual").unwrap()).unwrap().len(), 2);
        assert_eq!(virtuals.category_names().unwrap().len(), 1);
        assert!(!virtuals.has_package_named(&q("cat1/pkg1")).unwrap());
        assert!(!virtuals
            .mask_interface()
            .unwrap()
            .query_repository_masks(&q("virtual/foo"), &v("1"))
            .unwrap());

        let md = virtuals.version_metadata(&q("virtual/foo"), &v("1")).unwrap();
        assert_eq!(md.virtual_for, Some(q("cat1/pkg2")));
        assert!(matches!(
            virtuals.version_metadata(&q("virtual/baz"), &v("1")),
            Err(Error::NoSuchPackage { .. })
        ));
    }

    #[test]
    fn index_counts_pairs() {
        let dir = TreeBuilder::new();
        dir.installed("vdb/cat1/pkg1-1", "virtual/foo virtual/bar")
            .installed("vdb/cat1/pkg2-1", "virtual/foo");
        let registry = RepositoryRegistry::new();
        let ctx = FactoryContext::new(&registry);
        RepositoryFactory::default()
            .add_to_registry(
                &ctx,
                &RepositoryKeys::new()
                    .with("format", "vdb")
                    .with("location", dir.join("vdb").to_string_lossy())
                    .with("names_cache", "/var/empty")
                    .with("provides_cache", "/var/empty"),
            )
            .unwrap();
        let repo = InstalledVirtualsRepository::new(Rc::downgrade(&registry), PathBuf::from("/"));
        assert_eq!(repo.provides_index().len().unwrap(), 3);

        dir.installed("vdb/cat1/pkg3-1", "virtual/bar");
        registry.invalidate_all();
        repo.invalidate();
        assert_eq!(repo.provides_index().len().unwrap(), 4);
    }
}
