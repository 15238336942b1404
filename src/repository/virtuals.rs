use std::collections::BTreeSet;
use std::rc::{Rc, Weak};

use tracing::warn;

use super::{no_such_package, upgrade, Repository};
use crate::config::RepositoryKeys;
use crate::error::{Error, Result};
use crate::matching::{dep_package, match_package};
use crate::metadata::VersionMetadata;
use crate::name::{CategoryName, QualifiedPackageName};
use crate::provides::{EntrySource, ProvidesIndex, RankedEntry, VirtualEntry, VIRTUAL_CATEGORY};
use crate::registry::{FactoryContext, RepositoryRegistry};
use crate::version::VersionSpec;

/// Profile-declared virtuals (`virtual/editor` → `app-editors/nano`),
/// expanded over every available version of each default provider.
///
/// Providers come from the registry's non-installed repositories; the more
/// important repository's provider wins.
#[derive(Debug)]
pub struct VirtualsRepository {
    registry: Weak<RepositoryRegistry>,
    index: ProvidesIndex,
}

impl VirtualsRepository {
    /// Build from configuration keys. None are used.
    pub fn from_keys(ctx: &FactoryContext, _keys: &RepositoryKeys) -> Result<Self> {
        Ok(Self::new(ctx.registry.clone()))
    }

    /// Virtuals drawn from `registry`.
    pub fn new(registry: Weak<RepositoryRegistry>) -> Self {
        VirtualsRepository {
            index: ProvidesIndex::new(declared_entries(registry.clone())),
            registry,
        }
    }

    /// The provider index.
    pub fn provides_index(&self) -> &ProvidesIndex {
        &self.index
    }
}

fn declared_entries(registry: Weak<RepositoryRegistry>) -> EntrySource {
    Box::new(move || {
        let repositories = upgrade(&registry)?.repositories();
        let mut entries: Vec<RankedEntry> = Vec::new();
        for (_, declaring) in &repositories {
            let Some(virtuals) = declaring.virtuals_interface() else {
                continue;
            };
            for (virtual_name, dep) in virtuals.virtual_packages()? {
                let provider = match dep_package(&dep) {
                    Ok(p) => p,
                    Err(e) => {
                        warn!("{}: skipping {virtual_name}: {e}", declaring.name());
                        continue;
                    }
                };
                for (importance, repository) in &repositories {
                    if repository.installed_interface().is_some()
                        || repository.format() == "virtuals"
                    {
                        continue;
                    }
                    for version in repository.version_specs(&provider)? {
                        let slot = || {
                            repository
                                .version_metadata(&provider, &version)
                                .ok()
                                .map(|md| md.slot.clone())
                        };
                        if match_package(&dep, &provider, &version, repository.name(), slot) {
                            entries.push((
                                *importance,
                                VirtualEntry {
                                    virtual_name: virtual_name.clone(),
                                    version: version.clone(),
                                    provided_by: provider.clone(),
                                    provided_by_repository: repository.name().to_string(),
                                },
                            ));
                        }
                    }
                }
            }
        }
        Ok(entries)
    })
}

impl Repository for VirtualsRepository {
    fn name(&self) -> &str {
        "virtuals"
    }

    fn format(&self) -> &str {
        "virtuals"
    }

    fn has_category_named(&self, category: &CategoryName) -> Result<bool> {
        self.index.has_category_named(category)
    }

    fn category_names(&self) -> Result<BTreeSet<CategoryName>> {
        let virt = CategoryName::new(VIRTUAL_CATEGORY)?;
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

    /// Metadata from the provider's repository: through its virtuals
    /// interface when it has one, else built from its own metadata.
    fn version_metadata(
        &self,
        name: &QualifiedPackageName,
        version: &VersionSpec,
    ) -> Result<Rc<VersionMetadata>> {
        let entry = self
            .index
            .best(name, version)?
            .ok_or_else(|| no_such_package(name, version, self.name()))?;
        let provider = upgrade(&self.registry)?
            .fetch(&entry.provided_by_repository)
            .ok_or_else(|| {
                Error::Configuration(format!(
                    "provider repository '{}' is gone",
                    entry.provided_by_repository
                ))
            })?;
        if let Some(virtuals) = provider.virtuals_interface() {
            return virtuals.virtual_package_version_metadata(&entry);
        }
        let md = provider.version_metadata(&entry.provided_by, &entry.version)?;
        VersionMetadata::for_virtual(&entry.virtual_name, &entry.provided_by, &entry.version, &md)
            .map(Rc::new)
    }

    fn invalidate(&self) {
        self.index.invalidate();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::RepositoryFactory;
    use crate::repository::EbuildRepository;
    use crate::test_util::TreeBuilder;

    const CACHE: &str = "DESCRIPTION=editor\nSLOT=0\n";

    fn q(s: &str) -> QualifiedPackageName {
        s.parse().unwrap()
    }

    fn v(s: &str) -> VersionSpec {
        VersionSpec::parse(s).unwrap()
    }

    fn tree() -> TreeBuilder {
        let dir = TreeBuilder::new();
        dir.file("profiles/repo_name", "test\n")
            .file("profiles/profiles.desc", "amd64 nano stable\nx86 vim stable\n")
            .file("profiles/nano/virtuals", "virtual/editor app-editors/nano\n")
            .file("profiles/vim/virtuals", "virtual/editor >=app-editors/vim-9\n")
            .ebuild("app-editors/nano-7.2", CACHE)
            .ebuild("app-editors/nano-8.0", CACHE)
            .ebuild("app-editors/vim-8.2", CACHE)
            .ebuild("app-editors/vim-9.1", CACHE);
        dir
    }

    fn setup(dir: &TreeBuilder) -> (Rc<RepositoryRegistry>, Rc<dyn Repository>) {
        let registry = RepositoryRegistry::new();
        let ctx = FactoryContext::new(&registry);
        let factory = RepositoryFactory::default();
        let keys = RepositoryKeys::new()
            .with("location", dir.path().to_string_lossy())
            .with("profiles", dir.join("profiles/nano").to_string_lossy())
            .with("names_cache", "/var/empty");
        factory.add_to_registry(&ctx, &keys).unwrap();
        let virtuals = factory
            .add_to_registry(&ctx, &RepositoryKeys::new().with("format", "virtuals"))
            .unwrap();
        (registry, virtuals)
    }

    fn versions(repo: &Rc<dyn Repository>) -> Vec<String> {
        repo.version_specs(&q("virtual/editor"))
            .unwrap()
            .iter()
            .map(|v| v.to_string())
            .collect()
    }

    #[test]
    fn expands_provider_versions() {
        let dir = tree();
        let (_registry, virtuals) = setup(&dir);
        assert_eq!(versions(&virtuals), ["7.2", "8.0"]);
        let md = virtuals.version_metadata(&q("virtual/editor"), &v("8.0")).unwrap();
        assert_eq!(md.virtual_for, Some(q("app-editors/nano")));
        assert_eq!(md.description, "Virtual virtual/editor for app-editors/nano");
        assert!(matches!(
            virtuals.version_metadata(&q("virtual/editor"), &v("9.1")),
            Err(Error::NoSuchPackage { .. })
        ));
    }

    #[test]
    fn profile_change_invalidates() {
        let dir = tree();
        let (registry, virtuals) = setup(&dir);
        assert_eq!(versions(&virtuals), ["7.2", "8.0"]);

        let test = registry.fetch("test").unwrap();
        let location = test.location().unwrap().to_path_buf();
        assert_eq!(location, dir.path());

        // Select the vim profile through the concrete type.
        let keys = RepositoryKeys::new()
            .with("location", dir.path().to_string_lossy())
            .with("name", "other")
            .with("names_cache", "/var/empty");
        let other = EbuildRepository::from_keys(&FactoryContext::new(&registry), &keys).unwrap();
        let other = Rc::new(other);
        registry.add(0, other.clone()).unwrap();
        assert_eq!(versions(&virtuals), ["7.2", "8.0"]);

        other.set_profile_by_arch("x86").unwrap();
        assert_eq!(versions(&virtuals), ["7.2", "8.0", "9.1"]);
    }
}
