use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use tracing::{debug, warn};

use super::{
    cached_category_names_containing_package, virtual_metadata, InstalledInterface,
    ProvidesInterface, Repository,
};
use crate::config::{is_disabled, RepositoryKeys};
use crate::error::{Error, Result};
use crate::generator::VdbGenerator;
use crate::index::{Layout, RepositoryIndex};
use crate::metadata::VersionMetadata;
use crate::name::{CategoryName, PackageNamePart, QualifiedPackageName, RepositoryName};
use crate::name_cache::NameCache;
use crate::provides::VirtualEntry;
use crate::registry::FactoryContext;
use crate::version::VersionSpec;

type ProvidesMap = BTreeMap<(QualifiedPackageName, VersionSpec), Vec<QualifiedPackageName>>;

/// Format tag on the first line of a provides cache.
pub const PROVIDES_CACHE_FORMAT: &str = "provides-1";

/// The database of installed packages (`cat/pkg-ver/KEY` files).
///
/// Configuration keys: `location` (required), `root` (`/` by default),
/// `name` (`installed` by default), `names_cache` and `provides_cache`
/// (under `<location>/.cache/` by default, `/var/empty` disables).
#[derive(Debug)]
pub struct InstalledRepository {
    name: String,
    location: PathBuf,
    root: PathBuf,
    provides_cache: PathBuf,
    index: RepositoryIndex,
    names_cache: NameCache,
    provides: RefCell<Option<Rc<Vec<VirtualEntry>>>>,
}

impl InstalledRepository {
    /// Build from configuration keys.
    pub fn from_keys(ctx: &FactoryContext, keys: &RepositoryKeys) -> Result<Self> {
        let location = PathBuf::from(keys.require("location")?);
        let name = RepositoryName::new(keys.get("name").unwrap_or("installed"))?.to_string();
        let root = keys.path("root").unwrap_or_else(|| PathBuf::from("/"));
        let names_cache_base = keys
            .path("names_cache")
            .unwrap_or_else(|| location.join(".cache").join("names"));
        let provides_cache = keys
            .path("provides_cache")
            .unwrap_or_else(|| location.join(".cache").join("provides"));

        debug!("{name}: installed repository at {location:?} for root {root:?}");
        Ok(InstalledRepository {
            index: RepositoryIndex::new(
                &name,
                &location,
                Layout::Installed,
                Vec::new(),
                Box::new(VdbGenerator::new(ctx.eapis.clone())),
            ),
            names_cache: NameCache::new(&names_cache_base, &name),
            name,
            location,
            root,
            provides_cache,
            provides: RefCell::new(None),
        })
    }

    /// Where the provides cache lives.
    pub fn provides_cache(&self) -> &Path {
        &self.provides_cache
    }

    /// Read the provides cache. `None` means it is absent or unusable and
    /// installed metadata must be scanned instead.
    fn load_provides_cache(&self) -> Option<Vec<VirtualEntry>> {
        if is_disabled(&self.provides_cache) {
            return None;
        }
        let path = &self.provides_cache;
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("{}: no provides cache at {path:?}", self.name);
                return None;
            }
            Err(e) => {
                warn!("cannot read provides cache {path:?}: {e}");
                return None;
            }
        };

        let mut lines = content.lines();
        let (format, repo) = (lines.next().unwrap_or(""), lines.next().unwrap_or(""));
        if format != PROVIDES_CACHE_FORMAT || repo != self.name {
            warn!(
                "provides cache at {path:?} has an invalid header ('{format}', '{repo}'), \
                 scanning installed packages instead"
            );
            return None;
        }

        let mut entries = Vec::new();
        for line in lines.filter(|l| !l.trim().is_empty()) {
            match self.parse_provides_line(line) {
                Ok(parsed) => entries.extend(parsed),
                Err(e) => warn!("skipping provides cache line '{line}': {e}"),
            }
        }
        Some(entries)
    }

    fn parse_provides_line(&self, line: &str) -> Result<Vec<VirtualEntry>> {
        let mut tokens = line.split_whitespace();
        let (Some(name), Some(version)) = (tokens.next(), tokens.next()) else {
            return Err(Error::InvalidCacheEntry(line.to_string()));
        };
        let name: QualifiedPackageName = name.parse()?;
        let version = VersionSpec::parse(version)?;
        tokens
            .map(|virt| -> Result<VirtualEntry> {
                Ok(VirtualEntry {
                    virtual_name: virt.parse()?,
                    version: version.clone(),
                    provided_by: name.clone(),
                    provided_by_repository: self.name.clone(),
                })
            })
            .collect()
    }

    /// Every installed version's `PROVIDE`, from metadata.
    fn scan_provides(&self) -> Result<ProvidesMap> {
        let mut provides = BTreeMap::new();
        for name in self.index.all_package_names()? {
            for version in self.index.version_specs(&name)? {
                match self.index.version_metadata(&name, &version) {
                    Ok(md) if !md.provide.is_empty() => {
                        provides.insert((name.clone(), version), md.provide.clone());
                    }
                    Ok(_) => {}
                    Err(e) => warn!("{}: skipping {name}-{version}: {e}", self.name),
                }
            }
        }
        Ok(provides)
    }

    fn write_provides_cache(&self) -> Result<()> {
        if is_disabled(&self.provides_cache) {
            return Ok(());
        }
        let path = &self.provides_cache;
        debug!("{}: writing provides cache {path:?}", self.name);

        let mut content = format!("{PROVIDES_CACHE_FORMAT}\n{}\n", self.name);
        for ((name, version), virtuals) in self.scan_provides()? {
            let virtuals: Vec<String> = virtuals.iter().map(ToString::to_string).collect();
            content.push_str(&format!("{name} {version} {}\n", virtuals.join(" ")));
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
        }
        fs::write(path, content).map_err(|e| Error::io(path, e))
    }
}

impl Repository for InstalledRepository {
    fn name(&self) -> &str {
        &self.name
    }

    fn format(&self) -> &str {
        "vdb"
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

    /// Rewrite the names cache and the provides cache. An empty database
    /// gets a provides cache holding only its header.
    fn regenerate_cache(&self) -> Result<()> {
        let names = self.index.all_package_names()?;
        self.names_cache.regenerate(&names)?;
        self.write_provides_cache()?;
        *self.provides.borrow_mut() = None;
        Ok(())
    }

    fn invalidate(&self) {
        self.index.invalidate();
        self.names_cache.invalidate();
        *self.provides.borrow_mut() = None;
    }

    fn installed_interface(&self) -> Option<&dyn InstalledInterface> {
        Some(self)
    }

    fn provides_interface(&self) -> Option<&dyn ProvidesInterface> {
        Some(self)
    }
}

impl InstalledInterface for InstalledRepository {
    fn root(&self) -> &Path {
        &self.root
    }
}

impl ProvidesInterface for InstalledRepository {
    fn provided_packages(&self) -> Result<Rc<Vec<VirtualEntry>>> {
        if let Some(entries) = self.provides.borrow().as_ref() {
            return Ok(Rc::clone(entries));
        }
        let entries = match self.load_provides_cache() {
            Some(entries) => entries,
            None => self
                .scan_provides()?
                .into_iter()
                .flat_map(|((name, version), virtuals)| {
                    virtuals.into_iter().map(move |virt| VirtualEntry {
                        virtual_name: virt,
                        version: version.clone(),
                        provided_by: name.clone(),
                        provided_by_repository: self.name.clone(),
                    })
                })
                .collect(),
        };
        let entries = Rc::new(entries);
        *self.provides.borrow_mut() = Some(Rc::clone(&entries));
        Ok(entries)
    }

    fn provided_package_version_metadata(
        &self,
        entry: &VirtualEntry,
    ) -> Result<Rc<VersionMetadata>> {
        virtual_metadata(&self.index, entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::TreeBuilder;
    use tracing_test::traced_test;

    fn q(s: &str) -> QualifiedPackageName {
        s.parse().unwrap()
    }

    fn v(s: &str) -> VersionSpec {
        VersionSpec::parse(s).unwrap()
    }

    fn pkg(s: &str) -> PackageNamePart {
        PackageNamePart::new(s).unwrap()
    }

    fn repo(dir: &TreeBuilder) -> InstalledRepository {
        let keys = RepositoryKeys::new()
            .with("location", dir.join("vdb").to_string_lossy())
            .with("names_cache", dir.join("cache/names").to_string_lossy())
            .with("provides_cache", dir.join("cache/provides").to_string_lossy());
        InstalledRepository::from_keys(&FactoryContext::default(), &keys).unwrap()
    }

    fn count(repo: &InstalledRepository, package: &str) -> usize {
        repo.category_names_containing_package(&pkg(package))
            .unwrap()
            .len()
    }

    #[test]
    fn defaults() {
        let dir = TreeBuilder::new();
        dir.dir("vdb");
        let keys = RepositoryKeys::new().with("location", dir.join("vdb").to_string_lossy());
        let repo = InstalledRepository::from_keys(&FactoryContext::default(), &keys).unwrap();
        assert_eq!(repo.name(), "installed");
        assert_eq!(repo.root(), Path::new("/"));
        assert_eq!(repo.provides_cache(), dir.join("vdb/.cache/provides"));
        let caps = repo.capabilities();
        assert!(caps.installed && caps.provides && !caps.mask);
    }

    #[test]
    fn names_cache_follows_installs() {
        let dir = TreeBuilder::new();
        dir.dir("vdb");
        let repo = repo(&dir);
        repo.regenerate_cache().unwrap();
        assert_eq!(count(&repo, "pkg1"), 0);

        // Install cat1/pkg1-1.
        dir.installed("vdb/cat1/pkg1-1", "");
        repo.invalidate();
        repo.regenerate_cache().unwrap();
        assert_eq!(count(&repo, "pkg1"), 1);
        assert_eq!(fs::read_to_string(dir.join("cache/names/installed/pkg1")).unwrap(), "cat1\n");

        // Replace it with cat1/pkg1-1.1.
        dir.installed("vdb/cat1/pkg1-1.1", "").remove("vdb/cat1/pkg1-1");
        repo.invalidate();
        repo.regenerate_cache().unwrap();
        assert_eq!(count(&repo, "pkg1"), 1);
        assert_eq!(fs::read_to_string(dir.join("cache/names/installed/pkg1")).unwrap(), "cat1\n");

        // Uninstall it.
        dir.remove("vdb/cat1/pkg1-1.1");
        repo.invalidate();
        repo.regenerate_cache().unwrap();
        assert_eq!(count(&repo, "pkg1"), 0);
        assert!(!dir.join("cache/names/installed/pkg1").exists());
    }

    #[test]
    fn provides_cache() {
        let dir = TreeBuilder::new();
        dir.dir("vdb");
        let repo = repo(&dir);
        repo.regenerate_cache().unwrap();
        assert_eq!(
            fs::read_to_string(dir.join("cache/provides")).unwrap(),
            "provides-1\ninstalled\n"
        );

        dir.installed("vdb/cat1/pkg1-1", "virtual/foo virtual/bar")
            .installed("vdb/cat1/pkg2-1", "virtual/foo")
            .installed("vdb/cat1/pkg3-1", "");
        repo.invalidate();
        repo.regenerate_cache().unwrap();
        assert_eq!(
            fs::read_to_string(dir.join("cache/provides")).unwrap(),
            "provides-1\ninstalled\ncat1/pkg1 1 virtual/foo virtual/bar\ncat1/pkg2 1 virtual/foo\n"
        );

        let entries = repo.provided_packages().unwrap();
        assert_eq!(entries.len(), 3);
        assert!(entries
            .iter()
            .all(|e| e.version == v("1") && e.provided_by_repository == "installed"));
    }

    #[test]
    fn provides_cache_is_authoritative_when_valid() {
        let dir = TreeBuilder::new();
        dir.installed("vdb/cat1/pkg1-1", "virtual/foo");
        dir.file("cache/provides", "provides-1\ninstalled\ncat9/other 2 virtual/baz\n");
        let repo = repo(&dir);
        let entries = repo.provided_packages().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].provided_by, q("cat9/other"));
    }

    #[test]
    #[traced_test]
    fn invalid_provides_header_falls_back_to_scan() {
        let dir = TreeBuilder::new();
        dir.installed("vdb/cat1/pkg1-1", "virtual/foo");
        dir.file("cache/provides", "provides-0\ninstalled\ncat9/other 2 virtual/baz\n");
        let repo = repo(&dir);
        let entries = repo.provided_packages().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].provided_by, q("cat1/pkg1"));
        assert!(logs_contain("invalid header"));
    }

    #[test]
    fn provided_metadata() {
        let dir = TreeBuilder::new();
        dir.installed("vdb/cat1/pkg1-1", "virtual/foo");
        let repo = repo(&dir);
        let entry = repo.provided_packages().unwrap()[0].clone();
        let md = repo.provided_package_version_metadata(&entry).unwrap();
        assert_eq!(md.virtual_for, Some(q("cat1/pkg1")));
        assert_eq!(md.description, "Virtual virtual/foo for cat1/pkg1");
    }
}
