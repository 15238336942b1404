//! Lazy category/package/version index over one repository directory.

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use tracing::{debug, warn};

use crate::config::read_line_file;
use crate::error::{Error, Result};
use crate::generator::MetadataGenerator;
use crate::metadata::VersionMetadata;
use crate::name::{CategoryName, PackageNamePart, QualifiedPackageName};
use crate::version::VersionSpec;

/// Top-level directories that are never categories.
const RESERVED_DIRS: &[&str] = &[
    "CVS",
    ".svn",
    ".git",
    "distfiles",
    "scripts",
    "eclass",
    "licenses",
    "licences",
    "packages",
    "profiles",
    "metadata",
];

/// How entries are laid out under a category directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    /// `cat/pkg/pkg-ver<ext>`, as in source trees.
    Tree,
    /// `cat/pkg-ver/`, as in the installed-package database. A single
    /// category scan finds packages and versions together.
    Installed,
}

#[derive(Debug, Default)]
struct IndexState {
    /// Known categories; the flag is set once the category's packages
    /// have been fully enumerated.
    categories: Option<BTreeMap<CategoryName, bool>>,
    packages: HashMap<CategoryName, BTreeSet<PackageNamePart>>,
    /// Presence of a key means its versions have been enumerated.
    versions: HashMap<QualifiedPackageName, BTreeSet<VersionSpec>>,
    metadata: HashMap<(QualifiedPackageName, VersionSpec), Rc<VersionMetadata>>,
    diagnostics: Vec<Error>,
}

impl IndexState {
    fn skip(&mut self, path: &Path, err: Error) {
        warn!("skipping {path:?}: {err}");
        self.diagnostics.push(err);
    }
}

/// Per-repository lazy index of categories, packages, versions and metadata.
///
/// Every level is scanned at most once; results stay valid until
/// [`invalidate`](RepositoryIndex::invalidate) drops the whole state.
/// Malformed names found while scanning are logged, recorded in
/// [`diagnostics`](RepositoryIndex::diagnostics) and skipped.
#[derive(Debug)]
pub struct RepositoryIndex {
    repo_name: String,
    location: PathBuf,
    layout: Layout,
    category_sources: Vec<PathBuf>,
    generator: Box<dyn MetadataGenerator>,
    state: RefCell<IndexState>,
}

impl RepositoryIndex {
    /// Create an empty index. Nothing is read until the first query.
    ///
    /// `category_sources` are directories (usually profile directories,
    /// master first) that may hold a `categories` file. If none does, the
    /// repository root is scanned instead.
    pub fn new(
        repo_name: &str,
        location: &Path,
        layout: Layout,
        category_sources: Vec<PathBuf>,
        generator: Box<dyn MetadataGenerator>,
    ) -> Self {
        RepositoryIndex {
            repo_name: repo_name.to_string(),
            location: location.to_path_buf(),
            layout,
            category_sources,
            generator,
            state: RefCell::new(IndexState::default()),
        }
    }

    /// Repository root.
    pub fn location(&self) -> &Path {
        &self.location
    }

    /// Entry layout.
    pub fn layout(&self) -> Layout {
        self.layout
    }

    /// The metadata generator for this repository's entries.
    pub fn generator(&self) -> &dyn MetadataGenerator {
        self.generator.as_ref()
    }

    /// Whether `category` exists.
    pub fn has_category_named(&self, category: &CategoryName) -> Result<bool> {
        let mut state = self.state.borrow_mut();
        self.need_category_names(&mut state)?;
        Ok(state
            .categories
            .as_ref()
            .is_some_and(|c| c.contains_key(category)))
    }

    /// All categories.
    pub fn category_names(&self) -> Result<BTreeSet<CategoryName>> {
        let mut state = self.state.borrow_mut();
        self.need_category_names(&mut state)?;
        Ok(state
            .categories
            .as_ref()
            .map(|c| c.keys().cloned().collect())
            .unwrap_or_default())
    }

    /// All packages in `category`. Empty for an unknown category.
    pub fn package_names(&self, category: &CategoryName) -> Result<BTreeSet<QualifiedPackageName>> {
        let mut state = self.state.borrow_mut();
        self.need_package_names(&mut state, category)?;
        Ok(state
            .packages
            .get(category)
            .map(|pkgs| {
                pkgs.iter()
                    .map(|p| QualifiedPackageName::new(category.clone(), p.clone()))
                    .collect()
            })
            .unwrap_or_default())
    }

    /// Whether `name` exists, without enumerating its whole category when a
    /// single directory check is enough.
    pub fn has_package_named(&self, name: &QualifiedPackageName) -> Result<bool> {
        let mut state = self.state.borrow_mut();
        self.lookup_package(&mut state, name)
    }

    /// All versions of `name`. Empty for an unknown package.
    pub fn version_specs(&self, name: &QualifiedPackageName) -> Result<BTreeSet<VersionSpec>> {
        let mut state = self.state.borrow_mut();
        self.need_version_specs(&mut state, name)?;
        Ok(state.versions.get(name).cloned().unwrap_or_default())
    }

    /// Whether `name-version` exists.
    pub fn has_version(&self, name: &QualifiedPackageName, version: &VersionSpec) -> Result<bool> {
        let mut state = self.state.borrow_mut();
        self.need_version_specs(&mut state, name)?;
        Ok(state
            .versions
            .get(name)
            .is_some_and(|versions| versions.contains(version)))
    }

    /// Metadata for `name-version`, generated on first request and cached.
    ///
    /// Fails with [`Error::NoSuchPackage`] if the version does not exist.
    pub fn version_metadata(
        &self,
        name: &QualifiedPackageName,
        version: &VersionSpec,
    ) -> Result<Rc<VersionMetadata>> {
        let mut state = self.state.borrow_mut();
        let key = (name.clone(), version.clone());
        if let Some(md) = state.metadata.get(&key) {
            return Ok(Rc::clone(md));
        }

        self.need_version_specs(&mut state, name)?;
        let exists = state
            .versions
            .get(name)
            .is_some_and(|versions| versions.contains(version));
        if !exists {
            return Err(Error::NoSuchPackage {
                name: name.to_string(),
                version: version.to_string(),
                repository: self.repo_name.clone(),
            });
        }

        debug!("{}: generating metadata for {name}-{version}", self.repo_name);
        let md = Rc::new(self.generator.generate(&self.location, name, version)?);
        state.metadata.insert(key, Rc::clone(&md));
        Ok(md)
    }

    /// Categories holding a package called `package`, by checking each
    /// category in turn.
    pub fn category_names_containing_package(
        &self,
        package: &PackageNamePart,
    ) -> Result<BTreeSet<CategoryName>> {
        let mut state = self.state.borrow_mut();
        self.need_category_names(&mut state)?;
        let categories: Vec<CategoryName> = state
            .categories
            .as_ref()
            .map(|c| c.keys().cloned().collect())
            .unwrap_or_default();
        let mut result = BTreeSet::new();
        for category in categories {
            let name = QualifiedPackageName::new(category.clone(), package.clone());
            if self.lookup_package(&mut state, &name)? {
                result.insert(category);
            }
        }
        Ok(result)
    }

    /// Every package in every category.
    pub fn all_package_names(&self) -> Result<BTreeSet<QualifiedPackageName>> {
        let mut names = BTreeSet::new();
        for category in self.category_names()? {
            names.extend(self.package_names(&category)?);
        }
        Ok(names)
    }

    /// Per-entry errors encountered while scanning, oldest first.
    pub fn diagnostics(&self) -> Vec<Error> {
        self.state.borrow().diagnostics.clone()
    }

    /// Drop all cached state. The next query rescans from disk.
    pub fn invalidate(&self) {
        debug!("{}: invalidating index", self.repo_name);
        *self.state.borrow_mut() = IndexState::default();
    }

    fn need_category_names(&self, state: &mut IndexState) -> Result<()> {
        if state.categories.is_some() {
            return Ok(());
        }

        let mut categories = BTreeMap::new();
        let mut found_file = false;
        for dir in &self.category_sources {
            let path = dir.join("categories");
            let Some(lines) = read_line_file(&path)? else {
                continue;
            };
            found_file = true;
            for line in lines {
                match CategoryName::new(&line) {
                    Ok(c) => {
                        categories.insert(c, false);
                    }
                    Err(e) => state.skip(&path, e),
                }
            }
        }

        if !found_file {
            debug!(
                "{}: no categories file, scanning {:?}",
                self.repo_name, self.location
            );
            for (name, path) in self.subdirectories(&self.location)? {
                if RESERVED_DIRS.contains(&name.as_str()) {
                    continue;
                }
                match CategoryName::new(&name) {
                    Ok(c) => {
                        categories.insert(c, false);
                    }
                    Err(e) => state.skip(&path, e),
                }
            }
        }

        state.categories = Some(categories);
        Ok(())
    }

    fn need_package_names(&self, state: &mut IndexState, category: &CategoryName) -> Result<()> {
        self.need_category_names(state)?;
        match state.categories.as_ref().and_then(|c| c.get(category)) {
            None | Some(true) => return Ok(()),
            Some(false) => {}
        }

        let dir = self.location.join(category.as_str());
        let mut packages = BTreeSet::new();
        for (name, path) in self.subdirectories(&dir)? {
            match self.layout {
                Layout::Tree => match PackageNamePart::new(&name) {
                    Ok(p) => {
                        if self.has_entry_files(&path)? {
                            packages.insert(p);
                        }
                    }
                    Err(e) => state.skip(&path, e),
                },
                Layout::Installed => match PackageNamePart::split_versioned(&name) {
                    Ok((p, v)) => {
                        let q = QualifiedPackageName::new(category.clone(), p.clone());
                        state.versions.entry(q).or_default().insert(v);
                        packages.insert(p);
                    }
                    Err(e) => state.skip(&path, e),
                },
            }
        }

        state.packages.entry(category.clone()).or_default().extend(packages);
        if let Some(flag) = state.categories.as_mut().and_then(|c| c.get_mut(category)) {
            *flag = true;
        }
        Ok(())
    }

    fn lookup_package(&self, state: &mut IndexState, name: &QualifiedPackageName) -> Result<bool> {
        self.need_category_names(state)?;
        let loaded = match state.categories.as_ref().and_then(|c| c.get(&name.category)) {
            None => return Ok(false),
            Some(loaded) => *loaded,
        };
        let known = state
            .packages
            .get(&name.category)
            .is_some_and(|p| p.contains(&name.package));
        if known || loaded {
            return Ok(known);
        }

        match self.layout {
            Layout::Tree => {
                let dir = self
                    .location
                    .join(name.category.as_str())
                    .join(name.package.as_str());
                if dir.is_dir() {
                    state
                        .packages
                        .entry(name.category.clone())
                        .or_default()
                        .insert(name.package.clone());
                    return Ok(true);
                }
                Ok(false)
            }
            Layout::Installed => {
                self.need_package_names(state, &name.category)?;
                Ok(state
                    .packages
                    .get(&name.category)
                    .is_some_and(|p| p.contains(&name.package)))
            }
        }
    }

    fn need_version_specs(&self, state: &mut IndexState, name: &QualifiedPackageName) -> Result<()> {
        if state.versions.contains_key(name) && self.layout == Layout::Tree {
            return Ok(());
        }
        if !self.lookup_package(state, name)? {
            return Ok(());
        }
        if self.layout == Layout::Installed {
            // The category scan already collected every version.
            return Ok(());
        }

        let dir = self
            .location
            .join(name.category.as_str())
            .join(name.package.as_str());
        let prefix = format!("{}-", name.package);
        let ext = self.generator.file_extension();
        let mut versions = BTreeSet::new();
        for (file, path) in self.files(&dir)? {
            let Some(stem) = file.strip_suffix(ext) else {
                continue;
            };
            let Some(v) = stem.strip_prefix(&prefix) else {
                warn!("unmatched entry: {path:?}");
                continue;
            };
            match VersionSpec::parse(v) {
                Ok(v) => {
                    versions.insert(v);
                }
                Err(e) => state.skip(&path, e),
            }
        }
        state.versions.insert(name.clone(), versions);
        Ok(())
    }

    fn has_entry_files(&self, dir: &Path) -> Result<bool> {
        let ext = self.generator.file_extension();
        Ok(self.files(dir)?.iter().any(|(name, _)| name.ends_with(ext)))
    }

    /// Non-hidden subdirectories of `dir`, sorted. A missing `dir` is empty.
    fn subdirectories(&self, dir: &Path) -> Result<Vec<(String, PathBuf)>> {
        self.list(dir, true)
    }

    /// Non-hidden regular files in `dir`, sorted. A missing `dir` is empty.
    fn files(&self, dir: &Path) -> Result<Vec<(String, PathBuf)>> {
        self.list(dir, false)
    }

    fn list(&self, dir: &Path, dirs: bool) -> Result<Vec<(String, PathBuf)>> {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(Error::io(dir, e)),
        };
        let mut out = Vec::new();
        for entry in entries {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    warn!("error walking {dir:?}: {e}");
                    continue;
                }
            };
            let path = entry.path();
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                warn!("non-unicode path: {path:?}");
                continue;
            };
            if name.starts_with('.') {
                continue;
            }
            // Follow symlinks: categories and packages may be linked in.
            let wanted = if dirs { path.is_dir() } else { path.is_file() };
            if wanted {
                out.push((name, path));
            }
        }
        out.sort();
        Ok(out)
    }
}
