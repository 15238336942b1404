//! On-disk package name → categories side index.
//!
//! Layout under `<location>/<repository name>/`:
//!
//! ```text
//! _VERSION_      format tag, then the repository name
//! <package>      newline-separated categories containing <package>
//! ```

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::config::is_disabled;
use crate::error::{Error, Result};
use crate::name::{CategoryName, PackageNamePart, QualifiedPackageName};

/// Format tag on the first line of `_VERSION_`.
pub const NAMES_CACHE_FORMAT: &str = "names-2";

const VERSION_FILE: &str = "_VERSION_";

#[derive(Debug)]
struct NameCacheState {
    usable: bool,
    checked: bool,
    entries: HashMap<PackageNamePart, BTreeSet<CategoryName>>,
}

impl NameCacheState {
    fn new(location: &Path) -> Self {
        NameCacheState {
            usable: !is_disabled(location),
            checked: false,
            entries: HashMap::new(),
        }
    }
}

/// Optional accelerator for "which categories contain this package".
///
/// Never a source of truth: on any inconsistency it logs a warning, turns
/// itself off and callers fall back to scanning the repository.
#[derive(Debug)]
pub struct NameCache {
    location: PathBuf,
    repo_name: String,
    state: RefCell<NameCacheState>,
}

impl NameCache {
    /// A cache for `repo_name` under `base`. The `/var/empty` base disables it.
    pub fn new(base: &Path, repo_name: &str) -> Self {
        let location = if is_disabled(base) {
            base.to_path_buf()
        } else {
            base.join(repo_name)
        };
        let state = RefCell::new(NameCacheState::new(&location));
        NameCache {
            location,
            repo_name: repo_name.to_string(),
            state,
        }
    }

    /// Directory holding this repository's cache files.
    pub fn location(&self) -> &Path {
        &self.location
    }

    /// False if disabled, or once a lookup found the cache unusable.
    pub fn usable(&self) -> bool {
        self.state.borrow().usable
    }

    /// Categories containing `package`, or `None` if the cache cannot be
    /// used and the caller must scan.
    pub fn category_names_containing_package(
        &self,
        package: &PackageNamePart,
    ) -> Option<BTreeSet<CategoryName>> {
        let mut state = self.state.borrow_mut();
        if !state.usable {
            return None;
        }
        if let Some(categories) = state.entries.get(package) {
            return Some(categories.clone());
        }

        if !state.checked {
            if let Err(reason) = self.check() {
                warn!(
                    "names cache for '{}' at {:?} cannot be used: {reason}",
                    self.repo_name, self.location
                );
                state.usable = false;
                return None;
            }
            state.checked = true;
        }

        let path = self.location.join(package.as_str());
        let mut categories = BTreeSet::new();
        match fs::read_to_string(&path) {
            Ok(content) => {
                for line in content.lines().filter(|l| !l.is_empty()) {
                    match CategoryName::new(line) {
                        Ok(c) => {
                            categories.insert(c);
                        }
                        Err(e) => warn!("{e}: {path:?}"),
                    }
                }
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!("cannot read {path:?}: {e}"),
        }
        state.entries.insert(package.clone(), categories.clone());
        Some(categories)
    }

    /// Validate `_VERSION_`. The error is a human-readable reason.
    fn check(&self) -> std::result::Result<(), String> {
        let version_file = self.location.join(VERSION_FILE);
        if self.location.is_dir() && version_file.exists() {
            let content = fs::read_to_string(&version_file)
                .map_err(|e| format!("cannot read {version_file:?}: {e}"))?;
            let mut lines = content.lines();
            let tag = lines.next().unwrap_or("");
            if tag != NAMES_CACHE_FORMAT {
                return Err(format!("unsupported format '{tag}'"));
            }
            let repo = lines.next().unwrap_or("");
            if repo != self.repo_name {
                return Err(format!("generated for repository '{repo}'"));
            }
            return Ok(());
        }
        let legacy = self
            .location
            .parent()
            .map(|p| p.join(VERSION_FILE))
            .filter(|p| p.exists());
        match legacy {
            Some(p) => Err(format!(
                "found an old-style cache at {p:?}; remove it and regenerate"
            )),
            None => Err("no version information; it has not been generated".to_string()),
        }
    }

    /// Rebuild from scratch from `packages`, the repository's full catalog.
    ///
    /// Every existing file is removed first and `_VERSION_` is written last,
    /// so a reader racing a rebuild finds the cache unusable rather than
    /// half-written. Not safe against concurrent rebuilds.
    pub fn regenerate<'a>(
        &self,
        packages: impl IntoIterator<Item = &'a QualifiedPackageName>,
    ) -> Result<()> {
        if is_disabled(&self.location) {
            return Ok(());
        }
        debug!("regenerating names cache at {:?}", self.location);

        match fs::read_dir(&self.location) {
            Ok(entries) => {
                for entry in entries {
                    let path = entry.map_err(|e| Error::io(&self.location, e))?.path();
                    let removed = if path.is_dir() {
                        fs::remove_dir_all(&path)
                    } else {
                        fs::remove_file(&path)
                    };
                    removed.map_err(|e| Error::io(&path, e))?;
                }
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) if self.location.is_file() => {
                debug!("replacing non-directory {:?}: {e}", self.location);
                fs::remove_file(&self.location).map_err(|e| Error::io(&self.location, e))?;
            }
            Err(e) => return Err(Error::io(&self.location, e)),
        }
        fs::create_dir_all(&self.location).map_err(|e| Error::io(&self.location, e))?;

        let mut fragments: BTreeMap<&str, String> = BTreeMap::new();
        for name in packages {
            let content = fragments.entry(name.package.as_str()).or_default();
            content.push_str(name.category.as_str());
            content.push('\n');
        }
        for (package, categories) in &fragments {
            let path = self.location.join(package);
            if let Err(e) = fs::write(&path, categories) {
                warn!("cannot write {path:?}: {e}");
            }
        }

        let version_file = self.location.join(VERSION_FILE);
        let sentinel = format!("{NAMES_CACHE_FORMAT}\n{}\n", self.repo_name);
        if let Err(e) = fs::write(&version_file, sentinel) {
            warn!("cannot write {version_file:?}: {e}");
        }

        self.invalidate();
        Ok(())
    }

    /// Forget memoized lookups and the usability verdict.
    pub fn invalidate(&self) {
        *self.state.borrow_mut() = NameCacheState::new(&self.location);
    }
}
