use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use crate::eapi::EapiRegistry;
use crate::error::{Error, Result};
use crate::metadata::VersionMetadata;
use crate::name::QualifiedPackageName;
use crate::version::VersionSpec;

/// Produces [`VersionMetadata`] for one entry of a repository.
///
/// One implementation per on-disk entry format. The repository index only
/// calls `generate` for versions it has already seen on disk.
pub trait MetadataGenerator: fmt::Debug {
    /// Entry format name, as used in repository configuration.
    fn format(&self) -> &str;

    /// Suffix of entry files in a tree layout (`.ebuild`). Empty for formats
    /// whose entries are directories.
    fn file_extension(&self) -> &str;

    /// Generate metadata for `name-version` in the repository at `location`.
    fn generate(
        &self,
        location: &Path,
        name: &QualifiedPackageName,
        version: &VersionSpec,
    ) -> Result<VersionMetadata>;
}

/// Build the generator for an entry format name.
pub fn make_generator(
    format: &str,
    eapis: Option<Rc<EapiRegistry>>,
) -> Result<Box<dyn MetadataGenerator>> {
    match format {
        "ebuild" => Ok(Box::new(Md5CacheGenerator::new(eapis))),
        "vdb" => Ok(Box::new(VdbGenerator::new(eapis))),
        other => Err(Error::Configuration(format!(
            "unknown entry format '{other}'"
        ))),
    }
}

/// Reads ebuild metadata from the tree's `metadata/md5-cache`.
///
/// See [PMS 14.2](https://projects.gentoo.org/pms/9/pms.html#mddict-cache-file-format).
#[derive(Debug, Clone, Default)]
pub struct Md5CacheGenerator {
    eapis: Option<Rc<EapiRegistry>>,
}

impl Md5CacheGenerator {
    /// New generator, optionally EAPI-configuration aware.
    pub fn new(eapis: Option<Rc<EapiRegistry>>) -> Self {
        Md5CacheGenerator { eapis }
    }

    /// Path of the cache entry for `name-version`.
    pub fn entry_path(
        location: &Path,
        name: &QualifiedPackageName,
        version: &VersionSpec,
    ) -> PathBuf {
        location
            .join("metadata")
            .join("md5-cache")
            .join(name.category.as_str())
            .join(format!("{}-{version}", name.package))
    }

    /// Parse the contents of one md5-cache file.
    ///
    /// Lines are `KEY=VALUE` pairs in arbitrary order; unknown keys are kept
    /// but ignored by [`VersionMetadata::from_keys`].
    ///
    /// # Examples
    ///
    /// ```
    /// use portage_repository::Md5CacheGenerator;
    ///
    /// let input = "\
    /// EAPI=7
    /// DESCRIPTION=Example package
    /// SLOT=0
    /// KEYWORDS=~amd64
    /// ";
    /// let md = Md5CacheGenerator::default().parse(input).unwrap();
    /// assert_eq!(md.description, "Example package");
    /// assert_eq!(md.eapi.to_string(), "7");
    /// ```
    pub fn parse(&self, input: &str) -> Result<VersionMetadata> {
        let keys: HashMap<String, String> = input
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .filter_map(|line| line.split_once('='))
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        VersionMetadata::from_keys(&keys, self.eapis.as_deref())
    }
}

impl MetadataGenerator for Md5CacheGenerator {
    fn format(&self) -> &str {
        "ebuild"
    }

    fn file_extension(&self) -> &str {
        ".ebuild"
    }

    fn generate(
        &self,
        location: &Path,
        name: &QualifiedPackageName,
        version: &VersionSpec,
    ) -> Result<VersionMetadata> {
        let path = Self::entry_path(location, name, version);
        let content = fs::read_to_string(&path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => Error::InvalidCacheEntry(format!(
                "{name}-{version}: no metadata cache entry at '{}'",
                path.display()
            )),
            _ => Error::io(&path, e),
        })?;
        self.parse(&content).map_err(|e| match e {
            Error::Io { .. } => e,
            e => Error::InvalidCacheEntry(format!("{}: {e}", path.display())),
        })
    }
}

/// Reads installed-package metadata, one file per key, from
/// `<location>/<category>/<package>-<version>/`.
#[derive(Debug, Clone, Default)]
pub struct VdbGenerator {
    eapis: Option<Rc<EapiRegistry>>,
}

/// Keys read from an installed-package directory.
const VDB_KEYS: &[&str] = &[
    "EAPI",
    "DESCRIPTION",
    "SLOT",
    "HOMEPAGE",
    "SRC_URI",
    "LICENSE",
    "KEYWORDS",
    "DEPEND",
    "RDEPEND",
    "PDEPEND",
    "PROVIDE",
];

impl VdbGenerator {
    /// New generator, optionally EAPI-configuration aware.
    pub fn new(eapis: Option<Rc<EapiRegistry>>) -> Self {
        VdbGenerator { eapis }
    }
}

impl MetadataGenerator for VdbGenerator {
    fn format(&self) -> &str {
        "vdb"
    }

    fn file_extension(&self) -> &str {
        ""
    }

    fn generate(
        &self,
        location: &Path,
        name: &QualifiedPackageName,
        version: &VersionSpec,
    ) -> Result<VersionMetadata> {
        let dir = location
            .join(name.category.as_str())
            .join(format!("{}-{version}", name.package));
        let mut keys = HashMap::new();
        for key in VDB_KEYS {
            let path = dir.join(key);
            match fs::read_to_string(&path) {
                Ok(value) => {
                    keys.insert(key.to_string(), value.trim_end().to_string());
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(Error::io(&path, e)),
            }
        }
        VersionMetadata::from_keys(&keys, self.eapis.as_deref())
    }
}
