//! On-disk fixtures for unit tests.

use std::fs;
use std::path::{Path, PathBuf};

use tempfile::TempDir;

use crate::name::PackageNamePart;

/// A repository tree in a temporary directory.
pub(crate) struct TreeBuilder {
    dir: TempDir,
}

impl TreeBuilder {
    pub(crate) fn new() -> Self {
        TreeBuilder {
            dir: tempfile::tempdir().unwrap(),
        }
    }

    pub(crate) fn path(&self) -> &Path {
        self.dir.path()
    }

    pub(crate) fn join(&self, rel: &str) -> PathBuf {
        self.dir.path().join(rel)
    }

    pub(crate) fn file(&self, rel: &str, content: &str) -> &Self {
        let path = self.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
        self
    }

    pub(crate) fn dir(&self, rel: &str) -> &Self {
        fs::create_dir_all(self.join(rel)).unwrap();
        self
    }

    pub(crate) fn remove(&self, rel: &str) -> &Self {
        let path = self.join(rel);
        if path.is_dir() {
            fs::remove_dir_all(path).unwrap();
        } else {
            fs::remove_file(path).unwrap();
        }
        self
    }

    /// `cat/pkg/pkg-ver.ebuild` plus its md5-cache entry.
    pub(crate) fn ebuild(&self, cpv: &str, cache: &str) -> &Self {
        let (category, pv) = cpv.split_once('/').unwrap();
        let (package, _) = PackageNamePart::split_versioned(pv).unwrap();
        self.file(&format!("{category}/{package}/{pv}.ebuild"), "");
        self.file(&format!("metadata/md5-cache/{category}/{pv}"), cache)
    }

    /// An installed-package directory `cat/pkg-ver/` with minimal metadata.
    pub(crate) fn installed(&self, cpv: &str, provide: &str) -> &Self {
        self.file(&format!("{cpv}/DESCRIPTION"), "installed package\n");
        self.file(&format!("{cpv}/SLOT"), "0\n");
        self.file(&format!("{cpv}/EAPI"), "0\n");
        if !provide.is_empty() {
            self.file(&format!("{cpv}/PROVIDE"), &format!("{provide}\n"));
        }
        self
    }
}
