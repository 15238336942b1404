use std::io;
use std::path::{Path, PathBuf};

/// Error type for repository index, profile and cache operations.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum Error {
    /// Fatal configuration problem (no `profiles.desc`, no profile for an
    /// arch, no EAPI 0 configuration, missing mandatory repository keys).
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The requested package version does not exist in the repository.
    #[error("no such package: {name}-{version}::{repository}")]
    NoSuchPackage {
        /// Qualified package name.
        name: String,
        /// Version string.
        version: String,
        /// Repository queried.
        repository: String,
    },

    /// Invalid category name.
    #[error("invalid category name: {0}")]
    InvalidCategory(String),

    /// Invalid package name.
    #[error("invalid package name: {0}")]
    InvalidPackageName(String),

    /// Invalid repository name.
    #[error("invalid repository name: {0}")]
    InvalidRepositoryName(String),

    /// Invalid USE flag name.
    #[error("invalid USE flag name: {0}")]
    InvalidUseFlag(String),

    /// Invalid version string.
    #[error("invalid version: {0}")]
    InvalidVersion(String),

    /// Invalid EAPI value.
    #[error("invalid EAPI: {0}")]
    InvalidEapi(String),

    /// Invalid keyword string.
    #[error("invalid keyword: {0}")]
    InvalidKeyword(String),

    /// Error parsing a metadata cache entry.
    #[error("invalid cache entry: {0}")]
    InvalidCacheEntry(String),

    /// Missing mandatory field in a metadata entry.
    #[error("missing required field: {0}")]
    MissingField(String),

    /// Error from the portage-atom dependency parser.
    #[error("dependency parse error: {0}")]
    DepError(String),

    /// Filesystem error.
    #[error("{}: {message}", path.display())]
    Io {
        /// Path being accessed.
        path: PathBuf,
        /// Stringified I/O error.
        message: String,
    },

    /// Every configured sync target failed.
    #[error("syncing '{}' failed for every target: {targets}", location.display())]
    SyncFailed {
        /// Local repository location.
        location: PathBuf,
        /// The space-separated targets that were tried.
        targets: String,
    },

    /// No constructor is registered for a repository or entry format.
    #[error("unknown format: {0}")]
    UnknownFormat(String),
}

impl Error {
    /// Whether this is a per-entry name error: the entry is logged and
    /// skipped, the surrounding operation continues.
    pub fn is_name_error(&self) -> bool {
        matches!(
            self,
            Error::InvalidCategory(_)
                | Error::InvalidPackageName(_)
                | Error::InvalidRepositoryName(_)
                | Error::InvalidUseFlag(_)
                | Error::InvalidVersion(_)
        )
    }

    pub(crate) fn io(path: &Path, err: io::Error) -> Self {
        Error::Io {
            path: path.to_path_buf(),
            message: err.to_string(),
        }
    }
}

/// Result type for portage-repository operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_errors_are_recoverable() {
        assert!(Error::InvalidCategory("-x".into()).is_name_error());
        assert!(Error::InvalidVersion("x".into()).is_name_error());
        assert!(!Error::Configuration("no profiles.desc".into()).is_name_error());
        assert!(!Error::NoSuchPackage {
            name: "cat/pkg".into(),
            version: "1".into(),
            repository: "test".into(),
        }
        .is_name_error());
    }

    #[test]
    fn display() {
        let err = Error::NoSuchPackage {
            name: "cat/pkg".into(),
            version: "1.0".into(),
            repository: "gentoo".into(),
        };
        assert_eq!(err.to_string(), "no such package: cat/pkg-1.0::gentoo");

        let err = Error::io(
            Path::new("/nonexistent"),
            io::Error::new(io::ErrorKind::NotFound, "not found"),
        );
        assert_eq!(err.to_string(), "/nonexistent: not found");
    }
}
