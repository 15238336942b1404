//! Repository syncing through an external transport.

use std::fmt;
use std::path::Path;

use tracing::{debug, warn};

use crate::error::{Error, Result};

/// A sync transport (rsync, git, ...).
pub trait Syncer: fmt::Debug {
    /// Bring `local` up to date from `remote`. `options` is passed through
    /// uninterpreted.
    fn sync(&self, local: &Path, remote: &str, options: &str) -> Result<()>;
}

/// Try each whitespace-separated target in `targets` until one succeeds.
///
/// Returns `Ok(false)` if there are no targets and `Ok(true)` once a target
/// succeeds. Failures are logged; [`Error::SyncFailed`] is returned only if
/// every target fails.
pub fn sync_targets(syncer: &dyn Syncer, local: &Path, targets: &str, options: &str) -> Result<bool> {
    let mut tried = 0;
    for remote in targets.split_whitespace() {
        tried += 1;
        debug!("syncing {local:?} from {remote}");
        match syncer.sync(local, remote, options) {
            Ok(()) => return Ok(true),
            Err(e) => warn!("sync of {local:?} from {remote} failed: {e}"),
        }
    }
    if tried == 0 {
        return Ok(false);
    }
    Err(Error::SyncFailed {
        location: local.to_path_buf(),
        targets: targets.split_whitespace().collect::<Vec<_>>().join(" "),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use tracing_test::traced_test;

    #[derive(Debug, Default)]
    struct Recorder {
        working: Vec<&'static str>,
        tried: RefCell<Vec<String>>,
    }

    impl Syncer for Recorder {
        fn sync(&self, _local: &Path, remote: &str, options: &str) -> Result<()> {
            assert_eq!(options, "--quiet");
            self.tried.borrow_mut().push(remote.to_string());
            if self.working.contains(&remote) {
                Ok(())
            } else {
                Err(Error::Configuration(format!("{remote} unreachable")))
            }
        }
    }

    #[test]
    fn no_targets() {
        let syncer = Recorder::default();
        assert!(!sync_targets(&syncer, Path::new("/repo"), "  ", "--quiet").unwrap());
        assert!(syncer.tried.borrow().is_empty());
    }

    #[test]
    #[traced_test]
    fn first_success_wins() {
        let syncer = Recorder {
            working: vec!["rsync://b", "rsync://c"],
            ..Recorder::default()
        };
        let synced =
            sync_targets(&syncer, Path::new("/repo"), "rsync://a rsync://b rsync://c", "--quiet")
                .unwrap();
        assert!(synced);
        assert_eq!(*syncer.tried.borrow(), ["rsync://a", "rsync://b"]);
        assert!(logs_contain("rsync://a unreachable"));
    }

    #[test]
    fn all_fail() {
        let syncer = Recorder::default();
        let err = sync_targets(&syncer, Path::new("/repo"), "a  b", "--quiet").unwrap_err();
        assert_eq!(
            err,
            Error::SyncFailed {
                location: "/repo".into(),
                targets: "a b".to_string(),
            }
        );
    }
}
