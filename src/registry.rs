//! The set of active repositories and the format → constructor factory.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::{Rc, Weak};

use tracing::debug;

use crate::config::RepositoryKeys;
use crate::eapi::EapiRegistry;
use crate::error::{Error, Result};
use crate::repository::{
    EbuildRepository, InstalledRepository, InstalledVirtualsRepository, Repository,
    VirtualsRepository,
};
use crate::sync::Syncer;

/// Active repositories, each with an importance (higher is more important).
#[derive(Debug, Default)]
pub struct RepositoryRegistry {
    repositories: RefCell<Vec<(i32, Rc<dyn Repository>)>>,
}

impl RepositoryRegistry {
    /// An empty registry.
    pub fn new() -> Rc<Self> {
        Rc::new(RepositoryRegistry::default())
    }

    /// Add `repository`. Names must be unique.
    pub fn add(&self, importance: i32, repository: Rc<dyn Repository>) -> Result<()> {
        let mut repositories = self.repositories.borrow_mut();
        if repositories.iter().any(|(_, r)| r.name() == repository.name()) {
            return Err(Error::Configuration(format!(
                "repository '{}' already exists",
                repository.name()
            )));
        }
        debug!(
            "adding repository '{}' ({}) with importance {importance}",
            repository.name(),
            repository.format()
        );
        repositories.push((importance, repository));
        Ok(())
    }

    /// Remove the repository called `name`. Returns whether it existed.
    pub fn remove(&self, name: &str) -> bool {
        let mut repositories = self.repositories.borrow_mut();
        let before = repositories.len();
        repositories.retain(|(_, r)| r.name() != name);
        repositories.len() != before
    }

    /// The repository called `name`.
    pub fn fetch(&self, name: &str) -> Option<Rc<dyn Repository>> {
        self.repositories
            .borrow()
            .iter()
            .find(|(_, r)| r.name() == name)
            .map(|(_, r)| Rc::clone(r))
    }

    /// Importance of the repository called `name`.
    pub fn importance(&self, name: &str) -> Option<i32> {
        self.repositories
            .borrow()
            .iter()
            .find(|(_, r)| r.name() == name)
            .map(|(i, _)| *i)
    }

    /// Whether `a` is more important than `b`. Unknown names rank lowest.
    pub fn more_important_than(&self, a: &str, b: &str) -> bool {
        self.importance(a).unwrap_or(i32::MIN) > self.importance(b).unwrap_or(i32::MIN)
    }

    /// Snapshot of every repository with its importance, most important
    /// first.
    pub fn repositories(&self) -> Vec<(i32, Rc<dyn Repository>)> {
        let mut repositories = self.repositories.borrow().clone();
        repositories.sort_by(|a, b| b.0.cmp(&a.0));
        repositories
    }

    /// Number of repositories.
    pub fn len(&self) -> usize {
        self.repositories.borrow().len()
    }

    /// Whether there are no repositories.
    pub fn is_empty(&self) -> bool {
        self.repositories.borrow().is_empty()
    }

    /// Invalidate every repository.
    pub fn invalidate_all(&self) {
        for (_, repository) in self.repositories() {
            repository.invalidate();
        }
    }
}

/// Shared collaborators handed to repository constructors.
#[derive(Debug, Clone, Default)]
pub struct FactoryContext {
    /// The registry the repository will join.
    pub registry: Weak<RepositoryRegistry>,
    /// EAPI configuration for metadata generation.
    pub eapis: Option<Rc<EapiRegistry>>,
    /// Transport for syncing.
    pub syncer: Option<Rc<dyn Syncer>>,
}

impl FactoryContext {
    /// A context for repositories joining `registry`.
    pub fn new(registry: &Rc<RepositoryRegistry>) -> Self {
        FactoryContext {
            registry: Rc::downgrade(registry),
            ..FactoryContext::default()
        }
    }
}

/// Builds a repository from its configuration keys.
pub type Constructor = fn(&FactoryContext, &RepositoryKeys) -> Result<Rc<dyn Repository>>;

/// What [`RepositoryFactory::create`] does with an unknown format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissingFormat {
    /// Fail with [`Error::UnknownFormat`].
    Error,
    /// Return `Ok(None)`.
    Ignore,
}

/// Format name → constructor.
#[derive(Clone)]
pub struct RepositoryFactory {
    constructors: HashMap<String, Constructor>,
}

impl fmt::Debug for RepositoryFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RepositoryFactory")
            .field("formats", &self.formats())
            .finish()
    }
}

impl Default for RepositoryFactory {
    /// A factory knowing the built-in formats.
    fn default() -> Self {
        let mut factory = RepositoryFactory::empty();
        factory.register("ebuild", make_ebuild);
        factory.register("vdb", make_vdb);
        factory.register("installed_virtuals", make_installed_virtuals);
        factory.register("virtuals", make_virtuals);
        factory
    }
}

fn make_ebuild(ctx: &FactoryContext, keys: &RepositoryKeys) -> Result<Rc<dyn Repository>> {
    let repository: Rc<dyn Repository> = Rc::new(EbuildRepository::from_keys(ctx, keys)?);
    Ok(repository)
}

fn make_vdb(ctx: &FactoryContext, keys: &RepositoryKeys) -> Result<Rc<dyn Repository>> {
    let repository: Rc<dyn Repository> = Rc::new(InstalledRepository::from_keys(ctx, keys)?);
    Ok(repository)
}

fn make_installed_virtuals(
    ctx: &FactoryContext,
    keys: &RepositoryKeys,
) -> Result<Rc<dyn Repository>> {
    let repository: Rc<dyn Repository> =
        Rc::new(InstalledVirtualsRepository::from_keys(ctx, keys)?);
    Ok(repository)
}

fn make_virtuals(ctx: &FactoryContext, keys: &RepositoryKeys) -> Result<Rc<dyn Repository>> {
    let repository: Rc<dyn Repository> = Rc::new(VirtualsRepository::from_keys(ctx, keys)?);
    Ok(repository)
}

impl RepositoryFactory {
    /// A factory with no formats.
    pub fn empty() -> Self {
        RepositoryFactory {
            constructors: HashMap::new(),
        }
    }

    /// Register or replace the constructor for `format`.
    pub fn register(&mut self, format: &str, constructor: Constructor) {
        self.constructors.insert(format.to_string(), constructor);
    }

    /// Known format names, sorted.
    pub fn formats(&self) -> Vec<&str> {
        let mut formats: Vec<&str> = self.constructors.keys().map(String::as_str).collect();
        formats.sort_unstable();
        formats
    }

    /// Build a repository of `format`.
    pub fn create(
        &self,
        format: &str,
        ctx: &FactoryContext,
        keys: &RepositoryKeys,
        missing: MissingFormat,
    ) -> Result<Option<Rc<dyn Repository>>> {
        match self.constructors.get(format) {
            Some(constructor) => constructor(ctx, keys).map(Some),
            None => match missing {
                MissingFormat::Error => Err(Error::UnknownFormat(format.to_string())),
                MissingFormat::Ignore => Ok(None),
            },
        }
    }

    /// Build a repository from `keys` (its `format` key, `ebuild` if unset)
    /// and add it to the context's registry with its `importance` key.
    pub fn add_to_registry(&self, ctx: &FactoryContext, keys: &RepositoryKeys) -> Result<Rc<dyn Repository>> {
        let format = keys.get("format").unwrap_or("ebuild");
        let importance = match keys.get("importance") {
            Some(i) => i.parse::<i32>().map_err(|e| {
                Error::Configuration(format!("importance '{i}' is not an integer: {e}"))
            })?,
            None => 0,
        };
        let registry = ctx
            .registry
            .upgrade()
            .ok_or_else(|| Error::Configuration("repository registry is no longer available".to_string()))?;
        let repository = self
            .create(format, ctx, keys, MissingFormat::Error)?
            .ok_or_else(|| Error::UnknownFormat(format.to_string()))?;
        registry.add(importance, Rc::clone(&repository))?;
        Ok(repository)
    }
}
