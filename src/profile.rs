//! Profiles and the profile directory chain of a source repository.
//!
//! A repository's profile data comes from an ordered list of `profiles/`
//! directories: the master repository's first, then its own. Those
//! directories hold the catalog (`profiles.desc`), repository-wide masks,
//! `arch.list` and `thirdpartymirrors`. A selected [`Profile`] adds
//! `make.defaults` variables, USE masking and forcing, profile masks and
//! virtuals.

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::rc::Rc;

use indexmap::IndexSet;
use once_cell::unsync::OnceCell;
use portage_atom::{Dep, Slot};
use rand::seq::SliceRandom;
use tracing::{debug, warn};

use crate::config::{expand_variables, read_key_value_file, read_line_file};
use crate::error::{Error, Result};
use crate::matching::{dep_package, match_package};
use crate::name::{QualifiedPackageName, UseFlagName};
use crate::version::VersionSpec;

/// Most URLs kept per third-party mirror.
pub const MIRROR_LIMIT: usize = 6;

/// `make.defaults` variables that accumulate across the profile stack.
const INCREMENTALS: &[&str] = &["USE", "USE_EXPAND", "USE_EXPAND_HIDDEN"];

/// Guards against runaway `parent` chains.
const MAX_PARENT_DEPTH: usize = 32;

/// Package masks keyed by the package they restrict.
type MaskMap = HashMap<QualifiedPackageName, Vec<Dep>>;

/// A loaded profile: the merged view of a directory and all its parents.
#[derive(Debug, Clone, Default)]
pub struct Profile {
    dirs: Vec<PathBuf>,
    variables: HashMap<String, String>,
    incrementals: HashMap<String, IndexSet<String>>,
    use_mask: BTreeSet<UseFlagName>,
    use_force: BTreeSet<UseFlagName>,
    masks: HashMap<QualifiedPackageName, Vec<(String, Dep)>>,
    virtuals: BTreeMap<QualifiedPackageName, Dep>,
}

impl Profile {
    /// Load the profile stacked from `dirs`, each expanded through its
    /// `parent` files. Later directories override earlier ones.
    pub fn load(dirs: &[PathBuf]) -> Result<Self> {
        let mut stacked = Vec::new();
        let mut seen = HashSet::new();
        for dir in dirs {
            stack(dir, &mut stacked, &mut seen, 0)?;
        }
        debug!("loading profile from {} directories", stacked.len());

        let mut profile = Profile {
            dirs: stacked.clone(),
            ..Profile::default()
        };
        for dir in &stacked {
            profile.load_make_defaults(dir)?;
            load_flag_file(&dir.join("use.mask"), &mut profile.use_mask)?;
            load_flag_file(&dir.join("use.force"), &mut profile.use_force)?;
            profile.load_package_mask(dir)?;
            profile.load_virtuals(dir)?;
        }
        Ok(profile)
    }

    /// Directories this profile was built from, parents first.
    pub fn dirs(&self) -> &[PathBuf] {
        &self.dirs
    }

    fn load_make_defaults(&mut self, dir: &Path) -> Result<()> {
        let Some(assignments) = read_key_value_file(&dir.join("make.defaults"))? else {
            return Ok(());
        };
        for (key, value) in assignments {
            let value = expand_variables(&value, &self.variables);
            if INCREMENTALS.contains(&key.as_str()) {
                let set = self.incrementals.entry(key.clone()).or_default();
                for token in value.split_whitespace() {
                    if token == "-*" {
                        set.clear();
                    } else if let Some(removed) = token.strip_prefix('-') {
                        set.shift_remove(removed);
                    } else {
                        set.insert(token.to_string());
                    }
                }
                let joined = set.iter().cloned().collect::<Vec<_>>().join(" ");
                self.variables.insert(key, joined);
            } else {
                self.variables.insert(key, value);
            }
        }
        Ok(())
    }

    fn load_package_mask(&mut self, dir: &Path) -> Result<()> {
        let path = dir.join("package.mask");
        let Some(lines) = read_line_file(&path)? else {
            return Ok(());
        };
        for line in lines {
            if let Some(unmasked) = line.strip_prefix('-') {
                for deps in self.masks.values_mut() {
                    deps.retain(|(text, _)| text != unmasked);
                }
                continue;
            }
            match parse_mask(&line) {
                Ok((name, dep)) => self.masks.entry(name).or_default().push((line, dep)),
                Err(e) => warn!("{e}: {path:?}"),
            }
        }
        Ok(())
    }

    fn load_virtuals(&mut self, dir: &Path) -> Result<()> {
        let path = dir.join("virtuals");
        let Some(lines) = read_line_file(&path)? else {
            return Ok(());
        };
        for line in lines {
            let mut tokens = line.split_whitespace();
            let (Some(virt), Some(provider)) = (tokens.next(), tokens.next()) else {
                warn!("malformed virtuals line '{line}': {path:?}");
                continue;
            };
            let parsed = virt.parse::<QualifiedPackageName>().and_then(|v| {
                Dep::parse(provider)
                    .map(|d| (v, d))
                    .map_err(|e| Error::DepError(format!("{provider}: {e}")))
            });
            match parsed {
                Ok((v, d)) => {
                    self.virtuals.insert(v, d);
                }
                Err(e) => warn!("{e}: {path:?}"),
            }
        }
        Ok(())
    }

    /// A `make.defaults` variable, or the empty string.
    pub fn environment_variable(&self, name: &str) -> &str {
        self.variables.get(name).map(String::as_str).unwrap_or("")
    }

    /// The profile's `ARCH`, if set.
    pub fn arch(&self) -> Option<&str> {
        self.variables
            .get("ARCH")
            .map(String::as_str)
            .filter(|a| !a.is_empty())
    }

    /// Values of an incremental variable, in the order they were enabled.
    pub fn incremental(&self, name: &str) -> Vec<&str> {
        self.incrementals
            .get(name)
            .map(|set| set.iter().map(String::as_str).collect())
            .unwrap_or_default()
    }

    /// Whether `flag` is in the profile's USE, or is its arch.
    pub fn use_enabled(&self, flag: &UseFlagName) -> bool {
        self.incrementals
            .get("USE")
            .is_some_and(|set| set.contains(flag.as_str()))
            || self.arch() == Some(flag.as_str())
    }

    /// Whether `use.mask` masks `flag`.
    pub fn use_masked(&self, flag: &UseFlagName) -> bool {
        self.use_mask.contains(flag)
    }

    /// Whether `use.force` forces `flag`.
    pub fn use_forced(&self, flag: &UseFlagName) -> bool {
        self.use_force.contains(flag)
    }

    /// Whether the profile's `package.mask` masks `name-version`.
    pub fn profile_masked(
        &self,
        name: &QualifiedPackageName,
        version: &VersionSpec,
        repository: &str,
        slot: impl Fn() -> Option<Slot>,
    ) -> bool {
        self.masks.get(name).is_some_and(|deps| {
            deps.iter()
                .any(|(_, dep)| match_package(dep, name, version, repository, &slot))
        })
    }

    /// Virtual name → default provider, as declared by `virtuals` files.
    pub fn virtuals(&self) -> &BTreeMap<QualifiedPackageName, Dep> {
        &self.virtuals
    }
}

fn stack(dir: &Path, out: &mut Vec<PathBuf>, seen: &mut HashSet<PathBuf>, depth: usize) -> Result<()> {
    if depth > MAX_PARENT_DEPTH {
        return Err(Error::Configuration(format!(
            "{}: profile parents nested too deeply",
            dir.display()
        )));
    }
    if !seen.insert(dir.to_path_buf()) {
        return Ok(());
    }
    if !dir.is_dir() {
        return Err(Error::Configuration(format!(
            "{}: profile directory does not exist",
            dir.display()
        )));
    }
    if let Some(parents) = read_line_file(&dir.join("parent"))? {
        for parent in parents {
            stack(&dir.join(parent), out, seen, depth + 1)?;
        }
    }
    out.push(dir.to_path_buf());
    Ok(())
}

fn load_flag_file(path: &Path, flags: &mut BTreeSet<UseFlagName>) -> Result<()> {
    let Some(lines) = read_line_file(path)? else {
        return Ok(());
    };
    for line in lines {
        let (remove, name) = match line.strip_prefix('-') {
            Some(name) => (true, name),
            None => (false, line.as_str()),
        };
        match UseFlagName::new(name) {
            Ok(flag) if remove => {
                flags.remove(&flag);
            }
            Ok(flag) => {
                flags.insert(flag);
            }
            Err(e) => warn!("{e}: {path:?}"),
        }
    }
    Ok(())
}

/// A mask line must be a non-blocker naming exactly one package.
fn parse_mask(line: &str) -> Result<(QualifiedPackageName, Dep)> {
    let dep = Dep::parse(line).map_err(|e| Error::DepError(format!("{line}: {e}")))?;
    if dep.blocker.is_some() {
        return Err(Error::DepError(format!(
            "{line}: does not restrict to a unique package"
        )));
    }
    Ok((dep_package(&dep)?, dep))
}

/// One line of `profiles.desc`.
#[derive(Debug, Clone)]
pub struct ProfileDescriptor {
    /// Arch keyword, e.g. `amd64`.
    pub arch: String,
    /// Absolute profile directory.
    pub path: PathBuf,
    /// `stable`, `dev`, `exp`, ...
    pub status: String,
    profile: OnceCell<Rc<Profile>>,
}

impl ProfileDescriptor {
    /// A descriptor whose profile is loaded on first use.
    pub fn new(arch: &str, path: PathBuf, status: &str) -> Self {
        ProfileDescriptor {
            arch: arch.to_string(),
            path,
            status: status.to_string(),
            profile: OnceCell::new(),
        }
    }

    /// The profile this line points at.
    pub fn profile(&self) -> Result<Rc<Profile>> {
        self.profile
            .get_or_try_init(|| Profile::load(std::slice::from_ref(&self.path)).map(Rc::new))
            .cloned()
    }
}

#[derive(Debug, Default)]
struct ChainState {
    profiles_desc: Option<Rc<Vec<ProfileDescriptor>>>,
    selected: Option<Rc<Profile>>,
    repository_masks: Option<Rc<MaskMap>>,
    arch_flags: Option<Rc<IndexSet<UseFlagName>>>,
    mirrors: Option<Rc<HashMap<String, Vec<String>>>>,
}

/// Masking, arch, mirror and profile data for one source repository.
///
/// Everything is read lazily and kept until
/// [`invalidate`](ProfileChain::invalidate), which also forgets the selected
/// profile.
#[derive(Debug)]
pub struct ProfileChain {
    repo_name: String,
    profiles_dirs: Vec<PathBuf>,
    configured: Vec<PathBuf>,
    state: RefCell<ChainState>,
}

impl ProfileChain {
    /// `profiles_dirs` are the `profiles/` directories, master first.
    /// `configured` is the default profile stack, used until another
    /// profile is selected.
    pub fn new(repo_name: &str, profiles_dirs: Vec<PathBuf>, configured: Vec<PathBuf>) -> Self {
        ProfileChain {
            repo_name: repo_name.to_string(),
            profiles_dirs,
            configured,
            state: RefCell::new(ChainState::default()),
        }
    }

    /// The `profiles/` directories, master first.
    pub fn profiles_dirs(&self) -> &[PathBuf] {
        &self.profiles_dirs
    }

    /// The `profiles.desc` catalog, master entries first.
    ///
    /// Fails with [`Error::Configuration`] if no directory has one.
    pub fn profiles_desc(&self) -> Result<Rc<Vec<ProfileDescriptor>>> {
        if let Some(desc) = &self.state.borrow().profiles_desc {
            return Ok(Rc::clone(desc));
        }

        let mut found = false;
        let mut descriptors = Vec::new();
        for dir in &self.profiles_dirs {
            let Some(lines) = read_line_file(&dir.join("profiles.desc"))? else {
                continue;
            };
            found = true;
            for line in lines {
                let tokens: Vec<&str> = line.split_whitespace().collect();
                if tokens.len() < 3 {
                    continue;
                }
                descriptors.push(ProfileDescriptor::new(tokens[0], dir.join(tokens[1]), tokens[2]));
            }
        }
        if !found {
            return Err(Error::Configuration(format!(
                "no profiles.desc found for repository '{}'",
                self.repo_name
            )));
        }

        let descriptors = Rc::new(descriptors);
        self.state.borrow_mut().profiles_desc = Some(Rc::clone(&descriptors));
        Ok(descriptors)
    }

    /// The selected profile, or the configured default stack.
    pub fn profile(&self) -> Result<Rc<Profile>> {
        if let Some(profile) = &self.state.borrow().selected {
            return Ok(Rc::clone(profile));
        }
        let profile = Rc::new(Profile::load(&self.configured)?);
        self.state.borrow_mut().selected = Some(Rc::clone(&profile));
        Ok(profile)
    }

    /// Make `descriptor`'s profile the active one.
    pub fn set_profile(&self, descriptor: &ProfileDescriptor) -> Result<()> {
        debug!(
            "{}: selecting profile {:?} ({})",
            self.repo_name, descriptor.path, descriptor.arch
        );
        let profile = descriptor.profile()?;
        self.state.borrow_mut().selected = Some(profile);
        Ok(())
    }

    /// Select a profile for `arch`, preferring one marked `stable`.
    ///
    /// Returns the chosen descriptor. Fails with [`Error::Configuration`]
    /// if the catalog has no profile for `arch`.
    pub fn set_profile_by_arch(&self, arch: &str) -> Result<ProfileDescriptor> {
        let desc = self.profiles_desc()?;
        let chosen = desc
            .iter()
            .find(|d| d.arch == arch && d.status == "stable")
            .or_else(|| desc.iter().find(|d| d.arch == arch))
            .ok_or_else(|| {
                Error::Configuration(format!("cannot find a profile appropriate for '{arch}'"))
            })?;
        self.set_profile(chosen)?;
        Ok(chosen.clone())
    }

    /// Whether a repository-wide `package.mask` masks `name-version`.
    pub fn repository_masked(
        &self,
        name: &QualifiedPackageName,
        version: &VersionSpec,
        slot: impl Fn() -> Option<Slot>,
    ) -> Result<bool> {
        let masks = self.repository_masks()?;
        Ok(masks.get(name).is_some_and(|deps| {
            deps.iter()
                .any(|dep| match_package(dep, name, version, &self.repo_name, &slot))
        }))
    }

    fn repository_masks(&self) -> Result<Rc<MaskMap>> {
        if let Some(masks) = &self.state.borrow().repository_masks {
            return Ok(Rc::clone(masks));
        }
        let mut masks = MaskMap::new();
        for dir in &self.profiles_dirs {
            let path = dir.join("package.mask");
            let Some(lines) = read_line_file(&path)? else {
                continue;
            };
            for line in lines {
                match parse_mask(&line) {
                    Ok((name, dep)) => masks.entry(name).or_default().push(dep),
                    Err(e) => warn!("{e}: {path:?}"),
                }
            }
        }
        let masks = Rc::new(masks);
        self.state.borrow_mut().repository_masks = Some(Rc::clone(&masks));
        Ok(masks)
    }

    /// Whether the selected profile masks `name-version`.
    pub fn profile_masked(
        &self,
        name: &QualifiedPackageName,
        version: &VersionSpec,
        slot: impl Fn() -> Option<Slot>,
    ) -> Result<bool> {
        Ok(self
            .profile()?
            .profile_masked(name, version, &self.repo_name, slot))
    }

    /// Union of `arch.list` over the profile directories.
    pub fn arch_flags(&self) -> Result<Rc<IndexSet<UseFlagName>>> {
        if let Some(flags) = &self.state.borrow().arch_flags {
            return Ok(Rc::clone(flags));
        }
        let mut flags = IndexSet::new();
        let mut found = false;
        for dir in &self.profiles_dirs {
            let path = dir.join("arch.list");
            let Some(lines) = read_line_file(&path)? else {
                continue;
            };
            found = true;
            for line in lines {
                match UseFlagName::new(&line) {
                    Ok(flag) => {
                        flags.insert(flag);
                    }
                    Err(e) => warn!("{e}: {path:?}"),
                }
            }
        }
        if !found {
            warn!(
                "{}: no arch.list found, arch flags may incorrectly show up as unmasked",
                self.repo_name
            );
        }
        let flags = Rc::new(flags);
        self.state.borrow_mut().arch_flags = Some(Rc::clone(&flags));
        Ok(flags)
    }

    /// Whether `flag` is masked: by `use.mask`, or as an arch flag other
    /// than the selected profile's arch.
    pub fn use_mask(&self, flag: &UseFlagName) -> Result<bool> {
        let profile = self.profile()?;
        if profile.use_masked(flag) {
            return Ok(true);
        }
        Ok(self.arch_flags()?.contains(flag) && !profile.use_enabled(flag))
    }

    /// Whether the selected profile forces `flag`.
    pub fn use_force(&self, flag: &UseFlagName) -> Result<bool> {
        Ok(self.profile()?.use_forced(flag))
    }

    /// Base URLs for third-party mirror `name`, at most [`MIRROR_LIMIT`],
    /// in random order.
    pub fn mirrors(&self, name: &str) -> Result<Vec<String>> {
        Ok(self.need_mirrors()?.get(name).cloned().unwrap_or_default())
    }

    /// Every declared mirror name.
    pub fn mirror_names(&self) -> Result<BTreeSet<String>> {
        Ok(self.need_mirrors()?.keys().cloned().collect())
    }

    fn need_mirrors(&self) -> Result<Rc<HashMap<String, Vec<String>>>> {
        if let Some(mirrors) = &self.state.borrow().mirrors {
            return Ok(Rc::clone(mirrors));
        }
        let mut mirrors: HashMap<String, Vec<String>> = HashMap::new();
        let mut found = false;
        for dir in &self.profiles_dirs {
            let Some(lines) = read_line_file(&dir.join("thirdpartymirrors"))? else {
                continue;
            };
            found = true;
            for line in lines {
                let mut tokens = line.split_whitespace();
                let Some(name) = tokens.next() else {
                    continue;
                };
                let mut urls: Vec<String> = tokens.map(str::to_string).collect();
                urls.shuffle(&mut rand::thread_rng());
                urls.truncate(MIRROR_LIMIT);
                mirrors.entry(name.to_string()).or_default().extend(urls);
            }
        }
        if !found {
            warn!("{}: no thirdpartymirrors found", self.repo_name);
        }
        for urls in mirrors.values_mut() {
            urls.truncate(MIRROR_LIMIT);
        }
        let mirrors = Rc::new(mirrors);
        self.state.borrow_mut().mirrors = Some(Rc::clone(&mirrors));
        Ok(mirrors)
    }

    /// A `make.defaults` variable of the selected profile.
    pub fn profile_variable(&self, name: &str) -> Result<String> {
        Ok(self.profile()?.environment_variable(name).to_string())
    }

    /// Flags produced by USE_EXPAND variables, e.g. `video_cards_radeon`.
    pub fn use_expand_flags(&self) -> Result<BTreeSet<UseFlagName>> {
        let profile = self.profile()?;
        let mut flags = BTreeSet::new();
        for var in profile.incremental("USE_EXPAND") {
            for value in profile.environment_variable(var).split_whitespace() {
                let flag = format!("{var}_{value}").to_lowercase();
                match UseFlagName::new(&flag) {
                    Ok(f) => {
                        flags.insert(f);
                    }
                    Err(e) => warn!("{}: {e}", self.repo_name),
                }
            }
        }
        Ok(flags)
    }

    /// Lowercased USE_EXPAND names.
    pub fn use_expand_prefixes(&self) -> Result<Vec<String>> {
        Ok(self
            .profile()?
            .incremental("USE_EXPAND")
            .iter()
            .map(|p| p.to_lowercase())
            .collect())
    }

    /// Lowercased USE_EXPAND_HIDDEN names.
    pub fn use_expand_hidden_prefixes(&self) -> Result<Vec<String>> {
        Ok(self
            .profile()?
            .incremental("USE_EXPAND_HIDDEN")
            .iter()
            .map(|p| p.to_lowercase())
            .collect())
    }

    /// The USE_EXPAND variable a flag belongs to, e.g. `VIDEO_CARDS` for
    /// `video_cards_radeon`.
    pub fn use_expand_name(&self, flag: &UseFlagName) -> Result<String> {
        Ok(self.split_use_expand(flag)?.0)
    }

    /// The value part of a USE_EXPAND flag, e.g. `radeon`.
    pub fn use_expand_value(&self, flag: &UseFlagName) -> Result<String> {
        Ok(self.split_use_expand(flag)?.1)
    }

    fn split_use_expand(&self, flag: &UseFlagName) -> Result<(String, String)> {
        let profile = self.profile()?;
        let lower = flag.as_str().to_lowercase();
        profile
            .incremental("USE_EXPAND")
            .into_iter()
            .find_map(|var| {
                let prefix = format!("{}_", var.to_lowercase());
                lower
                    .strip_prefix(&prefix)
                    .filter(|value| !value.is_empty())
                    .map(|value| (var.to_string(), value.to_string()))
            })
            .ok_or_else(|| Error::InvalidUseFlag(format!("{flag} is not a USE_EXPAND flag")))
    }

    /// Virtuals declared by the selected profile.
    pub fn virtuals(&self) -> Result<BTreeMap<QualifiedPackageName, Dep>> {
        Ok(self.profile()?.virtuals().clone())
    }

    /// Forget everything read so far, including the selected profile.
    pub fn invalidate(&self) {
        *self.state.borrow_mut() = ChainState::default();
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

    fn flag(s: &str) -> UseFlagName {
        UseFlagName::new(s).unwrap()
    }

    fn tree() -> TreeBuilder {
        let dir = TreeBuilder::new();
        dir.file(
            "profiles/profiles.desc",
            "# arch path status\namd64 default/amd64 dev\namd64 default/amd64/stable stable\nx86 default/x86 exp\nbroken line\n",
        )
        .file("profiles/arch.list", "amd64\nx86\n")
        .file(
            "profiles/base/make.defaults",
            "USE=\"foo bar\"\nUSE_EXPAND=\"VIDEO_CARDS\"\nUSE_EXPAND_HIDDEN=\"KERNEL\"\nVIDEO_CARDS=\"radeon intel\"\n",
        )
        .file("profiles/base/use.mask", "masked\nunmasked\n")
        .file("profiles/base/use.force", "forced\n")
        .file("profiles/base/virtuals", "virtual/editor app-editors/nano\n")
        .file("profiles/default/amd64/parent", "../../base\n")
        .file(
            "profiles/default/amd64/make.defaults",
            "ARCH=\"amd64\"\nUSE=\"-bar baz\"\n",
        )
        .file("profiles/default/amd64/use.mask", "-unmasked\n")
        .file("profiles/default/amd64/package.mask", "=cat1/pkg1-2\n")
        .file("profiles/default/amd64/stable/parent", "..\n")
        .file("profiles/default/x86/parent", "../../base\n")
        .file("profiles/default/x86/make.defaults", "ARCH=\"x86\"\n");
        dir
    }

    fn chain(dir: &TreeBuilder, configured: &str) -> ProfileChain {
        ProfileChain::new(
            "test",
            vec![dir.join("profiles")],
            vec![dir.join(configured)],
        )
    }

    #[test]
    fn profiles_desc_skips_short_lines() {
        let dir = tree();
        let chain = chain(&dir, "profiles/default/amd64");
        let desc = chain.profiles_desc().unwrap();
        assert_eq!(desc.len(), 3);
        assert_eq!(desc[1].status, "stable");
        assert_eq!(desc[2].path, dir.join("profiles/default/x86"));
    }

    #[test]
    fn missing_profiles_desc_is_fatal() {
        let dir = TreeBuilder::new();
        dir.dir("profiles");
        let chain = ProfileChain::new("test", vec![dir.join("profiles")], Vec::new());
        assert!(matches!(
            chain.profiles_desc(),
            Err(Error::Configuration(_))
        ));
    }

    #[test]
    fn profile_stacking() {
        let dir = tree();
        let chain = chain(&dir, "profiles/default/amd64");
        let profile = chain.profile().unwrap();
        assert_eq!(profile.dirs().len(), 2);
        assert_eq!(profile.arch(), Some("amd64"));
        assert_eq!(profile.environment_variable("USE"), "foo baz");
        assert!(profile.use_enabled(&flag("foo")));
        assert!(!profile.use_enabled(&flag("bar")));
        assert!(profile.use_enabled(&flag("amd64")));
        assert!(profile.use_masked(&flag("masked")));
        assert!(!profile.use_masked(&flag("unmasked")));
        assert_eq!(profile.virtuals().len(), 1);
    }

    #[test]
    fn use_mask_covers_other_arches() {
        let dir = tree();
        let chain = chain(&dir, "profiles/default/amd64");
        assert!(chain.use_mask(&flag("masked")).unwrap());
        assert!(chain.use_mask(&flag("x86")).unwrap());
        assert!(!chain.use_mask(&flag("amd64")).unwrap());
        assert!(!chain.use_mask(&flag("foo")).unwrap());
        assert!(chain.use_force(&flag("forced")).unwrap());
        assert!(!chain.use_force(&flag("foo")).unwrap());
    }

    #[test]
    fn set_profile_by_arch_prefers_stable() {
        let dir = tree();
        let chain = chain(&dir, "profiles/default/x86");
        let chosen = chain.set_profile_by_arch("amd64").unwrap();
        assert_eq!(chosen.path, dir.join("profiles/default/amd64/stable"));
        assert_eq!(chain.profile().unwrap().arch(), Some("amd64"));

        let chosen = chain.set_profile_by_arch("x86").unwrap();
        assert_eq!(chosen.status, "exp");
        assert!(matches!(
            chain.set_profile_by_arch("sparc"),
            Err(Error::Configuration(_))
        ));
    }

    #[test]
    #[traced_test]
    fn repository_masks() {
        let dir = tree();
        dir.file(
            "profiles/package.mask",
            "# masked for testing\n>=cat1/pkg1-2\ncat2/pkg2:3\n!cat3/pkg3\n",
        );
        let chain = chain(&dir, "profiles/default/amd64");
        assert!(chain.repository_masked(&q("cat1/pkg1"), &v("2.1"), || None).unwrap());
        assert!(!chain.repository_masked(&q("cat1/pkg1"), &v("1"), || None).unwrap());
        assert!(chain
            .repository_masked(&q("cat2/pkg2"), &v("1"), || Some(Slot::new("3")))
            .unwrap());
        assert!(!chain
            .repository_masked(&q("cat2/pkg2"), &v("1"), || Some(Slot::new("2")))
            .unwrap());
        assert!(!chain.repository_masked(&q("cat3/pkg3"), &v("1"), || None).unwrap());
        assert!(logs_contain("does not restrict to a unique package"));
    }

    #[test]
    fn master_masks_apply() {
        let master = tree();
        master.file("profiles/package.mask", "cat1/pkg1\n");
        let local = TreeBuilder::new();
        local.dir("profiles");
        let chain = ProfileChain::new(
            "local",
            vec![master.join("profiles"), local.join("profiles")],
            vec![master.join("profiles/default/amd64")],
        );
        assert!(chain.repository_masked(&q("cat1/pkg1"), &v("1"), || None).unwrap());
        assert!(chain.profile_masked(&q("cat1/pkg1"), &v("2"), || None).unwrap());
        assert!(!chain.profile_masked(&q("cat1/pkg1"), &v("1"), || None).unwrap());
    }

    #[test]
    #[traced_test]
    fn missing_arch_list_warns() {
        let dir = TreeBuilder::new();
        dir.dir("profiles/default");
        let chain = ProfileChain::new(
            "test",
            vec![dir.join("profiles")],
            vec![dir.join("profiles/default")],
        );
        assert!(chain.arch_flags().unwrap().is_empty());
        assert!(logs_contain("arch flags may incorrectly show up as unmasked"));
    }

    #[test]
    fn mirrors_are_capped() {
        let dir = tree();
        let urls: Vec<String> = (0..10).map(|i| format!("http://m{i}.example/")).collect();
        dir.file(
            "profiles/thirdpartymirrors",
            &format!("gnu {}\nsmall http://one.example/\n", urls.join(" ")),
        );
        let chain = chain(&dir, "profiles/default/amd64");
        let gnu = chain.mirrors("gnu").unwrap();
        assert_eq!(gnu.len(), MIRROR_LIMIT);
        assert!(gnu.iter().all(|u| urls.contains(u)));
        assert_eq!(chain.mirrors("small").unwrap(), ["http://one.example/"]);
        assert!(chain.mirrors("none").unwrap().is_empty());
        assert_eq!(chain.mirror_names().unwrap().len(), 2);
    }

    #[test]
    fn use_expand() {
        let dir = tree();
        let chain = chain(&dir, "profiles/default/amd64");
        let flags: Vec<String> = chain
            .use_expand_flags()
            .unwrap()
            .iter()
            .map(|f| f.to_string())
            .collect();
        assert_eq!(flags, ["video_cards_intel", "video_cards_radeon"]);
        assert_eq!(chain.use_expand_prefixes().unwrap(), ["video_cards"]);
        assert_eq!(chain.use_expand_hidden_prefixes().unwrap(), ["kernel"]);
        assert_eq!(
            chain.use_expand_name(&flag("video_cards_radeon")).unwrap(),
            "VIDEO_CARDS"
        );
        assert_eq!(
            chain.use_expand_value(&flag("video_cards_radeon")).unwrap(),
            "radeon"
        );
        assert!(matches!(
            chain.use_expand_name(&flag("foo")),
            Err(Error::InvalidUseFlag(_))
        ));
        assert_eq!(chain.profile_variable("VIDEO_CARDS").unwrap(), "radeon intel");
    }

    #[test]
    fn invalidate_forgets_selection() {
        let dir = tree();
        let chain = chain(&dir, "profiles/default/x86");
        chain.set_profile_by_arch("amd64").unwrap();
        chain.invalidate();
        assert_eq!(chain.profile().unwrap().arch(), Some("x86"));
    }
}
