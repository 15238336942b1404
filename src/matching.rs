//! Package dep-spec matching against a concrete (name, version, repository).
//!
//! [PMS 8.3.1](https://projects.gentoo.org/pms/9/pms.html#operators)
//! operators are evaluated with [`VersionSpec::cmp_pms`], the ordering
//! repositories sort their versions by.

use std::cmp::Ordering;

use portage_atom::{Dep, Operator, Slot, SlotDep, Version};

use crate::error::Result;
use crate::name::QualifiedPackageName;
use crate::version::VersionSpec;

/// Whether `candidate` satisfies the dep-spec constraint `constraint`.
///
/// A constraint without an operator means `=`. `=` with a glob
/// (`=cat/pkg-1.2*`) matches any version whose text starts with the
/// constraint's. `~` ignores the revision. An unusable constraint matches
/// nothing.
pub fn version_matches(candidate: &VersionSpec, constraint: &Version) -> bool {
    let Ok(wanted) = VersionSpec::from_constraint(constraint) else {
        return false;
    };
    let ord = candidate.cmp_pms(&wanted);
    match constraint.op.unwrap_or(Operator::Equal) {
        Operator::Equal if constraint.glob => candidate.as_str().starts_with(wanted.as_str()),
        Operator::Equal => ord == Ordering::Equal,
        Operator::Less => ord == Ordering::Less,
        Operator::LessOrEqual => ord != Ordering::Greater,
        Operator::GreaterOrEqual => ord != Ordering::Less,
        Operator::Greater => ord == Ordering::Greater,
        Operator::Approximate => candidate.cmp_base(&wanted) == Ordering::Equal,
    }
}

/// The qualified package name a dep-spec refers to.
pub fn dep_package(dep: &Dep) -> Result<QualifiedPackageName> {
    dep.cpn.to_string().parse()
}

/// Whether `dep` names a slot, so matching it needs the candidate's metadata.
pub fn needs_slot(dep: &Dep) -> bool {
    matches!(&dep.slot_dep, Some(SlotDep::Slot { slot: Some(_), .. }))
}

/// The standard package-match predicate.
///
/// Blockers never match. USE dependencies are not evaluated. `slot` is only
/// called when the dep-spec restricts the slot.
///
/// # Examples
///
/// ```
/// use portage_atom::Dep;
/// use portage_repository::matching::match_package;
/// use portage_repository::VersionSpec;
///
/// let dep = Dep::parse(">=dev-lang/rust-1.70").unwrap();
/// let name = "dev-lang/rust".parse().unwrap();
/// let version = VersionSpec::parse("1.75.0").unwrap();
/// assert!(match_package(&dep, &name, &version, "gentoo", || None));
/// ```
pub fn match_package(
    dep: &Dep,
    name: &QualifiedPackageName,
    version: &VersionSpec,
    repository: &str,
    slot: impl FnOnce() -> Option<Slot>,
) -> bool {
    if dep.blocker.is_some() {
        return false;
    }
    if dep.cpn.to_string() != name.to_string() {
        return false;
    }
    if let Some(constraint) = &dep.version {
        if !version_matches(version, constraint) {
            return false;
        }
    }
    if let Some(wanted) = &dep.repo {
        if wanted != repository {
            return false;
        }
    }
    if let Some(SlotDep::Slot {
        slot: Some(wanted), ..
    }) = &dep.slot_dep
    {
        let Some(actual) = slot() else {
            return false;
        };
        if actual.slot != wanted.slot {
            return false;
        }
        if wanted.subslot.is_some() && actual.subslot != wanted.subslot {
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> VersionSpec {
        VersionSpec::parse(s).unwrap()
    }

    fn c(op: Operator, s: &str) -> Version {
        let mut version = Version::parse(s).unwrap();
        version.op = Some(op);
        version
    }

    fn matches(dep: &str, name: &str, version: &str) -> bool {
        let dep = Dep::parse(dep).unwrap();
        let name = name.parse().unwrap();
        let version = VersionSpec::parse(version).unwrap();
        match_package(&dep, &name, &version, "gentoo", || Some(Slot::new("0")))
    }

    #[test]
    fn operators() {
        assert!(version_matches(&v("1.2.3"), &c(Operator::Less, "1.2.4")));
        assert!(!version_matches(&v("1.2.3"), &c(Operator::Less, "1.2.3")));
        assert!(version_matches(&v("1.2.3"), &c(Operator::LessOrEqual, "1.2.3")));
        assert!(version_matches(&v("1.2.3"), &c(Operator::Equal, "1.2.3")));
        assert!(!version_matches(&v("1.2.3-r1"), &c(Operator::Equal, "1.2.3")));
        assert!(version_matches(&v("2"), &c(Operator::GreaterOrEqual, "1.9")));
        assert!(!version_matches(&v("1.9"), &c(Operator::Greater, "1.9")));
        assert!(version_matches(&v("1.2.3-r5"), &c(Operator::Approximate, "1.2.3")));
        assert!(!version_matches(&v("1.2.4"), &c(Operator::Approximate, "1.2.3")));
        assert!(version_matches(&v("1.2.3"), &Version::parse("1.2.3").unwrap()));
    }

    #[test]
    fn operators_follow_repository_ordering() {
        assert!(!version_matches(&v("1"), &c(Operator::Equal, "1.0")));
        assert!(version_matches(&v("1"), &c(Operator::Less, "1.0")));
        assert!(version_matches(&v("1.0"), &c(Operator::Greater, "1")));
        assert!(version_matches(&v("1.01"), &c(Operator::Less, "1.1")));
        assert!(version_matches(&v("1-r0"), &c(Operator::Equal, "1")));
        assert!(!version_matches(&v("1"), &c(Operator::Less, "1-r0")));
    }

    #[test]
    fn unversioned() {
        assert!(matches("cat1/pkg1", "cat1/pkg1", "1"));
        assert!(!matches("cat1/pkg1", "cat1/pkg2", "1"));
        assert!(!matches("cat1/pkg1", "cat2/pkg1", "1"));
    }

    #[test]
    fn versioned() {
        assert!(matches("=cat1/pkg1-1", "cat1/pkg1", "1"));
        assert!(!matches("=cat1/pkg1-1", "cat1/pkg1", "1.1"));
        assert!(matches(">=cat1/pkg1-1", "cat1/pkg1", "1.1"));
        assert!(matches("<cat1/pkg1-2", "cat1/pkg1", "1.1"));
        assert!(matches("~cat1/pkg1-1", "cat1/pkg1", "1-r3"));
        assert!(matches("=cat1/pkg1-1*", "cat1/pkg1", "1.5"));
        assert!(matches("=cat1/pkg1-1.2*", "cat1/pkg1", "1.2.3"));
        assert!(!matches("=cat1/pkg1-1.2*", "cat1/pkg1", "1.3"));
    }

    #[test]
    fn slot_and_repository() {
        assert!(matches("cat1/pkg1:0", "cat1/pkg1", "1"));
        assert!(!matches("cat1/pkg1:2", "cat1/pkg1", "1"));
        assert!(matches("cat1/pkg1::gentoo", "cat1/pkg1", "1"));
        assert!(!matches("cat1/pkg1::overlay", "cat1/pkg1", "1"));
    }

    #[test]
    fn slot_is_lazy() {
        let dep = Dep::parse(">=cat1/pkg1-1").unwrap();
        assert!(!needs_slot(&dep));
        let name = "cat1/pkg1".parse().unwrap();
        let version = VersionSpec::parse("1").unwrap();
        assert!(match_package(&dep, &name, &version, "gentoo", || {
            panic!("slot requested for a slotless dep")
        }));
        assert!(needs_slot(&Dep::parse("cat1/pkg1:3").unwrap()));
    }

    #[test]
    fn blockers_never_match() {
        assert!(!matches("!cat1/pkg1", "cat1/pkg1", "1"));
    }

    #[test]
    fn dep_package_name() {
        let dep = Dep::parse(">=dev-lang/rust-1.70:stable").unwrap();
        assert_eq!(dep_package(&dep).unwrap().to_string(), "dev-lang/rust");
    }
}
