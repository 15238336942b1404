use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use portage_atom::Version;
use winnow::ascii::{digit0, digit1};
use winnow::combinator::{alt, opt, preceded, repeat, separated};
use winnow::prelude::*;
use winnow::token::one_of;

use crate::error::{Error, Result};

/// Version suffix kinds, in ascending order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
enum SuffixKind {
    Alpha,
    Beta,
    Pre,
    Rc,
    P,
}

#[derive(Debug, Clone)]
struct Suffix {
    kind: SuffixKind,
    number: String,
}

/// A package version, totally ordered according to PMS rules.
///
/// The version keeps the exact text it was parsed from: `0.04` stays
/// `0.04`, so paths rebuilt from it name the file that was scanned.
/// Equality and hashing use that text, ordering follows
/// [PMS algorithm 3.1](https://projects.gentoo.org/pms/9/pms.html#version-comparison)
/// with the text as the final tie-break, so `1` and `1.0` are distinct and
/// `1 < 1.0`.
#[derive(Debug, Clone)]
pub struct VersionSpec {
    text: String,
    numbers: Vec<String>,
    letter: Option<char>,
    suffixes: Vec<Suffix>,
    revision: String,
}

impl VersionSpec {
    /// Parse a bare version string.
    ///
    /// Operators and glob suffixes belong to dep-specs, not to versions, and
    /// are rejected.
    ///
    /// # Examples
    ///
    /// ```
    /// use portage_repository::VersionSpec;
    ///
    /// let a = VersionSpec::parse("1.2_rc1").unwrap();
    /// let b = VersionSpec::parse("1.2").unwrap();
    /// let c = VersionSpec::parse("1.2-r1").unwrap();
    /// assert!(a < b);
    /// assert!(b < c);
    /// assert_eq!(VersionSpec::parse("0.04").unwrap().to_string(), "0.04");
    /// ```
    pub fn parse(input: &str) -> Result<Self> {
        version
            .parse(input)
            .map(|(numbers, letter, suffixes, revision)| VersionSpec {
                text: input.to_string(),
                numbers,
                letter,
                suffixes,
                revision,
            })
            .map_err(|_| Error::InvalidVersion(input.to_string()))
    }

    /// The version a dep-spec constraint names, without operator or glob.
    pub fn from_constraint(constraint: &Version) -> Result<Self> {
        let mut bare = constraint.clone();
        bare.op = None;
        bare.glob = false;
        VersionSpec::parse(&bare.to_string())
    }

    /// The version text.
    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Compare ignoring the revision, as the `~` operator does.
    pub fn cmp_base(&self, other: &Self) -> Ordering {
        self.cmp_components(other)
    }

    fn cmp_components(&self, other: &Self) -> Ordering {
        compare_numbers(&self.numbers, &other.numbers)
            .then_with(|| self.letter.cmp(&other.letter))
            .then_with(|| compare_suffixes(&self.suffixes, &other.suffixes))
    }

    /// PMS ordering alone. Unlike [`Ord`], distinct texts may compare
    /// equal here (`1-r0` and `1`), as dep-spec operators require.
    pub fn cmp_pms(&self, other: &Self) -> Ordering {
        self.cmp_components(other)
            .then_with(|| compare_integers(&self.revision, &other.revision))
    }
}

/// Compare two digit strings as integers of any length.
fn compare_integers(a: &str, b: &str) -> Ordering {
    let a = a.trim_start_matches('0');
    let b = b.trim_start_matches('0');
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}

fn compare_numbers(a: &[String], b: &[String]) -> Ordering {
    let (Some(a0), Some(b0)) = (a.first(), b.first()) else {
        return a.len().cmp(&b.len());
    };
    let first = compare_integers(a0, b0);
    if first != Ordering::Equal {
        return first;
    }
    for (x, y) in a.iter().zip(b).skip(1) {
        let ord = if x.starts_with('0') || y.starts_with('0') {
            x.trim_end_matches('0').cmp(y.trim_end_matches('0'))
        } else {
            compare_integers(x, y)
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    a.len().cmp(&b.len())
}

fn compare_suffixes(a: &[Suffix], b: &[Suffix]) -> Ordering {
    for (x, y) in a.iter().zip(b) {
        let ord = x
            .kind
            .cmp(&y.kind)
            .then_with(|| compare_integers(&x.number, &y.number));
        if ord != Ordering::Equal {
            return ord;
        }
    }
    // An extra `_p` sorts above, any other extra suffix below.
    match (a.get(b.len()), b.get(a.len())) {
        (Some(extra), _) if extra.kind == SuffixKind::P => Ordering::Greater,
        (Some(_), _) => Ordering::Less,
        (_, Some(extra)) if extra.kind == SuffixKind::P => Ordering::Less,
        (_, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

// Winnow parsers

type Parts = (Vec<String>, Option<char>, Vec<Suffix>, String);

fn suffix(input: &mut &str) -> ModalResult<Suffix> {
    preceded(
        '_',
        (
            alt((
                "alpha".value(SuffixKind::Alpha),
                "beta".value(SuffixKind::Beta),
                "pre".value(SuffixKind::Pre),
                "rc".value(SuffixKind::Rc),
                "p".value(SuffixKind::P),
            )),
            digit0,
        ),
    )
    .map(|(kind, number): (SuffixKind, &str)| Suffix {
        kind,
        number: number.to_string(),
    })
    .parse_next(input)
}

fn version(input: &mut &str) -> ModalResult<Parts> {
    (
        separated(1.., digit1.map(str::to_string), '.'),
        opt(one_of('a'..='z')),
        repeat(0.., suffix),
        opt(preceded("-r", digit1)).map(|r: Option<&str>| r.unwrap_or("").to_string()),
    )
        .parse_next(input)
}

impl PartialEq for VersionSpec {
    fn eq(&self, other: &Self) -> bool {
        self.text == other.text
    }
}

impl Eq for VersionSpec {}

impl Hash for VersionSpec {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.text.hash(state);
    }
}

impl PartialOrd for VersionSpec {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for VersionSpec {
    fn cmp(&self, other: &Self) -> Ordering {
        self.cmp_pms(other).then_with(|| self.text.cmp(&other.text))
    }
}

impl FromStr for VersionSpec {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        VersionSpec::parse(s)
    }
}

impl fmt::Display for VersionSpec {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> VersionSpec {
        VersionSpec::parse(s).unwrap()
    }

    #[test]
    fn ordering() {
        assert!(v("1") < v("1.1"));
        assert!(v("1.1") < v("1.10"));
        assert!(v("1.0_alpha") < v("1.0_beta"));
        assert!(v("1.0_rc1") < v("1.0"));
        assert!(v("1.0") < v("1.0_p1"));
        assert!(v("1.0") < v("1.0-r1"));
        assert!(v("1.0a") < v("1.0b"));
        assert!(v("1.0_alpha") < v("1.0_alpha_p"));
        assert!(v("99999999999999999999") < v("100000000000000000000"));
    }

    #[test]
    fn more_components_is_greater() {
        assert!(v("1") < v("1.0"));
        assert!(v("1.0") < v("1.0.0"));
        assert_ne!(v("1"), v("1.0"));
    }

    #[test]
    fn leading_zeros_compare_as_strings() {
        assert!(v("1.01") < v("1.1"));
        assert!(v("1.0.04") < v("1.0.4"));
        assert!(v("0.04") < v("0.4"));
        assert!(v("1.010") > v("1.01"));
        assert_eq!(v("01").cmp_pms(&v("1")), Ordering::Equal);
    }

    #[test]
    fn ties_break_on_text() {
        assert_eq!(v("1-r0").cmp_pms(&v("1")), Ordering::Equal);
        assert_ne!(v("1-r0").cmp(&v("1")), Ordering::Equal);
        assert_ne!(v("1_p").cmp(&v("1_p0")), Ordering::Equal);
    }

    #[test]
    fn equality_is_structural() {
        assert_eq!(v("1.2.3"), v("1.2.3"));
        assert_ne!(v("1.2.3"), v("1.2.3-r1"));
    }

    #[test]
    fn display_keeps_text() {
        assert_eq!(v("1.2.3-r1").to_string(), "1.2.3-r1");
        assert_eq!(v("2").to_string(), "2");
        assert_eq!(v("0.04").to_string(), "0.04");
        assert_eq!(v("1.0_p").as_str(), "1.0_p");
    }

    #[test]
    fn base_comparison() {
        assert_eq!(v("1.2-r3").cmp_base(&v("1.2")), Ordering::Equal);
        assert_ne!(v("1.2.1").cmp_base(&v("1.2")), Ordering::Equal);
    }

    #[test]
    fn from_dep_constraint() {
        let constraint = Version::parse("1.2-r1*").unwrap();
        assert_eq!(VersionSpec::from_constraint(&constraint).unwrap(), v("1.2-r1"));
    }

    #[test]
    fn invalid() {
        for s in ["", "abc", "1.0-x", "1.2*", ">=1", "1..2", "1.0_", "1.0-r", "1.0ab"] {
            assert!(
                matches!(VersionSpec::parse(s), Err(Error::InvalidVersion(_))),
                "{s:?} parsed"
            );
        }
    }

    #[test]
    fn sorts_in_sets() {
        let set: std::collections::BTreeSet<VersionSpec> = ["1.10", "1.2", "1.9_rc1", "1.9", "1", "1.0"]
            .iter()
            .map(|s| v(s))
            .collect();
        let sorted: Vec<String> = set.iter().map(|v| v.to_string()).collect();
        assert_eq!(sorted, ["1", "1.0", "1.2", "1.9_rc1", "1.9", "1.10"]);
    }
}
