use std::fmt;
use std::str::FromStr;

use winnow::combinator::{alt, opt};
use winnow::prelude::*;
use winnow::token::{one_of, take_while};

use crate::error::{Error, Result};

/// How a package version is keyworded on one architecture.
///
/// See [PMS 7.3.3](https://projects.gentoo.org/pms/9/pms.html#keywords).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stability {
    /// `amd64`
    Stable,
    /// `~amd64`
    Testing,
    /// `-amd64`
    Disabled,
    /// `-*`: every architecture not listed otherwise is disabled.
    DisabledAll,
}

/// One entry of `KEYWORDS`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Keyword {
    /// Architecture name, `*` for `-*`.
    pub arch: String,
    /// Stability on `arch`.
    pub stability: Stability,
}

impl Keyword {
    /// Parse a space-separated `KEYWORDS` value.
    ///
    /// # Examples
    ///
    /// ```
    /// use portage_repository::{Keyword, Stability};
    ///
    /// let kws = Keyword::parse_line("amd64 ~arm64 -x86 -*").unwrap();
    /// assert_eq!(kws.len(), 4);
    /// assert_eq!(kws[1].stability, Stability::Testing);
    /// assert_eq!(Keyword::stability_for(&kws, "arm64"), Some(Stability::Testing));
    /// assert_eq!(Keyword::stability_for(&kws, "sparc"), Some(Stability::DisabledAll));
    /// ```
    pub fn parse_line(input: &str) -> Result<Vec<Keyword>> {
        input
            .split_whitespace()
            .map(|token| token.parse())
            .collect()
    }

    /// The stability `keywords` give `arch`: its own keyword if listed,
    /// else [`Stability::DisabledAll`] under `-*`, else `None`.
    pub fn stability_for(keywords: &[Keyword], arch: &str) -> Option<Stability> {
        keywords
            .iter()
            .find(|k| k.stability != Stability::DisabledAll && k.arch == arch)
            .or_else(|| {
                keywords
                    .iter()
                    .find(|k| k.stability == Stability::DisabledAll)
            })
            .map(|k| k.stability)
    }
}

fn arch_name<'s>(input: &mut &'s str) -> ModalResult<&'s str> {
    (
        one_of(|c: char| c.is_ascii_alphanumeric() || c == '_'),
        take_while(0.., |c: char| c.is_ascii_alphanumeric() || c == '_' || c == '-'),
    )
        .take()
        .parse_next(input)
}

fn keyword(input: &mut &str) -> ModalResult<Keyword> {
    alt((
        "-*".map(|_| Keyword {
            arch: "*".to_string(),
            stability: Stability::DisabledAll,
        }),
        (opt(one_of(['~', '-'])), arch_name).map(|(prefix, arch)| Keyword {
            arch: arch.to_string(),
            stability: match prefix {
                Some('~') => Stability::Testing,
                Some(_) => Stability::Disabled,
                None => Stability::Stable,
            },
        }),
    ))
    .parse_next(input)
}

impl FromStr for Keyword {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        keyword
            .parse(s)
            .map_err(|_| Error::InvalidKeyword(s.to_string()))
    }
}

impl fmt::Display for Keyword {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.stability {
            Stability::Stable => write!(f, "{}", self.arch),
            Stability::Testing => write!(f, "~{}", self.arch),
            Stability::Disabled => write!(f, "-{}", self.arch),
            Stability::DisabledAll => write!(f, "-*"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_prefixes() {
        let kw: Keyword = "amd64".parse().unwrap();
        assert_eq!(kw.stability, Stability::Stable);
        let kw: Keyword = "~arm64".parse().unwrap();
        assert_eq!((kw.arch.as_str(), kw.stability), ("arm64", Stability::Testing));
        let kw: Keyword = "-x86".parse().unwrap();
        assert_eq!((kw.arch.as_str(), kw.stability), ("x86", Stability::Disabled));
        let kw: Keyword = "-*".parse().unwrap();
        assert_eq!((kw.arch.as_str(), kw.stability), ("*", Stability::DisabledAll));
        let kw: Keyword = "~amd64-linux".parse().unwrap();
        assert_eq!(kw.arch, "amd64-linux");
    }

    #[test]
    fn parse_empty_line() {
        assert!(Keyword::parse_line("").unwrap().is_empty());
    }

    #[test]
    fn display() {
        for s in ["amd64", "~arm64", "-x86", "-*"] {
            let kw: Keyword = s.parse().unwrap();
            assert_eq!(kw.to_string(), s);
        }
    }

    #[test]
    fn invalid() {
        for s in ["", "~", "-", "~~amd64", "*", "am d64", "amd64!"] {
            assert!(s.parse::<Keyword>().is_err(), "{s:?} parsed");
        }
    }

    #[test]
    fn stability_lookup() {
        let kws = Keyword::parse_line("-* ~amd64 -x86").unwrap();
        assert_eq!(Keyword::stability_for(&kws, "amd64"), Some(Stability::Testing));
        assert_eq!(Keyword::stability_for(&kws, "x86"), Some(Stability::Disabled));
        assert_eq!(Keyword::stability_for(&kws, "ppc"), Some(Stability::DisabledAll));
        let kws = Keyword::parse_line("amd64").unwrap();
        assert_eq!(Keyword::stability_for(&kws, "ppc"), None);
    }
}
