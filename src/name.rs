use std::borrow::Borrow;
use std::fmt;
use std::str::FromStr;

use winnow::error::{ContextError, ErrMode};
use winnow::prelude::*;
use winnow::token::{one_of, take_while};

use crate::error::{Error, Result};
use crate::version::VersionSpec;

// Winnow parsers

fn is_name_start(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn is_category_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '+' | '_' | '.' | '-')
}

fn is_package_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '+' | '_' | '-')
}

fn is_repository_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '-')
}

fn is_flag_start(c: char) -> bool {
    c.is_ascii_alphanumeric()
}

fn is_flag_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '+' | '_' | '@' | '-')
}

fn name_token<'s>(
    first: fn(char) -> bool,
    rest: fn(char) -> bool,
) -> impl Parser<&'s str, &'s str, ErrMode<ContextError>> {
    (one_of(first), take_while(0.., rest)).take()
}

fn validate(input: &str, first: fn(char) -> bool, rest: fn(char) -> bool) -> bool {
    name_token(first, rest).parse(input).is_ok()
}

macro_rules! name_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(String);

        impl $name {
            /// The name as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl FromStr for $name {
            type Err = Error;

            fn from_str(s: &str) -> Result<Self> {
                $name::new(s)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }
    };
}

name_type! {
    /// A category name such as `dev-lang` or `virtual`.
    ///
    /// See [PMS 3.1.1](https://projects.gentoo.org/pms/9/pms.html#category-names).
    CategoryName
}

name_type! {
    /// The package part of a qualified name, such as `rust` in `dev-lang/rust`.
    ///
    /// See [PMS 3.1.2](https://projects.gentoo.org/pms/9/pms.html#package-names).
    PackageNamePart
}

name_type! {
    /// A repository name as found in `profiles/repo_name`.
    RepositoryName
}

name_type! {
    /// A USE flag name.
    ///
    /// See [PMS 3.1.4](https://projects.gentoo.org/pms/9/pms.html#use-flag-names).
    UseFlagName
}

impl CategoryName {
    /// Validate and construct a category name.
    pub fn new(s: &str) -> Result<Self> {
        if validate(s, is_name_start, is_category_char) {
            Ok(CategoryName(s.to_string()))
        } else {
            Err(Error::InvalidCategory(s.to_string()))
        }
    }
}

impl PackageNamePart {
    /// Validate and construct a package name.
    ///
    /// A package name may not end in a hyphen followed by something that is
    /// a valid version, otherwise `foo-1` would be ambiguous.
    ///
    /// # Examples
    ///
    /// ```
    /// use portage_repository::PackageNamePart;
    ///
    /// assert!(PackageNamePart::new("gtk+").is_ok());
    /// assert!(PackageNamePart::new("foo-bar").is_ok());
    /// assert!(PackageNamePart::new("foo-1").is_err());
    /// ```
    pub fn new(s: &str) -> Result<Self> {
        if !validate(s, is_name_start, is_package_char) {
            return Err(Error::InvalidPackageName(s.to_string()));
        }
        let ends_in_version = s
            .match_indices('-')
            .any(|(i, _)| VersionSpec::parse(&s[i + 1..]).is_ok());
        if ends_in_version {
            return Err(Error::InvalidPackageName(s.to_string()));
        }
        Ok(PackageNamePart(s.to_string()))
    }

    /// Split a `<package>-<version>` string, as used by entry files and
    /// installed-package directories.
    ///
    /// The leftmost hyphen that yields both a valid package name and a valid
    /// version wins.
    ///
    /// # Examples
    ///
    /// ```
    /// use portage_repository::PackageNamePart;
    ///
    /// let (p, v) = PackageNamePart::split_versioned("foo-bar-1.0-r1").unwrap();
    /// assert_eq!(p.as_str(), "foo-bar");
    /// assert_eq!(v.to_string(), "1.0-r1");
    /// ```
    pub fn split_versioned(s: &str) -> Result<(Self, VersionSpec)> {
        for (i, _) in s.match_indices('-') {
            let Ok(package) = PackageNamePart::new(&s[..i]) else {
                continue;
            };
            if let Ok(version) = VersionSpec::parse(&s[i + 1..]) {
                return Ok((package, version));
            }
        }
        Err(Error::InvalidVersion(s.to_string()))
    }
}

impl RepositoryName {
    /// Validate and construct a repository name.
    pub fn new(s: &str) -> Result<Self> {
        if validate(s, is_name_start, is_repository_char) {
            Ok(RepositoryName(s.to_string()))
        } else {
            Err(Error::InvalidRepositoryName(s.to_string()))
        }
    }
}

impl UseFlagName {
    /// Validate and construct a USE flag name.
    pub fn new(s: &str) -> Result<Self> {
        if validate(s, is_flag_start, is_flag_char) {
            Ok(UseFlagName(s.to_string()))
        } else {
            Err(Error::InvalidUseFlag(s.to_string()))
        }
    }
}

/// A `category/package` pair.
///
/// Ordered by category, then package.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct QualifiedPackageName {
    /// Category part.
    pub category: CategoryName,
    /// Package part.
    pub package: PackageNamePart,
}

impl QualifiedPackageName {
    /// Join a category and a package name.
    pub fn new(category: CategoryName, package: PackageNamePart) -> Self {
        QualifiedPackageName { category, package }
    }
}

impl FromStr for QualifiedPackageName {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (category, package) = s
            .split_once('/')
            .ok_or_else(|| Error::InvalidPackageName(s.to_string()))?;
        Ok(QualifiedPackageName {
            category: category.parse()?,
            package: package.parse()?,
        })
    }
}

impl fmt::Display for QualifiedPackageName {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}/{}", self.category, self.package)
    }
}
