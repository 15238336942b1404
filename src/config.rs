//! Small on-disk configuration formats shared by repositories and profiles.
//!
//! Two shapes cover everything a repository reads:
//!
//! * line files (`categories`, `arch.list`, `package.mask`, `use.mask`, ...),
//!   one entry per line, `#` comments and blank lines ignored;
//! * key=value files (`make.defaults`, EAPI `.conf` files, repository
//!   configuration), shell-style assignments with optional quoting.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use winnow::ascii::{line_ending, multispace0, space0, space1};
use winnow::combinator::{alt, cut_err, eof, opt, preceded, terminated};
use winnow::error::StrContext;
use winnow::prelude::*;
use winnow::token::{one_of, take_till, take_while};

use crate::error::{Error, Result};

/// Location that marks an optional on-disk cache as disabled.
pub const DISABLED_LOCATION: &str = "/var/empty";

/// Whether a configured cache location is the disabled sentinel.
pub fn is_disabled(path: &Path) -> bool {
    path == Path::new(DISABLED_LOCATION)
}

/// Read a line-oriented file.
///
/// Returns `Ok(None)` if the file does not exist. Leading and trailing
/// whitespace is trimmed; blank lines and `#` comments are dropped.
pub fn read_line_file(path: &Path) -> Result<Option<Vec<String>>> {
    match fs::read_to_string(path) {
        Ok(content) => Ok(Some(parse_lines(&content))),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(Error::io(path, e)),
    }
}

pub(crate) fn parse_lines(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}

/// Parse a key=value file into assignments, in file order.
///
/// Values may be bare, `"double quoted"` (may span lines, `${VAR}` is kept
/// for [`expand_variables`]) or `'single quoted'`. A leading `export` is
/// accepted and ignored.
///
/// # Examples
///
/// ```
/// use portage_repository::config::parse_key_values;
///
/// let vars = parse_key_values("# comment\nARCH=\"amd64\"\nexport CHOST=x86_64-pc-linux-gnu\n").unwrap();
/// assert_eq!(vars[0], ("ARCH".to_string(), "amd64".to_string()));
/// assert_eq!(vars[1].1, "x86_64-pc-linux-gnu");
/// ```
pub fn parse_key_values(input: &str) -> Result<Vec<(String, String)>> {
    parse_assignments
        .parse(input)
        .map_err(|e| Error::Configuration(format!("{e}")))
}

/// Read and parse a key=value file. Returns `Ok(None)` if it does not exist.
pub fn read_key_value_file(path: &Path) -> Result<Option<Vec<(String, String)>>> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(Error::io(path, e)),
    };
    parse_key_values(&content)
        .map(Some)
        .map_err(|e| Error::Configuration(format!("{}: {e}", path.display())))
}

/// Substitute `${NAME}` and `$NAME` references from `vars`.
///
/// Unknown variables expand to the empty string, as in the shell.
pub fn expand_variables(value: &str, vars: &HashMap<String, String>) -> String {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;
    while let Some(pos) = rest.find('$') {
        out.push_str(&rest[..pos]);
        rest = &rest[pos + 1..];
        let (name, consumed) = if let Some(braced) = rest.strip_prefix('{') {
            match braced.find('}') {
                Some(end) => (&braced[..end], end + 2),
                None => {
                    out.push('$');
                    continue;
                }
            }
        } else {
            let end = rest
                .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
                .unwrap_or(rest.len());
            (&rest[..end], end)
        };
        if name.is_empty() {
            out.push('$');
            continue;
        }
        if let Some(v) = vars.get(name) {
            out.push_str(v);
        }
        rest = &rest[consumed..];
    }
    out.push_str(rest);
    out
}

// Winnow parsers

fn parse_key<'s>(input: &mut &'s str) -> ModalResult<&'s str> {
    (
        one_of(|c: char| c.is_ascii_alphabetic() || c == '_'),
        take_while(0.., |c: char| c.is_ascii_alphanumeric() || c == '_'),
    )
        .take()
        .context(StrContext::Label("variable name"))
        .parse_next(input)
}

fn parse_value(input: &mut &str) -> ModalResult<String> {
    alt((
        preceded('"', cut_err(terminated(take_till(0.., '"'), '"'))),
        preceded('\'', cut_err(terminated(take_till(0.., '\''), '\''))),
        take_till(0.., |c: char| c == '\n' || c == '#').map(str::trim_end),
    ))
    .map(str::to_string)
    .parse_next(input)
}

fn parse_comment(input: &mut &str) -> ModalResult<()> {
    ('#', take_till(0.., '\n')).void().parse_next(input)
}

fn parse_assignment(input: &mut &str) -> ModalResult<(String, String)> {
    opt(("export", space1)).parse_next(input)?;
    let key = parse_key.parse_next(input)?;
    '='.parse_next(input)?;
    let value = parse_value.parse_next(input)?;
    (space0, opt(parse_comment), alt((line_ending, eof)))
        .context(StrContext::Label("end of assignment"))
        .parse_next(input)?;
    Ok((key.to_string(), value))
}

fn parse_assignments(input: &mut &str) -> ModalResult<Vec<(String, String)>> {
    let mut out = Vec::new();
    loop {
        multispace0.parse_next(input)?;
        if input.is_empty() {
            return Ok(out);
        }
        if input.starts_with('#') {
            parse_comment.parse_next(input)?;
            continue;
        }
        out.push(parse_assignment.parse_next(input)?);
    }
}

/// String key/value configuration for one repository.
///
/// Keys used by the built-in repository formats: `location`, `names_cache`,
/// `provides_cache`, `sync`, `sync_options`, `master_repository`,
/// `profiles`, `entry_format`, `root`, `name`, `importance`, `format`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepositoryKeys(HashMap<String, String>);

impl RepositoryKeys {
    /// Empty configuration.
    pub fn new() -> Self {
        RepositoryKeys::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, key: &str, value: impl Into<String>) -> Self {
        self.0.insert(key.to_string(), value.into());
        self
    }

    /// Insert or replace a key.
    pub fn insert(&mut self, key: &str, value: impl Into<String>) {
        self.0.insert(key.to_string(), value.into());
    }

    /// Value for `key`, if set and non-empty.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    /// Value for `key`, or a configuration error naming the missing key.
    pub fn require(&self, key: &str) -> Result<&str> {
        self.get(key)
            .ok_or_else(|| Error::Configuration(format!("key '{key}' not specified or empty")))
    }

    /// Value for `key` as a path.
    pub fn path(&self, key: &str) -> Option<PathBuf> {
        self.get(key).map(PathBuf::from)
    }

    /// Load a repository configuration file (key=value format).
    pub fn from_file(path: &Path) -> Result<Self> {
        let vars = read_key_value_file(path)?.ok_or_else(|| {
            Error::Configuration(format!("{}: no such repository file", path.display()))
        })?;
        Ok(vars.into_iter().collect())
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for RepositoryKeys {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        RepositoryKeys(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}
