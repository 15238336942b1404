use std::collections::HashMap;
use std::env;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use tracing::debug;

use crate::config::read_key_value_file;
use crate::error::{Error, Result};

/// Environment variable overriding the EAPI configuration directory.
pub const EAPIS_DIR_VAR: &str = "PORTAGE_REPOSITORY_EAPIS_DIR";

/// Default EAPI configuration directory.
pub const DEFAULT_EAPIS_DIR: &str = "/usr/share/portage-repository/eapis";

/// EAPI (Ebuild API) version.
///
/// The EAPI controls which features and behaviours are available to an ebuild.
/// Each EAPI builds on the previous one, adding or modifying capabilities.
///
/// See [PMS 2](https://projects.gentoo.org/pms/latest/pms.html#eapis).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Eapi {
    /// EAPI 0, base (legacy).
    Zero,
    /// EAPI 1, slot deps, IUSE defaults.
    One,
    /// EAPI 2, USE deps, `src_prepare`/`src_configure`.
    Two,
    /// EAPI 3, prefix support.
    Three,
    /// EAPI 4, `REQUIRED_USE`, RDEPEND no longer defaults to DEPEND.
    Four,
    /// EAPI 5, sub-slots, slot operators.
    Five,
    /// EAPI 6, `eapply`/`eapply_user`.
    Six,
    /// EAPI 7, `BDEPEND`.
    Seven,
    /// EAPI 8, `IDEPEND`.
    Eight,
    /// EAPI 9.
    Nine,
}

impl Eapi {
    /// Whether an unset `RDEPEND` takes the value of `DEPEND`.
    ///
    /// True before EAPI 4.
    pub fn rdepend_defaults_to_depend(&self) -> bool {
        *self < Eapi::Four
    }

    /// Whether this EAPI supports sub-slots and slot operators (`:=`, `:*`).
    ///
    /// Introduced in EAPI 5.
    pub fn has_slot_operators(&self) -> bool {
        *self >= Eapi::Five
    }
}

impl fmt::Display for Eapi {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let n = match self {
            Eapi::Zero => "0",
            Eapi::One => "1",
            Eapi::Two => "2",
            Eapi::Three => "3",
            Eapi::Four => "4",
            Eapi::Five => "5",
            Eapi::Six => "6",
            Eapi::Seven => "7",
            Eapi::Eight => "8",
            Eapi::Nine => "9",
        };
        f.write_str(n)
    }
}

impl FromStr for Eapi {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "0" => Ok(Eapi::Zero),
            "1" => Ok(Eapi::One),
            "2" => Ok(Eapi::Two),
            "3" => Ok(Eapi::Three),
            "4" => Ok(Eapi::Four),
            "5" => Ok(Eapi::Five),
            "6" => Ok(Eapi::Six),
            "7" => Ok(Eapi::Seven),
            "8" => Ok(Eapi::Eight),
            "9" => Ok(Eapi::Nine),
            _ => Err(Error::InvalidEapi(s.to_string())),
        }
    }
}

/// One EAPI's data-driven configuration, loaded from `<eapi>.conf`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EapiConfig {
    name: String,
    values: HashMap<String, String>,
}

impl EapiConfig {
    /// Build a configuration from key/value pairs.
    pub fn new(name: &str, values: impl IntoIterator<Item = (String, String)>) -> Self {
        EapiConfig {
            name: name.to_string(),
            values: values.into_iter().collect(),
        }
    }

    /// The EAPI name (the config file stem).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Raw value for `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Boolean value for `key`; `true`, `yes` and `1` are true, anything
    /// else (including unset) is false.
    pub fn get_bool(&self, key: &str) -> bool {
        matches!(self.get(key), Some("true" | "yes" | "1"))
    }

    /// Whether an unset `RDEPEND` takes the value of `DEPEND`.
    pub fn rdepend_defaults_to_depend(&self) -> bool {
        self.get_bool("rdepend_defaults_to_depend")
    }
}

/// All known EAPI configurations.
///
/// Loaded once at startup; a registry without an EAPI `0` configuration is
/// refused, since every ebuild without an explicit EAPI uses it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EapiRegistry {
    configs: HashMap<String, EapiConfig>,
}

impl EapiRegistry {
    /// Load from the directory named by `PORTAGE_REPOSITORY_EAPIS_DIR`, or
    /// the default location.
    pub fn load() -> Result<Self> {
        let dir = env::var_os(EAPIS_DIR_VAR)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_EAPIS_DIR));
        Self::load_from(&dir)
    }

    /// Load every `*.conf` file in `dir`.
    pub fn load_from(dir: &Path) -> Result<Self> {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(Error::Configuration(format!(
                    "no EAPI configuration directory at '{}'",
                    dir.display()
                )));
            }
            Err(e) => return Err(Error::io(dir, e)),
        };

        let mut configs = Vec::new();
        for entry in entries {
            let path = entry.map_err(|e| Error::io(dir, e))?.path();
            if path.extension().is_none_or(|ext| ext != "conf") {
                continue;
            }
            let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if let Some(values) = read_key_value_file(&path)? {
                debug!(eapi = name, "loaded EAPI configuration");
                configs.push(EapiConfig::new(name, values));
            }
        }
        Self::from_configs(configs)
            .map_err(|e| Error::Configuration(format!("{}: {e}", dir.display())))
    }

    /// Build a registry from already-loaded configurations.
    pub fn from_configs(configs: impl IntoIterator<Item = EapiConfig>) -> Result<Self> {
        let configs: HashMap<String, EapiConfig> = configs
            .into_iter()
            .map(|c| (c.name.clone(), c))
            .collect();
        if !configs.contains_key("0") {
            return Err(Error::Configuration(
                "no configuration found for EAPI 0".to_string(),
            ));
        }
        Ok(EapiRegistry { configs })
    }

    /// Look up the configuration for an EAPI string. The empty string means
    /// EAPI 0.
    pub fn eapi_from_string(&self, eapi: &str) -> Option<&EapiConfig> {
        let eapi = if eapi.is_empty() { "0" } else { eapi };
        self.configs.get(eapi)
    }

    /// Number of known EAPIs.
    pub fn len(&self) -> usize {
        self.configs.len()
    }

    /// Always false for a successfully loaded registry.
    pub fn is_empty(&self) -> bool {
        self.configs.is_empty()
    }
}
