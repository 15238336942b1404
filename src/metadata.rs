use std::collections::HashMap;

use portage_atom::{Dep, DepEntry, Slot};
use tracing::warn;

use crate::eapi::{Eapi, EapiRegistry};
use crate::error::{Error, Result};
use crate::keyword::{Keyword, Stability};
use crate::name::QualifiedPackageName;
use crate::version::VersionSpec;

/// Metadata for one package version.
///
/// Immutable once generated. Repositories hand these out behind an `Rc` and
/// cache them by (qualified name, version) until invalidated.
///
/// See [PMS 7.2](https://projects.gentoo.org/pms/9/pms.html#mandatory-ebuilddefined-variables).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionMetadata {
    /// EAPI name, `0` when unset. Either a built-in [`Eapi`] or one the
    /// [`EapiRegistry`] it was generated with knows.
    pub eapi: String,

    /// Package description.
    pub description: String,

    /// Package slot.
    pub slot: Slot,

    /// Homepage URL(s).
    pub homepage: Vec<String>,

    /// Source URIs, kept as whitespace-separated tokens.
    pub src_uri: Vec<String>,

    /// License string, unparsed.
    pub license: String,

    /// Architecture keywords.
    pub keywords: Vec<Keyword>,

    /// Build-time dependencies (`DEPEND`).
    pub depend: Vec<DepEntry>,

    /// Runtime dependencies (`RDEPEND`).
    pub rdepend: Vec<DepEntry>,

    /// Post-merge dependencies (`PDEPEND`).
    pub pdepend: Vec<DepEntry>,

    /// Old-style virtuals this version provides (`PROVIDE`).
    pub provide: Vec<QualifiedPackageName>,

    /// Set on records materialized for a virtual: the concrete package.
    pub virtual_for: Option<QualifiedPackageName>,
}

impl VersionMetadata {
    /// Build metadata from a `KEY -> VALUE` map.
    ///
    /// Missing optional keys are treated as empty. An unset `RDEPEND` takes
    /// the value of `DEPEND` when the EAPI says so: the registry's
    /// `rdepend_defaults_to_depend` setting if one is given, otherwise the
    /// built-in rule for EAPIs before 4.
    pub fn from_keys(
        keys: &HashMap<String, String>,
        eapis: Option<&EapiRegistry>,
    ) -> Result<Self> {
        let get = |key: &str| keys.get(key).map(|v| v.trim()).unwrap_or("");

        let eapi = match get("EAPI") {
            "" => "0".to_string(),
            name => name.to_string(),
        };
        let defaults_to_depend = match eapis {
            Some(registry) => registry
                .eapi_from_string(&eapi)
                .ok_or_else(|| Error::InvalidEapi(eapi.clone()))?
                .rdepend_defaults_to_depend(),
            None => eapi.parse::<Eapi>()?.rdepend_defaults_to_depend(),
        };

        let description = keys
            .get("DESCRIPTION")
            .map(|d| d.trim().to_string())
            .ok_or_else(|| Error::MissingField("DESCRIPTION".to_string()))?;

        let slot = parse_slot(get("SLOT"))?;

        let depend = parse_dep_field(get("DEPEND"))?;
        let rdepend = match keys.get("RDEPEND") {
            Some(rdepend) => parse_dep_field(rdepend.trim())?,
            None if defaults_to_depend => depend.clone(),
            None => Vec::new(),
        };

        Ok(VersionMetadata {
            eapi,
            description,
            slot,
            homepage: split_tokens(get("HOMEPAGE")),
            src_uri: split_tokens(get("SRC_URI")),
            license: get("LICENSE").to_string(),
            keywords: Keyword::parse_line(get("KEYWORDS"))?,
            depend,
            rdepend,
            pdepend: parse_dep_field(get("PDEPEND"))?,
            provide: parse_provide(get("PROVIDE")),
            virtual_for: None,
        })
    }

    /// The record a virtual hands out for one of its providers.
    ///
    /// Slot and EAPI come from the provider; both DEPEND and RDEPEND are the
    /// exact provider version `=cat/pkg-ver`.
    pub fn for_virtual(
        virtual_name: &QualifiedPackageName,
        provider: &QualifiedPackageName,
        version: &VersionSpec,
        provider_metadata: &VersionMetadata,
    ) -> Result<Self> {
        let atom = format!("={provider}-{version}");
        let dep = Dep::parse(&atom).map_err(|e| Error::DepError(format!("{atom}: {e}")))?;
        let deps = vec![DepEntry::Atom(dep)];
        Ok(VersionMetadata {
            eapi: provider_metadata.eapi.clone(),
            description: format!("Virtual {virtual_name} for {provider}"),
            slot: provider_metadata.slot.clone(),
            homepage: Vec::new(),
            src_uri: Vec::new(),
            license: String::new(),
            keywords: Vec::new(),
            depend: deps.clone(),
            rdepend: deps,
            pdepend: Vec::new(),
            provide: Vec::new(),
            virtual_for: Some(provider.clone()),
        })
    }

    /// The built-in EAPI this record uses, `None` for a registry-only one.
    pub fn known_eapi(&self) -> Option<Eapi> {
        self.eapi.parse().ok()
    }

    /// Stability on `arch` according to `KEYWORDS`.
    pub fn stability(&self, arch: &str) -> Option<Stability> {
        Keyword::stability_for(&self.keywords, arch)
    }
}

/// Parse a SLOT value into a `Slot`.
fn parse_slot(s: &str) -> Result<Slot> {
    if s.is_empty() {
        return Err(Error::MissingField("SLOT".to_string()));
    }
    if let Some((slot, subslot)) = s.split_once('/') {
        Ok(Slot::with_subslot(slot, subslot))
    } else {
        Ok(Slot::new(s))
    }
}

/// Parse a dependency field value into `Vec<DepEntry>`.
fn parse_dep_field(s: &str) -> Result<Vec<DepEntry>> {
    if s.is_empty() {
        return Ok(Vec::new());
    }
    DepEntry::parse(s).map_err(|e| Error::DepError(format!("{e}")))
}

fn split_tokens(s: &str) -> Vec<String> {
    s.split_whitespace().map(str::to_string).collect()
}

/// `PROVIDE` in installed metadata is a flat list of virtual names. Anything
/// else (leftover USE conditionals, parentheses) is skipped.
fn parse_provide(s: &str) -> Vec<QualifiedPackageName> {
    s.split_whitespace()
        .filter(|token| !token.ends_with('?') && *token != "(" && *token != ")")
        .filter_map(|token| match token.parse() {
            Ok(name) => Some(name),
            Err(e) => {
                warn!("ignoring PROVIDE entry '{token}': {e}");
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eapi::EapiConfig;
    use crate::keyword::Stability;

    fn keys(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn from_keys_full() {
        let md = VersionMetadata::from_keys(
            &keys(&[
                ("EAPI", "8"),
                ("DESCRIPTION", "Python bindings for sys-devel/clang"),
                ("SLOT", "0/2.1"),
                ("HOMEPAGE", "https://llvm.org/"),
                ("KEYWORDS", "~amd64 x86"),
                ("LICENSE", "Apache-2.0-with-LLVM-exceptions UoI-NCSA"),
                ("DEPEND", ">=sys-devel/clang-10.0.0_rc1:* dev-python/setuptools"),
                ("RDEPEND", ">=sys-devel/clang-10.0.0_rc1:*"),
            ]),
            None,
        )
        .unwrap();
        assert_eq!(md.eapi, "8");
        assert_eq!(md.known_eapi(), Some(Eapi::Eight));
        assert_eq!(md.slot.slot, "0");
        assert_eq!(md.slot.subslot, Some("2.1".to_string()));
        assert_eq!(md.homepage, ["https://llvm.org/"]);
        assert_eq!(md.keywords[0].stability, Stability::Testing);
        assert_eq!(md.stability("x86"), Some(Stability::Stable));
        assert_eq!(md.stability("ppc"), None);
        assert_eq!(md.depend.len(), 2);
        assert_eq!(md.rdepend.len(), 1);
        assert!(md.provide.is_empty());
        assert!(md.virtual_for.is_none());
    }

    #[test]
    fn missing_fields() {
        let err = VersionMetadata::from_keys(&keys(&[("SLOT", "0")]), None).unwrap_err();
        assert_eq!(err, Error::MissingField("DESCRIPTION".to_string()));
        let err = VersionMetadata::from_keys(&keys(&[("DESCRIPTION", "x")]), None).unwrap_err();
        assert_eq!(err, Error::MissingField("SLOT".to_string()));
    }

    #[test]
    fn rdepend_defaults() {
        let base = [("DESCRIPTION", "x"), ("SLOT", "0"), ("DEPEND", "dev-lib/foo")];

        let md = VersionMetadata::from_keys(&keys(&base), None).unwrap();
        assert_eq!(md.eapi, "0");
        assert_eq!(md.rdepend, md.depend);

        let mut eapi8 = base.to_vec();
        eapi8.push(("EAPI", "8"));
        let md = VersionMetadata::from_keys(&keys(&eapi8), None).unwrap();
        assert!(md.rdepend.is_empty());

        let registry = EapiRegistry::from_configs([EapiConfig::new(
            "0",
            [("rdepend_defaults_to_depend".to_string(), "false".to_string())],
        )])
        .unwrap();
        let md = VersionMetadata::from_keys(&keys(&base), Some(&registry)).unwrap();
        assert!(md.rdepend.is_empty());
    }

    #[test]
    fn eapis_from_the_registry() {
        let registry = EapiRegistry::from_configs([
            EapiConfig::new("0", Vec::<(String, String)>::new()),
            EapiConfig::new(
                "paludis-1",
                [("rdepend_defaults_to_depend".to_string(), "true".to_string())],
            ),
        ])
        .unwrap();
        let base = [("DESCRIPTION", "x"), ("SLOT", "0"), ("DEPEND", "dev-lib/foo")];

        let mut custom = base.to_vec();
        custom.push(("EAPI", "paludis-1"));
        let md = VersionMetadata::from_keys(&keys(&custom), Some(&registry)).unwrap();
        assert_eq!(md.eapi, "paludis-1");
        assert_eq!(md.known_eapi(), None);
        assert_eq!(md.rdepend, md.depend);

        // Without a registry only the built-in EAPIs are known.
        assert_eq!(
            VersionMetadata::from_keys(&keys(&custom), None).unwrap_err(),
            Error::InvalidEapi("paludis-1".to_string())
        );

        // With one, only what it configures.
        let mut eapi8 = base.to_vec();
        eapi8.push(("EAPI", "8"));
        assert_eq!(
            VersionMetadata::from_keys(&keys(&eapi8), Some(&registry)).unwrap_err(),
            Error::InvalidEapi("8".to_string())
        );
    }

    #[test]
    fn provide() {
        let md = VersionMetadata::from_keys(
            &keys(&[
                ("DESCRIPTION", "x"),
                ("SLOT", "0"),
                ("PROVIDE", "virtual/foo virtual/bar"),
            ]),
            None,
        )
        .unwrap();
        let names: Vec<String> = md.provide.iter().map(|q| q.to_string()).collect();
        assert_eq!(names, ["virtual/foo", "virtual/bar"]);
    }

    #[test]
    fn virtual_record() {
        let provider_md = VersionMetadata::from_keys(
            &keys(&[("EAPI", "7"), ("DESCRIPTION", "x"), ("SLOT", "2")]),
            None,
        )
        .unwrap();
        let virt: QualifiedPackageName = "virtual/foo".parse().unwrap();
        let provider: QualifiedPackageName = "cat1/pkg1".parse().unwrap();
        let version = VersionSpec::parse("1.1").unwrap();
        let md = VersionMetadata::for_virtual(&virt, &provider, &version, &provider_md).unwrap();
        assert_eq!(md.eapi, "7");
        assert_eq!(md.slot.slot, "2");
        assert_eq!(md.virtual_for, Some(provider));
        assert_eq!(md.depend.len(), 1);
        assert_eq!(md.depend, md.rdepend);
        assert!(md.depend[0].to_string().contains("cat1/pkg1-1.1"));
    }
}
