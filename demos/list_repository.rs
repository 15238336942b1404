//! List the packages of an ebuild repository with their stability.
//!
//! ```text
//! cargo run --example list_repository -- /var/db/repos/gentoo [arch]
//! ```
//!
//! Set `RUST_LOG=portage_repository=debug` to follow the index filling up.

use std::env;
use std::rc::Rc;

use portage_repository::{
    EbuildRepository, FactoryContext, MaskInterface, Repository, RepositoryKeys,
    RepositoryRegistry,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let mut args = env::args().skip(1);
    let location = args
        .next()
        .ok_or("usage: list_repository <location> [arch]")?;
    let arch = args.next();

    let registry = RepositoryRegistry::new();
    let keys = RepositoryKeys::new().with("location", location);
    let repo = Rc::new(EbuildRepository::from_keys(
        &FactoryContext::new(&registry),
        &keys,
    )?);
    registry.add(0, repo.clone())?;

    let arch = match arch {
        Some(arch) => {
            let descriptor = repo.set_profile_by_arch(&arch)?;
            println!("profile: {} ({})", descriptor.path.display(), descriptor.status);
            arch
        }
        None => repo.profile()?.arch().unwrap_or("amd64").to_string(),
    };

    println!("=== {} ({arch}) ===", repo.name());
    for category in repo.category_names()? {
        for name in repo.package_names(&category)? {
            let versions = repo.version_specs(&name)?;
            let line = versions
                .iter()
                .map(|version| {
                    let mut shown = version.to_string();
                    match repo.version_metadata(&name, version) {
                        Ok(md) => match md.stability(&arch) {
                            Some(stability) => shown.push_str(&format!(" [{stability:?}]")),
                            None => shown.push_str(" [unkeyworded]"),
                        },
                        Err(e) => shown.push_str(&format!(" [{e}]")),
                    }
                    if repo.query_repository_masks(&name, version).unwrap_or(false) {
                        shown.push_str(" (masked)");
                    }
                    shown
                })
                .collect::<Vec<_>>()
                .join(", ");
            println!("{name}: {line}");
        }
    }
    Ok(())
}
