//! CLI command handlers. Each one maps onto a single core operation and is
//! the only place results are printed.

use crate::cache::CacheStore;
use crate::config::ConfigStore;
use crate::installer::Installer;
use crate::package::PackageRepository;
use crate::registry::Registry;
use crate::resolver::Resolver;
use crate::runtime::Runtime;
use crate::settings::{Scope, Settings};

mod package;
mod project;

pub use package::{cache_clear, disable, enable, info, install, list, uninstall, update};
pub use project::{init, publish, search, verify};

fn resolver<'a, R: Runtime>(
    runtime: &'a R,
    settings: &Settings,
    registry: &'a Registry,
) -> Resolver<'a, R> {
    let cache = CacheStore::new(runtime, settings.cache_dir(), settings.cache_ttl);
    Resolver::new(runtime, cache, registry)
}

fn installer<'a, R: Runtime>(
    runtime: &'a R,
    settings: &Settings,
    scope: Scope,
    resolver: &'a Resolver<'a, R>,
) -> Installer<'a, R> {
    let repository = PackageRepository::new(
        runtime,
        settings.extensions_dir(scope).to_path_buf(),
        scope,
    );
    let config = ConfigStore::new(runtime, settings.config_path(scope));
    Installer::new(runtime, repository, config, resolver)
}
