use anyhow::{Result, bail};
use log::debug;

use crate::cache::CacheStore;
use crate::installer::PackageInfo;
use crate::package::{PackageRecord, classify};
use crate::runtime::Runtime;
use crate::settings::{Scope, Settings};

use super::{installer, resolver};

/// Install a package from a local directory or the registry
#[tracing::instrument(skip(runtime, settings))]
pub async fn install<R: Runtime>(
    runtime: &R,
    settings: &Settings,
    identifier: &str,
    scope: Scope,
    force: bool,
) -> Result<()> {
    let source = classify(identifier)?;
    let registry = settings.registry()?;
    let resolver = resolver(runtime, settings, &registry);
    let installer = installer(runtime, settings, scope, &resolver);

    let record = installer.install(&source, force).await?;
    println!(
        "Installed {} {} ({}) at {}",
        record.name,
        record.version,
        scope,
        record.path.display()
    );
    Ok(())
}

#[tracing::instrument(skip(runtime, settings))]
pub fn uninstall<R: Runtime>(runtime: &R, settings: &Settings, name: &str, scope: Scope) -> Result<()> {
    let registry = settings.registry()?;
    let resolver = resolver(runtime, settings, &registry);
    installer(runtime, settings, scope, &resolver).uninstall(name)?;
    println!("Uninstalled {}", name);
    Ok(())
}

/// Update one package, or every installed package when `name` is `None`
#[tracing::instrument(skip(runtime, settings))]
pub async fn update<R: Runtime>(
    runtime: &R,
    settings: &Settings,
    name: Option<&str>,
    scope: Scope,
) -> Result<()> {
    let registry = settings.registry()?;
    let resolver = resolver(runtime, settings, &registry);
    let installer = installer(runtime, settings, scope, &resolver);

    let Some(name) = name else {
        let report = installer.update_all(settings.max_parallel).await?;
        if report.entries.is_empty() {
            println!("No packages installed.");
            return Ok(());
        }
        for entry in &report.entries {
            println!("{}: {}", entry.name, entry.outcome);
        }
        let failures = report.failures();
        if failures > 0 {
            bail!("{} of {} package(s) failed to update", failures, report.entries.len());
        }
        return Ok(());
    };

    let outcome = installer.update(name).await?;
    println!("{}: {}", name, outcome);
    Ok(())
}

pub fn enable<R: Runtime>(runtime: &R, settings: &Settings, name: &str, scope: Scope) -> Result<()> {
    let registry = settings.registry()?;
    let resolver = resolver(runtime, settings, &registry);
    installer(runtime, settings, scope, &resolver).enable(name)?;
    println!("Enabled {}", name);
    Ok(())
}

pub fn disable<R: Runtime>(runtime: &R, settings: &Settings, name: &str, scope: Scope) -> Result<()> {
    let registry = settings.registry()?;
    let resolver = resolver(runtime, settings, &registry);
    installer(runtime, settings, scope, &resolver).disable(name)?;
    println!("Disabled {}", name);
    Ok(())
}

/// List all installed packages
#[tracing::instrument(skip(runtime, settings))]
pub fn list<R: Runtime>(runtime: &R, settings: &Settings, scope: Scope) -> Result<()> {
    let registry = settings.registry()?;
    let resolver = resolver(runtime, settings, &registry);
    let records = installer(runtime, settings, scope, &resolver).list()?;

    if records.is_empty() {
        println!("No packages installed.");
        return Ok(());
    }

    debug!("Found {} package(s)", records.len());
    println!("Installed packages ({}):", scope);
    for record in &records {
        println!("{}", format_record(record));
    }
    Ok(())
}

pub fn info<R: Runtime>(runtime: &R, settings: &Settings, name: &str, scope: Scope) -> Result<()> {
    let registry = settings.registry()?;
    let resolver = resolver(runtime, settings, &registry);
    let info = installer(runtime, settings, scope, &resolver).info(name)?;
    print!("{}", format_info(&info));
    Ok(())
}

/// Remove every cached archive
pub fn cache_clear<R: Runtime>(runtime: &R, settings: &Settings) -> Result<()> {
    let cache = CacheStore::new(runtime, settings.cache_dir(), settings.cache_ttl);
    let removed = cache.clear()?;
    println!(
        "Removed {} cached archive(s) from {}",
        removed,
        cache.root().display()
    );
    Ok(())
}

fn format_record(record: &PackageRecord) -> String {
    format!(" - {} {}", record.name, record.version)
}

fn format_info(info: &PackageInfo) -> String {
    let manifest = &info.manifest;
    let optional = |v: &Option<String>| v.clone().unwrap_or_else(|| "-".to_string());
    let enabled = match info.enabled {
        Some(true) => "enabled",
        Some(false) => "disabled",
        None => "not configured",
    };

    let mut out = String::new();
    out.push_str(&format!("Package: {}\n", manifest.name));
    out.push_str(&format!("Version: {}\n", manifest.version));
    out.push_str(&format!("Description: {}\n", optional(&manifest.description)));
    out.push_str(&format!(
        "Author: {}\n",
        optional(&manifest.to_registry_form().author)
    ));
    out.push_str(&format!("License: {}\n", optional(&manifest.license)));
    out.push_str(&format!("Status: {}\n", enabled));
    out.push_str(&format!("Path: {}\n", info.record.path.display()));
    out
}
