use anyhow::Result;
use std::path::Path;

use crate::error::BpmError;
use crate::manifest::{MANIFEST_FILE, init_project, verify_project};
use crate::publisher::Publisher;
use crate::registry::SearchHit;
use crate::runtime::Runtime;
use crate::settings::Settings;

/// Create `bplus.toml` in the current directory. The project name defaults
/// to the directory name.
pub fn init<R: Runtime>(runtime: &R, name: Option<&str>) -> Result<()> {
    let dir = runtime.current_dir()?;
    let name = match name {
        Some(name) => name.to_string(),
        None => dir
            .file_name()
            .and_then(|n| n.to_str())
            .map(String::from)
            .ok_or_else(|| {
                BpmError::InputInvalid("cannot derive a project name; pass one explicitly".into())
            })?,
    };

    let manifest = init_project(runtime, &dir, &name)?;
    println!(
        "Created {} for {} {}",
        MANIFEST_FILE, manifest.name, manifest.version
    );
    Ok(())
}

pub fn verify<R: Runtime>(runtime: &R, path: &Path) -> Result<()> {
    println!("Verifying B+ project integrity...");
    let manifest = verify_project(runtime, path)?;
    println!(
        "Project {} {} verified successfully.",
        manifest.name, manifest.version
    );
    Ok(())
}

#[tracing::instrument(skip(runtime, settings))]
pub async fn publish<R: Runtime>(runtime: &R, settings: &Settings, path: &Path) -> Result<()> {
    let registry = settings.registry()?;
    let receipt = Publisher::new(runtime, &registry, settings.extension_roots(path))
        .publish(path)
        .await?;
    println!("Published {} {}", receipt.name, receipt.version);
    println!("  archive: {}", receipt.archive.display());
    println!("  sha256:  {}", receipt.digest);
    Ok(())
}

#[tracing::instrument(skip(runtime, settings))]
pub async fn search<R: Runtime>(runtime: &R, settings: &Settings, query: &str) -> Result<()> {
    let registry = settings.registry()?;
    let hits = Publisher::new(runtime, &registry, Vec::new())
        .search(query)
        .await?;

    if hits.is_empty() {
        println!("No packages found for '{}'.", query.trim());
        return Ok(());
    }
    for hit in &hits {
        println!("{}", format_hit(hit));
    }
    Ok(())
}

fn format_hit(hit: &SearchHit) -> String {
    let mut line = format!("{} {}", hit.name, hit.version);
    if let Some(description) = hit.description.as_deref().filter(|d| !d.is_empty()) {
        line.push_str(" - ");
        line.push_str(description);
    }
    if let Some(author) = hit.author.as_deref().filter(|a| !a.is_empty()) {
        line.push_str(&format!(" (by {})", author));
    }
    line
}
