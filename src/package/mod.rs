//! Package identifiers, versions, and the on-disk view of installed
//! packages.

mod identifier;
mod repository;
mod version;

pub use identifier::{Source, classify, validate_name};
pub use repository::{PackageRecord, PackageRepository, UNKNOWN_VERSION};
pub use version::{compare_versions, versions_match};
