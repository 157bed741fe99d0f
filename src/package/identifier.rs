//! Package identifiers as typed on the command line.

use anyhow::Result;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::BpmError;

/// Where a package comes from.
/// Format: `./dir`, `../dir`, `/abs/dir`, `name` or `name@version`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    Local(PathBuf),
    Remote {
        name: String,
        version: Option<String>,
    },
}

impl Source {
    pub fn remote(name: impl Into<String>) -> Self {
        Source::Remote {
            name: name.into(),
            version: None,
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Source::Local(path) => write!(f, "{}", path.display()),
            Source::Remote {
                name,
                version: Some(v),
            } => write!(f, "{}@{}", name, v),
            Source::Remote { name, version: None } => write!(f, "{}", name),
        }
    }
}

impl FromStr for Source {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        classify(s)
    }
}

/// Classify an identifier as a local path or a registry name.
///
/// Anything starting with `.` or a path separator, or that is absolute on
/// this platform, is a local path.
pub fn classify(identifier: &str) -> Result<Source> {
    let identifier = identifier.trim();
    if identifier.is_empty() {
        return Err(BpmError::InputInvalid("package identifier is empty".into()).into());
    }

    if identifier.starts_with('.')
        || identifier.starts_with('/')
        || identifier.starts_with('\\')
        || Path::new(identifier).is_absolute()
    {
        return Ok(Source::Local(PathBuf::from(identifier)));
    }

    let (name, version) = match identifier.rsplit_once('@') {
        Some((name, version)) => {
            if version.is_empty() {
                return Err(BpmError::InputInvalid(format!(
                    "version after @ cannot be empty in '{}'",
                    identifier
                ))
                .into());
            }
            (name, Some(version.to_string()))
        }
        None => (identifier, None),
    };

    validate_name(name)?;
    Ok(Source::Remote {
        name: name.to_string(),
        version,
    })
}

/// A package name must be usable as a single directory name.
pub fn validate_name(name: &str) -> Result<(), BpmError> {
    if name.is_empty() {
        return Err(BpmError::InputInvalid("package name is empty".into()));
    }
    if name.contains(['/', '\\']) || name == "." || name == ".." || name.starts_with('.') {
        return Err(BpmError::InputInvalid(format!(
            "'{}' is not a valid package name; use ./{} for a local path",
            name, name
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relative_paths_are_local() {
        assert_eq!(
            classify("./local/pkg").unwrap(),
            Source::Local(PathBuf::from("./local/pkg"))
        );
        assert_eq!(classify("../x").unwrap(), Source::Local(PathBuf::from("../x")));
        assert_eq!(classify(".").unwrap(), Source::Local(PathBuf::from(".")));
    }

    #[test]
    fn test_absolute_path_is_local() {
        assert_eq!(
            classify("/abs/path").unwrap(),
            Source::Local(PathBuf::from("/abs/path"))
        );
    }

    #[test]
    fn test_name_is_remote() {
        assert_eq!(classify("somepkg").unwrap(), Source::remote("somepkg"));
        assert_eq!(classify("  somepkg  ").unwrap(), Source::remote("somepkg"));
    }

    #[test]
    fn test_name_with_version() {
        assert_eq!(
            classify("fmt@1.2.0").unwrap(),
            Source::Remote {
                name: "fmt".into(),
                version: Some("1.2.0".into())
            }
        );
    }

    #[test]
    fn test_invalid_identifiers() {
        for input in ["", "   ", "fmt@", "@1.0", "a/b"] {
            let err = classify(input).unwrap_err();
            assert!(
                matches!(BpmError::find(&err), Some(BpmError::InputInvalid(_))),
                "{:?} should be rejected",
                input
            );
        }
    }

    #[test]
    fn test_from_str_and_display() {
        let source: Source = "fmt@2.0".parse().unwrap();
        assert_eq!(source.to_string(), "fmt@2.0");
        assert_eq!(Source::remote("fmt").to_string(), "fmt");
    }
}
