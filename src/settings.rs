//! Resolved settings: roots, registry, token and tuning knobs.
//!
//! Explicit arguments win over environment variables, which win over
//! built-in defaults.

use anyhow::{Context, Result};
use log::debug;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cache::DEFAULT_TTL;
use crate::error::BpmError;
use crate::http::{DEFAULT_TIMEOUT, HttpClient};
use crate::registry::{DEFAULT_REGISTRY, Registry};
use crate::runtime::Runtime;

pub const CONFIG_FILE: &str = ".bpmconfig";
pub const DEFAULT_MAX_PARALLEL: usize = 4;

const LOCAL_EXTENSIONS_DIR: &str = "bpm_extensions";

/// Install and config context of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    /// Relative to the current project.
    Local,
    /// Relative to the user's home.
    Global,
}

impl Scope {
    pub fn from_global_flag(global: bool) -> Self {
        if global { Scope::Global } else { Scope::Local }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::Local => write!(f, "local"),
            Scope::Global => write!(f, "global"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub home: PathBuf,
    pub project_dir: PathBuf,
    pub registry_url: String,
    pub token: Option<String>,
    pub local_extensions: PathBuf,
    pub global_extensions: PathBuf,
    pub cache_ttl: Duration,
    pub timeout: Duration,
    pub max_parallel: usize,
}

impl Settings {
    pub fn new<R: Runtime + ?Sized>(
        runtime: &R,
        home: Option<PathBuf>,
        registry_url: Option<String>,
    ) -> Result<Self> {
        let project_dir = runtime.current_dir()?;

        let home = match home.or_else(|| env_path(runtime, "BPM_HOME")) {
            Some(home) => home,
            None => runtime
                .home_dir()
                .context("Could not determine the home directory; set BPM_HOME")?,
        };

        let registry_url = registry_url
            .or_else(|| env_string(runtime, "BPM_REGISTRY"))
            .unwrap_or_else(|| DEFAULT_REGISTRY.to_string());

        let token = env_string(runtime, "BPM_TOKEN");
        if let Some(token) = &token {
            debug!("Using BPM_TOKEN for authentication ({} chars)", token.len());
        }

        let local_extensions = env_path(runtime, "BPM_LOCAL_EXTENSIONS")
            .map(|p| project_dir.join(p))
            .unwrap_or_else(|| project_dir.join(LOCAL_EXTENSIONS_DIR));
        let global_extensions = env_path(runtime, "BPM_GLOBAL_EXTENSIONS")
            .unwrap_or_else(|| home.join(".bpm").join("extensions"));

        let cache_ttl = env_number(runtime, "BPM_CACHE_TTL_SECS")?
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_TTL);
        let timeout = env_number(runtime, "BPM_TIMEOUT_SECS")?
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_TIMEOUT);

        let max_parallel = match env_number(runtime, "BPM_MAX_PARALLEL")? {
            Some(0) => {
                return Err(
                    BpmError::InputInvalid("BPM_MAX_PARALLEL must be at least 1".into()).into(),
                );
            }
            Some(n) => n as usize,
            None => DEFAULT_MAX_PARALLEL,
        };

        Ok(Self {
            home,
            project_dir,
            registry_url,
            token,
            local_extensions,
            global_extensions,
            cache_ttl,
            timeout,
            max_parallel,
        })
    }

    /// `<home>/.bpm/cache`
    pub fn cache_dir(&self) -> PathBuf {
        self.home.join(".bpm").join("cache")
    }

    /// `./.bpmconfig` for local scope, `<home>/.bpmconfig` for global.
    pub fn config_path(&self, scope: Scope) -> PathBuf {
        match scope {
            Scope::Local => self.project_dir.join(CONFIG_FILE),
            Scope::Global => self.home.join(CONFIG_FILE),
        }
    }

    pub fn extensions_dir(&self, scope: Scope) -> &Path {
        match scope {
            Scope::Local => &self.local_extensions,
            Scope::Global => &self.global_extensions,
        }
    }

    /// Install directories that a project published from `project` must
    /// not carry: both scope roots and the default local root inside it.
    pub fn extension_roots(&self, project: &Path) -> Vec<PathBuf> {
        let mut roots = vec![
            self.local_extensions.clone(),
            self.global_extensions.clone(),
        ];
        let nested = self.project_dir.join(project).join(LOCAL_EXTENSIONS_DIR);
        if !roots.contains(&nested) {
            roots.push(nested);
        }
        roots
    }

    pub fn registry(&self) -> Result<Registry> {
        let http = HttpClient::with_timeout(self.timeout)?;
        Ok(Registry::new(
            http,
            self.registry_url.clone(),
            self.token.clone(),
        ))
    }
}

fn env_string<R: Runtime + ?Sized>(runtime: &R, key: &str) -> Option<String> {
    runtime
        .env_var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_path<R: Runtime + ?Sized>(runtime: &R, key: &str) -> Option<PathBuf> {
    env_string(runtime, key).map(PathBuf::from)
}

fn env_number<R: Runtime + ?Sized>(runtime: &R, key: &str) -> Result<Option<u64>> {
    match env_string(runtime, key) {
        Some(value) => value
            .parse()
            .map(Some)
            .map_err(|_| BpmError::InputInvalid(format!("{} must be a number, got '{}'", key, value)).into()),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::MockRuntime;
    use std::collections::HashMap;
    use std::env::VarError;

    fn runtime_with_env(vars: &[(&str, &str)]) -> MockRuntime {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();

        let mut runtime = MockRuntime::new();
        runtime
            .expect_current_dir()
            .returning(|| Ok(PathBuf::from("/work/project")));
        runtime
            .expect_home_dir()
            .returning(|| Some(PathBuf::from("/home/user")));
        runtime
            .expect_env_var()
            .returning(move |key| vars.get(key).cloned().ok_or(VarError::NotPresent));
        runtime
    }

    #[test]
    fn test_defaults() {
        let runtime = runtime_with_env(&[]);
        let settings = Settings::new(&runtime, None, None).unwrap();

        assert_eq!(settings.home, PathBuf::from("/home/user"));
        assert_eq!(settings.registry_url, DEFAULT_REGISTRY);
        assert_eq!(settings.token, None);
        assert_eq!(settings.cache_ttl, DEFAULT_TTL);
        assert_eq!(settings.timeout, DEFAULT_TIMEOUT);
        assert_eq!(settings.max_parallel, DEFAULT_MAX_PARALLEL);
        assert_eq!(
            settings.cache_dir(),
            PathBuf::from("/home/user/.bpm/cache")
        );
        assert_eq!(
            settings.extensions_dir(Scope::Local),
            Path::new("/work/project/bpm_extensions")
        );
        assert_eq!(
            settings.extensions_dir(Scope::Global),
            Path::new("/home/user/.bpm/extensions")
        );
        assert_eq!(
            settings.config_path(Scope::Local),
            PathBuf::from("/work/project/.bpmconfig")
        );
        assert_eq!(
            settings.config_path(Scope::Global),
            PathBuf::from("/home/user/.bpmconfig")
        );
    }

    #[test]
    fn test_environment_overrides() {
        let runtime = runtime_with_env(&[
            ("BPM_HOME", "/srv/bpm"),
            ("BPM_REGISTRY", "http://localhost:9000"),
            ("BPM_TOKEN", "tok"),
            ("BPM_LOCAL_EXTENSIONS", "ext"),
            ("BPM_GLOBAL_EXTENSIONS", "/opt/bpm"),
            ("BPM_CACHE_TTL_SECS", "60"),
            ("BPM_MAX_PARALLEL", "8"),
        ]);
        let settings = Settings::new(&runtime, None, None).unwrap();

        assert_eq!(settings.home, PathBuf::from("/srv/bpm"));
        assert_eq!(settings.registry_url, "http://localhost:9000");
        assert_eq!(settings.token.as_deref(), Some("tok"));
        assert_eq!(
            settings.extensions_dir(Scope::Local),
            Path::new("/work/project/ext")
        );
        assert_eq!(settings.extensions_dir(Scope::Global), Path::new("/opt/bpm"));
        assert_eq!(settings.cache_ttl, Duration::from_secs(60));
        assert_eq!(settings.max_parallel, 8);
    }

    #[test]
    fn test_extension_roots_for_publish() {
        let runtime = runtime_with_env(&[]);
        let settings = Settings::new(&runtime, None, None).unwrap();

        assert_eq!(
            settings.extension_roots(Path::new(".")),
            vec![
                PathBuf::from("/work/project/bpm_extensions"),
                PathBuf::from("/home/user/.bpm/extensions"),
            ]
        );
        assert_eq!(
            settings.extension_roots(Path::new("/src/lib")),
            vec![
                PathBuf::from("/work/project/bpm_extensions"),
                PathBuf::from("/home/user/.bpm/extensions"),
                PathBuf::from("/src/lib/bpm_extensions"),
            ]
        );
    }

    #[test]
    fn test_arguments_win_over_environment() {
        let runtime = runtime_with_env(&[
            ("BPM_HOME", "/srv/bpm"),
            ("BPM_REGISTRY", "http://localhost:9000"),
        ]);
        let settings = Settings::new(
            &runtime,
            Some(PathBuf::from("/tmp/home")),
            Some("http://mirror".into()),
        )
        .unwrap();

        assert_eq!(settings.home, PathBuf::from("/tmp/home"));
        assert_eq!(settings.registry_url, "http://mirror");
    }

    #[test]
    fn test_invalid_numbers_are_rejected() {
        let runtime = runtime_with_env(&[("BPM_CACHE_TTL_SECS", "soon")]);
        let err = Settings::new(&runtime, None, None).unwrap_err();
        assert!(matches!(
            BpmError::find(&err),
            Some(BpmError::InputInvalid(_))
        ));

        let runtime = runtime_with_env(&[("BPM_MAX_PARALLEL", "0")]);
        assert!(Settings::new(&runtime, None, None).is_err());
    }

    #[test]
    fn test_missing_home() {
        let mut runtime = MockRuntime::new();
        runtime
            .expect_current_dir()
            .returning(|| Ok(PathBuf::from("/work")));
        runtime.expect_home_dir().returning(|| None);
        runtime
            .expect_env_var()
            .returning(|_| Err(VarError::NotPresent));

        assert!(Settings::new(&runtime, None, None).is_err());
    }

    #[test]
    fn test_scope_display() {
        assert_eq!(Scope::Local.to_string(), "local");
        assert_eq!(Scope::from_global_flag(true), Scope::Global);
    }
}
