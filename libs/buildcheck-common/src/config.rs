// Harness configuration: generator, backends, timeouts, workdir policy
use crate::types::{Backend, Outcome};
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

pub const DEFAULT_CONFIG_PATH: &str = "config/harness.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratorConfig {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default = "default_depth")]
    pub depth: String,
}

fn default_depth() -> String {
    ".".to_string()
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            program: "gyp".to_string(),
            args: Vec::new(),
            depth: default_depth(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendSettings {
    pub name: Backend,
    /// Overrides the build tool's default program name
    #[serde(default)]
    pub program: Option<String>,
    /// Extra arguments placed before the backend's own arguments
    #[serde(default)]
    pub args: Vec<String>,
}

/// Which outcomes keep their temporary workspace around for inspection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreservePolicy {
    #[serde(default)]
    pub pass: bool,
    #[serde(default)]
    pub fail: bool,
    #[serde(default)]
    pub no_result: bool,
}

impl PreservePolicy {
    pub fn all() -> Self {
        Self {
            pass: true,
            fail: true,
            no_result: true,
        }
    }

    pub fn preserves(&self, outcome: Outcome) -> bool {
        match outcome {
            Outcome::Pass => self.pass,
            Outcome::Fail => self.fail,
            Outcome::NoResult => self.no_result,
        }
    }

    /// Fold `PRESERVE`-style switches into the policy. `all` wins over the
    /// per-outcome switches; an empty value counts as unset.
    pub fn with_overrides(
        mut self,
        all: Option<&str>,
        pass: Option<&str>,
        fail: Option<&str>,
        no_result: Option<&str>,
    ) -> Self {
        let set = |v: Option<&str>| v.map(|s| !s.is_empty()).unwrap_or(false);
        if set(all) {
            return Self::all();
        }
        self.pass |= set(pass);
        self.fail |= set(fail);
        self.no_result |= set(no_result);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HarnessConfig {
    #[serde(default)]
    pub generator: GeneratorConfig,
    #[serde(default = "default_configuration")]
    pub configuration: String,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_true")]
    pub universal_newlines: bool,
    #[serde(default = "default_workdir_prefix")]
    pub workdir_prefix: String,
    #[serde(default)]
    pub preserve: PreservePolicy,
    /// Toolchain variables handed to every subprocess (CC, CXX, GYP_DEFINES, ...)
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default = "default_backends")]
    pub backends: Vec<BackendSettings>,
}

fn default_configuration() -> String {
    "Default".to_string()
}

fn default_timeout_ms() -> u64 {
    10 * 60 * 1000
}

fn default_true() -> bool {
    true
}

fn default_workdir_prefix() -> String {
    "buildcheck-".to_string()
}

fn default_backends() -> Vec<BackendSettings> {
    Backend::ALL
        .iter()
        .map(|&name| BackendSettings {
            name,
            program: None,
            args: Vec::new(),
        })
        .collect()
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            generator: GeneratorConfig::default(),
            configuration: default_configuration(),
            timeout_ms: default_timeout_ms(),
            universal_newlines: true,
            workdir_prefix: default_workdir_prefix(),
            preserve: PreservePolicy::default(),
            env: BTreeMap::new(),
            backends: default_backends(),
        }
    }
}

impl HarnessConfig {
    /// Load harness configuration from a JSON file
    pub fn load(config_path: &Path) -> Result<Self> {
        if !config_path.exists() {
            bail!("Harness config file not found: {}", config_path.display());
        }

        let content = fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read {}", config_path.display()))?;

        let config: HarnessConfig = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {}", config_path.display()))?;

        config.validate()?;
        Ok(config)
    }

    /// Load with default path (config/harness.json)
    pub fn load_default() -> Result<Self> {
        Self::load(Path::new(DEFAULT_CONFIG_PATH))
    }

    /// Load the file if it exists, otherwise fall back to built-in defaults
    pub fn load_or_default(config_path: &Path) -> Result<Self> {
        if config_path.exists() {
            Self::load(config_path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, config_path: &Path) -> Result<()> {
        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json_content = serde_json::to_string_pretty(self)
            .context("Failed to serialize harness config")?;
        fs::write(config_path, json_content)
            .with_context(|| format!("Failed to write {}", config_path.display()))?;
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.generator.program.trim().is_empty() {
            bail!("generator.program must not be empty");
        }
        if self.configuration.trim().is_empty() {
            bail!("configuration must not be empty");
        }
        if self.timeout_ms == 0 {
            bail!("timeout_ms must be greater than zero");
        }
        let mut seen = Vec::new();
        for backend in &self.backends {
            if seen.contains(&backend.name) {
                bail!("Backend '{}' is configured more than once", backend.name);
            }
            seen.push(backend.name);
        }
        Ok(())
    }

    /// Get settings for a specific backend
    pub fn backend_settings(&self, backend: Backend) -> Result<&BackendSettings> {
        self.backends
            .iter()
            .find(|b| b.name == backend)
            .ok_or_else(|| anyhow::anyhow!("No configuration found for backend: {}", backend))
    }

    /// List all configured backends
    pub fn list_backends(&self) -> Vec<Backend> {
        self.backends.iter().map(|b| b.name).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_cover_every_backend() {
        let config = HarnessConfig::default();
        assert_eq!(config.list_backends(), Backend::ALL.to_vec());
        assert_eq!(config.configuration, "Default");
        assert!(config.universal_newlines);
        assert!(config.backend_settings(Backend::Ninja).is_ok());
    }

    #[test]
    fn test_load_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("harness.json");
        fs::write(
            &path,
            r#"{ "generator": { "program": "/opt/gyp/gyp" }, "env": { "CC": "clang" },
                 "backends": [ { "name": "ninja", "program": "ninja-build" } ] }"#,
        )
        .unwrap();

        let config = HarnessConfig::load(&path).unwrap();
        assert_eq!(config.generator.program, "/opt/gyp/gyp");
        assert_eq!(config.generator.depth, ".");
        assert_eq!(config.env.get("CC").map(String::as_str), Some("clang"));
        assert_eq!(config.list_backends(), vec![Backend::Ninja]);
        assert_eq!(
            config.backend_settings(Backend::Ninja).unwrap().program.as_deref(),
            Some("ninja-build")
        );
        assert!(config.backend_settings(Backend::Make).is_err());
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.json");
        assert!(HarnessConfig::load(&path).is_err());
        assert_eq!(HarnessConfig::load_or_default(&path).unwrap(), HarnessConfig::default());
    }

    #[test]
    fn test_rejects_duplicate_backends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("harness.json");
        fs::write(&path, r#"{ "backends": [ { "name": "make" }, { "name": "make" } ] }"#).unwrap();

        let err = HarnessConfig::load(&path).unwrap_err();
        assert!(err.to_string().contains("more than once"));
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config/harness.json");
        let mut config = HarnessConfig::default();
        config.timeout_ms = 1234;
        config.save(&path).unwrap();

        assert_eq!(HarnessConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn test_preserve_overrides() {
        let base = PreservePolicy::default();
        assert_eq!(base.with_overrides(Some("1"), None, None, None), PreservePolicy::all());
        assert_eq!(base.with_overrides(Some(""), None, None, None), base);

        let policy = base.with_overrides(None, None, Some("yes"), None);
        assert!(policy.preserves(Outcome::Fail));
        assert!(!policy.preserves(Outcome::Pass));
        assert!(!policy.preserves(Outcome::NoResult));
    }
}
