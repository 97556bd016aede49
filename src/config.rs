// deckhand Configuration Module
//
// Optional defaults loaded from deckhand.yaml. Command-line flags and
// environment variables override anything set here.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default configuration file name, looked up in the current directory.
pub const DEFAULT_CONFIG_FILE: &str = "deckhand.yaml";

/// Defaults for a deckhand run
#[derive(Debug, Default, Serialize, Deserialize, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// KMS key ID or alias used for encryption
    #[serde(default)]
    pub key_id: Option<String>,

    /// AWS region
    #[serde(default)]
    pub region: Option<String>,

    /// Shared credentials profile name
    #[serde(default)]
    pub profile: Option<String>,

    /// KMS endpoint override
    #[serde(default)]
    pub endpoint_url: Option<String>,

    /// Directory holding the fragment files
    #[serde(default)]
    pub vars_path: Option<String>,

    /// Image tag substituted for `$tag`
    #[serde(default)]
    pub tag: Option<String>,
}

impl Config {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;

        let config: Config = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path.as_ref()))?;

        Ok(config)
    }

    /// Load `path` if given, otherwise deckhand.yaml from the current
    /// directory if it exists, otherwise empty defaults.
    pub fn discover(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None if Path::new(DEFAULT_CONFIG_FILE).is_file() => {
                Self::from_file(DEFAULT_CONFIG_FILE)
            }
            None => Ok(Self::default()),
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        let fields = [
            ("key_id", &self.key_id),
            ("region", &self.region),
            ("profile", &self.profile),
            ("endpoint_url", &self.endpoint_url),
            ("vars_path", &self.vars_path),
            ("tag", &self.tag),
        ];

        for (name, value) in fields {
            if matches!(value, Some(v) if v.trim().is_empty()) {
                anyhow::bail!("'{}' cannot be empty; remove it to use the default", name);
            }
        }

        if let Some(tag) = &self.tag {
            if tag.contains(':') || tag.contains('/') {
                anyhow::bail!("Invalid image tag: '{}'", tag);
            }
        }

        Ok(())
    }

    /// Get the fragment directory, with a leading `~` expanded
    pub fn vars_path(&self) -> Result<Option<PathBuf>> {
        self.vars_path.as_deref().map(expand_home).transpose()
    }
}

/// Expand a leading `~` to the home directory.
pub fn expand_home(path: &str) -> Result<PathBuf> {
    match path.strip_prefix('~') {
        Some(rest) if rest.is_empty() || rest.starts_with('/') => {
            let home = dirs::home_dir().context("Failed to determine home directory")?;
            Ok(home.join(rest.trim_start_matches('/')))
        }
        _ => Ok(PathBuf::from(path)),
    }
}
