//! CLI configuration management.

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// CLI configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CliConfig {
    /// Upper bound on concurrently running job instances.
    #[serde(default)]
    pub max_workers: Option<usize>,
    /// Shell used for `run:` steps.
    #[serde(default = "default_shell")]
    pub shell: String,
    /// Per-step timeout in seconds.
    #[serde(default)]
    pub step_timeout_secs: Option<u64>,
    /// Output format.
    #[serde(default)]
    pub output_format: OutputFormat,
    /// Pipeline file used when none is given.
    #[serde(default = "default_pipeline_path")]
    pub pipeline_path: PathBuf,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            max_workers: None,
            shell: default_shell(),
            step_timeout_secs: None,
            output_format: OutputFormat::default(),
            pipeline_path: default_pipeline_path(),
        }
    }
}

fn default_shell() -> String {
    "sh".to_string()
}

fn default_pipeline_path() -> PathBuf {
    PathBuf::from("gantry.yaml")
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
    Yaml,
}

impl CliConfig {
    /// Load configuration from the user config file.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    /// Load configuration from a file, falling back to defaults when it is missing.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        serde_yaml::from_str(&content).with_context(|| format!("parsing {}", path.display()))
    }

    /// Save configuration to the user config file.
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get the configuration file path.
    pub fn config_path() -> Result<PathBuf> {
        let dirs = directories::ProjectDirs::from("build", "gantry", "gantry")
            .ok_or_else(|| anyhow!("Could not determine config directory"))?;
        Ok(dirs.config_dir().join("config.yaml"))
    }

    /// Set a configuration value.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), String> {
        match key {
            "max_workers" => self.max_workers = Some(parse_positive(key, value)? as usize),
            "shell" => self.shell = value.to_string(),
            "step_timeout_secs" => self.step_timeout_secs = Some(parse_positive(key, value)?),
            "pipeline_path" => self.pipeline_path = PathBuf::from(value),
            "output_format" => {
                self.output_format = match value {
                    "table" => OutputFormat::Table,
                    "json" => OutputFormat::Json,
                    "yaml" => OutputFormat::Yaml,
                    _ => return Err(format!("Invalid output format: {}", value)),
                };
            }
            _ => return Err(format!("Unknown config key: {}", key)),
        }
        Ok(())
    }
}

fn parse_positive(key: &str, value: &str) -> Result<u64, String> {
    match value.parse::<u64>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(format!("{} must be a positive integer, got '{}'", key, value)),
    }
}
