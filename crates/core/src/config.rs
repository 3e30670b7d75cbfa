//! Configuration management for DocQA.
//!
//! Configuration is merged from several sources, later ones winning:
//! - Built-in defaults
//! - Config file (`.docqa/config.yaml` in the workspace, or `DOCQA_CONFIG`)
//! - Environment variables
//! - Command-line flags (`with_overrides`)
//!
//! The `knowledge:` section of the YAML file is kept as a raw value and
//! interpreted by the knowledge crate, so this crate stays independent of it.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{AppError, AppResult};
use crate::logging::LogFormat;

/// Name of the per-workspace state directory.
pub const DATA_DIR_NAME: &str = ".docqa";

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Path to the workspace root (contains .docqa/)
    pub workspace: PathBuf,

    /// Optional config file path
    pub config_file: Option<PathBuf>,

    /// Log level override
    pub log_level: Option<String>,

    /// Log output format
    pub log_format: LogFormat,

    /// Verbose mode (enables debug logging)
    pub verbose: bool,

    /// Disable colored output
    pub no_color: bool,

    /// Embedding provider override (takes precedence over the YAML section)
    pub embedding_provider: Option<String>,

    /// Embedding model override
    pub embedding_model: Option<String>,

    /// Raw `knowledge:` section from the config file
    #[serde(default)]
    pub knowledge: Option<serde_yaml::Value>,
}

/// Full configuration file structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct ConfigFile {
    workspace: Option<WorkspaceSection>,
    logging: Option<LoggingSection>,
    knowledge: Option<serde_yaml::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct WorkspaceSection {
    path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LoggingSection {
    level: Option<String>,
    color: Option<bool>,
    format: Option<LogFormat>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            workspace: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            config_file: None,
            log_level: None,
            log_format: LogFormat::Pretty,
            verbose: false,
            no_color: false,
            embedding_provider: None,
            embedding_model: None,
            knowledge: None,
        }
    }
}

impl AppConfig {
    /// Load configuration from defaults, the config file and environment.
    ///
    /// Environment variables:
    /// - `DOCQA_WORKSPACE`: Override workspace path
    /// - `DOCQA_CONFIG`: Path to config file
    /// - `DOCQA_EMBEDDING_PROVIDER`: Embedding provider (mock, ollama, openai)
    /// - `DOCQA_EMBEDDING_MODEL`: Embedding model identifier
    /// - `DOCQA_LOG_FORMAT`: pretty or json
    /// - `RUST_LOG`: Log level
    /// - `NO_COLOR`: Disable colored output
    pub fn load() -> AppResult<Self> {
        let mut config = Self::default();

        if let Ok(workspace) = std::env::var("DOCQA_WORKSPACE") {
            config.workspace = PathBuf::from(workspace);
        }

        if let Ok(config_file) = std::env::var("DOCQA_CONFIG") {
            config.config_file = Some(PathBuf::from(config_file));
        }

        if !config.workspace.exists() {
            return Err(AppError::Config(format!(
                "Workspace directory does not exist: {:?}",
                config.workspace
            )));
        }

        let config_path = config
            .config_file
            .clone()
            .unwrap_or_else(|| config.data_dir().join("config.yaml"));

        if config_path.exists() {
            config = config.merge_yaml(&config_path)?;
        }

        config.apply_env();

        Ok(config)
    }

    /// Apply environment-variable overrides on top of file settings.
    fn apply_env(&mut self) {
        if let Ok(provider) = std::env::var("DOCQA_EMBEDDING_PROVIDER") {
            self.embedding_provider = Some(provider);
        }

        if let Ok(model) = std::env::var("DOCQA_EMBEDDING_MODEL") {
            self.embedding_model = Some(model);
        }

        if let Ok(format) = std::env::var("DOCQA_LOG_FORMAT") {
            match format.parse() {
                Ok(format) => self.log_format = format,
                Err(e) => tracing::warn!("Ignoring DOCQA_LOG_FORMAT: {}", e),
            }
        }

        if let Ok(level) = std::env::var("RUST_LOG") {
            self.log_level = Some(level);
        }

        if std::env::var_os("NO_COLOR").is_some() {
            self.no_color = true;
        }
    }

    /// Merge a YAML configuration file into a copy of this config.
    fn merge_yaml(&self, path: &Path) -> AppResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            AppError::Config(format!("Failed to read config file {:?}: {}", path, e))
        })?;

        self.merge_yaml_str(&contents)
            .map_err(|e| AppError::Config(format!("Failed to parse config file {:?}: {}", path, e)))
    }

    fn merge_yaml_str(&self, contents: &str) -> AppResult<Self> {
        let config_file: ConfigFile = if contents.trim().is_empty() {
            ConfigFile::default()
        } else {
            serde_yaml::from_str(contents)?
        };

        let mut result = self.clone();

        if let Some(path) = config_file.workspace.and_then(|ws| ws.path) {
            result.workspace = PathBuf::from(path);
        }

        if let Some(logging) = config_file.logging {
            if let Some(level) = logging.level {
                result.log_level = Some(level);
            }
            if let Some(color) = logging.color {
                result.no_color = !color;
            }
            if let Some(format) = logging.format {
                result.log_format = format;
            }
        }

        if config_file.knowledge.is_some() {
            result.knowledge = config_file.knowledge;
        }

        Ok(result)
    }

    /// Apply CLI overrides to the configuration.
    ///
    /// Command-line flags take precedence over environment variables and
    /// the config file.
    #[allow(clippy::too_many_arguments)]
    pub fn with_overrides(
        mut self,
        workspace: Option<PathBuf>,
        config_file: Option<PathBuf>,
        embedding_provider: Option<String>,
        embedding_model: Option<String>,
        log_level: Option<String>,
        verbose: bool,
        no_color: bool,
    ) -> Self {
        if let Some(workspace) = workspace {
            self.workspace = workspace;
        }

        if let Some(config_file) = config_file {
            self.config_file = Some(config_file);
        }

        if let Some(provider) = embedding_provider {
            self.embedding_provider = Some(provider);
        }

        if let Some(model) = embedding_model {
            self.embedding_model = Some(model);
        }

        if let Some(log_level) = log_level {
            self.log_level = Some(log_level);
        }

        if verbose {
            self.verbose = true;
            if self.log_level.is_none() {
                self.log_level = Some("debug".to_string());
            }
        }

        if no_color {
            self.no_color = true;
        }

        self
    }

    /// Path to the .docqa directory.
    pub fn data_dir(&self) -> PathBuf {
        self.workspace.join(DATA_DIR_NAME)
    }

    /// Ensure the .docqa directory exists.
    pub fn ensure_data_dir(&self) -> AppResult<()> {
        let data_dir = self.data_dir();
        if !data_dir.exists() {
            std::fs::create_dir_all(&data_dir).map_err(|e| {
                AppError::Config(format!("Failed to create {} directory: {}", DATA_DIR_NAME, e))
            })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.log_format, LogFormat::Pretty);
        assert!(config.embedding_provider.is_none());
        assert!(!config.verbose);
        assert!(!config.no_color);
    }

    #[test]
    fn test_data_dir() {
        let config = AppConfig::default();
        assert!(config.data_dir().ends_with(".docqa"));
    }

    #[test]
    fn test_with_overrides() {
        let config = AppConfig::default();
        let overridden = config.with_overrides(
            None,
            None,
            Some("ollama".to_string()),
            Some("nomic-embed-text".to_string()),
            None,
            true,
            false,
        );

        assert_eq!(overridden.embedding_provider.as_deref(), Some("ollama"));
        assert_eq!(overridden.embedding_model.as_deref(), Some("nomic-embed-text"));
        assert!(overridden.verbose);
        assert_eq!(overridden.log_level, Some("debug".to_string()));
    }

    #[test]
    fn test_merge_yaml_sections() {
        let yaml = r#"
logging:
  level: warn
  color: false
  format: json
knowledge:
  chunk_size: 500
  embedding:
    provider: mock
"#;
        let merged = AppConfig::default().merge_yaml_str(yaml).unwrap();
        assert_eq!(merged.log_level.as_deref(), Some("warn"));
        assert!(merged.no_color);
        assert_eq!(merged.log_format, LogFormat::Json);

        let knowledge = merged.knowledge.expect("knowledge section kept");
        assert_eq!(knowledge["chunk_size"].as_u64(), Some(500));
    }

    #[test]
    fn test_merge_empty_file() {
        let merged = AppConfig::default().merge_yaml_str("  \n").unwrap();
        assert!(merged.knowledge.is_none());
    }

    #[test]
    fn test_ensure_data_dir() {
        let temp = TempDir::new().unwrap();
        let config = AppConfig {
            workspace: temp.path().to_path_buf(),
            ..Default::default()
        };
        config.ensure_data_dir().unwrap();
        assert!(temp.path().join(".docqa").is_dir());
    }
}
