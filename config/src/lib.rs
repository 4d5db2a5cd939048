use secrecy::SecretString;
use serde::Deserialize;
use std::path::PathBuf;

pub const DEFAULT_EMBEDDING_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";
pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = 1536;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required env var: {0}")]
    Missing(&'static str),

    #[error("Invalid value for {name}: {reason}")]
    Invalid { name: &'static str, reason: String },

    #[error("Could not read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Could not parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Fully resolved process configuration. Every field has been checked, so
/// holding an `AppConfig` means startup can proceed.
#[derive(Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub databricks: DatabricksConfig,
    pub embedding: EmbeddingConfig,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
}

#[derive(Debug, Clone)]
pub struct DatabricksConfig {
    pub host: String,
    pub http_path: String,
    pub access_token: SecretString,
    pub catalog: String,
    pub schema: String,
}

#[derive(Debug, Clone)]
pub struct EmbeddingConfig {
    pub url: String,
    pub model: String,
    pub api_key: Option<SecretString>,
    pub dimensions: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_EMBEDDING_URL.to_string(),
            model: DEFAULT_EMBEDDING_MODEL.to_string(),
            api_key: None,
            dimensions: DEFAULT_EMBEDDING_DIMENSIONS,
        }
    }
}

// On-disk shape. Everything is optional here because the environment may
// supply whatever the file leaves out.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct FileConfig {
    database: FileDatabase,
    databricks: FileDatabricks,
    embedding: FileEmbedding,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct FileDatabase {
    url: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct FileDatabricks {
    host: Option<String>,
    http_path: Option<String>,
    access_token: Option<String>,
    catalog: Option<String>,
    schema: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct FileEmbedding {
    url: Option<String>,
    model: Option<String>,
    api_key: Option<String>,
    dimensions: Option<usize>,
}

impl AppConfig {
    /// Loads `$ANALYTICS_MCP_CONFIG` (or `~/.config/analytics-mcp/config.toml`
    /// when present) and overlays the process environment on top of it.
    pub fn load() -> Result<Self, ConfigError> {
        let file = read_config_file(
            std::env::var("ANALYTICS_MCP_CONFIG").ok(),
            std::env::var("HOME").ok(),
        )?;

        Self::from_sources(file.as_deref(), |name| std::env::var(name).ok())
    }

    /// Resolves configuration from an optional TOML document and an
    /// environment lookup. Environment values win over file values.
    pub fn from_sources(
        file: Option<&str>,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let file: FileConfig = match file {
            Some(contents) => toml::from_str(contents)?,
            None => FileConfig::default(),
        };

        let lookup = |name: &'static str, fallback: Option<String>| {
            env(name)
                .filter(|value| !value.trim().is_empty())
                .or(fallback.filter(|value| !value.trim().is_empty()))
        };
        let required = |name: &'static str, fallback: Option<String>| {
            lookup(name, fallback).ok_or(ConfigError::Missing(name))
        };

        let database = DatabaseConfig {
            url: required("DB_CONNECTION_STRING", file.database.url)?,
        };

        let databricks = DatabricksConfig {
            host: required("DATABRICKS_HOST", file.databricks.host)?,
            http_path: required("DATABRICKS_HTTP_PATH", file.databricks.http_path)?,
            access_token: required("DATABRICKS_ACCESS_TOKEN", file.databricks.access_token)?
                .into(),
            catalog: required("DATABRICKS_CATALOG", file.databricks.catalog)?,
            schema: required("DATABRICKS_SCHEMA", file.databricks.schema)?,
        };

        let dimensions = match env("EMBEDDING_DIMENSIONS") {
            Some(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid {
                name: "EMBEDDING_DIMENSIONS",
                reason: format!("expected a positive integer, got {raw:?}"),
            })?,
            None => file
                .embedding
                .dimensions
                .unwrap_or(DEFAULT_EMBEDDING_DIMENSIONS),
        };
        if dimensions == 0 {
            return Err(ConfigError::Invalid {
                name: "EMBEDDING_DIMENSIONS",
                reason: "must be greater than zero".to_string(),
            });
        }

        let embedding = EmbeddingConfig {
            url: lookup("EMBEDDING_API_URL", file.embedding.url)
                .unwrap_or_else(|| DEFAULT_EMBEDDING_URL.to_string()),
            model: lookup("EMBEDDING_MODEL", file.embedding.model)
                .unwrap_or_else(|| DEFAULT_EMBEDDING_MODEL.to_string()),
            api_key: lookup("EMBEDDING_API_KEY", None)
                .or_else(|| lookup("OPENAI_API_KEY", file.embedding.api_key))
                .map(SecretString::from),
            dimensions,
        };

        Ok(Self {
            database,
            databricks,
            embedding,
        })
    }
}

/// An explicitly configured file must be readable. The default location is
/// optional and skipped when absent.
fn read_config_file(
    explicit: Option<String>,
    home_dir: Option<String>,
) -> Result<Option<String>, ConfigError> {
    let read = |path: PathBuf| {
        std::fs::read_to_string(&path)
            .map(Some)
            .map_err(|source| ConfigError::Read { path, source })
    };

    if let Some(path) = explicit.filter(|path| !path.trim().is_empty()) {
        return read(PathBuf::from(path));
    }

    match home_dir {
        Some(home_dir) => {
            let path = PathBuf::from(format!("{home_dir}/.config/analytics-mcp/config.toml"));
            if path.exists() { read(path) } else { Ok(None) }
        }
        None => Ok(None),
    }
}
