use std::path::{Path, PathBuf};

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

use super::embedding::EmbeddingBackend;

pub const LEDGER_FILE_NAME: &str = "loaded_configs.json";
pub const FILTER_FILE_NAME: &str = "loaded_configs_metadata.json";

#[derive(Clone, Deserialize, Debug)]
pub struct AppConfig {
    #[serde(default)]
    pub openai_api_key: String,
    #[serde(default = "default_base_url")]
    pub openai_base_url: String,
    #[serde(default = "default_chat_model")]
    pub chat_model: String,
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
    #[serde(default)]
    pub embedding_backend: EmbeddingBackend,
    #[serde(default = "default_embedding_dimensions")]
    pub embedding_dimensions: u32,
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    #[serde(default = "default_surrealdb_address")]
    pub surrealdb_address: String,
    #[serde(default)]
    pub surrealdb_username: Option<String>,
    #[serde(default)]
    pub surrealdb_password: Option<String>,
    #[serde(default = "default_namespace")]
    pub surrealdb_namespace: String,
    #[serde(default = "default_database")]
    pub surrealdb_database: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_chat_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}

fn default_embedding_dimensions() -> u32 {
    1536
}

fn default_data_dir() -> String {
    "./database".to_string()
}

fn default_surrealdb_address() -> String {
    "surrealkv://./database/vectors".to_string()
}

fn default_namespace() -> String {
    "rag".to_string()
}

fn default_database() -> String {
    "documents".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl AppConfig {
    pub fn data_dir(&self) -> &Path {
        Path::new(&self.data_dir)
    }

    /// Location of the processed-file ledger inside the data directory.
    pub fn ledger_path(&self) -> PathBuf {
        self.data_dir().join(LEDGER_FILE_NAME)
    }

    /// Location of the active metadata filter, stored next to the ledger.
    pub fn filter_path(&self) -> PathBuf {
        self.data_dir().join(FILTER_FILE_NAME)
    }

    /// Root credentials are only needed for remote SurrealDB servers.
    pub fn surrealdb_credentials(&self) -> Option<(&str, &str)> {
        match (&self.surrealdb_username, &self.surrealdb_password) {
            (Some(username), Some(password)) => Some((username.as_str(), password.as_str())),
            _ => None,
        }
    }
}

pub fn get_config() -> Result<AppConfig, ConfigError> {
    let config = Config::builder()
        .add_source(File::with_name("config").required(false))
        .add_source(Environment::default())
        .build()?;

    config.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_missing_fields() {
        let config: AppConfig = Config::builder()
            .set_override("openai_api_key", "sk-test")
            .and_then(|builder| builder.build())
            .and_then(Config::try_deserialize)
            .expect("config with defaults");

        assert_eq!(config.openai_api_key, "sk-test");
        assert_eq!(config.chat_model, "gpt-4o-mini");
        assert_eq!(config.embedding_dimensions, 1536);
        assert_eq!(config.embedding_backend, EmbeddingBackend::OpenAI);
        assert_eq!(
            config.ledger_path(),
            Path::new("./database").join(LEDGER_FILE_NAME)
        );
        assert_eq!(
            config.filter_path(),
            Path::new("./database").join(FILTER_FILE_NAME)
        );
        assert!(config.surrealdb_credentials().is_none());
    }
}
