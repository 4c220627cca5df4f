
use thiserror::Error;

use crate::config_env::{
    optional_trimmed_env, parse_bool_env, parse_u64_env, parse_usize_env,
    require_identifier,
};
use crate::llm::GeminiGatewayConfig;

const DEFAULT_BIND_ADDR: &str = "127.0.0.1:8080";
const DEFAULT_BACKEND_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_CHAT_HISTORY_LIMIT: usize = 100;
const DEFAULT_WORKER_TICK_SECONDS: u64 = 300;
const DEFAULT_WORKER_TOPIC_BATCH: usize = 50;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required env var {0}")]
    MissingVar(String),
    #[error("env var {0} still holds a placeholder value")]
    PlaceholderValue(String),
    #[error("invalid integer in env var {0}")]
    ParseInt(String),
    #[error("invalid boolean in env var {0}")]
    ParseBool(String),
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
}

#[derive(Debug, Clone)]
pub struct BackendConfig {
    pub endpoint: String,
    pub project_id: String,
    pub api_key: String,
    pub database_id: String,
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionIds {
    pub profiles: String,
    pub blood_pressure: String,
    pub blood_sugar: String,
    pub weight: String,
    pub bloodwork: String,
    pub appointments: String,
    pub chat_messages: String,
    pub forum_topics: String,
    pub forum_posts: String,
    pub forum_votes: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketIds {
    pub profile_photos: String,
    pub bloodwork_files: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub bind_addr: String,
    pub backend: BackendConfig,
    pub collections: CollectionIds,
    pub buckets: BucketIds,
    pub gemini: GeminiGatewayConfig,
    pub chat_history_limit: usize,
    pub log_format: LogFormat,
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub tick_seconds: u64,
    pub topic_batch: usize,
    pub run_once: bool,
    pub backend: BackendConfig,
    pub collections: CollectionIds,
    pub log_format: LogFormat,
}

impl ApiConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            bind_addr: optional_trimmed_env("API_BIND_ADDR")
                .unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string()),
            backend: BackendConfig::from_env()?,
            collections: CollectionIds::from_env()?,
            buckets: BucketIds::from_env()?,
            gemini: GeminiGatewayConfig::from_env()?,
            chat_history_limit: parse_usize_env("CHAT_HISTORY_LIMIT", DEFAULT_CHAT_HISTORY_LIMIT)?,
            log_format: LogFormat::from_env()?,
        })
    }
}

impl WorkerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let tick_seconds = parse_u64_env("WORKER_TICK_SECONDS", DEFAULT_WORKER_TICK_SECONDS)?;
        if tick_seconds == 0 {
            return Err(ConfigError::InvalidConfiguration(
                "WORKER_TICK_SECONDS must be > 0".to_string(),
            ));
        }

        Ok(Self {
            tick_seconds,
            topic_batch: parse_usize_env("WORKER_TOPIC_BATCH", DEFAULT_WORKER_TOPIC_BATCH)?,
            run_once: parse_bool_env("WORKER_RUN_ONCE", false)?,
            backend: BackendConfig::from_env()?,
            collections: CollectionIds::from_env()?,
            log_format: LogFormat::from_env()?,
        })
    }
}

impl BackendConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let endpoint = require_identifier("APPWRITE_ENDPOINT")?;
        if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
            return Err(ConfigError::InvalidConfiguration(
                "APPWRITE_ENDPOINT must start with http:// or https://".to_string(),
            ));
        }

        Ok(Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            project_id: require_identifier("APPWRITE_PROJECT_ID")?,
            api_key: require_identifier("APPWRITE_API_KEY")?,
            database_id: require_identifier("APPWRITE_DATABASE_ID")?,
            timeout_ms: parse_u64_env("BACKEND_TIMEOUT_MS", DEFAULT_BACKEND_TIMEOUT_MS)?,
        })
    }
}

impl CollectionIds {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            profiles: require_identifier("PROFILES_COLLECTION_ID")?,
            blood_pressure: require_identifier("BLOOD_PRESSURE_COLLECTION_ID")?,
            blood_sugar: require_identifier("BLOOD_SUGAR_COLLECTION_ID")?,
            weight: require_identifier("WEIGHT_COLLECTION_ID")?,
            bloodwork: require_identifier("BLOODWORK_COLLECTION_ID")?,
            appointments: require_identifier("APPOINTMENTS_COLLECTION_ID")?,
            chat_messages: require_identifier("CHAT_MESSAGES_COLLECTION_ID")?,
            forum_topics: require_identifier("FORUM_TOPICS_COLLECTION_ID")?,
            forum_posts: require_identifier("FORUM_POSTS_COLLECTION_ID")?,
            forum_votes: require_identifier("FORUM_VOTES_COLLECTION_ID")?,
        })
    }

    /// Collection ids matching the names used in local development setups.
    pub fn local_defaults() -> Self {
        Self {
            profiles: "profiles".to_string(),
            blood_pressure: "blood_pressure".to_string(),
            blood_sugar: "blood_sugar".to_string(),
            weight: "weight".to_string(),
            bloodwork: "bloodwork".to_string(),
            appointments: "appointments".to_string(),
            chat_messages: "chat_messages".to_string(),
            forum_topics: "forum_topics".to_string(),
            forum_posts: "forum_posts".to_string(),
            forum_votes: "forum_votes".to_string(),
        }
    }
}

impl BucketIds {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            profile_photos: require_identifier("PROFILE_PHOTOS_BUCKET_ID")?,
            bloodwork_files: require_identifier("BLOODWORK_FILES_BUCKET_ID")?,
        })
    }

    pub fn local_defaults() -> Self {
        Self {
            profile_photos: "profile_photos".to_string(),
            bloodwork_files: "bloodwork_files".to_string(),
        }
    }
}

impl LogFormat {
    fn from_env() -> Result<Self, ConfigError> {
        match optional_trimmed_env("LOG_FORMAT")
            .map(|value| value.to_ascii_lowercase())
            .as_deref()
        {
            None | Some("text") => Ok(Self::Text),
            Some("json") => Ok(Self::Json),
            Some(other) => Err(ConfigError::InvalidConfiguration(format!(
                "LOG_FORMAT must be text or json, got '{other}'"
            ))),
        }
    }
}
