use anyhow::Result;
use serde::Deserialize;
use std::env;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub providers: ProviderConfig,
    pub pipeline: PipelineConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
    pub cors_allowed_origins: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Absent means the service runs on in-memory stores.
    pub url: Option<String>,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
    pub gemini_api_key: Option<String>,
    pub gemini_api_base: String,
    pub gemini_text_model: String,
    pub gemini_vision_model: String,
    pub huggingface_api_key: Option<String>,
    pub huggingface_api_base: String,
    pub huggingface_model: String,
    pub timeout_secs: u64,
    pub translation_timeout_secs: u64,
}

impl ProviderConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn translation_timeout(&self) -> Duration {
        Duration::from_secs(self.translation_timeout_secs)
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            gemini_api_key: None,
            gemini_api_base: crate::llm::gemini::GEMINI_API_BASE.to_string(),
            gemini_text_model: crate::llm::gemini::models::DEFAULT_TEXT.to_string(),
            gemini_vision_model: crate::llm::gemini::models::DEFAULT_VISION.to_string(),
            huggingface_api_key: None,
            huggingface_api_base: crate::llm::huggingface::HF_INFERENCE_API_BASE.to_string(),
            huggingface_model: crate::llm::huggingface::DEFAULT_PLANT_DISEASE_MODEL.to_string(),
            timeout_secs: 12,
            translation_timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    pub knowledge_limit: usize,
    pub context_max_terms: usize,
    /// ISO language code for the localization pass; `None` or "en" disables it.
    pub target_language: Option<String>,
    pub job_deadline_secs: u64,
}

impl PipelineConfig {
    pub fn job_deadline(&self) -> Duration {
        Duration::from_secs(self.job_deadline_secs)
    }

    pub fn localization_language(&self) -> Option<&str> {
        self.target_language
            .as_deref()
            .filter(|lang| !lang.is_empty() && !lang.eq_ignore_ascii_case("en"))
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            knowledge_limit: 3,
            context_max_terms: 5,
            target_language: None,
            job_deadline_secs: 60,
        }
    }
}

fn optional_var(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let provider_defaults = ProviderConfig::default();

        Ok(Self {
            server: ServerConfig {
                port: env::var("PORT")
                    .unwrap_or_else(|_| "3000".to_string())
                    .parse()?,
                host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                cors_allowed_origins: env::var("ALLOWED_ORIGINS")
                    .unwrap_or_else(|_| "http://localhost:3000,http://localhost:5173".to_string())
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect(),
            },
            database: DatabaseConfig {
                url: optional_var("DATABASE_URL"),
                max_connections: env::var("DB_MAX_CONNECTIONS")
                    .unwrap_or_else(|_| "10".to_string())
                    .parse()?,
                min_connections: env::var("DB_MIN_CONNECTIONS")
                    .unwrap_or_else(|_| "1".to_string())
                    .parse()?,
            },
            providers: ProviderConfig {
                gemini_api_key: optional_var("GEMINI_API_KEY"),
                gemini_api_base: optional_var("GEMINI_API_BASE")
                    .unwrap_or(provider_defaults.gemini_api_base),
                gemini_text_model: optional_var("GEMINI_TEXT_MODEL")
                    .unwrap_or(provider_defaults.gemini_text_model),
                gemini_vision_model: optional_var("GEMINI_VISION_MODEL")
                    .unwrap_or(provider_defaults.gemini_vision_model),
                huggingface_api_key: optional_var("HUGGINGFACE_API_KEY"),
                huggingface_api_base: optional_var("HUGGINGFACE_API_BASE")
                    .unwrap_or(provider_defaults.huggingface_api_base),
                huggingface_model: optional_var("HUGGINGFACE_MODEL")
                    .unwrap_or(provider_defaults.huggingface_model),
                timeout_secs: env::var("PROVIDER_TIMEOUT_SECS")
                    .unwrap_or_else(|_| "12".to_string())
                    .parse()?,
                translation_timeout_secs: env::var("TRANSLATION_TIMEOUT_SECS")
                    .unwrap_or_else(|_| "10".to_string())
                    .parse()?,
            },
            pipeline: PipelineConfig {
                knowledge_limit: env::var("KNOWLEDGE_LIMIT")
                    .unwrap_or_else(|_| "3".to_string())
                    .parse()?,
                context_max_terms: env::var("CONTEXT_MAX_TERMS")
                    .unwrap_or_else(|_| "5".to_string())
                    .parse()?,
                target_language: optional_var("TARGET_LANGUAGE"),
                job_deadline_secs: env::var("JOB_DEADLINE_SECS")
                    .unwrap_or_else(|_| "60".to_string())
                    .parse()?,
            },
        })
    }
}
