//! Configuration for the chat backend.
//!
//! Settings are loaded exclusively from process environment variables,
//! optionally preloaded from a `.env` file via `dotenvy`. There is no
//! database-backed settings layer and no on-disk settings file: this
//! process is stateless between restarts except for what lives in
//! Postgres and Redis.

mod helpers;

use std::time::Duration;

use crate::error::ConfigError;

/// Process-wide settings, loaded once at startup and handed out as `Arc<Settings>`.
#[derive(Debug, Clone)]
pub struct Settings {
    pub app_env: String,
    pub log_level: String,
    pub database_url: String,
    pub llm_api_key: Option<String>,
    pub llm_base_url: String,
    pub llm_model: String,
    pub llm_timeout: Duration,
    pub openai_api_key: Option<String>,
    pub elasticsearch_url: String,
    pub redis_url: String,
    pub schema_manifest_path: String,
    pub http_host: String,
    pub http_port: u16,
}

impl Settings {
    /// Load settings from the environment. Call `dotenvy::dotenv().ok()` before
    /// this in `main`/bootstrap if a `.env` file should be honored; failure to
    /// find one is not an error.
    pub fn from_env() -> Result<Self, ConfigError> {
        let llm_api_key = helpers::optional_env("LLM_API_KEY")?
            .or(helpers::optional_env("GROQ_API_KEY")?);

        Ok(Self {
            app_env: helpers::optional_env("APP_ENV")?.unwrap_or_else(|| "development".into()),
            log_level: helpers::optional_env("LOG_LEVEL")?.unwrap_or_else(|| "info".into()),
            database_url: helpers::require_env("DATABASE_URL")?,
            llm_api_key,
            llm_base_url: helpers::optional_env("LLM_BASE_URL")?
                .unwrap_or_else(|| "https://api.groq.com/openai/v1".into()),
            llm_model: helpers::optional_env("LLM_MODEL")?
                .unwrap_or_else(|| "llama-3.3-70b-versatile".into()),
            llm_timeout: Duration::from_secs(
                helpers::optional_env_parsed::<u64>("LLM_TIMEOUT")?.unwrap_or(60),
            ),
            openai_api_key: helpers::optional_env("OPENAI_API_KEY")?,
            elasticsearch_url: helpers::optional_env("ELASTICSEARCH_URL")?
                .unwrap_or_else(|| "http://localhost:9200".into()),
            redis_url: helpers::optional_env("REDIS_URL")?
                .unwrap_or_else(|| "redis://localhost:6379".into()),
            schema_manifest_path: helpers::optional_env("SCHEMA_MANIFEST_PATH")?
                .unwrap_or_else(|| "schema_manifest.json".into()),
            http_host: helpers::optional_env("HTTP_HOST")?.unwrap_or_else(|| "0.0.0.0".into()),
            http_port: helpers::optional_env_parsed("HTTP_PORT")?.unwrap_or(8000),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Environment variables are process-global; serialize tests that touch them.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn clear_all() {
        for key in [
            "APP_ENV",
            "LOG_LEVEL",
            "DATABASE_URL",
            "LLM_API_KEY",
            "GROQ_API_KEY",
            "LLM_BASE_URL",
            "LLM_MODEL",
            "LLM_TIMEOUT",
            "OPENAI_API_KEY",
            "ELASTICSEARCH_URL",
            "REDIS_URL",
            "SCHEMA_MANIFEST_PATH",
            "HTTP_HOST",
            "HTTP_PORT",
        ] {
            // SAFETY: single-threaded test execution under ENV_LOCK.
            unsafe { std::env::remove_var(key) };
        }
    }

    #[test]
    fn missing_database_url_is_an_error() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_all();
        let result = Settings::from_env();
        assert!(matches!(result, Err(ConfigError::MissingEnv(ref k)) if k == "DATABASE_URL"));
    }

    #[test]
    fn groq_api_key_maps_to_llm_api_key_when_unset() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_all();
        unsafe {
            std::env::set_var("DATABASE_URL", "postgres://localhost/tag");
            std::env::set_var("GROQ_API_KEY", "legacy-key");
        }
        let settings = Settings::from_env().unwrap();
        assert_eq!(settings.llm_api_key.as_deref(), Some("legacy-key"));
        clear_all();
    }

    #[test]
    fn explicit_llm_api_key_wins_over_legacy() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_all();
        unsafe {
            std::env::set_var("DATABASE_URL", "postgres://localhost/tag");
            std::env::set_var("GROQ_API_KEY", "legacy-key");
            std::env::set_var("LLM_API_KEY", "new-key");
        }
        let settings = Settings::from_env().unwrap();
        assert_eq!(settings.llm_api_key.as_deref(), Some("new-key"));
        clear_all();
    }

    #[test]
    fn defaults_are_applied() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_all();
        unsafe {
            std::env::set_var("DATABASE_URL", "postgres://localhost/tag");
        }
        let settings = Settings::from_env().unwrap();
        assert_eq!(settings.app_env, "development");
        assert_eq!(settings.llm_model, "llama-3.3-70b-versatile");
        assert_eq!(settings.llm_timeout, Duration::from_secs(60));
        assert_eq!(settings.http_port, 8000);
        clear_all();
    }
}
