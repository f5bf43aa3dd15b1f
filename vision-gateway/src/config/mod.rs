use service_core::config as core_config;
use service_core::error::AppError;
use std::env;
use std::str::FromStr;
use std::time::Duration;

const INSECURE_SECRET: &str = "CHANGE_THIS";

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub common: core_config::Config,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub backend: BackendConfig,
    pub frames: FrameConfig,
    pub sessions: SessionConfig,
    pub auth: AuthConfig,
    pub enable_metrics: bool,
}

#[derive(Debug, Clone)]
pub struct BackendConfig {
    pub api_base: String,
    pub model: String,
    pub max_tokens: u32,
    pub timeout_secs: u64,
    /// Bearer token for hosted backends; vLLM accepts any.
    pub api_key: Option<String>,
    /// `mock` or an OpenAI-compatible base URL.
    pub fallback: Option<String>,
}

#[derive(Debug, Clone)]
pub struct FrameConfig {
    pub sample_rate: f64,
    pub queue_size: usize,
    pub width: u32,
    pub height: u32,
    pub timeout_secs: u64,
    pub enable_face_blur: bool,
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub max_sessions: usize,
    pub timeout_secs: u64,
    pub sweep_interval_secs: u64,
}

#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub secret_key: String,
    pub expire_minutes: i64,
    pub require_auth: bool,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            api_base: "http://localhost:12345/v1".to_string(),
            model: "/root/models/qwen2.5-vl-32b".to_string(),
            max_tokens: 128,
            timeout_secs: 120,
            api_key: None,
            fallback: None,
        }
    }
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            sample_rate: 2.0,
            queue_size: 8,
            width: 1024,
            height: 1024,
            timeout_secs: 5,
            enable_face_blur: false,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_sessions: 10,
            timeout_secs: 3600,
            sweep_interval_secs: 60,
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            secret_key: INSECURE_SECRET.to_string(),
            expire_minutes: 60,
            require_auth: true,
        }
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            common: core_config::Config::default(),
            log_level: "info".to_string(),
            otlp_endpoint: None,
            backend: BackendConfig::default(),
            frames: FrameConfig::default(),
            sessions: SessionConfig::default(),
            auth: AuthConfig::default(),
            enable_metrics: true,
        }
    }
}

impl BackendConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl FrameConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl SessionConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

impl GatewayConfig {
    pub fn load() -> Result<Self, AppError> {
        // Load common config (handles .env and APP__ prefix)
        let common = core_config::Config::load()?;

        let is_prod = env::var("ENVIRONMENT").unwrap_or_else(|_| "dev".to_string()) == "prod";
        let defaults = GatewayConfig::default();

        let config = GatewayConfig {
            common,
            log_level: get_env("LOG_LEVEL", Some(&defaults.log_level), false)?,
            otlp_endpoint: env::var("OTLP_ENDPOINT").ok().filter(|v| !v.is_empty()),
            backend: BackendConfig {
                api_base: get_env("VLLM_API_BASE", Some(&defaults.backend.api_base), false)?,
                model: get_env("MODEL_PATH", Some(&defaults.backend.model), false)?,
                max_tokens: parse_env("RESPONSE_MAX_TOKENS", defaults.backend.max_tokens)?,
                timeout_secs: parse_env("BACKEND_TIMEOUT_SECS", defaults.backend.timeout_secs)?,
                api_key: env::var("BACKEND_API_KEY").ok().filter(|v| !v.is_empty()),
                fallback: env::var("FALLBACK_BACKEND").ok().filter(|v| !v.is_empty()),
            },
            frames: FrameConfig {
                sample_rate: parse_env("FRAME_SAMPLE_RATE", defaults.frames.sample_rate)?,
                queue_size: parse_env("FRAME_QUEUE_SIZE", defaults.frames.queue_size)?,
                width: parse_env("FRAME_WIDTH", defaults.frames.width)?,
                height: parse_env("FRAME_HEIGHT", defaults.frames.height)?,
                timeout_secs: parse_env("FRAME_TIMEOUT_SECS", defaults.frames.timeout_secs)?,
                enable_face_blur: parse_env("ENABLE_FACE_BLUR", defaults.frames.enable_face_blur)?,
            },
            sessions: SessionConfig {
                max_sessions: parse_env("MAX_CONCURRENT_SESSIONS", defaults.sessions.max_sessions)?,
                timeout_secs: parse_env("SESSION_TIMEOUT_SECS", defaults.sessions.timeout_secs)?,
                sweep_interval_secs: parse_env(
                    "SESSION_SWEEP_INTERVAL_SECS",
                    defaults.sessions.sweep_interval_secs,
                )?,
            },
            auth: AuthConfig {
                secret_key: get_env("JWT_SECRET_KEY", Some(INSECURE_SECRET), is_prod)?,
                expire_minutes: parse_env("JWT_EXPIRE_MINUTES", defaults.auth.expire_minutes)?,
                require_auth: parse_env("REQUIRE_AUTH", defaults.auth.require_auth)?,
            },
            enable_metrics: parse_env("ENABLE_METRICS", defaults.enable_metrics)?,
        };

        config.validate(is_prod)?;
        Ok(config)
    }

    pub fn validate(&self, is_prod: bool) -> Result<(), AppError> {
        if !self.frames.sample_rate.is_finite() || self.frames.sample_rate <= 0.0 {
            return Err(config_error("FRAME_SAMPLE_RATE must be positive"));
        }
        if self.frames.queue_size == 0 {
            return Err(config_error("FRAME_QUEUE_SIZE must be at least 1"));
        }
        if self.frames.width == 0 || self.frames.height == 0 {
            return Err(config_error("FRAME_WIDTH and FRAME_HEIGHT must be non-zero"));
        }
        if self.sessions.sweep_interval_secs == 0 {
            return Err(config_error("SESSION_SWEEP_INTERVAL_SECS must be at least 1"));
        }
        if is_prod && self.auth.secret_key == INSECURE_SECRET {
            return Err(config_error("JWT_SECRET_KEY must be changed in production"));
        }
        Ok(())
    }
}

fn config_error(msg: &str) -> AppError {
    AppError::ConfigError(anyhow::anyhow!(msg.to_string()))
}

fn get_env(key: &str, default: Option<&str>, is_prod: bool) -> Result<String, AppError> {
    match env::var(key) {
        Ok(val) => Ok(val),
        Err(_) => {
            if is_prod {
                Err(AppError::ConfigError(anyhow::anyhow!(format!(
                    "{} is required in production but not set",
                    key
                ))))
            } else if let Some(def) = default {
                Ok(def.to_string())
            } else {
                Err(AppError::ConfigError(anyhow::anyhow!(format!(
                    "{} is required but not set",
                    key
                ))))
            }
        }
    }
}

fn parse_env<T>(key: &str, default: T) -> Result<T, AppError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw.trim().parse().map_err(|e: T::Err| {
            AppError::ConfigError(anyhow::anyhow!("{} has invalid value {:?}: {}", key, raw, e))
        }),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = GatewayConfig::default();
        assert!(config.validate(false).is_ok());
        assert_eq!(config.frames.queue_size, 8);
        assert_eq!(config.sessions.max_sessions, 10);
        assert_eq!(config.sessions.sweep_interval(), Duration::from_secs(60));
    }

    #[test]
    fn test_rejects_non_positive_rate() {
        let mut config = GatewayConfig::default();
        config.frames.sample_rate = 0.0;
        assert!(config.validate(false).is_err());
    }

    #[test]
    fn test_default_secret_rejected_in_prod() {
        let config = GatewayConfig::default();
        assert!(config.validate(true).is_err());
    }

    #[test]
    fn test_parse_env_reports_bad_values() {
        std::env::set_var("VISION_GATEWAY_TEST_BAD_NUMBER", "lots");
        let result: Result<u32, _> = parse_env("VISION_GATEWAY_TEST_BAD_NUMBER", 3);
        assert!(result.is_err());
        let fallback: u32 = parse_env("VISION_GATEWAY_TEST_UNSET_NUMBER", 3).unwrap();
        assert_eq!(fallback, 3);
    }
}
