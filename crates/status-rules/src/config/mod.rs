use std::env;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;

use crate::engine::{DocumentFallback, EngineConfig, TiePolicy, DEFAULT_MAX_DOCUMENT_BYTES};

/// Distinguishes runtime behavior for different stages of the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnvironment {
    Development,
    Test,
    Production,
}

impl AppEnvironment {
    fn from_str(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "prod" | "production" => Self::Production,
            "test" | "ci" => Self::Test,
            _ => Self::Development,
        }
    }
}

/// Top-level configuration for the application.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: AppEnvironment,
    pub server: ServerConfig,
    pub telemetry: TelemetryConfig,
    pub engine: EngineConfig,
    /// Catalog seed loaded into the store before the server starts accepting traffic.
    pub catalog_seed: Option<PathBuf>,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let environment = AppEnvironment::from_str(
            &env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
        );

        let host = env::var("APP_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = env::var("APP_PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse::<u16>()
            .map_err(|_| ConfigError::InvalidPort)?;

        let log_level = env::var("APP_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        let catalog_seed = env::var("CATALOG_SEED_PATH")
            .ok()
            .filter(|value| !value.trim().is_empty())
            .map(PathBuf::from);

        Ok(Self {
            environment,
            server: ServerConfig { host, port },
            telemetry: TelemetryConfig { log_level },
            engine: load_engine_config()?,
            catalog_seed,
        })
    }
}

fn load_engine_config() -> Result<EngineConfig, ConfigError> {
    let tie_policy = match env::var("RULES_TIE_POLICY") {
        Ok(value) => TiePolicy::parse(&value).ok_or(ConfigError::InvalidTiePolicy { value })?,
        Err(_) => TiePolicy::default(),
    };

    let document_fallback = match env::var("RULES_DOCUMENT_FALLBACK") {
        Ok(value) => DocumentFallback::parse(&value)
            .ok_or(ConfigError::InvalidDocumentFallback { value })?,
        Err(_) => DocumentFallback::default(),
    };

    let max_document_bytes = match env::var("RULES_MAX_DOCUMENT_BYTES") {
        Ok(value) => value
            .trim()
            .parse::<usize>()
            .ok()
            .filter(|bytes| *bytes > 0)
            .ok_or(ConfigError::InvalidMaxDocumentBytes)?,
        Err(_) => DEFAULT_MAX_DOCUMENT_BYTES,
    };

    Ok(EngineConfig {
        tie_policy,
        document_fallback,
        max_document_bytes,
    })
}

/// Settings controlling the HTTP server binding.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        if self.host.eq_ignore_ascii_case("localhost") {
            return Ok(SocketAddr::new(IpAddr::from([127, 0, 0, 1]), self.port));
        }

        let ip: IpAddr = self
            .host
            .parse()
            .map_err(|source| ConfigError::InvalidHost { source })?;

        Ok(SocketAddr::new(ip, self.port))
    }
}

/// Tracing controls.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub log_level: String,
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidPort,
    InvalidHost { source: std::net::AddrParseError },
    InvalidTiePolicy { value: String },
    InvalidDocumentFallback { value: String },
    InvalidMaxDocumentBytes,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidPort => write!(f, "APP_PORT must be a valid u16"),
            ConfigError::InvalidHost { .. } => {
                write!(f, "APP_HOST must parse to an IPv4 or IPv6 address")
            }
            ConfigError::InvalidTiePolicy { value } => write!(
                f,
                "RULES_TIE_POLICY must be 'report' or 'first-inserted', found '{value}'"
            ),
            ConfigError::InvalidDocumentFallback { value } => write!(
                f,
                "RULES_DOCUMENT_FALLBACK must be 'exact' or 'nearest-lower', found '{value}'"
            ),
            ConfigError::InvalidMaxDocumentBytes => {
                write!(f, "RULES_MAX_DOCUMENT_BYTES must be a positive integer")
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::InvalidHost { source } => Some(source),
            ConfigError::InvalidPort
            | ConfigError::InvalidTiePolicy { .. }
            | ConfigError::InvalidDocumentFallback { .. }
            | ConfigError::InvalidMaxDocumentBytes => None,
        }
    }
}
