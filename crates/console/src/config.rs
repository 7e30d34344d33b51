//! Console configuration loaded from environment variables.
//!
//! # Environment Variables
//!
//! ## Required
//! - `PUNCHCARD_API_BASE_URL` - Base URL of the Punchcard backend API
//! - `CONSOLE_BASE_URL` - Public URL for the console
//!
//! ## Optional
//! - `CONSOLE_HOST` - Bind address (default: 127.0.0.1)
//! - `CONSOLE_PORT` - Listen port (default: 3000)
//! - `IDENTITY_CACHE_MAX_AGE_MS` - Identity cache validity window (default: 60000)
//! - `TOKEN_RETRY_ATTEMPTS` - Session token acquisition attempts (default: 6)
//! - `TOKEN_RETRY_DELAY_MS` - Delay between token attempts (default: 300)
//! - `ONBOARDING_ROUTE` - Route exempt from identity gating (default: /onboarding)
//! - `SIGN_IN_ROUTE` - Sign-in landing route (default: /sign-in)
//! - `DASHBOARD_ROUTE` - Home route after onboarding (default: /dashboard)
//! - `SENTRY_DSN` - Sentry error tracking DSN
//! - `SENTRY_ENVIRONMENT` - Sentry environment name
//! - `SENTRY_SAMPLE_RATE` - Error sample rate (default: 1.0)
//! - `SENTRY_TRACES_SAMPLE_RATE` - Transaction sample rate (default: 0.0)

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use thiserror::Error;
use url::Url;

use crate::identity::TokenRetryPolicy;

/// Configuration errors that can occur during loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid environment variable {0}: {1}")]
    InvalidEnvVar(String, String),
}

/// Console application configuration.
#[derive(Debug, Clone)]
pub struct ConsoleConfig {
    /// IP address to bind the server to
    pub host: IpAddr,
    /// Port to listen on
    pub port: u16,
    /// Public base URL for the console
    pub base_url: String,
    /// Backend API configuration
    pub api: ApiConfig,
    /// Access gate configuration
    pub gate: GateConfig,
    /// Sentry DSN for error tracking
    pub sentry_dsn: Option<String>,
    /// Sentry environment (e.g. production, staging)
    pub sentry_environment: Option<String>,
    /// Fraction of errors sent to Sentry
    pub sentry_sample_rate: f32,
    /// Fraction of transactions sent to Sentry
    pub sentry_traces_sample_rate: f32,
}

/// Backend API configuration.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Base URL, e.g. `https://api.punchcard.example`
    pub base_url: Url,
}

/// Access gate configuration.
#[derive(Debug, Clone)]
pub struct GateConfig {
    /// How long a resolved identity stays trusted without a new lookup
    pub cache_max_age: Duration,
    /// Bounded retry used while the session token is not yet issuable
    pub token_retry: TokenRetryPolicy,
    /// Routes the gate redirects to
    pub routes: GateRoutes,
}

/// Routes with special meaning to the access gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GateRoutes {
    /// Route reachable without a resolved identity
    pub onboarding: String,
    /// Sign-in landing route
    pub sign_in: String,
    /// Where principals who finished onboarding are sent
    pub dashboard: String,
}

impl Default for GateRoutes {
    fn default() -> Self {
        Self {
            onboarding: "/onboarding".to_string(),
            sign_in: "/sign-in".to_string(),
            dashboard: "/dashboard".to_string(),
        }
    }
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            cache_max_age: Duration::from_millis(DEFAULT_CACHE_MAX_AGE_MS),
            token_retry: TokenRetryPolicy::default(),
            routes: GateRoutes::default(),
        }
    }
}

const DEFAULT_CACHE_MAX_AGE_MS: u64 = 60_000;

impl ConsoleConfig {
    /// Load configuration from environment variables.
    ///
    /// Calls `dotenvy::dotenv()` to load from `.env` file if present.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if required variables are missing or invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if required variables are missing or invalid.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(&lookup);

        let host = env
            .or_default("CONSOLE_HOST", "127.0.0.1")
            .parse::<IpAddr>()
            .map_err(|e| ConfigError::InvalidEnvVar("CONSOLE_HOST".to_string(), e.to_string()))?;
        let port = env.parsed_or("CONSOLE_PORT", 3000_u16)?;
        let base_url = env.required("CONSOLE_BASE_URL")?;

        let api = ApiConfig {
            base_url: parse_http_url("PUNCHCARD_API_BASE_URL", &env.required("PUNCHCARD_API_BASE_URL")?)?,
        };

        let attempts = env.parsed_or("TOKEN_RETRY_ATTEMPTS", TokenRetryPolicy::DEFAULT_ATTEMPTS)?;
        if attempts == 0 {
            return Err(ConfigError::InvalidEnvVar(
                "TOKEN_RETRY_ATTEMPTS".to_string(),
                "must be at least 1".to_string(),
            ));
        }
        let delay_ms = env.parsed_or("TOKEN_RETRY_DELAY_MS", TokenRetryPolicy::DEFAULT_DELAY_MS)?;
        let max_age_ms = env.parsed_or("IDENTITY_CACHE_MAX_AGE_MS", DEFAULT_CACHE_MAX_AGE_MS)?;

        let defaults = GateRoutes::default();
        let routes = GateRoutes {
            onboarding: env.route_or("ONBOARDING_ROUTE", &defaults.onboarding)?,
            sign_in: env.route_or("SIGN_IN_ROUTE", &defaults.sign_in)?,
            dashboard: env.route_or("DASHBOARD_ROUTE", &defaults.dashboard)?,
        };

        let gate = GateConfig {
            cache_max_age: Duration::from_millis(max_age_ms),
            token_retry: TokenRetryPolicy {
                attempts,
                delay: Duration::from_millis(delay_ms),
            },
            routes,
        };

        Ok(Self {
            host,
            port,
            base_url,
            api,
            gate,
            sentry_dsn: env.optional("SENTRY_DSN"),
            sentry_environment: env.optional("SENTRY_ENVIRONMENT"),
            sentry_sample_rate: env.parsed_or("SENTRY_SAMPLE_RATE", 1.0_f32)?,
            sentry_traces_sample_rate: env.parsed_or("SENTRY_TRACES_SAMPLE_RATE", 0.0_f32)?,
        })
    }

    /// Returns the socket address for binding the server.
    #[must_use]
    pub const fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    /// Whether the console is served over HTTPS (secure cookies).
    #[must_use]
    pub fn is_secure(&self) -> bool {
        self.base_url.starts_with("https://")
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

struct Env<'a, F>(&'a F);

impl<F> Env<'_, F>
where
    F: Fn(&str) -> Option<String>,
{
    /// Get a required environment variable.
    fn required(&self, key: &str) -> Result<String, ConfigError> {
        self.optional(key)
            .ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()))
    }

    /// Get an optional environment variable.
    fn optional(&self, key: &str) -> Option<String> {
        (self.0)(key)
    }

    /// Get an environment variable with a default value.
    fn or_default(&self, key: &str, default: &str) -> String {
        self.optional(key).unwrap_or_else(|| default.to_string())
    }

    /// Parse an environment variable, falling back to `default` when unset.
    fn parsed_or<T>(&self, key: &str, default: T) -> Result<T, ConfigError>
    where
        T: std::str::FromStr,
        T::Err: std::fmt::Display,
    {
        self.optional(key).map_or(Ok(default), |raw| {
            raw.trim()
                .parse::<T>()
                .map_err(|e| ConfigError::InvalidEnvVar(key.to_string(), e.to_string()))
        })
    }

    /// Get an absolute route path (must start with `/`).
    fn route_or(&self, key: &str, default: &str) -> Result<String, ConfigError> {
        let route = self.or_default(key, default);
        if !route.starts_with('/') {
            return Err(ConfigError::InvalidEnvVar(
                key.to_string(),
                format!("route must start with '/' (got '{route}')"),
            ));
        }
        Ok(route)
    }
}

/// Parse a URL and require an http(s) scheme.
fn parse_http_url(key: &str, raw: &str) -> Result<Url, ConfigError> {
    let url = Url::parse(raw).map_err(|e| ConfigError::InvalidEnvVar(key.to_string(), e.to_string()))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(ConfigError::InvalidEnvVar(
            key.to_string(),
            format!("unsupported scheme '{other}'"),
        )),
    }
}
