//! Server configuration.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use causa_core::{Error, Result};
use causa_ledger::LedgerConfig;
use causa_ledger::ledger::DEFAULT_CAS_MAX_RETRIES;

/// Configuration for the causa API server.
#[derive(Clone, Serialize, Deserialize)]
pub struct Config {
    /// HTTP server port.
    pub http_port: u16,

    /// Optional shared secret required to access `/metrics`.
    ///
    /// When set, callers must provide either `X-Metrics-Secret: <secret>` or
    /// `Authorization: Bearer <secret>`.
    #[serde(default)]
    pub metrics_secret: Option<String>,

    /// Enable debug mode.
    ///
    /// When enabled, `RequestContext` is taken from the `X-User-Id` and
    /// `X-User-Role` headers. When disabled, a verified bearer JWT is
    /// required.
    pub debug: bool,

    /// CORS configuration.
    #[serde(default)]
    pub cors: CorsConfig,

    /// JWT authentication configuration (used when `debug` is false).
    #[serde(default)]
    pub jwt: JwtConfig,

    /// Storage configuration.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Ledger tuning.
    #[serde(default)]
    pub ledger: LedgerSettings,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("http_port", &self.http_port)
            .field(
                "metrics_secret",
                &self.metrics_secret.as_ref().map(|_| "<redacted>"),
            )
            .field("debug", &self.debug)
            .field("cors", &self.cors)
            .field("jwt", &self.jwt)
            .field("storage", &self.storage)
            .field("ledger", &self.ledger)
            .finish()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            http_port: 8080,
            metrics_secret: None,
            debug: false,
            cors: CorsConfig::default(),
            jwt: JwtConfig::default(),
            storage: StorageConfig::default(),
            ledger: LedgerSettings::default(),
        }
    }
}

/// CORS configuration for browser-based access.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorsConfig {
    /// Allowed origins. `["*"]` allows every origin (debug only).
    /// An empty list disables CORS.
    pub allowed_origins: Vec<String>,

    /// Max age for preflight cache (seconds).
    pub max_age_seconds: u64,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: Vec::new(),
            max_age_seconds: 3600,
        }
    }
}

/// Storage configuration for the API server.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Object storage bucket (`gs://bucket`, `s3://bucket`, or a bare GCS name).
    #[serde(default)]
    pub bucket: Option<String>,
}

/// Ledger settings exposed through configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerSettings {
    /// Attempts per conditional record write before the request fails.
    pub cas_max_retries: u32,
}

impl Default for LedgerSettings {
    fn default() -> Self {
        Self {
            cas_max_retries: DEFAULT_CAS_MAX_RETRIES,
        }
    }
}

impl LedgerSettings {
    /// Converts to the ledger's own config type.
    #[must_use]
    pub fn to_ledger_config(&self) -> LedgerConfig {
        LedgerConfig {
            cas_max_retries: self.cas_max_retries,
        }
    }
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// Supported env vars:
    /// - `CAUSA_HTTP_PORT`
    /// - `CAUSA_METRICS_SECRET`
    /// - `CAUSA_DEBUG`
    /// - `CAUSA_CORS_ALLOWED_ORIGINS` (comma-separated, or `*`)
    /// - `CAUSA_CORS_MAX_AGE_SECONDS`
    /// - `CAUSA_JWT_SECRET`
    /// - `CAUSA_JWT_PUBLIC_KEY_PEM`
    /// - `CAUSA_JWT_ISSUER`
    /// - `CAUSA_JWT_AUDIENCE`
    /// - `CAUSA_JWT_USER_CLAIM` (default `sub`)
    /// - `CAUSA_JWT_ROLE_CLAIM` (default `role`)
    /// - `CAUSA_STORAGE_BUCKET`
    /// - `CAUSA_LEDGER_CAS_MAX_RETRIES` (default 8)
    ///
    /// # Errors
    ///
    /// Returns an error if any environment variable is present but cannot be parsed.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Some(port) = env_parse::<u16>("CAUSA_HTTP_PORT")? {
            config.http_port = port;
        }
        config.metrics_secret = env_string("CAUSA_METRICS_SECRET");
        if let Some(debug) = env_bool("CAUSA_DEBUG")? {
            config.debug = debug;
        }

        if let Some(origins) = env_string("CAUSA_CORS_ALLOWED_ORIGINS") {
            config.cors.allowed_origins = parse_cors_allowed_origins(&origins);
        }
        if let Some(max_age) = env_parse::<u64>("CAUSA_CORS_MAX_AGE_SECONDS")? {
            config.cors.max_age_seconds = max_age;
        }

        config.jwt.hs256_secret = env_string("CAUSA_JWT_SECRET");
        config.jwt.rs256_public_key_pem =
            env_string("CAUSA_JWT_PUBLIC_KEY_PEM").map(|pem| normalize_pem(&pem));
        config.jwt.issuer = env_string("CAUSA_JWT_ISSUER");
        config.jwt.audience = env_string("CAUSA_JWT_AUDIENCE");
        if let Some(claim) = env_string("CAUSA_JWT_USER_CLAIM") {
            config.jwt.user_claim = claim;
        }
        if let Some(claim) = env_string("CAUSA_JWT_ROLE_CLAIM") {
            config.jwt.role_claim = claim;
        }

        config.storage.bucket = env_string("CAUSA_STORAGE_BUCKET");

        if let Some(retries) = env_parse::<u32>("CAUSA_LEDGER_CAS_MAX_RETRIES")? {
            if retries == 0 {
                return Err(Error::InvalidInput(
                    "CAUSA_LEDGER_CAS_MAX_RETRIES must be at least 1".to_string(),
                ));
            }
            config.ledger.cas_max_retries = retries;
        }

        Ok(config)
    }
}

/// Reads a variable, treating unset and blank the same.
fn env_string(name: &str) -> Option<String> {
    let value = std::env::var(name).ok()?;
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}

fn env_parse<T>(name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    env_string(name)
        .map(|raw| {
            raw.parse::<T>().map_err(|e| {
                Error::InvalidInput(format!(
                    "{name}={raw:?} is not a valid {}: {e}",
                    std::any::type_name::<T>()
                ))
            })
        })
        .transpose()
}

fn parse_bool(name: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "y" | "on" => Ok(true),
        "false" | "0" | "no" | "n" | "off" => Ok(false),
        other => Err(Error::InvalidInput(format!(
            "{name}={other:?} is not a boolean (true/false/1/0)"
        ))),
    }
}

fn env_bool(name: &str) -> Result<Option<bool>> {
    env_string(name).map(|v| parse_bool(name, &v)).transpose()
}

fn parse_cors_allowed_origins(value: &str) -> Vec<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Vec::new();
    }
    if trimmed == "*" {
        return vec!["*".to_string()];
    }

    trimmed
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// JWT configuration for production authentication.
#[derive(Clone, Serialize, Deserialize)]
pub struct JwtConfig {
    /// HS256 secret used to verify bearer tokens.
    #[serde(default)]
    pub hs256_secret: Option<String>,

    /// RS256 public key in PEM format for verifying bearer tokens.
    #[serde(default)]
    pub rs256_public_key_pem: Option<String>,

    /// Optional issuer (`iss`) to enforce.
    #[serde(default)]
    pub issuer: Option<String>,

    /// Optional audience (`aud`) to enforce.
    #[serde(default)]
    pub audience: Option<String>,

    /// Claim name that contains the user identifier.
    #[serde(default = "default_user_claim")]
    pub user_claim: String,

    /// Claim name that contains the caller's role.
    ///
    /// When absent from a token, the caller has no role.
    #[serde(default = "default_role_claim")]
    pub role_claim: String,
}

impl std::fmt::Debug for JwtConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtConfig")
            .field(
                "hs256_secret",
                &self.hs256_secret.as_ref().map(|_| "<redacted>"),
            )
            .field(
                "rs256_public_key_pem",
                &self.rs256_public_key_pem.as_ref().map(|_| "<pem>"),
            )
            .field("issuer", &self.issuer)
            .field("audience", &self.audience)
            .field("user_claim", &self.user_claim)
            .field("role_claim", &self.role_claim)
            .finish()
    }
}

impl Default for JwtConfig {
    fn default() -> Self {
        Self {
            hs256_secret: None,
            rs256_public_key_pem: None,
            issuer: None,
            audience: None,
            user_claim: default_user_claim(),
            role_claim: default_role_claim(),
        }
    }
}

fn default_user_claim() -> String {
    "sub".to_string()
}

fn default_role_claim() -> String {
    "role".to_string()
}

fn normalize_pem(pem: &str) -> String {
    let trimmed = pem.trim();
    if trimmed.contains("\\n") && !trimmed.contains('\n') {
        trimmed.replace("\\n", "\n")
    } else {
        trimmed.to_string()
    }
}
