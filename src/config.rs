use std::time::Duration;

use rand::{rngs::OsRng, RngCore};
use serde::Deserialize;
use tracing::warn;

/// Minimum session secret length in bytes (HMAC-SHA256 key).
pub const MIN_SESSION_SECRET_LEN: usize = 32;

/// Upper bound for every lifetime setting: one year.
pub const MAX_TTL_MINUTES: i64 = 60 * 24 * 365;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(String),
    #[error("invalid value for {key}: {reason}")]
    Invalid { key: String, reason: String },
    #[error("SESSION_SECRET must be set and at least {MIN_SESSION_SECRET_LEN} bytes in production")]
    InsecureSecret,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Development,
    Production,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SameSitePolicy {
    Lax,
    Strict,
}

#[derive(Clone, Deserialize)]
pub struct SessionConfig {
    pub secret: Vec<u8>,
    pub ttl_minutes: i64,
    pub cookie_name: String,
    pub cookie_secure: bool,
    pub same_site: SameSitePolicy,
}

impl std::fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionConfig")
            .field("secret_len", &self.secret.len())
            .field("ttl_minutes", &self.ttl_minutes)
            .field("cookie_name", &self.cookie_name)
            .field("cookie_secure", &self.cookie_secure)
            .field("same_site", &self.same_site)
            .finish()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PasswordConfig {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl Default for PasswordConfig {
    fn default() -> Self {
        Self {
            memory_kib: 19456,
            iterations: 2,
            parallelism: 1,
        }
    }
}

/// Raw provider endpoints as configured. HTTPS is checked when a flow starts.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
    pub name: String,
    pub authorize_url: String,
    pub token_url: String,
    pub client_id: String,
    pub redirect_uri: String,
    pub scopes: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OAuthConfig {
    pub providers: Vec<ProviderConfig>,
    pub state_ttl_minutes: i64,
    pub exchange_timeout_secs: u64,
    pub success_path: String,
}

impl OAuthConfig {
    pub fn exchange_timeout(&self) -> Duration {
        Duration::from_secs(self.exchange_timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub environment: Environment,
    pub database_url: String,
    pub database_max_connections: u32,
    pub session: SessionConfig,
    pub password: PasswordConfig,
    pub oauth: OAuthConfig,
    pub login_path: String,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from any key lookup. Startup checks run here, so a
    /// production profile without a usable secret never yields a config.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let environment = match get("APP_ENV").as_deref() {
            None | Some("development") | Some("dev") => Environment::Development,
            Some("production") | Some("prod") => Environment::Production,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    key: "APP_ENV".into(),
                    reason: format!("unknown environment {other:?}"),
                })
            }
        };
        let production = environment == Environment::Production;

        let database_url = get("DATABASE_URL").ok_or_else(|| ConfigError::Missing("DATABASE_URL".into()))?;

        let secret = match get("SESSION_SECRET") {
            Some(s) if s.len() >= MIN_SESSION_SECRET_LEN => s.into_bytes(),
            Some(_) | None if production => return Err(ConfigError::InsecureSecret),
            Some(_) => {
                return Err(ConfigError::Invalid {
                    key: "SESSION_SECRET".into(),
                    reason: format!("must be at least {MIN_SESSION_SECRET_LEN} bytes"),
                })
            }
            None => {
                warn!("SESSION_SECRET not set; using an ephemeral key, sessions will not survive a restart");
                let mut key = vec![0u8; MIN_SESSION_SECRET_LEN];
                OsRng.fill_bytes(&mut key);
                key
            }
        };

        let same_site = match get("SESSION_COOKIE_SAMESITE").as_deref() {
            None | Some("lax") => SameSitePolicy::Lax,
            Some("strict") => SameSitePolicy::Strict,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    key: "SESSION_COOKIE_SAMESITE".into(),
                    reason: format!("expected lax or strict, got {other:?}"),
                })
            }
        };

        let session = SessionConfig {
            secret,
            ttl_minutes: parse_ttl(&get, "SESSION_TTL_MINUTES", 60 * 24 * 7)?,
            cookie_name: get("SESSION_COOKIE_NAME").unwrap_or_else(|| "agenthub_session".into()),
            cookie_secure: parse_bool(&get, "SESSION_COOKIE_SECURE", production)?,
            same_site,
        };

        let defaults = PasswordConfig::default();
        let password = PasswordConfig {
            memory_kib: parse_positive(&get, "PASSWORD_MEMORY_KIB", defaults.memory_kib)?,
            iterations: parse_positive(&get, "PASSWORD_ITERATIONS", defaults.iterations)?,
            parallelism: parse_positive(&get, "PASSWORD_PARALLELISM", defaults.parallelism)?,
        };

        let providers = get("OAUTH_PROVIDERS")
            .map(|list| {
                list.split(',')
                    .map(|name| name.trim().to_lowercase())
                    .filter(|name| !name.is_empty())
                    .map(|name| provider_from_lookup(&get, name))
                    .collect::<Result<Vec<_>, _>>()
            })
            .transpose()?
            .unwrap_or_default();

        let oauth = OAuthConfig {
            providers,
            state_ttl_minutes: parse_ttl(&get, "OAUTH_STATE_TTL_MINUTES", 10)?,
            exchange_timeout_secs: parse_positive(&get, "OAUTH_EXCHANGE_TIMEOUT_SECS", 10)?,
            success_path: get("OAUTH_SUCCESS_PATH").unwrap_or_else(|| "/".into()),
        };

        // Provider callbacks are cross-site navigations; a Strict session
        // cookie never reaches them.
        if session.same_site == SameSitePolicy::Strict && !oauth.providers.is_empty() {
            return Err(ConfigError::Invalid {
                key: "SESSION_COOKIE_SAMESITE".into(),
                reason: "strict is incompatible with OAUTH_PROVIDERS; use lax".into(),
            });
        }

        Ok(Self {
            environment,
            database_url,
            database_max_connections: parse_positive(&get, "DATABASE_MAX_CONNECTIONS", 10)?,
            session,
            password,
            oauth,
            login_path: get("LOGIN_PATH").unwrap_or_else(|| "/login".into()),
        })
    }
}

fn provider_from_lookup<G>(get: &G, name: String) -> Result<ProviderConfig, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    let prefix = format!("OAUTH_{}", name.to_uppercase());
    let required = |suffix: &str| {
        let key = format!("{prefix}_{suffix}");
        get(&key).ok_or(ConfigError::Missing(key))
    };
    Ok(ProviderConfig {
        authorize_url: required("AUTHORIZE_URL")?,
        token_url: required("TOKEN_URL")?,
        client_id: required("CLIENT_ID")?,
        redirect_uri: required("REDIRECT_URI")?,
        scopes: get(&format!("{prefix}_SCOPES"))
            .map(|s| s.split_whitespace().map(str::to_string).collect())
            .unwrap_or_default(),
        name,
    })
}

fn parse_positive<G, T>(get: &G, key: &str, default: T) -> Result<T, ConfigError>
where
    G: Fn(&str) -> Option<String>,
    T: std::str::FromStr + PartialOrd + Default,
{
    match get(key) {
        None => Ok(default),
        Some(raw) => match raw.trim().parse::<T>() {
            Ok(v) if v > T::default() => Ok(v),
            _ => Err(ConfigError::Invalid {
                key: key.into(),
                reason: format!("expected a positive number, got {raw:?}"),
            }),
        },
    }
}

fn parse_ttl<G>(get: &G, key: &str, default: i64) -> Result<i64, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    let minutes = parse_positive(get, key, default)?;
    if minutes > MAX_TTL_MINUTES {
        return Err(ConfigError::Invalid {
            key: key.into(),
            reason: format!("must be at most {MAX_TTL_MINUTES} minutes"),
        });
    }
    Ok(minutes)
}

fn parse_bool<G>(get: &G, key: &str, default: bool) -> Result<bool, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    match get(key).map(|v| v.to_lowercase()).as_deref() {
        None => Ok(default),
        Some("true") | Some("1") | Some("yes") => Ok(true),
        Some("false") | Some("0") | Some("no") => Ok(false),
        Some(other) => Err(ConfigError::Invalid {
            key: key.into(),
            reason: format!("expected a boolean, got {other:?}"),
        }),
    }
}
