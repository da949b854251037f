//! Process configuration.
//!
//! Every setting comes from the environment (optionally seeded from an env
//! file). Each section is read from its own key prefix:
//!
//! - `DB_*`      database connection, required
//! - `APP_*`     logging/export/runtime knobs, `APP_LOG_DIR` required
//! - `SHOPIFY_*` Shopify credentials, required only by Shopify jobs
//! - `VTEX_*`    VTEX credentials, required only by VTEX jobs
//!
//! The resulting [`Config`] is built once in `main` and handed down by
//! reference; nothing reads the environment after that.

use crate::error::ConfigError;
use figment::{
    Figment, Provider,
    providers::{Env, Serialized},
};
use serde::{Deserialize, Deserializer, Serialize, de::DeserializeOwned};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

pub const DEFAULT_SHOPIFY_API_VERSION: &str = "2023-07";
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_LOG_MAX_AGE_MINUTES: u64 = 7 * 24 * 60;

const DB_PREFIX: &str = "DB_";
const APP_PREFIX: &str = "APP_";
const SHOPIFY_PREFIX: &str = "SHOPIFY_";
const VTEX_PREFIX: &str = "VTEX_";

/// Which database access strategy jobs use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DbStrategy {
    /// One raw client connection per job.
    #[default]
    Driver,
    /// Connection-string engine handing out disposable sessions.
    Engine,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(deserialize_with = "lenient_string")]
    pub server: String,
    #[serde(default, deserialize_with = "lenient_opt_string")]
    pub instance: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(deserialize_with = "lenient_string")]
    pub name: String,
    #[serde(deserialize_with = "lenient_string")]
    pub user: String,
    #[serde(deserialize_with = "lenient_string")]
    pub password: String,
    #[serde(default = "default_true")]
    pub trust_cert: bool,
    #[serde(default)]
    pub strategy: DbStrategy,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

impl DatabaseConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub log_dir: PathBuf,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_export_dir")]
    pub export_dir: PathBuf,
    #[serde(default = "default_log_max_age")]
    pub log_max_age_minutes: u64,
    #[serde(default = "default_shopify_rate")]
    pub shopify_requests_per_second: u32,
    #[serde(default = "default_vtex_concurrency")]
    pub vtex_concurrency: usize,
}

impl AppConfig {
    pub fn log_max_age(&self) -> Duration {
        Duration::from_secs(self.log_max_age_minutes.saturating_mul(60))
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct ShopifyConfig {
    #[serde(deserialize_with = "lenient_string")]
    pub store_name: String,
    #[serde(deserialize_with = "lenient_string")]
    pub access_token: String,
    #[serde(default, deserialize_with = "lenient_opt_string")]
    pub api_key: Option<String>,
    #[serde(default, deserialize_with = "lenient_opt_string")]
    pub api_secret: Option<String>,
    #[serde(default = "default_api_version", deserialize_with = "lenient_string")]
    pub api_version: String,
    /// Overrides the `https://<store>.myshopify.com/admin/api/<version>` root.
    #[serde(default)]
    pub base_url: Option<String>,
}

impl ShopifyConfig {
    pub fn admin_base_url(&self) -> String {
        match &self.base_url {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => format!(
                "https://{}.myshopify.com/admin/api/{}",
                self.store_name, self.api_version
            ),
        }
    }
}

impl std::fmt::Debug for ShopifyConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShopifyConfig")
            .field("store_name", &self.store_name)
            .field("api_version", &self.api_version)
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct VtexConfig {
    pub base_url: String,
    #[serde(deserialize_with = "lenient_string")]
    pub app_key: String,
    #[serde(deserialize_with = "lenient_string")]
    pub app_token: String,
}

impl std::fmt::Debug for VtexConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VtexConfig")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database: DatabaseConfig,
    pub app: AppConfig,
    shopify: Option<ShopifyConfig>,
    vtex: Option<VtexConfig>,
}

impl Config {
    /// Build the configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_sources(|prefix| Figment::from(Env::prefixed(prefix)))
    }

    /// Build the configuration from one figment per key prefix.
    pub fn from_sources<F>(source: F) -> Result<Self, ConfigError>
    where
        F: Fn(&'static str) -> Figment,
    {
        let database = required_section(&source, DB_PREFIX)?;
        let app: AppConfig = required_section(&source, APP_PREFIX)?;
        if app.shopify_requests_per_second == 0 {
            return Err(ConfigError::Invalid {
                key: "APP_SHOPIFY_REQUESTS_PER_SECOND",
                reason: "must be at least 1".to_string(),
            });
        }
        if app.vtex_concurrency == 0 {
            return Err(ConfigError::Invalid {
                key: "APP_VTEX_CONCURRENCY",
                reason: "must be at least 1".to_string(),
            });
        }

        Ok(Self {
            database,
            app,
            shopify: optional_section(&source, SHOPIFY_PREFIX)?,
            vtex: optional_section(&source, VTEX_PREFIX)?,
        })
    }

    pub fn shopify(&self) -> Result<&ShopifyConfig, ConfigError> {
        self.shopify.as_ref().ok_or(ConfigError::MissingSection {
            prefix: SHOPIFY_PREFIX,
        })
    }

    pub fn vtex(&self) -> Result<&VtexConfig, ConfigError> {
        self.vtex.as_ref().ok_or(ConfigError::MissingSection {
            prefix: VTEX_PREFIX,
        })
    }
}

/// What happened when the env file was read.
#[derive(Debug)]
pub enum EnvFileStatus {
    Loaded,
    NotFound,
    Invalid(String),
}

impl EnvFileStatus {
    /// Report the outcome. Called once logging is up, which itself depends
    /// on the variables the file provides.
    pub fn log(&self, path: &Path) {
        match self {
            Self::Loaded => info!(path = %path.display(), "environment file loaded"),
            Self::NotFound => {
                warn!(path = %path.display(), "environment file not found; using process environment")
            }
            Self::Invalid(e) => {
                warn!(path = %path.display(), error = %e, "failed to parse environment file")
            }
        }
    }
}

/// Seed the process environment from an env file. A missing file is not an
/// error: variables may already be set by the caller.
pub fn load_env_file(path: &Path) -> EnvFileStatus {
    match dotenvy::from_path(path) {
        Ok(()) => EnvFileStatus::Loaded,
        Err(e) if e.not_found() => EnvFileStatus::NotFound,
        Err(e) => EnvFileStatus::Invalid(e.to_string()),
    }
}

/// Convenience for tests and tooling: a figment holding a serialized value.
pub fn figment_from<T: Serialize>(value: T) -> Figment {
    Figment::from(Serialized::defaults(value))
}

fn required_section<T, F>(source: &F, prefix: &'static str) -> Result<T, ConfigError>
where
    T: DeserializeOwned,
    F: Fn(&'static str) -> Figment,
{
    source(prefix)
        .extract()
        .map_err(|e| ConfigError::Section {
            prefix,
            source: Box::new(e),
        })
}

fn optional_section<T, F>(source: &F, prefix: &'static str) -> Result<Option<T>, ConfigError>
where
    T: DeserializeOwned,
    F: Fn(&'static str) -> Figment,
{
    let figment = source(prefix);
    let empty = figment
        .data()
        .map(|profiles| profiles.values().all(|dict| dict.is_empty()))
        .unwrap_or(false);
    if empty {
        return Ok(None);
    }
    required_section(source, prefix).map(Some)
}

/// Env values such as `12345` are parsed as numbers; credentials must stay
/// strings regardless.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawScalar {
    Text(String),
    Unsigned(u64),
    Signed(i64),
    Float(f64),
    Bool(bool),
}

impl From<RawScalar> for String {
    fn from(raw: RawScalar) -> Self {
        match raw {
            RawScalar::Text(s) => s,
            RawScalar::Unsigned(n) => n.to_string(),
            RawScalar::Signed(n) => n.to_string(),
            RawScalar::Float(n) => n.to_string(),
            RawScalar::Bool(b) => b.to_string(),
        }
    }
}

fn lenient_string<'de, D: Deserializer<'de>>(de: D) -> Result<String, D::Error> {
    RawScalar::deserialize(de).map(String::from)
}

fn lenient_opt_string<'de, D: Deserializer<'de>>(de: D) -> Result<Option<String>, D::Error> {
    Ok(Option::<RawScalar>::deserialize(de)?
        .map(String::from)
        .filter(|s| !s.is_empty()))
}

fn default_true() -> bool {
    true
}

fn default_connect_timeout() -> u64 {
    DEFAULT_CONNECT_TIMEOUT_SECS
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_export_dir() -> PathBuf {
    PathBuf::from("export")
}

fn default_log_max_age() -> u64 {
    DEFAULT_LOG_MAX_AGE_MINUTES
}

fn default_shopify_rate() -> u32 {
    1
}

fn default_vtex_concurrency() -> usize {
    8
}

fn default_api_version() -> String {
    DEFAULT_SHOPIFY_API_VERSION.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sources(
        db: serde_json::Value,
        app: serde_json::Value,
        shopify: serde_json::Value,
    ) -> impl Fn(&'static str) -> Figment {
        move |prefix| match prefix {
            DB_PREFIX => figment_from(db.clone()),
            APP_PREFIX => figment_from(app.clone()),
            SHOPIFY_PREFIX => figment_from(shopify.clone()),
            _ => Figment::new(),
        }
    }

    fn db() -> serde_json::Value {
        json!({
            "server": "10.0.0.5",
            "instance": "sqlexpress",
            "name": "inventory",
            "user": "sync",
            "password": 12345,
        })
    }

    #[test]
    fn loads_required_sections_with_defaults() {
        let cfg = Config::from_sources(sources(db(), json!({ "log_dir": "logs" }), json!({})))
            .expect("config should load");

        assert_eq!(cfg.database.password, "12345");
        assert_eq!(cfg.database.instance.as_deref(), Some("sqlexpress"));
        assert_eq!(cfg.database.strategy, DbStrategy::Driver);
        assert_eq!(cfg.database.connect_timeout(), Duration::from_secs(30));
        assert_eq!(cfg.app.log_level, "info");
        assert_eq!(cfg.app.shopify_requests_per_second, 1);
        assert!(matches!(
            cfg.shopify(),
            Err(ConfigError::MissingSection { prefix: "SHOPIFY_" })
        ));
        assert!(cfg.vtex().is_err());
    }

    #[test]
    fn missing_required_key_is_fatal() {
        let mut partial = db();
        partial.as_object_mut().unwrap().remove("password");
        let err = Config::from_sources(sources(partial, json!({ "log_dir": "logs" }), json!({})))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Section { prefix: "DB_", .. }));
        assert!(err.to_string().contains("password"));
    }

    #[test]
    fn missing_log_dir_is_fatal() {
        let err = Config::from_sources(sources(db(), json!({}), json!({}))).unwrap_err();
        assert!(matches!(err, ConfigError::Section { prefix: "APP_", .. }));
    }

    #[test]
    fn partial_shopify_section_is_rejected() {
        let err = Config::from_sources(sources(
            db(),
            json!({ "log_dir": "logs" }),
            json!({ "store_name": "acme" }),
        ))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Section { prefix: "SHOPIFY_", .. }));
    }

    #[test]
    fn shopify_base_url_defaults_to_admin_api() {
        let cfg = Config::from_sources(sources(
            db(),
            json!({ "log_dir": "logs" }),
            json!({ "store_name": "acme", "access_token": "shpat_x" }),
        ))
        .unwrap();
        assert_eq!(
            cfg.shopify().unwrap().admin_base_url(),
            "https://acme.myshopify.com/admin/api/2023-07"
        );
    }

    #[test]
    fn zero_concurrency_is_rejected() {
        let err = Config::from_sources(sources(
            db(),
            json!({ "log_dir": "logs", "vtex_concurrency": 0 }),
            json!({}),
        ))
        .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                key: "APP_VTEX_CONCURRENCY",
                ..
            }
        ));
    }

    #[test]
    fn env_file_outcomes() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            load_env_file(&dir.path().join("missing.env")),
            EnvFileStatus::NotFound
        ));

        let path = dir.path().join(".env");
        std::fs::write(&path, "STORESYNC_CONFIG_TEST_MARKER=1\n").unwrap();
        assert!(matches!(load_env_file(&path), EnvFileStatus::Loaded));
        assert_eq!(
            std::env::var("STORESYNC_CONFIG_TEST_MARKER").as_deref(),
            Ok("1")
        );
    }
}
