use pmbridge_billing::processed::{DEFAULT_CAPACITY, DEFAULT_TTL_SECS};
use pmbridge_core::DEFAULT_MAX_SHIFTS;
use pmbridge_db_postgres::PostgresConfig;
use pmbridge_soap::{ActionConfig, AuthHeader, ClientConfig, DEFAULT_NAMESPACE};
use serde::{Deserialize, Serialize};

const REDACTED: &str = "********";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub practice: PracticeConfig,
    #[serde(default)]
    pub billing: BillingConfig,
    #[serde(default)]
    pub scheduling: SchedulingConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Connection and credential settings for the practice-management service.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PracticeConfig {
    pub endpoint: String,
    pub customer_key: String,
    pub user: String,
    pub password: String,
    pub practice_id: Option<String>,
    pub namespace: String,
    /// Prefix tried first when negotiating the SOAPAction header.
    pub action_base: Option<String>,
    /// Extra action templates with `{namespace}` and `{operation}` placeholders.
    pub action_templates: Vec<String>,
    pub historical_fallbacks: bool,
    pub soap12_fallback: bool,
    pub timeout_ms: u64,
}

impl Default for PracticeConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            customer_key: String::new(),
            user: String::new(),
            password: String::new(),
            practice_id: None,
            namespace: DEFAULT_NAMESPACE.to_string(),
            action_base: None,
            action_templates: Vec::new(),
            historical_fallbacks: true,
            soap12_fallback: true,
            timeout_ms: 20_000,
        }
    }
}

impl std::fmt::Debug for PracticeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PracticeConfig")
            .field("endpoint", &self.endpoint)
            .field("customer_key", &REDACTED)
            .field("user", &self.user)
            .field("password", &REDACTED)
            .field("practice_id", &self.practice_id)
            .field("namespace", &self.namespace)
            .field("action_base", &self.action_base)
            .field("action_templates", &self.action_templates)
            .field("historical_fallbacks", &self.historical_fallbacks)
            .field("soap12_fallback", &self.soap12_fallback)
            .field("timeout_ms", &self.timeout_ms)
            .finish()
    }
}

impl PracticeConfig {
    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            endpoint: self.endpoint.clone(),
            actions: ActionConfig {
                namespace: self.namespace.clone(),
                action_base: self.action_base.clone(),
                templates: self.action_templates.clone(),
                historical_fallbacks: self.historical_fallbacks,
            },
            timeout_ms: self.timeout_ms,
            soap12_fallback: self.soap12_fallback,
        }
    }

    pub fn auth_header(&self) -> AuthHeader {
        let auth = AuthHeader::new(
            self.customer_key.clone(),
            self.user.clone(),
            self.password.clone(),
        );
        match &self.practice_id {
            Some(id) => auth.with_practice_id(id.clone()),
            None => auth,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BillingConfig {
    /// Mark events `synced-mock` instead of calling the practice service.
    pub mock_remote: bool,
    pub processed_ttl_secs: u64,
    pub processed_capacity: u64,
    pub retry_batch_size: usize,
    pub poll_interval_secs: u64,
    /// How long a row stays claimed by one sync before another worker may
    /// take it over.
    pub claim_timeout_secs: u64,
    pub default_currency: String,
}

impl Default for BillingConfig {
    fn default() -> Self {
        Self {
            mock_remote: false,
            processed_ttl_secs: DEFAULT_TTL_SECS,
            processed_capacity: DEFAULT_CAPACITY,
            retry_batch_size: 25,
            poll_interval_secs: 60,
            claim_timeout_secs: 600,
            default_currency: "USD".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulingConfig {
    pub max_shifts: u32,
}

impl Default for SchedulingConfig {
    fn default() -> Self {
        Self {
            max_shifts: DEFAULT_MAX_SHIFTS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Memory,
    Postgres,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub postgres: PostgresConfig,
}

impl StorageConfig {
    /// Whether billing rows outlive the process.
    pub fn is_persistent(&self) -> bool {
        self.backend == StorageBackend::Postgres
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), String> {
        let valid_levels = ["error", "warn", "info", "debug", "trace"];
        if !valid_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            return Err(format!("logging.level must be one of {valid_levels:?}"));
        }

        // Credentials are only needed when events are pushed to the remote service.
        if !self.billing.mock_remote {
            if self.practice.endpoint.trim().is_empty() {
                return Err("practice.endpoint must be set unless billing.mock_remote is on".into());
            }
            for (name, value) in [
                ("practice.customer_key", &self.practice.customer_key),
                ("practice.user", &self.practice.user),
                ("practice.password", &self.practice.password),
            ] {
                if value.trim().is_empty() {
                    return Err(format!("{name} must be set"));
                }
            }
        }
        if self.practice.timeout_ms == 0 {
            return Err("practice.timeout_ms must be > 0".into());
        }
        if self.practice.namespace.trim().is_empty() {
            return Err("practice.namespace must not be empty".into());
        }

        if self.billing.processed_capacity == 0 {
            return Err("billing.processed_capacity must be > 0".into());
        }
        if self.billing.processed_ttl_secs == 0 {
            return Err("billing.processed_ttl_secs must be > 0".into());
        }
        if self.billing.retry_batch_size == 0 {
            return Err("billing.retry_batch_size must be > 0".into());
        }
        if self.billing.poll_interval_secs == 0 {
            return Err("billing.poll_interval_secs must be > 0".into());
        }
        if self.billing.claim_timeout_secs == 0 {
            return Err("billing.claim_timeout_secs must be > 0".into());
        }
        let currency = &self.billing.default_currency;
        if currency.len() != 3 || !currency.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err("billing.default_currency must be a 3-letter ISO code".into());
        }

        if self.scheduling.max_shifts == 0 {
            return Err("scheduling.max_shifts must be > 0".into());
        }

        if self.storage.backend == StorageBackend::Postgres {
            self.storage
                .postgres
                .validate()
                .map_err(|e| format!("storage.postgres: {e}"))?;
        }
        Ok(())
    }

    /// Copy with secrets masked, safe to print.
    pub fn redacted(&self) -> Self {
        let mut cfg = self.clone();
        for secret in [&mut cfg.practice.customer_key, &mut cfg.practice.password] {
            if !secret.is_empty() {
                *secret = REDACTED.to_string();
            }
        }
        cfg.storage.postgres.url = pmbridge_db_postgres::mask_password(&cfg.storage.postgres.url);
        cfg
    }
}

pub mod loader {
    use super::AppConfig;
    use config::{Config, Environment, File};
    use std::path::PathBuf;

    pub const DEFAULT_CONFIG_FILE: &str = "pmbridge.toml";

    pub fn load_config(path: Option<&str>) -> Result<AppConfig, String> {
        let mut builder = Config::builder();
        let pathbuf = PathBuf::from(path.unwrap_or(DEFAULT_CONFIG_FILE));
        if pathbuf.exists() {
            builder = builder.add_source(File::from(pathbuf));
        } else if path.is_some() {
            return Err(format!("config file not found: {}", pathbuf.display()));
        }
        // Environment variable overrides, e.g., PMBRIDGE__BILLING__MOCK_REMOTE=true
        builder = builder.add_source(
            Environment::with_prefix("PMBRIDGE")
                .try_parsing(true)
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("practice.action_templates"),
        );
        let cfg = builder
            .build()
            .map_err(|e| format!("config build error: {e}"))?;
        let merged: AppConfig = cfg
            .try_deserialize()
            .map_err(|e| format!("config deserialize error: {e}"))?;
        merged.validate()?;
        Ok(merged)
    }
}
