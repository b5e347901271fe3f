//! Service configuration.

use rust_decimal::Decimal;
use serde::Deserialize;
use std::path::Path;
use telecare_billing_core::{Currency, EngineConfig, DEFAULT_EVENT_TYPES};

/// Service configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Address to listen on (default: "0.0.0.0:8080").
    pub listen_addr: String,

    /// PostgreSQL connection string. When set, the PostgreSQL backend is used.
    pub database_url: Option<String>,

    /// Maximum PostgreSQL pool size (default: 10).
    pub database_max_connections: u32,

    /// Path to the `RocksDB` data directory (default: "/data/telecare-billing").
    pub data_dir: String,

    /// Service API key for service-to-service auth.
    pub service_api_key: Option<String>,

    /// Admin API key for catalog administration and the test webhook.
    pub admin_api_key: Option<String>,

    /// Shared HMAC key used by the gateway to sign notifications.
    pub gateway_signing_key: Option<String>,

    /// Largest gateway fee accepted, in percent of the plan price (default: 5).
    pub fee_tolerance_percent: Decimal,

    /// Currencies notifications may be denominated in (default: MWK).
    pub supported_currencies: Vec<Currency>,

    /// Event types that are processed; anything else is acknowledged and ignored.
    pub accepted_event_types: Vec<String>,

    /// Whether `POST /webhooks/payments/test` is served.
    pub enable_test_webhook: bool,

    /// CORS allowed origins.
    pub cors_origins: Vec<String>,

    /// Maximum request body size in bytes.
    pub max_body_bytes: usize,

    /// Request timeout in seconds. A webhook that runs out of time answers 503.
    pub request_timeout_seconds: u64,

    /// Notifications processed at once (default: 8). Further deliveries wait for a slot.
    pub webhook_max_concurrency: usize,
}

/// Gateway secrets file structure.
#[derive(Debug, Deserialize)]
struct GatewaySecrets {
    signing_key: String,
}

impl ServiceConfig {
    /// Load configuration from environment variables and secrets files.
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            listen_addr: std::env::var("LISTEN_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".into()),
            database_url: std::env::var("DATABASE_URL")
                .ok()
                .filter(|s| !s.trim().is_empty()),
            database_max_connections: std::env::var("DATABASE_MAX_CONNECTIONS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(10),
            data_dir: std::env::var("DATA_DIR")
                .unwrap_or_else(|_| "/data/telecare-billing".into()),
            service_api_key: std::env::var("SERVICE_API_KEY").ok(),
            admin_api_key: std::env::var("ADMIN_API_KEY").ok(),
            gateway_signing_key: load_gateway_signing_key(),
            fee_tolerance_percent: std::env::var("FEE_TOLERANCE_PERCENT")
                .ok()
                .and_then(|s| s.trim().parse().ok())
                .unwrap_or_else(|| Decimal::from(5)),
            supported_currencies: std::env::var("SUPPORTED_CURRENCIES")
                .map(|s| parse_currencies(&s))
                .unwrap_or_else(|_| default_currencies()),
            accepted_event_types: std::env::var("ACCEPTED_EVENT_TYPES")
                .map(|s| split_list(&s).map(|e| e.to_ascii_lowercase()).collect())
                .unwrap_or_else(|_| default_event_types()),
            enable_test_webhook: std::env::var("ENABLE_TEST_WEBHOOK")
                .map(|s| matches!(s.trim(), "1" | "true" | "TRUE" | "yes"))
                .unwrap_or(false),
            cors_origins: std::env::var("CORS_ORIGINS")
                .unwrap_or_else(|_| "*".into())
                .split(',')
                .map(|s| s.trim().to_string())
                .collect(),
            max_body_bytes: std::env::var("MAX_BODY_BYTES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(256 * 1024),
            request_timeout_seconds: std::env::var("REQUEST_TIMEOUT_SECONDS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(30),
            webhook_max_concurrency: std::env::var("WEBHOOK_MAX_CONCURRENCY")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(8),
        }
    }

    /// The settings handed to the reconciliation engine.
    #[must_use]
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            fee_tolerance_percent: self.fee_tolerance_percent,
            supported_currencies: self.supported_currencies.clone(),
            gateway_signing_key: self.gateway_signing_key.clone(),
            accepted_event_types: self.accepted_event_types.clone(),
        }
    }

    /// Webhook slots, kept below the PostgreSQL pool size so the read API always has a
    /// connection left.
    #[must_use]
    pub fn webhook_permits(&self) -> usize {
        let limit = self.webhook_max_concurrency.max(1);
        if self.database_url.is_none() {
            return limit;
        }
        let pool = usize::try_from(self.database_max_connections).unwrap_or(usize::MAX);
        limit.min(pool.saturating_sub(1)).max(1)
    }
}

fn split_list(value: &str) -> impl Iterator<Item = &str> {
    value.split(',').map(str::trim).filter(|s| !s.is_empty())
}

fn parse_currencies(value: &str) -> Vec<Currency> {
    let currencies: Vec<Currency> = split_list(value)
        .filter_map(|code| match Currency::new(code) {
            Ok(currency) => Some(currency),
            Err(e) => {
                tracing::warn!(error = %e, "Skipping invalid entry in SUPPORTED_CURRENCIES");
                None
            }
        })
        .collect();

    if currencies.is_empty() {
        tracing::warn!("SUPPORTED_CURRENCIES has no valid entries, using default");
        return default_currencies();
    }
    currencies
}

fn default_currencies() -> Vec<Currency> {
    EngineConfig::default().supported_currencies
}

fn default_event_types() -> Vec<String> {
    DEFAULT_EVENT_TYPES.iter().map(|s| (*s).to_string()).collect()
}

/// Load the gateway signing key from a secrets file or the environment.
fn load_gateway_signing_key() -> Option<String> {
    let secret_paths = [
        ".secrets/gateway.json",
        "telecare-billing/.secrets/gateway.json",
        "../.secrets/gateway.json",
    ];

    for path in &secret_paths {
        if let Ok(secrets) = load_secrets_file::<GatewaySecrets>(path) {
            tracing::info!(path = %path, "Loaded gateway secrets from file");
            return Some(secrets.signing_key);
        }
    }

    tracing::debug!("Gateway secrets file not found, using environment variables");
    std::env::var("GATEWAY_SIGNING_KEY")
        .ok()
        .filter(|s| !s.is_empty())
}

/// Load secrets from a JSON file.
fn load_secrets_file<T: serde::de::DeserializeOwned>(path: &str) -> Result<T, std::io::Error> {
    let path = Path::new(path);
    if !path.exists() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "Secrets file not found",
        ));
    }
    let contents = std::fs::read_to_string(path)?;
    serde_json::from_str(&contents)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".into(),
            database_url: None,
            database_max_connections: 10,
            data_dir: "/data/telecare-billing".into(),
            service_api_key: None,
            admin_api_key: None,
            gateway_signing_key: None,
            fee_tolerance_percent: Decimal::from(5),
            supported_currencies: default_currencies(),
            accepted_event_types: default_event_types(),
            enable_test_webhook: false,
            cors_origins: vec!["*".into()],
            max_body_bytes: 256 * 1024,
            request_timeout_seconds: 30,
            webhook_max_concurrency: 8,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn currency_list_skips_invalid_codes() {
        let parsed = parse_currencies("mwk, usd ,dollars,");
        assert_eq!(
            parsed,
            vec![Currency::new("MWK").unwrap(), Currency::new("USD").unwrap()]
        );
    }

    #[test]
    fn empty_currency_list_falls_back_to_default() {
        assert_eq!(parse_currencies(" , "), default_currencies());
    }

    #[test]
    fn engine_config_mirrors_service_settings() {
        let config = ServiceConfig {
            fee_tolerance_percent: Decimal::from(3),
            gateway_signing_key: Some("k".into()),
            ..ServiceConfig::default()
        };
        let engine = config.engine_config();
        assert_eq!(engine.fee_tolerance_percent, Decimal::from(3));
        assert_eq!(engine.gateway_signing_key.as_deref(), Some("k"));
        assert!(engine.accepts_event(Some("api.charge.payment")));
    }

    #[test]
    fn webhook_permits_stay_below_pool_size() {
        let memory = ServiceConfig::default();
        assert_eq!(memory.webhook_permits(), 8);

        let postgres = ServiceConfig {
            database_url: Some("postgres://localhost/billing".into()),
            database_max_connections: 4,
            ..ServiceConfig::default()
        };
        assert_eq!(postgres.webhook_permits(), 3);

        let tiny_pool = ServiceConfig {
            database_max_connections: 1,
            ..postgres.clone()
        };
        assert_eq!(tiny_pool.webhook_permits(), 1);

        let large_pool = ServiceConfig {
            database_max_connections: 50,
            ..postgres
        };
        assert_eq!(large_pool.webhook_permits(), 8);
    }
}
