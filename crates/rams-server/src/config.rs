//! Configuration management

use axum::http::Method;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

use crate::audit::{
    analytics::{DEFAULT_FAILED_LOGIN_THRESHOLD, DEFAULT_SECURITY_LOOKBACK_HOURS, TOP_N},
    middleware::{normalize_entity_type, DEFAULT_ENTITY_SEGMENT},
    writer::{DEFAULT_MAX_IN_FLIGHT, DEFAULT_QUEUE_CAPACITY},
    AnalyticsSettings, CaptureConfig, QueueOverflowPolicy, RetentionConfig, WriterConfig,
};

// ============================================================================
// Server Configuration Constants
// ============================================================================

/// Default server host binding.
pub const DEFAULT_SERVER_HOST: &str = "127.0.0.1";

/// Default server port.
pub const DEFAULT_SERVER_PORT: u16 = 8000;

/// Default shutdown timeout in seconds.
pub const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 30;

/// Default database URL for local development.
pub const DEFAULT_DATABASE_URL: &str = "postgresql://localhost/rams";

/// Default maximum database connections in the pool.
pub const DEFAULT_DATABASE_MAX_CONNECTIONS: u32 = 10;

/// Default minimum database connections in the pool.
pub const DEFAULT_DATABASE_MIN_CONNECTIONS: u32 = 2;

/// Default database connection timeout in seconds.
pub const DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Default database idle timeout in seconds (10 minutes).
pub const DEFAULT_DATABASE_IDLE_TIMEOUT_SECS: u64 = 600;

/// Default CORS allowed origin for local development.
pub const DEFAULT_CORS_ALLOWED_ORIGIN: &str = "http://localhost:3000";

// ============================================================================
// Audit Configuration Constants
// ============================================================================

/// Methods audited by default.
pub const DEFAULT_AUDIT_METHODS: &str = "POST,PUT,PATCH,DELETE";

/// Path prefixes never audited by default.
pub const DEFAULT_AUDIT_IGNORE_PATHS: &str = "/health,/api/v1/audit-logs";

/// Default bound on loading a "before" snapshot, in milliseconds.
pub const DEFAULT_AUDIT_SNAPSHOT_TIMEOUT_MS: u64 = 200;

/// Retention is disabled unless configured.
pub const DEFAULT_AUDIT_RETENTION_DAYS: i64 = 0;

/// Default interval between retention runs, in hours.
pub const DEFAULT_AUDIT_RETENTION_INTERVAL_HOURS: u64 = 24;

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub cors: CorsConfig,
    pub auth: AuthConfig,
    pub audit: AuditConfig,
}

/// Server-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub shutdown_timeout_secs: u64,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout_secs: u64,
    pub idle_timeout_secs: u64,
}

/// CORS configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorsConfig {
    pub allowed_origins: Vec<String>,
    pub allow_credentials: bool,
}

/// Caller identity configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Accept `x-user-id` / `x-user-role` as the caller's identity. Enable
    /// only behind a gateway that authenticates and overwrites them.
    pub trust_identity_headers: bool,
}

/// Audit capture, writer, analytics and retention configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfig {
    pub methods: Vec<String>,
    pub ignore_paths: Vec<String>,
    pub entity_segment: usize,
    /// Entity types whose changes are diffed
    pub tracked_entities: Vec<String>,
    pub queue_capacity: usize,
    /// `block` or `drop_newest`
    pub queue_overflow: String,
    pub max_in_flight: usize,
    pub snapshot_timeout_ms: u64,
    pub failed_login_threshold: usize,
    pub security_lookback_hours: i64,
    /// 0 disables scheduled retention
    pub retention_days: i64,
    pub retention_interval_hours: u64,
}

impl Config {
    /// Load configuration from environment and defaults
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from `lookup`, falling back to defaults for
    /// missing or unparsable values
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let parsed = |key: &str| Parsed(lookup(key));
        let list = |key: &str, default: &str| -> Vec<String> {
            lookup(key)
                .unwrap_or_else(|| default.to_string())
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        };

        let config = Config {
            server: ServerConfig {
                host: lookup("RAMS_HOST").unwrap_or_else(|| DEFAULT_SERVER_HOST.to_string()),
                port: parsed("RAMS_PORT").unwrap_or(DEFAULT_SERVER_PORT),
                shutdown_timeout_secs: parsed("RAMS_SHUTDOWN_TIMEOUT")
                    .unwrap_or(DEFAULT_SHUTDOWN_TIMEOUT_SECS),
            },
            database: DatabaseConfig {
                url: lookup("DATABASE_URL").unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string()),
                max_connections: parsed("DATABASE_MAX_CONNECTIONS")
                    .unwrap_or(DEFAULT_DATABASE_MAX_CONNECTIONS),
                min_connections: parsed("DATABASE_MIN_CONNECTIONS")
                    .unwrap_or(DEFAULT_DATABASE_MIN_CONNECTIONS),
                connect_timeout_secs: parsed("DATABASE_CONNECT_TIMEOUT")
                    .unwrap_or(DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS),
                idle_timeout_secs: parsed("DATABASE_IDLE_TIMEOUT")
                    .unwrap_or(DEFAULT_DATABASE_IDLE_TIMEOUT_SECS),
            },
            cors: CorsConfig {
                allowed_origins: list("CORS_ALLOWED_ORIGINS", DEFAULT_CORS_ALLOWED_ORIGIN),
                allow_credentials: parsed("CORS_ALLOW_CREDENTIALS").unwrap_or(true),
            },
            auth: AuthConfig {
                trust_identity_headers: parsed("RAMS_TRUST_IDENTITY_HEADERS").unwrap_or(false),
            },
            audit: AuditConfig {
                methods: list("AUDIT_METHODS", DEFAULT_AUDIT_METHODS),
                ignore_paths: list("AUDIT_IGNORE_PATHS", DEFAULT_AUDIT_IGNORE_PATHS),
                entity_segment: parsed("AUDIT_ENTITY_SEGMENT").unwrap_or(DEFAULT_ENTITY_SEGMENT),
                tracked_entities: list("AUDIT_TRACKED_ENTITIES", ""),
                queue_capacity: parsed("AUDIT_QUEUE_CAPACITY").unwrap_or(DEFAULT_QUEUE_CAPACITY),
                queue_overflow: lookup("AUDIT_QUEUE_OVERFLOW")
                    .unwrap_or_else(|| "block".to_string()),
                max_in_flight: parsed("AUDIT_MAX_IN_FLIGHT").unwrap_or(DEFAULT_MAX_IN_FLIGHT),
                snapshot_timeout_ms: parsed("AUDIT_SNAPSHOT_TIMEOUT_MS")
                    .unwrap_or(DEFAULT_AUDIT_SNAPSHOT_TIMEOUT_MS),
                failed_login_threshold: parsed("AUDIT_FAILED_LOGIN_THRESHOLD")
                    .unwrap_or(DEFAULT_FAILED_LOGIN_THRESHOLD),
                security_lookback_hours: parsed("AUDIT_SECURITY_LOOKBACK_HOURS")
                    .unwrap_or(DEFAULT_SECURITY_LOOKBACK_HOURS),
                retention_days: parsed("AUDIT_RETENTION_DAYS")
                    .unwrap_or(DEFAULT_AUDIT_RETENTION_DAYS),
                retention_interval_hours: parsed("AUDIT_RETENTION_INTERVAL_HOURS")
                    .unwrap_or(DEFAULT_AUDIT_RETENTION_INTERVAL_HOURS),
            },
        };

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        // Validate port
        if self.server.port == 0 {
            anyhow::bail!("Server port must be greater than 0");
        }

        // Validate database URL
        if self.database.url.is_empty() {
            anyhow::bail!("Database URL cannot be empty");
        }

        // Validate connection pool settings
        if self.database.max_connections == 0 {
            anyhow::bail!("Database max_connections must be greater than 0");
        }

        if self.database.min_connections > self.database.max_connections {
            anyhow::bail!(
                "Database min_connections ({}) cannot be greater than max_connections ({})",
                self.database.min_connections,
                self.database.max_connections
            );
        }

        // Validate CORS origins
        if self.cors.allowed_origins.is_empty() {
            tracing::warn!("No CORS origins configured - all origins will be allowed");
        }

        self.audit.validate()
    }
}

/// Raw variable value, parsed on demand into the type of its default
struct Parsed(Option<String>);

impl Parsed {
    fn unwrap_or<T: FromStr>(self, default: T) -> T {
        self.0
            .and_then(|s| s.trim().parse().ok())
            .unwrap_or(default)
    }
}

impl AuditConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        self.parsed_methods()?;
        QueueOverflowPolicy::from_str(&self.queue_overflow)?;

        if self.queue_capacity == 0 {
            anyhow::bail!("AUDIT_QUEUE_CAPACITY must be greater than 0");
        }
        if self.max_in_flight == 0 {
            anyhow::bail!("AUDIT_MAX_IN_FLIGHT must be greater than 0");
        }
        if self.failed_login_threshold == 0 {
            anyhow::bail!("AUDIT_FAILED_LOGIN_THRESHOLD must be greater than 0");
        }
        if self.security_lookback_hours < 1 {
            anyhow::bail!("AUDIT_SECURITY_LOOKBACK_HOURS must be at least 1");
        }
        if self.retention_days < 0 {
            anyhow::bail!("AUDIT_RETENTION_DAYS cannot be negative");
        }
        if self.retention_days > 0 && self.retention_interval_hours == 0 {
            anyhow::bail!("AUDIT_RETENTION_INTERVAL_HOURS must be greater than 0");
        }
        Ok(())
    }

    fn parsed_methods(&self) -> anyhow::Result<Vec<Method>> {
        self.methods
            .iter()
            .map(|m| {
                Method::from_bytes(m.to_uppercase().as_bytes())
                    .map_err(|_| anyhow::anyhow!("Invalid HTTP method in AUDIT_METHODS: {}", m))
            })
            .collect()
    }

    pub fn capture_config(&self) -> anyhow::Result<CaptureConfig> {
        Ok(CaptureConfig {
            methods: self.parsed_methods()?,
            ignore_paths: self.ignore_paths.clone(),
            entity_segment: self.entity_segment,
            tracked_entities: self
                .tracked_entities
                .iter()
                .map(|e| normalize_entity_type(e))
                .collect(),
            snapshot_timeout: Duration::from_millis(self.snapshot_timeout_ms),
        })
    }

    pub fn writer_config(&self) -> anyhow::Result<WriterConfig> {
        Ok(WriterConfig {
            queue_capacity: self.queue_capacity,
            overflow_policy: self.queue_overflow.parse()?,
            max_in_flight: self.max_in_flight,
        })
    }

    pub fn analytics_settings(&self) -> AnalyticsSettings {
        AnalyticsSettings {
            failed_login_threshold: self.failed_login_threshold,
            security_lookback_hours: self.security_lookback_hours,
            top_n: TOP_N,
        }
    }

    pub fn retention_config(&self) -> RetentionConfig {
        RetentionConfig {
            days_to_keep: self.retention_days,
            interval: Duration::from_secs(self.retention_interval_hours.saturating_mul(3600)),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: DEFAULT_SERVER_HOST.to_string(),
                port: DEFAULT_SERVER_PORT,
                shutdown_timeout_secs: DEFAULT_SHUTDOWN_TIMEOUT_SECS,
            },
            database: DatabaseConfig {
                url: DEFAULT_DATABASE_URL.to_string(),
                max_connections: DEFAULT_DATABASE_MAX_CONNECTIONS,
                min_connections: DEFAULT_DATABASE_MIN_CONNECTIONS,
                connect_timeout_secs: DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS,
                idle_timeout_secs: DEFAULT_DATABASE_IDLE_TIMEOUT_SECS,
            },
            cors: CorsConfig {
                allowed_origins: vec![DEFAULT_CORS_ALLOWED_ORIGIN.to_string()],
                allow_credentials: true,
            },
            auth: AuthConfig::default(),
            audit: AuditConfig::default(),
        }
    }
}

impl Default for AuditConfig {
    fn default() -> Self {
        let split = |s: &str| s.split(',').map(str::to_string).collect::<Vec<_>>();
        Self {
            methods: split(DEFAULT_AUDIT_METHODS),
            ignore_paths: split(DEFAULT_AUDIT_IGNORE_PATHS),
            entity_segment: DEFAULT_ENTITY_SEGMENT,
            tracked_entities: Vec::new(),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            queue_overflow: "block".to_string(),
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
            snapshot_timeout_ms: DEFAULT_AUDIT_SNAPSHOT_TIMEOUT_MS,
            failed_login_threshold: DEFAULT_FAILED_LOGIN_THRESHOLD,
            security_lookback_hours: DEFAULT_SECURITY_LOOKBACK_HOURS,
            retention_days: DEFAULT_AUDIT_RETENTION_DAYS,
            retention_interval_hours: DEFAULT_AUDIT_RETENTION_INTERVAL_HOURS,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> anyhow::Result<Config> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = load(&[]).unwrap();
        assert_eq!(config.server.port, DEFAULT_SERVER_PORT);
        assert_eq!(config.audit.methods, vec!["POST", "PUT", "PATCH", "DELETE"]);
        assert!(config.audit.tracked_entities.is_empty());
        assert!(!config.audit.retention_config().is_enabled());
        assert!(!config.auth.trust_identity_headers);

        let capture = config.audit.capture_config().unwrap();
        assert_eq!(capture.methods, vec![Method::POST, Method::PUT, Method::PATCH, Method::DELETE]);
        assert_eq!(capture.ignore_paths, vec!["/health", "/api/v1/audit-logs"]);
    }

    #[test]
    fn test_audit_overrides() {
        let config = load(&[
            ("RAMS_PORT", "9090"),
            ("RAMS_TRUST_IDENTITY_HEADERS", "true"),
            ("AUDIT_TRACKED_ENTITIES", "projects, Grant-Awards"),
            ("AUDIT_QUEUE_OVERFLOW", "drop_newest"),
            ("AUDIT_SNAPSHOT_TIMEOUT_MS", "50"),
            ("AUDIT_RETENTION_DAYS", "365"),
            ("AUDIT_RETENTION_INTERVAL_HOURS", "6"),
        ])
        .unwrap();
        assert_eq!(config.server.port, 9090);
        assert!(config.auth.trust_identity_headers);

        let capture = config.audit.capture_config().unwrap();
        assert!(capture.is_tracked("projects"));
        assert!(capture.is_tracked("grant_awards"));
        assert_eq!(capture.snapshot_timeout, Duration::from_millis(50));

        let writer = config.audit.writer_config().unwrap();
        assert_eq!(writer.overflow_policy, QueueOverflowPolicy::DropNewest);

        let retention = config.audit.retention_config();
        assert!(retention.is_enabled());
        assert_eq!(retention.interval, Duration::from_secs(6 * 3600));
    }

    #[test]
    fn test_invalid_audit_settings() {
        assert!(load(&[("AUDIT_QUEUE_OVERFLOW", "explode")]).is_err());
        assert!(load(&[("AUDIT_QUEUE_CAPACITY", "0")]).is_err());
        assert!(load(&[("AUDIT_RETENTION_DAYS", "-1")]).is_err());
        assert!(load(&[("DATABASE_MIN_CONNECTIONS", "20")]).is_err());
    }
}
