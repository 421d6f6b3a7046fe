use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

/// Read a profiled env var: tries {PROFILE}_{KEY} first, falls back to {KEY}.
fn profiled_env_opt(profile: &str, key: &str) -> Option<String> {
    if !profile.is_empty() {
        let prefixed = format!("{}_{}", profile, key);
        if let Some(v) = env_opt(&prefixed) {
            return Some(v);
        }
    }
    env_opt(key)
}

fn profiled_env_or(profile: &str, key: &str, default: &str) -> String {
    profiled_env_opt(profile, key).unwrap_or_else(|| default.to_string())
}

fn profiled_env_u16(profile: &str, key: &str, default: u16) -> u16 {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn profiled_env_u32(profile: &str, key: &str, default: u32) -> u32 {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn profiled_env_u64(profile: &str, key: &str, default: u64) -> u64 {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

// ── Top-level config ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Active profile name (empty = default).
    pub profile: String,
    pub server: ServerConfig,
    pub postgres: PostgresConfig,
    pub sync: SyncConfig,
    pub plugin: PluginConfig,
    pub secrets: SecretsConfig,
    pub auth: AuthConfig,
    pub queue: QueueConfig,
    pub aws: AwsConfig,
}

impl Config {
    /// Build config from environment variables (call `load_dotenv()` first).
    /// Profile is read from `COSTSYNC_PROFILE`. When set (e.g. `PROD`), every
    /// key is first looked up as `{PROFILE}_{KEY}`, falling back to `{KEY}`.
    pub fn from_env() -> Self {
        let profile = env_or("COSTSYNC_PROFILE", "").to_uppercase();
        Self::for_profile(&profile)
    }

    /// Build config for a specific named profile (empty string = default).
    pub fn for_profile(profile: &str) -> Self {
        let p = profile.to_uppercase();
        let p = p.as_str();
        Self {
            profile: p.to_string(),
            server: ServerConfig::from_env_profiled(p),
            postgres: PostgresConfig::from_env_profiled(p),
            sync: SyncConfig::from_env_profiled(p),
            plugin: PluginConfig::from_env_profiled(p),
            secrets: SecretsConfig::from_env_profiled(p),
            auth: AuthConfig::from_env_profiled(p),
            queue: QueueConfig::from_env_profiled(p),
            aws: AwsConfig::from_env_profiled(p),
        }
    }

    pub fn profile_label(&self) -> &str {
        if self.profile.is_empty() { "default" } else { &self.profile }
    }

    /// Print a redacted summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Config loaded (profile: {}):", self.profile_label());
        tracing::info!("  server:   {}:{}", self.server.host, self.server.port);
        tracing::info!("  postgres: host={}, db={}, configured={}", self.postgres.host, self.postgres.database, self.postgres.is_configured());
        tracing::info!("  sync:     task_timeout={}s, idle_timeout={}s", self.sync.task_timeout_secs, self.sync.plugin_idle_timeout_secs);
        tracing::info!("  secrets:  file={}", self.secrets.file.display());
        tracing::info!("  auth:     {} token(s)", self.auth.api_tokens.len());
        tracing::info!("  queue:    url={}", self.queue.queue_url.as_deref().unwrap_or("(none)"));
    }

    /// Redacted view of the effective configuration; carries no secrets.
    pub fn redacted_summary(&self) -> serde_json::Value {
        serde_json::json!({
            "profile": self.profile_label(),
            "server": { "host": self.server.host, "port": self.server.port },
            "postgres": {
                "host": self.postgres.host,
                "port": self.postgres.port,
                "database": self.postgres.database,
                "configured": self.postgres.is_configured(),
            },
            "sync": {
                "task_timeout_secs": self.sync.task_timeout_secs,
                "plugin_idle_timeout_secs": self.sync.plugin_idle_timeout_secs,
                "default_currency": self.sync.default_currency,
            },
            "plugin": { "request_timeout_secs": self.plugin.request_timeout_secs },
            "secrets": { "file": self.secrets.file },
            "auth": { "tokens": self.auth.api_tokens.len() },
            "queue": {
                "configured": self.queue.is_configured(),
                "batch_size": self.queue.batch_size,
            },
            "aws": { "region": self.aws.region },
        })
    }
}

// ── Server ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            host: profiled_env_or(p, "HOST", "0.0.0.0"),
            port: profiled_env_u16(p, "PORT", 3002),
        }
    }
}

// ── PostgreSQL ────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostgresConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: Option<String>,
    #[serde(skip_serializing)]
    pub password: Option<String>,
    pub ssl_mode: String,
    pub max_connections: u32,
}

impl PostgresConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            host: profiled_env_or(p, "PG_HOST", "localhost"),
            port: profiled_env_u16(p, "PG_PORT", 5432),
            database: profiled_env_or(p, "PG_DATABASE", "costsync"),
            username: profiled_env_opt(p, "PG_USERNAME"),
            password: profiled_env_opt(p, "PG_PASSWORD"),
            ssl_mode: profiled_env_or(p, "PG_SSL_MODE", "prefer"),
            max_connections: profiled_env_u32(p, "PG_MAX_CONNECTIONS", 10),
        }
    }

    pub fn connection_string(&self) -> String {
        let user = self.username.as_deref().unwrap_or("postgres");
        let pass = self.password.as_deref().unwrap_or("");
        format!(
            "postgres://{}:{}@{}:{}/{}?sslmode={}",
            user, pass, self.host, self.port, self.database, self.ssl_mode
        )
    }

    pub fn is_configured(&self) -> bool {
        self.username.is_some()
    }
}

// ── Sync ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Deadline for one task, from start to terminal transition.
    pub task_timeout_secs: u64,
    /// Maximum wait for the next batch from the plugin stream.
    pub plugin_idle_timeout_secs: u64,
    /// Currency assumed when a row carries none.
    pub default_currency: String,
}

impl SyncConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            task_timeout_secs: profiled_env_u64(p, "SYNC_TASK_TIMEOUT_SECS", 3600),
            plugin_idle_timeout_secs: profiled_env_u64(p, "SYNC_PLUGIN_IDLE_TIMEOUT_SECS", 300),
            default_currency: profiled_env_or(p, "SYNC_DEFAULT_CURRENCY", "USD"),
        }
    }

    pub fn task_timeout(&self) -> Duration {
        Duration::from_secs(self.task_timeout_secs)
    }

    pub fn plugin_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.plugin_idle_timeout_secs)
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            task_timeout_secs: 3600,
            plugin_idle_timeout_secs: 300,
            default_currency: "USD".to_string(),
        }
    }
}

// ── Plugin transport ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginConfig {
    /// Connect/handshake timeout for plugin HTTP calls.
    pub request_timeout_secs: u64,
}

impl PluginConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            request_timeout_secs: profiled_env_u64(p, "PLUGIN_REQUEST_TIMEOUT_SECS", 30),
        }
    }
}

// ── Secrets ───────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecretsConfig {
    pub file: PathBuf,
}

impl SecretsConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            file: PathBuf::from(profiled_env_or(p, "SECRETS_FILE", "data/secrets.json")),
        }
    }
}

// ── Auth ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AuthConfig {
    /// Bearer token → domain it may act on (`*` = any domain).
    #[serde(skip_serializing)]
    pub api_tokens: HashMap<String, String>,
}

impl AuthConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            api_tokens: profiled_env_opt(p, "API_TOKENS")
                .map(|raw| parse_token_map(&raw))
                .unwrap_or_default(),
        }
    }
}

/// Parse `token=domain,token2=*` into a map; malformed pairs are skipped.
pub fn parse_token_map(raw: &str) -> HashMap<String, String> {
    raw.split(',')
        .filter_map(|pair| {
            let (token, domain) = pair.split_once('=')?;
            let (token, domain) = (token.trim(), domain.trim());
            if token.is_empty() || domain.is_empty() {
                tracing::warn!("ignoring malformed API_TOKENS entry");
                return None;
            }
            Some((token.to_string(), domain.to_string()))
        })
        .collect()
}

// ── Task queue (SQS) ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    pub queue_url: Option<String>,
    pub dlq_url: Option<String>,
    pub visibility_timeout_secs: u32,
    pub batch_size: u32,
}

impl QueueConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            queue_url: profiled_env_opt(p, "QUEUE_URL"),
            dlq_url: profiled_env_opt(p, "QUEUE_DLQ_URL"),
            visibility_timeout_secs: profiled_env_u32(p, "QUEUE_VISIBILITY_TIMEOUT_SECS", 3600),
            batch_size: profiled_env_u32(p, "QUEUE_BATCH_SIZE", 1),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.queue_url.is_some()
    }
}

// ── AWS ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AwsConfig {
    pub region: String,
    pub access_key_id: Option<String>,
    #[serde(skip_serializing)]
    pub secret_access_key: Option<String>,
    #[serde(skip_serializing)]
    pub session_token: Option<String>,
    pub endpoint_url: Option<String>,
}

impl AwsConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            region: profiled_env_or(p, "AWS_REGION", "ap-northeast-2"),
            access_key_id: profiled_env_opt(p, "AWS_ACCESS_KEY_ID"),
            secret_access_key: profiled_env_opt(p, "AWS_SECRET_ACCESS_KEY"),
            session_token: profiled_env_opt(p, "AWS_SESSION_TOKEN"),
            endpoint_url: profiled_env_opt(p, "QUEUE_AWS_ENDPOINT_URL"),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_token_map_skips_malformed_pairs() {
        let map = parse_token_map("abc=domain-1, def=* ,broken,=x,y=");
        assert_eq!(map.len(), 2);
        assert_eq!(map.get("abc").map(String::as_str), Some("domain-1"));
        assert_eq!(map.get("def").map(String::as_str), Some("*"));
    }

    #[test]
    fn sync_defaults() {
        let sync = SyncConfig::default();
        assert_eq!(sync.task_timeout(), Duration::from_secs(3600));
        assert_eq!(sync.plugin_idle_timeout(), Duration::from_secs(300));
        assert_eq!(sync.default_currency, "USD");
    }

    #[test]
    fn connection_string_uses_defaults() {
        let pg = PostgresConfig {
            host: "db".into(),
            port: 5432,
            database: "costsync".into(),
            username: Some("app".into()),
            password: None,
            ssl_mode: "disable".into(),
            max_connections: 5,
        };
        assert_eq!(pg.connection_string(), "postgres://app:@db:5432/costsync?sslmode=disable");
        assert!(pg.is_configured());
    }

    #[test]
    fn redacted_summary_hides_tokens() {
        let mut config = Config::for_profile("UNITTEST_NO_SUCH_PROFILE");
        config.auth.api_tokens = HashMap::from([("super-secret".to_string(), "domain-1".to_string())]);
        let summary = config.redacted_summary().to_string();
        assert!(!summary.contains("super-secret"));
        assert!(summary.contains("\"tokens\":1"));
    }
}
