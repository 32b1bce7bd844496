//! Configuration loaded from environment variables.

use std::env;
use std::sync::LazyLock;

use anyhow::{Context, Result, bail};
use regex::Regex;

use crate::export::{LineTerminator, TagCombination};

/// PostgreSQL memory setting accepted by `SET LOCAL work_mem`.
///
/// # Panics
///
/// Panics if the hard-coded regex literal is invalid (impossible in practice).
#[allow(clippy::expect_used)]
static MEMORY_SETTING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9]+(kB|MB|GB)$").expect("valid regex literal"));

/// PostgreSQL duration accepted by `SET LOCAL statement_timeout`.
#[allow(clippy::expect_used)]
static DURATION_SETTING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9]+(ms|s|min)$").expect("valid regex literal"));

/// Application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP server port (default: 8080).
    pub port: u16,

    /// PostgreSQL connection URL.
    pub database_url: String,

    /// Maximum database connections in pool (default: 10).
    pub database_max_connections: u32,

    /// Working memory granted to live export queries (default: 64MB).
    pub db_work_mem: String,

    /// Statement timeout applied to every export query (default: 60s).
    pub db_statement_timeout: String,

    /// Redis connection URL for the re-evaluation sink.
    pub redis_url: String,

    /// Redis list receiving re-evaluation messages.
    pub eval_queue: String,

    /// Always use the live join, ignoring per-account aggregates.
    pub disable_cached_counts: bool,

    /// Export serializer settings.
    pub export: ExportConfig,

    /// Whether the re-evaluation job publishes anything at all.
    pub enable_recalc_messages_send: bool,

    /// Re-evaluate only systems attached to changed repositories.
    pub enable_repo_based_reeval: bool,

    /// Messages per publish call.
    pub reeval_batch_size: usize,

    /// Path key for `POST /reevaluate/{key}`. Unset disables the trigger.
    pub reeval_key: Option<String>,

    /// CORS allowed origins (comma-separated, default: "*").
    pub cors_allowed_origins: Vec<String>,
}

/// Export output settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExportConfig {
    /// Emit a header row at the top of CSV documents.
    pub csv_header: bool,

    /// Record separator for CSV documents.
    pub line_terminator: LineTerminator,

    /// How multiple tag expressions combine.
    pub tag_combination: TagCombination,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            csv_header: true,
            line_terminator: LineTerminator::Lf,
            tag_combination: TagCombination::All,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8080,
            database_url: String::new(),
            database_max_connections: 10,
            db_work_mem: "64MB".to_string(),
            db_statement_timeout: "60s".to_string(),
            redis_url: "redis://127.0.0.1:6379".to_string(),
            eval_queue: "patch.evaluation".to_string(),
            disable_cached_counts: false,
            export: ExportConfig::default(),
            enable_recalc_messages_send: true,
            enable_repo_based_reeval: false,
            reeval_batch_size: 500,
            reeval_key: None,
            cors_allowed_origins: vec!["*".to_string()],
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let port = env::var("PORT")
            .unwrap_or_else(|_| defaults.port.to_string())
            .parse()
            .context("PORT must be a valid u16")?;

        let database_url =
            env::var("DATABASE_URL").context("DATABASE_URL environment variable is required")?;

        let database_max_connections = env::var("DATABASE_MAX_CONNECTIONS")
            .unwrap_or_else(|_| defaults.database_max_connections.to_string())
            .parse()
            .context("DATABASE_MAX_CONNECTIONS must be a valid u32")?;

        let db_work_mem = env::var("DB_WORK_MEM").unwrap_or(defaults.db_work_mem);
        validate_setting("DB_WORK_MEM", &db_work_mem, &MEMORY_SETTING)?;

        let db_statement_timeout =
            env::var("DB_STATEMENT_TIMEOUT").unwrap_or(defaults.db_statement_timeout);
        validate_setting(
            "DB_STATEMENT_TIMEOUT",
            &db_statement_timeout,
            &DURATION_SETTING,
        )?;

        let redis_url = env::var("REDIS_URL").unwrap_or(defaults.redis_url);
        let eval_queue = env::var("EVAL_QUEUE").unwrap_or(defaults.eval_queue);

        let disable_cached_counts = env_bool("DISABLE_CACHED_COUNTS", false)?;

        let line_terminator = env::var("EXPORT_CSV_LINE_TERMINATOR")
            .unwrap_or_else(|_| "lf".to_string())
            .parse::<LineTerminator>()
            .map_err(anyhow::Error::msg)
            .context("EXPORT_CSV_LINE_TERMINATOR must be 'lf' or 'crlf'")?;

        let tag_combination = env::var("EXPORT_TAG_COMBINATION")
            .unwrap_or_else(|_| "all".to_string())
            .parse::<TagCombination>()
            .map_err(anyhow::Error::msg)
            .context("EXPORT_TAG_COMBINATION must be 'all' or 'any_within_namespace'")?;

        let export = ExportConfig {
            csv_header: env_bool("EXPORT_CSV_HEADER", true)?,
            line_terminator,
            tag_combination,
        };

        let enable_recalc_messages_send = env_bool("ENABLE_RECALC_MESSAGES_SEND", true)?;
        let enable_repo_based_reeval = env_bool("ENABLE_REPO_BASED_REEVAL", false)?;

        let reeval_batch_size: usize = env::var("REEVAL_BATCH_SIZE")
            .unwrap_or_else(|_| defaults.reeval_batch_size.to_string())
            .parse()
            .context("REEVAL_BATCH_SIZE must be a valid usize")?;
        if reeval_batch_size == 0 {
            bail!("REEVAL_BATCH_SIZE must be greater than zero");
        }

        let reeval_key = env::var("REEVAL_KEY").ok().filter(|k| !k.is_empty());

        let cors_allowed_origins = env::var("CORS_ALLOWED_ORIGINS")
            .map(|v| v.split(',').map(|s| s.trim().to_string()).collect())
            .unwrap_or(defaults.cors_allowed_origins);

        Ok(Self {
            port,
            database_url,
            database_max_connections,
            db_work_mem,
            db_statement_timeout,
            redis_url,
            eval_queue,
            disable_cached_counts,
            export,
            enable_recalc_messages_send,
            enable_repo_based_reeval,
            reeval_batch_size,
            reeval_key,
            cors_allowed_origins,
        })
    }
}

/// Read a boolean flag, accepting `true/false/1/0/yes/no`.
fn env_bool(name: &str, default: bool) -> Result<bool> {
    match env::var(name) {
        Ok(raw) => parse_bool(&raw).with_context(|| format!("{name} must be a boolean")),
        Err(_) => Ok(default),
    }
}

fn parse_bool(raw: &str) -> Result<bool> {
    match raw.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        other => bail!("'{other}' is not a boolean"),
    }
}

/// The value is interpolated into a `SET LOCAL`, so it must match the pattern exactly.
fn validate_setting(name: &str, value: &str, pattern: &Regex) -> Result<()> {
    if !pattern.is_match(value) {
        bail!("{name} has invalid value '{value}'");
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn parse_bool_variants() {
        assert!(parse_bool("TRUE").unwrap());
        assert!(parse_bool("1").unwrap());
        assert!(!parse_bool("no").unwrap());
        assert!(parse_bool("maybe").is_err());
    }

    #[test]
    fn work_mem_validation() {
        assert!(validate_setting("DB_WORK_MEM", "64MB", &MEMORY_SETTING).is_ok());
        assert!(validate_setting("DB_WORK_MEM", "512kB", &MEMORY_SETTING).is_ok());
        assert!(validate_setting("DB_WORK_MEM", "64MB'; DROP", &MEMORY_SETTING).is_err());
        assert!(validate_setting("DB_WORK_MEM", "lots", &MEMORY_SETTING).is_err());
    }

    #[test]
    fn statement_timeout_validation() {
        assert!(validate_setting("T", "60s", &DURATION_SETTING).is_ok());
        assert!(validate_setting("T", "500ms", &DURATION_SETTING).is_ok());
        assert!(validate_setting("T", "1 hour", &DURATION_SETTING).is_err());
    }

    #[test]
    fn defaults_are_sane() {
        let config = Config::default();
        assert_eq!(config.export.line_terminator, LineTerminator::Lf);
        assert_eq!(config.export.tag_combination, TagCombination::All);
        assert!(config.export.csv_header);
        assert!(config.reeval_batch_size > 0);
    }
}
