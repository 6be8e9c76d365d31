use std::time::Duration;

use crate::error::{MailError, MailResult};
use crate::mail::qr::DEFAULT_QR_BASE_URL;
use crate::mail::render::BodyMarkup;
use crate::mail::sender::SmtpConfig;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StoreBackend {
    Postgres,
    Memory,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MailerBackend {
    Smtp,
    Log,
}

pub const MIN_LEASE_SECONDS: i64 = 5;
/// One day.
pub const MAX_LEASE_SECONDS: i64 = 86_400;

/// Runtime configuration, read from `MAILFLOW_*` env vars with unprefixed fallbacks.
#[derive(Clone, Debug)]
pub struct Config {
    /// Required for the postgres backend only.
    pub database_url: Option<String>,
    pub worker_id: String,
    pub api_addr: Option<String>,
    pub migrate_on_startup: bool,

    pub lease_seconds: i64,
    /// 0 disables the in-process drain loop; an external cron hits `/cron/mail-queue`.
    pub drain_interval_secs: u64,
    pub send_concurrency: usize,
    pub send_timeout: Duration,

    pub store: StoreBackend,
    pub mailer: MailerBackend,
    pub smtp: SmtpConfig,
    pub from_address: String,
    pub reply_to: Option<String>,
    pub qr_base_url: String,
    pub body_markup: BodyMarkup,

    pub cron_secret: Option<String>,
    pub retention_days: i64,
    pub maintenance_interval_secs: u64,
}

impl Config {
    pub fn from_env() -> MailResult<Self> {
        dotenvy::dotenv().ok();

        let store = match env_or_fallback("MAILFLOW_STORE", "STORE").as_deref() {
            None | Some("postgres") | Some("pg") => StoreBackend::Postgres,
            Some("memory") => StoreBackend::Memory,
            Some(other) => {
                return Err(MailError::Config(format!("unknown store backend: {other}")))
            }
        };

        let database_url = env_or_fallback("MAILFLOW_DATABASE_URL", "DATABASE_URL");
        if store == StoreBackend::Postgres && database_url.is_none() {
            return Err(MailError::Config("DATABASE_URL is missing".into()));
        }

        let worker_id = env_or_fallback("MAILFLOW_WORKER_ID", "WORKER_ID")
            .or_else(|| std::env::var("HOSTNAME").ok())
            .unwrap_or_else(|| "worker-1".to_string());

        let api_addr = env_or_fallback("MAILFLOW_API_ADDR", "API_ADDR")
            .or_else(|| Some("0.0.0.0:8080".to_string()))
            .and_then(|s| normalize_optional_addr(&s));

        let migrate_on_startup = env_bool("MAILFLOW_MIGRATE_ON_STARTUP").unwrap_or(false);

        let lease_seconds = clamp_lease(env_parse("MAILFLOW_LEASE_SECONDS", "LEASE_SECONDS", 300i64));
        let drain_interval_secs = env_parse("MAILFLOW_DRAIN_INTERVAL_SECS", "DRAIN_INTERVAL_SECS", 60u64);
        let send_concurrency =
            env_parse("MAILFLOW_SEND_CONCURRENCY", "SEND_CONCURRENCY", 8usize).clamp(1, 256);
        let send_timeout = Duration::from_millis(
            env_parse("MAILFLOW_SEND_TIMEOUT_MS", "SEND_TIMEOUT_MS", 15_000u64).max(100),
        );

        let mailer = match env_or_fallback("MAILFLOW_MAILER", "MAILER").as_deref() {
            None | Some("smtp") => MailerBackend::Smtp,
            Some("log") => MailerBackend::Log,
            Some(other) => {
                return Err(MailError::Config(format!("unknown mailer backend: {other}")))
            }
        };

        let smtp_host = env_or_fallback("MAILFLOW_SMTP_HOST", "SMTP_HOST");
        if mailer == MailerBackend::Smtp && smtp_host.is_none() {
            return Err(MailError::Config(
                "SMTP_HOST is missing (set MAILFLOW_MAILER=log for local runs)".into(),
            ));
        }
        let smtp_tls = env_bool("MAILFLOW_SMTP_TLS").unwrap_or(true);
        let smtp = SmtpConfig {
            host: smtp_host.unwrap_or_else(|| "localhost".to_string()),
            port: env_parse("MAILFLOW_SMTP_PORT", "SMTP_PORT", if smtp_tls { 465u16 } else { 25 }),
            username: env_or_fallback("MAILFLOW_SMTP_USERNAME", "SMTP_USERNAME"),
            password: env_or_fallback("MAILFLOW_SMTP_PASSWORD", "SMTP_PASSWORD"),
            use_tls: smtp_tls,
        };

        let from_address = env_or_fallback("MAILFLOW_FROM_ADDRESS", "MAIL_FROM")
            .unwrap_or_else(|| "noreply@localhost".to_string());
        if !from_address.contains('@') {
            return Err(MailError::Config(format!(
                "from address is not an email: {from_address}"
            )));
        }

        let body_markup = match env_or_fallback("MAILFLOW_BODY_MARKUP", "BODY_MARKUP") {
            None => BodyMarkup::default(),
            Some(raw) => BodyMarkup::parse(&raw)
                .ok_or_else(|| MailError::Config(format!("unknown body markup policy: {raw}")))?,
        };

        Ok(Self {
            database_url,
            worker_id,
            api_addr,
            migrate_on_startup,
            lease_seconds,
            drain_interval_secs,
            send_concurrency,
            send_timeout,
            store,
            mailer,
            smtp,
            from_address,
            reply_to: env_or_fallback("MAILFLOW_REPLY_TO", "REPLY_TO"),
            qr_base_url: env_or_fallback("MAILFLOW_QR_BASE_URL", "QR_BASE_URL")
                .unwrap_or_else(|| DEFAULT_QR_BASE_URL.to_string()),
            body_markup,
            cron_secret: env_or_fallback("MAILFLOW_CRON_SECRET", "CRON_SECRET"),
            retention_days: env_parse("MAILFLOW_RETENTION_DAYS", "RETENTION_DAYS", 30i64).max(0),
            maintenance_interval_secs: env_parse(
                "MAILFLOW_MAINTENANCE_INTERVAL_SECS",
                "MAINTENANCE_INTERVAL_SECS",
                3600u64,
            )
            .max(1),
        })
    }
}

pub(crate) fn env_or_fallback(primary: &str, fallback: &str) -> Option<String> {
    std::env::var(primary)
        .ok()
        .filter(|s| !s.trim().is_empty())
        .or_else(|| std::env::var(fallback).ok().filter(|s| !s.trim().is_empty()))
}

fn env_parse<T: std::str::FromStr>(primary: &str, fallback: &str, default: T) -> T {
    env_or_fallback(primary, fallback)
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

pub(crate) fn env_bool(key: &str) -> Option<bool> {
    std::env::var(key).ok().map(|v| parse_bool(&v))
}

fn parse_bool(v: &str) -> bool {
    matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

fn normalize_optional_addr(value: &str) -> Option<String> {
    let v = value.trim();
    if v.is_empty() {
        return None;
    }
    if matches!(v.to_lowercase().as_str(), "0" | "off" | "false" | "none") {
        return None;
    }
    Some(v.to_string())
}

fn clamp_lease(secs: i64) -> i64 {
    secs.clamp(MIN_LEASE_SECONDS, MAX_LEASE_SECONDS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn addr_can_be_disabled() {
        assert_eq!(normalize_optional_addr(" off "), None);
        assert_eq!(normalize_optional_addr(""), None);
        assert_eq!(
            normalize_optional_addr("127.0.0.1:9000"),
            Some("127.0.0.1:9000".to_string())
        );
    }

    #[test]
    fn lease_is_clamped() {
        assert_eq!(clamp_lease(0), MIN_LEASE_SECONDS);
        assert_eq!(clamp_lease(-30), MIN_LEASE_SECONDS);
        assert_eq!(clamp_lease(300), 300);
        // would wrap negative as an i32
        assert_eq!(clamp_lease(3_000_000_000), MAX_LEASE_SECONDS);
        assert_eq!(clamp_lease(i64::MAX), MAX_LEASE_SECONDS);
    }

    #[test]
    fn bool_spellings() {
        for v in ["1", "true", "YES", " on "] {
            assert!(parse_bool(v), "{v}");
        }
        for v in ["0", "false", "nope", ""] {
            assert!(!parse_bool(v), "{v}");
        }
    }
}
