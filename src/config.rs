//! Runtime settings from the environment (after `.env` is loaded by the binary).

use crate::error::AppError;
use std::str::FromStr;

pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";
pub const DEFAULT_DATABASE_URL: &str = "postgres://localhost/starchart";
pub const DEFAULT_BODY_LIMIT: usize = 1024 * 1024;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StoreKind {
    Postgres,
    Memory,
}

impl FromStr for StoreKind {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(StoreKind::Postgres),
            "memory" => Ok(StoreKind::Memory),
            other => Err(AppError::BadRequest(format!("STARCHART_STORE: unknown store '{}'", other))),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Settings {
    pub store: StoreKind,
    pub database_url: String,
    pub bind_addr: String,
    pub max_connections: u32,
    pub body_limit: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            store: StoreKind::Postgres,
            database_url: DEFAULT_DATABASE_URL.into(),
            bind_addr: DEFAULT_BIND_ADDR.into(),
            max_connections: 5,
            body_limit: DEFAULT_BODY_LIMIT,
        }
    }
}

impl Settings {
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds settings from any key lookup; unset keys keep their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, AppError> {
        let defaults = Settings::default();
        Ok(Settings {
            store: match lookup("STARCHART_STORE") {
                Some(s) => s.parse()?,
                None => defaults.store,
            },
            database_url: lookup("DATABASE_URL").unwrap_or(defaults.database_url),
            bind_addr: lookup("BIND_ADDR").unwrap_or(defaults.bind_addr),
            max_connections: parse_or("MAX_CONNECTIONS", lookup("MAX_CONNECTIONS"), defaults.max_connections)?,
            body_limit: parse_or("BODY_LIMIT_BYTES", lookup("BODY_LIMIT_BYTES"), defaults.body_limit)?,
        })
    }
}

fn parse_or<T: FromStr>(key: &str, raw: Option<String>, default: T) -> Result<T, AppError> {
    match raw {
        None => Ok(default),
        Some(s) => s
            .trim()
            .parse()
            .map_err(|_| AppError::BadRequest(format!("{}: invalid value '{}'", key, s))),
    }
}
