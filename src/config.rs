//! Runtime configuration from environment variables.
//!
//! Every knob has a default; unparsable values fall back to the default
//! rather than failing startup. `.env` is loaded by `main` before this runs.

use std::time::Duration;

use crate::client::HistoryPolicy;
use crate::client::history::DEFAULT_MAX_DEPTH;
use crate::rate_limit::DEFAULT_STREAM_MIN_INTERVAL_MS;

const DEFAULT_PORT: u16 = 3000;
const DEFAULT_DB_MAX_CONNECTIONS: u32 = 5;
const DEFAULT_CLIENT_CHANNEL_CAPACITY: usize = 256;
const DEFAULT_SNAPSHOT_CACHE_CAPACITY: usize = 64;
const DEFAULT_PERSIST_CONFLICT_RETRIES: u32 = 3;

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub port: u16,
    /// `None` selects the in-memory document store.
    pub database_url: Option<String>,
    pub db_max_connections: u32,
    pub stream_min_interval: Duration,
    pub client_channel_capacity: usize,
    /// 0 disables the snapshot cache.
    pub snapshot_cache_capacity: usize,
    pub persist_conflict_retries: u32,
    pub history_max_depth: usize,
    pub history_policy: HistoryPolicy,
    /// Expose `POST /api/dev/session`.
    pub dev_session_endpoint: bool,
    /// `(token, identity)` pairs registered in the in-memory store at startup.
    pub dev_tokens: Vec<(String, String)>,
}

impl SyncConfig {
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup.
    #[must_use]
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let parse = &lookup;
        Self {
            port: parse_or(parse("PORT"), DEFAULT_PORT),
            database_url: parse("DATABASE_URL").filter(|url| !url.trim().is_empty()),
            db_max_connections: parse_or(parse("DB_MAX_CONNECTIONS"), DEFAULT_DB_MAX_CONNECTIONS),
            stream_min_interval: Duration::from_millis(parse_or(
                parse("STREAM_MIN_INTERVAL_MS"),
                DEFAULT_STREAM_MIN_INTERVAL_MS,
            )),
            client_channel_capacity: parse_or(parse("CLIENT_CHANNEL_CAPACITY"), DEFAULT_CLIENT_CHANNEL_CAPACITY)
                .max(1),
            snapshot_cache_capacity: parse_or(parse("SNAPSHOT_CACHE_CAPACITY"), DEFAULT_SNAPSHOT_CACHE_CAPACITY),
            persist_conflict_retries: parse_or(parse("PERSIST_CONFLICT_RETRIES"), DEFAULT_PERSIST_CONFLICT_RETRIES),
            history_max_depth: parse_or(parse("HISTORY_MAX_DEPTH"), DEFAULT_MAX_DEPTH),
            history_policy: parse("HISTORY_POLICY")
                .and_then(|v| HistoryPolicy::parse(&v))
                .unwrap_or_default(),
            dev_session_endpoint: parse("DEV_SESSION_ENDPOINT")
                .and_then(|v| parse_bool(&v))
                .unwrap_or(false),
            dev_tokens: parse("DEV_TOKENS")
                .map(|v| parse_dev_tokens(&v))
                .unwrap_or_default(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}

/// Parse an environment variable, falling back to `default` when unset or invalid.
pub fn env_parse<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr + Copy,
{
    parse_or(std::env::var(key).ok(), default)
}

/// Interpret common boolean spellings: `true/false`, `1/0`, `yes/no`, `on/off`.
#[must_use]
pub fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse `token=identity,token=identity`. Malformed pairs are skipped.
fn parse_dev_tokens(raw: &str) -> Vec<(String, String)> {
    raw.split(',')
        .filter_map(|pair| {
            let (token, identity) = pair.split_once('=')?;
            let (token, identity) = (token.trim(), identity.trim());
            (!token.is_empty() && !identity.is_empty()).then(|| (token.to_owned(), identity.to_owned()))
        })
        .collect()
}

fn parse_or<T>(raw: Option<String>, default: T) -> T
where
    T: std::str::FromStr + Copy,
{
    raw.and_then(|v| v.trim().parse::<T>().ok()).unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config_from(pairs: &[(&str, &str)]) -> SyncConfig {
        let map: HashMap<String, String> = pairs.iter().map(|(k, v)| ((*k).to_owned(), (*v).to_owned())).collect();
        SyncConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn defaults_when_unset() {
        let cfg = SyncConfig::default();
        assert_eq!(cfg.port, 3000);
        assert!(cfg.database_url.is_none());
        assert_eq!(cfg.stream_min_interval, Duration::from_millis(16));
        assert_eq!(cfg.client_channel_capacity, 256);
        assert_eq!(cfg.snapshot_cache_capacity, 64);
        assert_eq!(cfg.persist_conflict_retries, 3);
        assert_eq!(cfg.history_max_depth, 100);
        assert_eq!(cfg.history_policy, HistoryPolicy::ResetOnRemote);
    }

    #[test]
    fn overrides_are_parsed() {
        let cfg = config_from(&[
            ("PORT", "8080"),
            ("DATABASE_URL", "postgres://localhost/sketch"),
            ("STREAM_MIN_INTERVAL_MS", "33"),
            ("HISTORY_POLICY", "preserve"),
            ("SNAPSHOT_CACHE_CAPACITY", "0"),
        ]);
        assert_eq!(cfg.port, 8080);
        assert_eq!(cfg.database_url.as_deref(), Some("postgres://localhost/sketch"));
        assert_eq!(cfg.stream_min_interval, Duration::from_millis(33));
        assert_eq!(cfg.history_policy, HistoryPolicy::Preserve);
        assert_eq!(cfg.snapshot_cache_capacity, 0);
    }

    #[test]
    fn invalid_values_fall_back() {
        let cfg = config_from(&[("PORT", "not-a-port"), ("HISTORY_POLICY", "sometimes"), ("DATABASE_URL", " ")]);
        assert_eq!(cfg.port, 3000);
        assert_eq!(cfg.history_policy, HistoryPolicy::ResetOnRemote);
        assert!(cfg.database_url.is_none());
    }

    #[test]
    fn dev_settings_are_parsed() {
        let cfg = config_from(&[
            ("DEV_SESSION_ENDPOINT", "yes"),
            ("DEV_TOKENS", "tok-a=alice, tok-b=bob,broken,=nobody,tok-c="),
        ]);
        assert!(cfg.dev_session_endpoint);
        assert_eq!(
            cfg.dev_tokens,
            vec![("tok-a".to_owned(), "alice".to_owned()), ("tok-b".to_owned(), "bob".to_owned())]
        );
        assert!(!SyncConfig::default().dev_session_endpoint);
        assert!(SyncConfig::default().dev_tokens.is_empty());
    }

    #[test]
    fn parse_bool_spellings() {
        assert_eq!(parse_bool(" TRUE "), Some(true));
        assert_eq!(parse_bool("off"), Some(false));
        assert_eq!(parse_bool("maybe"), None);
    }

    #[test]
    fn channel_capacity_is_at_least_one() {
        let cfg = config_from(&[("CLIENT_CHANNEL_CAPACITY", "0")]);
        assert_eq!(cfg.client_channel_capacity, 1);
    }

    #[test]
    fn env_parse_missing_key_uses_default() {
        assert_eq!(env_parse("SKETCHSYNC_TEST_DEFINITELY_UNSET", 7_u32), 7);
    }
}
