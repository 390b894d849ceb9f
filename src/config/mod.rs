use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::models::{EventDescriptor, Region};

pub const DEFAULT_DATABASE_URL: &str = "sqlite:../data/vctsync.db";
pub const DEFAULT_SOURCE_BASE_URL: &str = "https://www.vlr.gg";

/// Events walked by `sync --all`: (path, name, region).
const KICKOFF_2026: &[(&str, &str, Region)] = &[
    ("/event/matches/2682/vct-2026-americas-kickoff", "VCT 2026: Americas Kickoff", Region::Americas),
    ("/event/matches/2684/vct-2026-emea-kickoff", "VCT 2026: EMEA Kickoff", Region::Emea),
    ("/event/matches/2683/vct-2026-pacific-kickoff", "VCT 2026: Pacific Kickoff", Region::Pacific),
    ("/event/matches/2685/vct-2026-china-kickoff", "VCT 2026: China Kickoff", Region::China),
];

pub fn default_events() -> Vec<EventDescriptor> {
    KICKOFF_2026
        .iter()
        .map(|(path, name, region)| EventDescriptor {
            path: path.to_string(),
            name: name.to_string(),
            region: *region,
        })
        .collect()
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub database_url: String,
    pub source_base_url: String,
    pub throttle: Duration,
    pub fetch_max_retries: u32,
    pub fetch_base_delay: Duration,
    pub fetch_max_delay: Duration,
    pub fetch_timeout: Duration,
    /// `None` disables the read cache entirely.
    pub redis_url: Option<String>,
    pub players_cache_ttl: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database_url: DEFAULT_DATABASE_URL.to_string(),
            source_base_url: DEFAULT_SOURCE_BASE_URL.to_string(),
            throttle: Duration::from_millis(1500),
            fetch_max_retries: 3,
            fetch_base_delay: Duration::from_secs(2),
            fetch_max_delay: Duration::from_secs(30),
            fetch_timeout: Duration::from_secs(20),
            redis_url: None,
            players_cache_ttl: Duration::from_secs(300),
        }
    }
}

impl Settings {
    /// Read settings from the process environment (after `dotenv` has run).
    pub fn from_env() -> Self {
        let defaults = Settings::default();
        Self {
            database_url: env::var("DATABASE_URL").unwrap_or(defaults.database_url),
            source_base_url: env::var("SOURCE_BASE_URL")
                .map(|u| u.trim_end_matches('/').to_string())
                .unwrap_or(defaults.source_base_url),
            throttle: secs_var("SCRAPER_THROTTLE_SECONDS", defaults.throttle),
            fetch_max_retries: parsed_var("FETCH_MAX_RETRIES", defaults.fetch_max_retries),
            fetch_base_delay: secs_var("FETCH_BASE_DELAY_SECONDS", defaults.fetch_base_delay),
            fetch_max_delay: secs_var("FETCH_MAX_DELAY_SECONDS", defaults.fetch_max_delay),
            fetch_timeout: secs_var("FETCH_TIMEOUT_SECONDS", defaults.fetch_timeout),
            redis_url: env::var("REDIS_URL").ok().filter(|u| !u.trim().is_empty()),
            players_cache_ttl: secs_var("CACHE_PLAYERS_TTL_SECONDS", defaults.players_cache_ttl),
        }
    }
}

fn parsed_var<T: FromStr + Copy + std::fmt::Debug>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => raw.trim().parse::<T>().unwrap_or_else(|_| {
            tracing::warn!("{}='{}' is not valid, using {:?}", key, raw, default);
            default
        }),
        Err(_) => default,
    }
}

fn secs_var(key: &str, default: Duration) -> Duration {
    let secs = parsed_var(key, default.as_secs_f64());
    if secs.is_finite() && secs >= 0.0 {
        Duration::from_secs_f64(secs)
    } else {
        tracing::warn!("{} must be a non-negative number of seconds, using {:?}", key, default);
        default
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_events_cover_all_kickoff_regions() {
        let events = default_events();
        assert_eq!(events.len(), 4);
        assert!(events.iter().all(|e| e.path.starts_with("/event/matches/")));
        assert!(events.iter().any(|e| e.region == Region::China));
    }

    #[test]
    fn test_defaults_match_documented_values() {
        let s = Settings::default();
        assert_eq!(s.fetch_max_retries, 3);
        assert_eq!(s.throttle, Duration::from_millis(1500));
        assert!(s.redis_url.is_none());
    }
}
