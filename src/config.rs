use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{str::FromStr, time::Duration};

use crate::audio::player::PlaybackTimings;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    // Discord
    pub discord_token: String,
    pub command_prefix: String,

    // Liveness endpoint
    pub port: u16,

    // Playback (seconds)
    pub join_timeout_secs: u64,
    pub idle_disconnect_secs: u64,
    pub reconnect_window_secs: u64,
    pub max_queue_size: usize,

    // Resolver
    pub ytdlp_path: String,
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from any key lookup, falling back to defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();

        let config = Self {
            discord_token: lookup("DISCORD_TOKEN")
                .filter(|token| !token.trim().is_empty())
                .context("DISCORD_TOKEN must be set")?,
            command_prefix: lookup("COMMAND_PREFIX").unwrap_or(defaults.command_prefix),

            port: parse_or(&lookup, "PORT", defaults.port)?,

            join_timeout_secs: parse_or(&lookup, "JOIN_TIMEOUT_SECS", defaults.join_timeout_secs)?,
            idle_disconnect_secs: parse_or(
                &lookup,
                "IDLE_DISCONNECT_SECS",
                defaults.idle_disconnect_secs,
            )?,
            reconnect_window_secs: parse_or(
                &lookup,
                "RECONNECT_WINDOW_SECS",
                defaults.reconnect_window_secs,
            )?,
            max_queue_size: parse_or(&lookup, "MAX_QUEUE_SIZE", defaults.max_queue_size)?,

            ytdlp_path: lookup("YTDLP_PATH").unwrap_or(defaults.ytdlp_path),
        };

        config.validate()?;

        Ok(config)
    }

    /// Validates configuration values for correctness.
    ///
    /// # Validation Rules
    ///
    /// - The command prefix must not be blank
    /// - Every playback timeout must be greater than zero
    /// - The queue must hold at least one track
    pub fn validate(&self) -> Result<()> {
        if self.command_prefix.trim().is_empty() {
            anyhow::bail!("Command prefix must not be empty");
        }

        if self.join_timeout_secs == 0 {
            anyhow::bail!("Join timeout must be greater than 0");
        }

        if self.idle_disconnect_secs == 0 {
            anyhow::bail!("Idle disconnect delay must be greater than 0");
        }

        if self.reconnect_window_secs == 0 {
            anyhow::bail!("Reconnect window must be greater than 0");
        }

        if self.max_queue_size == 0 {
            anyhow::bail!("Max queue size must be greater than 0");
        }

        Ok(())
    }

    /// Returns a summary of the current configuration for logging.
    ///
    /// Never includes the token.
    pub fn summary(&self) -> String {
        format!(
            "Config Summary:\n  \
            Commands: prefix '{}'\n  \
            Health: port {}\n  \
            Playback: {}s join timeout, {}s idle disconnect, {}s reconnect window\n  \
            Limits: {} queue\n  \
            Resolver: {}",
            self.command_prefix,
            self.port,
            self.join_timeout_secs,
            self.idle_disconnect_secs,
            self.reconnect_window_secs,
            self.max_queue_size,
            self.ytdlp_path,
        )
    }

    pub fn timings(&self) -> PlaybackTimings {
        PlaybackTimings {
            join_timeout: Duration::from_secs(self.join_timeout_secs),
            idle_grace: Duration::from_secs(self.idle_disconnect_secs),
            reconnect_window: Duration::from_secs(self.reconnect_window_secs),
        }
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .with_context(|| format!("Invalid value for {}: '{}'", key, raw)),
        _ => Ok(default),
    }
}

/// Default configuration values.
///
/// Used as fallbacks when environment variables are not provided.
impl Default for Config {
    fn default() -> Self {
        Self {
            // Discord (the token has no default)
            discord_token: String::new(),
            command_prefix: "!".to_string(),

            port: 3000,

            join_timeout_secs: 30,
            idle_disconnect_secs: 60,
            reconnect_window_secs: 5,
            max_queue_size: 1000,

            ytdlp_path: "yt-dlp".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults_apply_when_only_token_is_set() {
        let config = load(&[("DISCORD_TOKEN", "secret")]).unwrap();

        assert_eq!(config.command_prefix, "!");
        assert_eq!(config.port, 3000);
        assert_eq!(config.max_queue_size, 1000);
        assert_eq!(config.ytdlp_path, "yt-dlp");
        assert_eq!(config.timings(), PlaybackTimings::default());
    }

    #[test]
    fn test_missing_token_is_rejected() {
        assert!(load(&[]).is_err());
        assert!(load(&[("DISCORD_TOKEN", "  ")]).is_err());
    }

    #[test]
    fn test_overrides_are_parsed() {
        let config = load(&[
            ("DISCORD_TOKEN", "secret"),
            ("COMMAND_PREFIX", "?"),
            ("PORT", "8080"),
            ("IDLE_DISCONNECT_SECS", " 120 "),
            ("RECONNECT_WINDOW_SECS", "10"),
        ])
        .unwrap();

        assert_eq!(config.command_prefix, "?");
        assert_eq!(config.port, 8080);
        assert_eq!(config.timings().idle_grace, Duration::from_secs(120));
        assert_eq!(config.timings().reconnect_window, Duration::from_secs(10));
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        assert!(load(&[("DISCORD_TOKEN", "secret"), ("PORT", "http")]).is_err());
        assert!(load(&[("DISCORD_TOKEN", "secret"), ("JOIN_TIMEOUT_SECS", "0")]).is_err());
        assert!(load(&[("DISCORD_TOKEN", "secret"), ("MAX_QUEUE_SIZE", "0")]).is_err());
        assert!(load(&[("DISCORD_TOKEN", "secret"), ("COMMAND_PREFIX", " ")]).is_err());
    }

    #[test]
    fn test_summary_hides_token() {
        let config = load(&[("DISCORD_TOKEN", "super-secret-token")]).unwrap();
        let summary = config.summary();

        assert!(!summary.contains("super-secret-token"));
        assert!(summary.contains("60s idle disconnect"));
    }
}
