//! Configuration module - environment variable parsing

use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use crate::util::time::REFERENCE_TICK_NANOS;

/// Gameplay rules shared by every match on this server
#[derive(Clone, Debug)]
pub struct GameRules {
    /// Rounds played before the game ends
    pub max_rounds: u32,
    /// Score awarded to the sole survivor of a round
    pub last_man_standing_bonus: u32,
    /// Delay between loading a map and respawning players
    pub round_break: Duration,
    /// Cooldown between two shots of the same player
    pub reload: Duration,
    /// Fine-grained simulation period. Movement and shot speeds are fixed
    /// per tick, so changing this also changes game speed (see
    /// [`GameRules::speed_scale`]).
    pub sim_tick: Duration,
    /// Spectator broadcast period
    pub broadcast_tick: Duration,
}

impl GameRules {
    /// Game speed relative to the 15 ms tick the physics constants are
    /// calibrated for. `1.0` means real-time speeds as designed.
    pub fn speed_scale(&self) -> f64 {
        Duration::from_nanos(REFERENCE_TICK_NANOS).as_secs_f64() / self.sim_tick.as_secs_f64()
    }
}

impl Default for GameRules {
    fn default() -> Self {
        Self {
            max_rounds: 5,
            last_man_standing_bonus: 4,
            round_break: Duration::from_millis(3000),
            reload: Duration::from_millis(300),
            sim_tick: Duration::from_millis(15),
            broadcast_tick: Duration::from_millis(30),
        }
    }
}

/// Map generation service settings
#[derive(Clone, Debug)]
pub struct MapServiceConfig {
    /// Base URL of the generator, e.g. `http://map:3000`
    pub base_url: String,
    pub width: u32,
    pub height: u32,
    pub fill_percent: u32,
    /// Extra attempts after the first failed request
    pub retries: u32,
    pub timeout: Duration,
}

/// Application configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    /// Server binding address
    pub server_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Emit JSON log lines instead of the human-readable format
    pub log_json: bool,
    /// Allowed client origins for CORS (comma-separated), any origin when unset
    pub client_origin: Option<String>,
    /// Fixed seed for match RNGs, random per match when unset
    pub match_seed: Option<u64>,

    pub map_service: MapServiceConfig,
    pub rules: GameRules,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        // Render provides PORT env var, fall back to SERVER_ADDR or default
        let server_addr = if let Ok(port) = env::var("PORT") {
            format!("0.0.0.0:{}", port)
        } else {
            env::var("SERVER_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string())
        };

        let defaults = GameRules::default();
        let rules = GameRules {
            max_rounds: parse_or("MAX_ROUNDS", defaults.max_rounds)?,
            last_man_standing_bonus: parse_or(
                "LAST_MAN_STANDING_BONUS",
                defaults.last_man_standing_bonus,
            )?,
            round_break: millis_or("ROUND_BREAK_MS", defaults.round_break)?,
            reload: millis_or("RELOAD_MS", defaults.reload)?,
            sim_tick: millis_or("SIM_TICK_MS", defaults.sim_tick)?,
            broadcast_tick: millis_or("BROADCAST_TICK_MS", defaults.broadcast_tick)?,
        };

        if rules.sim_tick.is_zero() {
            return Err(ConfigError::Invalid("SIM_TICK_MS"));
        }
        if rules.broadcast_tick.is_zero() {
            return Err(ConfigError::Invalid("BROADCAST_TICK_MS"));
        }

        let map_service = MapServiceConfig {
            base_url: env::var("MAP_SERVICE_URL")
                .unwrap_or_else(|_| "http://map:3000".to_string()),
            width: parse_or("MAP_WIDTH", 75)?,
            height: parse_or("MAP_HEIGHT", 75)?,
            fill_percent: parse_or("MAP_FILL_PERCENT", 42)?,
            retries: parse_or("MAP_FETCH_RETRIES", 2)?,
            timeout: millis_or("MAP_FETCH_TIMEOUT_MS", Duration::from_millis(3000))?,
        };

        Ok(Self {
            server_addr: server_addr
                .parse()
                .map_err(|_| ConfigError::InvalidAddress)?,

            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            log_json: env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json")),
            client_origin: env::var("CLIENT_ORIGIN").ok(),
            match_seed: env::var("MATCH_SEED")
                .ok()
                .map(|v| v.parse().map_err(|_| ConfigError::Invalid("MATCH_SEED")))
                .transpose()?,

            map_service,
            rules,
        })
    }
}

/// Read a numeric variable, falling back to `default` when it is unset
fn parse_or<T: FromStr>(key: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(key) {
        Ok(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid(key)),
        Err(_) => Ok(default),
    }
}

fn millis_or(key: &'static str, default: Duration) -> Result<Duration, ConfigError> {
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<u64>()
            .map(Duration::from_millis)
            .map_err(|_| ConfigError::Invalid(key)),
        Err(_) => Ok(default),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for environment variable: {0}")]
    Invalid(&'static str),

    #[error("Invalid server address format")]
    InvalidAddress,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_rules_match_classic_game() {
        let rules = GameRules::default();
        assert_eq!(rules.max_rounds, 5);
        assert_eq!(rules.last_man_standing_bonus, 4);
        assert!(rules.broadcast_tick > rules.sim_tick);
    }

    #[test]
    fn speed_scale_follows_sim_tick() {
        assert_eq!(GameRules::default().speed_scale(), 1.0);

        let doubled = GameRules {
            sim_tick: Duration::from_millis(30),
            ..GameRules::default()
        };
        assert!((doubled.speed_scale() - 0.5).abs() < 1e-12);
    }

    #[test]
    fn unset_variable_falls_back_to_default() {
        let value: u32 = parse_or("ARENA_TEST_SURELY_UNSET_VARIABLE", 7).unwrap();
        assert_eq!(value, 7);
    }
}
