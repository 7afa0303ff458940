//! The configuration contract the core reads (not how it is loaded — that
//! machinery is left to the binary and is explicitly out of scope for the
//! library).

use serde::{Deserialize, Serialize};
use std::fmt;

/// Recognized optional settings, with defaults matching the values stated
/// throughout the component design (30 minute session timeout, 50 max
/// turns, tournament maxParallel 3, etc).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub default_time_budget_sec: u64,
    pub max_concurrent_requests: usize,
    pub cache_ttl_sec: u64,
    pub cache_max_entries: usize,
    pub session_timeout_min: u64,
    pub max_turns_per_session: usize,
    pub tournament_max_parallel: usize,
    pub tournament_default_per_match_sec: u64,
    pub health_check_interval_sec: u64,
    pub log_level: LogLevel,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_time_budget_sec: 60,
            max_concurrent_requests: 16,
            cache_ttl_sec: 300,
            cache_max_entries: 10_000,
            session_timeout_min: 30,
            max_turns_per_session: 50,
            tournament_max_parallel: 3,
            tournament_default_per_match_sec: 30,
            health_check_interval_sec: 60,
            log_level: LogLevel::Info,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        };
        write!(f, "{s}")
    }
}

/// Severity of a single [`ConfigIssue`] produced by [`Config::validate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Warning,
    Error,
}

#[derive(Debug, Clone)]
pub struct ConfigIssue {
    pub severity: ConfigSeverity,
    pub message: String,
}

impl fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl Config {
    /// Merges environment variables under the `RRO_` prefix over `self`,
    /// mirroring the precedence the binary applies: defaults, then a config
    /// file, then environment overrides.
    pub fn apply_env_overrides(&mut self) {
        macro_rules! override_u64 {
            ($field:ident, $name:literal) => {
                if let Ok(v) = std::env::var(concat!("RRO_", $name)) {
                    if let Ok(parsed) = v.parse() {
                        self.$field = parsed;
                    }
                }
            };
        }
        override_u64!(default_time_budget_sec, "DEFAULT_TIME_BUDGET_SEC");
        override_u64!(cache_ttl_sec, "CACHE_TTL_SEC");
        override_u64!(session_timeout_min, "SESSION_TIMEOUT_MIN");
        override_u64!(tournament_default_per_match_sec, "TOURNAMENT_PER_MATCH_SEC");
        override_u64!(health_check_interval_sec, "HEALTH_CHECK_INTERVAL_SEC");
    }

    /// Validates the loaded configuration against the ranges stated in the
    /// component design. Returns warnings for values outside the
    /// recommended-but-not-required range and errors for values the core
    /// cannot operate under at all.
    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();
        if self.tournament_max_parallel == 0 || self.tournament_max_parallel > 5 {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Warning,
                message: format!(
                    "tournament_max_parallel={} is outside the recommended 1..=5 range",
                    self.tournament_max_parallel
                ),
            });
        }
        if !(10..=120).contains(&self.tournament_default_per_match_sec) {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Warning,
                message: format!(
                    "tournament_default_per_match_sec={} is outside the recommended 10..=120 range",
                    self.tournament_default_per_match_sec
                ),
            });
        }
        if self.max_turns_per_session == 0 {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                message: "max_turns_per_session must be greater than zero".to_string(),
            });
        }
        if self.max_concurrent_requests == 0 {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                message: "max_concurrent_requests must be greater than zero".to_string(),
            });
        }
        issues
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_component_design() {
        let cfg = Config::default();
        assert_eq!(cfg.session_timeout_min, 30);
        assert_eq!(cfg.max_turns_per_session, 50);
        assert_eq!(cfg.tournament_max_parallel, 3);
        assert_eq!(cfg.tournament_default_per_match_sec, 30);
    }

    #[test]
    fn validate_flags_zero_max_turns_as_error() {
        let mut cfg = Config::default();
        cfg.max_turns_per_session = 0;
        let issues = cfg.validate();
        assert!(issues
            .iter()
            .any(|i| i.severity == ConfigSeverity::Error));
    }

    #[test]
    fn validate_flags_out_of_range_parallel_as_warning_only() {
        let mut cfg = Config::default();
        cfg.tournament_max_parallel = 9;
        let issues = cfg.validate();
        assert!(issues
            .iter()
            .all(|i| i.severity == ConfigSeverity::Warning));
        assert!(!issues.is_empty());
    }

    #[test]
    fn env_override_applies_prefixed_var() {
        std::env::set_var("RRO_SESSION_TIMEOUT_MIN", "45");
        let mut cfg = Config::default();
        cfg.apply_env_overrides();
        assert_eq!(cfg.session_timeout_min, 45);
        std::env::remove_var("RRO_SESSION_TIMEOUT_MIN");
    }
}
