//! Runtime configuration read from the environment.
//!
//! Command-line flags given to the `rustybox` launcher override these
//! values; applets invoked through a symlink only see the environment.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Selects the default implementation (`native` or `busybox`).
pub const IMPL_ENV: &str = "RUSTYBOX_IMPL";

/// `tracing-subscriber` filter directive for diagnostics on stderr.
pub const LOG_ENV: &str = "RUSTYBOX_LOG";

/// Filter used when `RUSTYBOX_LOG` is unset.
pub const DEFAULT_LOG_FILTER: &str = "warn";

/// Configuration errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// Unrecognised implementation name.
    #[error("invalid implementation '{value}' (expected 'native' or 'busybox')")]
    InvalidImplementation {
        /// The rejected value.
        value: String,
    },
}

/// Result type for configuration parsing.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Which implementation of an applet to prefer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Implementation {
    /// The Rust applets in this crate.
    #[default]
    Native,
    /// BusyBox applet mains called through the FFI bridge.
    BusyBox,
}

impl Implementation {
    /// Returns the canonical lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Implementation::Native => "native",
            Implementation::BusyBox => "busybox",
        }
    }
}

impl fmt::Display for Implementation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Implementation {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "native" | "rust" => Ok(Implementation::Native),
            "busybox" => Ok(Implementation::BusyBox),
            _ => Err(ConfigError::InvalidImplementation {
                value: s.to_string(),
            }),
        }
    }
}

/// Settings gathered from the environment at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Preferred applet implementation.
    pub implementation: Implementation,
    /// Log filter directive.
    pub log_filter: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            implementation: Implementation::default(),
            log_filter: DEFAULT_LOG_FILTER.to_string(),
        }
    }
}

impl Config {
    /// Reads the configuration from the process environment.
    pub fn from_env() -> ConfigResult<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Reads the configuration from the process environment, falling back
    /// to the default implementation when `RUSTYBOX_IMPL` is unusable. The
    /// rejection is returned for the caller to report.
    pub fn from_env_lenient() -> (Self, Option<ConfigError>) {
        Self::from_lookup_lenient(|name| std::env::var(name).ok())
    }

    /// Builds the configuration from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> ConfigResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        match Self::from_lookup_lenient(lookup) {
            (_, Some(e)) => Err(e),
            (config, None) => Ok(config),
        }
    }

    /// Like [`from_lookup`](Self::from_lookup), but never fails.
    pub fn from_lookup_lenient<F>(lookup: F) -> (Self, Option<ConfigError>)
    where
        F: Fn(&str) -> Option<String>,
    {
        let (implementation, rejected) = match lookup(IMPL_ENV) {
            Some(value) if !value.trim().is_empty() => match value.parse() {
                Ok(implementation) => (implementation, None),
                Err(e) => (Implementation::default(), Some(e)),
            },
            _ => (Implementation::default(), None),
        };
        let log_filter = lookup(LOG_ENV)
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string());

        (
            Self {
                implementation,
                log_filter,
            },
            rejected,
        )
    }

    /// Applies launcher flags; an explicit flag beats the environment.
    pub fn with_flags(mut self, use_native: bool, use_busybox: bool) -> Self {
        if use_busybox {
            self.implementation = Implementation::BusyBox;
        }
        if use_native {
            self.implementation = Implementation::Native;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_implementation_parse() {
        assert_eq!("native".parse::<Implementation>(), Ok(Implementation::Native));
        assert_eq!("Rust".parse::<Implementation>(), Ok(Implementation::Native));
        assert_eq!("BUSYBOX".parse::<Implementation>(), Ok(Implementation::BusyBox));
        assert_eq!(
            "toybox".parse::<Implementation>(),
            Err(ConfigError::InvalidImplementation {
                value: "toybox".to_string()
            })
        );
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.log_filter, "warn");
    }

    #[test]
    fn test_from_lookup() {
        let config =
            Config::from_lookup(lookup(&[(IMPL_ENV, "busybox"), (LOG_ENV, "debug")])).unwrap();
        assert_eq!(config.implementation, Implementation::BusyBox);
        assert_eq!(config.log_filter, "debug");

        assert!(Config::from_lookup(lookup(&[(IMPL_ENV, "bogus")])).is_err());
    }

    #[test]
    fn test_invalid_implementation_falls_back() {
        let (config, rejected) =
            Config::from_lookup_lenient(lookup(&[(IMPL_ENV, "bogus"), (LOG_ENV, "debug")]));
        assert_eq!(config.implementation, Implementation::Native);
        assert_eq!(config.log_filter, "debug");
        assert_eq!(
            rejected,
            Some(ConfigError::InvalidImplementation {
                value: "bogus".to_string()
            })
        );

        let (config, rejected) = Config::from_lookup_lenient(lookup(&[(IMPL_ENV, "busybox")]));
        assert_eq!((config.implementation, rejected), (Implementation::BusyBox, None));
    }

    #[test]
    fn test_flags_override_environment() {
        let config = Config::from_lookup(lookup(&[(IMPL_ENV, "busybox")])).unwrap();
        assert_eq!(
            config.clone().with_flags(true, false).implementation,
            Implementation::Native
        );
        assert_eq!(
            config.with_flags(false, false).implementation,
            Implementation::BusyBox
        );
    }
}
