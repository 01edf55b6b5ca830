use std::fmt::{self, Display};
use std::str::FromStr;
use std::sync::OnceLock;

use serde::{Deserialize, Serialize};

use crate::path::VirtualPath;

/// Hosting environment a session runs in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    /// Interactive context; units arrive through completion callbacks.
    #[serde(alias = "window")]
    Foreground,
    /// Isolated context; every fetch blocks until the unit has run.
    #[serde(alias = "worker")]
    Background,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Foreground => "foreground",
            Environment::Background => "background",
        }
    }

    /// Name of the global object in exported bundles.
    pub fn global_object_name(&self) -> &'static str {
        match self {
            Environment::Foreground => "window",
            Environment::Background => "self",
        }
    }
}

impl Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown environment {0:?}")]
pub struct UnknownEnvironment(pub String);

impl FromStr for Environment {
    type Err = UnknownEnvironment;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "foreground" | "window" => Ok(Environment::Foreground),
            "background" | "worker" => Ok(Environment::Background),
            other => Err(UnknownEnvironment(other.to_string())),
        }
    }
}

/// What happens once the tree is fully resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Run,
    Export,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Run => "run",
            Mode::Export => "export",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    pub environment: Environment,
    pub mode: Mode,
    /// Decorate fetch locations with a uniqueness token.
    pub cache_bust: bool,
    /// Base the entry reference is resolved against.
    pub root_directory: VirtualPath,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            environment: Environment::Foreground,
            mode: Mode::Run,
            cache_bust: true,
            root_directory: VirtualPath::root(),
        }
    }
}

impl LoaderConfig {
    pub fn new(environment: Environment) -> Self {
        Self {
            environment,
            ..Self::default()
        }
    }

    pub fn with_mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_cache_bust(mut self, cache_bust: bool) -> Self {
        self.cache_bust = cache_bust;
        self
    }

    pub fn with_root_directory(mut self, root: VirtualPath) -> Self {
        self.root_directory = root;
        self
    }
}

fn env_true(key: &str) -> Option<bool> {
    std::env::var(key).ok().map(|val| {
        let trimmed = val.trim();
        !trimmed.is_empty() && !matches!(trimmed, "0" | "false" | "FALSE" | "False")
    })
}

pub fn cache_bust_override() -> Option<bool> {
    static CACHE_BUST: OnceLock<Option<bool>> = OnceLock::new();
    *CACHE_BUST.get_or_init(|| env_true("SL_CACHE_BUST"))
}

pub fn environment_override() -> Option<Environment> {
    static ENVIRONMENT: OnceLock<Option<Environment>> = OnceLock::new();
    *ENVIRONMENT.get_or_init(|| {
        let raw = std::env::var("SL_ENVIRONMENT").ok()?;
        match raw.parse() {
            Ok(env) => Some(env),
            Err(err) => {
                tracing::warn!("ignoring SL_ENVIRONMENT: {}", err);
                None
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn environment_accepts_short_aliases() {
        assert_eq!("window".parse::<Environment>().unwrap(), Environment::Foreground);
        assert_eq!("Worker".parse::<Environment>().unwrap(), Environment::Background);
        assert!("node".parse::<Environment>().is_err());
    }

    #[test]
    fn config_deserializes_partial_json() {
        let config: LoaderConfig =
            serde_json::from_str(r#"{"environment":"background","root_directory":"/app"}"#)
                .unwrap();
        assert_eq!(config.environment, Environment::Background);
        assert_eq!(config.mode, Mode::Run);
        assert!(config.cache_bust);
        assert_eq!(config.root_directory.to_string(), "/app");
    }
}
