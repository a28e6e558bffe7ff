//! Runtime configuration read from the environment.

use std::path::PathBuf;
use std::time::Duration;

/// Where brew lives, where the cache lives, and how long entries stay fresh
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub brew_path: PathBuf,
    pub cache_dir: PathBuf,
    /// Overrides every operation's default max age when set
    pub max_age: Option<Duration>,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            brew_path: detect_brew(),
            cache_dir: cache_dir(),
            max_age: std::env::var("TAPROOM_CACHE_MAX_AGE")
                .ok()
                .and_then(|secs| parse_max_age(&secs)),
        }
    }
}

fn parse_max_age(secs: &str) -> Option<Duration> {
    match secs.trim().parse::<u64>() {
        Ok(secs) => Some(Duration::from_secs(secs)),
        Err(err) => {
            tracing::warn!(value = secs, %err, "ignoring invalid TAPROOM_CACHE_MAX_AGE");
            None
        }
    }
}

/// Detect the Homebrew prefix on this system
pub fn detect_prefix() -> PathBuf {
    if let Ok(prefix) = std::env::var("HOMEBREW_PREFIX") {
        return PathBuf::from(prefix);
    }

    #[cfg(target_arch = "aarch64")]
    {
        PathBuf::from("/opt/homebrew")
    }
    #[cfg(not(target_arch = "aarch64"))]
    {
        PathBuf::from("/usr/local")
    }
}

/// Path to the brew executable
pub fn detect_brew() -> PathBuf {
    if let Some(brew) = std::env::var_os("TAPROOM_BREW") {
        return PathBuf::from(brew);
    }
    detect_prefix().join("bin/brew")
}

/// Cache directory (~/.cache/taproom/ or equivalent)
pub fn cache_dir() -> PathBuf {
    if let Some(dir) = std::env::var_os("TAPROOM_CACHE_DIR") {
        PathBuf::from(dir)
    } else if let Some(cache_home) = std::env::var_os("XDG_CACHE_HOME") {
        PathBuf::from(cache_home).join("taproom")
    } else if let Some(home) = std::env::var_os("HOME") {
        PathBuf::from(home).join(".cache/taproom")
    } else {
        PathBuf::from(".cache/taproom")
    }
}
