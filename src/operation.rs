//! Named brew operations.
//!
//! Each [`Operation`] fixes the argument list passed to brew, how it is run
//! ([`Mode`]), how its exit status is read ([`ExitPolicy`]), and how it
//! relates to the cache: reads may declare a [`CachePolicy`], mutations
//! declare which cache keys they make stale.

use std::path::{Path, PathBuf};
use std::time::Duration;

/// Cache keys shared between reads and the mutations that invalidate them
pub mod keys {
    pub const INSTALLED: &str = "installed";
    pub const OUTDATED: &str = "outdated";
    pub const LEAVES: &str = "leaves";
    pub const DEPENDENCIES: &str = "dependencies";
    pub const TAPS: &str = "taps";
    pub const SERVICES: &str = "services";
}

const MINUTE: Duration = Duration::from_secs(60);

/// Quiet, plain output for anything a human will read
const PLAIN_TEXT_ENV: &[(&str, &str)] = &[
    ("HOMEBREW_NO_COLOR", "1"),
    ("HOMEBREW_NO_EMOJI", "1"),
    ("HOMEBREW_NO_ENV_HINTS", "1"),
];

const PACKAGE_KEYS: &[&str] = &[
    keys::INSTALLED,
    keys::OUTDATED,
    keys::LEAVES,
    keys::DEPENDENCIES,
    keys::SERVICES,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageKind {
    Formula,
    Cask,
}

impl PackageKind {
    pub fn flag(self) -> &'static str {
        match self {
            PackageKind::Formula => "--formula",
            PackageKind::Cask => "--cask",
        }
    }
}

/// How an operation is executed and what it returns
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Buffered; stdout is JSON decoded into a value
    Decoded,
    /// Buffered; stdout returned as text
    Raw,
    /// Stdout relayed live
    Streaming,
}

/// How a non-zero exit status is interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitPolicy {
    /// Non-zero exit is a failure
    Strict,
    /// Non-zero exit reports findings (e.g. `brew doctor` warnings)
    AllowNonZero,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CachePolicy {
    pub key: &'static str,
    pub max_age: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    /// Installed formulae and casks as JSON
    Installed,
    Outdated,
    /// Installed formulae that nothing else depends on
    Leaves,
    /// `name: dep dep ...` for every installed formula
    Dependencies,
    Taps,
    Services,
    Info { name: String, kind: PackageKind },
    Search { query: String },
    Version,
    Config,
    Doctor,

    Install { names: Vec<String>, kind: PackageKind },
    Uninstall { names: Vec<String>, kind: PackageKind },
    /// Upgrade `names`, or everything outdated when empty
    Upgrade { names: Vec<String> },
    Update,
    Cleanup,
    Pin { name: String },
    Unpin { name: String },
    StartService { name: String },
    StopService { name: String },
    RestartService { name: String },
    Tap { name: String },
    Untap { name: String },

    BundleDump { file: PathBuf },
    BundleInstall { file: PathBuf },
    /// Exits non-zero when the Brewfile's dependencies are not all satisfied
    BundleCheck { file: PathBuf },
}

impl Operation {
    /// Short name for logs and messages
    pub fn name(&self) -> &'static str {
        match self {
            Operation::Installed => "installed",
            Operation::Outdated => "outdated",
            Operation::Leaves => "leaves",
            Operation::Dependencies => "dependencies",
            Operation::Taps => "taps",
            Operation::Services => "services",
            Operation::Info { .. } => "info",
            Operation::Search { .. } => "search",
            Operation::Version => "version",
            Operation::Config => "config",
            Operation::Doctor => "doctor",
            Operation::Install { .. } => "install",
            Operation::Uninstall { .. } => "uninstall",
            Operation::Upgrade { .. } => "upgrade",
            Operation::Update => "update",
            Operation::Cleanup => "cleanup",
            Operation::Pin { .. } => "pin",
            Operation::Unpin { .. } => "unpin",
            Operation::StartService { .. } => "services start",
            Operation::StopService { .. } => "services stop",
            Operation::RestartService { .. } => "services restart",
            Operation::Tap { .. } => "tap",
            Operation::Untap { .. } => "untap",
            Operation::BundleDump { .. } => "bundle dump",
            Operation::BundleInstall { .. } => "bundle install",
            Operation::BundleCheck { .. } => "bundle check",
        }
    }

    /// Arguments passed to brew
    pub fn args(&self) -> Vec<String> {
        fn owned(args: &[&str]) -> Vec<String> {
            args.iter().map(|a| a.to_string()).collect()
        }
        fn with_names(args: &[&str], names: &[String]) -> Vec<String> {
            let mut out = owned(args);
            out.extend(names.iter().cloned());
            out
        }
        fn file_arg(file: &Path) -> String {
            format!("--file={}", file.display())
        }

        match self {
            Operation::Installed => owned(&["info", "--json=v2", "--installed"]),
            Operation::Outdated => owned(&["outdated", "--json=v2"]),
            Operation::Leaves => owned(&["leaves"]),
            Operation::Dependencies => owned(&["deps", "--installed", "--for-each"]),
            Operation::Taps => owned(&["tap"]),
            Operation::Services => owned(&["services", "list", "--json"]),
            Operation::Info { name, kind } => owned(&["info", "--json=v2", kind.flag(), name]),
            Operation::Search { query } => owned(&["search", query]),
            Operation::Version => owned(&["--version"]),
            Operation::Config => owned(&["config"]),
            Operation::Doctor => owned(&["doctor"]),
            Operation::Install { names, kind } => with_names(&["install", kind.flag()], names),
            Operation::Uninstall { names, kind } => {
                with_names(&["uninstall", kind.flag()], names)
            }
            Operation::Upgrade { names } => with_names(&["upgrade"], names),
            Operation::Update => owned(&["update"]),
            Operation::Cleanup => owned(&["cleanup"]),
            Operation::Pin { name } => owned(&["pin", name]),
            Operation::Unpin { name } => owned(&["unpin", name]),
            Operation::StartService { name } => owned(&["services", "start", name]),
            Operation::StopService { name } => owned(&["services", "stop", name]),
            Operation::RestartService { name } => owned(&["services", "restart", name]),
            Operation::Tap { name } => owned(&["tap", name]),
            Operation::Untap { name } => owned(&["untap", name]),
            Operation::BundleDump { file } => {
                vec!["bundle".into(), "dump".into(), "--force".into(), file_arg(file)]
            }
            Operation::BundleInstall { file } => {
                vec!["bundle".into(), "install".into(), file_arg(file)]
            }
            Operation::BundleCheck { file } => {
                vec!["bundle".into(), "check".into(), file_arg(file)]
            }
        }
    }

    pub fn mode(&self) -> Mode {
        match self {
            Operation::Installed
            | Operation::Outdated
            | Operation::Services
            | Operation::Info { .. } => Mode::Decoded,

            Operation::Install { .. }
            | Operation::Uninstall { .. }
            | Operation::Upgrade { .. }
            | Operation::Update
            | Operation::Cleanup
            | Operation::Tap { .. }
            | Operation::BundleInstall { .. } => Mode::Streaming,

            _ => Mode::Raw,
        }
    }

    /// Per-operation environment, layered over the runner's
    pub fn env(&self) -> &'static [(&'static str, &'static str)] {
        match self.mode() {
            Mode::Decoded => &[],
            Mode::Raw | Mode::Streaming => PLAIN_TEXT_ENV,
        }
    }

    pub fn exit_policy(&self) -> ExitPolicy {
        match self {
            Operation::Doctor | Operation::BundleCheck { .. } => ExitPolicy::AllowNonZero,
            _ => ExitPolicy::Strict,
        }
    }

    /// Cache key and default max age for cache-consulting reads
    pub fn cache_policy(&self) -> Option<CachePolicy> {
        let (key, max_age) = match self {
            Operation::Installed => (keys::INSTALLED, 5 * MINUTE),
            Operation::Outdated => (keys::OUTDATED, 15 * MINUTE),
            Operation::Leaves => (keys::LEAVES, 5 * MINUTE),
            Operation::Dependencies => (keys::DEPENDENCIES, 30 * MINUTE),
            Operation::Taps => (keys::TAPS, 30 * MINUTE),
            Operation::Services => (keys::SERVICES, MINUTE),
            _ => return None,
        };
        Some(CachePolicy { key, max_age })
    }

    /// Cache keys made stale when this operation succeeds
    pub fn invalidates(&self) -> &'static [&'static str] {
        match self {
            Operation::Install { .. }
            | Operation::Uninstall { .. }
            | Operation::Upgrade { .. }
            | Operation::Cleanup
            | Operation::BundleInstall { .. } => PACKAGE_KEYS,
            Operation::Update => &[keys::OUTDATED],
            Operation::Pin { .. } | Operation::Unpin { .. } => &[keys::INSTALLED, keys::OUTDATED],
            Operation::StartService { .. }
            | Operation::StopService { .. }
            | Operation::RestartService { .. } => &[keys::SERVICES],
            Operation::Tap { .. } | Operation::Untap { .. } => &[keys::TAPS, keys::OUTDATED],
            _ => &[],
        }
    }

    /// Whether the operation changes the system
    pub fn is_mutation(&self) -> bool {
        !self.invalidates().is_empty()
    }
}
