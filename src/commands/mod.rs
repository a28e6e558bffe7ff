//! Command implementations for the taproom CLI
//!
//! - **list**: installed, outdated, dependency and leaf listings (cached)
//! - **query**: info and search
//! - **install**: install, uninstall, upgrade, pin
//! - **maintenance**: update, cleanup, doctor, config, cache
//! - **services**: background service management
//! - **tap**: tap management
//! - **bundle**: Brewfile operations
//! - **utils**: shared output helpers (internal)

pub mod bundle;
pub mod install;
pub mod list;
pub mod maintenance;
pub mod query;
pub mod services;
pub mod tap;
pub(crate) mod utils;

pub use bundle::bundle;
pub use install::{install, pin, uninstall, unpin, upgrade};
pub use list::{deps, leaves, list, outdated};
pub use maintenance::{cache, cleanup, config, doctor, update};
pub use query::{info, search};
pub use services::services;
pub use tap::{tap, untap};
