//! Brewfile management commands
//!
//! Brewfiles are declarative package lists naming the taps, formulae and
//! casks a machine should have.

use super::utils::{perform_text, stream_output};
use colored::Colorize;
use std::path::PathBuf;
use taproom::{Brew, Operation};

/// Dump, install from, or check a Brewfile
///
/// # Arguments
/// * `brew` - The Homebrew client
/// * `action` - `dump`, `install` (default) or `check`
/// * `file` - The Brewfile path
pub async fn bundle(brew: &Brew, action: Option<&str>, file: PathBuf) -> anyhow::Result<()> {
    match action {
        Some("dump") => {
            let message = format!("Writing {}...", file.display());
            perform_text(brew, &Operation::BundleDump { file: file.clone() }, &message).await?;
            println!("{} Generated {}", "✓".green(), file.display().to_string().cyan());
        }
        None | Some("install") => {
            if !file.exists() {
                println!("{} {} not found", "✗".red(), file.display().to_string().bold());
                println!("Run {} to generate one", "taproom bundle dump".cyan());
                return Ok(());
            }
            stream_output(brew, &Operation::BundleInstall { file }).await?;
            println!("{} Bundle install complete", "✓".green().bold());
        }
        Some("check") => {
            let result = brew
                .perform_result(&Operation::BundleCheck { file: file.clone() })
                .await?;
            if result.success() {
                println!("{} The Brewfile's dependencies are satisfied.", "✓".green());
            } else {
                // bundle check lists what is missing and exits 1
                println!("{} {}", "⚠".yellow(), result.stdout.trim_end());
                println!("Run {} to install them", "taproom bundle install".cyan());
            }
        }
        Some(other) => {
            println!("{} Unknown action: {}", "✗".red(), other);
            println!("Available actions:");
            println!("  {} - Write installed packages to the Brewfile", "dump".cyan());
            println!("  {} - Install everything in the Brewfile", "install".cyan());
            println!("  {} - Report what the Brewfile is missing", "check".cyan());
        }
    }

    Ok(())
}
