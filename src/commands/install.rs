//! Package installation, upgrade and removal

use super::utils::{perform_text, stream_output};
use colored::Colorize;
use taproom::{Brew, Operation, PackageKind};

fn kind(cask: bool) -> PackageKind {
    if cask {
        PackageKind::Cask
    } else {
        PackageKind::Formula
    }
}

pub async fn install(brew: &Brew, names: Vec<String>, cask: bool) -> anyhow::Result<()> {
    if names.is_empty() {
        anyhow::bail!("No packages specified");
    }

    let count = names.len();
    stream_output(
        brew,
        &Operation::Install {
            names,
            kind: kind(cask),
        },
    )
    .await?;

    println!(
        "{} Installed {} {}",
        "✓".green(),
        count.to_string().bold(),
        if count == 1 { "package" } else { "packages" }
    );
    Ok(())
}

pub async fn uninstall(brew: &Brew, names: Vec<String>, cask: bool) -> anyhow::Result<()> {
    if names.is_empty() {
        anyhow::bail!("No packages specified");
    }

    let count = names.len();
    stream_output(
        brew,
        &Operation::Uninstall {
            names,
            kind: kind(cask),
        },
    )
    .await?;

    println!(
        "{} Uninstalled {} {}",
        "✓".green(),
        count.to_string().bold(),
        if count == 1 { "package" } else { "packages" }
    );
    Ok(())
}

pub async fn upgrade(brew: &Brew, names: Vec<String>) -> anyhow::Result<()> {
    stream_output(brew, &Operation::Upgrade { names }).await?;
    println!("{} Upgrade complete", "✓".green());
    Ok(())
}

pub async fn pin(brew: &Brew, name: String) -> anyhow::Result<()> {
    let message = format!("Pinning {name}...");
    perform_text(brew, &Operation::Pin { name: name.clone() }, &message).await?;
    println!("{} Pinned {}", "✓".green(), name.bold());
    Ok(())
}

pub async fn unpin(brew: &Brew, name: String) -> anyhow::Result<()> {
    let message = format!("Unpinning {name}...");
    perform_text(brew, &Operation::Unpin { name: name.clone() }, &message).await?;
    println!("{} Unpinned {}", "✓".green(), name.bold());
    Ok(())
}
