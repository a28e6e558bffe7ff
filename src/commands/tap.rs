//! Tap (third-party repository) management

use super::utils::{note_source, perform_text, stream_output};
use colored::Colorize;
use taproom::{Brew, Operation};

/// List taps, or add one when a name is given
pub async fn tap(brew: &Brew, name: Option<String>) -> anyhow::Result<()> {
    match name {
        None => {
            let taps = brew.refresh_text(&Operation::Taps, String::new(), false).await?;
            for tap in taps.value.lines() {
                println!("{}", tap.cyan());
            }
            note_source(&taps);
        }
        Some(name) => {
            stream_output(brew, &Operation::Tap { name: name.clone() }).await?;
            println!("{} Tapped {}", "✓".green(), name.bold());
        }
    }
    Ok(())
}

pub async fn untap(brew: &Brew, name: String) -> anyhow::Result<()> {
    let message = format!("Untapping {name}...");
    perform_text(brew, &Operation::Untap { name: name.clone() }, &message).await?;
    println!("{} Untapped {}", "✓".green(), name.bold());
    Ok(())
}
