//! System maintenance: update, cleanup, doctor, config and the result cache

use super::utils::{perform_text, spinner, stream_output};
use colored::Colorize;
use taproom::{Brew, Operation};

pub async fn update(brew: &Brew) -> anyhow::Result<()> {
    stream_output(brew, &Operation::Update).await
}

pub async fn cleanup(brew: &Brew) -> anyhow::Result<()> {
    stream_output(brew, &Operation::Cleanup).await?;
    println!("{} Cleanup complete", "✓".green());
    Ok(())
}

pub async fn doctor(brew: &Brew) -> anyhow::Result<()> {
    let pb = spinner("Running brew doctor...")?;
    let result = brew.perform_result(&Operation::Doctor).await;
    pb.finish_and_clear();
    let result = result?;

    // Doctor writes its warnings to stderr and exits 1 when it has any
    let report = format!("{}{}", result.stdout, result.stderr);
    if result.success() {
        println!("{} Your system is ready to brew.", "✓".green());
    } else {
        for line in report.lines() {
            if line.starts_with("Warning:") {
                println!("{}", line.yellow().bold());
            } else {
                println!("{line}");
            }
        }
    }

    Ok(())
}

pub async fn config(brew: &Brew) -> anyhow::Result<()> {
    let output = perform_text(brew, &Operation::Config, "Reading configuration...").await?;
    for line in output.lines() {
        match line.split_once(':') {
            Some((key, value)) => println!("{}:{}", key.cyan(), value),
            None => println!("{line}"),
        }
    }
    Ok(())
}

pub fn cache(brew: &Brew, action: Option<&str>) -> anyhow::Result<()> {
    let cache = brew.cache();
    match action {
        None | Some("path") => println!("{}", cache.dir().display()),
        Some("clear") => {
            let removed = cache.clear();
            println!(
                "{} Removed {} cached {}",
                "✓".green(),
                removed.to_string().bold(),
                if removed == 1 { "result" } else { "results" }
            );
        }
        Some(other) => {
            println!("{} Unknown action: {}", "✗".red(), other);
            println!("Available actions:");
            println!("  {} - Show the cache directory", "path".cyan());
            println!("  {} - Remove all cached results", "clear".cyan());
        }
    }
    Ok(())
}
