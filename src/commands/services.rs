use super::utils::{note_source, perform_text, spinner};
use anyhow::Context;
use colored::Colorize;
use serde::Deserialize;
use taproom::{Brew, Operation};

/// One row of `brew services list --json`
#[derive(Debug, Deserialize)]
struct ServiceRow {
    name: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    user: Option<String>,
    #[serde(default)]
    file: Option<String>,
    #[serde(default)]
    exit_code: Option<i32>,
}

pub async fn services(
    brew: &Brew,
    action: Option<&str>,
    formula: Option<&str>,
    refresh: bool,
) -> anyhow::Result<()> {
    match action {
        None | Some("list") => list(brew, refresh).await?,
        Some(action @ ("start" | "stop" | "restart")) => {
            let formula = formula.ok_or_else(|| anyhow::anyhow!("Formula name required"))?;
            let name = formula.to_string();
            let (op, verb, done) = match action {
                "start" => (Operation::StartService { name }, "Starting", "Started"),
                "stop" => (Operation::StopService { name }, "Stopping", "Stopped"),
                _ => (Operation::RestartService { name }, "Restarting", "Restarted"),
            };

            perform_text(brew, &op, &format!("{verb} {formula}..."))
                .await
                .with_context(|| format!("Failed to {action} {formula}"))?;
            println!("  {} {} {}", "✓".green(), done, formula.bold().green());
        }
        Some(other) => {
            println!("{} Unknown action: {}", "✗".red(), other);
            println!("Available actions:");
            println!("  {} - List all services", "list".cyan());
            println!("  {} - Start a service", "start <formula>".cyan());
            println!("  {} - Stop a service", "stop <formula>".cyan());
            println!("  {} - Restart a service", "restart <formula>".cyan());
        }
    }

    Ok(())
}

async fn list(brew: &Brew, refresh: bool) -> anyhow::Result<()> {
    println!("{}", "==> Services".bold().green());
    println!();

    let pb = spinner("Reading services...")?;
    let result = brew
        .refresh(&Operation::Services, Vec::<serde_json::Value>::new(), refresh)
        .await;
    pb.finish_and_clear();
    let refreshed = result?;

    let services: Vec<ServiceRow> = refreshed
        .value
        .iter()
        .filter_map(|row| ServiceRow::deserialize(row).ok())
        .collect();

    if services.is_empty() {
        println!("No services found");
        println!("Services are background processes like databases and web servers.");
        return Ok(());
    }

    println!(
        "{:<20} {:<12} {:<8} {}",
        "Name".bold(),
        "Status".bold(),
        "User".bold(),
        "File".bold()
    );

    for service in &services {
        let status_str = match (service.status.as_str(), service.exit_code) {
            ("started", _) => "started".green().to_string(),
            ("error", Some(code)) => format!("error  {}", code).red().to_string(),
            ("none", _) | ("", _) => "none".dimmed().to_string(),
            (other, _) => other.yellow().to_string(),
        };

        println!(
            "{:<20} {:<20} {:<8} {}",
            service.name.cyan(),
            status_str,
            service.user.as_deref().unwrap_or(""),
            service.file.as_deref().unwrap_or("").dimmed()
        );
    }

    println!();
    println!(
        "{} {} services",
        "ℹ".blue(),
        services.len().to_string().bold()
    );
    note_source(&refreshed);

    Ok(())
}
