//! Package lookups

use super::utils::perform_text;
use colored::Colorize;
use serde_json::Value;
use taproom::{Brew, Operation, PackageKind};

pub async fn info(brew: &Brew, name: &str, cask: bool) -> anyhow::Result<()> {
    let kind = if cask {
        PackageKind::Cask
    } else {
        PackageKind::Formula
    };
    let op = Operation::Info {
        name: name.to_string(),
        kind,
    };
    let info: Value = brew.perform(&op).await?;

    let key = if cask { "casks" } else { "formulae" };
    let Some(pkg) = info.get(key).and_then(|v| v.get(0)) else {
        println!("{} No information for {}", "⚠".yellow(), name.bold());
        return Ok(());
    };

    let field = |k: &str| pkg.get(k).and_then(Value::as_str).unwrap_or("");
    let version = if cask {
        field("version").to_string()
    } else {
        pkg.pointer("/versions/stable")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string()
    };

    println!("{} {}", name.bold().green(), version);
    if !field("desc").is_empty() {
        println!("{}", field("desc"));
    }
    if !field("homepage").is_empty() {
        println!("{}", field("homepage").cyan());
    }

    if !cask {
        let deps: Vec<&str> = pkg
            .get("dependencies")
            .and_then(Value::as_array)
            .map(|deps| deps.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default();
        if !deps.is_empty() {
            println!("{} {}", "Dependencies:".bold(), deps.join(", "));
        }
    }

    Ok(())
}

pub async fn search(brew: &Brew, query: &str) -> anyhow::Result<()> {
    let op = Operation::Search {
        query: query.to_string(),
    };
    let output = perform_text(brew, &op, &format!("Searching for {query}...")).await?;

    let mut found = 0;
    for line in output.lines() {
        if line.starts_with("==>") {
            println!("{}", line.bold().green());
        } else if !line.trim().is_empty() {
            println!("{line}");
            found += 1;
        }
    }

    if found == 0 {
        println!("No formulae or casks found for {}", query.bold());
    }

    Ok(())
}
