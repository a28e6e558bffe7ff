//! Cached listings of the local Homebrew installation

use super::utils::{note_source, print_columns, spinner};
use colored::Colorize;
use serde_json::Value;
use taproom::{Brew, Operation};

fn str_field<'a>(value: &'a Value, key: &str) -> &'a str {
    value.get(key).and_then(Value::as_str).unwrap_or("")
}

fn entries<'a>(value: &'a Value, key: &str) -> &'a [Value] {
    value
        .get(key)
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

pub async fn list(brew: &Brew, casks: bool, refresh: bool) -> anyhow::Result<()> {
    let pb = spinner("Reading installed packages...")?;
    let result = brew.refresh(&Operation::Installed, Value::Null, refresh).await;
    pb.finish_and_clear();
    let installed = result?;

    let names: Vec<String> = if casks {
        entries(&installed.value, "casks")
            .iter()
            .map(|c| str_field(c, "token").to_string())
            .collect()
    } else {
        entries(&installed.value, "formulae")
            .iter()
            .map(|f| str_field(f, "name").to_string())
            .collect()
    };

    let kind = if casks { "casks" } else { "formulae" };
    if names.is_empty() {
        println!("No {kind} installed");
    } else {
        print_columns(&names);
        println!(
            "{} {} {} installed",
            "✓".green(),
            names.len().to_string().bold(),
            kind
        );
    }
    note_source(&installed);

    Ok(())
}

pub async fn outdated(brew: &Brew, refresh: bool) -> anyhow::Result<()> {
    let pb = spinner("Checking for outdated packages...")?;
    let result = brew.refresh(&Operation::Outdated, Value::Null, refresh).await;
    pb.finish_and_clear();
    let outdated = result?;

    let mut count = 0;
    for key in ["formulae", "casks"] {
        for pkg in entries(&outdated.value, key) {
            let installed: Vec<&str> = entries(pkg, "installed_versions")
                .iter()
                .filter_map(Value::as_str)
                .collect();
            let pinned = pkg.get("pinned").and_then(Value::as_bool).unwrap_or(false);

            println!(
                "{} ({}) < {}{}",
                str_field(pkg, "name").bold(),
                installed.join(", ").dimmed(),
                str_field(pkg, "current_version").green(),
                if pinned { " [pinned]".yellow().to_string() } else { String::new() }
            );
            count += 1;
        }
    }

    if count == 0 {
        println!("{} Everything is up to date", "✓".green());
    }
    note_source(&outdated);

    Ok(())
}

pub async fn deps(brew: &Brew, refresh: bool) -> anyhow::Result<()> {
    let pb = spinner("Reading dependencies...")?;
    let result = brew
        .refresh_text(&Operation::Dependencies, String::new(), refresh)
        .await;
    pb.finish_and_clear();
    let deps = result?;

    for line in deps.value.lines() {
        match line.split_once(':') {
            Some((name, rest)) if rest.trim().is_empty() => println!("{}", name.bold()),
            Some((name, rest)) => println!("{}: {}", name.bold(), rest.trim().dimmed()),
            None => println!("{line}"),
        }
    }
    note_source(&deps);

    Ok(())
}

pub async fn leaves(brew: &Brew, refresh: bool) -> anyhow::Result<()> {
    let leaves = brew
        .refresh_text(&Operation::Leaves, String::new(), refresh)
        .await?;

    let names: Vec<String> = leaves.value.lines().map(String::from).collect();
    print_columns(&names);
    note_source(&leaves);

    Ok(())
}
