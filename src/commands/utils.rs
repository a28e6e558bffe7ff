//! Shared output helpers for command implementations

use colored::Colorize;
use futures::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use std::io::Write;
use std::time::Duration;
use taproom::{Brew, Operation, Refreshed, Source};

/// Spinner shown while a buffered brew call runs
pub(super) fn spinner(message: &str) -> anyhow::Result<ProgressBar> {
    let pb = ProgressBar::new_spinner();
    pb.set_style(ProgressStyle::default_spinner().template("{spinner:.cyan} {msg}")?);
    pb.set_message(message.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    Ok(pb)
}

/// Run a buffered operation behind a spinner, returning stdout
pub(super) async fn perform_text(brew: &Brew, op: &Operation, message: &str) -> anyhow::Result<String> {
    let pb = spinner(message)?;
    let result = brew.perform_text(op).await;
    pb.finish_and_clear();
    Ok(result?)
}

/// Relay a streaming operation to stdout; Ctrl-C cancels brew
pub(super) async fn stream_output(brew: &Brew, op: &Operation) -> anyhow::Result<()> {
    println!("{} brew {}", "==>".bold().blue(), op.args().join(" ").bold());

    let mut stream = brew.stream(op);
    let mut stdout = std::io::stdout();

    loop {
        tokio::select! {
            item = stream.next() => match item {
                Some(Ok(chunk)) => {
                    print!("{chunk}");
                    stdout.flush()?;
                }
                Some(Err(err)) => return Err(err.into()),
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                tracing::debug!(pid = ?stream.pid(), "interrupted, cancelling brew");
                stream.cancel();
            }
        }
    }

    Ok(())
}

/// Tell the user when they are looking at cached or fallback data
pub(super) fn note_source<T>(refreshed: &Refreshed<T>) {
    match &refreshed.source {
        Source::Fetched => {}
        Source::Cache => {
            if let Some(at) = refreshed.captured_at {
                println!(
                    "{}",
                    format!(
                        "(cached {}, use --refresh to update)",
                        at.with_timezone(&chrono::Local).format("%H:%M:%S")
                    )
                    .dimmed()
                );
            }
        }
        Source::Fallback(err) => {
            println!("{} Showing last known data: {}", "⚠".yellow(), err);
        }
    }
}

/// Print names in columns sized to the terminal
pub(super) fn print_columns(items: &[String]) {
    if items.is_empty() {
        return;
    }

    let width = std::env::var("COLUMNS")
        .ok()
        .and_then(|c| c.parse::<usize>().ok())
        .unwrap_or(80);
    let col_width = items.iter().map(|s| s.len()).max().unwrap_or(0) + 2;
    let per_row = (width / col_width).max(1);

    for row in items.chunks(per_row) {
        let line: String = row.iter().map(|s| format!("{s:<col_width$}")).collect();
        println!("{}", line.trim_end());
    }
}
