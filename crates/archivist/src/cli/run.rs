//! The processing run: queue setup, progress display and the final summary.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use archivist_core::{Config, ItemStatus, Pipeline, ProgressEvent, RunSummary, Stage, WorkQueue};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::watch::{self, WatchOptions};

/// Process `inputs` (and the drop folder, when watching) until done or Ctrl-C.
///
/// Item failures are reported in the summary; they do not make the run fail.
pub async fn execute(
    config: Config,
    inputs: Vec<PathBuf>,
    watch: Option<WatchOptions>,
) -> anyhow::Result<()> {
    let config = Arc::new(config);
    std::fs::create_dir_all(config.output_dir())?;
    let pipeline = Pipeline::from_config(config.clone())?;

    let queue = Arc::new(WorkQueue::new());
    let cancel = CancellationToken::new();
    spawn_ctrl_c(cancel.clone());

    for input in inputs {
        queue.push(input);
    }

    let watcher = match watch {
        Some(options) => {
            let ignored = vec![config.output_dir(), config.temp_dir(), config.log_dir()];
            Some(tokio::spawn(watch::watch(
                options,
                ignored,
                queue.clone(),
                cancel.clone(),
            )))
        }
        None => {
            queue.close();
            None
        }
    };

    let (tx, rx) = mpsc::channel(64);
    let display = tokio::spawn(show_progress(rx, queue.clone()));

    let started = Instant::now();
    let summary = pipeline.run(&queue, &tx, &cancel).await;
    drop(tx);
    display.await?;

    if let Some(watcher) = watcher {
        cancel.cancel();
        watcher.await?;
    }

    print_summary(&summary, started.elapsed());
    Ok(())
}

fn spawn_ctrl_c(cancel: CancellationToken) {
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl-C handler: {e}");
            return;
        }
        tracing::warn!("Interrupted, cancelling the current item");
        cancel.cancel();
    });
}

/// Create the per-run progress bar.
fn create_progress_bar() -> ProgressBar {
    let pb = ProgressBar::new(0);
    let style = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("##-");
    pb.set_style(style);
    pb.enable_steady_tick(Duration::from_millis(120));
    pb.set_message("waiting for input...");
    pb
}

/// Status line shown next to the progress bar.
pub fn progress_line(event: &ProgressEvent, total: usize) -> String {
    format!(
        "[{}/{}] {} — {} ({}%)",
        event.item_id, total, event.display_name, event.stage, event.percent
    )
}

async fn show_progress(mut rx: mpsc::Receiver<ProgressEvent>, queue: Arc<WorkQueue>) {
    let pb = create_progress_bar();
    let mut finished = 0u64;

    while let Some(event) = rx.recv().await {
        let total = queue.total();
        pb.set_length(total as u64 * 100);
        pb.set_position(finished * 100 + u64::from(event.percent));
        pb.set_message(progress_line(&event, total));

        match event.stage {
            Stage::Done => {
                finished += 1;
                pb.println(format!("{} {}", style("✓").green(), event.display_name));
            }
            Stage::Failed => {
                finished += 1;
                pb.println(format!(
                    "{} {}: {}",
                    style("✗").red(),
                    event.display_name,
                    event.message.as_deref().unwrap_or("failed")
                ));
            }
            _ => {}
        }
    }

    pb.finish_and_clear();
}

/// Print a formatted summary table after the run.
fn print_summary(summary: &RunSummary, elapsed: Duration) {
    eprintln!();
    eprintln!("  ====================================");
    eprintln!("               Summary");
    eprintln!("  ====================================");
    eprintln!("    Succeeded:    {:>8}", summary.succeeded());
    if summary.failed() > 0 {
        eprintln!("    Failed:       {:>8}", summary.failed());
    }
    if summary.unfinished() > 0 {
        eprintln!("    Not started:  {:>8}", summary.unfinished());
    }
    eprintln!("  ------------------------------------");
    eprintln!("    Total:        {:>8}", summary.items.len());
    eprintln!("    Duration:     {:>7.1}s", elapsed.as_secs_f64());
    eprintln!("  ====================================");

    for item in &summary.items {
        match &item.status {
            ItemStatus::Done(report) => eprintln!(
                "  {} #{} {} -> {}",
                style("ok").green(),
                item.id,
                item.display_name,
                report.output.path.display()
            ),
            ItemStatus::Failed { stage, reason } => eprintln!(
                "  {} #{} {} at {stage}: {reason}",
                style("failed").red(),
                item.id,
                item.display_name
            ),
            _ => eprintln!(
                "  {} #{} {}",
                style("skipped").yellow(),
                item.id,
                item.display_name
            ),
        }
    }
}
