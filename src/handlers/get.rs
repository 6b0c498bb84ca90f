use anyhow::Result;
use chunkfetch::ConfigManager;
use chunkfetch::download::{
    ChecksumType, DownloadConfig, DownloadOrchestrator, DownloadStatus, file_name_from_url,
};
use console::{Term, style};
use indicatif::{HumanBytes, ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

pub struct GetArgs {
    pub url: String,
    pub output_dir: Option<String>,
    pub name: Option<String>,
    pub parallelism: Option<usize>,
    pub sha256: Option<String>,
    pub size: Option<u64>,
}

/// Runs one download, rendering its status stream. Ctrl-C pauses the
/// download so the same command resumes it later.
///
/// Returns whether the download succeeded.
pub async fn handle_get(config_manager: &ConfigManager, args: GetArgs) -> Result<bool> {
    let term = Term::stdout();
    let config = config_manager.config();

    let directory = args
        .output_dir
        .map(PathBuf::from)
        .unwrap_or_else(|| config.output_directory());
    let file_name = args
        .name
        .or_else(|| file_name_from_url(&args.url))
        .unwrap_or_else(|| "download.bin".to_string());
    let parallelism = args.parallelism.unwrap_or(config.download.parallelism);

    let mut request =
        DownloadConfig::new(args.url, directory, file_name).with_parallelism(parallelism);
    if let Some(size) = args.size {
        request = request.with_expected_length(size);
    }
    if let Some(digest) = args.sha256 {
        if config.output.verify_checksums {
            request = request.with_checksum(digest, ChecksumType::Sha256);
        } else {
            term.write_line(&format!(
                "{} Checksum verification is disabled in the config, ignoring --sha256",
                style("⚠️").yellow()
            ))?;
        }
    }

    term.write_line(&format!(
        "{} Downloading {}",
        style("⬇️").cyan(),
        style(&request.url).cyan().bold()
    ))?;
    term.write_line(&format!(
        "   {}: {}",
        style("Destination").dim(),
        style(request.file_path().display()).cyan()
    ))?;
    term.write_line(&format!(
        "   {}: {}",
        style("Parallelism").dim(),
        request.parallelism
    ))?;

    let orchestrator = Arc::new(DownloadOrchestrator::new(config.engine_options())?);
    let mut status_rx = orchestrator.subscribe();

    let bar = ProgressBar::new_spinner();
    bar.set_style(spinner_style());
    bar.enable_steady_tick(Duration::from_millis(100));

    let render_bar = bar.clone();
    let renderer = tokio::spawn(async move {
        while status_rx.changed().await.is_ok() {
            let status = status_rx.borrow_and_update().clone();
            render(&render_bar, &status);
            if status.is_terminal() {
                break;
            }
        }
    });

    let runner = Arc::clone(&orchestrator);
    let mut download = tokio::spawn(async move { runner.start(request).await });

    let status = tokio::select! {
        joined = &mut download => joined?,
        _ = tokio::signal::ctrl_c() => {
            if orchestrator.status().is_active() {
                bar.println("Interrupted, pausing download...");
                orchestrator.pause().await;
            }
            download.await?
        }
    };

    renderer.abort();
    bar.finish_and_clear();
    report(&term, &status)
}

fn render(bar: &ProgressBar, status: &DownloadStatus) {
    match status {
        DownloadStatus::Pending => bar.set_message("probing server"),
        DownloadStatus::Downloading {
            downloaded_bytes,
            total_bytes,
            speed_bytes_per_sec,
            ..
        } => {
            if let Some(total) = total_bytes {
                if bar.length() != Some(*total) {
                    bar.set_length(*total);
                    bar.set_style(bar_style());
                }
            }
            bar.set_position(*downloaded_bytes);
            bar.set_message(format!("{}/s", HumanBytes(*speed_bytes_per_sec)));
        }
        _ => {}
    }
}

fn report(term: &Term, status: &DownloadStatus) -> Result<bool> {
    match status {
        DownloadStatus::Success { file_path } => {
            term.write_line(&format!(
                "{} Saved to {}",
                style("✅").green(),
                style(file_path.display()).cyan()
            ))?;
            Ok(true)
        }
        DownloadStatus::Paused {
            downloaded_bytes,
            total_bytes,
        } => {
            let total = total_bytes
                .map(|t| HumanBytes(t).to_string())
                .unwrap_or_else(|| "unknown".to_string());
            term.write_line(&format!(
                "{} Paused at {} of {}",
                style("⏸️").yellow(),
                HumanBytes(*downloaded_bytes),
                total
            ))?;
            term.write_line(&format!(
                "{} Run the same command again to resume",
                style("💡").yellow()
            ))?;
            Ok(false)
        }
        DownloadStatus::Error { message, cause } => {
            term.write_line(&format!(
                "{} Download failed: {}",
                style("❌").red(),
                message
            ))?;
            if let Some(cause) = cause {
                term.write_line(&format!("   {}: {}", style("Cause").dim(), cause))?;
            }
            Ok(false)
        }
        other => {
            term.write_line(&format!(
                "{} Download stopped ({})",
                style("⏹️").yellow(),
                other.label()
            ))?;
            Ok(false)
        }
    }
}

fn spinner_style() -> ProgressStyle {
    ProgressStyle::with_template("{spinner:.green} [{elapsed_precise}] {bytes} ({msg})")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
}

fn bar_style() -> ProgressStyle {
    ProgressStyle::with_template(
        "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({msg}, {eta})",
    )
    .map(|s| s.progress_chars("#>-"))
    .unwrap_or_else(|_| ProgressStyle::default_bar())
}
