use anyhow::Result;
use chunkfetch::ConfigManager;
use chunkfetch::download::{ChunkPlanner, DownloadOrchestrator, RangeProbe};
use console::{Term, style};
use indicatif::{HumanBytes, ProgressBar, ProgressStyle};
use std::time::Duration;

pub async fn handle_probe(config_manager: &ConfigManager, url: String) -> Result<()> {
    let term = Term::stdout();
    let config = config_manager.config();
    let options = config.engine_options();
    let orchestrator = DownloadOrchestrator::new(options)?;

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.blue} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    spinner.set_message("Probing server...");
    spinner.enable_steady_tick(Duration::from_millis(100));

    let info = RangeProbe::new(orchestrator.client().clone())
        .probe(&url)
        .await;

    spinner.finish_and_clear();

    term.write_line(&format!("{} {}", style("🔎").cyan(), style(&url).cyan().bold()))?;
    let size = match info.content_length {
        Some(len) => format!("{} ({} bytes)", HumanBytes(len), len),
        None => style("unknown").yellow().to_string(),
    };
    term.write_line(&format!("   {}: {}", style("Size").dim(), size))?;
    term.write_line(&format!(
        "   {}: {}",
        style("Range requests").dim(),
        if info.supports_ranges {
            style("supported").green()
        } else {
            style("not supported").yellow()
        }
    ))?;
    term.write_line(&format!(
        "   {}: {}",
        style("Resumable").dim(),
        if info.can_split() {
            style("yes").green()
        } else {
            style("no").yellow()
        }
    ))?;
    if let Some(etag) = &info.etag {
        term.write_line(&format!("   {}: {}", style("ETag").dim(), etag))?;
    }
    if let Some(modified) = &info.last_modified {
        term.write_line(&format!("   {}: {}", style("Last-Modified").dim(), modified))?;
    }

    let planner = ChunkPlanner::new(orchestrator.options().min_chunk_size);
    let chunks = planner.plan(
        info.content_length,
        info.supports_ranges,
        0,
        config.download.parallelism,
        0,
    );
    let strategy = if chunks.len() > 1 {
        format!("{} parallel chunks", chunks.len())
    } else {
        "single stream".to_string()
    };
    term.write_line(&format!("   {}: {}", style("Strategy").dim(), strategy))?;

    Ok(())
}
