use anyhow::Result;
use chunkfetch::ConfigManager;
use chunkfetch::download::ResumeManifest;
use chunkfetch::download::manifest::MANIFEST_SUFFIX;
use console::{Term, style};
use dialoguer::Confirm;
use indicatif::HumanBytes;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// A partial download left behind by an interrupted `get`.
struct PartialDownload {
    manifest: PathBuf,
    destination: PathBuf,
    size_on_disk: u64,
    progress: Option<(u64, u64)>,
}

pub async fn handle_clean(
    config_manager: &ConfigManager,
    dir: Option<String>,
    dry_run: bool,
    yes: bool,
) -> Result<()> {
    let term = Term::stdout();
    let root = dir
        .map(PathBuf::from)
        .unwrap_or_else(|| config_manager.config().output_directory());

    if dry_run {
        term.write_line(&format!(
            "{} Dry run - showing what would be cleaned in {}",
            style("🧹").cyan(),
            style(root.display()).cyan()
        ))?;
    } else {
        term.write_line(&format!(
            "{} Looking for partial downloads in {}",
            style("🧹").cyan(),
            style(root.display()).cyan()
        ))?;
    }

    let partials = find_partial_downloads(&root).await;
    if partials.is_empty() {
        term.write_line(&format!("{} Nothing to clean", style("✅").green()))?;
        return Ok(());
    }

    let mut reclaimable = 0;
    for partial in &partials {
        reclaimable += partial.size_on_disk;
        let progress = match partial.progress {
            Some((done, total)) if total > 0 => {
                format!("{:.1}% complete", done as f64 / total as f64 * 100.0)
            }
            _ => "unknown progress".to_string(),
        };
        term.write_line(&format!(
            "   • {} ({}, {})",
            partial.destination.display(),
            HumanBytes(partial.size_on_disk),
            style(progress).dim()
        ))?;
    }

    if dry_run {
        term.write_line(&format!(
            "{} Would remove {} partial download(s), freeing {}",
            style("💡").yellow(),
            partials.len(),
            HumanBytes(reclaimable)
        ))?;
        return Ok(());
    }

    if !yes {
        let confirmed = Confirm::new()
            .with_prompt(format!("Remove {} partial download(s)?", partials.len()))
            .default(false)
            .interact()?;
        if !confirmed {
            term.write_line("Cancelled")?;
            return Ok(());
        }
    }

    let mut removed = 0;
    for partial in &partials {
        match remove_partial(partial).await {
            Ok(()) => removed += 1,
            Err(e) => term.write_line(&format!(
                "{} Failed to remove {}: {}",
                style("❌").red(),
                partial.destination.display(),
                e
            ))?,
        }
    }

    term.write_line(&format!(
        "{} Removed {} partial download(s), freed {}",
        style("✅").green(),
        removed,
        HumanBytes(reclaimable)
    ))?;

    Ok(())
}

async fn find_partial_downloads(root: &Path) -> Vec<PartialDownload> {
    let manifests: Vec<PathBuf> = WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| {
            entry
                .file_name()
                .to_str()
                .is_some_and(|name| name.ends_with(MANIFEST_SUFFIX))
        })
        .map(|entry| entry.into_path())
        .collect();

    let mut partials = Vec::with_capacity(manifests.len());
    for manifest in manifests {
        let Some(destination) = ResumeManifest::destination_for(&manifest) else {
            continue;
        };
        let size_on_disk = tokio::fs::metadata(&destination)
            .await
            .map(|m| m.len())
            .unwrap_or(0);
        let progress = match ResumeManifest::load(&manifest).await {
            Ok(Some(loaded)) => Some((loaded.downloaded_bytes(), loaded.total_length)),
            _ => None,
        };
        partials.push(PartialDownload {
            manifest,
            destination,
            size_on_disk,
            progress,
        });
    }
    partials.sort_by(|a, b| a.destination.cmp(&b.destination));
    partials
}

async fn remove_partial(partial: &PartialDownload) -> Result<()> {
    match tokio::fs::remove_file(&partial.destination).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }
    ResumeManifest::remove(&partial.manifest).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_finds_only_manifest_backed_files() {
        let dir = TempDir::new().unwrap();
        let nested = dir.path().join("nested");
        std::fs::create_dir_all(&nested).unwrap();

        std::fs::write(dir.path().join("done.iso"), b"complete").unwrap();
        std::fs::write(nested.join("half.iso"), vec![0u8; 100]).unwrap();
        std::fs::write(nested.join("half.iso.part.json"), b"not json").unwrap();

        let partials = find_partial_downloads(dir.path()).await;
        assert_eq!(partials.len(), 1);
        assert_eq!(partials[0].destination, nested.join("half.iso"));
        assert_eq!(partials[0].size_on_disk, 100);
        assert!(partials[0].progress.is_none());
    }

    #[tokio::test]
    async fn test_remove_partial_tolerates_missing_file() {
        let dir = TempDir::new().unwrap();
        let manifest = dir.path().join("gone.bin.part.json");
        std::fs::write(&manifest, b"{}").unwrap();

        let partial = PartialDownload {
            manifest: manifest.clone(),
            destination: dir.path().join("gone.bin"),
            size_on_disk: 0,
            progress: None,
        };
        remove_partial(&partial).await.unwrap();
        assert!(!manifest.exists());
    }
}
