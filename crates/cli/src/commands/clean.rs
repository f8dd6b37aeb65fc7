use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::Args;
use kiln_core::CACHE_RECORD_FILENAME;
use walkdir::WalkDir;

use crate::config::ProjectConfig;

#[derive(Args)]
pub struct CleanArgs {
    /// Cache folder name under the project root
    #[arg(long)]
    pub cache_folder: Option<String>,
}

pub async fn execute(project_root: PathBuf, args: CleanArgs) -> anyhow::Result<()> {
    let project_root = project_root
        .canonicalize()
        .with_context(|| format!("project root '{}' not found", project_root.display()))?;
    let mut config = ProjectConfig::load(&project_root)?;
    if let Some(folder) = args.cache_folder {
        config.cache.folder = folder;
    }

    let cache_root = project_root.join(&config.cache.folder);
    if !cache_root.exists() {
        println!("nothing to clean at {}", cache_root.display());
        return Ok(());
    }

    let records = count_records(&cache_root);
    tokio::fs::remove_dir_all(&cache_root)
        .await
        .with_context(|| format!("cannot remove '{}'", cache_root.display()))?;
    println!(
        "removed {} record{} from {}",
        records,
        if records == 1 { "" } else { "s" },
        cache_root.display()
    );
    Ok(())
}

fn count_records(cache_root: &Path) -> usize {
    WalkDir::new(cache_root)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_name() == CACHE_RECORD_FILENAME)
        .count()
}
