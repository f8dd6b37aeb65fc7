use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Args;
use kiln_cache::CacheService;
use kiln_server::DevServer;
use tracing::info;

use crate::config::ProjectConfig;

#[derive(Args)]
pub struct ServeArgs {
    /// Address to listen on, e.g. 127.0.0.1:3678
    #[arg(long)]
    pub listen: Option<String>,

    /// Disable the source watcher and reload events
    #[arg(long)]
    pub no_watch: bool,

    /// Cache folder name under the project root
    #[arg(long)]
    pub cache_folder: Option<String>,

    /// Number of compatibility profiles to derive
    #[arg(long)]
    pub profile_count: Option<usize>,
}

pub async fn execute(project_root: PathBuf, args: ServeArgs) -> anyhow::Result<()> {
    let project_root = project_root
        .canonicalize()
        .with_context(|| format!("project root '{}' not found", project_root.display()))?;

    let mut config = ProjectConfig::load(&project_root)?;
    if let Some(listen) = args.listen {
        config.serve.listen = listen;
    }
    if args.no_watch {
        config.serve.watch = false;
    }
    if let Some(folder) = args.cache_folder {
        config.cache.folder = folder;
    }
    if let Some(count) = args.profile_count {
        config.profile_count = Some(count);
    }

    let pipeline = Arc::new(config.build_pipeline()?);
    let profiles = Arc::new(config.build_profiles()?);
    let cache_root = project_root.join(&config.cache.folder);
    let service = Arc::new(CacheService::new(
        project_root.clone(),
        cache_root,
        pipeline,
        config.cache.auto_clean,
    ));

    info!(
        project = %project_root.display(),
        transform = config.transform_command.as_deref().unwrap_or("passthrough"),
        "starting dev server"
    );
    let server = DevServer::new(project_root, service, profiles, config.server_config());
    server.start().await?;
    Ok(())
}
