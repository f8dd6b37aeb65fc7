use std::path::PathBuf;

use clap::Subcommand;

pub mod clean;
pub mod serve;

#[derive(Subcommand)]
pub enum Commands {
    /// Start the dev server: compile on demand, live reload, static files
    Serve(serve::ServeArgs),

    /// Execute test files on the configured runtimes
    #[command(visible_alias = "t")]
    Test(test::TestArgs),

    /// Remove the compile cache
    Clean(clean::CleanArgs),
}

impl Commands {
    pub async fn execute(self, project_root: PathBuf) -> anyhow::Result<()> {
        match self {
            Commands::Serve(args) => serve::execute(project_root, args).await,
            Commands::Test(args) => test::execute(project_root, args).await,
            Commands::Clean(args) => clean::execute(project_root, args).await,
        }
    }
}
