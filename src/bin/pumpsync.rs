use anyhow::Context;
use clap::Parser;
use pumpsync::cli::{commands, config, Cli, Commands};

/// Load config or error with helpful message
fn require_config() -> anyhow::Result<config::Config> {
    config::Config::load().with_context(|| {
        format!(
            "No {} found. Run 'pumpsync init --identity <email>' first.",
            config::CONFIG_FILENAME
        )
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    pumpsync::native::init_tracing(cli.log_json);

    match cli.command {
        Commands::Init(args) => commands::execute_init(args)?,
        Commands::Login(args) => commands::execute_login(&require_config()?, args).await?,
        Commands::Devices(args) => commands::execute_devices(&require_config()?, args).await?,
        Commands::Events(args) => commands::execute_events(&require_config()?, args).await?,
        Commands::Query(args) => commands::execute_query(&require_config()?, args).await?,
        Commands::ClearCache => commands::execute_clear_cache(&require_config()?).await?,
    }

    Ok(())
}
