use anyhow::Result;
use clap::Parser;
use log::{debug, info};

mod cli;

use cli::{Cli, Commands};
use cli::commands::{account, load_config, login, raw, token};
use powerplatform_cli::ClientManager;
use powerplatform_cli::api::CallContext;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    info!("Starting powerplatform-cli");

    let config = load_config(cli.config.as_deref(), cli.tenant.as_deref())?;
    debug!("Using cloud {}", config.cloud);
    let manager = ClientManager::new(config)?;

    // Ctrl-C aborts in-flight requests and poll sleeps
    let ctx = CallContext::new();
    let cancel = ctx.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    });

    match cli.command {
        Commands::Login(args) => login::login_command(args, &manager, &ctx).await,
        Commands::Logout(args) => login::logout_command(args, &manager).await,
        Commands::Account(args) => account::account_command(args, &manager).await,
        Commands::Token(args) => token::token_command(args, &manager, &ctx).await,
        Commands::Raw(args) => raw::raw_command(args, &manager, &ctx).await,
    }
}
