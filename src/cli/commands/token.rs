use anyhow::{Context, Result};
use clap::Args;
use colored::*;

use powerplatform_cli::ClientManager;
use powerplatform_cli::api::CallContext;

#[derive(Args)]
pub struct TokenArgs {
    /// Scope to acquire, defaults to the Power Platform API scope
    #[arg(long)]
    pub scope: Option<String>,

    /// Ignore any cached access token and redeem the refresh token
    #[arg(long)]
    pub force_refresh: bool,

    /// Print only the access token
    #[arg(long)]
    pub raw: bool,
}

pub async fn token_command(args: TokenArgs, manager: &ClientManager, ctx: &CallContext) -> Result<()> {
    let scope = args
        .scope
        .unwrap_or_else(|| manager.config().urls().powerplatform_scope.to_string());
    let tenant = manager.config().tenant_id.clone();

    let token = manager
        .token_provider()
        .acquire_silent(ctx, tenant.as_deref(), &scope, args.force_refresh)
        .await
        .with_context(|| format!("Failed to acquire a token for {}", scope))?;

    if args.raw {
        println!("{}", token.access_token);
        return Ok(());
    }

    println!("{:<10} {}", "Scope:".dimmed(), token.scope.cyan());
    println!("{:<10} {}", "Tenant:".dimmed(), token.tenant_id);
    println!("{:<10} {}", "Expires:".dimmed(), token.expires_on);
    println!("{}", token.access_token);
    Ok(())
}
