//! Sign-in and sign-out

use anyhow::{Context, Result};
use clap::Args;
use colored::*;
use dialoguer::Confirm;
use is_terminal::IsTerminal;

use powerplatform_cli::api::CallContext;
use powerplatform_cli::auth::UserCredentials;
use powerplatform_cli::{AuthMode, ClientManager};

#[derive(Args)]
pub struct LoginArgs {
    /// Sign in with a device code instead of opening a browser
    #[arg(long, conflicts_with = "username")]
    pub use_device_code: bool,

    /// Sign in with a username and password (resource owner password grant)
    #[arg(long)]
    pub username: Option<String>,

    /// Password for --username; prompted for when omitted
    #[arg(long, requires = "username")]
    pub password: Option<String>,

    /// Scopes to acquire, defaults to every scope the resources need
    #[arg(long = "scope")]
    pub scopes: Vec<String>,
}

#[derive(Args)]
pub struct LogoutArgs {
    /// Username or home account id to remove, every account when omitted
    pub account: Option<String>,

    /// Skip confirmation
    #[arg(short, long)]
    pub force: bool,
}

pub async fn login_command(args: LoginArgs, manager: &ClientManager, ctx: &CallContext) -> Result<()> {
    let (mode, credentials) = match args.username {
        Some(username) => {
            let password = match args.password {
                Some(password) => password,
                None => rpassword::prompt_password(format!("Password for {}: ", username))
                    .context("Failed to read password")?,
            };
            (AuthMode::UsernamePassword, Some(UserCredentials { username, password }))
        }
        None if args.use_device_code => (AuthMode::DeviceCode, None),
        None if manager.token_provider().uses_client_secret() => (AuthMode::ClientSecret, None),
        None => (AuthMode::Interactive, None),
    };

    let scopes = if args.scopes.is_empty() {
        manager.config().required_scopes()
    } else {
        args.scopes
    };

    let tenant = manager.config().tenant_id.clone();
    let tokens = manager
        .token_provider()
        .login(ctx, tenant.as_deref(), &scopes, mode, credentials.as_ref())
        .await
        .context("Sign-in failed")?;

    let account = manager.token_provider().cache().default_account()?;
    match account {
        Some(account) => println!(
            "{} Signed in as {} (tenant {})",
            "✓".bright_green().bold(),
            account.preferred_username.bright_white().bold(),
            account.tenant_id
        ),
        None => println!("{} Signed in", "✓".bright_green().bold()),
    }
    for token in &tokens {
        println!("  {} {}", token.scope.cyan(), format!("expires {}", token.expires_on).dimmed());
    }
    Ok(())
}

pub async fn logout_command(args: LogoutArgs, manager: &ClientManager) -> Result<()> {
    let cache = manager.token_provider().cache();

    if args.account.is_none() && !args.force && std::io::stdin().is_terminal() {
        let confirmed = Confirm::new()
            .with_prompt("Remove every cached account?")
            .default(false)
            .interact()?;
        if !confirmed {
            println!("{}", "Cancelled".yellow());
            return Ok(());
        }
    }

    let removed = cache.clear(args.account.as_deref())?;
    match (removed, args.account) {
        (0, Some(account)) => anyhow::bail!("No cached account matches '{}'", account),
        (0, None) => println!("{}", "No cached accounts".dimmed()),
        (count, _) => println!("{} Removed {} account(s)", "✓".bright_green().bold(), count),
    }
    Ok(())
}
