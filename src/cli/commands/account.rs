//! Cached account management

use anyhow::Result;
use clap::{Args, Subcommand};
use colored::*;
use dialoguer::Select;
use is_terminal::IsTerminal;

use powerplatform_cli::ClientManager;
use powerplatform_cli::auth::AccountIdentity;

#[derive(Args)]
pub struct AccountCommands {
    #[command(subcommand)]
    pub command: AccountSubcommands,
}

#[derive(Subcommand)]
pub enum AccountSubcommands {
    /// List cached accounts
    List,
    /// Show the default account
    Show,
    /// Make an account the default for silent acquisition
    SetDefault {
        /// Username or home account id; chosen interactively when omitted
        account: Option<String>,
    },
}

pub async fn account_command(args: AccountCommands, manager: &ClientManager) -> Result<()> {
    let cache = manager.token_provider().cache();

    match args.command {
        AccountSubcommands::List => {
            let accounts = cache.accounts()?;
            if accounts.is_empty() {
                println!("{}", "No cached accounts. Run 'powerplatform-cli login' first.".dimmed());
                return Ok(());
            }
            let default = cache.default_account()?.map(|a| a.home_account_id);
            for account in &accounts {
                let marker = if default.as_deref() == Some(account.home_account_id.as_str()) {
                    "*".bright_green().bold()
                } else {
                    " ".normal()
                };
                println!("{} {}", marker, describe(account));
            }
        }
        AccountSubcommands::Show => match cache.default_account()? {
            Some(account) => {
                println!("{:<12} {}", "Username:".dimmed(), account.preferred_username.bright_white().bold());
                println!("{:<12} {}", "Tenant:".dimmed(), account.tenant_id);
                println!("{:<12} {}", "Account id:".dimmed(), account.home_account_id);
            }
            None => println!("{}", "No default account".dimmed()),
        },
        AccountSubcommands::SetDefault { account } => {
            let account = match account {
                Some(account) => account,
                None => choose_account(&cache.accounts()?)?,
            };
            let identity = cache.set_default_account(&account)?;
            println!(
                "{} Default account is now {}",
                "✓".bright_green().bold(),
                identity.preferred_username.bright_white().bold()
            );
        }
    }
    Ok(())
}

fn choose_account(accounts: &[AccountIdentity]) -> Result<String> {
    if accounts.is_empty() {
        anyhow::bail!("No cached accounts to choose from");
    }
    if !std::io::stdin().is_terminal() {
        anyhow::bail!("An account must be given when not running in a terminal");
    }

    let items: Vec<String> = accounts.iter().map(describe).collect();
    let selection = Select::new()
        .with_prompt("Select the default account")
        .items(&items)
        .default(0)
        .interact()?;
    Ok(accounts[selection].home_account_id.clone())
}

fn describe(account: &AccountIdentity) -> String {
    format!("{} ({})", account.preferred_username, account.tenant_id.dimmed())
}
