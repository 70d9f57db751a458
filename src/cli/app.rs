use std::path::PathBuf;

use super::commands::account::AccountCommands;
use super::commands::login::{LoginArgs, LogoutArgs};
use super::commands::raw::RawArgs;
use super::commands::token::TokenArgs;
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "powerplatform-cli")]
#[command(version, about = "Authenticated access to the Microsoft Power Platform APIs")]
pub struct Cli {
    /// Config file to use instead of the default location
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Tenant to sign in to or acquire tokens for
    #[arg(long, global = true)]
    pub tenant: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Sign in and cache tokens for every Power Platform API scope
    Login(LoginArgs),
    /// Remove cached accounts
    Logout(LogoutArgs),
    /// Inspect and select cached accounts
    Account(AccountCommands),
    /// Print an access token acquired silently from the cache
    Token(TokenArgs),
    /// Send an authenticated request to any known Power Platform host
    Raw(RawArgs),
}
