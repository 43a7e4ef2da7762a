//! Command line arguments for `sqlcoach`.

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "sqlcoach", version, about = "SQLCoach command line client")]
pub struct Cli {
    /// Backend base URL (overrides the config file).
    #[arg(long, global = true, env = sqlcoach_core::config::API_URL_ENV)]
    pub api_url: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Log in and store the session.
    Login(LoginArgs),
    /// Create an account and log in.
    Register(RegisterArgs),
    /// End the session on the backend and locally.
    Logout(LogoutArgs),
    /// Show the logged-in user.
    Whoami,
    /// Show token expiry, activity and cache state.
    Status,
    /// Send an authenticated GET and print the `data` payload.
    Get(GetArgs),
    /// Fetch learning progress, falling back to the local cache when offline.
    Progress,
    /// Keep the session alive and print state changes until Ctrl-C.
    Watch,
}

#[derive(Debug, clap::Args)]
pub struct LoginArgs {
    /// Account email (defaults to the last one used).
    pub email: Option<String>,
    /// Save the password in the OS keychain.
    #[arg(long)]
    pub remember: bool,
}

#[derive(Debug, clap::Args)]
pub struct RegisterArgs {
    /// Display name.
    #[arg(long)]
    pub name: String,
    /// Account email.
    #[arg(long)]
    pub email: String,
}

#[derive(Debug, clap::Args)]
pub struct LogoutArgs {
    /// Also delete the saved keychain password.
    #[arg(long)]
    pub forget: bool,
}

#[derive(Debug, clap::Args)]
pub struct GetArgs {
    /// API path, e.g. `/lessons/3`.
    pub path: String,
}
