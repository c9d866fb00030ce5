use clap::{Parser, Subcommand};

/// Auth Engine: workspace-scoped API tokens with time-window validity policies
#[derive(Parser)]
#[command(name = "auth-engine", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the HTTP server
    Serve {
        /// Port to bind (defaults to AUTH_ENGINE_PORT)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Apply pending database migrations and exit
    Migrate,

    /// Inspect and manage tokens directly against the store
    Token {
        #[command(subcommand)]
        command: TokenCommands,
    },
}

#[derive(Subcommand)]
pub enum TokenCommands {
    /// Print a freshly generated token secret
    Generate,
    /// List a workspace's tokens
    List {
        #[arg(long)]
        workspace: String,
        /// Include tokens of every environment, not only the current one
        #[arg(long)]
        all_envs: bool,
    },
    /// Check whether a token secret is usable right now
    Check {
        #[arg(long)]
        token: String,
    },
    /// Delete a token and its validity policies
    Delete {
        #[arg(long)]
        workspace: String,
        #[arg(long)]
        token_id: String,
    },
}
