use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to the TOML or JSON configuration, takes precedence over AUCTION_CONFIG_PATH
    #[arg(short, long)]
    pub config: Option<String>,

    /// Configuration provider, only "file" is supported
    #[arg(long, default_value = "file")]
    pub config_provider: String,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Command {
    /// Publish bids read from stdin (one JSON object per line) and run every enabled sink
    #[default]
    Run,
    /// Print the current highest bid and exit
    Leaderboard,
}

impl Args {
    pub fn command(&self) -> Command {
        self.command.unwrap_or_default()
    }
}
