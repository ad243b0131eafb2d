use auction_server::args::{Args, Command};
use auction_server::configs::config_provider;
use auction_server::configs::server::ServerConfig;
use auction_server::log::logger::Logging;
use auction_server::pipeline::{self, Pipeline};
use auction_server::server_error::ServerError;
use clap::Parser;
use tokio::io::BufReader;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<(), ServerError> {
    let args = Args::parse();
    let mut logging = Logging::new();
    logging.early_init()?;

    let config_provider = config_provider::resolve(&args.config_provider, args.config.clone())?;
    let config = ServerConfig::load(config_provider.as_ref()).await?;
    logging.late_init(&config.logging)?;

    if args.command() == Command::Leaderboard {
        match pipeline::highest_bid(&config).await? {
            Some(row) => println!("{row}"),
            None => println!("No bid has been recorded yet."),
        }
        return Ok(());
    }

    let pipeline = Pipeline::assemble(&config).await?;
    let shutdown = CancellationToken::new();
    let signal_shutdown = shutdown.clone();
    tokio::spawn(async move {
        if let Err(error) = tokio::signal::ctrl_c().await {
            error!("Cannot listen for the shutdown signal: {error}");
            return;
        }
        info!("Received shutdown signal, stopping consumer runners...");
        signal_shutdown.cancel();
    });

    info!("Auction server is reading bids from stdin, one JSON object per line.");
    let reports = pipeline
        .run(BufReader::new(tokio::io::stdin()), shutdown)
        .await?;

    let halted = reports
        .iter()
        .map(|report| report.halted.len())
        .sum::<usize>();
    if halted > 0 {
        warn!("Auction server stopped with {halted} halted partition(s), operator action is required.");
    } else {
        info!("Auction server stopped.");
    }
    Ok(())
}
