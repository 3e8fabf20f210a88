use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use gatebot::bot::Bot;
use gatebot::config::Config;
use gatebot::events::EventBus;
use gatebot::mqtt::MqttGateway;

/// Gatebot - chat gateway command bridge for host control
#[derive(Parser, Debug)]
#[command(name = "gatebot", version, about)]
struct Args {
    /// Configuration file (TOML)
    #[arg(short, long, default_value = "gatebot.toml")]
    config: PathBuf,

    /// Replace the remote command list after connecting
    #[arg(long)]
    sync_commands: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .init();

    let args = Args::parse();
    let config = Config::load_or_default(&args.config)?;

    info!(
        broker = %config.gateway.broker,
        channel = %config.bot.notification_channel,
        "gatebot starting"
    );

    let gateway = MqttGateway::new(config.gateway.clone());
    let bot = Arc::new(
        Bot::new(config.shared(), Box::new(gateway), EventBus::default())
            .with_config_path(args.config.clone()),
    );

    if bot.connect().await && args.sync_commands {
        println!("{}", bot.handle_mode_command("update", &[]).await);
    }

    // Console lines are mode commands: `update`, `token <value>`, `channel <name>`
    let console = bot.clone();
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    let mut words = line.split_whitespace();
                    let Some(command) = words.next() else {
                        continue;
                    };
                    let rest: Vec<&str> = words.collect();
                    println!("{}", console.handle_mode_command(command, &rest).await);
                }
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, "failed to read console input");
                    break;
                }
            }
        }
    });

    bot.run(async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "unable to listen for ctrl-c");
        }
    })
    .await;

    Ok(())
}
