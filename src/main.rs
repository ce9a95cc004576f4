use clap::Parser;
use tracing::error;

use persona::cli::{self, Cli, Command, ConfigCommand};
use persona::config;
use persona::logging;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!(error = %e, "Fatal error");
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Some(Command::Version) => {
            cli::handle_version();
            return Ok(());
        }
        Some(Command::Config(ConfigCommand::Path)) => {
            cli::handle_config_path();
            return Ok(());
        }
        _ => {}
    }

    let cfg = config::load_config()?;
    logging::init_logging(&cfg.logging)?;

    match cli.command {
        None => cli::handle_serve(cfg, None, None).await,
        Some(Command::Serve { host, port }) => cli::handle_serve(cfg, host, port).await,
        Some(Command::Chat(args)) => cli::handle_chat(cfg, args).await,
        Some(Command::Status { host, port }) => cli::handle_status(&cfg, host, port).await,
        Some(Command::Config(ConfigCommand::Show)) => cli::handle_config_show(&cfg),
        Some(Command::Config(ConfigCommand::Path)) | Some(Command::Version) => Ok(()),
    }
}
