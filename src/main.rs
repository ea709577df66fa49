use chiral::cli::Cli;
use chiral::config::Config;
use chiral::{commands, logging};
use clap::Parser;

#[tokio::main]
async fn main() {
    logging::init_logging_safe();

    let cli = Cli::parse();
    let config = match Config::load_or_default(cli.config.clone()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("configuration error: {e}");
            std::process::exit(e.exit_code());
        }
    };

    if let Err(e) = commands::execute_command(cli, config).await {
        logging::log_error_with_context("command failed", &e);
        eprintln!("error: {e}");
        std::process::exit(e.exit_code());
    }
}
