//! Structured logging setup for the Chiral core, via `tracing`.

use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Initialize the global tracing subscriber.
pub fn init_logging() -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cfg!(debug_assertions) {
            EnvFilter::new("chiral=debug,libp2p=info")
        } else {
            EnvFilter::new("chiral=info,libp2p=warn")
        }
    });

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| Box::new(e) as Box<dyn std::error::Error>)?;

    info!("chiral logging initialized");
    Ok(())
}

/// Initialize logging, falling back to plain stderr if a subscriber is
/// already installed (e.g. when embedded as a library in a host process).
pub fn init_logging_safe() {
    if let Err(e) = init_logging() {
        eprintln!(
            "warning: failed to set up structured logging: {e}. continuing with default output."
        );
    }
}

pub fn log_network_event(event: &str, details: &str) {
    info!(target: "chiral::network", "{}: {}", event, details);
}

pub fn log_transfer_event(transfer_id: &str, event: &str, details: &str) {
    info!(target: "chiral::transfer", "{} {}: {}", transfer_id, event, details);
}

pub fn log_error_with_context(context: &str, error: &dyn std::error::Error) {
    error!(target: "chiral::error", "{}: {}", context, error);
}
