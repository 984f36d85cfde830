//! Plume command-line host.

use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("PLUME_LOG").unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = plume::cli::run() {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}
