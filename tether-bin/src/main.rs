use clap::Parser;
use tether_cli::Cli;
use tether_core::TetherError;

/// Exit status for a config that failed to load or validate.
const EXIT_CONFIG: i32 = 2;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = cli.run().await {
        eprintln!("❌ Error: {e}");
        let code = match e {
            TetherError::Config(_) | TetherError::ConfigValidation { .. } => EXIT_CONFIG,
            _ => 1,
        };
        std::process::exit(code);
    }
}
