use clap::{CommandFactory, Parser};
use parking_reserver::cli::{Cli, Command};
use parking_reserver::{process_reservation, Outcome, Settings};
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    // A missing .env is fine
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let Some(Command::Run(args)) = cli.command else {
        let _ = Cli::command().print_help();
        return ExitCode::SUCCESS;
    };

    let mut settings = match Settings::from_env() {
        Ok(settings) => settings,
        Err(e) => {
            tracing::error!("{}", e);
            return ExitCode::FAILURE;
        }
    };
    args.apply(&mut settings);

    let request = match args.request(&settings) {
        Ok(Some(request)) => request,
        Ok(None) => {
            tracing::info!("No date provided. Usage: parking-reserver run YYYY-MM-DD [email] [password] [parking-code]");
            return ExitCode::SUCCESS;
        }
        Err(e) => {
            tracing::error!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupted, shutting down");
            on_interrupt.cancel();
        }
    });

    match process_reservation(&settings, &request, cancel.clone()).await {
        Ok(Outcome::Aborted) if cancel.is_cancelled() => ExitCode::from(130),
        Ok(outcome) => {
            tracing::info!(?outcome, "Processing complete!");
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!("Error processing reservation: {}", e);
            ExitCode::FAILURE
        }
    }
}
