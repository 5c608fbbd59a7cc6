use std::{process::ExitCode, sync::Arc};

use clap::{Parser, Subcommand};

use ivb_core::{
    broadcast::{Broadcaster, RecipientResolver, RetryPolicy},
    config::Config,
};
use ivb_http::AppState;
use ivb_store::InvoiceStore;
use ivb_telegram::TelegramMessenger;

mod cli;

#[derive(Parser)]
#[command(name = "ivb", about = "Invoice bot broadcast tools")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Send the promo folder to every invoice recipient.
    Broadcast(cli::BroadcastArgs),
    /// Run the HTTP upload + live progress server.
    Serve,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let result = match args.command {
        Command::Broadcast(opts) => cli::run(opts).await.map(cli::RunStatus::exit_code),
        Command::Serve => serve().await.map(|()| ExitCode::SUCCESS),
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn serve() -> anyhow::Result<()> {
    ivb_core::logging::init("ivb")?;
    let cfg = Arc::new(Config::load()?);

    let store = Arc::new(InvoiceStore::open(&cfg.invoice_db_path)?);
    let messenger = Arc::new(TelegramMessenger::from_config(&cfg)?);

    let resolver = RecipientResolver::new(store, cfg.test_config_path.clone());
    let broadcaster = Broadcaster::new(
        messenger,
        RetryPolicy::with_max_attempts(cfg.max_attempts),
        cfg.message_delay,
    );
    let state = AppState::new(cfg, resolver, broadcaster);

    // Stop accepting connections on Ctrl-C and cancel a running job so its
    // stream (and the graceful shutdown) can finish.
    let handle = state.clone();
    let shutdown = async move {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("shutdown requested");
        handle.cancel_current();
    };

    ivb_http::serve(state, shutdown).await
}
