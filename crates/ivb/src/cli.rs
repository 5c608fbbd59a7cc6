//! Console broadcast: sends the promo folder to every recipient, then archives
//! the folder under `sent/<date>/`.

use std::{
    path::Path,
    process::ExitCode,
    sync::Arc,
    time::Instant,
};

use clap::Args;
use tokio_util::sync::CancellationToken;

use ivb_core::{
    broadcast::{
        media::{self, PromoContent, CAPTION_FILE},
        BroadcastEvent, BroadcastPayload, BroadcastRun, BroadcastStats, Broadcaster,
        RecipientMode, RecipientResolver, RetryPolicy, TestConfig,
    },
    config::Config,
    domain::ChatId,
    utils::{archive_files, format_duration, iso_date_utc, truncate_text},
};
use ivb_store::InvoiceStore;
use ivb_telegram::TelegramMessenger;

const SEPARATOR: &str = "========================================";
const RULE: &str = "----------------------------------------";

#[derive(Args, Debug, Default)]
pub struct BroadcastArgs {
    /// Show recipients and content without sending or moving files.
    #[arg(long)]
    pub dry_run: bool,
    /// Force test mode (use testChatIds from the test config).
    #[arg(long, conflicts_with = "production")]
    pub test: bool,
    /// Force production mode regardless of the test config.
    #[arg(long)]
    pub production: bool,
}

impl BroadcastArgs {
    fn test_mode(&self, configured: bool) -> bool {
        if self.test {
            true
        } else if self.production {
            false
        } else {
            configured
        }
    }

    /// `--test` must never fall back to the full customer list.
    fn check_test_targets(&self, cfg: &TestConfig) -> ivb_core::Result<()> {
        if self.test {
            cfg.ensure_test_targets()?;
        }
        Ok(())
    }
}

/// How a broadcast run ended, for the process exit status.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunStatus {
    Completed,
    /// Messages went out but the promo files are still in place.
    ArchiveFailed,
}

impl RunStatus {
    pub fn exit_code(self) -> ExitCode {
        match self {
            RunStatus::Completed => ExitCode::SUCCESS,
            RunStatus::ArchiveFailed => ExitCode::from(2),
        }
    }
}

pub async fn run(args: BroadcastArgs) -> anyhow::Result<RunStatus> {
    ivb_core::logging::init("ivb")?;
    let started = Instant::now();
    let cfg = Config::load()?;

    let store = Arc::new(InvoiceStore::open(&cfg.invoice_db_path)?);
    let resolver = RecipientResolver::new(store, cfg.test_config_path.clone());
    let test_config = resolver.test_config().await?;
    args.check_test_targets(&test_config)?;
    let test_mode = args.test_mode(test_config.test_mode);

    println!("{SEPARATOR}");
    if test_mode && test_config.is_active() {
        println!("  BROADCAST SCRIPT - TEST MODE");
    } else {
        println!("  BROADCAST SCRIPT - PRODUCTION");
    }
    println!("{SEPARATOR}\n");

    let recipients = resolver.resolve_with(&test_config, test_mode).await?;
    match recipients.mode {
        RecipientMode::Test => {
            println!("TEST MODE: Using {} test chat IDs", recipients.chat_ids.len());
            println!("Chat IDs: {}\n", join_ids(&recipients.chat_ids));
        }
        RecipientMode::Production => {
            println!("Found {} unique chat IDs\n", recipients.chat_ids.len());
        }
    }

    if recipients.chat_ids.is_empty() {
        println!("No chat IDs found. Exiting.");
        return Ok(RunStatus::Completed);
    }

    let Some(promo) = load_promo(&cfg).await? else {
        return Ok(RunStatus::Completed);
    };

    let payload = BroadcastPayload::new(promo.media.clone(), promo.caption.clone());
    if payload.is_empty() {
        println!("Nothing to send: no photos/videos and no {CAPTION_FILE}.");
        return Ok(RunStatus::Completed);
    }
    payload.validate()?;

    if args.dry_run {
        println!("Dry run: nothing sent, no files moved.");
        return Ok(RunStatus::Completed);
    }

    let messenger = Arc::new(TelegramMessenger::from_config(&cfg)?);
    let broadcaster = Broadcaster::new(
        messenger,
        RetryPolicy::with_max_attempts(cfg.max_attempts),
        cfg.message_delay,
    );

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            println!("\nInterrupted: finishing current chat, skipping the rest...");
            ctrl_c.cancel();
        }
    });

    println!("\nStarting broadcast...\n");
    println!("{RULE}");

    let run = broadcaster.broadcast_to_all(recipients.chat_ids, payload, cancel);
    let outcome = report_progress(run).await?;

    println!("\n{RULE}");
    let status = if outcome.cancelled {
        println!("\nBroadcast cancelled; promo files left in place.");
        RunStatus::Completed
    } else {
        archive_promo(&cfg.promo_dir, &cfg.sent_dir, &promo).await
    };

    print_summary(&outcome, started);
    match status {
        RunStatus::Completed => println!("Done!"),
        RunStatus::ArchiveFailed => println!(
            "Done, but the promo files were NOT archived. Move them out of {} before the next run.",
            cfg.promo_dir.display()
        ),
    }
    Ok(status)
}

/// Move the sent promo files to `sent/<date>/`. A failure is reported but
/// does not hide the summary of a broadcast that already went out.
async fn archive_promo(promo_dir: &Path, sent_dir: &Path, promo: &PromoContent) -> RunStatus {
    println!("\nMoving files to sent directory...");
    let sources = media::promo_paths(promo_dir, promo);
    match archive_files(&sources, sent_dir, &iso_date_utc()).await {
        Ok(moved) => {
            for dest in moved {
                if let Some(name) = dest.file_name() {
                    println!("  Moved: {}", name.to_string_lossy());
                }
            }
            RunStatus::Completed
        }
        Err(e) => {
            tracing::error!(error = %e, sent_dir = %sent_dir.display(), "archiving promo files failed");
            eprintln!("Could not move files to {}: {e}", sent_dir.display());
            RunStatus::ArchiveFailed
        }
    }
}

/// Check the promo folder; `None` means there is nothing to do (already
/// reported to the operator).
async fn load_promo(cfg: &Config) -> anyhow::Result<Option<PromoContent>> {
    let dir = &cfg.promo_dir;
    if !tokio::fs::try_exists(dir).await? {
        println!("Promo directory not found: {}", dir.display());
        println!("Creating directory...");
        tokio::fs::create_dir_all(dir).await?;
        println!("Place your promo files in this directory and run again.");
        return Ok(None);
    }

    let promo = media::load_promo_dir(dir).await?;
    if promo.is_empty() {
        println!("No files found in {}", dir.display());
        println!("Add images, videos, or {CAPTION_FILE} and run again.");
        return Ok(None);
    }

    println!("Files to broadcast: {}\n", promo.files.join(", "));
    if let Some(caption) = &promo.caption {
        println!("Caption loaded: \"{}\"\n", truncate_text(caption, 50));
    }
    let kind = if promo.media.len() > 1 { "album" } else { "single" };
    println!("Media files: {} ({kind})", promo.media.len());

    Ok(Some(promo))
}

#[derive(Debug, Default)]
struct Outcome {
    stats: BroadcastStats,
    cancelled: bool,
    errors: Vec<(ChatId, String)>,
}

/// Print one line per recipient. Totals come only from the `Done` event.
async fn report_progress(run: BroadcastRun) -> anyhow::Result<Outcome> {
    let BroadcastRun { mut events, handle } = run;
    let mut outcome = Outcome::default();

    while let Some(event) = events.recv().await {
        match event {
            BroadcastEvent::Result {
                chat_id,
                index,
                total,
                success,
                error,
                ..
            } => {
                let progress = format!("[{index}/{total}]");
                if success {
                    println!("{progress} Chat {chat_id}... OK");
                } else {
                    println!("{progress} Chat {chat_id}... FAILED");
                    outcome
                        .errors
                        .push((chat_id, error.unwrap_or_else(|| "unknown error".to_string())));
                }
            }
            BroadcastEvent::Done { stats, cancelled } => {
                outcome.stats = stats;
                outcome.cancelled = cancelled;
            }
            BroadcastEvent::Start { .. } | BroadcastEvent::Error { .. } => {}
        }
    }

    handle.await?;
    Ok(outcome)
}

fn print_summary(outcome: &Outcome, started: Instant) {
    let stats = &outcome.stats;
    println!("\n{SEPARATOR}");
    println!("  BROADCAST SUMMARY");
    println!("{SEPARATOR}");
    println!("  Total chats:    {}", stats.total);
    println!("  Successful:     {}", stats.successful);
    println!("  Failed:         {}", stats.failed);
    println!("  Blocked/Gone:   {}", stats.blocked);
    println!("  Duration:       {}", format_duration(started.elapsed()));
    println!("{SEPARATOR}\n");

    for line in failure_lines(&outcome.errors) {
        println!("{line}");
    }
}

/// Failed chats: all of them up to 20, otherwise a count and the first 10.
fn failure_lines(errors: &[(ChatId, String)]) -> Vec<String> {
    if errors.is_empty() {
        return Vec::new();
    }

    let (header, shown) = if errors.len() <= 20 {
        ("Failed chats:".to_string(), errors)
    } else {
        (
            format!("{} errors occurred. First 10:", errors.len()),
            &errors[..10],
        )
    };

    let mut lines = vec![header];
    lines.extend(shown.iter().map(|(id, e)| format!("  - {id}: {e}")));
    lines.push(String::new());
    lines
}

fn join_ids(ids: &[ChatId]) -> String {
    ids.iter()
        .map(ChatId::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}
