use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use tgm_core::{
    clock::{Clock, SystemClock},
    config::{Config, StateConfig},
    dedup::{self, DedupStore, JsonFileStorage},
    filter::FilterChain,
    lock::{InstanceLock, LockStatus, OsProcessProbe},
    messaging::throttled::{ThrottleConfig, ThrottledSender},
    monitor::Monitor,
    pipeline::{DeliveryPipeline, PipelineConfig},
};
use tgm_telegram::{build_bot, TelegramSender, TelegramSource};

#[derive(Parser)]
#[command(name = "tgm")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Forward keyword-matching Telegram messages to one channel, once", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Monitor and forward until interrupted (default)
    Run,

    /// Show the lock holder and the dedup store size
    Status,

    /// Remove a stale lock file left by a crashed instance
    Unlock,
}

pub async fn execute(cli: Cli) -> anyhow::Result<()> {
    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run(Config::load()?).await,
        Commands::Status => status(&StateConfig::load()?),
        Commands::Unlock => unlock(&StateConfig::load()?),
    }
}

fn instance_lock(cfg: &StateConfig, clock: Arc<dyn Clock>) -> InstanceLock {
    InstanceLock::new(
        &cfg.lock_file,
        Arc::new(OsProcessProbe),
        clock,
        cfg.lock_stale_after,
    )
}

async fn run(cfg: Config) -> anyhow::Result<()> {
    tgm_core::logging::init("tgm", &cfg.log_level, cfg.log_file.as_deref())?;
    tracing::info!(
        destination = %cfg.destination,
        pattern = %cfg.include_pattern,
        excludes = cfg.exclude_keywords.len(),
        store = %cfg.state.hash_db_file.display(),
        "starting keyword monitor"
    );

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let lock = instance_lock(&cfg.state, clock.clone());
    let store = DedupStore::new(
        cfg.state.dedup,
        Box::new(JsonFileStorage::new(&cfg.state.hash_db_file)),
        clock,
    );
    let filter = FilterChain::new(cfg.filter_config()?);

    let bot = build_bot(&cfg.telegram_bot_token, cfg.poll_timeout)?;
    let source = TelegramSource::new(bot.clone(), cfg.poll_timeout);
    let sender = ThrottledSender::new(TelegramSender::new(bot), ThrottleConfig::default());

    let pipeline = DeliveryPipeline::new(
        PipelineConfig {
            destination: cfg.destination.clone(),
            max_retries: cfg.max_retries,
            retry_base_delay: cfg.retry_delay,
        },
        filter,
        store,
        source,
        sender,
    );

    let cancel = CancellationToken::new();
    tokio::spawn(cancel_on_shutdown_signal(cancel.clone()));

    let stats = Monitor::new(lock, pipeline).run(&cancel).await?;
    tracing::info!(forwarded = stats.forwarded, "bye");
    Ok(())
}

async fn cancel_on_shutdown_signal(cancel: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "SIGTERM handler unavailable; only Ctrl-C will stop the monitor");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }

    tracing::info!("shutdown requested");
    cancel.cancel();
}

fn status(cfg: &StateConfig) -> anyhow::Result<()> {
    let clock = SystemClock;
    let lock = instance_lock(cfg, Arc::new(clock));

    match lock.inspect()? {
        LockStatus::Free => println!("lock:  free ({})", cfg.lock_file.display()),
        LockStatus::Held { marker, live } => println!(
            "lock:  held by pid {} since {} ({})",
            marker.pid,
            marker.created_at.to_rfc3339(),
            if live { "running" } else { "stale" }
        ),
        LockStatus::Unreadable { fresh } => println!(
            "lock:  unreadable ({}){}",
            cfg.lock_file.display(),
            if fresh { ", recently modified" } else { "" }
        ),
    }

    let storage = JsonFileStorage::new(&cfg.hash_db_file);
    let summary = dedup::summarize(&storage, cfg.dedup.retention, clock.now())
        .with_context(|| format!("reading {}", cfg.hash_db_file.display()))?;
    println!(
        "store: {} records within retention, {} on disk ({})",
        summary.live,
        summary.total,
        cfg.hash_db_file.display()
    );
    Ok(())
}

fn unlock(cfg: &StateConfig) -> anyhow::Result<()> {
    let lock = instance_lock(cfg, Arc::new(SystemClock));
    match lock.remove_if_stale()? {
        Some(pid) => println!("removed stale lock left by pid {pid}"),
        None if cfg.lock_file.exists() => println!("lock file still present: {}", cfg.lock_file.display()),
        None => println!("no stale lock at {}", cfg.lock_file.display()),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_is_the_default_command() {
        let cli = Cli::try_parse_from(["tgm"]).unwrap();
        assert!(cli.command.is_none());

        let cli = Cli::try_parse_from(["tgm", "unlock"]).unwrap();
        assert!(matches!(cli.command, Some(Commands::Unlock)));
    }

    #[test]
    fn unknown_commands_are_rejected() {
        assert!(Cli::try_parse_from(["tgm", "purge"]).is_err());
    }
}
