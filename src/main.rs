//! Checkin engine entry point.
//!
//! Wires the configuration, state store, scheduler tasks, Telegram
//! poller, and orchestrator together and runs until Ctrl-C.

use anyhow::{Context, Result};
use checkin::bot::TelegramBot;
use checkin::cli::{Cli, Command};
use checkin::config::{Config, Secrets};
use checkin::docs::GoogleDocsClient;
use checkin::gateway::{Gateway, RetryPolicy};
use checkin::orchestrator::{Event, Orchestrator};
use checkin::schedule::Scheduler;
use checkin::store::StateStore;
use checkin::summarizer::AnthropicSummarizer;
use checkin::telemetry;
use chrono::Utc;
use clap::Parser;
use tokio::sync::{mpsc, watch};
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Bootstrap logging before config so config errors are visible.
    telemetry::init_telemetry();

    let config = match &cli.config {
        Some(path) => Config::load_from_path(path)
            .with_context(|| format!("failed to load config from {:?}", path))?,
        None => Config::load_or_create().context("failed to load configuration")?,
    };

    // Re-init with the configured (or overridden) level.
    let level = cli.log.as_deref().unwrap_or(&config.core.log_level);
    telemetry::init_telemetry_with_level(level);

    match cli.command {
        Command::Start => run(config).await,
        Command::Status => status(config),
    }
}

fn status(config: Config) -> Result<()> {
    let (daily, weekly) = config.job_specs()?;
    let now = Utc::now();
    let tz = daily.tz;

    println!("Timezone: {}", tz);
    println!(
        "Next daily check-in:  {}",
        daily.next_fire(now).with_timezone(&tz).format("%Y-%m-%d %H:%M %Z")
    );
    println!(
        "Next weekly recap:    {}",
        weekly.next_fire(now).with_timezone(&tz).format("%Y-%m-%d %H:%M %Z")
    );
    Ok(())
}

async fn run(config: Config) -> Result<()> {
    let secrets = Secrets::from_env()?;
    let (daily, weekly) = config.job_specs()?;

    // A corrupt state file aborts here, before anything is scheduled.
    let store = StateStore::open(config.state_path())?;

    let now = Utc::now();
    let daily_catch_up = daily.needs_catch_up(now, store.last_completed(daily.kind));
    let weekly_catch_up = weekly.needs_catch_up(now, store.last_completed(weekly.kind));

    let (events_tx, events_rx) = mpsc::channel::<Event>(100);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let bot = TelegramBot::new(secrets.telegram_token.clone(), config.telegram.chat_id);
    let summarizer =
        AnthropicSummarizer::new(config.anthropic.clone(), secrets.anthropic_api_key.clone());
    let docs = GoogleDocsClient::new(config.docs.clone(), secrets.docs_token.clone());
    let gateway = Gateway::new(RetryPolicy::from_config(&config.retry));

    let orchestrator = Orchestrator::new(
        bot.clone(),
        summarizer,
        docs,
        store,
        gateway,
        daily,
        weekly,
        config.reply_timeout(),
        events_tx.clone(),
    );

    info!(
        timezone = %daily.tz,
        daily_catch_up,
        weekly_catch_up,
        "starting checkin engine"
    );

    let daily_scheduler = Scheduler::new(daily, events_tx.clone(), shutdown_rx.clone());
    let weekly_scheduler = Scheduler::new(weekly, events_tx.clone(), shutdown_rx.clone());

    tokio::spawn(daily_scheduler.run(daily_catch_up));
    tokio::spawn(weekly_scheduler.run(weekly_catch_up));
    tokio::spawn(bot.run_polling(events_tx.clone(), shutdown_rx));

    let orchestrator_handle = tokio::spawn(orchestrator.run(events_rx));

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("shutdown signal received");

    if shutdown_tx.send(true).is_err() {
        error!("shutdown receivers already gone");
    }
    let _ = events_tx.send(Event::Shutdown).await;
    let _ = orchestrator_handle.await;

    info!("checkin engine stopped");
    Ok(())
}
