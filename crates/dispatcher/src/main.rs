//! NewsWire alert dispatcher binary entrypoint.

use std::net::SocketAddr;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use uuid::Uuid;

use newswire_common::config::AppConfig;
use newswire_common::db;
use newswire_common::types::Priority;
use newswire_engine::preferences::{PreferenceResolver, PreferencesUpdate};
use newswire_notifier::cooldown::{CooldownStore, PgCooldownStore, RedisCooldownStore};
use newswire_notifier::escalation::{Escalator, GiveUp};
use newswire_notifier::sender::SenderRegistry;

use newswire_dispatcher::coordinator::{RunCoordinator, RunOutcome};
use newswire_dispatcher::health;

#[derive(Debug, Parser)]
#[command(name = "newswire-dispatcher", version, about = "Saved-search alert dispatcher")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Poll and dispatch until interrupted (default)
    Run,
    /// Run a single sweep and exit
    Once,
    /// Insert or update an owner's delivery preferences
    SetPrefs(SetPrefsArgs),
    /// Render and send a sample give-up escalation
    NotifyTest(NotifyTestArgs),
}

#[derive(Debug, Args)]
struct SetPrefsArgs {
    #[arg(long)]
    user_id: Uuid,

    #[arg(long)]
    dedupe_window_sec: Option<i32>,

    #[arg(long, value_delimiter = ',')]
    immediate_priorities: Option<Vec<Priority>>,

    #[arg(long, value_delimiter = ',')]
    digest_priorities: Option<Vec<Priority>>,

    #[arg(long, value_delimiter = ',', conflicts_with = "clear_priority_categories")]
    priority_categories: Option<Vec<String>>,

    #[arg(long)]
    clear_priority_categories: bool,

    #[arg(long, value_delimiter = ',')]
    channels_enabled: Option<Vec<String>>,

    /// Print the update without writing it
    #[arg(long)]
    dry_run: bool,
}

#[derive(Debug, Args)]
struct NotifyTestArgs {
    #[arg(long, default_value = "email")]
    channel: String,

    #[arg(long, default_value = "resend_status_500: test escalation")]
    error: String,

    #[arg(long, default_value_t = 5)]
    attempts: i32,

    /// Print the message without sending it
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "newswire_dispatcher=info,newswire_engine=info,newswire_notifier=info".into()
            }),
        )
        .json()
        .init();

    let cli = Cli::parse();

    // Load configuration
    let config = AppConfig::from_env()?;

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run(config).await,
        Command::Once => once(config).await,
        Command::SetPrefs(args) => set_prefs(config, args).await,
        Command::NotifyTest(args) => notify_test(config, args).await,
    }
}

async fn connect(config: &AppConfig) -> anyhow::Result<sqlx::PgPool> {
    let pool = db::create_pool(&config.database_url, config.db_max_connections).await?;
    db::migrate(&pool).await?;
    Ok(pool)
}

async fn build_escalator(config: &AppConfig, pool: &sqlx::PgPool) -> anyhow::Result<Arc<Escalator>> {
    let cooldowns: Arc<dyn CooldownStore> = match &config.redis_url {
        Some(url) => Arc::new(RedisCooldownStore::connect(url).await?),
        None => Arc::new(PgCooldownStore::new(pool.clone())),
    };
    let escalator = Escalator::from_config(&config.operator, &config.providers, cooldowns)?;
    Ok(Arc::new(escalator))
}

async fn build_coordinator(config: AppConfig) -> anyhow::Result<RunCoordinator> {
    let pool = connect(&config).await?;
    let senders = SenderRegistry::from_config(&config.providers)?;
    let escalator = build_escalator(&config, &pool).await?;
    Ok(RunCoordinator::new(pool, config, senders, escalator))
}

async fn run(config: AppConfig) -> anyhow::Result<()> {
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "NewsWire dispatcher starting...");

    let health_addr = config.health_addr.clone();
    let coordinator = build_coordinator(config).await?;

    if let Some(addr) = health_addr {
        let addr: SocketAddr = addr.parse()?;
        let last_run = coordinator.last_run();
        tokio::spawn(async move {
            if let Err(e) = health::serve(addr, last_run).await {
                tracing::error!(error = %e, "Health endpoint exited with error");
            }
        });
    }

    // Run with graceful shutdown on Ctrl+C
    tokio::select! {
        result = coordinator.run() => {
            if let Err(e) = result {
                tracing::error!(error = %e, "Dispatch loop exited with error");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received shutdown signal, stopping gracefully...");
        }
    }

    tracing::info!("NewsWire dispatcher stopped.");
    Ok(())
}

async fn once(config: AppConfig) -> anyhow::Result<()> {
    let coordinator = build_coordinator(config).await?;
    match coordinator.run_once().await? {
        RunOutcome::Completed(summary) => {
            tracing::info!(sent = summary.sent, failed = summary.failed, "Single run finished");
        }
        RunOutcome::Skipped => tracing::info!("Single run skipped, lock held elsewhere"),
    }
    Ok(())
}

async fn set_prefs(config: AppConfig, args: SetPrefsArgs) -> anyhow::Result<()> {
    let update = PreferencesUpdate {
        dedupe_window_sec: args.dedupe_window_sec,
        immediate_priorities: args.immediate_priorities,
        digest_priorities: args.digest_priorities,
        priority_categories: args.priority_categories,
        clear_priority_categories: args.clear_priority_categories,
        channels_enabled: args.channels_enabled,
    };

    if args.dry_run {
        println!("user_id={}\n{:#?}", args.user_id, update);
        return Ok(());
    }

    let pool = connect(&config).await?;
    let mut resolver = PreferenceResolver::new(
        config.dispatch.default_dedupe_window_sec,
        config.dispatch.default_priority_categories.clone(),
    );
    let prefs = resolver.upsert(&pool, args.user_id, &update).await?;
    println!("{}", serde_json::to_string_pretty(&prefs)?);
    Ok(())
}

async fn notify_test(config: AppConfig, args: NotifyTestArgs) -> anyhow::Result<()> {
    let giveup = GiveUp {
        alert_id: Uuid::nil(),
        user_id: Uuid::nil(),
        channel: args.channel,
        target: "operator-test".to_string(),
        attempts: args.attempts,
        error: args.error,
    };

    if args.dry_run {
        println!("key={}\n{}", giveup.cooldown_key(), giveup.message());
        return Ok(());
    }

    let pool = connect(&config).await?;
    let escalator = build_escalator(&config, &pool).await?;
    let outcome = escalator.notify_giveup(&giveup).await;
    println!("{:?}", outcome);
    Ok(())
}
