use std::sync::Arc;

use anyhow::Context;

use ses_intake::bot::Bot;
use ses_intake::channels::{Channel, TelegramChannel};
use ses_intake::config::BotConfig;
use ses_intake::form::SessionManager;
use ses_intake::photos::PhotoStore;
use ses_intake::report::ReportAssembler;
use ses_intake::store::{LibSqlBackend, RecordStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = BotConfig::from_env().context("Failed to load configuration")?;

    // Initialize tracing
    let default_level = if config.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_target(false)
        .init();

    eprintln!("📋 SES Intake v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Database: {}", config.db_path.display());
    eprintln!("   Backups: {}", config.backup_dir.display());
    eprintln!(
        "   Photos: {}",
        if config.photos_enabled {
            config.photo_dir.display().to_string()
        } else {
            "disabled".to_string()
        }
    );
    eprintln!("   Cooldown: {}h", config.cooldown.as_secs() / 3600);
    eprintln!("   Operators: {}", config.access.len());

    // ── Database ─────────────────────────────────────────────────────────
    let store: Arc<dyn RecordStore> = Arc::new(
        LibSqlBackend::new_local(&config.db_path)
            .await
            .with_context(|| format!("Failed to open database at {}", config.db_path.display()))?
            .with_cooldown(config.cooldown)
            .with_backup_dir(config.backup_dir.clone()),
    );
    eprintln!("   Records: {}", store.count().await?);

    // ── Channel ──────────────────────────────────────────────────────────
    let telegram = Arc::new(TelegramChannel::new(config.bot_token.clone()));
    telegram
        .health_check()
        .await
        .context("Telegram Bot API is not reachable")?;

    let photos = config.photos_enabled.then(|| {
        Arc::new(PhotoStore::new(config.photo_dir.clone(), telegram.clone()))
    });

    // Exports resolve existing photo references even with the photo step off.
    let report_photos = photos.clone().unwrap_or_else(|| {
        Arc::new(PhotoStore::new(config.photo_dir.clone(), telegram.clone()))
    });

    let sessions = Arc::new(SessionManager::new(Arc::clone(&store), photos));
    let reports = Arc::new(ReportAssembler::new(Arc::clone(&store), Some(report_photos)));

    let bot = Arc::new(Bot::new(
        telegram.clone(),
        sessions,
        config.access.clone(),
        reports,
        config.session_idle_timeout,
    ));

    eprintln!("   Listening on Telegram. Ctrl+C to stop.\n");

    tokio::select! {
        result = bot.run() => result?,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown requested");
        }
    }

    telegram.shutdown().await?;
    Ok(())
}
