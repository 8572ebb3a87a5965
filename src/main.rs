use anyhow::Context;
use dotenvy::dotenv;
use glowws_server::bot::broadcast::Broadcaster;
use glowws_server::bot::listener::{self, Registrar, RestartPolicy};
use glowws_server::bot::sender::TelegramSender;
use glowws_server::config::Settings;
use glowws_server::http::{self, AppState};
use glowws_server::logging::{init_logging, RedactionPatterns};
use glowws_server::storage::{SqliteUserStore, UserStore};
use std::sync::Arc;
use teloxide::Bot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file
    dotenv().ok();

    // Initialize redaction patterns early (before logging)
    let patterns = Arc::new(
        RedactionPatterns::new().context("Failed to compile redaction patterns")?,
    );

    init_logging(patterns);

    info!("Starting Glowws server...");

    let settings = init_settings();
    let store = init_storage(&settings).await;
    let shutdown = CancellationToken::new();

    let bot = settings.bot_token().map(Bot::new);
    if bot.is_none() {
        warn!(r#"Environment variable "TG_BOT_API" not found, bot features are disabled"#);
    }

    let listener_task = bot
        .as_ref()
        .map(|bot| spawn_listener(bot.clone(), &store, &settings, shutdown.clone()));

    let broadcaster = bot.map(|bot| {
        Broadcaster::new(
            store.clone(),
            Arc::new(TelegramSender::new(bot)),
            settings.send_timeout(),
            settings.broadcast_concurrency(),
        )
    });

    let state = Arc::new(AppState {
        store: store.clone(),
        broadcaster,
        models_path: settings.models_path.clone(),
    });

    tokio::spawn(shutdown_signal(shutdown.clone()));

    if let Err(e) = http::serve(settings.listen_addr, state, shutdown.clone()).await {
        error!("HTTP server failed: {}", e);
        shutdown.cancel();
    }

    if let Some(task) = listener_task {
        if let Err(e) = task.await {
            error!("Listener task panicked: {}", e);
        }
    }

    store.close().await.context("Failed to close database")?;

    info!("Glowws server stopped");
    Ok(())
}

fn init_settings() -> Arc<Settings> {
    match Settings::new() {
        Ok(s) => {
            info!("Configuration loaded successfully.");
            Arc::new(s)
        }
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    }
}

async fn init_storage(settings: &Settings) -> Arc<dyn UserStore> {
    let store = match SqliteUserStore::open(&settings.database_path) {
        Ok(s) => s,
        Err(e) => {
            error!("Failed to initialize database: {}", e);
            std::process::exit(1);
        }
    };

    // Not fatal: the table may already exist in a shape SQLite rejects
    if let Err(e) = store.ensure_schema().await {
        error!("Error creating table users: {}", e);
    }

    Arc::new(store)
}

fn spawn_listener(
    bot: Bot,
    store: &Arc<dyn UserStore>,
    settings: &Settings,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    let registrar = Arc::new(Registrar::new(Arc::clone(store)));
    let policy = RestartPolicy {
        max_restarts: settings.listener_max_restarts,
        initial_backoff_ms: settings.listener_backoff_ms,
    };

    info!(
        "Starting update listener (max restarts: {}, initial backoff: {}ms)",
        policy.max_restarts, policy.initial_backoff_ms
    );

    tokio::spawn(async move {
        let exit = listener::supervise(bot, registrar, policy, shutdown).await;
        info!("Update listener supervisor exited: {:?}", exit);
    })
}

async fn shutdown_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
        info!("Received Ctrl+C, shutting down");
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
                info!("Received terminate signal, shutting down");
            }
            Err(e) => {
                error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    shutdown.cancel();
}
