use std::{sync::Arc, time::Duration};

use actix_web::{middleware::Logger, web, App, HttpServer};
use keydrop_domain::config::{BotConfig, ConfigError};
use keydrop_domain::services::{
    init_telemetry, AdminConsole, AdminSessions, AllocationEngine, MembershipVerifier,
    TelemetryConfig, TelemetryError,
};
use keydrop_domain::storage::StorageError;
use keydrop_storage::SeaOrmStorage;
use keydrop_telegram::{run_poller, run_sweeper, Dispatcher, TelegramApi, TelegramError};
use thiserror::Error;
use tracing::info;

use crate::{
    handlers::{health_handler, index_handler, metrics_handler},
    state::AppState,
};

const DATABASE_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

pub async fn run() -> Result<(), BootstrapError> {
    let config = BotConfig::load_from_env()?;

    let telemetry_config = TelemetryConfig::from_env("BOT");
    let telemetry = init_telemetry(&telemetry_config)?;

    let storage = SeaOrmStorage::builder()
        .database_url(config.database_url())
        .connect_timeout(DATABASE_CONNECT_TIMEOUT)
        .build()
        .await?;

    let api = Arc::new(TelegramApi::new(
        config.telegram_api_url(),
        config.bot_token(),
        config.poll_timeout(),
    )?);
    let engine = AllocationEngine::new(
        storage.clone(),
        MembershipVerifier::new(api.clone()),
        api.clone(),
        config.admin_id(),
    );
    let console = AdminConsole::new(
        engine.clone(),
        AdminSessions::new(config.admin_session_ttl()),
    );
    let dispatcher = Dispatcher::new(console);

    let state = AppState::new(storage, telemetry);
    let server = HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(state.clone()))
            .wrap(Logger::default())
            .route("/", web::get().to(index_handler))
            .route("/health", web::get().to(health_handler))
            .route("/metrics", web::get().to(metrics_handler))
    })
    .bind(config.health_bind_address())?
    .run();
    info!(
        address = config.health_bind_address(),
        admin = %config.admin_id(),
        "bot started"
    );

    let server = async { server.await.map_err(BootstrapError::from) };
    let poller = async {
        run_poller(api, dispatcher)
            .await
            .map_err(BootstrapError::from)
    };
    let sweeper = async {
        match config.sweep_interval() {
            Some(period) => run_sweeper(engine, period)
                .await
                .map_err(BootstrapError::from),
            None => Ok(()),
        }
    };
    tokio::try_join!(server, poller, sweeper)?;

    Ok(())
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("telemetry error: {0}")]
    Telemetry(#[from] TelemetryError),
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("telegram error: {0}")]
    Telegram(#[from] TelegramError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
