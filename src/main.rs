use anyhow::Result;
use serenity::{
    model::{gateway::GatewayIntents, id::ApplicationId},
    Client,
};
use songbird::{SerenityInit, Songbird};
use std::sync::Arc;
use tracing::{error, info, warn};

mod audio;
mod bot;
mod config;
mod services;
mod storage;
mod ui;

use crate::audio::manager::{SchedulerRegistry, SessionFactory};
use crate::audio::metrics::MetricsManager;
use crate::audio::transport::TransportSession;
use crate::audio::voice::{CacheVoiceLocator, SongbirdSession};
use crate::bot::NarradorBot;
use crate::config::Config;
use crate::storage::JsonStorage;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let level = std::env::var("LOG_LEVEL")
        .unwrap_or_else(|_| "debug".to_string())
        .to_lowercase();

    // Inicializar logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(format!("narrador={}", level).parse()?)
                .add_directive("serenity=info".parse()?)
                .add_directive("songbird=info".parse()?),
        )
        .init();

    info!("🎙️ Iniciando Narrador v{}", env!("CARGO_PKG_VERSION"));

    // Cargar configuración
    let config = Config::load()?;
    info!("{}", config.summary());

    if std::env::args().any(|arg| arg == "--health-check") {
        println!("OK");
        return Ok(());
    }

    // Inicializar almacenamiento JSON
    let storage = JsonStorage::new(config.data_dir.clone()).await?;
    info!("{}", storage.get_storage_stats().await?);
    let storage = Arc::new(tokio::sync::Mutex::new(storage));

    let metrics = Arc::new(MetricsManager::new());
    let locator = Arc::new(CacheVoiceLocator::new());

    // Un scheduler por guild, todos sobre el mismo Songbird
    let songbird = Songbird::serenity();
    let sessions: SessionFactory = {
        let songbird = songbird.clone();
        Arc::new(move |guild_id| {
            Arc::new(SongbirdSession::new(songbird.clone(), guild_id)) as Arc<dyn TransportSession>
        })
    };
    let registry = Arc::new(SchedulerRegistry::new(
        config.scheduler(),
        sessions,
        locator.clone(),
        metrics.clone(),
    ));

    let intents = GatewayIntents::GUILDS
        | GatewayIntents::GUILD_VOICE_STATES
        | GatewayIntents::GUILD_MESSAGES
        | GatewayIntents::MESSAGE_CONTENT;

    let config = Arc::new(config);
    let handler = NarradorBot::new(config.clone(), storage, registry.clone(), metrics, locator)?;

    let mut client = Client::builder(&config.discord_token, intents)
        .application_id(ApplicationId::new(config.application_id))
        .event_handler(handler)
        .register_songbird_with(songbird)
        .await?;

    // Manejar shutdown graceful
    let shard_manager = client.shard_manager.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Error al registrar Ctrl+C: {:?}", e);
            return;
        }
        warn!("⚠️ Señal de shutdown recibida, cerrando...");
        registry.shutdown().await;
        shard_manager.shutdown_all().await;
    });

    info!("🚀 Bot iniciado exitosamente");
    if let Err(why) = client.start().await {
        error!("Error al ejecutar cliente: {:?}", why);
    }

    info!("👋 Narrador detenido");
    Ok(())
}
