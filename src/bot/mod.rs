//! # Bot Module
//!
//! Discord surface of Narrador.
//!
//! [`NarradorBot`] implements Serenity's [`EventHandler`]. Messages posted in
//! the English channel are narrated as-is; messages in the Spanish channel are
//! translated first. Either way the text becomes an MP3 clip that is queued on
//! the guild's playback scheduler, which joins the author's voice channel when
//! the clip reaches the head of the queue.
//!
//! Slash commands (`/narrar`, `/status`, `/stats`, `/limpiar`, `/salir`,
//! `/metrics`) live in [`commands`] and [`handlers`].

use anyhow::Result;
use serenity::{
    all::{ChannelId, Context, EventHandler, GuildId, Interaction, Message, Ready, UserId},
    async_trait,
};
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};
use tracing::{debug, error, info, warn};

pub mod commands;
pub mod handlers;
pub mod rate_limit;

use crate::{
    audio::{
        manager::SchedulerRegistry, metrics::MetricsManager, queue::JobId, voice::CacheVoiceLocator,
    },
    config::Config,
    services::{translator::Translator, tts, tts::TtsService},
    storage::JsonStorage,
};
use rate_limit::RateLimiter;

// Audios temporales más viejos que esto quedaron de una ejecución anterior
const STALE_AUDIO_AGE: Duration = Duration::from_secs(3600);

/// Idioma del canal de origen de un mensaje
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceLanguage {
    English,
    Spanish,
}

pub struct NarradorBot {
    config: Arc<Config>,
    pub storage: Arc<tokio::sync::Mutex<JsonStorage>>,
    pub registry: Arc<SchedulerRegistry>,
    pub metrics: Arc<MetricsManager>,
    locator: Arc<CacheVoiceLocator>,
    tts: TtsService,
    translator: Translator,
    rate_limiter: Arc<RateLimiter>,
    maintenance_started: AtomicBool,
}

impl NarradorBot {
    pub fn new(
        config: Arc<Config>,
        storage: Arc<tokio::sync::Mutex<JsonStorage>>,
        registry: Arc<SchedulerRegistry>,
        metrics: Arc<MetricsManager>,
        locator: Arc<CacheVoiceLocator>,
    ) -> Result<Self> {
        Ok(Self {
            tts: TtsService::new(&config)?,
            translator: Translator::new(config.google_api_key.clone())?,
            rate_limiter: Arc::new(RateLimiter::new(
                config.rate_limit_messages,
                config.rate_limit_period,
            )),
            config,
            storage,
            registry,
            metrics,
            locator,
            maintenance_started: AtomicBool::new(false),
        })
    }

    pub fn source_language(&self, channel_id: ChannelId) -> Option<SourceLanguage> {
        match channel_id.get() {
            id if id == self.config.english_channel_id => Some(SourceLanguage::English),
            id if id == self.config.spanish_channel_id => Some(SourceLanguage::Spanish),
            _ => None,
        }
    }

    /// Genera el audio de `text` y lo pone en la cola del guild
    pub async fn narrate(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
        user_id: UserId,
        text: &str,
    ) -> Result<JobId> {
        let started = Instant::now();
        let clip = self.tts.synthesize(text).await?;

        if let Err(e) = self
            .storage
            .lock()
            .await
            .record_tts(channel_id.get(), started.elapsed())
            .await
        {
            warn!("Error al guardar estadísticas de TTS: {:?}", e);
        }

        let job = self.registry.add_job(guild_id, clip, user_id)?;
        info!("🎙️ Audio {} en cola para guild {} (usuario {})", job, guild_id, user_id);
        Ok(job)
    }

    /// Traduce del español y narra el resultado
    pub async fn translate_and_narrate(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
        user_id: UserId,
        text: &str,
    ) -> Result<JobId> {
        let started = Instant::now();
        let translated = self.translator.translate(text).await?;

        if let Err(e) = self
            .storage
            .lock()
            .await
            .record_translation(channel_id.get(), started.elapsed())
            .await
        {
            warn!("Error al guardar estadísticas de traducción: {:?}", e);
        }

        debug!("🌐 Traducido: {}", translated);
        self.narrate(guild_id, channel_id, user_id, &translated).await
    }

    async fn process_channel_message(&self, msg: &Message, guild_id: GuildId, language: SourceLanguage) -> Result<JobId> {
        match language {
            SourceLanguage::English => {
                self.narrate(guild_id, msg.channel_id, msg.author.id, &msg.content)
                    .await
            }
            SourceLanguage::Spanish => {
                self.translate_and_narrate(guild_id, msg.channel_id, msg.author.id, &msg.content)
                    .await
            }
        }
    }

    async fn register_commands(&self, ctx: &Context) -> Result<()> {
        info!("📝 Registrando comandos slash...");

        match self.config.guild_id {
            Some(guild_id) => {
                let guild_id = GuildId::new(guild_id);
                commands::register_guild_commands(ctx, guild_id).await.map_err(|e| {
                    error!("❌ Error registrando comandos de guild: {:?}", e);
                    anyhow::anyhow!("No se pudieron registrar comandos de guild. Verifica que el bot tenga permisos de 'applications.commands' en la guild.")
                })?;
                info!("✅ Comandos de guild registrados para: {}", guild_id);
            }
            None => {
                commands::register_global_commands(ctx).await.map_err(|e| {
                    error!("❌ Error registrando comandos globales: {:?}", e);
                    anyhow::anyhow!("No se pudieron registrar comandos globales. Verifica que el bot tenga permisos de 'applications.commands'.")
                })?;
                info!("✅ Comandos globales registrados");
            }
        }

        Ok(())
    }
}

/// Texto que ve el usuario cuando falla una narración
pub fn user_facing_error(error: &anyhow::Error) -> String {
    use crate::{audio::queue::QueueError, services::ServiceError};

    if let Some(QueueError::Full { capacity }) = error.downcast_ref::<QueueError>() {
        return format!("📪 La cola está llena ({} audios). Intenta más tarde.", capacity);
    }
    match error.downcast_ref::<ServiceError>() {
        Some(ServiceError::EmptyText) => "❌ No hay texto para narrar".to_string(),
        Some(_) => "❌ Error al procesar el mensaje".to_string(),
        None => "❌ Error al procesar la narración".to_string(),
    }
}

#[async_trait]
impl EventHandler for NarradorBot {
    async fn ready(&self, ctx: Context, ready: Ready) {
        info!("🤖 {} está en línea!", ready.user.name);
        info!("📊 Conectado a {} servidores", ready.guilds.len());

        self.locator.attach(ctx.cache.clone());

        if let Err(e) = self.register_commands(&ctx).await {
            error!("Error al registrar comandos: {:?}", e);
        }

        // `ready` se repite tras cada reconexión del gateway
        if !self.maintenance_started.swap(true, Ordering::SeqCst) {
            let config = self.config.clone();
            let storage = self.storage.clone();
            let metrics = self.metrics.clone();
            let rate_limiter = self.rate_limiter.clone();
            tokio::spawn(async move {
                maintenance_tasks(config, storage, metrics, rate_limiter).await;
            });
        }
    }

    async fn message(&self, ctx: Context, msg: Message) {
        if msg.author.bot {
            return;
        }
        let Some(guild_id) = msg.guild_id else {
            return;
        };
        let Some(language) = self.source_language(msg.channel_id) else {
            return;
        };
        if msg.content.trim().is_empty() {
            return;
        }

        if !self.rate_limiter.check(msg.author.id) {
            warn!("⏳ Límite de mensajes alcanzado para {} en guild {}", msg.author.id, guild_id);
            if let Err(e) = msg
                .reply(&ctx.http, "⏳ Estás enviando mensajes demasiado rápido")
                .await
            {
                error!("Error al responder: {:?}", e);
            }
            return;
        }

        if let Err(e) = self.process_channel_message(&msg, guild_id, language).await {
            error!("Error procesando mensaje: {:?}", e);
            if let Err(e) = msg.channel_id.say(&ctx.http, user_facing_error(&e)).await {
                error!("Error al responder: {:?}", e);
            }
        }
    }

    async fn interaction_create(&self, ctx: Context, interaction: Interaction) {
        if let Interaction::Command(command_interaction) = interaction {
            if let Err(e) = handlers::handle_command(&ctx, command_interaction, self).await {
                error!("Error manejando comando: {:?}", e);
            }
        }
    }
}

/// Tareas periódicas: guarda métricas y limpia audios huérfanos
async fn maintenance_tasks(
    config: Arc<Config>,
    storage: Arc<tokio::sync::Mutex<JsonStorage>>,
    metrics: Arc<MetricsManager>,
    rate_limiter: Arc<RateLimiter>,
) {
    if let Err(e) = tts::cleanup_stale_files(&config.audio_temp_dir, STALE_AUDIO_AGE).await {
        warn!("Error limpiando audios temporales: {:?}", e);
    }

    let mut interval = tokio::time::interval(config.metrics_flush_interval);
    interval.tick().await;

    loop {
        interval.tick().await;

        let storage = storage.lock().await;
        for guild_id in metrics.guilds() {
            if let Err(e) = storage
                .save_guild_metrics(guild_id.get(), &metrics.guild_stats(guild_id))
                .await
            {
                warn!("Error guardando métricas de guild {}: {:?}", guild_id, e);
            }
        }
        drop(storage);

        rate_limiter.prune();

        if let Err(e) = tts::cleanup_stale_files(&config.audio_temp_dir, STALE_AUDIO_AGE).await {
            warn!("Error limpiando audios temporales: {:?}", e);
        }

        info!("🧹 Tareas de mantenimiento completadas");
    }
}
