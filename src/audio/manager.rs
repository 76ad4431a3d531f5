use dashmap::DashMap;
use serenity::model::id::{GuildId, UserId};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{
    metrics::MetricsSink,
    queue::{AudioClip, JobId, QueueError},
    scheduler::{PlaybackScheduler, SchedulerConfig, SchedulerStatus},
    transport::{TransportSession, VoiceChannelLocator},
};

/// Crea la sesión de voz de un guild la primera vez que se necesita
pub type SessionFactory = Arc<dyn Fn(GuildId) -> Arc<dyn TransportSession> + Send + Sync>;

/// Un scheduler por guild. Ningún lock se comparte entre guilds.
pub struct SchedulerRegistry {
    schedulers: DashMap<GuildId, PlaybackScheduler>,
    config: SchedulerConfig,
    sessions: SessionFactory,
    locator: Arc<dyn VoiceChannelLocator>,
    metrics: Arc<dyn MetricsSink>,
    shutdown: CancellationToken,
}

impl SchedulerRegistry {
    pub fn new(
        config: SchedulerConfig,
        sessions: SessionFactory,
        locator: Arc<dyn VoiceChannelLocator>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        Self {
            schedulers: DashMap::new(),
            config,
            sessions,
            locator,
            metrics,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn get_or_create(&self, guild_id: GuildId) -> PlaybackScheduler {
        self.schedulers
            .entry(guild_id)
            .or_insert_with(|| {
                info!("🆕 Scheduler de audio creado para guild {}", guild_id);
                PlaybackScheduler::spawn(
                    guild_id,
                    self.config.clone(),
                    (self.sessions)(guild_id),
                    self.locator.clone(),
                    self.metrics.clone(),
                    self.shutdown.child_token(),
                )
            })
            .clone()
    }

    pub fn get(&self, guild_id: GuildId) -> Option<PlaybackScheduler> {
        self.schedulers.get(&guild_id).map(|entry| entry.clone())
    }

    pub fn add_job(&self, guild_id: GuildId, clip: AudioClip, requester: UserId) -> Result<JobId, QueueError> {
        self.get_or_create(guild_id).add_job(clip, requester)
    }

    pub fn clear_queue(&self, guild_id: GuildId) -> usize {
        self.get(guild_id).map_or(0, |scheduler| scheduler.clear_queue())
    }

    pub fn leave(&self, guild_id: GuildId) -> usize {
        self.get(guild_id).map_or(0, |scheduler| scheduler.leave())
    }

    pub async fn status(&self, guild_id: GuildId) -> Option<SchedulerStatus> {
        let scheduler = self.get(guild_id)?;
        Some(scheduler.status().await)
    }

    /// Detiene todos los schedulers y cierra las conexiones de voz abiertas
    pub async fn shutdown(&self) {
        self.shutdown.cancel();

        let schedulers: Vec<PlaybackScheduler> =
            self.schedulers.iter().map(|entry| entry.value().clone()).collect();
        for scheduler in &schedulers {
            debug!("Cerrando sesión de voz de guild {}", scheduler.guild_id());
            scheduler.close().await;
        }
        info!("🛑 {} schedulers de audio detenidos", schedulers.len());
    }
}
