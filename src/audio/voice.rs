use async_trait::async_trait;
use parking_lot::Mutex;
use serenity::{
    cache::Cache,
    model::id::{ChannelId, GuildId, UserId},
};
use songbird::{
    error::JoinError,
    input::{File, Input},
    tracks::{PlayMode, TrackHandle},
    CoreEvent, Event, EventContext, EventHandler as VoiceEventHandler, Songbird, TrackEvent,
};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, OnceLock,
};
use tracing::{debug, info, warn};

use super::{
    queue::AudioClip,
    transport::{
        PlaybackCompletion, PlaybackNotifier, PlaybackOutcome, TransportError, TransportSession,
        VoiceChannelLocator,
    },
};

/// Sesión de voz de un guild sobre Songbird
pub struct SongbirdSession {
    manager: Arc<Songbird>,
    guild_id: GuildId,
    link_alive: Arc<AtomicBool>,
    current_track: Mutex<Option<TrackHandle>>,
}

impl SongbirdSession {
    pub fn new(manager: Arc<Songbird>, guild_id: GuildId) -> Self {
        Self {
            manager,
            guild_id,
            link_alive: Arc::new(AtomicBool::new(false)),
            current_track: Mutex::new(None),
        }
    }
}

#[async_trait]
impl TransportSession for SongbirdSession {
    async fn connect(&self, channel_id: ChannelId) -> Result<(), TransportError> {
        match self.manager.join(self.guild_id, channel_id).await {
            Ok(call) => {
                let mut handler = call.lock().await;
                handler.remove_all_global_events();
                for event in [CoreEvent::DriverDisconnect, CoreEvent::DriverReconnect] {
                    handler.add_global_event(
                        Event::Core(event),
                        LinkWatcher {
                            guild_id: self.guild_id,
                            link_alive: self.link_alive.clone(),
                        },
                    );
                }
                self.link_alive.store(true, Ordering::SeqCst);
                Ok(())
            }
            Err(e) => {
                // Un join fallido puede dejar el Call a medias
                if let Err(cleanup) = self.manager.remove(self.guild_id).await {
                    debug!("Nada que limpiar tras join fallido: {:?}", cleanup);
                }
                Err(TransportError::Connect {
                    channel_id,
                    reason: e.to_string(),
                })
            }
        }
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.link_alive.store(false, Ordering::SeqCst);
        if let Some(track) = self.current_track.lock().take() {
            let _ = track.stop();
        }

        match self.manager.remove(self.guild_id).await {
            Ok(()) => Ok(()),
            Err(JoinError::NoCall) => Err(TransportError::NotConnected),
            Err(e) => Err(TransportError::Disconnect(e.to_string())),
        }
    }

    async fn is_connected(&self) -> bool {
        if !self.link_alive.load(Ordering::SeqCst) {
            return false;
        }
        match self.manager.get(self.guild_id) {
            Some(call) => call.lock().await.current_connection().is_some(),
            None => false,
        }
    }

    async fn is_playing(&self) -> bool {
        let track = self.current_track.lock().clone();
        match track {
            Some(track) => match track.get_info().await {
                Ok(state) => state.playing == PlayMode::Play,
                Err(_) => false,
            },
            None => false,
        }
    }

    async fn play(&self, clip: &AudioClip) -> Result<PlaybackCompletion, TransportError> {
        let call = self
            .manager
            .get(self.guild_id)
            .ok_or(TransportError::NotConnected)?;

        let input: Input = File::new(clip.path().to_path_buf()).into();
        let track = call.lock().await.play_input(input);

        let (notifier, completion) = PlaybackCompletion::channel();
        let notifier = Arc::new(notifier);
        for event in [TrackEvent::End, TrackEvent::Error] {
            track
                .add_event(
                    Event::Track(event),
                    TrackOutcomeHandler {
                        notifier: notifier.clone(),
                        link_alive: self.link_alive.clone(),
                    },
                )
                .map_err(|e| TransportError::Play(format!("Error al agregar event handler: {}", e)))?;
        }

        *self.current_track.lock() = Some(track);
        Ok(completion)
    }
}

/// Traduce el fin de un track en el resultado de la reproducción
struct TrackOutcomeHandler {
    notifier: Arc<PlaybackNotifier>,
    link_alive: Arc<AtomicBool>,
}

#[async_trait]
impl VoiceEventHandler for TrackOutcomeHandler {
    async fn act(&self, ctx: &EventContext<'_>) -> Option<Event> {
        // Si el enlace cayó, el scheduler lo detecta por su cuenta
        if !self.link_alive.load(Ordering::SeqCst) {
            return None;
        }

        if let EventContext::Track(tracks) = ctx {
            let outcome = match tracks.first().map(|(state, _)| &state.playing) {
                Some(PlayMode::Errored(err)) => PlaybackOutcome::Failed(format!("{:?}", err)),
                _ => PlaybackOutcome::Finished,
            };
            self.notifier.notify(outcome);
        }
        None
    }
}

struct LinkWatcher {
    guild_id: GuildId,
    link_alive: Arc<AtomicBool>,
}

#[async_trait]
impl VoiceEventHandler for LinkWatcher {
    async fn act(&self, ctx: &EventContext<'_>) -> Option<Event> {
        match ctx {
            EventContext::DriverDisconnect(data) => {
                self.link_alive.store(false, Ordering::SeqCst);
                warn!(
                    "🔌 Driver de voz desconectado en guild {}: {:?}",
                    self.guild_id, data.reason
                );
            }
            EventContext::DriverReconnect(_) => {
                self.link_alive.store(true, Ordering::SeqCst);
                info!("🔄 Driver de voz reconectado en guild {}", self.guild_id);
            }
            _ => {}
        }
        None
    }
}

/// Busca el canal de voz del usuario en la cache de Serenity.
///
/// La cache se adjunta en `ready`; antes de eso ningún usuario tiene canal.
#[derive(Default)]
pub struct CacheVoiceLocator {
    cache: OnceLock<Arc<Cache>>,
}

impl CacheVoiceLocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach(&self, cache: Arc<Cache>) {
        if self.cache.set(cache).is_err() {
            debug!("Cache de voz ya adjuntada");
        }
    }
}

impl VoiceChannelLocator for CacheVoiceLocator {
    fn voice_channel(&self, guild_id: GuildId, user_id: UserId) -> Option<ChannelId> {
        let cache = self.cache.get()?;
        let guild = cache.guild(guild_id)?;
        guild.voice_states.get(&user_id)?.channel_id
    }
}
