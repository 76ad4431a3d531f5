use async_trait::async_trait;
use parking_lot::Mutex;
use serenity::model::id::{ChannelId, GuildId, UserId};
use std::{
    future::Future,
    pin::Pin,
    task::{Context, Poll},
};
use tokio::sync::oneshot;

use super::queue::AudioClip;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("no se pudo conectar al canal {channel_id}: {reason}")]
    Connect { channel_id: ChannelId, reason: String },
    #[error("no se pudo desconectar: {0}")]
    Disconnect(String),
    #[error("no hay conexión de voz activa")]
    NotConnected,
    #[error("no se pudo reproducir el audio: {0}")]
    Play(String),
}

/// Resultado final de una reproducción reportado por la sesión
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackOutcome {
    Finished,
    Failed(String),
}

/// Lado emisor del resultado de una reproducción. Solo el primer aviso cuenta.
#[derive(Debug)]
pub struct PlaybackNotifier {
    tx: Mutex<Option<oneshot::Sender<PlaybackOutcome>>>,
}

impl PlaybackNotifier {
    pub fn notify(&self, outcome: PlaybackOutcome) {
        if let Some(tx) = self.tx.lock().take() {
            let _ = tx.send(outcome);
        }
    }
}

/// Future que se resuelve cuando la sesión termina de reproducir un clip.
///
/// Se resuelve a `None` si el notificador se descarta sin avisar, lo que
/// normalmente significa que la sesión de voz desapareció.
#[derive(Debug)]
pub struct PlaybackCompletion {
    rx: oneshot::Receiver<PlaybackOutcome>,
}

impl PlaybackCompletion {
    pub fn channel() -> (PlaybackNotifier, Self) {
        let (tx, rx) = oneshot::channel();
        (
            PlaybackNotifier {
                tx: Mutex::new(Some(tx)),
            },
            Self { rx },
        )
    }
}

impl Future for PlaybackCompletion {
    type Output = Option<PlaybackOutcome>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx).poll(cx).map(Result::ok)
    }
}

/// Conexión de voz hacia un único destino.
///
/// Solo el scheduler de ese destino llama a estos métodos.
#[async_trait]
pub trait TransportSession: Send + Sync {
    async fn connect(&self, channel_id: ChannelId) -> Result<(), TransportError>;
    async fn disconnect(&self) -> Result<(), TransportError>;
    async fn is_connected(&self) -> bool;
    async fn is_playing(&self) -> bool;
    async fn play(&self, clip: &AudioClip) -> Result<PlaybackCompletion, TransportError>;
}

/// Resuelve en qué canal de voz está un usuario en el momento de reproducir
#[cfg_attr(test, mockall::automock)]
pub trait VoiceChannelLocator: Send + Sync {
    fn voice_channel(&self, guild_id: GuildId, user_id: UserId) -> Option<ChannelId>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_only_first_outcome_is_delivered() {
        let (notifier, completion) = PlaybackCompletion::channel();
        notifier.notify(PlaybackOutcome::Failed("decode".into()));
        notifier.notify(PlaybackOutcome::Finished);

        assert_eq!(completion.await, Some(PlaybackOutcome::Failed("decode".into())));
    }

    #[tokio::test]
    async fn test_dropped_notifier_resolves_to_none() {
        let (notifier, completion) = PlaybackCompletion::channel();
        drop(notifier);

        assert_eq!(completion.await, None);
    }
}
