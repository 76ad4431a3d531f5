//! Playback and voice-connection metrics.
//!
//! The scheduler reports through [`MetricsSink`] and never reads anything
//! back. [`MetricsManager`] is the in-memory implementation used by the bot;
//! its [`GuildStats`] snapshots feed the `/metrics` command and the periodic
//! JSON flush.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serenity::model::id::GuildId;
use std::{
    panic::{self, AssertUnwindSafe},
    time::{Duration, Instant},
};
use tracing::error;

/// Why a job left the queue without being played
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DropReason {
    /// Waited longer than the queue TTL
    Expired,
    /// The requester was not in a voice channel when the job reached the head
    NoVoiceChannel,
    /// The connect ceiling was reached for this job
    ConnectFailed,
    /// The session dropped mid-playback too many times for this job
    Disconnected,
}

/// Receiver of scheduler events. Calls are fire-and-forget.
pub trait MetricsSink: Send + Sync {
    fn record_connection_attempt(&self, guild_id: GuildId, success: bool);
    fn record_disconnection(&self, guild_id: GuildId, expected: bool);
    fn record_queued(&self, guild_id: GuildId);
    fn record_playback(&self, guild_id: GuildId, success: bool, duration: Duration);
    fn record_dropped(&self, guild_id: GuildId, reason: DropReason);

    /// Time a job spent queued before the playback that completed it
    fn record_queue_wait(&self, _guild_id: GuildId, _wait: Duration) {}
}

/// Runs a sink call, swallowing any panic coming out of the sink.
pub(crate) fn emit(sink: &dyn MetricsSink, event: &str, call: impl FnOnce(&dyn MetricsSink)) {
    if panic::catch_unwind(AssertUnwindSafe(|| call(sink))).is_err() {
        error!("📉 El registro de métricas '{}' falló; se ignora", event);
    }
}

#[derive(Debug, Default)]
struct VoiceMetrics {
    total_connections: u64,
    failed_connections: u64,
    total_disconnections: u64,
    unexpected_disconnections: u64,
    connected_time: Duration,
    connected_since: Option<Instant>,
}

#[derive(Debug, Default)]
struct AudioMetrics {
    total_queued: u64,
    total_played: u64,
    failed_playbacks: u64,
    total_duration: Duration,
    total_queue_wait: Duration,
    queue_waits: u64,
    expired: u64,
    dropped: u64,
}

#[derive(Debug, Default)]
struct GuildMetrics {
    voice: VoiceMetrics,
    audio: AudioMetrics,
}

/// In-memory per-guild counters
#[derive(Debug, Default)]
pub struct MetricsManager {
    guilds: DashMap<GuildId, GuildMetrics>,
}

impl MetricsManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Guilds with at least one recorded event
    pub fn guilds(&self) -> Vec<GuildId> {
        self.guilds.iter().map(|entry| *entry.key()).collect()
    }

    pub fn guild_stats(&self, guild_id: GuildId) -> GuildStats {
        let Some(metrics) = self.guilds.get(&guild_id) else {
            return GuildStats::default();
        };
        let voice = &metrics.voice;
        let audio = &metrics.audio;

        let mut connected_time = voice.connected_time;
        if let Some(since) = voice.connected_since {
            connected_time += since.elapsed();
        }

        GuildStats {
            voice: VoiceStats {
                total_connections: voice.total_connections,
                failed_connections: voice.failed_connections,
                connection_success_rate: percent(
                    voice.total_connections - voice.failed_connections,
                    voice.total_connections,
                ),
                total_disconnections: voice.total_disconnections,
                unexpected_disconnections: voice.unexpected_disconnections,
                unexpected_disconnection_rate: percent(
                    voice.unexpected_disconnections,
                    voice.total_disconnections,
                ),
                connected_time,
            },
            audio: AudioStats {
                total_queued: audio.total_queued,
                total_played: audio.total_played,
                failed_playbacks: audio.failed_playbacks,
                success_rate: percent(audio.total_played, audio.total_queued),
                total_duration: audio.total_duration,
                average_queue_time: average(audio.total_queue_wait, audio.queue_waits),
                expired: audio.expired,
                dropped: audio.dropped,
            },
        }
    }
}

fn average(total: Duration, count: u64) -> Duration {
    match u32::try_from(count) {
        Ok(0) => Duration::ZERO,
        Ok(count) => total / count,
        Err(_) => total.div_f64(count as f64),
    }
}

fn percent(part: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 / total as f64 * 100.0
    }
}

impl MetricsSink for MetricsManager {
    fn record_connection_attempt(&self, guild_id: GuildId, success: bool) {
        let mut metrics = self.guilds.entry(guild_id).or_default();
        let voice = &mut metrics.voice;
        voice.total_connections += 1;
        if success {
            voice.connected_since = Some(Instant::now());
        } else {
            voice.failed_connections += 1;
        }
    }

    fn record_disconnection(&self, guild_id: GuildId, expected: bool) {
        let mut metrics = self.guilds.entry(guild_id).or_default();
        let voice = &mut metrics.voice;
        voice.total_disconnections += 1;
        if !expected {
            voice.unexpected_disconnections += 1;
        }
        if let Some(since) = voice.connected_since.take() {
            voice.connected_time += since.elapsed();
        }
    }

    fn record_queued(&self, guild_id: GuildId) {
        let mut metrics = self.guilds.entry(guild_id).or_default();
        let audio = &mut metrics.audio;
        audio.total_queued += 1;
    }

    fn record_playback(&self, guild_id: GuildId, success: bool, duration: Duration) {
        let mut metrics = self.guilds.entry(guild_id).or_default();
        let audio = &mut metrics.audio;
        if success {
            audio.total_played += 1;
            audio.total_duration += duration;
        } else {
            audio.failed_playbacks += 1;
        }
    }

    fn record_dropped(&self, guild_id: GuildId, reason: DropReason) {
        let mut metrics = self.guilds.entry(guild_id).or_default();
        let audio = &mut metrics.audio;
        match reason {
            DropReason::Expired => audio.expired += 1,
            _ => audio.dropped += 1,
        }
    }

    fn record_queue_wait(&self, guild_id: GuildId, wait: Duration) {
        let mut metrics = self.guilds.entry(guild_id).or_default();
        let audio = &mut metrics.audio;
        audio.total_queue_wait += wait;
        audio.queue_waits += 1;
    }
}

/// Snapshot of one guild's metrics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GuildStats {
    pub voice: VoiceStats,
    pub audio: AudioStats,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VoiceStats {
    pub total_connections: u64,
    pub failed_connections: u64,
    pub connection_success_rate: f64,
    pub total_disconnections: u64,
    pub unexpected_disconnections: u64,
    pub unexpected_disconnection_rate: f64,
    pub connected_time: Duration,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AudioStats {
    pub total_queued: u64,
    pub total_played: u64,
    pub failed_playbacks: u64,
    pub success_rate: f64,
    pub total_duration: Duration,
    pub average_queue_time: Duration,
    pub expired: u64,
    pub dropped: u64,
}
