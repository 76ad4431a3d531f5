use serenity::{
    all::Timestamp,
    builder::{CreateEmbed, CreateEmbedFooter},
};
use std::time::Duration;

use crate::{
    audio::{
        metrics::GuildStats,
        scheduler::{SchedulerStatus, SequencerPhase},
    },
    storage::ChannelStats,
};

/// Paleta de colores estandarizada para el bot
pub mod colors {
    use serenity::all::Colour;

    pub const SUCCESS_GREEN: Colour = Colour::from_rgb(67, 181, 129);
    pub const ERROR_RED: Colour = Colour::from_rgb(220, 53, 69);
    pub const INFO_BLUE: Colour = Colour::from_rgb(52, 144, 220);
}

/// Footer estandarizado para todos los embeds
const STANDARD_FOOTER: &str = "🎙️ Narrador";

/// Tipo de métricas pedidas en `/metrics`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricsKind {
    General,
    Voice,
    Audio,
}

impl MetricsKind {
    pub fn parse(value: &str) -> Self {
        match value {
            "voice" => Self::Voice,
            "audio" => Self::Audio,
            _ => Self::General,
        }
    }
}

fn base_embed(title: &str) -> CreateEmbed {
    CreateEmbed::default()
        .title(title)
        .color(colors::INFO_BLUE)
        .timestamp(Timestamp::now())
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
}

/// Duración legible, sin fracciones de segundo
fn human(duration: Duration) -> String {
    if duration < Duration::from_secs(1) {
        return "0s".to_string();
    }
    humantime::format_duration(Duration::from_secs(duration.as_secs())).to_string()
}

/// Crea el embed de `/status`
pub fn create_status_embed(status: Option<&SchedulerStatus>) -> CreateEmbed {
    let connected = status.is_some_and(|s| s.connected);
    let queue_len = status.map_or(0, |s| s.queue_len);
    let activity = match status {
        Some(s) if s.phase == SequencerPhase::Playing && s.playing => match (s.current, s.current_elapsed) {
            (Some(job), Some(elapsed)) => format!("🎙️ Narrando audio {} ({})", job, human(elapsed)),
            _ => "🎙️ Narrando".to_string(),
        },
        Some(s) if s.phase == SequencerPhase::Playing => "⏳ Preparando audio".to_string(),
        Some(s) if s.phase == SequencerPhase::Connecting => "🔄 Conectando".to_string(),
        Some(s) if s.phase == SequencerPhase::Draining => "⏳ Procesando cola".to_string(),
        _ => "💤 Inactivo".to_string(),
    };

    base_embed("Estado del Bot")
        .color(if connected {
            colors::SUCCESS_GREEN
        } else {
            colors::INFO_BLUE
        })
        .field(
            "Estado de Conexión",
            if connected { "🟢 Conectado" } else { "🔴 Desconectado" },
            false,
        )
        .field("Actividad", activity, false)
        .field("Cola de Audio", format!("📝 {} elementos en cola", queue_len), false)
}

/// Crea el embed de `/stats`
pub fn create_stats_embed(stats: &ChannelStats) -> CreateEmbed {
    base_embed("Estadísticas de Uso")
        .field(
            "Traducciones",
            format!("📊 {} traducciones realizadas", stats.translation_count),
            false,
        )
        .field(
            "Narraciones",
            format!(
                "🎙️ {} narraciones generadas (promedio {})",
                stats.tts_count,
                human(stats.average_tts_time())
            ),
            false,
        )
}

/// Crea el embed de `/metrics`
pub fn create_metrics_embed(stats: &GuildStats, kind: MetricsKind) -> CreateEmbed {
    let voice = &stats.voice;
    let audio = &stats.audio;
    let embed = base_embed("📊 Métricas del Bot");

    match kind {
        MetricsKind::General => embed
            .field(
                "🎙️ Conexiones de Voz",
                format!(
                    "Total: {}\nTasa de éxito: {:.1}%",
                    voice.total_connections, voice.connection_success_rate
                ),
                false,
            )
            .field(
                "🔊 Audio",
                format!(
                    "Total reproducidos: {}\nTasa de éxito: {:.1}%",
                    audio.total_played, audio.success_rate
                ),
                false,
            )
            .field(
                "⏱️ Tiempos",
                format!(
                    "Tiempo total de audio: {}\nTiempo promedio en cola: {}",
                    human(audio.total_duration),
                    human(audio.average_queue_time)
                ),
                false,
            ),
        MetricsKind::Voice => embed
            .field(
                "📊 Conexiones",
                format!(
                    "Total intentos: {}\nConexiones fallidas: {}\nTasa de éxito: {:.1}%",
                    voice.total_connections, voice.failed_connections, voice.connection_success_rate
                ),
                false,
            )
            .field(
                "🔌 Desconexiones",
                format!(
                    "Total: {}\nInesperadas: {}\nTasa de desconexiones inesperadas: {:.1}%",
                    voice.total_disconnections,
                    voice.unexpected_disconnections,
                    voice.unexpected_disconnection_rate
                ),
                false,
            )
            .field(
                "⏱️ Tiempo Total",
                format!("Tiempo en canales: {}", human(voice.connected_time)),
                false,
            ),
        MetricsKind::Audio => embed
            .field(
                "📊 Reproducciones",
                format!(
                    "Total en cola: {}\nReproducidos: {}\nFallidos: {}\nExpirados: {}\nDescartados: {}",
                    audio.total_queued,
                    audio.total_played,
                    audio.failed_playbacks,
                    audio.expired,
                    audio.dropped
                ),
                false,
            )
            .field(
                "⏱️ Tiempos",
                format!(
                    "Duración total: {}\nTiempo promedio en cola: {}",
                    human(audio.total_duration),
                    human(audio.average_queue_time)
                ),
                false,
            )
            .field(
                "📈 Rendimiento",
                format!("Tasa de éxito: {:.1}%", audio.success_rate),
                false,
            ),
    }
}

/// Crea un embed de error
pub fn create_error_embed(message: &str) -> CreateEmbed {
    base_embed("❌ Error")
        .description(message)
        .color(colors::ERROR_RED)
}
