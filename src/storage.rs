use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tracing::{debug, info, warn};

use crate::audio::metrics::GuildStats;

/// Estadísticas de uso de un canal de texto
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChannelStats {
    pub channel_id: u64,
    pub translation_count: u64,
    pub tts_count: u64,
    pub translation_time: Duration,
    pub tts_time: Duration,
    pub last_activity: Option<DateTime<Utc>>,
}

impl ChannelStats {
    fn new(channel_id: u64) -> Self {
        Self {
            channel_id,
            ..Self::default()
        }
    }

    pub fn average_tts_time(&self) -> Duration {
        if self.tts_count == 0 {
            Duration::ZERO
        } else {
            self.tts_time / self.tts_count as u32
        }
    }
}

/// Foto de las métricas de un guild guardada periódicamente
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub guild_id: u64,
    pub taken_at: DateTime<Utc>,
    pub stats: GuildStats,
}

/// Manager de almacenamiento basado en archivos JSON
pub struct JsonStorage {
    data_dir: PathBuf,
    channels_cache: HashMap<u64, ChannelStats>,
}

impl JsonStorage {
    pub async fn new(data_dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(data_dir.join("channels")).await?;
        fs::create_dir_all(data_dir.join("metrics")).await?;

        info!("📁 Storage inicializado en: {}", data_dir.display());

        let mut storage = Self {
            data_dir,
            channels_cache: HashMap::new(),
        };
        storage.load_all_channels().await?;

        Ok(storage)
    }

    pub fn channel_stats(&self, channel_id: u64) -> ChannelStats {
        self.channels_cache
            .get(&channel_id)
            .cloned()
            .unwrap_or_else(|| ChannelStats::new(channel_id))
    }

    /// Registra una traducción completada
    pub async fn record_translation(&mut self, channel_id: u64, processing: Duration) -> Result<()> {
        let stats = self
            .channels_cache
            .entry(channel_id)
            .or_insert_with(|| ChannelStats::new(channel_id));
        stats.translation_count += 1;
        stats.translation_time += processing;
        stats.last_activity = Some(Utc::now());

        let stats = stats.clone();
        self.save_channel_stats(&stats).await
    }

    /// Registra un audio generado
    pub async fn record_tts(&mut self, channel_id: u64, processing: Duration) -> Result<()> {
        let stats = self
            .channels_cache
            .entry(channel_id)
            .or_insert_with(|| ChannelStats::new(channel_id));
        stats.tts_count += 1;
        stats.tts_time += processing;
        stats.last_activity = Some(Utc::now());

        let stats = stats.clone();
        self.save_channel_stats(&stats).await
    }

    pub async fn save_guild_metrics(&self, guild_id: u64, stats: &GuildStats) -> Result<()> {
        let snapshot = MetricsSnapshot {
            guild_id,
            taken_at: Utc::now(),
            stats: stats.clone(),
        };
        let content = serde_json::to_string_pretty(&snapshot)?;
        fs::write(self.metrics_file_path(guild_id), content).await?;
        debug!("💾 Métricas guardadas para guild {}", guild_id);
        Ok(())
    }

    /// Obtiene estadísticas de almacenamiento
    pub async fn get_storage_stats(&self) -> Result<StorageStats> {
        let (channel_files, channel_bytes) = json_files_in(&self.data_dir.join("channels")).await?;
        let (metrics_files, metrics_bytes) = json_files_in(&self.data_dir.join("metrics")).await?;

        Ok(StorageStats {
            channel_files,
            metrics_files,
            cached_channels: self.channels_cache.len(),
            total_size_bytes: channel_bytes + metrics_bytes,
            data_dir: self.data_dir.clone(),
        })
    }

    // Métodos privados

    async fn load_channel_stats(&self, path: &Path) -> Result<ChannelStats> {
        let content = fs::read_to_string(path).await?;
        Ok(serde_json::from_str(&content)?)
    }

    async fn save_channel_stats(&self, stats: &ChannelStats) -> Result<()> {
        let content = serde_json::to_string_pretty(stats)?;
        fs::write(self.channel_file_path(stats.channel_id), content).await?;
        Ok(())
    }

    async fn load_all_channels(&mut self) -> Result<()> {
        let mut files = fs::read_dir(self.data_dir.join("channels")).await?;
        let mut loaded_count = 0;

        while let Some(entry) = files.next_entry().await? {
            let path = entry.path();
            let Some(channel_id) = path
                .file_stem()
                .and_then(|n| n.to_str())
                .and_then(|n| n.strip_prefix("channel_"))
                .and_then(|id| id.parse::<u64>().ok())
            else {
                continue;
            };

            match self.load_channel_stats(&path).await {
                Ok(stats) => {
                    self.channels_cache.insert(channel_id, stats);
                    loaded_count += 1;
                }
                Err(e) => {
                    warn!("Error cargando estadísticas del canal {}: {}", channel_id, e);
                }
            }
        }

        if loaded_count > 0 {
            info!("📂 Cargadas estadísticas de {} canales", loaded_count);
        }

        Ok(())
    }

    fn channel_file_path(&self, channel_id: u64) -> PathBuf {
        self.data_dir.join("channels").join(format!("channel_{}.json", channel_id))
    }

    fn metrics_file_path(&self, guild_id: u64) -> PathBuf {
        self.data_dir.join("metrics").join(format!("guild_{}.json", guild_id))
    }
}

async fn json_files_in(dir: &Path) -> Result<(usize, u64)> {
    let mut files = fs::read_dir(dir).await?;
    let mut count = 0;
    let mut size = 0;

    while let Some(entry) = files.next_entry().await? {
        if entry.path().extension().is_some_and(|ext| ext == "json") {
            count += 1;
            if let Ok(metadata) = entry.metadata().await {
                size += metadata.len();
            }
        }
    }
    Ok((count, size))
}

/// Estadísticas de almacenamiento
#[derive(Debug)]
pub struct StorageStats {
    pub channel_files: usize,
    pub metrics_files: usize,
    pub cached_channels: usize,
    pub total_size_bytes: u64,
    pub data_dir: PathBuf,
}

impl std::fmt::Display for StorageStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "📊 Storage Stats:\n\
             📁 Data Directory: {}\n\
             📝 Channel Stats: {} files ({} in memory)\n\
             📈 Metrics Snapshots: {} files\n\
             📦 Total Size: {} bytes ({:.2} KB)",
            self.data_dir.display(),
            self.channel_files,
            self.cached_channels,
            self.metrics_files,
            self.total_size_bytes,
            self.total_size_bytes as f64 / 1024.0
        )
    }
}
