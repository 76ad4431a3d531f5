use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};

use crate::audio::scheduler::SchedulerConfig;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    // Discord
    pub discord_token: String,
    pub application_id: u64,
    pub guild_id: Option<u64>, // Para comandos de desarrollo
    pub english_channel_id: u64,
    pub spanish_channel_id: u64,

    // Google Cloud
    pub google_api_key: String,

    // TTS
    pub tts_language_code: String,
    pub tts_voice_name: String,
    pub tts_speaking_rate: f32,
    pub tts_pitch: f32,

    // Cola de reproducción
    pub max_queue_size: usize,
    pub job_ttl: Duration,
    pub sweep_interval: Duration,
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub cooldown: Duration,
    pub completion_poll_interval: Duration,
    pub connect_cycle_limit: u32, // 0 = sin límite

    // Paths
    pub audio_temp_dir: PathBuf,
    pub data_dir: PathBuf,

    // Límites
    pub rate_limit_messages: u32,
    pub rate_limit_period: Duration,
    pub metrics_flush_interval: Duration,
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn secs(key: &str, default: &str) -> Result<Duration> {
    Ok(Duration::from_secs(env_or(key, default).parse()?))
}

fn millis(key: &str, default: &str) -> Result<Duration> {
    Ok(Duration::from_millis(env_or(key, default).parse()?))
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self {
            // Discord
            discord_token: std::env::var("DISCORD_TOKEN")?,
            application_id: std::env::var("APPLICATION_ID")?.parse()?,
            guild_id: std::env::var("GUILD_ID").ok().and_then(|s| s.parse::<u64>().ok()).filter(|id| *id != 0),
            english_channel_id: std::env::var("ENGLISH_CHANNEL_ID")?.parse()?,
            spanish_channel_id: std::env::var("SPANISH_CHANNEL_ID")?.parse()?,

            google_api_key: std::env::var("GOOGLE_API_KEY")?,

            tts_language_code: env_or("TTS_LANGUAGE_CODE", "en-US"),
            tts_voice_name: env_or("TTS_VOICE_NAME", "en-US-Neural2-D"),
            tts_speaking_rate: env_or("TTS_SPEAKING_RATE", "1.0").parse()?,
            tts_pitch: env_or("TTS_PITCH", "0.0").parse()?,

            max_queue_size: env_or("MAX_QUEUE_SIZE", "50").parse()?,
            job_ttl: secs("QUEUE_TTL_SECS", "300")?,
            sweep_interval: secs("QUEUE_SWEEP_SECS", "60")?,
            max_retries: env_or("VOICE_MAX_RETRIES", "3").parse()?,
            retry_delay: secs("VOICE_RETRY_DELAY_SECS", "1")?,
            cooldown: secs("VOICE_COOLDOWN_SECS", "5")?,
            completion_poll_interval: millis("PLAYBACK_POLL_MS", "250")?,
            connect_cycle_limit: env_or("VOICE_CONNECT_CYCLE_LIMIT", "0").parse()?,

            audio_temp_dir: env_or("AUDIO_TEMP_DIR", "temp_audio").into(),
            data_dir: env_or("DATA_DIR", "data").into(),

            rate_limit_messages: env_or("RATE_LIMIT_MESSAGES", "5").parse()?,
            rate_limit_period: secs("RATE_LIMIT_PERIOD", "60")?,
            metrics_flush_interval: secs("METRICS_FLUSH_SECS", "300")?,
        };

        // Create directories if they don't exist
        std::fs::create_dir_all(&config.audio_temp_dir)?;
        std::fs::create_dir_all(&config.data_dir)?;

        if config.application_id == 0 || config.english_channel_id == 0 || config.spanish_channel_id == 0 {
            anyhow::bail!("APPLICATION_ID, ENGLISH_CHANNEL_ID and SPANISH_CHANNEL_ID must be non-zero");
        }
        config.validate()?;

        Ok(config)
    }

    /// Validates configuration values for correctness.
    ///
    /// # Validation Rules
    ///
    /// - Queue size, TTL and every scheduler interval must be non-zero
    /// - The sweep interval must not exceed the TTL (expired jobs would linger)
    /// - TTS speaking rate must be within 0.25..=4.0 and pitch within -20..=20
    /// - The rate limit must allow at least one message per period
    pub fn validate(&self) -> Result<()> {
        if self.max_queue_size == 0 {
            anyhow::bail!("Max queue size must be greater than 0");
        }

        if self.job_ttl.is_zero() {
            anyhow::bail!("Queue TTL must be greater than 0");
        }

        if self.sweep_interval.is_zero() || self.sweep_interval > self.job_ttl {
            anyhow::bail!(
                "Sweep interval must be between 1s and the queue TTL ({}s), got: {}s",
                self.job_ttl.as_secs(),
                self.sweep_interval.as_secs()
            );
        }

        if self.max_retries == 0 {
            anyhow::bail!("Voice max retries must be greater than 0");
        }

        if self.completion_poll_interval.is_zero() {
            anyhow::bail!("Playback poll interval must be greater than 0");
        }

        if !(0.25..=4.0).contains(&self.tts_speaking_rate) {
            anyhow::bail!("TTS speaking rate must be between 0.25 and 4.0, got: {}", self.tts_speaking_rate);
        }

        if !(-20.0..=20.0).contains(&self.tts_pitch) {
            anyhow::bail!("TTS pitch must be between -20 and 20, got: {}", self.tts_pitch);
        }

        if self.metrics_flush_interval.is_zero() {
            anyhow::bail!("Metrics flush interval must be greater than 0");
        }

        if self.rate_limit_messages == 0 || self.rate_limit_period.is_zero() {
            anyhow::bail!("Rate limit must allow at least one message per period");
        }

        Ok(())
    }

    /// The slice of the configuration the playback scheduler cares about.
    pub fn scheduler(&self) -> SchedulerConfig {
        SchedulerConfig {
            max_queue_size: self.max_queue_size,
            job_ttl: self.job_ttl,
            sweep_interval: self.sweep_interval,
            max_retries: self.max_retries,
            retry_delay: self.retry_delay,
            cooldown: self.cooldown,
            completion_poll_interval: self.completion_poll_interval,
            connect_cycle_limit: self.connect_cycle_limit,
        }
    }

    /// Returns a summary of the current configuration for logging.
    ///
    /// Tokens and API keys are never included.
    pub fn summary(&self) -> String {
        format!(
            "Config Summary:\n  \
            Discord: App ID {} (Guild: {})\n  \
            Channels: EN={} ES={}\n  \
            TTS: {} / {} (rate {}, pitch {})\n  \
            Queue: {} max, {}s TTL, sweep every {}s\n  \
            Voice: {} retries, {}s delay, {}s cooldown, cycle limit {}\n  \
            Limits: {} msgs / {}s",
            self.application_id,
            self.guild_id.map_or("global".to_string(), |id| id.to_string()),
            self.english_channel_id,
            self.spanish_channel_id,
            self.tts_language_code,
            self.tts_voice_name,
            self.tts_speaking_rate,
            self.tts_pitch,
            self.max_queue_size,
            self.job_ttl.as_secs(),
            self.sweep_interval.as_secs(),
            self.max_retries,
            self.retry_delay.as_secs(),
            self.cooldown.as_secs(),
            if self.connect_cycle_limit == 0 {
                "off".to_string()
            } else {
                self.connect_cycle_limit.to_string()
            },
            self.rate_limit_messages,
            self.rate_limit_period.as_secs()
        )
    }
}

/// Default configuration values.
///
/// Used as fallbacks when environment variables are not provided.
impl Default for Config {
    fn default() -> Self {
        Self {
            // Discord (no defaults - must be provided)
            discord_token: String::new(),
            application_id: 0,
            guild_id: None,
            english_channel_id: 0,
            spanish_channel_id: 0,
            google_api_key: String::new(),

            tts_language_code: "en-US".to_string(),
            tts_voice_name: "en-US-Neural2-D".to_string(),
            tts_speaking_rate: 1.0,
            tts_pitch: 0.0,

            max_queue_size: 50,
            job_ttl: Duration::from_secs(300),
            sweep_interval: Duration::from_secs(60),
            max_retries: 3,
            retry_delay: Duration::from_secs(1),
            cooldown: Duration::from_secs(5),
            completion_poll_interval: Duration::from_millis(250),
            connect_cycle_limit: 0,

            audio_temp_dir: "temp_audio".into(),
            data_dir: "data".into(),

            rate_limit_messages: 5,
            rate_limit_period: Duration::from_secs(60),
            metrics_flush_interval: Duration::from_secs(300),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_sweep_longer_than_ttl_is_rejected() {
        let config = Config {
            sweep_interval: Duration::from_secs(600),
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_queue_is_rejected() {
        let config = Config {
            max_queue_size: 0,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_summary_hides_secrets() {
        let config = Config {
            discord_token: "super-secret-token".to_string(),
            google_api_key: "api-key-123".to_string(),
            ..Config::default()
        };
        let summary = config.summary();
        assert!(!summary.contains("super-secret-token"));
        assert!(!summary.contains("api-key-123"));
        assert!(summary.contains("50 max"));
    }
}
