//! # Audio Module
//!
//! Sequential narration playback for Narrador.
//!
//! Every guild gets its own [`scheduler::PlaybackScheduler`]: a bounded FIFO
//! of audio clips plus a single drain loop that connects to the requester's
//! voice channel, plays one clip at a time, and disconnects when the queue
//! runs dry. Guilds never share locks, so a guild stuck reconnecting does not
//! delay anyone else.
//!
//! ## Architecture
//!
//! ### [`queue`] - Job Queue
//! - Bounded FIFO of pending jobs (default 50)
//! - Head-aligned TTL expiry
//!
//! ### [`scheduler`] - Playback Scheduler
//! - Drain loop with connect retries, cooldown and mid-playback recovery
//! - Expiry sweeper running on its own interval
//!
//! ### [`transport`] - Voice Transport Seam
//! - [`transport::TransportSession`] abstracts the voice connection
//! - [`voice`] implements it on top of Songbird
//!
//! ### [`metrics`] - Metrics
//! - Fire-and-forget sink; a failing sink never stops playback
//!
//! ### [`manager`] - Registry
//! - Lazily creates one scheduler per guild and shuts them all down together
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use narrador::{audio::manager::SchedulerRegistry, services::tts::TtsService};
//! use serenity::all::{GuildId, UserId};
//!
//! # async fn example(registry: &SchedulerRegistry, tts: &TtsService) -> anyhow::Result<()> {
//! let guild_id = GuildId::new(123456789);
//! let clip = tts.synthesize("Hello there").await?;
//! let job = registry.add_job(guild_id, clip, UserId::new(42))?;
//! println!("Audio {} en cola", job);
//! # Ok(())
//! # }
//! ```

pub mod manager;
pub mod metrics;
pub mod queue;
pub mod scheduler;
pub mod transport;
pub mod voice;
