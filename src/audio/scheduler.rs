//! Per-guild playback scheduler.
//!
//! A [`PlaybackScheduler`] owns one guild's [`JobQueue`] and drives that
//! guild's [`TransportSession`]. At most one drain loop runs per guild: the
//! loop is spawned by the enqueue that finds the sequencer idle, and it only
//! goes back to idle after re-checking the queue under the same lock that
//! enqueues use. A second task, the expiry sweeper, evicts jobs that waited
//! longer than the configured TTL.
//!
//! ```text
//! Idle ──enqueue──▶ Draining ──no session──▶ Connecting ──ok──▶ Playing
//!   ▲                  │  ▲                     │                 │
//!   └──queue empty─────┘  └──cooldown───────────┘◀──done/error────┘
//! ```

use futures::FutureExt;
use parking_lot::Mutex;
use serenity::model::id::{ChannelId, GuildId, UserId};
use std::{panic::AssertUnwindSafe, sync::Arc, time::Duration};
use tokio::{
    sync::watch,
    time::{self, Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{
    metrics::{emit, DropReason, MetricsSink},
    queue::{AudioClip, Job, JobId, JobQueue, QueueError},
    transport::{PlaybackCompletion, PlaybackOutcome, TransportError, TransportSession, VoiceChannelLocator},
};

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub max_queue_size: usize,
    pub job_ttl: Duration,
    pub sweep_interval: Duration,
    /// Connect attempts per cycle, and mid-playback disconnects tolerated per job
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub cooldown: Duration,
    pub completion_poll_interval: Duration,
    /// Exhausted connect cycles before the head job is dropped (0 = never)
    pub connect_cycle_limit: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_queue_size: 50,
            job_ttl: Duration::from_secs(300),
            sweep_interval: Duration::from_secs(60),
            max_retries: 3,
            retry_delay: Duration::from_secs(1),
            cooldown: Duration::from_secs(5),
            completion_poll_interval: Duration::from_millis(250),
            connect_cycle_limit: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequencerPhase {
    Idle,
    Draining,
    Connecting,
    Playing,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerStatus {
    pub queue_len: usize,
    pub connected: bool,
    pub playing: bool,
    pub phase: SequencerPhase,
    pub current: Option<JobId>,
    /// Time spent on the current job so far
    pub current_elapsed: Option<Duration>,
}

#[derive(Debug)]
struct SequencerState {
    phase: SequencerPhase,
    current_job: Option<Job>,
    audio_start_time: Option<Instant>,
    // Retry counters belong to `retry_job` and reset when the head changes
    retry_job: Option<JobId>,
    reconnect_attempts: u32,
    connect_cycles: u32,
}

impl SequencerState {
    fn new() -> Self {
        Self {
            phase: SequencerPhase::Idle,
            current_job: None,
            audio_start_time: None,
            retry_job: None,
            reconnect_attempts: 0,
            connect_cycles: 0,
        }
    }

    fn retries_for(&mut self, id: JobId) -> &mut Self {
        if self.retry_job != Some(id) {
            self.retry_job = Some(id);
            self.reconnect_attempts = 0;
            self.connect_cycles = 0;
        }
        self
    }

    fn reset_retries(&mut self) {
        self.retry_job = None;
        self.reconnect_attempts = 0;
        self.connect_cycles = 0;
    }

    fn finish_current(&mut self) {
        self.current_job = None;
        self.audio_start_time = None;
    }
}

#[derive(Debug)]
struct Shared {
    queue: JobQueue,
    state: SequencerState,
}

impl Shared {
    /// Drops every waiting job, keeping the one being played
    fn clear_waiting(&mut self) -> usize {
        match self.state.current_job.as_ref().map(|job| job.id) {
            Some(in_flight) => self.queue.clear_except(in_flight),
            None => self.queue.clear(),
        }
    }
}

/// How a single playback attempt ended
enum Resolution {
    Finished,
    Failed(String),
    NotStarted(TransportError),
    Disconnected,
    Shutdown,
}

struct Inner {
    guild_id: GuildId,
    config: SchedulerConfig,
    shared: Mutex<Shared>,
    session: Arc<dyn TransportSession>,
    locator: Arc<dyn VoiceChannelLocator>,
    metrics: Arc<dyn MetricsSink>,
    phase_tx: watch::Sender<SequencerPhase>,
    shutdown: CancellationToken,
}

#[derive(Clone)]
pub struct PlaybackScheduler {
    inner: Arc<Inner>,
}

impl PlaybackScheduler {
    /// Creates the scheduler and starts its expiry sweeper.
    ///
    /// Must be called from within a tokio runtime. Both background tasks stop
    /// when `shutdown` is cancelled.
    pub fn spawn(
        guild_id: GuildId,
        config: SchedulerConfig,
        session: Arc<dyn TransportSession>,
        locator: Arc<dyn VoiceChannelLocator>,
        metrics: Arc<dyn MetricsSink>,
        shutdown: CancellationToken,
    ) -> Self {
        let (phase_tx, _) = watch::channel(SequencerPhase::Idle);
        let inner = Arc::new(Inner {
            guild_id,
            shared: Mutex::new(Shared {
                queue: JobQueue::new(config.max_queue_size),
                state: SequencerState::new(),
            }),
            config,
            session,
            locator,
            metrics,
            phase_tx,
            shutdown,
        });

        tokio::spawn(inner.clone().sweep_loop());
        Self { inner }
    }

    pub fn guild_id(&self) -> GuildId {
        self.inner.guild_id
    }

    /// Agrega un audio a la cola y despierta el drain loop si está inactivo
    pub fn add_job(&self, clip: AudioClip, requester: UserId) -> Result<JobId, QueueError> {
        let job = Job::new(clip, requester);
        let id = job.id;

        let start_loop = {
            let mut shared = self.inner.shared.lock();
            if let Err(err) = shared.queue.enqueue(job) {
                warn!("🚫 Cola llena en guild {}, audio rechazado", self.inner.guild_id);
                return Err(err);
            }
            self.inner.claim_if_idle(&mut shared.state)
        };

        emit(self.inner.metrics.as_ref(), "queued", |m| m.record_queued(self.inner.guild_id));

        if start_loop {
            tokio::spawn(self.inner.clone().drain());
        }
        Ok(id)
    }

    /// Vacía la cola. El audio en reproducción termina normalmente.
    pub fn clear_queue(&self) -> usize {
        self.inner.shared.lock().clear_waiting()
    }

    /// Vacía la cola y suelta la conexión de voz.
    ///
    /// La desconexión la hace siempre el drain loop: si hay uno activo lo hará
    /// cuando termine el audio actual; si no, se lanza uno que encuentra la
    /// cola vacía y desconecta.
    pub fn leave(&self) -> usize {
        let (cleared, start_loop) = {
            let mut shared = self.inner.shared.lock();
            let cleared = shared.clear_waiting();
            (cleared, self.inner.claim_if_idle(&mut shared.state))
        };

        if start_loop {
            tokio::spawn(self.inner.clone().drain());
        }
        cleared
    }

    pub fn queue_len(&self) -> usize {
        self.inner.shared.lock().queue.len()
    }

    /// Receives every phase transition
    #[cfg(test)]
    fn subscribe(&self) -> watch::Receiver<SequencerPhase> {
        self.inner.phase_tx.subscribe()
    }

    pub async fn status(&self) -> SchedulerStatus {
        let (queue_len, phase, current, current_elapsed) = {
            let shared = self.inner.shared.lock();
            (
                shared.queue.len(),
                shared.state.phase,
                shared.state.current_job.as_ref().map(|job| job.id),
                shared.state.audio_start_time.map(|started| started.elapsed()),
            )
        };

        SchedulerStatus {
            queue_len,
            connected: self.inner.session.is_connected().await,
            playing: self.inner.session.is_playing().await,
            phase,
            current,
            current_elapsed,
        }
    }

    /// Releases the voice session. Used on shutdown, after the loops are cancelled.
    pub async fn close(&self) {
        self.inner.release_session().await;
    }
}

impl Inner {
    fn set_phase(&self, state: &mut SequencerState, phase: SequencerPhase) {
        state.phase = phase;
        self.phase_tx.send_replace(phase);
    }

    fn update_phase(&self, phase: SequencerPhase) {
        let mut shared = self.shared.lock();
        self.set_phase(&mut shared.state, phase);
    }

    /// Marks the sequencer busy if it was idle. Returns whether the caller
    /// now owns the drain loop.
    fn claim_if_idle(&self, state: &mut SequencerState) -> bool {
        if state.phase == SequencerPhase::Idle {
            self.set_phase(state, SequencerPhase::Draining);
            true
        } else {
            false
        }
    }

    async fn sleep(&self, duration: Duration) -> bool {
        tokio::select! {
            _ = self.shutdown.cancelled() => false,
            _ = time::sleep(duration) => true,
        }
    }

    async fn drain(self: Arc<Self>) {
        debug!("▶️ Drain loop iniciado en guild {}", self.guild_id);

        loop {
            if self.shutdown.is_cancelled() {
                let mut shared = self.shared.lock();
                shared.state.finish_current();
                self.set_phase(&mut shared.state, SequencerPhase::Idle);
                break;
            }

            let head = {
                let mut shared = self.shared.lock();
                self.set_phase(&mut shared.state, SequencerPhase::Draining);
                shared.queue.peek_head().cloned()
            };

            let Some(job) = head else {
                self.release_session().await;

                let mut shared = self.shared.lock();
                if shared.queue.is_empty() {
                    shared.state.finish_current();
                    shared.state.reset_retries();
                    self.set_phase(&mut shared.state, SequencerPhase::Idle);
                    break;
                }
                continue;
            };

            let Some(channel_id) = self.locator.voice_channel(self.guild_id, job.requester) else {
                warn!(
                    "🔇 Usuario {} no está en un canal de voz en guild {}, audio {} descartado",
                    job.requester, self.guild_id, job.id
                );
                self.drop_head(&job, DropReason::NoVoiceChannel);
                continue;
            };

            if !self.session.is_connected().await && !self.connect(&job, channel_id).await {
                continue;
            }

            self.play(job).await;
        }

        debug!("⏹️ Drain loop terminado en guild {}", self.guild_id);
    }

    fn drop_head(&self, job: &Job, reason: DropReason) {
        let dropped = {
            let mut shared = self.shared.lock();
            let dropped = shared.queue.pop_head_if(job.id);
            if dropped.is_some() {
                shared.state.reset_retries();
            }
            dropped
        };
        if dropped.is_some() {
            emit(self.metrics.as_ref(), "dropped", |m| m.record_dropped(self.guild_id, reason));
        }
    }

    /// Returns `true` once connected. `false` sends the loop back to Draining
    /// on the same head.
    async fn connect(&self, job: &Job, channel_id: ChannelId) -> bool {
        self.update_phase(SequencerPhase::Connecting);
        let max_retries = self.config.max_retries;

        for attempt in 1..=max_retries {
            let result = tokio::select! {
                _ = self.shutdown.cancelled() => return false,
                result = self.session.connect(channel_id) => result,
            };
            match result {
                Ok(()) => {
                    emit(self.metrics.as_ref(), "connection", |m| {
                        m.record_connection_attempt(self.guild_id, true)
                    });
                    info!("🔊 Conectado al canal {} en guild {}", channel_id, self.guild_id);
                    self.shared.lock().state.retries_for(job.id).connect_cycles = 0;
                    return true;
                }
                Err(err) => {
                    emit(self.metrics.as_ref(), "connection", |m| {
                        m.record_connection_attempt(self.guild_id, false)
                    });
                    warn!(
                        "⚠️ Intento de conexión {}/{} fallido en guild {}: {}",
                        attempt, max_retries, self.guild_id, err
                    );
                    if attempt < max_retries && !self.sleep(self.config.retry_delay).await {
                        return false;
                    }
                }
            }
        }

        let cycles = {
            let mut shared = self.shared.lock();
            let state = shared.state.retries_for(job.id);
            state.connect_cycles += 1;
            state.connect_cycles
        };

        let limit = self.config.connect_cycle_limit;
        if limit > 0 && cycles >= limit {
            error!(
                "❌ Sin conexión de voz tras {} ciclos en guild {}, audio {} descartado",
                cycles, self.guild_id, job.id
            );
            self.drop_head(job, DropReason::ConnectFailed);
            return false;
        }

        warn!(
            "⏳ Reintentos agotados en guild {}, esperando {:?} antes de reintentar",
            self.guild_id, self.config.cooldown
        );
        self.update_phase(SequencerPhase::Draining);
        self.sleep(self.config.cooldown).await;
        false
    }

    /// Marks `job` as current if it is still the head of the queue
    fn begin_playback(&self, job: &Job) -> Option<Instant> {
        let mut shared = self.shared.lock();
        if shared.queue.peek_head().map(|head| head.id) != Some(job.id) {
            return None;
        }
        let started = Instant::now();
        shared.state.current_job = Some(job.clone());
        shared.state.audio_start_time = Some(started);
        self.set_phase(&mut shared.state, SequencerPhase::Playing);
        Some(started)
    }

    async fn play(&self, job: Job) {
        let Some(started) = self.begin_playback(&job) else {
            debug!("Audio {} ya no está en la cabeza de la cola", job.id);
            return;
        };

        debug!("🎙️ Reproduciendo audio {} en guild {}", job.id, self.guild_id);
        let resolution = match self.session.play(&job.clip).await {
            Ok(completion) => self.await_completion(completion).await,
            Err(err) => Resolution::NotStarted(err),
        };
        let elapsed = started.elapsed();

        match resolution {
            Resolution::Finished => {
                emit(self.metrics.as_ref(), "playback", |m| {
                    m.record_playback(self.guild_id, true, elapsed)
                });
                emit(self.metrics.as_ref(), "queue_wait", |m| {
                    m.record_queue_wait(self.guild_id, job.age(started))
                });
                debug!("✅ Audio {} reproducido ({:?})", job.id, elapsed);
                self.complete(&job);
            }
            Resolution::Failed(reason) => {
                emit(self.metrics.as_ref(), "playback", |m| {
                    m.record_playback(self.guild_id, false, elapsed)
                });
                error!("❌ Error reproduciendo audio {} en guild {}: {}", job.id, self.guild_id, reason);
                self.complete(&job);
            }
            Resolution::NotStarted(err) => {
                emit(self.metrics.as_ref(), "playback", |m| {
                    m.record_playback(self.guild_id, false, Duration::ZERO)
                });
                error!("❌ No se pudo iniciar el audio {} en guild {}: {}", job.id, self.guild_id, err);
                self.complete(&job);
            }
            Resolution::Disconnected => {
                emit(self.metrics.as_ref(), "playback", |m| {
                    m.record_playback(self.guild_id, false, elapsed)
                });
                warn!(
                    "🔌 Conexión de voz perdida durante el audio {} en guild {}",
                    job.id, self.guild_id
                );
                self.handle_disconnect(&job).await;
            }
            Resolution::Shutdown => {
                self.shared.lock().state.finish_current();
            }
        }
    }

    async fn await_completion(&self, mut completion: PlaybackCompletion) -> Resolution {
        let mut poll = time::interval_at(
            Instant::now() + self.config.completion_poll_interval,
            self.config.completion_poll_interval,
        );
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                outcome = &mut completion => {
                    return match outcome {
                        Some(PlaybackOutcome::Finished) => Resolution::Finished,
                        Some(PlaybackOutcome::Failed(reason)) => Resolution::Failed(reason),
                        None => {
                            if self.session.is_connected().await {
                                Resolution::Failed("la sesión cerró el aviso de finalización".to_string())
                            } else {
                                Resolution::Disconnected
                            }
                        }
                    };
                }
                _ = poll.tick() => {
                    if !self.session.is_connected().await {
                        return Resolution::Disconnected;
                    }
                }
                _ = self.shutdown.cancelled() => return Resolution::Shutdown,
            }
        }
    }

    /// Pops the job after a final (non-retryable) outcome
    fn complete(&self, job: &Job) {
        let mut shared = self.shared.lock();
        shared.queue.pop_head_if(job.id);
        shared.state.finish_current();
        shared.state.reset_retries();
    }

    async fn handle_disconnect(&self, job: &Job) {
        if let Err(err) = self.session.disconnect().await {
            debug!("Sesión ya cerrada en guild {}: {}", self.guild_id, err);
        }
        emit(self.metrics.as_ref(), "disconnection", |m| {
            m.record_disconnection(self.guild_id, false)
        });

        let attempts = {
            let mut shared = self.shared.lock();
            shared.state.finish_current();
            let state = shared.state.retries_for(job.id);
            state.reconnect_attempts += 1;
            state.reconnect_attempts
        };

        if attempts >= self.config.max_retries {
            error!(
                "❌ Audio {} interrumpido {} veces en guild {}, descartado",
                job.id, attempts, self.guild_id
            );
            self.drop_head(job, DropReason::Disconnected);
            return;
        }

        info!(
            "🔄 Reintentando audio {} en guild {} ({}/{}) tras {:?}",
            job.id, self.guild_id, attempts, self.config.max_retries, self.config.cooldown
        );
        self.update_phase(SequencerPhase::Draining);
        self.sleep(self.config.cooldown).await;
    }

    /// End-of-queue cleanup
    async fn release_session(&self) {
        if !self.session.is_connected().await {
            return;
        }

        match self.session.disconnect().await {
            Ok(()) => {
                emit(self.metrics.as_ref(), "disconnection", |m| {
                    m.record_disconnection(self.guild_id, true)
                });
                info!("👋 Cola vacía, desconectado del canal de voz en guild {}", self.guild_id);
            }
            Err(err) => warn!("⚠️ Error al desconectar en guild {}: {}", self.guild_id, err),
        }
    }

    async fn sweep_loop(self: Arc<Self>) {
        let period = self.config.sweep_interval;
        let mut ticker = time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let inner = self.clone();
            let tick = AssertUnwindSafe(async move { inner.sweep_expired() }).catch_unwind();
            if tick.await.is_err() {
                error!("💥 Fallo en la limpieza de la cola de guild {}; se reintentará", self.guild_id);
            }
        }

        debug!("Limpieza de cola detenida en guild {}", self.guild_id);
    }

    fn sweep_expired(&self) -> usize {
        let expired = {
            let mut shared = self.shared.lock();
            let in_flight = shared.state.current_job.as_ref().map(|job| job.id);
            shared.queue.expire_stale(Instant::now(), self.config.job_ttl, in_flight)
        };

        for _ in &expired {
            emit(self.metrics.as_ref(), "dropped", |m| {
                m.record_dropped(self.guild_id, DropReason::Expired)
            });
        }
        if !expired.is_empty() {
            info!(
                "⌛ {} audios expirados eliminados de la cola en guild {}",
                expired.len(),
                self.guild_id
            );
        }
        expired.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{
        metrics::MetricsManager,
        transport::{MockVoiceChannelLocator, PlaybackNotifier},
    };
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use std::{
        collections::VecDeque,
        path::PathBuf,
        sync::atomic::{AtomicBool, AtomicUsize, Ordering},
    };

    const GUILD: GuildId = GuildId::new(100);
    const CHANNEL: ChannelId = ChannelId::new(200);
    const USER: UserId = UserId::new(300);
    const CLIP_LENGTH: Duration = Duration::from_secs(2);

    #[derive(Debug, Clone, PartialEq)]
    enum Event {
        Attempt(bool),
        Disconnect(bool),
        Queued,
        Playback(bool, Duration),
        Dropped(DropReason),
    }

    #[derive(Default)]
    struct RecordingSink {
        events: Mutex<Vec<Event>>,
    }

    impl RecordingSink {
        fn events(&self) -> Vec<Event> {
            self.events.lock().clone()
        }
    }

    impl MetricsSink for RecordingSink {
        fn record_connection_attempt(&self, _: GuildId, success: bool) {
            self.events.lock().push(Event::Attempt(success));
        }
        fn record_disconnection(&self, _: GuildId, expected: bool) {
            self.events.lock().push(Event::Disconnect(expected));
        }
        fn record_queued(&self, _: GuildId) {
            self.events.lock().push(Event::Queued);
        }
        fn record_playback(&self, _: GuildId, success: bool, duration: Duration) {
            self.events.lock().push(Event::Playback(success, duration));
        }
        fn record_dropped(&self, _: GuildId, reason: DropReason) {
            self.events.lock().push(Event::Dropped(reason));
        }
    }

    #[derive(Default)]
    struct FakeState {
        connected: AtomicBool,
        connect_failures: AtomicUsize,
        always_fail_connect: AtomicBool,
        fail_play: AtomicBool,
        drop_during: Mutex<VecDeque<bool>>,
        connect_times: Mutex<Vec<Instant>>,
        played: Mutex<Vec<PathBuf>>,
        intervals: Mutex<Vec<(Instant, Instant)>>,
        playing_now: AtomicUsize,
        max_concurrent: AtomicUsize,
    }

    /// Voice session double: every clip lasts `CLIP_LENGTH` of virtual time
    #[derive(Clone, Default)]
    struct FakeSession {
        state: Arc<FakeState>,
    }

    impl FakeSession {
        fn failing_connects(count: usize) -> Self {
            let session = Self::default();
            session.state.connect_failures.store(count, Ordering::SeqCst);
            session
        }

        fn unreachable() -> Self {
            let session = Self::default();
            session.state.always_fail_connect.store(true, Ordering::SeqCst);
            session
        }

        fn dropping(pattern: &[bool]) -> Self {
            let session = Self::default();
            session.state.drop_during.lock().extend(pattern.iter().copied());
            session
        }

        fn played(&self) -> Vec<String> {
            self.state
                .played
                .lock()
                .iter()
                .map(|p| p.display().to_string())
                .collect()
        }
    }

    async fn run_clip(state: Arc<FakeState>, notifier: PlaybackNotifier, drop_connection: bool) {
        let started = Instant::now();
        if drop_connection {
            time::sleep(CLIP_LENGTH / 2).await;
            state.connected.store(false, Ordering::SeqCst);
            drop(notifier);
        } else {
            time::sleep(CLIP_LENGTH).await;
            notifier.notify(PlaybackOutcome::Finished);
        }
        state.playing_now.fetch_sub(1, Ordering::SeqCst);
        state.intervals.lock().push((started, Instant::now()));
    }

    #[async_trait]
    impl TransportSession for FakeSession {
        async fn connect(&self, channel_id: ChannelId) -> Result<(), TransportError> {
            self.state.connect_times.lock().push(Instant::now());
            let scripted_failure = self
                .state
                .connect_failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if scripted_failure || self.state.always_fail_connect.load(Ordering::SeqCst) {
                return Err(TransportError::Connect {
                    channel_id,
                    reason: "timeout".to_string(),
                });
            }
            self.state.connected.store(true, Ordering::SeqCst);
            Ok(())
        }

        async fn disconnect(&self) -> Result<(), TransportError> {
            self.state.connected.store(false, Ordering::SeqCst);
            Ok(())
        }

        async fn is_connected(&self) -> bool {
            self.state.connected.load(Ordering::SeqCst)
        }

        async fn is_playing(&self) -> bool {
            self.state.playing_now.load(Ordering::SeqCst) > 0
        }

        async fn play(&self, clip: &AudioClip) -> Result<PlaybackCompletion, TransportError> {
            if self.state.fail_play.load(Ordering::SeqCst) {
                return Err(TransportError::Play("archivo inválido".to_string()));
            }
            if !self.state.connected.load(Ordering::SeqCst) {
                return Err(TransportError::NotConnected);
            }
            self.state.played.lock().push(clip.path().to_path_buf());
            let now = self.state.playing_now.fetch_add(1, Ordering::SeqCst) + 1;
            self.state.max_concurrent.fetch_max(now, Ordering::SeqCst);

            let drop_connection = self.state.drop_during.lock().pop_front().unwrap_or(false);
            let (notifier, completion) = PlaybackCompletion::channel();
            tokio::spawn(run_clip(self.state.clone(), notifier, drop_connection));
            Ok(completion)
        }
    }

    fn locator_for(channel: Option<ChannelId>) -> MockVoiceChannelLocator {
        let mut locator = MockVoiceChannelLocator::new();
        locator.expect_voice_channel().returning(move |_, _| channel);
        locator
    }

    fn spawn_with(
        session: &FakeSession,
        locator: MockVoiceChannelLocator,
        config: SchedulerConfig,
        metrics: Arc<dyn MetricsSink>,
    ) -> (PlaybackScheduler, CancellationToken) {
        let shutdown = CancellationToken::new();
        let scheduler = PlaybackScheduler::spawn(
            GUILD,
            config,
            Arc::new(session.clone()),
            Arc::new(locator),
            metrics,
            shutdown.clone(),
        );
        (scheduler, shutdown)
    }

    fn start(
        session: &FakeSession,
        locator: MockVoiceChannelLocator,
        config: SchedulerConfig,
    ) -> (PlaybackScheduler, Arc<RecordingSink>, CancellationToken) {
        let sink = Arc::new(RecordingSink::default());
        let (scheduler, shutdown) = spawn_with(session, locator, config, sink.clone());
        (scheduler, sink, shutdown)
    }

    fn connect_offsets(session: &FakeSession, t0: Instant) -> Vec<Duration> {
        session
            .state
            .connect_times
            .lock()
            .iter()
            .map(|t| *t - t0)
            .collect()
    }

    fn clip(name: &str) -> AudioClip {
        AudioClip::from_path(format!("/audio/{name}.mp3"))
    }

    async fn wait_idle(scheduler: &PlaybackScheduler) {
        scheduler
            .subscribe()
            .wait_for(|phase| *phase == SequencerPhase::Idle)
            .await
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_three_jobs_play_in_order_then_disconnect() {
        let session = FakeSession::default();
        let (scheduler, sink, _shutdown) =
            start(&session, locator_for(Some(CHANNEL)), SchedulerConfig::default());

        for name in ["a", "b", "c"] {
            scheduler.add_job(clip(name), USER).unwrap();
        }
        wait_idle(&scheduler).await;

        assert_eq!(
            sink.events(),
            vec![
                Event::Queued,
                Event::Queued,
                Event::Queued,
                Event::Attempt(true),
                Event::Playback(true, CLIP_LENGTH),
                Event::Playback(true, CLIP_LENGTH),
                Event::Playback(true, CLIP_LENGTH),
                Event::Disconnect(true),
            ]
        );
        assert_eq!(session.played(), vec!["/audio/a.mp3", "/audio/b.mp3", "/audio/c.mp3"]);
        assert!(!session.is_connected().await);
        assert_eq!(scheduler.queue_len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_requester_without_voice_channel_is_dropped() {
        let session = FakeSession::default();
        let (scheduler, sink, _shutdown) =
            start(&session, locator_for(None), SchedulerConfig::default());

        scheduler.add_job(clip("lost"), USER).unwrap();
        wait_idle(&scheduler).await;

        assert_eq!(sink.events(), vec![Event::Queued, Event::Dropped(DropReason::NoVoiceChannel)]);
        assert!(session.played().is_empty());
        assert!(session.state.connect_times.lock().is_empty());
        assert_eq!(scheduler.queue_len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_only_missing_requester_is_skipped() {
        let session = FakeSession::default();
        let absent = UserId::new(999);
        let mut locator = MockVoiceChannelLocator::new();
        locator
            .expect_voice_channel()
            .returning(move |_, user| (user != absent).then_some(CHANNEL));
        let (scheduler, _sink, _shutdown) = start(&session, locator, SchedulerConfig::default());

        scheduler.add_job(clip("a"), USER).unwrap();
        scheduler.add_job(clip("b"), absent).unwrap();
        scheduler.add_job(clip("c"), USER).unwrap();
        wait_idle(&scheduler).await;

        assert_eq!(session.played(), vec!["/audio/a.mp3", "/audio/c.mp3"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_failures_cool_down_and_keep_the_job() {
        let session = FakeSession::failing_connects(3);
        let (scheduler, sink, _shutdown) =
            start(&session, locator_for(Some(CHANNEL)), SchedulerConfig::default());
        let t0 = Instant::now();

        scheduler.add_job(clip("a"), USER).unwrap();
        wait_idle(&scheduler).await;

        assert_eq!(
            sink.events(),
            vec![
                Event::Queued,
                Event::Attempt(false),
                Event::Attempt(false),
                Event::Attempt(false),
                Event::Attempt(true),
                Event::Playback(true, CLIP_LENGTH),
                Event::Disconnect(true),
            ]
        );
        // 1s entre intentos, 5s de enfriamiento tras el tercero
        assert_eq!(
            connect_offsets(&session, t0),
            vec![
                Duration::ZERO,
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(7),
            ]
        );
        assert_eq!(session.played(), vec!["/audio/a.mp3"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_cycle_limit_drops_head() {
        let session = FakeSession::unreachable();
        let config = SchedulerConfig {
            connect_cycle_limit: 2,
            ..SchedulerConfig::default()
        };
        let (scheduler, sink, _shutdown) = start(&session, locator_for(Some(CHANNEL)), config);

        scheduler.add_job(clip("a"), USER).unwrap();
        wait_idle(&scheduler).await;

        let mut expected = vec![Event::Queued];
        expected.extend(std::iter::repeat(Event::Attempt(false)).take(6));
        expected.push(Event::Dropped(DropReason::ConnectFailed));
        assert_eq!(sink.events(), expected);
        assert!(session.played().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_while_playing_lets_current_finish() {
        let session = FakeSession::default();
        let (scheduler, sink, _shutdown) =
            start(&session, locator_for(Some(CHANNEL)), SchedulerConfig::default());

        for name in ["a", "b", "c"] {
            scheduler.add_job(clip(name), USER).unwrap();
        }
        time::sleep(Duration::from_millis(500)).await;
        assert_eq!(scheduler.inner.shared.lock().state.phase, SequencerPhase::Playing);

        assert_eq!(scheduler.clear_queue(), 2);
        wait_idle(&scheduler).await;

        assert_eq!(session.played(), vec!["/audio/a.mp3"]);
        let events = sink.events();
        assert_eq!(
            &events[3..],
            &[
                Event::Attempt(true),
                Event::Playback(true, CLIP_LENGTH),
                Event::Disconnect(true),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_mid_playback_retries_same_job() {
        let session = FakeSession::dropping(&[true]);
        let (scheduler, sink, _shutdown) =
            start(&session, locator_for(Some(CHANNEL)), SchedulerConfig::default());
        let t0 = Instant::now();

        scheduler.add_job(clip("a"), USER).unwrap();
        scheduler.add_job(clip("b"), USER).unwrap();
        wait_idle(&scheduler).await;

        assert_eq!(
            sink.events(),
            vec![
                Event::Queued,
                Event::Queued,
                Event::Attempt(true),
                Event::Playback(false, CLIP_LENGTH / 2),
                Event::Disconnect(false),
                Event::Attempt(true),
                Event::Playback(true, CLIP_LENGTH),
                Event::Playback(true, CLIP_LENGTH),
                Event::Disconnect(true),
            ]
        );
        assert_eq!(
            session.played(),
            vec!["/audio/a.mp3", "/audio/a.mp3", "/audio/b.mp3"]
        );
        // Se corta a mitad del clip (1s) y se reconecta tras el enfriamiento de 5s
        assert_eq!(
            connect_offsets(&session, t0),
            vec![Duration::ZERO, Duration::from_secs(6)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_cleared_jobs_do_not_skew_queue_wait() {
        let session = FakeSession::default();
        let metrics = Arc::new(MetricsManager::new());
        let (scheduler, _shutdown) = spawn_with(
            &session,
            locator_for(Some(CHANNEL)),
            SchedulerConfig::default(),
            metrics.clone(),
        );

        for name in ["a", "b", "c"] {
            scheduler.add_job(clip(name), USER).unwrap();
        }
        time::sleep(Duration::from_millis(500)).await;
        assert_eq!(scheduler.clear_queue(), 2);
        wait_idle(&scheduler).await;

        time::sleep(Duration::from_secs(1000)).await;
        scheduler.add_job(clip("d"), USER).unwrap();
        scheduler.add_job(clip("e"), USER).unwrap();
        wait_idle(&scheduler).await;

        let audio = metrics.guild_stats(GUILD).audio;
        assert_eq!(audio.total_played, 3);
        // "a" y "d" empiezan al instante; "e" espera lo que dura "d"
        assert_eq!(audio.average_queue_time, CLIP_LENGTH / 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeated_disconnects_drop_the_job() {
        let session = FakeSession::dropping(&[true, true, true]);
        let (scheduler, sink, _shutdown) =
            start(&session, locator_for(Some(CHANNEL)), SchedulerConfig::default());

        scheduler.add_job(clip("a"), USER).unwrap();
        scheduler.add_job(clip("b"), USER).unwrap();
        wait_idle(&scheduler).await;

        assert_eq!(
            session.played(),
            vec!["/audio/a.mp3", "/audio/a.mp3", "/audio/a.mp3", "/audio/b.mp3"]
        );
        let drops: Vec<_> = sink
            .events()
            .into_iter()
            .filter(|e| matches!(e, Event::Dropped(_)))
            .collect();
        assert_eq!(drops, vec![Event::Dropped(DropReason::Disconnected)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_play_error_moves_on() {
        let session = FakeSession::default();
        session.state.fail_play.store(true, Ordering::SeqCst);
        let (scheduler, sink, _shutdown) =
            start(&session, locator_for(Some(CHANNEL)), SchedulerConfig::default());

        scheduler.add_job(clip("broken"), USER).unwrap();
        wait_idle(&scheduler).await;

        assert_eq!(
            sink.events(),
            vec![
                Event::Queued,
                Event::Attempt(true),
                Event::Playback(false, Duration::ZERO),
                Event::Disconnect(true),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_drain_loop_under_concurrent_producers() {
        let session = FakeSession::default();
        let (scheduler, _sink, _shutdown) =
            start(&session, locator_for(Some(CHANNEL)), SchedulerConfig::default());
        let accepted = Arc::new(Mutex::new(Vec::new()));

        let mut producers = Vec::new();
        for i in 0..8 {
            let scheduler = scheduler.clone();
            let accepted = accepted.clone();
            producers.push(tokio::spawn(async move {
                time::sleep(Duration::from_millis(700 * i)).await;
                let name = format!("/audio/{i}.mp3");
                scheduler.add_job(AudioClip::from_path(&name), USER).unwrap();
                accepted.lock().push(name);
            }));
        }
        for producer in producers {
            producer.await.unwrap();
        }
        wait_idle(&scheduler).await;

        assert_eq!(session.played(), *accepted.lock());
        assert_eq!(session.state.max_concurrent.load(Ordering::SeqCst), 1);
        assert_eq!(session.state.connect_times.lock().len(), 1);

        let mut intervals = session.state.intervals.lock().clone();
        intervals.sort();
        for pair in intervals.windows(2) {
            assert!(pair[0].1 <= pair[1].0, "reproducciones solapadas: {:?}", pair);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_queue_rejects_the_extra_job() {
        let session = FakeSession::default();
        let (scheduler, sink, shutdown) =
            start(&session, locator_for(Some(CHANNEL)), SchedulerConfig::default());

        for i in 0..50 {
            scheduler.add_job(clip(&i.to_string()), USER).unwrap();
        }
        let err = scheduler.add_job(clip("extra"), USER).unwrap_err();

        assert_eq!(err, QueueError::Full { capacity: 50 });
        assert_eq!(scheduler.queue_len(), 50);
        assert_eq!(sink.events(), vec![Event::Queued; 50]);
        shutdown.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_evicts_only_expired_head() {
        // Sin conexión posible, los audios se quedan esperando en la cola
        let session = FakeSession::unreachable();
        let (scheduler, sink, shutdown) =
            start(&session, locator_for(Some(CHANNEL)), SchedulerConfig::default());

        scheduler.add_job(clip("old"), USER).unwrap();
        time::sleep(Duration::from_secs(200)).await;
        scheduler.add_job(clip("young"), USER).unwrap();

        // Barridos en t=60,120,...; "old" supera 300s en el de t=360
        time::sleep(Duration::from_secs(165)).await;

        assert_eq!(scheduler.queue_len(), 1);
        let expired: Vec<_> = sink
            .events()
            .into_iter()
            .filter(|e| *e == Event::Dropped(DropReason::Expired))
            .collect();
        assert_eq!(expired.len(), 1);
        shutdown.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_skips_job_in_flight() {
        let session = FakeSession::default();
        let config = SchedulerConfig {
            job_ttl: Duration::from_millis(100),
            ..SchedulerConfig::default()
        };
        let (scheduler, sink, _shutdown) = start(&session, locator_for(Some(CHANNEL)), config);

        scheduler.add_job(clip("a"), USER).unwrap();
        time::sleep(Duration::from_millis(500)).await;
        assert_eq!(scheduler.inner.sweep_expired(), 0);
        wait_idle(&scheduler).await;

        assert!(sink.events().contains(&Event::Playback(true, CLIP_LENGTH)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_leave_while_playing_disconnects_after_current() {
        let session = FakeSession::default();
        let (scheduler, sink, _shutdown) =
            start(&session, locator_for(Some(CHANNEL)), SchedulerConfig::default());

        scheduler.add_job(clip("a"), USER).unwrap();
        scheduler.add_job(clip("b"), USER).unwrap();
        time::sleep(Duration::from_millis(500)).await;

        let status = scheduler.status().await;
        assert!(status.connected);
        assert!(status.playing);
        assert_eq!(status.phase, SequencerPhase::Playing);
        assert!(status.current.is_some());
        assert!(status.current_elapsed.is_some_and(|e| e >= Duration::from_millis(500)));

        assert_eq!(scheduler.leave(), 1);
        wait_idle(&scheduler).await;

        assert_eq!(session.played(), vec!["/audio/a.mp3"]);
        assert_eq!(sink.events().last(), Some(&Event::Disconnect(true)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_leave_when_idle_and_disconnected_is_a_noop() {
        let session = FakeSession::default();
        let (scheduler, sink, _shutdown) =
            start(&session, locator_for(Some(CHANNEL)), SchedulerConfig::default());

        assert_eq!(scheduler.leave(), 0);
        wait_idle(&scheduler).await;

        assert!(sink.events().is_empty());
        assert_eq!(scheduler.status().await.phase, SequencerPhase::Idle);
    }
}
