use serenity::model::id::UserId;
use std::{
    collections::VecDeque,
    fmt,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};
use tempfile::TempPath;
use tokio::time::Instant;
use tracing::{debug, info};

static NEXT_JOB_ID: AtomicU64 = AtomicU64::new(1);

/// Identificador único de un trabajo dentro del proceso
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId(u64);

impl JobId {
    fn next() -> Self {
        Self(NEXT_JOB_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Audio a reproducir. Si proviene de un archivo temporal, el archivo se
/// elimina cuando el último clon desaparece.
#[derive(Debug, Clone)]
pub struct AudioClip {
    path: PathBuf,
    _temp: Option<Arc<TempPath>>,
}

impl AudioClip {
    #[cfg(test)]
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            _temp: None,
        }
    }

    pub fn from_temp(temp: TempPath) -> Self {
        Self {
            path: temp.to_path_buf(),
            _temp: Some(Arc::new(temp)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Una petición de reproducción pendiente
#[derive(Debug, Clone)]
pub struct Job {
    pub id: JobId,
    pub clip: AudioClip,
    pub requester: UserId,
    pub enqueued_at: Instant,
}

impl Job {
    pub fn new(clip: AudioClip, requester: UserId) -> Self {
        Self::enqueued_at(clip, requester, Instant::now())
    }

    pub(crate) fn enqueued_at(clip: AudioClip, requester: UserId, enqueued_at: Instant) -> Self {
        Self {
            id: JobId::next(),
            clip,
            requester,
            enqueued_at,
        }
    }

    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.enqueued_at)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueueError {
    #[error("La cola está llena (máximo {capacity} audios)")]
    Full { capacity: usize },
}

/// Cola FIFO acotada de trabajos pendientes para un único destino.
///
/// No sabe nada del transporte de voz; el scheduler la protege con su lock.
#[derive(Debug)]
pub struct JobQueue {
    items: VecDeque<Job>,
    max_size: usize,
}

impl JobQueue {
    pub fn new(max_size: usize) -> Self {
        Self {
            items: VecDeque::with_capacity(max_size),
            max_size,
        }
    }

    /// Agrega un trabajo al final de la cola
    pub fn enqueue(&mut self, job: Job) -> Result<(), QueueError> {
        if self.items.len() >= self.max_size {
            return Err(QueueError::Full {
                capacity: self.max_size,
            });
        }

        debug!("➕ Audio {} agregado a la cola: {}", job.id, job.clip.path().display());
        self.items.push_back(job);
        Ok(())
    }

    pub fn peek_head(&self) -> Option<&Job> {
        self.items.front()
    }

    pub fn pop_head(&mut self) -> Option<Job> {
        self.items.pop_front()
    }

    /// Saca la cabeza solo si sigue siendo el trabajo indicado.
    ///
    /// Tras un punto de espera la cola pudo haberse limpiado o expirado, y en
    /// ese caso la cabeza actual es otro trabajo que no debe descartarse.
    pub fn pop_head_if(&mut self, id: JobId) -> Option<Job> {
        if self.items.front().is_some_and(|job| job.id == id) {
            self.pop_head()
        } else {
            None
        }
    }

    /// Limpia la cola
    pub fn clear(&mut self) -> usize {
        let cleared = self.items.len();
        self.items.clear();
        info!("🗑️ Cola limpiada: {} audios removidos", cleared);
        cleared
    }

    /// Limpia la cola conservando la cabeza si es el trabajo `keep`
    pub fn clear_except(&mut self, keep: JobId) -> usize {
        let kept = self.pop_head_if(keep);
        let cleared = self.clear();
        self.items.extend(kept);
        cleared
    }

    /// Elimina los trabajos expirados alineados con la cabeza.
    ///
    /// La cola está ordenada por llegada, así que basta con avanzar desde la
    /// cabeza hasta el primer trabajo que no ha expirado. El trabajo en
    /// reproducción (`in_flight`) ya no está esperando y se salta.
    pub fn expire_stale(&mut self, now: Instant, ttl: Duration, in_flight: Option<JobId>) -> Vec<Job> {
        let start = match (self.items.front(), in_flight) {
            (Some(head), Some(id)) if head.id == id => 1,
            _ => 0,
        };

        let mut expired = Vec::new();
        while let Some(job) = self.items.get(start) {
            if job.age(now) <= ttl {
                break;
            }
            if let Some(job) = self.items.remove(start) {
                expired.push(job);
            }
        }
        expired
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
