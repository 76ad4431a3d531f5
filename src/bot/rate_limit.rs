use dashmap::DashMap;
use serenity::model::id::UserId;
use std::{collections::VecDeque, time::Duration};
use tokio::time::Instant;

/// Límite de mensajes por usuario con ventana deslizante
pub struct RateLimiter {
    max_messages: usize,
    period: Duration,
    history: DashMap<UserId, VecDeque<Instant>>,
}

impl RateLimiter {
    pub fn new(max_messages: u32, period: Duration) -> Self {
        Self {
            max_messages: max_messages as usize,
            period,
            history: DashMap::new(),
        }
    }

    /// Registra un mensaje y devuelve si está dentro del límite
    pub fn check(&self, user_id: UserId) -> bool {
        let now = Instant::now();
        let mut sent = self.history.entry(user_id).or_default();

        while sent
            .front()
            .is_some_and(|at| now.saturating_duration_since(*at) >= self.period)
        {
            sent.pop_front();
        }

        if sent.len() >= self.max_messages {
            return false;
        }
        sent.push_back(now);
        true
    }

    /// Olvida a los usuarios sin actividad reciente
    pub fn prune(&self) {
        let now = Instant::now();
        self.history.retain(|_, sent| {
            sent.back()
                .is_some_and(|at| now.saturating_duration_since(*at) < self.period)
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const USER: UserId = UserId::new(1);

    #[tokio::test(start_paused = true)]
    async fn test_limit_resets_after_period() {
        let limiter = RateLimiter::new(2, Duration::from_secs(60));

        assert!(limiter.check(USER));
        assert!(limiter.check(USER));
        assert!(!limiter.check(USER));
        assert!(limiter.check(UserId::new(2)));

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(limiter.check(USER));
    }

    #[tokio::test(start_paused = true)]
    async fn test_prune_drops_idle_users() {
        let limiter = RateLimiter::new(5, Duration::from_secs(10));
        limiter.check(USER);

        tokio::time::advance(Duration::from_secs(11)).await;
        limiter.prune();

        assert!(limiter.history.is_empty());
    }
}
