use std::time::{Duration, Instant};

/// Cached payload with recency and a byte weight.
#[derive(Debug, Clone)]
pub struct LivingEntity<T> {
    pub value: T,
    last_access: Instant,
    weight: u64,
}

impl<T> LivingEntity<T> {
    pub fn new(value: T, weight: u64, now: Instant) -> Self {
        Self {
            value,
            last_access: now,
            weight,
        }
    }

    pub fn touch(&mut self, now: Instant) {
        self.last_access = now;
    }

    pub fn last_access(&self) -> Instant {
        self.last_access
    }

    pub fn weight(&self) -> u64 {
        self.weight
    }

    /// Alive while `last_access + ttl` is strictly after `now`.
    pub fn is_alive(&self, now: Instant, ttl: Duration) -> bool {
        match self.last_access.checked_add(ttl) {
            Some(deadline) => deadline > now,
            None => true,
        }
    }
}
