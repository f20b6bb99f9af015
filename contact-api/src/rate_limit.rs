use std::{
    collections::HashMap,
    sync::Mutex,
    time::{Duration, Instant, SystemTime, UNIX_EPOCH},
};

/// Fixed-window request counter keyed by client address.
///
/// Each key gets a window of `window` length in which at most `max_requests`
/// requests are allowed. The counter resets on the first request after the
/// window has elapsed. Stale entries are dropped by [`RateLimiter::sweep`],
/// which the server runs periodically so the map stays bounded.
pub struct RateLimiter {
    max_requests: u32,
    window: Duration,
    entries: Mutex<HashMap<String, RateLimitEntry>>,
}

struct RateLimitEntry {
    count: u32,
    window_end: Instant,
    reset_epoch: u64,
}

impl RateLimitEntry {
    fn new(window_end: Instant, reset_epoch: u64) -> Self {
        Self {
            count: 0,
            window_end,
            reset_epoch,
        }
    }
}

/// Quota snapshot exposed as `X-RateLimit-*` response headers. `reset` is in
/// unix seconds.
#[derive(Clone, Copy, Debug)]
pub struct Quota {
    pub limit: u32,
    pub remaining: u32,
    pub reset: u64,
}

#[derive(Debug)]
pub enum Decision {
    Allowed(Quota),
    Limited(Quota),
}

impl RateLimiter {
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            max_requests,
            window,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn check(&self, client_key: &str) -> Decision {
        let epoch_now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_secs())
            .unwrap_or(0);
        self.check_at(client_key, Instant::now(), epoch_now)
    }

    // Read-check-increment happens under a single lock acquisition so that
    // concurrent bursts from the same client cannot undercount.
    fn check_at(&self, client_key: &str, now: Instant, epoch_now: u64) -> Decision {
        let mut entries = self.entries.lock().unwrap();
        let entry = entries.entry(client_key.to_string()).or_insert_with(|| {
            RateLimitEntry::new(now + self.window, epoch_now + self.window.as_secs())
        });
        if now > entry.window_end {
            *entry = RateLimitEntry::new(now + self.window, epoch_now + self.window.as_secs());
        }
        entry.count += 1;
        let quota = Quota {
            limit: self.max_requests,
            remaining: self.max_requests.saturating_sub(entry.count),
            reset: entry.reset_epoch,
        };
        if entry.count > self.max_requests {
            Decision::Limited(quota)
        } else {
            Decision::Allowed(quota)
        }
    }

    /// Removes entries whose window has already elapsed.
    pub fn sweep(&self) {
        let now = Instant::now();
        self.entries
            .lock()
            .unwrap()
            .retain(|_, entry| entry.window_end >= now);
    }

    #[cfg(test)]
    fn tracked_clients(&self) -> usize {
        self.entries.lock().unwrap().len()
    }
}
