//! Sliding-window login rate limiter, keyed by `ip:username` (4.E).
//!
//! Defense in depth alongside the identity store's persistent lockout
//! ([[identity]]): this one fails closed at the edge, in memory, without a
//! DB round-trip, and forgets everything on restart.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub struct RateLimiterConfig {
    pub max_attempts: u32,
    pub window: Duration,
    pub lockout: Duration,
    pub cleanup_interval: Duration,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            window: Duration::from_secs(15 * 60),
            lockout: Duration::from_secs(30 * 60),
            cleanup_interval: Duration::from_secs(5 * 60),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Record {
    count: u32,
    first_attempt: DateTime<Utc>,
    locked_until: Option<DateTime<Utc>>,
}

/// Outcome of an `allow` check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny { retry_after: Duration },
}

#[derive(Clone)]
pub struct RateLimiter {
    config: RateLimiterConfig,
    records: Arc<Mutex<HashMap<String, Record>>>,
}

impl RateLimiter {
    pub fn new(config: RateLimiterConfig) -> Self {
        Self { config, records: Arc::new(Mutex::new(HashMap::new())) }
    }

    fn key(ip: &str, username: &str) -> String {
        format!("{ip}:{username}")
    }

    /// `Allow` iff no record exists, the record's window has expired, the
    /// lockout (if any) has expired, or the attempt count is still under
    /// the threshold.
    pub fn allow(&self, ip: &str, username: &str) -> Decision {
        let key = Self::key(ip, username);
        let records = self.records.lock().unwrap();
        let Some(record) = records.get(&key) else {
            return Decision::Allow;
        };

        let now = Utc::now();
        if let Some(locked_until) = record.locked_until {
            if locked_until > now {
                let retry_after = (locked_until - now).to_std().unwrap_or(Duration::ZERO);
                return Decision::Deny { retry_after };
            }
        }

        let window = ChronoDuration::from_std(self.config.window).unwrap_or(ChronoDuration::zero());
        if now - record.first_attempt > window {
            return Decision::Allow;
        }

        if record.count < self.config.max_attempts {
            Decision::Allow
        } else {
            Decision::Deny { retry_after: self.config.lockout }
        }
    }

    /// Create or update the record for a failed attempt. Resets the
    /// window if it had expired before incrementing.
    pub fn record_failure(&self, ip: &str, username: &str) {
        let key = Self::key(ip, username);
        let now = Utc::now();
        let window = ChronoDuration::from_std(self.config.window).unwrap_or(ChronoDuration::zero());
        let lockout = ChronoDuration::from_std(self.config.lockout).unwrap_or(ChronoDuration::zero());

        let mut records = self.records.lock().unwrap();
        let record = records.entry(key).or_insert(Record { count: 0, first_attempt: now, locked_until: None });

        if now - record.first_attempt > window {
            record.count = 0;
            record.first_attempt = now;
            record.locked_until = None;
        }

        record.count += 1;
        if record.count >= self.config.max_attempts {
            record.locked_until = Some(now + lockout);
        }
    }

    /// A successful login erases the key entirely.
    pub fn record_success(&self, ip: &str, username: &str) {
        let key = Self::key(ip, username);
        self.records.lock().unwrap().remove(&key);
    }

    /// Drop every record whose window and lockout have both expired.
    fn cleanup(&self) {
        let now = Utc::now();
        let window = ChronoDuration::from_std(self.config.window).unwrap_or(ChronoDuration::zero());
        let mut records = self.records.lock().unwrap();
        records.retain(|_, record| {
            let window_active = now - record.first_attempt <= window;
            let lockout_active = record.locked_until.is_some_and(|until| until > now);
            window_active || lockout_active
        });
    }

    /// Spawn the periodic GC tick. Stops when `token` is cancelled.
    pub fn spawn_cleanup(&self, token: CancellationToken) -> tokio::task::JoinHandle<()> {
        let limiter = self.clone();
        let interval = self.config.cleanup_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => limiter.cleanup(),
                    _ = token.cancelled() => {
                        tracing::info!("rate limiter cleanup task shutting down");
                        break;
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(max_attempts: u32) -> RateLimiter {
        RateLimiter::new(RateLimiterConfig { max_attempts, ..RateLimiterConfig::default() })
    }

    #[test]
    fn allows_up_to_threshold_then_denies() {
        let limiter = limiter(3);
        for _ in 0..3 {
            assert_eq!(limiter.allow("1.2.3.4", "alice"), Decision::Allow);
            limiter.record_failure("1.2.3.4", "alice");
        }
        match limiter.allow("1.2.3.4", "alice") {
            Decision::Deny { retry_after } => assert!(retry_after > Duration::ZERO),
            Decision::Allow => panic!("expected deny after threshold"),
        }
    }

    #[test]
    fn success_clears_the_record() {
        let limiter = limiter(2);
        limiter.record_failure("1.2.3.4", "alice");
        limiter.record_success("1.2.3.4", "alice");
        assert_eq!(limiter.allow("1.2.3.4", "alice"), Decision::Allow);
    }

    #[test]
    fn distinct_keys_do_not_interfere() {
        let limiter = limiter(1);
        limiter.record_failure("1.2.3.4", "alice");
        assert_eq!(limiter.allow("5.6.7.8", "alice"), Decision::Allow);
        assert_eq!(limiter.allow("1.2.3.4", "bob"), Decision::Allow);
    }

    #[test]
    fn cleanup_drops_only_fully_expired_records() {
        let limiter = RateLimiter::new(RateLimiterConfig {
            max_attempts: 1,
            window: Duration::from_millis(1),
            lockout: Duration::from_millis(1),
            cleanup_interval: Duration::from_secs(5 * 60),
        });
        limiter.record_failure("1.2.3.4", "alice");
        std::thread::sleep(Duration::from_millis(5));
        limiter.cleanup();
        assert!(limiter.records.lock().unwrap().is_empty());
    }
}
