//! Request rate limiting and DoS protection.
//!
//! Three token-bucket layers are consulted in order — global, per-IP,
//! per-connection — and a rejection at any layer surfaces to the client as
//! JUKEBOX. A second dimension limits expensive operation classes (large
//! READ/WRITE, READDIR) per IP, and MOUNT is counted per minute over a
//! sliding window. A third dimension budgets live file handles globally and
//! per IP.
//!
//! Bucket maps use `DashMap`; each bucket mutates under its shard lock and
//! the hot path never touches a process-wide lock. A background sweep
//! discards buckets that have refilled to capacity.

use std::collections::{HashMap, VecDeque};
use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::debug;

use crate::config::RateLimitConfig;

/// Operation classes with their own per-IP ceilings.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum OpClass {
    /// READ larger than 64 KiB.
    LargeRead,
    /// WRITE larger than 64 KiB.
    LargeWrite,
    ReadDir,
    Mount,
}

/// Payload size above which READ/WRITE count as large.
pub const LARGE_IO_BYTES: u32 = 64 * 1024;

/// Which budget an allocation ran into.
#[derive(Copy, Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum BudgetExceeded {
    #[error("global file handle budget exhausted")]
    Global,
    #[error("per-client file handle budget exhausted")]
    PerIp,
}

/// Classic token bucket: refill = min(max, tokens + elapsed * rate), then
/// spend one token if available.
#[derive(Debug)]
pub struct TokenBucket {
    tokens: f64,
    max: f64,
    rate: f64,
    last: Instant,
}

impl TokenBucket {
    pub fn new(rate: u32, burst: u32) -> TokenBucket {
        let max = f64::from(burst.max(1));
        TokenBucket { tokens: max, max, rate: f64::from(rate.max(1)), last: Instant::now() }
    }

    pub fn allow(&mut self) -> bool {
        self.allow_n(1.0)
    }

    pub fn allow_n(&mut self, n: f64) -> bool {
        self.refill();
        if self.tokens >= n {
            self.tokens -= n;
            true
        } else {
            false
        }
    }

    /// True when the bucket holds its full burst; such buckets carry no
    /// state worth keeping and may be discarded.
    pub fn is_full(&mut self) -> bool {
        self.refill();
        self.tokens >= self.max
    }

    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last).as_secs_f64();
        self.last = now;
        self.tokens = (self.tokens + elapsed * self.rate).min(self.max);
    }

    #[cfg(test)]
    fn drain(&mut self) {
        self.tokens = 0.0;
    }
}

/// Sliding window admitting at most `max` events per `window`; used where a
/// true count matters (MOUNT per minute).
#[derive(Debug)]
pub struct SlidingWindow {
    stamps: VecDeque<Instant>,
    window: Duration,
    max: usize,
}

impl SlidingWindow {
    pub fn new(max: u32, window: Duration) -> SlidingWindow {
        SlidingWindow { stamps: VecDeque::new(), window, max: max.max(1) as usize }
    }

    pub fn allow(&mut self) -> bool {
        let now = Instant::now();
        while let Some(front) = self.stamps.front() {
            if now.duration_since(*front) > self.window {
                self.stamps.pop_front();
            } else {
                break;
            }
        }
        if self.stamps.len() < self.max {
            self.stamps.push_back(now);
            true
        } else {
            false
        }
    }

    pub fn is_idle(&self) -> bool {
        match self.stamps.back() {
            Some(last) => last.elapsed() > self.window,
            None => true,
        }
    }
}

#[derive(Debug, Default)]
struct HandleCounts {
    global: u64,
    per_ip: HashMap<IpAddr, u64>,
}

/// The combined limiter. One instance per server.
pub struct RateLimiter {
    cfg: RateLimitConfig,
    global: Mutex<TokenBucket>,
    per_ip: DashMap<IpAddr, TokenBucket>,
    per_conn: DashMap<u64, TokenBucket>,
    per_op: DashMap<(IpAddr, OpClass), TokenBucket>,
    mounts: DashMap<IpAddr, SlidingWindow>,
    handles: Mutex<HandleCounts>,
    /// Requests refused by any bucket since start.
    pub rejected: AtomicU64,
}

impl RateLimiter {
    pub fn new(cfg: RateLimitConfig) -> RateLimiter {
        let global = TokenBucket::new(
            cfg.global_requests_per_second,
            // Burst equals the rate for the global bucket.
            cfg.global_requests_per_second,
        );
        RateLimiter {
            global: Mutex::new(global),
            per_ip: DashMap::new(),
            per_conn: DashMap::new(),
            per_op: DashMap::new(),
            mounts: DashMap::new(),
            handles: Mutex::new(HandleCounts::default()),
            rejected: AtomicU64::new(0),
            cfg,
        }
    }

    pub fn enabled(&self) -> bool {
        self.cfg.enabled
    }

    /// Admission check for one request: global, then per-IP, then
    /// per-connection. Order matters so a flood from one client drains its
    /// own buckets before the global one.
    pub fn allow_request(&self, ip: IpAddr, conn_id: u64) -> bool {
        if !self.cfg.enabled {
            return true;
        }
        if !self.global.lock().unwrap().allow() {
            return self.reject();
        }
        let allowed = self
            .per_ip
            .entry(ip)
            .or_insert_with(|| {
                TokenBucket::new(self.cfg.per_ip_requests_per_second, self.cfg.per_ip_burst_size)
            })
            .allow();
        if !allowed {
            return self.reject();
        }
        let allowed = self
            .per_conn
            .entry(conn_id)
            .or_insert_with(|| {
                TokenBucket::new(
                    self.cfg.per_connection_requests_per_second,
                    self.cfg.per_connection_burst_size,
                )
            })
            .allow();
        if !allowed {
            return self.reject();
        }
        true
    }

    /// Per-operation-class, per-IP check. MOUNT uses the sliding window;
    /// the rest use token buckets at the configured per-second rates.
    pub fn allow_op(&self, ip: IpAddr, class: OpClass) -> bool {
        if !self.cfg.enabled {
            return true;
        }
        let allowed = match class {
            OpClass::Mount => self
                .mounts
                .entry(ip)
                .or_insert_with(|| {
                    SlidingWindow::new(self.cfg.mounts_per_minute, Duration::from_secs(60))
                })
                .allow(),
            class => {
                let rate = match class {
                    OpClass::LargeRead | OpClass::LargeWrite => {
                        self.cfg.large_io_per_ip_per_second
                    }
                    OpClass::ReadDir => self.cfg.readdir_per_ip_per_second,
                    OpClass::Mount => unreachable!(),
                };
                self.per_op
                    .entry((ip, class))
                    .or_insert_with(|| TokenBucket::new(rate, rate))
                    .allow()
            }
        };
        if !allowed {
            return self.reject();
        }
        true
    }

    /// Charges one file handle to `ip`. Both ceilings are checked before
    /// either counter moves.
    pub fn allocate_handle(&self, ip: IpAddr) -> Result<(), BudgetExceeded> {
        let mut counts = self.handles.lock().unwrap();
        if counts.global >= self.cfg.file_handles_global {
            return Err(BudgetExceeded::Global);
        }
        let per_ip = counts.per_ip.entry(ip).or_insert(0);
        if *per_ip >= self.cfg.file_handles_per_ip {
            return Err(BudgetExceeded::PerIp);
        }
        *per_ip += 1;
        counts.global += 1;
        Ok(())
    }

    /// Refunds one file handle charged to `ip`. Every release path,
    /// including error paths, must come through here exactly once.
    pub fn release_handle(&self, ip: IpAddr) {
        let mut counts = self.handles.lock().unwrap();
        debug_assert!(counts.global > 0, "handle budget released below zero");
        counts.global = counts.global.saturating_sub(1);
        if let Some(n) = counts.per_ip.get_mut(&ip) {
            debug_assert!(*n > 0, "per-ip handle budget released below zero");
            *n = n.saturating_sub(1);
            if *n == 0 {
                counts.per_ip.remove(&ip);
            }
        }
    }

    pub fn handle_counts(&self) -> (u64, usize) {
        let counts = self.handles.lock().unwrap();
        (counts.global, counts.per_ip.len())
    }

    /// Forgets the per-connection bucket of a closed connection.
    pub fn drop_connection(&self, conn_id: u64) {
        self.per_conn.remove(&conn_id);
    }

    /// Discards buckets that have refilled to capacity and idle mount
    /// windows. Run periodically from [`spawn_cleanup`].
    pub fn cleanup(&self) {
        self.per_ip.retain(|_, bucket| !bucket.is_full());
        self.per_op.retain(|_, bucket| !bucket.is_full());
        self.mounts.retain(|_, window| !window.is_idle());
        debug!(
            per_ip = self.per_ip.len(),
            per_op = self.per_op.len(),
            "rate limiter sweep complete"
        );
    }

    /// Spawns the periodic cleanup task; it stops when the limiter is
    /// dropped by the rest of the server.
    pub fn spawn_cleanup(self: Arc<Self>, every: Duration) {
        let weak = Arc::downgrade(&self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match weak.upgrade() {
                    Some(limiter) => limiter.cleanup(),
                    None => break,
                }
            }
        });
    }

    fn reject(&self) -> bool {
        self.rejected.fetch_add(1, Ordering::Relaxed);
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> RateLimitConfig {
        RateLimitConfig {
            enabled: true,
            global_requests_per_second: 1000,
            per_ip_requests_per_second: 10,
            per_ip_burst_size: 10,
            per_connection_requests_per_second: 1000,
            per_connection_burst_size: 1000,
            large_io_per_ip_per_second: 2,
            readdir_per_ip_per_second: 2,
            mounts_per_minute: 3,
            file_handles_global: 5,
            file_handles_per_ip: 3,
        }
    }

    fn ip(last: u8) -> IpAddr {
        IpAddr::from([203, 0, 113, last])
    }

    #[test]
    fn bucket_burst_then_deny() {
        let mut bucket = TokenBucket::new(10, 10);
        for _ in 0..10 {
            assert!(bucket.allow());
        }
        assert!(!bucket.allow());
    }

    #[test]
    fn bucket_refills_over_time() {
        let mut bucket = TokenBucket::new(1000, 1000);
        bucket.drain();
        assert!(!bucket.allow());
        std::thread::sleep(Duration::from_millis(20));
        assert!(bucket.allow());
    }

    #[test]
    fn per_ip_limit_admits_exactly_burst() {
        let limiter = RateLimiter::new(config());
        let mut admitted = 0;
        for _ in 0..30 {
            if limiter.allow_request(ip(1), 1) {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 10);
        // A different client is unaffected.
        assert!(limiter.allow_request(ip(2), 2));
    }

    #[test]
    fn sliding_window_counts_mounts() {
        let limiter = RateLimiter::new(config());
        assert!(limiter.allow_op(ip(1), OpClass::Mount));
        assert!(limiter.allow_op(ip(1), OpClass::Mount));
        assert!(limiter.allow_op(ip(1), OpClass::Mount));
        assert!(!limiter.allow_op(ip(1), OpClass::Mount));
        assert!(limiter.allow_op(ip(2), OpClass::Mount));
    }

    #[test]
    fn handle_budget_ceilings() {
        let limiter = RateLimiter::new(config());
        for _ in 0..3 {
            limiter.allocate_handle(ip(1)).unwrap();
        }
        assert_eq!(limiter.allocate_handle(ip(1)), Err(BudgetExceeded::PerIp));
        limiter.allocate_handle(ip(2)).unwrap();
        limiter.allocate_handle(ip(2)).unwrap();
        assert_eq!(limiter.allocate_handle(ip(3)), Err(BudgetExceeded::Global));
        limiter.release_handle(ip(1));
        limiter.allocate_handle(ip(3)).unwrap();
        assert_eq!(limiter.handle_counts().0, 5);
    }

    #[test]
    fn disabled_limiter_admits_everything() {
        let mut cfg = config();
        cfg.enabled = false;
        let limiter = RateLimiter::new(cfg);
        for _ in 0..1000 {
            assert!(limiter.allow_request(ip(1), 1));
            assert!(limiter.allow_op(ip(1), OpClass::Mount));
        }
    }

    #[test]
    fn cleanup_discards_full_buckets() {
        let limiter = RateLimiter::new(config());
        assert!(limiter.allow_request(ip(1), 1));
        std::thread::sleep(Duration::from_millis(1100));
        limiter.cleanup();
        assert!(limiter.per_ip.is_empty());
    }
}
