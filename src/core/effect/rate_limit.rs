//! Fixed-window request counters for `rate_limit(...)` effects
//!
//! Counters live per bucket key (`bucket:all`, `bucket:sub:alice`, ...). Windows expire
//! lazily when a bucket is next touched. Idle buckets whose window has passed are swept
//! when a new key would grow the map past its sweep mark, so the map tracks live keys
//! rather than every key ever seen.

use crate::core::error::{RampartError, Result};
use crate::core::matcher::Value;
use ahash::AHashMap;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// Which rows increment the bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountMode {
    /// Rows that matched with effect allow
    Allow,
    /// Rows that matched with any decided effect
    Deny,
    /// Every row reached, matched or not
    All,
}

/// Request field a bucket is keyed on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BucketField {
    All,
    Sub,
    Obj,
    Act,
}

impl BucketField {
    fn name(self) -> &'static str {
        match self {
            BucketField::All => "all",
            BucketField::Sub => "sub",
            BucketField::Obj => "obj",
            BucketField::Act => "act",
        }
    }

    fn fallback_position(self) -> usize {
        match self {
            BucketField::All | BucketField::Sub => 0,
            BucketField::Obj => 1,
            BucketField::Act => 2,
        }
    }
}

/// Parsed `rate_limit(max, unit, count, bucket)`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimit {
    pub max: u64,
    pub window: Duration,
    pub count: CountMode,
    pub bucket: BucketField,
}

impl RateLimit {
    /// Parse the argument list of `rate_limit(...)`
    pub fn parse_args(args: &str) -> Result<Self> {
        let invalid = |message: String| RampartError::InvalidEffect(message);
        let parts: Vec<&str> = args.split(',').map(str::trim).collect();
        let [max, unit, count, bucket] = parts.as_slice() else {
            return Err(invalid(format!(
                "rate_limit expects 4 arguments, got {}",
                parts.len()
            )));
        };

        let max: u64 = max
            .parse()
            .map_err(|_| invalid(format!("rate_limit max must be a positive integer: {}", max)))?;
        if max == 0 {
            return Err(invalid("rate_limit max must be greater than zero".into()));
        }

        let window = match *unit {
            "second" => Duration::from_secs(1),
            "minute" => Duration::from_secs(60),
            "hour" => Duration::from_secs(3600),
            "day" => Duration::from_secs(86_400),
            other => return Err(invalid(format!("unknown rate_limit unit: {}", other))),
        };

        let count = match *count {
            "allow" => CountMode::Allow,
            "deny" => CountMode::Deny,
            "all" => CountMode::All,
            other => return Err(invalid(format!("unknown rate_limit count type: {}", other))),
        };

        let bucket = match *bucket {
            "all" => BucketField::All,
            "sub" => BucketField::Sub,
            "obj" => BucketField::Obj,
            "act" => BucketField::Act,
            other => return Err(invalid(format!("unknown rate_limit bucket: {}", other))),
        };

        Ok(RateLimit {
            max,
            window,
            count,
            bucket,
        })
    }

    /// Bucket key for one request
    ///
    /// The field is found by request token name (`r_sub`), falling back to position.
    pub fn bucket_key(&self, request_tokens: &[String], request: &[Value]) -> String {
        if self.bucket == BucketField::All {
            return "bucket:all".to_string();
        }
        let suffix = format!("_{}", self.bucket.name());
        let position = request_tokens
            .iter()
            .position(|token| token.ends_with(&suffix))
            .unwrap_or(self.bucket.fallback_position());
        let value = request.get(position).map(Value::to_string).unwrap_or_default();
        format!("bucket:{}:{}", self.bucket.name(), value)
    }
}

#[derive(Debug)]
struct Bucket {
    count: u64,
    window_start: Instant,
}

/// Bucket count at which the first sweep runs
const SWEEP_THRESHOLD: usize = 1024;

#[derive(Debug)]
struct Buckets {
    map: AHashMap<String, Arc<Mutex<Bucket>>>,
    sweep_at: usize,
}

impl Default for Buckets {
    fn default() -> Self {
        Self {
            map: AHashMap::new(),
            sweep_at: SWEEP_THRESHOLD,
        }
    }
}

impl Buckets {
    /// Drop buckets whose window has passed and that no caller currently holds
    fn sweep(&mut self, window: Duration, now: Instant) {
        let before = self.map.len();
        self.map.retain(|_, bucket| {
            Arc::strong_count(bucket) > 1 || now.duration_since(bucket.lock().window_start) < window
        });
        self.sweep_at = (self.map.len() * 2).max(SWEEP_THRESHOLD);
        debug!("Swept {} expired rate-limit buckets", before - self.map.len());
    }
}

/// Shared counter state for one effect
#[derive(Debug, Default)]
pub struct RateLimiter {
    buckets: RwLock<Buckets>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one event against `key`; true once the count exceeds `max` in the current window
    pub fn hit(&self, key: &str, max: u64, window: Duration) -> bool {
        let bucket = self.bucket(key, window);
        let mut bucket = bucket.lock();
        let now = Instant::now();
        if now.duration_since(bucket.window_start) >= window {
            bucket.count = 0;
            bucket.window_start = now;
        }
        bucket.count += 1;
        let exceeded = bucket.count > max;
        if exceeded {
            debug!("Rate limit exceeded for {} ({} > {})", key, bucket.count, max);
        }
        exceeded
    }

    /// Current count of a bucket, ignoring window expiry
    pub fn count(&self, key: &str) -> u64 {
        self.buckets
            .read()
            .map
            .get(key)
            .map_or(0, |bucket| bucket.lock().count)
    }

    /// Number of tracked buckets
    pub fn len(&self) -> usize {
        self.buckets.read().map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forget every bucket
    pub fn reset(&self) {
        *self.buckets.write() = Buckets::default();
    }

    fn bucket(&self, key: &str, window: Duration) -> Arc<Mutex<Bucket>> {
        if let Some(bucket) = self.buckets.read().map.get(key) {
            return Arc::clone(bucket);
        }
        let mut buckets = self.buckets.write();
        if !buckets.map.contains_key(key) && buckets.map.len() >= buckets.sweep_at {
            buckets.sweep(window, Instant::now());
        }
        Arc::clone(buckets.map.entry(key.to_string()).or_insert_with(|| {
            Arc::new(Mutex::new(Bucket {
                count: 0,
                window_start: Instant::now(),
            }))
        }))
    }
}
