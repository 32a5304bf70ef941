//! Configuration for sync orchestrators.

use rowsync_protocol::ConflictPolicy;
use std::path::PathBuf;
use std::time::Duration;

/// Options for one orchestrator (either personality).
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Maximum estimated size of one batch part, in bytes.
    pub batch_size_bytes: usize,
    /// Directory for spooling multi-part batches; `None` keeps parts in
    /// memory regardless of count.
    pub spool_dir: Option<PathBuf>,
    /// Conflict policy. Only the hub's policy is enforced; clients learn it
    /// during scope agreement.
    pub conflict_policy: ConflictPolicy,
    /// Skip per-row foreign-key checks during apply. Safe when the
    /// destination store defers constraints to commit.
    pub disable_constraints: bool,
    /// Purge old tracking metadata after each successful cycle.
    pub clean_metadata: bool,
    /// Retry behavior for transport steps.
    pub retry: RetryConfig,
}

impl SyncOptions {
    /// Creates options with defaults.
    pub fn new() -> Self {
        Self {
            batch_size_bytes: 64 * 1024,
            spool_dir: None,
            conflict_policy: ConflictPolicy::default(),
            disable_constraints: false,
            clean_metadata: false,
            retry: RetryConfig::default(),
        }
    }

    /// Sets the maximum batch part size.
    pub fn with_batch_size_bytes(mut self, size: usize) -> Self {
        self.batch_size_bytes = size;
        self
    }

    /// Sets the spool directory for multi-part batches.
    pub fn with_spool_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.spool_dir = Some(dir.into());
        self
    }

    /// Sets the conflict policy.
    pub fn with_conflict_policy(mut self, policy: ConflictPolicy) -> Self {
        self.conflict_policy = policy;
        self
    }

    /// Disables per-row foreign-key checks during apply.
    pub fn with_constraints_disabled(mut self) -> Self {
        self.disable_constraints = true;
        self
    }

    /// Enables tracking-metadata cleanup after successful cycles.
    pub fn with_clean_metadata(mut self) -> Self {
        self.clean_metadata = true;
        self
    }

    /// Sets the retry configuration.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration for retry behavior on transport steps.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts (1 = no retry).
    pub max_attempts: u32,
    /// Initial delay between attempts.
    pub initial_delay: Duration,
    /// Maximum delay between attempts.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
    /// Whether to add jitter to delays.
    pub add_jitter: bool,
}

impl RetryConfig {
    /// Creates a new retry configuration.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            add_jitter: true,
        }
    }

    /// Creates a configuration with no retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
            add_jitter: false,
        }
    }

    /// Sets the initial delay.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the maximum delay.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Calculates the delay for a given attempt (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let base_delay = self.initial_delay.as_secs_f64()
            * self.backoff_multiplier.powi(attempt.saturating_sub(1) as i32);

        let delay_secs = base_delay.min(self.max_delay.as_secs_f64());

        if self.add_jitter {
            // Up to 25% jitter.
            let jitter = delay_secs * 0.25 * pseudo_jitter();
            Duration::from_secs_f64(delay_secs + jitter)
        } else {
            Duration::from_secs_f64(delay_secs)
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(3)
    }
}

/// Simple deterministic "jitter" (no external RNG dependency).
fn pseudo_jitter() -> f64 {
    use std::time::SystemTime;
    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();
    (nanos % 1000) as f64 / 1000.0
}
