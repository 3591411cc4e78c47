//! Reconnect delay policy.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How the delay grows between reconnect attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffKind {
    /// base * 2^(attempt-1), capped at `max_delay_ms`.
    #[default]
    Exponential,
    /// Always `base_delay_ms`.
    Fixed,
}

/// Reconnect backoff configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackoffConfig {
    #[serde(default)]
    pub kind: BackoffKind,
    /// Delay before the first retry.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Upper bound for exponential growth.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Random jitter added on top (0 disables).
    #[serde(default = "default_jitter_ms")]
    pub jitter_ms: u64,
}

fn default_base_delay_ms() -> u64 {
    1_000
}

fn default_max_delay_ms() -> u64 {
    60_000
}

fn default_jitter_ms() -> u64 {
    250
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            kind: BackoffKind::default(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter_ms: default_jitter_ms(),
        }
    }
}

impl BackoffConfig {
    /// Fixed delay without jitter.
    pub fn fixed(delay_ms: u64) -> Self {
        Self {
            kind: BackoffKind::Fixed,
            base_delay_ms: delay_ms,
            max_delay_ms: delay_ms,
            jitter_ms: 0,
        }
    }

    /// Delay before reconnect attempt `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let delay = match self.kind {
            BackoffKind::Fixed => self.base_delay_ms,
            BackoffKind::Exponential => {
                // attempt=1 -> base, attempt=2 -> 2*base, attempt=3 -> 4*base
                let exponent = attempt.saturating_sub(1).min(20);
                self.base_delay_ms
                    .saturating_mul(1u64 << exponent)
                    .min(self.max_delay_ms)
            }
        };
        Duration::from_millis(delay + rand_jitter(self.jitter_ms))
    }
}

/// Pseudo-random jitter in `[0, max_ms)`.
fn rand_jitter(max_ms: u64) -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    if max_ms == 0 {
        return 0;
    }
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    u64::from(nanos) % max_ms
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_jitter(kind: BackoffKind) -> BackoffConfig {
        BackoffConfig {
            kind,
            base_delay_ms: 100,
            max_delay_ms: 1_000,
            jitter_ms: 0,
        }
    }

    #[test]
    fn test_exponential_growth_is_capped() {
        let cfg = no_jitter(BackoffKind::Exponential);

        assert_eq!(cfg.delay_for(1), Duration::from_millis(100));
        assert_eq!(cfg.delay_for(2), Duration::from_millis(200));
        assert_eq!(cfg.delay_for(3), Duration::from_millis(400));
        assert_eq!(cfg.delay_for(5), Duration::from_millis(1_000));
        assert_eq!(cfg.delay_for(u32::MAX), Duration::from_millis(1_000));
    }

    #[test]
    fn test_fixed_delay() {
        let cfg = no_jitter(BackoffKind::Fixed);
        assert_eq!(cfg.delay_for(1), Duration::from_millis(100));
        assert_eq!(cfg.delay_for(7), Duration::from_millis(100));
        assert_eq!(BackoffConfig::fixed(5).delay_for(3), Duration::from_millis(5));
    }

    #[test]
    fn test_jitter_bounded() {
        let cfg = BackoffConfig {
            jitter_ms: 50,
            ..no_jitter(BackoffKind::Fixed)
        };
        let d = cfg.delay_for(1);
        assert!(d >= Duration::from_millis(100));
        assert!(d < Duration::from_millis(150));
    }

    #[test]
    fn test_deserialize_defaults() {
        let cfg: BackoffConfig = toml::from_str("kind = \"fixed\"").unwrap();
        assert_eq!(cfg.kind, BackoffKind::Fixed);
        assert_eq!(cfg.base_delay_ms, 1_000);
        assert_eq!(cfg.max_delay_ms, 60_000);
    }
}
