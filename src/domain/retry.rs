use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

use super::{ProxyServer, ResolutionResult};

/// Backoff applied to proxies that failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Bad window after the first failure, in seconds
    #[serde(default = "default_base_delay")]
    pub base_delay_secs: u64,
    /// Upper bound of the bad window, in seconds
    #[serde(default = "default_max_delay")]
    pub max_delay_secs: u64,
}

/// No proxy is kept out for longer than a year, whatever the settings say.
const LONGEST_DELAY_SECS: u64 = 365 * 24 * 60 * 60;

fn default_base_delay() -> u64 {
    5 * 60
}

fn default_max_delay() -> u64 {
    30 * 60
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay_secs: default_base_delay(),
            max_delay_secs: default_max_delay(),
        }
    }
}

impl RetryPolicy {
    /// Window for the `failures`-th consecutive failure: doubles each time,
    /// capped at `max_delay_secs` and at one year.
    pub fn delay_for(&self, failures: u32) -> Duration {
        let max = self.max_delay_secs.max(self.base_delay_secs).min(LONGEST_DELAY_SECS);
        let exponent = failures.saturating_sub(1).min(32);
        let secs = self.base_delay_secs.saturating_mul(1u64 << exponent).min(max);
        Duration::from_secs(secs)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryEntry {
    pub bad_until: Instant,
    pub failure_count: u32,
}

impl RetryEntry {
    pub fn is_bad(&self, now: Instant) -> bool {
        now < self.bad_until
    }
}

/// Proxies recently marked bad. A proxy without an entry is good; expired
/// entries are kept so repeated failures keep growing the window.
#[derive(Debug, Default)]
pub struct RetryRegistry {
    policy: RetryPolicy,
    entries: HashMap<ProxyServer, RetryEntry>,
}

impl RetryRegistry {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            entries: HashMap::new(),
        }
    }

    /// Record a failure of `proxy` and return how long it stays bad.
    /// Direct connections are never recorded.
    pub fn mark_bad(&mut self, proxy: &ProxyServer, now: Instant) -> Duration {
        if proxy.is_direct() {
            return Duration::ZERO;
        }

        let entry = self.entries.entry(proxy.clone()).or_insert(RetryEntry {
            bad_until: now,
            failure_count: 0,
        });
        entry.failure_count = entry.failure_count.saturating_add(1);
        let delay = self.policy.delay_for(entry.failure_count);
        entry.bad_until = now.checked_add(delay).unwrap_or(entry.bad_until.max(now));

        tracing::debug!(
            "Marked proxy {} bad for {:?} (failure #{})",
            proxy,
            delay,
            entry.failure_count
        );
        delay
    }

    pub fn is_bad(&self, proxy: &ProxyServer, now: Instant) -> bool {
        self.entries.get(proxy).is_some_and(|entry| entry.is_bad(now))
    }

    pub fn get(&self, proxy: &ProxyServer) -> Option<&RetryEntry> {
        self.entries.get(proxy)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> Vec<(ProxyServer, RetryEntry)> {
        self.entries.iter().map(|(k, v)| (k.clone(), *v)).collect()
    }

    /// Reorder `result` so that currently bad proxies come last.
    pub fn filter(&self, result: &mut ResolutionResult, now: Instant) {
        result.deprioritize(|proxy| self.is_bad(proxy, now));
    }
}
