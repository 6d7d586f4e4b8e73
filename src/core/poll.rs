//! Bounded polling with a definite outcome.

use std::thread;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    Ready { attempts: u32, waited: Duration },
    TimedOut { attempts: u32, waited: Duration },
}

impl PollOutcome {
    pub fn is_ready(&self) -> bool {
        matches!(self, PollOutcome::Ready { .. })
    }

    pub fn waited(&self) -> Duration {
        match self {
            PollOutcome::Ready { waited, .. } | PollOutcome::TimedOut { waited, .. } => *waited,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub timeout: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(500),
            timeout: Duration::from_secs(30),
        }
    }
}

/// Calls `probe` until it returns true or `policy.timeout` elapses. The
/// probe always runs at least once.
pub fn poll_until<F>(policy: PollPolicy, mut probe: F) -> PollOutcome
where
    F: FnMut() -> bool,
{
    let start = Instant::now();
    let mut attempts = 0;
    loop {
        attempts += 1;
        if probe() {
            return PollOutcome::Ready {
                attempts,
                waited: start.elapsed(),
            };
        }
        let waited = start.elapsed();
        if waited >= policy.timeout {
            return PollOutcome::TimedOut { attempts, waited };
        }
        let remaining = policy.timeout - waited;
        thread::sleep(policy.interval.min(remaining));
    }
}
