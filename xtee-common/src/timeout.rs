// Copyright 2021-Present
// SPDX-License-Identifier: Apache-2.0

use std::time::{Duration, Instant};

/// Tracks a monotonic deadline relative to its own construction time.
///
/// Shared by the non-blocking reaper and the bitrate controller's
/// cooperative sleep so both can bound how long they're willing to keep
/// polling without duplicating `Instant` bookkeeping.
pub struct Deadline {
    start_time: Instant,
    budget: Duration,
}

impl Deadline {
    /// Smallest amount of slack granted once the nominal budget is spent, so
    /// callers get a few more scheduler slices instead of a hard zero.
    const MINIMUM_SLACK: Duration = Duration::from_millis(160);

    pub fn new(budget: Duration) -> Self {
        Self {
            start_time: Instant::now(),
            budget,
        }
    }

    pub fn remaining(&self) -> Duration {
        let elapsed = self.start_time.elapsed();
        if elapsed >= self.budget {
            Self::MINIMUM_SLACK
        } else {
            (self.budget - elapsed).max(Self::MINIMUM_SLACK)
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    pub fn expired(&self) -> bool {
        self.start_time.elapsed() >= self.budget
    }

    pub fn budget(&self) -> Duration {
        self.budget
    }
}

impl std::fmt::Debug for Deadline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Deadline")
            .field("elapsed", &self.elapsed())
            .field("budget", &self.budget)
            .field("remaining", &self.remaining())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remaining_starts_near_budget() {
        let budget = Duration::from_secs(5);
        let d = Deadline::new(budget);
        assert!(d.elapsed() < Duration::from_millis(100));
        assert!(d.remaining() >= Deadline::MINIMUM_SLACK);
    }

    #[test]
    fn remaining_floors_at_minimum_slack_past_budget() {
        let d = Deadline::new(Duration::from_millis(1));
        std::thread::sleep(Duration::from_millis(20));
        assert!(d.expired());
        assert_eq!(d.remaining(), Deadline::MINIMUM_SLACK);
    }
}
