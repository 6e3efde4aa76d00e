//! Idle-time fallback: longest common substring against the page.

use std::time::{Duration, Instant};

/// Host-provided idle window, in the spirit of `requestIdleCallback`.
pub trait IdleDeadline {
    fn time_remaining(&self) -> Duration;

    fn is_expired(&self) -> bool {
        self.time_remaining().is_zero()
    }
}

/// Deadline measured from construction with the monotonic clock.
#[derive(Clone, Copy, Debug)]
pub struct FrameBudget {
    deadline: Instant,
}

impl FrameBudget {
    pub fn new(budget: Duration) -> Self {
        Self {
            deadline: Instant::now() + budget,
        }
    }
}

impl IdleDeadline for FrameBudget {
    fn time_remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }
}

/// Deadline that is always exhausted.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoIdleTime;

impl IdleDeadline for NoIdleTime {
    fn time_remaining(&self) -> Duration {
        Duration::ZERO
    }
}

/// Longest common run between `needle` and `haystack`.
///
/// Haystack positions flagged in `blocked` never take part in a run.
/// Returns `(length, needle_start, haystack_start)`; the earliest haystack
/// position wins ties.
pub(crate) fn longest_common_substring(
    needle: &[char],
    haystack: &[char],
    blocked: &[bool],
) -> Option<(usize, usize, usize)> {
    if needle.is_empty() || haystack.is_empty() {
        return None;
    }
    let width = needle.len() + 1;
    let mut prev = vec![0u32; width];
    let mut cur = vec![0u32; width];
    let mut best = (0usize, 0usize, 0usize);
    for (i, hay) in haystack.iter().enumerate() {
        let is_blocked = blocked.get(i).copied().unwrap_or(false);
        cur[0] = 0;
        for j in 1..width {
            cur[j] = if !is_blocked && needle[j - 1] == *hay {
                prev[j - 1] + 1
            } else {
                0
            };
            let run = cur[j] as usize;
            if run > best.0 {
                best = (run, j - run, i + 1 - run);
            }
        }
        std::mem::swap(&mut prev, &mut cur);
    }
    (best.0 > 0).then_some(best)
}
