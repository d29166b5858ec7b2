// THEORY:
// The `HistoryBuffer` gives a tracker its memory. It is a sliding window over the
// most recent samples of one blob, bounded two ways at once: by count and by age.
//
// Key architectural principles:
// 1.  **Front Eviction Only**: Samples leave strictly oldest first. The buffer never
//     reorders, so the back is always the newest observation.
// 2.  **Self-Clocked**: The age bound is measured against the timestamp of the sample
//     just appended. The buffer never asks the system clock what time it is.
// 3.  **Read-Only Views**: Consumers read through `latest` and `window`. Both fail
//     with `EmptyHistory` instead of silently returning fewer samples.

use crate::core_modules::timed_sample::Timestamped;
use crate::error::{Result, TrackingError};
use std::collections::VecDeque;
use std::collections::vec_deque::Iter;

/// A time- and length-bounded sequence of samples, oldest first.
#[derive(Debug, Clone)]
pub struct HistoryBuffer<T> {
    samples: VecDeque<T>,
    /// Upper bound on the number of retained samples.
    max_length: usize,
    /// Upper bound, in seconds, on the age of the oldest retained sample.
    max_age: f64,
}

impl<T: Timestamped> HistoryBuffer<T> {
    pub fn new(max_length: usize, max_age: f64) -> Self {
        Self {
            samples: VecDeque::with_capacity(max_length.min(1024)),
            max_length,
            max_age,
        }
    }

    /// Pushes a sample to the back, then evicts from the front until both bounds hold.
    pub fn append(&mut self, sample: T) {
        let now = sample.timestamp();
        self.samples.push_back(sample);
        self.evict(now);
    }

    /// Drops samples from the front while the buffer is too long or its oldest
    /// sample is older than `max_age` relative to `now`.
    pub fn evict(&mut self, now: f64) {
        while self.samples.len() > self.max_length {
            self.samples.pop_front();
        }
        while let Some(front) = self.samples.front() {
            if now - front.timestamp() > self.max_age {
                self.samples.pop_front();
            } else {
                break;
            }
        }
    }

    pub fn latest(&self) -> Result<&T> {
        self.samples.back().ok_or(TrackingError::EmptyHistory {
            requested: 1,
            available: 0,
        })
    }

    /// The `n` most recent samples, oldest first.
    pub fn window(&self, n: usize) -> Result<Iter<'_, T>> {
        let available = self.samples.len();
        if n > available {
            return Err(TrackingError::EmptyHistory {
                requested: n,
                available,
            });
        }
        Ok(self.samples.range(available - n..))
    }

    pub fn iter(&self) -> Iter<'_, T> {
        self.samples.iter()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn max_length(&self) -> usize {
        self.max_length
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_modules::timed_sample::TimedSample;
    use nalgebra::Point2;

    fn sample(i: usize, timestamp: f64) -> TimedSample {
        TimedSample::new(Point2::new(i as f64, 0.0), timestamp)
    }

    #[test]
    fn length_bound_holds_after_every_append() {
        let mut history = HistoryBuffer::new(5, 1e6);
        for i in 0..23 {
            history.append(sample(i, i as f64 * 0.03));
            assert!(history.len() <= 5);
            assert_eq!(history.latest().unwrap().position.x, i as f64);
        }
        // Oldest first, newest last.
        let xs: Vec<f64> = history.iter().map(|s| s.position.x).collect();
        assert_eq!(xs, vec![18.0, 19.0, 20.0, 21.0, 22.0]);
    }

    #[test]
    fn age_bound_holds_after_every_append() {
        let mut history = HistoryBuffer::new(100, 1.0);
        let mut t = 0.0;
        for i in 0..60 {
            // Irregular cadence, including a long gap.
            t += if i == 30 { 2.5 } else { 0.07 };
            history.append(sample(i, t));
            let oldest = history.iter().next().unwrap().timestamp;
            assert!(t - oldest <= 1.0);
        }
        // The gap flushed everything older than the sample that followed it.
        assert!(history.iter().all(|s| s.position.x >= 30.0));
    }

    #[test]
    fn window_returns_most_recent_samples_oldest_first() {
        let mut history = HistoryBuffer::new(10, 1e6);
        for i in 0..6 {
            history.append(sample(i, i as f64));
        }
        let xs: Vec<f64> = history.window(3).unwrap().map(|s| s.position.x).collect();
        assert_eq!(xs, vec![3.0, 4.0, 5.0]);
        assert_eq!(history.window(6).unwrap().len(), 6);
    }

    #[test]
    fn views_fail_when_too_short() {
        let mut history: HistoryBuffer<TimedSample> = HistoryBuffer::new(10, 1e6);
        assert!(matches!(
            history.latest(),
            Err(TrackingError::EmptyHistory { requested: 1, available: 0 })
        ));

        history.append(sample(0, 0.0));
        assert!(matches!(
            history.window(2),
            Err(TrackingError::EmptyHistory { requested: 2, available: 1 })
        ));
    }
}
