use std::time::{Duration, Instant};

/// Milliseconds on the engine's monotonic clock.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Time(pub u32);

impl Time {
    /// Time passed since `since`, or `None` when the clock went backwards
    /// (wraparound), which callers treat as timed out.
    pub fn elapsed_since(self, since: Time) -> Option<Duration> {
        self.0
            .checked_sub(since.0)
            .map(|ms| Duration::from_millis(ms as u64))
    }

    /// True only when `since` lies less than `term` in the past.
    pub fn within(self, since: Time, term: Duration) -> bool {
        matches!(self.elapsed_since(since), Some(elapsed) if elapsed < term)
    }
}

/// Timer service backing [`Time`] on the host.
pub struct Clock {
    start: Instant,
}

impl Clock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn now(&self) -> Time {
        // u32 milliseconds wrap after ~49 days, `within` fails safe on wrap
        Time(self.start.elapsed().as_millis() as u32)
    }
}

/// Single layer-tap disambiguation timer shared by thumb, layer-tap and
/// mod-tap keys. Only one of them is expected to be mid-decision at a time.
#[derive(Clone, Copy, Debug, Default)]
pub struct SharedTapTimer {
    started_at: Option<Time>,
}

impl SharedTapTimer {
    pub fn start(&mut self, now: Time) {
        self.started_at = Some(now);
    }

    pub fn reset(&mut self) {
        self.started_at = None;
    }

    pub fn started_at(&self) -> Option<Time> {
        self.started_at
    }

    /// A stopped timer is never within the term.
    pub fn within(&self, now: Time, term: Duration) -> bool {
        self.started_at
            .is_some_and(|started| now.within(started, term))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TERM: Duration = Duration::from_millis(200);

    #[test]
    fn test_within_term() {
        assert!(Time(150).within(Time(100), TERM));
        assert!(Time(299).within(Time(100), TERM));
        assert!(!Time(300).within(Time(100), TERM));
    }

    #[test]
    fn test_wraparound_is_timed_out() {
        assert_eq!(Time(5).elapsed_since(Time(u32::MAX - 5)), None);
        assert!(!Time(5).within(Time(u32::MAX - 5), TERM));
    }

    #[test]
    fn test_shared_timer_lifecycle() {
        let mut timer = SharedTapTimer::default();
        assert!(!timer.within(Time(0), TERM));

        timer.start(Time(10));
        assert_eq!(timer.started_at(), Some(Time(10)));
        assert!(timer.within(Time(100), TERM));
        assert!(!timer.within(Time(210), TERM));

        timer.reset();
        assert!(!timer.within(Time(11), TERM));
    }
}
