use std::time::Duration;

use tokio::time::Instant;

/// Tick indexes wrap back to zero at this bound.
pub const TICK_WRAP: u64 = 10_000;

/// Index of the tick after `tick`.
pub fn next_tick(tick: u64) -> u64 {
    (tick + 1) % TICK_WRAP
}

/// Fixed-rate tick source.
///
/// Deadlines advance by exactly one period from the previous deadline, so the
/// rate does not drift with the time spent rendering. After a tick that
/// overran, the next deadline is pulled up to the present instead of firing a
/// burst of ticks to catch up.
#[derive(Debug, Clone)]
pub struct FrameClock {
    period: Duration,
    next: Instant,
}

impl FrameClock {
    pub fn new(period: Duration) -> Self {
        Self::starting_at(period, Instant::now())
    }

    pub fn starting_at(period: Duration, start: Instant) -> Self {
        Self { period, next: start }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Advances the deadline and returns how long to sleep from `now`.
    pub fn delay_until_next(&mut self, now: Instant) -> Duration {
        self.next += self.period;
        if self.next < now {
            self.next = now;
        }
        self.next - now
    }

    /// Sleeps until the next deadline.
    pub async fn tick(&mut self) {
        let delay = self.delay_until_next(Instant::now());
        tokio::time::sleep(delay).await;
    }
}

/// Highest external-event timestamp already applied.
///
/// The first non-empty batch only primes the watermark: events that existed
/// before this client started watching are treated as stale.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Watermark {
    last: Option<f64>,
}

impl Watermark {
    pub fn new() -> Self {
        Self::default()
    }

    /// A watermark that is already primed; the next batch is not discarded.
    pub fn starting_at(timestamp: f64) -> Self {
        Self {
            last: Some(timestamp),
        }
    }

    pub fn last(&self) -> Option<f64> {
        self.last
    }

    /// Returns the events newer than the watermark, in their original order,
    /// and raises the watermark to the newest one.
    pub fn fresh<T>(
        &mut self,
        events: impl IntoIterator<Item = T>,
        timestamp: impl Fn(&T) -> f64,
    ) -> Vec<T> {
        let events: Vec<T> = events.into_iter().collect();
        let newest = events
            .iter()
            .map(&timestamp)
            .fold(None, |max: Option<f64>, ts| Some(max.map_or(ts, |m| m.max(ts))));
        let Some(newest) = newest else {
            return Vec::new();
        };
        let Some(last) = self.last else {
            self.last = Some(newest);
            return Vec::new();
        };
        self.last = Some(last.max(newest));
        events.into_iter().filter(|event| timestamp(event) > last).collect()
    }
}
