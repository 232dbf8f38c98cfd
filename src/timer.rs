///
/// timer.rs
///
/// Restartable repeating timer for `select!` loops.
///
use std::time::Duration;

use tokio::time::{Instant, Interval, MissedTickBehavior, interval_at};

/// Shortest period an interval is created with.
const MIN_PERIOD: Duration = Duration::from_millis(1);

#[derive(Debug)]
pub struct RepeatingTimer {
    period: Duration,
    interval: Option<Interval>,
}

impl RepeatingTimer {
    /// Creates a stopped timer.
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            interval: None,
        }
    }

    /// (Re)starts the timer. The first tick is one full period from now.
    ///
    /// A zero period is raised to one millisecond.
    pub fn start(&mut self) {
        let period = self.period.max(MIN_PERIOD);
        let mut interval = interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.interval = Some(interval);
    }

    pub fn start_with(&mut self, period: Duration) {
        self.period = period;
        self.start();
    }

    /// Stops the timer. Safe to call when already stopped.
    pub fn stop(&mut self) {
        self.interval = None;
    }

    pub fn is_active(&self) -> bool {
        self.interval.is_some()
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Waits for the next tick. Never completes while the timer is stopped.
    pub async fn tick(&mut self) -> Instant {
        match self.interval.as_mut() {
            Some(interval) => interval.tick().await,
            None => std::future::pending().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn first_tick_after_one_period() {
        let mut timer = RepeatingTimer::new(Duration::from_millis(250));
        let start = Instant::now();
        timer.start();
        let at = timer.tick().await;
        assert_eq!(at - start, Duration::from_millis(250));
        let at = timer.tick().await;
        assert_eq!(at - start, Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn stopped_timer_never_fires() {
        let mut timer = RepeatingTimer::new(Duration::from_millis(10));
        assert!(!timer.is_active());
        let fired = tokio::time::timeout(Duration::from_secs(5), timer.tick()).await;
        assert!(fired.is_err());

        timer.start();
        timer.stop();
        timer.stop();
        assert!(!timer.is_active());
        let fired = tokio::time::timeout(Duration::from_secs(5), timer.tick()).await;
        assert!(fired.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn start_with_changes_period() {
        let mut timer = RepeatingTimer::new(Duration::from_secs(1));
        timer.start_with(Duration::from_secs(2));
        assert_eq!(timer.period(), Duration::from_secs(2));
        let start = Instant::now();
        let at = timer.tick().await;
        assert_eq!(at - start, Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn zero_period_ticks_every_millisecond() {
        let mut timer = RepeatingTimer::new(Duration::ZERO);
        let start = Instant::now();
        timer.start();
        let at = timer.tick().await;
        assert_eq!(at - start, Duration::from_millis(1));
    }
}
