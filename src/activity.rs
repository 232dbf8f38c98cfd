///
/// activity.rs
///
/// Coarse bus load estimate.
///
/// Bytes are counted as frames arrive and sampled once per interval. The
/// rate is not averaged: every sample covers exactly one interval.
///
use std::time::Duration;

use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplerState {
    Idle,
    Active,
}

/// Result of one sampler tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Sample {
    /// No traffic within the last interval; the sampler went idle.
    Idle,
    Rate {
        /// Active seconds counted so far.
        elapsed_secs: u64,
        kbit_per_s: f64,
    },
}

#[derive(Debug)]
pub struct ActivitySampler {
    state: SamplerState,
    timeout: Duration,
    bytes: u64,
    last_seen: Option<Instant>,
    elapsed_secs: u64,
}

impl ActivitySampler {
    /// `timeout` is both the sampling interval and the silence that ends activity.
    pub fn new(timeout: Duration) -> Self {
        Self {
            state: SamplerState::Idle,
            timeout,
            bytes: 0,
            last_seen: None,
            elapsed_secs: 0,
        }
    }

    /// Counts a received frame of `wire_size` bytes.
    ///
    /// Returns `true` when this frame ends an idle period, i.e. the caller
    /// must start the sampling timer.
    pub fn record(&mut self, wire_size: usize, now: Instant) -> bool {
        self.bytes += wire_size as u64;
        self.last_seen = Some(now);
        if self.state == SamplerState::Idle {
            self.state = SamplerState::Active;
            return true;
        }
        false
    }

    /// Takes one sample and resets the byte counter.
    pub fn tick(&mut self, now: Instant) -> Sample {
        let quiet = match self.last_seen {
            Some(seen) => now.saturating_duration_since(seen) > self.timeout,
            None => true,
        };

        if quiet {
            self.state = SamplerState::Idle;
            self.bytes = 0;
            return Sample::Idle;
        }

        self.elapsed_secs += 1;
        let kbit_per_s = self.bytes as f64 * 8.0 / 1000.0;
        self.bytes = 0;
        Sample::Rate {
            elapsed_secs: self.elapsed_secs,
            kbit_per_s,
        }
    }

    pub fn state(&self) -> SamplerState {
        self.state
    }

    pub fn pending_bytes(&self) -> u64 {
        self.bytes
    }

    pub fn elapsed_secs(&self) -> u64 {
        self.elapsed_secs
    }

    pub fn reset(&mut self) {
        self.state = SamplerState::Idle;
        self.bytes = 0;
        self.last_seen = None;
        self.elapsed_secs = 0;
    }
}

/// Label text for a bitrate in kbit/s.
pub fn format_bitrate(kbit_per_s: f64) -> String {
    format!("{} kbit/s", kbit_per_s)
}

/// Label text for the active session time.
pub fn format_session_time(elapsed_secs: u64) -> String {
    format!("{} s, ", elapsed_secs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::can::{CAN_MTU, CANFD_MTU};

    const SECOND: Duration = Duration::from_secs(1);

    #[test]
    fn first_frame_activates() {
        let start = Instant::now();
        let mut sampler = ActivitySampler::new(SECOND);
        assert_eq!(sampler.state(), SamplerState::Idle);
        assert!(sampler.record(CAN_MTU, start));
        assert!(!sampler.record(CAN_MTU, start));
        assert_eq!(sampler.state(), SamplerState::Active);
        assert_eq!(sampler.pending_bytes(), 32);
    }

    #[test]
    fn tick_reports_rate_and_resets_counter() {
        let start = Instant::now();
        let mut sampler = ActivitySampler::new(SECOND);
        for _ in 0..10 {
            sampler.record(CAN_MTU, start);
        }
        sampler.record(CANFD_MTU, start);

        let sample = sampler.tick(start + SECOND);
        assert_eq!(
            sample,
            Sample::Rate {
                elapsed_secs: 1,
                kbit_per_s: 1.856
            }
        );
        assert_eq!(sampler.pending_bytes(), 0);
    }

    #[test]
    fn silence_longer_than_timeout_goes_idle() {
        let start = Instant::now();
        let mut sampler = ActivitySampler::new(SECOND);
        sampler.record(CAN_MTU, start);

        let sample = sampler.tick(start + Duration::from_millis(2001));
        assert_eq!(sample, Sample::Idle);
        assert_eq!(sampler.state(), SamplerState::Idle);
        assert_eq!(sampler.pending_bytes(), 0);

        // Traffic after going idle restarts sampling.
        assert!(sampler.record(CAN_MTU, start + Duration::from_secs(3)));
    }

    #[test]
    fn elapsed_seconds_survive_idle_periods() {
        let start = Instant::now();
        let mut sampler = ActivitySampler::new(SECOND);
        sampler.record(CAN_MTU, start);
        sampler.tick(start + SECOND);
        sampler.tick(start + Duration::from_secs(5));
        sampler.record(CAN_MTU, start + Duration::from_secs(6));
        let sample = sampler.tick(start + Duration::from_secs(7));
        assert!(matches!(sample, Sample::Rate { elapsed_secs: 2, .. }));

        sampler.reset();
        assert_eq!(sampler.elapsed_secs(), 0);
    }

    #[test]
    fn label_formats() {
        assert_eq!(format_bitrate(0.0), "0 kbit/s");
        assert_eq!(format_bitrate(8.0), "8 kbit/s");
        assert_eq!(format_bitrate(1.28), "1.28 kbit/s");
        assert_eq!(format_session_time(12), "12 s, ");
    }
}
