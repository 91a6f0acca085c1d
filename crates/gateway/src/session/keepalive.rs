//! Periodic no-op writes that keep an idle shell from timing out.

use std::time::Duration;

use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};

/// Bytes written to the shell on every keepalive tick.
pub const KEEPALIVE_PROBE: &[u8] = &[0];

/// Timer owned by one session's actor.
///
/// The first tick fires one full period after [`start`](Self::start). Nothing
/// checks that the probe was acknowledged, so a half-open connection is only
/// detected by the transport keepalive.
#[derive(Debug)]
pub struct KeepaliveDriver {
    period: Duration,
    interval: Option<Interval>,
}

impl KeepaliveDriver {
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            interval: None,
        }
    }

    pub fn start(&mut self) {
        let mut interval = interval_at(Instant::now() + self.period, self.period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.interval = Some(interval);
    }

    pub fn stop(&mut self) {
        self.interval = None;
    }

    pub fn is_running(&self) -> bool {
        self.interval.is_some()
    }

    /// Wait for the next tick. Never resolves while stopped. Cancel safe.
    pub async fn tick(&mut self) {
        match self.interval.as_mut() {
            Some(interval) => {
                interval.tick().await;
            }
            None => std::future::pending::<()>().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_first_tick_after_one_period() {
        let mut driver = KeepaliveDriver::new(Duration::from_secs(60));
        driver.start();
        let started = Instant::now();

        driver.tick().await;
        assert_eq!(started.elapsed(), Duration::from_secs(60));

        driver.tick().await;
        assert_eq!(started.elapsed(), Duration::from_secs(120));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stopped_never_ticks() {
        let mut driver = KeepaliveDriver::new(Duration::from_secs(1));
        assert!(!driver.is_running());

        let ticked = tokio::time::timeout(Duration::from_secs(10), driver.tick()).await;
        assert!(ticked.is_err());

        driver.start();
        assert!(driver.is_running());
        driver.stop();
        assert!(!driver.is_running());
        let ticked = tokio::time::timeout(Duration::from_secs(10), driver.tick()).await;
        assert!(ticked.is_err());
    }
}
