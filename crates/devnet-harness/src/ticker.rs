//! Poll pacing and cooperative cancellation for waits

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;

/// Cancellation signal shared between the operator's interrupt handler and
/// any number of waits.
#[derive(Clone, Debug)]
pub struct Cancellation {
    sender: Arc<watch::Sender<bool>>,
    receiver: watch::Receiver<bool>,
}

impl Cancellation {
    /// A fresh, un-cancelled signal
    pub fn new() -> Self {
        let (sender, receiver) = watch::channel(false);
        Self {
            sender: Arc::new(sender),
            receiver,
        }
    }

    /// Cancel every wait observing this signal
    pub fn cancel(&self) {
        self.sender.send_replace(true);
    }

    /// Whether cancellation was requested
    pub fn is_cancelled(&self) -> bool {
        *self.receiver.borrow()
    }

    /// Resolve once cancellation is requested
    pub async fn cancelled(&self) {
        let mut receiver = self.receiver.clone();
        // The sender lives as long as any clone of self, so this only ends on cancel
        let _ = receiver.wait_for(|cancelled| *cancelled).await;
    }
}

impl Default for Cancellation {
    fn default() -> Self {
        Self::new()
    }
}

/// Outcome of waiting for the next tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    /// Time to poll
    Ready,
    /// The deadline passed
    Expired,
    /// The wait was cancelled
    Cancelled,
}

/// Fixed-rate ticker bounded by a deadline.
///
/// The first tick is immediate; later ticks fall on multiples of the interval
/// from the start, so slow polls do not stretch the schedule.
#[derive(Debug)]
pub struct PollTicker {
    interval: Duration,
    deadline: Instant,
    next_at: Instant,
    first: bool,
    cancel: Option<Cancellation>,
}

impl PollTicker {
    /// Ticker firing every `interval` until `timeout` from now
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        let now = Instant::now();
        Self {
            interval: interval.max(Duration::from_millis(1)),
            deadline: now + timeout,
            next_at: now,
            first: true,
            cancel: None,
        }
    }

    /// Observe `cancel` while sleeping
    pub fn with_cancellation(mut self, cancel: Cancellation) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Deadline of the wait
    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Whether the deadline has passed
    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.deadline
    }

    /// Wait for the next poll slot
    pub async fn tick(&mut self) -> Tick {
        if self.cancel.as_ref().is_some_and(Cancellation::is_cancelled) {
            return Tick::Cancelled;
        }
        if self.first {
            self.first = false;
            return Tick::Ready;
        }

        self.next_at += self.interval;
        let wake = self.next_at.min(self.deadline);
        match &self.cancel {
            Some(cancel) => {
                tokio::select! {
                    _ = tokio::time::sleep_until(wake) => {}
                    _ = cancel.cancelled() => return Tick::Cancelled,
                }
            }
            None => tokio::time::sleep_until(wake).await,
        }

        if self.is_expired() {
            Tick::Expired
        } else {
            Tick::Ready
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_ticks_until_deadline() {
        let start = Instant::now();
        let mut ticker = PollTicker::new(Duration::from_secs(1), Duration::from_millis(3500));
        let mut ready = 0;
        while ticker.tick().await == Tick::Ready {
            ready += 1;
        }
        // t=0, 1, 2, 3
        assert_eq!(ready, 4);
        assert_eq!(start.elapsed(), Duration::from_millis(3500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_interrupts_sleep() {
        let cancel = Cancellation::new();
        let mut ticker =
            PollTicker::new(Duration::from_secs(60), Duration::from_secs(600)).with_cancellation(cancel.clone());
        assert_eq!(ticker.tick().await, Tick::Ready);

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            trigger.cancel();
        });
        let start = Instant::now();
        assert_eq!(ticker.tick().await, Tick::Cancelled);
        assert!(start.elapsed() < Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_timeout_polls_once() {
        let mut ticker = PollTicker::new(Duration::from_secs(1), Duration::ZERO);
        assert_eq!(ticker.tick().await, Tick::Ready);
        assert_eq!(ticker.tick().await, Tick::Expired);
    }
}
