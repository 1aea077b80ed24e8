use std::time::Duration;

use tokio::task::JoinHandle;

/// Generation stamp handed to a timer callback.
///
/// A fire is only honoured while its ticket is still the timer's current generation,
/// which rejects callbacks that were already queued when the timer was re-armed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerTicket(pub u64);

/// Single-slot delayed execution on the tokio runtime.
///
/// At most one callback is outstanding: arming always aborts the previous one first.
/// Must be armed from within a tokio runtime.
#[derive(Debug, Default)]
pub struct DebounceTimer {
    pending: Option<JoinHandle<()>>,
    generation: u64,
}

impl DebounceTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancels any pending callback, then schedules `callback` after `delay`.
    pub fn arm<F>(&mut self, delay: Duration, callback: F) -> TimerTicket
    where
        F: FnOnce(TimerTicket) + Send + 'static,
    {
        self.cancel();
        self.generation = self.generation.wrapping_add(1);
        let ticket = TimerTicket(self.generation);

        self.pending = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            callback(ticket);
        }));

        ticket
    }

    /// Prevents the pending callback from firing. Returns whether one was pending.
    pub fn cancel(&mut self) -> bool {
        match self.pending.take() {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    pub fn is_armed(&self) -> bool {
        self.pending
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Consumes a fire notification.
    ///
    /// Returns `true` when `ticket` belongs to the live schedule, clearing the slot.
    /// Stale tickets (superseded or cancelled) return `false` and leave the slot intact.
    pub fn settle(&mut self, ticket: TimerTicket) -> bool {
        if self.pending.is_none() || ticket.0 != self.generation {
            return false;
        }

        self.pending = None;
        true
    }
}

impl Drop for DebounceTimer {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use tokio::sync::mpsc;

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn fires_once_after_delay() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut timer = DebounceTimer::new();

        let ticket = timer.arm(Duration::from_secs(3), move |ticket| {
            let _ = tx.send(ticket);
        });
        assert!(timer.is_armed());

        tokio::time::sleep(Duration::from_millis(2_900)).await;
        assert!(rx.try_recv().is_err());

        let fired = rx.recv().await;
        assert_eq!(fired, Some(ticket));
        assert!(timer.settle(ticket));
        assert!(!timer.settle(ticket));
    }

    #[tokio::test(start_paused = true)]
    async fn rearming_supersedes_previous_schedule() {
        let fires = Arc::new(AtomicUsize::new(0));
        let mut timer = DebounceTimer::new();

        let counter = fires.clone();
        let first = timer.arm(Duration::from_secs(3), move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_secs(1)).await;
        let counter = fires.clone();
        let second = timer.arm(Duration::from_secs(3), move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert_ne!(first, second);

        // Three seconds after the first arm, but only two after the second.
        tokio::time::sleep(Duration::from_millis(2_500)).await;
        assert_eq!(fires.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(fires.load(Ordering::SeqCst), 1);
        assert!(!timer.settle(first));
        assert!(timer.settle(second));
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_prevents_fire_and_is_idempotent() {
        let fires = Arc::new(AtomicUsize::new(0));
        let mut timer = DebounceTimer::new();

        let counter = fires.clone();
        timer.arm(Duration::from_secs(3), move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert!(timer.cancel());
        assert!(!timer.cancel());
        assert!(!timer.is_armed());

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(fires.load(Ordering::SeqCst), 0);
    }
}
