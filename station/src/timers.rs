//! One-shot timers delivered back to the coordinator loop.
//!
//! Each scheduled delay is a spawned sleep tracked by its abort handle.
//! Cancelling aborts the task and forgets its id, so a sleep that already
//! finished but has not been collected yet is still dropped.

use std::collections::HashMap;
use std::time::Duration;

use tokio::task::{AbortHandle, JoinSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    /// Object-left debounce
    Grace,
    /// Attach the source after it was cleared
    StreamAttach,
    /// Clear the placeholder after a stop
    StreamRelease,
    /// Stop the stream after a sort command
    SortStop,
    /// Reattach after a stream error
    Reconnect,
}

pub type TimerId = u64;

#[derive(Debug, Default)]
pub struct Timers {
    tasks: JoinSet<TimerId>,
    pending: HashMap<TimerId, (TimerKind, AbortHandle)>,
    next_id: TimerId,
}

impl Timers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule(&mut self, kind: TimerKind, delay: Duration) -> TimerId {
        self.next_id += 1;
        let id = self.next_id;
        let handle = self.tasks.spawn(async move {
            tokio::time::sleep(delay).await;
            id
        });
        self.pending.insert(id, (kind, handle));
        id
    }

    /// Cancel every pending timer of this kind. Returns how many.
    pub fn cancel(&mut self, kind: TimerKind) -> usize {
        let ids: Vec<TimerId> = self
            .pending
            .iter()
            .filter(|(_, (k, _))| *k == kind)
            .map(|(id, _)| *id)
            .collect();
        for id in &ids {
            if let Some((_, handle)) = self.pending.remove(id) {
                handle.abort();
            }
        }
        ids.len()
    }

    pub fn cancel_all(&mut self) {
        self.pending.clear();
        self.tasks.abort_all();
    }

    /// Wait for the next live timer to fire.
    ///
    /// Returns `None` immediately when nothing is scheduled. Cancel safe.
    pub async fn next_fired(&mut self) -> Option<TimerKind> {
        loop {
            match self.tasks.join_next().await? {
                Ok(id) => {
                    if let Some((kind, _)) = self.pending.remove(&id) {
                        return Some(kind);
                    }
                }
                // Aborted timers
                Err(_) => continue,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_fires_in_order() {
        let mut timers = Timers::new();
        timers.schedule(TimerKind::Reconnect, Duration::from_secs(3));
        timers.schedule(TimerKind::StreamAttach, Duration::from_millis(100));

        assert_eq!(timers.next_fired().await, Some(TimerKind::StreamAttach));
        assert_eq!(timers.next_fired().await, Some(TimerKind::Reconnect));
        assert_eq!(timers.next_fired().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_timer_never_fires() {
        let mut timers = Timers::new();
        timers.schedule(TimerKind::Grace, Duration::from_secs(5));
        timers.schedule(TimerKind::SortStop, Duration::from_secs(2));
        assert_eq!(timers.cancel(TimerKind::Grace), 1);
        assert!(timers.pending.values().all(|(kind, _)| *kind != TimerKind::Grace));

        assert_eq!(timers.next_fired().await, Some(TimerKind::SortStop));
        assert_eq!(timers.next_fired().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_after_sleep_finished() {
        let mut timers = Timers::new();
        timers.schedule(TimerKind::Grace, Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(50)).await;
        timers.cancel(TimerKind::Grace);
        assert_eq!(timers.next_fired().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_all() {
        let mut timers = Timers::new();
        timers.schedule(TimerKind::Grace, Duration::from_secs(1));
        timers.schedule(TimerKind::Reconnect, Duration::from_secs(1));
        timers.cancel_all();
        assert!(timers.pending.is_empty());
        assert_eq!(timers.next_fired().await, None);
    }
}
