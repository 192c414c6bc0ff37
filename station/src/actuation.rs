//! Actuation cooldown gate: at most one sort command per cooldown window.

use std::time::Duration;

use station_shared::{ControlCommand, WasteCategory};
use tokio::time::Instant;

/// One open cooldown. `started_at` doubles as the id of the trigger that
/// opened it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CooldownWindow {
    pub started_at: Instant,
    pub duration: Duration,
}

impl CooldownWindow {
    /// Time left before the window closes, zero once elapsed.
    pub fn remaining(&self, now: Instant) -> Duration {
        self.duration
            .saturating_sub(now.duration_since(self.started_at))
    }

    pub fn is_elapsed(&self, now: Instant) -> bool {
        self.remaining(now).is_zero()
    }
}

/// Result of the once-per-second cooldown check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatePoll {
    Ready,
    Counting { remaining_secs: u64 },
    /// Window just ended; the gate is ready again
    Finished,
}

/// Decides whether a qualifying detection may send a sort command.
#[derive(Debug)]
pub struct ActuationGate {
    cooldown: Duration,
    window: Option<CooldownWindow>,
    last_trigger: Option<Instant>,
}

impl ActuationGate {
    /// A gate that allows one command per `cooldown`.
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            window: None,
            last_trigger: None,
        }
    }

    pub fn is_cooling(&self) -> bool {
        self.window.is_some()
    }

    /// The open window, if any.
    pub fn window(&self) -> Option<&CooldownWindow> {
        self.window.as_ref()
    }

    /// Time left in the open window, zero when ready.
    pub fn remaining(&self, now: Instant) -> Duration {
        self.window
            .map(|w| w.remaining(now))
            .unwrap_or(Duration::ZERO)
    }

    /// Open a cooldown window and return the command to send, or `None` if
    /// a window is open or the last trigger is too recent.
    pub fn try_begin(&mut self, category: WasteCategory, now: Instant) -> Option<ControlCommand> {
        if self.window.is_some() {
            return None;
        }
        if let Some(last) = self.last_trigger {
            if now.duration_since(last) < self.cooldown {
                return None;
            }
        }

        self.window = Some(CooldownWindow {
            started_at: now,
            duration: self.cooldown,
        });
        self.last_trigger = Some(now);
        Some(ControlCommand::from(category))
    }

    /// Advance the countdown. Closes the window once it has elapsed.
    pub fn poll(&mut self, now: Instant) -> GatePoll {
        let Some(window) = self.window else {
            return GatePoll::Ready;
        };
        if window.is_elapsed(now) {
            self.window = None;
            return GatePoll::Finished;
        }
        let remaining = window.remaining(now);
        GatePoll::Counting {
            remaining_secs: remaining.as_millis().div_ceil(1000) as u64,
        }
    }

    /// Reset after a failed command so the next detection can retry.
    ///
    /// Only the window opened at `started_at` is cancelled. A failure that
    /// arrives after a newer window opened leaves that window alone and
    /// returns `false`.
    pub fn cancel(&mut self, started_at: Instant) -> bool {
        match self.window {
            Some(window) if window.started_at == started_at => {
                self.window = None;
                self.last_trigger = None;
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const COOLDOWN: Duration = Duration::from_secs(10);

    #[test]
    fn test_single_command_per_window() {
        let mut gate = ActuationGate::new(COOLDOWN);
        let start = Instant::now();
        assert_eq!(
            gate.try_begin(WasteCategory::Plastic, start),
            Some(ControlCommand::Plastic)
        );
        for offset in [0, 500, 5_000, 9_999] {
            let now = start + Duration::from_millis(offset);
            assert_eq!(gate.try_begin(WasteCategory::Recyclable, now), None);
        }
    }

    #[test]
    fn test_countdown_and_finish() {
        let mut gate = ActuationGate::new(COOLDOWN);
        let start = Instant::now();
        gate.try_begin(WasteCategory::Biodegradable, start);

        assert_eq!(
            gate.poll(start + Duration::from_millis(1_000)),
            GatePoll::Counting { remaining_secs: 9 }
        );
        assert_eq!(
            gate.poll(start + Duration::from_millis(8_500)),
            GatePoll::Counting { remaining_secs: 2 }
        );
        assert_eq!(gate.poll(start + COOLDOWN), GatePoll::Finished);
        assert_eq!(gate.poll(start + COOLDOWN), GatePoll::Ready);
        assert!(gate.try_begin(WasteCategory::Plastic, start + COOLDOWN).is_some());
    }

    #[test]
    fn test_cancel_allows_retry() {
        let mut gate = ActuationGate::new(COOLDOWN);
        let start = Instant::now();
        gate.try_begin(WasteCategory::Plastic, start);
        assert!(gate.cancel(start));
        assert!(!gate.is_cooling());
        assert!(gate
            .try_begin(WasteCategory::Plastic, start + Duration::from_millis(100))
            .is_some());
    }

    #[test]
    fn test_stale_failure_keeps_newer_window() {
        let mut gate = ActuationGate::new(COOLDOWN);
        let first = Instant::now();
        gate.try_begin(WasteCategory::Plastic, first);
        assert_eq!(gate.poll(first + COOLDOWN), GatePoll::Finished);

        let second = first + Duration::from_secs(11);
        assert!(gate.try_begin(WasteCategory::Plastic, second).is_some());
        assert_eq!(gate.window().map(|w| w.started_at), Some(second));

        // The first command's failure lands inside the second window
        assert!(!gate.cancel(first));
        assert!(gate.is_cooling());
        assert_eq!(
            gate.try_begin(WasteCategory::Plastic, second + Duration::from_secs(1)),
            None
        );
    }
}
