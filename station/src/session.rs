//! Top-level session phase and its single transition function.
//!
//! Components never flip each other's flags. They ask for a [`Transition`]
//! and the engine applies it through [`SessionPhase::next`]; anything not
//! listed there is rejected and leaves the phase unchanged.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionPhase {
    /// Monitoring off
    Idle,
    /// Polling the sensor, no stream
    Scanning,
    /// Object seen, stream being attached
    Armed,
    /// Stream live, detection may run
    Streaming,
    /// A sort command was issued; no further commands until it ends
    Cooldown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    StartMonitoring,
    StopMonitoring,
    Arm,
    StreamOpened,
    StreamClosed,
    CooldownStarted,
    CooldownEnded { streaming: bool },
}

impl SessionPhase {
    pub fn next(self, transition: Transition) -> Option<SessionPhase> {
        use SessionPhase::*;
        match (self, transition) {
            (Idle, Transition::StartMonitoring) => Some(Scanning),
            (Idle, Transition::StopMonitoring) => None,
            (_, Transition::StopMonitoring) => Some(Idle),
            (Scanning, Transition::Arm) => Some(Armed),
            (Scanning | Armed, Transition::StreamOpened) => Some(Streaming),
            (Armed | Streaming, Transition::StreamClosed) => Some(Scanning),
            (Cooldown, Transition::StreamClosed) => Some(Cooldown),
            (Streaming, Transition::CooldownStarted) => Some(Cooldown),
            (Cooldown, Transition::CooldownEnded { streaming: true }) => Some(Streaming),
            (Cooldown, Transition::CooldownEnded { streaming: false }) => Some(Scanning),
            _ => None,
        }
    }

    pub fn is_monitoring(self) -> bool {
        self != SessionPhase::Idle
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionPhase::Idle => "idle",
            SessionPhase::Scanning => "scanning",
            SessionPhase::Armed => "armed",
            SessionPhase::Streaming => "streaming",
            SessionPhase::Cooldown => "cooldown",
        }
    }
}

impl std::fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::SessionPhase::*;
    use super::*;

    #[test]
    fn test_sensor_cycle() {
        let phase = Idle.next(Transition::StartMonitoring).unwrap();
        assert_eq!(phase, Scanning);
        let phase = phase.next(Transition::Arm).unwrap();
        assert_eq!(phase, Armed);
        let phase = phase.next(Transition::StreamOpened).unwrap();
        assert_eq!(phase, Streaming);
        assert_eq!(phase.next(Transition::StreamClosed), Some(Scanning));
    }

    #[test]
    fn test_sort_cycle() {
        let phase = Streaming.next(Transition::CooldownStarted).unwrap();
        assert_eq!(phase, Cooldown);
        // Stream stops mid-cooldown
        let phase = phase.next(Transition::StreamClosed).unwrap();
        assert_eq!(phase, Cooldown);
        assert_eq!(
            phase.next(Transition::CooldownEnded { streaming: false }),
            Some(Scanning)
        );
        assert_eq!(
            Cooldown.next(Transition::CooldownEnded { streaming: true }),
            Some(Streaming)
        );
    }

    #[test]
    fn test_rejected_transitions() {
        assert_eq!(Idle.next(Transition::Arm), None);
        assert_eq!(Streaming.next(Transition::Arm), None);
        assert_eq!(Cooldown.next(Transition::Arm), None);
        assert_eq!(Cooldown.next(Transition::StreamOpened), None);
        assert_eq!(Scanning.next(Transition::CooldownStarted), None);
        assert_eq!(Idle.next(Transition::StopMonitoring), None);
    }

    #[test]
    fn test_stop_monitoring_from_anywhere() {
        for phase in [Scanning, Armed, Streaming, Cooldown] {
            assert_eq!(phase.next(Transition::StopMonitoring), Some(Idle));
            assert!(phase.is_monitoring());
        }
        assert!(!Idle.is_monitoring());
    }
}
