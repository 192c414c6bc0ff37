//! Proximity monitor: turns sensor readings into stream start/stop requests.

use std::time::Duration;

use station_shared::SensorReading;
use tokio::time::Instant;

use crate::session::SessionPhase;

/// What the engine should do after a sensor reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProximityAction {
    None,
    /// Object arrived while scanning and the sensor cooldown has elapsed
    StartStream,
    /// Object left during a stream; start the grace timer
    ArmGrace,
    /// Object came back before the grace timer fired
    CancelGrace,
}

#[derive(Debug)]
pub struct ProximityMonitor {
    sensor_cooldown: Duration,
    last_reading: Option<SensorReading>,
    last_stream_start: Option<Instant>,
    grace_armed: bool,
}

impl ProximityMonitor {
    pub fn new(sensor_cooldown: Duration) -> Self {
        Self {
            sensor_cooldown,
            last_reading: None,
            last_stream_start: None,
            grace_armed: false,
        }
    }

    pub fn last_reading(&self) -> Option<SensorReading> {
        self.last_reading
    }

    pub fn grace_armed(&self) -> bool {
        self.grace_armed
    }

    /// Strictly greater than the cooldown, as measured from the last start.
    pub fn cooldown_elapsed(&self, now: Instant) -> bool {
        match self.last_stream_start {
            Some(started) => now.duration_since(started) > self.sensor_cooldown,
            None => true,
        }
    }

    /// Time left before the sensor may start another stream.
    pub fn cooldown_remaining(&self, now: Instant) -> Duration {
        match self.last_stream_start {
            Some(started) => self
                .sensor_cooldown
                .saturating_sub(now.duration_since(started)),
            None => Duration::ZERO,
        }
    }

    /// Record a reading and decide the next action.
    ///
    /// `streaming` is whether a stream session is active, which can be true
    /// during cooldown as well as while streaming.
    pub fn observe(
        &mut self,
        reading: SensorReading,
        phase: SessionPhase,
        streaming: bool,
        now: Instant,
    ) -> ProximityAction {
        self.last_reading = Some(reading);

        if streaming {
            return match (reading.object_detected, self.grace_armed) {
                (false, false) => {
                    self.grace_armed = true;
                    ProximityAction::ArmGrace
                }
                (true, true) => {
                    self.grace_armed = false;
                    ProximityAction::CancelGrace
                }
                _ => ProximityAction::None,
            };
        }

        if phase == SessionPhase::Scanning && reading.object_detected && self.cooldown_elapsed(now)
        {
            self.last_stream_start = Some(now);
            return ProximityAction::StartStream;
        }

        ProximityAction::None
    }

    /// Grace timer fired. Returns true when the stream should stop.
    pub fn grace_elapsed(&mut self, detecting: bool) -> bool {
        if !self.grace_armed {
            return false;
        }
        self.grace_armed = false;
        let object_absent = self
            .last_reading
            .map(|reading| !reading.object_detected)
            .unwrap_or(true);
        object_absent && !detecting
    }

    /// Forget any pending grace period (stream stopped for another reason).
    pub fn reset_grace(&mut self) {
        self.grace_armed = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reading(object_detected: bool) -> SensorReading {
        SensorReading {
            distance: if object_detected { 8.0 } else { 60.0 },
            object_detected,
            object_stable: object_detected,
            threshold: 15.0,
        }
    }

    fn monitor() -> ProximityMonitor {
        ProximityMonitor::new(Duration::from_secs(60))
    }

    #[test]
    fn test_object_starts_stream_when_scanning() {
        let mut m = monitor();
        let now = Instant::now();
        assert_eq!(
            m.observe(reading(false), SessionPhase::Scanning, false, now),
            ProximityAction::None
        );
        assert_eq!(
            m.observe(reading(true), SessionPhase::Scanning, false, now),
            ProximityAction::StartStream
        );
    }

    #[test]
    fn test_sensor_cooldown_blocks_restart() {
        let mut m = monitor();
        let start = Instant::now();
        assert_eq!(
            m.observe(reading(true), SessionPhase::Scanning, false, start),
            ProximityAction::StartStream
        );

        let later = start + Duration::from_secs(60);
        assert_eq!(
            m.observe(reading(true), SessionPhase::Scanning, false, later),
            ProximityAction::None
        );
        assert_eq!(m.cooldown_remaining(later), Duration::ZERO);

        let after = start + Duration::from_millis(60_001);
        assert_eq!(
            m.observe(reading(true), SessionPhase::Scanning, false, after),
            ProximityAction::StartStream
        );
    }

    #[test]
    fn test_no_arming_outside_scanning() {
        let mut m = monitor();
        let now = Instant::now();
        for phase in [SessionPhase::Idle, SessionPhase::Cooldown, SessionPhase::Armed] {
            assert_eq!(
                m.observe(reading(true), phase, false, now),
                ProximityAction::None
            );
        }
        assert!(m.cooldown_elapsed(now));
    }

    #[test]
    fn test_grace_armed_once_and_cancelled() {
        let mut m = monitor();
        let now = Instant::now();
        let phase = SessionPhase::Streaming;
        assert_eq!(
            m.observe(reading(false), phase, true, now),
            ProximityAction::ArmGrace
        );
        assert_eq!(
            m.observe(reading(false), phase, true, now),
            ProximityAction::None
        );
        assert_eq!(
            m.observe(reading(true), phase, true, now),
            ProximityAction::CancelGrace
        );
        assert!(!m.grace_armed());
        assert!(!m.grace_elapsed(false));
    }

    #[test]
    fn test_grace_elapsed_respects_detection() {
        let mut m = monitor();
        let now = Instant::now();
        m.observe(reading(false), SessionPhase::Streaming, true, now);
        assert!(!m.grace_elapsed(true));

        m.observe(reading(false), SessionPhase::Streaming, true, now);
        assert!(m.grace_elapsed(false));
    }
}
