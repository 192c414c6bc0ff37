//! The station coordinator.
//!
//! A single task owns every component and drives them from one
//! `tokio::select!` loop: operator commands, stream reader events, finished
//! network calls, fired timers and the periodic ticks. Network calls and
//! delays run as spawned tasks whose results come back into the loop, so no
//! component state is ever shared or locked.
//!
//! The outside world talks to the engine through a [`StationHandle`]. It
//! sends [`Command`]s and reads [`StationSnapshot`]s published after every
//! state change.

use std::sync::Arc;

use futures::StreamExt;
use serde::Serialize;
use station_shared::{
    BinCapacityData, ControlCommand, Detection, LogLevel, Payload, ResourceError, SensorReading,
    Subsystem,
};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::{AbortHandle, JoinError, JoinHandle, JoinSet};
use tokio::time::{interval, Instant, Interval, MissedTickBehavior};
use tracing::{debug, error};

use crate::actuation::{ActuationGate, GatePoll};
use crate::bin_poller::{BinPoller, BinSnapshot};
use crate::config::{StationConfig, Timings};
use crate::detection::{Classified, DetectionLoop, DetectionStats};
use crate::device_store::DeviceAddresses;
use crate::error::StationError;
use crate::logs::StationLogs;
use crate::mjpeg::MjpegBroadcaster;
use crate::overlay::OverlayRenderer;
use crate::proximity::{ProximityAction, ProximityMonitor};
use crate::services::{ControllerApi, Detector};
use crate::session::{SessionPhase, Transition};
use crate::stream::{Frame, FrameSource, StopReason, StreamController};
use crate::timers::{TimerKind, Timers};

const COMMAND_QUEUE: usize = 32;
const FRAME_QUEUE: usize = 8;

/// Requests accepted by the engine.
#[derive(Debug)]
pub enum Command {
    SetMonitoring(bool),
    SetDetection(bool),
    StartStream {
        reply: oneshot::Sender<Result<(), StationError>>,
    },
    StopStream,
    /// Operator-issued actuator command, outside the cooldown gate
    ManualControl {
        command: ControlCommand,
        reply: oneshot::Sender<Result<Payload, StationError>>,
    },
    SetDevices(DeviceAddresses),
    OverlayPng {
        reply: oneshot::Sender<Result<Vec<u8>, StationError>>,
    },
    Shutdown,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamInfo {
    pub session_id: u64,
    pub duration_seconds: u64,
    pub frames_received: u64,
    pub reconnects: u64,
}

/// Everything the operator can see, published after each state change.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StationSnapshot {
    pub phase: SessionPhase,
    pub monitoring: bool,
    pub detection_enabled: bool,
    pub detecting: bool,
    pub sensor: Option<SensorReading>,
    pub stream: Option<StreamInfo>,
    pub last_stop_reason: Option<StopReason>,
    pub cooldown_remaining_secs: u64,
    pub sensor_cooldown_remaining_secs: u64,
    pub bins: Option<BinSnapshot>,
    pub stats: DetectionStats,
    pub active_detections: usize,
    pub status_message: Option<String>,
    pub devices: DeviceAddresses,
    pub logs: StationLogs,
}

/// Cloneable front door to a running engine.
#[derive(Debug, Clone)]
pub struct StationHandle {
    commands: mpsc::Sender<Command>,
    snapshot: watch::Receiver<StationSnapshot>,
    annotated: MjpegBroadcaster,
}

impl StationHandle {
    async fn send(&self, command: Command) -> Result<(), StationError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| StationError::EngineStopped)
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<Result<T, StationError>>) -> Command,
    ) -> Result<T, StationError> {
        let (tx, rx) = oneshot::channel();
        self.send(command(tx)).await?;
        rx.await.map_err(|_| StationError::EngineStopped)?
    }

    pub async fn set_monitoring(&self, enabled: bool) -> Result<(), StationError> {
        self.send(Command::SetMonitoring(enabled)).await
    }

    pub async fn set_detection(&self, enabled: bool) -> Result<(), StationError> {
        self.send(Command::SetDetection(enabled)).await
    }

    pub async fn start_stream(&self) -> Result<(), StationError> {
        self.request(|reply| Command::StartStream { reply }).await
    }

    pub async fn stop_stream(&self) -> Result<(), StationError> {
        self.send(Command::StopStream).await
    }

    pub async fn control(&self, command: ControlCommand) -> Result<Payload, StationError> {
        self.request(|reply| Command::ManualControl { command, reply })
            .await
    }

    pub async fn set_devices(&self, devices: DeviceAddresses) -> Result<(), StationError> {
        self.send(Command::SetDevices(devices)).await
    }

    pub async fn overlay_png(&self) -> Result<Vec<u8>, StationError> {
        self.request(|reply| Command::OverlayPng { reply }).await
    }

    /// Ask the engine to tear down and exit. Succeeds if it already has.
    pub async fn shutdown(&self) {
        let _ = self.commands.send(Command::Shutdown).await;
    }

    pub fn snapshot(&self) -> StationSnapshot {
        self.snapshot.borrow().clone()
    }

    /// Receiver that is notified on every published snapshot.
    pub fn watch(&self) -> watch::Receiver<StationSnapshot> {
        self.snapshot.clone()
    }

    /// Live frames with the overlay composited in. Client responses end when
    /// the engine stops.
    pub fn annotated(&self) -> &MjpegBroadcaster {
        &self.annotated
    }
}

#[derive(Debug)]
enum StreamEventKind {
    Frame(Frame),
    Failed(String),
    Ended,
}

#[derive(Debug)]
struct StreamEvent {
    generation: u64,
    kind: StreamEventKind,
}

type ControlReply = oneshot::Sender<Result<Payload, StationError>>;

enum Completion {
    Sensor(Result<SensorReading, ResourceError>),
    Bins(Result<BinCapacityData, ResourceError>),
    Detect {
        session: u64,
        result: Result<Vec<Detection>, ResourceError>,
    },
    Control {
        command: ControlCommand,
        origin: ControlOrigin,
        result: Result<Payload, ResourceError>,
    },
}

/// Who issued a control command.
enum ControlOrigin {
    /// Operator request waiting for the result
    Manual(ControlReply),
    /// Sort trigger, tagged with the start of the cooldown window it opened
    Trigger { window: Instant },
}

#[derive(Debug, Default)]
struct InFlight {
    sensor: Option<AbortHandle>,
    bins: Option<AbortHandle>,
    detect: Option<AbortHandle>,
}

impl InFlight {
    fn abort_polls(&mut self) {
        for handle in [self.sensor.take(), self.bins.take(), self.detect.take()]
            .into_iter()
            .flatten()
        {
            handle.abort();
        }
    }
}

struct Ticks {
    sensor: Interval,
    bins: Interval,
    detection: Interval,
    cooldown: Interval,
    watchdog: Interval,
    janitor: Interval,
    render: Interval,
}

impl Ticks {
    fn new(timings: &Timings) -> Self {
        let make = |period, behavior| {
            let mut tick = interval(period);
            tick.set_missed_tick_behavior(behavior);
            tick
        };
        Self {
            sensor: make(timings.sensor_poll, MissedTickBehavior::Delay),
            bins: make(timings.bin_poll, MissedTickBehavior::Delay),
            detection: make(timings.detection_interval, MissedTickBehavior::Delay),
            cooldown: make(timings.cooldown_tick, MissedTickBehavior::Delay),
            watchdog: make(timings.watchdog_interval, MissedTickBehavior::Delay),
            janitor: make(timings.janitor_interval, MissedTickBehavior::Delay),
            render: make(timings.render_interval, MissedTickBehavior::Skip),
        }
    }
}

/// The coordinator. Build with [`Station::new`] and drive with [`Station::run`].
pub struct Station<C, D, F> {
    timings: Timings,
    controller: Arc<C>,
    detector: Arc<D>,
    source: Arc<F>,
    devices: DeviceAddresses,

    phase: SessionPhase,
    proximity: ProximityMonitor,
    stream: StreamController,
    detection: DetectionLoop,
    gate: ActuationGate,
    bins: BinPoller,
    overlay: OverlayRenderer,
    logs: StationLogs,
    status_message: Option<String>,
    last_stop_reason: Option<StopReason>,
    awaiting_first_frame: bool,
    fresh_frame: bool,

    timers: Timers,
    calls: JoinSet<Completion>,
    in_flight: InFlight,
    reader: Option<JoinHandle<()>>,
    frames_tx: mpsc::Sender<StreamEvent>,
    frames_rx: mpsc::Receiver<StreamEvent>,
    commands: mpsc::Receiver<Command>,
    snapshot_tx: watch::Sender<StationSnapshot>,
    annotated: MjpegBroadcaster,
}

impl<C, D, F> Station<C, D, F>
where
    C: ControllerApi,
    D: Detector,
    F: FrameSource,
{
    pub fn new(
        config: StationConfig,
        controller: C,
        detector: D,
        source: F,
    ) -> (Self, StationHandle) {
        let timings = config.timings;
        let devices = config.devices.normalized();
        controller.set_address(devices.controller.clone());

        let (command_tx, commands) = mpsc::channel(COMMAND_QUEUE);
        let (frames_tx, frames_rx) = mpsc::channel(FRAME_QUEUE);
        let annotated = MjpegBroadcaster::default();

        let station = Self {
            timings,
            controller: Arc::new(controller),
            detector: Arc::new(detector),
            source: Arc::new(source),
            devices,
            phase: SessionPhase::Idle,
            proximity: ProximityMonitor::new(timings.sensor_cooldown),
            stream: StreamController::new(),
            detection: DetectionLoop::new(config.thresholds),
            gate: ActuationGate::new(timings.detection_cooldown),
            bins: BinPoller::new(config.bin_thresholds),
            overlay: OverlayRenderer::new(timings.display_time),
            logs: StationLogs::new(config.log_capacity),
            status_message: None,
            last_stop_reason: None,
            awaiting_first_frame: false,
            fresh_frame: false,
            timers: Timers::new(),
            calls: JoinSet::new(),
            in_flight: InFlight::default(),
            reader: None,
            frames_tx,
            frames_rx,
            commands,
            // Replaced below once the initial snapshot can be built
            snapshot_tx: watch::channel(StationSnapshot::empty()).0,
            annotated: annotated.clone(),
        };
        let snapshot = station.build_snapshot(Instant::now());
        station.snapshot_tx.send_replace(snapshot);

        let handle = StationHandle {
            commands: command_tx,
            snapshot: station.snapshot_tx.subscribe(),
            annotated,
        };
        (station, handle)
    }

    /// Run until a shutdown command arrives or every handle is dropped.
    pub async fn run(mut self) {
        let mut ticks = Ticks::new(&self.timings);
        self.logs.info(Subsystem::System, "Station ready");
        self.publish();

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => self.handle_command(command, &mut ticks),
                },
                Some(event) = self.frames_rx.recv() => self.on_stream_event(event),
                Some(done) = self.calls.join_next() => self.on_completion(done),
                Some(kind) = self.timers.next_fired() => self.on_timer(kind),
                _ = ticks.sensor.tick(), if self.phase.is_monitoring() => self.poll_sensor(),
                _ = ticks.bins.tick(), if self.phase.is_monitoring() => self.poll_bins(),
                _ = ticks.detection.tick(), if self.detection.should_run(self.phase) => {
                    self.detection_tick()
                }
                _ = ticks.cooldown.tick(), if self.gate.is_cooling() => self.cooldown_tick(),
                _ = ticks.watchdog.tick(), if self.stream.is_active() => self.watchdog_tick(),
                _ = ticks.janitor.tick() => self.janitor_tick(),
                _ = ticks.render.tick(), if self.stream.is_active() || !self.overlay.is_empty() => {
                    // Repaints are not state changes
                    self.render_tick();
                    continue;
                }
            }
            self.publish();
        }

        self.teardown();
    }

    // === Operator commands ===

    fn handle_command(&mut self, command: Command, ticks: &mut Ticks) {
        match command {
            Command::SetMonitoring(true) => {
                if self.transition(Transition::StartMonitoring) {
                    self.logs.info(Subsystem::System, "Monitoring started");
                    // First sensor and bin fetch right away
                    ticks.sensor.reset_immediately();
                    ticks.bins.reset_immediately();
                }
            }
            Command::SetMonitoring(false) => self.stop_monitoring(),
            Command::SetDetection(enabled) => {
                self.detection.set_enabled(enabled);
                let state = if enabled { "enabled" } else { "disabled" };
                self.logs
                    .info(Subsystem::Detection, format!("Detection {state}"));
            }
            Command::StartStream { reply } => {
                let result = self.manual_start();
                if let Err(e) = &result {
                    if e.is_benign() {
                        debug!("Manual stream start ignored: {e}");
                    } else {
                        self.logs
                            .warn(Subsystem::Stream, format!("Cannot start stream: {e}"));
                    }
                }
                let _ = reply.send(result);
            }
            Command::StopStream => self.stop_stream(StopReason::Operator),
            Command::ManualControl { command, reply } => {
                self.logs.info(
                    Subsystem::Actuation,
                    format!("Manual command: {command}"),
                );
                self.spawn_control(command, ControlOrigin::Manual(reply));
            }
            Command::SetDevices(devices) => {
                let devices = devices.normalized();
                self.controller.set_address(devices.controller.clone());
                self.logs.info(
                    Subsystem::System,
                    format!(
                        "Devices updated: camera {}, controller {}",
                        devices.camera.as_deref().unwrap_or("unset"),
                        devices.controller.as_deref().unwrap_or("unset")
                    ),
                );
                self.devices = devices;
            }
            Command::OverlayPng { reply } => {
                let png = self
                    .overlay
                    .encode_png()
                    .map_err(|e| StationError::PreconditionFailed(format!("overlay encode: {e}")));
                let _ = reply.send(png);
            }
            // Handled by the run loop
            Command::Shutdown => {}
        }
    }

    fn manual_start(&mut self) -> Result<(), StationError> {
        if self.stream.is_active() {
            return Err(StationError::AlreadyStreaming);
        }
        if self.devices.camera.is_none() {
            return Err(StationError::NoCameraConfigured);
        }
        if self.phase != SessionPhase::Scanning {
            return Err(StationError::PreconditionFailed(format!(
                "stream can only be started while scanning (currently {})",
                self.phase
            )));
        }
        self.start_stream()
    }

    fn stop_monitoring(&mut self) {
        if !self.phase.is_monitoring() {
            return;
        }
        self.stop_stream(StopReason::MonitoringStopped);
        self.timers.cancel_all();
        self.stream.release();
        self.in_flight.abort_polls();
        self.detection.finish();
        self.transition(Transition::StopMonitoring);
        self.logs.info(Subsystem::System, "Monitoring stopped");
    }

    // === Stream lifecycle ===

    fn start_stream(&mut self) -> Result<(), StationError> {
        let now = Instant::now();
        let id = self.stream.begin(self.devices.camera.as_deref(), now)?;
        self.transition(Transition::Arm);
        // Let the cleared source settle before attaching the new one
        self.timers
            .schedule(TimerKind::StreamAttach, self.timings.source_settle);
        self.logs
            .info(Subsystem::Stream, format!("Starting stream session {id}"));
        Ok(())
    }

    fn attach_source(&mut self, reconnect: bool) {
        let Some(camera) = self.devices.camera.clone() else {
            self.logs
                .warn(Subsystem::Stream, "Camera address removed; stopping stream");
            self.stop_stream(StopReason::Operator);
            return;
        };
        let attached = if reconnect {
            self.stream.reconnect(&camera)
        } else {
            self.stream.attach(&camera)
        };
        let Some((generation, url)) = attached else {
            return;
        };

        debug!("Attaching stream source {url}");
        self.spawn_reader(generation, &url);
        self.awaiting_first_frame = true;
        if reconnect {
            self.logs.info(Subsystem::Stream, "Reconnecting stream");
        } else {
            self.transition(Transition::StreamOpened);
        }
    }

    fn spawn_reader(&mut self, generation: u64, url: &str) {
        if let Some(previous) = self.reader.take() {
            previous.abort();
        }
        let mut frames = self.source.open(url);
        let tx = self.frames_tx.clone();
        self.reader = Some(tokio::spawn(async move {
            while let Some(item) = frames.next().await {
                let kind = match item {
                    Ok(jpeg) => StreamEventKind::Frame(Frame::from_jpeg(jpeg)),
                    Err(e) => StreamEventKind::Failed(e.to_string()),
                };
                let failed = matches!(kind, StreamEventKind::Failed(_));
                if tx.send(StreamEvent { generation, kind }).await.is_err() || failed {
                    return;
                }
            }
            let _ = tx
                .send(StreamEvent {
                    generation,
                    kind: StreamEventKind::Ended,
                })
                .await;
        }));
    }

    fn on_stream_event(&mut self, event: StreamEvent) {
        match event.kind {
            StreamEventKind::Frame(frame) => {
                let (width, height) = (frame.width, frame.height);
                if self.stream.on_frame(event.generation, frame) {
                    self.fresh_frame = true;
                    if self.awaiting_first_frame {
                        self.awaiting_first_frame = false;
                        self.logs.info(
                            Subsystem::Stream,
                            format!("Stream connected ({width}x{height})"),
                        );
                    }
                }
            }
            StreamEventKind::Failed(message) => self.on_stream_failure(event.generation, &message),
            StreamEventKind::Ended => self.on_stream_failure(event.generation, "stream ended"),
        }
    }

    fn on_stream_failure(&mut self, generation: u64, message: &str) {
        if !self.stream.on_failure(generation) {
            debug!("Ignoring event from detached stream reader: {message}");
            return;
        }
        self.reader = None;
        let delay = self.timings.reconnect_delay;
        self.logs.warn(
            Subsystem::Stream,
            format!(
                "Stream error: {message}; retrying in {}s",
                delay.as_secs_f32()
            ),
        );
        self.timers.schedule(TimerKind::Reconnect, delay);
    }

    /// Detach and end the current session. No-op when nothing is streaming.
    fn stop_stream(&mut self, reason: StopReason) {
        let now = Instant::now();
        let Some(session) = self.stream.end() else {
            return;
        };

        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        for kind in [
            TimerKind::StreamAttach,
            TimerKind::Reconnect,
            TimerKind::Grace,
            TimerKind::SortStop,
        ] {
            self.timers.cancel(kind);
        }
        self.proximity.reset_grace();
        if let Some(detect) = self.in_flight.detect.take() {
            detect.abort();
        }
        self.detection.finish();
        self.overlay.clear();
        self.awaiting_first_frame = false;
        self.fresh_frame = false;
        self.timers
            .schedule(TimerKind::StreamRelease, self.timings.source_settle);

        self.transition(Transition::StreamClosed);
        self.last_stop_reason = Some(reason);

        let seconds = session.duration_seconds(now);
        match reason {
            StopReason::Timeout => self.logs.warn(
                Subsystem::Stream,
                format!("Stream stopped: timeout after {seconds}s"),
            ),
            _ => self.logs.info(
                Subsystem::Stream,
                format!("Stream stopped ({reason}) after {seconds}s"),
            ),
        }
    }

    // === Timers and ticks ===

    fn on_timer(&mut self, kind: TimerKind) {
        match kind {
            TimerKind::StreamAttach => self.attach_source(false),
            TimerKind::Reconnect => {
                if self.stream.is_active() {
                    self.attach_source(true);
                }
            }
            TimerKind::StreamRelease => self.stream.release(),
            TimerKind::Grace => {
                if self.proximity.grace_elapsed(self.detection.is_detecting()) {
                    self.stop_stream(StopReason::ObjectLeft);
                } else {
                    debug!("Grace period ended with object present or detection running");
                }
            }
            TimerKind::SortStop => self.stop_stream(StopReason::Sorted),
        }
    }

    fn poll_sensor(&mut self) {
        if self.in_flight.sensor.is_some() {
            debug!("Sensor poll skipped: previous request outstanding");
            return;
        }
        let controller = self.controller.clone();
        let handle = self
            .calls
            .spawn(async move { Completion::Sensor(controller.sensor().await) });
        self.in_flight.sensor = Some(handle);
    }

    fn poll_bins(&mut self) {
        if self.in_flight.bins.is_some() {
            debug!("Bin poll skipped: previous request outstanding");
            return;
        }
        let controller = self.controller.clone();
        let handle = self
            .calls
            .spawn(async move { Completion::Bins(controller.bins().await) });
        self.in_flight.bins = Some(handle);
    }

    fn detection_tick(&mut self) {
        let Some(session) = self.stream.session().map(|s| s.id) else {
            return;
        };
        match self.detection.try_start(self.stream.current_frame()) {
            Ok(frame) => {
                let detector = self.detector.clone();
                let handle = self.calls.spawn(async move {
                    Completion::Detect {
                        session,
                        result: detector.detect(frame.jpeg).await,
                    }
                });
                self.in_flight.detect = Some(handle);
            }
            Err(reason) => debug!("Detection tick skipped: {reason}"),
        }
    }

    fn cooldown_tick(&mut self) {
        match self.gate.poll(Instant::now()) {
            GatePoll::Counting { remaining_secs } => {
                self.status_message = Some(format!("Cooldown: {remaining_secs}s"));
            }
            GatePoll::Finished => {
                self.transition(Transition::CooldownEnded {
                    streaming: self.stream.is_active(),
                });
                self.status_message = Some("Ready".to_string());
                self.logs.info(Subsystem::Actuation, "Cooldown over, ready to sort");
            }
            GatePoll::Ready => {}
        }
    }

    fn watchdog_tick(&mut self) {
        if self
            .stream
            .timed_out(Instant::now(), self.timings.stream_timeout)
        {
            self.stop_stream(StopReason::Timeout);
        }
    }

    fn janitor_tick(&mut self) {
        let removed = self.overlay.prune(Instant::now());
        if removed > 0 {
            debug!("Pruned {removed} expired detections");
        }
    }

    fn render_tick(&mut self) {
        let now = Instant::now();
        let Some(frame) = self.stream.current_frame() else {
            let (width, height) = self.overlay.canvas().dimensions();
            self.overlay.render(now, width, height);
            return;
        };
        let (width, height) = (frame.width, frame.height);
        self.overlay.render(now, width, height);

        if self.fresh_frame && self.annotated.subscriber_count() > 0 {
            self.fresh_frame = false;
            match self.overlay.composite(frame) {
                Ok(jpeg) => {
                    self.annotated.publish(jpeg);
                }
                Err(e) => debug!("Annotated frame skipped: {e}"),
            }
        }
    }

    // === Completed network calls ===

    fn on_completion(&mut self, done: Result<Completion, JoinError>) {
        let completion = match done {
            Ok(completion) => completion,
            Err(e) if e.is_cancelled() => return,
            Err(e) => {
                error!("Background call panicked: {e}");
                return;
            }
        };

        match completion {
            Completion::Sensor(result) => {
                self.in_flight.sensor = None;
                self.on_sensor(result);
            }
            Completion::Bins(result) => {
                self.in_flight.bins = None;
                self.on_bins(result);
            }
            Completion::Detect { session, result } => self.on_detections(session, result),
            Completion::Control {
                command,
                origin,
                result,
            } => self.on_control(command, origin, result),
        }
    }

    fn on_sensor(&mut self, result: Result<SensorReading, ResourceError>) {
        let reading = match result {
            Ok(reading) => reading,
            Err(e) => {
                // Previous reading is kept
                self.logs
                    .warn(Subsystem::Sensor, format!("Sensor poll failed: {e}"));
                return;
            }
        };
        if !self.phase.is_monitoring() {
            return;
        }
        if !reading.is_valid() {
            debug!("Sensor reported an invalid echo");
        }

        let was_present = self
            .proximity
            .last_reading()
            .map(|r| r.object_detected)
            .unwrap_or(false);
        if reading.object_detected != was_present {
            let message = if reading.object_detected {
                format!("Object detected at {:.1}cm", reading.distance)
            } else {
                "Object no longer detected".to_string()
            };
            self.logs.info(Subsystem::Sensor, message);
        }

        let now = Instant::now();
        let action = self
            .proximity
            .observe(reading, self.phase, self.stream.is_active(), now);
        match action {
            ProximityAction::None => {}
            ProximityAction::StartStream => {
                if let Err(e) = self.start_stream() {
                    self.logs
                        .warn(Subsystem::Stream, format!("Cannot start stream: {e}"));
                }
            }
            ProximityAction::ArmGrace => {
                let grace = self.timings.grace_period;
                self.timers.schedule(TimerKind::Grace, grace);
                self.logs.info(
                    Subsystem::Sensor,
                    format!(
                        "Object left; stopping stream in {}s unless it returns",
                        grace.as_secs()
                    ),
                );
            }
            ProximityAction::CancelGrace => {
                self.timers.cancel(TimerKind::Grace);
                self.logs
                    .info(Subsystem::Sensor, "Object returned; keeping stream");
            }
        }
    }

    fn on_bins(&mut self, result: Result<BinCapacityData, ResourceError>) {
        let data = match result {
            Ok(data) => data,
            Err(e) => {
                self.logs
                    .warn(Subsystem::Bins, format!("Bin poll failed: {e}"));
                return;
            }
        };

        let update = self.bins.apply(data);
        if update.fallback_thresholds {
            debug!("Controller bin thresholds invalid, using defaults");
        }
        let Some(snapshot) = self.bins.snapshot().copied() else {
            return;
        };
        for bin in update.faults {
            self.logs.warn(
                Subsystem::Bins,
                format!("{bin} sensor fault (distance {:.1}cm)", snapshot.get(bin).distance),
            );
        }
        for bin in update.alerts {
            let status = snapshot.get(bin);
            let message = format!("{bin} is full ({:.1}cm)", status.distance);
            self.status_message = Some(message.clone());
            self.logs.push(Subsystem::Bins, LogLevel::Warn, message);
        }
    }

    fn on_detections(&mut self, session: u64, result: Result<Vec<Detection>, ResourceError>) {
        let current = self.stream.session().map(|s| s.id);
        if current != Some(session) {
            debug!("Dropping detections from ended stream session {session}");
            return;
        }
        self.in_flight.detect = None;
        self.detection.finish();

        let detections = match result {
            Ok(detections) => detections,
            Err(e) => {
                self.detection.record_failure();
                self.logs
                    .warn(Subsystem::Detection, format!("Detection failed: {e}"));
                return;
            }
        };
        if detections.is_empty() {
            debug!("No objects in frame");
            return;
        }

        let evaluation = self.detection.evaluate(detections);
        for item in &evaluation.accepted {
            self.logs.info(
                Subsystem::Detection,
                format!(
                    "{} -> {} ({:.0}%)",
                    item.detection.class,
                    item.category,
                    item.detection.confidence * 100.0
                ),
            );
        }
        self.overlay.add(evaluation.accepted, Instant::now());

        if let Some(top) = evaluation.trigger {
            self.trigger(top);
        }
    }

    fn trigger(&mut self, top: Classified) {
        if self.phase != SessionPhase::Streaming {
            debug!("Qualifying detection outside streaming phase ignored");
            return;
        }
        let now = Instant::now();
        let Some(command) = self.gate.try_begin(top.category, now) else {
            debug!("Qualifying detection ignored during cooldown");
            return;
        };
        let window = self.gate.window().map_or(now, |w| w.started_at);

        self.transition(Transition::CooldownStarted);
        self.logs.info(
            Subsystem::Actuation,
            format!(
                "Sorting {} as {} ({:.0}%)",
                top.detection.class,
                top.category,
                top.detection.confidence * 100.0
            ),
        );
        self.status_message = Some(format!("Sorting: {}", top.category));
        self.spawn_control(command, ControlOrigin::Trigger { window });

        // Give the sorter time before the camera goes away
        self.timers.cancel(TimerKind::SortStop);
        self.timers
            .schedule(TimerKind::SortStop, self.timings.post_trigger_stop);
    }

    fn spawn_control(&mut self, command: ControlCommand, origin: ControlOrigin) {
        self.detection.stats_mut().commands_sent += 1;
        let controller = self.controller.clone();
        self.calls.spawn(async move {
            Completion::Control {
                command,
                origin,
                result: controller.control(command).await,
            }
        });
    }

    fn on_control(
        &mut self,
        command: ControlCommand,
        origin: ControlOrigin,
        result: Result<Payload, ResourceError>,
    ) {
        let outcome = match result {
            Ok(payload) => {
                self.logs.info(
                    Subsystem::Actuation,
                    format!("Command {command} acknowledged"),
                );
                Ok(payload)
            }
            Err(e) => {
                self.detection.stats_mut().commands_failed += 1;
                let message = format!("Command {command} failed: {e}");
                self.status_message = Some(message.clone());
                self.logs.error(Subsystem::Actuation, message);
                // Let the next qualifying detection retry, unless a newer
                // trigger already owns the window
                if let ControlOrigin::Trigger { window } = origin {
                    if self.gate.cancel(window) {
                        self.transition(Transition::CooldownEnded {
                            streaming: self.stream.is_active(),
                        });
                    }
                }
                Err(StationError::Remote(e))
            }
        };
        if let ControlOrigin::Manual(reply) = origin {
            let _ = reply.send(outcome);
        }
    }

    // === State ===

    fn transition(&mut self, transition: Transition) -> bool {
        match self.phase.next(transition) {
            Some(next) => {
                if next != self.phase {
                    debug!("Session {} -> {}", self.phase, next);
                }
                self.phase = next;
                true
            }
            None => {
                debug!("Rejected {transition:?} in phase {}", self.phase);
                false
            }
        }
    }

    fn build_snapshot(&self, now: Instant) -> StationSnapshot {
        StationSnapshot {
            phase: self.phase,
            monitoring: self.phase.is_monitoring(),
            detection_enabled: self.detection.is_enabled(),
            detecting: self.detection.is_detecting(),
            sensor: self.proximity.last_reading(),
            stream: self.stream.session().map(|session| StreamInfo {
                session_id: session.id,
                duration_seconds: session.duration_seconds(now),
                frames_received: self.stream.frames_received(),
                reconnects: self.stream.reconnects(),
            }),
            last_stop_reason: self.last_stop_reason,
            cooldown_remaining_secs: self.gate.remaining(now).as_millis().div_ceil(1000) as u64,
            sensor_cooldown_remaining_secs: self.proximity.cooldown_remaining(now).as_secs(),
            bins: self.bins.snapshot().copied(),
            stats: *self.detection.stats(),
            active_detections: self.overlay.visible(now).count(),
            status_message: self.status_message.clone(),
            devices: self.devices.clone(),
            logs: self.logs.clone(),
        }
    }

    fn publish(&self) {
        self.snapshot_tx
            .send_replace(self.build_snapshot(Instant::now()));
    }

    fn teardown(&mut self) {
        self.stop_monitoring();
        self.timers.cancel_all();
        self.calls.abort_all();
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        self.annotated.close();
        self.logs.info(Subsystem::System, "Station stopped");
        self.publish();
    }
}

impl StationSnapshot {
    fn empty() -> Self {
        Self {
            phase: SessionPhase::Idle,
            monitoring: false,
            detection_enabled: true,
            detecting: false,
            sensor: None,
            stream: None,
            last_stop_reason: None,
            cooldown_remaining_secs: 0,
            sensor_cooldown_remaining_secs: 0,
            bins: None,
            stats: DetectionStats::default(),
            active_detections: 0,
            status_message: None,
            devices: DeviceAddresses::default(),
            logs: StationLogs::default(),
        }
    }
}
