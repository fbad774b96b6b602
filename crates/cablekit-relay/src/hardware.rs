//! Hardware service
//!
//! Owns the serial link to the firmware and serializes access to it.
//! The wire carries no ids, so correlation is positional: requests are
//! written one at a time and the oldest in-flight request is resolved
//! by the first reply of its expected class. Everything else the
//! firmware says is telemetry folded into the status mirror.
//!
//! An emergency stop bypasses the queue: it is written immediately even
//! while another command is in flight, and the positional rule still
//! holds because the firmware answers strictly in order.

use cablekit_communication::{
    DeviceCommand, DeviceReply, LineTransport, ReadWrite, StatusSnapshot, WireStatus,
};
use cablekit_core::{OperationalState, Position, Result};
use cablekit_settings::HardwareSettings;
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot, watch};

/// Outcome of one firmware command, from the submitter's view
pub type HardwareResult = std::result::Result<DeviceReply, String>;

/// A queued firmware command with its response slot
pub struct HardwareRequest {
    /// Command to write on the wire
    pub command: DeviceCommand,
    /// Resolved with the correlated reply or a failure reason
    pub respond: oneshot::Sender<HardwareResult>,
}

/// Out-of-band events surfaced by the hardware service
#[derive(Debug, Clone, PartialEq)]
pub enum RelayEvent {
    /// A calibration cycle finished
    Calibration {
        /// Whether the cycle completed successfully.
        success: bool,
        /// Failure reason when `success` is false.
        error: Option<String>,
    },
    /// The firmware entered emergency stop
    Emergency,
    /// A fault not tied to any in-flight command
    Fault(String),
}

/// Cloneable handle for submitting commands and watching status
#[derive(Clone)]
pub struct HardwareHandle {
    normal: mpsc::UnboundedSender<HardwareRequest>,
    priority: mpsc::UnboundedSender<HardwareRequest>,
    status: watch::Receiver<StatusSnapshot>,
}

impl HardwareHandle {
    /// Latest status mirror
    pub fn status(&self) -> StatusSnapshot {
        *self.status.borrow()
    }

    /// Subscribe to status mirror changes
    pub fn watch(&self) -> watch::Receiver<StatusSnapshot> {
        self.status.clone()
    }

    /// Enqueue a command without waiting for its reply.
    ///
    /// The send happens before this returns, so two `submit` calls from
    /// the same task reach the hardware queue in call order. Emergency
    /// stops take the priority lane and are written ahead of anything
    /// waiting in the normal queue.
    pub fn submit(&self, command: DeviceCommand) -> oneshot::Receiver<HardwareResult> {
        let (tx, rx) = oneshot::channel();
        let lane = if matches!(command, DeviceCommand::EmergencyStop) {
            &self.priority
        } else {
            &self.normal
        };
        if let Err(rejected) = lane.send(HardwareRequest {
            command,
            respond: tx,
        }) {
            let _ = rejected
                .0
                .respond
                .send(Err("hardware service stopped".to_string()));
        }
        rx
    }

    /// Submit a command and wait for its correlated reply
    pub async fn execute(&self, command: DeviceCommand) -> HardwareResult {
        self.submit(command)
            .await
            .map_err(|_| "hardware service stopped".to_string())?
    }
}

/// Factory producing a fresh byte stream to the firmware.
///
/// Called on startup and again on every reconnect attempt.
pub type PortFactory = Box<dyn FnMut() -> Result<Box<dyn ReadWrite>> + Send>;

struct InFlight {
    command: DeviceCommand,
    respond: oneshot::Sender<HardwareResult>,
    deadline: Instant,
}

/// Mirrored view of the firmware's state
struct Mirror {
    position: Position,
    state: OperationalState,
    calibrated: bool,
    calibrating: bool,
    connected: bool,
}

impl Mirror {
    fn new() -> Self {
        Self {
            position: Position::default(),
            state: OperationalState::Uncalibrated,
            calibrated: false,
            calibrating: false,
            connected: false,
        }
    }

    fn snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            position: self.position,
            is_connected: self.connected,
            is_calibrated: self.calibrated,
            emergency_stop: self.state == OperationalState::EmergencyStop,
            system_active: self.state == OperationalState::Active,
        }
    }
}

/// The hardware service loop
pub struct HardwareService {
    settings: HardwareSettings,
    factory: PortFactory,
    transport: Option<LineTransport>,
    mirror: Mirror,
    in_flight: VecDeque<InFlight>,
    normal_rx: mpsc::UnboundedReceiver<HardwareRequest>,
    priority_rx: mpsc::UnboundedReceiver<HardwareRequest>,
    events: mpsc::UnboundedSender<RelayEvent>,
    status_tx: watch::Sender<StatusSnapshot>,
    next_reconnect: Instant,
    reconnect_attempt: u32,
}

impl HardwareService {
    /// Spawn the service on a dedicated thread and return its handle.
    ///
    /// The loop does blocking serial I/O with short timeouts, so it
    /// lives on a plain thread rather than the async runtime.
    pub fn spawn(
        factory: PortFactory,
        settings: HardwareSettings,
        events: mpsc::UnboundedSender<RelayEvent>,
    ) -> HardwareHandle {
        let (normal_tx, normal_rx) = mpsc::unbounded_channel();
        let (priority_tx, priority_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(StatusSnapshot::default());

        let mut service = Self {
            settings,
            factory,
            transport: None,
            mirror: Mirror::new(),
            in_flight: VecDeque::new(),
            normal_rx,
            priority_rx,
            events,
            status_tx,
            next_reconnect: Instant::now(),
            reconnect_attempt: 0,
        };

        std::thread::Builder::new()
            .name("cablekit-hardware".to_string())
            .spawn(move || service.run())
            .ok();

        HardwareHandle {
            normal: normal_tx,
            priority: priority_tx,
            status: status_rx,
        }
    }

    fn run(&mut self) {
        loop {
            if self.transport.is_none() {
                self.try_connect();
            }

            if self.read_phase().is_err() {
                self.disconnect("link lost");
            }
            let open = self.fetch_phase();
            self.timeout_phase();
            self.publish();

            if !open && self.in_flight.is_empty() {
                tracing::debug!("all handles dropped, hardware service stopping");
                return;
            }
            std::thread::sleep(Duration::from_millis(2));
        }
    }

    fn try_connect(&mut self) {
        if Instant::now() < self.next_reconnect {
            return;
        }
        match (self.factory)() {
            Ok(stream) => {
                tracing::info!("firmware link established");
                self.transport = Some(LineTransport::new(stream));
                self.mirror.connected = true;
                self.reconnect_attempt = 0;
            }
            Err(e) => {
                self.reconnect_attempt = self.reconnect_attempt.saturating_add(1);
                tracing::warn!(attempt = self.reconnect_attempt, "firmware connect failed: {}", e);
                self.next_reconnect =
                    Instant::now() + Duration::from_millis(self.settings.reconnect_delay_ms);
            }
        }
    }

    fn disconnect(&mut self, reason: &str) {
        tracing::warn!("firmware link down: {}", reason);
        self.transport = None;
        self.mirror.connected = false;
        self.next_reconnect =
            Instant::now() + Duration::from_millis(self.settings.reconnect_delay_ms);
        for pending in self.in_flight.drain(..) {
            let _ = pending.respond.send(Err("hardware disconnected".to_string()));
        }
    }

    /// Drain firmware lines and fold them into the mirror
    fn read_phase(&mut self) -> Result<()> {
        let Some(transport) = self.transport.as_mut() else {
            return Ok(());
        };
        for line in transport.poll_lines()? {
            self.handle_line(&line);
        }
        Ok(())
    }

    fn handle_line(&mut self, line: &str) {
        let reply = match DeviceReply::parse(line) {
            Ok(reply) => reply,
            Err(e) => {
                tracing::warn!("dropping malformed firmware line: {}", e);
                return;
            }
        };

        match reply {
            DeviceReply::Calibrated => {
                self.mirror.calibrating = false;
                self.mirror.calibrated = true;
                if self.mirror.state == OperationalState::Calibrating {
                    self.mirror.state = OperationalState::Ready;
                }
                let _ = self.events.send(RelayEvent::Calibration {
                    success: true,
                    error: None,
                });
            }
            DeviceReply::Error(message) => match self.in_flight.pop_front() {
                Some(pending) => {
                    let _ = pending.respond.send(Err(message));
                }
                None => {
                    let _ = self.events.send(RelayEvent::Fault(message));
                }
            },
            DeviceReply::Pos(position) => {
                self.mirror.position = position;
                // Resolve the oldest in-flight command expecting a
                // position; a line with no taker is pure telemetry.
                if let Some(idx) = self
                    .in_flight
                    .iter()
                    .position(|p| p.command.expects_position_reply())
                {
                    if let Some(pending) = self.in_flight.remove(idx) {
                        let _ = pending.respond.send(Ok(DeviceReply::Pos(position)));
                    }
                }
            }
            DeviceReply::Status(status) => {
                let resolved = self
                    .in_flight
                    .iter()
                    .position(|p| !p.command.expects_position_reply())
                    .and_then(|idx| self.in_flight.remove(idx));
                if let Some(pending) = &resolved {
                    if pending.command == DeviceCommand::Calibrate {
                        self.mirror.calibrating = true;
                    }
                }
                self.reconcile(status);
                if let Some(pending) = resolved {
                    let _ = pending.respond.send(Ok(DeviceReply::Status(status)));
                }
            }
        }
    }

    /// Fold a wire status into the mirror, emitting an emergency event
    /// on the transition into EmergencyStop.
    fn reconcile(&mut self, status: WireStatus) {
        let state = match status {
            WireStatus::Ready => OperationalState::Ready,
            WireStatus::Active => OperationalState::Active,
            WireStatus::Emergency => OperationalState::EmergencyStop,
            WireStatus::Inactive => {
                if self.mirror.calibrating {
                    OperationalState::Calibrating
                } else {
                    OperationalState::Uncalibrated
                }
            }
        };

        // ACTIVE is only reachable by calibrated firmware. READY is
        // also reported after a reset from an uncalibrated emergency
        // stop, so it proves nothing about calibration; only the
        // CALIBRATED line sets the flag.
        if status == WireStatus::Active {
            self.mirror.calibrated = true;
        }
        if state == OperationalState::EmergencyStop {
            self.mirror.calibrating = false;
            if self.mirror.state != OperationalState::EmergencyStop {
                let _ = self.events.send(RelayEvent::Emergency);
            }
        }
        self.mirror.state = state;
    }

    /// Pull requests off the queues and put them on the wire.
    ///
    /// Returns false once both request channels are closed.
    fn fetch_phase(&mut self) -> bool {
        let mut normal_open = true;
        let mut priority_open = true;

        loop {
            match self.priority_rx.try_recv() {
                Ok(request) => {
                    // An emergency stop cancels everything still waiting
                    // in the normal queue; in-flight commands keep their
                    // wire slots so positional correlation stays intact.
                    self.cancel_queued("cancelled by emergency stop");
                    self.dispatch(request);
                }
                Err(mpsc::error::TryRecvError::Empty) => break,
                Err(mpsc::error::TryRecvError::Disconnected) => {
                    priority_open = false;
                    break;
                }
            }
        }

        if self.in_flight.is_empty() {
            match self.normal_rx.try_recv() {
                Ok(request) => self.dispatch(request),
                Err(mpsc::error::TryRecvError::Empty) => {}
                Err(mpsc::error::TryRecvError::Disconnected) => normal_open = false,
            }
        }

        normal_open || priority_open
    }

    fn cancel_queued(&mut self, reason: &str) {
        while let Ok(request) = self.normal_rx.try_recv() {
            tracing::debug!(command = %request.command, "cancelling queued command");
            let _ = request.respond.send(Err(reason.to_string()));
        }
    }

    fn dispatch(&mut self, request: HardwareRequest) {
        let Some(transport) = self.transport.as_mut() else {
            let _ = request.respond.send(Err("hardware disconnected".to_string()));
            return;
        };
        match transport.write_line(&request.command.encode()) {
            Ok(()) => {
                self.in_flight.push_back(InFlight {
                    command: request.command,
                    respond: request.respond,
                    deadline: Instant::now()
                        + Duration::from_millis(self.settings.command_timeout_ms),
                });
            }
            Err(e) => {
                let _ = request.respond.send(Err(e.to_string()));
                self.disconnect("write failed");
            }
        }
    }

    /// Expire the oldest in-flight request past its deadline.
    ///
    /// Only the head can expire; the firmware answers in order, so a
    /// stuck head implies nothing behind it has been answered either.
    fn timeout_phase(&mut self) {
        if self
            .in_flight
            .front()
            .is_some_and(|p| Instant::now() >= p.deadline)
        {
            let pending = self.in_flight.pop_front().unwrap();
            tracing::warn!(command = %pending.command, "firmware timeout");
            let _ = pending.respond.send(Err("firmware timeout".to_string()));
        }
    }

    fn publish(&mut self) {
        let snapshot = self.mirror.snapshot();
        self.status_tx.send_if_modified(|current| {
            if *current == snapshot {
                false
            } else {
                *current = snapshot;
                true
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cablekit_communication::memory_pair;

    fn fast_settings() -> HardwareSettings {
        HardwareSettings {
            serial_port: None,
            baud_rate: 115_200,
            command_timeout_ms: 200,
            reconnect_attempts: 3,
            reconnect_delay_ms: 10,
        }
    }

    /// Fake firmware answering scripted replies line by line
    fn spawn_scripted(replies: Vec<(&'static str, &'static str)>) -> (HardwareHandle, mpsc::UnboundedReceiver<RelayEvent>) {
        let (device_end, host_end) = memory_pair();
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        std::thread::spawn(move || {
            let mut transport = LineTransport::new(Box::new(device_end));
            let mut script = replies.into_iter();
            loop {
                match transport.poll_lines() {
                    Ok(lines) => {
                        for line in lines {
                            let (expect, reply) =
                                script.next().unwrap_or(("", "ERROR:script exhausted"));
                            if !expect.is_empty() {
                                assert_eq!(line, expect);
                            }
                            transport.write_line(reply).unwrap();
                        }
                    }
                    Err(_) => return,
                }
                std::thread::sleep(Duration::from_millis(1));
            }
        });

        let mut stream = Some(Box::new(host_end) as Box<dyn ReadWrite>);
        let factory: PortFactory = Box::new(move || {
            stream
                .take()
                .ok_or_else(|| cablekit_core::Error::other("already taken"))
        });
        (
            HardwareService::spawn(factory, fast_settings(), events_tx),
            events_rx,
        )
    }

    #[tokio::test]
    async fn resolves_replies_in_submission_order() {
        let (handle, _events) = spawn_scripted(vec![
            ("CALIBRATE", "STATUS:INACTIVE"),
            ("ACTIVATE", "STATUS:ACTIVE"),
            ("GET_POS", "POS:0.000,0.000,2.500"),
        ]);

        assert_eq!(
            handle.execute(DeviceCommand::Calibrate).await.unwrap(),
            DeviceReply::Status(WireStatus::Inactive)
        );
        assert_eq!(
            handle.execute(DeviceCommand::Activate).await.unwrap(),
            DeviceReply::Status(WireStatus::Active)
        );
        assert_eq!(
            handle.execute(DeviceCommand::GetPos).await.unwrap(),
            DeviceReply::Pos(Position::new(0.0, 0.0, 2.5))
        );
        assert!(handle.status().system_active);
    }

    #[tokio::test]
    async fn error_reply_fails_the_in_flight_command() {
        let (handle, _events) = spawn_scripted(vec![("ACTIVATE", "ERROR:system not calibrated")]);

        let err = handle.execute(DeviceCommand::Activate).await.unwrap_err();
        assert_eq!(err, "system not calibrated");
    }

    #[tokio::test]
    async fn unanswered_command_times_out() {
        // Script answers nothing by never matching a line.
        let (device_end, host_end) = memory_pair();
        let _keep_alive = device_end;
        let (events_tx, _events_rx) = mpsc::unbounded_channel();
        let mut stream = Some(Box::new(host_end) as Box<dyn ReadWrite>);
        let factory: PortFactory = Box::new(move || {
            stream
                .take()
                .ok_or_else(|| cablekit_core::Error::other("already taken"))
        });
        let handle = HardwareService::spawn(factory, fast_settings(), events_tx);

        let err = handle.execute(DeviceCommand::GetPos).await.unwrap_err();
        assert_eq!(err, "firmware timeout");
    }

    #[tokio::test]
    async fn emergency_cancels_queued_commands_but_not_in_flight_slots() {
        // Firmware that only ever answers the emergency stop.
        let (device_end, host_end) = memory_pair();
        std::thread::spawn(move || {
            let mut transport = LineTransport::new(Box::new(device_end));
            loop {
                match transport.poll_lines() {
                    Ok(lines) => {
                        for line in lines {
                            if line == "EMERGENCY_STOP" {
                                transport.write_line("STATUS:EMERGENCY").unwrap();
                            }
                        }
                    }
                    Err(_) => return,
                }
                std::thread::sleep(Duration::from_millis(1));
            }
        });

        let (events_tx, _events_rx) = mpsc::unbounded_channel();
        let mut stream = Some(Box::new(host_end) as Box<dyn ReadWrite>);
        let factory: PortFactory = Box::new(move || {
            stream
                .take()
                .ok_or_else(|| cablekit_core::Error::other("already taken"))
        });
        let handle = HardwareService::spawn(factory, fast_settings(), events_tx);

        // First request goes in flight, second waits in the queue.
        let stuck = {
            let handle = handle.clone();
            tokio::spawn(async move { handle.execute(DeviceCommand::GetPos).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        let queued = {
            let handle = handle.clone();
            tokio::spawn(async move { handle.execute(DeviceCommand::GetPos).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(
            handle.execute(DeviceCommand::EmergencyStop).await.unwrap(),
            DeviceReply::Status(WireStatus::Emergency)
        );
        assert_eq!(
            queued.await.unwrap().unwrap_err(),
            "cancelled by emergency stop"
        );
        // The in-flight slot is kept; with no reply it times out instead.
        assert_eq!(stuck.await.unwrap().unwrap_err(), "firmware timeout");
    }

    #[tokio::test]
    async fn ready_after_uncalibrated_reset_does_not_mark_calibrated() {
        let (handle, _events) = spawn_scripted(vec![
            ("EMERGENCY_STOP", "STATUS:EMERGENCY"),
            ("RESET_EMERGENCY", "STATUS:READY"),
        ]);
        let mut watch = handle.watch();

        handle.execute(DeviceCommand::EmergencyStop).await.unwrap();
        watch.wait_for(|s| s.emergency_stop).await.unwrap();

        // Firmware that was never calibrated reports READY after the
        // reset; the mirror must not infer calibration from that.
        handle
            .execute(DeviceCommand::ResetEmergency)
            .await
            .unwrap();
        let snapshot = *watch.wait_for(|s| !s.emergency_stop).await.unwrap();
        assert!(!snapshot.is_calibrated);
    }

    #[tokio::test]
    async fn calibrated_line_raises_event_and_updates_mirror() {
        let (device_end, host_end) = memory_pair();
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let mut stream = Some(Box::new(host_end) as Box<dyn ReadWrite>);
        let factory: PortFactory = Box::new(move || {
            stream
                .take()
                .ok_or_else(|| cablekit_core::Error::other("already taken"))
        });
        let handle = HardwareService::spawn(factory, fast_settings(), events_tx);

        let mut firmware = LineTransport::new(Box::new(device_end));
        firmware.write_line("CALIBRATED").unwrap();

        assert_eq!(
            events_rx.recv().await.unwrap(),
            RelayEvent::Calibration {
                success: true,
                error: None
            }
        );
        let mut watch = handle.watch();
        watch
            .wait_for(|snapshot| snapshot.is_calibrated)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn unsolicited_emergency_status_raises_event() {
        let (device_end, host_end) = memory_pair();
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let mut stream = Some(Box::new(host_end) as Box<dyn ReadWrite>);
        let factory: PortFactory = Box::new(move || {
            stream
                .take()
                .ok_or_else(|| cablekit_core::Error::other("already taken"))
        });
        let handle = HardwareService::spawn(factory, fast_settings(), events_tx);

        let mut firmware = LineTransport::new(Box::new(device_end));
        firmware.write_line("STATUS:EMERGENCY").unwrap();

        assert_eq!(events_rx.recv().await.unwrap(), RelayEvent::Emergency);
        let mut watch = handle.watch();
        watch
            .wait_for(|snapshot| snapshot.emergency_stop)
            .await
            .unwrap();
    }
}
