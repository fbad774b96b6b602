//! Periodic and event-driven broadcasts
//!
//! Three background tasks keep every client informed: a position loop
//! polling the firmware at the configured rate, a slower status loop,
//! and an event forwarder that pushes calibration results, emergency
//! transitions, and faults the moment they happen.

use crate::hardware::{HardwareHandle, RelayEvent};
use crate::server::ClientRegistry;
use cablekit_communication::{
    now_millis, BroadcastFrame, CalibrationOutcome, DeviceCommand, ErrorData,
};
use cablekit_settings::TimingSettings;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Spawn the broadcast tasks
pub fn spawn_broadcasters(
    registry: Arc<ClientRegistry>,
    hardware: HardwareHandle,
    timing: TimingSettings,
    mut events: mpsc::UnboundedReceiver<RelayEvent>,
) {
    let position_period = Duration::from_secs_f64(1.0 / timing.position_rate_hz);
    let status_period = Duration::from_secs_f64(1.0 / timing.status_rate_hz);

    // Position loop. The poll itself refreshes the mirror, so even the
    // status loop and get_status benefit from it.
    {
        let registry = registry.clone();
        let hardware = hardware.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(position_period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                let _ = hardware.execute(DeviceCommand::GetPos).await;
                let snapshot = hardware.status();
                if snapshot.is_connected && registry.client_count() > 0 {
                    let frame = BroadcastFrame::PositionUpdate {
                        data: snapshot.position,
                        timestamp: now_millis(),
                    };
                    registry.broadcast_line(&frame.encode());
                }
            }
        });
    }

    // Status loop.
    {
        let registry = registry.clone();
        let hardware = hardware.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(status_period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                if registry.client_count() > 0 {
                    let frame = BroadcastFrame::StatusUpdate {
                        data: hardware.status(),
                        timestamp: now_millis(),
                    };
                    registry.broadcast_line(&frame.encode());
                }
            }
        });
    }

    // Event forwarder.
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                RelayEvent::Calibration { success, error } => {
                    tracing::info!(success, "calibration cycle finished");
                    let frame = BroadcastFrame::CalibrationResult {
                        data: CalibrationOutcome { success, error },
                        timestamp: now_millis(),
                    };
                    registry.broadcast_line(&frame.encode());
                    push_status(&registry, &hardware);
                }
                RelayEvent::Emergency => {
                    tracing::warn!("emergency stop reported by firmware");
                    push_status(&registry, &hardware);
                }
                RelayEvent::Fault(message) => {
                    tracing::warn!("firmware fault: {}", message);
                    let frame = BroadcastFrame::Error {
                        data: ErrorData { message },
                        timestamp: now_millis(),
                    };
                    registry.broadcast_line(&frame.encode());
                }
            }
        }
    });
}

/// Broadcast a status update immediately, outside the periodic cycle
fn push_status(registry: &ClientRegistry, hardware: &HardwareHandle) {
    let frame = BroadcastFrame::StatusUpdate {
        data: hardware.status(),
        timestamp: now_millis(),
    };
    registry.broadcast_line(&frame.encode());
}
