//! Relay assembly
//!
//! Wires the hardware service, the client server, and the broadcast
//! tasks together from one configuration. With no serial port
//! configured the relay hosts a simulated firmware loop over an
//! in-memory port pair, so the whole stack runs without hardware.

use crate::broadcast::spawn_broadcasters;
use crate::hardware::{HardwareHandle, HardwareService, PortFactory};
use crate::server::{run_server, ClientRegistry, ServerContext};
use cablekit_communication::{memory_pair, open_port, ReadWrite};
use cablekit_core::{Error, Result};
use cablekit_firmware::{FirmwareConfig, FirmwareLoop, NoEmergencyInput};
use cablekit_settings::Config;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

/// A running relay
pub struct RelayHandle {
    /// Bound address of the client socket
    pub addr: SocketAddr,
    /// Handle to the hardware service
    pub hardware: HardwareHandle,
}

/// The relay daemon
pub struct Relay;

impl Relay {
    /// Start every component of the relay and return its handle.
    ///
    /// The returned handle does not own the spawned tasks; they run
    /// until the process exits.
    pub async fn spawn(config: Config) -> Result<RelayHandle> {
        let bounds = config
            .workspace
            .to_bounds()
            .map_err(|e| Error::other(e.to_string()))?;
        let policy = config.workspace.bounds_policy;

        let factory: PortFactory = match &config.hardware.serial_port {
            Some(port) => {
                tracing::info!(port = %port, baud = config.hardware.baud_rate, "using serial firmware link");
                let port = port.clone();
                let baud = config.hardware.baud_rate;
                Box::new(move || open_port(&port, baud))
            }
            None => {
                tracing::info!("no serial port configured, running simulated firmware");
                let firmware_config = FirmwareConfig {
                    bounds,
                    policy,
                    speed: config.motion.speed,
                    tick_rate_hz: config.motion.tick_rate_hz,
                    home: config.motion.home_position(),
                    calibration_secs: config.motion.calibration_secs,
                };
                Box::new(move || {
                    let (device_end, host_end) = memory_pair();
                    std::thread::Builder::new()
                        .name("cablekit-firmware-sim".to_string())
                        .spawn(move || {
                            let mut firmware = FirmwareLoop::new(
                                Box::new(device_end),
                                Box::new(NoEmergencyInput),
                                firmware_config,
                            );
                            if let Err(e) = firmware.run() {
                                tracing::error!("simulated firmware stopped: {}", e);
                            }
                        })
                        .map_err(Error::Io)?;
                    Ok(Box::new(host_end) as Box<dyn ReadWrite>)
                })
            }
        };

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let hardware = HardwareService::spawn(factory, config.hardware.clone(), events_tx);

        let listener = TcpListener::bind(config.server.bind_addr())
            .await
            .map_err(Error::Io)?;
        let addr = listener.local_addr().map_err(Error::Io)?;
        tracing::info!(addr = %addr, "listening for clients");

        let registry = Arc::new(ClientRegistry::new());
        let ctx = Arc::new(ServerContext {
            hardware: hardware.clone(),
            bounds,
            policy,
        });

        tokio::spawn(run_server(listener, registry.clone(), ctx));
        spawn_broadcasters(registry, hardware.clone(), config.timing, events_rx);

        Ok(RelayHandle { addr, hardware })
    }
}
