//! End-to-end tests over the simulated rig: real TCP clients, the full
//! relay stack, and the firmware loop on an in-memory serial pair.

use cablekit_communication::{
    decode_client_bound, BroadcastFrame, ClientBound, CommandChannel, CommandChannelConfig,
    ReconnectPolicy,
};
use cablekit_core::{CommandError, Position};
use cablekit_relay::Relay;
use cablekit_settings::Config;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::mpsc;

fn test_config() -> Config {
    let mut config = Config::default();
    config.server.port = 0;
    config.hardware.serial_port = None;
    config.hardware.command_timeout_ms = 1000;
    config.motion.speed = 50.0;
    config.motion.tick_rate_hz = 200.0;
    config.motion.calibration_secs = 0.05;
    config.timing.position_rate_hz = 50.0;
    config.timing.status_rate_hz = 20.0;
    config
}

fn client_policy() -> ReconnectPolicy {
    ReconnectPolicy {
        base_delay: Duration::from_millis(10),
        max_attempts: 10,
    }
}

async fn wait_for_calibration(broadcasts: &mut mpsc::UnboundedReceiver<BroadcastFrame>) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let frame = tokio::time::timeout_at(deadline, broadcasts.recv())
            .await
            .expect("calibration result never arrived")
            .expect("broadcast channel closed");
        if let BroadcastFrame::CalibrationResult { data, .. } = frame {
            assert!(data.success);
            return;
        }
    }
}

#[tokio::test]
async fn full_session_over_simulated_rig() {
    let relay = Relay::spawn(test_config()).await.unwrap();
    let (client, mut broadcasts) = CommandChannel::connect(
        relay.addr.to_string(),
        client_policy(),
        CommandChannelConfig::default(),
    );

    // Motion refused before calibration.
    let err = client.activate().await.unwrap_err();
    assert_eq!(
        err,
        CommandError::Rejected {
            reason: "system not calibrated".to_string()
        }
    );

    client.calibrate().await.unwrap();
    wait_for_calibration(&mut broadcasts).await;

    let data = client.activate().await.unwrap().unwrap();
    assert_eq!(data["status"], "ACTIVE");

    // An accepted move echoes the validated target.
    let data = client.move_to(Position::new(1.0, 0.5, 2.0)).await.unwrap().unwrap();
    assert_eq!(data["x"], 1.0);
    assert_eq!(data["y"], 0.5);

    // An out-of-bounds move is rejected before it reaches the firmware.
    let err = client.move_to(Position::new(10.0, 10.0, 10.0)).await.unwrap_err();
    match err {
        CommandError::Rejected { reason } => assert!(reason.starts_with("out of bounds")),
        other => panic!("unexpected error: {:?}", other),
    }

    // Status mirror reflects the session.
    let status = client.get_status().await.unwrap().unwrap();
    assert_eq!(status["is_calibrated"], true);
    assert_eq!(status["system_active"], true);
    assert_eq!(status["is_connected"], true);
}

#[tokio::test]
async fn emergency_from_one_client_blocks_the_other() {
    let relay = Relay::spawn(test_config()).await.unwrap();
    let (alice, mut alice_rx) = CommandChannel::connect(
        relay.addr.to_string(),
        client_policy(),
        CommandChannelConfig::default(),
    );
    let (bob, _bob_rx) = CommandChannel::connect(
        relay.addr.to_string(),
        client_policy(),
        CommandChannelConfig::default(),
    );

    alice.calibrate().await.unwrap();
    wait_for_calibration(&mut alice_rx).await;
    alice.activate().await.unwrap();

    let data = bob.emergency_stop().await.unwrap().unwrap();
    assert_eq!(data["status"], "EMERGENCY");

    let err = alice.move_to(Position::new(0.5, 0.5, 2.0)).await.unwrap_err();
    assert_eq!(
        err,
        CommandError::Rejected {
            reason: "emergency stop active".to_string()
        }
    );

    // Recovery: reset, reactivate, move again.
    alice.reset().await.unwrap();
    alice.activate().await.unwrap();
    alice.move_to(Position::new(0.5, 0.5, 2.0)).await.unwrap();
}

#[tokio::test]
async fn concurrent_moves_from_two_clients_get_their_own_responses() {
    let relay = Relay::spawn(test_config()).await.unwrap();
    let (alice, mut alice_rx) = CommandChannel::connect(
        relay.addr.to_string(),
        client_policy(),
        CommandChannelConfig::default(),
    );
    let (bob, _bob_rx) = CommandChannel::connect(
        relay.addr.to_string(),
        client_policy(),
        CommandChannelConfig::default(),
    );

    alice.calibrate().await.unwrap();
    wait_for_calibration(&mut alice_rx).await;
    alice.activate().await.unwrap();

    // Both moves are serialized through the hardware queue; each client
    // gets the response echoing its own target.
    let (from_alice, from_bob) = tokio::join!(
        alice.move_to(Position::new(1.0, 0.0, 2.0)),
        bob.move_to(Position::new(0.0, 1.0, 2.0)),
    );

    let data = from_alice.unwrap().unwrap();
    assert_eq!(data["x"], 1.0);
    assert_eq!(data["y"], 0.0);

    let data = from_bob.unwrap().unwrap();
    assert_eq!(data["x"], 0.0);
    assert_eq!(data["y"], 1.0);
}

#[tokio::test]
async fn every_client_gets_position_broadcasts() {
    let relay = Relay::spawn(test_config()).await.unwrap();
    let (alice, mut alice_rx) = CommandChannel::connect(
        relay.addr.to_string(),
        client_policy(),
        CommandChannelConfig::default(),
    );
    let (_bob, mut bob_rx) = CommandChannel::connect(
        relay.addr.to_string(),
        client_policy(),
        CommandChannelConfig::default(),
    );

    alice.calibrate().await.unwrap();
    wait_for_calibration(&mut alice_rx).await;

    // Both connections see periodic position updates.
    for rx in [&mut alice_rx, &mut bob_rx] {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            let frame = tokio::time::timeout_at(deadline, rx.recv())
                .await
                .expect("no position update arrived")
                .unwrap();
            if matches!(frame, BroadcastFrame::PositionUpdate { .. }) {
                break;
            }
        }
    }
}

#[tokio::test]
async fn pipelined_commands_from_one_segment_keep_arrival_order() {
    let relay = Relay::spawn(test_config()).await.unwrap();

    let stream = TcpStream::connect(relay.addr).await.unwrap();
    let (read_half, mut write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();

    write_half
        .write_all(b"{\"id\":\"p-1\",\"type\":\"command\",\"command\":\"calibrate\",\"timestamp\":0}\n")
        .await
        .unwrap();

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let line = tokio::time::timeout_at(deadline, lines.next_line())
            .await
            .expect("calibration result never arrived")
            .unwrap()
            .unwrap();
        if let ClientBound::Broadcast(BroadcastFrame::CalibrationResult { data, .. }) =
            decode_client_bound(&line).unwrap()
        {
            assert!(data.success);
            break;
        }
    }

    // Both commands arrive in one TCP segment; the activation must hit
    // the hardware queue before the move or the move is rejected.
    write_half
        .write_all(
            b"{\"id\":\"p-2\",\"type\":\"command\",\"command\":\"activate\",\"timestamp\":0}\n\
              {\"id\":\"p-3\",\"type\":\"command\",\"command\":\"move\",\
              \"data\":{\"x\":1.0,\"y\":0.0,\"z\":2.0},\"timestamp\":0}\n",
        )
        .await
        .unwrap();

    loop {
        let line = tokio::time::timeout_at(deadline, lines.next_line())
            .await
            .expect("move response never arrived")
            .unwrap()
            .unwrap();
        if let ClientBound::Response(response) = decode_client_bound(&line).unwrap() {
            if response.id.as_str() != "p-3" {
                continue;
            }
            assert!(response.success, "move rejected: {:?}", response.error);
            assert_eq!(response.data.unwrap()["x"], 1.0);
            return;
        }
    }
}

#[tokio::test]
async fn new_connection_receives_an_immediate_status_push() {
    let relay = Relay::spawn(test_config()).await.unwrap();

    let stream = TcpStream::connect(relay.addr).await.unwrap();
    let mut lines = BufReader::new(stream).lines();
    let first = tokio::time::timeout(Duration::from_secs(2), lines.next_line())
        .await
        .unwrap()
        .unwrap()
        .unwrap();

    match decode_client_bound(&first).unwrap() {
        ClientBound::Broadcast(BroadcastFrame::StatusUpdate { data, .. }) => {
            assert!(!data.is_calibrated);
            assert!(!data.system_active);
        }
        other => panic!("expected an initial status update, got {:?}", other),
    }
}

#[tokio::test]
async fn unknown_command_is_answered_with_its_own_id() {
    let relay = Relay::spawn(test_config()).await.unwrap();

    let mut stream = TcpStream::connect(relay.addr).await.unwrap();
    stream
        .write_all(b"{\"id\":\"q-1\",\"type\":\"command\",\"command\":\"teleport\",\"timestamp\":0}\n")
        .await
        .unwrap();

    let (read_half, _write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        let line = tokio::time::timeout_at(deadline, lines.next_line())
            .await
            .expect("no response arrived")
            .unwrap()
            .unwrap();
        if let ClientBound::Response(response) = decode_client_bound(&line).unwrap() {
            assert_eq!(response.id.as_str(), "q-1");
            assert!(!response.success);
            assert!(response.error.unwrap().contains("teleport"));
            return;
        }
    }
}
