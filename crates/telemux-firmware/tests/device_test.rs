//! End-to-end tests for the device core against a scripted mock modem.
//!
//! The modem answers commands synchronously from a rule table and lets the
//! tests inject unsolicited output (position sentences) and failures. Tests
//! run serially: the metrics recorder and thread timing are process-global.

mod common;

use std::time::{Duration, Instant};

use common::{fast_config, scripted_modem, wait_until, StubSink, GPRMC_FIX};
use serial_test::serial;
use telemux_firmware::Device;
use telemux_supervisor::{SubsystemId, SubsystemState};

fn start_device() -> (common::ModemHandle, Device) {
    let (modem, reader, writer) = scripted_modem();
    let device = Device::start(fast_config(), reader, writer, Box::new(StubSink))
        .expect("device start");
    (modem, device)
}

fn state(device: &Device, id: SubsystemId) -> SubsystemState {
    device.snapshot().supervisor.subsystem(id).state
}

#[test]
#[serial]
fn test_bring_up_orders_network_before_messaging() {
    let (modem, device) = start_device();

    assert!(
        device.network_ready().wait_timeout(Duration::from_secs(3)),
        "network attach should come up"
    );
    assert!(wait_until(Duration::from_secs(3), || state(
        &device,
        SubsystemId::Messaging
    ) == SubsystemState::Connected));

    // Messaging connected implies network connected.
    assert_eq!(
        state(&device, SubsystemId::Network),
        SubsystemState::Connected
    );

    // The radio was configured before the session opened.
    let commands = modem.commands();
    let radio_on = commands.iter().position(|c| c == "AT+CFUN=1");
    let session_open = commands.iter().position(|c| c == "AT+QMTOPEN=0");
    assert!(radio_on.is_some() && session_open.is_some());
    assert!(radio_on < session_open);

    device.shutdown();
}

#[test]
#[serial]
fn test_position_fix_flows_to_connected() {
    let (modem, device) = start_device();

    assert!(device.network_ready().wait_timeout(Duration::from_secs(3)));
    modem.feed_line(GPRMC_FIX);
    modem.feed_line(GPRMC_FIX);

    assert!(wait_until(Duration::from_secs(3), || device
        .position()
        .has_fix()));
    assert!(wait_until(Duration::from_secs(3), || state(
        &device,
        SubsystemId::Position
    ) == SubsystemState::Connected));

    let snapshot = device.snapshot();
    assert!(snapshot.classifier.position_sentences >= 2);
    device.shutdown();
}

#[test]
#[serial]
fn test_messaging_client_commands_route_through_arbiter() {
    let (_modem, device) = start_device();
    assert!(device.network_ready().wait_timeout(Duration::from_secs(3)));

    // A publish issued by the external messaging client.
    let response = device
        .arbiter()
        .send("AT+QMTPUBEX=0,1,1,0,\"loc\"", None, Duration::from_secs(1))
        .expect("publish exchange");
    assert!(response.contains("OK"));

    let completed_before = device.snapshot().arbiter.completed;
    assert!(completed_before > 0);
    device.shutdown();
}

#[test]
#[serial]
fn test_messaging_outage_leaves_position_running() {
    let (modem, device) = start_device();

    assert!(device.network_ready().wait_timeout(Duration::from_secs(3)));
    modem.feed_line(GPRMC_FIX);
    assert!(wait_until(Duration::from_secs(3), || state(
        &device,
        SubsystemId::Position
    ) == SubsystemState::Connected));

    // The session drops: every probe and reconnect now fails.
    modem.set_rule("AT+QMTCONN", "ERROR\r\n");
    assert!(wait_until(Duration::from_secs(5), || state(
        &device,
        SubsystemId::Messaging
    ) == SubsystemState::Recovering));

    // Degraded operation: position keeps its fix, network stays up, and
    // the messaging outage alone is not a transport fault.
    modem.feed_line(GPRMC_FIX);
    assert_eq!(
        state(&device, SubsystemId::Position),
        SubsystemState::Connected
    );
    assert_eq!(
        state(&device, SubsystemId::Network),
        SubsystemState::Connected
    );
    let snapshot = device.snapshot();
    assert!(snapshot.supervisor.escalations >= 1);
    assert!(!snapshot.transport_fault());

    device.shutdown();
}

#[test]
#[serial]
fn test_monitor_reports_all_workers_alive() {
    let (_modem, device) = start_device();
    assert!(device.network_ready().wait_timeout(Duration::from_secs(3)));

    assert!(wait_until(Duration::from_secs(3), || device
        .monitor_report()
        .is_some()));
    let report = device.monitor_report().expect("monitor has swept");
    // modem-reader, position-reader, supervisor, monitor, job-drainer.
    assert_eq!(report.workers.len(), 5);
    assert!(report.workers.iter().all(|w| !w.flagged));

    device.shutdown();
}

#[test]
#[serial]
fn test_shutdown_waits_for_driver_teardown() {
    let (modem, device) = start_device();
    assert!(device.network_ready().wait_timeout(Duration::from_secs(3)));

    let started = Instant::now();
    device.shutdown();
    // The reader workers stay up through teardown, so the teardown
    // exchanges complete promptly instead of each burning its full
    // command timeout against a dead control channel.
    assert!(
        started.elapsed() < Duration::from_millis(400),
        "shutdown took {:?}",
        started.elapsed()
    );
    let commands = modem.commands();
    assert!(commands.iter().any(|c| c == "AT+CFUN=0"));
    assert!(commands.iter().any(|c| c == "AT+QGPSEND"));
}

#[test]
#[serial]
fn test_shutdown_is_clean_and_idempotent() {
    let (_modem, device) = start_device();
    assert!(device.network_ready().wait_timeout(Duration::from_secs(3)));

    device.shutdown();
    device.shutdown();

    let snapshot = device.snapshot();
    assert_eq!(
        snapshot.supervisor.subsystem(SubsystemId::Network).state,
        SubsystemState::Disconnected
    );
}
