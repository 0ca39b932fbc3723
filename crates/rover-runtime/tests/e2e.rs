//! End-to-end behaviour of the runtime over simulated hardware.

use std::sync::Arc;
use std::time::Duration;

use rover_hal::BeepPattern;
use rover_hal::sim::SimRig;
use rover_middleware::Topic;
use rover_power::ServoTrimStore;
use rover_runtime::protocol::{GREETING, REJECTION};
use rover_runtime::{Frame, Hardware, ReplyStatus, RoverRuntime, RuntimeConfig, Session};
use rover_types::{Axis, AxisState, EventPayload, RoverError, ShoulderCalibration};
use tempfile::TempDir;

const CREDENTIAL: &str = "admin:123456";

struct Rover {
    rig: SimRig,
    runtime: Arc<RoverRuntime>,
    _dir: TempDir,
}

fn rover() -> Rover {
    let dir = tempfile::tempdir().unwrap();
    let config = RuntimeConfig {
        calibration_path: dir.path().join("battery.json"),
        shoulder_path: dir.path().join("servo.json"),
        trim_path: dir.path().join("trims.json"),
        ..RuntimeConfig::default()
    };
    let rig = SimRig::new();
    let runtime = RoverRuntime::new(config, Hardware::simulated(&rig)).unwrap();
    Rover {
        rig,
        runtime: Arc::new(runtime),
        _dir: dir,
    }
}

fn raw_for(volts: f64) -> u16 {
    (volts / 8.4 * f64::from(u16::MAX)).round() as u16
}

impl Rover {
    fn login(&self) -> Session {
        let dispatcher = self.runtime.dispatcher();
        let mut session = dispatcher.open_session();
        let response = dispatcher.handle(&mut session, CREDENTIAL);
        assert_eq!(response.frame, Frame::Text(GREETING.into()));
        assert!(!response.close);
        session
    }

    fn send(&self, session: &mut Session, line: &str) -> rover_runtime::Response {
        self.runtime.dispatcher().handle(session, line)
    }

    fn state(&self, axis: Axis) -> AxisState {
        self.runtime.kernel().axis(axis).unwrap().state
    }
}

#[tokio::test]
async fn wrong_credential_closes_the_session() {
    let r = rover();
    let dispatcher = r.runtime.dispatcher();
    let mut session = dispatcher.open_session();
    let response = dispatcher.handle(&mut session, "admin:wrong");
    assert!(response.close);
    assert_eq!(response.frame, Frame::Text(REJECTION.into()));
    assert_eq!(response.error, Some(RoverError::Auth));
    assert!(!session.is_authenticated());
}

#[tokio::test]
async fn forward_then_stop_issues_two_drive_calls() {
    let r = rover();
    let mut session = r.login();
    r.rig.log.clear();

    let reply = r.send(&mut session, "forward");
    assert_eq!(reply.frame.reply().unwrap().status, ReplyStatus::Queued);
    r.send(&mut session, "DS");
    session.close().await;

    assert_eq!(r.rig.log.motor_calls(1), 2);
    assert_eq!(r.state(Axis::Drive), AxisState::Idle);
}

#[tokio::test]
async fn drive_state_follows_the_last_drive_command() {
    let r = rover();
    let mut session = r.login();
    for line in ["forward", "DS", "backward", "forward", "DS", "forward"] {
        r.send(&mut session, line);
    }
    session.close().await;
    assert_eq!(r.state(Axis::Drive), AxisState::MovingPositive);

    let mut session = r.login();
    r.send(&mut session, "DS");
    session.close().await;
    assert_eq!(r.state(Axis::Drive), AxisState::Idle);
}

#[tokio::test]
async fn releasing_drive_leaves_turn_untouched() {
    let r = rover();
    let mut session = r.login();
    r.send(&mut session, "left");
    r.send(&mut session, "DS");
    session.close().await;
    assert_eq!(r.state(Axis::Turn), AxisState::MovingNegative);
    assert_eq!(
        r.runtime.kernel().axis(Axis::Turn).unwrap().label,
        "moving_negative"
    );
}

#[tokio::test]
async fn repeated_direction_issues_one_call() {
    let r = rover();
    let mut session = r.login();
    r.rig.log.clear();
    for _ in 0..4 {
        r.send(&mut session, "handUp");
    }
    session.close().await;
    assert_eq!(r.rig.log.servo_calls(1), 1);
    assert_eq!(r.state(Axis::Wrist), AxisState::MovingPositive);
}

#[tokio::test]
async fn interlock_blocks_raising_but_not_lowering() {
    let r = rover();
    let mut pollers = r.runtime.take_pollers().unwrap();
    r.rig.adc.set_raw(raw_for(6.5));
    pollers.acquisition.tick().await;
    assert!(r.runtime.kernel().interlock_engaged());

    let mut session = r.login();
    r.rig.log.clear();

    let response = r.send(&mut session, "armUp");
    let reply = response.frame.reply().unwrap();
    assert_eq!(reply.status, ReplyStatus::Error);
    assert_eq!(reply.error_kind(), Some("interlock_blocked"));
    assert_eq!(
        response.error,
        Some(RoverError::InterlockBlocked {
            axis: Axis::Shoulder
        })
    );
    assert!(!response.close);

    let response = r.send(&mut session, "armDown");
    assert_eq!(response.frame.reply().unwrap().status, ReplyStatus::Queued);
    session.close().await;

    assert_eq!(r.rig.log.servo_calls(0), 1);
    assert_eq!(r.state(Axis::Shoulder), AxisState::MovingNegative);
}

#[tokio::test]
async fn concurrent_calibrations_with_one_revision() {
    let r = rover();
    let mut pollers = r.runtime.take_pollers().unwrap();
    r.rig.adc.set_raw(raw_for(7.5));
    pollers.acquisition.tick().await;

    let revision = r.runtime.calibration_view().revision;
    let a = {
        let runtime = Arc::clone(&r.runtime);
        tokio::spawn(async move { runtime.calibrate(7.7, Some(revision)).await })
    };
    let b = {
        let runtime = Arc::clone(&r.runtime);
        tokio::spawn(async move { runtime.calibrate(7.8, Some(revision)).await })
    };
    let results = [a.await.unwrap(), b.await.unwrap()];

    let ok = results.iter().filter(|r| r.is_ok()).count();
    let stale = results
        .iter()
        .filter(|r| matches!(r, Err(RoverError::StaleRevision { .. })))
        .count();
    assert_eq!((ok, stale), (1, 1));
    assert_eq!(r.runtime.calibration_view().revision, revision + 1);
}

#[tokio::test]
async fn calibration_round_trip_and_events() {
    let r = rover();
    let mut calibration = r.runtime.bus().subscribe_to(Topic::Calibration);
    let mut pollers = r.runtime.take_pollers().unwrap();
    r.rig.adc.set_raw(raw_for(7.4));
    for _ in 0..5 {
        pollers.acquisition.tick().await;
    }

    let before = r.runtime.calibration_view();
    let outcome = r.runtime.calibrate(7.9, Some(before.revision)).await.unwrap();
    let after = r.runtime.calibration_view();
    assert_eq!(after.revision, before.revision + 1);
    assert!((after.voltage - 7.9).abs() < 0.01);
    assert_eq!(outcome.calibration.revision, after.revision);

    let event = calibration.recv().await.unwrap();
    assert_eq!(event.payload.name(), "battery_calibration");
}

#[tokio::test]
async fn get_info_replies_with_a_snapshot() {
    let r = rover();
    let mut pollers = r.runtime.take_pollers().unwrap();
    pollers.acquisition.tick().await;
    pollers.sensors.tick().await;

    let mut session = r.login();
    let response = r.send(&mut session, "get_info");
    let reply = response.frame.reply().unwrap();
    assert_eq!(reply.status, ReplyStatus::Ok);
    let data = reply.data.as_array().unwrap();
    assert_eq!(data.len(), 5);
    let snapshot = reply.snapshot.as_ref().unwrap();
    assert_eq!(snapshot.distance_cm, Some(100.0));
    assert!(!snapshot.battery.stale);
    assert_eq!(data[3].as_f64().unwrap(), snapshot.battery.voltage);
}

#[tokio::test]
async fn unknown_messages_do_not_end_the_session() {
    let r = rover();
    let mut session = r.login();
    let response = r.send(&mut session, "moonwalk");
    assert!(!response.close);
    assert!(matches!(response.error, Some(RoverError::Parse(_))));
    let response = r.send(&mut session, "forward");
    assert_eq!(response.frame.reply().unwrap().status, ReplyStatus::Queued);
    session.close().await;
}

#[tokio::test]
async fn hardware_fault_is_reported_and_session_continues() {
    let r = rover();
    let mut alerts = r.runtime.bus().subscribe_to(Topic::Alerts);
    r.rig
        .log
        .inject_fault(rover_hal::sim::FaultKey::Servo(2));
    let mut session = r.login();
    r.send(&mut session, "lookleft");
    r.send(&mut session, "forward");

    let event = tokio::time::timeout(Duration::from_secs(1), alerts.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(
        event.payload,
        EventPayload::HardwareFault {
            axis: Axis::Yaw,
            channel: Some(2),
            ..
        }
    ));
    session.close().await;
    assert_eq!(r.state(Axis::Yaw), AxisState::Idle);
    assert_eq!(r.state(Axis::Drive), AxisState::MovingPositive);
}

#[tokio::test]
async fn shoulder_calibration_rehomes_and_persists() {
    let r = rover();
    let mut events = r.runtime.bus().subscribe_to(Topic::Calibration);
    let stored = r
        .runtime
        .update_shoulder(ShoulderCalibration {
            base_angle: 100.0,
            raise_angle: 120.0,
        })
        .await
        .unwrap();
    assert_eq!(stored.base_angle, 100.0);
    assert_eq!(r.runtime.shoulder(), stored);
    let event = events.recv().await.unwrap();
    assert_eq!(event.payload.name(), "shoulder_calibration");
}

#[tokio::test]
async fn disconnect_lets_queued_commands_finish() {
    let r = rover();
    let mut session = r.login();
    r.rig.log.clear();
    r.send(&mut session, "grab");
    r.send(&mut session, "GLstop");
    r.send(&mut session, "ledOn");
    session.close().await;
    assert_eq!(r.state(Axis::Gripper), AxisState::Idle);
    assert_eq!(r.state(Axis::Headlight), AxisState::On);
}

#[tokio::test]
async fn startup_is_announced_with_an_alert() {
    let r = rover();
    assert_eq!(r.rig.log.beeps(), vec![BeepPattern::Alert]);
}

#[tokio::test]
async fn switches_follow_their_tokens() {
    let r = rover();
    let mut session = r.login();
    r.send(&mut session, "Switch_1_on");
    r.send(&mut session, "Switch_3_on");
    r.send(&mut session, "Switch_3_off");
    session.close().await;
    assert_eq!(r.state(Axis::Switch1), AxisState::On);
    assert_eq!(r.state(Axis::Switch3), AxisState::Idle);
}

#[tokio::test]
async fn saved_trim_survives_a_restart() {
    let r = rover();
    let before = r.runtime.kernel().init_angles()[&2];
    let mut session = r.login();
    r.send(&mut session, "SiRight 2");
    r.send(&mut session, "PWMMS 2");
    session.close().await;

    let reopened =
        ServoTrimStore::open(r._dir.path().join("trims.json"), Default::default()).unwrap();
    assert_eq!(reopened.get()[&2], before + 1.0);
}
