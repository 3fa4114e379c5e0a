//! Serial scanner against a scripted mock device

use lidar_io::config::SweepConfig;
use lidar_io::devices::sweep::frame::encode;
use lidar_io::devices::sweep::protocol::{MotorSpeed, SampleRate};
use lidar_io::devices::sweep::SweepScanner;
use lidar_io::transport::{MockTransport, Transport};
use lidar_io::{LidarEvent, Pose, Quaternion, ScanAggregator, Scanner, ScannerState, StatusLevel, Vector3};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Reply of a healthy device with the motor at 3 Hz
fn reply(cmd: &[u8]) -> Option<Vec<u8>> {
    let cmd = cmd.strip_suffix(b"\n").unwrap_or(cmd);
    let fixed: &[u8] = match cmd {
        b"DX" => b"DX00P\n",
        b"DS" => b"DS00P\n",
        b"MZ" => b"MZ00\n",
        b"ID" => b"ID115200110030500\n",
        b"IV" => b"IVSWEEP1117100000042\n",
        [b'M', b'S', a, b] | [b'L', b'R', a, b] => {
            return Some(vec![cmd[0], cmd[1], *a, *b, b'\n', b'0', b'0', b'P', b'\n']);
        }
        _ => return None,
    };
    Some(fixed.to_vec())
}

fn scanner_on(mock: &MockTransport, pose: Pose) -> SweepScanner {
    let mock = mock.clone();
    SweepScanner::with_transport_factory(
        "fake-sweep",
        SweepConfig::default(),
        pose,
        Box::new(move || Ok(Box::new(mock.clone()) as Box<dyn Transport>)),
    )
}

fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    condition()
}

#[test]
fn test_set_motor_speed_round_trip() {
    let _ = env_logger::builder().is_test(true).try_init();

    let mock = MockTransport::with_responder(reply);
    let scanner = scanner_on(&mock, Pose::identity());
    scanner.connect().unwrap();
    mock.clear_written();

    scanner.set_motor_speed(5).unwrap();
    assert_eq!(mock.get_written(), b"MS05\nMZ\n");
    assert_eq!(
        scanner.info().unwrap().device.motor_speed,
        Some(MotorSpeed::new(5).unwrap())
    );
}

#[test]
fn test_resync_after_garbage() {
    let mock = MockTransport::with_responder(reply);
    let scanner = scanner_on(&mock, Pose::identity());
    let (rx, _sub) = scanner.events().subscribe_channel(64);

    scanner.connect().unwrap();
    scanner.start().unwrap();

    let mut bytes = vec![0xAA; 20];
    bytes.extend_from_slice(&encode(true, 90 * 16, 150, 100));
    mock.inject_read(&bytes);

    assert!(wait_until(|| scanner.stats().points_published == 1));
    assert_eq!(scanner.discarded_frames(), 1);
    assert_eq!(scanner.discarded_bytes(), 20);

    let events: Vec<LidarEvent> = rx.try_iter().collect();
    let warning = events.iter().find_map(|e| e.as_status()).unwrap();
    assert_eq!(warning.level, StatusLevel::Warning);
    assert!(warning.message.contains("discard 20 bytes"));

    let point = events.iter().find_map(|e| e.as_point()).unwrap();
    assert_eq!(point.azimuth, 90.0);
    assert_eq!(point.distance, 1500.0);
    assert_eq!(point.amplitude, 100);
    assert_eq!(point.scan_id, 1);

    scanner.stop().unwrap();
    assert_eq!(scanner.state(), ScannerState::Connected);
}

#[test]
fn test_points_use_mounting_pose() {
    // Mounted 1 m forward, turned 90 degrees left
    let pose = Pose::new(Vector3::new(1000.0, 0.0, 0.0), Quaternion::from_yaw(90f64.to_radians()));
    let mock = MockTransport::with_responder(reply);
    let scanner = scanner_on(&mock, pose);
    let aggregator = Arc::new(ScanAggregator::new());
    let _feed = aggregator.attach(scanner.events());
    let (scans, _scan_sub) = aggregator.scans().subscribe_channel(4);

    scanner.connect().unwrap();
    scanner.start().unwrap();

    // Two samples in scan 1, the sync flag of the third closes it
    let mut bytes = Vec::new();
    bytes.extend_from_slice(&encode(true, 0, 100, 1));
    bytes.extend_from_slice(&encode(false, 90 * 16, 100, 1));
    bytes.extend_from_slice(&encode(true, 0, 100, 1));
    mock.inject_read(&bytes);

    let scan = scans.recv_timeout(Duration::from_secs(2)).unwrap();
    assert_eq!(scan.scan_id, 1);
    assert_eq!(scan.len(), 2);

    // 1 m straight ahead of the sensor ends up 1 m to the left of the mount
    let ahead = scan.points[0].position;
    assert!((ahead.x - 1000.0).abs() < 1e-6);
    assert!((ahead.y - 1000.0).abs() < 1e-6);
    // 1 m to the sensor's left ends up behind the mount
    let left = scan.points[1].position;
    assert!(left.x.abs() < 1e-6);
    assert!(left.y.abs() < 1e-6);

    scanner.stop().unwrap();
}

#[test]
fn test_configuration_while_running() {
    let mock = MockTransport::with_responder(reply);
    let scanner = scanner_on(&mock, Pose::identity());
    scanner.connect().unwrap();
    scanner.start().unwrap();

    assert!(scanner.update_device_info().is_err());
    scanner.set_sample_rate(SampleRate::Hz1000).unwrap();
    assert!(scanner.is_scanning());
    assert_eq!(
        scanner.info().unwrap().device.sample_rate,
        Some(SampleRate::Hz1000)
    );

    scanner.disconnect().unwrap();
    assert_eq!(scanner.state(), ScannerState::Idle);
}
