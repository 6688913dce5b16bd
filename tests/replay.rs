#![cfg(feature = "replay")]

use bmsble_lib::protocol::{self, Command};
use bmsble_lib::replay::ReplayTransport;
use bmsble_lib::session::{DeviceSession, SessionConfig, SessionEvent};
use std::time::Duration;

fn captured_frames() -> Vec<Vec<u8>> {
    vec![
        protocol::encode_frame(Command::RuntimeInfo as u8, Some(&[0u8; 44])),
        protocol::encode_frame(Command::DeviceInfo as u8, Some(b"model=X200,fw=1.05")),
        b"80_25_26_3200".to_vec(),
    ]
}

fn replay_config() -> SessionConfig {
    SessionConfig {
        name_prefix: String::from("replay"),
        auto_reconnect: false,
        ..SessionConfig::default()
    }
}

#[tokio::test(start_paused = true)]
async fn replayed_capture_flows_through_the_whole_stack() {
    let transport = ReplayTransport::new(
        "replay-capture",
        captured_frames(),
        Duration::from_millis(50),
    );
    let session = DeviceSession::new(transport, replay_config());
    let mut events = session.subscribe();
    session.connect(None).await.unwrap();

    let mut raw = 0;
    let mut typed = Vec::new();
    loop {
        match events.recv().await.unwrap() {
            SessionEvent::Connected(device) => assert_eq!(device.name, "replay-capture"),
            SessionEvent::RawData(_) => raw += 1,
            SessionEvent::RuntimeInfo(_) => typed.push("runtime"),
            SessionEvent::DeviceInfo(info) => {
                assert_eq!(info.fields["model"], "X200");
                typed.push("device");
            }
            SessionEvent::CellInfo(info) => {
                assert_eq!(info.cell_voltages_mv, vec![3200]);
                typed.push("cell");
            }
            SessionEvent::Disconnected => break,
            other => panic!("unexpected event {other:?}"),
        }
    }
    assert_eq!(raw, 3);
    assert_eq!(typed, vec!["runtime", "device", "cell"]);
}

#[tokio::test(start_paused = true)]
async fn typed_request_resolves_from_replayed_traffic() {
    let transport = ReplayTransport::new(
        "replay-capture",
        captured_frames(),
        Duration::from_millis(50),
    );
    let session = DeviceSession::new(transport.clone(), replay_config());
    session.connect(None).await.unwrap();

    let info = session.get_runtime_info().await.unwrap();
    assert_eq!(info.cycle_count, 0);

    // The request frame went out twice, back to back.
    let written = transport.written();
    assert_eq!(written.len(), 2);
    assert_eq!(written[0], written[1]);
    assert!(protocol::is_valid_frame(&written[0]));
}
