use anyhow::{bail, Context, Result};
use bmsble_lib::protocol::{self, Command, MqttConfig};
use bmsble_lib::replay::ReplayTransport;
use bmsble_lib::session::{DeviceSession, SessionConfig, SessionEvent};
use clap::Parser;
use flexi_logger::{Logger, LoggerHandle};
use log::*;
use std::{ops::Deref, panic, path::Path};

mod commandline;

use commandline::{CliArgs, CliCommands, EncodeCommands};

fn logging_init(loglevel: LevelFilter) -> LoggerHandle {
    let log_handle = Logger::try_with_env_or_str(loglevel.as_str())
        .expect("Cannot init logging")
        .start()
        .expect("Cannot start logging");

    panic::set_hook(Box::new(|panic_info| {
        let (filename, line, column) = panic_info
            .location()
            .map(|loc| (loc.file(), loc.line(), loc.column()))
            .unwrap_or(("<unknown>", 0, 0));
        let cause = panic_info
            .payload()
            .downcast_ref::<String>()
            .map(String::deref);
        let cause = cause.unwrap_or_else(|| {
            panic_info
                .payload()
                .downcast_ref::<&str>()
                .copied()
                .unwrap_or("<cause unknown>")
        });

        error!(
            "Thread '{}' panicked at {}:{}:{}: {}",
            std::thread::current().name().unwrap_or("<unknown>"),
            filename,
            line,
            column,
            cause
        );
    }));
    log_handle
}

fn encode(command: EncodeCommands) -> Vec<u8> {
    match command {
        EncodeCommands::RuntimeInfo => protocol::encode_frame(Command::RuntimeInfo as u8, None),
        EncodeCommands::DeviceInfo => protocol::encode_frame(Command::DeviceInfo as u8, None),
        EncodeCommands::CellInfo => protocol::encode_frame(Command::CellInfo as u8, None),
        EncodeCommands::SetWifi { ssid, password } => protocol::encode_frame(
            Command::SetWifi as u8,
            Some(&protocol::wifi_config_payload(&ssid, &password)),
        ),
        EncodeCommands::SetMqtt {
            host,
            port,
            ssl,
            username,
            password,
        } => {
            let config = MqttConfig {
                ssl,
                host,
                port,
                username,
                password,
            };
            protocol::encode_frame(
                Command::SetMqtt as u8,
                Some(&protocol::mqtt_config_payload(&config)),
            )
        }
        EncodeCommands::ResetMqtt => protocol::encode_frame(Command::ResetMqtt as u8, None),
    }
}

fn decode(frames: Vec<String>, json: bool) -> Result<()> {
    if frames.is_empty() {
        bail!("No frames given");
    }
    for text in frames {
        let cleaned: String = text.chars().filter(|c| !c.is_whitespace()).collect();
        let bytes = hex::decode(&cleaned)
            .with_context(|| format!("'{text}' is not a valid hex frame"))?;
        let valid = protocol::is_valid_frame(&bytes);
        let message = protocol::parse_message(&bytes);
        if json {
            println!(
                "{}",
                serde_json::to_string_pretty(&message)
                    .with_context(|| "Cannot serialize decoded message")?
            );
        } else {
            println!("structurally valid: {valid}");
            println!("{message:#?}");
        }
    }
    Ok(())
}

fn load_capture(path: &Path) -> Result<Vec<Vec<u8>>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Cannot read capture file '{}'", path.display()))?;
    let mut frames = Vec::new();
    for (n, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let bytes = hex::decode(line)
            .with_context(|| format!("Invalid hex on line {} of capture", n + 1))?;
        frames.push(bytes);
    }
    if frames.is_empty() {
        bail!("Capture file '{}' contains no frames", path.display());
    }
    Ok(frames)
}

fn print_event(event: &SessionEvent) {
    let stamp = chrono::Local::now().format("%H:%M:%S%.3f");
    match event {
        SessionEvent::Connected(device) => println!("[{stamp}] connected to {}", device.name),
        SessionEvent::Disconnected => println!("[{stamp}] disconnected"),
        SessionEvent::Reconnected(device) => println!("[{stamp}] reconnected to {}", device.name),
        SessionEvent::Error(message) => println!("[{stamp}] error: {message}"),
        SessionEvent::DeviceInfo(info) => println!("[{stamp}] device info: {:?}", info.fields),
        SessionEvent::RuntimeInfo(info) => println!(
            "[{stamp}] runtime info: soc={:.1}% voltage={:.2}V in={}W out={}W",
            info.soc_percent, info.battery_voltage, info.input_power_w, info.output_power_w
        ),
        SessionEvent::CellInfo(info) => println!(
            "[{stamp}] cell info: soc={}% cells={:?}",
            info.soc, info.cell_voltages_mv
        ),
        SessionEvent::RawData(bytes) => println!("[{stamp}] raw: {}", hex::encode(bytes)),
    }
}

async fn replay(capture: &Path, frame_delay: std::time::Duration) -> Result<()> {
    let frames = load_capture(capture)?;
    info!(
        "Replaying {} frames from '{}' with {frame_delay:?} between frames",
        frames.len(),
        capture.display()
    );
    let transport = ReplayTransport::new("replay-capture", frames, frame_delay);
    let config = SessionConfig {
        name_prefix: String::from("replay"),
        auto_reconnect: false,
        ..SessionConfig::default()
    };
    let session = DeviceSession::new(transport, config);
    let mut events = session.subscribe();
    session
        .connect(None)
        .await
        .with_context(|| "Cannot open replay session")?;
    loop {
        match events.recv().await {
            Ok(event) => {
                let done = matches!(event, SessionEvent::Disconnected);
                print_event(&event);
                if done {
                    break;
                }
            }
            Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                warn!("event stream lagged, {skipped} events skipped");
            }
            Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
        }
    }
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = CliArgs::parse();

    let _log_handle = logging_init(args.verbose.log_level_filter());

    match args.command {
        CliCommands::Encode { command } => println!("{}", hex::encode(encode(command))),
        CliCommands::Decode { frames, json } => decode(frames, json)?,
        CliCommands::Replay {
            capture,
            frame_delay,
        } => replay(&capture, frame_delay).await?,
    }

    Ok(())
}
