use clap::{Parser, Subcommand};
use clap_verbosity_flag::{InfoLevel, Verbosity};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum CliCommands {
    /// Print the hex frame for a device command, for use with generic BLE tools
    Encode {
        #[command(subcommand)]
        command: EncodeCommands,
    },
    /// Classify captured notification frames (hex strings) and print the decoded records
    Decode {
        /// One or more hex-encoded frames
        frames: Vec<String>,
        /// Print decoded records as JSON instead of debug output
        #[clap(long, action)]
        json: bool,
    },
    /// Drive a live session from a capture file and print every emitted event
    Replay {
        /// Capture file: one hex-encoded notification frame per line, '#' comments allowed
        capture: PathBuf,
        /// Delay between played-back frames (e.g., "50ms", "1s")
        #[clap(long, value_parser = humantime::parse_duration, default_value = "100ms")]
        frame_delay: Duration,
    },
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum EncodeCommands {
    /// Request the live operating data record
    RuntimeInfo,
    /// Request the device identity mapping
    DeviceInfo,
    /// Request per-cell voltages and pack temperatures
    CellInfo,
    /// Push WiFi credentials to the device
    SetWifi { ssid: String, password: String },
    /// Push MQTT broker settings to the device
    SetMqtt {
        host: String,
        port: String,
        /// Connect to the broker over SSL
        #[clap(long, action)]
        ssl: bool,
        #[clap(long)]
        username: Option<String>,
        #[clap(long)]
        password: Option<String>,
    },
    /// Clear the device's stored MQTT settings
    ResetMqtt,
}

const fn about_text() -> &'static str {
    "BLE battery monitor command line tool"
}

#[derive(Parser, Debug)]
#[command(version, about=about_text(), long_about = None)]
pub struct CliArgs {
    #[command(flatten)]
    pub verbose: Verbosity<InfoLevel>,

    #[command(subcommand)]
    pub command: CliCommands,
}
