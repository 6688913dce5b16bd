//! Wire protocol for the battery monitor: frame building/validation and
//! notification decoding.
//!
//! Frames look like `[START, LENGTH, IDENTIFIER, COMMAND, PAYLOAD.., CHECKSUM]`
//! where LENGTH counts every byte including the checksum and CHECKSUM is the
//! XOR of all preceding bytes. All multi-byte integers are little-endian.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

pub const START_BYTE: u8 = 0x73;
pub const IDENTIFIER: u8 = 0x23;

/// Smallest structurally complete frame: header, command and checksum.
pub const MIN_FRAME_LENGTH: usize = 5;

/// Separator used by the textual config payloads (WiFi, MQTT).
pub const CONFIG_SEPARATOR: &str = "<.,.>";

/// Opcodes understood by the device. The codec accepts any raw opcode;
/// only `RuntimeInfo`, `DeviceInfo` and `CellInfo` replies are decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Command {
    RuntimeInfo = 0x03,
    DeviceInfo = 0x04,
    SetWifi = 0x05,
    CellInfo = 0x0F,
    SetMqtt = 0x20,
    ResetMqtt = 0x21,
}

/// XOR fold over `buffer`; the checksum of an empty buffer is 0.
pub fn checksum(buffer: &[u8]) -> u8 {
    buffer.iter().fold(0, |acc, b| acc ^ b)
}

/// Builds a complete frame for `command` with an optional payload.
///
/// The length byte is overwritten with the total frame size (checksum
/// included) and the XOR checksum is appended last. Always succeeds;
/// payloads are short config strings, so the total length fits in the
/// one-byte length field for every defined command.
pub fn encode_frame(command: u8, payload: Option<&[u8]>) -> Vec<u8> {
    let mut frame = vec![START_BYTE, 0, IDENTIFIER, command];
    if let Some(payload) = payload {
        frame.extend_from_slice(payload);
    }
    frame.push(0); // checksum placeholder
    let len = frame.len();
    frame[1] = len as u8;
    frame[len - 1] = checksum(&frame[..len - 1]);
    frame
}

/// Structural validation only: start byte, length field, identifier and
/// checksum. Says nothing about payload semantics.
pub fn is_valid_frame(buffer: &[u8]) -> bool {
    if buffer.len() < MIN_FRAME_LENGTH {
        log::warn!(
            "Frame too short - minimum={} received={}",
            MIN_FRAME_LENGTH,
            buffer.len()
        );
        return false;
    }
    if buffer[0] != START_BYTE {
        log::warn!(
            "Invalid start byte - expected={START_BYTE:02X} received={:02X}",
            buffer[0]
        );
        return false;
    }
    if buffer[1] as usize != buffer.len() {
        log::warn!(
            "Invalid length field - field={} actual={}",
            buffer[1],
            buffer.len()
        );
        return false;
    }
    if buffer[2] != IDENTIFIER {
        log::warn!(
            "Invalid identifier - expected={IDENTIFIER:02X} received={:02X}",
            buffer[2]
        );
        return false;
    }
    let expected = checksum(&buffer[..buffer.len() - 1]);
    if buffer[buffer.len() - 1] != expected {
        log::warn!(
            "Invalid checksum - calculated={:02X} received={:02X} buffer={buffer:02X?}",
            expected,
            buffer[buffer.len() - 1]
        );
        return false;
    }
    true
}

/// Builds the `SET_WIFI` payload text: `"{ssid}<.,.>{password}"`.
pub fn wifi_config_payload(ssid: &str, password: &str) -> Vec<u8> {
    format!("{ssid}{CONFIG_SEPARATOR}{password}").into_bytes()
}

/// MQTT broker settings pushed to the device with `SET_MQTT`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MqttConfig {
    pub ssl: bool,
    pub host: String,
    pub port: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

/// Builds the `SET_MQTT` payload text:
/// `"{0|1}<.,.>{host}<.,.>{port}<.,.>{username}<.,.>{password}<.,.>"`.
///
/// The trailing separator is always present and missing credentials become
/// empty segments, not omitted ones.
pub fn mqtt_config_payload(config: &MqttConfig) -> Vec<u8> {
    let mut text = String::new();
    let segments = [
        if config.ssl { "1" } else { "0" },
        config.host.as_str(),
        config.port.as_str(),
        config.username.as_deref().unwrap_or(""),
        config.password.as_deref().unwrap_or(""),
    ];
    for segment in segments {
        text.push_str(segment);
        text.push_str(CONFIG_SEPARATOR);
    }
    text.into_bytes()
}

macro_rules! read_bit {
    ($byte:expr,$position:expr) => {
        ($byte >> $position) & 1 != 0
    };
}

fn read_u8(buffer: &[u8], offset: usize) -> Option<u8> {
    buffer.get(offset).copied()
}

fn read_u16_le(buffer: &[u8], offset: usize) -> Option<u16> {
    Some(u16::from_le_bytes([
        *buffer.get(offset)?,
        *buffer.get(offset + 1)?,
    ]))
}

fn read_i16_le(buffer: &[u8], offset: usize) -> Option<i16> {
    read_u16_le(buffer, offset).map(|v| v as i16)
}

fn read_u32_le(buffer: &[u8], offset: usize) -> Option<u32> {
    Some(u32::from_le_bytes([
        *buffer.get(offset)?,
        *buffer.get(offset + 1)?,
        *buffer.get(offset + 2)?,
        *buffer.get(offset + 3)?,
    ]))
}

/// Device identity and firmware details: an open `key=value` mapping,
/// device-defined keys pass through untouched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub fields: BTreeMap<String, String>,
    /// Original notification bytes, kept for diagnostic replay.
    pub raw: Vec<u8>,
}

impl DeviceInfo {
    fn decode(buffer: &[u8]) -> Option<Self> {
        if buffer.len() < MIN_FRAME_LENGTH {
            return None;
        }
        // Trailing text sits between the command byte and the checksum.
        let text = String::from_utf8_lossy(&buffer[4..buffer.len() - 1]);
        let mut fields = BTreeMap::new();
        for pair in text.split(',') {
            let parts: Vec<&str> = pair.split('=').collect();
            if parts.len() != 2 {
                log::trace!("discarding malformed device info pair: {pair:?}");
                continue;
            }
            let key = parts[0].trim();
            let value = parts[1].trim();
            if key.is_empty() || value.is_empty() {
                log::trace!("discarding empty device info pair: {pair:?}");
                continue;
            }
            fields.insert(key.to_string(), value.to_string());
        }
        Some(Self {
            fields,
            raw: buffer.to_vec(),
        })
    }
}

/// Live operating data decoded from fixed little-endian offsets.
///
/// The extension region (`full_capacity_mah` onwards) was added by later
/// firmware; each field is read only while the buffer still reaches it,
/// in declaration order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeInfo {
    pub input_power_w: u16,
    pub output_power_w: u16,
    /// Negative while charging.
    pub battery_power_w: i16,
    pub soc_percent: f32,
    pub battery_voltage: f32,
    pub battery_current: f32,
    pub temperature_1: i16,
    pub temperature_2: i16,
    pub ac_output_on: bool,
    pub dc_output_on: bool,
    pub usb_output_on: bool,
    pub led_on: bool,
    pub charging: bool,
    pub discharging: bool,
    pub fault_flags: u16,
    pub timer_enabled: bool,
    pub timer_minutes_remaining: u16,
    pub charge_today_wh: u32,
    pub discharge_today_wh: u32,
    pub charge_total_wh: u32,
    pub discharge_total_wh: u32,
    pub cycle_count: u16,
    pub remaining_capacity_mah: u32,
    pub full_capacity_mah: Option<u32>,
    pub cell_count: Option<u8>,
    pub max_cell_voltage_mv: Option<u16>,
    pub min_cell_voltage_mv: Option<u16>,
    /// Original notification bytes, kept for diagnostic replay.
    pub raw: Vec<u8>,
}

impl RuntimeInfo {
    fn decode(buffer: &[u8]) -> Option<Self> {
        let flags = read_u8(buffer, 20)?;
        let timer_flags = read_u8(buffer, 23)?;

        // Extension fields are optional and ordered; stop at the first one
        // the buffer no longer reaches.
        let full_capacity_mah = read_u32_le(buffer, 48);
        let cell_count = if full_capacity_mah.is_some() {
            read_u8(buffer, 52)
        } else {
            None
        };
        let max_cell_voltage_mv = if cell_count.is_some() {
            read_u16_le(buffer, 53)
        } else {
            None
        };
        let min_cell_voltage_mv = if max_cell_voltage_mv.is_some() {
            read_u16_le(buffer, 55)
        } else {
            None
        };

        Some(Self {
            input_power_w: read_u16_le(buffer, 4)?,
            output_power_w: read_u16_le(buffer, 6)?,
            battery_power_w: read_i16_le(buffer, 8)?,
            soc_percent: read_u16_le(buffer, 10)? as f32 / 10.0,
            battery_voltage: read_u16_le(buffer, 12)? as f32 / 100.0,
            battery_current: read_i16_le(buffer, 14)? as f32 / 100.0,
            temperature_1: read_i16_le(buffer, 16)?,
            temperature_2: read_i16_le(buffer, 18)?,
            ac_output_on: read_bit!(flags, 0),
            dc_output_on: read_bit!(flags, 1),
            usb_output_on: read_bit!(flags, 2),
            led_on: read_bit!(flags, 3),
            charging: read_bit!(flags, 4),
            discharging: read_bit!(flags, 5),
            fault_flags: read_u16_le(buffer, 21)?,
            timer_enabled: read_bit!(timer_flags, 0),
            timer_minutes_remaining: read_u16_le(buffer, 24)?,
            charge_today_wh: read_u32_le(buffer, 26)?,
            discharge_today_wh: read_u32_le(buffer, 30)?,
            charge_total_wh: read_u32_le(buffer, 34)?,
            discharge_total_wh: read_u32_le(buffer, 38)?,
            cycle_count: read_u16_le(buffer, 42)?,
            remaining_capacity_mah: read_u32_le(buffer, 44)?,
            full_capacity_mah,
            cell_count,
            max_cell_voltage_mv,
            min_cell_voltage_mv,
            raw: buffer.to_vec(),
        })
    }
}

/// Per-cell readings sent by the device as underscore-delimited decimal
/// text: `soc _ temp1 _ temp2 _ mv _ mv _ ...`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CellInfo {
    pub soc: u16,
    pub temperature_1: i16,
    pub temperature_2: i16,
    pub cell_voltages_mv: Vec<u16>,
    /// Original notification bytes, kept for diagnostic replay.
    pub raw: Vec<u8>,
}

impl CellInfo {
    /// Decodes the underscore-delimited text form. Returns `None` on any
    /// non-numeric segment; partial decodes are never produced.
    pub fn decode(buffer: &[u8]) -> Option<Self> {
        let text = String::from_utf8_lossy(buffer);
        let mut segments = text.trim().split('_');
        let soc = segments.next()?.trim().parse().ok()?;
        let temperature_1 = segments.next()?.trim().parse().ok()?;
        let temperature_2 = segments.next()?.trim().parse().ok()?;
        let mut cell_voltages_mv = Vec::new();
        for segment in segments {
            cell_voltages_mv.push(segment.trim().parse().ok()?);
        }
        Some(Self {
            soc,
            temperature_1,
            temperature_2,
            cell_voltages_mv,
            raw: buffer.to_vec(),
        })
    }
}

/// Why a buffer could not be decoded into a typed record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnknownReason {
    InvalidStartByte,
    UnknownCommand,
    TruncatedPayload,
    MalformedText,
}

impl fmt::Display for UnknownReason {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            UnknownReason::InvalidStartByte => write!(f, "invalid start byte"),
            UnknownReason::UnknownCommand => write!(f, "unknown command"),
            UnknownReason::TruncatedPayload => write!(f, "truncated payload"),
            UnknownReason::MalformedText => write!(f, "malformed text payload"),
        }
    }
}

/// An unclassifiable notification. Carries the reason and the untouched
/// bytes, never a partial decode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnknownFrame {
    pub reason: UnknownReason,
    pub raw: Vec<u8>,
}

/// A classified inbound notification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ParsedMessage {
    DeviceInfo(DeviceInfo),
    RuntimeInfo(RuntimeInfo),
    CellInfo(CellInfo),
    Unknown(UnknownFrame),
}

fn unknown(reason: UnknownReason, buffer: &[u8]) -> ParsedMessage {
    ParsedMessage::Unknown(UnknownFrame {
        reason,
        raw: buffer.to_vec(),
    })
}

/// Classifies a raw notification buffer and decodes its payload.
///
/// Cell-info replies do not reliably carry the expected opcode, so the
/// underscore heuristic runs BEFORE opcode dispatch: a buffer whose text
/// contains exactly 16 or exactly 3 underscores is treated as cell info no
/// matter what byte 3 says. A payload that coincidentally contains that
/// many underscores is therefore misclassified; this is a known protocol
/// ambiguity and is kept on purpose (see the tests pinning the boundary).
///
/// The checksum is NOT verified here; callers that want the structural
/// gate apply [`is_valid_frame`] first.
pub fn parse_message(buffer: &[u8]) -> ParsedMessage {
    let text = String::from_utf8_lossy(buffer);
    let underscores = text.matches('_').count();
    if underscores == 16 || underscores == 3 {
        return match CellInfo::decode(buffer) {
            Some(info) => ParsedMessage::CellInfo(info),
            None => unknown(UnknownReason::MalformedText, buffer),
        };
    }

    if buffer.first() != Some(&START_BYTE) {
        return unknown(UnknownReason::InvalidStartByte, buffer);
    }
    let Some(&command) = buffer.get(3) else {
        return unknown(UnknownReason::TruncatedPayload, buffer);
    };

    if command == Command::DeviceInfo as u8 {
        match DeviceInfo::decode(buffer) {
            Some(info) => ParsedMessage::DeviceInfo(info),
            None => unknown(UnknownReason::TruncatedPayload, buffer),
        }
    } else if command == Command::RuntimeInfo as u8 {
        match RuntimeInfo::decode(buffer) {
            Some(info) => ParsedMessage::RuntimeInfo(info),
            None => unknown(UnknownReason::TruncatedPayload, buffer),
        }
    } else {
        unknown(UnknownReason::UnknownCommand, buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 44-byte RUNTIME_INFO base payload (frame offsets 4..48) with
    /// recognizable values at every field offset.
    fn runtime_base_payload() -> Vec<u8> {
        let mut p = vec![0u8; 44];
        p[0..2].copy_from_slice(&120u16.to_le_bytes()); // input_power_w @4
        p[2..4].copy_from_slice(&250u16.to_le_bytes()); // output_power_w @6
        p[4..6].copy_from_slice(&(-130i16).to_le_bytes()); // battery_power_w @8
        p[6..8].copy_from_slice(&755u16.to_le_bytes()); // soc 75.5% @10
        p[8..10].copy_from_slice(&2531u16.to_le_bytes()); // 25.31V @12
        p[10..12].copy_from_slice(&(-512i16).to_le_bytes()); // -5.12A @14
        p[12..14].copy_from_slice(&21i16.to_le_bytes()); // temperature_1 @16
        p[14..16].copy_from_slice(&23i16.to_le_bytes()); // temperature_2 @18
        p[16] = 0b0001_0001; // ac_output_on | charging @20
        p[17..19].copy_from_slice(&0u16.to_le_bytes()); // fault_flags @21
        p[19] = 1; // timer_enabled @23
        p[20..22].copy_from_slice(&90u16.to_le_bytes()); // timer minutes @24
        p[22..26].copy_from_slice(&1234u32.to_le_bytes()); // charge_today @26
        p[26..30].copy_from_slice(&567u32.to_le_bytes()); // discharge_today @30
        p[30..34].copy_from_slice(&89012u32.to_le_bytes()); // charge_total @34
        p[34..38].copy_from_slice(&34567u32.to_le_bytes()); // discharge_total @38
        p[38..40].copy_from_slice(&42u16.to_le_bytes()); // cycle_count @42
        p[40..44].copy_from_slice(&54321u32.to_le_bytes()); // remaining mAh @44
        p
    }

    fn runtime_extended_payload() -> Vec<u8> {
        let mut p = runtime_base_payload();
        p.extend_from_slice(&102_400u32.to_le_bytes()); // full_capacity @48
        p.push(4); // cell_count @52
        p.extend_from_slice(&3412u16.to_le_bytes()); // max cell mV @53
        p.extend_from_slice(&3398u16.to_le_bytes()); // min cell mV @55
        p
    }

    #[test]
    fn encoded_frames_are_valid_for_all_opcodes_and_payload_sizes() {
        for command in 0..=255u8 {
            for len in 0..=20usize {
                let payload: Vec<u8> = (0..len as u8).collect();
                let frame = encode_frame(command, Some(&payload));
                assert!(is_valid_frame(&frame), "command={command} len={len}");
                assert_eq!(frame[1] as usize, frame.len());
                assert_eq!(frame[3], command);
            }
        }
    }

    #[test]
    fn encode_without_payload() {
        let frame = encode_frame(Command::RuntimeInfo as u8, None);
        assert_eq!(frame.len(), MIN_FRAME_LENGTH);
        assert_eq!(
            frame,
            vec![0x73, 0x05, 0x23, 0x03, 0x73 ^ 0x05 ^ 0x23 ^ 0x03]
        );
    }

    #[test]
    fn checksum_of_empty_buffer_is_zero() {
        assert_eq!(checksum(&[]), 0);
    }

    #[test]
    fn checksum_recomputation_is_idempotent() {
        let frame = encode_frame(0x42, Some(b"abc"));
        assert_eq!(checksum(&frame), checksum(&frame) ^ 0);
    }

    #[test]
    fn any_single_byte_mutation_invalidates_a_frame() {
        let frame = encode_frame(Command::DeviceInfo as u8, Some(b"model=X200"));
        assert!(is_valid_frame(&frame));
        for i in 0..frame.len() {
            let mut mutated = frame.clone();
            mutated[i] ^= 0xFF;
            assert!(!is_valid_frame(&mutated), "byte {i} mutation went unnoticed");
        }
    }

    #[test]
    fn too_short_buffers_are_invalid() {
        assert!(!is_valid_frame(&[]));
        assert!(!is_valid_frame(&[0x73, 0x04, 0x23, 0x03]));
    }

    #[test]
    fn device_info_round_trip() {
        let frame = encode_frame(Command::DeviceInfo as u8, Some(b"k=v,k2=v2"));
        match parse_message(&frame) {
            ParsedMessage::DeviceInfo(info) => {
                assert_eq!(info.fields.len(), 2);
                assert_eq!(info.fields["k"], "v");
                assert_eq!(info.fields["k2"], "v2");
                assert_eq!(info.raw, frame);
            }
            other => panic!("expected device info, got {other:?}"),
        }
    }

    #[test]
    fn device_info_discards_malformed_pairs() {
        let frame = encode_frame(
            Command::DeviceInfo as u8,
            Some(b"model=X200, fw = 1.05 ,broken,=x,y=,a=b=c"),
        );
        match parse_message(&frame) {
            ParsedMessage::DeviceInfo(info) => {
                assert_eq!(info.fields.len(), 2);
                assert_eq!(info.fields["model"], "X200");
                assert_eq!(info.fields["fw"], "1.05");
            }
            other => panic!("expected device info, got {other:?}"),
        }
    }

    #[test]
    fn cell_info_decodes_underscore_delimited_text() {
        let info = CellInfo::decode(b"80_25_26_3200_3201_3202").expect("decodes");
        assert_eq!(info.soc, 80);
        assert_eq!(info.temperature_1, 25);
        assert_eq!(info.temperature_2, 26);
        assert_eq!(info.cell_voltages_mv, vec![3200, 3201, 3202]);
    }

    #[test]
    fn cell_info_heuristic_runs_before_opcode_dispatch() {
        // Three underscores, no valid frame header at all.
        match parse_message(b"95_18_19_3350") {
            ParsedMessage::CellInfo(info) => {
                assert_eq!(info.soc, 95);
                assert_eq!(info.cell_voltages_mv, vec![3350]);
            }
            other => panic!("expected cell info, got {other:?}"),
        }
        // Sixteen underscores: 14 cell readings.
        let text =
            b"80_25_26_3200_3201_3202_3203_3204_3205_3206_3207_3208_3209_3210_3211_3212_3213";
        match parse_message(text) {
            ParsedMessage::CellInfo(info) => assert_eq!(info.cell_voltages_mv.len(), 14),
            other => panic!("expected cell info, got {other:?}"),
        }
    }

    #[test]
    fn cell_info_heuristic_false_positive_boundary() {
        // A device-info frame whose payload happens to contain exactly three
        // underscores is captured by the heuristic and, being non-numeric,
        // ends up unclassified instead of decoded as device info. Known
        // protocol ambiguity, pinned here on purpose.
        let frame = encode_frame(Command::DeviceInfo as u8, Some(b"a_b=1,c_d=2,e_f=3"));
        match parse_message(&frame) {
            ParsedMessage::Unknown(u) => assert_eq!(u.reason, UnknownReason::MalformedText),
            other => panic!("expected unknown, got {other:?}"),
        }
        // Two underscores dodge the heuristic and decode normally.
        let frame = encode_frame(Command::DeviceInfo as u8, Some(b"a_b=1,c_d=2"));
        assert!(matches!(parse_message(&frame), ParsedMessage::DeviceInfo(_)));
    }

    #[test]
    fn runtime_info_base_layout() {
        let frame = encode_frame(Command::RuntimeInfo as u8, Some(&runtime_base_payload()));
        let info = match parse_message(&frame) {
            ParsedMessage::RuntimeInfo(info) => info,
            other => panic!("expected runtime info, got {other:?}"),
        };
        assert_eq!(info.input_power_w, 120);
        assert_eq!(info.output_power_w, 250);
        assert_eq!(info.battery_power_w, -130);
        assert_eq!(info.soc_percent, 75.5);
        assert_eq!(info.battery_voltage, 25.31);
        assert_eq!(info.battery_current, -5.12);
        assert_eq!(info.temperature_1, 21);
        assert_eq!(info.temperature_2, 23);
        assert!(info.ac_output_on);
        assert!(!info.dc_output_on);
        assert!(info.charging);
        assert!(!info.discharging);
        assert!(info.timer_enabled);
        assert_eq!(info.timer_minutes_remaining, 90);
        assert_eq!(info.charge_today_wh, 1234);
        assert_eq!(info.discharge_today_wh, 567);
        assert_eq!(info.charge_total_wh, 89012);
        assert_eq!(info.discharge_total_wh, 34567);
        assert_eq!(info.cycle_count, 42);
        assert_eq!(info.remaining_capacity_mah, 54321);
        assert_eq!(info.full_capacity_mah, None);
        assert_eq!(info.cell_count, None);
    }

    #[test]
    fn runtime_info_extension_region() {
        let frame = encode_frame(Command::RuntimeInfo as u8, Some(&runtime_extended_payload()));
        let info = match parse_message(&frame) {
            ParsedMessage::RuntimeInfo(info) => info,
            other => panic!("expected runtime info, got {other:?}"),
        };
        assert_eq!(info.full_capacity_mah, Some(102_400));
        assert_eq!(info.cell_count, Some(4));
        assert_eq!(info.max_cell_voltage_mv, Some(3412));
        assert_eq!(info.min_cell_voltage_mv, Some(3398));
    }

    #[test]
    fn runtime_info_extension_reads_short_circuit() {
        // Buffer ends inside the extension region: only the fields it still
        // reaches are populated, in order.
        let mut payload = runtime_base_payload();
        payload.extend_from_slice(&102_400u32.to_le_bytes());
        payload.push(4);
        // max/min cell voltages cut off
        let frame = encode_frame(Command::RuntimeInfo as u8, Some(&payload));
        let info = match parse_message(&frame) {
            ParsedMessage::RuntimeInfo(info) => info,
            other => panic!("expected runtime info, got {other:?}"),
        };
        assert_eq!(info.full_capacity_mah, Some(102_400));
        assert_eq!(info.cell_count, Some(4));
        assert_eq!(info.max_cell_voltage_mv, None);
        assert_eq!(info.min_cell_voltage_mv, None);
    }

    #[test]
    fn runtime_info_truncated_base_fails_closed() {
        let frame = encode_frame(Command::RuntimeInfo as u8, Some(&[0u8; 10]));
        match parse_message(&frame) {
            ParsedMessage::Unknown(u) => assert_eq!(u.reason, UnknownReason::TruncatedPayload),
            other => panic!("expected unknown, got {other:?}"),
        }
    }

    #[test]
    fn invalid_start_byte_classified_before_opcode_dispatch() {
        let mut frame = encode_frame(Command::DeviceInfo as u8, Some(b"k=v"));
        frame[0] = 0x00;
        match parse_message(&frame) {
            ParsedMessage::Unknown(u) => {
                assert_eq!(u.reason, UnknownReason::InvalidStartByte);
                assert_eq!(u.raw, frame);
            }
            other => panic!("expected unknown, got {other:?}"),
        }
    }

    #[test]
    fn unrecognized_opcode_is_unknown_command() {
        let frame = encode_frame(0x99, Some(b"whatever"));
        match parse_message(&frame) {
            ParsedMessage::Unknown(u) => assert_eq!(u.reason, UnknownReason::UnknownCommand),
            other => panic!("expected unknown, got {other:?}"),
        }
    }

    #[test]
    fn wifi_config_payload_text() {
        assert_eq!(
            wifi_config_payload("home", "hunter2"),
            b"home<.,.>hunter2".to_vec()
        );
    }

    #[test]
    fn mqtt_config_payload_without_credentials() {
        let config = MqttConfig {
            ssl: true,
            host: "h".into(),
            port: "1883".into(),
            username: None,
            password: None,
        };
        assert_eq!(
            mqtt_config_payload(&config),
            b"1<.,.>h<.,.>1883<.,.><.,.><.,.>".to_vec()
        );
    }

    #[test]
    fn mqtt_config_payload_with_credentials() {
        let config = MqttConfig {
            ssl: false,
            host: "broker.local".into(),
            port: "8883".into(),
            username: Some("user".into()),
            password: Some("pass".into()),
        };
        assert_eq!(
            mqtt_config_payload(&config),
            b"0<.,.>broker.local<.,.>8883<.,.>user<.,.>pass<.,.>".to_vec()
        );
    }
}
