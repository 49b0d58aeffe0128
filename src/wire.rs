//! ==============================================================================
//! wire.rs - fixed binary layouts for the wireless hop
//! ==============================================================================
//!
//! reading payload (sender -> gateway), little-endian, packed:
//!
//!     offset  size  field
//!     0       4     sender_id         i32
//!     4       4     light_raw         i32
//!     8       4     dht_temp          f32
//!     12      4     humidity          f32
//!     16      4     thermistor_temp   f32
//!     20      4     voltage           f32
//!     24      4     current           f32
//!     28      1     valid             u8 (0 = false)
//!
//! firmware built from the C struct pads this to 32 bytes; the decoder
//! accepts both and ignores the padding.
//!
//! command payload (gateway -> sender): char[32], NUL-terminated.
//!
//! ==============================================================================

use crate::domain::ReadingRecord;
use crate::error::WireError;

pub const READING_PAYLOAD_LEN: usize = 29;
pub const READING_PAYLOAD_PADDED_LEN: usize = 32;
pub const COMMAND_PAYLOAD_LEN: usize = 32;

pub fn encode_reading(reading: &ReadingRecord) -> [u8; READING_PAYLOAD_LEN] {
    let mut buf = [0u8; READING_PAYLOAD_LEN];
    buf[0..4].copy_from_slice(&reading.sender_id.to_le_bytes());
    buf[4..8].copy_from_slice(&reading.light_raw.to_le_bytes());
    buf[8..12].copy_from_slice(&reading.dht_temperature.to_le_bytes());
    buf[12..16].copy_from_slice(&reading.dht_humidity.to_le_bytes());
    buf[16..20].copy_from_slice(&reading.thermistor_temperature.to_le_bytes());
    buf[20..24].copy_from_slice(&reading.voltage.to_le_bytes());
    buf[24..28].copy_from_slice(&reading.current.to_le_bytes());
    buf[28] = reading.valid as u8;
    buf
}

pub fn decode_reading(payload: &[u8]) -> Result<ReadingRecord, WireError> {
    if payload.len() != READING_PAYLOAD_LEN && payload.len() != READING_PAYLOAD_PADDED_LEN {
        return Err(WireError::Length {
            got: payload.len(),
            expected: "29 or 32",
        });
    }

    let word = |at: usize| -> [u8; 4] {
        [payload[at], payload[at + 1], payload[at + 2], payload[at + 3]]
    };

    Ok(ReadingRecord {
        sender_id: i32::from_le_bytes(word(0)),
        light_raw: i32::from_le_bytes(word(4)),
        dht_temperature: f32::from_le_bytes(word(8)),
        dht_humidity: f32::from_le_bytes(word(12)),
        thermistor_temperature: f32::from_le_bytes(word(16)),
        voltage: f32::from_le_bytes(word(20)),
        current: f32::from_le_bytes(word(24)),
        valid: payload[28] != 0,
    })
}

/// Pack a command name into the fixed NUL-terminated buffer.
pub fn encode_command(name: &str) -> Result<[u8; COMMAND_PAYLOAD_LEN], WireError> {
    let bytes = name.as_bytes();
    // one byte is reserved for the terminator
    if bytes.len() >= COMMAND_PAYLOAD_LEN {
        return Err(WireError::CommandTooLong {
            len: bytes.len(),
            max: COMMAND_PAYLOAD_LEN - 1,
        });
    }
    let mut buf = [0u8; COMMAND_PAYLOAD_LEN];
    buf[..bytes.len()].copy_from_slice(bytes);
    Ok(buf)
}

pub fn decode_command(payload: &[u8]) -> Result<String, WireError> {
    if payload.len() != COMMAND_PAYLOAD_LEN {
        return Err(WireError::Length {
            got: payload.len(),
            expected: "32",
        });
    }
    let end = payload
        .iter()
        .position(|&b| b == 0)
        .ok_or(WireError::Unterminated)?;
    std::str::from_utf8(&payload[..end])
        .map(str::to_string)
        .map_err(|_| WireError::Utf8)
}
