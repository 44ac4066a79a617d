//! Wire format of the Vital Watch sensor.
//!
//! Outbound commands are fixed 16-byte frames:
//!
//! ```text
//! +--------+---------------------------+----------+
//! | opcode | payload (14, zero padded) | checksum |
//! +--------+---------------------------+----------+
//!     0              1..=14                15
//! ```
//!
//! The checksum is the sum of bytes 0..15 modulo 256.
//!
//! Inbound notifications are variable length. Byte 0 identifies the report;
//! for the measurement report (`0x9C`) byte 1 selects the sub-report. Every
//! field is a raw unsigned byte.
//!
//! Commands and notifications are separate address spaces: opcode `0x28`
//! starts the SpO2/BP stream, report `0x28` carries its readings. Nothing in
//! this module feeds an encoded command back into the decoder.

use std::fmt;

use thiserror::Error;

use crate::types::{LiveVitals, VitalsSnapshot};

/// Total length of an outbound command frame.
pub const FRAME_LEN: usize = 16;

/// Maximum payload carried by a command frame.
pub const MAX_PAYLOAD_LEN: usize = FRAME_LEN - 2;

const CHECKSUM_INDEX: usize = FRAME_LEN - 1;

/// Outbound command opcodes.
pub mod opcode {
    /// Start real-time steps / heart rate / temperature streaming.
    pub const START_REALTIME_HEART: u8 = 0x09;
    /// Start real-time SpO2 / blood pressure streaming.
    pub const START_REALTIME_SPO2_BP: u8 = 0x28;
    /// Start a measurement (comprehensive snapshot or ECG, selected by payload).
    pub const START_MEASUREMENT: u8 = 0x99;
    /// Stop the running measurement.
    pub const STOP_MEASUREMENT: u8 = 0x98;
}

/// Inbound report identifiers.
pub mod report {
    /// Real-time SpO2 / blood pressure reading.
    pub const LIVE_VITALS: u8 = 0x28;
    /// Measurement report, sub-typed by byte 1.
    pub const MEASUREMENT: u8 = 0x9C;
    /// Measurement sub-report carrying the comprehensive snapshot.
    pub const MEASUREMENT_SNAPSHOT: u8 = 0x03;
}

const LIVE_VITALS_LEN: usize = 8;
const SNAPSHOT_LEN: usize = 10;
const MEASUREMENT_HEADER_LEN: usize = 2;

/// Errors produced while building or parsing frames.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    /// The command payload does not fit in a frame.
    #[error("command payload of {len} bytes exceeds the {max}-byte limit")]
    PayloadTooLarge {
        /// Payload length supplied.
        len: usize,
        /// Maximum payload length.
        max: usize,
    },

    /// The notification is shorter than its report type requires.
    #[error("{report} frame too short: expected at least {expected} bytes, got {actual}")]
    FrameTooShort {
        /// Report the frame was identified as.
        report: &'static str,
        /// Minimum length for that report.
        expected: usize,
        /// Length received.
        actual: usize,
    },
}

/// Result type for codec operations.
pub type FrameResult<T> = std::result::Result<T, FrameError>;

/// A checksummed 16-byte command ready to be written to the device.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct CommandFrame([u8; FRAME_LEN]);

impl CommandFrame {
    /// Raw bytes as they go over the air.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; FRAME_LEN] {
        &self.0
    }

    /// The command opcode.
    #[must_use]
    pub const fn opcode(&self) -> u8 {
        self.0[0]
    }

    /// The trailing checksum byte.
    #[must_use]
    pub const fn checksum(&self) -> u8 {
        self.0[CHECKSUM_INDEX]
    }
}

impl fmt::Debug for CommandFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CommandFrame({})", hex(&self.0))
    }
}

/// Outcome of decoding one notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodedFrame {
    /// Real-time vitals update.
    LiveReading(LiveVitals),
    /// A completed comprehensive measurement.
    SnapshotReading(VitalsSnapshot),
    /// A report this gateway does not interpret (ECG, PPG, acknowledgements...).
    Unrecognized {
        /// Report identifier (byte 0).
        identifier: u8,
    },
}

/// Sum of the first 15 bytes modulo 256.
#[must_use]
pub fn checksum(bytes: &[u8]) -> u8 {
    bytes
        .iter()
        .take(CHECKSUM_INDEX)
        .fold(0u8, |acc, b| acc.wrapping_add(*b))
}

/// Build a command frame from an opcode and up to 14 payload bytes.
///
/// # Errors
///
/// Returns [`FrameError::PayloadTooLarge`] if `payload` exceeds
/// [`MAX_PAYLOAD_LEN`].
pub fn encode_command(opcode: u8, payload: &[u8]) -> FrameResult<CommandFrame> {
    if payload.len() > MAX_PAYLOAD_LEN {
        return Err(FrameError::PayloadTooLarge {
            len: payload.len(),
            max: MAX_PAYLOAD_LEN,
        });
    }

    let mut bytes = [0u8; FRAME_LEN];
    bytes[0] = opcode;
    bytes[1..=payload.len()].copy_from_slice(payload);
    bytes[CHECKSUM_INDEX] = checksum(&bytes);
    Ok(CommandFrame(bytes))
}

/// Parse a notification received from the device.
///
/// Unknown identifiers and measurement sub-reports are returned as
/// [`DecodedFrame::Unrecognized`]; only truncated frames are errors.
///
/// # Errors
///
/// Returns [`FrameError::FrameTooShort`] when `raw` is empty or shorter than
/// the identified report requires.
pub fn decode_notification(raw: &[u8]) -> FrameResult<DecodedFrame> {
    let Some(&identifier) = raw.first() else {
        return Err(FrameError::FrameTooShort {
            report: "notification",
            expected: 1,
            actual: 0,
        });
    };

    match identifier {
        report::LIVE_VITALS => {
            require_len(raw, "live vitals", LIVE_VITALS_LEN)?;
            Ok(DecodedFrame::LiveReading(LiveVitals {
                heart_rate: raw[2],
                blood_oxygen: raw[3],
                bp_systolic: raw[6],
                bp_diastolic: raw[7],
                connected: true,
            }))
        }
        report::MEASUREMENT => {
            require_len(raw, "measurement", MEASUREMENT_HEADER_LEN)?;
            if raw[1] != report::MEASUREMENT_SNAPSHOT {
                return Ok(DecodedFrame::Unrecognized { identifier });
            }
            require_len(raw, "vitals snapshot", SNAPSHOT_LEN)?;
            Ok(DecodedFrame::SnapshotReading(VitalsSnapshot {
                hrv: raw[2],
                vascular_aging: raw[3],
                heart_rate: raw[4],
                stress: raw[5],
                bp_systolic: raw[6],
                bp_diastolic: raw[7],
                mood: raw[8],
                respiration_rate: raw[9],
            }))
        }
        _ => Ok(DecodedFrame::Unrecognized { identifier }),
    }
}

fn require_len(raw: &[u8], report: &'static str, expected: usize) -> FrameResult<()> {
    if raw.len() < expected {
        return Err(FrameError::FrameTooShort {
            report,
            expected,
            actual: raw.len(),
        });
    }
    Ok(())
}

/// Space-separated lowercase hex, used for frame logging.
#[must_use]
pub fn hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    #[test]
    fn test_encode_start_heart_stream() {
        let frame = assert_ok!(encode_command(0x09, &[0x01, 0x01]));
        assert_eq!(
            frame.as_bytes(),
            &[0x09, 0x01, 0x01, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0x0B]
        );
        assert_eq!(frame.opcode(), 0x09);
        assert_eq!(frame.checksum(), 0x0B);
    }

    #[test]
    fn test_encode_checksum_wraps() {
        let payload = [0xFF; MAX_PAYLOAD_LEN];
        let frame = assert_ok!(encode_command(0xFF, &payload));
        let expected = (0xFFu32 * 15 % 256) as u8;
        assert_eq!(frame.checksum(), expected);
        assert_eq!(frame.as_bytes().len(), FRAME_LEN);
    }

    #[test]
    fn test_checksum_matches_sum_for_every_payload_length() {
        for len in 0..=MAX_PAYLOAD_LEN {
            let payload: Vec<u8> = (0..len).map(|i| (i as u8).wrapping_mul(37)).collect();
            let frame = encode_command(0x99, &payload).unwrap();
            let bytes = frame.as_bytes();
            let sum: u32 = bytes[..15].iter().map(|b| u32::from(*b)).sum();
            assert_eq!(u32::from(bytes[15]), sum % 256, "payload length {len}");
            assert!(bytes[1 + len..15].iter().all(|b| *b == 0));
        }
    }

    #[test]
    fn test_encode_stop_without_payload() {
        let frame = encode_command(opcode::STOP_MEASUREMENT, &[]).unwrap();
        assert_eq!(frame.as_bytes()[0], 0x98);
        assert_eq!(frame.checksum(), 0x98);
    }

    #[test]
    fn test_encode_rejects_oversized_payload() {
        let err = assert_err!(encode_command(0x09, &[0u8; 15]));
        assert_eq!(err, FrameError::PayloadTooLarge { len: 15, max: 14 });
    }

    #[test]
    fn test_decode_live_reading() {
        let decoded = decode_notification(&[0x28, 0x00, 72, 98, 0, 0, 118, 76]).unwrap();
        assert_eq!(
            decoded,
            DecodedFrame::LiveReading(LiveVitals {
                heart_rate: 72,
                blood_oxygen: 98,
                bp_systolic: 118,
                bp_diastolic: 76,
                connected: true,
            })
        );
    }

    #[test]
    fn test_decode_snapshot_reading() {
        let decoded =
            decode_notification(&[0x9C, 0x03, 45, 35, 70, 20, 120, 80, 50, 16]).unwrap();
        assert_eq!(
            decoded,
            DecodedFrame::SnapshotReading(VitalsSnapshot {
                hrv: 45,
                vascular_aging: 35,
                heart_rate: 70,
                stress: 20,
                bp_systolic: 120,
                bp_diastolic: 80,
                mood: 50,
                respiration_rate: 16,
            })
        );
    }

    #[test]
    fn test_decode_ignores_trailing_bytes() {
        let decoded = decode_notification(&[0x28, 0, 60, 97, 1, 2, 110, 70, 9, 9, 9]).unwrap();
        assert!(matches!(decoded, DecodedFrame::LiveReading(v) if v.heart_rate == 60));
    }

    #[test]
    fn test_decode_is_total_over_identifiers() {
        for identifier in 0..=u8::MAX {
            for discriminator in 0..=u8::MAX {
                let mut raw = [0u8; SNAPSHOT_LEN];
                raw[0] = identifier;
                raw[1] = discriminator;
                let decoded = decode_notification(&raw).unwrap();
                match (identifier, discriminator) {
                    (report::LIVE_VITALS, _) => {
                        assert!(matches!(decoded, DecodedFrame::LiveReading(_)));
                    }
                    (report::MEASUREMENT, report::MEASUREMENT_SNAPSHOT) => {
                        assert!(matches!(decoded, DecodedFrame::SnapshotReading(_)));
                    }
                    _ => assert_eq!(decoded, DecodedFrame::Unrecognized { identifier }),
                }
            }
        }
    }

    #[test]
    fn test_decode_other_measurement_subreports_unrecognized() {
        let decoded = decode_notification(&[0x9C, 0x01]).unwrap();
        assert_eq!(decoded, DecodedFrame::Unrecognized { identifier: 0x9C });
    }

    #[test]
    fn test_decode_short_frames() {
        assert_eq!(
            decode_notification(&[]),
            Err(FrameError::FrameTooShort {
                report: "notification",
                expected: 1,
                actual: 0
            })
        );
        assert_eq!(
            decode_notification(&[0x28, 0x00, 72]),
            Err(FrameError::FrameTooShort {
                report: "live vitals",
                expected: 8,
                actual: 3
            })
        );
        assert_eq!(
            decode_notification(&[0x9C]),
            Err(FrameError::FrameTooShort {
                report: "measurement",
                expected: 2,
                actual: 1
            })
        );
        assert_eq!(
            decode_notification(&[0x9C, 0x03, 45, 35]),
            Err(FrameError::FrameTooShort {
                report: "vitals snapshot",
                expected: 10,
                actual: 4
            })
        );
    }

    #[test]
    fn test_unknown_short_frame_is_unrecognized() {
        assert_eq!(
            decode_notification(&[0xAA]),
            Ok(DecodedFrame::Unrecognized { identifier: 0xAA })
        );
    }

    #[test]
    fn test_hex_formatting() {
        assert_eq!(hex(&[0x09, 0xAB, 0x00]), "09 ab 00");
    }
}
