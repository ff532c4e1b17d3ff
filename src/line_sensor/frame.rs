// Line sensor wire frame
//
// Frame format (ASCII, fixed offsets):
//   l: DDDD, c: DDDD, r: DDDD
//   0  3   7      12  16     21  25
// Each DDDD is a 4-character unsigned decimal, left padded with zeros or
// spaces. Anything after byte 25 (line terminators) is ignored.

use super::RawSensorArrayStatus;

/// Minimum frame length in bytes
pub const FRAME_LEN: usize = 25;

const SEPARATORS: [(usize, &[u8]); 3] = [(0, b"l: "), (7, b", c: "), (16, b", r: ")];
const LEFT_DIGITS: std::ops::Range<usize> = 3..7;
const CENTER_DIGITS: std::ops::Range<usize> = 12..16;
const RIGHT_DIGITS: std::ops::Range<usize> = 21..25;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    #[error("Frame too short: {0} bytes")]
    TooShort(usize),

    #[error("Separator mismatch at byte {0}")]
    Separator(usize),

    #[error("Invalid {field} value {value:?}")]
    Digits { field: &'static str, value: String },
}

/// Parse one frame into raw channel values
pub fn parse_frame(frame: &str) -> Result<RawSensorArrayStatus, FrameError> {
    let bytes = frame.as_bytes();
    if bytes.len() < FRAME_LEN {
        return Err(FrameError::TooShort(bytes.len()));
    }

    for (offset, separator) in SEPARATORS {
        if &bytes[offset..offset + separator.len()] != separator {
            return Err(FrameError::Separator(offset));
        }
    }

    Ok(RawSensorArrayStatus {
        left: parse_field("left", &bytes[LEFT_DIGITS])?,
        center: parse_field("center", &bytes[CENTER_DIGITS])?,
        right: parse_field("right", &bytes[RIGHT_DIGITS])?,
    })
}

fn parse_field(field: &'static str, digits: &[u8]) -> Result<u16, FrameError> {
    let invalid = || FrameError::Digits {
        field,
        value: String::from_utf8_lossy(digits).into_owned(),
    };

    let padding = digits.iter().take_while(|&&b| b == b' ').count();
    let number = &digits[padding..];
    if number.is_empty() || !number.iter().all(u8::is_ascii_digit) {
        return Err(invalid());
    }

    number
        .iter()
        .try_fold(0u16, |acc, &d| {
            acc.checked_mul(10)?.checked_add(u16::from(d - b'0'))
        })
        .ok_or_else(invalid)
}
