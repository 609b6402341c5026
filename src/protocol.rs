/*!
 # Wire protocol

 Every command the strip accepts is a fixed nine byte frame that starts with
 `0x7e` and ends with `0xef`. The frames are written to a single characteristic
 (`fff3`) of a single service (`fff0`).
*/

use uuid::Uuid;

/// Service exposing the command characteristic
pub const SERVICE_UUID: Uuid = Uuid::from_u128(0x0000fff0_0000_1000_8000_00805f9b34fb);

/// Characteristic accepting command frames
pub const WRITE_CHARACTERISTIC_UUID: Uuid = Uuid::from_u128(0x0000fff3_0000_1000_8000_00805f9b34fb);

const FRAME_START: u8 = 0x7e;
const FRAME_END: u8 = 0xef;

/// A single encoded command
pub type Frame = [u8; 9];

/// Encodes a power on/off command
pub fn encode_power(on: bool) -> Frame {
    let state = u8::from(on);
    [FRAME_START, 0x04, 0x04, state, 0x00, state, 0xff, 0x00, FRAME_END]
}

/// Encodes a brightness command.
///
/// `level` is the raw 0-100 value; callers must reject anything larger.
pub fn encode_brightness(level: u8) -> Frame {
    debug_assert!(level <= 100, "brightness {level} must be filtered before encoding");
    [FRAME_START, 0x04, 0x01, level, 0xff, 0xff, 0xff, 0x00, FRAME_END]
}

/// Encodes a static RGB color command
pub fn encode_rgb(red: u8, green: u8, blue: u8) -> Frame {
    [FRAME_START, 0x07, 0x05, 0x03, red, green, blue, 0x10, FRAME_END]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn power_frames() {
        assert_eq!(
            encode_power(true),
            [0x7e, 0x04, 0x04, 0x01, 0x00, 0x01, 0xff, 0x00, 0xef]
        );
        assert_eq!(
            encode_power(false),
            [0x7e, 0x04, 0x04, 0x00, 0x00, 0x00, 0xff, 0x00, 0xef]
        );
    }

    #[test]
    fn brightness_is_raw_level() {
        assert_eq!(
            encode_brightness(100),
            [0x7e, 0x04, 0x01, 0x64, 0xff, 0xff, 0xff, 0x00, 0xef]
        );
        assert_eq!(encode_brightness(0)[3], 0x00);
        assert_eq!(encode_brightness(42)[3], 42);
    }

    #[test]
    fn rgb_frame() {
        assert_eq!(
            encode_rgb(0x12, 0x34, 0xff),
            [0x7e, 0x07, 0x05, 0x03, 0x12, 0x34, 0xff, 0x10, 0xef]
        );
    }

    #[test]
    fn identifiers_are_short_form_uuids() {
        assert_eq!(
            SERVICE_UUID.to_string(),
            "0000fff0-0000-1000-8000-00805f9b34fb"
        );
        assert_eq!(
            WRITE_CHARACTERISTIC_UUID.to_string(),
            "0000fff3-0000-1000-8000-00805f9b34fb"
        );
    }
}
