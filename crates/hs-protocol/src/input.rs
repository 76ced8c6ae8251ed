//! Remote input record encoding/decoding
//!
//! The viewer sends input as a fixed 10-byte little-endian record:
//! - type: 1 byte (keyboard, mouse move, mouse button, wheel)
//! - action: 1 byte (press, release, move, click)
//! - button: 1 byte (none, left, right, middle)
//! - reserved: 1 byte
//! - keycode: 2 bytes (u16, scan-code set 1, see `keymap`)
//! - x: 2 bytes (i16)
//! - y: 2 bytes (i16)
//!
//! Decoding is deliberately lossy: a short record or an unknown type yields
//! `None` with no further detail.

use bytes::{Buf, BufMut, BytesMut};
use serde::{Deserialize, Serialize};

use crate::keymap;

/// Size of an input record in bytes
pub const RECORD_SIZE: usize = 10;

/// Record type identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum InputKind {
    /// Key press or release
    Keyboard = 0,
    /// Relative pointer motion
    MouseMove = 1,
    /// Pointer button press or release
    MouseButton = 2,
    /// Scroll wheel
    Wheel = 3,
}

impl InputKind {
    /// Convert to u8
    pub fn as_u8(&self) -> u8 {
        *self as u8
    }

    /// Convert from u8
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Keyboard),
            1 => Some(Self::MouseMove),
            2 => Some(Self::MouseButton),
            3 => Some(Self::Wheel),
            _ => None,
        }
    }
}

/// Semantic input category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputCategory {
    Keyboard,
    Mouse,
}

/// Semantic input action
///
/// The first four variants have wire codes; `Scroll` only exists after
/// decoding a wheel record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputAction {
    Press,
    Release,
    Move,
    Click,
    Scroll,
}

impl InputAction {
    /// Convert from a wire code
    pub fn from_wire(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Press),
            1 => Some(Self::Release),
            2 => Some(Self::Move),
            3 => Some(Self::Click),
            _ => None,
        }
    }
}

/// Pointer button
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MouseButton {
    None,
    Left,
    Right,
    Middle,
}

impl MouseButton {
    /// Convert to u8
    pub fn as_u8(&self) -> u8 {
        match self {
            Self::None => 0,
            Self::Left => 1,
            Self::Right => 2,
            Self::Middle => 3,
        }
    }

    /// Convert from u8, mapping unknown values to `None`
    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Left,
            2 => Self::Right,
            3 => Self::Middle,
            _ => Self::None,
        }
    }

    /// Lowercase name of the button
    pub fn name(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Left => "left",
            Self::Right => "right",
            Self::Middle => "middle",
        }
    }
}

/// Raw input record as it appears on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputRecord {
    pub kind: u8,
    pub action: u8,
    pub button: u8,
    pub keycode: u16,
    pub x: i16,
    pub y: i16,
}

impl InputRecord {
    /// Encode the record into a byte buffer
    pub fn encode(&self, dst: &mut BytesMut) {
        dst.reserve(RECORD_SIZE);
        dst.put_u8(self.kind);
        dst.put_u8(self.action);
        dst.put_u8(self.button);
        dst.put_u8(0); // reserved
        dst.put_u16_le(self.keycode);
        dst.put_i16_le(self.x);
        dst.put_i16_le(self.y);
    }

    /// Encode into a fresh fixed-size array
    pub fn to_bytes(&self) -> [u8; RECORD_SIZE] {
        let mut buf = BytesMut::with_capacity(RECORD_SIZE);
        self.encode(&mut buf);
        let mut out = [0u8; RECORD_SIZE];
        out.copy_from_slice(&buf);
        out
    }

    /// Parse a record, ignoring any bytes past the first ten
    ///
    /// Returns None if there aren't enough bytes.
    pub fn parse(mut src: &[u8]) -> Option<Self> {
        if src.len() < RECORD_SIZE {
            return None;
        }

        let kind = src.get_u8();
        let action = src.get_u8();
        let button = src.get_u8();
        let _ = src.get_u8(); // reserved
        let keycode = src.get_u16_le();
        let x = src.get_i16_le();
        let y = src.get_i16_le();

        Some(Self {
            kind,
            action,
            button,
            keycode,
            x,
            y,
        })
    }
}

/// A decoded remote input event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputCommand {
    pub category: InputCategory,
    pub action: InputAction,
    /// Key name from the keycode table (keyboard only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    /// Raw keycode as received (keyboard only)
    #[serde(default)]
    pub keycode: u16,
    #[serde(default)]
    pub x: i32,
    #[serde(default)]
    pub y: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub button: Option<MouseButton>,
}

impl InputCommand {
    fn keyboard(action: InputAction, keycode: u16) -> Self {
        Self {
            category: InputCategory::Keyboard,
            action,
            key: keymap::key_name(keycode).map(str::to_string),
            keycode,
            x: 0,
            y: 0,
            button: None,
        }
    }

    fn mouse(action: InputAction) -> Self {
        Self {
            category: InputCategory::Mouse,
            action,
            key: None,
            keycode: 0,
            x: 0,
            y: 0,
            button: None,
        }
    }
}

/// Decode a wire record into a semantic command
///
/// Returns None for records shorter than `RECORD_SIZE` and for unknown
/// record types.
pub fn decode_input(bytes: &[u8]) -> Option<InputCommand> {
    let record = InputRecord::parse(bytes)?;
    let kind = InputKind::from_u8(record.kind)?;

    let command = match kind {
        InputKind::Keyboard => {
            let action = match InputAction::from_wire(record.action) {
                Some(InputAction::Press) => InputAction::Press,
                Some(InputAction::Click) => InputAction::Click,
                _ => InputAction::Release,
            };
            InputCommand::keyboard(action, record.keycode)
        }
        InputKind::MouseMove => InputCommand {
            x: record.x as i32,
            y: record.y as i32,
            ..InputCommand::mouse(InputAction::Move)
        },
        InputKind::MouseButton => {
            let action = match InputAction::from_wire(record.action) {
                Some(InputAction::Press) => InputAction::Press,
                Some(InputAction::Click) => InputAction::Click,
                _ => InputAction::Release,
            };
            InputCommand {
                button: Some(MouseButton::from_u8(record.button)),
                ..InputCommand::mouse(action)
            }
        }
        InputKind::Wheel => InputCommand {
            x: record.x as i32,
            y: record.y as i32,
            ..InputCommand::mouse(InputAction::Scroll)
        },
    };

    Some(command)
}
