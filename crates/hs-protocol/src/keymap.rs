//! Keycode table for the input record
//!
//! Keycodes on the wire are PS/2 scan-code set 1 "make" codes. Extended keys
//! (those sent with an `E0` prefix by a real keyboard) are carried as
//! `0xE0xx`. Names follow the DOM `KeyboardEvent.code` vocabulary with the
//! `Key`/`Digit` prefixes dropped for letters and digits.

/// Scan code to key name, ordered by scan code
const SCAN_CODES: &[(u16, &str)] = &[
    (0x01, "Escape"),
    (0x02, "1"),
    (0x03, "2"),
    (0x04, "3"),
    (0x05, "4"),
    (0x06, "5"),
    (0x07, "6"),
    (0x08, "7"),
    (0x09, "8"),
    (0x0A, "9"),
    (0x0B, "0"),
    (0x0C, "Minus"),
    (0x0D, "Equal"),
    (0x0E, "Backspace"),
    (0x0F, "Tab"),
    (0x10, "Q"),
    (0x11, "W"),
    (0x12, "E"),
    (0x13, "R"),
    (0x14, "T"),
    (0x15, "Y"),
    (0x16, "U"),
    (0x17, "I"),
    (0x18, "O"),
    (0x19, "P"),
    (0x1A, "BracketLeft"),
    (0x1B, "BracketRight"),
    (0x1C, "Enter"),
    (0x1D, "ControlLeft"),
    (0x1E, "A"),
    (0x1F, "S"),
    (0x20, "D"),
    (0x21, "F"),
    (0x22, "G"),
    (0x23, "H"),
    (0x24, "J"),
    (0x25, "K"),
    (0x26, "L"),
    (0x27, "Semicolon"),
    (0x28, "Quote"),
    (0x29, "Backquote"),
    (0x2A, "ShiftLeft"),
    (0x2B, "Backslash"),
    (0x2C, "Z"),
    (0x2D, "X"),
    (0x2E, "C"),
    (0x2F, "V"),
    (0x30, "B"),
    (0x31, "N"),
    (0x32, "M"),
    (0x33, "Comma"),
    (0x34, "Period"),
    (0x35, "Slash"),
    (0x36, "ShiftRight"),
    (0x37, "NumpadMultiply"),
    (0x38, "AltLeft"),
    (0x39, "Space"),
    (0x3A, "CapsLock"),
    (0x3B, "F1"),
    (0x3C, "F2"),
    (0x3D, "F3"),
    (0x3E, "F4"),
    (0x3F, "F5"),
    (0x40, "F6"),
    (0x41, "F7"),
    (0x42, "F8"),
    (0x43, "F9"),
    (0x44, "F10"),
    (0x45, "NumLock"),
    (0x46, "ScrollLock"),
    (0x47, "Numpad7"),
    (0x48, "Numpad8"),
    (0x49, "Numpad9"),
    (0x4A, "NumpadSubtract"),
    (0x4B, "Numpad4"),
    (0x4C, "Numpad5"),
    (0x4D, "Numpad6"),
    (0x4E, "NumpadAdd"),
    (0x4F, "Numpad1"),
    (0x50, "Numpad2"),
    (0x51, "Numpad3"),
    (0x52, "Numpad0"),
    (0x53, "NumpadDecimal"),
    (0x57, "F11"),
    (0x58, "F12"),
    (0xE01C, "NumpadEnter"),
    (0xE01D, "ControlRight"),
    (0xE035, "NumpadDivide"),
    (0xE038, "AltRight"),
    (0xE047, "Home"),
    (0xE048, "ArrowUp"),
    (0xE049, "PageUp"),
    (0xE04B, "ArrowLeft"),
    (0xE04D, "ArrowRight"),
    (0xE04F, "End"),
    (0xE050, "ArrowDown"),
    (0xE051, "PageDown"),
    (0xE052, "Insert"),
    (0xE053, "Delete"),
    (0xE05B, "MetaLeft"),
    (0xE05C, "MetaRight"),
    (0xE05D, "ContextMenu"),
];

/// Look up the key name for a wire keycode
pub fn key_name(code: u16) -> Option<&'static str> {
    SCAN_CODES
        .binary_search_by_key(&code, |&(c, _)| c)
        .ok()
        .map(|idx| SCAN_CODES[idx].1)
}

/// Look up the scan code for a key name (case-insensitive)
pub fn scan_code(name: &str) -> Option<u16> {
    SCAN_CODES
        .iter()
        .find(|(_, n)| n.eq_ignore_ascii_case(name))
        .map(|&(code, _)| code)
}

/// Whether a scan code carries the `E0` extended prefix
pub fn is_extended(code: u16) -> bool {
    code & 0xFF00 == 0xE000
}
