//! OS input injection

use hs_protocol::MouseButton;

use crate::error::InjectError;

/// Platform input capability calls
///
/// Calls are synchronous and short. Implementations must be usable from
/// any task.
pub trait InputInjector: Send + Sync {
    /// Press (`down == true`) or release a key by set-1 scan code
    fn key(&self, scan_code: u16, down: bool) -> Result<(), InjectError>;

    /// Move the pointer by a relative delta
    fn move_pointer(&self, dx: i32, dy: i32) -> Result<(), InjectError>;

    /// Press or release a mouse button
    fn button(&self, button: MouseButton, down: bool) -> Result<(), InjectError>;

    /// Scroll the wheel by a signed delta in wheel units
    fn scroll(&self, delta: i32) -> Result<(), InjectError>;
}
