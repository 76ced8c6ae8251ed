use std::sync::Arc;

use hs_core::traits::InputInjector;
use hs_protocol::keymap;
use hs_protocol::{decode_input, InputAction, InputCategory, InputCommand, MouseButton};

/// Wheel units per notch
pub const WHEEL_NOTCH: i32 = 120;

/// Maps semantic input commands onto injector capability calls
#[derive(Clone)]
pub struct InputDispatcher {
    injector: Arc<dyn InputInjector>,
}

impl InputDispatcher {
    pub fn new(injector: Arc<dyn InputInjector>) -> Self {
        Self { injector }
    }

    /// Decode a raw record and dispatch it. Returns whether it decoded.
    pub fn handle_record(&self, bytes: &[u8]) -> bool {
        match decode_input(bytes) {
            Some(cmd) => {
                self.handle_command(&cmd);
                true
            }
            None => {
                tracing::debug!("Dropping undecodable input record ({} bytes)", bytes.len());
                false
            }
        }
    }

    pub fn handle_command(&self, cmd: &InputCommand) {
        match cmd.category {
            InputCategory::Keyboard => self.keyboard(cmd),
            InputCategory::Mouse => self.mouse(cmd),
        }
    }

    fn keyboard(&self, cmd: &InputCommand) {
        let Some(code) = cmd
            .key
            .as_deref()
            .and_then(keymap::scan_code)
            .filter(|code| *code != 0)
        else {
            tracing::debug!("Unknown key (keycode {:#06x}), dropping", cmd.keycode);
            return;
        };

        match cmd.action {
            InputAction::Press => self.key(code, true),
            InputAction::Release => self.key(code, false),
            InputAction::Click => {
                self.key(code, true);
                self.key(code, false);
            }
            other => tracing::debug!("Ignoring keyboard action {:?}", other),
        }
    }

    fn mouse(&self, cmd: &InputCommand) {
        match cmd.action {
            InputAction::Move => {
                if let Err(e) = self.injector.move_pointer(cmd.x, cmd.y) {
                    tracing::warn!("Pointer move failed: {}", e);
                }
            }
            InputAction::Scroll => {
                if cmd.y == 0 {
                    return;
                }
                if let Err(e) = self.injector.scroll(cmd.y * WHEEL_NOTCH) {
                    tracing::warn!("Scroll failed: {}", e);
                }
            }
            InputAction::Press | InputAction::Release | InputAction::Click => {
                let button = match cmd.button {
                    Some(button) if button != MouseButton::None => button,
                    _ => {
                        tracing::debug!("Mouse {:?} without a button, dropping", cmd.action);
                        return;
                    }
                };
                match cmd.action {
                    InputAction::Press => self.button(button, true),
                    InputAction::Release => self.button(button, false),
                    _ => {
                        self.button(button, true);
                        self.button(button, false);
                    }
                }
            }
        }
    }

    fn key(&self, code: u16, down: bool) {
        if let Err(e) = self.injector.key(code, down) {
            tracing::warn!("Key {:#06x} injection failed: {}", code, e);
        }
    }

    fn button(&self, button: MouseButton, down: bool) {
        if let Err(e) = self.injector.button(button, down) {
            tracing::warn!("{} button injection failed: {}", button.name(), e);
        }
    }
}
