use std::sync::Arc;

use hs_core::traits::InputInjector;
use hs_core::InjectError;
use hs_protocol::MouseButton;

/// Injector that only logs, for hosts without an input backend
#[derive(Debug, Default, Clone, Copy)]
pub struct LogInjector;

impl InputInjector for LogInjector {
    fn key(&self, scan_code: u16, down: bool) -> Result<(), InjectError> {
        tracing::debug!(scan_code, down, "key");
        Ok(())
    }

    fn move_pointer(&self, dx: i32, dy: i32) -> Result<(), InjectError> {
        tracing::trace!(dx, dy, "pointer move");
        Ok(())
    }

    fn button(&self, button: MouseButton, down: bool) -> Result<(), InjectError> {
        tracing::debug!(button = button.name(), down, "button");
        Ok(())
    }

    fn scroll(&self, delta: i32) -> Result<(), InjectError> {
        tracing::debug!(delta, "scroll");
        Ok(())
    }
}

#[cfg(feature = "enigo")]
pub use self::enigo_backend::EnigoInjector;

#[cfg(feature = "enigo")]
mod enigo_backend {
    use std::sync::Mutex;

    use enigo::{Axis, Button, Coordinate, Direction, Enigo, Keyboard, Mouse, Settings};

    use super::*;
    use crate::input::WHEEL_NOTCH;

    /// Injects input into the OS through `enigo`
    pub struct EnigoInjector {
        enigo: Mutex<Enigo>,
    }

    impl EnigoInjector {
        pub fn new() -> Result<Self, InjectError> {
            let enigo = Enigo::new(&Settings::default())
                .map_err(|e| InjectError::Unavailable(e.to_string()))?;
            Ok(Self {
                enigo: Mutex::new(enigo),
            })
        }

        fn with<F>(&self, f: F) -> Result<(), InjectError>
        where
            F: FnOnce(&mut Enigo) -> enigo::InputResult<()>,
        {
            let mut enigo = self
                .enigo
                .lock()
                .map_err(|_| InjectError::Backend("enigo lock poisoned".into()))?;
            f(&mut enigo).map_err(|e| InjectError::Backend(e.to_string()))
        }
    }

    fn direction(down: bool) -> Direction {
        if down {
            Direction::Press
        } else {
            Direction::Release
        }
    }

    impl InputInjector for EnigoInjector {
        fn key(&self, scan_code: u16, down: bool) -> Result<(), InjectError> {
            self.with(|e| e.raw(scan_code, direction(down)))
        }

        fn move_pointer(&self, dx: i32, dy: i32) -> Result<(), InjectError> {
            self.with(|e| e.move_mouse(dx, dy, Coordinate::Rel))
        }

        fn button(&self, button: MouseButton, down: bool) -> Result<(), InjectError> {
            let button = match button {
                MouseButton::Left => Button::Left,
                MouseButton::Right => Button::Right,
                MouseButton::Middle => Button::Middle,
                MouseButton::None => return Ok(()),
            };
            self.with(|e| e.button(button, direction(down)))
        }

        fn scroll(&self, delta: i32) -> Result<(), InjectError> {
            // enigo scrolls in whole notches
            let notches = delta / WHEEL_NOTCH;
            if notches == 0 {
                return Ok(());
            }
            self.with(|e| e.scroll(notches, Axis::Vertical))
        }
    }
}

/// The injector used by the agent binary
pub fn default_injector() -> Arc<dyn InputInjector> {
    #[cfg(feature = "enigo")]
    {
        match EnigoInjector::new() {
            Ok(injector) => return Arc::new(injector),
            Err(e) => tracing::warn!("Input injection unavailable, logging only: {}", e),
        }
    }
    Arc::new(LogInjector)
}
