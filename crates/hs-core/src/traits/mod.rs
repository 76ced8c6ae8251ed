//! Seams to the agent's external collaborators

mod capture;
mod catalog;
mod input;

pub use capture::{CaptureSource, VideoStream};
pub use catalog::{ProgramCatalog, ProgramHandle, ProgramLauncher};
pub use input::InputInjector;
