//! Remote input dispatch
//!
//! Decoded [`InputCommand`](hs_protocol::InputCommand)s are mapped onto an
//! [`InputInjector`](hs_core::traits::InputInjector). Dispatch never fails:
//! unmappable commands and injector errors are logged and dropped.

mod dispatch;
mod injector;

pub use dispatch::{InputDispatcher, WHEEL_NOTCH};
pub use injector::{default_injector, LogInjector};

#[cfg(feature = "enigo")]
pub use injector::EnigoInjector;
