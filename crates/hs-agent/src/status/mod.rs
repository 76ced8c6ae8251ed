//! Availability reporting to the coordinator

mod reporter;

pub use reporter::{
    SessionActivity, CoordinatorStatusPublisher, StatusPublisher, StatusReporter,
    STATUS_QUEUE_CAPACITY,
};
