//! `modelops-events` -- event subjects, payload records, and the in-process
//! bus shared by the API service and its worker loops.

pub mod bus;
pub mod messages;
pub mod subject;

pub use bus::{Delivery, Event, EventBus, Subscription};
pub use subject::Subject;
