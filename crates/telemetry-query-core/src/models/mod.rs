//! Request and response models for the telemetry query API

mod clause;
mod primitive;
mod request;
mod response;

pub use clause::*;
pub use primitive::*;
pub use request::*;
pub use response::*;
